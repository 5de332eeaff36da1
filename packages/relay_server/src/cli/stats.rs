use anyhow::Result;

use agent_relay::RelayStats;

use crate::cli::ServerError;

/// Fetch and print the relay's connection stats.
pub async fn stats_command(server: &str, json: bool) -> Result<()> {
    let stats = match fetch_stats(server).await {
        Ok(stats) => stats,
        Err(ServerError::Unavailable) => {
            eprintln!("[relayd: no server at {server}]");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("User connections:  {}", stats.total_user_connections);
    println!("Agent connections: {}", stats.total_agent_connections);
    println!("Connected agents:  {}", stats.connected_agents.join(", "));
    println!("Watched agents:    {}", stats.agents_with_watchers.join(", "));
    Ok(())
}

async fn fetch_stats(server: &str) -> Result<RelayStats, ServerError> {
    let url = format!("{server}/v1/ws/stats");
    let resp = reqwest::get(&url)
        .await
        .map_err(ServerError::from_reqwest)?;

    if !resp.status().is_success() {
        return Err(anyhow::anyhow!("stats request failed: {}", resp.status()).into());
    }

    Ok(resp.json().await.map_err(ServerError::from_reqwest)?)
}
