use colored::Colorize;
use skiff_cloud::{ConditionType, StateStore};
use std::path::PathBuf;

pub async fn handle(config: PathBuf, cache: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let (spec, cache_path) = super::resolve_environment(&config, cache).await?;

    let store = StateStore::new(&cache_path);
    if !store.exists() {
        println!("environment {} has no cache file (never created?)", spec.name.cyan());
        return Ok(());
    }
    let env = store.load().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&env.status)?);
        return Ok(());
    }

    println!("environment: {}", env.spec.name.cyan());
    println!();

    println!("{}", "conditions:".bold());
    for condition in &env.status.conditions {
        let marker = if condition.status {
            match condition.condition_type {
                ConditionType::Available => "●".green(),
                ConditionType::Degraded => "●".red(),
                ConditionType::Progressing => "●".yellow(),
                ConditionType::Terminated => "●".normal(),
            }
        } else {
            "○".dimmed()
        };
        let line = format!(
            "  {marker} {:<12} {:<24} {}",
            condition.condition_type.to_string(),
            condition.reason,
            condition.message
        );
        println!("{}", line.trim_end());
    }

    if !env.status.properties.is_empty() {
        println!();
        println!("{}", "properties:".bold());
        for property in &env.status.properties {
            println!("  {:<24} {}", property.name, property.value);
        }
    }

    if let Some(cluster) = &env.status.cluster {
        println!();
        println!(
            "{} {}/{} ready, phase {}",
            "cluster:".bold(),
            cluster.ready_nodes,
            cluster.total_nodes,
            cluster.phase
        );
        if let Some(endpoint) = &cluster.control_plane_endpoint {
            println!("  endpoint: {}", endpoint.cyan());
        }
        for node in &cluster.nodes {
            println!(
                "  {:<20} {:<14} {:<20} {}",
                node.name,
                node.role.to_string(),
                node.instance_id,
                node.public_ip.as_deref().unwrap_or("-")
            );
        }
    }

    Ok(())
}
