//! `quiver health` - probe servers and sweep broken sessions.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde_json::json;

use quiver_config::ServerEntry;
use quiver_mcp::McpManager;

use super::{Context, descriptor, truncate};

/// Arguments for `quiver health`.
#[derive(Args, Debug)]
pub struct HealthArgs {
    /// Only check this server
    pub server: Option<String>,
}

#[derive(Debug, serde::Serialize)]
struct HealthReport {
    id: String,
    healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Run `quiver health`.
pub async fn run(args: HealthArgs, ctx: &Context) -> Result<()> {
    let targets: Vec<&ServerEntry> = match &args.server {
        Some(id) => vec![ctx.server(id)?],
        None => ctx.config.servers.iter().filter(|s| s.enabled).collect(),
    };

    let manager = ctx.manager();
    let mut reports = Vec::with_capacity(targets.len());
    for server in targets {
        reports.push(probe(&manager, server).await);
    }

    let removed = manager.cleanup().await;
    let stats = manager.stats();
    manager.shutdown().await;

    if ctx.json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "servers": reports,
                "removed": removed,
                "pool": stats,
            }))?
        );
        return Ok(());
    }

    if reports.is_empty() {
        println!("No enabled servers to check.");
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style("Server Health").bold());
    for report in &reports {
        let status = if report.healthy {
            style("healthy").green()
        } else {
            style("unhealthy").red()
        };
        println!("  {:<24} {}", truncate(&report.id, 24), status);
        if let Some(error) = &report.error {
            println!("  {:<24} {}", "", dim.apply_to(error));
        }
    }

    println!();
    println!("{}", style("Pool").bold());
    println!("  Sessions:    {}", style(stats.total_sessions()).cyan());
    println!("  Removed:     {}", style(removed).cyan());
    if ctx.verbose {
        for (id, server) in &stats.servers {
            println!(
                "  {}",
                dim.apply_to(format!(
                    "{}: pooled={} idle={} in_use={} unhealthy={} shared={}",
                    id, server.pooled, server.idle, server.in_use, server.unhealthy, server.shared
                ))
            );
        }
    }

    Ok(())
}

/// Acquire a session, run an active health check, and hand it back.
async fn probe(manager: &McpManager, server: &ServerEntry) -> HealthReport {
    let desc = descriptor(server);
    match manager.acquire(&desc).await {
        Ok(session) => {
            let healthy = session.check_health().await;
            manager.release(&session, &desc.id).await;
            HealthReport {
                id: desc.id,
                healthy,
                error: None,
            }
        }
        Err(e) => HealthReport {
            id: desc.id,
            healthy: false,
            error: Some(e.to_string()),
        },
    }
}
