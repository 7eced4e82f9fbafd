//! `quiver servers` - list configured tool servers.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde_json::{Value, json};

use quiver_config::ServerEntry;
use quiver_mcp::McpManager;

use super::{Context, descriptor, truncate};

/// Arguments for `quiver servers`.
#[derive(Args, Debug)]
pub struct ServersArgs {
    /// Connect to each enabled server and list its tools
    #[arg(long)]
    pub tools: bool,
}

/// Run `quiver servers`.
pub async fn run(args: ServersArgs, ctx: &Context) -> Result<()> {
    let servers = &ctx.config.servers;

    if servers.is_empty() {
        if ctx.json_output {
            println!("[]");
        } else {
            println!("No servers configured.");
            println!();
            println!("Add a [[servers]] entry to quiver.toml or ~/.config/quiver/config.toml.");
        }
        return Ok(());
    }

    let manager = ctx.manager();
    let mut rows = Vec::with_capacity(servers.len());
    for server in servers {
        let tools = if args.tools && server.enabled {
            Some(tool_names(&manager, server).await)
        } else {
            None
        };
        rows.push((server, tools));
    }
    manager.shutdown().await;

    if ctx.json_output {
        let output: Vec<Value> = rows
            .iter()
            .map(|(server, tools)| server_json(server, tools.as_ref()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_table(&rows, ctx.verbose);
    }

    Ok(())
}

type ToolListing = std::result::Result<Vec<String>, String>;

async fn tool_names(manager: &McpManager, server: &ServerEntry) -> ToolListing {
    let desc = descriptor(server);
    let session = manager.acquire(&desc).await.map_err(|e| e.to_string())?;
    let listed = session.list_tools(false).await;
    manager.release(&session, &desc.id).await;

    listed
        .map(|tools| tools.iter().map(|t| t.name.clone()).collect())
        .map_err(|e| e.to_string())
}

fn target(server: &ServerEntry) -> String {
    if server.transport.is_http() {
        server.url.clone().unwrap_or_default()
    } else {
        let mut parts = vec![server.command.clone().unwrap_or_default()];
        parts.extend(server.args.iter().cloned());
        parts.join(" ")
    }
}

fn server_json(server: &ServerEntry, tools: Option<&ToolListing>) -> Value {
    let mut entry = json!({
        "id": server.id,
        "name": server.display_name(),
        "enabled": server.enabled,
        "transport": server.transport,
        "target": target(server),
    });

    match tools {
        Some(Ok(names)) => {
            entry["status"] = json!("connected");
            entry["tools"] = json!(names);
        }
        Some(Err(e)) => {
            entry["status"] = json!("error");
            entry["error"] = json!(e);
        }
        None => {}
    }
    entry
}

fn print_table(rows: &[(&ServerEntry, Option<ToolListing>)], verbose: bool) {
    let dim = Style::new().dim();
    let red = Style::new().red();

    println!(
        "{:<20} {:<16} {:<10} {:<40}",
        "ID", "TRANSPORT", "STATUS", "TARGET"
    );
    println!("{}", "-".repeat(88));

    for (server, tools) in rows {
        let transport = serde_json::to_value(server.transport)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let status = if server.enabled {
            style("enabled").green()
        } else {
            style("disabled").yellow()
        };

        println!(
            "{:<20} {:<16} {:<10} {:<40}",
            truncate(&server.id, 20),
            transport,
            status,
            truncate(&target(server), 40)
        );

        if verbose {
            for key in server.headers.keys() {
                println!("  {}", dim.apply_to(format!("header: {}", key)));
            }
            for key in server.env.keys() {
                println!("  {}", dim.apply_to(format!("env: {}", key)));
            }
        }

        match tools {
            Some(Ok(names)) if names.is_empty() => println!("  Tools: (none)"),
            Some(Ok(names)) => {
                println!("  Tools ({}):", names.len());
                for name in names {
                    println!("    - {}", name);
                }
            }
            Some(Err(e)) => println!("  {}", red.apply_to(format!("Error: {}", e))),
            None => {}
        }
    }
}
