//! `quiver tools` - list the tools a server exposes.

use anyhow::Result;
use clap::Args;
use console::{Style, style};

use quiver_mcp::Tool;

use super::{Context, descriptor, truncate};

/// Arguments for `quiver tools`.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Server id from the config
    pub server: String,

    /// Bypass the tool list cache
    #[arg(long)]
    pub refresh: bool,

    /// Show full input schemas
    #[arg(long)]
    pub full: bool,
}

/// Run `quiver tools`.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let desc = descriptor(ctx.server(&args.server)?);
    let manager = ctx.manager();

    let session = manager.acquire(&desc).await?;
    let listed = session.list_tools(args.refresh).await;
    let server_info = session.server_info();
    manager.release(&session, &desc.id).await;
    manager.shutdown().await;
    let tools = listed?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(tools.as_slice())?);
        return Ok(());
    }

    let dim = Style::new().dim();
    match server_info {
        Some(info) => println!(
            "{} {}",
            style(&desc.name).bold(),
            dim.apply_to(format!("({} v{})", info.name, info.version))
        ),
        None => println!("{}", style(&desc.name).bold()),
    }
    println!();

    if tools.is_empty() {
        println!("No tools exposed.");
        return Ok(());
    }

    for tool in tools.iter() {
        print_tool(tool, args.full)?;
    }

    Ok(())
}

fn print_tool(tool: &Tool, full: bool) -> Result<()> {
    let description = tool.description.as_deref().unwrap_or("");
    println!(
        "  {:<24} {}",
        style(&tool.name).cyan(),
        truncate(description, 60)
    );

    if full {
        let schema = serde_json::to_string_pretty(&tool.input_schema)?;
        for line in schema.lines() {
            println!("      {}", line);
        }
    } else if !tool.input_schema.required.is_empty() {
        println!(
            "  {:<24} required: {}",
            "",
            tool.input_schema.required.join(", ")
        );
    }
    Ok(())
}
