//! `quiver call` - invoke a tool on a server.

use std::io::Write;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use serde_json::Value;

use quiver_mcp::CallOutcome;

use super::{Context, descriptor};

/// Arguments for `quiver call`.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Server id from the config
    pub server: String,

    /// Tool name
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(long, short, default_value = "{}")]
    pub args: String,

    /// Print streamed chunks as they arrive
    #[arg(long)]
    pub stream: bool,
}

/// Parse `--args`, which must be a JSON object.
fn parse_arguments(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object");
    }
    Ok(value)
}

/// Run `quiver call`.
pub async fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let arguments = parse_arguments(&args.args)?;
    let desc = descriptor(ctx.server(&args.server)?);
    let manager = ctx.manager();

    let session = manager.acquire(&desc).await?;
    let result = if args.stream {
        let mut print_chunk = |chunk: &Value| {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", chunk);
        };
        session
            .call_tool(&args.tool, arguments, Some(&mut print_chunk))
            .await
    } else {
        session.call_tool(&args.tool, arguments, None).await
    };
    manager.release(&session, &desc.id).await;
    manager.shutdown().await;

    let outcome = CallOutcome::from_result(result);
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    match outcome {
        CallOutcome::Ok { ok } => {
            if !ctx.json_output {
                match ok {
                    Value::String(text) => println!("{}", text),
                    other => println!("{}", serde_json::to_string_pretty(&other)?),
                }
            }
            Ok(())
        }
        CallOutcome::Error {
            error,
            message,
            retryable,
        } => {
            tracing::debug!(?error, retryable, "tool call failed");
            bail!("{} failed: {}", args.tool, message)
        }
    }
}
