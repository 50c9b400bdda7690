//! Status command - shows stored token state.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;
use tollgate_client::TokenInfo;

use super::Context;

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {}

/// Status output for JSON mode.
#[derive(Debug, Serialize)]
struct StatusOutput {
    logged_in: bool,
    #[serde(flatten)]
    tokens: Option<TokenInfo>,
}

/// Run the status command.
pub async fn run(_args: StatusArgs, ctx: &Context) -> Result<()> {
    let info = ctx.store()?.info(&ctx.oracle())?;

    if ctx.json_output {
        let output = StatusOutput {
            logged_in: info
                .as_ref()
                .is_some_and(|i| !(i.is_expired && i.refresh_expired)),
            tokens: info,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let dim = Style::new().dim();

    println!();
    println!("{}", style("Token Status").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();

    match info {
        None => {
            println!("  {} Not logged in", dim.apply_to("Status:"));
            println!();
            println!("  {}", dim.apply_to("Log in with: tollgate login --data '{...}'"));
        }
        Some(info) => {
            let state = if info.is_expired && info.refresh_expired {
                Style::new().red().apply_to("● expired")
            } else if info.is_expired {
                Style::new().yellow().apply_to("● refresh pending")
            } else {
                Style::new().green().apply_to("● active")
            };
            println!("  {} {}", dim.apply_to("Status:"), state);
            println!("  {} {}", dim.apply_to("Expires:"), info.expires_in_display());
            if let Some(at) = info.access_expires_at {
                println!("  {} {}", dim.apply_to("Access token:"), at.to_rfc3339());
            }
            match info.refresh_expires_at {
                Some(at) => println!("  {} {}", dim.apply_to("Refresh token:"), at.to_rfc3339()),
                None if ctx.verbose => {
                    println!("  {} no readable expiry", dim.apply_to("Refresh token:"))
                }
                None => {}
            }
        }
    }

    println!();
    Ok(())
}
