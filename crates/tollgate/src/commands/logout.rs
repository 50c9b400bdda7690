//! Logout command - drop stored tokens.

use anyhow::{Context as _, Result};
use clap::Args;

use super::Context;

/// Arguments for the logout command.
#[derive(Args, Debug)]
pub struct LogoutArgs {}

/// Run the logout command.
pub async fn run(_args: LogoutArgs, ctx: &Context) -> Result<()> {
    let store = ctx.store()?;
    let had_tokens = !store.get()?.is_empty();

    store.clear().context("Failed to remove stored tokens")?;
    tracing::debug!(had_tokens, "logged out");

    if ctx.json_output {
        println!("{}", serde_json::json!({ "logged_out": had_tokens }));
    } else if had_tokens {
        println!("Tokens removed.");
    } else {
        println!("No stored tokens found.");
    }

    Ok(())
}
