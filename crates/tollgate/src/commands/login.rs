//! Login command - exchange credentials for a token pair.

use anyhow::{Context as _, Result};
use clap::Args;
use console::Style;
use serde::Serialize;
use tollgate_client::Scope;

use super::Context;

/// Arguments for the login command.
#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Login endpoint, relative to the base URL
    #[arg(default_value = "auth/login")]
    pub path: String,

    /// Credentials as a JSON object
    #[arg(short, long)]
    pub data: String,
}

#[derive(Debug, Serialize)]
struct LoginOutput {
    logged_in: bool,
    expires_in: Option<String>,
}

/// Run the login command.
pub async fn run(args: LoginArgs, ctx: &Context) -> Result<()> {
    let credentials: serde_json::Value =
        serde_json::from_str(&args.data).context("--data must be valid JSON")?;

    let client = ctx.client()?;
    // A one-shot process has nowhere to keep a transient session.
    client
        .login(&args.path, &credentials, Scope::Durable)
        .await
        .context("Login failed")?;

    let expires_in = client
        .store()
        .info(client.oracle())?
        .map(|info| info.expires_in_display());

    if ctx.json_output {
        let output = LoginOutput {
            logged_in: true,
            expires_in,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let green = Style::new().green();
        println!("{}", green.apply_to("Logged in."));
        if let Some(expires_in) = expires_in {
            println!("Access token expires in: {}", expires_in);
        }
    }

    Ok(())
}
