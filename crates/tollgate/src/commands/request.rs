//! Request command - send one authenticated request.

use anyhow::{Context as _, Result, anyhow, bail};
use clap::Args;
use console::Style;
use tollgate_client::{Method, Outcome};

use super::{Context, login_hint};

/// Arguments for the request command.
#[derive(Args, Debug)]
pub struct RequestArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE, ...)
    pub method: String,

    /// Path relative to the base URL
    pub path: String,

    /// JSON request body
    #[arg(short, long)]
    pub data: Option<String>,

    /// Query parameter as key=value (repeatable)
    #[arg(short, long = "query", value_name = "KEY=VALUE")]
    pub query: Vec<String>,
}

/// Run the request command.
pub async fn run(args: RequestArgs, ctx: &Context) -> Result<()> {
    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .map_err(|_| anyhow!("Invalid HTTP method: {}", args.method))?;

    let client = ctx.client()?;
    tracing::debug!(%method, path = %args.path, base_url = %client.base_url(), "sending request");
    let mut request = client.request(method, &args.path);

    for pair in &args.query {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Query parameter must be KEY=VALUE: {}", pair))?;
        request = request.query(key, value);
    }

    if let Some(data) = &args.data {
        let body: serde_json::Value =
            serde_json::from_str(data).context("--data must be valid JSON")?;
        request = request.json(&body);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            if let Some(hint) = login_hint(&e) {
                eprintln!("{}", Style::new().yellow().apply_to(hint));
            }
            return Err(e.into());
        }
    };

    if ctx.verbose {
        eprintln!("{}", Style::new().dim().apply_to(response.status()));
    }

    let body = if ctx.json_output {
        match response.json::<serde_json::Value>() {
            Ok(value) => serde_json::to_string_pretty(&value)?,
            Err(_) => response.text(),
        }
    } else {
        response.text()
    };
    if !body.is_empty() {
        println!("{}", body);
    }

    match response.outcome::<serde_json::Value>() {
        Ok(Outcome::Ok(_)) => Ok(()),
        Ok(Outcome::Unauthorized) => bail!("Request unauthorized (401)"),
        Ok(Outcome::ServerError { status, detail }) => {
            bail!("Request failed ({}): {}", status, detail)
        }
        // 2xx with a non-JSON body
        Err(_) if response.is_success() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
