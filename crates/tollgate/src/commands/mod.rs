//! CLI command handlers.

pub mod login;
pub mod logout;
pub mod request;
pub mod status;

use anyhow::{Result, anyhow};
use tollgate_client::{ClientConfig, ExpiryOracle, TokenStore, TollgateClient};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Loaded configuration with command-line overrides applied.
    pub config: ClientConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// A client for commands that talk to the API.
    pub fn client(&self) -> Result<TollgateClient> {
        if self.config.base_url.is_none() {
            return Err(anyhow!(
                "No base URL configured. Pass --base-url or set TOLLGATE_BASE_URL."
            ));
        }
        Ok(TollgateClient::from_config(self.config.clone())?)
    }

    /// The token store, for commands that never touch the network.
    pub fn store(&self) -> Result<TokenStore> {
        let dir = self
            .config
            .storage
            .resolve_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;
        tracing::debug!(dir = %dir.display(), "using token storage directory");
        Ok(TokenStore::with_data_dir(&dir))
    }

    pub fn oracle(&self) -> ExpiryOracle {
        ExpiryOracle::new(self.config.safety_margin())
    }
}

/// Hint printed when a command failed because the session is gone.
pub(crate) fn login_hint(error: &tollgate_client::Error) -> Option<&'static str> {
    error
        .requires_login()
        .then_some("Session expired. Run 'tollgate login' to sign in again.")
}
