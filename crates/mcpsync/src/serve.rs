//! `mcpsync serve`

use anyhow::{Context, Result};
use clap::Args;
use mcpsync_auth::AuthValidator;
use mcpsync_server::{ServerConfig, SyncServer};
use mcpsync_settings::SyncSettings;
use tracing::{info, warn};

/// Options for `serve`.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    pub port: Option<u16>,
}

impl ServeArgs {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
    }
}

/// Run the server until ctrl-c.
pub async fn run(settings: SyncSettings, args: ServeArgs) -> Result<()> {
    let mut config = ServerConfig::from_settings(&settings);
    args.apply(&mut config);

    let validator =
        AuthValidator::from_settings(&settings.auth).context("failed to configure token validation")?;

    let server = match mcpsync_server::metrics::install_recorder() {
        Ok(handle) => SyncServer::with_metrics(config, validator, handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            SyncServer::new(config, validator)
        }
    };

    let handle = server.listen().await.context("failed to bind server")?;
    info!(addr = %handle.addr(), "mcpsync listening on ws://{}/ws", handle.addr());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    if !handle.shutdown().await {
        warn!("some tasks did not stop before the drain timeout");
    }
    info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings() {
        let mut config = ServerConfig::from_settings(&SyncSettings::default());
        assert_eq!(config.port, 8765);
        ServeArgs {
            host: Some("0.0.0.0".into()),
            port: Some(0),
        }
        .apply(&mut config);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 0);
    }

    #[test]
    fn absent_flags_keep_settings() {
        let mut config = ServerConfig::from_settings(&SyncSettings::default());
        ServeArgs::default().apply(&mut config);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8765);
    }

    #[tokio::test]
    async fn missing_secret_fails_fast() {
        let err = run(SyncSettings::default(), ServeArgs::default())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("no JWT secret configured"));
    }
}
