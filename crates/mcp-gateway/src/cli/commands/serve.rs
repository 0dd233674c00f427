//! `serve` command: assemble settings, load upstreams, run the health loop
//! and the client-facing HTTP endpoint until shutdown (spec §6).

use std::sync::Arc;

use tracing::{info, warn};

use crate::cli::args::ServeArgs;
use crate::config::{GatewaySettings, McpServersConfig};
use crate::endpoint::{self, EndpointState};
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::Gateway;

/// How many ports past the configured one to try before giving up (spec §6
/// "fallback to the next 10 free ports").
const PORT_FALLBACK_ATTEMPTS: u16 = 10;

pub async fn run(args: ServeArgs) -> GatewayResult<()> {
    let mut settings = GatewaySettings::from_env()?;
    args.apply(&mut settings);

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from("mcp-gateway.json"));
    let configured = McpServersConfig::load_from_path(&config_path)?;

    let gateway = Gateway::new(settings);
    gateway.refresh_discovery(&configured);
    gateway.auto_enable_configured().await;

    let health_loop = gateway.spawn_health_loop();

    let state = EndpointState::new(gateway.clone());
    let router = endpoint::router(state);

    let (listener, bound_addr) = bind_with_fallback(&gateway.settings().host, gateway.settings().port).await?;
    info!(addr = %bound_addr, "mcp-gateway listening");

    let serve_result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    health_loop.abort();

    serve_result.map_err(|e| GatewayError::internal(e.to_string()))?;
    info!("mcp-gateway shut down cleanly");
    Ok(())
}

async fn bind_with_fallback(
    host: &str,
    port: u16,
) -> GatewayResult<(tokio::net::TcpListener, std::net::SocketAddr)> {
    let mut last_err = None;
    for offset in 0..PORT_FALLBACK_ATTEMPTS {
        let candidate = port.saturating_add(offset);
        let addr = format!("{host}:{candidate}");
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                let bound = listener
                    .local_addr()
                    .map_err(|e| GatewayError::internal(e.to_string()))?;
                if offset > 0 {
                    warn!(requested = port, bound = candidate, "requested port was taken, fell back");
                }
                return Ok((listener, bound));
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(GatewayError::internal(format!(
        "could not bind {host}:{port}..{}: {}",
        port.saturating_add(PORT_FALLBACK_ATTEMPTS - 1),
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_with_fallback_finds_a_free_port() {
        let (_listener, addr) = bind_with_fallback("127.0.0.1", 0).await.unwrap();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
    }
}
