//! The proxy core: owns the listener, dispatches every inbound request
//! through the header-producer pipeline (match select → resolve →
//! build headers), and maps failures to client-visible status codes.

pub mod forward;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response, StatusCode};
use axum::routing::any;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::Config;
use crate::errors::AppError;

/// Owns the bound listener and the composed router: an `axum::Router`
/// plus the resolved `SocketAddr`, with `host()`/`port()`/`serve()`
/// accessors.
pub struct ProxyServer {
    app: Router,
    addr: SocketAddr,
}

struct AppState {
    config: Config,
    client: reqwest::Client,
}

impl ProxyServer {
    /// Builds the server, failing fast with `UnknownMode` if
    /// `proxy.mode` names anything other than the one implemented mode.
    pub fn new(config: Config) -> Result<Self, AppError> {
        if config.proxy.mode != "httpproxy" {
            return Err(AppError::UnknownMode(config.proxy.mode.clone()));
        }

        let addr: SocketAddr = format!("0.0.0.0:{}", config.proxy.port)
            .parse()
            .map_err(|e| AppError::config(format!("invalid proxy.port: {e}")))?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Upstream(e.to_string()))?;

        let state = Arc::new(AppState { config, client });
        let app = Router::new()
            .fallback(any(handle))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        Ok(Self { app, addr })
    }

    pub fn host(&self) -> std::net::IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn serve(self) -> Result<(), AppError> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    pub async fn serve_with_shutdown(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), AppError> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| AppError::Upstream(e.to_string()))
    }
}

/// The proxy has no fixed route table; every method and path is
/// forwarded through a single fallback handler.
async fn handle(State(state): State<Arc<AppState>>, req: Request<Body>) -> Response<Body> {
    match forward::handle_request(&state.config, &state.client, req).await {
        Ok(response) => response,
        Err(err) => error_response(&state.config, err),
    }
}

/// Error exposure policy: either the raw error text, or a random
/// 64-bit identifier logged alongside the full error and echoed back
/// to the client.
fn error_response(config: &Config, err: AppError) -> Response<Body> {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let body = if config.proxy.expose_errors_to_client {
        err.to_string()
    } else {
        let id: u64 = fastrand::u64(..);
        warn!(error_id = id, error = %err, "request failed");
        format!("Request error {id} see log for further details.")
    };

    Response::builder()
        .status(status)
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_mode_is_rejected_at_construction() {
        let config = Config::parse(
            "proxy:\n  mode: reverseproxy\n  port: 8080\nmatches: []\n",
            &crate::datasources::Registry::with_builtins(),
        )
        .unwrap();
        let err = ProxyServer::new(config).unwrap_err();
        assert!(matches!(err, AppError::UnknownMode(_)));
    }

    #[test]
    fn httpproxy_mode_constructs_successfully() {
        let config = Config::parse(
            "proxy:\n  mode: httpproxy\n  port: 18080\nmatches: []\n",
            &crate::datasources::Registry::with_builtins(),
        )
        .unwrap();
        let server = ProxyServer::new(config).unwrap();
        assert_eq!(server.port(), 18080);
    }
}
