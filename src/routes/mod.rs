pub mod health;
pub mod whoami;

use axum::{Router, routing::get};

use crate::middleware::{RemoteIpState, remote_ip_middleware};

/// Router for `remote-ip serve`: health probes plus the resolved-view echo,
/// with the remote ip middleware in front of the echo.
pub fn router(state: RemoteIpState) -> Router {
    Router::new()
        .route("/whoami", get(whoami::whoami))
        .layer(axum::middleware::from_fn_with_state(state, remote_ip_middleware))
        .route("/health", get(health::health_check))
}
