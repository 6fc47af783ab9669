//! Echo of the resolved request view.

use axum::{Extension, Json};
use serde::Serialize;

use crate::{forwarded::AccessLogAttributes, middleware::ForwardedRequest};

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    #[serde(flatten)]
    pub request: Option<ForwardedRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_log: Option<AccessLogAttributes>,
}

/// Report how this request was resolved. `request` is absent when the
/// server was started without connection info.
pub async fn whoami(
    request: Option<Extension<ForwardedRequest>>,
    access_log: Option<Extension<AccessLogAttributes>>,
) -> Json<WhoAmI> {
    let request = request.map(|Extension(r)| r);
    if let Some(request) = &request {
        tracing::info!(
            remote_addr = %request.remote_addr,
            scheme = %request.scheme,
            server_name = %request.server_name,
            forwarded = request.forwarded,
            "whoami"
        );
    }

    Json(WhoAmI {
        request,
        access_log: access_log.map(|Extension(a)| a),
    })
}
