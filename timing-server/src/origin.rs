//! Connection admission policy.
//!
//! The distilled protocol stubbed this out as an `autoAcceptConnections` flag that was always
//! `false` and never actually consulted. Reworked here as a trait seam so an embedder can plug in
//! an allowlist, a signed-token check, or anything else, without touching the accept loop.

use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// Decides whether an incoming WebSocket handshake should be admitted.
pub trait OriginPolicy: Send + Sync {
    /// `origin` is the `Origin` header value, if the client sent one.
    fn accept(&self, origin: Option<&str>) -> bool;
}

/// Admits every handshake regardless of origin. The default policy: matches the distilled
/// protocol's observable behavior (nothing was ever actually rejected) without carrying forward
/// its dead flag.
pub struct PermissiveOriginPolicy;

impl OriginPolicy for PermissiveOriginPolicy {
    fn accept(&self, _origin: Option<&str>) -> bool {
        true
    }
}

/// Apply `policy` as a `tokio_tungstenite` handshake callback.
pub fn handshake_callback(
    policy: &dyn OriginPolicy,
    request: &Request,
    response: Response,
) -> Result<Response, ErrorResponse> {
    let origin = request
        .headers()
        .get("origin")
        .and_then(|v| v.to_str().ok());

    if policy.accept(origin) {
        Ok(response)
    } else {
        use tokio_tungstenite::tungstenite::http::{Response as HttpResponse, StatusCode};
        let rejection: ErrorResponse = HttpResponse::builder()
            .status(StatusCode::FORBIDDEN)
            .body(None::<String>)
            .expect("a status-only response always builds");
        Err(rejection)
    }
}
