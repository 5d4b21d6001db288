use axum::{extract::Request, middleware::Next, response::Response};

pub const ANONYMOUS: &str = "anonymous";

/// Identity of whoever issued an RPC.
#[derive(Clone, Debug)]
pub struct Caller {
    pub username: String,
}

/// Extracts the caller from auth proxy headers.
///
/// Checks `x-vm-user`, then `x-forwarded-user` (oauth2-proxy format), then
/// `x-user`. Unauthenticated calls are allowed and run as [`ANONYMOUS`].
pub async fn caller_middleware(mut req: Request, next: Next) -> Response {
    let username = req
        .headers()
        .get("x-vm-user")
        .or_else(|| req.headers().get("x-forwarded-user"))
        .or_else(|| req.headers().get("x-user"))
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| ANONYMOUS.to_string());

    req.extensions_mut().insert(Caller { username });

    next.run(req).await
}
