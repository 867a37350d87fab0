use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};

/// Identity of the authenticated caller, injected into request extensions.
///
/// Real authentication lives in the gateway in front of this service; it
/// terminates the user's credentials and forwards the resolved account id
/// in the `X-User-Id` header. This middleware only lifts that header into
/// a typed extension, so handlers never read raw headers.
#[derive(Debug, Clone, Copy)]
pub struct CallerIdentity {
    pub user_id: i64,
}

pub async fn identity_middleware(
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let user_id = request
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|id| *id > 0)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    request
        .extensions_mut()
        .insert(CallerIdentity { user_id });

    Ok(next.run(request).await)
}
