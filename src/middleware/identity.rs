use crate::error::AppError;
use crate::models::{Principal, Role};
use uuid::Uuid;

/// Headers set by the upstream gateway after it has authenticated the caller.
/// This service trusts them; token verification is the gateway's job.
pub const PRINCIPAL_ID_HEADER: &str = "x-principal-id";
pub const PRINCIPAL_ROLE_HEADER: &str = "x-principal-role";

/// Middleware that turns the identity headers into a `Principal` extension.
pub async fn identity_middleware(
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, AppError> {
    let id = req
        .headers()
        .get(PRINCIPAL_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or(AppError::Unauthorized)?;

    let role: Role = req
        .headers()
        .get(PRINCIPAL_ROLE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Unauthorized)?
        .parse()
        .map_err(|_| AppError::Unauthorized)?;

    req.extensions_mut().insert(Principal { id, role });

    Ok(next.run(req).await)
}
