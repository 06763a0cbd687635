use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use parley_types::api::Claims;

use crate::error::ApiError;
use crate::state::AppState;

/// Validated credential for one request: the decoded claims plus the raw
/// bearer token, which is forwarded on collaborator calls made on the
/// requester's behalf.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: Claims,
    pub token: String,
}

impl AuthContext {
    pub fn user_id(&self) -> uuid::Uuid {
        self.claims.sub
    }
}

/// Extract and validate the JWT from the Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    // Owned copy up front: the header borrow must end before the
    // extensions map is touched mutably.
    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthorized)?
        .to_string();

    let claims = decode_claims(&token, &state.jwt_secret).ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(AuthContext { claims, token });
    Ok(next.run(req).await)
}

/// Shared by the REST middleware and the WebSocket upgrade.
pub fn decode_claims(token: &str, secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}
