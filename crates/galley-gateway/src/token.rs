use jsonwebtoken::errors::Error;
use jsonwebtoken::{DecodingKey, Validation, decode};

use galley_types::api::Claims;

/// Validate an identity token (signature and expiry) and return its claims.
/// Used by both the REST middleware and the gateway handshake.
pub fn verify(token: &str, secret: &str) -> Result<Claims, Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

/// The token part of an `Authorization: Bearer <token>` value.
pub fn bearer(header_value: &str) -> Option<&str> {
    header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
