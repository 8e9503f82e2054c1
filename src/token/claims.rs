//! Local JWT payload decoding.
//!
//! Only the payload segment is read. The signature is not checked: decoded
//! claims drive expiry bookkeeping and are never a trust decision.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::token::types::{DecodedClaims, TokenError};

/// Decode the claims of a compact JWT without verifying it.
pub fn decode_claims(token: &str) -> Result<DecodedClaims, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::Malformed(segments.len()));
    }

    let payload = URL_SAFE_NO_PAD.decode(segments[1].trim_end_matches('='))?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Build an unsigned token carrying the given claims. Used by tests and the
/// local mock backend.
pub fn encode_unsigned(claims: &DecodedClaims) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap_or_default());
    format!("{header}.{payload}.")
}
