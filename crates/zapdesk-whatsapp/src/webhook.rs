// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Business API webhook handshake and payload signatures.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use zapdesk_core::ZapdeskError;

type HmacSha256 = Hmac<Sha256>;

/// Query parameters of the subscription handshake.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Checks the GET handshake and returns the challenge to echo.
///
/// Fails unless the mode is `subscribe` and the token equals the channel's
/// stored token. A channel without a stored token never verifies.
pub fn verify_subscription(
    params: &VerifyParams,
    expected_token: Option<&str>,
) -> Result<String, ZapdeskError> {
    if params.mode.as_deref() != Some("subscribe") {
        return Err(ZapdeskError::Validation("hub.mode must be `subscribe`".into()));
    }
    let Some(expected) = expected_token.filter(|t| !t.is_empty()) else {
        return Err(ZapdeskError::Validation("channel has no verify token".into()));
    };
    if params.verify_token.as_deref() != Some(expected) {
        return Err(ZapdeskError::Validation("verify token mismatch".into()));
    }
    Ok(params.challenge.clone().unwrap_or_default())
}

/// Verifies an `X-Hub-Signature-256: sha256=<hex>` header in constant time.
pub fn verify_signature(app_secret: &str, header: &str, body: &[u8]) -> bool {
    let hex_sig = header.strip_prefix("sha256=").unwrap_or(header);
    let Ok(expected) = hex::decode(hex_sig.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Produces the header value for `body`; used by tests and the CLI.
pub fn sign(app_secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match HmacSha256::new_from_slice(app_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
