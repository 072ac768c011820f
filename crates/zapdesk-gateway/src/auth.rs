// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bearer-token authentication for the operator API and UI sockets.
//!
//! The `/v1` API is fail-closed: with no token configured every request is
//! rejected. Sockets are open when no token is configured, so a UI on a
//! private network works without setup.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

#[derive(Clone, Default)]
pub struct AuthConfig {
    /// Expected bearer token.
    pub bearer_token: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

impl AuthConfig {
    pub fn new(bearer_token: Option<String>) -> Self {
        Self {
            bearer_token: bearer_token.filter(|t| !t.is_empty()),
        }
    }

    /// Whether a socket presenting `token` may connect.
    pub fn accepts_socket(&self, token: Option<&str>) -> bool {
        match &self.bearer_token {
            None => true,
            Some(expected) => token == Some(expected.as_str()),
        }
    }
}

/// Middleware that requires `Authorization: Bearer <token>`.
pub async fn auth_middleware(
    State(auth): State<AuthConfig>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = auth.bearer_token.as_deref() else {
        tracing::error!("gateway has no bearer token configured -- rejecting request");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let presented = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented == Some(expected) {
        return Ok(next.run(request).await);
    }
    Err(StatusCode::UNAUTHORIZED)
}
