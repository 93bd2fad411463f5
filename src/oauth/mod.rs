// ABOUTME: OAuth2 authorization-code flow with PKCE for the destination provider
// ABOUTME: A loopback listener receives the redirect; tokens come from the relay or a direct exchange

pub mod authenticator;
pub mod listener;
pub mod session;

pub use authenticator::Authenticator;
pub use listener::{await_callback, CallbackKind, CallbackListener, CallbackPayload};
pub use session::OAuthSession;

use std::fmt;

/// Tokens issued for the management API.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}
