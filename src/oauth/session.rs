// ABOUTME: Single-use PKCE session holding the code verifier and state token
// ABOUTME: Consuming the session on exchange makes verifier reuse impossible

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{MigratorError, Result};

pub struct OAuthSession {
    code_verifier: String,
    state: String,
}

impl OAuthSession {
    /// Starts a session. `redirect_target` is carried opaquely in the state payload.
    pub fn begin(redirect_target: Option<&str>) -> Self {
        let state = serde_json::json!({
            "redirectUrl": redirect_target.unwrap_or_default(),
            "nonce": random_token(16),
        })
        .to_string();

        Self {
            code_verifier: random_token(32),
            state,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_parts(code_verifier: &str, state: &str) -> Self {
        Self {
            code_verifier: code_verifier.to_string(),
            state: state.to_string(),
        }
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// S256 transform of the verifier.
    pub fn code_challenge(&self) -> String {
        code_challenge_for(&self.code_verifier)
    }

    /// The redirect must hand back the state exactly as sent.
    pub fn verify_state(&self, returned: Option<&str>) -> Result<()> {
        match returned {
            Some(state) if state == self.state => Ok(()),
            _ => Err(MigratorError::StateMismatch),
        }
    }

    /// Surrenders the verifier for the token exchange, ending the session.
    pub fn into_verifier(self) -> String {
        self.code_verifier
    }
}

impl fmt::Debug for OAuthSession {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OAuthSession")
            .field("code_verifier", &"<redacted>")
            .field("state", &self.state)
            .finish()
    }
}

pub fn code_challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
