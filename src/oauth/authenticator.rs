// ABOUTME: Drives the PKCE authorization flow end to end
// ABOUTME: Relay mode receives minted tokens; direct mode exchanges the code itself

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use super::listener::{CallbackKind, CallbackListener, CallbackPayload};
use super::session::OAuthSession;
use super::TokenPair;
use crate::error::{MigratorError, Result};
use crate::settings::{AuthMode, OAuthSettings};

const RELAY_CONNECT_PATH: &str = "/api/supabase/connect";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

pub struct Authenticator {
    settings: OAuthSettings,
    website_url: Url,
    http: Client,
}

impl Authenticator {
    pub fn new(settings: OAuthSettings, website_url: &str) -> Result<Self> {
        let website_url = Url::parse(website_url)
            .map_err(|e| MigratorError::Settings(format!("invalid website URL '{}': {}", website_url, e)))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MigratorError::Settings(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            settings,
            website_url,
            http,
        })
    }

    pub fn mode(&self) -> AuthMode {
        self.settings.mode
    }

    /// The page the user opens in a browser.
    pub fn authorization_url(&self, session: &OAuthSession, redirect_uri: &str) -> Result<Url> {
        match self.settings.mode {
            AuthMode::Relay => {
                let mut url = self.website_url.join(RELAY_CONNECT_PATH).map_err(|e| {
                    MigratorError::Settings(format!("invalid website URL: {}", e))
                })?;
                url.query_pairs_mut().append_pair("redirectUrl", redirect_uri);
                Ok(url)
            }
            AuthMode::Direct => {
                let mut url = Url::parse(&self.settings.authorize_url).map_err(|e| {
                    MigratorError::Settings(format!(
                        "invalid authorize URL '{}': {}",
                        self.settings.authorize_url, e
                    ))
                })?;
                url.query_pairs_mut()
                    .append_pair("client_id", &self.settings.client_id)
                    .append_pair("response_type", "code")
                    .append_pair("redirect_uri", redirect_uri)
                    .append_pair("scope", &self.settings.scope)
                    .append_pair("state", session.state())
                    .append_pair("code_challenge", &session.code_challenge())
                    .append_pair("code_challenge_method", "S256");
                Ok(url)
            }
        }
    }

    /// Runs the whole flow. `present` shows the authorization URL to the user
    /// once the listener is bound.
    pub async fn authenticate(
        &self,
        cancel: &CancellationToken,
        present: impl FnOnce(&Url),
    ) -> Result<TokenPair> {
        let listener = CallbackListener::bind(self.settings.callback_port).await?;
        let redirect_uri = listener.redirect_uri();
        let session = OAuthSession::begin(Some(&redirect_uri));
        let url = self.authorization_url(&session, &redirect_uri)?;
        present(&url);

        let kind = match self.settings.mode {
            AuthMode::Relay => CallbackKind::Tokens,
            AuthMode::Direct => CallbackKind::AuthorizationCode,
        };

        let tokens = match listener.wait(kind, cancel).await? {
            CallbackPayload::Tokens(tokens) => tokens,
            CallbackPayload::Code { code, state } => {
                session.verify_state(state.as_deref())?;
                self.exchange_code(session, &code, &redirect_uri).await?
            }
            CallbackPayload::Denied(reason) => {
                return Err(MigratorError::TokenExchangeFailed(format!(
                    "authorization denied: {}",
                    reason
                )))
            }
        };

        if tokens.access_token.is_empty() {
            return Err(MigratorError::NoAccessToken);
        }
        info!("Authentication complete");
        Ok(tokens)
    }

    async fn exchange_code(
        &self,
        session: OAuthSession,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenPair> {
        let verifier = session.into_verifier();
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", verifier.as_str()),
            ("client_id", self.settings.client_id.as_str()),
        ];

        let mut request = self
            .http
            .post(&self.settings.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form);
        if let Some(secret) = &self.settings.client_secret {
            request = request.basic_auth(&self.settings.client_id, Some(secret));
        }

        debug!("Exchanging authorization code at {}", self.settings.token_url);
        let response = request
            .send()
            .await
            .map_err(|e| MigratorError::TokenExchangeFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MigratorError::TokenExchangeFailed(format!(
                "status {}: {}",
                status, body
            )));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| MigratorError::TokenExchangeFailed(format!("invalid token response: {}", e)))?;

        match tokens.access_token {
            Some(access_token) if !access_token.is_empty() => Ok(TokenPair {
                access_token,
                refresh_token: tokens.refresh_token,
            }),
            _ => Err(MigratorError::NoAccessToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::session::code_challenge_for;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::body::Incoming;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    /// Token endpoint stub. Answers with `status`/`body` and records the form it received.
    async fn token_server(
        status: StatusCode,
        body: &'static str,
    ) -> (String, Arc<Mutex<Option<HashMap<String, String>>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(None));
        let recorded = received.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let recorded = recorded.clone();
                        async move {
                            let bytes = req.into_body().collect().await.unwrap().to_bytes();
                            let form: HashMap<String, String> =
                                url::form_urlencoded::parse(&bytes).into_owned().collect();
                            *recorded.lock().unwrap() = Some(form);
                            let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
                            *response.status_mut() = status;
                            Ok::<_, Infallible>(response)
                        }
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        (format!("http://{}/v1/oauth/token", addr), received)
    }

    fn direct_settings(token_url: String) -> OAuthSettings {
        OAuthSettings {
            mode: AuthMode::Direct,
            client_id: "client-123".to_string(),
            token_url,
            callback_port: 0,
            ..OAuthSettings::default()
        }
    }

    fn http() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    /// Simulates the browser: follows the authorization URL's redirect_uri with `query`.
    fn redirect_with(url: &Url, query: impl FnOnce(&HashMap<String, String>) -> String + Send + 'static) {
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        tokio::spawn(async move {
            let redirect = params["redirect_uri"].clone();
            let _ = http().get(format!("{}/favicon.ico", redirect)).send().await;
            let _ = http()
                .get(format!("{}/?{}", redirect, query(&params)))
                .send()
                .await;
        });
    }

    fn encode(pairs: &[(&str, &str)]) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish()
    }

    #[test]
    fn test_relay_authorization_url() {
        let auth = Authenticator::new(OAuthSettings::default(), "https://migrate.example.com").unwrap();
        let session = OAuthSession::begin(None);
        let url = auth
            .authorization_url(&session, "http://127.0.0.1:3434")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://migrate.example.com/api/supabase/connect?redirectUrl=http%3A%2F%2F127.0.0.1%3A3434"
        );
    }

    #[test]
    fn test_direct_authorization_url() {
        let auth = Authenticator::new(
            direct_settings("https://api.example.com/v1/oauth/token".to_string()),
            "https://migrate.example.com",
        )
        .unwrap();
        let session = OAuthSession::begin(Some("http://127.0.0.1:3434"));
        let url = auth
            .authorization_url(&session, "http://127.0.0.1:3434")
            .unwrap();
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        assert!(url.as_str().starts_with("https://api.supabase.com/v1/oauth/authorize?"));
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:3434");
        assert_eq!(params["scope"], "all");
        assert_eq!(params["state"], session.state());
        assert_eq!(params["code_challenge"], session.code_challenge());
        assert_eq!(params["code_challenge_method"], "S256");
    }

    #[tokio::test]
    async fn test_direct_flow_exchanges_code_with_verifier() {
        let (token_url, received) =
            token_server(StatusCode::OK, r#"{"access_token":"at","refresh_token":"rt"}"#).await;
        let auth = Authenticator::new(direct_settings(token_url), "https://migrate.example.com").unwrap();

        let challenge = Arc::new(Mutex::new(String::new()));
        let seen = challenge.clone();
        let tokens = auth
            .authenticate(&CancellationToken::new(), |url| {
                let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
                *seen.lock().unwrap() = params["code_challenge"].clone();
                redirect_with(url, |params| {
                    encode(&[("code", "the-code"), ("state", params["state"].as_str())])
                });
            })
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt"));

        let form = received.lock().unwrap().clone().unwrap();
        assert_eq!(form["grant_type"], "authorization_code");
        assert_eq!(form["code"], "the-code");
        assert_eq!(form["client_id"], "client-123");
        assert_eq!(
            code_challenge_for(&form["code_verifier"]),
            *challenge.lock().unwrap()
        );
    }

    #[tokio::test]
    async fn test_direct_flow_rejects_foreign_state() {
        let (token_url, received) = token_server(StatusCode::OK, r#"{"access_token":"at"}"#).await;
        let auth = Authenticator::new(direct_settings(token_url), "https://migrate.example.com").unwrap();

        let result = auth
            .authenticate(&CancellationToken::new(), |url| {
                redirect_with(url, |_| encode(&[("code", "the-code"), ("state", "{}")]));
            })
            .await;

        assert!(matches!(result, Err(MigratorError::StateMismatch)));
        assert!(received.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_direct_flow_token_endpoint_failure() {
        let (token_url, _) = token_server(StatusCode::BAD_REQUEST, "invalid_grant").await;
        let auth = Authenticator::new(direct_settings(token_url), "https://migrate.example.com").unwrap();

        let result = auth
            .authenticate(&CancellationToken::new(), |url| {
                redirect_with(url, |params| {
                    encode(&[("code", "the-code"), ("state", params["state"].as_str())])
                });
            })
            .await;

        match result {
            Err(MigratorError::TokenExchangeFailed(message)) => {
                assert!(message.contains("400"));
                assert!(message.contains("invalid_grant"));
            }
            other => panic!("expected TokenExchangeFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_direct_flow_without_access_token() {
        let (token_url, _) = token_server(StatusCode::OK, r#"{"refresh_token":"rt"}"#).await;
        let auth = Authenticator::new(direct_settings(token_url), "https://migrate.example.com").unwrap();

        let result = auth
            .authenticate(&CancellationToken::new(), |url| {
                redirect_with(url, |params| {
                    encode(&[("code", "the-code"), ("state", params["state"].as_str())])
                });
            })
            .await;

        assert!(matches!(result, Err(MigratorError::NoAccessToken)));
    }

    #[tokio::test]
    async fn test_relay_flow_receives_tokens() {
        let settings = OAuthSettings {
            callback_port: 0,
            ..OAuthSettings::default()
        };
        let auth = Authenticator::new(settings, "https://migrate.example.com").unwrap();

        let tokens = auth
            .authenticate(&CancellationToken::new(), |url| {
                let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
                let redirect = params["redirectUrl"].clone();
                tokio::spawn(async move {
                    let _ = http()
                        .get(format!("{}/?access_token=minted&refresh_token=r", redirect))
                        .send()
                        .await;
                });
            })
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "minted");
    }
}
