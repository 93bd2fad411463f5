// ABOUTME: Single-shot loopback HTTP listener that captures the OAuth redirect
// ABOUTME: The bound port is released on fulfillment, error, signal or cancellation

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::TokenPair;
use crate::error::{MigratorError, Result};
use crate::signals::ScopedSignals;

const CONFIRMATION_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>You're all set!</title>
    <style>
        body {
            font-family: sans-serif;
            margin-top: 100px;
            text-align: center;
        }
    </style>
</head>
<body>
    <p>Go back to the terminal to complete the migration.</p>
</body>
</html>
"#;

/// Which redirect query parameters complete the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// `access_token` (and optionally `refresh_token`) minted by the relay.
    Tokens,
    /// `code` and `state` from the authorization server, or an `error`.
    AuthorizationCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackPayload {
    Tokens(TokenPair),
    Code { code: String, state: Option<String> },
    Denied(String),
}

type Slot = Arc<Mutex<Option<oneshot::Sender<CallbackPayload>>>>;

#[derive(Debug)]
pub struct CallbackListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl CallbackListener {
    /// Binds the loopback port. Must happen before the user is sent to the
    /// authorization page.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::AddrInUse => MigratorError::PortInUse(port),
                _ => MigratorError::Io(e),
            })?;
        let addr = listener.local_addr()?;
        debug!("Callback listener bound on {}", addr);
        Ok(Self { listener, addr })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Serves requests until one qualifies, then closes the listener.
    /// Non-qualifying requests (favicon, preflight) get an empty 200.
    pub async fn wait(self, kind: CallbackKind, cancel: &CancellationToken) -> Result<CallbackPayload> {
        let (tx, mut rx) = oneshot::channel();
        let slot: Slot = Arc::new(Mutex::new(Some(tx)));
        let mut signals = ScopedSignals::install()?;

        loop {
            tokio::select! {
                payload = &mut rx => {
                    debug!("Callback received, closing listener on {}", self.addr);
                    return payload.map_err(|_| {
                        MigratorError::Io(io::Error::other("callback channel closed"))
                    });
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    debug!("Callback connection from {}", peer);
                    serve(stream, kind, slot.clone());
                }
                name = signals.recv() => {
                    info!("Received {}, closing callback listener", name);
                    return Err(MigratorError::Interrupted);
                }
                _ = cancel.cancelled() => {
                    return Err(MigratorError::Interrupted);
                }
            }
        }
    }
}

/// Binds `port` and waits for relay-issued tokens.
pub async fn await_callback(port: u16, cancel: &CancellationToken) -> Result<TokenPair> {
    let listener = CallbackListener::bind(port).await?;
    match listener.wait(CallbackKind::Tokens, cancel).await? {
        CallbackPayload::Tokens(tokens) => Ok(tokens),
        _ => Err(MigratorError::NoAccessToken),
    }
}

fn serve(stream: tokio::net::TcpStream, kind: CallbackKind, slot: Slot) {
    let io = TokioIo::new(stream);
    tokio::spawn(async move {
        let service = service_fn(move |req: Request<Incoming>| {
            let slot = slot.clone();
            async move { Ok::<_, Infallible>(handle(req.uri().query(), kind, &slot)) }
        });
        if let Err(e) = http1::Builder::new()
            .keep_alive(false)
            .serve_connection(io, service)
            .await
        {
            debug!("Callback connection error: {}", e);
        }
    });
}

fn handle(query: Option<&str>, kind: CallbackKind, slot: &Slot) -> Response<Full<Bytes>> {
    let params: HashMap<String, String> = query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let Some(payload) = extract(kind, &params) else {
        return empty();
    };

    let sender = match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    match sender.map(|tx| tx.send(payload).is_ok()) {
        Some(true) => confirmation(),
        _ => empty(),
    }
}

fn extract(kind: CallbackKind, params: &HashMap<String, String>) -> Option<CallbackPayload> {
    let non_empty = |key: &str| params.get(key).filter(|v| !v.is_empty()).cloned();
    match kind {
        CallbackKind::Tokens => non_empty("access_token").map(|access_token| {
            CallbackPayload::Tokens(TokenPair {
                access_token,
                refresh_token: non_empty("refresh_token"),
            })
        }),
        CallbackKind::AuthorizationCode => {
            if let Some(code) = non_empty("code") {
                return Some(CallbackPayload::Code {
                    code,
                    state: params.get("state").cloned(),
                });
            }
            non_empty("error").map(|error| {
                let description = non_empty("error_description").unwrap_or_default();
                CallbackPayload::Denied(format!("{} {}", error, description).trim().to_string())
            })
        }
    }
}

fn empty() -> Response<Full<Bytes>> {
    Response::new(Full::new(Bytes::new()))
}

fn confirmation() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(CONFIRMATION_PAGE.as_bytes())));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/html"),
    );
    response
}
