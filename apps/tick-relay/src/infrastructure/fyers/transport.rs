//! Fyers WebSocket Transport
//!
//! `FeedTransport` over `tokio-tungstenite`.
//!
//! # Handshake
//!
//! 1. Open the socket with `Authorization: <app_id>:<access_token>`
//! 2. Wait for `{"s":"ok","type":"cn",...}`
//!
//! An HTTP 401/403 on upgrade or a `cn` frame with `s:"error"` means the
//! credential was rejected. The whole handshake is bounded by
//! `handshake_timeout`.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::codec::FyersCodec;
use crate::application::ports::{Credential, FeedError, FeedRequest, FeedSession, FeedTransport};
use crate::domain::streaming::FeedFrame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default handshake bound.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for the Fyers data socket.
#[derive(Debug, Clone)]
pub struct FyersTransportConfig {
    /// Socket URL.
    pub url: String,
    /// Application id, prefixed to the token in the auth header.
    pub app_id: String,
    /// Upper bound for connect plus acknowledgement.
    pub handshake_timeout: Duration,
}

impl FyersTransportConfig {
    /// Create a configuration with the default handshake timeout.
    #[must_use]
    pub fn new(url: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            app_id: app_id.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Set the handshake timeout.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Opens authenticated sessions on the Fyers data socket.
#[derive(Debug, Clone)]
pub struct FyersTransport {
    config: FyersTransportConfig,
    codec: FyersCodec,
}

impl FyersTransport {
    /// Create a transport.
    #[must_use]
    pub const fn new(config: FyersTransportConfig) -> Self {
        Self {
            config,
            codec: FyersCodec::new(),
        }
    }

    fn handshake_request(
        &self,
        credential: &Credential,
    ) -> Result<tungstenite::handshake::client::Request, FeedError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| FeedError::Transport(format!("invalid feed URL: {e}")))?;

        let header = HeaderValue::from_str(&format!("{}:{}", self.config.app_id, credential.expose()))
            .map_err(|_| FeedError::AuthRejected("credential is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, header);

        Ok(request)
    }

    async fn open(&self, credential: &Credential) -> Result<FyersSession, FeedError> {
        let request = self.handshake_request(credential)?;
        tracing::info!(url = %self.config.url, "Connecting to Fyers data socket");

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(map_connect_error)?;

        let mut session = FyersSession {
            stream,
            codec: self.codec.clone(),
            pending: VecDeque::new(),
        };
        session.await_connection_ack().await?;
        Ok(session)
    }
}

#[async_trait]
impl FeedTransport for FyersTransport {
    async fn connect(&self, credential: &Credential) -> Result<Box<dyn FeedSession>, FeedError> {
        match tokio::time::timeout(self.config.handshake_timeout, self.open(credential)).await {
            Ok(Ok(session)) => {
                tracing::info!("Fyers data socket authenticated");
                Ok(Box::new(session))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(FeedError::Transport(format!(
                "handshake timed out after {:?}",
                self.config.handshake_timeout
            ))),
        }
    }
}

fn map_connect_error(error: tungstenite::Error) -> FeedError {
    match error {
        tungstenite::Error::Http(response)
            if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) =>
        {
            FeedError::AuthRejected(format!("upgrade refused with {}", response.status()))
        }
        other => FeedError::Transport(other.to_string()),
    }
}

// =============================================================================
// Session
// =============================================================================

/// One authenticated data socket.
struct FyersSession {
    stream: WsStream,
    codec: FyersCodec,
    /// Frames that arrived before the handshake acknowledgement.
    pending: VecDeque<String>,
}

impl FyersSession {
    async fn await_connection_ack(&mut self) -> Result<(), FeedError> {
        loop {
            let text = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => text.to_string(),
                Some(Ok(Message::Close(frame))) => {
                    return Err(FeedError::Transport(format!(
                        "closed during handshake: {frame:?}"
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(FeedError::Transport(e.to_string())),
                None => return Err(FeedError::Transport("closed during handshake".into())),
            };

            let ack = self.codec.decode(&text, Utc::now()).ok().and_then(|frames| {
                frames.into_iter().find_map(|frame| match frame {
                    FeedFrame::Control(control) if control.is_connection() => Some(control),
                    _ => None,
                })
            });

            match ack {
                Some(control) if control.is_ok() => return Ok(()),
                Some(control) => return Err(FeedError::AuthRejected(control.message)),
                None => self.pending.push_back(text),
            }
        }
    }
}

#[async_trait]
impl FeedSession for FyersSession {
    async fn send(&mut self, request: &FeedRequest) -> Result<(), FeedError> {
        let text = self
            .codec
            .encode(request)
            .map_err(|e| FeedError::Transport(format!("encode failed: {e}")))?;

        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, FeedError>> {
        if let Some(text) = self.pending.pop_front() {
            return Some(Ok(text));
        }

        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(text) => return Some(Ok(text.to_string())),
                    Err(_) => tracing::debug!(len = bytes.len(), "Ignoring non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    tracing::info!(frame = ?frame, "Fyers data socket closed");
                    return None;
                }
                Ok(_) => {}
                Err(e) => return Some(Err(FeedError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "Error closing Fyers data socket");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    use super::*;
    use crate::domain::subscription::InstrumentSymbol;

    const CONNECTED: &str = r#"{"s":"ok","code":200,"message":"Connected","type":"cn"}"#;

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    fn transport(url: &str) -> FyersTransport {
        FyersTransport::new(
            FyersTransportConfig::new(url, "APP-100").with_handshake_timeout(Duration::from_secs(2)),
        )
    }

    #[test]
    fn request_carries_authorization_header() {
        let transport = transport("wss://socket.fyers.in/hsm/v1-5/prod");
        let request = transport
            .handshake_request(&Credential::new("token-abc"))
            .unwrap();

        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "APP-100:token-abc"
        );
    }

    #[test]
    fn invalid_url_is_transport_error() {
        let result = transport("not a url").handshake_request(&Credential::new("t"));
        assert!(matches!(result, Err(FeedError::Transport(_))));
    }

    #[tokio::test]
    async fn handshake_then_subscribe_and_receive() {
        let (listener, url) = listener().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, |req: &Request, resp: Response| {
                assert_eq!(req.headers().get(AUTHORIZATION).unwrap(), "APP-100:token-abc");
                Ok::<_, ErrorResponse>(resp)
            })
            .await
            .unwrap();

            ws.send(Message::Text(CONNECTED.into())).await.unwrap();

            let subscribe = match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => text.to_string(),
                other => panic!("unexpected {other:?}"),
            };
            ws.send(Message::Text(
                r#"{"symbol":"NSE:SBIN-EQ","ltp":812.5}"#.into(),
            ))
            .await
            .unwrap();
            subscribe
        });

        let mut session = transport(&url)
            .connect(&Credential::new("token-abc"))
            .await
            .unwrap();
        session
            .send(&FeedRequest::Subscribe(vec![
                InstrumentSymbol::parse("NSE:SBIN-EQ").unwrap(),
            ]))
            .await
            .unwrap();

        let tick = session.recv().await.unwrap().unwrap();
        assert!(tick.contains("812.5"));

        let subscribe: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(subscribe["T"], "SUB_DATA");
        assert_eq!(subscribe["SUB_T"], 1);
        assert_eq!(subscribe["SLIST"][0], "NSE:SBIN-EQ");
    }

    #[tokio::test]
    async fn frames_before_ack_are_not_lost() {
        let (listener, url) = listener().await;
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text(r#"{"symbol":"NSE:TCS-EQ","ltp":3500}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Text(CONNECTED.into())).await.unwrap();
            let _ = ws.next().await;
        });

        let mut session = transport(&url).connect(&Credential::new("t")).await.unwrap();
        let first = session.recv().await.unwrap().unwrap();
        assert!(first.contains("NSE:TCS-EQ"));
    }

    #[tokio::test]
    async fn upgrade_401_is_auth_rejected() {
        let (listener, url) = listener().await;
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let _ = tokio_tungstenite::accept_hdr_async(tcp, |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
                let mut error = ErrorResponse::new(Some("invalid token".to_string()));
                *error.status_mut() = StatusCode::UNAUTHORIZED;
                Err(error)
            })
            .await;
        });

        let result = transport(&url).connect(&Credential::new("bad")).await;
        assert!(matches!(result, Err(FeedError::AuthRejected(_))));
    }

    #[tokio::test]
    async fn connection_error_frame_is_auth_rejected() {
        let (listener, url) = listener().await;
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text(
                r#"{"s":"error","code":-1600,"message":"token expired","type":"cn"}"#.into(),
            ))
            .await
            .unwrap();
            let _ = ws.next().await;
        });

        let result = transport(&url).connect(&Credential::new("stale")).await;
        match result {
            Err(FeedError::AuthRejected(message)) => assert_eq!(message, "token expired"),
            other => panic!("expected auth rejection, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (listener, url) = listener().await;
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = ws.next().await;
        });

        let transport = FyersTransport::new(
            FyersTransportConfig::new(url, "APP-100")
                .with_handshake_timeout(Duration::from_millis(200)),
        );
        let result = transport.connect(&Credential::new("t")).await;
        assert!(matches!(result, Err(FeedError::Transport(msg)) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        let (listener, url) = listener().await;
        drop(listener);

        let result = transport(&url).connect(&Credential::new("t")).await;
        assert!(matches!(result, Err(FeedError::Transport(_))));
    }
}
