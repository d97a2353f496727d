//! WebSocket implementation of the [`ClientServer`] contract.
//!
//! Connects over `ws`/`wss` (mapped from the endpoint's `http`/`https`
//! scheme), pumps inbound frames through the handler registry, and maps
//! clean close handshakes to
//! [`SessionError::EndOfStream`](crate::SessionError::EndOfStream) so the
//! reconnect loop can treat them as the normal case.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::{Mutex, Notify};
use tokio_tungstenite::{
    connect_async_tls_with_config,
    tungstenite::{
        handshake::client::generate_key,
        http::Request,
        protocol::{frame::coding::CloseCode, CloseFrame, Message},
    },
    Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use super::{AnyFrameHook, ClientFactory, ClientServer, HandlerRegistry, MessageHandler};
use crate::api::Credentials;
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::protocol::{self, OutboundMessage};

/// Send half of the WebSocket.
type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Receive half of the WebSocket.
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Metadata service addresses that must bypass any configured HTTP proxy.
const METADATA_SERVICE_ADDRESSES: &str = "169.254.169.254,169.254.170.2";

/// Map an endpoint scheme to the matching WebSocket scheme.
pub fn websocket_scheme(scheme: &str) -> Result<&'static str> {
    match scheme {
        "http" => Ok("ws"),
        "https" => Ok("wss"),
        other => Err(SessionError::UnsupportedScheme(other.to_string())),
    }
}

/// Set a `NO_PROXY` default covering the metadata services and the
/// container runtime socket. A user-supplied value is never overwritten.
fn ensure_no_proxy_default(docker_endpoint: &str) {
    if std::env::var_os("NO_PROXY").is_some() {
        return;
    }
    let socket = docker_endpoint
        .strip_prefix("unix://")
        .unwrap_or(docker_endpoint);
    std::env::set_var(
        "NO_PROXY",
        format!("{},{}", METADATA_SERVICE_ADDRESSES, socket),
    );
}

/// A [`ClientServer`] over tokio-tungstenite.
///
/// Owned by exactly one connection attempt; `close` is idempotent and wakes
/// an in-flight `serve` via an internal notify.
pub struct WebSocketClientServer {
    url: String,
    credentials: Credentials,
    config: SessionConfig,
    registry: HandlerRegistry,
    sink: Mutex<Option<WsSink>>,
    stream: Mutex<Option<WsStream>>,
    closed: AtomicBool,
    close_notify: Notify,
}

impl WebSocketClientServer {
    pub fn new(url: &str, credentials: Credentials, config: SessionConfig) -> Self {
        Self {
            url: url.to_string(),
            credentials,
            config,
            registry: HandlerRegistry::new(),
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        }
    }

    async fn handle_frame(&self, frame: &str) {
        match protocol::decode(frame) {
            Ok(message) => self.registry.dispatch(message).await,
            Err(error) => warn!(error = %error, "Discarding undecodable frame"),
        }
    }
}

#[async_trait::async_trait]
impl ClientServer for WebSocketClientServer {
    fn add_request_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.registry.add(handler);
    }

    fn set_any_request_handler(&self, hook: AnyFrameHook) {
        self.registry.set_any(hook);
    }

    async fn connect(&self) -> Result<()> {
        ensure_no_proxy_default(&self.config.docker_endpoint);

        let mut url = Url::parse(&self.url)
            .map_err(|error| SessionError::Transport(format!("invalid URL: {}", error)))?;
        let scheme = websocket_scheme(url.scheme())?;
        url.set_scheme(scheme)
            .map_err(|_| SessionError::UnsupportedScheme(url.scheme().to_string()))?;

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(SessionError::Transport("URL has no host".to_string()));
            }
        };

        debug!(url = %url, "Connecting to control endpoint");

        let mut request = Request::builder()
            .uri(url.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .header("X-Access-Key-Id", &self.credentials.access_key_id);
        if !self.credentials.session_token.is_empty() {
            request = request.header("X-Session-Token", &self.credentials.session_token);
        }
        let request = request
            .body(())
            .map_err(|error| SessionError::Transport(format!("invalid request: {}", error)))?;

        let connector = if self.config.accept_insecure_cert {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .map_err(|error| SessionError::Transport(format!("TLS setup failed: {}", error)))?;
            Some(Connector::NativeTls(tls))
        } else {
            None
        };

        let (ws, _) = connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|error| SessionError::Transport(format!("connect failed: {}", error)))?;

        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);

        info!(url = %url, "Connected to control endpoint");
        Ok(())
    }

    async fn serve(&self) -> Result<()> {
        let mut stream = self
            .stream
            .lock()
            .await
            .take()
            .ok_or_else(|| SessionError::Transport("serve called before connect".to_string()))?;

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(SessionError::EndOfStream);
            }
            let next = tokio::select! {
                _ = self.close_notify.notified() => continue,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => self.handle_frame(&text).await,
                    Err(_) => warn!("Discarding non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => return Err(close_error(frame)),
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite itself.
                }
                Some(Err(error)) => {
                    if self.closed.load(Ordering::SeqCst) {
                        return Err(SessionError::EndOfStream);
                    }
                    return Err(SessionError::Transport(error.to_string()));
                }
                None => return Err(SessionError::EndOfStream),
            }
        }
    }

    async fn make_request(&self, message: &OutboundMessage) -> Result<()> {
        let frame = protocol::encode(message)?;
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| SessionError::Transport("send before connect".to_string()))?;
        sink.send(Message::Text(frame))
            .await
            .map_err(|error| SessionError::Transport(format!("send failed: {}", error)))
    }

    async fn write_close_message(&self) -> Result<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| SessionError::Transport("close before connect".to_string()))?;
        sink.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "ConnectionExpired: closing connection".into(),
        })))
        .await
        .map_err(|error| SessionError::Transport(format!("close frame failed: {}", error)))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // notify_one stores a permit, so a close that lands before serve's
        // select registers its waiter still wakes it.
        self.close_notify.notify_one();
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        debug!(url = %self.url, "Connection closed");
        Ok(())
    }
}

/// Map a server close handshake to the error the serve-pump reports.
/// Normal and going-away codes are the clean end of a connection.
fn close_error(frame: Option<CloseFrame<'_>>) -> SessionError {
    match frame {
        None => SessionError::EndOfStream,
        Some(frame) => match frame.code {
            CloseCode::Normal | CloseCode::Away => SessionError::EndOfStream,
            code => SessionError::UnexpectedClose {
                code: code.into(),
                reason: frame.reason.to_string(),
            },
        },
    }
}

/// Factory producing [`WebSocketClientServer`] instances.
#[derive(Default)]
pub struct WebSocketClientFactory;

impl WebSocketClientFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ClientFactory for WebSocketClientFactory {
    fn new_client(
        &self,
        url: &str,
        credentials: Credentials,
        config: &SessionConfig,
    ) -> Arc<dyn ClientServer> {
        Arc::new(WebSocketClientServer::new(url, credentials, config.clone()))
    }
}
