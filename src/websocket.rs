//! WebSocket as an opaque sink: upgrade
//! detection and handshake are delegated to `hyper-tungstenite`; this module
//! only decides *whether* to upgrade and hands the resulting stream off —
//! frame-level semantics are not reimplemented here.

use hyper::body::Incoming;
use hyper::{Request as HyperRequest, Response as HyperResponse};
use hyper_tungstenite::tungstenite::Message;
use hyper_tungstenite::{HyperWebsocket, WebSocketStream};
use tracing::warn;

pub type UpgradedSocket = WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

/// Case-insensitive check for `Upgrade: websocket`.
pub fn is_upgrade_request(req: &HyperRequest<Incoming>) -> bool {
    hyper_tungstenite::is_upgrade_request(req)
}

/// Perform the handshake, returning the 101 response to write immediately
/// and a future that resolves to the established socket once the client's
/// upgrade completes.
pub fn upgrade(
    req: &mut HyperRequest<Incoming>,
) -> Result<(HyperResponse<http_body_util::Empty<bytes::Bytes>>, HyperWebsocket), crate::error::HypersonicError> {
    hyper_tungstenite::upgrade(req, None).map_err(|e| crate::error::HypersonicError::Upstream(e.to_string()))
}

/// A route's websocket handler: given the established socket, does whatever
/// the application wants with it. The loop only needs to drive this to
/// completion; it never interprets frames itself.
pub type WebSocketHandler = std::sync::Arc<
    dyn Fn(UpgradedSocket) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + Sync,
>;

/// Drive a single established connection through to close, logging (not
/// panicking) on a mid-stream protocol error.
pub async fn drive(socket: UpgradedSocket, handler: WebSocketHandler) {
    handler(socket).await;
}

/// Convenience echo handler used by tests and as a minimal default.
pub async fn echo(mut socket: UpgradedSocket) {
    use futures_util::{SinkExt, StreamExt};
    while let Some(msg) = socket.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(msg) => {
                if socket.send(msg).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "websocket stream error");
                break;
            }
        }
    }
}
