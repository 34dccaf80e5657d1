//! OCPP 1.6 WebSocket server
//!
//! Accepts charge-point connections at `ws://<host>:<port>/ws/{charge_point_id}`.
//! Selects the `ocpp1.6` subprotocol when offered; clients that do not
//! offer it are still accepted and routed as OCPP-J.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::application::OcppRouter;
use crate::domain::ChargerStore;
use crate::session::{Session, SharedSessionRegistry, OCPP_SUBPROTOCOL};
use crate::shared::validations::validate_charge_point_id;
use crate::shared::ShutdownSignal;

/// Server bind address.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
        }
    }
}

/// OCPP WebSocket server.
pub struct OcppServer {
    config: ServerConfig,
    registry: SharedSessionRegistry,
    router: Arc<OcppRouter>,
    store: Arc<dyn ChargerStore>,
    shutdown: Option<ShutdownSignal>,
}

impl OcppServer {
    pub fn new(
        config: ServerConfig,
        registry: SharedSessionRegistry,
        router: Arc<OcppRouter>,
        store: Arc<dyn ChargerStore>,
    ) -> Self {
        Self {
            config,
            registry,
            router,
            store,
            shutdown: None,
        }
    }

    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    pub fn registry(&self) -> SharedSessionRegistry {
        self.registry.clone()
    }

    /// Accept connections until an error or the shutdown signal.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = self.config.address();
        let listener = TcpListener::bind(&addr).await?;
        self.run_with_listener(listener).await
    }

    /// Serve on an already-bound listener (lets callers pick port 0).
    pub async fn run_with_listener(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = listener.local_addr()?;
        info!("🔌 OCPP 1.6 Central System listening on ws://{}", addr);
        info!("   Charge points connect to: ws://{}/ws/{{charge_point_id}}", addr);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
                _ = wait_for_shutdown(self.shutdown.clone()) => {
                    info!("🛑 WebSocket server shutting down");
                    self.registry.close_all();
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let registry = self.registry.clone();
        let router = self.router.clone();
        let store = self.store.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, registry, router, store, shutdown).await
            {
                warn!("Connection from {} ended with error: {}", peer, e);
            }
        });
    }
}

async fn wait_for_shutdown(signal: Option<ShutdownSignal>) {
    match signal {
        Some(signal) => signal.wait().await,
        None => std::future::pending().await,
    }
}

/// Charge point id from the request path: `/ws/{id}` (or bare `/{id}`).
fn extract_charge_point_id(path: &str) -> Option<String> {
    let trimmed = path.trim_matches('/');
    let id = trimmed.strip_prefix("ws/").unwrap_or(trimmed);
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id.to_string())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: SharedSessionRegistry,
    router: Arc<OcppRouter>,
    store: Arc<dyn ChargerStore>,
    shutdown: Option<ShutdownSignal>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("New connection from {}", peer);

    let mut charge_point_id: Option<String> = None;

    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, mut response: Response| {
            let path = req.uri().path();

            let id = match extract_charge_point_id(path) {
                Some(id) => id,
                None => {
                    warn!("Rejecting connection from {}: no charge point id in path {}", peer, path);
                    return Err(bad_request("missing charge point id"));
                }
            };
            if let Err(reason) = validate_charge_point_id(&id) {
                warn!("Rejecting connection from {}: {}", peer, reason);
                return Err(bad_request(&reason));
            }

            let offered = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            let offers_ocpp16 = offered
                .split(',')
                .map(str::trim)
                .any(|p| p == OCPP_SUBPROTOCOL);

            if offers_ocpp16 {
                response.headers_mut().insert(
                    "Sec-WebSocket-Protocol",
                    OCPP_SUBPROTOCOL.parse().expect("static subprotocol header"),
                );
            } else if !offered.is_empty() {
                warn!(
                    "Client {} did not offer {}, offered: {}",
                    peer, OCPP_SUBPROTOCOL, offered
                );
            }

            charge_point_id = Some(id);
            Ok(response)
        },
    )
    .await?;

    let charge_point_id = charge_point_id.expect("handshake callback sets the id");
    info!("[{}] Connected from {}", charge_point_id, peer);

    // The aggregate exists from the first accepted connection attempt on.
    if let Err(e) = store.upsert_charger(&charge_point_id).await {
        error!("[{}] Could not ensure charger aggregate: {}", charge_point_id, e);
    }

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let session = Arc::new(Session::new(charge_point_id.clone(), outbound_tx));

    registry.bind(session.clone());

    // Writer task: sole owner of the sink; frames leave in queue order and
    // never interleave.
    let writer_id = charge_point_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            info!("[{}] -> {}", writer_id, text);
            if let Err(e) = ws_sender.send(Message::Text(text)).await {
                error!("[{}] Send error: {}", writer_id, e);
                break;
            }
        }
    });

    // Receive loop: frames of one session are processed strictly in order.
    let reader_session = session.clone();
    let reader_router = router.clone();
    let reader_id = charge_point_id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    info!("[{}] <- {}", reader_id, text);
                    reader_router.process(&reader_session, &text).await;
                    if reader_session.is_closed() {
                        break;
                    }
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(frame)) => {
                    info!("[{}] Close frame received: {:?}", reader_id, frame);
                    break;
                }
                Ok(Message::Binary(data)) => {
                    warn!("[{}] Ignoring binary message ({} bytes)", reader_id, data.len());
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    error!("[{}] WebSocket error: {}", reader_id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => {}
        _ = &mut reader => {}
        _ = session.wait_closed() => {
            info!("[{}] Session closed, tearing down connection", charge_point_id);
        }
        _ = wait_for_shutdown(shutdown) => {
            info!("[{}] Closing due to server shutdown", charge_point_id);
        }
    }

    session.close();
    registry.unbind(&session);
    writer.abort();
    reader.abort();

    info!("[{}] Disconnected", charge_point_id);
    Ok(())
}

fn bad_request(reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = tokio_tungstenite::tungstenite::http::StatusCode::BAD_REQUEST;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{OcppRouter, PostTransactionScheduler};
    use crate::infrastructure::InMemoryStore;
    use crate::session::SessionRegistry;
    use crate::shared::ocpp_frame::OcppFrame;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    #[test]
    fn path_extraction() {
        assert_eq!(extract_charge_point_id("/ws/CP-1").as_deref(), Some("CP-1"));
        assert_eq!(extract_charge_point_id("/CP-1").as_deref(), Some("CP-1"));
        assert_eq!(extract_charge_point_id("/ws/CP-1/").as_deref(), Some("CP-1"));
        assert_eq!(extract_charge_point_id("/ws/"), None);
        assert_eq!(extract_charge_point_id("/"), None);
        assert_eq!(extract_charge_point_id("/ws/a/b"), None);
    }

    async fn start_server() -> (std::net::SocketAddr, SharedSessionRegistry, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let store_dyn: Arc<dyn ChargerStore> = store.clone();
        let registry = SessionRegistry::shared();
        let scheduler = Arc::new(PostTransactionScheduler::new(
            store_dyn.clone(),
            Duration::from_millis(500),
            Duration::from_secs(30),
        ));
        let router = Arc::new(OcppRouter::new(store_dyn.clone(), scheduler, 30));

        let server = Arc::new(OcppServer::new(
            ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            registry.clone(),
            router,
            store_dyn,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.run_with_listener(listener).await;
        });

        (addr, registry, store)
    }

    #[tokio::test]
    async fn boot_and_heartbeat_over_a_real_socket() {
        let (addr, registry, store) = start_server().await;

        let mut request = format!("ws://{}/ws/C1", addr).into_client_request().unwrap();
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            "ocpp1.6".parse().unwrap(),
        );
        let (mut ws, response) = tokio_tungstenite::connect_async(request).await.unwrap();
        assert_eq!(
            response
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok()),
            Some("ocpp1.6")
        );

        ws.send(Message::Text(
            r#"[2,"a","BootNotification",{"chargePointModel":"M","chargePointVendor":"V"}]"#
                .to_string(),
        ))
        .await
        .unwrap();
        let reply = match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => OcppFrame::decode(&text).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        };
        match reply {
            OcppFrame::CallResult { unique_id, payload } => {
                assert_eq!(unique_id, "a");
                assert_eq!(payload["status"], "Accepted");
                assert_eq!(payload["interval"], 30);
            }
            other => panic!("expected CallResult, got {:?}", other),
        }

        ws.send(Message::Text(r#"[2,"b","Heartbeat",{}]"#.to_string()))
            .await
            .unwrap();
        let reply = match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => OcppFrame::decode(&text).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        };
        match reply {
            OcppFrame::CallResult { unique_id, payload } => {
                assert_eq!(unique_id, "b");
                assert!(payload["currentTime"].is_string());
            }
            other => panic!("expected CallResult, got {:?}", other),
        }

        assert!(registry.is_connected("C1"));
        let logs = store.get_logs("C1").await.unwrap();
        assert_eq!(logs.len(), 2);
    }

    #[tokio::test]
    async fn reconnect_evicts_previous_session() {
        let (addr, registry, _store) = start_server().await;
        let url = format!("ws://{}/ws/C1", addr);

        let (mut first, _) = tokio_tungstenite::connect_async(
            url.clone().into_client_request().unwrap(),
        )
        .await
        .unwrap();
        // Drive the handshake result through the registry.
        first
            .send(Message::Text(r#"[2,"h1","Heartbeat",{}]"#.to_string()))
            .await
            .unwrap();
        let _ = first.next().await;
        let s1 = registry.get("C1").expect("first session bound");

        let (mut second, _) = tokio_tungstenite::connect_async(
            url.into_client_request().unwrap(),
        )
        .await
        .unwrap();
        second
            .send(Message::Text(r#"[2,"h2","Heartbeat",{}]"#.to_string()))
            .await
            .unwrap();
        let _ = second.next().await;

        let s2 = registry.get("C1").expect("second session bound");
        assert!(!Arc::ptr_eq(&s1, &s2));
        assert!(s1.is_closed());
        assert!(!s2.is_closed());
    }

    #[tokio::test]
    async fn invalid_charge_point_id_is_rejected_at_handshake() {
        let (addr, _registry, _store) = start_server().await;
        let url = format!("ws://{}/ws/{}", addr, "X".repeat(40));
        let result =
            tokio_tungstenite::connect_async(url.into_client_request().unwrap()).await;
        assert!(result.is_err());
    }
}
