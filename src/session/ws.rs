use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc::unbounded_channel;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::gateway::transport::{Subscription, Transport, TransportError};
use crate::middleware::identity::{PRINCIPAL_ID_HEADER, PRINCIPAL_ROLE_HEADER};
use crate::models::Principal;

/// Subscribe-only transport over the service's WebSocket endpoint, so a
/// session manager can attach to a remote node exactly like a browser
/// session would. Emission stays server-side.
pub struct WsTransport {
    url: String,
    principal: Principal,
}

impl WsTransport {
    /// `url` is the full WebSocket endpoint, e.g. `ws://host:3000/api/v1/ws`.
    pub fn for_principal(url: impl Into<String>, principal: Principal) -> Self {
        Self {
            url: url.into(),
            principal,
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn subscribe(&self, principal_id: Uuid) -> Result<Subscription, TransportError> {
        if principal_id != self.principal.id {
            return Err(TransportError::Connect(
                "transport is bound to a different principal".into(),
            ));
        }

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        request.headers_mut().insert(
            PRINCIPAL_ID_HEADER,
            HeaderValue::from_str(&self.principal.id.to_string())
                .map_err(|e| TransportError::Connect(e.to_string()))?,
        );
        request.headers_mut().insert(
            PRINCIPAL_ROLE_HEADER,
            HeaderValue::from_static(self.principal.role.as_str()),
        );

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (_write, mut read) = stream.split();

        let (tx, rx) = unbounded_channel();
        tokio::spawn(async move {
            // Keep the write half alive for the duration of the read loop.
            let _write = _write;
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if tx.send(text.to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });

        Ok(Subscription::new(rx))
    }

    async fn emit(
        &self,
        _principal_id: Uuid,
        _event: &str,
        _payload: &serde_json::Value,
    ) -> Result<(), TransportError> {
        Err(TransportError::EmitUnsupported)
    }
}
