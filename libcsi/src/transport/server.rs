//! QUIC server that runs the controller plugin and dispatches incoming CSI
//! requests to the appropriate trait implementations.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;

use super::MAX_MESSAGE_BYTES;

/// A CSI server that accepts QUIC connections and dispatches
/// [`CsiMessage`] requests to an [`CsiIdentity`] + [`CsiController`]
/// implementation.
pub struct CsiServer<T> {
    endpoint: quinn::Endpoint,
    handler: Arc<T>,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + 'static,
{
    /// Create a new server bound to `addr`.
    ///
    /// Binding port 0 picks a free port; see [`Self::local_addr`].
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        handler: Arc<T>,
    ) -> Result<Self, CsiError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(CsiError::transport)?;
        info!(%addr, "CSI QUIC server listening");
        Ok(Self { endpoint, handler })
    }

    /// Accept connections in a loop until the endpoint is closed.
    ///
    /// Each accepted connection spawns a Tokio task, and each bi-stream
    /// within a connection is handled concurrently.
    pub async fn serve(&self) -> Result<(), CsiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "CSI connection accepted");
                        if let Err(e) = Self::handle_connection(conn, handler).await {
                            warn!(%remote, error = %e, "CSI connection error");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "CSI incoming connection failed");
                    }
                }
            });
        }
        Ok(())
    }

    /// Handle all bi-streams on a single connection.
    async fn handle_connection(conn: quinn::Connection, handler: Arc<T>) -> Result<(), CsiError> {
        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(quinn::ConnectionError::ApplicationClosed(_)) => return Ok(()),
                Err(e) => return Err(CsiError::transport(e)),
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_stream(send, recv, &handler).await {
                    error!(error = %e, "CSI stream handler error");
                }
            });
        }
    }

    /// Read one request from the stream, dispatch it and write the response.
    #[instrument(skip_all)]
    async fn handle_stream(
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
        handler: &T,
    ) -> Result<(), CsiError> {
        let buf = recv
            .read_to_end(MAX_MESSAGE_BYTES)
            .await
            .map_err(CsiError::transport)?;

        let request: CsiMessage = serde_json::from_slice(&buf)
            .map_err(|e| CsiError::TransportError(format!("malformed request: {e}")))?;

        debug!(%request, "CSI request received");

        let response = Self::dispatch(handler, request).await;

        // Serialize and send the response.
        let payload = serde_json::to_vec(&response).map_err(CsiError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        send.finish().map_err(CsiError::transport)?;
        Ok(())
    }

    /// Map a [`CsiMessage`] request to the correct trait method call and
    /// wrap the result in a response [`CsiMessage`].
    async fn dispatch(handler: &T, request: CsiMessage) -> CsiMessage {
        fn reply<V>(result: Result<V, CsiError>, ok: impl FnOnce(V) -> CsiMessage) -> CsiMessage {
            match result {
                Ok(v) => ok(v),
                Err(e) => {
                    debug!(code = ?e.code(), error = %e, "CSI request failed");
                    CsiMessage::Error(e)
                }
            }
        }

        match request {
            // --- Identity ---------------------------------------------------
            CsiMessage::Probe => reply(handler.probe().await, CsiMessage::ProbeResult),
            CsiMessage::GetPluginInfo => {
                reply(handler.get_plugin_info().await, CsiMessage::PluginInfoResponse)
            }
            CsiMessage::GetPluginCapabilities => reply(
                handler.get_plugin_capabilities().await,
                CsiMessage::PluginCapabilitiesResponse,
            ),

            // --- Controller -------------------------------------------------
            CsiMessage::CreateVolume(req) => {
                reply(handler.create_volume(req).await, CsiMessage::VolumeCreated)
            }
            CsiMessage::DeleteVolume(id) => {
                reply(handler.delete_volume(&id).await, |()| CsiMessage::Ok)
            }
            CsiMessage::ValidateVolumeCapabilities {
                volume_id,
                capabilities,
            } => reply(
                handler
                    .validate_volume_capabilities(&volume_id, &capabilities)
                    .await,
                CsiMessage::CapabilitiesValidated,
            ),
            CsiMessage::ControllerGetCapabilities => reply(
                handler.get_capabilities().await,
                CsiMessage::ControllerCapabilitiesResponse,
            ),
            CsiMessage::ListVolumes => reply(handler.list_volumes().await, CsiMessage::VolumeList),
            CsiMessage::GetCapacity => reply(handler.get_capacity().await, CsiMessage::Capacity),
            CsiMessage::ControllerPublishVolume { volume_id, node_id } => reply(
                handler.controller_publish_volume(&volume_id, &node_id).await,
                |()| CsiMessage::Ok,
            ),
            CsiMessage::ControllerUnpublishVolume { volume_id, node_id } => reply(
                handler
                    .controller_unpublish_volume(&volume_id, &node_id)
                    .await,
                |()| CsiMessage::Ok,
            ),
            CsiMessage::CreateSnapshot {
                source_volume_id,
                name,
            } => reply(
                handler.create_snapshot(&source_volume_id, &name).await,
                |()| CsiMessage::Ok,
            ),
            CsiMessage::DeleteSnapshot(id) => {
                reply(handler.delete_snapshot(&id).await, |()| CsiMessage::Ok)
            }
            CsiMessage::ListSnapshots => {
                reply(handler.list_snapshots().await, CsiMessage::SnapshotList)
            }
            CsiMessage::ControllerExpandVolume {
                volume_id,
                capacity_bytes,
            } => reply(
                handler.expand_volume(&volume_id, capacity_bytes).await,
                |()| CsiMessage::Ok,
            ),
            CsiMessage::ControllerGetVolume(id) => {
                reply(handler.get_volume(&id).await, CsiMessage::VolumeResponse)
            }

            // --- Response variants should never arrive as requests ----------
            other => {
                warn!(msg = %other, "unexpected message variant received as request");
                CsiMessage::Error(CsiError::InvalidArgument(format!(
                    "unexpected message: {other}"
                )))
            }
        }
    }

    /// Return a reference to the underlying QUIC endpoint, useful for
    /// obtaining the local address or shutting down.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }

    /// The address the server is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, CsiError> {
        self.endpoint.local_addr().map_err(CsiError::transport)
    }

    /// Stop accepting connections and close the existing ones.
    pub fn shutdown(&self) {
        self.endpoint
            .close(quinn::VarInt::from_u32(0), b"server shutdown");
    }
}
