//! Caller side of the controller transport.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use quinn::crypto::rustls::QuicClientConfig;
use tracing::{debug, instrument};

use super::MAX_MESSAGE_BYTES;
use crate::error::CsiError;
use crate::message::CsiMessage;

/// One QUIC connection to a controller plugin.
///
/// Requests may be issued concurrently; each one gets its own stream.
pub struct CsiClient {
    connection: quinn::Connection,
}

impl CsiClient {
    /// Connect to the plugin at `addr`.  `server_name` must match a name in
    /// the plugin's certificate.
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        tls_config: rustls::ClientConfig,
    ) -> Result<Self, CsiError> {
        let crypto = QuicClientConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;

        let bind = match addr {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let mut endpoint = quinn::Endpoint::client(bind).map_err(CsiError::transport)?;
        endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(crypto)));

        let connection = endpoint
            .connect(addr, server_name)
            .map_err(CsiError::transport)?
            .await
            .map_err(CsiError::transport)?;

        debug!(%addr, %server_name, "connected to controller plugin");
        Ok(Self { connection })
    }

    /// Address of the plugin this client talks to.
    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Send `msg` and return whatever the plugin answers, including
    /// [`CsiMessage::Error`].
    #[instrument(skip(self, msg), fields(%msg, remote = %self.remote_address()))]
    pub async fn request(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        let (mut send, mut recv) = self
            .connection
            .open_bi()
            .await
            .map_err(CsiError::transport)?;

        let payload = serde_json::to_vec(msg).map_err(CsiError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        send.finish().map_err(CsiError::transport)?;

        let buf = recv
            .read_to_end(MAX_MESSAGE_BYTES)
            .await
            .map_err(CsiError::transport)?;
        let response: CsiMessage = serde_json::from_slice(&buf)
            .map_err(|e| CsiError::TransportError(format!("malformed response: {e}")))?;

        debug!(%response, "response received");
        Ok(response)
    }

    /// Send `msg`, returning an error response as `Err`.
    pub async fn call(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        match self.request(msg).await? {
            CsiMessage::Error(e) => Err(e),
            other => Ok(other),
        }
    }

    pub fn close(&self) {
        self.connection
            .close(quinn::VarInt::from_u32(0), b"client shutdown");
    }
}
