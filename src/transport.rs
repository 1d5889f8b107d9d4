use crate::state::PeerId;
use crate::wire::{write_framed, NodeMessage};
use log::warn;
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;

const CONNECT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Outward message carrier (§6 external interfaces). A short-lived
/// connection per message is all the algorithm asks for -- a dropped
/// send is recovered by the next heartbeat, so there's no reason to
/// keep a socket open between sends.
#[async_trait::async_trait]
pub trait Transport<V>: Send + Sync {
    async fn send(&self, node: &PeerId, message: NodeMessage<V>);
}

/// Opens one TCP connection per outgoing message, writes a single
/// length-prefixed JSON frame, and closes it. Connect and send share a
/// single 1s deadline; failures are logged and dropped per §7 -- the
/// caller never sees them.
pub struct TcpTransport;

#[async_trait::async_trait]
impl<V: Serialize + Send + Sync> Transport<V> for TcpTransport {
    async fn send(&self, node: &PeerId, message: NodeMessage<V>) {
        let attempt = async {
            let mut stream = TcpStream::connect(node).await?;
            write_framed(&mut stream, &message).await
        };

        match tokio::time::timeout(CONNECT_SEND_TIMEOUT, attempt).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("send to {node} failed: {err}"),
            Err(_) => warn!("send to {node} timed out after {CONNECT_SEND_TIMEOUT:?}"),
        }
    }
}
