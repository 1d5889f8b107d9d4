use crate::state::{Message, PeerId};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Every node-to-node message is a framed text record carrying one
/// JSON object (§6). Besides its variant-specific fields, the object
/// carries `responsePort`, identifying the sender so a reply can be
/// routed back without a long-lived connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMessage<V> {
    #[serde(flatten)]
    pub message: Message<V>,
    pub response_port: PeerId,
}

/// Writes a 4-byte big-endian length prefix followed by the JSON
/// encoding of `message`.
pub async fn write_framed<W, V>(writer: &mut W, message: &NodeMessage<V>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    V: Serialize,
{
    let bytes = serde_json::to_vec(message)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writer.write_u32(bytes.len() as u32).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed JSON record written by `write_framed`.
pub async fn read_framed<R, V>(reader: &mut R) -> std::io::Result<NodeMessage<V>>
where
    R: AsyncRead + Unpin,
    V: DeserializeOwned,
{
    let len = reader.read_u32().await?;
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    serde_json::from_slice(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
