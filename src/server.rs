//! TCP transport: one task per inbound connection, one short-lived connection per message

use crate::constants::MAX_MESSAGE_BYTES;
use crate::error::{ErrorClass, NodeError, Result};
use crate::network::{Message, Node, Outbound};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Bounds on dialing a peer and on reading one request
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(30),
        }
    }
}

/// Bind the node's address, greet the bootstrap peer and serve until the listener fails
pub async fn start_server(node: Arc<Node>, timeouts: Timeouts) -> Result<()> {
    let listener = TcpListener::bind(node.address()).await?;
    info!(address = %node.address(), "node listening");

    let greeting = {
        let node = node.clone();
        tokio::task::spawn_blocking(move || node.handshake())
            .await
            .map_err(std::io::Error::from)??
    };
    dispatch(greeting, timeouts).await;

    serve(listener, node, timeouts).await
}

/// Accept loop: every connection is handled on its own task
pub async fn serve(listener: TcpListener, node: Arc<Node>, timeouts: Timeouts) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let node = node.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, node, timeouts).await {
                match e.class() {
                    ErrorClass::Fatal => error!(%peer, error = %e, "connection handler failed"),
                    _ => warn!(%peer, error = %e, "dropped request"),
                }
            }
        });
    }
}

/// Read one request to EOF, process it off the async runtime and deliver the replies
async fn handle_connection(stream: TcpStream, node: Arc<Node>, timeouts: Timeouts) -> Result<()> {
    let request = read_request(stream, timeouts.read).await?;

    let message = Message::decode(&request)?;
    let replies = tokio::task::spawn_blocking(move || node.process_message(message))
        .await
        .map_err(std::io::Error::from)??;

    dispatch(replies, timeouts).await;
    Ok(())
}

/// Read a request to EOF within `read_timeout`; anything past `MAX_MESSAGE_BYTES` is malformed
async fn read_request<R: AsyncRead + Unpin>(reader: R, read_timeout: Duration) -> Result<Vec<u8>> {
    let mut request = Vec::new();
    let mut limited = reader.take(MAX_MESSAGE_BYTES as u64 + 1);
    timeout(read_timeout, limited.read_to_end(&mut request))
        .await
        .map_err(|_| NodeError::MalformedMessage("timed out reading request".to_string()))??;

    if request.len() > MAX_MESSAGE_BYTES {
        return Err(NodeError::MalformedMessage(format!(
            "request exceeds {} bytes",
            MAX_MESSAGE_BYTES
        )));
    }
    Ok(request)
}

/// Deliver each message; an unreachable peer is logged and skipped
pub async fn dispatch(outbound: Vec<Outbound>, timeouts: Timeouts) {
    for Outbound { to, message } in outbound {
        if let Err(e) = send_data(&to, &message, timeouts).await {
            warn!(peer = %to, command = message.command(), error = %e, "peer is not available");
        }
    }
}

/// SendData: 𝔸 × ℳ → {sent, unreachable}
///
/// Dial `address`, write the encoded message and close.
pub async fn send_data(address: &str, message: &Message, timeouts: Timeouts) -> Result<()> {
    let data = message.encode()?;

    let mut stream = match timeout(timeouts.connect, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(NodeError::PeerUnreachable(format!("{}: {}", address, e))),
        Err(_) => return Err(NodeError::PeerUnreachable(format!("{}: connect timed out", address))),
    };

    stream
        .write_all(&data)
        .await
        .map_err(|e| NodeError::PeerUnreachable(format!("{}: {}", address, e)))?;
    stream
        .shutdown()
        .await
        .map_err(|e| NodeError::PeerUnreachable(format!("{}: {}", address, e)))?;

    debug!(peer = %address, command = message.command(), bytes = data.len(), "sent command");
    Ok(())
}
