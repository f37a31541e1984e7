//! The egress loop and sender worker (§4.G, §4.H): upstream → client, and the per-session
//! worker that drains the bounded send queue in the other direction.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::deadline::Deadline;
use crate::net::{self, Socket};
use crate::session::{QueuedPacket, SharedContext};

/// Races an upstream read against the session's idle deadline. Exits (and removes the
/// session from the table) when the deadline fires or the listener is closed; datagrams
/// from any address other than the configured upstream endpoint are silently dropped
/// (§4.G, off-path rejection).
pub async fn run(
    ctx: Arc<SharedContext>,
    client: SocketAddr,
    upstream_socket: Arc<Socket>,
    mut deadline: Deadline,
    oob: watch::Receiver<Option<std::net::IpAddr>>,
    max_proxy_packet_size: usize,
) {
    let front = ctx.transform.front_overhead();
    let rear = ctx.transform.rear_overhead();
    // §8: "the egress buffer for a session satisfies len = max_proxy_packet_size".
    let mut buf = vec![0u8; max_proxy_packet_size];
    let plaintext_cap = max_proxy_packet_size.saturating_sub(front).saturating_sub(rear);

    loop {
        tokio::select! {
            biased;

            () = deadline.wait() => {
                tracing::debug!(client = %client, "session idle timeout");
                break;
            }
            recv = upstream_socket.recv(&mut buf[front..front + plaintext_cap]) => {
                match recv {
                    Ok(received) => {
                        if !from_upstream(&ctx, received.from) {
                            tracing::debug!(
                                client = %client,
                                from = %received.from,
                                "dropped datagram from unexpected upstream source"
                            );
                            continue;
                        }

                        let src = *oob.borrow();
                        match forward_to_client(&ctx, &mut buf, front, received.len, client, src).await {
                            Ok(()) => {}
                            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {
                                tracing::debug!(client = %client, "listener closed, egress loop exiting");
                                break;
                            }
                            Err(e) => {
                                tracing::debug!(client = %client, error = %e, "failed to forward to client");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!(client = %client, error = %e, "failed to read from upstream socket");
                    }
                }
            }
        }
    }

    ctx.table.lock().remove(&client);
}

fn from_upstream(ctx: &Arc<SharedContext>, from: SocketAddr) -> bool {
    net::canonicalize(from) == net::canonicalize(ctx.upstream_endpoint)
}

/// Returns `Err` with kind `NotConnected` once `Relay::stop` has closed the listener, so the
/// caller can distinguish "relay is shutting down" from an ordinary per-packet send failure.
async fn forward_to_client(
    ctx: &Arc<SharedContext>,
    buf: &mut [u8],
    front: usize,
    len: usize,
    client: SocketAddr,
    src: Option<std::net::IpAddr>,
) -> std::io::Result<()> {
    let Some(listener) = ctx.listener() else {
        return Err(std::io::Error::from(std::io::ErrorKind::NotConnected));
    };

    let obfuscated = ctx
        .transform
        .encrypt_in_place(buf, front, len, buf.len())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    listener.send(obfuscated, client, src).await
}

/// Drains the session's bounded send queue and writes each plaintext payload to the
/// upstream socket. Exits once the queue is closed (the session was removed from the
/// table, dropping the last `Sender`), at which point dropping `upstream_socket` here
/// closes the underlying OS socket exactly once.
pub async fn run_sender(
    upstream_socket: Arc<Socket>,
    mut send_rx: mpsc::Receiver<QueuedPacket>,
    upstream_endpoint: SocketAddr,
) {
    while let Some(packet) = send_rx.recv().await {
        if let Err(e) = upstream_socket
            .send(packet.plaintext(), upstream_endpoint, None)
            .await
        {
            tracing::debug!(error = %e, "failed to write to upstream socket");
        }
    }
}
