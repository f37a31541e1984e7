//! The ingress loop (§4.F): client → upstream.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};

use crate::deadline;
use crate::egress;
use crate::net::{self, AddressFamily};
use crate::oob::update_oob_cache;
use crate::session::{QueuedPacket, SessionHandle, SharedContext, SEND_QUEUE_CAPACITY};
use crate::wireguard::{self, REJECT_AFTER_TIME};

/// Runs until `shutdown` is signalled by `Relay::stop`, at which point the loop exits and
/// the buffer it was about to use is released automatically.
///
/// Tokio's UDP socket has no way for one handle to force another handle's in-flight `recv`
/// to return `Err` (unlike a real socket `close(2)`, dropping an `Arc` just decrements a
/// refcount); a `watch<bool>` shutdown signal, raced against the read, plays that role
/// instead.
pub async fn run(ctx: Arc<SharedContext>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let Some(listener) = ctx.listener() else {
            tracing::info!("listener closed, ingress loop exiting");
            return;
        };

        let mut buf = ctx.buffer_pool.acquire();

        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                tracing::info!("listener closed, ingress loop exiting");
                return;
            }
            received = listener.recv(&mut buf) => {
                let received = match received {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::debug!(error = %e, "failed to read from listener");
                        continue;
                    }
                };

                let from = net::canonicalize(received.from);

                let base = buf.as_mut_ptr() as usize;
                let (start, len) = match ctx.transform.decrypt_in_place(&mut buf[..received.len]) {
                    Ok(plaintext) => (plaintext.as_ptr() as usize - base, plaintext.len()),
                    Err(e) => {
                        tracing::debug!(client = %from, error = %e, "failed to decrypt datagram");
                        continue;
                    }
                };

                handle_decrypted(&ctx, from, received.local_ip, buf, start, len);
            }
        }
    }
}

fn handle_decrypted(
    ctx: &Arc<SharedContext>,
    from: std::net::SocketAddr,
    local_ip: Option<std::net::IpAddr>,
    buffer: crate::buffer::PooledBuffer,
    start: usize,
    len: usize,
) {
    let mut table = ctx.table.lock();

    let handle = match table.get(&from) {
        Some(handle) => {
            if len > 0 && wireguard::refreshes_deadline(buffer[start]) {
                handle.deadline.set(Instant::now() + REJECT_AFTER_TIME);
            }
            handle
        }
        None => match create_session(ctx, from) {
            Ok(handle) => {
                table.insert(from, handle);
                table
                    .get(&from)
                    .expect("just inserted this key under the same lock")
            }
            Err(e) => {
                tracing::debug!(client = %from, error = %e, "failed to create session");
                return;
            }
        },
    };

    handle.oob.send_if_modified(|prev| {
        let next = update_oob_cache(*prev, local_ip);
        let changed = *prev != next;
        *prev = next;
        changed
    });

    let packet = QueuedPacket::new(buffer, start, len);
    if let Err(mpsc::error::TrySendError::Full(_dropped)) = handle.send_tx.try_send(packet) {
        tracing::debug!(client = %from, "dropped due to full send channel");
    }
}

fn create_session(
    ctx: &Arc<SharedContext>,
    from: std::net::SocketAddr,
) -> std::io::Result<SessionHandle> {
    let family = AddressFamily::of(&from);
    let bind_addr = net::unspecified_for_family(family);

    let (upstream_socket, soft_err) = net::listen_udp(bind_addr, false, ctx.upstream_fwmark)?;
    if let Some(e) = soft_err {
        tracing::warn!(client = %from, error = %e, "non-fatal socket option failure on upstream socket");
    }

    let max_proxy_packet_size = ctx.mtu as usize - family.ip_header_len() - 8;
    let (deadline_setter, deadline) = deadline::channel(Instant::now() + REJECT_AFTER_TIME);
    let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
    let (oob_tx, oob_rx) = watch::channel(None);

    let upstream_socket = Arc::new(upstream_socket);

    tokio::spawn(egress::run(
        ctx.clone(),
        from,
        upstream_socket.clone(),
        deadline,
        oob_rx,
        max_proxy_packet_size,
    ));
    tokio::spawn(egress::run_sender(upstream_socket, send_rx, ctx.upstream_endpoint));

    tracing::info!(
        client = %from,
        tunnel_mtu = wireguard::tunnel_mtu(max_proxy_packet_size, ctx.transform.overhead()),
        "new session"
    );

    Ok(SessionHandle {
        send_tx,
        deadline: deadline_setter,
        oob: oob_tx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::table::SessionTable;
    use crate::transform::get_handler;
    use std::net::SocketAddr;

    fn test_ctx() -> Arc<SharedContext> {
        let (listener, _soft_err) =
            net::listen_udp("127.0.0.1:0".parse().unwrap(), true, 0).unwrap();
        let transform = get_handler("plain", b"").unwrap();

        Arc::new(SharedContext::new(
            listener,
            Arc::from(transform),
            BufferPool::new(1400),
            Arc::new(SessionTable::new()),
            "127.0.0.1:1".parse().unwrap(),
            0,
            1420,
        ))
    }

    /// §3 "Bounded send queue", §8 "Drop under pressure": once a session's queue is at
    /// capacity, a newly decrypted datagram for that session is dropped rather than
    /// blocking ingress or growing the queue, and the session itself is left untouched.
    #[test]
    fn full_send_queue_drops_the_newest_datagram_without_disturbing_the_session() {
        let ctx = test_ctx();
        let client: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        let (send_tx, _send_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let (deadline_setter, _deadline) = deadline::channel(Instant::now() + REJECT_AFTER_TIME);
        let (oob_tx, _oob_rx) = watch::channel(None);

        for _ in 0..SEND_QUEUE_CAPACITY {
            let buffer = ctx.buffer_pool.acquire();
            send_tx
                .try_send(QueuedPacket::new(buffer, 0, 1))
                .expect("queue has just been sized to its own capacity");
        }

        ctx.table.lock().insert(
            client,
            SessionHandle {
                send_tx,
                deadline: deadline_setter,
                oob: oob_tx,
            },
        );

        let buffer = ctx.buffer_pool.acquire();
        handle_decrypted(&ctx, client, None, buffer, 0, 1);

        let table = ctx.table.lock();
        let handle = table
            .get(&client)
            .expect("a full queue must not remove the session from the table");
        assert_eq!(
            handle.send_tx.capacity(),
            0,
            "the queue must stay full, not grow past its configured capacity"
        );
    }
}
