//! Shared session types: the table entry (§4.E), the queued-packet handle that crosses the
//! ingress → sender-worker boundary, and the context every task needs a handle to.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::buffer::{BufferPool, PooledBuffer};
use crate::deadline::DeadlineSetter;
use crate::net::Socket;
use crate::table::SessionTable;
use crate::transform::Transform;

/// Capacity of a session's bounded send queue (§3, "Bounded send queue"). Overflow drops
/// the newest packet rather than growing unbounded or blocking ingress.
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// A decrypted datagram in flight from the ingress loop to a session's sender worker.
///
/// Carries the pooled buffer by value plus the offsets of the plaintext payload within it,
/// rather than a borrowed slice, so it can cross the channel.
pub struct QueuedPacket {
    buffer: PooledBuffer,
    start: usize,
    len: usize,
}

impl QueuedPacket {
    pub fn new(buffer: PooledBuffer, start: usize, len: usize) -> Self {
        Self { buffer, start, len }
    }

    pub fn plaintext(&self) -> &[u8] {
        &self.buffer[self.start..self.start + self.len]
    }
}

/// What the session table stores for one client address (§4.E).
///
/// Intentionally does not reference the table it lives in, nor the egress/sender tasks it
/// was spawned alongside — per the cyclic-reference design note, a session is reachable only
/// through its table key.
///
/// The OOB cache (§4.D) rides the same `watch` mechanism as the read deadline rather than a
/// dedicated mutex: `oob` is written from `ingress.rs` while the table lock is already held,
/// and read from the session's egress loop via `Receiver::borrow`, with no additional lock
/// on either side.
pub struct SessionHandle {
    pub send_tx: mpsc::Sender<QueuedPacket>,
    pub deadline: DeadlineSetter,
    pub oob: watch::Sender<Option<IpAddr>>,
}

/// Everything the ingress loop and every per-session task need read-only access to.
///
/// `listener` is behind a lock so `Relay::stop` can actually drop the bound socket (see
/// §4.I); the lock only ever guards a pointer swap, never an I/O call, so it is never held
/// across an `.await`.
pub struct SharedContext {
    listener: Mutex<Option<Arc<Socket>>>,
    pub transform: Arc<dyn Transform>,
    pub buffer_pool: BufferPool,
    pub table: Arc<SessionTable>,
    pub upstream_endpoint: SocketAddr,
    pub upstream_fwmark: u32,
    pub mtu: u16,
}

impl SharedContext {
    pub fn new(
        listener: Socket,
        transform: Arc<dyn Transform>,
        buffer_pool: BufferPool,
        table: Arc<SessionTable>,
        upstream_endpoint: SocketAddr,
        upstream_fwmark: u32,
        mtu: u16,
    ) -> Self {
        Self {
            listener: Mutex::new(Some(Arc::new(listener))),
            transform,
            buffer_pool,
            table,
            upstream_endpoint,
            upstream_fwmark,
            mtu,
        }
    }

    /// A clone of the current listener handle, or `None` once `close_listener` has run.
    pub fn listener(&self) -> Option<Arc<Socket>> {
        self.listener.lock().clone()
    }

    /// Drops this context's reference to the listener. The underlying socket closes once
    /// every other clone handed out by `listener()` is itself dropped (i.e. once every
    /// in-flight read/write using it completes).
    pub fn close_listener(&self) {
        self.listener.lock().take();
    }
}
