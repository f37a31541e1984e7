//! The session table (§4.E): a single exclusive lock guarding client-address → session
//! lookups. Insert, lookup, and delete all happen under this one lock; no other lock is ever
//! held at the same time.

use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::{Mutex, MutexGuard};

use crate::session::SessionHandle;

#[derive(Default)]
pub struct SessionTable {
    inner: Mutex<HashMap<SocketAddr, SessionHandle>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the table. Callers must not perform blocking I/O or `.await` while holding the
    /// guard; session creation (bind + two task spawns) and the bounded-channel `try_send`
    /// are the only operations ever performed under it, and neither suspends.
    pub fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddr, SessionHandle>> {
        self.inner.lock()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadline;
    use tokio::sync::{mpsc, watch};

    fn handle() -> SessionHandle {
        let (tx, _rx) = mpsc::channel(1);
        let (setter, _deadline) = deadline::channel(std::time::Instant::now());
        let (oob, _oob_rx) = watch::channel(None);

        SessionHandle {
            send_tx: tx,
            deadline: setter,
            oob,
        }
    }

    #[test]
    fn insert_lookup_remove_round_trip() {
        let table = SessionTable::new();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();

        assert_eq!(table.len(), 0);

        table.lock().insert(addr, handle());
        assert_eq!(table.len(), 1);
        assert!(table.lock().contains_key(&addr));

        table.lock().remove(&addr);
        assert_eq!(table.len(), 0);
    }
}
