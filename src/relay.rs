//! Start/stop lifecycle (§4.I): the one public entry point the CLI (and tests) drive.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::buffer::BufferPool;
use crate::error::StartError;
use crate::ingress;
use crate::net::{self, AddressFamily};
use crate::session::SharedContext;
use crate::table::SessionTable;
use crate::transform::get_handler;
use crate::Config;

/// Minimum MTU this relay will start with (§8, boundary behaviors).
pub const MIN_MTU: u16 = 1280;

/// A running (or not-yet-started) relay instance.
pub struct Relay {
    name: String,
    ctx: Arc<SharedContext>,
    shutdown_tx: watch::Sender<bool>,
    ingress_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Relay {
    /// Validates `config`, binds the listener, and spawns the ingress loop. Returns a typed
    /// error (never panics) on any fatal startup condition (§7, class 1).
    pub fn start(config: &Config) -> Result<Self, StartError> {
        if config.mtu < MIN_MTU {
            return Err(StartError::MtuTooSmall(config.mtu));
        }

        let transform = get_handler(&config.proxy_mode, config.proxy_psk.as_bytes()).map_err(
            |e| match e {
                crate::error::TransformError::UnknownMode(mode) => StartError::UnknownMode(mode),
                crate::error::TransformError::InvalidPsk(reason) => StartError::InvalidPsk {
                    mode: config.proxy_mode.clone(),
                    reason,
                },
                other => StartError::InvalidPsk {
                    mode: config.proxy_mode.clone(),
                    reason: other.to_string(),
                },
            },
        )?;

        // Buffers are sized once for the pool using the IPv4 header as the common baseline
        // (§3, "Buffer"); a session's own `max_proxy_packet_size` is computed per-client
        // family in `ingress::create_session` and is always <= this value.
        let packet_buffer_size = config.mtu as usize - 20 - 8;
        if packet_buffer_size <= transform.overhead() {
            return Err(StartError::BufferTooSmall {
                buffer_size: packet_buffer_size,
                overhead: transform.overhead(),
            });
        }

        let upstream_endpoint = resolve_upstream(&config.upstream_endpoint)?;

        let (listener, soft_err) =
            net::listen_udp(config.proxy_listen_addr, true, config.proxy_fwmark).map_err(
                |source| StartError::Bind {
                    addr: config.proxy_listen_addr,
                    source,
                },
            )?;
        if let Some(e) = soft_err {
            tracing::warn!(error = %e, "non-fatal socket option failure on listener");
        }

        let ctx = Arc::new(SharedContext::new(
            listener,
            Arc::from(transform),
            BufferPool::new(packet_buffer_size),
            Arc::new(SessionTable::new()),
            upstream_endpoint,
            config.upstream_fwmark,
            config.mtu,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ingress_handle = tokio::spawn(ingress::run(ctx.clone(), shutdown_rx));

        tracing::info!(name = %config.name, listen = %config.proxy_listen_addr, "relay started");

        Ok(Self {
            name: config.name.clone(),
            ctx,
            shutdown_tx,
            ingress_handle: Mutex::new(Some(ingress_handle)),
        })
    }

    /// Idempotent: a second call observes no sessions and returns immediately.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.ctx.close_listener();

        {
            let table = self.ctx.table.lock();
            for handle in table.values() {
                handle.deadline.set(Instant::now());
            }
        }

        while !self.ctx.table.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        if let Some(handle) = self.ingress_handle.lock().take() {
            let _ = handle.await;
        }

        tracing::info!(name = %self.name, "relay stopped");
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn resolve_upstream(endpoint: &str) -> Result<SocketAddr, StartError> {
    let resolved = endpoint
        .to_socket_addrs()
        .map_err(|_| StartError::UnresolvableEndpoint(endpoint.to_string()))?
        .next()
        .ok_or_else(|| StartError::UnresolvableEndpoint(endpoint.to_string()))?;

    Ok(match AddressFamily::of(&resolved) {
        AddressFamily::V4 => net::canonicalize(resolved),
        AddressFamily::V6 => resolved,
    })
}
