//! A read deadline that can be refreshed from a different task than the one waiting on it.
//!
//! Plain `tokio::net::UdpSocket`s expose no per-read deadline (no `SO_RCVTIMEO` knob), so we
//! emulate one: a [`tokio::sync::watch`] channel carries the current deadline, the ingress
//! loop (or `Stop`) refreshes it with [`DeadlineSetter::set`], and the egress loop races its
//! upstream read against [`Deadline::wait`].
//!
//! This plays the same role as the upstream relay crate's single-owner `Sleep` future (reset
//! by one central loop), generalized to the cross-task refresh this relay's session model
//! requires: the egress loop that waits on the deadline is a different task than the ingress
//! loop that refreshes it.

use std::time::Instant;

use tokio::sync::watch;

pub fn channel(initial: Instant) -> (DeadlineSetter, Deadline) {
    let (tx, rx) = watch::channel(initial);
    (DeadlineSetter { tx }, Deadline { rx })
}

#[derive(Clone)]
pub struct DeadlineSetter {
    tx: watch::Sender<Instant>,
}

impl DeadlineSetter {
    /// Refreshes the deadline. A no-op failure (the receiver was dropped, i.e. the session's
    /// egress loop already exited) is deliberately ignored.
    pub fn set(&self, deadline: Instant) {
        let _ = self.tx.send(deadline);
    }
}

pub struct Deadline {
    rx: watch::Receiver<Instant>,
}

impl Deadline {
    /// Resolves once the current deadline is reached. If the deadline is refreshed while
    /// waiting, re-evaluates against the new value instead of firing early.
    pub async fn wait(&mut self) {
        loop {
            let current = *self.rx.borrow_and_update();

            tokio::select! {
                biased;

                changed = self.rx.changed() => {
                    if changed.is_err() {
                        // Setter dropped; keep sleeping until the last-known deadline passes.
                        tokio::time::sleep_until(current.into()).await;
                        return;
                    }
                    continue;
                }
                () = tokio::time::sleep_until(current.into()) => {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn wait_resolves_at_the_configured_deadline() {
        let now = Instant::now();
        let (_setter, mut deadline) = channel(now + Duration::from_millis(50));

        let start = Instant::now();
        deadline.wait().await;

        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn refreshing_the_deadline_delays_the_wait() {
        let now = Instant::now();
        let (setter, mut deadline) = channel(now + Duration::from_millis(10));

        setter.set(now + Duration::from_millis(100));

        tokio::time::timeout(Duration::from_millis(50), deadline.wait())
            .await
            .expect_err("deadline should have been pushed back");
    }

    #[tokio::test(start_paused = true)]
    async fn setting_deadline_to_now_resolves_immediately() {
        let now = Instant::now();
        let (setter, mut deadline) = channel(now + Duration::from_secs(180));

        setter.set(Instant::now());

        tokio::time::timeout(Duration::from_millis(10), deadline.wait())
            .await
            .expect("deadline forced to `now` should resolve promptly");
    }
}
