use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error};
use tokio::runtime::Handle;

use super::ReadyCallback;

/// Lifecycle of a readiness gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    /// Nobody has waited yet
    Pending,
    /// A poll task is running or queued callbacks are being drained
    Polling,
    Ready,
    /// Polling gave up; the owner has been told to close
    Failed,
    Cancelled,
}

struct GateState {
    status: GateStatus,
    waiters: VecDeque<ReadyCallback>,
}

/// Defers callbacks until a sink reports that it can accept writes.
///
/// At most one poll task runs per gate. Callbacks queued while polling run
/// in the order they were queued, and a callback that arrives while older
/// ones are still queued waits its turn even if the sink is ready by then.
#[derive(Clone)]
pub struct ReadinessGate {
    state: Arc<Mutex<GateState>>,
    probe: Arc<dyn Fn() -> bool + Send + Sync>,
    on_timeout: Arc<dyn Fn(u32) + Send + Sync>,
    interval: Duration,
    max_attempts: u32,
    handle: Handle,
}

impl ReadinessGate {
    pub fn new<P, T>(handle: Handle, interval: Duration, max_attempts: u32, probe: P, on_timeout: T) -> Self
    where
        P: Fn() -> bool + Send + Sync + 'static,
        T: Fn(u32) + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(GateState {
                status: GateStatus::Pending,
                waiters: VecDeque::new(),
            })),
            probe: Arc::new(probe),
            on_timeout: Arc::new(on_timeout),
            interval,
            max_attempts,
            handle,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> GateStatus {
        self.lock().status
    }

    pub fn is_ready(&self) -> bool {
        self.status() == GateStatus::Ready
    }

    pub fn pending_callbacks(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Run `callback` once the sink is ready, or once polling gives up.
    ///
    /// Runs synchronously when the sink is already ready and nothing is
    /// queued ahead of it.
    pub fn wait(&self, callback: ReadyCallback) {
        let status = self.status();
        match status {
            GateStatus::Ready | GateStatus::Failed | GateStatus::Cancelled => {
                callback();
                return;
            }
            GateStatus::Polling => {}
            GateStatus::Pending => {
                if (self.probe)() {
                    let mut state = self.lock();
                    if state.status == GateStatus::Pending {
                        state.status = GateStatus::Ready;
                        drop(state);
                        debug!("Output ready on first probe");
                        callback();
                        return;
                    }
                }
            }
        }

        let mut state = self.lock();
        match state.status {
            GateStatus::Pending => {
                state.waiters.push_back(callback);
                state.status = GateStatus::Polling;
                drop(state);
                self.spawn_poll();
            }
            GateStatus::Polling => {
                state.waiters.push_back(callback);
            }
            // Resolved while we were probing
            GateStatus::Ready | GateStatus::Failed | GateStatus::Cancelled => {
                drop(state);
                callback();
            }
        }
    }

    /// Stop polling. Queued callbacks run immediately so no caller is left waiting.
    pub fn cancel(&self) {
        let waiters = {
            let mut state = self.lock();
            match state.status {
                GateStatus::Ready | GateStatus::Failed => return,
                _ => {}
            }
            state.status = GateStatus::Cancelled;
            std::mem::take(&mut state.waiters)
        };

        for waiter in waiters {
            waiter();
        }
    }

    fn spawn_poll(&self) {
        let gate = self.clone();
        self.handle.spawn(async move {
            let mut attempts = 0u32;
            loop {
                tokio::time::sleep(gate.interval).await;
                attempts += 1;

                if gate.status() == GateStatus::Cancelled {
                    return;
                }

                if (gate.probe)() {
                    debug!("Output ready after {} probe(s)", attempts);
                    gate.drain(GateStatus::Ready);
                    return;
                }

                if attempts >= gate.max_attempts {
                    error!("Output failed to become ready after {} attempts", attempts);
                    (gate.on_timeout)(attempts);
                    gate.drain(GateStatus::Failed);
                    return;
                }
            }
        });
    }

    /// Run queued callbacks one at a time outside the lock, then settle on `outcome`
    fn drain(&self, outcome: GateStatus) {
        loop {
            let next = {
                let mut state = self.lock();
                if state.status == GateStatus::Cancelled {
                    return;
                }
                match state.waiters.pop_front() {
                    Some(waiter) => waiter,
                    None => {
                        state.status = outcome;
                        return;
                    }
                }
            };
            next();
        }
    }
}
