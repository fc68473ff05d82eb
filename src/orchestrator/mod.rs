//! Lifecycle orchestrator (§4.9): publishes `control:state` transitions,
//! drains a LIFO stack of cleanup callbacks on shutdown with a bounded
//! per-callback timeout, and relays pause/resume/status commands.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;

use crate::bus::{create_meta, EventBus, MetaOpts, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl Lifecycle {
    fn as_str(self) -> &'static str {
        match self {
            Lifecycle::Starting => "STARTING",
            Lifecycle::Running => "RUNNING",
            Lifecycle::Stopping => "STOPPING",
            Lifecycle::Stopped => "STOPPED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlStateEvent {
    pub lifecycle: &'static str,
    pub paused: bool,
}

/// `control:command` payload — the CLI's sole wire format into this crate
/// (§6 EXTERNAL INTERFACES).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Shutdown,
    Pause,
    Resume,
    Status,
}

type CleanupFn = Box<dyn FnOnce() -> futures_util::future::BoxFuture<'static, ()> + Send>;

/// Owns process lifecycle. Cleanup callbacks are opaque closures so the
/// orchestrator never holds a reference back to the components it's
/// cleaning up (§9 DESIGN NOTES: cyclic references broken via the bus).
pub struct Orchestrator {
    bus: Arc<EventBus>,
    state: Mutex<ControlState>,
    cleanups: Mutex<Vec<CleanupFn>>,
    cleanup_timeout: Duration,
    shutdown_fallback: Duration,
}

struct ControlState {
    lifecycle: Lifecycle,
    paused: bool,
}

impl Orchestrator {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            state: Mutex::new(ControlState { lifecycle: Lifecycle::Starting, paused: false }),
            cleanups: Mutex::new(Vec::new()),
            cleanup_timeout: Duration::from_secs(2),
            shutdown_fallback: Duration::from_secs(5),
        }
    }

    /// Registers a cleanup callback; callbacks run LIFO (last registered,
    /// first run) during shutdown.
    pub fn register_cleanup<F, Fut>(&self, cleanup: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.cleanups.lock().push(Box::new(move || Box::pin(cleanup())));
    }

    /// Publishes `control:state{STARTING}` then immediately `RUNNING`,
    /// mirroring the teacher's startup sequencing.
    pub fn start(&self) {
        self.publish_state(Lifecycle::Starting);
        self.state.lock().lifecycle = Lifecycle::Running;
        self.publish_state(Lifecycle::Running);
    }

    pub fn handle_command(&self, command: ControlCommand) {
        match command {
            ControlCommand::Shutdown => {
                // Caller is expected to await `shutdown()` separately; this
                // just records intent for synchronous bus subscribers.
            }
            ControlCommand::Pause => {
                self.state.lock().paused = true;
                self.publish_current();
            }
            ControlCommand::Resume => {
                self.state.lock().paused = false;
                self.publish_current();
            }
            ControlCommand::Status => {
                self.publish_current();
            }
        }
    }

    /// Transitions to `STOPPING`, drains cleanups in reverse-registration
    /// order (each bounded by `cleanup_timeout`), then publishes `STOPPED`.
    /// A `shutdown_fallback` watchdog force-returns if cleanup hangs; the
    /// caller is responsible for exiting the process in that case.
    pub async fn shutdown(&self) {
        self.state.lock().lifecycle = Lifecycle::Stopping;
        self.publish_state(Lifecycle::Stopping);

        let drain = async {
            let callbacks: Vec<CleanupFn> = std::mem::take(&mut *self.cleanups.lock());
            for cleanup in callbacks.into_iter().rev() {
                if timeout(self.cleanup_timeout, cleanup()).await.is_err() {
                    tracing::warn!("cleanup callback exceeded timeout during shutdown");
                }
            }
        };

        if timeout(self.shutdown_fallback, drain).await.is_err() {
            tracing::error!("shutdown cleanup drain exceeded fallback window, forcing stop");
        }

        self.state.lock().lifecycle = Lifecycle::Stopped;
        self.publish_state(Lifecycle::Stopped);
    }

    fn publish_state(&self, lifecycle: Lifecycle) {
        let paused = self.state.lock().paused;
        let meta = create_meta(Source::System, MetaOpts::default());
        self.bus.publish(
            "control:state",
            crate::bus::Envelope { meta, payload: ControlStateEvent { lifecycle: lifecycle.as_str(), paused } },
        );
    }

    fn publish_current(&self) {
        let lifecycle = self.state.lock().lifecycle;
        self.publish_state(lifecycle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Envelope;

    #[tokio::test]
    async fn start_publishes_starting_then_running() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.subscribe::<Envelope<ControlStateEvent>, _>("control:state", move |env| {
            s.lock().push(env.payload.lifecycle);
            Ok(())
        });

        let orch = Orchestrator::new(bus);
        orch.start();
        assert_eq!(*seen.lock(), vec!["STARTING", "RUNNING"]);
    }

    #[tokio::test]
    async fn shutdown_runs_cleanups_in_reverse_order() {
        let bus = Arc::new(EventBus::new());
        let orch = Orchestrator::new(bus);
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        orch.register_cleanup(move || async move {
            o1.lock().push(1);
        });
        let o2 = Arc::clone(&order);
        orch.register_cleanup(move || async move {
            o2.lock().push(2);
        });

        orch.shutdown().await;
        assert_eq!(*order.lock(), vec![2, 1]);
    }

    #[tokio::test]
    async fn shutdown_publishes_stopping_then_stopped() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.subscribe::<Envelope<ControlStateEvent>, _>("control:state", move |env| {
            s.lock().push(env.payload.lifecycle);
            Ok(())
        });

        let orch = Orchestrator::new(bus);
        orch.shutdown().await;
        assert_eq!(*seen.lock(), vec!["STOPPING", "STOPPED"]);
    }

    #[tokio::test]
    async fn pause_then_resume_toggles_paused_flag() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.subscribe::<Envelope<ControlStateEvent>, _>("control:state", move |env| {
            s.lock().push(env.payload.paused);
            Ok(())
        });

        let orch = Orchestrator::new(bus);
        orch.handle_command(ControlCommand::Pause);
        orch.handle_command(ControlCommand::Resume);
        assert_eq!(*seen.lock(), vec![true, false]);
    }
}
