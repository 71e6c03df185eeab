//! Process lifecycle: boot, signal handling, and time-bounded shutdown.
//!
//! Uses `ArcSwap` for lock-free lifecycle state transitions. Termination is
//! signal-driven (SIGINT/SIGTERM) and bounded: components stop
//! concurrently, and a fixed watchdog caps how long the stop phase may
//! take, so shutdown latency stays bounded even when an adapter hangs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::registry::{ComponentContext, ComponentRegistry};
use crate::signal::Signal;

/// How long the stop phase may run before the watchdog gives up on it.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(1500);

/// Process lifecycle state, transitioned by the runtime.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Components are registering and initializing.
    Starting,
    /// The process is fully operational.
    Ready,
    /// Shutdown was triggered; components are stopping.
    Draining,
    /// Every component finished stopping within the grace period.
    Stopped,
}

/// How a terminate call resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Every component's stop completed within the grace period.
    Drained,
    /// The watchdog fired with components still stopping.
    WatchdogFired,
}

/// Hosts the component registry and coordinates the process lifecycle.
pub struct Runtime {
    config: Arc<ServerConfig>,
    registry: Arc<ComponentRegistry>,
    shutdown: Arc<Signal<()>>,
    state: ArcSwap<LifecycleState>,
    terminated: AtomicBool,
}

impl Runtime {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(ComponentRegistry::new()),
            shutdown: Arc::new(Signal::new()),
            state: ArcSwap::from_pointee(LifecycleState::Starting),
            terminated: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.config)
    }

    /// The component registry components are registered into.
    #[must_use]
    pub fn registry(&self) -> Arc<ComponentRegistry> {
        Arc::clone(&self.registry)
    }

    /// The shared shutdown publisher handed to every component.
    #[must_use]
    pub fn shutdown_signal(&self) -> Arc<Signal<()>> {
        Arc::clone(&self.shutdown)
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// The context handed to component initializers.
    #[must_use]
    pub fn context(&self) -> ComponentContext {
        ComponentContext {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Runs every queued initializer against the populated registry and
    /// transitions to `Ready`.
    ///
    /// # Errors
    ///
    /// Returns the first initializer failure.
    pub async fn init_components(&self) -> anyhow::Result<()> {
        let ctx = self.context();
        self.registry.init_all(&ctx).await?;
        self.state.store(Arc::new(LifecycleState::Ready));
        info!(components = self.registry.len(), "runtime ready");
        Ok(())
    }

    /// Serves until SIGINT or SIGTERM arrives, then terminates.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handlers cannot be installed.
    pub async fn run(&self) -> anyhow::Result<TerminateOutcome> {
        install_panic_hook();
        wait_for_signal().await?;
        Ok(self.terminate().await)
    }

    /// Shuts the process down.
    ///
    /// Sequence: (1) publish the shutdown event synchronously to every
    /// subscriber; (2) stop every registered component concurrently;
    /// (3) resolve once all stops complete -- or once the watchdog fires,
    /// whichever comes first. Idempotent: only the first call runs the
    /// sequence.
    pub async fn terminate(&self) -> TerminateOutcome {
        if self.terminated.swap(true, Ordering::SeqCst) {
            debug!("terminate already ran");
            return TerminateOutcome::Drained;
        }

        warn!("shutting down");
        self.state.store(Arc::new(LifecycleState::Draining));
        self.shutdown.publish(&());

        let components = self.registry.components();
        let stops = join_all(components.iter().map(|component| async move {
            if let Err(error) = component.stop().await {
                warn!(component = component.name(), %error, "component stop failed");
            }
        }));

        match tokio::time::timeout(SHUTDOWN_GRACE, stops).await {
            Ok(_) => {
                self.state.store(Arc::new(LifecycleState::Stopped));
                info!("all components stopped");
                TerminateOutcome::Drained
            }
            Err(_) => {
                warn!(
                    grace = ?SHUTDOWN_GRACE,
                    "watchdog fired with components still stopping"
                );
                TerminateOutcome::WatchdogFired
            }
        }
    }
}

/// Routes uncaught panics to the structured log before the default hook
/// runs. Panics are logged, not turned into shutdown triggers.
pub fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            error!(panic = %info, "uncaught panic");
            previous(info);
        }));
    });
}

async fn wait_for_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}
