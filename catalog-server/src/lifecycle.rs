//! Process lifecycle: `Starting -> Running -> Draining -> Stopped`.
//!
//! Every listener and consumer is a [`Subsystem`]. The orchestrator starts
//! them together, runs them until a signal or the first failure, then cancels
//! one shared token and waits for them up to the drain deadline.

use async_trait::async_trait;
use catalog::{Health, LifecycleState};
use futures::future::{join_all, BoxFuture};
use shared::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[async_trait]
pub trait Subsystem: Send + 'static {
    fn name(&self) -> &'static str;

    /// Acquire resources: bind sockets, join the consumer group.
    async fn start(&mut self) -> Result<()>;

    /// Serve until `shutdown` is cancelled. Returning early, with or without
    /// an error, drains the whole process.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShutdownCause {
    Signal,
    StartupFailed { subsystem: &'static str, error: String },
    Failed { subsystem: &'static str, error: String },
    Exited { subsystem: &'static str },
}

#[derive(Clone, Debug)]
pub struct ShutdownReport {
    pub cause: ShutdownCause,
    /// Subsystems still running at the drain deadline.
    pub aborted: Vec<&'static str>,
}

impl ShutdownReport {
    pub fn exit_code(&self) -> u8 {
        match self.cause {
            ShutdownCause::Signal => 0,
            _ => 1,
        }
    }
}

type SubsystemExit = (&'static str, Result<()>);

pub struct Orchestrator {
    subsystems: Vec<Box<dyn Subsystem>>,
    drain_hooks: Vec<(&'static str, BoxFuture<'static, ()>)>,
    health: Arc<Health>,
    drain_deadline: Duration,
}

impl Orchestrator {
    pub fn new(health: Arc<Health>, drain_deadline: Duration) -> Self {
        Self {
            subsystems: Vec::new(),
            drain_hooks: Vec::new(),
            health,
            drain_deadline,
        }
    }

    pub fn register(&mut self, subsystem: impl Subsystem) -> &mut Self {
        self.subsystems.push(Box::new(subsystem));
        self
    }

    /// Work run after every subsystem has stopped, in registration order.
    pub fn on_drain<F>(&mut self, name: &'static str, hook: F) -> &mut Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.drain_hooks.push((name, Box::pin(hook)));
        self
    }

    pub fn health(&self) -> &Arc<Health> {
        &self.health
    }

    pub async fn run<S>(self, signal: S) -> ShutdownReport
    where
        S: Future<Output = ()> + Send,
    {
        let Orchestrator {
            mut subsystems,
            drain_hooks,
            health,
            drain_deadline,
        } = self;

        health.set_state(LifecycleState::Starting);
        info!(subsystems = subsystems.len(), "Starting subsystems");

        let started = join_all(subsystems.iter_mut().map(|subsystem| async move {
            let name = subsystem.name();
            subsystem.start().await.map_err(|e| (name, e))
        }))
        .await;

        let mut aborted = Vec::new();
        let cause = match started.into_iter().find_map(|r| r.err()) {
            Some((subsystem, e)) => {
                error!(subsystem, error = %e, "Subsystem failed to start");
                health.set_state(LifecycleState::Draining);
                ShutdownCause::StartupFailed {
                    subsystem,
                    error: e.to_string(),
                }
            }
            None => {
                let shutdown = CancellationToken::new();
                let mut running: Vec<&'static str> = Vec::with_capacity(subsystems.len());
                let mut tasks: JoinSet<SubsystemExit> = JoinSet::new();
                for subsystem in subsystems {
                    let name = subsystem.name();
                    let token = shutdown.clone();
                    running.push(name);
                    tasks.spawn(async move { (name, subsystem.run(token).await) });
                }

                health.set_state(LifecycleState::Running);
                info!("All subsystems running");

                let cause = tokio::select! {
                    _ = signal => {
                        info!("Shutdown signal received");
                        ShutdownCause::Signal
                    }
                    Some(joined) = tasks.join_next() => first_exit(joined, &mut running),
                };

                health.set_state(LifecycleState::Draining);
                shutdown.cancel();
                info!(deadline_ms = drain_deadline.as_millis() as u64, "Draining subsystems");

                let drained = tokio::time::timeout(drain_deadline, async {
                    while let Some(joined) = tasks.join_next().await {
                        drained_exit(joined, &mut running);
                    }
                })
                .await;

                if drained.is_err() {
                    warn!(stragglers = ?running, "Drain deadline reached, aborting subsystems");
                    aborted = running;
                    tasks.shutdown().await;
                }
                cause
            }
        };

        for (name, hook) in drain_hooks {
            info!(hook = name, "Running drain hook");
            hook.await;
        }

        health.set_state(LifecycleState::Stopped);
        info!(cause = ?cause, "Stopped");
        ShutdownReport { cause, aborted }
    }
}

fn first_exit(
    joined: std::result::Result<SubsystemExit, JoinError>,
    running: &mut Vec<&'static str>,
) -> ShutdownCause {
    match joined {
        Ok((subsystem, Ok(()))) => {
            running.retain(|n| *n != subsystem);
            warn!(subsystem, "Subsystem exited unexpectedly");
            ShutdownCause::Exited { subsystem }
        }
        Ok((subsystem, Err(e))) => {
            running.retain(|n| *n != subsystem);
            error!(subsystem, error = %e, "Subsystem failed");
            ShutdownCause::Failed {
                subsystem,
                error: e.to_string(),
            }
        }
        Err(e) => {
            error!(error = %e, "Subsystem task panicked");
            ShutdownCause::Failed {
                subsystem: "unknown",
                error: e.to_string(),
            }
        }
    }
}

fn drained_exit(
    joined: std::result::Result<SubsystemExit, JoinError>,
    running: &mut Vec<&'static str>,
) {
    match joined {
        Ok((subsystem, result)) => {
            running.retain(|n| *n != subsystem);
            match result {
                Ok(()) => info!(subsystem, "Subsystem stopped"),
                Err(e) => warn!(subsystem, error = %e, "Subsystem failed while draining"),
            }
        }
        Err(e) => error!(error = %e, "Subsystem task panicked while draining"),
    }
}

/// Resolves on SIGINT or SIGTERM. A handler that cannot be installed is
/// logged and never fires.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
