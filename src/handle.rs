//! Composition root's runtime handle: owns the listener, the background
//! task set, and the shutdown sequence described in §6/§9 (stop webhook
//! ingress → close the listener → stop timers → drain the queue with a
//! bounded budget → close admin clients).

use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::{
    config::AppConfig,
    errors::IoError,
    notify::ServiceNotifier,
    signal::SignalStream,
    watchdog::{Watchdog, WatchdogHandle},
    webhook::EventPipeline,
};

/// Budget given to the worker pool to drain its queue before it is
/// dropped outright on shutdown.
const QUEUE_DRAIN_BUDGET: Duration = Duration::from_secs(30);

/// Error type returned while starting or running the service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HandleError {
    /// Error while setting up logging.
    #[error(transparent)]
    Logging(#[from] crate::logging::LoggingError),
    /// Error while registering UNIX signal handlers.
    #[error(transparent)]
    Signal(#[from] crate::signal::SignalError),
    /// Error binding the HTTP listener.
    #[error("failed to bind HTTP listener: {0}")]
    Bind(IoError),
    /// Error running the HTTP server.
    #[error("HTTP server error: {0}")]
    Server(IoError),
}

/// Owns the bound listener and background task set for one run of the
/// service. Unwritten logs are flushed when this is dropped.
#[non_exhaustive]
pub struct Handle {
    buf_guards: Vec<WorkerGuard>,
    notify: ServiceNotifier,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    background: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    watchdog: Watchdog,
}

impl AppConfig {
    /// Initialize the logging subsystem and build a [`Handle`] to drive
    /// the rest of the service's lifecycle.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the logging subscribers could not be built.
    pub fn handle(&self) -> Result<Handle, HandleError> {
        let (registry, buf_guards) = self.logging.make_registry()?;
        use tracing_subscriber::util::SubscriberInitExt;
        registry.init();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut watchdog = Watchdog::from(self.watchdog.clone());
        watchdog.start();
        Ok(Handle {
            buf_guards,
            notify: ServiceNotifier::new(),
            shutdown_tx,
            shutdown_rx,
            background: Vec::new(),
            workers: Vec::new(),
            watchdog,
        })
    }
}

impl Handle {
    /// A receiver that observes `true` once shutdown has been requested.
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Cheaply cloneable liveness probe for the `/health` handler.
    #[must_use]
    pub fn watchdog_handle(&self) -> WatchdogHandle {
        self.watchdog.handle()
    }

    /// Register a long-running background task (timers, the runtime
    /// metrics gauge loop) that should simply be awaited on shutdown.
    pub fn track_background(&mut self, task: JoinHandle<()>) {
        self.background.push(task);
    }

    /// Register an event-pipeline worker task; these get the drain
    /// budget applied before being abandoned.
    pub fn track_workers(&mut self, tasks: Vec<JoinHandle<()>>) {
        self.workers.extend(tasks);
    }

    /// Serve `app` on `listen`, blocking until a termination signal is
    /// received, then run the shutdown sequence.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the listener could not be bound or the server
    /// exited with an I/O error.
    pub async fn run(
        mut self,
        listen: &str,
        app: Router,
        webhook: std::sync::Arc<EventPipeline>,
    ) -> Result<(), HandleError> {
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|err| HandleError::Bind(err.into()))?;
        info!(%listen, "listening");
        self.notify.on_ready();

        let mut signals = SignalStream::new()?;
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            loop {
                match signals.next().await {
                    Ok(signal) if signal.is_shutdown() => {
                        info!(signal = signal.name(), "shutdown requested");
                        break;
                    }
                    Ok(signal) => {
                        info!(signal = signal.name(), "signal ignored");
                    }
                    Err(err) => {
                        warn!(%err, "signal handler error, shutting down");
                        break;
                    }
                }
            }
        });

        let result = serve.await.map_err(|err| HandleError::Server(err.into()));

        self.shutdown(&webhook).await;
        result
    }

    /// Run the shutdown sequence: signal background tasks to stop, give
    /// the event pipeline's workers a bounded budget to drain, then
    /// abandon anything still running.
    async fn shutdown(self, webhook: &EventPipeline) {
        self.notify.on_shutdown();
        let _ = self.shutdown_tx.send(true);
        info!(backlog = webhook.backlog(), "draining event pipeline");

        for task in self.background {
            let _ = task.await;
        }

        let drain = async {
            for task in self.workers {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(QUEUE_DRAIN_BUDGET, drain).await.is_err() {
            warn!("event pipeline did not drain within the shutdown budget");
        }
    }
}
