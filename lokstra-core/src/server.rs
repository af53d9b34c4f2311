//! Server Orchestrator (C8, §4.8): runs N apps, joins the first failure or
//! signal, then shuts every app down within a shared timeout budget.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;

use crate::listener::{AppListener, ListenError};

#[derive(Debug)]
pub enum ServerError {
    /// An app's accept loop failed.
    AppFailed { app: String, source: ListenError },
    /// One or more apps failed to shut down within the budget.
    ShutdownFailed { failures: Vec<(String, ListenError)> },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::AppFailed { app, source } => write!(f, "app '{app}' failed: {source}"),
            ServerError::ShutdownFailed { failures } => {
                write!(f, "{} app(s) failed to shut down cleanly: ", failures.len())?;
                for (i, (app, err)) in failures.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{app}: {err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ServerError {}

/// One named, runnable app attached to this server (spec §3 "Server ... one
/// or more Apps").
pub struct NamedApp {
    pub name: String,
    pub listener: Arc<dyn AppListener>,
}

impl NamedApp {
    pub fn new(name: impl Into<String>, listener: Arc<dyn AppListener>) -> Self {
        Self { name: name.into(), listener }
    }
}

/// Orchestrates the apps belonging to one [`crate::deployment::Server`]
/// (spec §4.8).
pub struct Server {
    apps: Vec<NamedApp>,
}

impl Server {
    pub fn new(apps: Vec<NamedApp>) -> Self {
        Self { apps }
    }

    /// Start every app, wait for the first failure or an OS shutdown
    /// signal (Ctrl-C / SIGTERM), then shut every app down concurrently
    /// within `timeout`. Returns the aggregated error, if any.
    pub async fn run(self, timeout: Duration) -> Result<(), ServerError> {
        let mut serve_set = tokio::task::JoinSet::new();
        for app in &self.apps {
            let name = app.name.clone();
            let listener = app.listener.clone();
            serve_set.spawn(async move { (name, listener.serve().await) });
        }

        tokio::select! {
            Some(joined) = serve_set.join_next() => {
                // One app's accept loop died (or panicked); shut everyone
                // else down before surfacing the error (spec §7
                // Infrastructure: "bubble up to the server, which begins
                // shutdown of sibling apps").
                let failure = match joined {
                    Ok((_, Ok(()))) => None,
                    Ok((name, Err(source))) => Some((name, source)),
                    Err(join_err) => Some(("<unknown>".to_string(), ListenError::Serve(join_err.to_string()))),
                };
                if let Some((app, source)) = failure {
                    let _ = self.shutdown_all(timeout).await;
                    return Err(ServerError::AppFailed { app, source });
                }
            }
            _ = shutdown_signal() => {}
        }

        self.shutdown_all(timeout).await
    }

    async fn shutdown_all(&self, timeout: Duration) -> Result<(), ServerError> {
        let mut shutdown_set = tokio::task::JoinSet::new();
        for app in &self.apps {
            let name = app.name.clone();
            let listener = app.listener.clone();
            shutdown_set.spawn(async move { (name, listener.shutdown(timeout).await) });
        }

        let mut failures = Vec::new();
        while let Some(joined) = shutdown_set.join_next().await {
            if let Ok((name, Err(err))) = joined {
                failures.push((name, err));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ServerError::ShutdownFailed { failures })
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining apps");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyListener {
        active: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AppListener for FlakyListener {
        async fn serve(&self) -> Result<(), ListenError> {
            if self.fail {
                Err(ListenError::Serve("boom".to_string()))
            } else {
                std::future::pending().await
            }
        }

        async fn shutdown(&self, _timeout: Duration) -> Result<(), ListenError> {
            Ok(())
        }

        fn active_requests(&self) -> usize {
            self.active.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn app_failure_triggers_aggregate_shutdown_and_error() {
        let healthy = Arc::new(FlakyListener { active: AtomicUsize::new(0), fail: false });
        let failing = Arc::new(FlakyListener { active: AtomicUsize::new(0), fail: true });
        let server = Server::new(vec![
            NamedApp::new("healthy", healthy),
            NamedApp::new("failing", failing),
        ]);

        let err = server.run(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ServerError::AppFailed { app, .. } if app == "failing"));
    }
}
