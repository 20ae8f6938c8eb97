//! OS signal binding for shutdown triggering.
//!
//! Signal names from settings are parsed into `SignalKind`s; each armed
//! signal gets a listener task that forwards receipts to the orchestrator's
//! callback. Detaching cancels the listener tasks.

use thiserror::Error;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown exit signal '{name}'")]
pub struct UnknownSignalError {
    pub name: String,
}

/// Maps a conventional signal name to its `SignalKind`.
///
/// # Errors
/// [`UnknownSignalError`] for names outside the supported set.
pub fn parse_signal(name: &str) -> Result<SignalKind, UnknownSignalError> {
    match name {
        "SIGINT" => Ok(SignalKind::interrupt()),
        "SIGTERM" => Ok(SignalKind::terminate()),
        "SIGHUP" => Ok(SignalKind::hangup()),
        "SIGQUIT" => Ok(SignalKind::quit()),
        "SIGUSR1" => Ok(SignalKind::user_defined1()),
        "SIGUSR2" => Ok(SignalKind::user_defined2()),
        other => Err(UnknownSignalError {
            name: other.to_owned(),
        }),
    }
}

/// A set of armed signal listeners. Dropping without `detach` leaves the
/// tasks running until process exit.
pub struct SignalSet {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for SignalSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSet")
            .field("listeners", &self.tasks.len())
            .finish()
    }
}

impl SignalSet {
    /// Arms one listener task per signal name. Stream registration happens
    /// up front so a bad name or registration failure surfaces here rather
    /// than inside a detached task.
    ///
    /// # Errors
    /// Unknown names or signal registration failures.
    pub fn attach<F>(names: &[String], on_signal: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) + Send + Sync + Clone + 'static,
    {
        let cancel = CancellationToken::new();
        let mut streams = Vec::with_capacity(names.len());
        for name in names {
            let kind = parse_signal(name)?;
            streams.push((name.clone(), signal(kind)?));
        }

        let mut tasks = Vec::with_capacity(streams.len());
        for (name, mut stream) in streams {
            let cancel = cancel.clone();
            let on_signal = on_signal.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        received = stream.recv() => {
                            if received.is_none() {
                                break;
                            }
                            tracing::info!(signal = %name, "Exit signal received");
                            on_signal(&name);
                        }
                    }
                }
            }));
        }

        Ok(Self { cancel, tasks })
    }

    /// Cancels every listener task and waits for them to finish.
    pub async fn detach(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parses_supported_names() {
        assert_eq!(parse_signal("SIGINT").unwrap(), SignalKind::interrupt());
        assert_eq!(parse_signal("SIGTERM").unwrap(), SignalKind::terminate());
        let err = parse_signal("SIGPWR").unwrap_err();
        assert_eq!(err.name, "SIGPWR");
    }

    #[tokio::test]
    async fn attach_rejects_unknown_name() {
        let names = vec!["SIGWHAT".to_owned()];
        assert!(SignalSet::attach(&names, |_| {}).is_err());
    }

    #[tokio::test]
    async fn delivers_signal_and_detaches() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let names = vec!["SIGUSR2".to_owned()];
        let set = SignalSet::attach(&names, move |name| {
            let _ = tx.send(name.to_owned());
        })
        .unwrap();

        let status = tokio::process::Command::new("kill")
            .arg("-USR2")
            .arg(std::process::id().to_string())
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, "SIGUSR2");

        set.detach().await;
    }
}
