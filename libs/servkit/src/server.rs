//! Listener binding seam.
//!
//! The orchestrator never touches sockets itself; it hands a composed
//! `Router` and a port to a [`ListenerBinder`] and stores the returned
//! handle in the resource container, where normal cohort teardown shuts the
//! listener down. [`TcpListenerBinder`] is the stock TCP implementation.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::Router;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::container::Disposable;

/// A live, serving listener. Disposal cancels the accept loop and awaits
/// the serve task to drain.
pub struct ListenerHandle {
    name: String,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerHandle {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        local_addr: SocketAddr,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            name: name.into(),
            local_addr,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address actually bound; useful with ephemeral port 0.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("name", &self.name)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

#[async_trait]
impl Disposable for ListenerHandle {
    fn release(&self) -> anyhow::Result<()> {
        self.cancel.cancel();
        Ok(())
    }

    async fn release_async(&self) -> anyhow::Result<()> {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await?;
            tracing::info!(listener = %self.name, "Listener stopped");
        }
        Ok(())
    }
}

/// Opaque transport collaborator: binds `router` on `port` and returns a
/// handle the container can dispose.
#[async_trait]
pub trait ListenerBinder: Send + Sync {
    async fn bind(&self, name: &str, port: u16, router: Router)
        -> anyhow::Result<ListenerHandle>;
}

/// Stock binder: tokio TCP listener served by axum with graceful shutdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpListenerBinder;

#[async_trait]
impl ListenerBinder for TcpListenerBinder {
    async fn bind(
        &self,
        name: &str,
        port: u16,
        router: Router,
    ) -> anyhow::Result<ListenerHandle> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let task_name = name.to_owned();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(error) = result {
                tracing::error!(listener = %task_name, %error, "Listener serve loop failed");
            }
        });

        tracing::info!(listener = %name, %local_addr, "Listener bound");
        Ok(ListenerHandle::new(name, local_addr, cancel, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_ephemeral_port_and_accepts_connections() {
        let router = Router::new().route("/ping", axum::routing::get(|| async { "pong" }));
        let handle = TcpListenerBinder
            .bind("test_listener", 0, router)
            .await
            .unwrap();
        assert_ne!(handle.local_addr().port(), 0);

        let conn = tokio::net::TcpStream::connect(handle.local_addr()).await;
        assert!(conn.is_ok());

        handle.release().unwrap();
        handle.release_async().await.unwrap();
    }

    #[tokio::test]
    async fn dispose_is_safe_to_repeat() {
        let handle = TcpListenerBinder
            .bind("repeat", 0, Router::new())
            .await
            .unwrap();
        handle.release().unwrap();
        handle.release_async().await.unwrap();
        // second round finds no task left
        handle.release().unwrap();
        handle.release_async().await.unwrap();
    }
}
