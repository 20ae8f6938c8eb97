//! Lifecycle orchestration: phase machine, handler mounting, listener
//! startup and signal-driven graceful shutdown.
//!
//! The orchestrator owns the resource container and two mount registries
//! (primary traffic and health traffic). External collaborators plug in
//! through the [`StartupHandler`] / [`ShutdownHandler`] traits and opaque
//! `axum::Router` values; the orchestrator decides ordering, phases and
//! teardown.

pub mod health;
pub mod signals;

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::extract::Path;
use axum::routing::get;
use axum::{Json, Router};
use http::StatusCode;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use serde_json::json;
use thiserror::Error;

use crate::config::ServiceSettings;
use crate::container::ResourceContainer;
use crate::factory::ResourceFactory;
use crate::lifecycle::health::{
    AlwaysUpProbe, HealthProbe, HealthResponse, HealthStage, HealthState,
};
use crate::lifecycle::signals::SignalSet;
use crate::registry::{InvalidOrderError, OrderedRegistry};
use crate::server::{ListenerBinder, ListenerHandle, TcpListenerBinder};

/// Well-known container name for the health listener resource.
pub const HEALTH_LISTENER: &str = "health_listener";
/// Well-known container name for the primary listener resource.
pub const PRIMARY_LISTENER: &str = "primary_listener";

/// Phase machine: `Unknown → Starting → (Up | Down)`, `Up → Stopping →
/// Stopped`. `Down` and `Stopped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecyclePhase {
    Unknown,
    Starting,
    Up,
    Down,
    Stopping,
    Stopped,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::Starting => "STARTING",
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Which mount registries a handler registration applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceTarget {
    Primary,
    Health,
    Both,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown application type '{name}'")]
pub struct UnknownApplicationTypeError {
    pub name: String,
}

impl FromStr for ServiceTarget {
    type Err = UnknownApplicationTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "health" => Ok(Self::Health),
            "both" => Ok(Self::Both),
            other => Err(UnknownApplicationTypeError {
                name: other.to_owned(),
            }),
        }
    }
}

/// What a mount registry holds per key: a routed handler, or the nested
/// wildcard bucket of global middleware routers.
#[derive(Clone)]
pub enum MountValue {
    Handler(Router),
    Globals(OrderedRegistry<Router>),
}

impl std::fmt::Debug for MountValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Handler"),
            Self::Globals(inner) => f.debug_tuple("Globals").field(&inner.len()).finish(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Order 0 is reserved for the wildcard bucket; callers start at 1.
    #[error("handler order {order} is reserved; explicit orders start at 1")]
    ReservedOrder { order: i64 },
    #[error(transparent)]
    InvalidOrder(#[from] InvalidOrderError),
    #[error(transparent)]
    UnknownTarget(#[from] UnknownApplicationTypeError),
}

/// Verdict of the startup collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStatus {
    Up,
    Down,
}

/// Returned by [`StartupHandler::on_start`]; `router` is the (possibly
/// wrapped) root the orchestrator mounts at `/`.
pub struct StartupReport {
    pub status: StartupStatus,
    pub data: serde_json::Value,
    pub router: Router,
}

/// Verdict of the shutdown collaborator. Anything but `Stopped` leaves the
/// orchestrator parked in `Stopping` with resources intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    Stopped,
    Incomplete,
}

pub struct ShutdownReport {
    pub status: ShutdownStatus,
    pub data: serde_json::Value,
}

/// Application startup collaborator: wires routes and resources, reports
/// whether the service should go up.
#[async_trait]
pub trait StartupHandler: Send + Sync {
    async fn on_start(
        &self,
        root: Router,
        resources: &ResourceContainer,
        lifecycle: &LifecycleOrchestrator,
    ) -> anyhow::Result<StartupReport>;
}

/// Application shutdown collaborator: quiesces in-flight work, reports
/// whether teardown may proceed.
#[async_trait]
pub trait ShutdownHandler: Send + Sync {
    async fn on_stop(&self) -> anyhow::Result<ShutdownReport>;
}

struct PassthroughStartup;

#[async_trait]
impl StartupHandler for PassthroughStartup {
    async fn on_start(
        &self,
        root: Router,
        _resources: &ResourceContainer,
        _lifecycle: &LifecycleOrchestrator,
    ) -> anyhow::Result<StartupReport> {
        Ok(StartupReport {
            status: StartupStatus::Up,
            data: serde_json::Value::Null,
            router: root,
        })
    }
}

struct ImmediateStop;

#[async_trait]
impl ShutdownHandler for ImmediateStop {
    async fn on_stop(&self) -> anyhow::Result<ShutdownReport> {
        Ok(ShutdownReport {
            status: ShutdownStatus::Stopped,
            data: serde_json::Value::Null,
        })
    }
}

struct OrchestratorState {
    phase: LifecyclePhase,
    phase_data: serde_json::Value,
    primary: OrderedRegistry<MountValue>,
    health: OrderedRegistry<MountValue>,
}

/// Assembles an orchestrator with optional collaborator overrides.
pub struct LifecycleBuilder {
    settings: ServiceSettings,
    readiness: Arc<dyn HealthProbe>,
    liveliness: Arc<dyn HealthProbe>,
    binder: Arc<dyn ListenerBinder>,
    startup: Arc<dyn StartupHandler>,
    shutdown: Arc<dyn ShutdownHandler>,
}

impl LifecycleBuilder {
    #[must_use]
    pub fn with_readiness_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.readiness = probe;
        self
    }

    #[must_use]
    pub fn with_liveliness_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.liveliness = probe;
        self
    }

    #[must_use]
    pub fn with_listener_binder(mut self, binder: Arc<dyn ListenerBinder>) -> Self {
        self.binder = binder;
        self
    }

    #[must_use]
    pub fn with_startup_handler(mut self, handler: Arc<dyn StartupHandler>) -> Self {
        self.startup = handler;
        self
    }

    #[must_use]
    pub fn with_shutdown_handler(mut self, handler: Arc<dyn ShutdownHandler>) -> Self {
        self.shutdown = handler;
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<LifecycleOrchestrator> {
        Arc::new(LifecycleOrchestrator {
            settings: self.settings,
            resources: ResourceContainer::new(),
            state: Mutex::new(OrchestratorState {
                phase: LifecyclePhase::Unknown,
                phase_data: serde_json::Value::Null,
                primary: OrderedRegistry::new(),
                health: OrderedRegistry::new(),
            }),
            readiness: self.readiness,
            liveliness: self.liveliness,
            binder: self.binder,
            startup: self.startup,
            shutdown_handler: self.shutdown,
            signal_set: Mutex::new(None),
            stop_in_flight: AtomicBool::new(false),
            terminated: CancellationToken::new(),
        })
    }
}

enum StartupOutcome {
    Ready(serde_json::Value),
    Declined(serde_json::Value),
}

pub struct LifecycleOrchestrator {
    settings: ServiceSettings,
    resources: ResourceContainer,
    state: Mutex<OrchestratorState>,
    readiness: Arc<dyn HealthProbe>,
    liveliness: Arc<dyn HealthProbe>,
    binder: Arc<dyn ListenerBinder>,
    startup: Arc<dyn StartupHandler>,
    shutdown_handler: Arc<dyn ShutdownHandler>,
    signal_set: Mutex<Option<SignalSet>>,
    stop_in_flight: AtomicBool,
    terminated: CancellationToken,
}

impl std::fmt::Debug for LifecycleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleOrchestrator")
            .field("app", &self.settings.app_name())
            .field("phase", &self.phase())
            .finish()
    }
}

fn now_ms() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

fn mount_into(
    registry: &mut OrderedRegistry<MountValue>,
    router: Router,
    path: &str,
    order: Option<i64>,
) -> Result<i64, LifecycleError> {
    if path == "*" {
        if registry.get("*").is_none() {
            registry.set("*", MountValue::Globals(OrderedRegistry::new()), Some(0))?;
        }
        let Some(MountValue::Globals(inner)) = registry.get_mut("*") else {
            unreachable!("wildcard key always holds the globals bucket");
        };
        let inner_order = order.unwrap_or_else(|| inner.next_auto_order());
        inner.set(format!("*{inner_order}"), router, Some(inner_order))?;
        return Ok(inner_order);
    }
    Ok(registry.set(path, MountValue::Handler(router), order)?)
}

fn compose(registry: &OrderedRegistry<MountValue>) -> Router {
    let mut root = Router::new();
    for entry in registry.sorted() {
        match entry.value() {
            MountValue::Globals(inner) => {
                for global in inner.sorted() {
                    root = root.merge(global.value().clone());
                }
            }
            MountValue::Handler(router) => {
                root = if entry.key() == "/" {
                    root.merge(router.clone())
                } else {
                    root.nest(entry.key(), router.clone())
                };
            }
        }
    }
    root
}

fn paths_of(registry: &OrderedRegistry<MountValue>) -> Vec<String> {
    let mut paths = Vec::new();
    for entry in registry.sorted() {
        match entry.value() {
            MountValue::Globals(inner) => {
                paths.extend(inner.sorted().iter().map(|g| g.key().to_owned()));
            }
            MountValue::Handler(_) => paths.push(entry.key().to_owned()),
        }
    }
    paths
}

impl LifecycleOrchestrator {
    #[must_use]
    pub fn builder(settings: ServiceSettings) -> LifecycleBuilder {
        LifecycleBuilder {
            settings,
            readiness: Arc::new(AlwaysUpProbe),
            liveliness: Arc::new(AlwaysUpProbe),
            binder: Arc::new(TcpListenerBinder),
            startup: Arc::new(PassthroughStartup),
            shutdown: Arc::new(ImmediateStop),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    #[must_use]
    pub fn resources(&self) -> &ResourceContainer {
        &self.resources
    }

    #[must_use]
    pub fn phase(&self) -> LifecyclePhase {
        self.state.lock().phase
    }

    #[must_use]
    pub fn phase_data(&self) -> serde_json::Value {
        self.state.lock().phase_data.clone()
    }

    /// Mount keys of the primary registry in composition order, wildcard
    /// bucket entries expanded first.
    #[must_use]
    pub fn primary_paths(&self) -> Vec<String> {
        paths_of(&self.state.lock().primary)
    }

    /// Mount keys of the health registry in composition order.
    #[must_use]
    pub fn health_paths(&self) -> Vec<String> {
        paths_of(&self.state.lock().health)
    }

    fn transition(&self, phase: LifecyclePhase, data: serde_json::Value) {
        let mut state = self.state.lock();
        state.phase = phase;
        state.phase_data = data;
    }

    /// Registers a handler router under `path` in one or both mount
    /// registries. Path `"*"` lands in the wildcard bucket, which composes
    /// before every routed mount.
    ///
    /// Returns the effective order in the last registry written.
    ///
    /// # Errors
    /// Explicit orders below 1 or outside the 32-bit range are rejected
    /// before any registry is touched.
    pub fn register_handler(
        &self,
        router: Router,
        path: &str,
        order: Option<i64>,
        applies_to: ServiceTarget,
    ) -> Result<i64, LifecycleError> {
        if let Some(o) = order {
            if o < 1 {
                return Err(LifecycleError::ReservedOrder { order: o });
            }
            if i32::try_from(o).is_err() {
                return Err(LifecycleError::InvalidOrder(InvalidOrderError { order: o }));
            }
        }

        let mut state = self.state.lock();
        match applies_to {
            ServiceTarget::Primary => mount_into(&mut state.primary, router, path, order),
            ServiceTarget::Health => mount_into(&mut state.health, router, path, order),
            ServiceTarget::Both => {
                mount_into(&mut state.primary, router.clone(), path, order)?;
                mount_into(&mut state.health, router, path, order)
            }
        }
    }

    /// Runs the startup sequence: `Starting`, the startup handler, root
    /// mount, health then primary listener binding, signal attachment, `Up`.
    ///
    /// # Errors
    /// An escaping handler or binder failure transitions to `Down` and is
    /// returned to the caller. A handler that reports a non-up status also
    /// lands in `Down` but is not an error here.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        {
            let state = self.state.lock();
            if state.phase != LifecyclePhase::Unknown {
                anyhow::bail!("cannot start from phase {}", state.phase);
            }
        }

        let begun = Instant::now();
        self.transition(
            LifecyclePhase::Starting,
            json!({ "changed_at_ms": now_ms() }),
        );
        tracing::info!(app = %self.settings.app_name(), "Phase: starting");

        match self.run_startup().await {
            Ok(StartupOutcome::Ready(data)) => {
                self.transition(
                    LifecyclePhase::Up,
                    json!({
                        "startup_millis": begun.elapsed().as_millis() as u64,
                        "report": data,
                    }),
                );
                tracing::info!(app = %self.settings.app_name(), "Phase: up");
                Ok(())
            }
            Ok(StartupOutcome::Declined(data)) => {
                self.transition(
                    LifecyclePhase::Down,
                    json!({
                        "startup_millis": begun.elapsed().as_millis() as u64,
                        "reason": "startup handler did not report up",
                        "report": data,
                    }),
                );
                tracing::warn!(app = %self.settings.app_name(), "Phase: down (startup declined)");
                self.terminated.cancel();
                Ok(())
            }
            Err(error) => {
                self.transition(
                    LifecyclePhase::Down,
                    json!({
                        "startup_millis": begun.elapsed().as_millis() as u64,
                        "reason": format!("{error:#}"),
                    }),
                );
                tracing::error!(app = %self.settings.app_name(), %error, "Phase: down (startup failed)");
                self.terminated.cancel();
                Err(error)
            }
        }
    }

    async fn run_startup(self: &Arc<Self>) -> anyhow::Result<StartupOutcome> {
        let root = ResourceFactory::from_fn(|| Ok(Router::new())).build_sync()?;
        let report = self.startup.on_start(root, &self.resources, self).await?;
        if report.status != StartupStatus::Up {
            return Ok(StartupOutcome::Declined(report.data));
        }

        let (primary_router, health_router) = {
            let mut state = self.state.lock();
            mount_into(&mut state.primary, report.router, "/", None)?;
            (compose(&state.primary), compose(&state.health))
        };
        let health_router = health_router.merge(self.health_routes());

        // Health listener first so probes answer before primary traffic
        // starts; default cohorts put both in the last-disposed-first group.
        let binder = self.binder.clone();
        let health_port = self.settings.health_port();
        self.resources
            .create_instance_async::<ListenerHandle, _>(
                HEALTH_LISTENER,
                async move { binder.bind(HEALTH_LISTENER, health_port, health_router).await },
                None,
            )
            .await?;

        let binder = self.binder.clone();
        let primary_port = self.settings.primary_port();
        self.resources
            .create_instance_async::<ListenerHandle, _>(
                PRIMARY_LISTENER,
                async move { binder.bind(PRIMARY_LISTENER, primary_port, primary_router).await },
                None,
            )
            .await?;

        self.attach_signals()?;
        Ok(StartupOutcome::Ready(report.data))
    }

    fn attach_signals(self: &Arc<Self>) -> anyhow::Result<()> {
        let mut slot = self.signal_set.lock();
        if slot.is_some() {
            return Ok(());
        }
        let weak = Arc::downgrade(self);
        let set = SignalSet::attach(self.settings.exit_signals(), move |_name| {
            if let Some(orchestrator) = weak.upgrade() {
                tokio::spawn(async move {
                    if let Err(error) = orchestrator.shutdown().await {
                        tracing::error!(%error, "Signal-triggered shutdown failed");
                    }
                });
            }
        })?;
        *slot = Some(set);
        Ok(())
    }

    /// Runs the shutdown sequence: `Stopping`, the shutdown handler, then
    /// (only on a stopped verdict) signal detachment, resource disposal,
    /// registry clearing and `Stopped`.
    ///
    /// A shutdown already in flight, or one requested outside `Up` /
    /// `Stopping`, is ignored with a warning. An incomplete stop leaves the
    /// phase at `Stopping` and re-arms the guard so shutdown can be
    /// re-invoked.
    ///
    /// # Errors
    /// Handler or disposal failures propagate; nothing further is torn down.
    pub async fn shutdown(self: &Arc<Self>) -> anyhow::Result<()> {
        if self
            .stop_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("Shutdown already in progress; ignoring");
            return Ok(());
        }

        let phase = self.phase();
        if !matches!(phase, LifecyclePhase::Up | LifecyclePhase::Stopping) {
            self.stop_in_flight.store(false, Ordering::SeqCst);
            tracing::warn!(%phase, "Shutdown requested outside a running phase; ignoring");
            return Ok(());
        }

        let begun = Instant::now();
        self.transition(
            LifecyclePhase::Stopping,
            json!({ "changed_at_ms": now_ms() }),
        );
        tracing::info!(app = %self.settings.app_name(), "Phase: stopping");

        let report = match self.shutdown_handler.on_stop().await {
            Ok(report) => report,
            Err(error) => {
                self.stop_in_flight.store(false, Ordering::SeqCst);
                tracing::error!(%error, "Shutdown handler failed; remaining in stopping");
                return Err(error);
            }
        };
        if report.status != ShutdownStatus::Stopped {
            self.stop_in_flight.store(false, Ordering::SeqCst);
            tracing::warn!("Shutdown handler did not report stopped; remaining in stopping");
            return Ok(());
        }

        let signals = self.signal_set.lock().take();
        if let Some(signals) = signals {
            signals.detach().await;
        }

        if let Err(error) = self.resources.dispose_all().await {
            self.stop_in_flight.store(false, Ordering::SeqCst);
            tracing::error!(%error, "Resource disposal failed; remaining in stopping");
            return Err(error.into());
        }

        {
            let mut state = self.state.lock();
            state.primary.clear();
            state.health.clear();
        }
        self.transition(
            LifecyclePhase::Stopped,
            json!({
                "shutdown_millis": begun.elapsed().as_millis() as u64,
                "report": report.data,
            }),
        );
        tracing::info!(app = %self.settings.app_name(), "Phase: stopped");
        self.terminated.cancel();
        Ok(())
    }

    /// Resolves once the orchestrator reaches a terminal phase (`Down` or
    /// `Stopped`). Embedder binaries park on this after a successful start.
    pub async fn wait_until_terminated(&self) {
        self.terminated.cancelled().await;
    }

    /// Answers a health query for a raw stage name. Never fails: unknown
    /// stages and probe errors map to 500 responses.
    pub async fn check_health(&self, stage: &str) -> (StatusCode, HealthResponse) {
        let Ok(parsed) = stage.parse::<HealthStage>() else {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                HealthResponse::single(
                    stage,
                    HealthState::Unknown,
                    json!("unknown health check stage"),
                ),
            );
        };

        let (phase, phase_data) = {
            let state = self.state.lock();
            (state.phase, state.phase_data.clone())
        };

        match parsed {
            HealthStage::Startup => {
                if phase == LifecyclePhase::Up {
                    (
                        StatusCode::OK,
                        HealthResponse::single("startup", HealthState::Up, phase_data),
                    )
                } else {
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        HealthResponse::single(
                            "startup",
                            HealthState::Down,
                            json!({ "phase": phase, "data": phase_data }),
                        ),
                    )
                }
            }
            HealthStage::Readiness => match phase {
                LifecyclePhase::Up | LifecyclePhase::Down => {
                    self.run_probe("readiness", &self.readiness).await
                }
                LifecyclePhase::Stopping | LifecyclePhase::Stopped => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    HealthResponse::single(
                        "readiness",
                        HealthState::Down,
                        json!("received exit signal"),
                    ),
                ),
                LifecyclePhase::Unknown | LifecyclePhase::Starting => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    HealthResponse::single(
                        "readiness",
                        HealthState::Unknown,
                        json!({ "phase": phase }),
                    ),
                ),
            },
            HealthStage::Liveliness => self.run_probe("liveliness", &self.liveliness).await,
        }
    }

    async fn run_probe(
        &self,
        name: &str,
        probe: &Arc<dyn HealthProbe>,
    ) -> (StatusCode, HealthResponse) {
        match probe.check().await {
            Ok(result) => {
                let code = if result.state == HealthState::Up {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                (code, HealthResponse::single(name, result.state, result.data))
            }
            Err(error) => {
                tracing::error!(probe = name, %error, "Health probe failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    HealthResponse::single(name, HealthState::Unknown, json!("unhandled exception")),
                )
            }
        }
    }

    /// Built-in `GET /health/{stage}` routes served by the health listener.
    fn health_routes(self: &Arc<Self>) -> Router {
        let orchestrator = self.clone();
        Router::new().route(
            "/health/{stage}",
            get(move |Path(stage): Path<String>| {
                let orchestrator = orchestrator.clone();
                async move {
                    let (code, body) = orchestrator.check_health(&stage).await;
                    (code, Json(body))
                }
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::health::ProbeResult;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct FakeBinder {
        bound: Mutex<Vec<(String, u16)>>,
        routers: Mutex<Vec<Router>>,
    }

    impl FakeBinder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                bound: Mutex::new(Vec::new()),
                routers: Mutex::new(Vec::new()),
            })
        }

        fn bound(&self) -> Vec<(String, u16)> {
            self.bound.lock().clone()
        }

        fn last_router(&self) -> Router {
            self.routers.lock().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl ListenerBinder for FakeBinder {
        async fn bind(
            &self,
            name: &str,
            port: u16,
            router: Router,
        ) -> anyhow::Result<ListenerHandle> {
            self.bound.lock().push((name.to_owned(), port));
            self.routers.lock().push(router);
            let addr: SocketAddr = "127.0.0.1:1".parse()?;
            let task = tokio::spawn(async {});
            Ok(ListenerHandle::new(name, addr, CancellationToken::new(), task))
        }
    }

    struct UpStartup;

    #[async_trait]
    impl StartupHandler for UpStartup {
        async fn on_start(
            &self,
            root: Router,
            _resources: &ResourceContainer,
            _lifecycle: &LifecycleOrchestrator,
        ) -> anyhow::Result<StartupReport> {
            Ok(StartupReport {
                status: StartupStatus::Up,
                data: json!({ "wired": true }),
                router: root.route("/hello", get(|| async { "hi" })),
            })
        }
    }

    struct FailingStartup;

    #[async_trait]
    impl StartupHandler for FailingStartup {
        async fn on_start(
            &self,
            _root: Router,
            _resources: &ResourceContainer,
            _lifecycle: &LifecycleOrchestrator,
        ) -> anyhow::Result<StartupReport> {
            anyhow::bail!("boom")
        }
    }

    struct RecoveringStop {
        succeed: AtomicBool,
    }

    #[async_trait]
    impl ShutdownHandler for RecoveringStop {
        async fn on_stop(&self) -> anyhow::Result<ShutdownReport> {
            let status = if self.succeed.swap(true, Ordering::SeqCst) {
                ShutdownStatus::Stopped
            } else {
                ShutdownStatus::Incomplete
            };
            Ok(ShutdownReport {
                status,
                data: serde_json::Value::Null,
            })
        }
    }

    fn quiet_settings() -> ServiceSettings {
        // SIGUSR1-only keeps test orchestrators away from real INT/TERM
        ServiceSettings::new().with_exit_signals(["SIGUSR1"])
    }

    #[test]
    fn target_parses_at_the_string_boundary() {
        assert_eq!("primary".parse::<ServiceTarget>().unwrap(), ServiceTarget::Primary);
        assert_eq!("both".parse::<ServiceTarget>().unwrap(), ServiceTarget::Both);
        let err = "metrics".parse::<ServiceTarget>().unwrap_err();
        assert_eq!(err.name, "metrics");
    }

    #[test]
    fn explicit_order_below_one_is_rejected() {
        let orch = LifecycleOrchestrator::builder(quiet_settings()).build();
        for bad in [0, -3] {
            let err = orch
                .register_handler(Router::new(), "/x", Some(bad), ServiceTarget::Primary)
                .unwrap_err();
            assert!(matches!(err, LifecycleError::ReservedOrder { order } if order == bad));
        }
        assert!(orch.primary_paths().is_empty());
    }

    #[test]
    fn out_of_range_wildcard_order_mutates_nothing() {
        let orch = LifecycleOrchestrator::builder(quiet_settings()).build();
        let too_big = i64::from(i32::MAX) + 1;
        let err = orch
            .register_handler(Router::new(), "*", Some(too_big), ServiceTarget::Both)
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidOrder(_)));
        assert!(orch.primary_paths().is_empty());
        assert!(orch.health_paths().is_empty());

        // registries untouched: the next wildcard append starts from scratch
        let assigned = orch
            .register_handler(Router::new(), "*", None, ServiceTarget::Primary)
            .unwrap();
        assert_eq!(assigned, 1);
        assert_eq!(orch.primary_paths(), vec!["*1".to_owned()]);
    }

    #[test]
    fn wildcard_entries_compose_before_routed_mounts() {
        let orch = LifecycleOrchestrator::builder(quiet_settings()).build();
        orch.register_handler(Router::new(), "/api", Some(2), ServiceTarget::Both)
            .unwrap();
        orch.register_handler(Router::new(), "*", Some(5), ServiceTarget::Both)
            .unwrap();
        orch.register_handler(Router::new(), "*", None, ServiceTarget::Both)
            .unwrap();

        let expected = vec!["*5".to_owned(), "*6".to_owned(), "/api".to_owned()];
        assert_eq!(orch.primary_paths(), expected);
        assert_eq!(orch.health_paths(), expected);
    }

    #[tokio::test]
    async fn start_goes_up_and_binds_health_then_primary() {
        let binder = FakeBinder::new();
        let orch = LifecycleOrchestrator::builder(
            quiet_settings().with_primary_port(3000).with_health_port(5678),
        )
        .with_listener_binder(binder.clone())
        .with_startup_handler(Arc::new(UpStartup))
        .build();

        orch.start().await.unwrap();
        assert_eq!(orch.phase(), LifecyclePhase::Up);
        assert_eq!(
            binder.bound(),
            vec![(HEALTH_LISTENER.to_owned(), 5678), (PRIMARY_LISTENER.to_owned(), 3000)]
        );
        assert!(orch.resources().fetch_instance::<ListenerHandle>(HEALTH_LISTENER).is_some());
        assert!(orch.resources().fetch_instance::<ListenerHandle>(PRIMARY_LISTENER).is_some());
        assert_eq!(orch.phase_data()["report"]["wired"], true);

        // returned root was mounted at "/" with the highest order
        let response = binder
            .last_router()
            .oneshot(http::Request::get("/hello").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn failing_startup_lands_down_with_no_listeners() {
        let binder = FakeBinder::new();
        let orch = LifecycleOrchestrator::builder(quiet_settings())
            .with_listener_binder(binder.clone())
            .with_startup_handler(Arc::new(FailingStartup))
            .build();

        let err = orch.start().await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(orch.phase(), LifecyclePhase::Down);
        assert!(binder.bound().is_empty());
        assert!(orch.resources().is_empty());
        assert_eq!(orch.phase_data()["reason"], "boom");
    }

    #[tokio::test]
    async fn start_is_not_restartable() {
        let orch = LifecycleOrchestrator::builder(quiet_settings())
            .with_listener_binder(FakeBinder::new())
            .build();
        orch.start().await.unwrap();
        assert!(orch.start().await.is_err());
    }

    #[tokio::test]
    async fn shutdown_outside_running_phases_is_ignored() {
        let orch = LifecycleOrchestrator::builder(quiet_settings()).build();
        orch.shutdown().await.unwrap();
        assert_eq!(orch.phase(), LifecyclePhase::Unknown);
    }

    #[tokio::test]
    async fn full_shutdown_disposes_and_clears() {
        let orch = LifecycleOrchestrator::builder(quiet_settings())
            .with_listener_binder(FakeBinder::new())
            .with_startup_handler(Arc::new(UpStartup))
            .build();
        orch.register_handler(Router::new(), "*", None, ServiceTarget::Both)
            .unwrap();

        orch.start().await.unwrap();
        orch.shutdown().await.unwrap();

        assert_eq!(orch.phase(), LifecyclePhase::Stopped);
        assert!(orch.resources().is_empty());
        assert!(orch.primary_paths().is_empty());
        assert!(orch.health_paths().is_empty());
        orch.wait_until_terminated().await;

        // readiness keeps refusing after the stop, whatever the probe says
        let (code, _) = orch.check_health("readiness").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn incomplete_stop_parks_in_stopping_and_rearms() {
        let orch = LifecycleOrchestrator::builder(quiet_settings())
            .with_listener_binder(FakeBinder::new())
            .with_shutdown_handler(Arc::new(RecoveringStop {
                succeed: AtomicBool::new(false),
            }))
            .build();

        orch.start().await.unwrap();
        orch.shutdown().await.unwrap();
        assert_eq!(orch.phase(), LifecyclePhase::Stopping);
        assert!(!orch.resources().is_empty());

        // readiness refuses while stopping, regardless of the probe
        let (code, body) = orch.check_health("readiness").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.checks[0].data, json!("received exit signal"));

        // guard re-armed: a second invocation completes the stop
        orch.shutdown().await.unwrap();
        assert_eq!(orch.phase(), LifecyclePhase::Stopped);
        assert!(orch.resources().is_empty());
    }

    #[tokio::test]
    async fn duplicate_shutdown_while_handler_runs_is_coalesced() {
        struct GatedShutdown {
            calls: AtomicUsize,
            entered: tokio::sync::Notify,
            release: tokio::sync::Notify,
        }

        #[async_trait]
        impl ShutdownHandler for GatedShutdown {
            async fn on_stop(&self) -> anyhow::Result<ShutdownReport> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.entered.notify_one();
                self.release.notified().await;
                Ok(ShutdownReport {
                    status: ShutdownStatus::Stopped,
                    data: serde_json::Value::Null,
                })
            }
        }

        let handler = Arc::new(GatedShutdown {
            calls: AtomicUsize::new(0),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let orch = LifecycleOrchestrator::builder(quiet_settings())
            .with_listener_binder(FakeBinder::new())
            .with_shutdown_handler(handler.clone())
            .build();
        orch.start().await.unwrap();

        let first = tokio::spawn({
            let orch = orch.clone();
            async move { orch.shutdown().await }
        });
        handler.entered.notified().await;
        assert_eq!(orch.phase(), LifecyclePhase::Stopping);

        // a second request while the first is parked in the handler is
        // ignored and must not re-enter the handler
        orch.shutdown().await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(orch.phase(), LifecyclePhase::Stopping);

        handler.release.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(orch.phase(), LifecyclePhase::Stopped);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(orch.resources().is_empty());
    }

    #[tokio::test]
    async fn health_matrix_follows_the_phase() {
        let orch = LifecycleOrchestrator::builder(quiet_settings())
            .with_listener_binder(FakeBinder::new())
            .build();

        let (code, _) = orch.check_health("startup").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        let (code, _) = orch.check_health("readiness").await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        let (code, _) = orch.check_health("liveliness").await;
        assert_eq!(code, StatusCode::OK);

        orch.start().await.unwrap();
        let (code, body) = orch.check_health("startup").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.status, HealthState::Up);
        let (code, _) = orch.check_health("readiness").await;
        assert_eq!(code, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_stage_and_probe_failure_answer_500() {
        struct BrokenProbe;

        #[async_trait]
        impl HealthProbe for BrokenProbe {
            async fn check(&self) -> anyhow::Result<ProbeResult> {
                anyhow::bail!("probe exploded")
            }
        }

        let orch = LifecycleOrchestrator::builder(quiet_settings())
            .with_liveliness_probe(Arc::new(BrokenProbe))
            .build();

        let (code, body) = orch.check_health("liveness").await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.status, HealthState::Unknown);
        assert_eq!(body.checks[0].data, json!("unknown health check stage"));

        let (code, body) = orch.check_health("liveliness").await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.checks[0].data, json!("unhandled exception"));
    }

    #[tokio::test]
    async fn health_routes_serve_json_over_the_router() {
        let orch = LifecycleOrchestrator::builder(quiet_settings())
            .with_listener_binder(FakeBinder::new())
            .build();
        orch.start().await.unwrap();

        let router = orch.health_routes();
        let response = router
            .oneshot(
                http::Request::get("/health/startup")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let body: HealthResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.status, HealthState::Up);
        assert_eq!(body.checks[0].name, "startup");
    }
}
