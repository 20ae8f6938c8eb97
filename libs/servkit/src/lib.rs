//! Bootstrap library for long-running network services.
//!
//! Servkit wires the boring parts of a service together: named singleton
//! resources with deterministic disposal order, a startup/up/shutting-down
//! phase machine, OS signal handling and liveness/readiness/startup health
//! endpoints. Request handling itself stays outside; applications hand the
//! orchestrator opaque `axum::Router` values and a pair of startup/shutdown
//! collaborators.
//!
//! ```no_run
//! use servkit::{LifecycleOrchestrator, ServiceSettings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = LifecycleOrchestrator::builder(
//!         ServiceSettings::new().with_app_name("demo").with_primary_port(8080),
//!     )
//!     .build();
//!     orchestrator.start().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod container;
pub mod factory;
pub mod lifecycle;
pub mod registry;
pub mod server;

pub use config::{ErrorTransformer, ServiceSettings};
pub use container::{ContainerError, Disposable, ResourceContainer};
pub use factory::ResourceFactory;
pub use lifecycle::health::{
    AlwaysUpProbe, HealthCheckEntry, HealthProbe, HealthResponse, HealthStage, HealthState,
    ProbeResult, UnknownStageError,
};
pub use lifecycle::signals::{SignalSet, UnknownSignalError, parse_signal};
pub use lifecycle::{
    HEALTH_LISTENER, LifecycleBuilder, LifecycleError, LifecycleOrchestrator, LifecyclePhase,
    MountValue, PRIMARY_LISTENER, ServiceTarget, ShutdownHandler, ShutdownReport, ShutdownStatus,
    StartupHandler, StartupReport, StartupStatus, UnknownApplicationTypeError,
};
pub use registry::{Entry, InvalidOrderError, OrderedRegistry};
pub use server::{ListenerBinder, ListenerHandle, TcpListenerBinder};
