//! Reference embedder: wires a demo service through the servkit lifecycle.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::routing::get;
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use servkit::{
    Disposable, LifecycleOrchestrator, LifecyclePhase, ResourceContainer, ServiceSettings,
    StartupHandler, StartupReport, StartupStatus,
};

#[derive(Debug, Parser)]
#[command(name = "servkit-server", about = "Demo service built on servkit", version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn init_tracing(fallback: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback.to_owned()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

struct Greeting {
    message: String,
}

impl Disposable for Greeting {}

struct DemoStartup;

#[async_trait]
impl StartupHandler for DemoStartup {
    async fn on_start(
        &self,
        root: Router,
        resources: &ResourceContainer,
        lifecycle: &LifecycleOrchestrator,
    ) -> anyhow::Result<StartupReport> {
        let app_name = lifecycle.settings().app_name().to_owned();
        let greeting = resources.create_instance::<Greeting, _>(
            "greeting",
            move || {
                Ok(Greeting {
                    message: format!("hello from {app_name}"),
                })
            },
            None,
        )?;

        let message = greeting.message.clone();
        let router = root.route("/", get(move || async move { message }));
        Ok(StartupReport {
            status: StartupStatus::Up,
            data: json!({ "routes": ["/"] }),
            router,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_layered(cli.config.as_deref())?;
    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }
    init_tracing(&cfg.log_filter);

    let orchestrator = LifecycleOrchestrator::builder(
        ServiceSettings::new()
            .with_app_name(&cfg.app_name)
            .with_primary_port(cfg.primary_port)
            .with_health_port(cfg.health_port)
            .with_exit_signals(cfg.exit_signals.clone()),
    )
    .with_startup_handler(Arc::new(DemoStartup))
    .build();

    orchestrator.start().await?;
    if orchestrator.phase() == LifecyclePhase::Up {
        tracing::info!(app = %cfg.app_name, "Service is up; waiting for exit signal");
        orchestrator.wait_until_terminated().await;
    }
    Ok(())
}
