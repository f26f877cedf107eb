//! CLI command implementations
//!
//! `run` seeds an in-memory object store from a fixtures file, starts the
//! controller with [`SpecCheckMechanics`] and prints the final phase of
//! every Promotion together with the scheduler counters.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{read_json_file, write_response};
use crate::api::{Application, Promotion, PromotionPhase, Stage};
use crate::controller::{Controller, ControllerConfig, SpecCheckMechanics};
use crate::observability::{init_logging, MetricsSnapshot};
use crate::store::{MemoryStore, ObjectStore};

/// How long the work queue must stay empty before `--until-idle` stops.
const IDLE_SETTLE: Duration = Duration::from_millis(200);

/// Resources loaded into the object store before the controller starts
#[derive(Debug, Default, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub applications: Vec<Application>,
    #[serde(default)]
    pub promotions: Vec<Promotion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionSummary {
    pub namespace: String,
    pub name: String,
    pub stage: String,
    pub phase: PromotionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Promotion> for PromotionSummary {
    fn from(promo: &Promotion) -> Self {
        Self {
            namespace: promo.metadata.namespace.clone(),
            name: promo.metadata.name.clone(),
            stage: promo.spec.stage.clone(),
            phase: promo.phase(),
            error: promo.status.error.clone(),
        }
    }
}

/// Output of the `run` command
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub promotions: Vec<PromotionSummary>,
    pub metrics: MetricsSnapshot,
}

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Run {
            config,
            fixtures,
            until_idle,
        } => run_controller(&config, &fixtures, until_idle),
        Command::CheckConfig { config } => check_config(&config),
    }
}

/// Run the controller and print the resulting report
pub fn run_controller(config_path: &Path, fixtures_path: &Path, until_idle: bool) -> CliResult<()> {
    let config = ControllerConfig::load(config_path)?;
    init_logging(&config.log_filter, config.log_json)
        .map_err(|e| CliError::config_error(e.to_string()))?;

    let fixtures: Fixtures = read_json_file(fixtures_path)?;
    let report = execute(config, fixtures, until_idle)?;
    write_response(serde_json::to_value(&report)?)
}

/// Validate a configuration file
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = ControllerConfig::load(config_path)?;
    write_response(serde_json::json!({
        "valid": true,
        "config": config,
    }))
}

/// Seed a store from `fixtures`, run the controller and report.
///
/// With `until_idle` the controller stops once its work queue has drained;
/// otherwise it runs until Ctrl-C.
pub fn execute(config: ControllerConfig, fixtures: Fixtures, until_idle: bool) -> CliResult<RunReport> {
    let store = Arc::new(MemoryStore::new(config.argocd_namespace.clone()));
    seed(&store, fixtures)?;

    let controller = Arc::new(Controller::new(
        config,
        store.clone(),
        Arc::new(SpecCheckMechanics),
    ));

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::runtime_failed(format!("Failed to create tokio runtime: {}", e)))?;

    let watcher = Arc::clone(&controller);
    rt.block_on(Arc::clone(&controller).run(async move {
        if until_idle {
            watcher.wait_until_idle(IDLE_SETTLE).await;
        } else if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
        }
    }))
    .map_err(|e| CliError::runtime_failed(format!("Controller failed: {}", e)))?;

    let promotions = store
        .list_promotions()?
        .iter()
        .map(PromotionSummary::from)
        .collect();

    Ok(RunReport {
        promotions,
        metrics: controller.metrics().snapshot(),
    })
}

fn seed(store: &MemoryStore, fixtures: Fixtures) -> CliResult<()> {
    for stage in fixtures.stages {
        store.upsert_stage(stage)?;
    }
    for app in fixtures.applications {
        store.upsert_application(app)?;
    }
    for promo in fixtures.promotions {
        store.create_promotion(promo)?;
    }
    Ok(())
}
