//! Process wiring: settings from the environment, collaborators, one run.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use fanout_core::MessagePayload;
use fanout_infra::{DispatchConfig, DispatchReport, FileJobStore, run_job_until};
use fanout_sim::{SimulatedDirectory, SimulatedSender, SimulationConfig};

const DEFAULT_JOB_PATH: &str = "fanout-job.json";
const DEFAULT_SEED: u64 = 42;
const DEFAULT_RECIPIENTS: usize = 100;
const DEFAULT_MESSAGE: &str = "Hello from fanout.";

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct Settings {
    pub dispatch: DispatchConfig,
    pub job_path: PathBuf,
    pub simulation: SimulationConfig,
    pub message: String,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dispatch =
            DispatchConfig::from_lookup(&lookup).context("invalid dispatch configuration")?;

        let seed = match lookup("FANOUT_SEED") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("FANOUT_SEED must be an unsigned integer, got {raw:?}"))?,
            None => DEFAULT_SEED,
        };
        let recipients = match lookup("FANOUT_RECIPIENTS") {
            Some(raw) => raw.trim().parse().with_context(|| {
                format!("FANOUT_RECIPIENTS must be an unsigned integer, got {raw:?}")
            })?,
            None => DEFAULT_RECIPIENTS,
        };

        Ok(Self {
            dispatch,
            job_path: lookup("FANOUT_JOB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_JOB_PATH)),
            simulation: SimulationConfig::new(seed, recipients),
            message: lookup("FANOUT_MESSAGE").unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
        })
    }
}

/// Run (or resume) the job described by `settings` until it drains.
pub async fn run(settings: &Settings) -> anyhow::Result<DispatchReport> {
    run_until(settings, std::future::pending()).await
}

/// Run the job, deactivating it when `shutdown` resolves.
pub async fn run_until<S>(settings: &Settings, shutdown: S) -> anyhow::Result<DispatchReport>
where
    S: Future<Output = ()> + Send + 'static,
{
    info!(
        job_path = %settings.job_path.display(),
        seed = settings.simulation.seed,
        recipients = settings.simulation.recipients,
        workers = settings.dispatch.worker_count,
        "starting dispatch"
    );

    let store = Arc::new(FileJobStore::new(&settings.job_path));
    let directory = Arc::new(SimulatedDirectory::new(&settings.simulation));
    let sender = Arc::new(SimulatedSender::new(&settings.simulation));

    run_job_until(
        &settings.dispatch,
        store,
        directory,
        sender,
        MessagePayload::new(settings.message.clone()),
        shutdown,
    )
    .await
    .with_context(|| {
        format!(
            "cannot resume job from {}",
            settings.job_path.display()
        )
    })
}

pub async fn run_from_env() -> anyhow::Result<DispatchReport> {
    let settings = Settings::from_env()?;
    run_until(&settings, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for ctrl-c; running until drained");
            std::future::pending::<()>().await;
        }
    })
    .await
}
