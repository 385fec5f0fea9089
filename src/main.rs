use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use notewright::audio::{AudioLocator, S3AudioLocator};
use notewright::cases::CaseRegistry;
use notewright::config::{self, AppConfig, ConfigError};
use notewright::pipeline::artifacts::ArtifactStore;
use notewright::pipeline::compliance::ComplianceChecker;
use notewright::pipeline::notes::NoteGenerator;
use notewright::pipeline::orchestrator::{EncounterPipeline, RunReport};
use notewright::pipeline::remote::{HttpRemote, RemoteInvoke};
use notewright::pipeline::schema::SchemaBuilder;
use notewright::pipeline::transcribe::Transcriber;
use notewright::pipeline::PipelineError;

#[derive(Parser, Debug)]
#[command(name = config::APP_NAME, version, about = "Clinical encounter documentation pipeline")]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Case to process; overrides the configured case name.
    #[arg(long)]
    case: Option<String>,

    /// Discard any held note schema and rebuild it on first use.
    #[arg(long)]
    rebuild_schema: bool,

    /// Discard any held audit ruleset and rebuild it on first use.
    #[arg(long)]
    rebuild_rules: bool,
}

#[derive(Error, Debug)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let cli = Cli::parse();
    match run(cli).await {
        Ok(report) => {
            tracing::info!(
                run_id = %report.run_id,
                case = %report.case_name,
                checks = report.outcomes.len(),
                failed = report.any_failed(),
                "Run finished"
            );
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(%error, "Run aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<RunReport, AppError> {
    let config = AppConfig::from_file(&cli.config)?;
    let registry = CaseRegistry::from_file(&config.cases_file)?;

    let case_name = cli.case.as_deref().unwrap_or(&config.case_name);
    let case = registry
        .get(case_name)
        .ok_or_else(|| ConfigError::UnknownCase(case_name.to_string()))?
        .clone();

    let store = Arc::new(ArtifactStore::new(&config.output_dir));
    let remote: Arc<dyn RemoteInvoke> = Arc::new(HttpRemote::from_config(&config));
    let audio: Arc<dyn AudioLocator> = Arc::new(S3AudioLocator::from_config(&config.audio)?);

    let mut schema = SchemaBuilder::new(remote.clone(), store.clone(), &config.schema_builder)?;
    if cli.rebuild_schema {
        schema.invalidate();
    }

    let transcriber = Transcriber::new(
        remote.clone(),
        store.clone(),
        config.provider_information.clone(),
    );
    let generator = NoteGenerator::new(
        remote.clone(),
        store.clone(),
        schema,
        config.provider_information.clone(),
    );
    let mut checker = ComplianceChecker::new(remote, store, &config.rule_builder)?;
    if cli.rebuild_rules {
        checker.rules_builder().invalidate();
    }

    let mut pipeline = EncounterPipeline::new(audio, transcriber, generator, checker);
    Ok(pipeline.run(&case).await?)
}
