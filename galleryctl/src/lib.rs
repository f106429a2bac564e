mod progress;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use gallery_core::config::expand_home;
use gallery_core::{
    format_size, load_pipeline_config, EncoderSettings, FfmpegEncoder, LocalStore, ObjectStore,
    Pipeline, PipelineConfig, PipelineSettings, PruneReport, PublishReport, Publisher, RunReport,
    S3Store,
};
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::info;

pub use progress::BarObserver;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] gallery_core::ConfigError),
    #[error("{0}")]
    Pipeline(#[from] gallery_core::PipelineError),
    #[error("{0}")]
    Publish(#[from] gallery_core::PublishError),
    #[error("store error: {0}")]
    Store(#[from] gallery_core::StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Media gallery ingestion pipeline", long_about = None)]
pub struct Cli {
    /// Path to pipeline.toml
    #[arg(long, default_value = "configs/pipeline.toml")]
    pub config: PathBuf,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Converts the source tree into the web-ready output tree
    Convert(ConvertArgs),
    /// Uploads the output tree and its manifest to the object store
    Publish(PublishArgs),
    /// Deletes remote artifacts with the given extension, as listed in the manifest
    Prune(PruneArgs),
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Overrides `paths.source_dir`
    #[arg(long)]
    pub source: Option<PathBuf>,
    /// Overrides `paths.output_dir`
    #[arg(long)]
    pub output: Option<PathBuf>,
    /// Overrides `pipeline.workers`
    #[arg(long)]
    pub workers: Option<usize>,
    /// Disables the encoder progress bars
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Tree to publish; defaults to `paths.output_dir`
    #[arg(long)]
    pub dir: Option<PathBuf>,
    #[command(flatten)]
    pub target: StoreTarget,
}

#[derive(Args, Debug)]
pub struct PruneArgs {
    #[arg(long, default_value = "mkv")]
    pub extension: String,
    #[command(flatten)]
    pub target: StoreTarget,
}

#[derive(Args, Debug, Clone)]
pub struct StoreTarget {
    /// Publishes into a local directory instead of the configured bucket
    #[arg(long)]
    pub local_store: Option<PathBuf>,
}

pub fn run(cli: Cli) -> Result<()> {
    let config = load_pipeline_config(&cli.config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match &cli.command {
        Commands::Convert(args) => {
            let report = runtime.block_on(convert(&config, args, cli.format))?;
            render(&ConvertOutput(report), cli.format)?;
        }
        Commands::Publish(args) => {
            let publisher = build_publisher(&config, &args.target)?;
            let root = args.dir.clone().unwrap_or_else(|| config.output_dir());
            let report = runtime.block_on(publisher.publish(&root))?;
            render(&report, cli.format)?;
        }
        Commands::Prune(args) => {
            let publisher = build_publisher(&config, &args.target)?;
            let report = runtime.block_on(publisher.prune(&args.extension))?;
            render(&report, cli.format)?;
        }
    }
    Ok(())
}

/// Applies command-line overrides on top of the config file.
pub fn pipeline_settings(config: &PipelineConfig, args: &ConvertArgs) -> PipelineSettings {
    let mut settings = PipelineSettings::from_config(config);
    if let Some(output) = &args.output {
        settings.output_root = output.clone();
    }
    if let Some(workers) = args.workers {
        settings.workers = workers.max(1);
    }
    settings
}

async fn convert(
    config: &PipelineConfig,
    args: &ConvertArgs,
    format: OutputFormat,
) -> Result<RunReport> {
    let source = args.source.clone().unwrap_or_else(|| config.source_dir());
    let encoder = Arc::new(FfmpegEncoder::new(EncoderSettings::from_config(config)));
    let mut pipeline = Pipeline::new(pipeline_settings(config, args), encoder);
    if format == OutputFormat::Text && !args.no_progress {
        pipeline = pipeline.with_observer(Arc::new(BarObserver::new()));
    }
    let report = pipeline.run(&source).await?;
    info!(summary = %summary_line(&report), "conversion finished");
    Ok(report)
}

fn build_publisher(config: &PipelineConfig, target: &StoreTarget) -> Result<Publisher> {
    let store: Arc<dyn ObjectStore> = match &target.local_store {
        Some(dir) => {
            let dir = expand_home(&dir.to_string_lossy());
            info!(store = %dir.display(), "using local store");
            Arc::new(LocalStore::new(dir))
        }
        None => {
            info!(endpoint = %config.store.endpoint, bucket = %config.store.bucket, "using object store");
            Arc::new(S3Store::from_config(&config.store)?)
        }
    };
    Ok(Publisher::new(store, config.store.manifest_key.clone()))
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

pub struct ConvertOutput(pub RunReport);

impl Serialize for ConvertOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.summary().serialize(serializer)
    }
}

impl DisplayFallback for ConvertOutput {
    fn display(&self) -> String {
        self.0.render()
    }
}

impl DisplayFallback for PublishReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Artifacts: {} ({} uploaded, {} already present, {} failed)",
            self.artifacts,
            self.uploaded.len(),
            self.already_present.len(),
            self.failed.len()
        )];
        lines.extend(self.uploaded.iter().map(|key| format!("  uploaded {key}")));
        lines.extend(
            self.failed
                .iter()
                .map(|failure| format!("  failed {}: {}", failure.key, failure.error)),
        );
        let manifest_state = if self.manifest_uploaded {
            "uploaded"
        } else {
            "not uploaded"
        };
        lines.push(format!(
            "Manifest: {} ({manifest_state})",
            self.manifest_path.display()
        ));
        lines.join("\n")
    }
}

impl DisplayFallback for PruneReport {
    fn display(&self) -> String {
        let mut lines: Vec<String> = self
            .deleted
            .iter()
            .map(|key| format!("  deleted {key}"))
            .collect();
        lines.extend(
            self.failed
                .iter()
                .map(|failure| format!("  failed {}: {}", failure.key, failure.error)),
        );
        lines.push(format!(
            "Deleted {} .{} files ({} failed)",
            self.deleted.len(),
            self.extension,
            self.failed.len()
        ));
        lines.join("\n")
    }
}

/// Short one-line summary used in logs after a conversion run.
pub fn summary_line(report: &RunReport) -> String {
    let counts = report.counts();
    format!(
        "{} files, {} failed, saved {}",
        counts.total(),
        counts.failed,
        format_size(report.totals().saved_bytes)
    )
}
