use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use geonet_stac::app::{self, App, ProcessOptions, ProcessResult, RecordAction, StatusResult};
use geonet_stac::backup::{self, LocalDirArchive};
use geonet_stac::catalog::CatalogTree;
use geonet_stac::config::{ConfigLoader, ResolvedConfig};
use geonet_stac::enrich::{EnrichmentDocument, EnrichmentSource, HttpEnrichmentSource};
use geonet_stac::error::CatalogError;
use geonet_stac::export::{self, EnvToken, HttpExportTarget, PublishAction};
use geonet_stac::output::{JsonOutput, OutputMode};
use geonet_stac::probe::{HttpProbe, HttpProbeClient, ProbeResponse};
use geonet_stac::report::{ProgressSink, TracingSink};

#[derive(Parser)]
#[command(name = "geonet-stac")]
#[command(about = "Assemble a STAC catalog from harvested CSW metadata records")]
#[command(version, author)]
struct Cli {
    /// Print machine-readable JSON results on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline configuration file (default: ./geonet-stac.json).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Validate, classify and add pending records to the catalog")]
    Process(ProcessArgs),
    #[command(about = "Summarise processing outcomes and catalog size")]
    Status,
    #[command(about = "Show how a link URL would be classified")]
    Classify { url: String },
    #[command(about = "Show the identifier derived from a name")]
    Slugify { text: String },
    #[command(about = "Copy new or changed catalog files to a backup directory")]
    Backup(BackupArgs),
    #[command(about = "Publish the catalog to a remote catalog service")]
    Publish(PublishArgs),
}

#[derive(Args)]
struct ProcessArgs {
    /// Stop after this many attempted records.
    #[arg(long)]
    limit: Option<usize>,

    /// Skip fetching the auxiliary metadata document.
    #[arg(long)]
    no_enrich: bool,
}

#[derive(Args)]
struct BackupArgs {
    #[arg(long)]
    dest: Utf8PathBuf,

    /// Key prefix inside the destination.
    #[arg(long, default_value = "stac")]
    prefix: String,

    /// File or directory to back up (default: the catalog directory).
    #[arg(long)]
    source: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct PublishArgs {
    /// Base URL of the catalog service API.
    #[arg(long)]
    endpoint: String,

    /// Environment variable holding the bearer token.
    #[arg(long, default_value = "GEONET_STAC_TOKEN")]
    token_env: String,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CatalogError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CatalogError) -> u8 {
    match error {
        CatalogError::ConfigRead(_) | CatalogError::ConfigParse(_) | CatalogError::ConfigValue(_) => 2,
        CatalogError::Http(_) | CatalogError::HttpStatus { .. } | CatalogError::Export { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match cli.command {
        Commands::Classify { url } => {
            let result = app::classify(&url);
            match output_mode {
                OutputMode::Json => JsonOutput::print_classify(&result).into_diagnostic(),
                OutputMode::Human => {
                    match result.asset_type {
                        Some(asset_type) => println!(
                            "{asset_type}\t{}\t{}\t{}",
                            result.title.unwrap_or_default(),
                            result.media_type.unwrap_or_default(),
                            result.roles.join(",")
                        ),
                        None => println!("unclassified"),
                    }
                    Ok(())
                }
            }
        }
        Commands::Slugify { text } => {
            let result = app::slugify(&text);
            match output_mode {
                OutputMode::Json => JsonOutput::print_slugify(&result).into_diagnostic(),
                OutputMode::Human => {
                    println!("{}", result.slug);
                    Ok(())
                }
            }
        }
        command => {
            let config = ConfigLoader::resolve(cli.config.as_deref())?;
            run_with_config(command, config, output_mode)
        }
    }
}

fn run_with_config(
    command: Commands,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &TracingSink,
    };

    match command {
        Commands::Process(args) => {
            let probe = HttpProbeClient::new()?;
            let enrichment_probe = probe.clone();
            let source = HttpEnrichmentSource::new(
                &enrichment_probe,
                config.enrichment.clone(),
                config.timeouts.link,
            );
            let app = App::new(config, probe, Some(source));
            let options = ProcessOptions {
                limit: args.limit,
                skip_enrichment: args.no_enrich,
            };
            let result = app.process(&options, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_process(&result).into_diagnostic(),
                OutputMode::Human => {
                    print_process_summary(&result);
                    Ok(())
                }
            }
        }
        Commands::Status => {
            let app = App::new(config, NopProbe, None::<NopEnrichment>);
            let result = app.status(sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_status(&result).into_diagnostic(),
                OutputMode::Human => {
                    print_status(&result);
                    Ok(())
                }
            }
        }
        Commands::Backup(args) => {
            let source = args.source.unwrap_or_else(|| config.stac_dir.clone());
            let archive = LocalDirArchive::new(args.dest);
            let report = backup::sync(&source, &args.prefix, &archive, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_backup(&report).into_diagnostic(),
                OutputMode::Human => {
                    println!(
                        "{} uploaded, {} unchanged -> {}",
                        report.uploaded.len(),
                        report.unchanged.len(),
                        report.location
                    );
                    Ok(())
                }
            }
        }
        Commands::Publish(args) => {
            let tree = CatalogTree::load(config.store())?;
            let target = HttpExportTarget::new(
                &args.endpoint,
                EnvToken::new(args.token_env),
                Duration::from_secs(args.timeout_secs),
            )?;
            let report = export::publish_tree(&tree, &target, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_export(&report).into_diagnostic(),
                OutputMode::Human => {
                    println!(
                        "{} created, {} updated, {} failed",
                        report.count(PublishAction::Created),
                        report.count(PublishAction::Updated),
                        report.count(PublishAction::Failed)
                    );
                    Ok(())
                }
            }
        }
        Commands::Classify { .. } | Commands::Slugify { .. } => Ok(()),
    }
}

fn print_process_summary(result: &ProcessResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}geonet-stac summary{reset}");
    println!(
        "{green}added: {}  reconciled: {}{reset}",
        result.count(RecordAction::Added),
        result.count(RecordAction::Reconciled)
    );
    println!(
        "{yellow}rejected: {}  skipped: {}{reset}",
        result.count(RecordAction::Rejected),
        result.count(RecordAction::Skipped)
    );
    for record in &result.records {
        if record.action != RecordAction::Rejected {
            continue;
        }
        let reason = record.reason.map(|reason| reason.as_str()).unwrap_or("unknown");
        println!(
            "{yellow}  {} {} ({reason}){reset}",
            record.id,
            record.title.as_deref().unwrap_or("<untitled>")
        );
    }
    println!(
        "{cyan}catalog: {} families, {} collections, {} items{reset}",
        result.catalog.families, result.catalog.collections, result.catalog.items
    );
}

fn print_status(result: &StatusResult) {
    println!("progress: {}", result.progress_path);
    println!(
        "successful: {}  failed: {}  pending: {}",
        result.summary.successful, result.summary.failed, result.summary.pending
    );
    for (reason, count) in &result.summary.failures_by_reason {
        println!("  {reason}: {count}");
    }
    match &result.catalog {
        Some(stats) => println!(
            "catalog: {} families, {} collections, {} items",
            stats.families, stats.collections, stats.items
        ),
        None => println!("catalog: not created yet"),
    }
}

struct NopProbe;
struct NopEnrichment;

impl HttpProbe for NopProbe {
    fn get(&self, url: &str, _timeout: Option<Duration>) -> Result<ProbeResponse, CatalogError> {
        Err(CatalogError::Http(format!("network disabled for {url}")))
    }

    fn head(&self, url: &str, _timeout: Option<Duration>) -> Result<ProbeResponse, CatalogError> {
        Err(CatalogError::Http(format!("network disabled for {url}")))
    }

    fn get_text(
        &self,
        url: &str,
        _timeout: Option<Duration>,
    ) -> Result<(ProbeResponse, String), CatalogError> {
        Err(CatalogError::Http(format!("network disabled for {url}")))
    }
}

impl EnrichmentSource for NopEnrichment {
    fn fetch(&self, record_id: &str) -> Result<EnrichmentDocument, CatalogError> {
        Err(CatalogError::Http(format!("enrichment disabled for {record_id}")))
    }
}
