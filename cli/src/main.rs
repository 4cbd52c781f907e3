// cli/src/main.rs

use clap::{Parser, Subcommand};
use engine_core::artifact_store::FsArtifactStore;
use engine_core::capabilities::browser::PlaywrightBrowser;
use engine_core::capabilities::llm::GeminiModel;
use engine_core::capabilities::places::HttpPlacesClient;
use engine_core::capabilities::{Capabilities, SystemClock};
use engine_core::config::ExtractionOptions;
use engine_core::data_models::analysis::StrategicAnalysis;
use engine_core::data_models::record::FinalRecord;
use engine_core::orchestrator::run_extraction;
use engine_core::report::build_report_markdown;
use engine_core::utils::logger;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Restaurant site intelligence extraction", long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the full extraction pipeline against a restaurant website
    Extract {
        /// Target restaurant website URL
        #[clap(short, long)]
        url: String,
        /// Known restaurant name, to stabilize the directory lookup
        #[clap(long)]
        name_hint: Option<String>,
        /// Known address, same purpose
        #[clap(long)]
        address_hint: Option<String>,
        /// Skip the strategic-analysis stage
        #[clap(long)]
        no_analysis: bool,
        /// Directory for stored artifacts (screenshots, PDFs, HTML)
        #[clap(long, default_value = "artifacts")]
        artifact_dir: PathBuf,
        /// Where to write the JSON report
        #[clap(short, long, default_value = "report.json")]
        output: PathBuf,
    },
    /// Rebuilds the markdown report body from a previously written JSON report
    Report {
        /// JSON report produced by `extract`
        #[clap(short, long, default_value = "report.json")]
        input: PathBuf,
        /// Where to write the markdown body; defaults to the input with `.md`
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
}

fn required_env(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("{} not set in environment", key))
}

fn build_capabilities(artifact_dir: PathBuf) -> Result<Capabilities, String> {
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| format!("http client: {}", e))?;

    let gemini_key = required_env("GEMINI_API_KEY")?;
    let places_key = required_env("PLACES_API_KEY")?;
    let model_name =
        std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".to_string());

    Ok(Capabilities {
        places: Arc::new(HttpPlacesClient::new(http.clone(), places_key)),
        browser: Arc::new(PlaywrightBrowser),
        llm_text: Arc::new(GeminiModel::new(http.clone(), gemini_key.clone(), model_name.clone())),
        llm_vision: Arc::new(GeminiModel::new(http.clone(), gemini_key, model_name)),
        agentic_browser: None,
        artifact_store: Arc::new(FsArtifactStore::new(artifact_dir)),
        http,
        clock: Arc::new(SystemClock),
    })
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    if let Err(e) = logger::init_logger() {
        eprintln!("logger init failed: {}", e);
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Extract {
            url,
            name_hint,
            address_hint,
            no_analysis,
            artifact_dir,
            output,
        } => {
            let capabilities = match build_capabilities(artifact_dir) {
                Ok(capabilities) => capabilities,
                Err(message) => {
                    eprintln!("Configuration error: {}", message);
                    std::process::exit(2);
                }
            };
            let options = ExtractionOptions {
                restaurant_name_hint: name_hint,
                address_hint,
                enable_strategic_analysis: !no_analysis,
                ..ExtractionOptions::default()
            };

            let cancel = CancellationToken::new();
            let ctrlc_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("interrupt received, cancelling run");
                    ctrlc_cancel.cancel();
                }
            });

            match run_extraction(&url, options, capabilities, cancel).await {
                Ok(outcome) => {
                    let report = serde_json::json!({
                        "record": outcome.record,
                        "strategic_analysis": outcome.analysis,
                        "metadata": outcome.metadata,
                    });
                    let pretty = serde_json::to_string_pretty(&report)
                        .expect("report serialization cannot fail");
                    if let Err(e) = std::fs::write(&output, pretty) {
                        eprintln!("Failed writing {}: {}", output.display(), e);
                        std::process::exit(1);
                    }
                    let markdown =
                        build_report_markdown(&outcome.record, outcome.analysis.as_ref());
                    let markdown_path = output.with_extension("md");
                    if let Err(e) = std::fs::write(&markdown_path, markdown) {
                        eprintln!("Failed writing {}: {}", markdown_path.display(), e);
                        std::process::exit(1);
                    }
                    println!(
                        "Extraction {:?}: quality {:.2}, cost ${:.4}, report at {}",
                        outcome.metadata.overall_status,
                        outcome.metadata.final_quality_score,
                        outcome.metadata.total_cost,
                        output.display()
                    );
                }
                Err(e) => {
                    eprintln!("Extraction failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Report { input, output } => {
            let raw = match std::fs::read_to_string(&input) {
                Ok(raw) => raw,
                Err(e) => {
                    eprintln!("Failed reading {}: {}", input.display(), e);
                    std::process::exit(1);
                }
            };
            let stored: serde_json::Value = match serde_json::from_str(&raw) {
                Ok(stored) => stored,
                Err(e) => {
                    eprintln!("{} is not valid JSON: {}", input.display(), e);
                    std::process::exit(1);
                }
            };
            let record: FinalRecord = match serde_json::from_value(stored["record"].clone()) {
                Ok(record) => record,
                Err(e) => {
                    eprintln!(
                        "{} does not look like an extraction report: {}",
                        input.display(),
                        e
                    );
                    std::process::exit(1);
                }
            };
            let analysis: Option<StrategicAnalysis> =
                serde_json::from_value(stored["strategic_analysis"].clone()).unwrap_or(None);

            let markdown = build_report_markdown(&record, analysis.as_ref());
            let markdown_path = output.unwrap_or_else(|| input.with_extension("md"));
            if let Err(e) = std::fs::write(&markdown_path, markdown) {
                eprintln!("Failed writing {}: {}", markdown_path.display(), e);
                std::process::exit(1);
            }
            println!("Report written to {}", markdown_path.display());
        }
    }
}
