use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};

mod classifier;
mod config;
mod error;
mod generator;
mod llm;
mod logging;
mod models;
mod pipeline;
mod report;
mod sources;

use crate::classifier::{LlmRiskClassifier, RiskClassifier, RuleClassifier};
use crate::config::{LlmConfig, PipelineConfig, DEFAULT_LLM_BASE_URL, DEFAULT_LLM_MODEL};
use crate::generator::{InsightGenerator, LlmInsightGenerator, TemplateInsightGenerator};
use crate::llm::ChatClient;
use crate::models::{BatchResult, ClientSnapshot};
use crate::pipeline::InsightPipeline;
use crate::sources::{ClientDataSource, Credentials, CsvSource, DemoSource, TrainerizeSource};

const SOURCE_TIMEOUT_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "clientpulse")]
#[command(about = "Dropout risk and motivational insights for fitness clients", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and list client activity snapshots
    Clients {
        #[command(flatten)]
        source: SourceArgs,
        /// Print the snapshots as JSON
        #[arg(long)]
        json: bool,
    },
    /// Classify risk and generate an insight for every client
    Insights {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        pipeline: PipelineArgs,
        /// Print the batch result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceKind {
    Trainerize,
    Demo,
    Csv,
}

impl SourceKind {
    fn label(self) -> &'static str {
        match self {
            SourceKind::Trainerize => "Trainerize",
            SourceKind::Demo => "demo roster",
            SourceKind::Csv => "csv export",
        }
    }
}

#[derive(Args)]
struct SourceArgs {
    #[arg(long, value_enum, default_value_t = SourceKind::Trainerize)]
    source: SourceKind,
    /// Client export to read when --source csv
    #[arg(long)]
    csv: Option<PathBuf>,
    #[arg(long, env = "TRAINERIZE_DOMAIN")]
    domain: Option<String>,
    #[arg(long, env = "TRAINERIZE_EMAIL")]
    email: Option<String>,
    #[arg(long, env = "TRAINERIZE_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    #[arg(long, env = "TRAINERIZE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// API host used with --api-key
    #[arg(long, env = "TRAINERIZE_BASE_URL")]
    base_url: Option<String>,
}

#[derive(Args)]
struct PipelineArgs {
    /// Use the built-in rule classifier and message templates instead of the LLM
    #[arg(long)]
    offline: bool,
    /// Cap on concurrent calls per stage (unbounded when omitted)
    #[arg(long)]
    max_concurrency: Option<usize>,
    /// Deadline for each classifier or generator call, 0 disables it
    #[arg(long, default_value_t = 60)]
    call_timeout_secs: u64,
    /// OpenAI-compatible endpoint for the risk classifier and insight generator
    #[arg(long, env = "CLIENTPULSE_LLM_BASE_URL", default_value = DEFAULT_LLM_BASE_URL)]
    llm_base_url: String,
    #[arg(long, env = "CLIENTPULSE_LLM_MODEL", default_value = DEFAULT_LLM_MODEL)]
    llm_model: String,
    #[arg(long, env = "CLIENTPULSE_LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,
}

impl SourceArgs {
    fn credentials(&self) -> Credentials {
        match self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            Some(key) => Credentials::ApiKey(key.to_string()),
            None => Credentials::Account {
                domain: self.domain.clone().unwrap_or_default(),
                email: self.email.clone().unwrap_or_default(),
                password: self.password.clone().unwrap_or_default(),
            },
        }
    }

    async fn load(&self) -> anyhow::Result<Vec<ClientSnapshot>> {
        let credentials = self.credentials();
        let source: Box<dyn ClientDataSource> = match self.source {
            SourceKind::Csv => {
                let path = self
                    .csv
                    .as_ref()
                    .context("--csv is required when --source csv")?;
                Box::new(CsvSource::new(path))
            }
            SourceKind::Demo | SourceKind::Trainerize if !credentials.is_complete() => {
                bail!("Please provide your credentials or API key before refreshing.")
            }
            SourceKind::Demo => Box::new(DemoSource),
            SourceKind::Trainerize => Box::new(TrainerizeSource::new(
                self.base_url.as_deref(),
                Duration::from_secs(SOURCE_TIMEOUT_SECS),
            )?),
        };
        source.fetch(&credentials).await
    }
}

impl PipelineArgs {
    fn build(&self) -> anyhow::Result<InsightPipeline> {
        let (classifier, generator): (Arc<dyn RiskClassifier>, Arc<dyn InsightGenerator>) =
            if self.offline {
                (
                    Arc::new(RuleClassifier::default()),
                    Arc::new(TemplateInsightGenerator),
                )
            } else {
                let chat = ChatClient::new(LlmConfig::new(
                    &self.llm_base_url,
                    &self.llm_model,
                    self.llm_api_key.as_deref(),
                ))?;
                (
                    Arc::new(LlmRiskClassifier::new(chat.clone())),
                    Arc::new(LlmInsightGenerator::new(chat)),
                )
            };

        let timeout =
            (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs));
        let config = PipelineConfig::default()
            .with_max_concurrency(self.max_concurrency)
            .with_call_timeout(timeout);
        Ok(InsightPipeline::new(classifier, generator, config))
    }
}

async fn fetch_and_run(
    source: &SourceArgs,
    pipeline: &PipelineArgs,
) -> anyhow::Result<Option<(Vec<ClientSnapshot>, BatchResult)>> {
    let pipeline = pipeline.build()?;
    let clients = source.load().await?;
    if clients.is_empty() {
        println!("No clients found. Please check your credentials and try again.");
        return Ok(None);
    }

    let result = pipeline.run(&clients).await?;
    Ok(Some((clients, result)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_json);

    match cli.command {
        Commands::Clients { source, json } => {
            let clients = source.load().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&clients)?);
                return Ok(());
            }
            if clients.is_empty() {
                println!("No clients found. Please check your credentials and try again.");
                return Ok(());
            }

            println!("Clients from {}:", source.source.label());
            for client in &clients {
                println!(
                    "- {} (age {}, since {}, last seen {}) workouts {}, cardio {}, nutrition {}%, exercise {}% / {}% / {}%",
                    client.client_id,
                    client.age,
                    client.added_on,
                    client.last_signed_in,
                    client.workouts_completed,
                    client.total_cardio_activities,
                    client.nutrition_compliance.percentage,
                    client.exercise_compliance.two_weeks_ago,
                    client.exercise_compliance.one_week_ago,
                    client.exercise_compliance.this_week
                );
            }
        }
        Commands::Insights {
            source,
            pipeline,
            json,
        } => {
            let Some((clients, result)) = fetch_and_run(&source, &pipeline).await? else {
                return Ok(());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            if result.is_empty() {
                println!("No insights could be generated for this batch.");
            } else {
                println!("Insights for {} of {} clients:", result.len(), clients.len());
                for insight in report::ordered_insights(&result) {
                    println!(
                        "- {} [{}] {}",
                        insight.client_id, insight.risk_status, insight.message
                    );
                }
            }

            let dropped = result.dropped_client_ids(&clients);
            if !dropped.is_empty() {
                println!("No insight for: {}", dropped.join(", "));
            }
        }
        Commands::Report {
            source,
            pipeline,
            out,
        } => {
            let Some((clients, result)) = fetch_and_run(&source, &pipeline).await? else {
                return Ok(());
            };
            let report =
                report::build_report(source.source.label(), Utc::now(), &clients, &result);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
