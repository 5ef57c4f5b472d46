use sales_chart_assistant::assistant;
use sales_chart_assistant::config::{AssistantConfig, LlmProvider};
use sales_chart_assistant::dashboard::{build_dashboard, selector_options, Download};
use sales_chart_assistant::dataset::{FilterSelection, SalesTable, CITY, PERIOD, REGION, RETAILER, STATE};
use sales_chart_assistant::llm::LlmClient;
use sales_chart_assistant::ChartPipeline;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sales-dashboard")]
#[command(about = "Sales dashboard with a natural-language chart assistant")]
#[command(version)]
struct Args {
    /// Sales data file, .csv or .parquet (or set SALES_DATA_PATH)
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// LLM provider: openai or gemini (or set LLM_PROVIDER)
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Model name (or set LLM_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// API key (or set OPENAI_API_KEY / GEMINI_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Seconds to wait for the model (or set LLM_TIMEOUT_SECS)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List selector options for every filterable column
    Options,
    /// Show the dashboard panels for the current filters
    Dashboard {
        #[command(flatten)]
        filters: FilterArgs,

        /// Write the panel CSV downloads into this directory
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Ask for a chart in plain language, e.g. "bar chart of TotalSales by Region"
    Chart {
        description: String,

        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Ask a question about the filtered data
    Ask {
        question: String,

        #[command(flatten)]
        filters: FilterArgs,
    },
}

#[derive(ClapArgs, Debug, Default)]
struct FilterArgs {
    #[arg(long)]
    region: Option<String>,
    #[arg(long)]
    retailer: Option<String>,
    #[arg(long)]
    state: Option<String>,
    #[arg(long)]
    city: Option<String>,
    /// Month label such as "Mar'21"
    #[arg(long)]
    period: Option<String>,
}

impl FilterArgs {
    fn selection(&self) -> FilterSelection {
        let mut selection = FilterSelection::new();
        selection.select(REGION, self.region.as_deref());
        selection.select(RETAILER, self.retailer.as_deref());
        selection.select(STATE, self.state.as_deref());
        selection.select(CITY, self.city.as_deref());
        selection.select(PERIOD, self.period.as_deref());
        selection
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = resolve_config(&args)?;

    // No partial-data mode: a load failure ends the session.
    let table = SalesTable::load(&config.data_path)
        .with_context(|| format!("Cannot start without sales data at {}", config.data_path.display()))?;

    match &args.command {
        Commands::Options => {
            for (column, options) in selector_options(&table)? {
                println!("{}: {}", column, options.join(" | "));
            }
        }
        Commands::Dashboard { filters, out_dir } => {
            let dashboard = build_dashboard(&table, &filters.selection())?;
            println!("Showing {} rows for {:?}\n", dashboard.view.height(), dashboard.selection);
            for panel in &dashboard.panels {
                println!("### {}\n{}\n", panel.title, panel.table);
            }
            if let Some(dir) = out_dir {
                std::fs::create_dir_all(dir)?;
                for panel in &dashboard.panels {
                    write_download(dir, &panel.download)?;
                }
                write_download(dir, &dashboard.raw_download)?;
            }
        }
        Commands::Chart { description, filters } => {
            let view = table.filter(&filters.selection())?;
            let client = LlmClient::from_config(&config)?;
            let pipeline = ChartPipeline::new(client, config.timeout);
            let run = pipeline.run(description, &view).await;

            if let Some(code) = &run.code {
                println!("{}\n", code);
            }
            match &run.outcome {
                Ok(figure) => println!("{}", figure.to_json()?),
                Err(e) => {
                    error!("Chart request failed at {:?}", run.stages.iter().rev().nth(1));
                    eprintln!("Could not generate a chart: {}", e);
                }
            }
        }
        Commands::Ask { question, filters } => {
            let view = table.filter(&filters.selection())?;
            let client = LlmClient::from_config(&config)?;
            match assistant::ask(&client, &view, question, config.timeout).await {
                Ok(answer) => println!("{}", answer),
                Err(e) => eprintln!("Could not answer: {}", e),
            }
        }
    }

    Ok(())
}

fn resolve_config(args: &Args) -> Result<AssistantConfig> {
    let provider = args.provider.as_deref().map(LlmProvider::parse).transpose()?;
    let mut config = AssistantConfig::from_env_with_provider(provider)?;
    if let Some(data) = &args.data {
        config.data_path = data.clone();
    }
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(api_key) = &args.api_key {
        config.api_key = Some(api_key.clone());
    }
    if let Some(secs) = args.timeout_secs {
        anyhow::ensure!(secs > 0, "--timeout-secs must be greater than zero");
        config.timeout = Duration::from_secs(secs);
    }
    Ok(config)
}

fn write_download(dir: &Path, download: &Download) -> Result<()> {
    let path = dir.join(&download.file_name);
    std::fs::write(&path, &download.bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {} ({} bytes)", path.display(), download.bytes.len());
    Ok(())
}
