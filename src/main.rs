use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use artist_harvester_lib::crawling::Harvester;
use artist_harvester_lib::infrastructure::http_transport::HttpClientConfig;
use artist_harvester_lib::infrastructure::{
    HarvestConfig, ReqwestTransport, init_logging_with_config, load_seed_input,
};

#[derive(Parser)]
#[command(name = "artist-harvester", about = "Harvest SoundCloud creator profiles into a JSON dataset")]
struct Cli {
    /// Seed input JSON (`profiles`, `keywords`, `ids`, `maxItemsPerKeyword`)
    #[arg(long, short)]
    input: PathBuf,

    /// Output artifact path; overrides `export.output_path`
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Configuration file (JSON or TOML)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Log level; overrides `logging.level`
    #[arg(long)]
    log_level: Option<String>,

    /// Recover records from an unfinished run's journal
    #[arg(long)]
    resume: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = HarvestConfig::load(cli.config.as_deref())
        .with_context(|| format!("loading configuration {:?}", cli.config))?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(output) = cli.output {
        config.export.output_path = output;
    }
    config.export.resume |= cli.resume;

    init_logging_with_config(&config.logging).context("initializing logging")?;

    let input = load_seed_input(&cli.input)
        .await
        .with_context(|| format!("reading seed input {}", cli.input.display()))?;
    config.crawl.max_items_per_seed = Some(input.max_items_per_keyword);
    if input.seeds.is_empty() {
        warn!("⚠️ Input contains no profiles, ids or keywords; writing an empty dataset");
    }

    let transport = ReqwestTransport::new(HttpClientConfig::from_harvest_config(&config))
        .context("building HTTP transport")?;
    let harvester = Harvester::new(config, Arc::new(transport));

    let cancel = harvester.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received; finishing in-flight work");
            cancel.cancel();
        }
    });

    info!("🚀 Harvesting {} seeds", input.seeds.len());
    let summary = harvester.run(input.seeds).await.context("harvest run failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("serializing run summary")?
    );

    if let Some(reason) = summary.abort_reason {
        bail!("run aborted: {reason}");
    }
    Ok(())
}
