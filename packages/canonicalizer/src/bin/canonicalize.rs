//! Command-line entry point for triple canonicalization.
//!
//! `run` goes from a rows file (one list of triples per line) to canonical
//! rows. `resolve` takes already typed triples (JSON Lines) and only merges
//! aliases.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indexmap::IndexMap;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use canonicalizer::io::{read_jsonl, read_rows, write_json, write_jsonl, write_rows};
use canonicalizer::pipeline::prompts::prompts_hash;
use canonicalizer::pipeline::CanonOutput;
use canonicalizer::{
    CanonConfig, Canonicalizer, LlmOracle, OpenAiClient, Retrying, RetryPolicy, Triple,
};

#[derive(Parser)]
#[command(name = "canonicalize")]
#[command(about = "Type and canonicalize knowledge-graph triples with an LLM oracle")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Raw rows in, canonical rows out
    Run {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Typed triples (JSON Lines) in, canonical triples out
    Resolve {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Input file
    #[arg(long, short)]
    input: PathBuf,

    /// Output file
    #[arg(long, short)]
    output: PathBuf,

    /// Chat model or alias (gpt, qwen, mistral)
    #[arg(long, default_value = "gpt")]
    model: String,

    /// OpenAI-compatible base URL (overrides OPENAI_API_BASE)
    #[arg(long)]
    api_base: Option<String>,

    /// JSON object of label -> description offered to the classifier
    #[arg(long)]
    labels: Option<PathBuf>,

    /// JSON run configuration (batching, retrieval, retries)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for intermediate files and the run report
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Concurrent embedding requests
    #[arg(long)]
    concurrency: Option<usize>,
}

#[derive(Serialize)]
struct Manifest<'a> {
    command: &'a str,
    model: &'a str,
    embedding_model: &'a str,
    prompts_hash: String,
    config: &'a CanonConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,canonicalizer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { common } => cmd_run(common).await,
        Commands::Resolve { common } => cmd_resolve(common).await,
    }
}

fn load_config(args: &CommonArgs) -> Result<CanonConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => CanonConfig::default(),
    };
    if let Some(n) = args.concurrency {
        config.fanout = config.fanout.with_max_in_flight(n);
    }
    Ok(config)
}

fn load_labels(path: &Path) -> Result<IndexMap<String, String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading labels {}", path.display()))?;
    let labels: IndexMap<String, String> =
        serde_json::from_str(&text).with_context(|| format!("parsing labels {}", path.display()))?;
    anyhow::ensure!(!labels.is_empty(), "label file {} is empty", path.display());
    Ok(labels)
}

fn build_client(args: &CommonArgs) -> Result<OpenAiClient> {
    let mut client = match &args.api_base {
        Some(base) => OpenAiClient::from_env()
            .unwrap_or_else(|_| OpenAiClient::new("EMPTY"))
            .with_base_url(base),
        None => OpenAiClient::from_env().context("configuring OpenAI client")?,
    };
    client = client.with_model(&args.model);
    if let Ok(model) = std::env::var("CANON_EMBEDDING_MODEL") {
        client = client.with_embedding_model(model);
    }
    Ok(client)
}

fn build_oracle(
    args: &CommonArgs,
    client: OpenAiClient,
    retry: RetryPolicy,
) -> Result<Retrying<LlmOracle<OpenAiClient>>> {
    let mut oracle = LlmOracle::new(client);
    if let Some(path) = &args.labels {
        oracle = oracle.with_labels(load_labels(path)?);
    }
    Ok(Retrying::new(oracle, retry))
}

fn prepare_work_dir(
    args: &CommonArgs,
    command: &str,
    client: &OpenAiClient,
    config: &CanonConfig,
) -> Result<()> {
    let Some(dir) = &args.work_dir else {
        return Ok(());
    };
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let manifest = Manifest {
        command,
        model: client.model(),
        embedding_model: client.embedding_model(),
        prompts_hash: prompts_hash(),
        config,
    };
    write_json(dir.join("manifest.json"), &manifest)?;
    Ok(())
}

fn write_intermediates(args: &CommonArgs, output: &CanonOutput) -> Result<()> {
    let Some(dir) = &args.work_dir else {
        return Ok(());
    };
    write_json(dir.join("entity_clusters.json"), &output.entity_clusters)?;
    write_json(dir.join("relation_clusters.json"), &output.relation_clusters)?;
    write_json(dir.join("entity_aliases.json"), output.resolver.entities())?;
    write_json(dir.join("relation_aliases.json"), output.resolver.relations())?;
    write_json(dir.join("report.json"), &output.report)?;
    Ok(())
}

async fn cmd_run(args: CommonArgs) -> Result<()> {
    let config = load_config(&args)?;
    let client = build_client(&args)?;
    prepare_work_dir(&args, "run", &client, &config)?;
    let oracle = build_oracle(&args, client.clone(), config.fanout.retry.clone())?;

    let rows = read_rows(&args.input)
        .with_context(|| format!("reading rows from {}", args.input.display()))?;
    tracing::info!(rows = rows.len(), input = %args.input.display(), "Starting run");

    let canon = Canonicalizer::new(&oracle, &client, config);
    let output = canon.run_rows(rows).await;

    if let Some(dir) = &args.work_dir {
        write_jsonl(dir.join("typed.jsonl"), &output.typed)?;
        write_jsonl(dir.join("canonical.jsonl"), &output.canonical.triples)?;
    }
    write_intermediates(&args, &output.canonical)?;

    write_rows(&args.output, &output.rows)
        .with_context(|| format!("writing {}", args.output.display()))?;
    tracing::info!(output = %args.output.display(), "Run complete");
    Ok(())
}

async fn cmd_resolve(args: CommonArgs) -> Result<()> {
    let config = load_config(&args)?;
    let client = build_client(&args)?;
    prepare_work_dir(&args, "resolve", &client, &config)?;
    let oracle = build_oracle(&args, client.clone(), config.fanout.retry.clone())?;

    let triples: Vec<Triple> = read_jsonl(&args.input)
        .with_context(|| format!("reading triples from {}", args.input.display()))?;
    tracing::info!(triples = triples.len(), input = %args.input.display(), "Starting resolve");

    let canon = Canonicalizer::new(&oracle, &client, config);
    let output = canon.canonicalize(triples).await;

    write_intermediates(&args, &output)?;
    write_jsonl(&args.output, &output.triples)
        .with_context(|| format!("writing {}", args.output.display()))?;
    tracing::info!(output = %args.output.display(), "Resolve complete");
    Ok(())
}
