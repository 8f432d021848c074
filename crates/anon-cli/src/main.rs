//! Anon CLI - Command-line interface
//!
//! Usage:
//!   anon anonymize <input> [-o <output>] [--spans <spans.json>] [--report <report.json>]
//!   anon recognizers [--language <lang>]
//!   anon cache stats
//!   anon cache clear

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anon_core::{AppConfig, EntitySpan, LlmProvider};
use anon_replacer::{create_llm_client, Anonymizer, MappingCache};
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "anon")]
#[command(about = "PII detection and consistent anonymization")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Anonymize a text file ("-" reads stdin)
    Anonymize {
        /// Input text
        input: String,

        /// Write the anonymized text here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSON array of externally detected spans (e.g. from NER)
        #[arg(long)]
        spans: Option<PathBuf>,

        /// Language of the text
        #[arg(short, long, default_value = "en")]
        language: String,

        /// Write the decision report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Never call the remote generator
        #[arg(long)]
        no_remote: bool,
    },
    /// List registered pattern recognizers
    Recognizers {
        /// Only show recognizers for this language
        #[arg(short, long)]
        language: Option<String>,
    },
    /// Inspect or reset the mapping cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show location, entry count and lookup statistics
    Stats,
    /// Remove every mapping and the cache file
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command {
        Commands::Anonymize {
            input,
            output,
            spans,
            language,
            report,
            no_remote,
        } => {
            if no_remote {
                config.llm.provider = LlmProvider::None;
            }

            let text = read_input(&input)?;
            let extra_spans = match spans {
                Some(path) => load_spans(&path)?,
                None => Vec::new(),
            };

            let client = create_llm_client(&config.llm)?;
            let mut anonymizer = Anonymizer::from_config(&config, client)?;
            let outcome = anonymizer
                .anonymize_text(&text, &language, &extra_spans)
                .await?;

            match output {
                Some(path) => std::fs::write(&path, &outcome.text)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => std::io::stdout().write_all(outcome.text.as_bytes())?,
            }

            if let Some(path) = report {
                let json = serde_json::to_string_pretty(&serde_json::json!({
                    "report": &outcome.report,
                    "cache": &outcome.cache_stats,
                }))?;
                std::fs::write(&path, json)
                    .with_context(|| format!("writing {}", path.display()))?;
            }

            let counts = &outcome.report.counts;
            tracing::info!(
                spans = counts.total(),
                dropped = outcome.report.dropped_spans,
                safety_net = outcome.report.safety_net_hits(),
                cache_hit_rate = outcome.cache_stats.hit_rate,
                cache = %config.replacement.cache_path.display(),
                "Done"
            );
        }
        Commands::Recognizers { language } => {
            let anonymizer = Anonymizer::from_config(&config, None)?;
            let mut recognizers = anonymizer.recognizers();
            recognizers.sort_by(|a, b| (&a.language, &a.name).cmp(&(&b.language, &b.name)));

            for info in recognizers
                .iter()
                .filter(|info| language.as_deref().map_or(true, |l| info.language == l))
            {
                println!(
                    "{:<4} {:<22} {:<28} patterns={} validator={}",
                    info.language,
                    info.entity_type,
                    info.name,
                    info.pattern_count,
                    info.has_validator
                );
            }
        }
        Commands::Cache { action } => {
            let mut cache = MappingCache::open(&config.replacement.cache_path);
            match action {
                CacheAction::Stats => {
                    println!("Cache: {}", cache.path().display());
                    println!("{}", cache_stats_json(&cache)?);
                }
                CacheAction::Clear => {
                    let removed = cache.len();
                    cache.clear()?;
                    println!("Cleared {} mappings from {}", removed, cache.path().display());
                }
            }
        }
    }

    Ok(())
}

/// File configuration with environment overrides, or environment only
fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

/// Logs go to stderr so anonymized text can be piped from stdout
fn init_tracing(config: &AppConfig) {
    let level = &config.logging.level;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("anon={level},anon_core={level},anon_recognizer={level},anon_replacer={level}")
            .into()
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_input(input: &str) -> anyhow::Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("reading {input}"))
    }
}

fn cache_stats_json(cache: &MappingCache) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(&cache.stats_report())?)
}

/// Spans as a JSON array; `raw_text` may be omitted
fn load_spans(path: &Path) -> anyhow::Result<Vec<EntitySpan>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let spans: Vec<EntitySpan> = serde_json::from_str(&content)
        .with_context(|| format!("parsing spans from {}", path.display()))?;
    Ok(spans)
}
