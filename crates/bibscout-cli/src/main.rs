use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use bibscout_core::convert::{entry_from_metadata, DocumentConverter, MarkdownConverter};
use bibscout_core::provider::openalex::OpenAlexProvider;
use bibscout_core::provider::scholar::ScholarSession;
use bibscout_core::{
    bibtex, BibCache, Enricher, MetadataProvider, Mode, Outcome, Pacing, Query, Resolver,
    RunStats, DEFAULT_MAX_SIZE, DEFAULT_TTL_SECS, ENRICH_MIN_SCORE,
};
use bibscout_parsing::{parse_reference, segment_references, ParsedReference};

mod config_file;
mod output;

use output::ColorMode;

/// Resolve converted papers into citation-ready BibTeX bundles
#[derive(Parser, Debug)]
#[command(name = "bibscout", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve documents' metadata and reference lists into .bib files
    Resolve {
        /// Converted markdown documents to process
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output directory (one subdirectory per document)
        #[arg(long, default_value = "./papers")]
        output_dir: PathBuf,

        /// Cache directory (default: platform cache dir)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Disable the web-search fallback provider
        #[arg(long)]
        non_interactive: bool,

        /// Skip DOI enrichment of resolved entries
        #[arg(long)]
        no_enrich: bool,

        /// Minimum score for accepting an enrichment match
        #[arg(long)]
        min_score: Option<f64>,

        /// Contact email sent to metadata APIs
        #[arg(long)]
        mailto: Option<String>,

        /// Only write references.bib (skip the document's own record)
        #[arg(long)]
        references_only: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Inspect or maintain the resolution cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Print entry counts and effectiveness statistics
    Stats {
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Drop expired entries
    Cleanup {
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Delete every cached entry
    Clear {
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

fn cache_file(cache_dir: Option<PathBuf>, config: &config_file::ConfigFile) -> PathBuf {
    cache_dir
        .or_else(|| config.cache_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("bibscout")
        })
        .join("cache.json")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bibscout=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config_file::load_config();

    match cli.command {
        Command::Cache { action } => run_cache(action, &config),
        Command::Resolve {
            files,
            output_dir,
            cache_dir,
            non_interactive,
            no_enrich,
            min_score,
            mailto,
            references_only,
            no_color,
        } => {
            run_resolve(ResolveArgs {
                files,
                output_dir,
                cache_dir,
                non_interactive,
                no_enrich,
                min_score,
                mailto,
                references_only,
                no_color,
                config,
            })
            .await
        }
    }
}

fn run_cache(action: CacheAction, config: &config_file::ConfigFile) -> anyhow::Result<()> {
    match action {
        CacheAction::Stats { cache_dir } => {
            let path = cache_file(cache_dir, config);
            let cache = BibCache::open(&path, DEFAULT_MAX_SIZE, DEFAULT_TTL_SECS);
            let stats = cache.stats();
            println!("Cache file:      {}", path.display());
            println!("Entries:         {}/{}", stats.total_entries, stats.max_size);
            println!("Default TTL:     {}s", stats.default_ttl);
            println!("Expired (seen):  {}", stats.expired_entries);
        }
        CacheAction::Cleanup { cache_dir } => {
            let cache = BibCache::open(&cache_file(cache_dir, config), DEFAULT_MAX_SIZE, DEFAULT_TTL_SECS);
            let removed = cache.cleanup_expired();
            println!("Removed {removed} expired entries");
        }
        CacheAction::Clear { cache_dir } => {
            let cache = BibCache::open(&cache_file(cache_dir, config), DEFAULT_MAX_SIZE, DEFAULT_TTL_SECS);
            cache.clear();
            println!("Cache cleared");
        }
    }
    Ok(())
}

struct ResolveArgs {
    files: Vec<PathBuf>,
    output_dir: PathBuf,
    cache_dir: Option<PathBuf>,
    non_interactive: bool,
    no_enrich: bool,
    min_score: Option<f64>,
    mailto: Option<String>,
    references_only: bool,
    no_color: bool,
    config: config_file::ConfigFile,
}

async fn run_resolve(args: ResolveArgs) -> anyhow::Result<()> {
    // CLI flags > environment > config file > defaults.
    let mailto = args
        .mailto
        .or_else(|| std::env::var("BIBSCOUT_MAILTO").ok())
        .or_else(|| args.config.mailto.clone());
    let non_interactive = args.non_interactive || args.config.non_interactive.unwrap_or(false);
    let min_score = args
        .min_score
        .or(args.config.min_score)
        .unwrap_or(ENRICH_MIN_SCORE);

    let color = ColorMode(!args.no_color);

    let cache_path = cache_file(args.cache_dir.clone(), &args.config);
    let cache = Arc::new(BibCache::open(&cache_path, DEFAULT_MAX_SIZE, DEFAULT_TTL_SECS));

    let client = reqwest::Client::new();
    let primary: Arc<dyn MetadataProvider> = Arc::new(OpenAlexProvider::new(
        client.clone(),
        Pacing::fixed(Duration::from_millis(200)),
        mailto.clone(),
    ));

    let fallback: Option<Arc<dyn MetadataProvider>> = if non_interactive {
        None
    } else {
        match ScholarSession::connect(Pacing::jittered(
            Duration::from_millis(500),
            Duration::from_millis(1000),
        )) {
            Ok(session) => Some(Arc::new(session)),
            Err(e) => {
                tracing::warn!(error = %e, "fallback session unavailable, continuing without it");
                None
            }
        }
    };

    let mode = if non_interactive {
        Mode::NonInteractive
    } else {
        Mode::Interactive
    };
    let resolver = Resolver::new(cache, primary, fallback, mode);

    let enricher = (!args.no_enrich).then(|| {
        Enricher::new(
            client,
            Pacing::fixed(Duration::from_millis(200)),
            mailto.clone(),
        )
        .with_min_score(min_score)
    });

    let mut totals = RunStats::default();
    let mut ok_files = 0usize;

    for path in &args.files {
        output::print_file_header(color, &path.display().to_string());
        match process_file(
            path,
            &args.output_dir,
            &resolver,
            enricher.as_ref(),
            args.references_only,
            color,
        )
        .await
        {
            Ok(stats) => {
                ok_files += 1;
                totals.resolved += stats.resolved;
                totals.unresolved += stats.unresolved;
                totals.errors += stats.errors;
                output::print_file_result(color, &stats);
            }
            Err(e) => {
                totals.errors += 1;
                output::print_file_error(color, &e.to_string());
            }
        }
    }

    output::print_summary(color, ok_files, args.files.len(), &totals);

    if ok_files == 0 {
        anyhow::bail!("no files processed successfully");
    }
    Ok(())
}

async fn process_file(
    path: &Path,
    output_dir: &Path,
    resolver: &Resolver,
    enricher: Option<&Enricher>,
    references_only: bool,
    color: ColorMode,
) -> anyhow::Result<RunStats> {
    let doc = MarkdownConverter.convert(path)?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("paper");
    let dir = output_dir.join(stem);
    std::fs::create_dir_all(&dir)?;

    let mut stats = RunStats::default();

    if !references_only {
        let entry = match doc.metadata.to_query() {
            Some(query) => match resolver.resolve(&query).await {
                Ok(resolution) => match resolution.outcome {
                    Outcome::Resolved(entry) => {
                        stats.resolved += 1;
                        Some(entry)
                    }
                    Outcome::Unresolved => {
                        stats.unresolved += 1;
                        entry_from_metadata(&doc.metadata)
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "document query rejected");
                    stats.errors += 1;
                    entry_from_metadata(&doc.metadata)
                }
            },
            None => entry_from_metadata(&doc.metadata),
        };

        if let Some(mut entry) = entry {
            if let Some(enricher) = enricher {
                enricher.enrich(&mut entry).await;
            }
            let paper_bib = dir.join("paper.bib");
            std::fs::write(&paper_bib, format!("{}\n", entry.to_bibtex()))?;
            output::print_note(color, &format!("wrote {}", paper_bib.display()));
        }
    }

    let parsed: Vec<ParsedReference> = segment_references(&doc.text)
        .map(|raw| parse_reference(&raw))
        .collect();
    if parsed.is_empty() {
        output::print_note(color, "no references found");
        return Ok(stats);
    }
    let queries: Vec<Query> = parsed.iter().map(|p| p.query.clone()).collect();

    let bar = ProgressBar::new(queries.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} resolving references [{bar:40.cyan/dim}] {pos}/{len}")
            .unwrap()
            .progress_chars("=> "),
    );

    let (results, ref_stats) = resolver.resolve_all(&queries, |_, _| bar.inc(1)).await;
    bar.finish_and_clear();

    let mut entries = Vec::new();
    for (i, result) in results.into_iter().enumerate() {
        match result {
            Ok(resolution) => match resolution.outcome {
                Outcome::Resolved(entry) => entries.push(entry),
                Outcome::Unresolved => {
                    tracing::debug!(reference = %parsed[i].raw, "reference left unresolved");
                }
            },
            Err(e) => {
                tracing::debug!(reference = %parsed[i].raw, error = %e, "reference skipped");
            }
        }
    }

    if let Some(enricher) = enricher {
        for entry in &mut entries {
            enricher.enrich(entry).await;
        }
    }

    if !entries.is_empty() {
        let references_bib = dir.join("references.bib");
        std::fs::write(&references_bib, bibtex::write_bibliography(&entries))?;
        output::print_note(color, &format!("wrote {}", references_bib.display()));
    }

    stats.resolved += ref_stats.resolved;
    stats.unresolved += ref_stats.unresolved;
    stats.errors += ref_stats.errors;
    Ok(stats)
}
