use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use citesource_core::config_file;
use citesource_core::{AbsPageMetadata, MetadataSource, ReferenceCache};
use citesource_ingest::{ArchiveStore, Config, PaperId, Resolver};

mod output;

use output::ColorMode;

/// Resolve the references cited by an arXiv paper from its LaTeX source
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory for stored archives, the reference cache and paper metadata
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the cited references of a paper
    Resolve {
        /// arXiv identifier, e.g. 2402.00898
        id: String,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Ignore any cached result and re-run the pipeline
        #[arg(long)]
        no_cache: bool,

        /// Look up missing identifiers by title
        #[arg(long)]
        lookup: bool,

        /// Path to output file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Show a paper's title and abstract
    Metadata {
        /// arXiv identifier
        id: String,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Inspect or prune the reference cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Drop one paper's cached references and stored archive
    Remove { id: String },
    /// Drop every cached reference list
    Clear,
    /// List cached paper identifiers
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = build_config(cli.data_dir);

    match cli.command {
        Command::Resolve {
            id,
            json,
            no_cache,
            lookup,
            output,
            no_color,
        } => {
            let mut config = config;
            config.lookup_enabled |= lookup;
            let resolved = resolve(&config, &id, json, no_cache, output, no_color).await?;
            if !resolved {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Metadata { id, no_color } => metadata(&config, &id, no_color).await,
        Command::Cache { action } => cache(&config, action),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "warn,citesource_core={level},citesource_bib={level},citesource_ingest={level},citesource_cli={level}"
        ))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

/// Resolve configuration: CLI flags > env vars > config file > defaults
fn build_config(data_dir: Option<PathBuf>) -> Config {
    let file = config_file::load_config();
    let mut config = Config::default().apply_file(&file);

    let data_dir =
        data_dir.or_else(|| std::env::var("CITESOURCE_DATA_DIR").ok().map(PathBuf::from));
    if let Some(dir) = data_dir {
        let rooted = Config::with_data_dir(dir);
        config.source_dir = rooted.source_dir;
        config.cache_path = rooted.cache_path;
        config.metadata_dir = rooted.metadata_dir;
        config.data_dir = rooted.data_dir;
    }
    if let Ok(url) = std::env::var("CITESOURCE_BASE_URL") {
        config.base_url = url.trim_end_matches('/').to_string();
    }
    config
}

/// Accept identifiers typed without their dot: `240200898` → `2402.00898`.
fn normalize_input_id(input: &str) -> String {
    let trimmed = input.trim();
    let bare_digits = trimmed.len() > 4 && trimmed.chars().all(|c| c.is_ascii_digit());
    if bare_digits {
        format!("{}.{}", &trimmed[..4], &trimmed[4..])
    } else {
        trimmed.to_string()
    }
}

fn parse_id(input: &str) -> anyhow::Result<PaperId> {
    Ok(PaperId::new(&normalize_input_id(input))?)
}

/// Returns whether the paper's references were resolved.
async fn resolve(
    config: &Config,
    id: &str,
    json: bool,
    no_cache: bool,
    output: Option<PathBuf>,
    no_color: bool,
) -> anyhow::Result<bool> {
    let id = parse_id(id)?;

    let use_color = !no_color && !json && output.is_none();
    let color = ColorMode(use_color);

    let mut writer: Box<dyn Write> = if let Some(ref output_path) = output {
        Box::new(std::fs::File::create(output_path)?)
    } else {
        Box::new(std::io::stdout())
    };

    let resolver = Resolver::new(config)?;
    let result = if no_cache {
        resolver.resolve_fresh(&id).await
    } else {
        resolver.resolve(&id).await
    };
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            if json {
                output::print_error_json(&mut writer, id.raw(), &e)?;
                writer.flush()?;
            }
            return Err(e.into());
        }
    };
    tracing::debug!(
        cache_hits = resolver.cache().hits(),
        cache_misses = resolver.cache().misses(),
        "resolve finished"
    );

    if json {
        output::print_json(&mut writer, id.raw(), &outcome)?;
    } else {
        output::print_resolution(&mut writer, id.raw(), &outcome, color)?;
    }
    writer.flush()?;

    if let Some(path) = output {
        eprintln!("Output written to {}", path.display());
    }
    Ok(outcome.resolution.is_resolved())
}

async fn metadata(config: &Config, id: &str, no_color: bool) -> anyhow::Result<()> {
    let id = parse_id(id)?;
    let source = AbsPageMetadata::from_config(config)?;
    let metadata = source.get_metadata(&id).await?;

    let mut stdout = std::io::stdout();
    output::print_metadata(&mut stdout, &metadata, ColorMode(!no_color))?;
    Ok(())
}

fn open_cache(config: &Config) -> anyhow::Result<ReferenceCache> {
    match &config.cache_path {
        Some(path) => Ok(ReferenceCache::open(path)?),
        None => anyhow::bail!("No cache path configured"),
    }
}

fn cache(config: &Config, action: CacheCommand) -> anyhow::Result<()> {
    let cache = open_cache(config)?;
    match action {
        CacheCommand::Remove { id } => {
            let id = parse_id(&id)?;
            let removed = cache.remove(&id)?;
            let archive_removed = ArchiveStore::new(config.source_dir.clone()).remove(&id)?;
            if removed || archive_removed {
                println!("Removed {}", id);
            } else {
                println!("{} is not cached", id);
            }
        }
        CacheCommand::Clear => {
            cache.clear()?;
            println!("Cleared cached references in {}", config.data_dir.display());
        }
        CacheCommand::List => {
            let ids = cache.ids()?;
            if ids.is_empty() {
                println!("No cached references");
            }
            for id in ids {
                println!("{}", id);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_inserted_after_four_digits() {
        assert_eq!(normalize_input_id("240200898"), "2402.00898");
        assert_eq!(normalize_input_id(" 2402.00898 "), "2402.00898");
        assert_eq!(normalize_input_id("hep-th/9901001"), "hep-th/9901001");
        assert_eq!(normalize_input_id("1234"), "1234");
    }

    #[test]
    fn cli_parses_resolve_flags() {
        let cli = Cli::try_parse_from([
            "citesource",
            "--data-dir",
            "/tmp/cs",
            "resolve",
            "2402.00898",
            "--json",
            "--no-cache",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/cs")));
        match cli.command {
            Command::Resolve {
                id, json, no_cache, lookup, ..
            } => {
                assert_eq!(id, "2402.00898");
                assert!(json && no_cache && !lookup);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn cli_parses_cache_remove() {
        let cli = Cli::try_parse_from(["citesource", "cache", "remove", "2402.00898", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Command::Cache {
                action: CacheCommand::Remove { .. }
            }
        ));
    }
}
