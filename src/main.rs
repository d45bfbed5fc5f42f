use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use listen_matrix::config::{ConfigOverrides, PipelineConfig, DEFAULT_INSPECT_LINES};
use listen_matrix::decompress::{CommandDecoder, Decompressor};
use listen_matrix::filter::MatchPolicy;
use listen_matrix::lookup::DuplicatePolicy;
use listen_matrix::models::StageStats;
use listen_matrix::progress::{format_duration, Progress};
use listen_matrix::resolve::ResolveInputs;
use listen_matrix::{aggregate, extract, filter, pipeline, resolve};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "listen-matrix")]
#[command(about = "Build a user-artist listen count matrix from ListenBrainz dumps")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Worker threads for parallel parsing (0 = one per core)
    #[arg(long, global = true, default_value = "0")]
    workers: usize,

    /// Hide progress bars and log periodic progress lines instead
    #[arg(long, global = true)]
    log_only: bool,

    /// Write the stage's stats as JSON to this file
    #[arg(long, global = true)]
    stats_json: Option<PathBuf>,

    /// Decode .zst inputs with an external command instead of the built-in
    /// decoder, e.g. "zstd -dc --long=31"
    #[arg(long, global = true)]
    decompress_cmd: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Extract (user_id, recording_msid) pairs from a JSON Lines listen dump
    Extract {
        input: PathBuf,
        output: PathBuf,

        /// Print the first N records before extracting
        #[arg(long)]
        inspect: Option<usize>,
    },

    /// Keep only mapping rows for observed MSIDs with an accepted match type
    FilterMapping {
        events_csv: PathBuf,
        mapping_file: PathBuf,
        output: PathBuf,

        /// Accepted match types (comma-separated)
        #[arg(long, value_delimiter = ',', default_values_t = default_match_types())]
        accept: Vec<String>,
    },

    /// Resolve listens to artists via mapping, redirects and metadata
    Canonicalize {
        events_csv: PathBuf,
        filtered_mapping_csv: PathBuf,
        redirect_file: PathBuf,
        metadata_file: PathBuf,
        output: PathBuf,

        /// How repeated keys in the lookup tables are resolved
        #[arg(long, value_enum, default_value = "first-seen-wins")]
        duplicates: DuplicatePolicy,
    },

    /// Collapse user-artist pairs into listen counts
    Aggregate { input: PathBuf, output: PathBuf },

    /// Run all four stages using a configuration file and/or directories
    Run {
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        raw_dir: Option<PathBuf>,

        #[arg(long)]
        working_dir: Option<PathBuf>,

        /// Accepted match types (comma-separated), overrides the config file
        #[arg(long, value_delimiter = ',')]
        accept: Option<Vec<String>>,

        #[arg(long, value_enum)]
        duplicates: Option<DuplicatePolicy>,
    },

    /// Print the first records of a listen dump
    Inspect {
        input: PathBuf,

        #[arg(long, default_value_t = DEFAULT_INSPECT_LINES)]
        lines: usize,
    },
}

fn default_match_types() -> Vec<String> {
    MatchPolicy::default()
        .accepted()
        .into_iter()
        .map(String::from)
        .collect()
}

fn build_decompressor(cmd: Option<&str>) -> Result<Decompressor> {
    let decompressor = Decompressor::default();
    match cmd {
        None => Ok(decompressor),
        Some(cmd) => match CommandDecoder::from_command_line("zst", cmd) {
            Some(decoder) => Ok(decompressor.with_decoder(decoder)),
            None => bail!("--decompress-cmd must name a program"),
        },
    }
}

fn finish<S: StageStats>(stats: &S, phase: &str, stats_json: Option<&Path>) -> Result<()> {
    stats.log_phase(phase);
    if let Some(path) = stats_json {
        stats
            .write_to_file(path)
            .with_context(|| format!("Failed to write stats to {}", path.display()))?;
    }
    Ok(())
}

fn print_inspection(input: &Path, lines: usize, decompressor: &Decompressor) -> Result<()> {
    println!("Inspecting the first {} lines of {}:", lines, input.display());
    let records = extract::inspect(input, lines, decompressor)
        .with_context(|| format!("Failed to inspect {}", input.display()))?;
    for line in records {
        match line.record {
            Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            Err(e) => println!("Error decoding line {}: {}", line.line_number, e),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let global = cli.global;

    if global.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(global.workers)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    let progress = Progress::new(global.log_only);
    let decompressor = build_decompressor(global.decompress_cmd.as_deref())?;
    let stats_json = global.stats_json.as_deref();
    let start = Instant::now();

    match cli.command {
        Command::Extract {
            input,
            output,
            inspect,
        } => {
            if let Some(lines) = inspect {
                print_inspection(&input, lines, &decompressor)?;
            }
            let stats = extract::extract_listens(&input, &output, &decompressor, progress)
                .with_context(|| format!("Extraction from {} failed", input.display()))?;
            finish(&stats, "extract", stats_json)?;
        }
        Command::FilterMapping {
            events_csv,
            mapping_file,
            output,
            accept,
        } => {
            let policy = MatchPolicy::new(accept.iter().map(|m| m.trim()).filter(|m| !m.is_empty()));
            if policy.accepted().is_empty() {
                bail!("--accept must name at least one match type");
            }
            let stats = filter::filter_mapping(
                &events_csv,
                &mapping_file,
                &output,
                &policy,
                &decompressor,
                progress,
            )
            .with_context(|| format!("Filtering {} failed", mapping_file.display()))?;
            finish(&stats, "filter", stats_json)?;
        }
        Command::Canonicalize {
            events_csv,
            filtered_mapping_csv,
            redirect_file,
            metadata_file,
            output,
            duplicates,
        } => {
            let stats = resolve::canonicalize(
                ResolveInputs {
                    events_csv: &events_csv,
                    filtered_mapping_csv: &filtered_mapping_csv,
                    redirect_file: &redirect_file,
                    metadata_file: &metadata_file,
                },
                &output,
                duplicates,
                &decompressor,
                progress,
            )
            .context("Canonicalization failed")?;
            finish(&stats, "canonicalize", stats_json)?;
        }
        Command::Aggregate { input, output } => {
            let stats = aggregate::aggregate_listens(&input, &output, progress)
                .with_context(|| format!("Aggregating {} failed", input.display()))?;
            finish(&stats, "aggregate", stats_json)?;
        }
        Command::Run {
            config,
            raw_dir,
            working_dir,
            accept,
            duplicates,
        } => {
            let config = PipelineConfig::load(
                config.as_deref(),
                ConfigOverrides {
                    raw_dir,
                    working_dir,
                    accepted_match_types: accept,
                    duplicate_policy: duplicates,
                },
            )
            .context("Failed to load configuration")?;

            if config.inspect_lines > 0 {
                print_inspection(&config.listens_path(), config.inspect_lines, &decompressor)?;
            }
            let stats = pipeline::run_pipeline(&config, &decompressor, progress)
                .context("Pipeline failed")?;
            finish(&stats, "pipeline", stats_json)?;
            println!(
                "  Resolved: {}/{} listens ({:.1}%)",
                stats.resolve.resolved_events,
                stats.resolve.total_events,
                stats.resolve.resolve_rate()
            );
            println!("  Output: {}", config.user_artist_counts_csv().display());
        }
        Command::Inspect { input, lines } => {
            print_inspection(&input, lines, &decompressor)?;
            return Ok(());
        }
    }

    println!("\n{:=<60}", "");
    println!("Done in {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    Ok(())
}
