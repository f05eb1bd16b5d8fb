//! Command-line interface for particle-tracking review.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};

use crate::config::{ReviewConfig, TrajectoryConfig};
use crate::core::{loaders, writers, FeatureTable};
use crate::processors::{self, FilterSet};
use crate::visualization;

#[derive(Parser)]
#[command(name = "particle-review")]
#[command(about = "Review filtering and linking of particle-tracking tables", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a particle table into included and excluded records
    Filter {
        /// Input particle CSV
        input: PathBuf,
        /// Output CSV for included records
        output: PathBuf,
        /// Filter expression (repeatable, replaces the configured filters)
        #[arg(short, long = "filter")]
        filters: Vec<String>,
        /// Also write excluded records here
        #[arg(long)]
        excluded: Option<PathBuf>,
    },

    /// List included records closest to a filter threshold
    Errant {
        /// Input particle CSV
        input: PathBuf,
        /// Filter expression (repeatable, replaces the configured filters)
        #[arg(short, long = "filter")]
        filters: Vec<String>,
        /// Features to examine (comma separated)
        #[arg(long, value_delimiter = ',')]
        features: Vec<String>,
        /// Number of records to report
        #[arg(short = 'n', long)]
        max_results: Option<usize>,
        /// Write the candidates to CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Subtract ensemble drift from a trajectory table
    Drift {
        /// Input trajectory CSV
        input: PathBuf,
        /// Output CSV with corrected positions
        output: PathBuf,
        /// Drop trajectories shorter than this before estimating drift
        #[arg(long)]
        min_length: Option<usize>,
    },

    /// Rank the worst link of every trajectory
    Links {
        /// Input trajectory CSV
        input: PathBuf,
        /// Linker search range in pixels
        #[arg(long)]
        search_range: Option<f64>,
        /// Linker memory in frames
        #[arg(long)]
        memory: Option<i64>,
        /// Report links deviating more than search_range * (m - 1)
        #[arg(long)]
        multiplier: Option<f64>,
        /// Number of links to report
        #[arg(short = 'n', long)]
        max_results: Option<usize>,
        /// Drop trajectories shorter than this before scoring
        #[arg(long)]
        min_length: Option<usize>,
        /// Score raw positions without subtracting drift
        #[arg(long)]
        no_drift: bool,
        /// Write the links to CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List links that bridged the most missing frames
    MemoryLinks {
        /// Input trajectory CSV
        input: PathBuf,
        /// Linker memory in frames
        #[arg(long)]
        memory: Option<i64>,
        /// Number of links to report
        #[arg(short = 'n', long)]
        max_results: Option<usize>,
        /// Write the links to CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Summarize trajectory counts and lengths
    Stats {
        /// Input trajectory CSV
        input: PathBuf,
        /// Drop trajectories shorter than this first
        #[arg(long)]
        min_length: Option<usize>,
    },

    /// Render a table to PNG
    Plot {
        /// Input particle or trajectory CSV
        input: PathBuf,
        /// Output PNG file path (defaults to the input name with .png extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = PlotKind::Scatter)]
        kind: PlotKind,
        /// Feature on the horizontal axis (scatter)
        #[arg(long, default_value = "mass")]
        x_feature: String,
        /// Feature on the vertical axis (scatter)
        #[arg(long, default_value = "size")]
        y_feature: String,
        /// Filter expression (repeatable, replaces the configured filters)
        #[arg(short, long = "filter")]
        filters: Vec<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PlotKind {
    /// Feature against feature, coloured by filter outcome
    Scatter,
    /// Trajectory overview with flagged links
    Trajectories,
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

/// Finish the spinner and exit on failure.
fn finish_or_exit<T>(spinner: ProgressBar, what: &str, result: Result<T>) -> T {
    spinner.finish_and_clear();
    match result {
        Ok(value) => value,
        Err(e) => {
            error!("{} failed: {:#}", what, e);
            std::process::exit(1);
        }
    }
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    let config = match &cli.config {
        Some(path) => match ReviewConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}, using defaults",
                    path.display(),
                    e
                );
                ReviewConfig::default()
            }
        },
        None => ReviewConfig::default(),
    };

    match cli.command {
        Commands::Filter {
            input,
            output,
            filters,
            excluded,
        } => cmd_filter(&input, &output, &filters, excluded.as_deref(), &config),
        Commands::Errant {
            input,
            filters,
            features,
            max_results,
            output,
        } => cmd_errant(&input, &filters, features, max_results, output.as_deref(), &config),
        Commands::Drift {
            input,
            output,
            min_length,
        } => cmd_drift(&input, &output, min_length, &config),
        Commands::Links {
            input,
            search_range,
            memory,
            multiplier,
            max_results,
            min_length,
            no_drift,
            output,
        } => {
            let mut trajectories = config.trajectories.clone();
            trajectories.min_trajectory_length =
                min_length.unwrap_or(trajectories.min_trajectory_length);
            trajectories.subtract_drift &= !no_drift;

            let mut linking = config.linking.clone();
            linking.search_range = search_range.unwrap_or(linking.search_range);
            linking.memory = memory.unwrap_or(linking.memory);
            linking.min_deviation_multiplier =
                multiplier.unwrap_or(linking.min_deviation_multiplier);
            linking.max_results = max_results.unwrap_or(linking.max_results);
            cmd_links(&input, &linking.scoring_params(), &trajectories, output.as_deref());
        }
        Commands::MemoryLinks {
            input,
            memory,
            max_results,
            output,
        } => cmd_memory_links(
            &input,
            memory.unwrap_or(config.linking.memory),
            max_results.unwrap_or(config.linking.max_memory_links),
            output.as_deref(),
        ),
        Commands::Stats { input, min_length } => cmd_stats(
            &input,
            min_length.unwrap_or(config.trajectories.min_trajectory_length),
        ),
        Commands::Plot {
            input,
            output,
            kind,
            x_feature,
            y_feature,
            filters,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("png"));
            cmd_plot(&input, &output, kind, &x_feature, &y_feature, &filters, &config);
        }
    }
}

fn load_table(path: &Path) -> Result<FeatureTable> {
    loaders::load_feature_csv(path).with_context(|| format!("loading {}", path.display()))
}

/// Filters given on the command line win over the configured ones.
fn resolve_filters(cli_filters: &[String], config: &ReviewConfig) -> Result<FilterSet> {
    let set = if cli_filters.is_empty() {
        config.filtering.filter_set()
    } else {
        FilterSet::parse_all(cli_filters)
    };
    set.context("parsing filter expressions")
}

fn cmd_filter(
    input: &Path,
    output: &Path,
    filters: &[String],
    excluded_path: Option<&Path>,
    config: &ReviewConfig,
) {
    let start = Instant::now();
    let spinner = create_spinner("Applying filters...");

    let result = (|| -> Result<(usize, usize, usize)> {
        let table = load_table(input)?;
        let set = resolve_filters(filters, config)?;
        let (included, excluded) = set.apply(&table)?;

        writers::write_table_csv(output, &table.select(&included)?)?;
        if let Some(path) = excluded_path {
            writers::write_table_csv(path, &table.select(&excluded)?)?;
        }
        let kept = included.iter().filter(|&&b| b).count();
        Ok((table.len(), kept, set.len()))
    })();
    let (total, kept, num_filters) = finish_or_exit(spinner, "Filtering", result);

    print_summary(
        "Filtering Complete",
        &[
            ("Input file", input.display().to_string()),
            ("Output file", output.display().to_string()),
            ("Filters", num_filters.to_string()),
            ("Records", total.to_string()),
            ("Included", kept.to_string()),
            ("Excluded", (total - kept).to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}

fn cmd_errant(
    input: &Path,
    filters: &[String],
    features: Vec<String>,
    max_results: Option<usize>,
    output: Option<&Path>,
    config: &ReviewConfig,
) {
    let start = Instant::now();
    let features = if features.is_empty() {
        config.filtering.errant_features.clone()
    } else {
        features
    };
    let max_results = max_results.unwrap_or(config.filtering.max_errant_results);
    let spinner = create_spinner("Searching for near-threshold records...");

    let result = (|| -> Result<Vec<processors::ErrantCandidate>> {
        let table = load_table(input)?;
        let set = resolve_filters(filters, config)?;
        let candidates = processors::select_errant(&table, &set, &features, max_results)?;
        if let Some(path) = output {
            writers::write_errant_csv(path, &candidates)?;
        }
        Ok(candidates)
    })();
    let candidates = finish_or_exit(spinner, "Errant selection", result);

    for (rank, c) in candidates.iter().enumerate() {
        println!("{:>3}. frame {:<6} row {:<7} {}", rank + 1, c.frame, c.row, c.reason());
    }

    print_summary(
        "Errant Selection Complete",
        &[
            ("Input file", input.display().to_string()),
            ("Features", features.join(", ")),
            ("Candidates", candidates.len().to_string()),
            (
                "Output file",
                output.map_or("-".to_string(), |p| p.display().to_string()),
            ),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}

fn cmd_drift(input: &Path, output: &Path, min_length: Option<usize>, config: &ReviewConfig) {
    let start = Instant::now();
    let min_length = min_length.unwrap_or(config.trajectories.min_trajectory_length);
    let spinner = create_spinner("Estimating drift...");

    let result = (|| -> Result<(usize, usize, (f64, f64))> {
        let table = processors::filter_stubs(&load_table(input)?, min_length)?;
        let drift = processors::compute_drift(&table)?;
        let corrected = if config.trajectories.subtract_drift {
            processors::subtract_drift(&table, &drift)
        } else {
            warn!("drift subtraction disabled in config, writing positions unchanged");
            table.clone()
        };
        writers::write_table_csv(output, &corrected)?;
        let last = drift.last().map_or((0.0, 0.0), |d| (d.dx, d.dy));
        Ok((corrected.len(), drift.len(), last))
    })();
    let (rows, frames, (dx, dy)) = finish_or_exit(spinner, "Drift correction", result);

    print_summary(
        "Drift Correction Complete",
        &[
            ("Input file", input.display().to_string()),
            ("Output file", output.display().to_string()),
            ("Rows", rows.to_string()),
            ("Frames", frames.to_string()),
            ("Final drift", format!("({:.3}, {:.3})", dx, dy)),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}

/// Loads a trajectory table and applies stub removal and drift correction
/// as configured, ready for link scoring.
fn load_trajectories(path: &Path, trajectories: &TrajectoryConfig) -> Result<FeatureTable> {
    let table = load_table(path)?;
    if !trajectories.subtract_drift {
        warn!("drift subtraction disabled, scoring raw positions");
    }
    Ok(processors::prepare_trajectories(
        &table,
        trajectories.min_trajectory_length,
        trajectories.subtract_drift,
    )?)
}

fn cmd_links(
    input: &Path,
    params: &processors::LinkScoringParams,
    trajectories: &TrajectoryConfig,
    output: Option<&Path>,
) {
    let start = Instant::now();
    let spinner = create_spinner("Scoring links...");

    let result = (|| -> Result<Vec<processors::LinkScore>> {
        let table = load_trajectories(input, trajectories)?;
        let links = processors::score_links(&table, params)?;
        if let Some(path) = output {
            writers::write_link_scores_csv(path, &links, params)?;
        }
        Ok(links)
    })();
    let links = finish_or_exit(spinner, "Link scoring", result);

    for link in &links {
        println!(
            "particle {:<6} frames {}->{}  score {:.2}",
            link.particle_id, link.frame_i, link.frame_i1, link.score
        );
        for issue in link.issues(params.search_range, params.memory) {
            println!("    {}", issue);
        }
    }

    print_summary(
        "Link Scoring Complete",
        &[
            ("Input file", input.display().to_string()),
            ("search_range", params.search_range.to_string()),
            ("memory", params.memory.to_string()),
            ("Threshold", format!("{:.2}", params.deviation_threshold())),
            ("Links reported", links.len().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}

fn cmd_memory_links(input: &Path, memory: i64, max_links: usize, output: Option<&Path>) {
    let start = Instant::now();
    let spinner = create_spinner("Searching for memory links...");

    let result = (|| -> Result<Vec<processors::MemoryLink>> {
        let table = load_table(input)?;
        let links = processors::find_memory_links(&table, memory, max_links)?;
        if let Some(path) = output {
            writers::write_memory_links_csv(path, &links)?;
        }
        Ok(links)
    })();
    let links = finish_or_exit(spinner, "Memory link search", result);

    for link in &links {
        println!(
            "particle {:<6} missing {} frames ({}->{})",
            link.particle_id, link.memory_used, link.last_frame, link.reappear_frame
        );
    }

    print_summary(
        "Memory Links Complete",
        &[
            ("Input file", input.display().to_string()),
            ("memory", memory.to_string()),
            ("Links reported", links.len().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}

fn cmd_stats(input: &Path, min_length: usize) {
    let start = Instant::now();
    let spinner = create_spinner("Computing trajectory statistics...");

    let result = (|| -> Result<processors::TrajectoryStats> {
        let table = processors::filter_stubs(&load_table(input)?, min_length)?;
        Ok(processors::trajectory_stats(&table)?)
    })();
    let stats = finish_or_exit(spinner, "Statistics", result);

    print_summary(
        "Trajectory Statistics",
        &[
            ("Input file", input.display().to_string()),
            ("Min length", min_length.to_string()),
            ("Trajectories", stats.num_trajectories.to_string()),
            ("Frames", stats.num_frames.to_string()),
            ("Detections", stats.total_detections.to_string()),
            (
                "Length",
                format!("{:.2} ± {:.2}", stats.mean_length, stats.std_length),
            ),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}

fn cmd_plot(
    input: &Path,
    output: &Path,
    kind: PlotKind,
    x_feature: &str,
    y_feature: &str,
    filters: &[String],
    config: &ReviewConfig,
) {
    let start = Instant::now();
    let spinner = create_spinner("Generating plot...");

    let result = (|| -> Result<usize> {
        let table = match kind {
            PlotKind::Scatter => load_table(input)?,
            PlotKind::Trajectories => load_trajectories(input, &config.trajectories)?,
        };
        match kind {
            PlotKind::Scatter => {
                let set = resolve_filters(filters, config)?;
                let included = set.included_mask(&table)?;
                let errant = processors::select_errant(
                    &table,
                    &set,
                    &[x_feature, y_feature],
                    config.filtering.max_errant_results,
                )?;
                let errant_rows: Vec<usize> = errant.iter().map(|c| c.row).collect();
                visualization::plot_feature_scatter(
                    output,
                    &table,
                    x_feature,
                    y_feature,
                    &included,
                    &errant_rows,
                    &config.plot,
                )?;
            }
            PlotKind::Trajectories => {
                let params = config.linking.scoring_params();
                let links = processors::score_links(&table, &params)?;
                visualization::plot_trajectories(output, &table, &links, &config.plot)?;
            }
        }
        Ok(table.len())
    })();
    let rows = finish_or_exit(spinner, "Plotting", result);

    print_summary(
        "Plot Complete",
        &[
            ("Input file", input.display().to_string()),
            ("Output PNG", output.display().to_string()),
            ("Records", rows.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_links_overrides() {
        let cli = Cli::parse_from([
            "particle-review",
            "-vv",
            "links",
            "tracks.csv",
            "--memory",
            "3",
            "-n",
            "5",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Links {
                memory,
                max_results,
                search_range,
                ..
            } => {
                assert_eq!(memory, Some(3));
                assert_eq!(max_results, Some(5));
                assert_eq!(search_range, None);
            }
            _ => panic!("expected links subcommand"),
        }

        let cli = Cli::parse_from(["particle-review", "links", "tracks.csv", "--min-length", "4", "--no-drift"]);
        match cli.command {
            Commands::Links {
                min_length,
                no_drift,
                ..
            } => {
                assert_eq!(min_length, Some(4));
                assert!(no_drift);
            }
            _ => panic!("expected links subcommand"),
        }
    }

    #[test]
    fn test_resolve_filters_prefers_command_line() {
        let mut config = ReviewConfig::default();
        config.filtering.filters = vec!["mass > 1".to_string(), "size < 2".to_string()];

        assert_eq!(resolve_filters(&[], &config).unwrap().len(), 2);
        let set = resolve_filters(&["ecc < 0.3".to_string()], &config).unwrap();
        assert_eq!(set.len(), 1);
        assert!(resolve_filters(&["ecc <".to_string()], &config).is_err());
    }

    #[test]
    fn test_load_trajectories_corrects_drift() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracks.csv");
        // Two particles carried +20 px per frame, plus a one-frame stub
        std::fs::write(
            &path,
            "frame,particle,x,y,mass\n\
             0,1,10.0,10.0,100\n0,2,50.0,10.0,100\n\
             1,1,30.0,10.0,100\n1,2,70.0,10.0,100\n\
             2,1,50.0,10.0,100\n2,2,90.0,10.0,100\n\
             1,7,400.0,400.0,100\n",
        )
        .unwrap();

        let mut trajectories = TrajectoryConfig {
            min_trajectory_length: 2,
            subtract_drift: true,
        };
        let params = processors::LinkScoringParams {
            search_range: 5.0,
            memory: 0,
            ..processors::LinkScoringParams::default()
        };

        let prepared = load_trajectories(&path, &trajectories).unwrap();
        assert_eq!(prepared.len(), 6);
        assert!(processors::score_links(&prepared, &params).unwrap().is_empty());

        trajectories.subtract_drift = false;
        let raw = load_trajectories(&path, &trajectories).unwrap();
        assert_eq!(processors::score_links(&raw, &params).unwrap().len(), 2);
    }
}
