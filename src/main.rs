use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

use stridelog::import::batch::{collect_track_files, BatchImporter, ImportFile};
use stridelog::import::csv::{CsvMetadataImporter, MetadataTable};
use stridelog::logging::{init_logging, LogLevel};
use stridelog::zones::HRZoneMethod;
use stridelog::{AppConfig, Database, ImportOutcome, Session, SessionService, Units};

/// stridelog - run tracking ingestion and analytics
///
/// Imports GPX and FIT tracks, derives splits, best efforts and relative
/// effort, and keeps them consistent when sessions are cropped or deleted.
#[derive(Parser)]
#[command(name = "stridelog")]
#[command(version)]
#[command(about = "Run tracking ingestion and analytics", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use this database instead of the configured one
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import track files or directories of track files
    Import {
        /// Track files (GPX, FIT, FIT.GZ) or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// File format (auto-detect if not specified)
        #[arg(short = 'f', long)]
        format: Option<String>,

        /// Activity export table (CSV) describing the tracks
        #[arg(short, long)]
        metadata: Option<PathBuf>,

        /// Write the batch audit trail as JSON
        #[arg(long, value_name = "FILE")]
        audit: Option<PathBuf>,
    },

    /// List stored sessions
    List {
        /// Number of most recent sessions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Trim time from the start and end of a session
    Crop {
        id: String,

        /// Seconds removed from the start
        #[arg(long, default_value = "0")]
        start: f64,

        /// Seconds removed from the end
        #[arg(long, default_value = "0")]
        end: f64,
    },

    /// Re-derive a session from its original file
    Recompute { id: String },

    /// Show the best-effort leaderboard
    BestEfforts {
        /// Rebuild the leaderboard from every session first
        #[arg(long)]
        recalculate: bool,
    },

    /// Re-score relative effort with the configured zones
    RelativeEffort {
        #[arg(long)]
        recalculate: bool,
    },

    /// Delete a session
    Delete { id: String },

    /// Show or update configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,

        /// Write the default configuration file
        #[arg(long)]
        init: bool,

        /// Derive heart-rate zones from a lactate threshold heart rate
        #[arg(long, value_name = "BPM", conflicts_with = "max_hr")]
        lthr: Option<u16>,

        /// Derive heart-rate zones from a maximum heart rate
        #[arg(long, value_name = "BPM")]
        max_hr: Option<u16>,
    },
}

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Distance")]
    distance: String,
    #[tabled(rename = "Time")]
    duration: String,
    #[tabled(rename = "Pace")]
    pace: String,
    #[tabled(rename = "Effort")]
    effort: String,
}

#[derive(Tabled)]
struct EffortRow {
    #[tabled(rename = "Distance")]
    distance: String,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Session")]
    session: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_config_path);
    let mut config = if config_path.exists() {
        AppConfig::load_from_file(&config_path)?
    } else {
        AppConfig::default()
    };

    let mut log_config = config.logging.clone();
    log_config.level = match cli.verbose {
        0 => log_config.level,
        1 => LogLevel::Info,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };
    init_logging(&log_config)?;

    if let Commands::Config { show, init, lthr, max_hr } = &cli.command {
        return run_config(&mut config, &config_path, *show, *init, *lthr, *max_hr);
    }

    let db_path = cli.database.clone().unwrap_or_else(|| config.database_path());
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
    }
    let db = Database::new(&db_path).with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    let mut service = SessionService::from_config(db, &config)?;
    let units = config.settings.units;

    match cli.command {
        Commands::Import {
            paths,
            format,
            metadata,
            audit,
        } => {
            let table = match &metadata {
                Some(path) => load_metadata(path)?,
                None => MetadataTable::default(),
            };

            if paths.len() == 1 && paths[0].is_file() && metadata.is_none() && audit.is_none() {
                import_single(&mut service, &paths[0], format.as_deref(), units)?;
            } else {
                let mut files = Vec::new();
                for path in &paths {
                    for file in collect_track_files(path)
                        .with_context(|| format!("Failed to read {}", path.display()))?
                    {
                        let mut import = ImportFile::from_path(&file)?;
                        import.format_hint = format.clone();
                        files.push(import);
                    }
                }

                println!("{}", format!("Importing {} files...", files.len()).green().bold());
                let importer = BatchImporter::new(config.import.clone());
                let report = service.bulk_import_with(&importer, &files, &table)?;

                println!("{}", report.summary.to_string_pretty());
                for error in &report.summary.errors {
                    println!("  {} {}: {}", "✗".red(), error.file, error.message);
                }
                if let Some(audit_path) = audit {
                    std::fs::write(&audit_path, report.audit.export_json()?)
                        .with_context(|| format!("Failed to write audit trail: {}", audit_path.display()))?;
                    println!("{}", format!("Audit trail written to {}", audit_path.display()).dimmed());
                }
            }
        }

        Commands::List { limit } => {
            let sessions = service.sessions()?;
            if sessions.is_empty() {
                println!("{}", "No sessions stored yet".yellow());
                return Ok(());
            }
            let skip = sessions.len().saturating_sub(limit);
            let rows: Vec<SessionRow> = sessions[skip..]
                .iter()
                .rev()
                .map(|s| session_row(s, units))
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
            println!("{}", format!("{} of {} sessions", sessions.len() - skip, sessions.len()).dimmed());
        }

        Commands::Crop { id, start, end } => {
            let cropped = service.crop_session(&id, start, end).map_err(user_error)?;
            println!("{}", "✓ Session cropped".green());
            print_session(&cropped, units);
        }

        Commands::Recompute { id } => {
            let session = service.recompute_session(&id).map_err(user_error)?;
            println!("{}", "✓ Session re-derived from its original file".green());
            print_session(&session, units);
        }

        Commands::BestEfforts { recalculate } => {
            if recalculate {
                let summary = service.recalculate_best_efforts().map_err(user_error)?;
                println!(
                    "{}",
                    format!(
                        "✓ Rebuilt {} records from {} sessions",
                        summary.count, summary.sessions_scanned
                    )
                    .green()
                );
                for error in &summary.errors {
                    println!("  {} {}", "✗".red(), error);
                }
            }

            let records = service.best_efforts()?;
            if records.is_empty() {
                println!("{}", "No best efforts yet".yellow());
                return Ok(());
            }
            let rows: Vec<EffortRow> = records
                .into_iter()
                .map(|r| EffortRow {
                    distance: r.distance_label,
                    time: format_duration(r.achieved_time_s),
                    date: r
                        .session_date
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_default(),
                    session: short_id(&r.session_id),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }

        Commands::RelativeEffort { recalculate } => {
            if !recalculate {
                println!("{}", "Pass --recalculate to re-score every session".yellow());
                return Ok(());
            }
            let summary = service.recalculate_relative_effort(config.zones.clone())?;
            println!(
                "{}",
                format!(
                    "✓ Updated relative effort on {} of {} sessions",
                    summary.updated_count, summary.sessions_scanned
                )
                .green()
            );
            for error in &summary.errors {
                println!("  {} {}", "✗".red(), error);
            }
        }

        Commands::Delete { id } => {
            if service.delete_session(&id)? {
                println!("{}", format!("✓ Deleted session {}", id).green());
            } else {
                println!("{}", format!("No session with id {}", id).yellow());
            }
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

fn run_config(
    config: &mut AppConfig,
    path: &Path,
    show: bool,
    init: bool,
    lthr: Option<u16>,
    max_hr: Option<u16>,
) -> Result<()> {
    let zones = match (lthr, max_hr) {
        (Some(bpm), _) => Some((bpm, HRZoneMethod::Lthr)),
        (None, Some(bpm)) => Some((bpm, HRZoneMethod::MaxHr)),
        (None, None) => None,
    };

    if let Some((bpm, method)) = zones {
        config.set_zones_from_threshold(bpm, method)?;
        config.save_to_file(path)?;
        println!("{}", "✓ Heart-rate zones updated".green());
        for (i, zone) in config.zones.zones.iter().enumerate() {
            println!("  Zone {}: {}-{} bpm", i + 1, zone.min, zone.max);
        }
        println!("{}", "Run `stridelog relative-effort --recalculate` to re-score sessions".dimmed());
    } else if init {
        config.save_to_file(path)?;
        println!("{}", format!("✓ Configuration written to {}", path.display()).green());
    }

    if show || (!init && zones.is_none()) {
        println!("{}", format!("# {}", path.display()).dimmed());
        println!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}

fn load_metadata(path: &Path) -> Result<MetadataTable> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let table = CsvMetadataImporter::new().parse(&bytes)?;
    for warning in &table.warnings {
        println!("  {} {}", "!".yellow(), warning);
    }
    Ok(table)
}

fn import_single(
    service: &mut SessionService<Database>,
    path: &Path,
    format: Option<&str>,
    units: Units,
) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path.to_string_lossy();

    match service.import_track(bytes, &filename, format).map_err(user_error)? {
        ImportOutcome::Imported { session, warnings } => {
            println!("{}", "✓ Import completed successfully".green());
            for warning in warnings {
                println!("  {} {}", "!".yellow(), warning);
            }
            print_session(&session, units);
        }
        ImportOutcome::Duplicate { existing_id } => {
            println!(
                "{}",
                format!("Skipped: duplicate of session {}", short_id(&existing_id)).yellow()
            );
        }
    }
    Ok(())
}

fn user_error(e: stridelog::StrideError) -> anyhow::Error {
    anyhow::anyhow!(e.user_message())
}

fn print_session(session: &Session, units: Units) {
    let stats = &session.stats;
    println!("  {} {}", "Session:".bold(), session.id);
    println!("  {} {}", "Name:".bold(), session.display_name());
    if let Some(start) = stats.started_at {
        println!("  {} {}", "Start:".bold(), start.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("  {} {}", "Distance:".bold(), format_distance(stats.distance_m, units));
    println!("  {} {}", "Duration:".bold(), format_duration(stats.duration_s));
    println!("  {} {}", "Pace:".bold(), format_pace(stats.avg_pace_s, units));
    println!(
        "  {} +{:.0} m / -{:.0} m",
        "Elevation:".bold(),
        stats.elevation_gain_m,
        stats.elevation_loss_m
    );
    if let Some(hr) = stats.avg_heart_rate {
        println!("  {} {} bpm (max {})", "Heart rate:".bold(), hr, stats.max_heart_rate.unwrap_or(hr));
    }
    if let Some(effort) = session.relative_effort {
        println!("  {} {}", "Relative effort:".bold(), effort);
    }
    for split in &session.splits {
        println!(
            "    #{:<3} {:>8}  {}",
            split.index,
            format_duration(split.duration_s),
            split
                .avg_heart_rate
                .map(|hr| format!("{} bpm", hr))
                .unwrap_or_default()
        );
    }
}

fn session_row(session: &Session, units: Units) -> SessionRow {
    let stats = &session.stats;
    SessionRow {
        id: short_id(&session.id),
        date: stats
            .started_at
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string()),
        name: session.display_name(),
        distance: format_distance(stats.distance_m, units),
        duration: format_duration(stats.duration_s),
        pace: format_pace(stats.avg_pace_s, units),
        effort: session
            .relative_effort
            .map(|e| e.to_string())
            .unwrap_or_else(|| "-".to_string()),
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn format_distance(meters: f64, units: Units) -> String {
    match units {
        Units::Metric => format!("{:.2} km", meters / 1000.0),
        Units::Imperial => format!("{:.2} mi", meters / Units::Imperial.split_length_m()),
    }
}

fn format_duration(seconds: f64) -> String {
    let total = seconds.round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

fn format_pace(seconds_per_km: Option<f64>, units: Units) -> String {
    let Some(pace) = seconds_per_km else {
        return "-".to_string();
    };
    match units {
        Units::Metric => format!("{} /km", format_duration(pace)),
        Units::Imperial => format!("{} /mi", format_duration(pace * Units::Imperial.split_length_m() / 1000.0)),
    }
}
