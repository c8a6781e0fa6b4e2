//! Camwatch - motion-triggered camera recorder CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use camwatch_capture::{run_capture, ChannelId, DirectoryCamera};
use camwatch_core::{spawn_catalog_recorder, ChannelHub, Config, QuotaManager, VideoLibrary};
use camwatch_db::Database;
use camwatch_processing::{encoder::check_ffmpeg, FfmpegEncoder, VideoFormat};

#[derive(Parser)]
#[command(name = "camwatch")]
#[command(about = "Motion-triggered camera recording with storage quotas")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for videos and catalog (overrides config)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start capture and recording for all configured cameras
    Run,

    /// Show storage usage, limits and warnings
    Status,

    /// Run one quota enforcement pass
    Enforce,

    /// Reconcile the catalog with the videos directory
    Sync,

    /// List recorded videos, newest first
    List {
        /// Container format to list
        #[arg(short, long, value_enum, default_value = "webm")]
        format: FormatArg,

        /// Group by recording date
        #[arg(long)]
        by_date: bool,
    },

    /// Show catalog details for a video
    Info {
        /// Video filename
        file: String,
    },

    /// Star a video to protect it from routine eviction
    Star {
        /// Video filename
        file: String,

        /// Remove the star instead
        #[arg(long)]
        unset: bool,
    },

    /// Delete a video in every configured format
    Delete {
        /// Video name, with or without extension
        name: String,
    },

    /// Check dependencies (FFmpeg)
    Check,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum FormatArg {
    Webm,
    Mp4,
}

impl From<FormatArg> for VideoFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Webm => VideoFormat::Webm,
            FormatArg::Mp4 => VideoFormat::Mp4,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.general.data_dir = Some(dir);
    }

    match cli.command {
        Commands::Run => cmd_run(config)?,
        Commands::Status => cmd_status(&config)?,
        Commands::Enforce => cmd_enforce(&config)?,
        Commands::Sync => cmd_sync(&config)?,
        Commands::List { format, by_date } => cmd_list(&config, format.into(), by_date)?,
        Commands::Info { file } => cmd_info(&config, &file)?,
        Commands::Star { file, unset } => cmd_star(&config, &file, !unset)?,
        Commands::Delete { name } => cmd_delete(&config, &name)?,
        Commands::Check => cmd_check(),
    }

    Ok(())
}

fn open_catalog(config: &Config) -> Result<Database> {
    let path = config.db_path();
    Database::open(&path).with_context(|| format!("failed to open catalog at {:?}", path))
}

fn spawn_camera(
    camera: &camwatch_core::config::CameraConfig,
    hub: Arc<ChannelHub>,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let channel = ChannelId::new(camera.channel.clone())
        .with_context(|| format!("invalid channel name {:?}", camera.channel))?;
    let mut source = DirectoryCamera::open(&camera.source, camera.repeat)
        .with_context(|| format!("failed to open camera source {:?}", camera.source))?;
    let delay = Duration::from_millis(camera.capture_delay_ms);

    let handle = thread::Builder::new()
        .name(format!("capture-{}", channel))
        .spawn(move || {
            run_capture(&mut source, &channel, delay, running, |frame| {
                if let Err(e) = hub.submit(frame) {
                    error!("failed to start pipeline: {}", e);
                }
            });
        })?;
    Ok(handle)
}

fn cmd_run(config: Config) -> Result<()> {
    if config.cameras.is_empty() {
        anyhow::bail!("no cameras configured; add [[cameras]] entries to the config file");
    }

    let data_dir = config.resolve_data_dir();
    let videos_dir = config.videos_dir();
    std::fs::create_dir_all(&videos_dir)?;

    info!("starting camwatch");
    info!("data directory: {:?}", data_dir);

    if !check_ffmpeg() {
        error!("ffmpeg not found in PATH - please install FFmpeg");
        return Err(anyhow::anyhow!("FFmpeg not found"));
    }

    let db = Arc::new(Mutex::new(open_catalog(&config)?));
    let quota = Arc::new(QuotaManager::new(db, &videos_dir, config.storage.clone()));
    let check_interval = Duration::from_secs(config.storage.check_interval_secs.max(1));

    // Setup signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let hub = Arc::new(ChannelHub::new(config.clone(), Arc::new(FfmpegEncoder::new())));
    let recorder = spawn_catalog_recorder(hub.subscribe(), quota.clone())?;

    let mut captures = Vec::new();
    for camera in &config.cameras {
        match spawn_camera(camera, hub.clone(), running.clone()) {
            Ok(handle) => captures.push(handle),
            Err(e) => warn!("camera {} not started: {:#}", camera.channel, e),
        }
    }
    if captures.is_empty() {
        anyhow::bail!("no camera could be started");
    }
    info!("{} camera(s) started", captures.len());

    let mut last_check: Option<Instant> = None;
    while running.load(Ordering::SeqCst) {
        if last_check.map_or(true, |t| t.elapsed() >= check_interval) {
            match quota.enforce_quota() {
                Ok(report) => {
                    if !report.evicted.is_empty() {
                        info!("periodic check evicted {} video(s)", report.evicted.len());
                    }
                }
                Err(e) => error!("quota enforcement failed: {:#}", e),
            }
            last_check = Some(Instant::now());
        }

        // Finite sources: stop once every camera ended and its queue drained
        let captures_done = captures.iter().all(|h| h.is_finished());
        if captures_done && hub.backlogs().iter().all(|(_, backlog)| *backlog == 0) {
            info!("all camera sources ended");
            break;
        }

        thread::sleep(Duration::from_millis(200));
    }

    running.store(false, Ordering::SeqCst);
    info!("stopping...");
    for handle in captures {
        if handle.join().is_err() {
            error!("capture thread panicked");
        }
    }
    for (channel, stats) in hub.shutdown() {
        info!(
            "channel {}: {} clip(s) written, {} discarded",
            channel, stats.clips_written, stats.clips_discarded
        );
    }

    // Last sender gone: the recorder drains remaining events and exits
    drop(hub);
    if recorder.join().is_err() {
        error!("catalog recorder panicked");
    }

    info!("camwatch stopped");
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let db_path = config.db_path();
    if !db_path.exists() {
        println!("status: not initialized");
        println!("catalog: not found");
        return Ok(());
    }

    let db = Arc::new(Mutex::new(open_catalog(config)?));
    let quota = QuotaManager::new(db.clone(), config.videos_dir(), config.storage.clone());
    let usage = quota.space_usage()?;
    let storage = quota.config();

    println!("catalog: {:?}", db_path);
    println!(
        "total:   {} / {} ({:.1}%)",
        format_bytes(usage.total_bytes),
        format_bytes(storage.total_limit_bytes),
        percent(usage.total_bytes, storage.total_limit_bytes)
    );
    println!(
        "starred: {} / {} ({:.1}%)",
        format_bytes(usage.starred_bytes),
        format_bytes(storage.starred_limit_bytes),
        percent(usage.starred_bytes, storage.starred_limit_bytes)
    );

    let db = db.lock().unwrap_or_else(|p| p.into_inner());
    let counts = camwatch_db::get_channel_counts(db.connection())?;
    if !counts.is_empty() {
        println!("\nvideos per channel:");
        for (channel, count) in counts {
            println!("  {:<20} {}", channel, count);
        }
    }

    let pending = camwatch_db::list_removal_failures(db.connection())?;
    if !pending.is_empty() {
        println!("\npending removals: {}", pending.len());
        for failure in pending {
            println!("  {} ({} attempts): {}", failure.path, failure.attempts, failure.error);
        }
    }
    drop(db);

    let warnings = quota.warnings()?;
    if !warnings.is_empty() {
        println!();
        for warning in warnings {
            println!("WARNING: {}", warning);
        }
    }

    Ok(())
}

fn cmd_enforce(config: &Config) -> Result<()> {
    let db = Arc::new(Mutex::new(open_catalog(config)?));
    let quota = QuotaManager::new(db, config.videos_dir(), config.storage.clone());
    let report = quota.enforce_quota()?;

    for warning in &report.warnings {
        println!("WARNING: {}", warning);
    }
    if report.evicted.is_empty() {
        println!("nothing to evict");
    } else {
        println!("evicted {} video(s):", report.evicted.len());
        for name in &report.evicted {
            println!("  {}", name);
        }
    }
    Ok(())
}

fn cmd_sync(config: &Config) -> Result<()> {
    let videos_dir = config.videos_dir();
    std::fs::create_dir_all(&videos_dir)?;
    let db = open_catalog(config)?;
    let report = camwatch_db::sync_with_directory(db.connection(), &videos_dir)?;

    println!("added {} video(s), removed {} record(s)", report.added.len(), report.removed.len());
    for name in &report.added {
        println!("  + {}", name);
    }
    for name in &report.removed {
        println!("  - {}", name);
    }
    Ok(())
}

fn cmd_list(config: &Config, format: VideoFormat, by_date: bool) -> Result<()> {
    let library = VideoLibrary::new(config.videos_dir(), config.recording.formats.clone());

    if by_date {
        let groups = library.filenames_by_date(format)?;
        if groups.is_empty() {
            println!("no {} videos in {:?}", format, library.dir());
        }
        for (date, names) in groups.iter().rev() {
            println!("{} ({})", date, names.len());
            for name in names {
                println!("  {}", name);
            }
        }
    } else {
        let names = library.list_filenames(format)?;
        if names.is_empty() {
            println!("no {} videos in {:?}", format, library.dir());
        }
        for name in names {
            println!("{}", name);
        }
    }
    Ok(())
}

fn cmd_info(config: &Config, file: &str) -> Result<()> {
    let db = open_catalog(config)?;
    match camwatch_db::get_video_info(db.connection(), file)? {
        Some(video) => println!("{}", serde_json::to_string_pretty(&video)?),
        None => anyhow::bail!("no catalogued video named {}", file),
    }
    Ok(())
}

fn cmd_star(config: &Config, file: &str, starred: bool) -> Result<()> {
    let db = open_catalog(config)?;
    if !camwatch_db::set_starred(db.connection(), file, starred)? {
        anyhow::bail!("no catalogued video named {}", file);
    }
    println!("{} {}", if starred { "starred" } else { "unstarred" }, file);
    Ok(())
}

fn cmd_delete(config: &Config, name: &str) -> Result<()> {
    let library = VideoLibrary::new(config.videos_dir(), config.recording.formats.clone());
    let removed = library.delete_video(name)?;

    let db = open_catalog(config)?;
    for filename in &removed {
        camwatch_db::mark_video_deleted(db.connection(), filename)?;
        println!("deleted {}", filename);
    }
    Ok(())
}

fn cmd_check() {
    println!("checking dependencies...\n");

    let ffmpeg_ok = check_ffmpeg();
    println!("  ffmpeg: {}", if ffmpeg_ok { "OK" } else { "NOT FOUND" });
    println!();

    if !ffmpeg_ok {
        println!("WARNING: FFmpeg is required for video encoding.");
        println!("Please install FFmpeg and ensure it's in your PATH.");
    } else {
        println!("all checks passed!");
    }
}

fn percent(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    used as f64 * 100.0 / limit as f64
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
