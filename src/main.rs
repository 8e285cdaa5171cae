mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use sv_av::{BackendSelector, MediaProbe, Operation, ToolRegistry};
use sv_core::config::Config;
use sv_core::events::JobEvent;
use sv_core::{JobId, JobStatus, JobStore, MediaId};
use sv_db::{init_pool, SqliteJobStore};
use sv_transcode::{
    select_optimal, DeviceHints, EngineDeps, JobManager, JobOptions, ProfileCatalog,
    ProfileOverrides,
};
use tokio::sync::broadcast::error::RecvError;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "streamvio=debug,sv_transcode=debug,sv_av=debug,sv_db=debug,sv_core=debug".to_string()
        } else {
            "streamvio=info,sv_transcode=info,sv_av=warn,sv_db=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Probe { file, json } => block_on(probe_file(config_path, &file, json)),
        Commands::Transcode {
            file,
            profile,
            media_id,
            width,
            height,
            video_bitrate,
            audio_bitrate,
            force,
        } => {
            let overrides = ProfileOverrides {
                width,
                height,
                video_bitrate_kbps: video_bitrate,
                audio_bitrate_kbps: audio_bitrate,
                ..Default::default()
            };
            let options = JobOptions::single_file(profile)
                .with_overrides(overrides)
                .force(force);
            block_on(run_job(config_path, &file, MediaId(media_id), options))
        }
        Commands::Hls {
            file,
            max_height,
            media_id,
            force,
        } => block_on(run_job(
            config_path,
            &file,
            MediaId(media_id),
            JobOptions::hls(max_height).force(force),
        )),
        Commands::Thumbnail {
            file,
            offset,
            media_id,
        } => block_on(run_job(
            config_path,
            &file,
            MediaId(media_id),
            JobOptions::thumbnail(offset).force(true),
        )),
        Commands::Storyboard {
            file,
            count,
            media_id,
            force,
        } => {
            let count = count.unwrap_or_else(|| load_config(config_path).transcode.storyboard_frames);
            block_on(run_job(
                config_path,
                &file,
                MediaId(media_id),
                JobOptions::storyboard(count).force(force),
            ))
        }
        Commands::Status { job_id, json } => show_status(config_path, job_id, json),
        Commands::SelectProfile {
            mobile,
            tablet,
            connection,
            bandwidth,
        } => {
            select_profile(&DeviceHints {
                is_mobile: mobile,
                is_tablet: tablet,
                connection_type: connection,
                bandwidth_kbps: bandwidth,
            });
            Ok(())
        }
        Commands::Profiles => {
            list_profiles();
            Ok(())
        }
        Commands::CheckTools => {
            check_tools(&load_config(config_path));
            Ok(())
        }
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("streamvio {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn block_on<F: std::future::Future<Output = Result<()>>>(fut: F) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(fut)
}

fn load_config(path: Option<&Path>) -> Config {
    Config::load_or_default(path)
}

fn open_store(config: &Config) -> Result<Arc<SqliteJobStore>> {
    let db_path = &config.storage.db_path;
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    tracing::debug!(path = %db_path.display(), "opening job database");
    let pool = init_pool(db_path)?;
    Ok(Arc::new(SqliteJobStore::new(pool)))
}

/// Run one job to settlement, streaming its events. Ctrl-C cancels it.
async fn run_job(
    config_path: Option<&Path>,
    input: &Path,
    media_id: MediaId,
    options: JobOptions,
) -> Result<()> {
    let config = load_config(config_path);
    std::fs::create_dir_all(&config.storage.output_dir)
        .with_context(|| format!("creating {}", config.storage.output_dir.display()))?;
    let store = open_store(&config)?;
    let manager = JobManager::new(EngineDeps::from_config(&config, store))?;

    let mut events = manager.events().subscribe();
    let handle = manager.start_job(media_id, input, options).await?;
    let job_id = handle.job_id;
    println!("Job {job_id} ({}) -> {}", handle.kind, handle.output_path.display());

    if !handle.status.is_terminal() {
        let printer = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.payload.job_id() == job_id => {
                        print_event(&event.payload);
                        if event.payload.is_terminal() {
                            break;
                        }
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });

        tokio::select! {
            result = manager.wait(job_id) => { result?; }
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted; cancelling job {job_id}");
                manager.cancel_job(job_id)?;
                manager.wait(job_id).await?;
            }
        }
        printer.abort();
    }

    let done = manager.get_status(job_id)?;
    match done.status {
        JobStatus::Completed => {
            println!("Completed: {}", done.output_path.display());
            if let Some(ladder) = manager.ladder(job_id) {
                for variant in &ladder.variants {
                    println!(
                        "  {} ({} kbps): {}",
                        variant.name,
                        variant.bitrate_kbps,
                        variant.playlist_path.display()
                    );
                }
            }
            Ok(())
        }
        status => {
            let reason = done.error.unwrap_or_else(|| status.to_string());
            anyhow::bail!("Job {job_id} {status}: {reason}")
        }
    }
}

fn print_event(event: &JobEvent) {
    match event {
        JobEvent::Started { .. } => println!("Started"),
        JobEvent::Progress { percent, .. } => println!("Progress: {percent}%"),
        JobEvent::Completed { .. } => {}
        JobEvent::Failed { error, .. } => println!("Failed: {error}"),
        JobEvent::Cancelled { .. } => println!("Cancelled"),
    }
}

async fn probe_file(config_path: Option<&Path>, file: &Path, json: bool) -> Result<()> {
    let config = load_config(config_path);
    let selector = BackendSelector::new(ToolRegistry::discover(&config.tools));
    let info = selector.probe(file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File: {}", info.path.display());
    println!("Container: {}", info.format);
    match info.duration() {
        Some(duration) => {
            let secs = duration.as_secs();
            println!("Duration: {:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60);
        }
        None => println!("Duration: unknown"),
    }
    if let Some(ref codec) = info.video_codec {
        print!("Video: {codec} {}x{}", info.width, info.height);
        if let Some(kbps) = info.video_bitrate_kbps {
            print!(" @ {kbps} kbps");
        }
        println!();
    }
    if let Some(ref codec) = info.audio_codec {
        print!("Audio: {codec}");
        if let Some(channels) = info.audio_channels {
            print!(" {channels}ch");
        }
        if let Some(rate) = info.audio_sample_rate {
            print!(" {rate} Hz");
        }
        println!();
    }
    Ok(())
}

fn show_status(config_path: Option<&Path>, job_id: JobId, json: bool) -> Result<()> {
    let config = load_config(config_path);
    let store = open_store(&config)?;
    let Some(job) = store.get(job_id)? else {
        anyhow::bail!("Job {job_id} not found");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }

    println!("Job: {}", job.id);
    println!("Kind: {}", job.kind);
    println!("Status: {}", job.status);
    println!("Progress: {}%", job.progress_percent);
    println!("Input: {}", job.input_path.display());
    println!("Output: {}", job.output_path.display());
    if let Some(ref profile) = job.profile_name {
        println!("Profile: {profile}");
    }
    if let Some(ref error) = job.error_message {
        println!("Error: {error}");
    }
    Ok(())
}

fn select_profile(hints: &DeviceHints) {
    let name = select_optimal(hints);
    let catalog = ProfileCatalog::builtin();
    let profile = catalog.lookup(name);
    println!(
        "{} ({}, {} kbps video, {} kbps audio)",
        profile.name,
        profile.resolution(),
        profile.video_bitrate_kbps,
        profile.audio_bitrate_kbps
    );
}

fn list_profiles() {
    println!(
        "{:<12} {:>10} {:>8} {:>8} {:<6} {:<6} {:<4}",
        "NAME", "SIZE", "VIDEO", "AUDIO", "VCODEC", "ACODEC", "EXT"
    );
    for p in ProfileCatalog::builtin().iter() {
        println!(
            "{:<12} {:>10} {:>8} {:>8} {:<6} {:<6} {:<4}",
            p.name,
            p.resolution(),
            p.video_bitrate_kbps,
            p.audio_bitrate_kbps,
            p.video_codec,
            p.audio_codec,
            p.container
        );
    }
}

fn check_tools(config: &Config) {
    println!("Checking external tools...\n");

    let registry = ToolRegistry::discover(&config.tools);
    for tool in registry.check_all() {
        let status = if tool.available { "✓" } else { "✗" };
        print!("{status} {}", tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    let selector = BackendSelector::new(registry);
    let mut all_ok = true;
    for op in [
        Operation::Probe,
        Operation::Transcode,
        Operation::Thumbnail,
        Operation::Hls,
    ] {
        match selector.select(op) {
            Ok(backend) => println!("{op}: {backend}"),
            Err(_) => {
                all_ok = false;
                println!("{op}: unavailable");
            }
        }
    }

    println!();
    if all_ok {
        println!("All operations have a usable backend.");
    } else {
        println!("Some operations have no backend. Install ffmpeg or the native transcoder.");
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("reading {}", p.display()))?;
            Config::from_json(&contents)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        println!("Configuration has {} warning(s):", warnings.len());
        for warning in &warnings {
            println!("  - {warning}");
        }
    }
    println!("  Output dir: {}", config.storage.output_dir.display());
    println!("  Database: {}", config.storage.db_path.display());
    println!("  Max concurrent jobs: {}", config.transcode.concurrency());
    match config.transcode.job_timeout() {
        Some(limit) => println!("  Job timeout: {}s", limit.as_secs()),
        None => println!("  Job timeout: none"),
    }
    Ok(())
}
