mod cli;

use reelhaul::config;
use reelhaul::context::AppContext;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands, SelectionArgs};
use rh_core::{JobId, JobPayload, ProgressSample};
use rh_pipeline::{JobQueue, Plan};
use rh_probe::{ProbeResult, Prober, TrackDescriptor};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise -v raises the level step by step.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        match cli.verbose {
            0 => "warn,reelhaul=info",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
        .to_string()
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Probe { file, json } => {
            let ctx = AppContext::new(config::load_config_or_default(cli.config.as_deref())?);
            runtime()?.block_on(probe_file(&ctx, &file, json))
        }
        Commands::Plan {
            file,
            output,
            selection,
            json,
        } => {
            let ctx = AppContext::new(config::load_config_or_default(cli.config.as_deref())?);
            runtime()?.block_on(plan_file(&ctx, &file, &output, &selection, json))
        }
        Commands::Convert {
            file,
            output,
            selection,
        } => {
            let ctx = AppContext::new(config::load_config_or_default(cli.config.as_deref())?);
            runtime()?.block_on(convert_file(&ctx, &file, &output, &selection))
        }
        Commands::CheckTools => {
            let ctx = AppContext::new(config::load_config_or_default(cli.config.as_deref())?);
            runtime()?.block_on(check_tools(&ctx))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("reelhaul {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start async runtime")
}

fn require_file(file: &Path) -> Result<()> {
    if !file.exists() {
        bail!("File does not exist: {}", file.display());
    }
    Ok(())
}

async fn probe(ctx: &AppContext, file: &Path) -> Result<ProbeResult> {
    require_file(file)?;
    let prober = ctx.prober()?;
    tracing::info!(file = %file.display(), prober = prober.name(), "Probing");
    Ok(prober.probe(file).await?)
}

fn describe(track: &TrackDescriptor) -> String {
    let codec = track.codec.as_deref().unwrap_or("unknown");
    let mut line = format!("  [{}] {}", track.relative_index, codec);
    if let Some(ref lang) = track.language {
        line.push_str(&format!(" ({lang})"));
    }
    if let Some(ref title) = track.title {
        line.push_str(&format!(" \"{title}\""));
    }
    line.push_str(&format!(" {} bytes", track.byte_size));
    line
}

async fn probe_file(ctx: &AppContext, file: &Path, json: bool) -> Result<()> {
    let result = probe(ctx, file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    let secs = result.duration_secs;
    println!(
        "Duration: {:02}:{:02}:{:02}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60
    );
    println!("\nVideo:");
    println!("{}", describe(&result.video));

    println!("\nAudio Tracks: {}", result.audio.len());
    for track in &result.audio {
        println!("{}", describe(track));
    }

    println!("\nSubtitle Tracks: {}", result.subtitle.len());
    for track in &result.subtitle {
        println!(
            "{} [{:?}, {} chars]",
            describe(track),
            track.subtitle_kind,
            track.text_length
        );
    }
    Ok(())
}

async fn build_plan(
    ctx: &AppContext,
    file: &Path,
    output: &Path,
    selection: &SelectionArgs,
) -> Result<Plan> {
    let result = probe(ctx, file).await?;
    let conversion = &ctx.config.conversion;
    let prefs = selection.preferences(
        conversion.audio_language.as_deref(),
        conversion.subtitle_language.as_deref(),
    );
    Ok(ctx.producer()?.plan(file, output, &result, &prefs)?)
}

async fn plan_file(
    ctx: &AppContext,
    file: &Path,
    output: &Path,
    selection: &SelectionArgs,
    json: bool,
) -> Result<()> {
    let plan = build_plan(ctx, file, output, selection).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    match &plan.selections.audio {
        Some(audio) => println!("Audio: {audio:?}"),
        None => println!("Audio: none"),
    }
    match &plan.selections.subtitle {
        Some(sub) => println!("Subtitle: {sub:?}"),
        None => println!("Subtitle: none"),
    }
    println!("\n{}", plan.command);
    Ok(())
}

fn print_progress(sample: &ProgressSample) {
    let eta = if sample.eta_unknown() {
        "?".to_string()
    } else {
        format!("{}s", sample.eta_secs)
    };
    eprint!(
        "\r{:3}%  elapsed {}s  eta {}  speed {}/s   ",
        sample.progress_pct, sample.elapsed_secs, eta, sample.speed
    );
}

async fn convert_file(
    ctx: &AppContext,
    file: &Path,
    output: &Path,
    selection: &SelectionArgs,
) -> Result<()> {
    let mut plan = build_plan(ctx, file, output, selection).await?;
    plan.command.log_path(output.with_extension("log"));
    println!("{}", plan.command);

    let (queue, mut events) = JobQueue::start(1)?;
    let id = JobId::new(1);
    queue.enqueue(id, plan.command).await?;

    let mut cancelling = false;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    bail!("job queue stopped before the conversion finished");
                };
                match event.payload {
                    JobPayload::Started => tracing::info!(job_id = %id, "Conversion started"),
                    JobPayload::Line(line) => tracing::trace!(job_id = %id, "{line}"),
                    JobPayload::Progress(sample) => print_progress(&sample),
                    JobPayload::Terminal(Ok(())) => {
                        eprintln!();
                        println!("Output: {}", output.display());
                        return Ok(());
                    }
                    JobPayload::Terminal(Err(e)) => {
                        eprintln!();
                        let err = rh_core::Error::from(e);
                        if err.is_cancelled() {
                            tracing::warn!(job_id = %id, "Conversion cancelled");
                        }
                        return Err(err).context("conversion did not finish");
                    }
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                cancelling = true;
                eprintln!("\nCancelling...");
                queue.cancel(id).await?;
            }
        }
    }
}

async fn check_tools(ctx: &AppContext) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = ctx.tools.check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all features.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("  Conversion workers: {}", config.conversion.workers);
    println!("  Output dir: {}", config.conversion.output_dir.display());
    println!("  Acquisition data dir: {}", config.acquisition.data_dir.display());
    println!("  Poll interval: {}s", config.acquisition.poll_interval_secs);

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &warnings {
            println!("  ! {warning}");
        }
    }

    Ok(())
}
