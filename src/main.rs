use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use voxpipe::backends;
use voxpipe::config::Config;
use voxpipe::defaults;
use voxpipe::pipeline::{Pipeline, PipelineConfig, PipelineMode};
use voxpipe::server;

/// Local voice assistant runtime
#[derive(Parser, Debug)]
#[command(name = "voxpipe", version, about = "Local voice assistant runtime")]
struct Cli {
    /// Run in text-request server mode (default: voice assistant)
    #[arg(long)]
    server: bool,

    /// Path to model/settings JSON
    #[arg(short = 'c', long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Unix-domain socket path for the text server
    #[arg(short = 's', long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Enable periodic pipeline statistics logging
    #[arg(long)]
    stats: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // SIGINT/SIGTERM set the shared interrupt flag; every blocking channel
    // pop observes it, and the main loop turns it into a clean stop.
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            log::warn!("failed to register signal handler: {e}");
        }
    }

    let result = run(&cli, shutdown);
    if let Err(e) = result {
        log::error!("{e:#}");
        eprintln!("voxpipe: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli, shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(defaults::CONFIG_PATH));
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?
        .with_env_overrides();

    if cli.server {
        run_server_mode(cli, &config, shutdown)
    } else {
        run_voice_mode(cli, &config, shutdown)
    }
}

/// Full voice-assistant session: mic to speaker, until a signal arrives.
fn run_voice_mode(cli: &Cli, config: &Config, shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    let (stt, llm, tts) =
        backends::dev::from_config(&config.models).context("building backends")?;

    let mode = if config.settings.pipeline.enable_alt_text {
        PipelineMode::VoiceAssistantWithText
    } else {
        PipelineMode::VoiceAssistant
    };
    let mut pipeline_config = PipelineConfig::from_config(config, mode);
    pipeline_config.enable_stats_logging = cli.stats;

    let mut pipeline = Pipeline::new(pipeline_config);
    pipeline.set_interrupt_flag(Arc::clone(&shutdown));
    pipeline
        .initialize(Some(stt), Some(llm), Some(tts))
        .context("initializing pipeline")?;
    pipeline.start().context("starting pipeline")?;

    log::info!("listening for speech (Ctrl+C to stop)");

    while !shutdown.load(Ordering::Acquire) && pipeline.is_running() {
        std::thread::sleep(Duration::from_millis(100));
    }

    pipeline.stop();
    Ok(())
}

/// Headless text mode: LLM only behind the Unix socket server.
fn run_server_mode(cli: &Cli, config: &Config, shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    let (_, llm, _) = backends::dev::from_config(&config.models).context("building backends")?;

    let mut pipeline_config = PipelineConfig::from_config(config, PipelineMode::TextOnly);
    pipeline_config.enable_stats_logging = cli.stats;

    let mut pipeline = Pipeline::new(pipeline_config);
    pipeline.set_interrupt_flag(Arc::clone(&shutdown));
    pipeline
        .initialize(None, Some(llm), None)
        .context("initializing pipeline")?;
    pipeline.start().context("starting pipeline")?;

    let socket_path = cli
        .socket
        .clone()
        .unwrap_or_else(|| PathBuf::from(defaults::SERVER_SOCKET_PATH));
    let pipeline = Arc::new(pipeline);

    let serve_result = server::run(&socket_path, Arc::clone(&pipeline), shutdown);

    pipeline.stop();
    serve_result.context("text-request server")?;
    Ok(())
}
