use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use macemu_gateway::config::GatewayConfig;
use macemu_gateway::state::GatewayState;
use macemu_gateway::video::VideoPipeline;
use macemu_gateway::web;
use macemu_gateway::webrtc::PeerSessionManager;

/// Log level for the gateway
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// macemu-gateway command line arguments
#[derive(Parser, Debug)]
#[command(name = "macemu-gateway")]
#[command(version, about = "WebRTC gateway for BasiliskII / SheepShaver", long_about = None)]
struct CliArgs {
    /// HTTP API port
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// WebSocket signaling port
    #[arg(short = 's', long, value_name = "PORT")]
    signaling_port: Option<u16>,

    /// Path to the BasiliskII/SheepShaver executable
    #[arg(short = 'e', long, value_name = "PATH")]
    emulator: Option<PathBuf>,

    /// Emulator prefs file
    #[arg(short = 'P', long, value_name = "FILE")]
    prefs: Option<PathBuf>,

    /// Don't auto-start the emulator (wait for the web UI)
    #[arg(short = 'n', long)]
    no_auto_start: bool,

    /// ROMs directory
    #[arg(long, value_name = "DIR")]
    roms: Option<PathBuf>,

    /// Disk images directory
    #[arg(long, value_name = "DIR")]
    images: Option<PathBuf>,

    /// Video shared memory name (default: PID-based)
    #[arg(long, value_name = "NAME")]
    video_shm: Option<String>,

    /// Control socket path (default: PID-based)
    #[arg(long, value_name = "PATH")]
    control_sock: Option<PathBuf>,

    /// STUN server URL
    #[arg(long, value_name = "URL")]
    stun: Option<String>,

    /// Target encoder bitrate in kbps
    #[arg(long, value_name = "KBPS")]
    bitrate: Option<u32>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting macemu-gateway v{}", env!("CARGO_PKG_VERSION"));

    let mut config = GatewayConfig::default();
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(port) = args.signaling_port {
        config.signaling_port = port;
    }
    if let Some(path) = args.emulator {
        config.emulator_path = Some(path);
    }
    if let Some(path) = args.prefs {
        config.prefs_path = path;
    }
    if args.no_auto_start {
        config.auto_start = false;
    }
    if let Some(dir) = args.roms {
        config.roms_dir = dir;
    }
    if let Some(dir) = args.images {
        config.images_dir = dir;
    }
    if let Some(name) = args.video_shm {
        config.video_shm_name = name;
    }
    if let Some(path) = args.control_sock {
        config.control_sock_path = path;
    }
    if let Some(stun) = args.stun {
        config.stun_server = stun;
    }
    if let Some(bitrate) = args.bitrate {
        config.bitrate_kbps = bitrate;
    }
    config.apply_env_overrides();

    tracing::info!("HTTP port:      {}", config.http_port);
    tracing::info!("Signaling port: {}", config.signaling_port);
    tracing::info!("Video SHM:      {}", config.video_shm_name);
    tracing::info!("Control socket: {}", config.control_sock_path.display());
    tracing::info!("Prefs file:     {}", config.prefs_path.display());

    let state = GatewayState::new(config);

    let peers = PeerSessionManager::new(
        state.config.stun_server.clone(),
        state.display.clone(),
        state.input_tx.clone(),
    );

    // IPC resources and supervisor; failure here is a startup failure.
    let pipeline = VideoPipeline::new(state.clone(), peers.clone()).await?;

    let signaling_task = peers
        .clone()
        .serve_signaling(state.config.signaling_port, state.shutdown_signal())
        .await?;
    let http_task = web::serve(state.clone(), state.config.http_port, state.shutdown_signal()).await?;

    let pipeline_task = tokio::spawn(pipeline.run(state.shutdown_signal()));

    // Graceful shutdown on SIGINT/SIGTERM.
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    tracing::info!("Shutdown signal received");
    let _ = state.shutdown_tx.send(());

    peers.close_all().await;

    // All tasks must wind down within the shutdown deadline.
    let joined = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let _ = pipeline_task.await;
        let _ = signaling_task.await;
        let _ = http_task.await;
    })
    .await;
    if joined.is_err() {
        tracing::warn!("Tasks did not stop within the shutdown deadline");
    }

    tracing::info!("Gateway shutdown complete");
    Ok(())
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "macemu_gateway=error",
        LogLevel::Warn => "macemu_gateway=warn",
        LogLevel::Info => "macemu_gateway=info",
        LogLevel::Debug => "macemu_gateway=debug,webrtc=info",
        LogLevel::Trace => "macemu_gateway=trace,webrtc=debug",
    };

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
