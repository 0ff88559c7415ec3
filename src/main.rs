use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use std::sync::Arc;
use sufra_voice::session::{SessionConfig, SessionStatus, VoiceSession};
use sufra_voice::{
    create_router, AppState, AudioDevicesFactory, AudioSource, Config, Credentials,
    TerminalBars, VisualizerLoop, VoiceAssistant, WebSocketTransport,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sufra-voice", version, about = "Sufra realtime voice assistant")]
struct Cli {
    /// Configuration file (default: config/sufra-voice.toml if present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hold one conversation from the terminal
    Talk {
        /// Use a WAV file as the microphone
        #[arg(long, conflicts_with = "system_audio")]
        input: Option<String>,

        /// Record the assistant's replies to a WAV file
        #[arg(long, requires = "input")]
        output: Option<String>,

        /// Use the system microphone and speaker
        #[arg(long)]
        system_audio: bool,

        /// Hide the level bars
        #[arg(long)]
        no_visualizer: bool,
    },

    /// Serve the assistant HTTP API
    Serve {
        /// Use a WAV file as the microphone
        #[arg(long)]
        input: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;

    info!("Sufra voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Commands::Talk {
            input,
            output,
            system_audio,
            no_visualizer,
        } => {
            let source = audio_source(input, output, system_audio)?;
            talk(&cfg, source, !no_visualizer).await
        }
        Commands::Serve { input } => {
            let source = audio_source(input, None, false)?;
            serve(&cfg, source).await
        }
    }
}

fn audio_source(
    input: Option<String>,
    output: Option<String>,
    system_audio: bool,
) -> Result<AudioSource> {
    match input {
        Some(input) => Ok(AudioSource::File { input, output }),
        None if system_audio || cfg!(feature = "cpal-audio") => Ok(AudioSource::System),
        None => anyhow::bail!("Pass --input <WAV> (or build with the `cpal-audio` feature)"),
    }
}

fn build_assistant(cfg: &Config, source: AudioSource) -> Result<VoiceAssistant> {
    let devices = AudioDevicesFactory::create(source)?;
    let transport = Arc::new(WebSocketTransport::new(cfg.live.endpoint.clone()));
    let session = VoiceSession::new(
        SessionConfig::from(cfg),
        Credentials::Environment,
        devices,
        transport,
    );
    Ok(VoiceAssistant::new(session))
}

async fn talk(cfg: &Config, source: AudioSource, show_bars: bool) -> Result<()> {
    let assistant = build_assistant(cfg, source)?;

    let mut visualizer = show_bars
        .then(|| VisualizerLoop::spawn(assistant.session().subscribe(), 30, TerminalBars));

    if let Err(e) = assistant.open().await {
        if let Some(v) = visualizer.as_mut() {
            v.stop();
        }
        eprintln!();
        eprintln!("{} {}", assistant.view().subtitle.unwrap_or_default().red(), e);
        return Err(e).context("Failed to start conversation");
    }

    eprintln!("{}", "Talking. Press Ctrl+C to end the conversation.".green());

    let mut snapshots = assistant.session().subscribe();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Ending conversation"),
        _ = snapshots.wait_for(|s| s.status != SessionStatus::Connected) => {
            warn!("Conversation ended by the remote side");
        }
    }

    assistant.close().await;
    if let Some(v) = visualizer.as_mut() {
        v.stop();
    }
    eprintln!();

    let stats = assistant.stats().await;
    info!(
        "Sent {} frames, played {} reply chunks ({:.1}s), dropped {}",
        stats.frames_sent, stats.chunks_played, stats.reply_audio_secs, stats.chunks_dropped
    );
    Ok(())
}

async fn serve(cfg: &Config, source: AudioSource) -> Result<()> {
    let assistant = build_assistant(cfg, source)?;
    let state = AppState::new(assistant);
    let app = create_router(state.clone());

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    state.assistant.close().await;
    Ok(())
}
