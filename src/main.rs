use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use xiaowu::capture::{AudioSource, SilenceSource};
use xiaowu::config::{AsrBackend, AudioSourceConfig, Config, DEFAULT_CONFIG_PATH};
use xiaowu::controller::{Capabilities, VoiceSessionController};
use xiaowu::event::{self, Event};
use xiaowu::player::ConsolePlayer;
use xiaowu::timer::TokioTimers;
use xiaowu::transcriber::{CommandTranscriber, LineTranscriber, WakeTailTranscriber};
use xiaowu::ui::StatusDisplay;
use xiaowu::Resolution;

/// Voice control for a media player: say the wake phrase, then a command
#[derive(Parser)]
#[command(name = "xiaowu", version, about)]
struct Cli {
    /// Config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured wake phrase
    #[arg(long)]
    wake_word: Option<String>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for the wake phrase, reading transcripts from stdin (default)
    ///
    /// Each line is a final transcript; prefix a line with `~` to send it
    /// as an interim result.
    Listen,
    /// Resolve one transcript against the command vocabulary and exit
    Resolve {
        /// Transcribed command text
        text: String,
    },
}

#[hotpath::main]
fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(wake_word) = cli.wake_word {
        config.wake_word = wake_word;
    }

    match cli.command.unwrap_or(Commands::Listen) {
        Commands::Listen => {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(listen(config))
        }
        Commands::Resolve { text } => resolve_once(&config, &text),
    }
}

fn resolve_once(config: &Config, text: &str) -> anyhow::Result<()> {
    let resolver = config.resolver().context("building command vocabulary")?;
    match resolver.resolve(text) {
        Resolution::Exact(command) => println!("{command} (exact)"),
        Resolution::Alias { command, alias } => println!("{command} (keyword \"{alias}\")"),
        Resolution::Fuzzy(m) => println!("{} (\"{}\", score {:.2})", m.command, m.phrase, m.score),
        Resolution::NoMatch { best: Some(m) } => {
            println!("no match (closest \"{}\", score {:.2})", m.phrase, m.score)
        }
        Resolution::NoMatch { best: None } => println!("no match"),
    }
    Ok(())
}

async fn listen(config: Config) -> anyhow::Result<()> {
    let resolver = config.resolver().context("building command vocabulary")?;
    let (tx, rx) = event::channel();

    let caps = Capabilities {
        transcription: Box::new(LineTranscriber::stdin()),
        audio: audio_source(&config)?,
        transcriber: command_transcriber(&config)?,
        player: Box::new(ConsolePlayer::default()),
        timers: Box::new(TokioTimers::new(tx.clone())),
        observer: Box::new(StatusDisplay::default()),
    };
    let mut controller =
        VoiceSessionController::new(config.voice_settings(), resolver, tx.clone(), caps);

    let stop_tx = tx.clone();
    ctrlc::set_handler(move || {
        stop_tx.send(Event::Stop).ok();
    })
    .context("installing Ctrl-C handler")?;

    controller.start().context("starting voice control")?;
    controller.run(&rx).await;
    xiaowu::ui::clear_line();
    Ok(())
}

fn audio_source(config: &Config) -> anyhow::Result<Box<dyn AudioSource>> {
    match config.audio.source {
        AudioSourceConfig::Silence => Ok(Box::new(SilenceSource::new(Duration::from_millis(
            config.audio.fragment_ms,
        )))),
        #[cfg(feature = "mic")]
        AudioSourceConfig::Mic => Ok(Box::new(xiaowu::capture::MicSource)),
        #[cfg(not(feature = "mic"))]
        AudioSourceConfig::Mic => anyhow::bail!("audio.source = \"mic\" needs the `mic` feature"),
    }
}

fn command_transcriber(config: &Config) -> anyhow::Result<Box<dyn CommandTranscriber>> {
    match config.asr.backend {
        AsrBackend::WakeTail => Ok(Box::new(WakeTailTranscriber)),
        #[cfg(feature = "asr-http")]
        AsrBackend::Http => Ok(Box::new(xiaowu::transcriber::HttpTranscriber::new(
            config.asr.url.clone(),
        ))),
        #[cfg(not(feature = "asr-http"))]
        AsrBackend::Http => anyhow::bail!("asr.backend = \"http\" needs the `asr-http` feature"),
    }
}
