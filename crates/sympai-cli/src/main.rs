use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use sympai_client::{Command, Coordinator, CoordinatorHandle, ReplyPhase, UiState};
use sympai_core::config::{Config, TranscriptionConfig, TtsConfig};
use sympai_providers::analysis::HttpAnalysisProvider;
use sympai_providers::recognition::WhisperRecognition;
use sympai_providers::synthesis::ElevenLabsSynthesis;

#[derive(Parser)]
#[command(
    name = "sympai",
    about = "Symptom checker with streamed replies and voice feedback",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session
    Chat {
        /// Analysis endpoint override
        #[arg(long)]
        endpoint: Option<String>,

        /// Enable voice output from the start
        #[arg(long)]
        voice: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    match cli.command {
        Commands::Chat { endpoint, voice } => chat(config, endpoint, voice).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
        },
    }

    Ok(())
}

async fn chat(config: Config, endpoint: Option<String>, voice: bool) -> anyhow::Result<()> {
    let endpoint = endpoint.unwrap_or_else(|| config.analyze_endpoint());
    tracing::info!(%endpoint, "Starting SympAI session");

    let analysis = Arc::new(HttpAnalysisProvider::new(&endpoint));
    let recognition = Arc::new(WhisperRecognition::new(
        config.transcription.clone().unwrap_or(TranscriptionConfig {
            provider: "groq".into(),
            api_key: None,
            api_key_env: Some("GROQ_API_KEY".into()),
            model: None,
        }),
    ));
    let tts = config.tts.clone().unwrap_or(TtsConfig {
        provider: "elevenlabs".into(),
        api_key: None,
        api_key_env: Some("ELEVENLABS_API_KEY".into()),
        default_voice: None,
        default_model: None,
        audio_out: None,
    });
    let audio_out = tts.audio_out.clone();
    let synthesis = Arc::new(ElevenLabsSynthesis::new(tts));

    let (audio_tx, audio_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(drain_audio(audio_rx, audio_out));

    let handle = Coordinator::start(analysis, recognition, synthesis, audio_tx);

    if voice {
        let _ = handle.commands.send(Command::SetVoiceEnabled(true));
    }

    let mut state_rx = handle.state.clone();
    tokio::spawn(async move {
        let mut previous = UiState::default();
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow_and_update().clone();
            render(&previous, &state);
            previous = state;
        }
    });

    println!("SympAI — describe your symptoms (:help for commands)");
    run_repl(&handle).await?;

    handle.cancel.cancel();
    Ok(())
}

async fn run_repl(handle: &CoordinatorHandle) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let command = match line.as_str() {
            ":quit" | ":q" => break,
            ":help" => {
                print_help();
                continue;
            }
            ":play" => Command::Play,
            ":pause" => Command::Pause,
            ":voice on" => Command::SetVoiceEnabled(true),
            ":voice off" => Command::SetVoiceEnabled(false),
            other if other.starts_with(":record") => {
                let path = other.trim_start_matches(":record").trim();
                Command::StartRecording {
                    audio: (!path.is_empty()).then(|| PathBuf::from(path)),
                }
            }
            other if other.starts_with(':') => {
                println!("Unknown command: {other} (:help for commands)");
                continue;
            }
            _ => {
                if handle.commands.send(Command::SetInput(line)).is_err() {
                    break;
                }
                Command::Dispatch
            }
        };

        if handle.commands.send(command).is_err() {
            break;
        }
    }

    Ok(())
}

fn print_help() {
    println!("  <text>          send a symptom description");
    println!("  :record <wav>   transcribe a recorded clip into the input");
    println!("  :voice on|off   toggle narration of completed replies");
    println!("  :play           narrate the reply from the beginning");
    println!("  :pause          stop narration");
    println!("  :quit           exit");
}

/// Print the parts of the new state that changed since the last one.
fn render(previous: &UiState, state: &UiState) {
    match state.phase {
        ReplyPhase::Streaming => {
            if previous.phase == ReplyPhase::Streaming
                && state.reply.starts_with(previous.reply.as_str())
            {
                // The buffer is append-only, so the delta is a suffix.
                print!("{}", &state.reply[previous.reply.len()..]);
            } else {
                // A fresh buffer replaced the previous one.
                if previous.phase == ReplyPhase::Streaming {
                    println!();
                }
                print!("{}", state.reply);
            }
            let _ = std::io::stdout().flush();
        }
        ReplyPhase::Complete => {
            if previous.phase == ReplyPhase::Streaming {
                if state.reply.starts_with(previous.reply.as_str()) {
                    print!("{}", &state.reply[previous.reply.len()..]);
                }
                println!();
            }
        }
        ReplyPhase::Failed | ReplyPhase::Rejected => {
            if state.phase != previous.phase || state.reply != previous.reply {
                println!("{}", state.reply);
            }
        }
        ReplyPhase::Idle => {}
    }

    if state.recording && !previous.recording {
        println!("Listening...");
    }
    if !state.recording && previous.recording && state.input != previous.input {
        println!("Heard: {}", state.input);
    }
    if state.notice != previous.notice {
        if let Some(notice) = &state.notice {
            println!("{notice}");
        }
    }
    if state.speaking && !previous.speaking {
        println!("[ narrating — :pause to stop ]");
    }
}

/// Sink for synthesized PCM. Written to `audio_out` when configured,
/// otherwise drained and discarded.
async fn drain_audio(mut audio_rx: mpsc::UnboundedReceiver<Vec<u8>>, audio_out: Option<String>) {
    let mut file = match &audio_out {
        Some(path) => match tokio::fs::File::create(path).await {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!(%e, %path, "Could not open audio sink, discarding audio");
                None
            }
        },
        None => None,
    };

    while let Some(bytes) = audio_rx.recv().await {
        if let Some(file) = &mut file {
            if let Err(e) = file.write_all(&bytes).await {
                tracing::warn!(%e, "Audio sink write failed, discarding audio");
                break;
            }
        }
    }
}
