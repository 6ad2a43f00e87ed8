use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use voicefeed::command_slot::CommandSlot;
use voicefeed::config::{ClassifierBackend, ImageBackend, VoicefeedConfig, ensure_sample_config};
use voicefeed::device::{MediaKind, SyntheticMicrophone};
use voicefeed::imagegen::{ImageGenerator, OpenAiImageGenerator, PlaceholderImageGenerator};
use voicefeed::nlu::{ClassifierHints, IntentClassifier, KeywordClassifier, OpenAiClassifier};
use voicefeed::paths::default_config_path;
use voicefeed::preview::PreviewRegistry;
use voicefeed::reactions::{ReactionMap, ReactionSummary};
use voicefeed::recording::RecordingSession;
use voicefeed::router::{COMPOSER_INTENTS, THREAD_INTENTS};
use voicefeed::screen::composer::ComposerScreen;
use voicefeed::screen::{Feedback, Navigator, Route, ScreenController};
use voicefeed::store::InMemoryStore;
use voicefeed::telemetry::init_tracing;
use voicefeed::thread::{CommentPayload, CommentRecord, build_thread};

#[derive(Debug, Parser)]
#[command(name = "voicefeed")]
#[command(about = "Voice-driven post composer and comment threads")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args, Clone)]
struct GlobalArgs {
    /// Config file; defaults to ~/.config/voicefeed/voicefeed.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, action = ArgAction::SetTrue)]
    log_json: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Classify one utterance and print the intent as JSON.
    Classify {
        text: String,
        #[arg(long, value_enum, default_value = "composer")]
        screen: ScreenKind,
    },
    /// Drive a composer screen from stdin, one utterance per line.
    Compose,
    /// Print the reply tree and reaction summaries of a post document.
    Thread { file: PathBuf },
    /// Write a sample config file.
    InitConfig {
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScreenKind {
    Composer,
    Thread,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("warn", cli.global.log_json);

    let config_path = cli.global.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        Commands::InitConfig { path } => {
            let path = path.unwrap_or(config_path);
            if ensure_sample_config(&path)? {
                println!("wrote {}", path.display());
            } else {
                println!("{} already exists", path.display());
            }
            Ok(())
        }
        Commands::Classify { text, screen } => {
            let config = VoicefeedConfig::load(&config_path)?;
            classify(&config, &text, screen).await
        }
        Commands::Compose => {
            let config = VoicefeedConfig::load(&config_path)?;
            compose(&config).await
        }
        Commands::Thread { file } => print_thread(&file),
    }
}

fn openai_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|key| !key.trim().is_empty())
}

fn build_classifier(config: &VoicefeedConfig) -> Arc<dyn IntentClassifier> {
    match (config.classifier.backend, openai_key()) {
        (ClassifierBackend::OpenAi, Some(api_key)) => Arc::new(OpenAiClassifier::new(
            api_key,
            config.classifier.model.clone(),
            config.classifier.endpoint.clone(),
        )),
        (ClassifierBackend::OpenAi, None) => {
            eprintln!("OPENAI_API_KEY is not set. Falling back to the keyword classifier.");
            Arc::new(KeywordClassifier)
        }
        (ClassifierBackend::Keyword, _) => Arc::new(KeywordClassifier),
    }
}

fn build_image_generator(config: &VoicefeedConfig) -> Arc<dyn ImageGenerator> {
    match (config.image.backend, openai_key()) {
        (ImageBackend::OpenAi, Some(api_key)) => Arc::new(OpenAiImageGenerator::new(
            api_key,
            config.image.model.clone(),
        )),
        (ImageBackend::OpenAi, None) => {
            eprintln!("OPENAI_API_KEY is not set. Falling back to placeholder images.");
            Arc::new(PlaceholderImageGenerator)
        }
        (ImageBackend::Placeholder, _) => Arc::new(PlaceholderImageGenerator),
    }
}

async fn classify(config: &VoicefeedConfig, text: &str, screen: ScreenKind) -> Result<()> {
    let classifier = build_classifier(config);
    let hints = match screen {
        ScreenKind::Composer => ClassifierHints::for_intents(COMPOSER_INTENTS),
        ScreenKind::Thread => ClassifierHints::for_intents(THREAD_INTENTS),
    };
    let intent = classifier.classify(text, &hints).await?;
    println!("{}", serde_json::to_string_pretty(&intent)?);
    Ok(())
}

/// Ends the interactive session when the screen navigates away.
struct ExitOnNavigate {
    tx: mpsc::UnboundedSender<Route>,
}

impl Navigator for ExitOnNavigate {
    fn navigate(&self, route: Route) {
        let _ = self.tx.send(route);
    }
}

async fn compose(config: &VoicefeedConfig) -> Result<()> {
    let store = InMemoryStore::new();
    let feedback = Feedback::new();
    let slot = CommandSlot::new();
    let (route_tx, mut route_rx) = mpsc::unbounded_channel();

    let recorder = RecordingSession::new(
        Arc::new(SyntheticMicrophone::default()),
        PreviewRegistry::new(),
        config.recording.options(MediaKind::Audio),
    );
    let screen = ComposerScreen::new(
        config.user.author(),
        Arc::new(store.clone()),
        build_image_generator(config),
        Arc::new(ExitOnNavigate { tx: route_tx }),
        feedback.clone(),
        recorder,
    );
    let controller = ScreenController::new(
        screen,
        slot.clone(),
        build_classifier(config),
        feedback.clone(),
    );

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut controller_handle = tokio::spawn(controller.run(async move {
        tokio::select! {
            _ = stop_rx => {}
            _ = route_rx.recv() => {}
        }
    }));

    let mut messages = feedback.subscribe();
    let feedback_handle = tokio::spawn(async move {
        while messages.changed().await.is_ok() {
            let message = messages.borrow_and_update().clone();
            println!("> {message}");
        }
    });

    // Kept off the blocking pool so a pending read cannot hold up runtime shutdown.
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        eprintln!(
            "say something: start recording | stop | write <text> | image of <prompt> \
             | post | go back"
        );
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    enum Input {
        Line(String),
        Eof,
        ControllerDone(Result<ComposerScreen, tokio::task::JoinError>),
    }

    let mut pending = slot.watch();
    let mut stop_tx = Some(stop_tx);
    let finished = loop {
        let input = tokio::select! {
            line = line_rx.recv() => match line {
                Some(line) => Input::Line(line),
                None => Input::Eof,
            },
            joined = &mut controller_handle => Input::ControllerDone(joined),
        };
        match input {
            Input::Line(line) => {
                pending
                    .wait_for(|command| command.is_none())
                    .await
                    .context("command slot closed")?;
                if let Err(err) = slot.deliver(line) {
                    eprintln!("{err}");
                }
            }
            Input::Eof => {
                let _ = pending.wait_for(|command| command.is_none()).await;
                if let Some(stop) = stop_tx.take() {
                    let _ = stop.send(());
                }
                break controller_handle.await;
            }
            Input::ControllerDone(joined) => break joined,
        }
    };

    let screen = finished.context("screen controller task failed")?;
    drop(screen);
    drop(feedback);
    let _ = feedback_handle.await;

    let posts = store.posts();
    println!("{}", serde_json::to_string_pretty(&posts)?);
    Ok(())
}

fn print_thread(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let document: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let reactions: ReactionMap = document
        .get("reactions")
        .cloned()
        .map(serde_json::from_value::<ReactionMap>)
        .transpose()
        .context("post reactions are malformed")?
        .unwrap_or_default();
    println!("post {}", reaction_line(&reactions));

    let comments = document
        .get("comments")
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default();
    let view = build_thread(&comments);
    for node in &view.roots {
        println!("- {}", comment_line(&node.comment));
        for reply in &node.replies {
            println!("    - {}", comment_line(reply));
        }
    }
    println!("{} comments", view.comment_count());
    Ok(())
}

fn comment_line(comment: &CommentRecord) -> String {
    let body = if comment.deleted {
        "[deleted]".to_string()
    } else {
        match &comment.payload {
            CommentPayload::Text { text } => text.clone(),
            CommentPayload::Image { url } => format!("[image {url}]"),
            CommentPayload::Audio {
                duration_seconds, ..
            } => format!("[voice {duration_seconds}s]"),
        }
    };
    format!(
        "{}: {body} {}",
        comment.author.display_name,
        reaction_line(&comment.reactions)
    )
}

fn reaction_line(reactions: &ReactionMap) -> String {
    let summary = ReactionSummary::new(reactions);
    let top = summary
        .top_emojis(3)
        .into_iter()
        .map(|emoji| format!("{emoji}{}", summary.count_of(emoji)))
        .collect::<Vec<_>>()
        .join(" ");
    format!("({} reactions) {top}", summary.total_count())
}
