pub mod composer;
pub mod thread_view;

use crate::command_slot::{AckGuard, CommandFeed, CommandSlot, PendingCommand};
use crate::nlu::{ClassifiedIntent, ClassifierHints, IntentClassifier};
use crate::store::PostSnapshot;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum ScreenEvent {
    CommandArrived(PendingCommand),
    Classified {
        command: PendingCommand,
        result: Result<ClassifiedIntent>,
    },
    Tick,
    PostUpdated(PostSnapshot),
    Teardown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Back,
    Post(String),
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

/// Navigator that only remembers where it was sent.
#[derive(Debug, Clone, Default)]
pub struct NavigationLog {
    routes: Arc<Mutex<Vec<Route>>>,
}

impl NavigationLog {
    pub fn routes(&self) -> Vec<Route> {
        self.routes.lock().expect("navigation log mutex poisoned").clone()
    }
}

impl Navigator for NavigationLog {
    fn navigate(&self, route: Route) {
        tracing::info!(?route, "navigate");
        self.routes
            .lock()
            .expect("navigation log mutex poisoned")
            .push(route);
    }
}

/// The message a screen currently shows or speaks back to the user.
#[derive(Debug, Clone)]
pub struct Feedback {
    tx: Arc<watch::Sender<String>>,
}

impl Default for Feedback {
    fn default() -> Self {
        Self::new()
    }
}

impl Feedback {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(String::new());
        Self { tx: Arc::new(tx) }
    }

    pub fn say(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(%message, "feedback");
        self.tx.send_replace(message);
    }

    pub fn current(&self) -> String {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }
}

#[async_trait]
pub trait Screen: Send {
    fn name(&self) -> &'static str;

    /// Vocabulary and rosters sent along with each utterance.
    fn hints(&self) -> ClassifierHints;

    async fn dispatch(&mut self, intent: &ClassifiedIntent) -> Result<()>;

    /// Wait for the next event the screen produces on its own (ticks, push updates).
    /// Must be cancel safe.
    async fn next_event(&mut self) -> ScreenEvent;

    fn on_tick(&mut self);

    fn on_post_updated(&mut self, _snapshot: PostSnapshot) {}

    fn dispose(&mut self);
}

struct Classification {
    command: PendingCommand,
    task: JoinHandle<Result<ClassifiedIntent>>,
}

enum Wake {
    Shutdown,
    Command(Option<PendingCommand>),
    Classified(Result<ClassifiedIntent>),
    Screen(ScreenEvent),
}

pub struct ScreenController<S: Screen> {
    screen: S,
    slot: CommandSlot,
    feed: CommandFeed,
    classifier: Arc<dyn IntentClassifier>,
    feedback: Feedback,
    classifying: Option<Classification>,
    ack: Option<AckGuard>,
    torn_down: bool,
}

impl<S: Screen> ScreenController<S> {
    pub fn new(
        screen: S,
        slot: CommandSlot,
        classifier: Arc<dyn IntentClassifier>,
        feedback: Feedback,
    ) -> Self {
        let feed = slot.feed();
        Self {
            screen,
            slot,
            feed,
            classifier,
            feedback,
            classifying: None,
            ack: None,
            torn_down: false,
        }
    }

    pub fn screen(&self) -> &S {
        &self.screen
    }

    pub fn screen_mut(&mut self) -> &mut S {
        &mut self.screen
    }

    /// Drive the screen until `shutdown` resolves, then dispose it and hand it back.
    pub async fn run<F>(mut self, shutdown: F) -> S
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::debug!(screen = self.screen.name(), "screen controller started");

        while !self.torn_down {
            let classifying = self.classifying.is_some();
            let idle = !classifying && self.ack.is_none();
            let wake = tokio::select! {
                biased;
                _ = &mut shutdown => Wake::Shutdown,
                result = join_classification(&mut self.classifying), if classifying => {
                    Wake::Classified(result)
                }
                command = self.feed.next(), if idle => Wake::Command(command),
                event = self.screen.next_event() => Wake::Screen(event),
            };

            let event = match wake {
                Wake::Shutdown | Wake::Command(None) => ScreenEvent::Teardown,
                Wake::Command(Some(command)) => ScreenEvent::CommandArrived(command),
                Wake::Classified(result) => match self.classifying.take() {
                    Some(classification) => ScreenEvent::Classified {
                        command: classification.command,
                        result,
                    },
                    None => continue,
                },
                Wake::Screen(event) => event,
            };
            let finished = tokio::select! {
                biased;
                _ = &mut shutdown => false,
                _ = self.reduce(event) => true,
            };
            if !finished {
                // A handler was still running; dropping it releases whatever it held.
                self.teardown();
            }
        }

        self.screen
    }

    /// Apply one event. Every path through `Classified` ends in acknowledgment.
    pub async fn reduce(&mut self, event: ScreenEvent) {
        match event {
            ScreenEvent::CommandArrived(command) => self.begin_classification(command),
            ScreenEvent::Classified { command, result } => {
                self.finish_command(&command, result).await;
                if let Some(ack) = self.ack.take() {
                    ack.ack();
                }
            }
            ScreenEvent::Tick => self.screen.on_tick(),
            ScreenEvent::PostUpdated(snapshot) => self.screen.on_post_updated(snapshot),
            ScreenEvent::Teardown => self.teardown(),
        }
    }

    fn begin_classification(&mut self, command: PendingCommand) {
        if self.torn_down {
            return;
        }
        tracing::info!(
            screen = self.screen.name(),
            command = %command.id,
            text = %command.raw_text,
            "classifying command"
        );
        self.ack = Some(self.slot.ack_guard(&command));

        let classifier = self.classifier.clone();
        let hints = self.screen.hints();
        let text = command.raw_text.clone();
        let task = tokio::spawn(async move { classifier.classify(&text, &hints).await });
        self.classifying = Some(Classification { command, task });
    }

    async fn finish_command(
        &mut self,
        command: &PendingCommand,
        result: Result<ClassifiedIntent>,
    ) {
        let intent = match result {
            Ok(intent) => intent,
            Err(err) => {
                tracing::warn!(
                    command = %command.id,
                    error = %format!("{err:#}"),
                    "classification failed"
                );
                return;
            }
        };
        if intent.is_unknown() {
            tracing::debug!(command = %command.id, "unrecognized command ignored");
            return;
        }

        tracing::info!(
            screen = self.screen.name(),
            command = %command.id,
            intent = %intent.intent,
            slots = ?intent.slots,
            "dispatching intent"
        );
        if let Err(err) = self.screen.dispatch(&intent).await {
            tracing::warn!(
                command = %command.id,
                error = %format!("{err:#}"),
                "command handler failed"
            );
            self.feedback.say(format!("Sorry, {err}"));
        }
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if let Some(classification) = self.classifying.take() {
            // The task keeps running; its result is simply never read.
            tracing::debug!(
                command = %classification.command.id,
                "discarding in-flight classification"
            );
        }
        self.ack.take();
        self.screen.dispose();
        tracing::debug!(screen = self.screen.name(), "screen torn down");
    }
}

async fn join_classification(
    classifying: &mut Option<Classification>,
) -> Result<ClassifiedIntent> {
    match classifying {
        Some(classification) => match (&mut classification.task).await {
            Ok(result) => result,
            Err(err) => Err(anyhow!("classification task failed: {err}")),
        },
        None => std::future::pending().await,
    }
}
