use super::{Feedback, Navigator, Route, Screen, ScreenEvent};
use crate::draft::{Attachment, Author, PostDraft};
use crate::imagegen::ImageGenerator;
use crate::nlu::{ClassifiedIntent, ClassifierHints};
use crate::recording::{CapturedMedia, RecordingError, RecordingSession, TickOutcome};
use crate::router::{COMPOSER_INTENTS, ComposerAction, ComposerView, route_composer};
use crate::store::{PostRecord, SocialStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Post composer: text, one generated image or voice clip, and an optional poll.
pub struct ComposerScreen {
    me: Author,
    store: Arc<dyn SocialStore>,
    images: Arc<dyn ImageGenerator>,
    navigator: Arc<dyn Navigator>,
    feedback: Feedback,
    recorder: RecordingSession,
    draft: PostDraft,
    last_posted: Option<PostRecord>,
}

impl ComposerScreen {
    pub fn new(
        me: Author,
        store: Arc<dyn SocialStore>,
        images: Arc<dyn ImageGenerator>,
        navigator: Arc<dyn Navigator>,
        feedback: Feedback,
        recorder: RecordingSession,
    ) -> Self {
        Self {
            me,
            store,
            images,
            navigator,
            feedback,
            recorder,
            draft: PostDraft::new(),
            last_posted: None,
        }
    }

    pub fn recorder(&self) -> &RecordingSession {
        &self.recorder
    }

    pub fn draft(&self) -> &PostDraft {
        &self.draft
    }

    pub fn last_posted(&self) -> Option<&PostRecord> {
        self.last_posted.as_ref()
    }

    async fn start_recording(&mut self, restart: bool) -> Result<()> {
        if self.draft.has_image() {
            self.feedback
                .say("This post already has an image. Say clear to record instead.");
            return Ok(());
        }
        let started = if restart {
            self.recorder.discard_and_restart().await
        } else {
            self.recorder.start().await
        };
        match started {
            Ok(()) => {
                self.feedback.say("Recording. Say stop when you are done.");
                Ok(())
            }
            Err(RecordingError::Device(err)) => {
                self.feedback.say(err.user_message());
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn generate_image(&mut self, prompt: &str) -> Result<()> {
        if self.recorder.is_recording() || self.recorder.captured().is_some() {
            self.feedback
                .say("Discard the recording before adding an image.");
            return Ok(());
        }
        self.feedback.say(format!("Generating an image of {prompt}..."));
        let image = self
            .images
            .generate(prompt)
            .await
            .context("image generation failed")?;
        let url = self
            .store
            .upload_media(image.bytes.into(), &image.mime_type)
            .await
            .context("could not upload the image")?;
        self.draft.attach(Attachment::Image { url })?;
        self.feedback.say("Image added to your post.");
        Ok(())
    }

    async fn post(&mut self) -> Result<()> {
        let has_clip = self.recorder.captured().is_some();
        if has_clip && self.draft.has_image() {
            self.feedback
                .say("A post can carry an image or a voice clip, not both.");
            return Ok(());
        }
        let audio = if has_clip {
            Some(self.recorder.begin_upload()?)
        } else {
            None
        };

        let published = publish(
            self.store.as_ref(),
            self.draft.clone(),
            self.me.clone(),
            audio.as_ref(),
        )
        .await;
        match published {
            Ok(record) => {
                if audio.is_some() {
                    self.recorder.upload_succeeded()?;
                }
                tracing::info!(post = %record.id, "post published");
                self.draft.clear();
                self.feedback.say("Posted!");
                self.last_posted = Some(record);
                Ok(())
            }
            Err(err) => {
                if audio.is_some() {
                    self.recorder.upload_failed()?;
                }
                Err(err.context("could not publish the post"))
            }
        }
    }
}

/// Upload the clip, if any, then create the post from a copy of the draft so a failure
/// leaves the screen's draft untouched.
async fn publish(
    store: &dyn SocialStore,
    mut draft: PostDraft,
    me: Author,
    audio: Option<&CapturedMedia>,
) -> Result<PostRecord> {
    if let Some(media) = audio {
        let url = store
            .upload_media(media.payload.clone(), "audio/webm")
            .await?;
        draft.attach(Attachment::Audio {
            url,
            duration_seconds: media.duration_seconds,
        })?;
    }
    let post = draft.finalize(me)?;
    store.create_post(post).await
}

#[async_trait]
impl Screen for ComposerScreen {
    fn name(&self) -> &'static str {
        "composer"
    }

    fn hints(&self) -> ClassifierHints {
        ClassifierHints::for_intents(COMPOSER_INTENTS)
    }

    async fn dispatch(&mut self, intent: &ClassifiedIntent) -> Result<()> {
        let view = ComposerView {
            recording: self.recorder.state(),
            has_content: !self.draft.is_empty(),
        };
        let Some(action) = route_composer(intent, view) else {
            tracing::debug!(
                intent = %intent.intent,
                state = ?view.recording,
                "intent not applicable"
            );
            return Ok(());
        };

        match action {
            ComposerAction::StartRecording => self.start_recording(false).await?,
            ComposerAction::ReRecord => self.start_recording(true).await?,
            ComposerAction::StopRecording => {
                let seconds = self.recorder.stop()?;
                self.feedback
                    .say(format!("Recorded {seconds}s. Say post to share it or re-record."));
            }
            ComposerAction::DiscardRecording => {
                self.recorder.cancel();
                self.feedback.say("Recording discarded.");
            }
            ComposerAction::SetText(text) => {
                self.draft.set_text(text);
                self.feedback.say("Text updated.");
            }
            ComposerAction::GenerateImage { prompt } => self.generate_image(&prompt).await?,
            ComposerAction::CreatePoll { question, options } => {
                self.draft.set_poll(&question, &options);
                self.feedback.say(format!("Poll ready: {question}"));
            }
            ComposerAction::Clear => {
                self.recorder.cancel();
                self.draft.clear();
                self.feedback.say("Cleared.");
            }
            ComposerAction::Post => self.post().await?,
            ComposerAction::GoBack => {
                self.recorder.dispose();
                self.navigator.navigate(Route::Back);
            }
        }
        Ok(())
    }

    async fn next_event(&mut self) -> ScreenEvent {
        self.recorder.next_tick().await;
        ScreenEvent::Tick
    }

    fn on_tick(&mut self) {
        match self.recorder.on_tick() {
            TickOutcome::Counted(seconds) => tracing::trace!(seconds, "recording tick"),
            TickOutcome::AutoStopped(seconds) => self
                .feedback
                .say(format!("Recording limit reached at {seconds}s.")),
            TickOutcome::Stale => {}
        }
    }

    fn dispose(&mut self) {
        self.recorder.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::ComposerScreen;
    use crate::command_slot::CommandSlot;
    use crate::device::{SyntheticMicrophone, SyntheticMode};
    use crate::draft::{Attachment, Author};
    use crate::imagegen::{GeneratedImage, ImageGenerator, PlaceholderImageGenerator};
    use crate::nlu::{ClassifiedIntent, KeywordClassifier};
    use crate::preview::PreviewRegistry;
    use crate::recording::{RecordingOptions, RecordingSession, RecordingState};
    use crate::screen::{Feedback, NavigationLog, Route, Screen, ScreenController, ScreenEvent};
    use crate::store::InMemoryStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct SlowImages;

    #[async_trait]
    impl ImageGenerator for SlowImages {
        async fn generate(&self, prompt: &str) -> Result<GeneratedImage> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            PlaceholderImageGenerator.generate(prompt).await
        }
    }

    struct Fixture {
        screen: ComposerScreen,
        store: InMemoryStore,
        mic: SyntheticMicrophone,
        previews: PreviewRegistry,
        feedback: Feedback,
        navigation: NavigationLog,
    }

    fn fixture(mode: SyntheticMode) -> Fixture {
        fixture_with(mode, Arc::new(PlaceholderImageGenerator))
    }

    fn fixture_with(mode: SyntheticMode, images: Arc<dyn ImageGenerator>) -> Fixture {
        let store = InMemoryStore::new();
        let mic = SyntheticMicrophone::with_mode(mode);
        let previews = PreviewRegistry::new();
        let feedback = Feedback::new();
        let navigation = NavigationLog::default();
        let recorder = RecordingSession::new(
            Arc::new(mic.clone()),
            previews.clone(),
            RecordingOptions::default(),
        );
        let screen = ComposerScreen::new(
            Author {
                id: "me".to_string(),
                display_name: "Me".to_string(),
            },
            Arc::new(store.clone()),
            images,
            Arc::new(navigation.clone()),
            feedback.clone(),
            recorder,
        );
        Fixture {
            screen,
            store,
            mic,
            previews,
            feedback,
            navigation,
        }
    }

    fn intent(name: &str) -> ClassifiedIntent {
        ClassifiedIntent::new(name)
    }

    #[tokio::test]
    async fn record_stop_post_publishes_audio_with_duration() {
        let mut f = fixture(SyntheticMode::Available);

        f.screen.dispatch(&intent("start_recording")).await.expect("start");
        for _ in 0..3 {
            f.screen.on_tick();
        }
        f.screen.dispatch(&intent("stop_recording")).await.expect("stop");
        assert_eq!(f.screen.recorder().state(), RecordingState::Preview);
        assert_eq!(f.previews.active_count(), 1);

        f.screen.dispatch(&intent("post")).await.expect("post");

        let posts = f.store.posts();
        assert_eq!(posts.len(), 1);
        match &posts[0].attachment {
            Some(Attachment::Audio {
                url,
                duration_seconds,
            }) => {
                assert_eq!(*duration_seconds, 3);
                assert!(f.store.media(url).is_some());
            }
            other => panic!("expected audio attachment, got {other:?}"),
        }
        assert_eq!(f.screen.recorder().state(), RecordingState::Posted);
        assert_eq!(f.previews.active_count(), 0);
        assert_eq!(f.mic.open_streams(), 0);
        assert_eq!(f.feedback.current(), "Posted!");
    }

    #[tokio::test]
    async fn failed_post_rolls_back_to_preview() {
        let mut f = fixture(SyntheticMode::Available);
        f.screen.dispatch(&intent("start_recording")).await.expect("start");
        f.screen.dispatch(&intent("stop_recording")).await.expect("stop");

        f.store.set_fail_writes(true);
        let err = f.screen.dispatch(&intent("post")).await.expect_err("post fails");
        assert!(err.to_string().contains("could not publish"));
        assert_eq!(f.screen.recorder().state(), RecordingState::Preview);
        assert_eq!(f.previews.active_count(), 1);

        f.store.set_fail_writes(false);
        f.screen.dispatch(&intent("post")).await.expect("retry");
        assert_eq!(f.store.posts().len(), 1);
    }

    #[tokio::test]
    async fn stop_outside_recording_is_ignored() {
        let mut f = fixture(SyntheticMode::Available);
        f.screen.dispatch(&intent("start_recording")).await.expect("start");
        f.screen.dispatch(&intent("stop_recording")).await.expect("stop");
        let before = f.feedback.current();

        f.screen.dispatch(&intent("stop_recording")).await.expect("no-op");
        assert_eq!(f.screen.recorder().state(), RecordingState::Preview);
        assert_eq!(f.feedback.current(), before);
    }

    #[tokio::test]
    async fn missing_microphone_is_reported_not_raised() {
        let mut f = fixture(SyntheticMode::NotFound);
        f.screen.dispatch(&intent("start_recording")).await.expect("non-fatal");
        assert_eq!(f.screen.recorder().state(), RecordingState::Idle);
        assert!(f.feedback.current().contains("No microphone"));
    }

    #[tokio::test]
    async fn image_and_poll_post() {
        let mut f = fixture(SyntheticMode::Available);
        f.screen
            .dispatch(&intent("generate_image").with_slot("prompt", "a lighthouse"))
            .await
            .expect("image");
        f.screen
            .dispatch(
                &intent("create_poll")
                    .with_slot("question", "Visit?")
                    .with_slot("options", "yes or no"),
            )
            .await
            .expect("poll");
        f.screen.dispatch(&intent("post")).await.expect("post");

        let post = &f.store.posts()[0];
        assert!(matches!(post.attachment, Some(Attachment::Image { .. })));
        assert_eq!(post.poll.as_ref().map(|p| p.options.len()), Some(2));
        assert!(f.screen.draft().is_empty());
    }

    #[tokio::test]
    async fn go_back_releases_microphone() {
        let mut f = fixture(SyntheticMode::Available);
        f.screen.dispatch(&intent("start_recording")).await.expect("start");
        assert_eq!(f.mic.open_streams(), 1);

        f.screen.dispatch(&intent("go_back")).await.expect("back");
        assert_eq!(f.mic.open_streams(), 0);
        assert_eq!(f.navigation.routes(), vec![Route::Back]);
    }

    #[tokio::test(start_paused = true)]
    async fn voice_session_through_controller() {
        let f = fixture(SyntheticMode::Available);
        let mic = f.mic.clone();
        let store = f.store.clone();
        let slot = CommandSlot::new();
        let controller = ScreenController::new(
            f.screen,
            slot.clone(),
            Arc::new(KeywordClassifier),
            f.feedback.clone(),
        );
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(controller.run(async {
            let _ = stop_rx.await;
        }));

        async fn say(slot: &CommandSlot, text: &str) {
            slot.deliver(text).expect("slot free");
            let mut rx = slot.watch();
            rx.wait_for(|pending| pending.is_none()).await.expect("ack");
        }

        say(&slot, "start recording").await;
        tokio::time::sleep(Duration::from_millis(3500)).await;
        say(&slot, "stop").await;
        say(&slot, "post it").await;

        stop_tx.send(()).expect("stop");
        let screen = task.await.expect("join");

        let posts = store.posts();
        assert_eq!(posts.len(), 1);
        let duration = match &posts[0].attachment {
            Some(Attachment::Audio {
                duration_seconds, ..
            }) => *duration_seconds,
            other => panic!("expected audio, got {other:?}"),
        };
        assert_eq!(duration, 3);
        assert_eq!(mic.open_streams(), 0);
        assert_eq!(screen.recorder().state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn teardown_while_recording_releases_device() {
        let f = fixture(SyntheticMode::Available);
        let mic = f.mic.clone();
        let mut controller = ScreenController::new(
            f.screen,
            CommandSlot::new(),
            Arc::new(KeywordClassifier),
            f.feedback.clone(),
        );
        controller
            .screen_mut()
            .dispatch(&intent("start_recording"))
            .await
            .expect("start");
        assert_eq!(mic.open_streams(), 1);

        controller.reduce(ScreenEvent::Teardown).await;
        assert_eq!(mic.open_streams(), 0);
        assert_eq!(f.previews.active_count(), 0);
    }

    #[tokio::test]
    async fn image_and_voice_clip_never_share_a_post() {
        let mut f = fixture(SyntheticMode::Available);
        f.screen
            .dispatch(&intent("generate_image").with_slot("prompt", "a cat"))
            .await
            .expect("image");
        f.screen.dispatch(&intent("start_recording")).await.expect("refused");
        assert_eq!(f.screen.recorder().state(), RecordingState::Idle);
        assert_eq!(f.mic.open_streams(), 0);
        assert!(f.feedback.current().contains("already has an image"));

        f.screen.dispatch(&intent("post")).await.expect("post");
        assert!(matches!(
            f.store.posts()[0].attachment,
            Some(Attachment::Image { .. })
        ));
    }

    #[tokio::test]
    async fn image_is_refused_while_a_clip_is_pending() {
        let mut f = fixture(SyntheticMode::Available);
        f.screen.dispatch(&intent("start_recording")).await.expect("start");
        f.screen.on_tick();
        f.screen.dispatch(&intent("stop_recording")).await.expect("stop");

        f.screen
            .dispatch(&intent("generate_image").with_slot("prompt", "a cat"))
            .await
            .expect("refused");
        assert_eq!(f.feedback.current(), "Discard the recording before adding an image.");
        assert!(f.screen.draft().attachment().is_none());

        f.screen.dispatch(&intent("post")).await.expect("post");
        assert!(matches!(
            f.store.posts()[0].attachment,
            Some(Attachment::Audio {
                duration_seconds: 1,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_slow_image_request() {
        let f = fixture_with(SyntheticMode::Available, Arc::new(SlowImages));
        let store = f.store.clone();
        let slot = CommandSlot::new();
        let controller = ScreenController::new(
            f.screen,
            slot.clone(),
            Arc::new(KeywordClassifier),
            f.feedback.clone(),
        );
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(controller.run(async {
            let _ = stop_rx.await;
        }));

        slot.deliver("generate an image of a cat").expect("deliver");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(slot.is_awaiting_ack(), "image request still running");

        stop_tx.send(()).expect("stop");
        let screen = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("controller stops without waiting for the generator")
            .expect("join");

        assert!(!slot.is_awaiting_ack());
        assert!(screen.draft().attachment().is_none());
        assert!(store.posts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_after_image_request_while_recording_releases_microphone() {
        let f = fixture_with(SyntheticMode::Available, Arc::new(SlowImages));
        let mic = f.mic.clone();
        let slot = CommandSlot::new();
        let controller = ScreenController::new(
            f.screen,
            slot.clone(),
            Arc::new(KeywordClassifier),
            f.feedback.clone(),
        );
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(controller.run(async {
            let _ = stop_rx.await;
        }));

        for text in ["start recording", "generate an image of a cat"] {
            slot.deliver(text).expect("slot free");
            let mut rx = slot.watch();
            rx.wait_for(|pending| pending.is_none()).await.expect("ack");
        }
        assert_eq!(mic.open_streams(), 1);
        assert_eq!(
            f.feedback.current(),
            "Discard the recording before adding an image."
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        stop_tx.send(()).expect("stop");
        let screen = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("controller stops")
            .expect("join");
        assert_eq!(mic.open_streams(), 0);
        assert_eq!(screen.recorder().state(), RecordingState::Idle);
    }
}
