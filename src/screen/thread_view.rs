use super::{Feedback, Navigator, Route, Screen, ScreenEvent};
use crate::draft::Author;
use crate::nlu::{ClassifiedIntent, ClassifierHints};
use crate::reactions::ReactionSummary;
use crate::recording::{CapturedMedia, RecordingError, RecordingSession, TickOutcome};
use crate::router::{
    THREAD_INTENTS, ThreadAction, ThreadScreenView, match_display_name, route_thread,
};
use crate::store::{NewComment, PostRecord, PostSnapshot, PostSubscription, SocialStore};
use crate::thread::{CommentPayload, CommentRecord, ThreadView, build_thread};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

const LIKE: &str = "👍";

/// A post with its live comment thread.
pub struct ThreadScreen {
    me: Author,
    post_id: String,
    store: Arc<dyn SocialStore>,
    navigator: Arc<dyn Navigator>,
    feedback: Feedback,
    recorder: RecordingSession,
    subscription: Option<PostSubscription>,
    post: PostRecord,
    thread: ThreadView,
    now_playing: Option<String>,
}

impl ThreadScreen {
    /// Subscribe to `post_id` and wait for its first snapshot.
    pub async fn open(
        me: Author,
        post_id: &str,
        store: Arc<dyn SocialStore>,
        navigator: Arc<dyn Navigator>,
        feedback: Feedback,
        recorder: RecordingSession,
    ) -> Result<Self> {
        let mut subscription = store
            .listen_to_post(post_id)
            .await
            .with_context(|| format!("failed to open post {post_id}"))?;
        let initial = subscription
            .next()
            .await
            .with_context(|| format!("post {post_id} feed closed before its first snapshot"))?;

        Ok(Self {
            me,
            post_id: post_id.to_string(),
            store,
            navigator,
            feedback,
            recorder,
            subscription: Some(subscription),
            thread: build_thread(&initial.comments),
            post: initial.post,
            now_playing: None,
        })
    }

    pub fn post(&self) -> &PostRecord {
        &self.post
    }

    pub fn thread(&self) -> &ThreadView {
        &self.thread
    }

    pub fn recorder(&self) -> &RecordingSession {
        &self.recorder
    }

    /// Id of the audio comment currently playing.
    pub fn now_playing(&self) -> Option<&str> {
        self.now_playing.as_deref()
    }

    pub fn share_link(&self) -> String {
        format!("voicefeed://post/{}", self.post_id)
    }

    fn find_by_author<'a, I>(&self, name: &str, candidates: I) -> Option<CommentRecord>
    where
        I: IntoIterator<Item = &'a CommentRecord>,
    {
        let candidates: Vec<&CommentRecord> = candidates.into_iter().collect();
        let roster = candidates.iter().map(|c| c.author.display_name.as_str());
        match_display_name(name, roster).map(|index| candidates[index].clone())
    }

    async fn react_to_post(&mut self, emoji: &str) -> Result<()> {
        let summary = ReactionSummary::new(&self.post.reactions);
        let already = summary.my_reaction(&self.me.id) == Some(emoji);
        self.store
            .react_to_post(&self.post_id, &self.me.id, emoji)
            .await
            .context("could not save your reaction")?;
        if already {
            self.feedback.say("Reaction removed.");
        } else if emoji == LIKE {
            self.feedback.say("Liked.");
        } else {
            self.feedback.say(format!("Reacted with {emoji}."));
        }
        Ok(())
    }

    async fn react_to_comment(&mut self, name: &str, emoji: &str) -> Result<()> {
        let live = self.thread.comments().filter(|c| !c.deleted);
        let Some(target) = self.find_by_author(name, live) else {
            self.feedback.say(format!("{name} not found"));
            return Ok(());
        };
        self.store
            .react_to_comment(&self.post_id, &target.id, &self.me.id, emoji)
            .await
            .context("could not save your reaction")?;
        self.feedback.say(format!(
            "Reacted {emoji} to {}'s comment.",
            target.author.display_name
        ));
        Ok(())
    }

    fn play(&mut self, name: &str) {
        let audio = self.thread.comments().filter(|c| c.is_audio() && !c.deleted);
        match self.find_by_author(name, audio) {
            Some(comment) => {
                tracing::info!(comment = %comment.id, "playing audio comment");
                self.feedback
                    .say(format!("Playing {}'s comment", comment.author.display_name));
                self.now_playing = Some(comment.id);
            }
            None => self.feedback.say(format!("{name} not found")),
        }
    }

    async fn write_comment(&mut self, parent_id: Option<String>, text: String) -> Result<()> {
        let comment = NewComment {
            author: self.me.clone(),
            parent_id,
            payload: CommentPayload::Text { text },
        };
        self.store
            .create_comment(&self.post_id, comment)
            .await
            .context("could not send your comment")?;
        Ok(())
    }

    async fn reply(&mut self, name: &str, text: String) -> Result<()> {
        let live = self.thread.comments().filter(|c| !c.deleted);
        let Some(target) = self.find_by_author(name, live) else {
            self.feedback.say(format!("{name} not found"));
            return Ok(());
        };
        self.write_comment(Some(target.id), text).await?;
        self.feedback
            .say(format!("Replied to {}.", target.author.display_name));
        Ok(())
    }

    async fn start_recording(&mut self) -> Result<()> {
        match self.recorder.start().await {
            Ok(()) => {
                self.feedback.say("Recording your comment.");
                Ok(())
            }
            Err(RecordingError::Device(err)) => {
                self.feedback.say(err.user_message());
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn send_voice_comment(&mut self) -> Result<()> {
        let media = self.recorder.begin_upload()?;
        let published =
            publish_voice_comment(self.store.as_ref(), &self.post_id, self.me.clone(), &media)
                .await;
        match published {
            Ok(comment) => {
                self.recorder.upload_succeeded()?;
                tracing::info!(
                    comment = %comment.id,
                    seconds = media.duration_seconds,
                    "voice comment sent"
                );
                self.feedback.say("Voice comment sent.");
                Ok(())
            }
            Err(err) => {
                self.recorder.upload_failed()?;
                Err(err.context("could not send your voice comment"))
            }
        }
    }
}

async fn publish_voice_comment(
    store: &dyn SocialStore,
    post_id: &str,
    author: Author,
    media: &CapturedMedia,
) -> Result<CommentRecord> {
    let url = store
        .upload_media(media.payload.clone(), "audio/webm")
        .await?;
    let comment = NewComment {
        author,
        parent_id: None,
        payload: CommentPayload::Audio {
            url,
            duration_seconds: media.duration_seconds,
        },
    };
    store.create_comment(post_id, comment).await
}

#[async_trait]
impl Screen for ThreadScreen {
    fn name(&self) -> &'static str {
        "thread"
    }

    fn hints(&self) -> ClassifierHints {
        let mut hints = ClassifierHints::for_intents(THREAD_INTENTS);
        let authors = self
            .post
            .author
            .iter()
            .chain(self.thread.comments().map(|c| &c.author));
        for author in authors {
            if !hints.display_names.contains(&author.display_name) {
                hints.display_names.push(author.display_name.clone());
            }
        }
        hints
    }

    async fn dispatch(&mut self, intent: &ClassifiedIntent) -> Result<()> {
        let view = ThreadScreenView {
            recording: self.recorder.state(),
        };
        let Some(action) = route_thread(intent, view) else {
            tracing::debug!(
                intent = %intent.intent,
                state = ?view.recording,
                "intent not applicable"
            );
            return Ok(());
        };

        match action {
            ThreadAction::LikePost => self.react_to_post(LIKE).await?,
            ThreadAction::ReactToPost { emoji } => self.react_to_post(&emoji).await?,
            ThreadAction::ReactToComment { name, emoji } => {
                self.react_to_comment(&name, &emoji).await?
            }
            ThreadAction::Share => {
                let link = self.share_link();
                self.feedback.say(format!("Share link: {link}"));
            }
            ThreadAction::PlayComment { name } => self.play(&name),
            ThreadAction::Comment { text } => {
                self.write_comment(None, text).await?;
                self.feedback.say("Comment sent.");
            }
            ThreadAction::Reply { name, text } => self.reply(&name, text).await?,
            ThreadAction::StartRecording => self.start_recording().await?,
            ThreadAction::StopRecording => {
                let seconds = self.recorder.stop()?;
                self.feedback
                    .say(format!("Recorded {seconds}s. Say send to post it."));
            }
            ThreadAction::DiscardRecording => {
                self.recorder.cancel();
                self.feedback.say("Recording discarded.");
            }
            ThreadAction::SendVoiceComment => self.send_voice_comment().await?,
            ThreadAction::GoBack => {
                self.recorder.dispose();
                self.now_playing = None;
                self.navigator.navigate(Route::Back);
            }
        }
        Ok(())
    }

    async fn next_event(&mut self) -> ScreenEvent {
        loop {
            let live = self.subscription.is_some();
            let update = tokio::select! {
                _ = self.recorder.next_tick() => return ScreenEvent::Tick,
                snapshot = next_snapshot(&mut self.subscription), if live => snapshot,
            };
            match update {
                Some(snapshot) => return ScreenEvent::PostUpdated(snapshot),
                None => {
                    tracing::warn!(post = %self.post_id, "post feed closed");
                    self.subscription = None;
                }
            }
        }
    }

    fn on_tick(&mut self) {
        if let TickOutcome::AutoStopped(seconds) = self.recorder.on_tick() {
            self.feedback
                .say(format!("Recording limit reached at {seconds}s."));
        }
    }

    fn on_post_updated(&mut self, snapshot: PostSnapshot) {
        self.thread = build_thread(&snapshot.comments);
        self.post = snapshot.post;
        if let Some(id) = &self.now_playing
            && self.thread.find(id).is_none_or(|c| c.deleted)
        {
            self.now_playing = None;
        }
        tracing::debug!(
            post = %self.post_id,
            comments = self.thread.comment_count(),
            "thread updated"
        );
    }

    fn dispose(&mut self) {
        self.recorder.dispose();
        self.now_playing = None;
        self.subscription = None;
    }
}

async fn next_snapshot(subscription: &mut Option<PostSubscription>) -> Option<PostSnapshot> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}
