use crate::draft::{Attachment, Author, NewPost, Poll};
use crate::reactions::{ReactionMap, toggle_reaction};
use crate::thread::{CommentPayload, CommentRecord};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: String,
    /// Absent on legacy documents; screens treat such posts as anonymous.
    pub author: Option<Author>,
    pub created_at: DateTime<Utc>,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
    pub poll: Option<Poll>,
    #[serde(default)]
    pub reactions: ReactionMap,
}

/// Push update for one post: the post itself plus its raw comment documents.
#[derive(Debug, Clone, PartialEq)]
pub struct PostSnapshot {
    pub post: PostRecord,
    pub comments: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub author: Author,
    pub parent_id: Option<String>,
    pub payload: CommentPayload,
}

/// Live feed of [`PostSnapshot`]s. Dropping it unsubscribes.
pub struct PostSubscription {
    rx: mpsc::UnboundedReceiver<PostSnapshot>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl PostSubscription {
    pub fn new(
        rx: mpsc::UnboundedReceiver<PostSnapshot>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            rx,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub async fn next(&mut self) -> Option<PostSnapshot> {
        self.rx.recv().await
    }
}

impl Drop for PostSubscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

#[async_trait]
pub trait SocialStore: Send + Sync {
    /// Store a media blob and return the URL it is served from.
    async fn upload_media(&self, bytes: Arc<[u8]>, mime_type: &str) -> Result<String>;
    async fn create_post(&self, post: NewPost) -> Result<PostRecord>;
    async fn create_comment(&self, post_id: &str, comment: NewComment) -> Result<CommentRecord>;
    async fn react_to_post(&self, post_id: &str, user_id: &str, emoji: &str) -> Result<()>;
    async fn react_to_comment(
        &self,
        post_id: &str,
        comment_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<()>;
    async fn listen_to_post(&self, post_id: &str) -> Result<PostSubscription>;
}

#[derive(Debug)]
struct StoredPost {
    record: PostRecord,
    comments: Vec<Value>,
}

#[derive(Debug, Default)]
struct StoreState {
    next_id: u64,
    posts: BTreeMap<String, StoredPost>,
    media: HashMap<String, (String, Arc<[u8]>)>,
    listeners: HashMap<u64, (String, mpsc::UnboundedSender<PostSnapshot>)>,
}

impl StoreState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn snapshot(&self, post_id: &str) -> Option<PostSnapshot> {
        self.posts.get(post_id).map(|stored| PostSnapshot {
            post: stored.record.clone(),
            comments: stored.comments.clone(),
        })
    }

    fn publish(&mut self, post_id: &str) {
        let Some(snapshot) = self.snapshot(post_id) else {
            return;
        };
        self.listeners.retain(|_, (listening_to, tx)| {
            if listening_to.as_str() != post_id {
                return true;
            }
            tx.send(snapshot.clone()).is_ok()
        });
    }

    fn post_mut(&mut self, post_id: &str) -> Result<&mut StoredPost> {
        self.posts
            .get_mut(post_id)
            .ok_or_else(|| anyhow!("post {post_id} not found"))
    }
}

/// Store kept entirely in memory. Backs the CLI and the screen tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, to exercise rollback paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn posts(&self) -> Vec<PostRecord> {
        let state = self.state.lock().expect("store mutex poisoned");
        state.posts.values().map(|stored| stored.record.clone()).collect()
    }

    pub fn post(&self, post_id: &str) -> Option<PostSnapshot> {
        let state = self.state.lock().expect("store mutex poisoned");
        state.snapshot(post_id)
    }

    pub fn media(&self, url: &str) -> Option<Arc<[u8]>> {
        let state = self.state.lock().expect("store mutex poisoned");
        state.media.get(url).map(|(_, bytes)| bytes.clone())
    }

    pub fn listener_count(&self) -> usize {
        let state = self.state.lock().expect("store mutex poisoned");
        state.listeners.len()
    }

    /// Append a raw comment document as-is, bypassing validation.
    pub fn insert_raw_comment(&self, post_id: &str, document: Value) -> Result<()> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.post_mut(post_id)?.comments.push(document);
        state.publish(post_id);
        Ok(())
    }

    /// Soft delete: blank the content, keep the document so replies stay attached.
    pub fn delete_comment(&self, post_id: &str, comment_id: &str) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock().expect("store mutex poisoned");
        let stored = state.post_mut(post_id)?;
        let document = find_comment_mut(&mut stored.comments, comment_id)?;
        document["deleted"] = Value::Bool(true);
        document["payload"] = serde_json::to_value(CommentPayload::default())?;
        state.publish(post_id);
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("store is unavailable");
        }
        Ok(())
    }
}

fn find_comment_mut<'a>(comments: &'a mut [Value], comment_id: &str) -> Result<&'a mut Value> {
    comments
        .iter_mut()
        .find(|document| document.get("id").and_then(Value::as_str) == Some(comment_id))
        .ok_or_else(|| anyhow!("comment {comment_id} not found"))
}

#[async_trait]
impl SocialStore for InMemoryStore {
    async fn upload_media(&self, bytes: Arc<[u8]>, mime_type: &str) -> Result<String> {
        self.check_writable()?;
        let mut state = self.state.lock().expect("store mutex poisoned");
        let url = format!("memory://{}", state.next_id("media"));
        state
            .media
            .insert(url.clone(), (mime_type.to_string(), bytes));
        Ok(url)
    }

    async fn create_post(&self, post: NewPost) -> Result<PostRecord> {
        self.check_writable()?;
        let mut state = self.state.lock().expect("store mutex poisoned");
        let record = PostRecord {
            id: state.next_id("post"),
            author: Some(post.author),
            created_at: Utc::now(),
            text: post.text,
            attachment: post.attachment,
            poll: post.poll,
            reactions: ReactionMap::new(),
        };
        state.posts.insert(
            record.id.clone(),
            StoredPost {
                record: record.clone(),
                comments: Vec::new(),
            },
        );
        tracing::debug!(post = %record.id, "post created");
        Ok(record)
    }

    async fn create_comment(&self, post_id: &str, comment: NewComment) -> Result<CommentRecord> {
        self.check_writable()?;
        let mut state = self.state.lock().expect("store mutex poisoned");
        let id = state.next_id("comment");
        let record = CommentRecord {
            id,
            author: comment.author,
            created_at: Utc::now(),
            parent_id: comment.parent_id,
            payload: comment.payload,
            reactions: ReactionMap::new(),
            deleted: false,
        };
        let document = serde_json::to_value(&record).context("failed to encode comment")?;
        state.post_mut(post_id)?.comments.push(document);
        state.publish(post_id);
        Ok(record)
    }

    async fn react_to_post(&self, post_id: &str, user_id: &str, emoji: &str) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock().expect("store mutex poisoned");
        let stored = state.post_mut(post_id)?;
        toggle_reaction(&mut stored.record.reactions, user_id, emoji);
        state.publish(post_id);
        Ok(())
    }

    async fn react_to_comment(
        &self,
        post_id: &str,
        comment_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock().expect("store mutex poisoned");
        let stored = state.post_mut(post_id)?;
        let document = find_comment_mut(&mut stored.comments, comment_id)?;
        let mut reactions: ReactionMap = document
            .get("reactions")
            .cloned()
            .map(serde_json::from_value::<ReactionMap>)
            .transpose()
            .context("stored reactions are malformed")?
            .unwrap_or_default();
        toggle_reaction(&mut reactions, user_id, emoji);
        document["reactions"] = serde_json::to_value(reactions)?;
        state.publish(post_id);
        Ok(())
    }

    async fn listen_to_post(&self, post_id: &str) -> Result<PostSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = {
            let mut state = self.state.lock().expect("store mutex poisoned");
            let snapshot = state
                .snapshot(post_id)
                .ok_or_else(|| anyhow!("post {post_id} not found"))?;
            let _ = tx.send(snapshot);
            state.next_id += 1;
            let key = state.next_id;
            state.listeners.insert(key, (post_id.to_string(), tx));
            key
        };

        let state = Arc::downgrade(&self.state);
        Ok(PostSubscription::new(rx, move || {
            if let Some(state) = state.upgrade()
                && let Ok(mut state) = state.lock()
            {
                state.listeners.remove(&key);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryStore, NewComment, SocialStore};
    use crate::draft::{Author, PostDraft};
    use crate::thread::{CommentPayload, build_thread};

    fn author() -> Author {
        Author {
            id: "u1".to_string(),
            display_name: "Ana".to_string(),
        }
    }

    async fn seeded() -> (InMemoryStore, String) {
        let store = InMemoryStore::new();
        let mut draft = PostDraft::new();
        draft.set_text("hello");
        let post = store
            .create_post(draft.finalize(author()).expect("draft"))
            .await
            .expect("post");
        (store, post.id)
    }

    #[tokio::test]
    async fn subscription_receives_initial_and_updates_then_unsubscribes() {
        let (store, post_id) = seeded().await;
        let mut subscription = store.listen_to_post(&post_id).await.expect("listen");
        assert_eq!(store.listener_count(), 1);

        let initial = subscription.next().await.expect("initial");
        assert!(initial.comments.is_empty());

        store
            .create_comment(
                &post_id,
                NewComment {
                    author: author(),
                    parent_id: None,
                    payload: CommentPayload::Text {
                        text: "first".to_string(),
                    },
                },
            )
            .await
            .expect("comment");
        let update = subscription.next().await.expect("update");
        assert_eq!(update.comments.len(), 1);

        drop(subscription);
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn post_reactions_toggle() {
        let (store, post_id) = seeded().await;
        store.react_to_post(&post_id, "u2", "👍").await.expect("react");
        assert_eq!(store.post(&post_id).expect("post").post.reactions.len(), 1);
        store.react_to_post(&post_id, "u2", "👍").await.expect("react");
        assert!(store.post(&post_id).expect("post").post.reactions.is_empty());
    }

    #[tokio::test]
    async fn comment_reactions_and_soft_delete() {
        let (store, post_id) = seeded().await;
        let parent = store
            .create_comment(
                &post_id,
                NewComment {
                    author: author(),
                    parent_id: None,
                    payload: CommentPayload::Text {
                        text: "parent".to_string(),
                    },
                },
            )
            .await
            .expect("parent");
        store
            .create_comment(
                &post_id,
                NewComment {
                    author: author(),
                    parent_id: Some(parent.id.clone()),
                    payload: CommentPayload::Text {
                        text: "reply".to_string(),
                    },
                },
            )
            .await
            .expect("reply");

        store
            .react_to_comment(&post_id, &parent.id, "u3", "❤️")
            .await
            .expect("react");
        store.delete_comment(&post_id, &parent.id).expect("delete");

        let snapshot = store.post(&post_id).expect("post");
        let view = build_thread(&snapshot.comments);
        let root = &view.roots[0];
        assert!(root.comment.deleted);
        assert_eq!(root.comment.payload, CommentPayload::default());
        assert_eq!(root.comment.reactions.get("u3").map(String::as_str), Some("❤️"));
        assert_eq!(root.replies.len(), 1);
    }

    #[tokio::test]
    async fn failing_writes_surface_errors() {
        let (store, post_id) = seeded().await;
        store.set_fail_writes(true);
        assert!(store.react_to_post(&post_id, "u1", "👍").await.is_err());
        assert!(store.upload_media(vec![1u8].into(), "audio/webm").await.is_err());
    }
}
