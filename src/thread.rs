use crate::draft::Author;
use crate::reactions::ReactionMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommentPayload {
    Text { text: String },
    Image { url: String },
    Audio { url: String, duration_seconds: u32 },
}

impl Default for CommentPayload {
    fn default() -> Self {
        CommentPayload::Text {
            text: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: String,
    pub author: Author,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub payload: CommentPayload,
    #[serde(default)]
    pub reactions: ReactionMap,
    #[serde(default)]
    pub deleted: bool,
}

impl CommentRecord {
    pub fn is_audio(&self) -> bool {
        matches!(self.payload, CommentPayload::Audio { .. })
    }
}

/// Decode one stored comment. Nulls, missing ids and missing authors yield `None`.
pub fn decode_comment(value: &Value) -> Option<CommentRecord> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value::<CommentRecord>(value.clone()) {
        Ok(comment) if !comment.id.is_empty() && !comment.author.id.is_empty() => Some(comment),
        Ok(_) => None,
        Err(err) => {
            tracing::debug!(error = %err, "skipping malformed comment");
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadNode {
    pub comment: CommentRecord,
    pub replies: Vec<CommentRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadView {
    pub roots: Vec<ThreadNode>,
}

impl ThreadView {
    pub fn comment_count(&self) -> usize {
        self.roots.iter().map(|node| 1 + node.replies.len()).sum()
    }

    /// Every comment in display order: each root followed by its replies.
    pub fn comments(&self) -> impl Iterator<Item = &CommentRecord> {
        self.roots
            .iter()
            .flat_map(|node| std::iter::once(&node.comment).chain(node.replies.iter()))
    }

    pub fn find(&self, id: &str) -> Option<&CommentRecord> {
        self.comments().find(|comment| comment.id == id)
    }
}

/// Top-level comments with chronological replies. Deeper chains flatten onto their
/// top-level ancestor; a broken chain (missing parent, cycle) makes the comment top-level.
pub fn build_thread(raw: &[Value]) -> ThreadView {
    let mut comments: Vec<CommentRecord> = raw.iter().filter_map(decode_comment).collect();
    comments.sort_by_key(|comment| comment.created_at);

    let mut seen = HashSet::new();
    comments.retain(|comment| seen.insert(comment.id.clone()));

    let parents: HashMap<&str, Option<&str>> = comments
        .iter()
        .map(|comment| (comment.id.as_str(), comment.parent_id.as_deref()))
        .collect();

    let roots_of: Vec<Option<String>> = comments
        .iter()
        .map(|comment| resolve_root(&comment.id, &parents).map(str::to_string))
        .collect();

    let mut view = ThreadView::default();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (comment, root) in comments.iter().zip(&roots_of) {
        if root.is_none() {
            index.insert(comment.id.clone(), view.roots.len());
            view.roots.push(ThreadNode {
                comment: comment.clone(),
                replies: Vec::new(),
            });
        }
    }
    for (comment, root) in comments.into_iter().zip(roots_of) {
        if let Some(root) = root
            && let Some(&slot) = index.get(&root)
        {
            view.roots[slot].replies.push(comment);
        }
    }
    view
}

/// Top-level ancestor of `id`, or `None` when `id` is itself top-level.
fn resolve_root<'a>(id: &'a str, parents: &HashMap<&'a str, Option<&'a str>>) -> Option<&'a str> {
    let mut current = id;
    let mut hops = 0usize;
    while let Some(Some(parent)) = parents.get(current) {
        if !parents.contains_key(parent) {
            break;
        }
        current = *parent;
        hops += 1;
        if hops > parents.len() {
            return None;
        }
    }
    (current != id).then_some(current)
}
