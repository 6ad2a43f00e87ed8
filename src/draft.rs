use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attachment {
    Image { url: String },
    Audio { url: String, duration_seconds: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    pub author: Author,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
    pub poll: Option<Poll>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftError {
    Empty,
    PollNeedsQuestion,
    PollNeedsOptions,
    /// An image and a voice clip cannot share one post.
    ConflictingMedia,
}

impl std::fmt::Display for DraftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DraftError::Empty => write!(f, "nothing to post yet"),
            DraftError::PollNeedsQuestion => write!(f, "the poll needs a question"),
            DraftError::PollNeedsOptions => write!(f, "the poll needs at least two options"),
            DraftError::ConflictingMedia => {
                write!(f, "a post can carry an image or a voice clip, not both")
            }
        }
    }
}

impl std::error::Error for DraftError {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostDraft {
    text: Option<String>,
    attachment: Option<Attachment>,
    poll: Option<Poll>,
}

impl PostDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn poll(&self) -> Option<&Poll> {
        self.poll.as_ref()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        let text = text.trim();
        self.text = (!text.is_empty()).then(|| text.to_string());
    }

    /// Replaces media of the same kind; media of the other kind is refused.
    pub fn attach(&mut self, attachment: Attachment) -> Result<(), DraftError> {
        if let Some(existing) = &self.attachment
            && std::mem::discriminant(existing) != std::mem::discriminant(&attachment)
        {
            return Err(DraftError::ConflictingMedia);
        }
        self.attachment = Some(attachment);
        Ok(())
    }

    pub fn has_image(&self) -> bool {
        matches!(self.attachment, Some(Attachment::Image { .. }))
    }

    pub fn set_poll(&mut self, question: &str, options: &str) {
        self.poll = Some(Poll {
            question: question.trim().to_string(),
            options: split_options(options),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.attachment.is_none() && self.poll.is_none()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn finalize(&self, author: Author) -> Result<NewPost, DraftError> {
        if self.is_empty() {
            return Err(DraftError::Empty);
        }
        if let Some(poll) = &self.poll {
            if poll.question.is_empty() {
                return Err(DraftError::PollNeedsQuestion);
            }
            if poll.options.len() < 2 {
                return Err(DraftError::PollNeedsOptions);
            }
        }
        Ok(NewPost {
            author,
            text: self.text.clone(),
            attachment: self.attachment.clone(),
            poll: self.poll.clone(),
        })
    }
}

/// Split a spoken option list ("red, green or blue") into distinct entries.
fn split_options(raw: &str) -> Vec<String> {
    let mut options: Vec<String> = Vec::new();
    for part in raw.split([',', ';']).flat_map(|part| part.split(" or ")) {
        let option = part.trim().trim_start_matches("and ").trim();
        if option.is_empty() {
            continue;
        }
        if !options.iter().any(|known| known.eq_ignore_ascii_case(option)) {
            options.push(option.to_string());
        }
    }
    options
}
