use crate::nlu::ClassifiedIntent;
use crate::recording::RecordingState;

pub const COMPOSER_INTENTS: &[&str] = &[
    "start_recording",
    "stop_recording",
    "re_record",
    "discard_recording",
    "set_text",
    "generate_image",
    "create_poll",
    "clear",
    "post",
    "go_back",
];

pub const THREAD_INTENTS: &[&str] = &[
    "like_post",
    "react_post",
    "react_comment",
    "share",
    "play_comment",
    "comment",
    "reply",
    "start_recording",
    "stop_recording",
    "discard_recording",
    "send_voice_comment",
    "go_back",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposerAction {
    StartRecording,
    StopRecording,
    ReRecord,
    DiscardRecording,
    SetText(String),
    GenerateImage { prompt: String },
    CreatePoll { question: String, options: String },
    Clear,
    Post,
    GoBack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadAction {
    LikePost,
    ReactToPost { emoji: String },
    ReactToComment { name: String, emoji: String },
    Share,
    PlayComment { name: String },
    Comment { text: String },
    Reply { name: String, text: String },
    StartRecording,
    StopRecording,
    DiscardRecording,
    SendVoiceComment,
    GoBack,
}

/// What the composer looks like when a command arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposerView {
    pub recording: RecordingState,
    pub has_content: bool,
}

/// `None` when the intent does not apply in this state or misses a required slot.
pub fn route_composer(intent: &ClassifiedIntent, view: ComposerView) -> Option<ComposerAction> {
    use RecordingState::{Idle, Posted, Preview, Recording, Uploading};

    let action = match intent.intent.as_str() {
        "go_back" => ComposerAction::GoBack,
        "start_recording" => match view.recording {
            Idle | Preview | Posted => ComposerAction::StartRecording,
            Recording | Uploading => return None,
        },
        "stop_recording" if view.recording == Recording => ComposerAction::StopRecording,
        "re_record" if view.recording == Preview => ComposerAction::ReRecord,
        "discard_recording" if matches!(view.recording, Recording | Preview) => {
            ComposerAction::DiscardRecording
        }
        "set_text" => ComposerAction::SetText(intent.slot("text")?.to_string()),
        "generate_image" => ComposerAction::GenerateImage {
            prompt: intent.slot("prompt")?.to_string(),
        },
        "create_poll" => ComposerAction::CreatePoll {
            question: intent.slot("question")?.to_string(),
            options: intent.slot("options").unwrap_or_default().to_string(),
        },
        "clear" => ComposerAction::Clear,
        "post" if view.recording != Recording && view.recording != Uploading => {
            if !view.has_content && view.recording != Preview {
                return None;
            }
            ComposerAction::Post
        }
        _ => return None,
    };
    Some(action)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadScreenView {
    pub recording: RecordingState,
}

pub fn route_thread(intent: &ClassifiedIntent, view: ThreadScreenView) -> Option<ThreadAction> {
    use RecordingState::{Idle, Posted, Preview, Recording};

    let action = match intent.intent.as_str() {
        "go_back" => ThreadAction::GoBack,
        "like_post" => ThreadAction::LikePost,
        "react_post" => ThreadAction::ReactToPost {
            emoji: intent.slot("emoji")?.to_string(),
        },
        "react_comment" => ThreadAction::ReactToComment {
            name: intent.slot("name")?.to_string(),
            emoji: intent.slot("emoji")?.to_string(),
        },
        "share" => ThreadAction::Share,
        "play_comment" => ThreadAction::PlayComment {
            name: intent.slot("name")?.to_string(),
        },
        "comment" => ThreadAction::Comment {
            text: intent.slot("text")?.to_string(),
        },
        "reply" => ThreadAction::Reply {
            name: intent.slot("name")?.to_string(),
            text: intent.slot("text")?.to_string(),
        },
        "start_recording" if matches!(view.recording, Idle | Preview | Posted) => {
            ThreadAction::StartRecording
        }
        "stop_recording" if view.recording == Recording => ThreadAction::StopRecording,
        "discard_recording" if matches!(view.recording, Recording | Preview) => {
            ThreadAction::DiscardRecording
        }
        "send_voice_comment" if view.recording == Preview => ThreadAction::SendVoiceComment,
        _ => return None,
    };
    Some(action)
}

/// Case-insensitive substring match of a spoken name against a roster. First match
/// in roster order wins.
pub fn match_display_name<'a, I>(query: &str, roster: I) -> Option<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    roster
        .into_iter()
        .position(|name| name.to_lowercase().contains(&needle))
}
