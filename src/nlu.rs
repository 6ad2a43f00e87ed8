use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub const UNKNOWN_INTENT: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedIntent {
    pub intent: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub slots: BTreeMap<String, String>,
}

impl ClassifiedIntent {
    pub fn new(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            slots: BTreeMap::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN_INTENT)
    }

    pub fn with_slot(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.slots.insert(name.into(), value.into());
        self
    }

    /// Slot value with surrounding whitespace removed; blank values count as absent.
    pub fn slot(&self, name: &str) -> Option<&str> {
        self.slots
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn is_unknown(&self) -> bool {
        self.intent == UNKNOWN_INTENT
    }
}

/// Context passed along with an utterance to bias slot extraction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassifierHints {
    pub intents: Vec<String>,
    pub display_names: Vec<String>,
    pub group_names: Vec<String>,
    pub theme_names: Vec<String>,
}

impl ClassifierHints {
    pub fn for_intents(intents: &[&str]) -> Self {
        Self {
            intents: intents.iter().map(|intent| intent.to_string()).collect(),
            ..Self::default()
        }
    }

    fn allows(&self, intent: &str) -> bool {
        self.intents.is_empty() || self.intents.iter().any(|known| known == intent)
    }
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str, hints: &ClassifierHints) -> Result<ClassifiedIntent>;
}

/// Hosted language model classifier speaking the OpenAI Responses API.
#[derive(Debug, Clone)]
pub struct OpenAiClassifier {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiClassifier {
    pub fn new(api_key: String, model: String, endpoint: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            endpoint,
        }
    }
}

#[async_trait]
impl IntentClassifier for OpenAiClassifier {
    async fn classify(&self, text: &str, hints: &ClassifierHints) -> Result<ClassifiedIntent> {
        let body = json!({
            "model": self.model,
            "instructions": classifier_instructions(hints),
            "input": text,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to call classification endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("classification API error {status}: {body}");
        }

        let json: Value = response
            .json()
            .await
            .context("failed to decode classification response JSON")?;

        let answer = extract_text(&json).unwrap_or_default();
        let intent = parse_classification(&answer);
        if !hints.allows(&intent.intent) {
            tracing::debug!(
                intent = %intent.intent,
                "model returned intent outside screen vocabulary"
            );
            return Ok(ClassifiedIntent::unknown());
        }
        Ok(intent)
    }
}

fn classifier_instructions(hints: &ClassifierHints) -> String {
    let mut prompt = String::from(
        "Classify the user's voice command for a social app. Reply with JSON only: \
         {\"intent\": string, \"slots\": {string: string}}. Use \"unknown\" when nothing fits.\n",
    );
    if !hints.intents.is_empty() {
        prompt.push_str(&format!("Allowed intents: {}.\n", hints.intents.join(", ")));
    }
    let lists = [
        ("Known people", &hints.display_names),
        ("Known groups", &hints.group_names),
        ("Known themes", &hints.theme_names),
    ];
    for (label, values) in lists {
        if !values.is_empty() {
            prompt.push_str(&format!("{label}: {}.\n", values.join(", ")));
        }
    }
    prompt.push_str(
        "Slot names: text, prompt, question, options, name, emoji. \
         Only include slots that the command states.",
    );
    prompt
}

fn extract_text(root: &Value) -> Option<String> {
    if let Some(text) = root.get("output_text").and_then(Value::as_str) {
        return Some(text.to_string());
    }

    let output = root.get("output")?.as_array()?;
    let fragments: Vec<String> = output
        .iter()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| {
            matches!(
                part.get("type").and_then(Value::as_str).unwrap_or_default(),
                "output_text" | "text"
            )
        })
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .map(|text| text.trim().to_string())
        .collect();

    if fragments.is_empty() {
        None
    } else {
        Some(fragments.join("\n"))
    }
}

/// Lenient decode of the model's answer. Anything unusable becomes `unknown`.
pub fn parse_classification(answer: &str) -> ClassifiedIntent {
    let trimmed = answer
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        tracing::debug!("classifier answer is not JSON");
        return ClassifiedIntent::unknown();
    };

    let Some(intent) = value
        .get("intent")
        .and_then(Value::as_str)
        .map(|intent| intent.trim().to_ascii_lowercase())
        .filter(|intent| !intent.is_empty())
    else {
        return ClassifiedIntent::unknown();
    };

    let mut classified = ClassifiedIntent::new(intent);
    if let Some(slots) = value.get("slots").and_then(Value::as_object) {
        for (name, raw) in slots {
            let text = match raw {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
                _ => continue,
            };
            classified.slots.insert(name.clone(), text);
        }
    }
    classified
}

/// Offline rule-based classifier used when no model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, text: &str, hints: &ClassifierHints) -> Result<ClassifiedIntent> {
        let classified = classify_keywords(text);
        if hints.allows(&classified.intent) {
            Ok(classified)
        } else {
            Ok(ClassifiedIntent::unknown())
        }
    }
}

fn classify_keywords(text: &str) -> ClassifiedIntent {
    let lower = text.trim().to_lowercase();
    let lower = lower.trim_end_matches(['.', '!', '?']);

    if lower.is_empty() {
        return ClassifiedIntent::unknown();
    }
    if lower == "back" || lower.contains("go back") {
        return ClassifiedIntent::new("go_back");
    }
    if lower.contains("re-record") || lower.contains("record again") || lower.contains("redo") {
        return ClassifiedIntent::new("re_record");
    }
    if lower.contains("discard") || lower.contains("cancel recording") {
        return ClassifiedIntent::new("discard_recording");
    }
    if lower.starts_with("stop") {
        return ClassifiedIntent::new("stop_recording");
    }
    if lower.contains("start recording") || lower == "record" || lower.starts_with("record ") {
        return ClassifiedIntent::new("start_recording");
    }
    if let Some(prompt) = after_any(lower, IMAGE_PREFIXES) {
        return ClassifiedIntent::new("generate_image").with_slot("prompt", prompt);
    }
    if lower.contains("poll") {
        return poll_intent(lower);
    }
    if lower.starts_with("clear") {
        return ClassifiedIntent::new("clear");
    }
    if lower.starts_with("send") {
        return ClassifiedIntent::new("send_voice_comment");
    }
    if lower == "post" || lower.starts_with("post it") || lower.starts_with("publish") {
        return ClassifiedIntent::new("post");
    }
    if lower.starts_with("share") {
        return ClassifiedIntent::new("share");
    }
    if lower.starts_with("like") {
        return ClassifiedIntent::new("like_post");
    }
    if let Some(rest) = lower.strip_prefix("react with ") {
        return ClassifiedIntent::new("react_post").with_slot("emoji", emoji_for(rest));
    }
    if let Some(rest) = lower.strip_prefix("play ") {
        return ClassifiedIntent::new("play_comment").with_slot("name", comment_author(rest));
    }
    if let Some(rest) = lower.strip_prefix("reply to ") {
        let (name, body) = rest.split_once(" saying ").unwrap_or((rest, ""));
        return ClassifiedIntent::new("reply")
            .with_slot("name", name.trim())
            .with_slot("text", original_case(text, body));
    }
    if let Some(body) = after_any(lower, &["comment ", "say "]) {
        return ClassifiedIntent::new("comment").with_slot("text", original_case(text, &body));
    }
    if let Some(body) = after_any(lower, &["write ", "type "]) {
        return ClassifiedIntent::new("set_text").with_slot("text", original_case(text, &body));
    }
    ClassifiedIntent::unknown()
}

const IMAGE_PREFIXES: &[&str] = &[
    "generate an image of",
    "generate image of",
    "image of",
    "picture of",
];

fn after_any(lower: &str, markers: &[&str]) -> Option<String> {
    markers.iter().find_map(|marker| {
        lower
            .find(marker)
            .map(|index| lower[index + marker.len()..].trim().to_string())
            .filter(|rest| !rest.is_empty())
    })
}

/// Recover the caller's capitalisation for a lowercased suffix of `original`.
fn original_case(original: &str, lower_suffix: &str) -> String {
    let original = original.trim().trim_end_matches(['.', '!', '?']);
    if lower_suffix.is_empty() {
        return String::new();
    }
    let chars = lower_suffix.chars().count();
    let total = original.chars().count();
    if chars > total {
        return lower_suffix.to_string();
    }
    let candidate: String = original.chars().skip(total - chars).collect();
    if candidate.to_lowercase() == lower_suffix {
        candidate
    } else {
        lower_suffix.to_string()
    }
}

fn poll_intent(lower: &str) -> ClassifiedIntent {
    let body = lower
        .split_once("poll")
        .map(|(_, rest)| rest.trim())
        .unwrap_or_default();
    let body = body
        .strip_prefix("asking")
        .or_else(|| body.strip_prefix("about"))
        .unwrap_or(body)
        .trim();
    let (question, options) = body
        .split_once("options")
        .map(|(question, options)| (question, options.trim_start_matches(':')))
        .unwrap_or((body, ""));
    let question = question.trim().trim_end_matches("with").trim();

    let mut intent = ClassifiedIntent::new("create_poll");
    if !question.is_empty() {
        intent = intent.with_slot("question", question);
    }
    if !options.trim().is_empty() {
        intent = intent.with_slot("options", options.trim());
    }
    intent
}

fn comment_author(rest: &str) -> String {
    let rest = rest
        .trim()
        .trim_start_matches("the ")
        .trim_start_matches("comment from ")
        .trim_start_matches("comment by ");
    rest.trim_end_matches(" comment")
        .trim_end_matches("'s")
        .trim()
        .to_string()
}

fn emoji_for(word: &str) -> String {
    match word.trim() {
        "heart" | "love" => "❤️",
        "laugh" | "laughing" | "haha" => "😂",
        "thumbs up" | "like" => "👍",
        "fire" => "🔥",
        "wow" | "surprise" => "😮",
        "sad" | "cry" => "😢",
        other => return other.to_string(),
    }
    .to_string()
}
