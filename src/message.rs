use crate::ai_response::TurnResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

pub const DEFAULT_SPEAKER: &str = "Game Master";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BlockKind {
    Narration,
    Dialogue,
}

/// A typed fragment of narrative text. Dialogue carries the name of whoever speaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeBlock {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl NarrativeBlock {
    pub fn narration(content: impl Into<String>) -> Self {
        NarrativeBlock {
            kind: BlockKind::Narration,
            content: content.into(),
            speaker: None,
        }
    }

    pub fn dialogue(content: impl Into<String>, speaker: impl Into<String>) -> Self {
        NarrativeBlock {
            kind: BlockKind::Dialogue,
            content: content.into(),
            speaker: Some(speaker.into()),
        }
    }
}

/// One entry of the adventure history. Content and sender never change once appended;
/// the image fields are back-filled when an illustration resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<NarrativeBlock>>,
    pub sender: Sender,
    // Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

impl ChatMessage {
    fn new(sender: Sender, content: String) -> Self {
        ChatMessage {
            id: Uuid::new_v4().to_string(),
            content,
            blocks: None,
            sender,
            timestamp: Utc::now().timestamp_millis(),
            image_prompt: None,
            image_url: None,
            image_error: None,
            suggestions: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::new(Sender::User, content.into())
    }

    pub fn ai(turn: &TurnResult) -> Self {
        let mut message = ChatMessage::new(Sender::Ai, turn.narrative.clone());
        message.blocks = Some(turn.blocks.clone());
        message.image_prompt = turn.image_prompt.clone();
        message.suggestions = turn.suggestions.clone();
        message
    }

    // The `sender: content` line fed back into prompts.
    pub fn history_line(&self) -> String {
        format!("{}: {}", self.sender, self.content)
    }

    pub fn has_inline_image(&self) -> bool {
        self.image_url
            .as_deref()
            .is_some_and(|url| url.starts_with("data:"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_line_uses_lowercase_sender() {
        let message = ChatMessage::user("I look around");
        assert_eq!(message.history_line(), "user: I look around");
    }

    #[test]
    fn dialogue_block_serializes_with_type_tag() {
        let block = NarrativeBlock::dialogue("\"Welcome.\"", "Gareth");
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "dialogue");
        assert_eq!(json["speaker"], "Gareth");

        let narration = serde_json::to_value(NarrativeBlock::narration("Rain.")).unwrap();
        assert!(narration.get("speaker").is_none());
    }
}
