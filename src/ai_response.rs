// src/ai_response.rs
//! Recovers structured game state from one Game Master completion.
//!
//! A completion is free prose interleaved with a handful of markers:
//!
//! ```text
//! [NARRATION] The fire crackles. [DIALOGUE: Gareth] "Welcome, traveler."
//! GENERATE_IMAGE: "A low-angle shot of a tavern hearth..."
//! STATE_UPDATE: {"character": {"experience": 100}}
//! SUGGESTED_ACTIONS: ["Order an ale", "Approach the hooded figure", "Leave"]
//! ```
//!
//! The directives are lifted out of the working text one after another, then whatever
//! remains is cut into narration and dialogue blocks. The text comes from a generative
//! model, so nothing here is allowed to fail: a missing or malformed piece just leaves the
//! corresponding field empty.

use crate::character::CharacterPatch;
use crate::game_state::ItemDraft;
use crate::message::{BlockKind, DEFAULT_SPEAKER, NarrativeBlock};
use serde::{Deserialize, Serialize};

pub const IMAGE_MARKER: &str = "GENERATE_IMAGE:";
pub const STATE_MARKER: &str = "STATE_UPDATE:";
pub const SUGGESTIONS_MARKER: &str = "SUGGESTED_ACTIONS:";
const NARRATION_TAG: &str = "[NARRATION]";
const DIALOGUE_TAG: &str = "[DIALOGUE";

pub const RESONANCE_MISSING: &str =
    "The magical resonance is missing. Please check your API key configuration.";
pub const MAGIC_FLICKERS: &str =
    "The ancient magic flickers momentarily, but the story continues...";

/// A sparse patch extracted from a completion. Absent fields mean "no change".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character: Option<CharacterPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Vec<ItemDraft>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub achievements: Option<Vec<String>>,
}

/// Everything one narrative exchange produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub narrative: String,
    pub blocks: Vec<NarrativeBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_updates: Option<StateUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

impl TurnResult {
    // A degraded result carrying a single narration block.
    pub fn placeholder(text: &str) -> Self {
        TurnResult {
            narrative: text.to_string(),
            blocks: vec![NarrativeBlock::narration(text)],
            state_updates: None,
            image_prompt: None,
            suggestions: None,
        }
    }
}

/// Parses a raw completion. Total: every input, including the empty string, yields a result.
pub fn parse_response(raw: &str) -> TurnResult {
    let mut text = raw.to_string();

    let image_prompt = take_image_directive(&mut text);
    let state_updates = take_json_directive::<StateUpdate>(&mut text, STATE_MARKER, b'{', b'}');
    let suggestions = take_json_directive::<Vec<String>>(&mut text, SUGGESTIONS_MARKER, b'[', b']');

    let narrative = text.trim().to_string();
    let mut blocks = segment_blocks(&narrative);
    if blocks.is_empty() && !narrative.is_empty() {
        blocks.push(NarrativeBlock::narration(narrative.clone()));
    }

    TurnResult {
        narrative,
        blocks,
        state_updates,
        image_prompt,
        suggestions,
    }
}

// ── Directives ──────────────────────────────────────────────────────

// Finds the first `GENERATE_IMAGE: "<text>"` with a non-empty quoted payload and removes it.
// When the directive sat on its own line the emptied line goes with it.
fn take_image_directive(text: &mut String) -> Option<String> {
    let mut from = 0;
    while let Some(start) = find_ignore_case(text, IMAGE_MARKER, from) {
        let after_marker = start + IMAGE_MARKER.len();
        let open = skip_whitespace(text, after_marker);
        if text.as_bytes().get(open) == Some(&b'"') {
            if let Some(len) = text[open + 1..].find('"') {
                if len > 0 {
                    let close = open + 1 + len;
                    let prompt = text[open + 1..close].to_string();
                    text.replace_range(start..close + 1, "");
                    drop_blank_line(text, start);
                    *text = text.trim().to_string();
                    return Some(prompt);
                }
            }
        }
        from = after_marker;
    }
    None
}

// Finds `<marker> <json>` where the json starts with `open`, removes the span and parses it.
// Malformed json still has its span removed so it never reaches the displayed narrative.
fn take_json_directive<T>(text: &mut String, marker: &str, open: u8, close: u8) -> Option<T>
where
    T: for<'de> Deserialize<'de>,
{
    let mut from = 0;
    while let Some(start) = find_ignore_case(text, marker, from) {
        let after_marker = start + marker.len();
        let json_start = skip_whitespace(text, after_marker);
        if text.as_bytes().get(json_start) != Some(&open) {
            from = after_marker;
            continue;
        }

        let Some(json_end) = balanced_end(text, json_start, open, close) else {
            // Unterminated payload: drop it up to the next directive so later ones still parse.
            let discard_end = next_directive(text, json_start).unwrap_or(text.len());
            log::warn!("Unterminated {} payload, discarding {} bytes", marker, discard_end - start);
            text.replace_range(start..discard_end, "");
            drop_blank_line(text, start);
            *text = text.trim().to_string();
            return None;
        };

        let parsed = match serde_json::from_str::<T>(&text[json_start..json_end]) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Failed to parse {} payload: {}", marker, e);
                None
            }
        };
        text.replace_range(start..json_end, "");
        drop_blank_line(text, start);
        *text = text.trim().to_string();
        return parsed;
    }
    None
}

fn next_directive(text: &str, from: usize) -> Option<usize> {
    [IMAGE_MARKER, STATE_MARKER, SUGGESTIONS_MARKER]
        .iter()
        .filter_map(|marker| find_ignore_case(text, marker, from))
        .min()
}

// ── Blocks ──────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Narration,
    Dialogue(Option<&'a str>),
    Text(&'a str),
}

// Splits the text on block tags, keeping the tags as typed tokens.
fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find('[') {
        let at = cursor + offset;
        match read_tag(text, at) {
            Some((token, tag_end)) => {
                if at > text_start {
                    tokens.push(Token::Text(&text[text_start..at]));
                }
                tokens.push(token);
                text_start = tag_end;
                cursor = tag_end;
            }
            None => cursor = at + 1,
        }
    }
    if text_start < text.len() {
        tokens.push(Token::Text(&text[text_start..]));
    }
    tokens
}

// Recognizes `[NARRATION]`, `[DIALOGUE]` and `[DIALOGUE: Name]` at `at`, ignoring case.
// Returns the token and the byte offset just past the closing bracket.
fn read_tag(text: &str, at: usize) -> Option<(Token<'_>, usize)> {
    if starts_with_ignore_case(text, at, NARRATION_TAG) {
        return Some((Token::Narration, at + NARRATION_TAG.len()));
    }
    if !starts_with_ignore_case(text, at, DIALOGUE_TAG) {
        return None;
    }

    let rest = at + DIALOGUE_TAG.len();
    match text.as_bytes().get(rest) {
        Some(b']') => Some((Token::Dialogue(None), rest + 1)),
        Some(b':') => {
            let name_start = rest + 1;
            let name_len = text[name_start..].find(']')?;
            if name_len == 0 {
                return None;
            }
            let name = text[name_start..name_start + name_len].trim();
            let speaker = (!name.is_empty()).then_some(name);
            Some((Token::Dialogue(speaker), name_start + name_len + 1))
        }
        _ => None,
    }
}

// Walks the tokens with a single-slot cursor: the last tag seen decides the kind and
// speaker of every text segment until the next tag.
fn segment_blocks(text: &str) -> Vec<NarrativeBlock> {
    let mut blocks = Vec::new();
    let mut kind = BlockKind::Narration;
    let mut speaker: Option<String> = None;

    for token in tokenize(text) {
        match token {
            Token::Narration => {
                kind = BlockKind::Narration;
                speaker = None;
            }
            Token::Dialogue(name) => {
                kind = BlockKind::Dialogue;
                speaker = Some(name.unwrap_or(DEFAULT_SPEAKER).to_string());
            }
            Token::Text(segment) => {
                let content = segment.trim();
                if !content.is_empty() {
                    blocks.push(NarrativeBlock {
                        kind,
                        content: content.to_string(),
                        speaker: speaker.clone(),
                    });
                }
            }
        }
    }
    blocks
}

// ── JSON fragments in utility completions ───────────────────────────

/// The span from the first `{` to the last `}`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    extract_between(text, '{', '}')
}

/// The span from the first `[` to the last `]`, if any.
pub fn extract_json_array(text: &str) -> Option<&str> {
    extract_between(text, '[', ']')
}

fn extract_between(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

// ── Scanning helpers ────────────────────────────────────────────────

fn starts_with_ignore_case(text: &str, at: usize, needle: &str) -> bool {
    text.as_bytes()
        .get(at..at + needle.len())
        .is_some_and(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

// Markers are ASCII, so every match starts on a char boundary.
fn find_ignore_case(text: &str, needle: &str, from: usize) -> Option<usize> {
    let haystack = text.as_bytes().get(from..)?;
    haystack
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
        .map(|offset| from + offset)
}

fn skip_whitespace(text: &str, from: usize) -> usize {
    text[from..]
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map_or(text.len(), |(offset, _)| from + offset)
}

// Byte offset just past the bracket closing the one at `start`, skipping over json strings.
fn balanced_end(text: &str, start: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

// Removes the line containing `at` when nothing but whitespace is left on it.
fn drop_blank_line(text: &mut String, at: usize) {
    let at = at.min(text.len());
    let line_start = text[..at].rfind('\n').map_or(0, |i| i + 1);
    let line_end = text[at..].find('\n').map_or(text.len(), |i| at + i);
    if text[line_start..line_end].trim().is_empty() {
        let remove_to = (line_end + 1).min(text.len());
        text.replace_range(line_start..remove_to, "");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_become_ordered_blocks() {
        let result = parse_response("[NARRATION] A [DIALOGUE: Bob] B [NARRATION] C");
        assert_eq!(
            result.blocks,
            vec![
                NarrativeBlock::narration("A"),
                NarrativeBlock::dialogue("B", "Bob"),
                NarrativeBlock::narration("C"),
            ]
        );
    }

    #[test]
    fn bare_dialogue_tag_defaults_to_game_master() {
        let result = parse_response("[DIALOGUE] Hello");
        assert_eq!(result.blocks, vec![NarrativeBlock::dialogue("Hello", "Game Master")]);
    }

    #[test]
    fn tags_match_regardless_of_case() {
        let result = parse_response("[narration] Smoke. [Dialogue:  Gareth  ] \"Aye.\"");
        assert_eq!(
            result.blocks,
            vec![
                NarrativeBlock::narration("Smoke."),
                NarrativeBlock::dialogue("\"Aye.\"", "Gareth"),
            ]
        );
    }

    #[test]
    fn untagged_prose_becomes_one_narration_block() {
        let result = parse_response("You walk into the tavern.");
        assert_eq!(result.blocks, vec![NarrativeBlock::narration("You walk into the tavern.")]);
        assert_eq!(result.narrative, "You walk into the tavern.");
    }

    #[test]
    fn leading_untagged_text_is_narration() {
        let result = parse_response("Rain falls. [DIALOGUE: Mira] \"Inside, quick.\"");
        assert_eq!(result.blocks[0], NarrativeBlock::narration("Rain falls."));
        assert_eq!(result.blocks[1].speaker.as_deref(), Some("Mira"));
    }

    #[test]
    fn speaker_persists_until_next_tag() {
        let tokens = tokenize("[DIALOGUE: Bob] one [unknown] two");
        assert_eq!(tokens.len(), 2);
        let result = parse_response("[DIALOGUE: Bob] one [unknown] two");
        assert_eq!(result.blocks, vec![NarrativeBlock::dialogue("one [unknown] two", "Bob")]);
    }

    #[test]
    fn empty_input_yields_empty_result() {
        let result = parse_response("");
        assert!(result.blocks.is_empty());
        assert_eq!(result.narrative, "");
        assert!(result.state_updates.is_none());
        assert!(result.image_prompt.is_none());
        assert!(result.suggestions.is_none());
    }

    #[test]
    fn lone_tag_falls_back_to_its_text() {
        let result = parse_response("[NARRATION]");
        assert_eq!(result.blocks, vec![NarrativeBlock::narration("[NARRATION]")]);
    }

    #[test]
    fn blank_dialogue_name_defaults_to_game_master() {
        let result = parse_response("[DIALOGUE:   ] Hello");
        assert_eq!(result.blocks, vec![NarrativeBlock::dialogue("Hello", "Game Master")]);
    }

    #[test]
    fn empty_dialogue_name_is_not_a_tag() {
        let result = parse_response("[DIALOGUE:] hi");
        assert_eq!(result.blocks, vec![NarrativeBlock::narration("[DIALOGUE:] hi")]);
    }

    #[test]
    fn image_directive_is_extracted_and_its_line_removed() {
        let raw = "[NARRATION] The door creaks.\nGENERATE_IMAGE: \"A creaking oak door\"\n[DIALOGUE] Who goes there?";
        let result = parse_response(raw);
        assert_eq!(result.image_prompt.as_deref(), Some("A creaking oak door"));
        assert!(!result.narrative.contains("GENERATE_IMAGE"));
        assert_eq!(result.narrative, "[NARRATION] The door creaks.\n[DIALOGUE] Who goes there?");
        assert_eq!(result.blocks.len(), 2);
    }

    #[test]
    fn only_the_first_image_directive_is_taken() {
        let raw = "GENERATE_IMAGE: \"first\"\nText.\nGENERATE_IMAGE: \"second\"";
        let result = parse_response(raw);
        assert_eq!(result.image_prompt.as_deref(), Some("first"));
        assert!(result.narrative.contains("second"));
    }

    #[test]
    fn unquoted_image_directive_is_skipped() {
        let result = parse_response("GENERATE_IMAGE: none\nGENERATE_IMAGE: \"real\"");
        assert_eq!(result.image_prompt.as_deref(), Some("real"));
    }

    #[test]
    fn state_update_is_parsed_and_removed() {
        let raw = "[NARRATION] You find coins.\nSTATE_UPDATE: {\"character\": {\"experience\": 100}, \"inventory\": [{\"name\": \"Gold Coin\", \"quantity\": 5}]}";
        let result = parse_response(raw);
        let update = result.state_updates.unwrap();
        assert_eq!(update.character.unwrap().experience, Some(100));
        let inventory = update.inventory.unwrap();
        assert_eq!(inventory[0].name, "Gold Coin");
        assert_eq!(inventory[0].quantity, 5);
        assert!(update.achievements.is_none());
        assert_eq!(result.narrative, "[NARRATION] You find coins.");
    }

    #[test]
    fn malformed_state_update_is_dropped_and_hidden() {
        let result = parse_response("STATE_UPDATE: {not valid json}\n[NARRATION] The fire dies down.");
        assert!(result.state_updates.is_none());
        assert_eq!(result.narrative, "[NARRATION] The fire dies down.");
        assert_eq!(result.blocks, vec![NarrativeBlock::narration("The fire dies down.")]);
    }

    #[test]
    fn unterminated_state_update_discards_the_tail() {
        let result = parse_response("[NARRATION] Quiet.\nSTATE_UPDATE: {\"character\": {");
        assert!(result.state_updates.is_none());
        assert_eq!(result.narrative, "[NARRATION] Quiet.");
    }

    #[test]
    fn unterminated_state_update_spares_later_suggestions() {
        let raw = "[NARRATION] Quiet.\nSTATE_UPDATE: {\"character\": {\"experience\": 100}\nSUGGESTED_ACTIONS: [\"a\",\"b\",\"c\"]";
        let result = parse_response(raw);
        assert!(result.state_updates.is_none());
        assert_eq!(
            result.suggestions,
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        assert_eq!(result.narrative, "[NARRATION] Quiet.");
    }

    #[test]
    fn unknown_item_kinds_keep_the_rest_of_the_update() {
        let raw = r#"STATE_UPDATE: {"character": {"experience": 100}, "inventory": [{"name": "Gold", "quantity": 5, "type": "currency"}], "achievements": ["rich"]}"#;
        let update = parse_response(raw).state_updates.unwrap();
        assert_eq!(update.character.unwrap().experience, Some(100));
        let inventory = update.inventory.unwrap();
        assert_eq!(inventory[0].kind, crate::game_state::ItemKind::Misc);
        assert_eq!(inventory[0].quantity, 5);
        assert_eq!(update.achievements, Some(vec!["rich".to_string()]));
    }

    #[test]
    fn oversized_stats_keep_the_rest_of_the_update() {
        let raw = r#"STATE_UPDATE: {"character": {"experience": 100, "strength": 300}}"#;
        let patch = parse_response(raw).state_updates.unwrap().character.unwrap();
        assert_eq!(patch.experience, Some(100));
        assert_eq!(patch.loose_stats.strength, Some(300));
    }

    #[test]
    fn braces_inside_strings_do_not_end_the_object() {
        let raw = "STATE_UPDATE: {\"achievements\": [\"}odd{\"]} after";
        let result = parse_response(raw);
        assert_eq!(
            result.state_updates.unwrap().achievements,
            Some(vec!["}odd{".to_string()])
        );
        assert_eq!(result.narrative, "after");
    }

    #[test]
    fn suggestions_of_any_length_are_kept() {
        let result = parse_response("Text.\nSUGGESTED_ACTIONS: [\"a\", \"b\", \"c\", \"d\"]");
        assert_eq!(result.suggestions.unwrap().len(), 4);
        let result = parse_response("Text.\nSUGGESTED_ACTIONS: []");
        assert_eq!(result.suggestions, Some(vec![]));
    }

    #[test]
    fn malformed_suggestions_are_dropped() {
        let result = parse_response("Text.\nSUGGESTED_ACTIONS: [\"a\", 3,]");
        assert!(result.suggestions.is_none());
        assert_eq!(result.narrative, "Text.");
    }

    #[test]
    fn all_directives_together() {
        let raw = concat!(
            "[NARRATION] Gareth sets down a mug.\n",
            "[DIALOGUE: Gareth] \"On the house.\"\n",
            "GENERATE_IMAGE: \"A bearded barkeep\"\n",
            "STATE_UPDATE: {\"achievements\": [\"free_ale\"]}\n",
            "SUGGESTED_ACTIONS: [\"Drink\", \"Thank him\", \"Ask about the figure\"]\n",
        );
        let result = parse_response(raw);
        assert_eq!(result.image_prompt.as_deref(), Some("A bearded barkeep"));
        assert_eq!(
            result.state_updates.unwrap().achievements,
            Some(vec!["free_ale".to_string()])
        );
        assert_eq!(result.suggestions.unwrap().len(), 3);
        assert_eq!(result.blocks.len(), 2);
        assert_eq!(
            result.narrative,
            "[NARRATION] Gareth sets down a mug.\n[DIALOGUE: Gareth] \"On the house.\""
        );
    }

    #[test]
    fn partial_markers_never_panic() {
        for raw in [
            "[",
            "[DIALOGUE",
            "[DIALOGUE: unterminated",
            "GENERATE_IMAGE:",
            "GENERATE_IMAGE: \"",
            "STATE_UPDATE:",
            "STATE_UPDATE: [1]",
            "SUGGESTED_ACTIONS: [",
            "ünïcödé [DIALOGUE: Ælfric] ðæt",
        ] {
            let _ = parse_response(raw);
        }
    }

    #[test]
    fn placeholder_has_single_narration_block() {
        let result = TurnResult::placeholder(MAGIC_FLICKERS);
        assert_eq!(result.narrative, MAGIC_FLICKERS);
        assert_eq!(result.blocks, vec![NarrativeBlock::narration(MAGIC_FLICKERS)]);
    }

    #[test]
    fn json_fragments_are_found_inside_prose() {
        assert_eq!(
            extract_json_object("Sure! {\"a\": {\"b\": 1}} Enjoy."),
            Some("{\"a\": {\"b\": 1}}")
        );
        assert_eq!(extract_json_array("Titles: [\"x\"]"), Some("[\"x\"]"));
        assert_eq!(extract_json_array("none"), None);
        assert_eq!(extract_json_object("} {"), None);
    }
}
