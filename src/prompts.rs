// Prompt text sent to the Game Master model. Everything here is pure string building.

use crate::character::Character;

pub const OPENING_ACTION: &str = "I enter the Prancing Pony in Silverhaven";

// Number of history entries fed into the per-turn context prompt.
pub const CONTEXT_WINDOW: usize = 5;
// Number of history entries used when suggesting adventure titles.
pub const TITLE_WINDOW: usize = 10;
// Every this many interactions the model must illustrate the scene.
pub const IMAGE_CADENCE: usize = 5;

pub const GAME_MASTER_PREAMBLE: &str = r#"You are a D&D Game Master for a high fantasy adventure in the style of Lord of the Rings.

CURRENT SCENE: The Prancing Pony Inn in the village of Silverhaven
The character has just entered this cozy tavern. The room is warm with a crackling fireplace. Several patrons are drinking and talking quietly. A burly bartender with a thick beard is polishing mugs behind a long wooden bar. In the corner, a hooded figure watches the door. The air smells of ale, woodsmoke, and roasting meat."#;

const RESPONSIBILITIES: &str = r#"Your responsibilities:
1. Narrate epic, immersive descriptions based on the current scene
2. Handle player actions naturally within this setting
3. Make invisible skill checks when needed
4. Track story progression and character interactions

Guidelines:
- Write in a serious, epic, descriptive voice
- Tag every sentence as narration or dialogue:
  [NARRATION] describes the scene, actions or atmosphere. NEVER put character speech here.
  [DIALOGUE: Name] is a character (including the Game Master) speaking directly. Use the NPC's name or "Game Master". NEVER put narration or "he says" inside these tags.
- Example: [NARRATION] Gareth looks up from the counter, his eyes twinkling in the firelight. [DIALOGUE: Gareth] "Welcome, traveler. What brings you to Silverhaven?"
- Do not mix narration and dialogue. When a character speaks while acting, use two blocks: [NARRATION] for the action, then [DIALOGUE: Name] for the speech.
- Never show dice rolls or mechanics to the player
- Describe outcomes narratively ("You deftly pick the lock", not "You rolled 15")
- Include sensory details: smells, sounds, sights
- Keep responses concise (2-4 sentences)
- The bartender is named "Gareth" and has worked here for 20 years"#;

const IMAGE_GUIDE: &str = r#"When a visually significant event occurs, append one image line following these practices:
1. Hyper-specific: textures, lighting and materials ("worn leather", "etched silver", "volumetric damp mist").
2. Composition and camera: angle and lens ("low-angle cinematic shot", "wide-angle landscape").
3. Layering: background, midground, foreground, subject.
4. Mood and intent ("a tense, claustrophobic atmosphere for a stealth mission").
5. Photorealistic high fantasy, cinematic 8k look.

GENERATE_IMAGE: "A [Camera Angle] shot of [Background] with [Midground/Foreground elements]. The lighting is [Atmospheric Lighting]. Subject: [Hyper-specific description of focus]. Style: Photorealistic High Fantasy, 8k, cinematic.""#;

const FORCED_IMAGE: &str =
    "CRITICAL: You MUST include a GENERATE_IMAGE line in this response to illustrate the current scene.";
const OPTIONAL_IMAGE: &str =
    "Only include a GENERATE_IMAGE line if something truly monumental happens.";

const TRAILER: &str = r#"When state changes are needed, append JSON at the end:
STATE_UPDATE: {"character": {"experience": 100}, "inventory": [{"name": "Gold Coin", "quantity": 5}], "achievements": ["first_blood"]}

At the very end of your response, you MUST provide 3 short suggested actions for the player as a JSON array:
SUGGESTED_ACTIONS: ["Action 1", "Action 2", "Action 3"]"#;

/// 1-based index of the turn about to be played, given the history sent with it.
pub fn interaction_count(history_len: usize) -> usize {
    history_len / 2 + 1
}

/// First turn and every fifth turn must be illustrated.
pub fn forces_image(interaction_count: usize) -> bool {
    interaction_count == 1 || interaction_count % IMAGE_CADENCE == 0
}

pub fn build_system_prompt(character: &Character, interaction_count: usize) -> String {
    let character_json = serde_json::to_string_pretty(character)
        .unwrap_or_else(|_| character.to_string());
    let image_policy = if forces_image(interaction_count) {
        FORCED_IMAGE
    } else {
        OPTIONAL_IMAGE
    };

    format!(
        "{GAME_MASTER_PREAMBLE}\n\nCharacter State:\n{character_json}\n\n{RESPONSIBILITIES}\n\n{IMAGE_GUIDE}\n\nNote: This is interaction #{interaction_count}.\n{image_policy}\n\n{TRAILER}\n"
    )
}

/// Only the last five history lines travel with the action; older context is dropped.
pub fn build_context_prompt(history: &[String], user_action: &str) -> String {
    let start = history.len().saturating_sub(CONTEXT_WINDOW);
    let recent = history[start..].join("\n");

    format!(
        r#"Recent Game History:
{recent}

Current Player Action: "{user_action}"

Respond with narrative blocks using [NARRATION] and [DIALOGUE] tags. If stats/inventory need updating, include STATE_UPDATE JSON at the end.

Examples of appropriate responses:
- [NARRATION] The bartender greets you with a wary smile. [DIALOGUE] "What's your pleasure, friend?"
- [NARRATION] You examine the room. The air is thick with the scent of roasted mutton and stale ale."#
    )
}

pub fn build_turn_prompt(character: &Character, history: &[String], user_action: &str) -> String {
    let count = interaction_count(history.len());
    format!(
        "{}\n\n{}",
        build_system_prompt(character, count),
        build_context_prompt(history, user_action)
    )
}

pub fn build_title_prompt(history: &[String], character: &Character) -> String {
    let start = history.len().saturating_sub(TITLE_WINDOW);
    let recent = history[start..].join("\n");
    format!(
        r#"Based on the following D&D adventure context and character, suggest 5 evocative, high-fantasy adventure titles.

Character: {} ({})
Recent History:
{recent}

Return only a JSON array of 5 strings. Example: ["The Shadows of Silverhaven", "Echoes of the Prancing Pony"]"#,
        character.name, character.class
    )
}

pub fn build_stats_prompt(description: &str) -> String {
    format!(
        r#"Generate D&D 5e compatible stats for a character based on this description: "{description}"

Return JSON with:
- name: string (character's name)
- class: string (character class)
- stats: {{
  strength: number (8-18)
  dexterity: number (8-18)
  intelligence: number (8-18)
  charisma: number (8-18)
  wisdom: number (8-18)
  constitution: number (8-18)
}}

Total stats should balance to around 75-80. Be realistic but slightly heroic."#
    )
}
