use crate::character::lenient_integer;
use crate::message::ChatMessage;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use uuid::Uuid;

pub const DEFAULT_ADVENTURE_TITLE: &str = "Untitled Adventure";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum GamePhase {
    #[default]
    CharacterCreation,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AchievementKind {
    Fixed,
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: String,
    pub title: String,
    pub description: String,
    pub unlocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlocked_at: Option<i64>,
    #[serde(rename = "type")]
    pub kind: AchievementKind,
}

impl Achievement {
    fn fixed(id: &str, title: &str, description: &str) -> Self {
        Achievement {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            unlocked: false,
            unlocked_at: None,
            kind: AchievementKind::Fixed,
        }
    }

    // Achievements the model invents on the fly get a title derived from their id.
    fn dynamic(id: &str) -> Self {
        let title = id
            .split(['_', '-', ' '])
            .filter(|word| !word.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        Achievement {
            id: id.to_string(),
            title,
            description: "Earned during the adventure".to_string(),
            unlocked: false,
            unlocked_at: None,
            kind: AchievementKind::Dynamic,
        }
    }
}

pub fn initial_achievements() -> Vec<Achievement> {
    vec![
        Achievement::fixed("first_steps", "First Steps", "Begin your adventure"),
        Achievement::fixed("character_created", "Hero Born", "Create your character"),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub current_phase: GamePhase,
    pub history: Vec<ChatMessage>,
    pub current_chapter: u32,
    pub achievements: Vec<Achievement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adventure_title: Option<String>,
}

impl Default for GameState {
    fn default() -> Self {
        GameState {
            current_phase: GamePhase::CharacterCreation,
            history: Vec::new(),
            current_chapter: 1,
            achievements: initial_achievements(),
            adventure_title: Some(DEFAULT_ADVENTURE_TITLE.to_string()),
        }
    }
}

impl GameState {
    /// Completed interactions, one per user and AI message pair.
    pub fn interaction_count(&self) -> usize {
        self.history.len() / 2
    }

    pub fn history_lines(&self) -> Vec<String> {
        self.history.iter().map(ChatMessage::history_line).collect()
    }

    pub fn find_message_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        self.history.iter_mut().find(|message| message.id == id)
    }

    /// Unlocks an achievement and returns it when this call changed its state.
    /// Unknown ids become dynamic achievements.
    pub fn unlock_achievement(&mut self, id: &str) -> Option<&Achievement> {
        let index = match self.achievements.iter().position(|a| a.id == id) {
            Some(index) => index,
            None => {
                self.achievements.push(Achievement::dynamic(id));
                self.achievements.len() - 1
            }
        };

        let achievement = &mut self.achievements[index];
        if achievement.unlocked {
            return None;
        }
        achievement.unlocked = true;
        achievement.unlocked_at = Some(Utc::now().timestamp_millis());
        Some(&self.achievements[index])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ItemKind {
    Weapon,
    Armor,
    Consumable,
    #[default]
    Misc,
}

// Case is ignored and any kind outside the known four is kept as misc.
impl<'de> Deserialize<'de> for ItemKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(value
            .as_str()
            .and_then(|kind| kind.trim().parse().ok())
            .unwrap_or_default())
    }
}

// An item as named by a state update, before it gets an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDraft {
    pub name: String,
    #[serde(default = "default_quantity", deserialize_with = "lenient_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: ItemKind,
}

fn default_quantity() -> u32 {
    1
}

fn lenient_quantity<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let quantity = lenient_integer(deserializer)?;
    Ok(quantity.map_or(1, |n| n.clamp(1, u32::MAX as i64) as u32))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
    pub description: String,
    pub quantity: u32,
    #[serde(rename = "type")]
    pub kind: ItemKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub items: Vec<InventoryItem>,
}

impl Inventory {
    // Every addition is a new entry; nothing is merged by name.
    pub fn add(&mut self, draft: ItemDraft) -> &InventoryItem {
        self.items.push(InventoryItem {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            description: draft.description,
            quantity: draft.quantity,
            kind: draft.kind,
        });
        &self.items[self.items.len() - 1]
    }

    pub fn remove(&mut self, id: &str) -> Option<InventoryItem> {
        let index = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_uses_kebab_case_on_the_wire() {
        assert_eq!(GamePhase::CharacterCreation.to_string(), "character-creation");
        let json = serde_json::to_string(&GamePhase::Playing).unwrap();
        assert_eq!(json, "\"playing\"");
    }

    #[test]
    fn unlocking_twice_reports_once() {
        let mut state = GameState::default();
        assert!(state.unlock_achievement("first_steps").is_some());
        assert!(state.unlock_achievement("first_steps").is_none());
    }

    #[test]
    fn unknown_achievement_becomes_dynamic() {
        let mut state = GameState::default();
        let unlocked = state.unlock_achievement("dragon_slayer").cloned().unwrap();
        assert_eq!(unlocked.title, "Dragon Slayer");
        assert_eq!(unlocked.kind, AchievementKind::Dynamic);
        assert_eq!(state.achievements.len(), 3);
    }

    #[test]
    fn duplicate_items_are_separate_entries() {
        let mut inventory = Inventory::default();
        let draft: ItemDraft = serde_json::from_str(r#"{"name": "Gold Coin", "quantity": 5}"#).unwrap();
        inventory.add(draft.clone());
        inventory.add(draft);

        assert_eq!(inventory.items.len(), 2);
        assert_ne!(inventory.items[0].id, inventory.items[1].id);
        assert_eq!(inventory.items[0].kind, ItemKind::Misc);

        let id = inventory.items[0].id.clone();
        assert!(inventory.remove(&id).is_some());
        assert_eq!(inventory.items.len(), 1);
    }

    #[test]
    fn item_kinds_are_read_leniently() {
        let kinds: Vec<ItemDraft> = serde_json::from_str(
            r#"[
                {"name": "Sword", "type": "Weapon"},
                {"name": "Shield", "type": " ARMOR "},
                {"name": "Gold", "type": "currency", "quantity": "12"},
                {"name": "Map", "type": 7, "quantity": -3}
            ]"#,
        )
        .unwrap();

        let read: Vec<(ItemKind, u32)> = kinds.iter().map(|d| (d.kind, d.quantity)).collect();
        assert_eq!(
            read,
            vec![
                (ItemKind::Weapon, 1),
                (ItemKind::Armor, 1),
                (ItemKind::Misc, 12),
                (ItemKind::Misc, 1),
            ]
        );
        assert_eq!(serde_json::to_value(ItemKind::Consumable).unwrap(), "consumable");
    }
}
