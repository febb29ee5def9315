// Import necessary modules from external crates.
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

// Nominal bounds of an ability score.
pub const MIN_STAT: u8 = 3;
pub const MAX_STAT: u8 = 20;

// Define a structure holding the six ability scores of a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub strength: u8,
    pub dexterity: u8,
    pub intelligence: u8,
    pub charisma: u8,
    pub wisdom: u8,
    pub constitution: u8,
}

impl Default for Stats {
    fn default() -> Self {
        Stats::uniform(10)
    }
}

impl Stats {
    pub fn uniform(value: u8) -> Self {
        Stats {
            strength: value,
            dexterity: value,
            intelligence: value,
            charisma: value,
            wisdom: value,
            constitution: value,
        }
    }

    pub fn total(&self) -> u32 {
        [
            self.strength,
            self.dexterity,
            self.intelligence,
            self.charisma,
            self.wisdom,
            self.constitution,
        ]
        .iter()
        .map(|&s| s as u32)
        .sum()
    }

    /// Brings every score back inside the nominal 3–20 range.
    pub fn clamped(self) -> Self {
        let clamp = |v: u8| v.clamp(MIN_STAT, MAX_STAT);
        Stats {
            strength: clamp(self.strength),
            dexterity: clamp(self.dexterity),
            intelligence: clamp(self.intelligence),
            charisma: clamp(self.charisma),
            wisdom: clamp(self.wisdom),
            constitution: clamp(self.constitution),
        }
    }
}

// Define a structure representing the player character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub class: String,
    pub stats: Stats,
    pub level: u32,
    pub experience: u32,
}

impl fmt::Display for Character {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, level {})", self.name, self.class, self.level)
    }
}

impl Character {
    // A fresh level 1 character with no experience.
    pub fn new(name: impl Into<String>, class: impl Into<String>, stats: Stats) -> Self {
        Character {
            name: name.into(),
            class: class.into(),
            stats,
            level: 1,
            experience: 0,
        }
    }

    /// Applies a sparse patch. Only the fields present in the patch change, and a present
    /// field replaces the current value rather than adding to it.
    pub fn apply_patch(&mut self, patch: &CharacterPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(class) = &patch.class {
            self.class = class.clone();
        }
        if let Some(level) = patch.level {
            self.level = level.clamp(1, u32::MAX as i64) as u32;
        }
        if let Some(experience) = patch.experience {
            self.experience = experience.clamp(0, u32::MAX as i64) as u32;
        }
        if let Some(stats) = &patch.stats {
            stats.apply_to(&mut self.stats);
        }
        patch.loose_stats.apply_to(&mut self.stats);
    }
}

/// Reads an integer the way models write one: a number, a float or a numeric string.
/// Anything else counts as absent, so one odd field never sinks the whole update.
pub(crate) fn lenient_integer<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let number = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    };
    Ok(number)
}

// Partial ability scores: absent fields mean "no change". Values are clamped on apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsPatch {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_integer")]
    pub strength: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_integer")]
    pub dexterity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_integer")]
    pub intelligence: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_integer")]
    pub charisma: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_integer")]
    pub wisdom: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_integer")]
    pub constitution: Option<i64>,
}

impl StatsPatch {
    fn apply_to(&self, stats: &mut Stats) {
        let slots = [
            (self.strength, &mut stats.strength),
            (self.dexterity, &mut stats.dexterity),
            (self.intelligence, &mut stats.intelligence),
            (self.charisma, &mut stats.charisma),
            (self.wisdom, &mut stats.wisdom),
            (self.constitution, &mut stats.constitution),
        ];
        for (value, slot) in slots {
            if let Some(value) = value {
                *slot = value.clamp(MIN_STAT as i64, MAX_STAT as i64) as u8;
            }
        }
    }
}

// The `character` section of a state update. Ability scores are accepted either nested
// under `stats` or directly at the top level, since models emit both shapes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_integer")]
    pub level: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_integer")]
    pub experience: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsPatch>,
    #[serde(flatten)]
    pub loose_stats: StatsPatch,
}

// A ready-made hero offered during character creation.
#[derive(Debug, Clone)]
pub struct CharacterPreset {
    pub name: &'static str,
    pub class: &'static str,
    pub description: &'static str,
    pub stats: Stats,
}

impl CharacterPreset {
    pub fn to_character(&self) -> Character {
        Character::new(self.name, self.class, self.stats)
    }
}

pub fn presets() -> Vec<CharacterPreset> {
    vec![
        CharacterPreset {
            name: "Aldric Warrior",
            class: "Fighter",
            description: "A mighty warrior skilled in combat and leadership",
            stats: Stats {
                strength: 16,
                dexterity: 12,
                intelligence: 10,
                charisma: 14,
                wisdom: 12,
                constitution: 15,
            },
        },
        CharacterPreset {
            name: "Elara Mage",
            class: "Wizard",
            description: "A powerful sorceress with ancient magical knowledge",
            stats: Stats {
                strength: 8,
                dexterity: 14,
                intelligence: 18,
                charisma: 12,
                wisdom: 16,
                constitution: 10,
            },
        },
        CharacterPreset {
            name: "Theron Rogue",
            class: "Rogue",
            description: "A cunning scout skilled in stealth and deception",
            stats: Stats {
                strength: 12,
                dexterity: 18,
                intelligence: 14,
                charisma: 10,
                wisdom: 12,
                constitution: 13,
            },
        },
        CharacterPreset {
            name: "Seraphina Cleric",
            class: "Cleric",
            description: "A divine healer with unwavering faith",
            stats: Stats {
                strength: 12,
                dexterity: 10,
                intelligence: 14,
                charisma: 16,
                wisdom: 18,
                constitution: 14,
            },
        },
    ]
}

// Shape returned by the stat generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedCharacter {
    pub name: String,
    pub class: String,
    pub stats: Stats,
}

impl Default for GeneratedCharacter {
    fn default() -> Self {
        GeneratedCharacter {
            name: "Unknown Hero".to_string(),
            class: "Adventurer".to_string(),
            stats: Stats::default(),
        }
    }
}

impl From<GeneratedCharacter> for Character {
    fn from(generated: GeneratedCharacter) -> Self {
        Character::new(generated.name, generated.class, generated.stats.clamped())
    }
}
