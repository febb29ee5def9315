use crate::character::Character;
use crate::error::StoreError;
use crate::game_state::{DEFAULT_ADVENTURE_TITLE, GamePhase, GameState, Inventory};
use crate::message::ChatMessage;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

/// The part of the game state that is persisted. Achievements stay in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedGameState {
    pub current_phase: GamePhase,
    pub history: Vec<ChatMessage>,
    pub current_chapter: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adventure_title: Option<String>,
}

/// What a caller hands to the store. Without an id, or with an id the store does not know,
/// a new record is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdventureDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub character: Character,
    pub game_state: SavedGameState,
    pub inventory: Inventory,
}

/// A stored adventure record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Adventure {
    pub id: String,
    pub title: String,
    pub character: Character,
    pub game_state: SavedGameState,
    pub inventory: Inventory,
    // Milliseconds since the Unix epoch.
    pub last_updated: i64,
}

/// Inline `data:` images are too large for a save and are dropped. Hosted URLs survive.
pub fn prune_history(history: &[ChatMessage]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|message| {
            let mut message = message.clone();
            if message.has_inline_image() {
                message.image_url = None;
            }
            message
        })
        .collect()
}

impl AdventureDraft {
    pub fn snapshot(
        id: Option<String>,
        character: &Character,
        game_state: &GameState,
        inventory: &Inventory,
    ) -> Self {
        let title = game_state
            .adventure_title
            .clone()
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ADVENTURE_TITLE.to_string());
        AdventureDraft {
            id,
            title,
            character: character.clone(),
            game_state: SavedGameState {
                current_phase: game_state.current_phase,
                history: prune_history(&game_state.history),
                current_chapter: game_state.current_chapter,
                adventure_title: game_state.adventure_title.clone(),
            },
            inventory: inventory.clone(),
        }
    }

    fn into_adventure(self, id: String) -> Adventure {
        Adventure {
            id,
            title: self.title,
            character: self.character,
            game_state: self.game_state,
            inventory: self.inventory,
            last_updated: Utc::now().timestamp_millis(),
        }
    }
}

/// Persistence port for adventures. Saves are last-write-wins.
#[async_trait]
pub trait AdventureStore: Send + Sync {
    /// Inserts or replaces a record and returns its id.
    async fn save(&self, draft: AdventureDraft) -> Result<String, StoreError>;
    /// All records, most recently updated first.
    async fn list(&self) -> Result<Vec<Adventure>, StoreError>;
    async fn get(&self, id: &str) -> Result<Adventure, StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

fn newest_first(adventures: &mut [Adventure]) {
    adventures.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
}

/// One pretty-printed JSON file per adventure, named after its id.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    // Ids come from callers; anything that could escape the directory is simply unknown.
    fn path_for(&self, id: &str) -> Option<PathBuf> {
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        safe.then(|| self.dir.join(format!("{id}.json")))
    }

    async fn read(&self, path: &Path) -> Result<Adventure, StoreError> {
        let data = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[async_trait]
impl AdventureStore for FileStore {
    async fn save(&self, mut draft: AdventureDraft) -> Result<String, StoreError> {
        fs::create_dir_all(&self.dir).await?;
        let id = match draft.id.take() {
            Some(id) if self.path_for(&id).is_some_and(|path| path.exists()) => id,
            _ => Uuid::new_v4().to_string(),
        };
        let Some(path) = self.path_for(&id) else {
            return Err(StoreError::NotFound(id));
        };

        let adventure = draft.into_adventure(id.clone());
        let serialized = serde_json::to_string_pretty(&adventure)?;
        fs::write(&path, serialized).await?;
        log::info!("Saved adventure {} to {}", id, path.display());
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<Adventure>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut adventures = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            // A corrupt file should not hide every other save.
            match self.read(&path).await {
                Ok(adventure) => adventures.push(adventure),
                Err(e) => log::warn!("Skipping unreadable save {}: {}", path.display(), e),
            }
        }
        newest_first(&mut adventures);
        Ok(adventures)
    }

    async fn get(&self, id: &str) -> Result<Adventure, StoreError> {
        let path = self
            .path_for(id)
            .filter(|path| path.exists())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.read(&path).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self
            .path_for(id)
            .filter(|path| path.exists())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        fs::remove_file(path).await?;
        log::info!("Deleted adventure {}", id);
        Ok(())
    }
}

/// Keeps adventures in memory for the lifetime of the process.
#[derive(Default)]
pub struct MemoryStore {
    adventures: Mutex<HashMap<String, Adventure>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdventureStore for MemoryStore {
    async fn save(&self, mut draft: AdventureDraft) -> Result<String, StoreError> {
        let mut adventures = self.adventures.lock().await;
        let id = match draft.id.take() {
            Some(id) if adventures.contains_key(&id) => id,
            _ => Uuid::new_v4().to_string(),
        };
        adventures.insert(id.clone(), draft.into_adventure(id.clone()));
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<Adventure>, StoreError> {
        let mut adventures: Vec<Adventure> = self.adventures.lock().await.values().cloned().collect();
        newest_first(&mut adventures);
        Ok(adventures)
    }

    async fn get(&self, id: &str) -> Result<Adventure, StoreError> {
        self.adventures
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.adventures
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
