pub mod ai;
pub mod ai_response;
pub mod app;
pub mod character;
pub mod error;
pub mod game_state;
pub mod imager;
pub mod logging;
pub mod message;
pub mod prompts;
pub mod save;
pub mod settings;

// Re-export commonly used items for easier access
pub use ai::{CompletionSequencer, GameMaster, TextGenerator};
pub use ai_response::{StateUpdate, TurnResult, parse_response};
pub use app::{Notice, NoticeLevel, Session};
pub use character::{Character, Stats, presets};
pub use error::{AIError, AppError, GameError, ImageError, StoreError};
pub use game_state::{GamePhase, GameState, Inventory};
pub use imager::{ImageReference, ImageResolver, InlineImageGenerator};
pub use message::{BlockKind, ChatMessage, NarrativeBlock, Sender};
pub use save::{Adventure, AdventureDraft, AdventureStore, FileStore, MemoryStore};
pub use settings::Settings;
