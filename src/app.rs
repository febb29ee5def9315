// /app.rs
use crate::{
    ai::{GameMaster, StatsRequest, TitleRequest, TitleResponse, TurnRequest},
    ai_response::{StateUpdate, TurnResult},
    character::Character,
    error::{GameError, ImageError, Result},
    game_state::{GamePhase, GameState, Inventory, initial_achievements},
    imager::{ImageReference, ImageResolver},
    message::ChatMessage,
    prompts::OPENING_ACTION,
    save::{Adventure, AdventureDraft, AdventureStore, FileStore},
    settings::Settings,
};

use std::sync::Arc;
use strum_macros::Display;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A transient message for the player: an unlocked achievement, a failed save, a lost image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    fn new(level: NoticeLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

/// A resolved (or failed) illustration for one AI message.
#[derive(Debug)]
pub struct ImageEvent {
    pub message_id: String,
    pub result: std::result::Result<ImageReference, ImageError>,
}

/// One player's adventure: character, history, inventory and the services that advance it.
///
/// Every mutating operation takes `&mut self`, so only one turn can be in flight.
/// Scene illustrations resolve on spawned tasks and come back through a channel;
/// call [`Session::apply_pending_images`] or [`Session::wait_for_images`] to back-fill them.
pub struct Session {
    game_master: GameMaster,
    images: Arc<ImageResolver>,
    store: Arc<dyn AdventureStore>,
    auto_save_interval: usize,

    character: Option<Character>,
    game_state: GameState,
    inventory: Inventory,
    adventure_id: Option<String>,
    notices: Vec<Notice>,

    pending_images: usize,
    image_sender: mpsc::UnboundedSender<ImageEvent>,
    image_receiver: mpsc::UnboundedReceiver<ImageEvent>,
}

impl Session {
    pub fn new(
        game_master: GameMaster,
        images: ImageResolver,
        store: Arc<dyn AdventureStore>,
        auto_save_interval: usize,
    ) -> Self {
        // Set up unbounded channel for images.
        let (image_sender, image_receiver) = mpsc::unbounded_channel::<ImageEvent>();
        Self {
            game_master,
            images: Arc::new(images),
            store,
            auto_save_interval,
            character: None,
            game_state: GameState::default(),
            inventory: Inventory::default(),
            adventure_id: None,
            notices: Vec::new(),
            pending_images: 0,
            image_sender,
            image_receiver,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            GameMaster::from_settings(settings),
            ImageResolver::from_settings(settings),
            Arc::new(FileStore::new(settings.save_dir())),
            settings.auto_save_interval,
        )
    }

    pub fn character(&self) -> Option<&Character> {
        self.character.as_ref()
    }

    pub fn game_state(&self) -> &GameState {
        &self.game_state
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn adventure_id(&self) -> Option<&str> {
        self.adventure_id.as_deref()
    }

    pub fn is_configured(&self) -> bool {
        self.game_master.is_configured()
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn notify(&mut self, level: NoticeLevel, text: impl Into<String>) {
        self.notices.push(Notice::new(level, text));
    }

    fn expect_phase(&self, expected: GamePhase) -> Result<()> {
        if self.game_state.current_phase != expected {
            return Err(GameError::InvalidPhase {
                expected: expected.to_string(),
                actual: self.game_state.current_phase.to_string(),
            }
            .into());
        }
        Ok(())
    }

    // --- Character creation

    /// Rolls a hero from a free text description. Nothing is accepted yet.
    pub async fn generate_character(&self, description: &str) -> Character {
        let request = StatsRequest {
            description: description.to_string(),
        };
        self.game_master.handle_stats(&request).await.into()
    }

    /// Starts the adventure with this character and plays the opening scene.
    pub async fn accept_character(&mut self, character: Character) -> Result<TurnResult> {
        self.expect_phase(GamePhase::CharacterCreation)?;

        log::info!("Character accepted: {}", character);
        self.character = Some(character);
        self.game_state.current_phase = GamePhase::Playing;
        self.unlock("character_created");
        self.unlock("first_steps");

        self.play_turn(OPENING_ACTION).await
    }

    // --- Turns

    /// Plays one player action. Generation failures come back as placeholder narration;
    /// only caller mistakes (wrong phase, empty action) are errors.
    pub async fn send_action(&mut self, action: &str) -> Result<TurnResult> {
        self.expect_phase(GamePhase::Playing)?;
        let action = action.trim();
        if action.is_empty() {
            return Err(GameError::EmptyAction.into());
        }
        self.play_turn(action).await
    }

    async fn play_turn(&mut self, action: &str) -> Result<TurnResult> {
        let character = self.character.clone().ok_or(GameError::NoCharacter)?;

        // The model sees the history as it was before this action.
        let request = TurnRequest {
            action: action.to_string(),
            history: self.game_state.history_lines(),
            character_state: character,
        };
        self.game_state.history.push(ChatMessage::user(action));

        let turn = self.game_master.handle_turn(&request).await;

        let message = ChatMessage::ai(&turn);
        let message_id = message.id.clone();
        self.game_state.history.push(message);

        if let Some(update) = &turn.state_updates {
            self.apply_state_update(update);
        }
        if let Some(prompt) = &turn.image_prompt {
            self.spawn_image(message_id, prompt.clone());
        }

        let completed = self.game_state.interaction_count();
        if self.auto_save_interval > 0 && completed % self.auto_save_interval == 0 {
            log::info!("Auto-saving at interaction #{}", completed);
            self.save_quietly().await;
        }

        Ok(turn)
    }

    fn apply_state_update(&mut self, update: &StateUpdate) {
        if let (Some(patch), Some(character)) = (&update.character, self.character.as_mut()) {
            character.apply_patch(patch);
            log::debug!("Character updated: {:?}", character);
        }
        for draft in update.inventory.iter().flatten() {
            let item = self.inventory.add(draft.clone());
            let text = format!("Received {} x{}", item.name, item.quantity);
            self.notify(NoticeLevel::Info, text);
        }
        for id in update.achievements.iter().flatten() {
            self.unlock(id);
        }
    }

    fn unlock(&mut self, id: &str) {
        if let Some(achievement) = self.game_state.unlock_achievement(id) {
            let text = format!("Achievement unlocked: {}", achievement.title);
            log::info!("{}", text);
            self.notify(NoticeLevel::Success, text);
        }
    }

    // --- Images

    fn spawn_image(&mut self, message_id: String, prompt: String) {
        let images = Arc::clone(&self.images);
        let sender = self.image_sender.clone();
        self.pending_images += 1;
        tokio::spawn(async move {
            let result = images.resolve(&prompt);
            // The receiver lives as long as the session; a send error means it is gone.
            let _ = sender.send(ImageEvent { message_id, result });
        });
    }

    fn apply_image_event(&mut self, event: ImageEvent) {
        self.pending_images = self.pending_images.saturating_sub(1);
        // A redraw from the image model outranks the hosted render, whenever the latter lands.
        let redrawn = self
            .game_state
            .history
            .iter()
            .any(|m| m.id == event.message_id && m.has_inline_image());
        if redrawn {
            log::debug!(
                "Hosted image for message {} arrived after a redraw, keeping the redraw",
                event.message_id
            );
            return;
        }
        self.backfill_image(&event.message_id, &event.result);
    }

    fn backfill_image(
        &mut self,
        message_id: &str,
        result: &std::result::Result<ImageReference, ImageError>,
    ) {
        let Some(message) = self.game_state.find_message_mut(message_id) else {
            log::debug!("Image for unknown message {} dropped", message_id);
            return;
        };
        match result {
            Ok(reference) => {
                message.image_url = Some(reference.to_url());
                message.image_error = None;
            }
            Err(e) => {
                log::error!("Image for message {} failed: {}", message_id, e);
                message.image_error = Some(e.to_string());
                self.notify(NoticeLevel::Error, e.to_string());
            }
        }
    }

    /// Back-fills every illustration that has already resolved. Returns how many landed.
    pub fn apply_pending_images(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.image_receiver.try_recv() {
            self.apply_image_event(event);
            applied += 1;
        }
        applied
    }

    /// Waits until every spawned illustration has been back-filled.
    pub async fn wait_for_images(&mut self) {
        while self.pending_images > 0 {
            match self.image_receiver.recv().await {
                Some(event) => self.apply_image_event(event),
                None => break,
            }
        }
    }

    /// Asks the generative image model for a message whose illustration is missing or broken.
    pub async fn retry_image(&mut self, message_id: &str) -> Result<ImageReference> {
        self.apply_pending_images();
        let message = self
            .game_state
            .find_message_mut(message_id)
            .ok_or_else(|| GameError::MessageNotFound(message_id.to_string()))?;
        let prompt = message
            .image_prompt
            .clone()
            .ok_or_else(|| GameError::NoImagePrompt(message_id.to_string()))?;

        let result = self.images.resolve_fallback(&prompt).await;
        self.backfill_image(message_id, &result);
        Ok(result?)
    }

    // --- Titles

    pub async fn suggest_titles(&self) -> Result<TitleResponse> {
        let character = self.character.as_ref().ok_or(GameError::NoCharacter)?;
        let request = TitleRequest {
            history: self.game_state.history_lines(),
            character_state: character.clone(),
        };
        Ok(self.game_master.handle_titles(&request).await)
    }

    pub fn set_adventure_title(&mut self, title: &str) {
        let title = title.trim();
        self.game_state.adventure_title = (!title.is_empty()).then(|| title.to_string());
    }

    // --- Persistence

    /// Saves the adventure and remembers the id the store assigned.
    pub async fn save(&mut self) -> Result<String> {
        let character = self.character.as_ref().ok_or(GameError::NoCharacter)?;
        let draft = AdventureDraft::snapshot(
            self.adventure_id.clone(),
            character,
            &self.game_state,
            &self.inventory,
        );
        let id = self.store.save(draft).await?;
        self.adventure_id = Some(id.clone());
        Ok(id)
    }

    // Save failures become notices; play carries on.
    async fn save_quietly(&mut self) {
        match self.save().await {
            Ok(id) => {
                log::info!("Adventure {} saved", id);
                self.notify(NoticeLevel::Success, "Adventure saved");
            }
            Err(e) => {
                log::error!("Save failed: {}", e);
                self.notify(NoticeLevel::Error, format!("Failed to save: {e}"));
            }
        }
    }

    pub async fn list_adventures(&self) -> Result<Vec<Adventure>> {
        Ok(self.store.list().await?)
    }

    /// Replaces the whole session state with a stored adventure.
    pub async fn load(&mut self, id: &str) -> Result<()> {
        let adventure = self.store.get(id).await?;
        log::info!("Loading adventure {} ({})", adventure.id, adventure.title);

        let saved = adventure.game_state;
        let mut game_state = GameState {
            current_phase: saved.current_phase,
            history: saved.history,
            current_chapter: saved.current_chapter,
            achievements: initial_achievements(),
            adventure_title: saved.adventure_title.or_else(|| Some(adventure.title.clone())),
        };
        if game_state.current_phase != GamePhase::CharacterCreation {
            game_state.unlock_achievement("character_created");
            game_state.unlock_achievement("first_steps");
        }

        self.character = Some(adventure.character);
        self.game_state = game_state;
        self.inventory = adventure.inventory;
        self.adventure_id = Some(adventure.id);
        let text = format!("Loaded \"{}\"", adventure.title);
        self.notify(NoticeLevel::Success, text);
        Ok(())
    }

    pub async fn delete_adventure(&mut self, id: &str) -> Result<()> {
        self.store.delete(id).await?;
        if self.adventure_id.as_deref() == Some(id) {
            self.adventure_id = None;
        }
        self.notify(NoticeLevel::Info, "Adventure deleted");
        Ok(())
    }

    /// Best-effort save when the player leaves. Nothing to save before the first turn.
    pub async fn end_session(&mut self) {
        if self.character.is_some() && !self.game_state.history.is_empty() {
            self.save_quietly().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::TextGenerator;
    use crate::ai_response::RESONANCE_MISSING;
    use crate::character::presets;
    use crate::error::{AIError, AppError};
    use crate::imager::InlineImageGenerator;
    use crate::save::MemoryStore;
    use async_trait::async_trait;

    struct Echo(&'static str);

    #[async_trait]
    impl TextGenerator for Echo {
        async fn generate(&self, _model: &str, _prompt: &str) -> std::result::Result<String, AIError> {
            Ok(self.0.to_string())
        }
    }

    fn session(reply: Option<&'static str>, interval: usize) -> Session {
        let generator = reply.map(|r| Arc::new(Echo(r)) as Arc<dyn TextGenerator>);
        Session::new(
            GameMaster::new(generator, vec!["m".into()], "m"),
            ImageResolver::new("https://pollinations.ai/p", None, "img"),
            Arc::new(MemoryStore::new()),
            interval,
        )
    }

    #[tokio::test]
    async fn actions_are_refused_before_a_character_exists() {
        let mut session = session(Some("[NARRATION] Hi"), 5);
        let err = session.send_action("look").await.unwrap_err();
        assert!(matches!(err, AppError::Game(GameError::InvalidPhase { .. })));
        assert!(session.game_state().history.is_empty());
    }

    #[tokio::test]
    async fn accepting_twice_is_refused() {
        let mut session = session(Some("[NARRATION] Hi"), 5);
        session.accept_character(presets()[0].to_character()).await.unwrap();
        let err = session.accept_character(presets()[1].to_character()).await.unwrap_err();
        assert!(matches!(err, AppError::Game(GameError::InvalidPhase { .. })));
    }

    #[tokio::test]
    async fn opening_turn_is_a_normal_pair() {
        let mut session = session(None, 5);
        let turn = session.accept_character(presets()[3].to_character()).await.unwrap();

        assert_eq!(turn.narrative, RESONANCE_MISSING);
        let history = &session.game_state().history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, OPENING_ACTION);
        assert_eq!(session.game_state().current_phase, GamePhase::Playing);

        let notices = session.drain_notices();
        assert_eq!(notices.len(), 2);
        assert!(session.drain_notices().is_empty());
    }

    #[tokio::test]
    async fn empty_action_is_refused() {
        let mut session = session(Some("[NARRATION] Hi"), 5);
        session.accept_character(presets()[0].to_character()).await.unwrap();
        assert!(matches!(
            session.send_action("   ").await,
            Err(AppError::Game(GameError::EmptyAction))
        ));
    }

    #[tokio::test]
    async fn state_updates_reach_character_inventory_and_achievements() {
        let reply = r#"[NARRATION] You find a purse.
STATE_UPDATE: {"character": {"experience": 100}, "inventory": [{"name": "Gold Coin", "quantity": 5}], "achievements": ["lucky_find"]}"#;
        let mut session = session(Some(reply), 0);
        let hero = presets()[0].to_character();
        session.accept_character(hero.clone()).await.unwrap();

        let character = session.character().unwrap();
        assert_eq!(character.experience, 100);
        assert_eq!(character.stats, hero.stats);
        assert_eq!(session.inventory().items.len(), 1);
        assert!(
            session
                .game_state()
                .achievements
                .iter()
                .any(|a| a.id == "lucky_find" && a.unlocked)
        );

        session.send_action("search again").await.unwrap();
        assert_eq!(session.inventory().items.len(), 2);
    }

    #[tokio::test]
    async fn image_is_back_filled_by_message_id() {
        let reply = "[NARRATION] Mist.\nGENERATE_IMAGE: \"misty hills\"";
        let mut session = session(Some(reply), 0);
        session.accept_character(presets()[0].to_character()).await.unwrap();
        session.wait_for_images().await;

        let message = &session.game_state().history[1];
        assert_eq!(message.image_prompt.as_deref(), Some("misty hills"));
        assert!(message.image_url.as_deref().unwrap().contains("misty%20hills"));
        assert_eq!(session.apply_pending_images(), 0);
    }

    #[tokio::test]
    async fn retry_without_image_model_marks_the_message() {
        let reply = "[NARRATION] Mist.\nGENERATE_IMAGE: \"misty hills\"";
        let mut session = session(Some(reply), 0);
        session.accept_character(presets()[0].to_character()).await.unwrap();
        session.wait_for_images().await;
        let id = session.game_state().history[1].id.clone();

        assert!(session.retry_image(&id).await.is_err());
        let message = &session.game_state().history[1];
        assert_eq!(message.image_error.as_deref(), Some("Magical core missing (API KEY)"));

        let user_id = session.game_state().history[0].id.clone();
        assert!(matches!(
            session.retry_image(&user_id).await,
            Err(AppError::Game(GameError::NoImagePrompt(_)))
        ));
        assert!(matches!(
            session.retry_image("nope").await,
            Err(AppError::Game(GameError::MessageNotFound(_)))
        ));
    }

    struct Inked;

    #[async_trait]
    impl InlineImageGenerator for Inked {
        async fn generate_image(
            &self,
            _model: &str,
            _prompt: &str,
        ) -> std::result::Result<ImageReference, ImageError> {
            Ok(ImageReference::Inline {
                mime_type: "image/png".into(),
                data: "aW5r".into(),
            })
        }
    }

    #[tokio::test]
    async fn redraw_survives_a_late_hosted_render() {
        let reply = "[NARRATION] Mist.\nGENERATE_IMAGE: \"misty hills\"";
        let mut session = Session::new(
            GameMaster::new(Some(Arc::new(Echo(reply)) as Arc<dyn TextGenerator>), vec!["m".into()], "m"),
            ImageResolver::new("https://pollinations.ai/p", Some(Arc::new(Inked)), "img"),
            Arc::new(MemoryStore::new()),
            0,
        );
        session.accept_character(presets()[0].to_character()).await.unwrap();
        let id = session.game_state().history[1].id.clone();

        // The redraw is requested while the hosted render may still be in flight.
        session.retry_image(&id).await.unwrap();
        session.wait_for_images().await;

        let message = &session.game_state().history[1];
        assert_eq!(message.image_url.as_deref(), Some("data:image/png;base64,aW5r"));
        assert!(message.image_error.is_none());
        assert_eq!(session.apply_pending_images(), 0);
    }

    #[tokio::test]
    async fn auto_save_fires_every_interval() {
        let mut session = session(Some("[NARRATION] Onward."), 2);
        session.accept_character(presets()[0].to_character()).await.unwrap();
        assert!(session.adventure_id().is_none());

        session.send_action("walk").await.unwrap();
        let id = session.adventure_id().map(String::from).unwrap();

        session.send_action("walk").await.unwrap();
        session.send_action("walk").await.unwrap();
        assert_eq!(session.adventure_id(), Some(id.as_str()));
        assert_eq!(session.list_adventures().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn load_restores_a_saved_adventure() {
        let mut session = session(Some("[NARRATION] Onward."), 0);
        session.accept_character(presets()[2].to_character()).await.unwrap();
        session.set_adventure_title("The Long Road");
        let id = session.save().await.unwrap();

        session.send_action("walk").await.unwrap();
        assert_eq!(session.game_state().history.len(), 4);

        session.load(&id).await.unwrap();
        assert_eq!(session.game_state().history.len(), 2);
        assert_eq!(session.game_state().adventure_title.as_deref(), Some("The Long Road"));
        assert_eq!(session.character().unwrap().name, presets()[2].name);

        session.delete_adventure(&id).await.unwrap();
        assert!(session.adventure_id().is_none());
        assert!(session.load(&id).await.is_err());
    }

    #[tokio::test]
    async fn nothing_is_saved_on_exit_before_play() {
        let mut session = session(Some("[NARRATION] Onward."), 0);
        session.end_session().await;
        assert!(session.list_adventures().await.unwrap().is_empty());
        assert!(matches!(session.save().await, Err(AppError::Game(GameError::NoCharacter))));
    }
}
