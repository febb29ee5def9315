use crate::ai_response::{
    MAGIC_FLICKERS, RESONANCE_MISSING, TurnResult, extract_json_array, extract_json_object,
    parse_response,
};
use crate::character::{Character, GeneratedCharacter};
use crate::error::AIError;
use crate::prompts;
use crate::settings::{Provider, Settings};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const API_KEY_HEADER: &str = "x-goog-api-key";

pub const FALLBACK_TITLES: [&str; 5] = [
    "A Mysterious Journey",
    "The Unfolding Tale",
    "Eldoria's Call",
    "Legends of Silverhaven",
    "The Hero's Path",
];

/// Anything that can turn a prompt into text with a named model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, AIError>;
}

// ── Gemini ──────────────────────────────────────────────────────────

/// Client for the Gemini `generateContent` endpoint. The API key travels in the
/// `x-goog-api-key` header so it never appears in a request URL.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, AIError> {
        Self::with_base_url(api_key, GEMINI_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> Result<Self, AIError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    // Raw response body of one generateContent call.
    pub(crate) async fn generate_content(&self, model: &str, prompt: &str) -> Result<Value, AIError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .client
            .post(self.generate_url(model))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AIError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<Value>().await?)
    }
}

// Parts of the first candidate, which is the only one ever requested.
pub(crate) fn first_candidate_parts(body: &Value) -> &[Value] {
    body.get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn candidate_text(body: &Value) -> Option<String> {
    let text: String = first_candidate_parts(body)
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, AIError> {
        let body = self.generate_content(model, prompt).await?;
        candidate_text(&body).ok_or(AIError::EmptyResponse)
    }
}

// ── OpenAI ──────────────────────────────────────────────────────────

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
}

impl OpenAiClient {
    pub fn new(api_key: &str) -> Self {
        let openai_config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(openai_config),
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, AIError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
                .into()])
            .build()?;

        let response = self.client.chat().create(request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or(AIError::EmptyResponse)
    }
}

// ── Completion sequencing ───────────────────────────────────────────

/// Tries each model in priority order and returns the first text produced.
/// A failing model is logged and skipped: no retry, no backoff, no racing.
pub struct CompletionSequencer {
    generator: Arc<dyn TextGenerator>,
}

impl CompletionSequencer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn generate(&self, prompt: &str, models: &[String]) -> Result<String, AIError> {
        for model in models {
            log::debug!("Attempting completion with model: {}", model);
            match self.generator.generate(model, prompt).await {
                Ok(text) => {
                    log::debug!("Model {} answered with {} bytes", model, text.len());
                    return Ok(text);
                }
                Err(e) => log::warn!("Model {} failed: {}", model, e),
            }
        }
        log::error!("All models failed: {:?}", models);
        Err(AIError::AllModelsExhausted {
            attempted: models.to_vec(),
        })
    }
}

// ── Request / response shapes ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub action: String,
    #[serde(default)]
    pub history: Vec<String>,
    pub character_state: Character,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleRequest {
    #[serde(default)]
    pub history: Vec<String>,
    pub character_state: Character,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleResponse {
    pub titles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsRequest {
    pub description: String,
}

// ── Game Master ─────────────────────────────────────────────────────

/// The narrative service: prompt building, model fallback and parsing for one request.
/// Built without a generator it answers every request with a degraded placeholder.
pub struct GameMaster {
    sequencer: Option<CompletionSequencer>,
    models: Vec<String>,
    utility_model: String,
}

impl GameMaster {
    pub fn new(
        generator: Option<Arc<dyn TextGenerator>>,
        models: Vec<String>,
        utility_model: impl Into<String>,
    ) -> Self {
        Self {
            sequencer: generator.map(CompletionSequencer::new),
            models,
            utility_model: utility_model.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let generator: Option<Arc<dyn TextGenerator>> = match settings.provider {
            Provider::Gemini => settings.gemini_api_key().and_then(|key| {
                GeminiClient::new(key)
                    .map_err(|e| log::error!("Failed to build Gemini client: {}", e))
                    .ok()
                    .map(|client| Arc::new(client) as Arc<dyn TextGenerator>)
            }),
            Provider::OpenAi => settings
                .openai_api_key()
                .map(|key| Arc::new(OpenAiClient::new(&key)) as Arc<dyn TextGenerator>),
        };
        if generator.is_none() {
            log::warn!("No API key configured for {}", settings.provider);
        }
        Self::new(
            generator,
            settings.text_models(),
            settings.utility_model(),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.sequencer.is_some()
    }

    /// Plays one turn. Never fails: missing credentials and exhausted models both
    /// resolve to a placeholder narration.
    pub async fn narrate(&self, history: &[String], action: &str, character: &Character) -> TurnResult {
        let Some(sequencer) = &self.sequencer else {
            log::error!("No API key configured, returning placeholder narrative");
            return TurnResult::placeholder(RESONANCE_MISSING);
        };

        let prompt = prompts::build_turn_prompt(character, history, action);
        log::debug!("Turn prompt is {} bytes", prompt.len());

        match sequencer.generate(&prompt, &self.models).await {
            Ok(text) => parse_response(&text),
            Err(e) => {
                log::error!("Narration failed: {}", e);
                TurnResult::placeholder(MAGIC_FLICKERS)
            }
        }
    }

    pub async fn handle_turn(&self, request: &TurnRequest) -> TurnResult {
        self.narrate(&request.history, &request.action, &request.character_state)
            .await
    }

    pub async fn handle_titles(&self, request: &TitleRequest) -> TitleResponse {
        self.suggest_titles(&request.history, &request.character_state)
            .await
    }

    pub async fn handle_stats(&self, request: &StatsRequest) -> GeneratedCharacter {
        self.generate_character(&request.description).await
    }

    async fn utility_completion(&self, prompt: &str) -> Option<String> {
        let sequencer = self.sequencer.as_ref()?;
        sequencer
            .generate(prompt, std::slice::from_ref(&self.utility_model))
            .await
            .ok()
    }

    /// Five title ideas for the adventure so far, or a fixed list when generation fails.
    pub async fn suggest_titles(&self, history: &[String], character: &Character) -> TitleResponse {
        let prompt = prompts::build_title_prompt(history, character);
        let titles = self
            .utility_completion(&prompt)
            .await
            .and_then(|text| {
                let json = extract_json_array(&text)?;
                serde_json::from_str::<Vec<String>>(json)
                    .map_err(|e| log::warn!("Title generation returned bad json: {}", e))
                    .ok()
            })
            .filter(|titles| !titles.is_empty())
            .map(|mut titles| {
                titles.truncate(FALLBACK_TITLES.len());
                titles
            })
            .unwrap_or_else(|| FALLBACK_TITLES.iter().map(|t| t.to_string()).collect());
        TitleResponse { titles }
    }

    /// Stats for a hero described in free text, or a plain default hero when generation fails.
    pub async fn generate_character(&self, description: &str) -> GeneratedCharacter {
        let prompt = prompts::build_stats_prompt(description);
        self.utility_completion(&prompt)
            .await
            .and_then(|text| {
                let json = extract_json_object(&text)?;
                serde_json::from_str::<GeneratedCharacter>(json)
                    .map_err(|e| log::warn!("Stat generation returned bad json: {}", e))
                    .ok()
            })
            .unwrap_or_default()
    }
}
