// Scene illustrations: a free render-service URL first, an inline generative image on request.

use crate::ai::{GeminiClient, first_candidate_parts};
use crate::error::{AIError, ImageError};
use crate::settings::{Provider, Settings};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateImageRequestArgs, Image, ImageModel, ImageResponseFormat, ImageSize},
};
use async_trait::async_trait;
use rand::Rng;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{Duration, timeout};

pub const IMAGE_SIZE: u32 = 1024;
const SEED_RANGE: u32 = 1_000_000;

/// Something the display layer can show: a hosted image or a self-contained payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    Remote(String),
    Inline { mime_type: String, data: String },
}

impl ImageReference {
    pub fn to_url(&self) -> String {
        match self {
            ImageReference::Remote(url) => url.clone(),
            ImageReference::Inline { mime_type, data } => format!("data:{mime_type};base64,{data}"),
        }
    }
}

/// Wire shape of an image answer: `{ "url": ... }` or `{ "error": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageResponse {
    Url { url: String },
    Error { error: String },
}

impl From<Result<ImageReference, ImageError>> for ImageResponse {
    fn from(result: Result<ImageReference, ImageError>) -> Self {
        match result {
            Ok(reference) => ImageResponse::Url {
                url: reference.to_url(),
            },
            Err(e) => ImageResponse::Error {
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
}

/// A model that synthesizes image bytes directly.
#[async_trait]
pub trait InlineImageGenerator: Send + Sync {
    async fn generate_image(&self, model: &str, prompt: &str) -> Result<ImageReference, ImageError>;
}

#[async_trait]
impl InlineImageGenerator for GeminiClient {
    async fn generate_image(&self, model: &str, prompt: &str) -> Result<ImageReference, ImageError> {
        let body = self.generate_content(model, prompt).await.map_err(|e| match e {
            AIError::Http(err) => ImageError::from(err),
            other => ImageError::Request(other.to_string()),
        })?;
        inline_image_part(&body).ok_or(ImageError::NoImagePart)
    }
}

fn inline_image_part(body: &Value) -> Option<ImageReference> {
    first_candidate_parts(body).iter().find_map(|part| {
        let inline = part.get("inlineData")?;
        let mime_type = inline.get("mimeType")?.as_str()?;
        let data = inline.get("data")?.as_str()?;
        Some(ImageReference::Inline {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    })
}

/// DALL-E asked for base64 so the result is as self-contained as Gemini's.
pub struct OpenAiImageClient {
    client: Client<OpenAIConfig>,
}

impl OpenAiImageClient {
    pub fn new(api_key: &str) -> Self {
        let openai_config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(openai_config),
        }
    }
}

#[async_trait]
impl InlineImageGenerator for OpenAiImageClient {
    async fn generate_image(&self, model: &str, prompt: &str) -> Result<ImageReference, ImageError> {
        let model = match model {
            "dall-e-2" => ImageModel::DallE2,
            "dall-e-3" => ImageModel::DallE3,
            other => ImageModel::Other(other.to_string()),
        };
        let request = CreateImageRequestArgs::default()
            .prompt(prompt)
            .model(model)
            .n(1)
            .response_format(ImageResponseFormat::B64Json)
            .size(ImageSize::S1024x1024)
            .build()?;

        let response = match timeout(Duration::from_secs(120), self.client.images().create(request)).await {
            Ok(res) => res?,
            Err(_) => return Err(ImageError::Request("Request timed out.".into())),
        };

        response
            .data
            .iter()
            .find_map(|image| match image.as_ref() {
                Image::B64Json { b64_json, .. } => Some(ImageReference::Inline {
                    mime_type: "image/png".to_string(),
                    data: b64_json.to_string(),
                }),
                Image::Url { .. } => None,
            })
            .ok_or(ImageError::NoImagePart)
    }
}

/// Two-tier resolution. Tier 1 only builds a URL; tier 2 runs when the caller asks for it.
pub struct ImageResolver {
    base_url: String,
    inline: Option<Arc<dyn InlineImageGenerator>>,
    model: String,
}

impl ImageResolver {
    pub fn new(
        base_url: impl Into<String>,
        inline: Option<Arc<dyn InlineImageGenerator>>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            inline,
            model: model.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let inline: Option<Arc<dyn InlineImageGenerator>> = match settings.provider {
            Provider::Gemini => settings.gemini_api_key().and_then(|key| {
                GeminiClient::new(key)
                    .map_err(|e| log::error!("Failed to build Gemini image client: {}", e))
                    .ok()
                    .map(|client| Arc::new(client) as Arc<dyn InlineImageGenerator>)
            }),
            Provider::OpenAi => settings
                .openai_api_key()
                .map(|key| Arc::new(OpenAiImageClient::new(&key)) as Arc<dyn InlineImageGenerator>),
        };
        Self::new(settings.image_base_url.clone(), inline, settings.image_model())
    }

    /// Tier 1: a render-service URL. No network traffic happens here.
    pub fn resolve(&self, prompt: &str) -> Result<ImageReference, ImageError> {
        let seed = rand::rng().random_range(0..SEED_RANGE);
        self.render_url(prompt, seed).map(ImageReference::Remote)
    }

    fn render_url(&self, prompt: &str, seed: u32) -> Result<String, ImageError> {
        if prompt.trim().is_empty() {
            return Err(ImageError::MissingPrompt);
        }
        let mut url = Url::parse(&self.base_url).map_err(|e| ImageError::Request(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ImageError::Request(format!("{} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .push(prompt);
        url.query_pairs_mut()
            .append_pair("width", &IMAGE_SIZE.to_string())
            .append_pair("height", &IMAGE_SIZE.to_string())
            .append_pair("seed", &seed.to_string())
            .append_pair("nologo", "true");
        Ok(url.to_string())
    }

    /// Tier 2: an inline image from a generative model.
    pub async fn resolve_fallback(&self, prompt: &str) -> Result<ImageReference, ImageError> {
        if prompt.trim().is_empty() {
            return Err(ImageError::MissingPrompt);
        }
        let Some(inline) = &self.inline else {
            return Err(ImageError::MissingApiKey);
        };

        log::info!("Requesting inline image from {}", self.model);
        inline.generate_image(&self.model, prompt).await.map_err(|e| {
            log::error!("Inline image generation failed: {}", e);
            ImageError::BothEnginesExhausted
        })
    }

    /// Tier 1, dropping to tier 2 only when the URL cannot be built.
    pub async fn generate(&self, request: &ImageRequest) -> ImageResponse {
        let result = match self.resolve(&request.prompt) {
            Err(ImageError::MissingPrompt) => Err(ImageError::MissingPrompt),
            Err(e) => {
                log::warn!("Render URL failed, falling back to inline generation: {}", e);
                self.resolve_fallback(&request.prompt).await
            }
            ok => ok,
        };
        result.into()
    }
}
