use thiserror::Error;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

// Enum for handling various application-level errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("AI error: {0}")]
    AI(#[from] AIError), // Errors related to text generation.

    #[error("Image error: {0}")]
    Image(#[from] ImageError), // Errors related to scene illustrations.

    #[error("Store error: {0}")]
    Store(#[from] StoreError), // Errors from the adventure store.

    #[error("Game error: {0}")]
    Game(#[from] GameError), // Errors specific to game logic or state.
}

// Enum for game-specific errors. These are caller mistakes, not backend failures.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("Expected phase {expected}, the adventure is in {actual}")]
    InvalidPhase { expected: String, actual: String },

    #[error("No character has been created")]
    NoCharacter,

    #[error("An action cannot be empty")]
    EmptyAction,

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Message {0} has no image prompt")]
    NoImagePrompt(String),
}

// Errors from the text generation backends.
#[derive(Debug, Error)]
pub enum AIError {
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    #[error("OpenAI API error: {0}")]
    OpenAI(#[from] async_openai::error::OpenAIError),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("The model returned no text")]
    EmptyResponse,

    #[error("All models exhausted after trying {attempted:?}")]
    AllModelsExhausted { attempted: Vec<String> },
}

// Request URLs are dropped so an endpoint's query string never reaches a log line or notice.
impl From<reqwest::Error> for AIError {
    fn from(err: reqwest::Error) -> AIError {
        AIError::Http(err.without_url())
    }
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Missing image prompt")]
    MissingPrompt,

    #[error("Magical core missing (API KEY)")]
    MissingApiKey,

    #[error("Image request failed: {0}")]
    Request(String),

    #[error("The image model returned no inline image")]
    NoImagePart,

    #[error("Both magical engines have been exhausted for now.")]
    BothEnginesExhausted,
}

impl From<reqwest::Error> for ImageError {
    fn from(err: reqwest::Error) -> Self {
        ImageError::Request(err.without_url().to_string())
    }
}

impl From<async_openai::error::OpenAIError> for ImageError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        ImageError::Request(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Adventure not found: {0}")]
    NotFound(String),

    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
