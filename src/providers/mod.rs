//! Hosted model providers: chat completion and text-to-speech

mod openai;
mod speech;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Turn;

pub use openai::OpenAiChat;
pub use speech::OpenAiSpeech;

/// Sampling options for one completion request
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object response
    pub json_response: bool,
}

/// Generates the next assistant message from an ordered list of turns
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, turns: &[Turn], options: &CompletionOptions) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Renders text to an audio file and returns the file name
#[async_trait]
pub trait SpeechRenderer: Send + Sync {
    async fn render(&self, text: &str, lang: &str) -> Result<String>;
}
