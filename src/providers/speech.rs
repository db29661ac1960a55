use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::SpeechRenderer;
use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'static str,
}

/// Text-to-speech through an OpenAI-compatible `/audio/speech` endpoint.
///
/// Audio is written as `<uuid>.mp3` into the configured audio directory.
pub struct OpenAiSpeech {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
    audio_dir: PathBuf,
}

impl OpenAiSpeech {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.provider_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.openai_base_url.clone(),
            api_key: config.openai_api_key.clone(),
            model: config.speech_model.clone(),
            voice: config.speech_voice.clone(),
            audio_dir: config.audio_dir(),
        })
    }
}

/// Primary subtag of a language code ("pt-BR" -> "pt")
pub fn primary_language(lang: &str) -> &str {
    lang.split(['-', '_']).next().unwrap_or(lang)
}

#[async_trait]
impl SpeechRenderer for OpenAiSpeech {
    async fn render(&self, text: &str, lang: &str) -> Result<String> {
        let request = SpeechRequest {
            model: &self.model,
            voice: &self.voice,
            input: text,
            response_format: "mp3",
        };

        let mut http = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| Error::speech(format!("request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::speech(format!("API error {}: {}", status, body)));
        }

        let audio = response.bytes().await?;
        let file_name = format!("{}.mp3", Uuid::new_v4().simple());
        tokio::fs::create_dir_all(&self.audio_dir).await?;
        tokio::fs::write(self.audio_dir.join(&file_name), &audio).await?;

        debug!(lang = primary_language(lang), bytes = audio.len(), file = %file_name, "rendered speech");
        Ok(file_name)
    }
}
