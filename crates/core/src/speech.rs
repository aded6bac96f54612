//! Speech backend interface and its OpenAI-compatible implementation.

use crate::{audio::pcm, error::SynthesisError};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{CreateSpeechRequestArgs, SpeechModel, SpeechResponseFormat, Voice},
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Sample rate of raw PCM returned by the OpenAI speech endpoint.
pub const OPENAI_SPEECH_PCM16_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    /// ISO 639-1 code of the language the text is written in.
    pub language_code: String,
    pub speed: f32,
}

/// Mono PCM16 audio from the speech backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedSpeech {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl SynthesizedSpeech {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// A text-to-speech backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedSpeech, SynthesisError>;
}

pub struct OpenAISpeechClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAISpeechClient {
    pub fn new(config: OpenAIConfig, model: String, timeout: Duration) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            timeout,
        }
    }

    fn speech_model(&self) -> SpeechModel {
        match self.model.as_str() {
            "tts-1" => SpeechModel::Tts1,
            "tts-1-hd" => SpeechModel::Tts1Hd,
            other => SpeechModel::Other(other.to_string()),
        }
    }
}

/// Maps a voice name onto the backend's fixed voice set.
fn voice(name: &str) -> Voice {
    match name {
        "echo" => Voice::Echo,
        "fable" => Voice::Fable,
        "onyx" => Voice::Onyx,
        "nova" => Voice::Nova,
        "shimmer" => Voice::Shimmer,
        _ => Voice::Alloy,
    }
}

fn classify(err: OpenAIError) -> SynthesisError {
    match err {
        OpenAIError::ApiError(api) => {
            let code = api.code.clone().unwrap_or_default();
            if code.contains("quota") || code.contains("rate_limit") {
                SynthesisError::Quota(api.message)
            } else {
                SynthesisError::Backend(api.message)
            }
        }
        other => SynthesisError::Backend(other.to_string()),
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAISpeechClient {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedSpeech, SynthesisError> {
        let body = CreateSpeechRequestArgs::default()
            .model(self.speech_model())
            .input(request.text.as_str())
            .voice(voice(&request.voice))
            .response_format(SpeechResponseFormat::Pcm)
            .speed(request.speed)
            .build()
            .map_err(classify)?;

        let response = tokio::time::timeout(self.timeout, self.client.audio().speech(body))
            .await
            .map_err(|_| SynthesisError::Timeout)?
            .map_err(classify)?;

        if response.bytes.len() % 2 != 0 {
            return Err(SynthesisError::InvalidAudio(format!(
                "odd PCM16 payload of {} bytes",
                response.bytes.len()
            )));
        }
        let samples = pcm::decode_pcm16_le(&response.bytes);
        debug!(
            voice = %request.voice,
            language = %request.language_code,
            samples = samples.len(),
            "Speech synthesized"
        );
        Ok(SynthesizedSpeech {
            samples,
            sample_rate: OPENAI_SPEECH_PCM16_SAMPLE_RATE,
        })
    }
}
