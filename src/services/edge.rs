use super::{
    AudioPayload, ContentGenerator, ConversationHandle, ConversationProvisioner, Difficulty,
    Evaluator, GeneratedSentence, ScenarioContext, SpeechSynthesizer, Transcriber, Verdict,
};
use anyhow::{bail, Context, Result};
use base64::Engine;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// Connection settings for the backend functions
#[derive(Debug, Clone)]
pub struct EdgeFunctionConfig {
    /// e.g. "https://project.functions.example/functions/v1"
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// HTTP client for the provisioning, content, evaluation, transcription and
/// speech functions
#[derive(Clone)]
pub struct EdgeFunctionClient {
    client: Client,
    config: EdgeFunctionConfig,
}

/// `{ "data": ... }` envelope used by the game and transcription functions
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentenceData {
    native_sentence: String,
    target_translation: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluationData {
    is_correct: bool,
    score: f64,
    #[serde(default)]
    feedback: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeechData {
    audio_base64: String,
    mime_type: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionData {
    transcription: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationData {
    conversation_url: String,
    conversation_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AvatarConfig<'a> {
    scenario: &'a str,
    language: &'a str,
    prompt: &'a str,
    greeting: &'a str,
}

impl EdgeFunctionClient {
    pub fn new(config: EdgeFunctionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, config })
    }

    fn url(&self, function: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), function)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        function: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let url = self.url(function);
        debug!("Calling {} {}", method, url);

        let response = self
            .client
            .request(method, &url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", function))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("{} returned {}: {}", function, status, text);
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Invalid response from {}", function))
    }
}

#[async_trait::async_trait]
impl ConversationProvisioner for EdgeFunctionClient {
    async fn create_conversation(&self, context: &ScenarioContext) -> Result<ConversationHandle> {
        let body = json!({
            "roomName": context.room_name,
            "participantName": context.participant_name,
            "tavusConfig": AvatarConfig {
                scenario: &context.scenario,
                language: &context.language,
                prompt: &context.prompt,
                greeting: &context.greeting,
            },
        });

        let data: ConversationData = self.call(Method::POST, "livekit-token", body).await?;

        info!(
            "Conversation provisioned: {} ({})",
            data.conversation_id, data.conversation_url
        );

        Ok(ConversationHandle {
            room_url: data.conversation_url,
            conversation_id: data.conversation_id,
        })
    }

    async fn end_conversation(&self, conversation_id: &str) -> Result<()> {
        let body = json!({
            "action": "end_conversation",
            "conversationId": conversation_id,
        });

        let _: serde_json::Value = self.call(Method::DELETE, "livekit-token", body).await?;
        info!("Conversation ended: {}", conversation_id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ContentGenerator for EdgeFunctionClient {
    async fn generate_sentence(
        &self,
        native_language: &str,
        target_language: &str,
        difficulty: Difficulty,
        avoid: &[String],
    ) -> Result<GeneratedSentence> {
        let body = json!({
            "action": "generate_sentence",
            "nativeLanguage": native_language,
            "targetLanguage": target_language,
            "difficulty": difficulty.as_str(),
            "questionHistory": avoid,
        });

        let envelope: Envelope<SentenceData> =
            self.call(Method::POST, "translation-game", body).await?;

        Ok(GeneratedSentence {
            prompt: envelope.data.native_sentence,
            expected_translation: envelope.data.target_translation,
        })
    }
}

#[async_trait::async_trait]
impl Evaluator for EdgeFunctionClient {
    async fn evaluate_translation(
        &self,
        user_text: &str,
        expected_text: &str,
        native_language: &str,
        target_language: &str,
    ) -> Result<Verdict> {
        let body = json!({
            "action": "evaluate_translation",
            "userTranslation": user_text,
            "correctTranslation": expected_text,
            "nativeLanguage": native_language,
            "targetLanguage": target_language,
        });

        let envelope: Envelope<EvaluationData> =
            self.call(Method::POST, "translation-game", body).await?;

        Ok(Verdict {
            is_correct: envelope.data.is_correct,
            score: envelope.data.score.round().clamp(0.0, 100.0) as u32,
            feedback: envelope.data.feedback,
        })
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for EdgeFunctionClient {
    async fn synthesize(&self, text: &str, language: &str) -> Result<AudioPayload> {
        let body = json!({
            "action": "text_to_speech",
            "textToSpeak": text,
            "nativeLanguage": language,
        });

        let envelope: Envelope<SpeechData> =
            self.call(Method::POST, "translation-game", body).await?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(envelope.data.audio_base64.as_bytes())
            .context("Synthesized audio is not valid base64")?;

        Ok(AudioPayload {
            bytes,
            mime_type: envelope.data.mime_type,
        })
    }
}

#[async_trait::async_trait]
impl Transcriber for EdgeFunctionClient {
    async fn transcribe(&self, audio: &AudioPayload, language: &str) -> Result<String> {
        let body = json!({
            "audio": base64::engine::general_purpose::STANDARD.encode(&audio.bytes),
            "language": language,
            "mimeType": audio.mime_type,
        });

        let envelope: Envelope<TranscriptionData> =
            self.call(Method::POST, "whisper-transcribe", body).await?;

        Ok(envelope.data.transcription.trim().to_string())
    }
}
