use super::{SpeechBackend, Voice};
use crate::error::SynthesisError;
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct SynthesizeResponse {
    #[serde(rename = "audioContent")]
    audio_content: Option<String>,
}

/// Cloud Text-to-Speech `text:synthesize` client.
pub struct GoogleSpeechBackend {
    client: Client,
    endpoint: String,
    voice: Voice,
}

impl GoogleSpeechBackend {
    pub fn new(client: Client, endpoint: impl Into<String>, voice: Voice) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            voice,
        }
    }

    pub fn voice(&self) -> &Voice {
        &self.voice
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        json!({
            "input": { "text": text },
            "voice": {
                "languageCode": self.voice.language_code,
                "name": self.voice.name,
            },
            "audioConfig": { "audioEncoding": self.voice.audio_encoding },
        })
    }
}

#[async_trait]
impl SpeechBackend for GoogleSpeechBackend {
    fn id(&self) -> &'static str {
        "google-cloud-tts"
    }

    async fn synthesize(&self, access_token: &str, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(access_token)
            .json(&self.request_body(text))
            .send()
            .await
            .map_err(|e| SynthesisError::Network(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SynthesisError::Auth {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SynthesisError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let body: SynthesizeResponse = resp
            .json()
            .await
            .map_err(|e| SynthesisError::MalformedPayload(e.to_string()))?;

        let encoded = body
            .audio_content
            .filter(|a| !a.is_empty())
            .ok_or_else(|| SynthesisError::MalformedPayload("missing audioContent".to_string()))?;

        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| SynthesisError::MalformedPayload(format!("audioContent: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn backend(url: String) -> GoogleSpeechBackend {
        GoogleSpeechBackend::new(
            Client::new(),
            url,
            Voice {
                language_code: "en-US".to_string(),
                name: "en-US-Neural2-F".to_string(),
                audio_encoding: "MP3".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_synthesize_decodes_audio() {
        let mut server = mockito::Server::new_async().await;
        let audio = base64::engine::general_purpose::STANDARD.encode(b"ID3-audio");
        let mock = server
            .mock("POST", "/v1/text:synthesize")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::PartialJson(json!({
                "input": { "text": "Hello world" },
                "voice": { "languageCode": "en-US", "name": "en-US-Neural2-F" },
                "audioConfig": { "audioEncoding": "MP3" }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "audioContent": audio }).to_string())
            .create_async()
            .await;

        let bytes = backend(format!("{}/v1/text:synthesize", server.url()))
            .synthesize("tok", "Hello world")
            .await
            .unwrap();
        assert_eq!(bytes, b"ID3-audio");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_auth_statuses() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/unauthorized")
            .with_status(401)
            .create_async()
            .await;
        server
            .mock("POST", "/forbidden")
            .with_status(403)
            .create_async()
            .await;

        let err = backend(format!("{}/unauthorized", server.url()))
            .synthesize("tok", "text")
            .await
            .unwrap_err();
        assert_eq!(err, SynthesisError::Auth { status: 401 });

        let err = backend(format!("{}/forbidden", server.url()))
            .synthesize("tok", "text")
            .await
            .unwrap_err();
        assert_eq!(err, SynthesisError::Auth { status: 403 });
    }

    #[tokio::test]
    async fn test_backend_failure_and_missing_audio() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/broken")
            .with_status(500)
            .with_body("internal")
            .create_async()
            .await;
        server
            .mock("POST", "/empty")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;

        let err = backend(format!("{}/broken", server.url()))
            .synthesize("tok", "text")
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Backend { status: 500, .. }));

        let err = backend(format!("{}/empty", server.url()))
            .synthesize("tok", "text")
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::MalformedPayload(_)));
    }
}
