//! Hosted chat-completion backend.
//!
//! Sends one `user` message holding the variant's instruction and the image
//! as a base64 `data:` URL to an OpenAI-compatible `/v1/chat/completions`
//! endpoint. Calls are blocking and never retried.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::ApiSettings;
use crate::detect::backend::DetectorBackend;
use crate::detect::prompt::PromptVariant;
use crate::ingest::ImagePayload;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
    detail: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

pub struct OpenAiBackend {
    agent: ureq::Agent,
    settings: ApiSettings,
    api_key: String,
}

impl OpenAiBackend {
    /// Build a backend from API settings. Fails when no API key is configured.
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        let api_key = settings.require_key()?.to_string();
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.timeout)
            .build();
        Ok(Self {
            agent,
            settings: settings.clone(),
            api_key,
        })
    }

    fn request_body(&self, image: &ImagePayload, variant: PromptVariant) -> Result<String> {
        let request = ChatRequest {
            model: &self.settings.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: variant.prompt(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: &image.data_url,
                            detail: &self.settings.detail,
                        },
                    },
                ],
            }],
            max_tokens: self.settings.max_tokens,
            temperature: variant.temperature(),
        };
        serde_json::to_string(&request).context("serialize chat completion request")
    }
}

impl DetectorBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn detect(&mut self, image: &ImagePayload, variant: PromptVariant) -> Result<String> {
        let body = self.request_body(image, variant)?;
        log::debug!(
            "POST {} model={} variant={} image={} ({} bytes, {})",
            self.settings.url,
            self.settings.model,
            variant.label(),
            image.name,
            image.byte_len,
            image.mime_type
        );

        let response = match self
            .agent
            .post(&self.settings.url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Content-Type", "application/json")
            .send_string(&body)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let text = response.into_string().unwrap_or_default();
                return Err(status_error(code, &text));
            }
            Err(err) => return Err(err).context("chat completion request failed"),
        };

        log::debug!("chat completion answered with HTTP {}", response.status());
        let text = response
            .into_string()
            .context("read chat completion response")?;
        parse_reply_content(&text)
    }
}

/// Pull the first choice's message text out of a chat completion response.
fn parse_reply_content(body: &str) -> Result<String> {
    let response: ChatResponse =
        serde_json::from_str(body).context("invalid chat completion response")?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("chat completion response contained no choices"))?;
    choice
        .message
        .content
        .ok_or_else(|| anyhow!("first choice has no message content"))
}

fn status_error(code: u16, body: &str) -> anyhow::Error {
    let api_message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .map(|parsed| parsed.error.message);
    let summary = match code {
        401 => "invalid API key",
        429 => "rate limit exceeded",
        _ => "request rejected by chat completion endpoint",
    };
    match api_message {
        Some(message) => anyhow!("HTTP {}: {}: {}", code, summary, message),
        None => anyhow!("HTTP {}: {}", code, summary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    fn settings() -> ApiSettings {
        ApiSettings {
            url: "https://api.openai.com/v1/chat/completions".to_string(),
            key: Some("sk-test".to_string()),
            model: "gpt-4o".to_string(),
            max_tokens: 4096,
            detail: "high".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn request_carries_prompt_and_data_url() {
        let backend = OpenAiBackend::new(&settings()).unwrap();
        let image = ImagePayload::from_bytes(Path::new("room.webp"), vec![1, 2, 3]).unwrap();
        let body = backend.request_body(&image, PromptVariant::V2).unwrap();
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["max_tokens"], 4096);
        assert_eq!(json["temperature"], 0.2);
        let content = &json["messages"][0]["content"];
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], PromptVariant::V2.prompt());
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/webp;base64,AQID");
        assert_eq!(content[1]["image_url"]["detail"], "high");
    }

    #[test]
    fn missing_key_is_rejected() {
        let mut settings = settings();
        settings.key = None;
        let err = OpenAiBackend::new(&settings).err().expect("missing key");
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn reply_content_is_first_choice() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": "{\"objects\": []}"}}]}"#;
        assert_eq!(parse_reply_content(body).unwrap(), r#"{"objects": []}"#);
        assert!(parse_reply_content(r#"{"choices": []}"#).is_err());
        assert!(parse_reply_content(r#"{"choices": [{"message": {"content": null}}]}"#).is_err());
        assert!(parse_reply_content("<html>bad gateway</html>").is_err());
    }

    #[test]
    fn status_errors_name_the_cause() {
        let err = status_error(401, r#"{"error": {"message": "Incorrect API key provided"}}"#);
        assert_eq!(
            err.to_string(),
            "HTTP 401: invalid API key: Incorrect API key provided"
        );
        assert_eq!(
            status_error(429, "").to_string(),
            "HTTP 429: rate limit exceeded"
        );
        assert!(status_error(500, "oops").to_string().starts_with("HTTP 500"));
    }
}
