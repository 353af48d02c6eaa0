//! OpenAI Chat Completions client.
//!
//! Implements [`TextModel`] over `/v1/chat/completions` with `stream: true`,
//! turning the SSE frames into text deltas.

use async_trait::async_trait;
use futures::StreamExt;

use super::{CompletionRequest, LlmSettings, TextModel, TextStream};

/// Client for OpenAI-compatible chat completion endpoints.
#[derive(Clone)]
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsClient")
            .field("base_url", &self.settings.base_url)
            .field("model", &self.settings.model)
            .finish()
    }
}

impl ChatCompletionsClient {
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    #[must_use]
    pub fn with_client(http: reqwest::Client, settings: LlmSettings) -> Self {
        Self { http, settings }
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "stream": true,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
        });
        if let Some(t) = request.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if request.json && self.settings.provider.supports_json_mode() {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        body
    }
}

#[async_trait]
impl TextModel for ChatCompletionsClient {
    async fn stream(&self, request: CompletionRequest) -> anyhow::Result<TextStream> {
        let url = self.settings.provider.build_chat_url(&self.settings.base_url);
        let body = self.request_body(&request);

        let rb = self.http.post(&url).json(&body);
        let rb = self
            .settings
            .provider
            .authorize(rb, self.settings.api_key.as_deref());

        let resp = rb.send().await?.error_for_status()?;
        let byte_stream = resp.bytes_stream();

        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                buf.extend_from_slice(&chunk);

                while let Some(pos) = find_double_newline(&buf) {
                    let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame);

                    for line in text.lines() {
                        if let Some(delta) = parse_data_line(line)? {
                            yield delta;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(out))
    }
}

/// Extracts the content delta from one `data:` line, if any.
fn parse_data_line(line: &str) -> anyhow::Result<Option<String>> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    let v: serde_json::Value = serde_json::from_str(data)?;
    Ok(v["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(ToString::to_string))
}

/// Find the position of a double newline in the buffer.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;

    fn settings(provider: Provider) -> LlmSettings {
        LlmSettings {
            base_url: "https://api.openai.com".into(),
            api_key: Some("sk-test".into()),
            model: "gpt-4o-mini".into(),
            provider,
        }
    }

    #[test]
    fn test_parse_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_data_line(line).unwrap().as_deref(), Some("Hel"));
    }

    #[test]
    fn test_parse_ignores_done_and_role_frames() {
        assert!(parse_data_line("data: [DONE]").unwrap().is_none());
        let role = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(parse_data_line(role).unwrap().is_none());
        assert!(parse_data_line(": keep-alive").unwrap().is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        assert!(parse_data_line("data: {not json").is_err());
    }

    #[test]
    fn test_json_mode_only_where_supported() {
        let req = CompletionRequest::new("s", "p").json();

        let openai = ChatCompletionsClient::new(settings(Provider::OpenAI));
        assert_eq!(
            openai.request_body(&req)["response_format"]["type"],
            "json_object"
        );

        let generic = ChatCompletionsClient::new(settings(Provider::Generic));
        assert!(generic.request_body(&req).get("response_format").is_none());
    }

    #[test]
    fn test_find_double_newline() {
        assert_eq!(find_double_newline(b"data: x\n\nrest"), Some(7));
        assert_eq!(find_double_newline(b"data: x\n"), None);
    }
}
