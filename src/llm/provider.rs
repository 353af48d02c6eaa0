//! Where the chat endpoint lives and how the key is sent.

const AZURE_API_VERSION: &str = "2024-08-01-preview";

/// OpenAI-compatible hosts the client knows how to address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    /// Azure routes by deployment rather than model.
    AzureOpenAI {
        deployment_name: String,
        api_version: String,
    },
    OpenRouter,
    Groq,
    /// Local servers (Ollama, vLLM, LM Studio) and anything unrecognised.
    Generic,
}

impl Provider {
    pub fn azure(deployment_name: impl Into<String>, api_version: Option<String>) -> Self {
        Self::AzureOpenAI {
            deployment_name: deployment_name.into(),
            api_version: api_version.unwrap_or_else(|| AZURE_API_VERSION.to_string()),
        }
    }

    /// Guesses the provider from the host part of `base_url`.
    #[must_use]
    pub fn detect_from_url(base_url: &str) -> Self {
        let host = url::Url::parse(base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .unwrap_or_else(|| base_url.to_lowercase());

        if host.ends_with("azure.com") {
            Self::azure("", None)
        } else if host.ends_with("openrouter.ai") {
            Self::OpenRouter
        } else if host.ends_with("groq.com") {
            Self::Groq
        } else if host.ends_with("openai.com") {
            Self::OpenAI
        } else {
            Self::Generic
        }
    }

    #[must_use]
    pub fn build_chat_url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            Self::AzureOpenAI {
                deployment_name,
                api_version,
            } => format!(
                "{base}/openai/deployments/{deployment_name}/chat/completions?api-version={api_version}"
            ),
            Self::Groq => format!("{base}/openai/v1/chat/completions"),
            Self::OpenAI | Self::OpenRouter | Self::Generic => format!("{base}/v1/chat/completions"),
        }
    }

    pub fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        api_key: Option<&str>,
    ) -> reqwest::RequestBuilder {
        match (self, api_key) {
            (Self::AzureOpenAI { .. }, Some(key)) => request.header("api-key", key),
            (_, Some(key)) => request.bearer_auth(key),
            (_, None) => request,
        }
    }

    /// Whether `response_format: json_object` is understood. Local servers
    /// vary, so the prompt alone asks for JSON there.
    #[must_use]
    pub fn supports_json_mode(&self) -> bool {
        !matches!(self, Self::Generic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_by_host() {
        let cases = [
            ("https://api.openai.com", Provider::OpenAI),
            ("https://openrouter.ai/api", Provider::OpenRouter),
            ("https://api.groq.com", Provider::Groq),
            ("http://localhost:11434", Provider::Generic),
            // Path segments do not count.
            ("http://proxy.local/openai.com", Provider::Generic),
        ];
        for (url, expected) in cases {
            assert_eq!(Provider::detect_from_url(url), expected, "{url}");
        }
        assert!(matches!(
            Provider::detect_from_url("https://my-resource.openai.azure.com"),
            Provider::AzureOpenAI { .. }
        ));
    }

    #[test]
    fn test_chat_urls() {
        assert_eq!(
            Provider::OpenAI.build_chat_url("https://api.openai.com/"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            Provider::Groq.build_chat_url("https://api.groq.com"),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        assert_eq!(
            Provider::azure("gpt-4o", None).build_chat_url("https://r.openai.azure.com"),
            "https://r.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-08-01-preview"
        );
    }

    #[test]
    fn test_json_mode_support() {
        assert!(Provider::OpenAI.supports_json_mode());
        assert!(!Provider::Generic.supports_json_mode());
    }
}
