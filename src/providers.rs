use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited by provider")]
    RateLimited,
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self { ProviderError::Http(e.to_string()) }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self { prompt: prompt.into(), max_tokens, temperature: 0.7 }
    }
}

#[async_trait]
pub trait TextProvider: Send + Sync {
    async fn complete(&self, req: &CompletionRequest) -> Result<String, ProviderError>;
    fn name(&self) -> &'static str;
}

/// Returns the URL of the generated image.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
    fn name(&self) -> &'static str;
}

pub struct OpenAIClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    image_model: String,
    image_size: String,
}

impl OpenAIClient {
    pub fn new(
        api_key: String,
        base_url: String,
        chat_model: String,
        image_model: String,
        image_size: String,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, api_key, base_url, chat_model, image_model, image_size })
    }

    /// Same client pointed at a different chat model.
    pub fn with_chat_model(&self, model: &str) -> Self {
        Self {
            http: self.http.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            chat_model: model.to_string(),
            image_model: self.image_model.clone(),
            image_size: self.image_size.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<R, ProviderError> {
        let resp = self.http.post(self.url(path)).bearer_auth(&self.api_key).json(body).send().await?;
        let status = resp.status();
        let payload = resp.text().await.unwrap_or_default();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProviderError::Auth(extract_api_error(&payload)));
        }
        if !status.is_success() {
            return Err(ProviderError::Http(format!("{status}: {}", extract_api_error(&payload))));
        }
        serde_json::from_str(&payload).map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

#[derive(Serialize)] struct ChatReq<'a>{ model:&'a str, messages:Vec<Msg<'a>>, max_tokens:u32, temperature:f32 }
#[derive(Serialize)] struct Msg<'a>{ role:&'a str, content:&'a str }
#[derive(Deserialize)] struct ChatResp{ choices:Vec<Choice> }
#[derive(Deserialize)] struct Choice{ message: MsgOwned }
#[derive(Deserialize)] struct MsgOwned{ content:Option<String> }

#[derive(Serialize)] struct ImageReq<'a>{ model:&'a str, prompt:&'a str, n:u32, size:&'a str }
#[derive(Deserialize)] struct ImageResp{ data:Vec<ImageDatum> }
#[derive(Deserialize)] struct ImageDatum{ url:Option<String> }

#[async_trait]
impl TextProvider for OpenAIClient {
    async fn complete(&self, req: &CompletionRequest) -> Result<String, ProviderError> {
        let body = ChatReq {
            model: &self.chat_model,
            messages: vec![Msg { role: "user", content: &req.prompt }],
            max_tokens: req.max_tokens,
            temperature: req.temperature,
        };
        let resp: ChatResp = self.post("chat/completions", &body).await?;
        // An empty completion is still a completion; missing choices is not.
        let choice = resp.choices.into_iter().next()
            .ok_or_else(|| ProviderError::Malformed("no choices returned".into()))?;
        Ok(choice.message.content.unwrap_or_default())
    }

    fn name(&self) -> &'static str { "openai" }
}

#[async_trait]
impl ImageProvider for OpenAIClient {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = ImageReq { model: &self.image_model, prompt, n: 1, size: &self.image_size };
        let resp: ImageResp = self.post("images/generations", &body).await?;
        resp.data.into_iter().next().and_then(|d| d.url)
            .ok_or_else(|| ProviderError::Malformed("no image url returned".into()))
    }

    fn name(&self) -> &'static str { "openai" }
}

pub(crate) fn extract_api_error(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope { error: Option<ApiError> }
    #[derive(Deserialize)]
    struct ApiError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<String>,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(Envelope { error: Some(err) }) => format!(
            "{} (type={}, code={})",
            err.message.unwrap_or_else(|| "unknown error".into()),
            err.kind.unwrap_or_else(|| "unknown".into()),
            err.code.unwrap_or_else(|| "none".into()),
        ),
        _ => body.to_string(),
    }
}

/// Offline provider producing well-formed canned output shaped by the prompt.
#[derive(Default)]
pub struct MockProvider {
    calls: Mutex<u64>,
}

impl MockProvider {
    #[cfg(test)]
    pub fn calls(&self) -> u64 { *self.calls.lock() }

    fn bump(&self) -> u64 {
        let mut n = self.calls.lock();
        *n += 1;
        *n
    }
}

fn subject_of(prompt: &str) -> &str {
    for marker in [" review of ", " for ", "photo of "] {
        if let Some((_, rest)) = prompt.split_once(marker) {
            let end = rest.find(|c| matches!(c, '.' | ',' | ':' | '\n')).unwrap_or(rest.len());
            let subject = rest[..end].trim();
            return subject.split(" in the ").next().unwrap_or(subject);
        }
    }
    "the product"
}

#[async_trait]
impl TextProvider for MockProvider {
    async fn complete(&self, req: &CompletionRequest) -> Result<String, ProviderError> {
        let n = self.bump();
        let p = &req.prompt;
        let subject = subject_of(p);
        let text = if p.contains("single JSON object") {
            serde_json::json!({
                "name": format!("Mock Gadget {n}"),
                "description": "A dependable gadget built for everyday use.",
                "features": ["Long battery life", "Fast charging"],
                "pros": ["Great value", "Solid build"],
                "cons": ["Average speakers"],
                "specifications": { "Weight": "300g" },
                "price": 199.99,
                "rating": 4.2
            })
            .to_string()
        } else if p.contains("SEO metadata") {
            format!(
                "Meta title: {subject} Review\n\nMeta description: An in-depth look at {subject}.\n\nKeywords: {subject}, review, tech"
            )
        } else if p.contains("pros and cons") {
            "Pros:\n- Strong performance\n- Good battery life\n\nCons:\n- Pricey".to_string()
        } else {
            format!("{subject} is a capable device.\n\nIt performs well across the board.")
        };
        Ok(text)
    }

    fn name(&self) -> &'static str { "mock" }
}

#[async_trait]
impl ImageProvider for MockProvider {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let n = self.bump();
        Ok(format!("/images/mock/{}-{n}.png", crate::model::slugify(subject_of(prompt))))
    }

    fn name(&self) -> &'static str { "mock" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_openai_error_envelope() {
        let body = r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota","code":"insufficient_quota"}}"#;
        assert_eq!(
            extract_api_error(body),
            "You exceeded your current quota (type=insufficient_quota, code=insufficient_quota)"
        );
        assert_eq!(extract_api_error("gateway timeout"), "gateway timeout");
    }

    #[tokio::test]
    async fn mock_answers_each_prompt_kind() {
        let mock = MockProvider::default();
        let seo = mock
            .complete(&CompletionRequest::new("Generate SEO metadata for a product review of Pixel 9.\nReply", 500))
            .await
            .unwrap();
        assert!(seo.starts_with("Meta title: Pixel 9 Review"));

        let url = ImageProvider::generate(&mock, "Professional product photo of Pixel 9, Smartphones").await.unwrap();
        assert_eq!(url, "/images/mock/pixel-9-2.png");
        assert_eq!(mock.calls(), 2);
    }
}
