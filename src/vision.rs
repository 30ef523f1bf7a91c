use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::embedding::DEFAULT_OPENAI_BASE_URL;
use crate::error::VisionError;

pub const DEFAULT_VISION_MODEL: &str = "gpt-4o";
pub const DEFAULT_VISION_TIMEOUT: Duration = Duration::from_secs(120);

const ANALYSIS_MAX_TOKENS: u32 = 2000;
const REFERENCES_MAX_TOKENS: u32 = 1000;

const ANALYSIS_SYSTEM_PROMPT: &str = "You are an expert AI radiologist analyzing medical images. \
Your response should include a detailed radiological assessment, identifying possible conditions, \
underlying causes, key observations, highlights, and recommendations.";

const ANALYSIS_INSTRUCTION: &str = "Perform a comprehensive radiological assessment of this image. \
Include the following details: \
1. Identified abnormalities or conditions. \
2. Possible causes and contributing factors. \
3. Key observations and notable findings. \
4. Critical areas that require attention. \
5. Recommended next steps or further evaluations. \
Highlight important regions and provide an in-depth analysis.";

const REFERENCES_SYSTEM_PROMPT: &str = "Provide relevant medical literature references for the conditions mentioned. \
Ensure that all references are in **clickable hyperlink format** and not as plain text.";

/// An uploaded image as it arrives from the client.
#[derive(Clone, Serialize, Deserialize)]
pub struct ImageUpload {
    /// Base64-encoded PNG bytes, without a data-URL prefix
    pub image: String,
    pub filename: String,
    /// Per-request key; overrides the configured one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpload")
            .field("filename", &self.filename)
            .field("image_len", &self.image.len())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionReport {
    pub analysis: String,
    pub references: String,
}

/// Multimodal model that reads an image and writes an analysis plus a
/// references list. Answers are not deterministic.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn analyze(&self, upload: &ImageUpload) -> Result<VisionReport, VisionError>;
}

/// Two chat-completion calls against an OpenAI-compatible endpoint: one with
/// the image, one with the resulting analysis text.
pub struct OpenAiVisionClient {
    model_name: String,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Content<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Content<'a> {
    Text(&'a str),
    Parts(Vec<Part<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Part<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiVisionClient {
    pub fn new(model_name: &str, api_key: Option<String>) -> Self {
        Self {
            model_name: model_name.to_string(),
            api_key,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            timeout: DEFAULT_VISION_TIMEOUT,
            http_client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn chat(&self, api_key: &str, request: &ChatRequest<'_>, what: &'static str) -> Result<String, VisionError> {
        let resp = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(VisionError::Api { status, body });
        }

        let response: ChatResponse = resp.json().await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(VisionError::EmptyResponse(what))
    }

    async fn run(&self, api_key: &str, upload: &ImageUpload) -> Result<VisionReport, VisionError> {
        let data_url = format!("data:image/png;base64,{}", upload.image);
        let analysis_request = ChatRequest {
            model: &self.model_name,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: Content::Text(ANALYSIS_SYSTEM_PROMPT),
                },
                ChatMessage {
                    role: "user",
                    content: Content::Parts(vec![
                        Part::Text { text: ANALYSIS_INSTRUCTION },
                        Part::ImageUrl { image_url: ImageUrl { url: data_url } },
                    ]),
                },
            ],
            max_tokens: ANALYSIS_MAX_TOKENS,
        };
        let analysis = self.chat(api_key, &analysis_request, "analysis").await?;
        debug!(filename = %upload.filename, chars = analysis.len(), "analysis received");

        let references = {
            let request = ChatRequest {
                model: &self.model_name,
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: Content::Text(REFERENCES_SYSTEM_PROMPT),
                    },
                    ChatMessage {
                        role: "user",
                        content: Content::Text(&analysis),
                    },
                ],
                max_tokens: REFERENCES_MAX_TOKENS,
            };
            self.chat(api_key, &request, "references list").await?
        };

        Ok(VisionReport { analysis, references })
    }
}

#[async_trait]
impl VisionAnalyzer for OpenAiVisionClient {
    async fn analyze(&self, upload: &ImageUpload) -> Result<VisionReport, VisionError> {
        let usable = |k: &&str| !k.trim().is_empty();
        let api_key = upload
            .api_key
            .as_deref()
            .filter(usable)
            .or_else(|| self.api_key.as_deref().filter(usable))
            .ok_or(VisionError::MissingApiKey)?;

        info!(filename = %upload.filename, model = %self.model_name, "requesting image analysis");
        tokio::time::timeout(self.timeout, self.run(api_key, upload))
            .await
            .map_err(|_| VisionError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use warp::Filter;

    fn upload(api_key: Option<&str>) -> ImageUpload {
        ImageUpload {
            image: "iVBORw0KGgo=".into(),
            filename: "x1.png".into(),
            api_key: api_key.map(str::to_string),
        }
    }

    #[test]
    fn image_message_uses_content_parts() {
        let req = ChatRequest {
            model: "gpt-4o",
            messages: vec![ChatMessage {
                role: "user",
                content: Content::Parts(vec![
                    Part::Text { text: "look" },
                    Part::ImageUrl { image_url: ImageUrl { url: "data:image/png;base64,AAAA".into() } },
                ]),
            }],
            max_tokens: 2000,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(json["messages"][0]["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(json["max_tokens"], 2000);
    }

    #[test]
    fn debug_hides_api_key() {
        let text = format!("{:?}", upload(Some("sk-secret")));
        assert!(!text.contains("sk-secret"));
        assert!(text.contains("x1.png"));
    }

    #[tokio::test]
    async fn missing_key_is_reported_before_any_request() {
        let client = OpenAiVisionClient::new("gpt-4o", None).with_base_url("http://127.0.0.1:9");
        assert!(matches!(client.analyze(&upload(None)).await, Err(VisionError::MissingApiKey)));
    }

    #[tokio::test]
    async fn two_calls_produce_analysis_and_references() {
        let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let route = warp::post()
            .and(warp::path!("chat" / "completions"))
            .and(warp::header::exact("authorization", "Bearer sk-request"))
            .and(warp::body::json())
            .map(move |body: serde_json::Value| {
                let mut log = log.lock().unwrap();
                log.push(body);
                let answer = if log.len() == 1 { "No acute abnormality." } else { "[Ref](https://example.org)" };
                warp::reply::json(&serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": answer}}]
                }))
            });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let client = OpenAiVisionClient::new("gpt-4o", Some("sk-configured".into()))
            .with_base_url(&format!("http://{addr}"));
        let report = client.analyze(&upload(Some("sk-request"))).await.unwrap();
        assert_eq!(report.analysis, "No acute abnormality.");
        assert_eq!(report.references, "[Ref](https://example.org)");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0]["max_tokens"], 2000);
        assert_eq!(seen[0]["messages"][1]["content"][1]["image_url"]["url"], "data:image/png;base64,iVBORw0KGgo=");
        assert_eq!(seen[1]["max_tokens"], 1000);
        assert_eq!(seen[1]["messages"][1]["content"], "No acute abnormality.");
    }

    #[tokio::test]
    async fn upstream_errors_keep_status() {
        let route = warp::post().map(|| {
            warp::reply::with_status("bad key", warp::http::StatusCode::UNAUTHORIZED)
        });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let client = OpenAiVisionClient::new("gpt-4o", Some("sk".into())).with_base_url(&format!("http://{addr}"));
        assert!(matches!(
            client.analyze(&upload(None)).await,
            Err(VisionError::Api { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn empty_answer_is_an_error() {
        let route = warp::post().map(|| {
            warp::reply::json(&serde_json::json!({"choices": [{"message": {"content": null}}]}))
        });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let client = OpenAiVisionClient::new("gpt-4o", Some("sk".into())).with_base_url(&format!("http://{addr}"));
        assert!(matches!(
            client.analyze(&upload(None)).await,
            Err(VisionError::EmptyResponse("analysis"))
        ));
    }
}
