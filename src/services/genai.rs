//! HTTP client for the hosted generative endpoints the advisor app relies on:
//! chat with optional attachments and search grounding, image generation and
//! editing, and long-running video generation.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Shown instead of an error when the chat backend is unreachable or returns
/// garbage. Chat failures never propagate.
pub const CHAT_FALLBACK: &str =
    "CyberGuard AI could not process that request. Please try again in a moment.";

/// Interval between long-running operation polls.
const VIDEO_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Upper bound on how long a video job may be polled before giving up.
const VIDEO_POLL_DEADLINE: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct Attachment {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub grounding_metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub aspect_ratio: String,
    pub image_size: String,
}

/// Editing may come back as a new image or as a text explanation.
#[derive(Debug, Clone)]
pub enum ImageEditOutcome {
    Image(String),
    Text(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    grounding_metadata: Option<Value>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Deserialize, Debug)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    response: Option<OperationResponse>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    #[serde(default)]
    generated_videos: Vec<GeneratedVideo>,
}

#[derive(Deserialize, Debug)]
struct GeneratedVideo {
    video: Option<VideoRef>,
}

#[derive(Deserialize, Debug)]
struct VideoRef {
    uri: Option<String>,
}

#[derive(Clone)]
pub struct GenAiClient {
    client: Client,
    api_key: String,
    system_instruction: String,
    base_url: String,
}

impl GenAiClient {
    pub fn new(api_key: String, system_instruction: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            api_key,
            system_instruction,
            base_url: API_BASE.to_string(),
        }
    }

    /// Point the client at a different endpoint, e.g. a regional proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );
        let response = self.client.post(&url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("API error: {}", response.status()));
        }
        Ok(response.json().await?)
    }

    /// Advisor chat. Attachments ride along as inline data; `grounding`
    /// enables the search tool. Failures fold into a fallback reply.
    pub async fn send_message(
        &self,
        message: &str,
        attachments: &[Attachment],
        grounding: bool,
    ) -> ChatReply {
        let mut parts = vec![RequestPart {
            text: Some(message.to_string()),
            inline_data: None,
        }];
        for att in attachments {
            parts.push(RequestPart {
                text: None,
                inline_data: Some(InlineData {
                    mime_type: att.mime_type.clone(),
                    data: strip_data_uri(&att.data).to_string(),
                }),
            });
        }

        let request = GenerateContentRequest {
            contents: vec![Content { parts }],
            system_instruction: Some(Content {
                parts: vec![RequestPart {
                    text: Some(self.system_instruction.clone()),
                    inline_data: None,
                }],
            }),
            generation_config: Some(serde_json::json!({ "temperature": 0.7 })),
            tools: grounding.then(|| vec![serde_json::json!({ "googleSearch": {} })]),
        };

        match self.generate_content("gemini-3-pro-preview", &request).await {
            Ok(response) => {
                let candidate = response.candidates.into_iter().next();
                let grounding_metadata =
                    candidate.as_ref().and_then(|c| c.grounding_metadata.clone());
                let text = candidate
                    .and_then(|c| c.content)
                    .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
                    .unwrap_or_else(|| CHAT_FALLBACK.to_string());
                ChatReply {
                    text,
                    grounding_metadata,
                }
            }
            Err(e) => {
                warn!("Chat request failed: {}", e);
                ChatReply {
                    text: CHAT_FALLBACK.to_string(),
                    grounding_metadata: None,
                }
            }
        }
    }

    /// Generate an image from a prompt; resolves to a PNG data URI.
    pub async fn generate_image(&self, prompt: &str, config: &ImageConfig) -> Result<String> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![RequestPart {
                    text: Some(prompt.to_string()),
                    inline_data: None,
                }],
            }],
            system_instruction: None,
            generation_config: Some(serde_json::json!({
                "imageConfig": {
                    "aspectRatio": config.aspect_ratio,
                    "imageSize": config.image_size
                }
            })),
            tools: None,
        };

        let response = self
            .generate_content("gemini-3-pro-image-preview", &request)
            .await?;
        first_image(&response)
            .map(|data| format!("data:image/png;base64,{}", data))
            .ok_or_else(|| anyhow!("no image generated"))
    }

    /// Edit an existing image. The model may answer with a revised image or
    /// with plain text.
    pub async fn edit_image(
        &self,
        image_base64: &str,
        mime_type: &str,
        prompt: &str,
    ) -> Result<ImageEditOutcome> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    RequestPart {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: mime_type.to_string(),
                            data: strip_data_uri(image_base64).to_string(),
                        }),
                    },
                    RequestPart {
                        text: Some(prompt.to_string()),
                        inline_data: None,
                    },
                ],
            }],
            system_instruction: None,
            generation_config: None,
            tools: None,
        };

        let response = self
            .generate_content("gemini-2.5-flash-image", &request)
            .await?;
        if let Some(data) = first_image(&response) {
            return Ok(ImageEditOutcome::Image(format!(
                "data:image/png;base64,{}",
                data
            )));
        }
        let text = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| anyhow!("empty edit response"))?;
        Ok(ImageEditOutcome::Text(text))
    }

    /// Kick off a video generation job and poll it to completion. Unlike the
    /// upstream behavior this loop is bounded: it stops at the deadline or
    /// when `cancel` fires. The resolved URI carries the access key appended.
    pub async fn generate_video(
        &self,
        prompt: &str,
        reference_image: Option<&str>,
        aspect_ratio: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let model = "veo-3.1-fast-generate-preview";
        let mut body = serde_json::json!({
            "prompt": prompt,
            "config": {
                "numberOfVideos": 1,
                "resolution": "720p",
                "aspectRatio": aspect_ratio
            }
        });
        if let Some(image) = reference_image {
            body["image"] = serde_json::json!({
                "imageBytes": strip_data_uri(image),
                "mimeType": "image/png"
            });
        }

        let url = format!(
            "{}/models/{}:generateVideos?key={}",
            self.base_url, model, self.api_key
        );
        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("video API error: {}", response.status()));
        }
        let operation: Operation = response.json().await?;
        info!("Video operation started: {}", operation.name);

        let operation = if operation.done {
            operation
        } else {
            let client = self.clone();
            let name = operation.name.clone();
            poll_bounded(
                move || {
                    let client = client.clone();
                    let name = name.clone();
                    async move {
                        let op = client.poll_operation(&name).await?;
                        Ok(op.done.then_some(op))
                    }
                },
                VIDEO_POLL_INTERVAL,
                VIDEO_POLL_DEADLINE,
                cancel,
            )
            .await?
        };

        let uri = operation
            .response
            .and_then(|r| r.generated_videos.into_iter().next())
            .and_then(|v| v.video)
            .and_then(|v| v.uri)
            .ok_or_else(|| anyhow!("operation finished without a video"))?;
        Ok(format!("{}&key={}", uri, self.api_key))
    }

    async fn poll_operation(&self, name: &str) -> Result<Operation> {
        let url = format!("{}/{}?key={}", self.base_url, name, self.api_key);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("operation poll error: {}", response.status()));
        }
        Ok(response.json().await?)
    }
}

/// Poll a long-running job until it reports a result, with a hard budget.
/// `poll` returns `Ok(None)` while the job is still running. The loop stops
/// at the deadline or when `cancel` fires; it never spins unbounded.
pub async fn poll_bounded<T, F, Fut>(
    mut poll: F,
    interval: Duration,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let cutoff = tokio::time::Instant::now() + deadline;
    loop {
        if tokio::time::Instant::now() >= cutoff {
            return Err(anyhow!("operation timed out after {:?}", deadline));
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(anyhow!("operation cancelled")),
            _ = tokio::time::sleep(interval) => {}
        }
        if let Some(result) = poll().await? {
            return Ok(result);
        }
    }
}

fn first_image(response: &GenerateContentResponse) -> Option<&str> {
    response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .and_then(|c| c.parts.iter().find_map(|p| p.inline_data.as_ref()))
        .map(|d| d.data.as_str())
}

/// Attachments arrive as either bare base64 or `data:` URIs.
fn strip_data_uri(data: &str) -> &str {
    match data.split_once(',') {
        Some((_, payload)) => payload,
        None => data,
    }
}
