use crate::core::error::GenerateError;
use crate::services::generator::ImageGenerator;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Ratios the image model accepts as an `imageConfig.aspectRatio` hint.
const SUPPORTED_ASPECT_RATIOS: &[&str] = &[
    "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "9:16", "16:9", "21:9",
];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_model() -> String {
    "gemini-2.5-flash-image".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_timeout() -> u64 {
    120
}

pub struct GeminiImageClient {
    api_key: String,
    endpoint: Url,
    client: reqwest::Client,
}

impl GeminiImageClient {
    pub fn new(config: &GeminiConfig, api_key: &str) -> Result<Self> {
        let endpoint = Url::parse(&format!(
            "{}/models/{}:generateContent",
            config.base_url.trim_end_matches('/'),
            config.model
        ))
        .context("Invalid Gemini base_url")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            api_key: api_key.to_string(),
            endpoint,
            client,
        })
    }
}

// --- Wire types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationSettings,
}

#[derive(Serialize)]
struct RequestContent {
    role: String,
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationSettings {
    response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageSettings>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageSettings {
    aspect_ratio: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    retry_delay: Option<String>,
}

fn build_request(prompt: &str, aspect_ratio: &str) -> GenerateRequest {
    let image_config = SUPPORTED_ASPECT_RATIOS
        .contains(&aspect_ratio)
        .then(|| ImageSettings {
            aspect_ratio: aspect_ratio.to_string(),
        });
    GenerateRequest {
        contents: vec![RequestContent {
            role: "user".to_string(),
            parts: vec![RequestPart {
                text: prompt.to_string(),
            }],
        }],
        generation_config: GenerationSettings {
            response_modalities: vec!["IMAGE".to_string()],
            image_config,
        },
    }
}

/// Parses a protobuf JSON duration such as `"37s"` or `"1.5s"`.
fn parse_retry_delay(s: &str) -> Option<Duration> {
    let secs: f64 = s.trim().strip_suffix('s')?.parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

fn classify_error(status: StatusCode, retry_after_header: Option<&str>, body: &str) -> GenerateError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let header_hint = retry_after_header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body_hint = envelope.as_ref().and_then(|e| {
        e.error
            .details
            .iter()
            .find_map(|d| d.retry_delay.as_deref().and_then(parse_retry_delay))
    });

    let exhausted = envelope
        .as_ref()
        .is_some_and(|e| e.error.status == "RESOURCE_EXHAUSTED");
    if status == StatusCode::TOO_MANY_REQUESTS || exhausted {
        return GenerateError::RateLimited {
            retry_after: header_hint.or(body_hint),
        };
    }

    match envelope {
        Some(e) => GenerateError::Other(format!(
            "Gemini API error ({} {}): {}",
            if e.error.code == 0 { status.as_u16() } else { e.error.code },
            e.error.status,
            e.error.message
        )),
        None => GenerateError::Other(format!("Gemini API error ({}): {}", status.as_u16(), body)),
    }
}

fn extract_image(body: &str) -> Result<Vec<u8>, GenerateError> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| GenerateError::Other(format!("Failed to parse Gemini response: {}", e)))?;

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GenerateError::NoImage(format!("prompt blocked: {}", reason)));
    }

    let first = response
        .candidates
        .first()
        .ok_or_else(|| GenerateError::NoImage("No response from API".to_string()))?;

    let inline = first
        .content
        .iter()
        .flat_map(|c| c.parts.iter())
        .find_map(|p| p.inline_data.as_ref());

    match inline {
        Some(data) => {
            debug!(
                "Received inline image ({})",
                data.mime_type.as_deref().unwrap_or("unknown type")
            );
            general_purpose::STANDARD
                .decode(data.data.trim())
                .map_err(|e| GenerateError::Other(format!("Invalid base64 image data: {}", e)))
        }
        None => Err(GenerateError::NoImage(format!(
            "No image data in response (finish reason: {})",
            first.finish_reason.as_deref().unwrap_or("UNKNOWN")
        ))),
    }
}

#[async_trait]
impl ImageGenerator for GeminiImageClient {
    async fn generate(&self, prompt: &str, aspect_ratio: &str) -> Result<Vec<u8>, GenerateError> {
        let request_body = build_request(prompt, aspect_ratio);
        debug!("POST {} ({} prompt chars)", self.endpoint, prompt.len());

        let resp = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| GenerateError::Other(format!("Request failed: {}", e)))?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .text()
            .await
            .map_err(|e| GenerateError::Other(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(classify_error(status, retry_after.as_deref(), &body));
        }
        extract_image(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let json = serde_json::to_value(build_request("a cat", "16:9")).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "a cat");
        assert_eq!(json["generationConfig"]["responseModalities"][0], "IMAGE");
        assert_eq!(json["generationConfig"]["imageConfig"]["aspectRatio"], "16:9");

        let odd = serde_json::to_value(build_request("a cat", "7:5")).unwrap();
        assert!(odd["generationConfig"].get("imageConfig").is_none());
    }

    #[test]
    fn test_extract_inline_image() {
        let json = r#"{
            "candidates": [{
                "content": { "parts": [
                    { "text": "Here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": "aGVsbG8=" } }
                ] },
                "finishReason": "STOP"
            }]
        }"#;
        assert_eq!(extract_image(json).unwrap(), b"hello".to_vec());
    }

    #[test]
    fn test_extract_no_candidates_is_no_image() {
        assert!(matches!(
            extract_image(r#"{"candidates": []}"#),
            Err(GenerateError::NoImage(_))
        ));
        assert!(matches!(
            extract_image(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#),
            Err(GenerateError::NoImage(reason)) if reason.contains("SAFETY")
        ));
    }

    #[test]
    fn test_extract_text_only_reports_finish_reason() {
        let json = r#"{"candidates": [{"content": {"parts": [{"text": "no"}]}, "finishReason": "IMAGE_SAFETY"}]}"#;
        match extract_image(json) {
            Err(GenerateError::NoImage(reason)) => assert!(reason.contains("IMAGE_SAFETY")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_classify_rate_limit_with_retry_info() {
        let body = r#"{"error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED",
            "details": [{"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "37s"}]}}"#;
        assert_eq!(
            classify_error(StatusCode::TOO_MANY_REQUESTS, None, body),
            GenerateError::RateLimited {
                retry_after: Some(Duration::from_secs(37))
            }
        );
        // Header wins over body.
        assert_eq!(
            classify_error(StatusCode::TOO_MANY_REQUESTS, Some("5"), body),
            GenerateError::RateLimited {
                retry_after: Some(Duration::from_secs(5))
            }
        );
        assert_eq!(
            classify_error(StatusCode::TOO_MANY_REQUESTS, None, "busy"),
            GenerateError::RateLimited { retry_after: None }
        );
    }

    #[test]
    fn test_classify_other_errors() {
        let body = r#"{"error": {"code": 500, "message": "Internal", "status": "INTERNAL"}}"#;
        match classify_error(StatusCode::INTERNAL_SERVER_ERROR, None, body) {
            GenerateError::Other(msg) => assert!(msg.contains("Internal") && msg.contains("500")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_retry_delay() {
        assert_eq!(parse_retry_delay("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_delay("abc"), None);
        assert_eq!(parse_retry_delay("12"), None);
        assert_eq!(parse_retry_delay("-3s"), None);
        assert_eq!(parse_retry_delay("1e30s"), None);
    }

    #[test]
    fn test_classify_oversized_retry_hints() {
        let body = r#"{"error": {"code": 429, "status": "RESOURCE_EXHAUSTED",
            "details": [{"retryDelay": "1e30s"}]}}"#;
        assert_eq!(
            classify_error(StatusCode::TOO_MANY_REQUESTS, None, body),
            GenerateError::RateLimited { retry_after: None }
        );
        assert_eq!(
            classify_error(StatusCode::TOO_MANY_REQUESTS, Some("18446744073709551615"), "{}"),
            GenerateError::RateLimited {
                retry_after: Some(Duration::from_secs(u64::MAX))
            }
        );
    }
}
