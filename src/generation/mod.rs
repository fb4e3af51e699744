//! 생성 모듈 - Gemini generateContent 호출
//!
//! 프롬프트 하나를 보내고 첫 번째 후보의 텍스트를 돌려받습니다.
//! 실패 분류는 임베딩 클라이언트와 같은 `ApiError`를 사용합니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::embedding::transport::{self, RateLimiter, RATE_LIMIT_WINDOW};
use crate::embedding::{ApiError, RetryPolicy, GEMINI_API_BASE};

/// 생성 요청 파라미터
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

/// 생성 프로바이더 트레이트
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// 프롬프트로 텍스트 생성
    async fn generate(&self, prompt: &str, params: GenerationParams) -> Result<String, ApiError>;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// GeminiGeneration
// ============================================================================

/// Gemini 텍스트 생성 구현체
#[derive(Debug)]
pub struct GeminiGeneration {
    api_key: String,
    model: String,
    client: reqwest::Client,
    endpoint: String,
    rate_limiter: Mutex<RateLimiter>,
    retry: RetryPolicy,
}

impl GeminiGeneration {
    pub fn new(api_key: String, model: &str) -> Result<Self> {
        if model.trim().is_empty() {
            anyhow::bail!("missing generation model name");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            model: model.to_string(),
            client,
            endpoint: generate_endpoint(GEMINI_API_BASE, model),
            // 생성 호출은 질문당 1회이므로 최소 딜레이 없음
            rate_limiter: Mutex::new(RateLimiter::new(60, RATE_LIMIT_WINDOW, Duration::ZERO)),
            retry: RetryPolicy::default(),
        })
    }

    pub fn from_env(model: &str) -> Result<Self> {
        let api_key = crate::config::get_api_key()?;
        Self::new(api_key, model)
    }

    /// API 베이스 URL 변경 (프록시, 테스트 서버)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.endpoint = generate_endpoint(base_url, &self.model);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn generate_endpoint(base_url: &str, model: &str) -> String {
    format!(
        "{}/models/{}:generateContent",
        base_url.trim_end_matches('/'),
        model
    )
}

#[async_trait]
impl GenerationProvider for GeminiGeneration {
    async fn generate(&self, prompt: &str, params: GenerationParams) -> Result<String, ApiError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
            },
        };

        let body = transport::post_json(
            &self.client,
            &self.endpoint,
            &self.api_key,
            &request,
            &self.rate_limiter,
            self.retry,
        )
        .await?;

        let response: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::MalformedResponse(format!("generation payload: {}", e)))?;

        response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ApiError::MalformedResponse("no candidate text".to_string()))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    #[serde(default)]
    text: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
