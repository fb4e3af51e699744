//! 임베딩 모듈 - Gemini API를 통한 텍스트 벡터화
//!
//! 청크 하나당 한 번의 독립적인 호출을 수행합니다. 실패는 `ApiError`로
//! 분류되어 반환되며 호출자가 해당 청크만 건너뛸 수 있습니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = GeminiEmbedding::from_env()?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

mod error;
pub(crate) mod transport;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub use error::{classify_status, classify_transport, ApiError};
pub use transport::RetryPolicy;

use transport::{RateLimiter, MIN_DELAY_MS, RATE_LIMIT_RPM, RATE_LIMIT_WINDOW};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 문서 청크 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError>;

    /// 검색 질의 임베딩 (기본 구현: 문서 임베딩과 동일)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        self.embed(text).await
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// Gemini API 베이스 URL
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// 임베딩 모델 (MRL 지원)
/// source: https://ai.google.dev/gemini-api/docs/embeddings
const EMBEDDING_MODEL: &str = "gemini-embedding-001";

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

/// Gemini 임베딩 태스크 타입
#[derive(Debug, Clone, Copy)]
enum TaskType {
    Document,
    Query,
}

impl TaskType {
    fn as_str(self) -> &'static str {
        match self {
            TaskType::Document => "RETRIEVAL_DOCUMENT",
            TaskType::Query => "RETRIEVAL_QUERY",
        }
    }
}

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
    endpoint: String,
    rate_limiter: Mutex<RateLimiter>,
    retry: RetryPolicy,
}

impl GeminiEmbedding {
    /// 새 Gemini 임베딩 인스턴스 생성 (기본 차원)
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_dimension(api_key, DEFAULT_DIMENSION)
    }

    /// 차원을 지정하여 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `dimension` - 임베딩 차원 (768, 1536, 3072 중 선택)
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self> {
        if ![768, 1536, 3072].contains(&dimension) {
            anyhow::bail!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                dimension
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            dimension,
            endpoint: embed_endpoint(GEMINI_API_BASE),
            rate_limiter: Mutex::new(RateLimiter::new(
                RATE_LIMIT_RPM,
                RATE_LIMIT_WINDOW,
                Duration::from_millis(MIN_DELAY_MS),
            )),
            retry: RetryPolicy::default(),
        })
    }

    /// 환경변수에서 API 키를 읽어 차원 지정하여 생성
    pub fn from_env_with_dimension(dimension: usize) -> Result<Self> {
        let api_key = crate::config::get_api_key()?;
        Self::with_dimension(api_key, dimension)
    }

    /// API 베이스 URL 변경 (프록시, 테스트 서버)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.endpoint = embed_endpoint(base_url);
        self
    }

    /// Rate limit 변경
    pub fn with_rate_limit(mut self, max_requests: u32, min_delay: Duration) -> Self {
        self.rate_limiter = Mutex::new(RateLimiter::new(
            max_requests,
            RATE_LIMIT_WINDOW,
            min_delay,
        ));
        self
    }

    /// 재시도 정책 변경
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn request(&self, text: &str, task_type: TaskType) -> Result<Vec<f32>, ApiError> {
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest("cannot embed empty text".to_string()));
        }

        let request = EmbedRequest {
            model: format!("models/{}", EMBEDDING_MODEL),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: task_type.as_str(),
            output_dimensionality: Some(self.dimension),
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

        let response: EmbedResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::MalformedResponse(format!("embedding payload: {}", e)))?;
        let values = response.embedding.values;

        if values.len() != self.dimension {
            return Err(ApiError::MalformedResponse(format!(
                "expected {} dimensions, got {}",
                self.dimension,
                values.len()
            )));
        }

        Ok(values)
    }
}

fn embed_endpoint(base_url: &str) -> String {
    format!(
        "{}/models/{}:embedContent",
        base_url.trim_end_matches('/'),
        EMBEDDING_MODEL
    )
}

/// Gemini API 요청 본문
/// source: https://ai.google.dev/gemini-api/docs/embeddings
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: &'static str,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        self.request(text, TaskType::Document).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        self.request(text, TaskType::Query).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        EMBEDDING_MODEL
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 차원을 지정하여 임베딩 프로바이더 생성
pub fn create_embedder(dimension: usize) -> Result<GeminiEmbedding> {
    if !crate::config::has_api_key() {
        anyhow::bail!(
            "GEMINI_API_KEY or GOOGLE_AI_API_KEY not set.\n\
             Set: export GEMINI_API_KEY=your-api-key\n\
             Get your API key at: https://aistudio.google.com/app/apikey"
        );
    }

    let embedder = GeminiEmbedding::from_env_with_dimension(dimension)?;
    tracing::info!(
        "Using Gemini API embedding (dimension: {})",
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================
