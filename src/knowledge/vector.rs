//! Vector Store - 벡터 저장소 트레이트 및 레코드 타입
//!
//! 유사도 계산은 벡터 DB에 맡기고, 여기서는 upsert/query 계약과
//! 전송 전 검증만 정의합니다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 질의 top-K 허용 범위
pub const MAX_TOP_K: usize = 10_000;

/// 메타데이터에 저장하는 청크 미리보기 최대 길이 (문자 수)
pub const TEXT_PREVIEW_CHARS: usize = 1000;

// ============================================================================
// Types
// ============================================================================

/// 레코드 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    /// 페이지 URL
    pub url: String,
    /// 페이지 호스트명 (사이트 필터용)
    pub website: String,
    /// 청크 텍스트 미리보기
    pub text_preview: String,
    /// 소유 테넌트 키
    pub tenant_key: String,
}

/// 벡터 레코드 (저장용)
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    /// `tenantKey::urlencode(pageUrl)::chunkIndex`
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: RecordMetadata,
}

impl VectorRecord {
    /// 결정적 레코드 ID 생성
    ///
    /// 같은 테넌트 + URL + 청크 인덱스는 항상 같은 ID가 되어
    /// 재수집 시 중복 대신 덮어쓰기가 됩니다.
    pub fn record_id(tenant_key: &str, page_url: &str, chunk_index: usize) -> String {
        format!(
            "{}::{}::{}",
            tenant_key,
            urlencoding::encode(page_url),
            chunk_index
        )
    }

    /// 청크로부터 레코드 생성
    pub fn for_chunk(
        tenant_key: &str,
        page_url: &str,
        website: &str,
        chunk_index: usize,
        chunk_text: &str,
        values: Vec<f32>,
    ) -> Self {
        Self {
            id: Self::record_id(tenant_key, page_url, chunk_index),
            values,
            metadata: RecordMetadata {
                url: page_url.to_string(),
                website: website.to_string(),
                text_preview: chunk_text.chars().take(TEXT_PREVIEW_CHARS).collect(),
                tenant_key: tenant_key.to_string(),
            },
        }
    }
}

/// 메타데이터 필터 (`tenantKey` 필수, `website` 선택)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFilter {
    pub tenant_key: String,
    pub website: Option<String>,
}

impl MetadataFilter {
    pub fn tenant(tenant_key: impl Into<String>) -> Self {
        Self {
            tenant_key: tenant_key.into(),
            website: None,
        }
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    /// 메타데이터가 필터 조건을 만족하는지
    pub fn matches(&self, metadata: &RecordMetadata) -> bool {
        metadata.tenant_key == self.tenant_key
            && self
                .website
                .as_ref()
                .map_or(true, |w| &metadata.website == w)
    }
}

/// 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalHit {
    pub chunk_id: String,
    /// 유사도 스코어 (높을수록 유사)
    pub score: f32,
    pub metadata: RecordMetadata,
}

/// 분류된 벡터 저장소 에러
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VectorStoreError {
    #[error("vector store authentication failed: {0}")]
    Auth(String),

    #[error("vector index not found: {0}")]
    NotFound(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector store quota exceeded: {0}")]
    Quota(String),

    #[error("invalid vector store request: {0}")]
    InvalidInput(String),

    #[error("vector store error: {0}")]
    Other(String),
}

impl VectorStoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            VectorStoreError::Auth(_) => "auth",
            VectorStoreError::NotFound(_) => "not_found",
            VectorStoreError::DimensionMismatch { .. } => "dimension_mismatch",
            VectorStoreError::Quota(_) => "quota",
            VectorStoreError::InvalidInput(_) => "invalid_input",
            VectorStoreError::Other(_) => "other",
        }
    }
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 레코드 배치 upsert (같은 ID는 덮어쓰기)
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, VectorStoreError>;

    /// 필터가 적용된 top-K 최근접 검색
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievalHit>, VectorStoreError>;

    /// 저장소에 설정된 벡터 차원
    fn dimension(&self) -> usize;

    /// 저장된 레코드 수
    async fn count(&self) -> Result<usize, VectorStoreError>;
}

// ============================================================================
// Validation
// ============================================================================

/// upsert 전 레코드 검증 (빈 ID, 빈 벡터, 차원 불일치)
pub fn validate_records(records: &[VectorRecord], dimension: usize) -> Result<(), VectorStoreError> {
    for record in records {
        if record.id.trim().is_empty() {
            return Err(VectorStoreError::InvalidInput(
                "record id must not be empty".to_string(),
            ));
        }
        if record.values.is_empty() {
            return Err(VectorStoreError::InvalidInput(format!(
                "record {} has an empty vector",
                record.id
            )));
        }
        if record.values.len() != dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: dimension,
                actual: record.values.len(),
            });
        }
    }
    Ok(())
}

/// query 파라미터 검증
pub fn validate_query(vector: &[f32], top_k: usize, dimension: usize) -> Result<(), VectorStoreError> {
    if !(1..=MAX_TOP_K).contains(&top_k) {
        return Err(VectorStoreError::InvalidInput(format!(
            "topK must be between 1 and {}, got {}",
            MAX_TOP_K, top_k
        )));
    }
    if vector.len() != dimension {
        return Err(VectorStoreError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
