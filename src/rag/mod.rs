//! RAG Answer Engine - 질문 → 검색 → 근거 기반 답변
//!
//! 질문 임베딩 1회, 벡터 검색 1회, 생성 호출 1회를 순차로 수행합니다.
//! 요청 단위 지역 상태만 사용하므로 동시 호출에 안전합니다.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::embedding::{ApiError, EmbeddingProvider};
use crate::generation::{GenerationParams, GenerationProvider};
use crate::knowledge::{MetadataFilter, RetrievalHit, VectorStore, VectorStoreError};

/// top-K 허용 범위
pub const MIN_TOP_K: usize = 1;
pub const MAX_TOP_K: usize = 50;
pub const DEFAULT_TOP_K: usize = 5;

/// 답변 생성 파라미터
pub const ANSWER_PARAMS: GenerationParams = GenerationParams {
    max_tokens: 500,
    temperature: 0.5,
};

/// 컨텍스트가 부족할 때 모델이 사용할 고정 문구
pub const INSUFFICIENT_CONTEXT_PHRASE: &str =
    "I couldn't find that information in the indexed website content.";

/// 생성 응답 형식이 예상과 다를 때의 답변
pub const MALFORMED_ANSWER_FALLBACK: &str =
    "Sorry, I wasn't able to put together an answer right now. Please try asking again.";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

// ============================================================================
// Types
// ============================================================================

/// 질의 요청
#[derive(Debug, Clone)]
pub struct AskRequest {
    pub question: String,
    pub tenant_key: String,
    /// 사이트 필터 (호스트명 또는 URL)
    pub site: Option<String>,
    pub top_k: usize,
}

impl AskRequest {
    pub fn new(question: impl Into<String>, tenant_key: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            tenant_key: tenant_key.into(),
            site: None,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

/// 근거 기반 답변
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RagAnswer {
    pub answer: String,
    /// 중복 제거된 출처 URL (검색 순위 순)
    pub sources: Vec<String>,
    /// 중복 제거된 웹사이트 이름
    pub websites: Vec<String>,
    pub matches: usize,
}

/// 분류된 질의 에러
#[derive(Debug, Error)]
pub enum RagError {
    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("tenant key must not be empty")]
    MissingTenant,

    #[error("topK must be between 1 and 50, got {0}")]
    InvalidTopK(usize),

    #[error("failed to embed question: {0}")]
    Embedding(#[source] ApiError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] VectorStoreError),

    #[error("answer generation failed: {0}")]
    Generation(#[source] ApiError),
}

impl RagError {
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::EmptyQuestion | RagError::MissingTenant | RagError::InvalidTopK(_) => {
                "invalid_request"
            }
            RagError::Embedding(e) | RagError::Generation(e) => e.kind(),
            RagError::Retrieval(e) => e.kind(),
        }
    }
}

// ============================================================================
// AnswerEngine
// ============================================================================

/// RAG 답변 엔진
pub struct AnswerEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    generator: Arc<dyn GenerationProvider>,
}

impl AnswerEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Self {
        Self {
            embedder,
            store,
            generator,
        }
    }

    /// 질문에 답변
    pub async fn answer(&self, request: &AskRequest) -> Result<RagAnswer, RagError> {
        // 1. 입력 검증
        let question = request.question.trim();
        if question.is_empty() {
            return Err(RagError::EmptyQuestion);
        }
        if request.tenant_key.trim().is_empty() {
            return Err(RagError::MissingTenant);
        }
        if !(MIN_TOP_K..=MAX_TOP_K).contains(&request.top_k) {
            return Err(RagError::InvalidTopK(request.top_k));
        }

        // 2. 질문 임베딩
        let vector = self
            .embedder
            .embed_query(question)
            .await
            .map_err(RagError::Embedding)?;

        // 3. 필터 구성
        let site = request.site.as_deref().and_then(normalize_site_filter);
        let mut filter = MetadataFilter::tenant(request.tenant_key.trim());
        if let Some(site) = &site {
            filter = filter.with_website(site.clone());
        }

        // 4. 검색
        let hits = self.store.query(&vector, request.top_k, &filter).await?;
        tracing::debug!(
            "Retrieved {} matches for tenant {} (site: {:?})",
            hits.len(),
            filter.tenant_key,
            site
        );

        // 5. 결과 없음
        if hits.is_empty() {
            return Ok(RagAnswer {
                answer: no_information_answer(site.as_deref()),
                sources: Vec::new(),
                websites: Vec::new(),
                matches: 0,
            });
        }

        // 6. 컨텍스트 + 프롬프트
        let context = build_context(&hits);
        let prompt = build_prompt(question, &context);
        let sources = unique(hits.iter().map(|h| h.metadata.url.as_str()));
        let websites = unique(hits.iter().map(|h| h.metadata.website.as_str()));

        // 7. 생성
        let answer = match self.generator.generate(&prompt, ANSWER_PARAMS).await {
            Ok(text) => text,
            Err(ApiError::MalformedResponse(detail)) => {
                tracing::warn!("Unexpected generation response: {}", detail);
                MALFORMED_ANSWER_FALLBACK.to_string()
            }
            Err(e) => return Err(RagError::Generation(e)),
        };

        Ok(RagAnswer {
            answer,
            sources,
            websites,
            matches: hits.len(),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// 사이트 필터 정규화
///
/// URL이면 호스트명만 추출하고, 끝의 `/`를 제거합니다.
pub fn normalize_site_filter(site: &str) -> Option<String> {
    let site = site.trim();
    if site.is_empty() {
        return None;
    }

    let normalized = if site.contains("://") {
        match Url::parse(site) {
            Ok(url) => url.host_str().map(str::to_string).unwrap_or_default(),
            Err(_) => site.to_string(),
        }
    } else {
        site.to_string()
    };

    let normalized = normalized.trim_end_matches('/').to_ascii_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// 검색 결과를 컨텍스트 블록으로 결합
pub fn build_context(hits: &[RetrievalHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "[Source {}]\nWebsite: {}\nURL: {}\nContent: {}",
                i + 1,
                hit.metadata.website,
                hit.metadata.url,
                hit.metadata.text_preview
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// 답변 생성 프롬프트
pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        r#"You are a helpful assistant answering questions about a website using only the content provided below.

Rules:
- Answer strictly from the context. Do not use outside knowledge.
- For simple factual questions, answer concisely in one sentence.
- For complex questions, give a fuller answer of 2-4 sentences.
- If the context does not contain the answer, reply exactly: "{fallback}"
- Never reply with "I don't know".

Context:
{context}

Question: {question}

Answer:"#,
        fallback = INSUFFICIENT_CONTEXT_PHRASE,
        context = context,
        question = question
    )
}

fn no_information_answer(site: Option<&str>) -> String {
    match site {
        Some(site) => format!(
            "I don't have any information about {} yet. Try indexing the website first, then ask again.",
            site
        ),
        None => "I don't have any indexed information to answer that yet. Try indexing a website first, then ask again."
            .to_string(),
    }
}

fn unique<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if !value.is_empty() && !out.iter().any(|v| v == value) {
            out.push(value.to_string());
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::RecordMetadata;

    fn hit(url: &str, website: &str, preview: &str) -> RetrievalHit {
        RetrievalHit {
            chunk_id: format!("t::{}::0", url),
            score: 0.9,
            metadata: RecordMetadata {
                url: url.to_string(),
                website: website.to_string(),
                text_preview: preview.to_string(),
                tenant_key: "t".to_string(),
            },
        }
    }

    #[test]
    fn test_normalize_site_filter() {
        assert_eq!(
            normalize_site_filter("https://Docs.Example.com/guide/"),
            Some("docs.example.com".to_string())
        );
        assert_eq!(
            normalize_site_filter("example.com/"),
            Some("example.com".to_string())
        );
        assert_eq!(normalize_site_filter("   "), None);
    }

    #[test]
    fn test_context_and_prompt() {
        let hits = vec![
            hit("https://a.com/pricing", "a.com", "Plans start at $10."),
            hit("https://a.com/faq", "a.com", "We ship worldwide."),
        ];
        let context = build_context(&hits);
        assert!(context.starts_with("[Source 1]\nWebsite: a.com\nURL: https://a.com/pricing"));
        assert!(context.contains(CONTEXT_SEPARATOR));
        assert!(context.contains("We ship worldwide."));

        let prompt = build_prompt("How much?", &context);
        assert!(prompt.contains("Question: How much?"));
        assert!(prompt.contains(INSUFFICIENT_CONTEXT_PHRASE));
        assert!(prompt.contains("2-4 sentences"));
    }

    #[test]
    fn test_unique_preserves_rank_order() {
        let hits = vec![
            hit("https://a.com/x", "a.com", "1"),
            hit("https://b.com/y", "b.com", "2"),
            hit("https://a.com/x", "a.com", "3"),
        ];
        assert_eq!(
            unique(hits.iter().map(|h| h.metadata.url.as_str())),
            vec!["https://a.com/x", "https://b.com/y"]
        );
        assert_eq!(
            unique(hits.iter().map(|h| h.metadata.website.as_str())),
            vec!["a.com", "b.com"]
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(RagError::InvalidTopK(0).kind(), "invalid_request");
        assert_eq!(
            RagError::Generation(ApiError::RateLimited("slow down".into())).kind(),
            "rate_limited"
        );
    }
}
