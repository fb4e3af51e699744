//! 통합 테스트 공용 더블 (임베더, 벡터 저장소, 사이트 싱크, 생성기, 정책)

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use siterag::crawler::{Crawler, CrawlerConfig, Fetcher};
use siterag::embedding::{ApiError, EmbeddingProvider};
use siterag::generation::{GenerationParams, GenerationProvider};
use siterag::knowledge::{
    validate_query, validate_records, MetadataFilter, RetrievalHit, SiteSink, SiteSummary,
    VectorRecord, VectorStore, VectorStoreError,
};
use siterag::policy::{PolicyVerdict, UrlPolicy};

pub const DIM: usize = 4;

// ============================================================================
// Site fixtures
// ============================================================================

/// 링크가 포함된 테스트 페이지
pub fn page_html(title: &str, body: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<a href="{}">Read more</a>"#, href))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "<html><head><title>{}</title></head><body><main><p>{}</p>{}</main></body></html>",
        title, body, anchors
    )
}

/// 딜레이 없는 HTTP 크롤러
pub fn test_crawler() -> Arc<Crawler> {
    crawler_with_delay(Duration::ZERO)
}

/// 페이지 간 딜레이를 지정한 HTTP 크롤러
pub fn crawler_with_delay(delay: Duration) -> Arc<Crawler> {
    let fetcher = Arc::new(Fetcher::http(Duration::from_secs(5)).unwrap());
    let config = CrawlerConfig {
        delay,
        ..CrawlerConfig::default()
    };
    Arc::new(Crawler::new(fetcher, config).unwrap())
}

// ============================================================================
// Embedder
// ============================================================================

/// 텍스트 내용으로 결정적 벡터를 만드는 임베더
///
/// `fail_marker`를 포함한 텍스트는 rate limit 에러,
/// `wrong_dim_marker`를 포함한 텍스트는 차원이 다른 벡터를 반환합니다.
pub struct ScriptedEmbedder {
    pub dimension: usize,
    pub fail_marker: Option<String>,
    pub wrong_dim_marker: Option<String>,
    pub calls: AtomicUsize,
}

impl ScriptedEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: DIM,
            fail_marker: None,
            wrong_dim_marker: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    pub fn wrong_dimension_on(mut self, marker: &str) -> Self {
        self.wrong_dim_marker = Some(marker.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn vector_for(text: &str, dimension: usize) -> Vec<f32> {
    let mut values = vec![0.0f32; dimension];
    for (i, byte) in text.bytes().enumerate() {
        values[i % dimension] += byte as f32 / 255.0;
    }
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-6);
    values.iter().map(|v| v / norm).collect()
}

#[async_trait]
impl EmbeddingProvider for ScriptedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(ApiError::RateLimited("quota exhausted".to_string()));
            }
        }
        if let Some(marker) = &self.wrong_dim_marker {
            if text.contains(marker.as_str()) {
                return Ok(vec![0.5; self.dimension + 1]);
            }
        }
        Ok(vector_for(text, self.dimension))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Vector store
// ============================================================================

/// 인메모리 벡터 저장소 (id 기준 덮어쓰기, 내적 유사도)
pub struct MemoryVectorStore {
    pub dimension: usize,
    pub records: Mutex<HashMap<String, VectorRecord>>,
    pub upsert_batches: Mutex<Vec<usize>>,
    pub fail_upserts: bool,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self {
            dimension: DIM,
            records: Mutex::new(HashMap::new()),
            upsert_batches: Mutex::new(Vec::new()),
            fail_upserts: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_upserts: true,
            ..Self::new()
        }
    }

    pub fn insert(&self, record: VectorRecord) {
        self.records.lock().unwrap().insert(record.id.clone(), record);
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn batches(&self) -> Vec<usize> {
        self.upsert_batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, VectorStoreError> {
        if self.fail_upserts {
            return Err(VectorStoreError::Quota("write units exhausted".to_string()));
        }
        validate_records(records, self.dimension)?;
        self.upsert_batches.lock().unwrap().push(records.len());
        let mut stored = self.records.lock().unwrap();
        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }
        Ok(records.len())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievalHit>, VectorStoreError> {
        validate_query(vector, top_k, self.dimension)?;
        let stored = self.records.lock().unwrap();
        let mut hits: Vec<RetrievalHit> = stored
            .values()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| RetrievalHit {
                chunk_id: r.id.clone(),
                score: r.values.iter().zip(vector).map(|(a, b)| a * b).sum(),
                metadata: r.metadata.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        Ok(self.records.lock().unwrap().len())
    }
}

// ============================================================================
// Site sink
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SiteEntry {
    pub url: String,
    pub tenant_key: String,
    pub status: &'static str,
    pub summary: Option<SiteSummary>,
}

/// 호출 기록을 남기는 사이트 싱크
#[derive(Default)]
pub struct RecordingSites {
    pub entries: Mutex<HashMap<Uuid, SiteEntry>>,
    pub events: Mutex<Vec<String>>,
}

impl RecordingSites {
    pub fn entry(&self, job_id: Uuid) -> Option<SiteEntry> {
        self.entries.lock().unwrap().get(&job_id).cloned()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl SiteSink for RecordingSites {
    async fn mark_crawling(&self, job_id: Uuid, url: &str, tenant_key: &str) -> anyhow::Result<()> {
        self.events.lock().unwrap().push("crawling".to_string());
        self.entries.lock().unwrap().insert(
            job_id,
            SiteEntry {
                url: url.to_string(),
                tenant_key: tenant_key.to_string(),
                status: "crawling",
                summary: None,
            },
        );
        Ok(())
    }

    async fn mark_completed(&self, job_id: Uuid, summary: &SiteSummary) -> anyhow::Result<()> {
        self.events.lock().unwrap().push("completed".to_string());
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&job_id)
            .ok_or_else(|| anyhow::anyhow!("unknown job {}", job_id))?;
        entry.status = "completed";
        entry.summary = Some(*summary);
        Ok(())
    }

    async fn delete(&self, job_id: Uuid) -> anyhow::Result<()> {
        self.events.lock().unwrap().push("delete".to_string());
        self.entries.lock().unwrap().remove(&job_id);
        Ok(())
    }
}

// ============================================================================
// Generator
// ============================================================================

/// 고정 응답 생성기 (프롬프트 기록)
pub struct ScriptedGenerator {
    pub reply: Result<String, ApiError>,
    pub prompts: Mutex<Vec<String>>,
    pub params: Mutex<Vec<GenerationParams>>,
}

impl ScriptedGenerator {
    pub fn replying(text: &str) -> Self {
        Self::with_result(Ok(text.to_string()))
    }

    pub fn with_result(reply: Result<String, ApiError>) -> Self {
        Self {
            reply,
            prompts: Mutex::new(Vec::new()),
            params: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerator {
    async fn generate(&self, prompt: &str, params: GenerationParams) -> Result<String, ApiError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.params.lock().unwrap().push(params);
        self.reply.clone()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Policy
// ============================================================================

/// 모든 URL 허용 (로컬 테스트 서버용)
pub struct AllowAllPolicy;

#[async_trait]
impl UrlPolicy for AllowAllPolicy {
    async fn validate(&self, _url: &str) -> PolicyVerdict {
        PolicyVerdict::allow()
    }
}
