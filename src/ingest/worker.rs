//! Ingest Worker - 크롤링 → 청크 계획 → 임베딩 → 배치 upsert
//!
//! 청크 단위 임베딩 실패는 기록 후 건너뛰고, 크롤링 실패/페이지 0개/
//! 벡터 저장소 실패만 작업 전체를 실패시킵니다. 실패한 작업의
//! 사이트 레코드는 삭제됩니다.

use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use super::job::JobTracker;
use super::IngestError;
use crate::crawler::{CrawlRequest, Crawler, Page};
use crate::embedding::EmbeddingProvider;
use crate::knowledge::{chunk_text, ChunkConfig, SiteSink, SiteSummary, VectorRecord, VectorStore};

// ============================================================================
// Types
// ============================================================================

/// 워커가 사용하는 외부 서비스
#[derive(Clone)]
pub struct IngestServices {
    pub crawler: Arc<Crawler>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub store: Arc<dyn VectorStore>,
    pub sites: Arc<dyn SiteSink>,
}

/// 수집 파라미터
#[derive(Debug, Clone, Copy)]
pub struct IngestConfig {
    pub chunk: ChunkConfig,
    /// 요청에 페이지 수가 없을 때의 예산
    pub default_max_pages: usize,
    /// 벡터 upsert 배치 크기
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            default_max_pages: crate::config::DEFAULT_MAX_PAGES,
            batch_size: crate::config::DEFAULT_UPSERT_BATCH,
        }
    }
}

/// 큐에 들어가는 작업
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub job_id: Uuid,
    pub website_url: String,
    pub tenant_key: String,
    pub max_pages: usize,
}

/// 임베딩 대상 청크
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChunk {
    pub page_url: String,
    /// 페이지 호스트명
    pub website: String,
    pub index: usize,
    pub text: String,
}

/// 전체 청크 계획 (임베딩 전에 총 개수를 확정)
#[derive(Debug, Clone, Default)]
pub struct ChunkPlan {
    pub pages: usize,
    pub chunks: Vec<PlannedChunk>,
}

impl ChunkPlan {
    pub fn total(&self) -> usize {
        self.chunks.len()
    }
}

/// 모든 페이지를 청킹하여 계획 생성
pub fn collect_chunks(pages: &[Page], config: ChunkConfig) -> ChunkPlan {
    let mut plan = ChunkPlan {
        pages: pages.len(),
        chunks: Vec::new(),
    };

    for page in pages {
        let website = website_of(&page.url);
        match chunk_text(&page.text, config) {
            Ok(chunks) => {
                plan.chunks.extend(chunks.into_iter().map(|chunk| PlannedChunk {
                    page_url: page.url.clone(),
                    website: website.clone(),
                    index: chunk.index,
                    text: chunk.text,
                }));
            }
            Err(e) => tracing::warn!("Skipping page {}: {}", page.url, e),
        }
    }

    plan
}

/// URL의 호스트명 (소문자)
pub fn website_of(page_url: &str) -> String {
    Url::parse(page_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default()
}

// ============================================================================
// Worker
// ============================================================================

/// 작업 하나를 종료 상태까지 실행
pub async fn run_job(
    services: &IngestServices,
    config: &IngestConfig,
    job: IngestJob,
    tracker: JobTracker,
) -> Result<SiteSummary, IngestError> {
    let job_id = job.job_id;
    tracing::info!(%job_id, "Starting ingestion of {}", job.website_url);
    tracker.mark_initializing();

    match execute(services, config, &job, &tracker).await {
        Ok(summary) => {
            tracker.mark_completed(&summary);
            tracing::info!(
                %job_id,
                "Ingestion completed: {} pages, {}/{} chunks ({}%)",
                summary.pages_crawled,
                summary.chunks_succeeded,
                summary.chunks_attempted,
                summary.success_rate
            );
            Ok(summary)
        }
        Err(e) => {
            tracing::error!(%job_id, "Ingestion failed: {}", e);
            if let Err(cleanup) = services.sites.delete(job_id).await {
                tracing::warn!(%job_id, "Failed to delete site record: {:#}", cleanup);
            }
            tracker.mark_failed(e.to_string());
            Err(e)
        }
    }
}

async fn execute(
    services: &IngestServices,
    config: &IngestConfig,
    job: &IngestJob,
    tracker: &JobTracker,
) -> Result<SiteSummary, IngestError> {
    services
        .sites
        .mark_crawling(job.job_id, &job.website_url, &job.tenant_key)
        .await
        .map_err(|e| IngestError::Sink(format!("{:#}", e)))?;

    // 1. 크롤링 (진행 이벤트를 채널로 전달)
    tracker.mark_crawling();
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let request = CrawlRequest::new(&job.website_url, job.max_pages).with_progress(progress_tx);

    let forward = async {
        while let Some(event) = progress_rx.recv().await {
            tracker.crawl_progress(&event);
        }
    };
    let (crawled, ()) = tokio::join!(services.crawler.crawl(request), forward);
    let outcome = crawled?;

    // 2. 청크 계획
    let plan = collect_chunks(&outcome.pages, config.chunk);
    let total = plan.total();
    tracker.mark_processing(outcome.pages.len(), total);
    tracing::info!(job_id = %job.job_id, "Planned {} chunks from {} pages", total, plan.pages);

    // 3. 순차 임베딩 + 배치 upsert
    let dimension = services.store.dimension();
    let batch_size = config.batch_size.max(1);
    let mut batch: Vec<VectorRecord> = Vec::with_capacity(batch_size.min(total.max(1)));
    let mut succeeded = 0usize;

    for (attempted, chunk) in plan.chunks.iter().enumerate() {
        match services.embedder.embed(&chunk.text).await {
            Ok(values) if values.len() == dimension => {
                batch.push(VectorRecord::for_chunk(
                    &job.tenant_key,
                    &chunk.page_url,
                    &chunk.website,
                    chunk.index,
                    &chunk.text,
                    values,
                ));
                succeeded += 1;
            }
            Ok(values) => {
                tracing::warn!(
                    job_id = %job.job_id,
                    "Dimension mismatch for {} chunk {}: expected {}, got {}",
                    chunk.page_url,
                    chunk.index,
                    dimension,
                    values.len()
                );
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.job_id,
                    "Embedding failed for {} chunk {} ({}): {}",
                    chunk.page_url,
                    chunk.index,
                    e.kind(),
                    e
                );
            }
        }

        if batch.len() >= batch_size {
            flush(services.store.as_ref(), &mut batch).await?;
        }
        tracker.chunk_progress(attempted + 1, succeeded);
    }

    flush(services.store.as_ref(), &mut batch).await?;

    // 4. 사이트 레코드 완료 처리
    let summary = SiteSummary::new(outcome.pages.len(), total, succeeded);
    services
        .sites
        .mark_completed(job.job_id, &summary)
        .await
        .map_err(|e| IngestError::Sink(format!("{:#}", e)))?;

    Ok(summary)
}

async fn flush(store: &dyn VectorStore, batch: &mut Vec<VectorRecord>) -> Result<(), IngestError> {
    if batch.is_empty() {
        return Ok(());
    }
    let written = store.upsert(batch.as_slice()).await?;
    tracing::debug!("Upserted {} vectors", written);
    batch.clear();
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
