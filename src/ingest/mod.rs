//! Ingest 모듈 - 수집 작업 오케스트레이션
//!
//! - Job: 단계/진행률 모델과 상태 조회소
//! - Queue: 요청 접수 및 워커 슬롯
//! - Worker: 크롤링 → 청킹 → 임베딩 → 벡터 저장

mod job;
mod queue;
mod worker;

use thiserror::Error;

use crate::crawler::CrawlError;
use crate::knowledge::VectorStoreError;

pub use job::{
    processing_progress, JobPhase, JobRegistry, JobStatus, JobTracker, PROCESSING_PROGRESS_END,
    PROCESSING_PROGRESS_START,
};
pub use queue::IngestQueue;
pub use worker::{
    collect_chunks, run_job, website_of, ChunkPlan, IngestConfig, IngestJob, IngestServices,
    PlannedChunk,
};

/// 수집 에러
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("URL rejected: {0}")]
    Rejected(String),

    #[error("tenant key must not be empty")]
    MissingTenant,

    #[error(transparent)]
    Crawl(#[from] CrawlError),

    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),

    #[error("site record update failed: {0}")]
    Sink(String),

    #[error("ingestion queue is closed")]
    QueueClosed,
}
