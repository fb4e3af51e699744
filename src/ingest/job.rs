//! 수집 작업 상태 - 단계, 진행률, 카운터
//!
//! queued → initializing(0–5) → crawling(5–40) → processing(40–95) → completed(100)
//! 어느 단계에서든 failed로 전이할 수 있습니다.
//!
//! 상태는 작업 당 하나의 watch 채널로 게시되며, 진행률은 절대 감소하지 않습니다.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::crawler::{CrawlProgress, CRAWL_PROGRESS_END, CRAWL_PROGRESS_START};
use crate::knowledge::SiteSummary;

/// 처리 단계 진행률 구간
pub const PROCESSING_PROGRESS_START: u8 = CRAWL_PROGRESS_END;
pub const PROCESSING_PROGRESS_END: u8 = 95;

// ============================================================================
// Phase / Status
// ============================================================================

/// 작업 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Queued,
    Initializing,
    Crawling,
    Processing,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Queued => "queued",
            JobPhase::Initializing => "initializing",
            JobPhase::Crawling => "crawling",
            JobPhase::Processing => "processing",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 폴링용 작업 상태
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: Uuid,
    pub website_url: String,
    pub tenant_key: String,
    pub phase: JobPhase,
    pub progress_percent: u8,
    pub pages_crawled: usize,
    /// 임베딩에 성공한 청크 수
    pub chunks_processed: usize,
    /// 임베딩을 시도한 청크 수
    pub chunks_attempted: usize,
    /// 계획된 전체 청크 수
    pub chunks_total: usize,
    pub message: Option<String>,
    pub error: Option<String>,
    pub summary: Option<SiteSummary>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    fn queued(job_id: Uuid, website_url: &str, tenant_key: &str) -> Self {
        Self {
            job_id,
            website_url: website_url.to_string(),
            tenant_key: tenant_key.to_string(),
            phase: JobPhase::Queued,
            progress_percent: 0,
            pages_crawled: 0,
            chunks_processed: 0,
            chunks_attempted: 0,
            chunks_total: 0,
            message: Some("Waiting for a worker".to_string()),
            error: None,
            summary: None,
            updated_at: Utc::now(),
        }
    }
}

/// 처리 단계 진행률: 40 + floor(55 × processed / total)
pub fn processing_progress(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return PROCESSING_PROGRESS_END;
    }
    let span = (PROCESSING_PROGRESS_END - PROCESSING_PROGRESS_START) as usize;
    PROCESSING_PROGRESS_START + (span * processed.min(total) / total) as u8
}

// ============================================================================
// JobTracker
// ============================================================================

/// 작업 상태 게시자 (워커 전용)
///
/// 종료 상태 이후의 갱신과 진행률 감소는 무시됩니다.
#[derive(Debug)]
pub struct JobTracker {
    job_id: Uuid,
    sender: watch::Sender<JobStatus>,
}

impl JobTracker {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn snapshot(&self) -> JobStatus {
        self.sender.borrow().clone()
    }

    fn update(&self, phase: JobPhase, percent: u8, apply: impl FnOnce(&mut JobStatus)) {
        self.sender.send_if_modified(|status| {
            if status.phase.is_terminal() {
                return false;
            }
            status.phase = phase;
            status.progress_percent = status.progress_percent.max(percent);
            apply(status);
            status.updated_at = Utc::now();
            true
        });
    }

    pub fn mark_initializing(&self) {
        self.update(JobPhase::Initializing, 0, |s| {
            s.message = Some("Preparing crawl".to_string());
        });
    }

    pub fn mark_crawling(&self) {
        self.update(JobPhase::Crawling, CRAWL_PROGRESS_START, |s| {
            s.message = Some("Crawling website".to_string());
        });
    }

    pub fn crawl_progress(&self, event: &CrawlProgress) {
        self.update(JobPhase::Crawling, event.percent, |s| {
            s.pages_crawled = s.pages_crawled.max(event.pages_collected);
            s.message = Some(event.message.clone());
        });
    }

    pub fn mark_processing(&self, pages_crawled: usize, chunks_total: usize) {
        self.update(JobPhase::Processing, PROCESSING_PROGRESS_START, |s| {
            s.pages_crawled = pages_crawled;
            s.chunks_total = chunks_total;
            s.message = Some(format!(
                "Embedding {} chunks from {} pages",
                chunks_total, pages_crawled
            ));
        });
    }

    pub fn chunk_progress(&self, attempted: usize, succeeded: usize) {
        self.update(JobPhase::Processing, 0, |s| {
            s.chunks_attempted = attempted;
            s.chunks_processed = succeeded;
            s.progress_percent = s
                .progress_percent
                .max(processing_progress(attempted, s.chunks_total));
            s.message = Some(format!("Processed {}/{} chunks", attempted, s.chunks_total));
        });
    }

    pub fn mark_completed(&self, summary: &SiteSummary) {
        self.update(JobPhase::Completed, 100, |s| {
            s.pages_crawled = summary.pages_crawled;
            s.chunks_attempted = summary.chunks_attempted;
            s.chunks_processed = summary.chunks_succeeded;
            s.summary = Some(*summary);
            s.message = Some(format!(
                "Indexed {} chunks ({}% success)",
                summary.chunks_succeeded, summary.success_rate
            ));
        });
    }

    pub fn mark_failed(&self, error: impl Into<String>) {
        let error = error.into();
        self.update(JobPhase::Failed, 0, |s| {
            s.message = None;
            s.error = Some(error);
        });
    }
}

// ============================================================================
// JobRegistry
// ============================================================================

/// 작업 상태 조회소 (작업 ID → watch 수신자)
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, watch::Receiver<JobStatus>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, watch::Receiver<JobStatus>>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, watch::Receiver<JobStatus>>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// queued 상태로 새 작업 등록
    pub fn register(&self, website_url: &str, tenant_key: &str) -> JobTracker {
        let job_id = Uuid::new_v4();
        let (sender, receiver) = watch::channel(JobStatus::queued(job_id, website_url, tenant_key));
        self.write().insert(job_id, receiver);
        JobTracker { job_id, sender }
    }

    pub fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.read().get(&job_id).map(|rx| rx.borrow().clone())
    }

    /// 상태 변경 스트림
    pub fn subscribe(&self, job_id: Uuid) -> Option<watch::Receiver<JobStatus>> {
        self.read().get(&job_id).cloned()
    }

    /// 종료된 작업 제거 (진행 중이면 false)
    pub fn clear(&self, job_id: Uuid) -> bool {
        let mut jobs = self.write();
        let terminal = jobs
            .get(&job_id)
            .is_some_and(|rx| rx.borrow().phase.is_terminal());
        if terminal {
            jobs.remove(&job_id);
        }
        terminal
    }

    /// 전체 작업 상태 (갱신 시각 순)
    pub fn list(&self) -> Vec<JobStatus> {
        let mut statuses: Vec<JobStatus> =
            self.read().values().map(|rx| rx.borrow().clone()).collect();
        statuses.sort_by_key(|s| s.updated_at);
        statuses
    }
}

// ============================================================================
// Tests
// ============================================================================
