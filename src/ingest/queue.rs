//! Ingest Queue - 수집 요청 접수 (Producer) 및 워커 슬롯
//!
//! `submit`은 정책 검사 후 작업 ID를 즉시 반환하고, 실제 작업은
//! 별도 워커 태스크에서 실행됩니다. 워커들은 하나의 수신자를 공유하며
//! 작업 간에 공유하는 가변 상태는 없습니다.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::job::{JobRegistry, JobStatus, JobTracker};
use super::worker::{run_job, IngestConfig, IngestJob, IngestServices};
use super::IngestError;
use crate::crawler::clamp_pages;
use crate::policy::UrlPolicy;

/// 대기열 용량
const QUEUE_CAPACITY: usize = 64;

struct QueuedJob {
    job: IngestJob,
    tracker: JobTracker,
}

/// 수집 큐
pub struct IngestQueue {
    sender: mpsc::Sender<QueuedJob>,
    registry: JobRegistry,
    policy: Arc<dyn UrlPolicy>,
    services: IngestServices,
    config: IngestConfig,
    workers: Vec<JoinHandle<()>>,
}

impl IngestQueue {
    /// 워커 슬롯을 띄우고 큐 시작 (tokio 런타임 내에서 호출)
    pub fn start(
        services: IngestServices,
        config: IngestConfig,
        policy: Arc<dyn UrlPolicy>,
        worker_count: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel::<QueuedJob>(QUEUE_CAPACITY);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..worker_count.max(1))
            .map(|slot| {
                let receiver = Arc::clone(&receiver);
                let services = services.clone();
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(QueuedJob { job, tracker }) = next else {
                            break;
                        };
                        tracing::debug!(slot, job_id = %job.job_id, "Worker picked up job");
                        // 결과는 tracker를 통해 게시됨
                        let _ = run_job(&services, &config, job, tracker).await;
                    }
                    tracing::debug!(slot, "Worker stopped");
                })
            })
            .collect();

        Self {
            sender,
            registry: JobRegistry::new(),
            policy,
            services,
            config,
            workers,
        }
    }

    /// 수집 요청 접수 → 작업 ID
    pub async fn submit(
        &self,
        website_url: &str,
        tenant_key: &str,
        max_pages: Option<usize>,
    ) -> Result<Uuid, IngestError> {
        let website_url = website_url.trim();
        let tenant_key = tenant_key.trim();
        if tenant_key.is_empty() {
            return Err(IngestError::MissingTenant);
        }

        let verdict = self.policy.validate(website_url).await;
        if !verdict.valid {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "URL is not allowed".to_string());
            tracing::warn!("Rejected ingestion of {}: {}", website_url, reason);
            return Err(IngestError::Rejected(reason));
        }

        // 자리를 먼저 확보한 뒤 등록 (닫힌 큐에는 레지스트리 항목을 남기지 않음)
        let permit = self
            .sender
            .reserve()
            .await
            .map_err(|_| IngestError::QueueClosed)?;

        let tracker = self.registry.register(website_url, tenant_key);
        let job = IngestJob {
            job_id: tracker.job_id(),
            website_url: website_url.to_string(),
            tenant_key: tenant_key.to_string(),
            max_pages: clamp_pages(max_pages.unwrap_or(self.config.default_max_pages)),
        };
        let job_id = job.job_id;

        permit.send(QueuedJob { job, tracker });

        tracing::info!(%job_id, "Queued ingestion of {} for tenant {}", website_url, tenant_key);
        Ok(job_id)
    }

    pub fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.registry.status(job_id)
    }

    pub fn subscribe(&self, job_id: Uuid) -> Option<watch::Receiver<JobStatus>> {
        self.registry.subscribe(job_id)
    }

    pub fn clear(&self, job_id: Uuid) -> bool {
        self.registry.clear(job_id)
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// 종료 상태까지 대기
    pub async fn wait(&self, job_id: Uuid) -> Option<JobStatus> {
        let mut rx = self.subscribe(job_id)?;
        let result = rx.wait_for(|s| s.phase.is_terminal()).await;
        match result {
            Ok(status) => Some(status.clone()),
            Err(_) => self.status(job_id),
        }
    }

    /// 새 작업 접수를 멈추고, 대기 중인 작업을 모두 처리한 뒤 종료
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::warn!("Worker task ended abnormally: {}", e);
            }
        }
        self.services.crawler.fetcher().stop().await;
    }
}

// ============================================================================
// Tests
// ============================================================================
