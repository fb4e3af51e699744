//! Site Registry - rusqlite 기반 사이트 레코드 저장소
//!
//! 수집 작업의 최종 상태와 카운터를 job ID 기준으로 기록합니다.
//! 실패한 작업의 레코드는 남기지 않고 삭제합니다.
//! 저장 위치: ~/.siterag/sites.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Types
// ============================================================================

/// 사이트 레코드 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Crawling,
    Completed,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Crawling => "crawling",
            SiteStatus::Completed => "completed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => SiteStatus::Completed,
            _ => SiteStatus::Crawling,
        }
    }
}

/// 완료 시 기록하는 수집 결과
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiteSummary {
    pub pages_crawled: usize,
    pub chunks_attempted: usize,
    pub chunks_succeeded: usize,
    /// 성공률 (%, 소수점 첫째 자리)
    pub success_rate: f64,
}

impl SiteSummary {
    pub fn new(pages_crawled: usize, chunks_attempted: usize, chunks_succeeded: usize) -> Self {
        let success_rate = if chunks_attempted == 0 {
            0.0
        } else {
            let rate = chunks_succeeded as f64 / chunks_attempted as f64 * 100.0;
            (rate * 10.0).round() / 10.0
        };
        Self {
            pages_crawled,
            chunks_attempted,
            chunks_succeeded,
            success_rate,
        }
    }
}

/// 저장된 사이트 레코드
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteRecord {
    pub job_id: Uuid,
    pub url: String,
    pub tenant_key: String,
    pub status: SiteStatus,
    pub summary: Option<SiteSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// SiteSink Trait
// ============================================================================

/// 수집 결과 영속화 싱크
///
/// 워커는 이 인터페이스로만 외부 사이트 레코드를 갱신합니다.
#[async_trait]
pub trait SiteSink: Send + Sync {
    /// 레코드를 "crawling" 상태로 생성/갱신
    async fn mark_crawling(&self, job_id: Uuid, url: &str, tenant_key: &str) -> Result<()>;

    /// 레코드를 "completed" 상태로 갱신하고 카운터 기록
    async fn mark_completed(&self, job_id: Uuid, summary: &SiteSummary) -> Result<()>;

    /// 레코드 삭제 (실패한 수집)
    async fn delete(&self, job_id: Uuid) -> Result<()>;
}

// ============================================================================
// SiteRegistry
// ============================================================================

/// SQLite 사이트 레지스트리
pub struct SiteRegistry {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SiteRegistry {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let registry = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        registry.initialize()?;
        Ok(registry)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sites (
                job_id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                tenant_key TEXT NOT NULL,
                status TEXT NOT NULL,
                pages_crawled INTEGER,
                chunks_attempted INTEGER,
                chunks_succeeded INTEGER,
                success_rate REAL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sites_tenant ON sites(tenant_key);",
        )
        .context("Failed to create sites table")?;

        tracing::debug!("Site registry initialized at {:?}", self.db_path);
        Ok(())
    }

    /// job ID로 레코드 조회
    pub fn get(&self, job_id: Uuid) -> Result<Option<SiteRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT job_id, url, tenant_key, status, pages_crawled, chunks_attempted,
                        chunks_succeeded, success_rate, created_at, updated_at
                 FROM sites WHERE job_id = ?1",
                params![job_id.to_string()],
                map_record,
            )
            .optional()
            .context("Failed to query site")?;
        Ok(record)
    }

    /// 레코드 목록 (최근 갱신 순)
    pub fn list(&self, tenant_key: Option<&str>, limit: usize) -> Result<Vec<SiteRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT job_id, url, tenant_key, status, pages_crawled, chunks_attempted,
                    chunks_succeeded, success_rate, created_at, updated_at
             FROM sites
             WHERE ?1 IS NULL OR tenant_key = ?1
             ORDER BY updated_at DESC
             LIMIT ?2",
        )?;

        let records = stmt
            .query_map(params![tenant_key, limit as i64], map_record)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// 레코드 수
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sites", [], |row| row.get(0))
            .unwrap_or(0);
        Ok(count as usize)
    }
}

#[async_trait]
impl SiteSink for SiteRegistry {
    async fn mark_crawling(&self, job_id: Uuid, url: &str, tenant_key: &str) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO sites (job_id, url, tenant_key, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(job_id) DO UPDATE SET status = excluded.status,
                                               updated_at = excluded.updated_at",
            params![
                job_id.to_string(),
                url,
                tenant_key,
                SiteStatus::Crawling.as_str(),
                now
            ],
        )
        .context("Failed to mark site as crawling")?;

        tracing::debug!("Site {} marked crawling (job={})", url, job_id);
        Ok(())
    }

    async fn mark_completed(&self, job_id: Uuid, summary: &SiteSummary) -> Result<()> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE sites SET status = ?2, pages_crawled = ?3, chunks_attempted = ?4,
                                  chunks_succeeded = ?5, success_rate = ?6, updated_at = ?7
                 WHERE job_id = ?1",
                params![
                    job_id.to_string(),
                    SiteStatus::Completed.as_str(),
                    summary.pages_crawled as i64,
                    summary.chunks_attempted as i64,
                    summary.chunks_succeeded as i64,
                    summary.success_rate,
                    Utc::now().to_rfc3339()
                ],
            )
            .context("Failed to mark site as completed")?;

        if rows == 0 {
            anyhow::bail!("No site record for job {}", job_id);
        }
        Ok(())
    }

    async fn delete(&self, job_id: Uuid) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM sites WHERE job_id = ?1",
            params![job_id.to_string()],
        )
        .context("Failed to delete site")?;
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn map_record(row: &Row<'_>) -> rusqlite::Result<SiteRecord> {
    let job_id: String = row.get(0)?;
    let pages: Option<i64> = row.get(4)?;
    let attempted: Option<i64> = row.get(5)?;
    let succeeded: Option<i64> = row.get(6)?;
    let rate: Option<f64> = row.get(7)?;

    let summary = match (pages, attempted, succeeded, rate) {
        (Some(p), Some(a), Some(s), Some(r)) => Some(SiteSummary {
            pages_crawled: p as usize,
            chunks_attempted: a as usize,
            chunks_succeeded: s as usize,
            success_rate: r,
        }),
        _ => None,
    };

    Ok(SiteRecord {
        job_id: Uuid::parse_str(&job_id).unwrap_or_default(),
        url: row.get(1)?,
        tenant_key: row.get(2)?,
        status: SiteStatus::parse(&row.get::<_, String>(3)?),
        summary,
        created_at: parse_datetime(row.get::<_, String>(8)?),
        updated_at: parse_datetime(row.get::<_, String>(9)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
