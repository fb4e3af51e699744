//! CLI 모듈
//!
//! siterag CLI 명령어 정의 및 구현

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{has_api_key, Settings};
use crate::crawler::{Crawler, CrawlerConfig, Fetcher};
use crate::embedding::create_embedder;
use crate::generation::GeminiGeneration;
use crate::ingest::{IngestConfig, IngestQueue, IngestServices, JobPhase, JobStatus};
use crate::knowledge::{ChunkConfig, LanceVectorStore, SiteRegistry, VectorStore};
use crate::policy::StandardUrlPolicy;
use crate::rag::{AnswerEngine, AskRequest, DEFAULT_TOP_K};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "siterag")]
#[command(version, about = "웹사이트 크롤링 기반 RAG 지식베이스", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 웹사이트를 크롤링하여 지식베이스에 추가
    Ingest {
        /// 루트 URL
        url: String,

        /// 테넌트 키 (소유자)
        #[arg(short, long)]
        tenant: String,

        /// 최대 페이지 수 (1-50)
        #[arg(short = 'n', long)]
        max_pages: Option<usize>,

        /// 진행 상황을 출력하지 않고 최종 결과만 출력
        #[arg(short, long)]
        quiet: bool,
    },

    /// 지식베이스에 질문
    Ask {
        /// 질문
        question: String,

        /// 테넌트 키
        #[arg(short, long)]
        tenant: String,

        /// 사이트 필터 (호스트명 또는 URL)
        #[arg(short, long)]
        site: Option<String>,

        /// 검색할 청크 수 (1-50)
        #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },

    /// 상태 확인
    Status {
        /// 사이트 목록 필터
        #[arg(short, long)]
        tenant: Option<String>,

        /// 사이트 목록 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::from_env().context("설정 로드 실패")?;

    match cli.command {
        Commands::Ingest {
            url,
            tenant,
            max_pages,
            quiet,
        } => cmd_ingest(&settings, &url, &tenant, max_pages, quiet).await,
        Commands::Ask {
            question,
            tenant,
            site,
            top_k,
        } => cmd_ask(&settings, &question, &tenant, site, top_k).await,
        Commands::Status { tenant, limit } => cmd_status(&settings, tenant.as_deref(), limit).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

async fn open_vector_store(settings: &Settings) -> Result<LanceVectorStore> {
    std::fs::create_dir_all(&settings.data_dir).with_context(|| {
        format!("데이터 디렉토리 생성 실패: {}", settings.data_dir.display())
    })?;
    LanceVectorStore::open(&settings.vectors_path(), settings.embedding_dimension)
        .await
        .context("벡터 스토어 열기 실패")
}

fn open_sites(settings: &Settings) -> Result<SiteRegistry> {
    std::fs::create_dir_all(&settings.data_dir).with_context(|| {
        format!("데이터 디렉토리 생성 실패: {}", settings.data_dir.display())
    })?;
    SiteRegistry::open(&settings.sites_db_path()).context("사이트 레지스트리 열기 실패")
}

/// 수집 명령어 (ingest)
///
/// 작업을 큐에 넣고 종료 상태까지 기다립니다. `--quiet`가 없으면 진행 상황을 출력합니다.
async fn cmd_ingest(
    settings: &Settings,
    url: &str,
    tenant: &str,
    max_pages: Option<usize>,
    quiet: bool,
) -> Result<()> {
    require_api_key()?;

    let fetcher = Arc::new(Fetcher::for_engine(
        settings.browser_engine,
        settings.fetch_timeout,
        settings.chrome_path.clone(),
    )?);
    let crawler = Crawler::new(
        fetcher,
        CrawlerConfig {
            delay: settings.crawl_delay,
            ..CrawlerConfig::default()
        },
    )?;

    let services = IngestServices {
        crawler: Arc::new(crawler),
        embedder: Arc::new(create_embedder(settings.embedding_dimension)?),
        store: Arc::new(open_vector_store(settings).await?),
        sites: Arc::new(open_sites(settings)?),
    };
    let config = IngestConfig {
        chunk: ChunkConfig::new(settings.chunk_size, settings.chunk_overlap)?,
        default_max_pages: settings.max_pages,
        batch_size: settings.upsert_batch_size,
    };

    let queue = IngestQueue::start(
        services,
        config,
        Arc::new(StandardUrlPolicy::new()),
        settings.workers,
    );

    let job_id = queue
        .submit(url, tenant, max_pages)
        .await
        .context("수집 요청 실패")?;
    println!("[*] 작업 접수: {}", job_id);

    let final_status = if quiet {
        queue.wait(job_id).await
    } else {
        stream_progress(&queue, job_id).await?;
        queue.status(job_id)
    };
    queue.shutdown().await;

    match final_status {
        Some(status) if status.phase == JobPhase::Completed => {
            println!();
            if let Some(summary) = status.summary {
                println!(
                    "[OK] 완료: 페이지 {}, 청크 {}/{} (성공률 {}%)",
                    summary.pages_crawled,
                    summary.chunks_succeeded,
                    summary.chunks_attempted,
                    summary.success_rate
                );
            }
            Ok(())
        }
        Some(status) => bail!(
            "수집 실패: {}",
            status.error.unwrap_or_else(|| "알 수 없는 오류".to_string())
        ),
        None => bail!("작업 상태를 찾을 수 없습니다: {}", job_id),
    }
}

/// 질문 명령어 (ask)
async fn cmd_ask(
    settings: &Settings,
    question: &str,
    tenant: &str,
    site: Option<String>,
    top_k: usize,
) -> Result<()> {
    require_api_key()?;

    let engine = AnswerEngine::new(
        Arc::new(create_embedder(settings.embedding_dimension)?),
        Arc::new(open_vector_store(settings).await?),
        Arc::new(GeminiGeneration::from_env(&settings.generation_model)?),
    );

    let mut request = AskRequest::new(question, tenant).with_top_k(top_k);
    if let Some(site) = site {
        request = request.with_site(site);
    }

    println!("[*] 질문: \"{}\"", question);
    let answer = engine.answer(&request).await.context("답변 생성 실패")?;

    println!();
    println!("{}", answer.answer);

    if !answer.sources.is_empty() {
        println!();
        println!("[OK] 출처 ({} 건, 검색 결과 {} 건):", answer.sources.len(), answer.matches);
        for (i, source) in answer.sources.iter().enumerate() {
            println!("  {}. {}", i + 1, truncate_text(source, 120));
        }
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(settings: &Settings, tenant: Option<&str>, limit: usize) -> Result<()> {
    println!("siterag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", settings.data_dir.display());
    println!(
        "[*] 청크: {} / 오버랩 {} | 페이지 예산 {} | 딜레이 {}ms | 워커 {}",
        settings.chunk_size,
        settings.chunk_overlap,
        settings.max_pages,
        settings.crawl_delay.as_millis(),
        settings.workers
    );
    println!("[*] 렌더링 엔진: {}", settings.browser_engine);

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    match open_sites(settings) {
        Ok(sites) => {
            let total = sites.count().unwrap_or(0);
            println!("[OK] 사이트 레코드: {} 건", total);
            match sites.list(tenant, limit) {
                Ok(records) => {
                    for record in records {
                        let summary = record
                            .summary
                            .map(|s| {
                                format!(
                                    "{} pages, {}/{} chunks, {}%",
                                    s.pages_crawled,
                                    s.chunks_succeeded,
                                    s.chunks_attempted,
                                    s.success_rate
                                )
                            })
                            .unwrap_or_else(|| "-".to_string());
                        println!(
                            "  [{}] {} ({}) | {} | {}",
                            record.status.as_str(),
                            truncate_text(&record.url, 60),
                            record.tenant_key,
                            summary,
                            record.updated_at.format("%Y-%m-%d %H:%M")
                        );
                    }
                }
                Err(e) => println!("[!] 사이트 목록 조회 실패: {}", e),
            }
        }
        Err(e) => println!("[!] 사이트 레지스트리 열기 실패: {}", e),
    }

    match open_vector_store(settings).await {
        Ok(store) => match store.count().await {
            Ok(count) => println!("[OK] 벡터 인덱스: {} 청크 ({}차원)", count, store.dimension()),
            Err(e) => tracing::debug!("Vector count failed: {}", e),
        },
        Err(e) => tracing::debug!("Vector store unavailable: {:#}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 상태 변경을 구독하여 종료 상태까지 진행 상황 출력
async fn stream_progress(queue: &IngestQueue, job_id: uuid::Uuid) -> Result<()> {
    let mut updates = queue
        .subscribe(job_id)
        .context("작업 상태를 찾을 수 없습니다")?;
    let mut last_line = String::new();

    loop {
        let status = updates.borrow_and_update().clone();
        let line = progress_line(&status);
        if line != last_line {
            println!("{}", line);
            last_line = line;
        }
        if status.phase.is_terminal() || updates.changed().await.is_err() {
            return Ok(());
        }
    }
}

/// 진행 상황 한 줄 표시
fn progress_line(status: &JobStatus) -> String {
    let detail = match status.phase {
        JobPhase::Crawling => format!("페이지 {}", status.pages_crawled),
        JobPhase::Processing => format!(
            "청크 {}/{} (성공 {})",
            status.chunks_attempted, status.chunks_total, status.chunks_processed
        ),
        _ => status.message.clone().unwrap_or_default(),
    };
    format!(
        "[{:>3}%] {:<12} {}",
        status.progress_percent,
        status.phase.as_str(),
        detail
    )
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
