//! Crawler 모듈 - 너비 우선 사이트 크롤링
//!
//! - Fetcher: 공유 브라우저 + 페치 당 탭
//! - Robots: 크롤링 당 한 번 로드하는 robots.txt 정책
//! - Extract: HTML → 텍스트
//! - Links: 링크 수집 및 거부 목록
//!
//! 페이지는 한 번에 하나씩 고정 딜레이를 두고 순차적으로 가져옵니다.

#[cfg(feature = "chrome")]
mod chrome;
mod extract;
mod fetcher;
mod links;
mod robots;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use scraper::Html;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

pub use extract::{extract_document, extract_text, FRAGMENT_SEPARATOR};
#[cfg(feature = "chrome")]
pub use chrome::{ChromeBrowser, ChromeLauncher};
pub use fetcher::{
    classify_navigation_error, classify_request_error, is_private_hop, Browser, BrowserEngine,
    BrowserLauncher, FetchError, Fetcher, HttpBrowser, HttpLauncher, RenderedPage, Tab,
    UnknownEngine, MAX_REDIRECTS, USER_AGENT,
};
pub use links::{harvest_links, is_denylisted, is_same_host, normalize, LINKS_PER_PAGE};
pub use robots::{RobotsPolicy, ROBOTS_AGENT};

/// 페이지 예산 하한
pub const MIN_PAGES: usize = 1;
/// 페이지 예산 상한
pub const MAX_PAGES: usize = 50;
/// 페이지 예산 대비 페치 시도 배수
pub const ATTEMPT_FACTOR: usize = 3;
/// 페이지로 인정되는 최소 텍스트 길이 (초과해야 함)
pub const MIN_PAGE_TEXT_CHARS: usize = 20;

/// 크롤링 진행률 구간
pub const CRAWL_PROGRESS_START: u8 = 5;
pub const CRAWL_PROGRESS_END: u8 = 40;

// ============================================================================
// Types
// ============================================================================

/// 크롤링 진행 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlProgress {
    /// 5..=40
    pub percent: u8,
    pub message: String,
    pub pages_collected: usize,
}

/// 크롤링 요청
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub root_url: String,
    /// [1, 50]으로 제한된 페이지 예산
    pub max_pages: usize,
    pub progress: Option<mpsc::UnboundedSender<CrawlProgress>>,
}

impl CrawlRequest {
    pub fn new(root_url: impl Into<String>, max_pages: usize) -> Self {
        Self {
            root_url: root_url.into(),
            max_pages: clamp_pages(max_pages),
            progress: None,
        }
    }

    pub fn with_progress(mut self, sink: mpsc::UnboundedSender<CrawlProgress>) -> Self {
        self.progress = Some(sink);
        self
    }

    fn report(&self, pages_collected: usize, message: impl Into<String>) {
        if let Some(sink) = &self.progress {
            let _ = sink.send(CrawlProgress {
                percent: crawl_progress(pages_collected, self.max_pages),
                message: message.into(),
                pages_collected,
            });
        }
    }
}

/// 수집된 페이지
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: String,
    pub text: String,
}

/// URL 단위 실패 기록
#[derive(Debug, Clone)]
pub struct PageFailure {
    pub url: String,
    pub error: FetchError,
}

/// 크롤링 결과
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    pub pages: Vec<Page>,
    pub failures: Vec<PageFailure>,
    /// 페치 시도 횟수
    pub attempts: usize,
}

/// 크롤링 레벨 에러 (URL 단위 실패는 `CrawlOutcome::failures`)
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid root URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("no crawlable pages found after {attempts} attempts ({failures} failed)")]
    NoPages { attempts: usize, failures: usize },
}

/// 페이지 예산 [1, 50] 제한
pub fn clamp_pages(requested: usize) -> usize {
    requested.clamp(MIN_PAGES, MAX_PAGES)
}

/// 크롤링 진행률: 5 + floor(35 × min(pages, N) / N)
pub fn crawl_progress(pages_collected: usize, max_pages: usize) -> u8 {
    let budget = max_pages.max(1);
    let done = pages_collected.min(budget);
    let span = (CRAWL_PROGRESS_END - CRAWL_PROGRESS_START) as usize;
    CRAWL_PROGRESS_START + (span * done / budget) as u8
}

// ============================================================================
// Crawler
// ============================================================================

/// 크롤러 설정
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// 페이지 페치 간 고정 딜레이
    pub delay: Duration,
    pub links_per_page: usize,
    pub robots_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(crate::config::DEFAULT_CRAWL_DELAY_MS),
            links_per_page: LINKS_PER_PAGE,
            robots_agent: ROBOTS_AGENT.to_string(),
        }
    }
}

/// 너비 우선 크롤러
pub struct Crawler {
    fetcher: Arc<Fetcher>,
    http: reqwest::Client,
    config: CrawlerConfig,
}

/// 한 페이지 처리 결과 (동기 구간에서 계산)
struct Processed {
    text: String,
    links: Vec<Url>,
}

impl Crawler {
    pub fn new(fetcher: Arc<Fetcher>, config: CrawlerConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(fetcher.timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            fetcher,
            http,
            config,
        })
    }

    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.fetcher
    }

    /// 사이트 크롤링
    pub async fn crawl(&self, request: CrawlRequest) -> Result<CrawlOutcome, CrawlError> {
        let root = parse_root(&request.root_url)?;
        let root_host = root.host_str().unwrap_or_default().to_ascii_lowercase();
        let max_pages = request.max_pages;
        let budget = max_pages * ATTEMPT_FACTOR;

        tracing::info!(
            "Crawling {} (max {} pages, {} attempts)",
            root,
            max_pages,
            budget
        );
        request.report(0, format!("Starting crawl of {}", root_host));

        let mut robots = RobotsPolicy::fetch(&self.http, &root, &self.config.robots_agent).await;

        let mut outcome = CrawlOutcome::default();
        let mut frontier: VecDeque<Url> = VecDeque::new();
        let mut seen: HashSet<String> = HashSet::new();

        let start = normalize(&root);
        seen.insert(start.to_string());
        frontier.push_back(start);

        while let Some(url) = frontier.pop_front() {
            if outcome.pages.len() >= max_pages || outcome.attempts >= budget {
                break;
            }

            if !robots.is_allowed(&url) {
                tracing::debug!("Disallowed by robots.txt: {}", url);
                continue;
            }
            if is_denylisted(&url) {
                tracing::debug!("Skipping non-content URL: {}", url);
                continue;
            }

            if outcome.attempts > 0 {
                tokio::time::sleep(self.config.delay).await;
            }
            outcome.attempts += 1;

            let rendered = match self.fetcher.fetch(url.as_str()).await {
                Ok(rendered) => rendered,
                Err(error) => {
                    tracing::warn!("Failed to fetch {} ({}): {}", url, error.kind(), error);
                    outcome.failures.push(PageFailure {
                        url: url.to_string(),
                        error,
                    });
                    continue;
                }
            };

            // 리다이렉트로 다른 호스트에 도달한 경우
            let landed = Url::parse(&rendered.url).unwrap_or_else(|_| url.clone());
            if !is_same_host(&landed, &root_host) {
                tracing::debug!("Redirected off-domain: {} -> {}", url, landed);
                continue;
            }

            let processed = self.process(&rendered.html, &url, &root_host, &seen);
            let text_chars = processed.text.chars().count();
            if text_chars <= MIN_PAGE_TEXT_CHARS {
                tracing::debug!("Skipping {} ({} chars of text)", url, text_chars);
                continue;
            }

            for link in processed.links {
                seen.insert(link.to_string());
                frontier.push_back(link);
            }

            tracing::debug!("Collected {} ({} chars)", url, text_chars);
            outcome.pages.push(Page {
                url: url.to_string(),
                text: processed.text,
            });
            request.report(
                outcome.pages.len(),
                format!("Crawled {}/{} pages", outcome.pages.len(), max_pages),
            );
        }

        if outcome.pages.is_empty() {
            return Err(CrawlError::NoPages {
                attempts: outcome.attempts,
                failures: outcome.failures.len(),
            });
        }

        tracing::info!(
            "Crawl finished: {} pages, {} attempts, {} failures",
            outcome.pages.len(),
            outcome.attempts,
            outcome.failures.len()
        );
        Ok(outcome)
    }

    /// 파싱 → 텍스트 추출 → 링크 수집 (await 없음)
    fn process(&self, html: &str, url: &Url, root_host: &str, seen: &HashSet<String>) -> Processed {
        let document = Html::parse_document(html);
        let text = extract_document(&document);
        let links = harvest_links(
            &document,
            url,
            root_host,
            seen,
            self.config.links_per_page,
        );
        Processed { text, links }
    }
}

fn parse_root(raw: &str) -> Result<Url, CrawlError> {
    let invalid = |reason: &str| CrawlError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("only http and https are supported"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_pages() {
        assert_eq!(clamp_pages(0), 1);
        assert_eq!(clamp_pages(10), 10);
        assert_eq!(clamp_pages(500), 50);
        assert_eq!(CrawlRequest::new("https://a.com", 99).max_pages, 50);
    }

    #[test]
    fn test_crawl_progress_band() {
        assert_eq!(crawl_progress(0, 10), 5);
        assert_eq!(crawl_progress(5, 10), 22);
        assert_eq!(crawl_progress(10, 10), 40);
        assert_eq!(crawl_progress(15, 10), 40);
        assert_eq!(crawl_progress(1, 3), 16);

        let mut last = 0;
        for pages in 0..=7 {
            let p = crawl_progress(pages, 7);
            assert!(p >= last);
            last = p;
        }
    }

    #[test]
    fn test_parse_root_rejects_bad_urls() {
        assert!(parse_root("https://example.com").is_ok());
        assert!(matches!(
            parse_root("ftp://example.com"),
            Err(CrawlError::InvalidUrl { .. })
        ));
        assert!(parse_root("not a url").is_err());
        assert!(parse_root("file:///etc/passwd").is_err());
    }
}
