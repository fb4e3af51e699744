//! Fetcher - 브라우저 엔진을 통한 페이지 렌더링
//!
//! 프로세스 당 하나의 `Browser`를 지연 실행하여 재사용하고, 페치마다
//! 독립된 `Tab`을 열고 닫습니다. 탭은 렌더링 성공/실패와 관계없이
//! 항상 닫힙니다.
//!
//! 엔진은 두 가지입니다.
//! - `chrome` 피처: chromiumoxide 헤드리스 Chrome (스크립트 렌더링)
//! - `HttpBrowser`: reqwest로 HTML만 가져오는 폴백 엔진
//!
//! HTTP 엔진은 공개 주소에서 사설 주소로 넘어가는 리다이렉트를 거부합니다.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use url::{Host, Url};

use crate::policy::is_blocked_ip;

/// 크롤러 User-Agent
pub const USER_AGENT: &str = concat!(
    "siterag/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/PALAN-K/siterag)"
);

/// 최대 리다이렉트 횟수
pub const MAX_REDIRECTS: usize = 5;

// ============================================================================
// Errors
// ============================================================================

/// 분류된 페치 에러
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("DNS lookup failed: {0}")]
    Dns(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("TLS failure: {0}")]
    Tls(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("{0}")]
    Other(String),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => "timeout",
            FetchError::Dns(_) => "dns",
            FetchError::ConnectionRefused(_) => "connection_refused",
            FetchError::Tls(_) => "tls",
            FetchError::Status(_) => "status",
            FetchError::Other(_) => "other",
        }
    }
}

/// reqwest 에러 분류
///
/// reqwest는 DNS/TLS 실패를 별도 타입으로 노출하지 않으므로
/// 에러 체인의 io 에러 종류와 메시지로 판별합니다.
pub fn classify_request_error(err: &reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout(timeout);
    }

    let mut messages = Vec::new();
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    return FetchError::ConnectionRefused(err.to_string())
                }
                std::io::ErrorKind::TimedOut => return FetchError::Timeout(timeout),
                _ => {}
            }
        }
        messages.push(e.to_string().to_lowercase());
        source = e.source();
    }

    let chain = messages.join(" | ");
    if chain.contains("dns error")
        || chain.contains("failed to lookup address")
        || chain.contains("name or service not known")
        || chain.contains("no such host")
    {
        FetchError::Dns(err.to_string())
    } else if chain.contains("connection refused") {
        FetchError::ConnectionRefused(err.to_string())
    } else if chain.contains("certificate")
        || chain.contains("tls")
        || chain.contains("ssl")
        || chain.contains("handshake")
    {
        FetchError::Tls(err.to_string())
    } else {
        FetchError::Other(err.to_string())
    }
}

/// 브라우저 내비게이션 에러 분류 (`net::ERR_*` 코드 기준)
pub fn classify_navigation_error(detail: &str, timeout: Duration) -> FetchError {
    let lower = detail.to_lowercase();
    if lower.contains("err_name_not_resolved") || lower.contains("err_name_resolution_failed") {
        FetchError::Dns(detail.to_string())
    } else if lower.contains("err_connection_refused") {
        FetchError::ConnectionRefused(detail.to_string())
    } else if lower.contains("err_cert") || lower.contains("err_ssl") {
        FetchError::Tls(detail.to_string())
    } else if lower.contains("err_timed_out")
        || lower.contains("err_connection_timed_out")
        || lower.contains("timeout")
    {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Other(detail.to_string())
    }
}

// ============================================================================
// Redirect Guard
// ============================================================================

/// 공개 출발지에서 사설 대상으로 넘어가는 리다이렉트인지 판정
///
/// 대상 호스트가 IP 리터럴이거나 `localhost`일 때만 판정합니다.
/// 도메인 이름의 DNS 결과는 여기서 확인하지 않습니다.
pub fn is_private_hop(origin: &Url, target: &Url) -> bool {
    is_private_target(target) && !is_private_target(origin)
}

fn is_private_target(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(ip)) => is_blocked_ip(ip.into()),
        Some(Host::Ipv6(ip)) => is_blocked_ip(ip.into()),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        None => true,
    }
}

fn redirect_policy() -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(|attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }

        let private_hop = attempt
            .previous()
            .first()
            .map_or(false, |origin| is_private_hop(origin, attempt.url()));
        if private_hop {
            let message = format!("redirect to private address blocked: {}", attempt.url());
            tracing::warn!("{}", message);
            return attempt.error(message);
        }

        attempt.follow()
    })
}

// ============================================================================
// Engine Selection
// ============================================================================

/// 렌더링 엔진 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserEngine {
    Http,
    Chrome,
}

impl Default for BrowserEngine {
    fn default() -> Self {
        if cfg!(feature = "chrome") {
            BrowserEngine::Chrome
        } else {
            BrowserEngine::Http
        }
    }
}

impl fmt::Display for BrowserEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserEngine::Http => write!(f, "http"),
            BrowserEngine::Chrome => write!(f, "chrome"),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown browser engine {0:?} (expected \"http\" or \"chrome\")")]
pub struct UnknownEngine(String);

impl FromStr for BrowserEngine {
    type Err = UnknownEngine;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(BrowserEngine::Http),
            "chrome" | "chromium" => Ok(BrowserEngine::Chrome),
            other => Err(UnknownEngine(other.to_string())),
        }
    }
}

// ============================================================================
// Browser Traits
// ============================================================================

/// 렌더링 결과
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 리다이렉트 후 최종 URL
    pub url: String,
    pub html: String,
}

/// 브라우저 엔진 실행기
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Browser>, FetchError>;
}

/// 실행 중인 브라우저 인스턴스
#[async_trait]
pub trait Browser: Send + Sync {
    /// 새 탭 열기
    async fn open_tab(&self) -> Result<Box<dyn Tab>, FetchError>;

    /// 연결 유지 여부 (false면 재실행)
    fn is_connected(&self) -> bool;

    async fn close(&self);
}

/// 격리된 페이지/탭
#[async_trait]
pub trait Tab: Send {
    async fn render(&mut self, url: &str, timeout: Duration) -> Result<RenderedPage, FetchError>;

    async fn close(self: Box<Self>);
}

// ============================================================================
// Fetcher
// ============================================================================

/// 페치 서비스 (공유 브라우저 소유)
pub struct Fetcher {
    launcher: Arc<dyn BrowserLauncher>,
    browser: Mutex<Option<Arc<dyn Browser>>>,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, timeout: Duration) -> Self {
        Self {
            launcher,
            browser: Mutex::new(None),
            timeout,
        }
    }

    /// HTTP 폴백 엔진으로 생성
    pub fn http(timeout: Duration) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpLauncher::new()?), timeout))
    }

    /// 설정된 엔진으로 생성
    pub fn for_engine(
        engine: BrowserEngine,
        timeout: Duration,
        chrome_path: Option<PathBuf>,
    ) -> Result<Self> {
        match engine {
            BrowserEngine::Http => Self::http(timeout),
            #[cfg(feature = "chrome")]
            BrowserEngine::Chrome => {
                let launcher = match chrome_path {
                    Some(path) => super::chrome::ChromeLauncher::with_executable(path),
                    None => super::chrome::ChromeLauncher::new(),
                };
                Ok(Self::new(Arc::new(launcher), timeout))
            }
            #[cfg(not(feature = "chrome"))]
            BrowserEngine::Chrome => {
                let _ = chrome_path;
                anyhow::bail!("chrome engine requested but siterag was built without the `chrome` feature")
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 브라우저 미리 실행
    pub async fn start(&self) -> Result<(), FetchError> {
        self.browser().await.map(|_| ())
    }

    /// 브라우저 종료 (다음 페치 시 재실행)
    pub async fn stop(&self) {
        let browser = self.browser.lock().await.take();
        if let Some(browser) = browser {
            browser.close().await;
            tracing::debug!("Browser stopped");
        }
    }

    /// 공유 브라우저 획득 (지연 실행 + 연결 확인)
    async fn browser(&self) -> Result<Arc<dyn Browser>, FetchError> {
        let mut guard = self.browser.lock().await;

        if let Some(browser) = guard.as_ref() {
            if browser.is_connected() {
                return Ok(Arc::clone(browser));
            }
            tracing::warn!("Browser disconnected, relaunching");
        }

        let browser = self.launcher.launch().await?;
        *guard = Some(Arc::clone(&browser));
        tracing::debug!("Browser launched");
        Ok(browser)
    }

    /// URL 하나를 렌더링하여 HTML 반환
    pub async fn fetch(&self, url: &str) -> Result<RenderedPage, FetchError> {
        let browser = self.browser().await?;
        let mut tab = browser.open_tab().await?;

        let result = match tokio::time::timeout(self.timeout, tab.render(url, self.timeout)).await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        };

        tab.close().await;
        result
    }
}

// ============================================================================
// HttpBrowser
// ============================================================================

/// reqwest 기반 기본 엔진 실행기
pub struct HttpLauncher {
    client: reqwest::Client,
}

impl HttpLauncher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(redirect_policy())
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BrowserLauncher for HttpLauncher {
    async fn launch(&self) -> Result<Arc<dyn Browser>, FetchError> {
        Ok(Arc::new(HttpBrowser {
            client: self.client.clone(),
            connected: AtomicBool::new(true),
        }))
    }
}

/// reqwest 기반 브라우저 (연결 풀 공유)
pub struct HttpBrowser {
    client: reqwest::Client,
    connected: AtomicBool,
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn open_tab(&self) -> Result<Box<dyn Tab>, FetchError> {
        if !self.is_connected() {
            return Err(FetchError::Other("browser is closed".to_string()));
        }
        Ok(Box::new(HttpTab {
            client: self.client.clone(),
        }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

struct HttpTab {
    client: reqwest::Client,
}

#[async_trait]
impl Tab for HttpTab {
    async fn render(&mut self, url: &str, timeout: Duration) -> Result<RenderedPage, FetchError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_request_error(&e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_lowercase();
        if !content_type.contains("html") && !content_type.starts_with("text/") {
            return Err(FetchError::Other(format!(
                "unsupported content type: {}",
                content_type
            )));
        }

        let final_url = response.url().to_string();
        let html = response
            .text()
            .await
            .map_err(|e| classify_request_error(&e, timeout))?;

        Ok(RenderedPage {
            url: final_url,
            html,
        })
    }

    async fn close(self: Box<Self>) {}
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// 실행/탭 열기/닫기 횟수를 세는 테스트 엔진
    #[derive(Default)]
    struct Counters {
        launches: AtomicUsize,
        tabs_opened: AtomicUsize,
        tabs_closed: AtomicUsize,
    }

    struct CountingLauncher {
        counters: Arc<Counters>,
        render_delay: Duration,
    }

    struct CountingBrowser {
        counters: Arc<Counters>,
        connected: AtomicBool,
        render_delay: Duration,
    }

    struct CountingTab {
        counters: Arc<Counters>,
        render_delay: Duration,
    }

    #[async_trait]
    impl BrowserLauncher for CountingLauncher {
        async fn launch(&self) -> Result<Arc<dyn Browser>, FetchError> {
            self.counters.launches.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingBrowser {
                counters: Arc::clone(&self.counters),
                connected: AtomicBool::new(true),
                render_delay: self.render_delay,
            }))
        }
    }

    #[async_trait]
    impl Browser for CountingBrowser {
        async fn open_tab(&self) -> Result<Box<dyn Tab>, FetchError> {
            self.counters.tabs_opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingTab {
                counters: Arc::clone(&self.counters),
                render_delay: self.render_delay,
            }))
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn close(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Tab for CountingTab {
        async fn render(&mut self, url: &str, _timeout: Duration) -> Result<RenderedPage, FetchError> {
            tokio::time::sleep(self.render_delay).await;
            if url.contains("broken") {
                return Err(FetchError::Status(500));
            }
            Ok(RenderedPage {
                url: url.to_string(),
                html: "<p>ok</p>".to_string(),
            })
        }

        async fn close(self: Box<Self>) {
            self.counters.tabs_closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_fetcher(render_delay: Duration, timeout: Duration) -> (Arc<Counters>, Fetcher) {
        let counters = Arc::new(Counters::default());
        let launcher = CountingLauncher {
            counters: Arc::clone(&counters),
            render_delay,
        };
        (counters, Fetcher::new(Arc::new(launcher), timeout))
    }

    #[tokio::test]
    async fn test_browser_is_lazily_launched_and_reused() {
        let (counters, fetcher) = counting_fetcher(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(counters.launches.load(Ordering::SeqCst), 0);

        fetcher.fetch("https://a.com/1").await.unwrap();
        fetcher.fetch("https://a.com/2").await.unwrap();

        assert_eq!(counters.launches.load(Ordering::SeqCst), 1);
        assert_eq!(counters.tabs_opened.load(Ordering::SeqCst), 2);
        assert_eq!(counters.tabs_closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tab_closed_on_error_and_timeout() {
        let (counters, fetcher) = counting_fetcher(Duration::ZERO, Duration::from_secs(1));
        let err = fetcher.fetch("https://a.com/broken").await.unwrap_err();
        assert_eq!(err, FetchError::Status(500));
        assert_eq!(counters.tabs_closed.load(Ordering::SeqCst), 1);

        let (counters, fetcher) =
            counting_fetcher(Duration::from_millis(200), Duration::from_millis(20));
        let err = fetcher.fetch("https://a.com/slow").await.unwrap_err();
        assert_eq!(err.kind(), "timeout");
        assert_eq!(counters.tabs_closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_then_fetch_relaunches() {
        let (counters, fetcher) = counting_fetcher(Duration::ZERO, Duration::from_secs(1));
        fetcher.start().await.unwrap();
        fetcher.stop().await;
        fetcher.fetch("https://a.com/").await.unwrap();
        assert_eq!(counters.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_http_browser_renders_and_classifies_status() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("GET", "/page")
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body("<html><body>Hello</body></html>")
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;
        let _pdf = server
            .mock("GET", "/file")
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body("%PDF")
            .create_async()
            .await;

        let fetcher = Fetcher::http(Duration::from_secs(5)).unwrap();
        let page = fetcher
            .fetch(&format!("{}/page", server.url()))
            .await
            .unwrap();
        assert!(page.html.contains("Hello"));
        assert!(page.url.ends_with("/page"));

        let err = fetcher
            .fetch(&format!("{}/missing", server.url()))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Status(404));

        let err = fetcher
            .fetch(&format!("{}/file", server.url()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "other");
    }

    #[tokio::test]
    async fn test_connection_refused_classified() {
        let fetcher = Fetcher::http(Duration::from_secs(5)).unwrap();
        let err = fetcher.fetch("http://127.0.0.1:1/").await.unwrap_err();
        assert_eq!(err.kind(), "connection_refused");
    }

    #[test]
    fn test_private_hop_detection() {
        let public = Url::parse("https://example.com/start").unwrap();
        let internal = Url::parse("http://10.0.0.1/admin").unwrap();
        let loopback = Url::parse("http://localhost:8080/").unwrap();
        let metadata = Url::parse("http://[::1]/").unwrap();

        assert!(is_private_hop(&public, &internal));
        assert!(is_private_hop(&public, &loopback));
        assert!(is_private_hop(&public, &metadata));
        assert!(!is_private_hop(&internal, &loopback));
        assert!(!is_private_hop(
            &public,
            &Url::parse("https://www.example.com/next").unwrap()
        ));
    }

    #[tokio::test]
    async fn test_same_host_redirect_is_followed() {
        let mut server = mockito::Server::new_async().await;
        let _old = server
            .mock("GET", "/old")
            .with_status(302)
            .with_header("location", "/new")
            .create_async()
            .await;
        let _new = server
            .mock("GET", "/new")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<p>moved</p>")
            .create_async()
            .await;

        let fetcher = Fetcher::http(Duration::from_secs(5)).unwrap();
        let page = fetcher
            .fetch(&format!("{}/old", server.url()))
            .await
            .unwrap();
        assert!(page.url.ends_with("/new"));
        assert!(page.html.contains("moved"));
    }

    #[tokio::test]
    async fn test_redirect_loop_is_cut_off() {
        let mut server = mockito::Server::new_async().await;
        let _loop = server
            .mock("GET", "/loop")
            .with_status(302)
            .with_header("location", "/loop")
            .expect_at_most(MAX_REDIRECTS + 1)
            .create_async()
            .await;

        let fetcher = Fetcher::http(Duration::from_secs(5)).unwrap();
        let err = fetcher
            .fetch(&format!("{}/loop", server.url()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "other");
    }

    #[test]
    fn test_navigation_errors_are_classified() {
        let timeout = Duration::from_secs(3);
        assert_eq!(
            classify_navigation_error("net::ERR_NAME_NOT_RESOLVED", timeout).kind(),
            "dns"
        );
        assert_eq!(
            classify_navigation_error("net::ERR_CONNECTION_REFUSED", timeout).kind(),
            "connection_refused"
        );
        assert_eq!(
            classify_navigation_error("net::ERR_CERT_AUTHORITY_INVALID", timeout).kind(),
            "tls"
        );
        assert_eq!(
            classify_navigation_error("Request timeout", timeout),
            FetchError::Timeout(timeout)
        );
        assert_eq!(
            classify_navigation_error("net::ERR_ABORTED", timeout).kind(),
            "other"
        );
    }

    #[test]
    fn test_engine_parsing() {
        assert_eq!("http".parse::<BrowserEngine>().unwrap(), BrowserEngine::Http);
        assert_eq!(" Chrome ".parse::<BrowserEngine>().unwrap(), BrowserEngine::Chrome);
        assert!("firefox".parse::<BrowserEngine>().is_err());
        assert_eq!(BrowserEngine::Chrome.to_string(), "chrome");
    }

    #[cfg(not(feature = "chrome"))]
    #[test]
    fn test_chrome_engine_requires_feature() {
        assert!(Fetcher::for_engine(BrowserEngine::Chrome, Duration::from_secs(1), None).is_err());
        assert!(Fetcher::for_engine(BrowserEngine::Http, Duration::from_secs(1), None).is_ok());
    }
}
