//! Chrome 엔진 - chromiumoxide 기반 헤드리스 브라우저
//!
//! 프로세스 하나를 띄워 CDP 이벤트 루프를 백그라운드 태스크로 돌리고,
//! 페치마다 새 페이지를 열어 렌더링 후 닫습니다. 이벤트 루프가 끝나면
//! 연결이 끊긴 것으로 보고 `Fetcher`가 다시 실행합니다.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser as ChromeProcess, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::fetcher::{
    classify_navigation_error, Browser, BrowserLauncher, FetchError, RenderedPage, Tab, USER_AGENT,
};

/// Chrome 실행기
pub struct ChromeLauncher {
    executable: Option<PathBuf>,
}

impl ChromeLauncher {
    /// PATH에서 Chrome/Chromium 탐색
    pub fn new() -> Self {
        Self { executable: None }
    }

    pub fn with_executable(path: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(path.into()),
        }
    }

    fn config(&self) -> Result<BrowserConfig, FetchError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg(format!("--user-agent={}", USER_AGENT))
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        builder
            .build()
            .map_err(|e| FetchError::Other(format!("invalid browser config: {}", e)))
    }
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Arc<dyn Browser>, FetchError> {
        let config = self.config()?;
        let (process, mut handler) = ChromeProcess::launch(config)
            .await
            .map_err(|e| FetchError::Other(format!("failed to launch browser: {}", e)))?;

        let connected = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&connected);
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser event error: {}", e);
                }
            }
            flag.store(false, Ordering::Release);
            tracing::debug!("Browser event loop ended");
        });

        tracing::info!("Launched headless Chrome");
        Ok(Arc::new(ChromeBrowser {
            process: Mutex::new(process),
            connected,
            events,
        }))
    }
}

/// 실행 중인 Chrome 프로세스
pub struct ChromeBrowser {
    process: Mutex<ChromeProcess>,
    connected: Arc<AtomicBool>,
    events: JoinHandle<()>,
}

#[async_trait]
impl Browser for ChromeBrowser {
    async fn open_tab(&self) -> Result<Box<dyn Tab>, FetchError> {
        if !self.is_connected() {
            return Err(FetchError::Other("browser is closed".to_string()));
        }
        let page = self
            .process
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Other(format!("failed to open tab: {}", e)))?;
        Ok(Box::new(ChromeTab { page }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.events.is_finished()
    }

    async fn close(&self) {
        let mut process = self.process.lock().await;
        if let Err(e) = process.close().await {
            tracing::debug!("Browser close failed: {}", e);
        }
        if let Err(e) = process.wait().await {
            tracing::debug!("Browser wait failed: {}", e);
        }
        self.connected.store(false, Ordering::Release);
        self.events.abort();
    }
}

struct ChromeTab {
    page: Page,
}

#[async_trait]
impl Tab for ChromeTab {
    async fn render(&mut self, url: &str, timeout: Duration) -> Result<RenderedPage, FetchError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| classify_navigation_error(&e.to_string(), timeout))?;

        let html = self
            .page
            .content()
            .await
            .map_err(|e| classify_navigation_error(&e.to_string(), timeout))?;

        let final_url = match self.page.url().await {
            Ok(Some(current)) => current,
            _ => url.to_string(),
        };

        Ok(RenderedPage {
            url: final_url,
            html,
        })
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.page.close().await {
            tracing::debug!("Failed to close tab: {}", e);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
