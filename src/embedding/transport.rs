//! Gemini API 전송 계층 - Rate Limiter + 재시도
//!
//! 임베딩/생성 클라이언트가 공유합니다.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;

use super::error::{classify_status, classify_transport, ApiError};

/// Rate Limiter 설정 (Gemini 무료 티어: 60 RPM)
pub const RATE_LIMIT_RPM: u32 = 60;
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// 호출 간 최소 딜레이 (1000ms = 60 RPM 준수)
pub const MIN_DELAY_MS: u64 = 1000;
/// 429/5xx/전송 에러 시 최대 재시도 횟수
pub const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
pub const INITIAL_BACKOFF_MS: u64 = 2000;

// ============================================================================
// RateLimiter
// ============================================================================

/// Rate Limiter with minimum delay between requests
#[derive(Debug)]
pub(crate) struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u32, window: Duration, min_delay: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay,
            last_request: None,
        }
    }

    /// 요청 가능 여부 확인 및 대기
    pub(crate) async fn acquire(&mut self) {
        // 1. 최소 딜레이 적용 (버스트 방지)
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        let now = Instant::now();

        // 2. 윈도우 밖의 오래된 요청 제거
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        // 3. Rate limit 초과 시 대기
        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        // 4. 현재 요청 기록
        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// 재시도 정책
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.pow(attempt.min(5))
    }
}

// ============================================================================
// Request
// ============================================================================

/// JSON POST (rate limit + 지수 백오프 재시도)
///
/// 성공 시 응답 본문을 반환합니다. 429, 5xx, 전송 에러만 재시도하며
/// 나머지 상태 코드는 즉시 분류된 에러로 반환합니다.
pub(crate) async fn post_json<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &T,
    limiter: &Mutex<RateLimiter>,
    retry: RetryPolicy,
) -> Result<String, ApiError> {
    let mut last_error: Option<ApiError> = None;

    for attempt in 0..=retry.max_retries {
        // Rate limiting (매 시도마다)
        {
            let mut limiter = limiter.lock().await;
            limiter.acquire().await;
        }

        // API 키는 URL이 아닌 헤더로 전송
        let result = client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await;

        let error = match result {
            Ok(response) => {
                let status = response.status();
                match response.text().await {
                    Ok(text) if status.is_success() => return Ok(text),
                    Ok(text) => classify_status(status, &text),
                    Err(e) => classify_transport(&e),
                }
            }
            Err(e) => classify_transport(&e),
        };

        if !error.is_retryable() || attempt == retry.max_retries {
            return Err(error);
        }

        let backoff = retry.backoff(attempt);
        tracing::warn!(
            "Gemini request failed ({}), retrying in {:?} (attempt {}/{})",
            error.kind(),
            backoff,
            attempt + 1,
            retry.max_retries
        );
        last_error = Some(error);
        tokio::time::sleep(backoff).await;
    }

    Err(last_error.unwrap_or_else(|| {
        ApiError::Unreachable(format!("request failed after {} retries", retry.max_retries))
    }))
}
