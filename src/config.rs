//! 설정 모듈 - 환경변수 기반 런타임 설정
//!
//! 모든 값은 선택 사항이며 미설정 시 기본값을 사용합니다.
//! 잘못된 숫자 값은 변수 이름과 함께 에러로 보고됩니다.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::crawler::BrowserEngine;

// ============================================================================
// Defaults
// ============================================================================

/// 기본 청크 크기 (문자 수)
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// 기본 청크 오버랩 (문자 수)
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
/// 기본 크롤링 페이지 수
pub const DEFAULT_MAX_PAGES: usize = 10;
/// 페이지 간 기본 딜레이
pub const DEFAULT_CRAWL_DELAY_MS: u64 = 1000;
/// 페이지 렌더링 기본 타임아웃
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
/// 벡터 upsert 배치 크기
pub const DEFAULT_UPSERT_BATCH: usize = 100;
/// 동시 수집 워커 수
pub const DEFAULT_WORKERS: usize = 2;
/// 기본 생성 모델
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-2.0-flash";

// ============================================================================
// Settings
// ============================================================================

/// 런타임 설정
#[derive(Debug, Clone)]
pub struct Settings {
    /// 데이터 디렉토리 (sqlite + lance)
    pub data_dir: PathBuf,
    /// 임베딩 차원 (768, 1536, 3072)
    pub embedding_dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// 기본 페이지 예산 (요청 시 [1, 50]으로 제한)
    pub max_pages: usize,
    pub crawl_delay: Duration,
    pub fetch_timeout: Duration,
    pub upsert_batch_size: usize,
    pub workers: usize,
    pub generation_model: String,
    /// 렌더링 엔진 (`chrome` 피처 빌드면 chrome, 아니면 http)
    pub browser_engine: BrowserEngine,
    /// Chrome 실행 파일 경로 (미설정 시 PATH 탐색)
    pub chrome_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            embedding_dimension: crate::embedding::DEFAULT_DIMENSION,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            max_pages: DEFAULT_MAX_PAGES,
            crawl_delay: Duration::from_millis(DEFAULT_CRAWL_DELAY_MS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            upsert_batch_size: DEFAULT_UPSERT_BATCH,
            workers: DEFAULT_WORKERS,
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            browser_engine: BrowserEngine::default(),
            chrome_path: None,
        }
    }
}

impl Settings {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let data_dir = std::env::var("SITERAG_DATA_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let crawl_delay_ms: u64 = env_or("SITERAG_CRAWL_DELAY_MS", DEFAULT_CRAWL_DELAY_MS)?;
        let fetch_timeout_secs: u64 =
            env_or("SITERAG_FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS)?;

        let settings = Self {
            data_dir,
            embedding_dimension: env_or(
                "SITERAG_EMBEDDING_DIMENSION",
                defaults.embedding_dimension,
            )?,
            chunk_size: env_or("SITERAG_CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: env_or("SITERAG_CHUNK_OVERLAP", defaults.chunk_overlap)?,
            max_pages: env_or("SITERAG_MAX_PAGES", defaults.max_pages)?,
            crawl_delay: Duration::from_millis(crawl_delay_ms),
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            upsert_batch_size: env_or("SITERAG_UPSERT_BATCH", defaults.upsert_batch_size)?,
            workers: env_or("SITERAG_WORKERS", defaults.workers)?,
            generation_model: std::env::var("SITERAG_GENERATION_MODEL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.generation_model),
            browser_engine: env_or("SITERAG_BROWSER", defaults.browser_engine)?,
            chrome_path: std::env::var("SITERAG_CHROME_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_overlap >= self.chunk_size {
            anyhow::bail!(
                "SITERAG_CHUNK_OVERLAP ({}) must be smaller than SITERAG_CHUNK_SIZE ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        if self.upsert_batch_size == 0 {
            anyhow::bail!("SITERAG_UPSERT_BATCH must be at least 1");
        }
        if self.workers == 0 {
            anyhow::bail!("SITERAG_WORKERS must be at least 1");
        }
        Ok(())
    }

    /// 사이트 레지스트리 (SQLite) 경로
    pub fn sites_db_path(&self) -> PathBuf {
        self.data_dir.join("sites.db")
    }

    /// 벡터 저장소 (LanceDB) 경로
    pub fn vectors_path(&self) -> PathBuf {
        self.data_dir.join("vectors.lance")
    }
}

/// 환경변수 파싱 (미설정/빈 값이면 기본값)
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        _ => Ok(default),
    }
}

// ============================================================================
// Data Directory / API Key
// ============================================================================

/// 데이터 디렉토리 경로 (~/.siterag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".siterag")
}

/// API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_api_key() -> Result<String> {
    for name in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(name) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", name);
                return Ok(key);
            }
        }
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.upsert_batch_size, 100);
        assert!(settings.data_dir.ends_with(".siterag"));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let settings = Settings {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("SITERAG_CHUNK_OVERLAP"));
    }

    #[test]
    fn test_env_or_parses_and_reports_name() {
        std::env::set_var("SITERAG_TEST_NUMBER", "42");
        assert_eq!(env_or::<usize>("SITERAG_TEST_NUMBER", 1).unwrap(), 42);

        std::env::set_var("SITERAG_TEST_NUMBER", "forty-two");
        let err = env_or::<usize>("SITERAG_TEST_NUMBER", 1).unwrap_err();
        assert!(err.to_string().contains("SITERAG_TEST_NUMBER"));

        std::env::remove_var("SITERAG_TEST_NUMBER");
        assert_eq!(env_or::<usize>("SITERAG_TEST_NUMBER", 7).unwrap(), 7);
    }

    #[test]
    fn test_browser_engine_from_env() {
        std::env::set_var("SITERAG_TEST_ENGINE", "http");
        assert_eq!(
            env_or("SITERAG_TEST_ENGINE", BrowserEngine::Chrome).unwrap(),
            BrowserEngine::Http
        );

        std::env::set_var("SITERAG_TEST_ENGINE", "netscape");
        let err = env_or("SITERAG_TEST_ENGINE", BrowserEngine::Http).unwrap_err();
        assert!(err.to_string().contains("SITERAG_TEST_ENGINE"));
        std::env::remove_var("SITERAG_TEST_ENGINE");
    }

    #[test]
    fn test_store_paths_under_data_dir() {
        let settings = Settings {
            data_dir: PathBuf::from("/tmp/siterag-test"),
            ..Default::default()
        };
        assert_eq!(
            settings.sites_db_path(),
            PathBuf::from("/tmp/siterag-test/sites.db")
        );
        assert_eq!(
            settings.vectors_path(),
            PathBuf::from("/tmp/siterag-test/vectors.lance")
        );
    }
}
