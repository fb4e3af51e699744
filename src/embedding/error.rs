//! 외부 모델 API 에러 분류
//!
//! 임베딩/생성 호출 실패를 호출자가 분기할 수 있는 종류로 분류합니다.
//! 원시 예외 대신 항상 이 타입으로 노출됩니다.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// 분류된 API 에러
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// 401/403 - API 키 누락 또는 거부
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// 429 - 재시도 후에도 한도 초과
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// 기타 4xx - 요청 자체가 잘못됨
    #[error("bad request: {0}")]
    BadRequest(String),

    /// 연결 실패 또는 5xx
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// 요청 타임아웃
    #[error("timeout: {0}")]
    Timeout(String),

    /// 성공 응답이지만 예상한 형태가 아님
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ApiError {
    /// 에러 종류 식별자 (로그/상태 보고용)
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::RateLimited(_) => "rate_limited",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unreachable(_) => "unreachable",
            ApiError::Timeout(_) => "timeout",
            ApiError::MalformedResponse(_) => "malformed_response",
        }
    }

    /// 재시도 가치가 있는 에러인지
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited(_) | ApiError::Unreachable(_) | ApiError::Timeout(_)
        )
    }
}

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<GeminiErrorInfo>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorInfo {
    #[serde(default)]
    reason: String,
}

/// 잘못된 API 키 (Gemini는 400 INVALID_ARGUMENT로 응답)
const API_KEY_INVALID: &str = "API_KEY_INVALID";

fn is_invalid_api_key(parsed: Option<&GeminiError>, body: &str) -> bool {
    match parsed {
        Some(err) => {
            err.error.details.iter().any(|d| d.reason == API_KEY_INVALID)
                || err.error.message.contains("API key not valid")
        }
        None => body.contains(API_KEY_INVALID) || body.contains("API key not valid"),
    }
}

/// HTTP 상태 코드 + 응답 본문으로 에러 분류
pub fn classify_status(status: StatusCode, body: &str) -> ApiError {
    let parsed = serde_json::from_str::<GeminiError>(body).ok();
    let message = match &parsed {
        Some(err) if !err.error.status.is_empty() => {
            format!("{} ({}): {}", status, err.error.status, err.error.message)
        }
        Some(err) => format!("{}: {}", status, err.error.message),
        None => format!("{}: {}", status, body.trim()),
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized(message),
        StatusCode::BAD_REQUEST if is_invalid_api_key(parsed.as_ref(), body) => {
            ApiError::Unauthorized(message)
        }
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ApiError::Timeout(message),
        s if s.is_server_error() => ApiError::Unreachable(message),
        _ => ApiError::BadRequest(message),
    }
}

/// 전송 계층 에러 분류
pub fn classify_transport(err: &reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout(err.to_string())
    } else if err.is_decode() {
        ApiError::MalformedResponse(err.to_string())
    } else {
        ApiError::Unreachable(err.to_string())
    }
}
