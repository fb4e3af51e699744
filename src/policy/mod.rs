//! Policy Gate - 크롤링 전 URL 안전성 검사
//!
//! 프로토콜, 호스트, DNS 해석 결과의 사설/루프백 대역을 검사합니다.
//! 수집 요청은 큐에 넣기 전에 반드시 이 게이트를 통과해야 합니다.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// 거부 사유
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported protocol: {0}")]
    UnsupportedScheme(String),

    #[error("URL host is missing")]
    MissingHost,

    #[error("localhost is not allowed")]
    Localhost,

    #[error("address {0} is in a private or reserved range")]
    PrivateAddress(IpAddr),

    #[error("host could not be resolved: {0}")]
    Unresolvable(String),
}

/// 검사 결과 `{ valid, reason? }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyVerdict {
    pub valid: bool,
    pub reason: Option<String>,
}

impl PolicyVerdict {
    pub fn allow() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

impl From<Result<(), PolicyError>> for PolicyVerdict {
    fn from(result: Result<(), PolicyError>) -> Self {
        match result {
            Ok(()) => Self::allow(),
            Err(e) => Self::deny(e.to_string()),
        }
    }
}

/// URL 정책 트레이트
#[async_trait]
pub trait UrlPolicy: Send + Sync {
    async fn validate(&self, url: &str) -> PolicyVerdict;
}

// ============================================================================
// StandardUrlPolicy
// ============================================================================

/// 기본 정책: http(s), 호스트 필수, localhost/사설 대역 거부
#[derive(Debug, Clone)]
pub struct StandardUrlPolicy {
    resolve_dns: bool,
}

impl Default for StandardUrlPolicy {
    fn default() -> Self {
        Self { resolve_dns: true }
    }
}

impl StandardUrlPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// DNS 해석 없이 정적 검사만 수행
    pub fn without_dns() -> Self {
        Self { resolve_dns: false }
    }

    /// 정적 검사 (스킴, 호스트, IP 리터럴)
    pub fn check_static(&self, raw: &str) -> Result<Url, PolicyError> {
        let url = Url::parse(raw.trim()).map_err(|e| PolicyError::InvalidUrl(e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(PolicyError::UnsupportedScheme(url.scheme().to_string()));
        }

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_ascii_lowercase(),
            _ => return Err(PolicyError::MissingHost),
        };

        if host == "localhost" || host.ends_with(".localhost") {
            return Err(PolicyError::Localhost);
        }

        let literal = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = literal.parse::<IpAddr>() {
            ensure_public(ip)?;
        }

        Ok(url)
    }

    async fn check(&self, raw: &str) -> Result<(), PolicyError> {
        let url = self.check_static(raw)?;
        if !self.resolve_dns {
            return Ok(());
        }

        let host = url.host_str().unwrap_or_default();
        let literal = host.trim_start_matches('[').trim_end_matches(']');
        if literal.parse::<IpAddr>().is_ok() {
            return Ok(());
        }

        let port = url.port_or_known_default().unwrap_or(80);
        let addresses = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| PolicyError::Unresolvable(format!("{}: {}", host, e)))?;

        let mut resolved = false;
        for address in addresses {
            resolved = true;
            ensure_public(address.ip())?;
        }
        if !resolved {
            return Err(PolicyError::Unresolvable(host.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl UrlPolicy for StandardUrlPolicy {
    async fn validate(&self, url: &str) -> PolicyVerdict {
        let result = self.check(url).await;
        if let Err(e) = &result {
            tracing::debug!("URL rejected by policy: {} ({})", url, e);
        }
        result.into()
    }
}

// ============================================================================
// IP Classification
// ============================================================================

fn ensure_public(ip: IpAddr) -> Result<(), PolicyError> {
    if is_blocked_ip(ip) {
        return Err(PolicyError::PrivateAddress(ip));
    }
    Ok(())
}

/// 사설/루프백/링크로컬/예약 대역 여부
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => is_blocked_ipv6(v6),
    }
}

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.is_multicast()
        || a == 0
        || (a == 100 && (64..=127).contains(&b))
        || a >= 240
}

fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(mapped);
    }

    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

// ============================================================================
// Tests
// ============================================================================
