//! 링크 수집 - 정규화, 동일 도메인 확인, 비콘텐츠 URL 거부 목록

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

/// 페이지 당 수집 링크 수
pub const LINKS_PER_PAGE: usize = 5;

/// 비콘텐츠 경로 세그먼트 (인증, 결제, 관리자)
const DENIED_SEGMENTS: &[&str] = &[
    "login",
    "log-in",
    "signin",
    "sign-in",
    "signup",
    "sign-up",
    "register",
    "logout",
    "log-out",
    "signout",
    "sign-out",
    "auth",
    "oauth",
    "sso",
    "password",
    "reset-password",
    "forgot-password",
    "account",
    "my-account",
    "cart",
    "basket",
    "checkout",
    "payment",
    "admin",
    "administrator",
    "wp-admin",
    "wp-login.php",
    "dashboard",
    "cdn-cgi",
];

/// API 엔드포인트 경로 세그먼트
const API_SEGMENTS: &[&str] = &["api", "graphql", "wp-json", "rest", "ajax"];

/// 바이너리/비HTML 확장자
const BINARY_EXTENSIONS: &[&str] = &[
    "pdf", "zip", "rar", "7z", "tar", "gz", "tgz", "bz2", "exe", "dmg", "msi", "apk", "iso",
    "bin", "jpg", "jpeg", "png", "gif", "svg", "webp", "ico", "bmp", "tiff", "mp3", "mp4", "wav",
    "avi", "mov", "wmv", "webm", "ogg", "woff", "woff2", "ttf", "eot", "css", "js", "json", "xml",
    "rss", "atom", "csv", "xls", "xlsx", "doc", "docx", "ppt", "pptx",
];

/// 추적용 쿼리 파라미터
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "_ga", "_gl", "yclid", "igshid",
    "ref", "ref_src",
];

/// fragment 제거
pub fn normalize(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized
}

/// 루트 호스트와 같은 호스트인지
pub fn is_same_host(url: &Url, root_host: &str) -> bool {
    url.host_str()
        .is_some_and(|host| host.eq_ignore_ascii_case(root_host))
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// 비콘텐츠 URL 여부
pub fn is_denylisted(url: &Url) -> bool {
    let segments: Vec<String> = url
        .path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .map(|s| s.to_ascii_lowercase())
                .collect()
        })
        .unwrap_or_default();

    if segments
        .iter()
        .any(|s| DENIED_SEGMENTS.contains(&s.as_str()))
    {
        return true;
    }

    if segments
        .first()
        .is_some_and(|s| API_SEGMENTS.contains(&s.as_str()))
    {
        return true;
    }

    if let Some((_, ext)) = segments.last().and_then(|last| last.rsplit_once('.')) {
        if BINARY_EXTENSIONS.contains(&ext) {
            return true;
        }
    }

    // 추적 파라미터만 붙은 변형
    let mut pairs = url.query_pairs().peekable();
    if pairs.peek().is_some() && pairs.all(|(key, _)| is_tracking_param(&key)) {
        return true;
    }

    false
}

/// 페이지에서 다음 크롤링 대상 링크 수집
///
/// 페이지 URL 기준으로 해석하고 http(s), 동일 호스트, 거부 목록,
/// `seen` 중복을 거른 뒤 문서 순서대로 최대 `limit`개를 반환합니다.
pub fn harvest_links(
    document: &Html,
    page_url: &Url,
    root_host: &str,
    seen: &HashSet<String>,
    limit: usize,
) -> Vec<Url> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut picked: Vec<Url> = Vec::new();
    for anchor in document.select(&selector) {
        if picked.len() >= limit {
            break;
        }

        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }

        let Ok(resolved) = page_url.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }

        let candidate = normalize(&resolved);
        if !is_same_host(&candidate, root_host) || is_denylisted(&candidate) {
            continue;
        }
        if seen.contains(candidate.as_str()) || picked.contains(&candidate) {
            continue;
        }

        picked.push(candidate);
    }

    picked
}

// ============================================================================
// Tests
// ============================================================================
