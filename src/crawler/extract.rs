//! Text Extractor - 렌더링된 HTML을 텍스트로 변환
//!
//! 의미 밀도가 높은 순서로 수집합니다:
//! title → meta description/keywords → 헤딩 → 링크 → 이미지 → 폼 컨트롤
//! → body 깊이 우선 순회 (텍스트 노드 + 텍스트 속성).
//!
//! 공백을 정리하고, 2자 미만 조각을 버리고, 첫 등장 순서를 유지하며
//! 중복을 제거한 뒤 빈 줄로 이어 붙입니다.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Node, Selector};

/// 조각 구분자
pub const FRAGMENT_SEPARATOR: &str = "\n\n";

/// 조각 최소 길이 (문자 수)
const MIN_FRAGMENT_CHARS: usize = 2;

/// body 순회 시 건너뛰는 요소 (비가시/비콘텐츠)
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "header", "footer", "iframe", "video",
    "audio", "object", "embed", "svg", "canvas", "picture", "source", "track", "map",
];

/// body 순회 시 수집하는 속성
const TEXT_ATTRIBUTES: &[&str] = &[
    "alt",
    "title",
    "placeholder",
    "aria-label",
    "value",
    "content",
    "aria-describedby",
    "aria-labelledby",
];

// ============================================================================
// Public API
// ============================================================================

/// HTML 문자열에서 텍스트 추출
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    extract_document(&document)
}

/// 파싱된 문서에서 텍스트 추출
pub fn extract_document(document: &Html) -> String {
    let mut fragments = Fragments::default();

    collect_priority(document, &mut fragments);

    if let Some(body) = select(document, "body").into_iter().next() {
        collect_body(body, &mut fragments);
    }

    fragments.join()
}

// ============================================================================
// Fragments
// ============================================================================

/// 순서 유지 + 중복 제거 조각 목록
#[derive(Default)]
struct Fragments {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl Fragments {
    fn push(&mut self, raw: &str) {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.chars().count() < MIN_FRAGMENT_CHARS {
            return;
        }
        if self.seen.insert(collapsed.clone()) {
            self.ordered.push(collapsed);
        }
    }

    fn join(self) -> String {
        self.ordered.join(FRAGMENT_SEPARATOR)
    }
}

// ============================================================================
// Priority Sections
// ============================================================================

fn select<'a>(document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => document.select(&selector).collect(),
        Err(e) => {
            tracing::warn!("Invalid selector {}: {:?}", css, e);
            Vec::new()
        }
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

fn collect_priority(document: &Html, out: &mut Fragments) {
    // 제목
    for title in select(document, "title") {
        out.push(&element_text(&title));
    }

    // meta description → keywords
    let metas = select(document, "meta[name]");
    for wanted in ["description", "keywords"] {
        for meta in &metas {
            let name = meta.value().attr("name").unwrap_or_default();
            if name.eq_ignore_ascii_case(wanted) {
                if let Some(content) = meta.value().attr("content") {
                    out.push(content);
                }
            }
        }
    }

    // 헤딩 (문서 순서)
    for heading in select(document, "h1, h2, h3, h4, h5, h6") {
        out.push(&element_text(&heading));
    }

    // 링크 텍스트 + title
    for anchor in select(document, "a") {
        out.push(&element_text(&anchor));
        if let Some(title) = anchor.value().attr("title") {
            out.push(title);
        }
    }

    // 이미지 alt/title
    for image in select(document, "img") {
        for attr in ["alt", "title"] {
            if let Some(value) = image.value().attr(attr) {
                out.push(value);
            }
        }
    }

    // 폼 컨트롤
    for control in select(document, "input, textarea, select, button") {
        for attr in ["placeholder", "value", "aria-label"] {
            if attr == "value" && is_secret_input(&control) {
                continue;
            }
            if let Some(value) = control.value().attr(attr) {
                out.push(value);
            }
        }
    }
}

// ============================================================================
// Body Traversal
// ============================================================================

/// body 깊이 우선 순회 (명시적 스택, 문서 순서 유지)
fn collect_body(body: ElementRef<'_>, out: &mut Fragments) {
    let mut stack = vec![*body];

    while let Some(node) = stack.pop() {
        match node.value() {
            Node::Text(text) => out.push(text),
            Node::Element(_) => {
                let Some(element) = ElementRef::wrap(node) else {
                    continue;
                };
                if is_skipped(&element) {
                    continue;
                }

                for attr in TEXT_ATTRIBUTES {
                    if *attr == "value" && is_secret_input(&element) {
                        continue;
                    }
                    if let Some(value) = element.value().attr(attr) {
                        out.push(value);
                    }
                }

                let children: Vec<_> = node.children().collect();
                stack.extend(children.into_iter().rev());
            }
            _ => {}
        }
    }
}

/// 비가시/비콘텐츠 요소 여부
fn is_skipped(element: &ElementRef<'_>) -> bool {
    let el = element.value();
    let name = el.name().to_ascii_lowercase();

    if SKIPPED_TAGS.contains(&name.as_str()) {
        return true;
    }
    if el.attr("hidden").is_some() {
        return true;
    }
    if el
        .attr("aria-hidden")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    {
        return true;
    }
    if name == "input" && el.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden")) {
        return true;
    }

    el.attr("style").is_some_and(|style| {
        let compact: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        compact.contains("display:none") || compact.contains("visibility:hidden")
    })
}

/// 값을 노출하면 안 되는 입력 (hidden, password)
fn is_secret_input(element: &ElementRef<'_>) -> bool {
    let el = element.value();
    el.name().eq_ignore_ascii_case("input")
        && el.attr("type").is_some_and(|t| {
            t.eq_ignore_ascii_case("hidden") || t.eq_ignore_ascii_case("password")
        })
}

// ============================================================================
// Tests
// ============================================================================
