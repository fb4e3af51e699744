//! Robots Filter - robots.txt 파싱 및 URL 허용 판정
//!
//! 크롤링 당 한 번 로드합니다. 파일이 없거나 가져오기에 실패하면
//! 제한 없이 진행합니다. 규칙 해석은 spider의 robots 파서에 맡깁니다.

use spider::packages::robotparser::parser::RobotFileParser;
use url::Url;

/// robots.txt 에이전트 토큰
pub const ROBOTS_AGENT: &str = "siterag";

/// robots.txt 최대 크기
const MAX_ROBOTS_BYTES: usize = 512 * 1024;

/// 크롤링 한 번에 적용할 robots 정책
pub struct RobotsPolicy {
    /// `None`이면 모든 URL 허용
    parser: Option<Box<RobotFileParser>>,
    agent: String,
    rule_lines: usize,
}

impl RobotsPolicy {
    /// 모든 URL 허용
    pub fn allow_all() -> Self {
        Self {
            parser: None,
            agent: ROBOTS_AGENT.to_string(),
            rule_lines: 0,
        }
    }

    /// robots.txt 본문 파싱
    pub fn parse(body: &str, agent: &str) -> Self {
        let lines: Vec<String> = body.lines().map(str::to_string).collect();
        let rule_lines = lines.iter().filter(|line| is_rule_line(line)).count();

        let mut parser: Box<RobotFileParser> = RobotFileParser::new().into();
        parser.parse(&lines);

        Self {
            parser: Some(parser),
            agent: agent.to_string(),
            rule_lines,
        }
    }

    /// URL 허용 여부
    pub fn is_allowed(&mut self, url: &Url) -> bool {
        match self.parser.as_mut() {
            Some(parser) => parser.can_fetch(self.agent.as_str(), url.as_str()),
            None => true,
        }
    }

    /// 파싱된 Allow/Disallow 줄 수
    pub fn rule_count(&self) -> usize {
        self.rule_lines
    }

    /// 루트 URL 기준 `/robots.txt` 로드
    pub async fn fetch(client: &reqwest::Client, root: &Url, agent: &str) -> Self {
        let robots_url = match root.join("/robots.txt") {
            Ok(u) => u,
            Err(_) => return Self::allow_all(),
        };

        let response = match client.get(robots_url.as_str()).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("robots.txt unavailable at {}: {}", robots_url, e);
                return Self::allow_all();
            }
        };

        if !response.status().is_success() {
            tracing::debug!(
                "robots.txt returned {} at {}, crawling unrestricted",
                response.status(),
                robots_url
            );
            return Self::allow_all();
        }

        match response.text().await {
            Ok(body) => {
                let body: String = body.chars().take(MAX_ROBOTS_BYTES).collect();
                let policy = Self::parse(&body, agent);
                tracing::debug!("Loaded robots.txt with {} rules", policy.rule_count());
                policy
            }
            Err(e) => {
                tracing::debug!("Failed to read robots.txt: {}", e);
                Self::allow_all()
            }
        }
    }
}

fn is_rule_line(line: &str) -> bool {
    let line = line.split('#').next().unwrap_or_default().trim();
    match line.split_once(':') {
        Some((key, value)) => {
            let key = key.trim().to_ascii_lowercase();
            (key == "allow" || key == "disallow") && !value.trim().is_empty()
        }
        None => false,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(policy: &mut RobotsPolicy, path: &str) -> bool {
        policy.is_allowed(&Url::parse(&format!("https://a.com{}", path)).unwrap())
    }

    #[test]
    fn test_disallowed_prefix_is_blocked() {
        let robots = "\
User-agent: *
Disallow: /private
";
        let mut policy = RobotsPolicy::parse(robots, ROBOTS_AGENT);
        assert!(allowed(&mut policy, "/"));
        assert!(allowed(&mut policy, "/blog/post"));
        assert!(!allowed(&mut policy, "/private"));
        assert!(!allowed(&mut policy, "/private/data"));
    }

    #[test]
    fn test_specific_agent_group_overrides_wildcard() {
        let robots = "\
User-agent: siterag
Disallow: /drafts

User-agent: *
Disallow: /
";
        let mut policy = RobotsPolicy::parse(robots, ROBOTS_AGENT);
        assert!(allowed(&mut policy, "/blog"));
        assert!(!allowed(&mut policy, "/drafts/1"));

        let mut other = RobotsPolicy::parse(robots, "otherbot");
        assert!(!allowed(&mut other, "/blog"));
    }

    #[test]
    fn test_empty_disallow_allows_everything() {
        let mut open = RobotsPolicy::parse("User-agent: *\nDisallow:\n", ROBOTS_AGENT);
        assert!(allowed(&mut open, "/anything"));
        assert_eq!(open.rule_count(), 0);
    }

    #[test]
    fn test_comments_are_ignored() {
        let robots = "\
# comment line
User-agent: *   # shared group
Disallow: /tmp # trailing comment
";
        let mut policy = RobotsPolicy::parse(robots, ROBOTS_AGENT);
        assert!(!allowed(&mut policy, "/tmp/file"));
        assert!(allowed(&mut policy, "/about"));
        assert_eq!(policy.rule_count(), 1);
    }

    #[test]
    fn test_allow_all_policy() {
        let mut policy = RobotsPolicy::allow_all();
        assert!(allowed(&mut policy, "/admin"));
        assert_eq!(policy.rule_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_missing_robots_allows_all() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/robots.txt")
            .with_status(404)
            .create_async()
            .await;

        let root = Url::parse(&server.url()).unwrap();
        let mut policy = RobotsPolicy::fetch(&reqwest::Client::new(), &root, ROBOTS_AGENT).await;
        assert_eq!(policy.rule_count(), 0);
        assert!(allowed(&mut policy, "/anything"));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host_allows_all() {
        // 닫힌 포트
        let root = Url::parse("http://127.0.0.1:9/").unwrap();
        let mut policy = RobotsPolicy::fetch(&reqwest::Client::new(), &root, ROBOTS_AGENT).await;
        assert!(allowed(&mut policy, "/anything"));
    }

    #[tokio::test]
    async fn test_fetch_parses_served_robots() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/robots.txt")
            .with_status(200)
            .with_body("User-agent: *\nDisallow: /secret\n")
            .create_async()
            .await;

        let root = Url::parse(&format!("{}/some/page", server.url())).unwrap();
        let mut policy = RobotsPolicy::fetch(&reqwest::Client::new(), &root, ROBOTS_AGENT).await;
        assert!(!allowed(&mut policy, "/secret/x"));
        assert!(allowed(&mut policy, "/public"));
    }
}
