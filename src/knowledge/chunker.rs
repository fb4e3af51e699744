//! Text Chunking Module
//!
//! 고정 크기 + 오버랩 윈도우로 텍스트를 분할합니다.
//! 크기와 오버랩은 문자(char) 단위이므로 UTF-8 경계가 깨지지 않습니다.
//!
//! 청크 크기 `S`, 오버랩 `O`일 때 윈도우 시작 위치는 `S - O`씩 전진하며
//! 마지막 윈도우가 텍스트 끝에 닿을 때까지 반복합니다.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 허용되는 최대 청크 크기
pub const MAX_CHUNK_SIZE: usize = 10_000;

// ============================================================================
// Types
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 청크 크기 (문자 수, 1 ~ 10000)
    pub size: usize,
    /// 오버랩 크기 (문자 수, size 미만)
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            size: crate::config::DEFAULT_CHUNK_SIZE,
            overlap: crate::config::DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkConfig {
    pub fn new(size: usize, overlap: usize) -> Result<Self, ChunkError> {
        let config = Self { size, overlap };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.size == 0 || self.size > MAX_CHUNK_SIZE {
            return Err(ChunkError::InvalidSize(self.size));
        }
        if self.overlap >= self.size {
            return Err(ChunkError::InvalidOverlap {
                overlap: self.overlap,
                size: self.size,
            });
        }
        Ok(())
    }

    /// 윈도우 시작 위치 간격
    pub fn stride(&self) -> usize {
        self.size - self.overlap
    }
}

/// 페이지 내 청크
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 페이지 내 위치 인덱스 (0-based, 빈 청크 제외 후 순번)
    pub index: usize,
    /// trim 된 청크 텍스트 (항상 비어있지 않음)
    pub text: String,
}

/// 청킹 입력 검증 실패
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk size must be between 1 and 10000, got {0}")]
    InvalidSize(usize),

    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    InvalidOverlap { overlap: usize, size: usize },

    #[error("text to chunk is empty")]
    EmptyText,
}

// ============================================================================
// Chunking
// ============================================================================

/// 텍스트를 청크로 분할
///
/// 각 윈도우는 trim 되며 공백뿐인 윈도우는 버려집니다.
/// 같은 입력에 대해 항상 같은 결과를 반환합니다.
pub fn chunk_text(text: &str, config: ChunkConfig) -> Result<Vec<Chunk>, ChunkError> {
    config.validate()?;
    if text.trim().is_empty() {
        return Err(ChunkError::EmptyText);
    }

    Ok(windows(text, config)
        .into_iter()
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .enumerate()
        .map(|(index, w)| Chunk {
            index,
            text: w.to_string(),
        })
        .collect())
}

/// trim 전 원시 윈도우 목록
///
/// 시작 위치 `0, S-O, 2(S-O), ...`이 텍스트 길이 미만인 동안 생성합니다.
fn windows(text: &str, config: ChunkConfig) -> Vec<&str> {
    // char 인덱스 -> byte 오프셋 (끝 위치 포함)
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = offsets.len() - 1;

    let mut result = Vec::with_capacity(char_count / config.stride() + 1);
    let mut start = 0;
    while start < char_count {
        let end = (start + config.size).min(char_count);
        result.push(&text[offsets[start]..offsets[end]]);
        start += config.stride();
    }
    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn test_stride_and_tail() {
        let config = ChunkConfig::new(4, 1).unwrap();
        let chunks = chunk_text("abcdefghij", config).unwrap();
        assert_eq!(texts(&chunks), vec!["abcd", "defg", "ghij", "j"]);
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn test_no_overlap() {
        let config = ChunkConfig::new(4, 0).unwrap();
        let chunks = chunk_text("abcdefgh", config).unwrap();
        assert_eq!(texts(&chunks), vec!["abcd", "efgh"]);
    }

    #[test]
    fn test_text_shorter_than_size() {
        let config = ChunkConfig::new(100, 10).unwrap();
        let chunks = chunk_text("  short text  ", config).unwrap();
        assert_eq!(texts(&chunks), vec!["short text"]);
    }

    #[test]
    fn test_whitespace_windows_dropped_and_reindexed() {
        let config = ChunkConfig::new(3, 0).unwrap();
        let chunks = chunk_text("abc   def", config).unwrap();
        assert_eq!(texts(&chunks), vec!["abc", "def"]);
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn test_invalid_parameters() {
        assert_eq!(ChunkConfig::new(0, 0), Err(ChunkError::InvalidSize(0)));
        assert_eq!(
            ChunkConfig::new(10_001, 0),
            Err(ChunkError::InvalidSize(10_001))
        );
        assert_eq!(
            ChunkConfig::new(4, 4),
            Err(ChunkError::InvalidOverlap {
                overlap: 4,
                size: 4
            })
        );

        // 검증을 거치지 않은 설정도 패닉 없이 거부
        let raw = ChunkConfig {
            size: 5,
            overlap: 9,
        };
        assert!(matches!(
            chunk_text("hello world", raw),
            Err(ChunkError::InvalidOverlap { .. })
        ));
    }

    #[test]
    fn test_empty_text_rejected() {
        let config = ChunkConfig::new(4, 1).unwrap();
        assert_eq!(chunk_text("", config), Err(ChunkError::EmptyText));
        assert_eq!(chunk_text(" \n\t ", config), Err(ChunkError::EmptyText));
    }

    #[test]
    fn test_coverage_without_gaps() {
        let text = "The quick brown fox jumps over the lazy dog while 세계 watches.";
        for size in 1..12 {
            for overlap in 0..size {
                let config = ChunkConfig::new(size, overlap).unwrap();
                let raw = windows(text, config);

                // 오버랩 제거 후 이어붙이면 원문과 동일
                let mut rebuilt: String = raw[0].to_string();
                for window in &raw[1..] {
                    rebuilt.extend(window.chars().skip(overlap));
                }
                assert_eq!(rebuilt, text, "size={} overlap={}", size, overlap);
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "lorem ipsum dolor sit amet ".repeat(50);
        let config = ChunkConfig::new(64, 16).unwrap();
        assert_eq!(
            chunk_text(&text, config).unwrap(),
            chunk_text(&text, config).unwrap()
        );
    }

    #[test]
    fn test_multibyte_boundaries() {
        let config = ChunkConfig::new(2, 0).unwrap();
        let chunks = chunk_text("안녕하세요", config).unwrap();
        assert_eq!(texts(&chunks), vec!["안녕", "하세", "요"]);
    }
}
