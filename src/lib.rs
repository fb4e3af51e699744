//! siterag - 웹사이트 크롤링 기반 RAG 지식베이스
//!
//! 사이트를 너비 우선으로 크롤링하여 텍스트를 추출하고, 청크로 분할해
//! 임베딩한 뒤 LanceDB에 색인합니다. 질의 시에는 테넌트/사이트 필터로
//! 검색한 청크를 근거로 답변을 생성합니다.

pub mod cli;
pub mod config;
pub mod crawler;
pub mod embedding;
pub mod generation;
pub mod ingest;
pub mod knowledge;
pub mod policy;
pub mod rag;

// Re-exports
pub use config::{get_api_key, get_data_dir, has_api_key, Settings};
pub use crawler::{CrawlOutcome, CrawlRequest, Crawler, CrawlerConfig, Fetcher, Page};
pub use embedding::{EmbeddingProvider, GeminiEmbedding};
pub use generation::{GeminiGeneration, GenerationProvider};
pub use ingest::{IngestQueue, JobPhase, JobStatus};
pub use knowledge::{LanceVectorStore, SiteRegistry, VectorRecord, VectorStore};
pub use policy::{PolicyVerdict, StandardUrlPolicy, UrlPolicy};
pub use rag::{AnswerEngine, AskRequest, RagAnswer};
