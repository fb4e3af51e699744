//! Knowledge 모듈 - 청킹, 벡터 저장, 사이트 레코드
//!
//! - Chunker: 고정 크기 + 오버랩 텍스트 분할
//! - Vector: 벡터 저장소 계약 (upsert / filtered query)
//! - Lance: LanceDB 구현
//! - Sites: 수집 결과 영속화 싱크 (SQLite)

mod chunker;
mod lance;
mod sites;
mod vector;

// Re-exports
pub use chunker::{chunk_text, Chunk, ChunkConfig, ChunkError, MAX_CHUNK_SIZE};
pub use lance::LanceVectorStore;
pub use sites::{SiteRecord, SiteRegistry, SiteSink, SiteStatus, SiteSummary};
pub use vector::{
    validate_query, validate_records, MetadataFilter, RecordMetadata, RetrievalHit,
    VectorRecord, VectorStore, VectorStoreError, MAX_TOP_K, TEXT_PREVIEW_CHARS,
};
