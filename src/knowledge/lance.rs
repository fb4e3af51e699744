//! LanceDB Vector Store - 청크 벡터 저장 및 필터 검색
//!
//! `id` 컬럼 기준 merge insert로 upsert 하므로 같은 레코드를 다시 쓰면
//! 덮어쓰기가 됩니다. 테넌트/사이트 필터는 SQL 조건으로 전달됩니다.
//!
//! 테이블은 첫 쓰기 때 생성되며, 생성은 저장소 내부 락으로 직렬화됩니다.
//! 기존 테이블의 벡터 폭이 설정 차원과 다르면 `DimensionMismatch`를 반환합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::{Connection, CreateTableMode};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::Table;
use tokio::sync::Mutex;

use super::vector::{
    validate_query, validate_records, MetadataFilter, RecordMetadata, RetrievalHit,
    VectorRecord, VectorStore, VectorStoreError,
};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "site_chunks";

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
pub struct LanceVectorStore {
    db: Connection,
    dimension: usize,
    /// 열린 테이블 캐시 (생성/열기 직렬화)
    table: Mutex<Option<Table>>,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 벡터 차원 (임베딩 차원과 같아야 함)
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Vector dimension must be positive");
        }

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            db,
            dimension,
            table: Mutex::new(None),
        })
    }

    /// 벡터 테이블 스키마
    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("tenant_key", DataType::Utf8, false),
            Field::new("website", DataType::Utf8, false),
            Field::new("url", DataType::Utf8, false),
            Field::new("text_preview", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                false,
            ),
        ])
    }

    /// 레코드들을 Arrow RecordBatch로 변환
    fn records_to_batch(&self, records: &[VectorRecord]) -> Result<RecordBatch, VectorStoreError> {
        let column = |f: fn(&VectorRecord) -> &str| -> Arc<dyn Array> {
            Arc::new(StringArray::from(records.iter().map(f).collect::<Vec<_>>()))
        };

        let flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.values.iter().copied())
            .collect();
        let vectors = FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            self.dimension as i32,
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| VectorStoreError::Other(format!("vector column: {}", e)))?;

        RecordBatch::try_new(
            Arc::new(self.schema()),
            vec![
                column(|r| r.id.as_str()),
                column(|r| r.metadata.tenant_key.as_str()),
                column(|r| r.metadata.website.as_str()),
                column(|r| r.metadata.url.as_str()),
                column(|r| r.metadata.text_preview.as_str()),
                Arc::new(vectors),
            ],
        )
        .map_err(|e| VectorStoreError::Other(format!("record batch: {}", e)))
    }

    /// 기존 테이블 (없으면 None)
    async fn existing_table(&self) -> Result<Option<Table>, VectorStoreError> {
        let mut cached = self.table.lock().await;
        if let Some(table) = cached.as_ref() {
            return Ok(Some(table.clone()));
        }

        match self.db.open_table(TABLE_NAME).execute().await {
            Ok(table) => {
                self.check_dimension(&table).await?;
                *cached = Some(table.clone());
                Ok(Some(table))
            }
            Err(lancedb::Error::TableNotFound { .. }) => Ok(None),
            Err(e) => Err(store_error("open table")(e)),
        }
    }

    /// 쓰기용 테이블 (없으면 생성)
    ///
    /// 락을 잡은 채로 열기/생성을 수행하므로 동시 첫 쓰기가 경합하지 않습니다.
    /// 다른 프로세스가 먼저 만든 경우에도 `exist_ok`로 기존 테이블을 엽니다.
    async fn writable_table(&self) -> Result<Table, VectorStoreError> {
        let mut cached = self.table.lock().await;
        if let Some(table) = cached.as_ref() {
            return Ok(table.clone());
        }

        let table = match self.db.open_table(TABLE_NAME).execute().await {
            Ok(table) => table,
            Err(lancedb::Error::TableNotFound { .. }) => {
                tracing::info!("Creating vector table {} ({} dims)", TABLE_NAME, self.dimension);
                self.db
                    .create_empty_table(TABLE_NAME, Arc::new(self.schema()))
                    .mode(CreateTableMode::exist_ok(|builder| builder))
                    .execute()
                    .await
                    .map_err(store_error("create table"))?
            }
            Err(e) => return Err(store_error("open table")(e)),
        };

        self.check_dimension(&table).await?;
        *cached = Some(table.clone());
        Ok(table)
    }

    /// 테이블 벡터 폭과 설정 차원 비교
    async fn check_dimension(&self, table: &Table) -> Result<(), VectorStoreError> {
        let schema = table.schema().await.map_err(store_error("read table schema"))?;
        let width = schema
            .field_with_name("vector")
            .ok()
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, width) => Some(*width as usize),
                _ => None,
            })
            .ok_or_else(|| VectorStoreError::InvalidInput("table has no vector column".to_string()))?;

        if width != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: width,
                actual: self.dimension,
            });
        }
        Ok(())
    }
}

/// lancedb 에러를 분류된 에러로 변환
fn store_error(action: &'static str) -> impl Fn(lancedb::Error) -> VectorStoreError {
    move |e| classify_lance_error(action, e)
}

fn classify_lance_error(action: &str, e: lancedb::Error) -> VectorStoreError {
    let message = format!("failed to {}: {}", action, e);
    match e {
        lancedb::Error::TableNotFound { .. } => VectorStoreError::NotFound(message),
        lancedb::Error::InvalidInput { .. }
        | lancedb::Error::InvalidTableName { .. }
        | lancedb::Error::Schema { .. } => VectorStoreError::InvalidInput(message),
        lancedb::Error::ObjectStore { ref source } => {
            let detail = source.to_string().to_lowercase();
            if detail.contains("permission") || detail.contains("unauthenticated") {
                VectorStoreError::Auth(message)
            } else if detail.contains("not found") {
                VectorStoreError::NotFound(message)
            } else {
                VectorStoreError::Other(message)
            }
        }
        _ => VectorStoreError::Other(message),
    }
}

/// SQL 문자열 리터럴 이스케이프
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// 메타데이터 필터 -> LanceDB 조건식
fn filter_predicate(filter: &MetadataFilter) -> String {
    let mut predicate = format!("tenant_key = {}", sql_literal(&filter.tenant_key));
    if let Some(ref website) = filter.website {
        predicate.push_str(&format!(" AND website = {}", sql_literal(website)));
    }
    predicate
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, VectorStoreError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| VectorStoreError::Other(format!("missing {} column", name)))
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, VectorStoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        validate_records(records, self.dimension)?;

        let batch = self.records_to_batch(records)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let table = self.writable_table().await?;
        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(batches))
            .await
            .map_err(store_error("upsert vectors"))?;

        tracing::debug!("Upserted {} vectors", records.len());
        Ok(records.len())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievalHit>, VectorStoreError> {
        validate_query(vector, top_k, self.dimension)?;

        let Some(table) = self.existing_table().await? else {
            return Ok(vec![]);
        };

        let stream = table
            .vector_search(vector.to_vec())
            .map_err(store_error("create vector search"))?
            .only_if(filter_predicate(filter))
            .limit(top_k)
            .execute()
            .await
            .map_err(store_error("execute vector search"))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(store_error("read search results"))?;

        let mut hits = Vec::new();
        for batch in batches {
            let ids = string_column(&batch, "id")?;
            let tenants = string_column(&batch, "tenant_key")?;
            let websites = string_column(&batch, "website")?;
            let urls = string_column(&batch, "url")?;
            let previews = string_column(&batch, "text_preview")?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| VectorStoreError::Other("missing _distance column".to_string()))?;

            for i in 0..batch.num_rows() {
                hits.push(RetrievalHit {
                    chunk_id: ids.value(i).to_string(),
                    // L2 거리 -> 유사도 근사
                    score: 1.0 / (1.0 + distances.value(i)),
                    metadata: RecordMetadata {
                        url: urls.value(i).to_string(),
                        website: websites.value(i).to_string(),
                        text_preview: previews.value(i).to_string(),
                        tenant_key: tenants.value(i).to_string(),
                    },
                });
            }
        }

        Ok(hits)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        let Some(table) = self.existing_table().await? else {
            return Ok(0);
        };

        table
            .count_rows(None)
            .await
            .map_err(store_error("count rows"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 4;

    fn record(tenant: &str, url: &str, website: &str, index: usize, values: [f32; DIM]) -> VectorRecord {
        VectorRecord::for_chunk(
            tenant,
            url,
            website,
            index,
            &format!("chunk {} of {}", index, url),
            values.to_vec(),
        )
    }

    async fn open_store(dir: &TempDir) -> LanceVectorStore {
        LanceVectorStore::open(&dir.path().join("test.lance"), DIM)
            .await
            .unwrap()
    }

    #[test]
    fn test_filter_predicate_escapes_quotes() {
        let filter = MetadataFilter::tenant("o'brien").with_website("example.com");
        assert_eq!(
            filter_predicate(&filter),
            "tenant_key = 'o''brien' AND website = 'example.com'"
        );
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_ids() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        assert_eq!(store.count().await.unwrap(), 0);

        let records = vec![
            record("t1", "https://a.com/", "a.com", 0, [1.0, 0.0, 0.0, 0.0]),
            record("t1", "https://a.com/", "a.com", 1, [0.0, 1.0, 0.0, 0.0]),
        ];
        assert_eq!(store.upsert(&records).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 2);

        // 재수집: 같은 ID는 덮어쓰기
        assert_eq!(store.upsert(&records).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_query_respects_tenant_and_website_filter() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store
            .upsert(&[
                record("t1", "https://a.com/", "a.com", 0, [1.0, 0.0, 0.0, 0.0]),
                record("t1", "https://b.com/", "b.com", 0, [1.0, 0.1, 0.0, 0.0]),
                record("t2", "https://a.com/", "a.com", 0, [1.0, 0.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let query = [1.0, 0.0, 0.0, 0.0];
        let hits = store
            .query(&query, 10, &MetadataFilter::tenant("t1"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.metadata.tenant_key == "t1"));

        let hits = store
            .query(&query, 10, &MetadataFilter::tenant("t1").with_website("b.com"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.url, "https://b.com/");
        assert!(hits[0].score > 0.0 && hits[0].score <= 1.0);
    }

    #[tokio::test]
    async fn test_query_on_empty_store_returns_nothing() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let hits = store
            .query(&[0.0; DIM], 5, &MetadataFilter::tenant("t1"))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_writes_share_one_table() {
        for round in 0..5 {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(open_store(&dir).await);

            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let store = Arc::clone(&store);
                    tokio::spawn(async move {
                        let url = format!("https://site{}.com/", i);
                        store
                            .upsert(&[record("t1", &url, "site.com", 0, [1.0, 0.0, 0.0, i as f32])])
                            .await
                    })
                })
                .collect();

            for handle in handles {
                let result = handle.await.unwrap();
                assert!(result.is_ok(), "round {}: {:?}", round, result);
            }
            assert_eq!(store.count().await.unwrap(), 4);
        }
    }

    #[tokio::test]
    async fn test_reopen_with_different_dimension_is_classified() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.lance");

        let store = LanceVectorStore::open(&path, DIM).await.unwrap();
        store
            .upsert(&[record("t1", "https://a.com/", "a.com", 0, [1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();
        drop(store);

        let wider = LanceVectorStore::open(&path, 8).await.unwrap();
        let mut record = record("t1", "https://a.com/", "a.com", 1, [0.0; DIM]);
        record.values = vec![0.5; 8];

        let err = wider.upsert(&[record]).await.unwrap_err();
        assert_eq!(
            err,
            VectorStoreError::DimensionMismatch {
                expected: DIM,
                actual: 8
            }
        );

        let err = wider
            .query(&[0.5; 8], 5, &MetadataFilter::tenant("t1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "dimension_mismatch");
        assert_eq!(wider.count().await.unwrap_err().kind(), "dimension_mismatch");
    }

    #[test]
    fn test_lance_errors_are_classified() {
        let not_found = classify_lance_error(
            "open table",
            lancedb::Error::TableNotFound {
                name: TABLE_NAME.to_string(),
            },
        );
        assert_eq!(not_found.kind(), "not_found");

        let invalid = classify_lance_error(
            "create table",
            lancedb::Error::Schema {
                message: "schema mismatch".to_string(),
            },
        );
        assert_eq!(invalid.kind(), "invalid_input");

        let other = classify_lance_error(
            "upsert vectors",
            lancedb::Error::Runtime {
                message: "boom".to_string(),
            },
        );
        assert_eq!(other.kind(), "other");
        assert!(other.to_string().contains("failed to upsert vectors"));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected_before_write() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let mut bad = record("t1", "https://a.com/", "a.com", 0, [1.0, 0.0, 0.0, 0.0]);
        bad.values = vec![1.0, 2.0];
        let err = store.upsert(&[bad]).await.unwrap_err();
        assert_eq!(err.kind(), "dimension_mismatch");
        assert_eq!(store.count().await.unwrap(), 0);

        let err = store
            .query(&[1.0], 5, &MetadataFilter::tenant("t1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "dimension_mismatch");
    }
}
