//! Object repository
//!
//! Stores documents of every class in the `objects` table. Field data is a
//! JSON text column; conditions compile through [`crate::query::sql`].

use crate::db::DynDatabasePool;
use crate::models::{parse_timestamp, wire_timestamp, Document};
use crate::query::{sql, Query};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::sync::Arc;

/// Object repository trait
#[async_trait]
pub trait ObjectRepository: Send + Sync {
    /// Run a query and return the matching documents
    async fn find(&self, query: &Query) -> Result<Vec<Document>>;

    /// Count documents matching a query (paging ignored)
    async fn count(&self, query: &Query) -> Result<u64>;

    /// Get a document by class and id
    async fn get(&self, class_name: &str, object_id: &str) -> Result<Option<Document>>;

    /// Insert a new document
    async fn create(&self, doc: &Document) -> Result<Document>;

    /// Overwrite the fields of an existing document
    async fn update(&self, doc: &Document) -> Result<Document>;

    /// Delete a document; returns whether it existed
    async fn delete(&self, class_name: &str, object_id: &str) -> Result<bool>;

    /// Insert and update many documents in one transaction
    async fn save_many(&self, inserts: &[Document], updates: &[Document]) -> Result<()>;
}

/// SQLx-based object repository implementation
pub struct SqlxObjectRepository {
    pool: DynDatabasePool,
}

impl SqlxObjectRepository {
    /// Create a new SQLx object repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ObjectRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl ObjectRepository for SqlxObjectRepository {
    async fn find(&self, query: &Query) -> Result<Vec<Document>> {
        find_objects(self.pool.sqlite(), query).await
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        count_objects(self.pool.sqlite(), query).await
    }

    async fn get(&self, class_name: &str, object_id: &str) -> Result<Option<Document>> {
        get_object(self.pool.sqlite(), class_name, object_id).await
    }

    async fn create(&self, doc: &Document) -> Result<Document> {
        let mut tx = self.pool.sqlite().begin().await?;
        insert_object(&mut tx, doc).await?;
        tx.commit().await.context("Failed to commit object insert")?;
        Ok(doc.clone())
    }

    async fn update(&self, doc: &Document) -> Result<Document> {
        let mut tx = self.pool.sqlite().begin().await?;
        update_object(&mut tx, doc).await?;
        tx.commit().await.context("Failed to commit object update")?;
        Ok(doc.clone())
    }

    async fn delete(&self, class_name: &str, object_id: &str) -> Result<bool> {
        delete_object(self.pool.sqlite(), class_name, object_id).await
    }

    async fn save_many(&self, inserts: &[Document], updates: &[Document]) -> Result<()> {
        let mut tx = self.pool.sqlite().begin().await?;
        for doc in inserts {
            insert_object(&mut tx, doc).await?;
        }
        for doc in updates {
            update_object(&mut tx, doc).await?;
        }
        tx.commit().await.context("Failed to commit batch save")?;
        Ok(())
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn find_objects(pool: &SqlitePool, query: &Query) -> Result<Vec<Document>> {
    let mut builder = sql::select(query)?;
    let rows = builder
        .build()
        .fetch_all(pool)
        .await
        .context("Failed to query objects")?;

    rows.iter().map(row_to_document).collect()
}

async fn count_objects(pool: &SqlitePool, query: &Query) -> Result<u64> {
    let mut builder = sql::count(query)?;
    let row = builder
        .build()
        .fetch_one(pool)
        .await
        .context("Failed to count objects")?;

    let count: i64 = row.get(0);
    Ok(count.max(0) as u64)
}

async fn get_object(pool: &SqlitePool, class_name: &str, object_id: &str) -> Result<Option<Document>> {
    let row = sqlx::query(
        r#"
        SELECT object_id, class_name, data, created_at, updated_at
        FROM objects
        WHERE class_name = ? AND object_id = ?
        "#,
    )
    .bind(class_name)
    .bind(object_id)
    .fetch_optional(pool)
    .await
    .context("Failed to get object")?;

    match row {
        Some(row) => Ok(Some(row_to_document(&row)?)),
        None => Ok(None),
    }
}

async fn insert_object(tx: &mut Transaction<'_, Sqlite>, doc: &Document) -> Result<()> {
    let data = serde_json::to_string(&doc.fields).context("Failed to encode object data")?;

    sqlx::query(
        r#"
        INSERT INTO objects (object_id, class_name, data, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&doc.object_id)
    .bind(&doc.class_name)
    .bind(data)
    .bind(wire_timestamp(doc.created_at))
    .bind(wire_timestamp(doc.updated_at))
    .execute(&mut **tx)
    .await
    .with_context(|| format!("Failed to create {} object", doc.class_name))?;

    Ok(())
}

async fn update_object(tx: &mut Transaction<'_, Sqlite>, doc: &Document) -> Result<()> {
    let data = serde_json::to_string(&doc.fields).context("Failed to encode object data")?;

    let result = sqlx::query(
        r#"
        UPDATE objects
        SET data = ?, updated_at = ?
        WHERE class_name = ? AND object_id = ?
        "#,
    )
    .bind(data)
    .bind(wire_timestamp(doc.updated_at))
    .bind(&doc.class_name)
    .bind(&doc.object_id)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("Failed to update {} object", doc.class_name))?;

    if result.rows_affected() == 0 {
        return Err(anyhow!(
            "{} object {} does not exist",
            doc.class_name,
            doc.object_id
        ));
    }
    Ok(())
}

async fn delete_object(pool: &SqlitePool, class_name: &str, object_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM objects WHERE class_name = ? AND object_id = ?")
        .bind(class_name)
        .bind(object_id)
        .execute(pool)
        .await
        .context("Failed to delete object")?;

    Ok(result.rows_affected() > 0)
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let data: String = row.get("data");
    let fields: Map<String, Value> = match serde_json::from_str(&data) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => return Err(e).context("Stored object data is not valid JSON"),
    };
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let created_at = parse_timestamp(&created_at)
        .ok_or_else(|| anyhow!("Invalid created_at timestamp: {}", created_at))?;
    let updated_at = parse_timestamp(&updated_at).unwrap_or(created_at);

    Ok(Document {
        object_id: row.get("object_id"),
        class_name: row.get("class_name"),
        fields,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use proptest::prelude::*;
    use serde_json::json;

    async fn setup_test_repo() -> (DynDatabasePool, SqlxObjectRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let repo = SqlxObjectRepository::new(pool.clone());
        (pool, repo)
    }

    fn tracking(fields: Value) -> Document {
        Document::new("Tracking", fields.as_object().cloned().unwrap())
    }

    async fn seed(repo: &SqlxObjectRepository) -> Vec<Document> {
        let docs = vec![
            tracking(json!({"containerNo": "MSCU1000001", "billNo": "B1", "arrivalDate": "2024-01-10", "customsStatus": "released"})),
            tracking(json!({"containerNo": "MSCU1000002", "billNo": "B2", "arrivalDate": "2024-01-20", "customsStatus": ""})),
            tracking(json!({"containerNo": "TGHU2000003", "billNo": "B3", "arrivalDate": "2024-02-05"})),
            tracking(json!({"containerNo": "TGHU2000004", "billNo": "B4", "arrivalDate": "", "pieces": 12, "urgent": true})),
        ];
        for doc in &docs {
            repo.create(doc).await.expect("Failed to create object");
        }
        docs
    }

    #[tokio::test]
    async fn test_create_and_get_object() {
        let (_pool, repo) = setup_test_repo().await;
        let doc = tracking(json!({"containerNo": "C1", "attachments": [{"id": 1}]}));
        repo.create(&doc).await.expect("Failed to create object");

        let found = repo
            .get("Tracking", &doc.object_id)
            .await
            .expect("Failed to get object")
            .expect("Object not found");
        assert_eq!(found.fields, doc.fields);
        assert_eq!(wire_timestamp(found.created_at), wire_timestamp(doc.created_at));

        let other_class = repo.get("Link", &doc.object_id).await.unwrap();
        assert!(other_class.is_none());
    }

    #[tokio::test]
    async fn test_update_missing_object_fails() {
        let (_pool, repo) = setup_test_repo().await;
        let doc = tracking(json!({"containerNo": "C1"}));
        assert!(repo.update(&doc).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_object() {
        let (_pool, repo) = setup_test_repo().await;
        let doc = tracking(json!({"containerNo": "C1"}));
        repo.create(&doc).await.unwrap();

        assert!(repo.delete("Tracking", &doc.object_id).await.unwrap());
        assert!(!repo.delete("Tracking", &doc.object_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_with_conditions() {
        let (_pool, repo) = setup_test_repo().await;
        seed(&repo).await;

        let found = repo
            .find(&Query::new("Tracking").contains("containerNo", "TGHU"))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let not_released = repo
            .find(&Query::new("Tracking").not_equal_to("customsStatus", "released"))
            .await
            .unwrap();
        assert_eq!(not_released.len(), 3);

        let january = repo
            .find(
                &Query::new("Tracking")
                    .greater_than_or_equal_to("arrivalDate", "2024-01-01")
                    .less_than_or_equal_to("arrivalDate", "2024-01-31")
                    .descending("arrivalDate"),
            )
            .await
            .unwrap();
        let bills: Vec<_> = january.iter().filter_map(|d| d.get_str("billNo")).collect();
        assert_eq!(bills, vec!["B2", "B1"]);

        let typed = repo
            .find(&Query::new("Tracking").equal_to("pieces", 12).equal_to("urgent", true))
            .await
            .unwrap();
        assert_eq!(typed.len(), 1);

        let missing = repo
            .find(&Query::new("Tracking").does_not_exist("customsStatus"))
            .await
            .unwrap();
        assert_eq!(missing.len(), 2);
    }

    #[tokio::test]
    async fn test_count_ignores_paging() {
        let (_pool, repo) = setup_test_repo().await;
        seed(&repo).await;

        let query = Query::new("Tracking").contains("containerNo", "MSCU").limit(1).skip(1);
        assert_eq!(repo.count(&query).await.unwrap(), 2);
        assert_eq!(repo.find(&query).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_many_is_atomic() {
        let (_pool, repo) = setup_test_repo().await;
        let existing = tracking(json!({"containerNo": "C1"}));
        repo.create(&existing).await.unwrap();

        let fresh = tracking(json!({"containerNo": "C2"}));
        let ghost = tracking(json!({"containerNo": "ghost"}));
        let result = repo.save_many(&[fresh.clone()], &[ghost]).await;
        assert!(result.is_err());
        assert_eq!(repo.count(&Query::new("Tracking")).await.unwrap(), 1);

        let mut changed = existing.clone();
        changed.merge(json!({"remark": "ok"}).as_object().cloned().unwrap());
        repo.save_many(&[fresh], &[changed]).await.unwrap();
        assert_eq!(repo.count(&Query::new("Tracking")).await.unwrap(), 2);
        let reloaded = repo.get("Tracking", &existing.object_id).await.unwrap().unwrap();
        assert_eq!(reloaded.get_str("remark"), Some("ok"));
    }

    fn arb_doc() -> impl Strategy<Value = Value> {
        (
            prop::sample::select(vec!["MSCU", "TGHU", "CMAU"]),
            0u32..50,
            prop::option::of(prop::sample::select(vec!["released", "suspended", ""])),
            prop::option::of(0i64..20),
        )
            .prop_map(|(prefix, n, status, pieces)| {
                let mut map = Map::new();
                map.insert("containerNo".into(), json!(format!("{}{:07}", prefix, n)));
                if let Some(status) = status {
                    map.insert("customsStatus".into(), json!(status));
                }
                if let Some(pieces) = pieces {
                    map.insert("pieces".into(), json!(pieces));
                }
                Value::Object(map)
            })
    }

    fn arb_query() -> impl Strategy<Value = Query> {
        (
            prop::option::of(prop::sample::select(vec!["MSCU", "TGHU", "00001"])),
            prop::option::of(prop::sample::select(vec!["released", "suspended"])),
            prop::option::of(0i64..20),
            any::<bool>(),
        )
            .prop_map(|(needle, status, min_pieces, exists)| {
                let mut query = Query::new("Tracking").ascending("containerNo");
                if let Some(needle) = needle {
                    query = query.contains("containerNo", needle);
                }
                if let Some(status) = status {
                    query = query.not_equal_to("customsStatus", status);
                }
                if let Some(min) = min_pieces {
                    query = query.greater_than_or_equal_to("pieces", min);
                }
                if exists {
                    query = query.exists("customsStatus");
                }
                query
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// SQL evaluation agrees with in-memory evaluation
        #[test]
        fn prop_sql_matches_in_memory(docs in prop::collection::vec(arb_doc(), 0..12), query in arb_query()) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let (_pool, repo) = setup_test_repo().await;
                let docs: Vec<Document> = docs.into_iter().map(tracking).collect();
                for doc in &docs {
                    repo.create(doc).await.unwrap();
                }

                let from_sql: Vec<String> = repo
                    .find(&query)
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|d| d.object_id)
                    .collect();
                let mut expected: Vec<&Document> = docs.iter().filter(|d| query.matches(d)).collect();
                expected.sort_by(|a, b| a.get_str("containerNo").cmp(&b.get_str("containerNo")));

                // Stable sort keeps insertion order on ties, like the id tiebreak
                let expected_ids: Vec<String> = expected.iter().map(|d| d.object_id.clone()).collect();
                assert_eq!(from_sql, expected_ids);
                assert_eq!(repo.count(&query).await.unwrap() as usize, expected.len());
            });
        }
    }
}
