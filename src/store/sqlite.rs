//! SQLite-backed [`Store`] implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::time::Duration;
use uuid::Uuid;

use super::Store;
use crate::config::Config;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::migrate;
use crate::models::{Chunk, Document, Link, StoreStats};

const DOCUMENT_COLUMNS: &str = "id, path, title, content, rendered, revision, category, \
                                subcategory, content_hash, updated_at";

/// Wraps a [`SqlitePool`] and translates every [`Store`] method into SQL
/// against the `documents`, `links` and `chunks` tables.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the configured database file in WAL mode
    /// with foreign keys on, then apply the schema.
    pub async fn open(config: &Config) -> Result<Self> {
        let path = &config.db.path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_document(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        path: row.get("path"),
        title: row.get("title"),
        content: row.get("content"),
        rendered: row.get("rendered"),
        revision: row.get("revision"),
        category: row.get("category"),
        subcategory: row.get("subcategory"),
        content_hash: row.get("content_hash"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_link(row: &SqliteRow) -> Link {
    Link {
        source_id: row.get("source_id"),
        target_id: row.get("target_id"),
        target_path: row.get("target_path"),
        link_text: row.get("link_text"),
    }
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let blob: Option<Vec<u8>> = row.get("embedding");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        vector: blob.map(|b| blob_to_vec(&b)),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    async fn get_document_by_path(&self, path: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE path = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents ORDER BY path",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    async fn ensure_stub(&self, path: &str, title: &str) -> Result<String> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, path, title, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(path) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(path)
        .bind(title)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        let id: String = sqlx::query_scalar("SELECT id FROM documents WHERE path = ?")
            .bind(path)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn write_document(&self, doc: &Document, links: &[Link]) -> Result<String> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, path, title, content, rendered, revision,
                                   category, subcategory, content_hash, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                rendered = excluded.rendered,
                revision = excluded.revision,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.path)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.rendered)
        .bind(&doc.revision)
        .bind(&doc.category)
        .bind(&doc.subcategory)
        .bind(&doc.content_hash)
        .bind(doc.updated_at)
        .execute(&mut *tx)
        .await?;

        let id: String = sqlx::query_scalar("SELECT id FROM documents WHERE path = ?")
            .bind(&doc.path)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM links WHERE source_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        for (position, link) in links.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO links (source_id, target_id, target_path, link_text, position)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&link.target_id)
            .bind(&link.target_path)
            .bind(&link.link_text)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    async fn set_category(
        &self,
        id: &str,
        category: Option<&str>,
        subcategory: Option<&str>,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE documents SET category = ?, subcategory = ? WHERE id = ?")
                .bind(category)
                .bind(subcategory)
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_document_by_path(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn links_from(&self, document_id: &str) -> Result<Vec<Link>> {
        let rows = sqlx::query(
            r#"
            SELECT source_id, target_id, target_path, link_text
            FROM links
            WHERE source_id = ?
            ORDER BY position
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_link).collect())
    }

    async fn links_to(&self, document_id: &str) -> Result<Vec<Link>> {
        let rows = sqlx::query(
            r#"
            SELECT l.source_id, l.target_id, l.target_path, l.link_text
            FROM links l
            JOIN documents d ON d.id = l.source_id
            WHERE l.target_id = ?
            ORDER BY d.path, l.position
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_link).collect())
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, text, embedding)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.vector.as_deref().map(vec_to_blob))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn chunks_for(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, text, embedding
            FROM chunks
            WHERE document_id = ?
            ORDER BY chunk_index
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn embedded_chunks(&self) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, text, embedding
            FROM chunks
            WHERE embedding IS NOT NULL
            ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM documents) AS documents,
                (SELECT COUNT(*) FROM links) AS links,
                (SELECT COUNT(*) FROM links WHERE target_id IS NULL) AS missing_links,
                (SELECT COUNT(*) FROM chunks) AS chunks,
                (SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL) AS embedded_chunks
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            documents: row.get("documents"),
            links: row.get("links"),
            missing_links: row.get("missing_links"),
            chunks: row.get("chunks"),
            embedded_chunks: row.get("embedded_chunks"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str, title: &str) -> Document {
        Document {
            id: Uuid::new_v4().to_string(),
            path: path.to_string(),
            title: title.to_string(),
            content: String::new(),
            rendered: String::new(),
            revision: None,
            category: None,
            subcategory: None,
            content_hash: String::new(),
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn test_open_creates_database_and_reopens() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join("state").join("nested").join("wiki.db");
        let config = Config::for_repo(tmp.path(), &db_path);

        let store = SqliteStore::open(&config).await.unwrap();
        assert!(db_path.exists());
        let id = store.write_document(&doc("a.md", "A"), &[]).await.unwrap();
        assert!(store.set_category(&id, Some("ops"), Some("deploy")).await.unwrap());
        store.close().await;

        // Opening again applies the schema a second time without losing rows.
        migrate::run_migrations(&config).await.unwrap();
        let store = SqliteStore::open(&config).await.unwrap();

        let mut rewritten = doc("a.md", "Renamed");
        rewritten.category = Some("ignored".to_string());
        assert_eq!(store.write_document(&rewritten, &[]).await.unwrap(), id);

        let stored = store.get_document(&id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Renamed");
        assert_eq!(stored.category.as_deref(), Some("ops"));
        assert_eq!(stored.subcategory.as_deref(), Some("deploy"));
        assert!(!store.set_category("missing", None, None).await.unwrap());
    }
}
