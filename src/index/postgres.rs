//! Postgres + pgvector backed index.

use std::fmt;

use async_trait::async_trait;
use pgvector::Vector;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use super::{FieldBound, IndexEntry, QueryResult, SearchFilter, VectorIndex};
use crate::error::{ConfigError, IndexError};

/// Connection settings for [`PgVectorIndex`].
#[derive(Clone)]
pub struct PgVectorConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// Schema holding the table.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Declared `VECTOR(n)` width.
    pub dimensions: usize,
}

impl PgVectorConfig {
    /// Default schema and table for the given connection string.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            schema: "public".to_string(),
            table: "recipes_embeddings".to_string(),
            dimensions: crate::EMBEDDING_DIMENSIONS,
        }
    }
}

impl fmt::Debug for PgVectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgVectorConfig")
            .field("database_url", &"<redacted>")
            .field("schema", &self.schema)
            .field("table", &self.table)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self, ConfigError>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        if schema.trim().is_empty() {
            return Err(ConfigError::Invalid("schema name is required".into()));
        }
        if table.trim().is_empty() {
            return Err(ConfigError::Invalid("table name is required".into()));
        }
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Returns the raw schema string.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Returns the raw table string.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Name of the HNSW cosine index on the embedding column.
    pub fn hnsw_index_name(&self) -> String {
        format!(
            "{}_{}_embedding_hnsw_idx",
            sanitize_ident(&self.schema),
            sanitize_ident(&self.table)
        )
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn sanitize_ident(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

/// Index holding one Postgres connection for its whole lifetime.
pub struct PgVectorIndex {
    client: Mutex<Client>,
    connection: JoinHandle<()>,
    table: TableName,
    dimensions: usize,
}

impl fmt::Debug for PgVectorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgVectorIndex")
            .field("table", &self.table)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl PgVectorIndex {
    /// Opens the connection. Call [`ensure_schema`](Self::ensure_schema) before use.
    pub async fn connect(config: &PgVectorConfig) -> Result<Self, IndexError> {
        if config.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("database URL is required".into()).into());
        }
        if config.dimensions == 0 {
            return Err(ConfigError::Invalid("embedding dimension must be positive".into()).into());
        }
        let table = TableName::new(config.schema.clone(), config.table.clone())?;
        let (client, connection) = tokio_postgres::connect(&config.database_url, NoTls)
            .await
            .map_err(IndexError::Connect)?;
        let connection = tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "postgres connection error");
            }
        });
        debug!(table = %table.qualified(), "connected to vector index");
        Ok(Self {
            client: Mutex::new(client),
            connection,
            table,
            dimensions: config.dimensions,
        })
    }

    /// Target table.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Creates the extension, table and HNSW index when missing, then checks
    /// that an existing table was built for the configured dimensionality.
    pub async fn ensure_schema(&self) -> Result<(), IndexError> {
        let client = self.client.lock().await;
        client
            .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
            .await
            .map_err(|err| IndexError::postgres("failed to ensure pgvector extension", err))?;
        let schema = format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_ident(self.table.schema())
        );
        client
            .execute(&schema, &[])
            .await
            .map_err(|err| IndexError::postgres("failed to ensure schema", err))?;
        client
            .execute(&create_table_sql(&self.table, self.dimensions), &[])
            .await
            .map_err(|err| IndexError::postgres("failed to create embeddings table", err))?;

        let row = client
            .query_opt(
                "SELECT a.atttypmod FROM pg_attribute a \
                 WHERE a.attrelid = to_regclass($1) \
                   AND a.attname = 'embedding' AND NOT a.attisdropped",
                &[&self.table.qualified()],
            )
            .await
            .map_err(|err| IndexError::postgres("failed to inspect embeddings table", err))?;
        let declared = row.map(|row| row.get::<_, i32>(0)).unwrap_or(-1);
        if declared > 0 && declared as usize != self.dimensions {
            return Err(ConfigError::DimensionMismatch {
                expected: declared as usize,
                actual: self.dimensions,
            }
            .into());
        }

        let index = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING hnsw (embedding vector_cosine_ops)",
            quote_ident(&self.table.hnsw_index_name()),
            self.table.qualified()
        );
        client
            .execute(&index, &[])
            .await
            .map_err(|err| IndexError::postgres("failed to ensure HNSW index", err))?;
        info!(table = %self.table.qualified(), dimensions = self.dimensions, "vector index ready");
        Ok(())
    }

    /// Releases the connection and waits for its task to finish.
    pub async fn close(self) {
        drop(self.client);
        if let Err(err) = self.connection.await {
            error!(error = %err, "postgres connection task failed");
        }
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn count(&self) -> Result<u64, IndexError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table.qualified());
        let client = self.client.lock().await;
        match client.query_one(&sql, &[]).await {
            Ok(row) => Ok(row.get::<_, i64>(0).max(0) as u64),
            Err(err) if err.code() == Some(&SqlState::UNDEFINED_TABLE) => Ok(0),
            Err(err) => Err(IndexError::postgres("failed to count embeddings", err)),
        }
    }

    async fn add(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }
        for entry in &entries {
            if entry.embedding.len() != self.dimensions {
                return Err(ConfigError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: entry.embedding.len(),
                }
                .into());
            }
        }

        let sql = insert_sql(&self.table);
        let mut client = self.client.lock().await;
        let transaction = client
            .transaction()
            .await
            .map_err(|err| IndexError::postgres("failed to open transaction", err))?;
        let statement = transaction
            .prepare(&sql)
            .await
            .map_err(|err| IndexError::postgres("failed to prepare insert", err))?;
        for entry in entries {
            let IndexEntry {
                content,
                embedding,
                metadata,
            } = entry;
            let vector = Vector::from(embedding);
            let metadata = Value::Object(metadata);
            transaction
                .execute(&statement, &[&content, &metadata, &vector])
                .await
                .map_err(|err| IndexError::postgres("failed to insert chunk", err))?;
        }
        transaction
            .commit()
            .await
            .map_err(|err| IndexError::postgres("failed to commit batch", err))?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<QueryResult>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.dimensions {
            return Err(ConfigError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            }
            .into());
        }
        filter.validate()?;

        let sql = select_sql(&self.table, filter);
        let query = Vector::from(vector.to_vec());
        let limit = k as i64;
        let thresholds: Vec<f64> = filter
            .bounds()
            .iter()
            .map(|bound| bound.bound.threshold())
            .collect();
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&query, &limit];
        for (FieldBound { field, .. }, threshold) in filter.bounds().iter().zip(&thresholds) {
            params.push(field);
            params.push(threshold);
        }

        let client = self.client.lock().await;
        let rows = match client.query(sql.as_str(), &params).await {
            Ok(rows) => rows,
            Err(err) if err.code() == Some(&SqlState::UNDEFINED_TABLE) => return Ok(Vec::new()),
            Err(err) => return Err(IndexError::postgres("failed to search embeddings", err)),
        };
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(idx, row)| {
                let metadata = match row.get::<_, Value>("metadata") {
                    Value::Object(map) => map,
                    _ => Default::default(),
                };
                QueryResult {
                    rank: idx + 1,
                    content: row.get("content"),
                    metadata,
                    distance: row.get::<_, f64>("distance") as f32,
                }
            })
            .collect())
    }
}

fn create_table_sql(table: &TableName, dims: usize) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id BIGSERIAL PRIMARY KEY,
            content TEXT NOT NULL,
            metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            embedding VECTOR({dims}) NOT NULL
        )",
        table.qualified()
    )
}

fn insert_sql(table: &TableName) -> String {
    format!(
        "INSERT INTO {} (content, metadata, embedding) VALUES ($1, $2, $3)",
        table.qualified()
    )
}

fn select_sql(table: &TableName, filter: &SearchFilter) -> String {
    let clauses: Vec<String> = filter
        .bounds()
        .iter()
        .enumerate()
        .map(|(idx, FieldBound { bound, .. })| {
            let field = idx * 2 + 3;
            let value = field + 1;
            format!(
                "COALESCE(CASE WHEN jsonb_typeof(metadata -> ${field}::text) = 'number' \
                 THEN (metadata ->> ${field}::text)::float8 END, 0) {} ${value}::float8",
                bound.sql_operator()
            )
        })
        .collect();
    let predicate = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {} ", clauses.join(" AND "))
    };
    format!(
        "SELECT \
            content, \
            metadata, \
            (embedding <=> $1)::float8 AS distance \
        FROM {} \
        {predicate}\
        ORDER BY embedding <=> $1 ASC \
        LIMIT $2",
        table.qualified()
    )
}
