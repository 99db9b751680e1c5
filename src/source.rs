//! Postgres-backed document source, read in bulk once at startup.

use anyhow::{Context, Result};
use pgvector::Vector;
use tokio_postgres::{Client, NoTls};
use tracing::error;

use crate::chunks::ChunkRecord;

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        anyhow::ensure!(!schema.trim().is_empty(), "schema name is required");
        anyhow::ensure!(!table.trim().is_empty(), "table name is required");
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Connects to Postgres and spawns the background connection driver.
pub async fn connect(database_url: &str) -> Result<Client> {
    let (client, connection) = tokio_postgres::connect(database_url, NoTls)
        .await
        .with_context(|| format!("failed to connect to Postgres at {database_url}"))?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!("postgres connection error: {err}");
        }
    });
    Ok(client)
}

/// Reads the whole chunk corpus in one pass.
///
/// Rows come back ordered by id: the identifier map and index rows are built
/// from this sequence, and a load-from-disk startup must observe the same
/// order or the manifest check aborts it.
pub async fn fetch_chunks(client: &Client, table: &TableName) -> Result<Vec<ChunkRecord>> {
    let sql = format!(
        "SELECT id, text, embedding FROM {} ORDER BY id",
        table.qualified()
    );
    let rows = client
        .query(&sql, &[])
        .await
        .context("failed to read the chunk corpus")?;
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let id: String = row.get("id");
        let text: String = row.get("text");
        let embedding: Vector = row.get("embedding");
        records.push(ChunkRecord {
            id,
            text,
            embedding: embedding.to_vec(),
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names_are_quoted() {
        let table = TableName::new("public", "chunks").expect("table");
        assert_eq!(table.qualified(), "\"public\".\"chunks\"");
    }

    #[test]
    fn embedded_quotes_are_escaped() {
        let table = TableName::new("pub\"lic", "chunks").expect("table");
        assert_eq!(table.qualified(), "\"pub\"\"lic\".\"chunks\"");
    }

    #[test]
    fn blank_identifiers_are_rejected() {
        assert!(TableName::new("", "chunks").is_err());
        assert!(TableName::new("public", "  ").is_err());
    }
}
