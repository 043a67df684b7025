//! Scheme - Table SQL and the scheme checksum file
//!
//! TigerStyle: The schema is derived, never hand-written; its checksum is
//! persisted so a restart against a changed entity set fails loudly.
//!
//! # Checksum file
//!
//! ```json
//! { "checksum": 2914343741, "tables": ["largebinaryentity"] }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::entity::{EntityDescriptor, FieldDescriptor};
use super::error::{StorageError, StorageResult};
use super::field::FieldRetriever;

// =============================================================================
// SQL
// =============================================================================

/// `CREATE TABLE` statement for an entity.
#[must_use]
pub fn create_table_sql(descriptor: &EntityDescriptor, fields: &[FieldDescriptor]) -> String {
    let columns: Vec<String> = fields
        .iter()
        .map(|field| {
            let constraint = if field.id { "PRIMARY KEY" } else { "NOT NULL" };
            format!("{} {} {constraint}", field.name, field.kind.sql_type())
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        descriptor.table_name(),
        columns.join(", ")
    )
}

/// Parameterized `INSERT` statement for an entity.
#[must_use]
pub fn insert_sql(descriptor: &EntityDescriptor, fields: &[FieldDescriptor]) -> String {
    let names: Vec<&str> = fields.iter().map(|f| f.name).collect();
    let placeholders: Vec<String> = (1..=fields.len()).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        descriptor.table_name(),
        names.join(", "),
        placeholders.join(", ")
    )
}

/// `SELECT` of every row, ordered by identifier.
#[must_use]
pub fn select_all_sql(descriptor: &EntityDescriptor, fields: &[FieldDescriptor]) -> String {
    let names: Vec<&str> = fields.iter().map(|f| f.name).collect();
    let order = fields
        .iter()
        .find(|f| f.id)
        .map_or_else(String::new, |id| format!(" ORDER BY {}", id.name));
    format!(
        "SELECT {} FROM {}{order}",
        names.join(", "),
        descriptor.table_name()
    )
}

// =============================================================================
// Scheme Checksum
// =============================================================================

/// Checksum over the table definitions of a set of managed entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeChecksum {
    /// CRC32 over the sorted `CREATE TABLE` statements
    pub checksum: u32,
    /// Table names covered, sorted
    pub tables: Vec<String>,
}

/// Outcome of comparing the current schema against the checksum file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeState {
    /// No checksum file yet: the schema is new
    New,
    /// Checksum file matches the current schema
    Unchanged,
}

impl SchemeChecksum {
    /// Compute the checksum for `entities` as the field retriever maps them.
    #[must_use]
    pub fn compute(entities: &[&'static EntityDescriptor], retriever: &dyn FieldRetriever) -> Self {
        let mut statements: Vec<(String, String)> = entities
            .iter()
            .map(|&descriptor| {
                let fields = retriever.relevant_fields(descriptor);
                (descriptor.table_name(), create_table_sql(descriptor, &fields))
            })
            .collect();
        statements.sort();

        let mut hasher = crc32fast::Hasher::new();
        for (_, statement) in &statements {
            hasher.update(statement.as_bytes());
            hasher.update(b";");
        }

        Self {
            checksum: hasher.finalize(),
            tables: statements.into_iter().map(|(table, _)| table).collect(),
        }
    }

    /// Read a checksum file; `None` if it does not exist.
    ///
    /// # Errors
    /// Returns `StorageError::Io` on read failure, `StorageError::Internal`
    /// if the file is not a checksum document.
    pub async fn read(path: &Path) -> StorageResult<Option<Self>> {
        match tokio::fs::read(path).await {
            Ok(raw) => serde_json::from_slice(&raw).map(Some).map_err(|e| {
                StorageError::internal(format!(
                    "malformed scheme checksum file {}: {e}",
                    path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    /// Write this checksum to `path`, replacing any previous content.
    ///
    /// # Errors
    /// Returns `StorageError::Io` on write failure.
    pub async fn write(&self, path: &Path) -> StorageResult<()> {
        let raw = serde_json::to_vec_pretty(self)
            .map_err(|e| StorageError::internal(format!("failed to serialize checksum: {e}")))?;
        tokio::fs::write(path, raw)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    /// Compare against the file at `path`, recording the checksum if absent.
    ///
    /// # Errors
    /// Returns `StorageError::SchemeChanged` on mismatch, I/O errors otherwise.
    pub async fn verify_or_record(&self, path: &Path) -> StorageResult<SchemeState> {
        match Self::read(path).await? {
            None => {
                self.write(path).await?;
                tracing::info!(path = %path.display(), checksum = self.checksum, "recorded new scheme");
                Ok(SchemeState::New)
            }
            Some(recorded) if recorded.checksum == self.checksum => Ok(SchemeState::Unchanged),
            Some(recorded) => Err(StorageError::SchemeChanged {
                expected: recorded.checksum,
                actual: self.checksum,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::entity::{Entity, FieldKind, LargeBinaryEntity};
    use crate::storage::field::CachedFieldRetriever;
    use tempfile::TempDir;

    static NOTE: EntityDescriptor = EntityDescriptor {
        name: "Note",
        fields: &[
            FieldDescriptor::id("id"),
            FieldDescriptor::column("body", FieldKind::Text),
        ],
    };

    fn large_binary_fields() -> std::sync::Arc<[FieldDescriptor]> {
        CachedFieldRetriever::new().relevant_fields(LargeBinaryEntity::descriptor())
    }

    #[test]
    fn test_create_table_sql() {
        let sql = create_table_sql(LargeBinaryEntity::descriptor(), &large_binary_fields());
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS largebinaryentity (id BIGINT PRIMARY KEY, data BYTEA NOT NULL)"
        );
    }

    #[test]
    fn test_insert_and_select_sql() {
        let fields = large_binary_fields();
        assert_eq!(
            insert_sql(LargeBinaryEntity::descriptor(), &fields),
            "INSERT INTO largebinaryentity (id, data) VALUES ($1, $2)"
        );
        assert_eq!(
            select_all_sql(LargeBinaryEntity::descriptor(), &fields),
            "SELECT id, data FROM largebinaryentity ORDER BY id"
        );
    }

    #[test]
    fn test_checksum_is_order_independent() {
        let retriever = CachedFieldRetriever::new();
        let a = SchemeChecksum::compute(&[LargeBinaryEntity::descriptor(), &NOTE], &retriever);
        let b = SchemeChecksum::compute(&[&NOTE, LargeBinaryEntity::descriptor()], &retriever);

        assert_eq!(a, b);
        assert_eq!(a.tables, vec!["largebinaryentity", "note"]);
    }

    #[test]
    fn test_checksum_changes_with_entities() {
        let retriever = CachedFieldRetriever::new();
        let one = SchemeChecksum::compute(&[LargeBinaryEntity::descriptor()], &retriever);
        let two = SchemeChecksum::compute(&[LargeBinaryEntity::descriptor(), &NOTE], &retriever);

        assert_ne!(one.checksum, two.checksum);
    }

    #[tokio::test]
    async fn test_verify_or_record_lifecycle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scheme-checksum");
        let retriever = CachedFieldRetriever::new();
        let one = SchemeChecksum::compute(&[LargeBinaryEntity::descriptor()], &retriever);
        let two = SchemeChecksum::compute(&[LargeBinaryEntity::descriptor(), &NOTE], &retriever);

        assert_eq!(one.verify_or_record(&path).await.unwrap(), SchemeState::New);
        assert!(path.is_file());
        assert_eq!(one.verify_or_record(&path).await.unwrap(), SchemeState::Unchanged);

        let err = two.verify_or_record(&path).await.unwrap_err();
        assert!(matches!(err, StorageError::SchemeChanged { .. }));
    }

    #[tokio::test]
    async fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scheme-checksum");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let err = SchemeChecksum::read(&path).await.unwrap_err();
        assert!(matches!(err, StorageError::Internal { .. }));
    }
}
