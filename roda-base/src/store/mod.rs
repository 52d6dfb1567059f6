use async_trait::async_trait;
use eyre::{Result, WrapErr};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

mod local;
mod s3;

pub use local::LocalStore;
pub use s3::S3Store;

/// Errors from the object-store adapters.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// The backing service rejected or failed the request.
    #[error("object store request failed: {0}")]
    Request(String),
    /// Local filesystem failure (local store only).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A bucket of keyed blobs. S3 in deployment; a directory tree in tests and
/// local runs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object. `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ObjectStoreError>;

    /// Store an object.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str)
        -> Result<(), ObjectStoreError>;

    /// List keys under a prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;

    /// Server-side copy within the bucket.
    async fn copy(&self, from: &str, to: &str) -> Result<(), ObjectStoreError>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
}

/// Fetch an object that must exist.
pub async fn get_required(store: &dyn ObjectStore, key: &str) -> Result<Vec<u8>> {
    store
        .get(key)
        .await
        .wrap_err_with(|| format!("fetching {key}"))?
        .ok_or_else(|| eyre::eyre!("object {key} does not exist"))
}

/// Read and parse a YAML object.
pub async fn read_yaml<T: DeserializeOwned>(store: &dyn ObjectStore, key: &str) -> Result<T> {
    let raw = get_required(store, key).await?;
    serde_yaml::from_slice(&raw).wrap_err_with(|| format!("parsing {key} as YAML"))
}

/// Read and parse a JSON object.
pub async fn read_json<T: DeserializeOwned>(store: &dyn ObjectStore, key: &str) -> Result<T> {
    let raw = get_required(store, key).await?;
    serde_json::from_slice(&raw).wrap_err_with(|| format!("parsing {key} as JSON"))
}

/// Read a headered CSV object into typed rows.
pub async fn read_csv<T: DeserializeOwned>(store: &dyn ObjectStore, key: &str) -> Result<Vec<T>> {
    let raw = get_required(store, key).await?;
    let mut reader = csv::Reader::from_reader(raw.as_slice());
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row.wrap_err_with(|| format!("parsing a row of {key}"))?);
    }
    Ok(rows)
}

/// Serialize rows as headered CSV and store them atomically.
pub async fn write_csv<T: Serialize>(
    store: &dyn ObjectStore,
    key: &str,
    rows: &[T],
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let body = writer.into_inner().wrap_err("flushing CSV buffer")?;
    put_atomic(store, key, body, "text/csv").await
}

/// Serialize a value as YAML and store it.
pub async fn write_yaml<T: Serialize>(store: &dyn ObjectStore, key: &str, value: &T) -> Result<()> {
    let body = serde_yaml::to_string(value)?;
    store
        .put(key, body.into_bytes(), "application/yaml")
        .await
        .wrap_err_with(|| format!("writing {key}"))
}

/// Serialize a value as JSON and store it.
pub async fn write_json<T: Serialize>(store: &dyn ObjectStore, key: &str, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    store
        .put(key, body, "application/json")
        .await
        .wrap_err_with(|| format!("writing {key}"))
}

/// Publish an object atomically with respect to its final key: stage the
/// body under a temporary key, copy it into place, then delete the staging
/// object. Readers of `key` either see the previous object or the complete
/// new one, never a torn write.
pub async fn put_atomic(
    store: &dyn ObjectStore,
    key: &str,
    body: Vec<u8>,
    content_type: &str,
) -> Result<()> {
    let staging = format!("{key}.tmp");
    store
        .put(&staging, body, content_type)
        .await
        .wrap_err_with(|| format!("staging {key}"))?;
    store
        .copy(&staging, key)
        .await
        .wrap_err_with(|| format!("publishing {key}"))?;
    store
        .delete(&staging)
        .await
        .wrap_err_with(|| format!("cleaning up staging object for {key}"))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        value: i64,
    }

    #[tokio::test]
    async fn csv_round_trips_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        let rows = vec![
            Row {
                name: "a".into(),
                value: 1,
            },
            Row {
                name: "b".into(),
                value: -2,
            },
        ];

        write_csv(&store, "out/data.csv", &rows).await.unwrap();
        let back: Vec<Row> = read_csv(&store, "out/data.csv").await.unwrap();
        assert_eq!(back, rows);
    }

    #[tokio::test]
    async fn put_atomic_leaves_no_staging_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());

        put_atomic(&store, "part/key.csv", b"x,y\n1,2\n".to_vec(), "text/csv")
            .await
            .unwrap();

        assert!(store.get("part/key.csv").await.unwrap().is_some());
        assert!(store.get("part/key.csv.tmp").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_objects_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        assert!(store.get("nope").await.unwrap().is_none());
        assert!(read_yaml::<serde_yaml::Value>(&store, "nope").await.is_err());
    }
}
