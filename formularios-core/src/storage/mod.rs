use crate::error::{FormError, Result};
use futures::TryStreamExt;
use opendal::{EntryMode, ErrorKind, Operator, Scheme};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use url::Url;

static MEMORY_OPERATORS: OnceLock<Mutex<HashMap<String, Operator>>> = OnceLock::new();

fn memory_cache() -> &'static Mutex<HashMap<String, Operator>> {
    MEMORY_OPERATORS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Fresh, unshared in-memory operator.
pub fn memory_operator() -> Result<Operator> {
    let builder = opendal::services::Memory::default();
    Ok(Operator::new(builder)?.finish())
}

/// Builds an operator from a storage URI.
///
/// Supported schemes:
/// - memory://name -> in-memory, one shared operator per URI
/// - file:///path/to/dir -> local filesystem
/// - s3://bucket/path -> AWS S3 (credentials from the environment)
pub fn operator_from_uri(uri: &str) -> Result<Operator> {
    if uri.starts_with("memory://") {
        let mut cache = memory_cache()
            .lock()
            .map_err(|_| FormError::Config("memory operator cache lock poisoned".to_string()))?;
        if let Some(op) = cache.get(uri) {
            return Ok(op.clone());
        }
        let op = memory_operator()?;
        cache.insert(uri.to_string(), op.clone());
        return Ok(op);
    }

    let url = Url::parse(uri).map_err(|e| FormError::Config(format!("Invalid storage URI: {e}")))?;
    let scheme_str = match url.scheme() {
        "file" => "fs",
        other => other,
    };
    let scheme = Scheme::from_str(scheme_str)
        .map_err(|_| FormError::Config(format!("Unsupported storage scheme: {scheme_str}")))?;

    let mut map = HashMap::new();
    match scheme {
        Scheme::Fs => {
            map.insert("root".to_string(), url.path().to_string());
        }
        Scheme::S3 => {
            let bucket = url
                .host_str()
                .ok_or_else(|| FormError::Config("S3 URI missing bucket".to_string()))?;
            map.insert("bucket".to_string(), bucket.to_string());
            let root = url.path();
            if !root.is_empty() && root != "/" {
                map.insert("root".to_string(), root.to_string());
            }
            map.insert("region".to_string(), "auto".to_string());
        }
        _ => {
            return Err(FormError::Config(format!(
                "Unsupported storage scheme: {scheme}"
            )))
        }
    }

    Ok(Operator::via_iter(scheme, map)?)
}

pub async fn write_json<T: Serialize>(op: &Operator, path: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    op.write(path, bytes).await?;
    Ok(())
}

pub async fn read_json<T: DeserializeOwned>(op: &Operator, path: &str) -> Result<T> {
    let bytes = op.read(path).await?;
    Ok(serde_json::from_slice(&bytes.to_vec())?)
}

/// Like [`read_json`] but maps a missing object to `None`.
pub async fn read_json_opt<T: DeserializeOwned>(op: &Operator, path: &str) -> Result<Option<T>> {
    match op.read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes.to_vec())?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn delete_path(op: &Operator, path: &str) -> Result<()> {
    match op.delete(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Every `.json` file below `dir`, at any depth, sorted by path.
pub async fn list_json_paths_recursive(op: &Operator, dir: &str) -> Result<Vec<String>> {
    let dir = format!("{}/", dir.trim_end_matches('/'));
    let mut lister = match op.lister_with(&dir).recursive(true).await {
        Ok(lister) => lister,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut paths = Vec::new();
    while let Some(entry) = lister.try_next().await? {
        if entry.metadata().mode() != EntryMode::FILE {
            continue;
        }
        let path = entry.path();
        if path.ends_with(".json") {
            paths.push(path.to_string());
        }
    }
    paths.sort();
    Ok(paths)
}

/// `.json` files directly inside `dir`.
pub async fn list_json_paths(op: &Operator, dir: &str) -> Result<Vec<String>> {
    let prefix = dir.trim_end_matches('/');
    Ok(list_json_paths_recursive(op, dir)
        .await?
        .into_iter()
        .filter(|path| {
            path.strip_prefix(prefix)
                .map(|rest| !rest.trim_start_matches('/').contains('/'))
                .unwrap_or(false)
        })
        .collect())
}

pub async fn list_json<T: DeserializeOwned>(op: &Operator, dir: &str) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for path in list_json_paths(op, dir).await? {
        values.push(read_json(op, &path).await?);
    }
    Ok(values)
}

/// Names of the immediate subdirectories of `dir` that hold at least one document.
pub async fn list_child_dirs(op: &Operator, dir: &str) -> Result<Vec<String>> {
    let prefix = format!("{}/", dir.trim_end_matches('/'));
    let mut names: Vec<String> = Vec::new();
    for path in list_json_paths_recursive(op, &prefix).await? {
        let Some(rest) = path.strip_prefix(&prefix) else {
            continue;
        };
        if let Some((child, _)) = rest.split_once('/') {
            if !names.iter().any(|n| n == child) {
                names.push(child.to_string());
            }
        }
    }
    Ok(names)
}
