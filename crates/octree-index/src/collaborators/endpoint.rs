//! The blob-store endpoint collaborator (spec §6): where encoded chunks, hierarchy
//! shards, and metadata land. Could be a local directory, S3, or anything else; this
//! crate only needs `put`/`get`/`try_get_size`/`list`.

pub trait Endpoint: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn put(&self, path: &str, bytes: &[u8]) -> Result<(), Self::Error>;
    fn get(&self, path: &str) -> Result<Vec<u8>, Self::Error>;

    /// `None` if `path` doesn't exist; used by the scan pre-pass to skip already-written
    /// output without a full `get` (spec §14).
    fn try_get_size(&self, path: &str) -> Result<Option<u64>, Self::Error>;

    fn list(&self, prefix: &str) -> Result<Vec<String>, Self::Error>;
}

/// A local-filesystem endpoint rooted at one directory, for tests only.
#[cfg(any(test, feature = "test-support"))]
pub mod local {
    use super::*;
    use std::path::{Path, PathBuf};

    #[derive(Debug, thiserror::Error)]
    #[error("local endpoint I/O error at {path}: {source}")]
    pub struct LocalEndpointError {
        path: String,
        #[source]
        source: std::io::Error,
    }

    #[derive(Clone)]
    pub struct LocalEndpoint {
        root: PathBuf,
    }

    impl LocalEndpoint {
        pub fn new(root: impl Into<PathBuf>) -> Self {
            Self { root: root.into() }
        }

        fn resolve(&self, path: &str) -> PathBuf {
            self.root.join(path)
        }

        fn wrap(path: &Path, source: std::io::Error) -> LocalEndpointError {
            LocalEndpointError {
                path: path.display().to_string(),
                source,
            }
        }
    }

    impl Endpoint for LocalEndpoint {
        type Error = LocalEndpointError;

        fn put(&self, path: &str, bytes: &[u8]) -> Result<(), Self::Error> {
            let full = self.resolve(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Self::wrap(&full, e))?;
            }
            std::fs::write(&full, bytes).map_err(|e| Self::wrap(&full, e))
        }

        fn get(&self, path: &str) -> Result<Vec<u8>, Self::Error> {
            let full = self.resolve(path);
            std::fs::read(&full).map_err(|e| Self::wrap(&full, e))
        }

        fn try_get_size(&self, path: &str) -> Result<Option<u64>, Self::Error> {
            let full = self.resolve(path);
            match std::fs::metadata(&full) {
                Ok(meta) => Ok(Some(meta.len())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(Self::wrap(&full, e)),
            }
        }

        fn list(&self, prefix: &str) -> Result<Vec<String>, Self::Error> {
            let dir = self.resolve(prefix);
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(Self::wrap(&dir, e)),
            };
            let mut names = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| Self::wrap(&dir, e))?;
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
            names.sort();
            Ok(names)
        }
    }

    #[cfg(test)]
    mod test {
        use super::*;

        #[test]
        fn put_then_get_round_trips() {
            let dir = tempfile::tempdir().unwrap();
            let endpoint = LocalEndpoint::new(dir.path());
            endpoint.put("chunks/0-0-0-0.bin", b"hello").unwrap();
            assert_eq!(endpoint.get("chunks/0-0-0-0.bin").unwrap(), b"hello");
        }

        #[test]
        fn try_get_size_is_none_for_missing_path() {
            let dir = tempfile::tempdir().unwrap();
            let endpoint = LocalEndpoint::new(dir.path());
            assert_eq!(endpoint.try_get_size("nope.bin").unwrap(), None);
        }

        #[test]
        fn list_returns_sorted_entry_names() {
            let dir = tempfile::tempdir().unwrap();
            let endpoint = LocalEndpoint::new(dir.path());
            endpoint.put("h/0-0-0-0.json", b"{}").unwrap();
            endpoint.put("h/1-0-0-0.json", b"{}").unwrap();
            assert_eq!(
                endpoint.list("h").unwrap(),
                vec!["0-0-0-0.json".to_string(), "1-0-0-0.json".to_string()]
            );
        }
    }
}
