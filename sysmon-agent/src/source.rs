//! Source readers
//!
//! A reader produces the current raw bytes of one source or fails. It never
//! retries and never caches; recovery is the sampler's business.

use crate::config::{AgentConfig, SourceBackend};
use crate::error::SourceError;
use crate::metrics::{native, SourceKind};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use sysinfo::System;

pub trait SourceReader: Send + Sync {
    /// Where the bytes come from, for logs and health output
    fn location(&self) -> String;

    fn read(&self) -> BoxFuture<'_, Result<Vec<u8>, SourceError>>;
}

/// Reads a producer file (typically a /proc entry)
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SourceReader for FileSource {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self) -> BoxFuture<'_, Result<Vec<u8>, SourceError>> {
        Box::pin(async move {
            tokio::fs::read(&self.path).await.map_err(|e| match e.kind() {
                ErrorKind::NotFound => SourceError::NotFound(self.location()),
                _ => SourceError::Io {
                    location: self.location(),
                    source: e,
                },
            })
        })
    }
}

/// Samples the local machine directly through sysinfo
pub struct NativeSource {
    kind: SourceKind,
    sys: Arc<Mutex<System>>,
}

impl NativeSource {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            sys: Arc::new(Mutex::new(System::new())),
        }
    }
}

impl SourceReader for NativeSource {
    fn location(&self) -> String {
        format!("sysinfo:{}", self.kind)
    }

    fn read(&self) -> BoxFuture<'_, Result<Vec<u8>, SourceError>> {
        let sys = self.sys.clone();
        let kind = self.kind;
        Box::pin(async move {
            // A sample abandoned by the sampler's timeout may still hold the
            // lock; fail fast instead of queueing behind it
            let sampled = tokio::task::spawn_blocking(move || {
                sys.try_lock().map(|mut sys| native::sample(&mut sys, kind))
            })
            .await
            .map_err(|e| SourceError::Io {
                location: self.location(),
                source: std::io::Error::new(ErrorKind::Other, e),
            })?;
            match sampled {
                Some(encoded) => {
                    encoded.map_err(|e| SourceError::malformed(kind.as_str(), e.to_string()))
                }
                None => Err(SourceError::Io {
                    location: self.location(),
                    source: std::io::Error::new(
                        ErrorKind::WouldBlock,
                        "previous sample still in progress",
                    ),
                }),
            }
        })
    }
}

/// One reader per source kind, as selected by the configured backend
pub fn build_readers(config: &AgentConfig) -> Vec<(SourceKind, Arc<dyn SourceReader>)> {
    SourceKind::ALL
        .into_iter()
        .map(|kind| {
            let reader: Arc<dyn SourceReader> = match config.backend {
                SourceBackend::ProcFile => Arc::new(FileSource::new(config.sources.path(kind))),
                SourceBackend::Native => Arc::new(NativeSource::new(kind)),
            };
            (kind, reader)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[tokio::test]
    async fn test_file_source_reads_current_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"usage\": 12}}").unwrap();

        let source = FileSource::new(file.path());
        assert_eq!(source.read().await.unwrap(), br#"{"usage": 12}"#.to_vec());

        std::fs::write(file.path(), br#"{"usage": 13}"#).unwrap();
        assert_eq!(source.read().await.unwrap(), br#"{"usage": 13}"#.to_vec());
    }

    #[tokio::test]
    async fn test_file_source_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path().join("cpu"));
        match source.read().await {
            Err(SourceError::NotFound(location)) => assert!(location.ends_with("cpu")),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_file_source_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path());
        assert!(matches!(source.read().await, Err(SourceError::Io { .. })));
    }

    #[tokio::test]
    async fn test_native_source_reads_json() {
        let source = NativeSource::new(SourceKind::Ram);
        assert_eq!(source.location(), "sysinfo:ram");
        let raw = source.read().await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert!(value["total"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_native_source_busy_lock_fails_fast() {
        let source = NativeSource::new(SourceKind::Cpu);
        let held = source.sys.lock();

        let result = tokio::time::timeout(Duration::from_secs(2), source.read())
            .await
            .expect("read must not wait for the lock");
        match result {
            Err(SourceError::Io { location, source }) => {
                assert_eq!(location, "sysinfo:cpu");
                assert_eq!(source.kind(), ErrorKind::WouldBlock);
            }
            other => panic!("expected busy Io error, got {other:?}"),
        }

        drop(held);
        assert!(source.read().await.is_ok());
    }

    #[test]
    fn test_build_readers_follows_backend() {
        let mut config = AgentConfig::default();
        let readers = build_readers(&config);
        assert_eq!(readers.len(), 3);
        assert_eq!(readers[0].1.location(), config.sources.cpu.display().to_string());

        config.backend = SourceBackend::Native;
        let readers = build_readers(&config);
        assert_eq!(readers[2].1.location(), "sysinfo:processes");
    }
}
