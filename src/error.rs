use std::{io, path::StripPrefixError};

use notify::{Error as NotifyError, ErrorKind as NotifyErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use serde_yaml::Error as YamlError;
use sqlx::Error as SqlxError;
use thiserror::Error;

/// errno value reported by the OS when a process runs out of file descriptors.
const EMFILE: i32 = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum RouxError {
    #[error("Node not found: {0}")]
    NotFound(String),
    #[error("Node already exists at path: {0}")]
    AlreadyExists(String),
    #[error("Path escapes the source root: {0}")]
    PathTraversal(String),
    #[error("Graph has not been built yet")]
    GraphNotReady,
    #[error("Invalid vector: {0}")]
    InvalidVector(String),
    #[error("Duplicate id '{id}': kept {kept}, dropped {dropped}")]
    DuplicateId {
        id: String,
        kept: String,
        dropped: String,
    },
    #[error("ID write-back aborted, file modified concurrently: {0}")]
    WriteBackRace(String),
    #[error("File disappeared before it could be read: {0}")]
    FileMissing(String),
    #[error("Cache/Database error: {0}")]
    Cache(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Document parse error: {0}")]
    Parse(String),
    #[error("File watch error: {0}")]
    Watch(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Embedding provider error: {0}")]
    Embedding(String),
}

impl RouxError {
    /// Whether this error aborts the call that produced it. Non-fatal categories are logged
    /// per file during a sync and never surface out of it.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RouxError::DuplicateId { .. } | RouxError::WriteBackRace(_) | RouxError::FileMissing(_)
        )
    }

    /// True for the watcher error raised when the OS refuses more watch descriptors.
    pub fn is_descriptor_exhaustion(&self) -> bool {
        matches!(self, RouxError::Watch(msg) if msg.starts_with(DESCRIPTOR_EXHAUSTION))
    }
}

const DESCRIPTOR_EXHAUSTION: &str = "file descriptor limit reached";

impl From<StripPrefixError> for RouxError {
    fn from(src: StripPrefixError) -> RouxError {
        RouxError::PathTraversal(format!("Strip prefix failed for path. Error: {src}"))
    }
}

impl From<toml::de::Error> for RouxError {
    fn from(src: toml::de::Error) -> RouxError {
        RouxError::Config(format!("Toml deserialization error: {src}"))
    }
}

impl From<JsonError> for RouxError {
    fn from(src: JsonError) -> RouxError {
        RouxError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<YamlError> for RouxError {
    fn from(src: YamlError) -> RouxError {
        RouxError::Serialization(format!("YAML (de)serialization error: {src}"))
    }
}

impl From<io::Error> for RouxError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => RouxError::FileMissing(format!("{x}")),
            _ => RouxError::Io(format!("IOError: {} ({x})", x.kind())),
        }
    }
}

impl From<walkdir::Error> for RouxError {
    fn from(x: walkdir::Error) -> Self {
        match x.path() {
            Some(path) => RouxError::Io(format!("walk failed at {path:?}: {x}")),
            None => RouxError::Io(format!("walk failed: {x}")),
        }
    }
}

impl From<NotifyError> for RouxError {
    fn from(notify_error: NotifyError) -> Self {
        match notify_error.kind {
            NotifyErrorKind::MaxFilesWatch => RouxError::Watch(format!(
                "{DESCRIPTOR_EXHAUSTION}: max file watch limit, paths: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::Io(io_error) if io_error.raw_os_error() == Some(EMFILE) => {
                RouxError::Watch(format!(
                    "{DESCRIPTOR_EXHAUSTION}: {io_error}, paths: {:?}",
                    notify_error.paths
                ))
            }
            NotifyErrorKind::Io(io_error) => RouxError::Watch(format!(
                "io error {}, paths: {:?}",
                io_error.kind(),
                notify_error.paths
            )),
            NotifyErrorKind::Generic(msg) => {
                RouxError::Watch(format!("{msg}, paths: {:?}", notify_error.paths))
            }
            NotifyErrorKind::PathNotFound => RouxError::NotFound(format!(
                "watch path(s) not found: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::WatchNotFound => RouxError::Watch(format!(
                "watch not found, paths: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::InvalidConfig(_) => {
                RouxError::Watch("invalid watcher config".to_string())
            }
        }
    }
}

impl From<SqlxError> for RouxError {
    fn from(db_error: SqlxError) -> Self {
        RouxError::Cache(format!("database error: {db_error:?}"))
    }
}

impl From<sqlx::migrate::MigrateError> for RouxError {
    fn from(db_error: sqlx::migrate::MigrateError) -> Self {
        RouxError::Cache(format!("migration error: {db_error}"))
    }
}
