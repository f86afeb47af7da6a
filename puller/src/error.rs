use std::path::PathBuf;
use std::sync::Arc;

/// Errors recorded against a file while it is being pulled.
///
/// The first error hit by any worker is kept by the transfer state and handed back to every
/// later caller, so the type is cheap to clone.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("cannot access directory {path:?}: {source}")]
    DirAccess {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("{path:?}: not a directory")]
    NotADirectory { path: PathBuf },
    #[error("cannot create temp file {path:?}: {source}")]
    TempCreate {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("cannot open source file {path:?}: {source}")]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("failed closing {path:?}: {source}")]
    Close {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("{context} {path:?} at offset {offset}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        offset: u64,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("failed fetching block at offset {offset}: {source}")]
    Fetch {
        offset: u64,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
    #[error("cannot finish {path:?}: {context}: {source}")]
    Finish {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("aborted: {reason}")]
    Aborted { reason: String },
}

impl Error {
    pub fn dir_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::DirAccess {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn temp_create(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::TempCreate {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn source_open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::SourceOpen {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn close(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Close {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn io(
        context: &'static str,
        path: impl Into<PathBuf>,
        offset: u64,
        source: std::io::Error,
    ) -> Self {
        Error::Io {
            context,
            path: path.into(),
            offset,
            source: Arc::new(source),
        }
    }

    pub fn fetch(offset: u64, source: anyhow::Error) -> Self {
        let source: Box<dyn std::error::Error + Send + Sync> = source.into();
        Error::Fetch {
            offset,
            source: Arc::from(source),
        }
    }

    pub fn finish(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Finish {
            context,
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Error::Aborted {
            reason: reason.into(),
        }
    }

    /// Underlying I/O error kind, if this error came from the filesystem.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Error::DirAccess { source, .. }
            | Error::TempCreate { source, .. }
            | Error::SourceOpen { source, .. }
            | Error::Close { source, .. }
            | Error::Io { source, .. }
            | Error::Finish { source, .. } => Some(source.kind()),
            Error::NotADirectory { .. } | Error::Fetch { .. } | Error::Aborted { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_source() {
        let error = Error::temp_create(
            "/tmp/x",
            std::io::Error::from(std::io::ErrorKind::AlreadyExists),
        );
        let copy = error.clone();
        match (&error, &copy) {
            (Error::TempCreate { source: a, .. }, Error::TempCreate { source: b, .. }) => {
                assert!(Arc::ptr_eq(a, b));
            }
            _ => panic!("unexpected variants"),
        }
        assert_eq!(copy.io_kind(), Some(std::io::ErrorKind::AlreadyExists));
    }

    #[test]
    fn display_includes_context() {
        let error = Error::io(
            "dst write",
            "/a/b",
            4096,
            std::io::Error::other("disk on fire"),
        );
        let text = error.to_string();
        assert!(text.contains("dst write"), "{text}");
        assert!(text.contains("4096"), "{text}");
        assert!(text.contains("disk on fire"), "{text}");
        let error = Error::fetch(0, anyhow::anyhow!("peer went away"));
        assert!(error.to_string().contains("peer went away"));
        assert_eq!(error.io_kind(), None);
    }
}
