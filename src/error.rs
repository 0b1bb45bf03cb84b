use std::path::PathBuf;

/// Conditions callers need to tell apart from generic I/O failures.
///
/// These travel inside `anyhow::Error`; recover them with `downcast_ref`.
#[derive(Debug, thiserror::Error)]
pub enum TrailError {
    #[error("no GPS points found in {}", path.display())]
    NoTrackPoints { path: PathBuf },

    #[error("malformed map extract {} at byte {position}: {message}", path.display())]
    MalformedExtract {
        path: PathBuf,
        position: u64,
        message: String,
    },

    #[error("unsupported track format: {}", path.display())]
    UnsupportedTrackFormat { path: PathBuf },

    #[error("no GPX files found in {}", path.display())]
    NoTrackFiles { path: PathBuf },
}
