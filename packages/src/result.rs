// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use file_system::FileError;

/// The non-error outcomes of processing an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The requested operation is done.
    Success,
    /// The time slice ran out, call [`crate::Asset::process`] again to
    /// continue from where this call left off.
    Pending,
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::Success => 0,
            Status::Pending => 1,
        }
    }
}

/// Errors from processing or cooking an asset. Any of these means the asset
/// is unusable for this session, processing stops at the first one.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error("{0}")]
    Generic(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unsupported version {found}, expected {expected}")]
    BadVersion { found: u32, expected: u32 },
    #[error("bad metadata: {0}")]
    Meta(String),
    #[error("missing file: {0}")]
    MissingFile(String),
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("corrupt file: {0}")]
    CorruptFile(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("compiler error: {0}")]
    Compiler(String),
    #[error("script error: {0}")]
    Script(String),
    #[error("the cook was cancelled")]
    Cancelled,
}

impl SinkError {
    /// The numeric status code of this error. File system errors keep their
    /// own codes (-1 to -6), the rest start from -128.
    pub fn code(&self) -> i32 {
        match self {
            SinkError::File(err) => err.code(),
            SinkError::Generic(_) => -128,
            SinkError::Parse(_) => -129,
            SinkError::BadVersion { .. } => -130,
            SinkError::Meta(_) => -131,
            SinkError::MissingFile(_) => -132,
            SinkError::InvalidFormat(_) => -133,
            SinkError::CorruptFile(_) => -134,
            SinkError::Io(_) => -135,
            SinkError::Compiler(_) => -136,
            SinkError::Script(_) => -137,
            SinkError::Cancelled => -138,
        }
    }

    /// Shorthand for the error returned when a required key is missing or has
    /// the wrong type.
    pub fn missing_key(path: &str) -> SinkError {
        SinkError::Meta(format!("missing or mistyped key {path:?}"))
    }
}

pub type SinkResult = Result<Status, SinkError>;

/// Errors from editing packages and their entries.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error("the name {0:?} is already taken")]
    NameTaken(String),
    #[error("{0:?} is not a valid name")]
    InvalidName(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("package {0} is cooked and can't be edited")]
    Cooked(String),
    #[error("the package manager has been dropped")]
    Detached,
    #[error("package {requested:?} only differs by case from the loaded package {loaded:?}")]
    CaseMismatch { requested: String, loaded: String },
    #[error("error in package script {path}: {reason}")]
    Script { path: String, reason: String },
}

/// The status code of a processing result, 0 for success, 1 for pending and
/// negative for errors.
pub fn result_code(result: &SinkResult) -> i32 {
    match result {
        Ok(status) => status.code(),
        Err(err) => err.code(),
    }
}

#[cfg(test)]
mod tests {
    use file_system::FileError;

    use super::{result_code, SinkError, Status};

    #[test]
    fn codes() {
        assert_eq!(0, result_code(&Ok(Status::Success)));
        assert_eq!(1, result_code(&Ok(Status::Pending)));
        assert_eq!(-131, result_code(&Err(SinkError::missing_key("Mipmap"))));
        assert_eq!(-132, SinkError::MissingFile("a".into()).code());
        assert_eq!(-137, SinkError::Script("a".into()).code());
        let not_found = SinkError::from(FileError::NotFound("a".into()));
        assert_eq!(-1, not_found.code());
    }
}
