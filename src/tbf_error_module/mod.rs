// name of module: tbf_error_module

use std::io;

use crate::tbf_dtype_module::DtypeTag;

/// Every failure the codec can report.
///
/// Structural variants carry the entry index and/or byte position so a caller
/// can say which tensor is corrupt. None of them are retried internally.
#[derive(Debug, thiserror::Error)]
pub enum TbfError {
    /// Element type has no wire representation, either on the way in (a
    /// provider type with no code) or on the way out (an unknown code byte).
    #[error("unsupported dtype {dtype} for entry {index} '{name}' (record at byte {position})")]
    UnsupportedDtype {
        index: usize,
        position: u64,
        name: String,
        dtype: String,
    },

    #[error("bad magic: expected \"TBF1\", found {found:?}")]
    BadMagic { found: Vec<u8> },

    #[error("truncated file at byte {position}: {context} needs {needed} bytes, {available} available")]
    Truncated {
        position: u64,
        needed: u64,
        available: u64,
        context: String,
    },

    #[error("malformed entry {index} at byte {position}: {reason}")]
    MalformedEntry {
        index: usize,
        position: u64,
        reason: String,
    },

    #[error("size mismatch for entry {index} '{name}': expected {expected} bytes, found {actual}")]
    SizeMismatch {
        index: usize,
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("offset integrity violated at entry {index} '{name}': expected offset {expected}, found {actual}")]
    OffsetIntegrity {
        index: usize,
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("tensor not found: '{name}'")]
    NotFound { name: String },

    #[error("tensor '{name}' has dtype {actual}, cannot be read as {requested}")]
    DtypeMismatch {
        name: String,
        actual: DtypeTag,
        requested: &'static str,
    },

    #[error("verification of {path} failed: {detail}")]
    VerificationFailed { path: String, detail: String },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl TbfError {
    /// Wraps an I/O failure with the operation (and path, when known).
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        TbfError::Io {
            context: context.into(),
            source,
        }
    }

    /// `true` for errors that say the bytes themselves are bad, as opposed to
    /// a missing name or a storage failure.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            TbfError::BadMagic { .. }
                | TbfError::Truncated { .. }
                | TbfError::MalformedEntry { .. }
                | TbfError::SizeMismatch { .. }
                | TbfError::OffsetIntegrity { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TbfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_entry() {
        let err = TbfError::SizeMismatch {
            index: 3,
            name: "encoder.layer.0.attention.self.query.weight".into(),
            expected: 24,
            actual: 20,
        };
        let msg = err.to_string();
        assert!(msg.contains("entry 3"));
        assert!(msg.contains("query.weight"));
        assert!(msg.contains("24"));
    }

    #[test]
    fn io_error_keeps_source() {
        let err = TbfError::io(
            "opening model.tbf",
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        );
        assert!(err.to_string().contains("opening model.tbf"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_corruption());
    }

    #[test]
    fn corruption_classification() {
        assert!(TbfError::BadMagic { found: b"GGUF".to_vec() }.is_corruption());
        assert!(!TbfError::NotFound { name: "x".into() }.is_corruption());
        assert!(!TbfError::UnsupportedDtype {
            index: 0,
            position: 12,
            name: "x".into(),
            dtype: "bool".into()
        }
        .is_corruption());
    }
}
