use afinstr::Address;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AfError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration file '{file}': {source}")]
    ConfigParseError {
        source: toml::de::Error,
        file: String,
    },

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerializeError(String),

    #[error("Incorrect cache file format, magic word not found")]
    BadMagic,

    #[error("Cache format version {found} is outside the supported range [{min}, {current}]")]
    UnsupportedVersion { found: i32, min: i32, current: i32 },

    #[error(
        "Cache was generated for image checksum 0x{found:08x}, expected 0x{expected:08x}; the image was recompiled"
    )]
    ChecksumMismatch { expected: u32, found: u32 },

    #[error("Malformed routine index at offset {offset}: {reason}")]
    MalformedIndex { offset: u64, reason: String },

    #[error("Malformed routine block at offset {offset}: {reason}")]
    MalformedRoutine { offset: u64, reason: String },

    #[error("No cached formulas for routine 0x{0:x}")]
    UnknownRoutine(Address),

    #[error("Persistent cache is disabled")]
    CacheDisabled,
}

impl AfError {
    /// True for errors caused by the content of a cache file, as opposed to
    /// the file system. Such caches are treated as absent.
    pub fn is_cache_format(&self) -> bool {
        matches!(
            self,
            AfError::BadMagic
                | AfError::UnsupportedVersion { .. }
                | AfError::ChecksumMismatch { .. }
                | AfError::MalformedIndex { .. }
                | AfError::MalformedRoutine { .. }
        )
    }
}

pub type AfResult<T> = Result<T, AfError>;
