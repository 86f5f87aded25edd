/// Magic word opening every formula cache file.
pub const CACHE_MAGIC: [u8; 8] = *b"AFSTATDB";

/// Format version written by this crate.
pub const CACHE_VERSION: i32 = 1;

/// Oldest format version this crate can still read.
pub const CACHE_MIN_REQUIRED_VERSION: i32 = 1;

/// Size of the fixed header: magic, version, checksum and index offset.
pub const HEADER_SIZE: u64 = 24;

/// Byte position of the index offset inside the header.
pub const INDEX_OFFSET_POSITION: u64 = 16;

/// Index offset written until the index table is finalized.
pub const INDEX_OFFSET_PLACEHOLDER: u64 = u64::MAX;

/// Extension of cache files.
pub const CACHE_FILE_EXTENSION: &str = "stAn";

/// Name of the environment variable containing the path to the configuration file.
/// If not set, defaults to
///  (1) on Linux and macOS: `$XDG_CONFIG_HOME/afengine/config.toml` or `$HOME/.config/afengine/config.toml`
///  (2) on Windows: `%APPDATA%\afengine\config.toml`
pub const ENV_CONFIG_PATH: &str = "AF_CONFIG_PATH";
