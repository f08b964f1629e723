/// Application name, used for cache directories and the default config path.
pub const APP_NAME: &str = "m8dist";

/// Product built and released by default.
pub const DEFAULT_PRODUCT: &str = "remote-m8";

/// Default configuration file name, resolved against the working directory.
pub const CONFIG_FILENAME: &str = "m8dist.toml";

/// Length of the truncated hashes used for cache entry names.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// January 1, 1980 00:00:00 UTC (ZIP epoch).
///
/// Exported to every build and used as the mtime of archive entries.
pub const SOURCE_DATE_EPOCH: u64 = 315_532_800;
