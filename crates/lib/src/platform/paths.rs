use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Returns the user's home directory
///
/// Falls back to the system temp directory when `HOME` is unset, which only
/// happens in stripped-down CI containers.
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Returns the directory for cache files for the application
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Root of the content-addressed cache.
///
/// `M8DIST_CACHE` overrides the default location.
pub fn cache_root() -> PathBuf {
  if let Ok(path) = std::env::var("M8DIST_CACHE") {
    return PathBuf::from(path);
  }
  cache_dir()
}

/// Dependency-only compilation outputs (`<cache>/deps/<hash>/`)
pub fn deps_cache_dir() -> PathBuf {
  cache_root().join("deps")
}

/// Materialised SDK shims (`<cache>/sdk/<hash>/`)
pub fn sdk_shim_dir() -> PathBuf {
  cache_root().join("sdk")
}
