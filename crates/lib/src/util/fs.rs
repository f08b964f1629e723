//! Filesystem helpers shared by the pipeline stages.

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Recursively copy `src` into `dst`.
///
/// Files keep their permissions and modification times so that tools which
/// fingerprint by mtime (cargo) see the copy as up to date. Symlinks are
/// copied as symlinks. Entries whose file name is in `exclude` are skipped
/// together with everything beneath them.
pub fn copy_tree(src: &Path, dst: &Path, exclude: &[&str]) -> io::Result<u64> {
  let mut copied = 0;
  fs::create_dir_all(dst)?;

  let walker = WalkDir::new(src).min_depth(1).into_iter().filter_entry(|e| {
    e.file_name()
      .to_str()
      .map(|name| !exclude.contains(&name))
      .unwrap_or(true)
  });

  for entry in walker {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    let target = dst.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      let link = fs::read_link(entry.path())?;
      if target.symlink_metadata().is_ok() {
        fs::remove_file(&target)?;
      }
      symlink(&link, &target)?;
    } else if file_type.is_file() {
      fs::copy(entry.path(), &target)?;
      let modified = entry.metadata().map_err(io::Error::other)?.modified()?;
      // Read-only handle: sources may carry read-only permissions
      fs::File::open(&target)?.set_times(fs::FileTimes::new().set_modified(modified))?;
      copied += 1;
    }
  }

  Ok(copied)
}

/// Flush every file under `root` to disk.
pub fn sync_tree(root: &Path) -> io::Result<()> {
  for entry in WalkDir::new(root) {
    let entry = entry.map_err(io::Error::other)?;
    if entry.file_type().is_file() {
      fs::File::open(entry.path())?.sync_all()?;
    }
  }
  Ok(())
}

#[cfg(unix)]
pub fn symlink(original: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
pub fn symlink(original: &Path, link: &Path) -> io::Result<()> {
  if original.is_dir() {
    std::os::windows::fs::symlink_dir(original, link)
  } else {
    std::os::windows::fs::symlink_file(original, link)
  }
}
