//! Test utilities for m8dist-lib.

use std::ops::Range;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;

/// PATH used by test descriptors so shell builtins' companions resolve.
pub const TEST_PATH: &str = "/usr/bin:/bin";

/// Write a gzip tarball at `dest` holding `files` under a `prefix/` directory.
///
/// Mirrors the layout of a published frontend bundle (one top-level folder).
pub fn write_bundle(dest: &Path, prefix: &str, files: &[(&str, &str)]) {
  let file = std::fs::File::create(dest).unwrap();
  let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
  for (name, content) in files {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder
      .append_data(&mut header, format!("{}/{}", prefix, name), content.as_bytes())
      .unwrap();
  }
  builder.into_inner().unwrap().finish().unwrap();
}

/// One entry of a hand-built tarball.
pub enum BundleEntry<'a> {
  File(&'a str, &'a str),
  Symlink(&'a str, &'a str),
}

/// Write a gzip tarball at `dest` holding exactly `entries`, in order.
pub fn write_bundle_entries(dest: &Path, entries: &[BundleEntry<'_>]) {
  let file = std::fs::File::create(dest).unwrap();
  let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
  for entry in entries {
    let mut header = tar::Header::new_gnu();
    header.set_mtime(0);
    match entry {
      BundleEntry::File(path, content) => {
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, content.as_bytes()).unwrap();
      }
      BundleEntry::Symlink(path, target) => {
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        builder.append_link(&mut header, path, target).unwrap();
      }
    }
  }
  builder.into_inner().unwrap().finish().unwrap();
}

/// Returns the command to append a line to `file`, used to count invocations.
pub fn append_line(file: &Path, line: &str) -> String {
  format!("echo {} >> '{}'", line, file.display())
}

/// Byte range of `.dynstr` in [`minimal_elf`] images.
pub const ELF_DYNSTR: Range<usize> = 64..192;
/// Byte range of `.dynamic` in [`minimal_elf`] images, 16 bytes per entry.
pub const ELF_DYNAMIC: Range<usize> = 192..320;

const ELF_SHSTRTAB: &[u8] = b"\0.dynstr\0.dynamic\0.shstrtab\0";
const ELF_SHSTRTAB_OFFSET: usize = 320;
const ELF_SHOFF: usize = 352;

/// A little-endian x86_64 shared object with only a dynamic section.
///
/// `.dynstr` and `.dynamic` leave zeroed room behind the `needed` entries so
/// tests can add entries in place.
pub fn minimal_elf(needed: &[&str]) -> Vec<u8> {
  fn put(data: &mut [u8], at: usize, bytes: &[u8]) {
    data[at..at + bytes.len()].copy_from_slice(bytes);
  }
  #[allow(clippy::too_many_arguments)]
  fn section(
    name: u32,
    kind: u32,
    flags: u64,
    offset: usize,
    size: usize,
    link: u32,
    align: u64,
    entsize: u64,
  ) -> Vec<u8> {
    let mut header = Vec::with_capacity(64);
    header.extend_from_slice(&name.to_le_bytes());
    header.extend_from_slice(&kind.to_le_bytes());
    header.extend_from_slice(&flags.to_le_bytes());
    header.extend_from_slice(&0u64.to_le_bytes());
    header.extend_from_slice(&(offset as u64).to_le_bytes());
    header.extend_from_slice(&(size as u64).to_le_bytes());
    header.extend_from_slice(&link.to_le_bytes());
    header.extend_from_slice(&0u32.to_le_bytes());
    header.extend_from_slice(&align.to_le_bytes());
    header.extend_from_slice(&entsize.to_le_bytes());
    header
  }

  let mut data = vec![0u8; ELF_SHOFF + 4 * 64];

  // ELF header
  put(&mut data, 0, &[0x7f, b'E', b'L', b'F', 2, 1, 1]);
  put(&mut data, 16, &3u16.to_le_bytes());
  put(&mut data, 18, &62u16.to_le_bytes());
  put(&mut data, 20, &1u32.to_le_bytes());
  put(&mut data, 40, &(ELF_SHOFF as u64).to_le_bytes());
  put(&mut data, 52, &64u16.to_le_bytes());
  put(&mut data, 54, &56u16.to_le_bytes());
  put(&mut data, 58, &64u16.to_le_bytes());
  put(&mut data, 60, &4u16.to_le_bytes());
  put(&mut data, 62, &3u16.to_le_bytes());

  let mut string_at = ELF_DYNSTR.start + 1;
  for (i, soname) in needed.iter().enumerate() {
    put(&mut data, string_at, soname.as_bytes());
    let entry = ELF_DYNAMIC.start + i * 16;
    put(&mut data, entry, &1u64.to_le_bytes());
    put(&mut data, entry + 8, &((string_at - ELF_DYNSTR.start) as u64).to_le_bytes());
    string_at += soname.len() + 1;
  }
  assert!(string_at <= ELF_DYNSTR.end, "needed sonames overflow .dynstr");

  put(&mut data, ELF_SHSTRTAB_OFFSET, ELF_SHSTRTAB);

  let sections = [
    section(0, 0, 0, 0, 0, 0, 0, 0),
    section(1, 3, 2, ELF_DYNSTR.start, ELF_DYNSTR.len(), 0, 1, 0),
    section(9, 6, 3, ELF_DYNAMIC.start, ELF_DYNAMIC.len(), 1, 8, 16),
    section(18, 3, 0, ELF_SHSTRTAB_OFFSET, ELF_SHSTRTAB.len(), 0, 1, 0),
  ];
  for (i, header) in sections.iter().enumerate() {
    put(&mut data, ELF_SHOFF + i * 64, header);
  }
  data
}
