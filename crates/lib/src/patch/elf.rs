//! Reading `DT_NEEDED` entries from ELF files.

use object::elf;
use object::read::elf::{Dyn, FileHeader};
use object::{Endianness, FileKind};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElfReadError {
  #[error("not an ELF file")]
  NotElf,

  #[error("no dynamic section (statically linked?)")]
  NoDynamicSection,

  #[error("malformed ELF: {0}")]
  Malformed(String),
}

fn malformed(err: object::read::Error) -> ElfReadError {
  ElfReadError::Malformed(err.to_string())
}

/// Sonames declared as needed by an ELF image, in dynamic section order.
pub fn needed_libraries(data: &[u8]) -> Result<Vec<String>, ElfReadError> {
  match FileKind::parse(data).map_err(|_| ElfReadError::NotElf)? {
    FileKind::Elf32 => needed::<elf::FileHeader32<Endianness>>(data),
    FileKind::Elf64 => needed::<elf::FileHeader64<Endianness>>(data),
    _ => Err(ElfReadError::NotElf),
  }
}

fn needed<Elf: FileHeader<Endian = Endianness>>(data: &[u8]) -> Result<Vec<String>, ElfReadError> {
  let header = Elf::parse(data).map_err(malformed)?;
  let endian = header.endian().map_err(malformed)?;
  let sections = header.sections(endian, data).map_err(malformed)?;

  let Some((dynamic, link)) = sections.dynamic(endian, data).map_err(malformed)? else {
    return Err(ElfReadError::NoDynamicSection);
  };
  let strings = sections.strings(endian, data, link).map_err(malformed)?;

  let mut needed = Vec::new();
  for entry in dynamic {
    match entry.tag32(endian) {
      Some(elf::DT_NULL) => break,
      Some(elf::DT_NEEDED) => {
        let name = entry.string(endian, strings).map_err(malformed)?;
        needed.push(String::from_utf8_lossy(name).into_owned());
      }
      _ => {}
    }
  }
  Ok(needed)
}
