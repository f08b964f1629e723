//! Implementation of the `m8dist resolve` command.

use anyhow::{Context, Result};

use m8dist_lib::deps::{self, Linkage, NativeDependency};
use m8dist_lib::platform::TargetPlatform;

use super::target_or_host;
use crate::output::{OutputFormat, print_info, print_item, print_json, print_stat, print_success};

fn describe_linkage(dep: &NativeDependency) -> String {
  match dep.linkage {
    Linkage::SharedLibrary { soname, dlopen: true, .. } => format!("{} (dlopen)", soname),
    Linkage::SharedLibrary { soname, .. } => soname.to_string(),
    Linkage::Framework { name } => format!("{}.framework", name),
    Linkage::SystemLibrary { file } => format!("usr/lib/{}", file),
  }
}

pub fn cmd_resolve(platform: Option<TargetPlatform>, output: OutputFormat) -> Result<()> {
  let platform = target_or_host(platform)?;
  let set = deps::resolve(&platform).with_context(|| format!("Cannot build for {}", platform))?;

  if output.is_json() {
    return print_json(&set);
  }

  print_success(&format!("Dependencies for {}", set.platform));
  for dep in &set.dependencies {
    let optional = if dep.optional { ", optional" } else { "" };
    print_stat(dep.name, &format!("{}{}", describe_linkage(dep), optional));
  }

  if let Some(shim) = &set.sdk_shim {
    println!();
    print_info(&format!("SDK shim with {} entries", shim.entries.len()));
    for entry in &shim.entries {
      print_item(&entry.link);
    }
  }
  Ok(())
}
