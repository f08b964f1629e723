//! Per-OS native dependency tables.
//!
//! Adding a dependency means adding a row here; nothing else branches on it.

use super::{DepRole, Linkage, NativeDependency};

pub const LINUX: &[NativeDependency] = &[
  NativeDependency {
    name: "alsa-lib",
    role: DepRole::AudioMixing,
    linkage: Linkage::SharedLibrary {
      pkg_config: "alsa",
      soname: "libasound.so.2",
      dlopen: false,
    },
    optional: false,
  },
  NativeDependency {
    name: "pipewire",
    role: DepRole::AudioServer,
    linkage: Linkage::SharedLibrary {
      pkg_config: "libpipewire-0.3",
      soname: "libpipewire-0.3.so.0",
      dlopen: true,
    },
    optional: false,
  },
  NativeDependency {
    name: "udev",
    role: DepRole::DeviceManagement,
    linkage: Linkage::SharedLibrary {
      pkg_config: "libudev",
      soname: "libudev.so.1",
      dlopen: false,
    },
    optional: false,
  },
  NativeDependency {
    name: "jack2",
    role: DepRole::AudioRouting,
    linkage: Linkage::SharedLibrary {
      pkg_config: "jack",
      soname: "libjack.so.0",
      dlopen: true,
    },
    optional: true,
  },
  NativeDependency {
    name: "opus",
    role: DepRole::AudioCodec,
    linkage: Linkage::SharedLibrary {
      pkg_config: "opus",
      soname: "libopus.so.0",
      dlopen: false,
    },
    optional: true,
  },
];

pub const MACOS: &[NativeDependency] = &[
  NativeDependency {
    name: "AudioUnit",
    role: DepRole::AudioUnitFramework,
    linkage: Linkage::Framework { name: "AudioUnit" },
    optional: false,
  },
  NativeDependency {
    name: "CoreAudio",
    role: DepRole::CoreAudioFramework,
    linkage: Linkage::Framework { name: "CoreAudio" },
    optional: false,
  },
  NativeDependency {
    name: "iconv",
    role: DepRole::CharsetConversion,
    linkage: Linkage::SystemLibrary { file: "libiconv.tbd" },
    optional: false,
  },
];
