//! Release trigger matching.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

const TAG_PREFIX: &str = "refs/tags/";

fn release_tag_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^v?[0-9]+\.[0-9]+\.[0-9]+$").unwrap())
}

/// A reference that qualifies as a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseTrigger {
  /// The reference as pushed.
  pub reference: String,
  /// The matched tag name, used verbatim in artifact names.
  pub version: String,
}

/// Match `reference` against the release tag pattern.
///
/// A `refs/tags/` prefix is ignored; anything else must match exactly.
pub fn match_release_ref(reference: &str) -> Option<ReleaseTrigger> {
  let tag = reference.strip_prefix(TAG_PREFIX).unwrap_or(reference);
  release_tag_re().is_match(tag).then(|| ReleaseTrigger {
    reference: reference.to_string(),
    version: tag.to_string(),
  })
}
