//! FileName Derivation
//!
//! Deterministic mapping from asset ID to an on-disk path under the cache
//! root, tier-sharded by leading characters so no single directory grows
//! unbounded. Sanitization replaces every platform-invalid path character
//! with `_`, and short IDs are right-padded so every shard level has a
//! full-length prefix.

use std::path::{Path, PathBuf};

/// Characters never allowed in a shard directory or file name.
///
/// The union of the invalid-filename sets across supported platforms, plus
/// ASCII control characters (handled separately in [`sanitize`]).
const INVALID_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Replace invalid path characters with `_`.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_control() || INVALID_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Derive the on-disk path for an asset ID.
///
/// Returns `None` for blank/whitespace IDs. Distinct IDs always map to
/// distinct paths because the full sanitized ID is the filename; the shard
/// directories are prefixes of it.
pub fn path_of(root: &Path, id: &str, tiers: u32, tier_len: u32) -> Option<PathBuf> {
    if id.trim().is_empty() {
        return None;
    }

    let tiers = tiers as usize;
    let tier_len = tier_len as usize;

    let mut name = sanitize(id);
    let min_len = tiers * tier_len;
    while name.chars().count() < min_len {
        name.push('_');
    }

    let chars: Vec<char> = name.chars().collect();
    let mut path = root.to_path_buf();
    for level in 0..tiers {
        let start = level * tier_len;
        let prefix: String = chars[start..start + tier_len].iter().collect();
        path.push(safe_component(prefix));
    }
    path.push(safe_component(name));
    Some(path)
}

/// An all-dots component would alias `.`/`..` and walk out of the shard
/// tree; map it to underscores of the same length.
fn safe_component(component: String) -> String {
    if component.chars().all(|c| c == '.') {
        "_".repeat(component.chars().count())
    } else {
        component
    }
}

/// The sanitized filename an ID is stored under (sans shard directories).
///
/// Cleanup uses this to compare directory entries against gathered IDs.
pub fn file_name_of(id: &str, tiers: u32, tier_len: u32) -> Option<String> {
    if id.trim().is_empty() {
        return None;
    }
    let mut name = sanitize(id);
    let min_len = (tiers * tier_len) as usize;
    while name.chars().count() < min_len {
        name.push('_');
    }
    Some(safe_component(name))
}

// =============================================================================
// Tests
// =============================================================================
