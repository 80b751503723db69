//! Seed trees and descriptors for swarm and session tests.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use url::Url;

/// Deterministic, non-repeating-within-a-piece payload of `len` bytes.
///
/// Byte `i` is derived from `i` alone, so any range can be checked against
/// [`expected_slice`] without keeping the whole payload around.
#[must_use]
pub fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(sample_byte).collect()
}

/// The bytes [`sample_bytes`] produces for `start..end`.
#[must_use]
pub fn expected_slice(start: usize, end: usize) -> Vec<u8> {
    (start..end).map(sample_byte).collect()
}

fn sample_byte(index: usize) -> u8 {
    let mixed = index.wrapping_mul(31).wrapping_add(index >> 8);
    (mixed % 251) as u8
}

/// Write seed content for `hash` under `seed_dir`, returning the seed root.
///
/// # Errors
///
/// Returns an error if a directory or file cannot be written.
pub fn write_seed(seed_dir: &Path, hash: &str, files: &[(&str, &[u8])]) -> Result<PathBuf> {
    let root = seed_dir.join(hash);
    fs::create_dir_all(&root).with_context(|| format!("creating {}", root.display()))?;
    for (relative, bytes) in files {
        let path = relative
            .split('/')
            .fold(root.clone(), |path, segment| path.join(segment));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(root)
}

/// Build a magnet URI for `hash` with an optional display name and trackers.
///
/// # Errors
///
/// Returns an error if the assembled URI is not a valid URL.
pub fn magnet_uri(hash: &str, display_name: Option<&str>, trackers: &[&str]) -> Result<String> {
    let mut url = Url::parse("magnet:").context("parsing magnet scheme")?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("xt", &format!("urn:btih:{hash}"));
        if let Some(name) = display_name {
            query.append_pair("dn", name);
        }
        for tracker in trackers {
            query.append_pair("tr", tracker);
        }
    }
    Ok(url.to_string())
}
