// src/ingest/fingerprint.rs
use sha2::{Digest, Sha256};

/// Content hash used as the dedup key: SHA-256 (hex) over the lower-cased,
/// whitespace-collapsed `title + "\n" + text`. URLs are not part of it, so
/// the same story mirrored under different links collapses to one record.
pub fn fingerprint(title: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical(title).as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical(text).as_bytes());
    hex(&hasher.finalize())
}

fn canonical(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
