// src/config/files.rs
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

/// Parse a config file by extension. `.json` is JSON, anything else TOML.
pub fn load_from<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse::<T>(&content, &ext).with_context(|| format!("parsing {}", path.display()))
}

/// Resolve a config file the same way for every file-backed setting:
/// 1) explicit path (usually from an env var), which must exist
/// 2) `config/<stem>.toml`
/// 3) `config/<stem>.json`
///
/// Returns `Ok(None)` when nothing is configured and no fallback exists.
pub fn load_optional<T: DeserializeOwned>(explicit: Option<&Path>, stem: &str) -> Result<Option<T>> {
    if let Some(p) = explicit {
        if !p.exists() {
            return Err(anyhow!("config path {} does not exist", p.display()));
        }
        return load_from(p).map(Some);
    }
    for ext in ["toml", "json"] {
        let p = PathBuf::from("config").join(format!("{stem}.{ext}"));
        if p.exists() {
            return load_from(&p).map(Some);
        }
    }
    Ok(None)
}

fn parse<T: DeserializeOwned>(s: &str, hint_ext: &str) -> Result<T> {
    if hint_ext == "json" {
        return serde_json::from_str(s).map_err(Into::into);
    }
    match toml::from_str(s) {
        Ok(v) => Ok(v),
        // Content may still be JSON behind a non-standard extension.
        Err(toml_err) => serde_json::from_str(s).map_err(|_| anyhow!(toml_err)),
    }
}
