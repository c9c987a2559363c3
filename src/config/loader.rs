//! Catalog loading: YAML type document, JSON asset document.
//!
//! The builder consumes the parsed catalogs and never touches the disk; the
//! on-disk form lives entirely in this file. Default documents are embedded
//! so the binary runs with zero arguments.

use std::path::Path;

use super::schema::{AssetCatalog, AssetDef, TypeCatalog};
use super::ConfigError;

/// Default type catalog shipped with the binary.
pub const DEFAULT_TYPES_YAML: &str = include_str!("../../config/types.yaml");

/// Default asset catalog shipped with the binary.
pub const DEFAULT_ASSETS_JSON: &str = include_str!("../../config/assets.json");

/// Parse a type catalog from YAML text.
pub fn parse_types(text: &str) -> Result<TypeCatalog, ConfigError> {
    serde_yaml::from_str(text).map_err(ConfigError::TypeCatalog)
}

/// Parse an asset catalog from JSON text.
///
/// List entries without an `id` field (`$comment` markers and the like) are
/// skipped, matching the tolerant shape of hand-maintained asset documents.
pub fn parse_assets(text: &str) -> Result<AssetCatalog, ConfigError> {
    #[derive(serde::Deserialize)]
    struct RawDoc {
        #[serde(default)]
        assets: Vec<serde_json::Value>,
    }

    let raw: RawDoc = serde_json::from_str(text).map_err(ConfigError::AssetCatalog)?;
    let mut assets = Vec::new();
    for entry in raw.assets {
        if entry.get("id").is_none() {
            continue;
        }
        let def: AssetDef = serde_json::from_value(entry).map_err(ConfigError::AssetCatalog)?;
        assets.push(def);
    }
    Ok(AssetCatalog { assets })
}

/// Load the type catalog from a path, or the embedded default when `None`.
pub fn load_types(path: Option<&Path>) -> Result<TypeCatalog, ConfigError> {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .map_err(|source| ConfigError::Io { path: p.display().to_string(), source })?;
            parse_types(&text)
        }
        None => parse_types(DEFAULT_TYPES_YAML),
    }
}

/// Load the asset catalog from a path, or the embedded default when `None`.
pub fn load_assets(path: Option<&Path>) -> Result<AssetCatalog, ConfigError> {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .map_err(|source| ConfigError::Io { path: p.display().to_string(), source })?;
            parse_assets(&text)
        }
        None => parse_assets(DEFAULT_ASSETS_JSON),
    }
}
