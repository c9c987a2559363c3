//! Declarative configuration: schema types and catalog loaders.
//!
//! The information model served by the simulator is described by two
//! documents — a YAML type catalog and a JSON asset catalog — parsed here
//! into the structures the model builder consumes.

pub mod loader;
pub mod schema;

pub use loader::{load_assets, load_types, parse_assets, parse_types};
pub use schema::{
    AccessLevel, AlarmDef, ArgumentDef, AssetCatalog, AssetDef, ComponentDef, ComponentKind,
    DataTypeRef, DesignSpecs, EngineeringUnit, HierarchyLevel, ModellingRule, ScalarType,
    TypeCatalog, TypeDef, ValueRange, BASE_OBJECT_TYPE, FOLDER_TYPE, OBJECTS_FOLDER_ID,
};

/// Errors raised while reading or parsing catalog documents. All of them are
/// fatal at bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("type catalog is not valid YAML")]
    TypeCatalog(#[source] serde_yaml::Error),
    #[error("asset catalog is not valid JSON")]
    AssetCatalog(#[source] serde_json::Error),
}
