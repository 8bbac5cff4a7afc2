//! Scenario file schema.

use std::path::Path;

use serde::Deserialize;

/// One scenario TOML document: a list of component declarations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioFile {
    #[serde(default)]
    pub component: Vec<ComponentDecl>,
}

impl ScenarioFile {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    pub fn from_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// A `kind`-discriminated component declaration. The `spec` table is
/// interpreted by the builder according to the kind.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentDecl {
    pub kind: String,
    /// Cross-reference name; generated when omitted.
    pub name: Option<String>,
    #[serde(default)]
    pub spec: Option<toml::Table>,
}

impl ComponentDecl {
    /// The spec table, defaulting to empty.
    pub fn spec_table(&self) -> toml::Table {
        self.spec.clone().unwrap_or_default()
    }

    /// Deserialize the spec table into a typed config.
    pub fn parse_spec<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        let value = toml::Value::Table(self.spec_table());
        value.try_into().map_err(|e| {
            anyhow::anyhow!(
                "bad spec for {} '{}': {e}",
                self.kind,
                self.name.as_deref().unwrap_or("<unnamed>")
            )
        })
    }
}

/// The run-level declaration: which gateway, sink, and network to install
/// and which components to build, in order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContextSpec {
    pub gateway: Option<String>,
    pub telemetry: Option<String>,
    pub network: Option<String>,
    pub components: Vec<String>,
}
