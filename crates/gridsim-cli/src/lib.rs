//! gridsim-cli — scenario configuration and assembly.
//!
//! Scenario files are TOML documents carrying `[[component]]` declarations
//! with a `kind` discriminator and a free-form `spec` table. The
//! [`builder::ScenarioBuilder`] resolves named cross-references (a service
//! pointing at its server template, a server at its endpoint table) and
//! assembles a ready-to-run `SimContext` through an explicit kind
//! registry — no reflection, no implicit discovery.

pub mod builder;
pub mod config;

pub use builder::ScenarioBuilder;
pub use config::{ComponentDecl, ContextSpec, ScenarioFile};
