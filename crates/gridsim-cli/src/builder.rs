//! Scenario assembly.
//!
//! Collects component declarations from files and folders, then builds a
//! `SimContext` from the single `context` declaration: collaborators
//! first (gateway, telemetry sink, network), then each listed component
//! through the kind registry below. References between declarations are
//! by name and resolved lazily, so declaration order across files does
//! not matter.

use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use anyhow::{bail, Context as _};
use serde::Deserialize;
use tracing::{debug, info};

use gridsim_autoscale::{AutoscalerConfig, HorizontalAutoscaler};
use gridsim_core::{Instance, InstanceFactory, Proxy, SimContext, Telemetry, ZeroDelayNetwork};
use gridsim_loadgen::{DynamicRpsConfig, DynamicRpsLoadGenerator, RpsConfig, RpsLoadGenerator};
use gridsim_proxy::{Gateway, LoadBalancer, RandomLoadBalancer, Service};
use gridsim_server::{ServerConfig, ServerInstance, StaticEndpointConfig};
use gridsim_telemetry::{JsonlSink, LogSink, MemorySink};

use crate::config::{ComponentDecl, ContextSpec, ScenarioFile};

/// A `server` declaration: instance parameters plus the name of its
/// endpoint table.
#[derive(Debug, Clone, Deserialize)]
struct ServerDecl {
    endpoint: String,
    #[serde(flatten)]
    config: ServerConfig,
}

/// A `service` declaration.
#[derive(Debug, Clone, Deserialize)]
struct ServiceDecl {
    instance: String,
    #[serde(default)]
    replicas: Option<usize>,
    #[serde(default)]
    load_balancer: Option<String>,
    #[serde(default)]
    autoscaler: Option<String>,
}

/// A `gateway` declaration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct GatewayDecl {
    hosts: Vec<String>,
}

/// A `jsonl-sink` declaration.
#[derive(Debug, Clone, Deserialize)]
struct JsonlSinkDecl {
    path: String,
}

/// Accumulates declarations and assembles the simulation context.
#[derive(Default)]
pub struct ScenarioBuilder {
    declarations: HashMap<String, ComponentDecl>,
    unnamed: u64,
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        ScenarioBuilder::default()
    }

    /// Add one declaration, generating a name if none was given.
    pub fn add_declaration(&mut self, mut decl: ComponentDecl) -> &mut Self {
        let name = decl.name.clone().unwrap_or_else(|| {
            let generated = format!("{}-{}", decl.kind, self.unnamed);
            self.unnamed += 1;
            generated
        });
        decl.name = Some(name.clone());
        self.declarations.insert(name, decl);
        self
    }

    /// Add every declaration from a TOML document.
    pub fn add_str(&mut self, contents: &str) -> anyhow::Result<&mut Self> {
        for decl in ScenarioFile::from_str(contents)?.component {
            self.add_declaration(decl);
        }
        Ok(self)
    }

    /// Add every declaration from one scenario file.
    pub fn add_file(&mut self, path: &Path) -> anyhow::Result<&mut Self> {
        let scenario = ScenarioFile::from_path(path)
            .with_context(|| format!("loading scenario file {}", path.display()))?;
        for decl in scenario.component {
            self.add_declaration(decl);
        }
        debug!(path = %path.display(), "scenario file loaded");
        Ok(self)
    }

    /// Add every `.toml` file under a folder, recursively.
    pub fn add_folder(&mut self, path: &Path) -> anyhow::Result<&mut Self> {
        for entry in std::fs::read_dir(path)
            .with_context(|| format!("reading scenario folder {}", path.display()))?
        {
            let entry = entry?;
            let entry_path = entry.path();
            if entry_path.is_dir() {
                self.add_folder(&entry_path)?;
            } else if entry_path.extension().is_some_and(|ext| ext == "toml") {
                self.add_file(&entry_path)?;
            }
        }
        Ok(self)
    }

    fn declaration(&self, name: &str) -> anyhow::Result<&ComponentDecl> {
        self.declarations
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("no component declaration named '{name}'"))
    }

    fn declaration_of_kind(&self, name: &str, kind: &str) -> anyhow::Result<&ComponentDecl> {
        let decl = self.declaration(name)?;
        if decl.kind != kind {
            bail!(
                "component '{name}' has kind '{}', expected '{kind}'",
                decl.kind
            );
        }
        Ok(decl)
    }

    /// Assemble the simulation context from the single `context`
    /// declaration.
    pub fn build(&self, seed: u64) -> anyhow::Result<SimContext> {
        let mut contexts = self.declarations.values().filter(|d| d.kind == "context");
        let context_decl = contexts
            .next()
            .ok_or_else(|| anyhow::anyhow!("no 'context' declaration found"))?;
        if contexts.next().is_some() {
            bail!("multiple 'context' declarations found");
        }
        let spec: ContextSpec = context_decl.parse_spec()?;

        let ctx = SimContext::new(seed);

        // Collaborators first: gateway, sink, network.
        let gateway = match &spec.gateway {
            Some(name) => self.build_gateway(&ctx, name)?,
            None => Gateway::new(&ctx, None, Vec::new()),
        };
        ctx.set_gateway(gateway as Rc<dyn Proxy>);

        let telemetry: Rc<dyn Telemetry> = match &spec.telemetry {
            Some(name) => self.build_sink(name)?,
            None => Rc::new(LogSink::new()),
        };
        ctx.set_telemetry(telemetry);

        if let Some(name) = &spec.network {
            self.declaration_of_kind(name, "zero-delay-network")?;
            ctx.set_network(Rc::new(ZeroDelayNetwork::new(&ctx.kernel())));
        }

        for name in &spec.components {
            self.build_component(&ctx, name)?;
        }
        info!(components = spec.components.len(), "scenario assembled");
        Ok(ctx)
    }

    fn build_gateway(&self, ctx: &SimContext, name: &str) -> anyhow::Result<Rc<Gateway>> {
        let decl = self.declaration_of_kind(name, "gateway")?;
        let spec: GatewayDecl = decl.parse_spec()?;
        Ok(Gateway::new(ctx, Some(name), spec.hosts))
    }

    fn build_sink(&self, name: &str) -> anyhow::Result<Rc<dyn Telemetry>> {
        let decl = self.declaration(name)?;
        match decl.kind.as_str() {
            "log-sink" => Ok(Rc::new(LogSink::new())),
            "memory-sink" => Ok(Rc::new(MemorySink::new())),
            "jsonl-sink" => {
                let spec: JsonlSinkDecl = decl.parse_spec()?;
                let sink = JsonlSink::create(Path::new(&spec.path))
                    .with_context(|| format!("creating telemetry file {}", spec.path))?;
                Ok(Rc::new(sink))
            }
            other => bail!("'{name}' is not a telemetry sink (kind '{other}')"),
        }
    }

    /// The kind registry: builds one runnable component by name.
    fn build_component(&self, ctx: &SimContext, name: &str) -> anyhow::Result<()> {
        let decl = self.declaration(name)?;
        match decl.kind.as_str() {
            "service" => self.build_service(ctx, name, decl),
            "rps-load-generator" => {
                let config: RpsConfig = decl.parse_spec()?;
                RpsLoadGenerator::new(ctx, Some(name), config.params()?);
                Ok(())
            }
            "dynamic-rps-load-generator" => {
                let config: DynamicRpsConfig = decl.parse_spec()?;
                DynamicRpsLoadGenerator::new(ctx, Some(name), config.params()?);
                Ok(())
            }
            other => bail!("component '{name}' has unbuildable kind '{other}'"),
        }
    }

    fn build_service(
        &self,
        ctx: &SimContext,
        name: &str,
        decl: &ComponentDecl,
    ) -> anyhow::Result<()> {
        let spec: ServiceDecl = decl.parse_spec()?;

        let server_decl = self.declaration_of_kind(&spec.instance, "server")?;
        let server: ServerDecl = server_decl.parse_spec()?;
        let endpoint_decl = self.declaration_of_kind(&server.endpoint, "static-endpoint")?;
        let endpoint_config: StaticEndpointConfig = endpoint_decl.parse_spec()?;
        let endpoint_factory = endpoint_config.build_factory()?;
        let params = server.config.params()?;

        let factory: InstanceFactory = Rc::new(move |ctx: &SimContext, service: &str| {
            let instance_name = ctx.gen_name(&format!("{service}-inst"));
            ServerInstance::new(
                ctx,
                &instance_name,
                Some(service),
                params.clone(),
                &endpoint_factory,
            ) as Rc<dyn Instance>
        });

        let balancer: Option<Rc<dyn LoadBalancer>> = match &spec.load_balancer {
            Some(lb_name) => {
                self.declaration_of_kind(lb_name, "random-load-balancer")?;
                Some(Rc::new(RandomLoadBalancer::new(ctx)))
            }
            None => None,
        };

        let service = Service::new(ctx, name, factory, balancer, spec.replicas.unwrap_or(1));

        if let Some(scaler_name) = &spec.autoscaler {
            let scaler_decl = self.declaration_of_kind(scaler_name, "horizontal-autoscaler")?;
            let config: AutoscalerConfig = scaler_decl.parse_spec()?;
            HorizontalAutoscaler::new(ctx, Rc::clone(&service), config.params()?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsim_core::Component;
    use std::time::Duration;

    const SCENARIO: &str = r#"
[[component]]
kind = "context"
name = "main"
[component.spec]
gateway = "gw"
components = ["my_service", "traffic"]

[[component]]
kind = "gateway"
name = "gw"
[component.spec]
hosts = ["my_service"]

[[component]]
kind = "service"
name = "my_service"
[component.spec]
instance = "web-server"
replicas = 2

[[component]]
kind = "server"
name = "web-server"
[component.spec]
endpoint = "web-endpoints"
threads = 4
cpu_quota = "500m"

[[component]]
kind = "static-endpoint"
name = "web-endpoints"
[component.spec]
endpoints = [{ endpoint_name = "/api", computation_time = { mean = 0.06 } }]

[[component]]
kind = "rps-load-generator"
name = "traffic"
[component.spec]
rps = 5
host = "my_service"
endpoint = "/api"
"#;

    #[test]
    fn full_scenario_assembles_and_runs() {
        let mut builder = ScenarioBuilder::new();
        builder.add_str(SCENARIO).unwrap();
        let ctx = builder.build(1).unwrap();

        assert!(ctx.component("my_service").is_some());
        assert!(ctx.component("gw").is_some());

        // Traffic flows without aborting the kernel.
        ctx.simulate(Duration::from_secs(5)).unwrap();
        let service = ctx.component("my_service").unwrap();
        assert_eq!(service.metric("instance_num"), Some(2.0));
        ctx.close();
    }

    #[test]
    fn missing_context_declaration_fails() {
        let mut builder = ScenarioBuilder::new();
        builder
            .add_str(
                r#"
[[component]]
kind = "log-sink"
name = "sink"
"#,
            )
            .unwrap();
        let err = builder.build(0).unwrap_err();
        assert!(err.to_string().contains("no 'context' declaration"));
    }

    #[test]
    fn dangling_reference_is_reported_by_name() {
        let mut builder = ScenarioBuilder::new();
        builder
            .add_str(
                r#"
[[component]]
kind = "context"
name = "main"
[component.spec]
components = ["ghost"]
"#,
            )
            .unwrap();
        let err = builder.build(0).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let mut builder = ScenarioBuilder::new();
        builder
            .add_str(
                r#"
[[component]]
kind = "context"
name = "main"
[component.spec]
components = ["svc"]

[[component]]
kind = "service"
name = "svc"
[component.spec]
instance = "not-a-server"

[[component]]
kind = "log-sink"
name = "not-a-server"
"#,
            )
            .unwrap();
        let err = builder.build(0).unwrap_err();
        assert!(err.to_string().contains("expected 'server'"));
    }

    #[test]
    fn unnamed_declarations_get_generated_names() {
        let mut builder = ScenarioBuilder::new();
        builder
            .add_str(
                r#"
[[component]]
kind = "log-sink"

[[component]]
kind = "log-sink"
"#,
            )
            .unwrap();
        assert!(builder.declarations.contains_key("log-sink-0"));
        assert!(builder.declarations.contains_key("log-sink-1"));
    }
}
