//! The validated, fully resolved input of the synthesizer.

use berth_schema::{
    ConfigName, HostName, PortMapping, Prefix, SecretMount, SecretName, ServiceName, ServiceType,
    Version,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Key under which every secret object stores its value.
pub const SECRET_KEY: &str = "value";

pub const DEFAULT_REPLICAS: u32 = 1;
pub const DEFAULT_CPU: &str = "100m";
pub const DEFAULT_MEMORY: &str = "128Mi";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceQuantities {
    pub cpu: String,
    pub memory: String,
}

impl Default for ResourceQuantities {
    fn default() -> Self {
        Self {
            cpu: DEFAULT_CPU.to_owned(),
            memory: DEFAULT_MEMORY.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resources {
    pub requests: ResourceQuantities,
    pub limits: ResourceQuantities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSecret {
    pub secret: SecretName,
    /// Name of the cluster secret object, `<app>-<secret>`.
    pub object: String,
    #[serde(serialize_with = "serialize_mount")]
    pub mount: SecretMount,
}

fn serialize_mount<S: serde::Serializer>(mount: &SecretMount, s: S) -> Result<S::Ok, S::Error> {
    match mount {
        SecretMount::File(path) => s.collect_str(&format_args!("file:{path}")),
        SecretMount::EnvVar(var) => s.collect_str(&format_args!("env:{var}")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    pub config: ConfigName,
    /// Name of the config map object, `<app>-<config>`.
    pub object: String,
    pub mount_path: String,
}

/// Where a bound config's files come from on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSource {
    pub config: ConfigName,
    pub object: String,
    pub dir: PathBuf,
    /// Files the application declares for this config. Empty means every
    /// file in `dir`.
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRoute {
    pub host: HostName,
    pub domains: Vec<String>,
    #[serde(serialize_with = "serialize_prefixes")]
    pub prefixes: Vec<Prefix>,
}

fn serialize_prefixes<S: serde::Serializer>(prefixes: &[Prefix], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(prefixes.iter().map(|p| {
        if p.strip {
            format!("{} (strip)", p.path)
        } else {
            p.path.clone()
        }
    }))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedService {
    pub name: ServiceName,
    /// `<app>-<service>`, used for every object the service produces.
    pub full_name: String,
    pub service_type: ServiceType,
    pub image: String,
    pub environment: BTreeMap<String, String>,
    pub secrets: Vec<ResolvedSecret>,
    pub configs: Vec<ResolvedConfig>,
    pub replicas: u32,
    pub resources: Resources,
    #[serde(serialize_with = "serialize_ports")]
    pub ports: Vec<PortMapping>,
    pub route: Option<ResolvedRoute>,
}

fn serialize_ports<S: serde::Serializer>(ports: &[PortMapping], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(ports.iter().map(ToString::to_string))
}

/// Output of a successful validation. Only the validator can build one, so
/// holding a `ResolvedBinding` means every cross-document check passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedBinding {
    application: String,
    version: Version,
    deployment: String,
    services: Vec<ResolvedService>,
    config_sources: Vec<ConfigSource>,
}

impl ResolvedBinding {
    pub(crate) fn new(
        application: String,
        version: Version,
        deployment: String,
        services: Vec<ResolvedService>,
        config_sources: Vec<ConfigSource>,
    ) -> Self {
        Self {
            application,
            version,
            deployment,
            services,
            config_sources,
        }
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    /// Services in emission order.
    pub fn services(&self) -> &[ResolvedService] {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&ResolvedService> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn config_sources(&self) -> &[ConfigSource] {
        &self.config_sources
    }
}

pub(crate) fn object_name(app: &str, name: &str) -> String {
    format!("{app}-{name}")
}
