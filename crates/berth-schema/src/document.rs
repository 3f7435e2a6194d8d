//! Raw YAML documents, exactly as written on disk.
//!
//! These structs mirror the descriptor files one-to-one. They are converted
//! into the typed descriptors in [`crate::application`] and
//! [`crate::environment`], which is where load-time rules are enforced.

use crate::types::{ConfigName, HostName, OrderedMap, SecretName, ServiceName};
use crate::version::VersionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse descriptor: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
    #[error("no {expected} found in {}", dir.display())]
    NotFound { dir: PathBuf, expected: String },
    #[error("application version: {0}")]
    Version(#[from] VersionError),
    #[error("invalid declaration '{input}': {reason}")]
    InvalidAssignment { input: String, reason: String },
    #[error("env file line {line}: {reason}")]
    EnvFile { line: usize, reason: String },
    #[error("service '{0}' is declared in both app_services and extra_services")]
    DuplicateService(ServiceName),
    #[error("relative variable '{name}' must have a value starting with '/', got '{value}'")]
    InvalidRelativeVariable { name: String, value: String },
    #[error("internal variable '{0}' must have a value")]
    MissingInternalValue(String),
    #[error("optional variable '{0}' cannot have a default value")]
    OptionalWithDefault(String),
    #[error("app service '{service}' must not pin an image version: '{image}'")]
    ExplicitVersionOnAppService { service: ServiceName, image: String },
    #[error("extra service '{service}' must pin an image version: '{image}'")]
    MissingVersionOnExtraService { service: ServiceName, image: String },
    #[error("service '{service}' references undeclared secret '{secret}'")]
    UndeclaredSecret {
        service: ServiceName,
        secret: SecretName,
    },
    #[error("service '{service}' references undeclared config '{config}'")]
    UndeclaredConfig {
        service: ServiceName,
        config: ConfigName,
    },
    #[error("secret '{0}' must specify exactly one of path: or variable:")]
    InvalidSecretMount(SecretName),
    #[error("invalid port mapping '{0}', expected '<external>:<internal>'")]
    InvalidPort(String),
}

// ---------------------------------------------------------------------------
// Application document (appspec.yaml)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppDocument {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub environment: EnvironmentScopesDoc,
    #[serde(default)]
    pub app_services: OrderedMap<ServiceName, ServiceDoc>,
    #[serde(default)]
    pub extra_services: OrderedMap<ServiceName, ServiceDoc>,
    #[serde(default)]
    pub configs: OrderedMap<ConfigName, Vec<String>>,
    #[serde(default)]
    pub secrets: Option<SecretsDoc>,
}

/// A file carrying only additional `extra_services`, referenced from a
/// deployment's `application.extra` list.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExtraServicesDocument {
    #[serde(default)]
    pub extra_services: OrderedMap<ServiceName, ServiceDoc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentScopesDoc {
    #[serde(default)]
    pub external: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
    #[serde(default)]
    pub relative: Vec<String>,
    #[serde(default)]
    pub internal: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SecretsDoc {
    List(Vec<SecretName>),
    Map(OrderedMap<SecretName, Option<serde_yaml::Value>>),
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Public,
    #[default]
    Internal,
    Job,
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::Job => "job",
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceDoc {
    #[serde(rename = "type", default)]
    pub service_type: ServiceType,
    pub image: String,
    #[serde(default)]
    pub environment: Vec<String>,
    #[serde(default)]
    pub configs: Vec<OrderedMap<ConfigName, String>>,
    #[serde(default)]
    pub secrets: Vec<ServiceSecretDoc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ServiceSecretDoc {
    Name(SecretName),
    Detailed(OrderedMap<SecretName, Option<SecretMountDoc>>),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SecretMountDoc {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub variable: Option<String>,
}

// ---------------------------------------------------------------------------
// Environment document (envspec.yaml)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentDocument {
    pub ingress: IngressDoc,
    #[serde(default)]
    pub registry: BTreeMap<String, String>,
    #[serde(default)]
    pub deployments: OrderedMap<String, DeploymentDoc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IngressDoc {
    pub name: String,
    pub hosts: OrderedMap<HostName, HostDomainsDoc>,
    #[serde(default)]
    pub tls: Option<TlsDoc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum HostDomainsDoc {
    Single(String),
    Multiple(Vec<String>),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TlsDoc {
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub letsencrypt: Option<LetsEncryptDoc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LetsEncryptDoc {
    pub email: String,
    #[serde(default)]
    pub server: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeploymentDoc {
    pub application: ApplicationRefDoc,
    #[serde(default)]
    pub host: Option<HostName>,
    #[serde(default)]
    pub environment: Option<OverridesDoc>,
    #[serde(default)]
    pub configs: OrderedMap<ConfigName, String>,
    #[serde(default)]
    pub secrets: OrderedMap<SecretName, Option<SecretMountDoc>>,
    #[serde(default)]
    pub defaults: Option<DefaultsDoc>,
    #[serde(default)]
    pub services: OrderedMap<ServiceName, ServiceBindingDoc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ApplicationRefDoc {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub extra: Vec<String>,
}

/// Deployment overrides: a path to a dotenv file, or an inline list.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OverridesDoc {
    File(String),
    Inline(Vec<String>),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DefaultsDoc {
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub resources: Option<ResourcesDoc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ResourcesDoc {
    #[serde(default)]
    pub requests: Option<QuantitiesDoc>,
    #[serde(default)]
    pub limits: Option<QuantitiesDoc>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct QuantitiesDoc {
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceBindingDoc {
    #[serde(default)]
    pub host: Option<HostName>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub strip_prefix: Option<bool>,
    #[serde(default)]
    pub prefixes: Option<OrderedMap<String, Option<PrefixOptionsDoc>>>,
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub resources: Option<ResourcesDoc>,
    #[serde(default)]
    pub ports: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PrefixOptionsDoc {
    #[serde(default)]
    pub strip: Option<bool>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub fn parse_app_document(input: &str) -> Result<AppDocument, DescriptorError> {
    Ok(serde_yaml::from_str(input)?)
}

pub fn parse_environment_document(input: &str) -> Result<EnvironmentDocument, DescriptorError> {
    Ok(serde_yaml::from_str(input)?)
}

pub fn parse_extra_services_document(
    input: &str,
) -> Result<ExtraServicesDocument, DescriptorError> {
    Ok(serde_yaml::from_str(input)?)
}

pub(crate) fn read_file(path: &Path) -> Result<String, DescriptorError> {
    fs::read_to_string(path).map_err(|e| DescriptorError::Read {
        path: path.to_path_buf(),
        source: e,
    })
}
