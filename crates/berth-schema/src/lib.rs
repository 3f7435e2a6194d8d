//! Descriptor loading for berth.
//!
//! This crate defines the schema layer: the raw YAML documents (`AppDocument`,
//! `EnvironmentDocument`), the typed descriptors built from them
//! (`ApplicationDescription`, `EnvironmentDescription`) together with the
//! load-time rules, dotenv-style override parsing, and the `Version` /
//! `VersionConstraint` types.

pub mod application;
pub mod document;
pub mod dotenv;
pub mod environment;
pub mod types;
pub mod version;

pub use application::{
    find_application_file, load_application, merge_extra_file, parse_application_str,
    ApplicationDescription, ConfigMount, EnvSelection, ImageRef, SecretMount, SecretUse,
    ServiceDecl, ServiceOrigin, ServiceType, Variable, VariableScopes, SELECT_ALL,
};
pub use document::DescriptorError;
pub use dotenv::Assignment;
pub use environment::{
    load_environment, parse_environment_str, ApplicationRef, Defaults, EnvironmentDeployment,
    EnvironmentDescription, Ingress, IngressTls, LetsEncrypt, PortMapping, Prefix, Quantities,
    ResourceOverrides, ServiceBinding,
};
pub use types::{ConfigName, HostName, OrderedMap, SecretName, ServiceName};
pub use version::{Version, VersionConstraint, VersionError};
