//! Compatibility validation, variable resolution and manifest synthesis.
//!
//! This crate takes a loaded `ApplicationDescription` and one deployment of an
//! `EnvironmentDescription`, checks that the two fit together (version range,
//! secrets, configs, variables, routing), resolves every service's final
//! environment and produces a deterministic, ordered set of cluster manifests.
//! The `Compiler` facade ties the stages together.

pub mod binding;
pub mod compiler;
pub mod manifest;
pub mod options;
pub mod probe;
pub mod render;
pub mod resolve;
pub mod synthesize;
pub mod validate;
pub mod version;

pub use binding::{
    ConfigSource, ResolvedBinding, ResolvedConfig, ResolvedRoute, ResolvedSecret, ResolvedService,
    ResourceQuantities, Resources,
};
pub use compiler::{CompileResult, Compiler};
pub use manifest::ManifestObject;
pub use options::{CompileOptions, RestartPolicy, UrlScheme};
pub use probe::{FsProbe, HostProbe, StaticProbe};
pub use render::{config_map, digest_documents, ManifestDigest, ManifestSet, RenderError, RenderedDocument};
pub use resolve::{resolve, ResolveError};
pub use synthesize::synthesize;
pub use validate::{validate, ErrorKind, ValidationContext, ValidationError, ValidationReport};
pub use version::{matches, matches_str};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("descriptor error: {0}")]
    Descriptor(#[from] berth_schema::DescriptorError),
    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),
    #[error("{0}")]
    Validation(ValidationReport),
    #[error("render error: {0}")]
    Render(#[from] RenderError),
}
