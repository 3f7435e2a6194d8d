use crate::binding::ResolvedBinding;
use crate::options::CompileOptions;
use crate::probe::{FsProbe, HostProbe};
use crate::render::ManifestSet;
use crate::synthesize::synthesize;
use crate::validate::{validate, ValidationContext, ValidationReport};
use crate::CoreError;
use berth_schema::{
    merge_extra_file, ApplicationDescription, EnvironmentDeployment, EnvironmentDescription,
};
use std::borrow::Cow;
use tracing::{debug, info};

/// Entry point tying validation and synthesis together for a loaded
/// application and environment.
pub struct Compiler {
    options: CompileOptions,
    probe: Box<dyn HostProbe>,
}

/// Result of a successful compilation.
#[derive(Debug, Clone)]
pub struct CompileResult {
    pub binding: ResolvedBinding,
    pub manifests: ManifestSet,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            probe: Box::new(FsProbe),
        }
    }

    /// Replace the filesystem probe used for config directory checks.
    #[must_use]
    pub fn with_probe(mut self, probe: impl HostProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// The application as seen by `deployment`: its own services plus any
    /// extra-service files the deployment lists.
    pub fn application_for<'a>(
        &self,
        app: &'a ApplicationDescription,
        deployment: &EnvironmentDeployment,
    ) -> Result<Cow<'a, ApplicationDescription>, CoreError> {
        if deployment.application.extra.is_empty() {
            return Ok(Cow::Borrowed(app));
        }
        let mut merged = app.clone();
        for path in &deployment.application.extra {
            merged = merge_extra_file(&merged, path)?;
        }
        Ok(Cow::Owned(merged))
    }

    fn find<'e>(
        env: &'e EnvironmentDescription,
        deployment: &str,
    ) -> Result<&'e EnvironmentDeployment, CoreError> {
        env.deployment(deployment)
            .ok_or_else(|| CoreError::DeploymentNotFound(deployment.to_owned()))
    }

    /// Validate one deployment, returning every violation on failure.
    pub fn validate(
        &self,
        app: &ApplicationDescription,
        env: &EnvironmentDescription,
        deployment: &str,
    ) -> Result<ResolvedBinding, CoreError> {
        let target = Self::find(env, deployment)?;
        self.validate_deployment(app, env, target)
    }

    fn validate_deployment(
        &self,
        app: &ApplicationDescription,
        env: &EnvironmentDescription,
        deployment: &EnvironmentDeployment,
    ) -> Result<ResolvedBinding, CoreError> {
        let app = self.application_for(app, deployment)?;
        let ctx = ValidationContext {
            options: &self.options,
            registry: &env.registry,
            probe: self.probe.as_ref(),
        };
        debug!(app = %app.name, deployment = %deployment.name, "validating");
        validate(&app, deployment, &env.ingress, &ctx).map_err(|errors| {
            CoreError::Validation(ValidationReport::new(&deployment.name, errors))
        })
    }

    /// Validate every deployment bound to `app`, in declaration order.
    pub fn validate_all(
        &self,
        app: &ApplicationDescription,
        env: &EnvironmentDescription,
    ) -> Vec<(String, Result<ResolvedBinding, CoreError>)> {
        env.deployments_for(&app.name)
            .map(|deployment| {
                (
                    deployment.name.clone(),
                    self.validate_deployment(app, env, deployment),
                )
            })
            .collect()
    }

    /// Validate and synthesize one deployment. Nothing is produced unless
    /// validation passes completely.
    pub fn compile(
        &self,
        app: &ApplicationDescription,
        env: &EnvironmentDescription,
        deployment: &str,
    ) -> Result<CompileResult, CoreError> {
        let binding = self.validate(app, env, deployment)?;
        let manifests = synthesize(&binding, &env.ingress, &self.options);
        info!(
            app = %binding.application(),
            deployment = %binding.deployment(),
            objects = manifests.len(),
            "compiled deployment"
        );
        Ok(CompileResult { binding, manifests })
    }
}
