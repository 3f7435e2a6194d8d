//! Cross-document compatibility checks.
//!
//! [`validate`] runs every check against an (application, deployment) pair and
//! collects all violations before returning. On success it assembles the
//! [`ResolvedBinding`] the synthesizer consumes.

use crate::binding::{
    object_name, ConfigSource, ResolvedBinding, ResolvedConfig, ResolvedRoute, ResolvedSecret,
    ResolvedService, ResourceQuantities, Resources, DEFAULT_REPLICAS,
};
use crate::options::CompileOptions;
use crate::probe::HostProbe;
use crate::resolve::{resolve, ResolveError};
use crate::version::matches;
use berth_schema::{
    ApplicationDescription, ConfigName, EnvironmentDeployment, HostName, Ingress, PortMapping,
    Prefix, Quantities, ResourceOverrides, SecretMount, SecretName, ServiceBinding, ServiceDecl,
    ServiceName, ServiceOrigin, ServiceType, Version, VersionConstraint,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("deployment is bound to application '{expected}', but the descriptor is '{found}'")]
    ApplicationMismatch { expected: String, found: String },
    #[error("invalid version format: '{0}' (expected MAJOR.MINOR.PATCH, optionally prefixed by '^' or '=')")]
    InvalidVersionFormat(String),
    #[error("application version {version} does not satisfy '{constraint}'")]
    VersionMismatch { constraint: String, version: Version },
    #[error("deployment binds service '{0}', which the application does not declare")]
    UnknownService(ServiceName),
    #[error("app service '{service}' must not pin an image version: '{image}'")]
    ExplicitVersionOnAppService { service: ServiceName, image: String },
    #[error("extra service '{service}' must pin an image version: '{image}'")]
    MissingVersionOnExtraService { service: ServiceName, image: String },
    #[error("service '{service}' image namespace '{namespace}' has no registry mapping")]
    UnknownRegistryNamespace {
        service: ServiceName,
        namespace: String,
    },
    #[error("secret '{0}' is not bound by the deployment")]
    UnboundSecret(SecretName),
    #[error("{context} references secret '{secret}', which the application does not declare")]
    UnknownSecret { secret: SecretName, context: String },
    #[error("config '{config}' is not bound: {reason}")]
    UnboundConfig { config: ConfigName, reason: String },
    #[error("{context} references config '{config}', which the application does not declare")]
    UnknownConfig { config: ConfigName, context: String },
    #[error("config '{config}' requires file '{file}' in {}", dir.display())]
    MissingConfigFile {
        config: ConfigName,
        file: String,
        dir: PathBuf,
    },
    #[error("public service '{service}' has no route: {reason}")]
    MissingRouteBinding { service: ServiceName, reason: String },
    #[error("{context} uses ingress host '{host}', which the ingress does not declare")]
    UnknownIngressHost { host: HostName, context: String },
    #[error("{service_type} service '{service}' must not declare prefix routing")]
    UnexpectedRouteBinding {
        service: ServiceName,
        service_type: ServiceType,
    },
    #[error("service '{service}' has conflicting routes: {reason}")]
    ConflictingRouteBinding { service: ServiceName, reason: String },
    #[error("service '{service}' route prefix '{prefix}' must start with '/'")]
    InvalidRoutePrefix { service: ServiceName, prefix: String },
    #[error("service '{service}' requires variable '{variable}', which has no default and no override")]
    MissingRequiredVariable {
        service: ServiceName,
        variable: String,
    },
    #[error("service '{service}' references undefined variable '{variable}'")]
    UndefinedVariable {
        service: ServiceName,
        variable: String,
    },
    #[error("service '{service}' selects relative variable '{variable}' but has no ingress host to resolve it against")]
    UnresolvableRelativeVariable {
        service: ServiceName,
        variable: String,
    },
}

impl From<ResolveError> for ValidationError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::MissingRequiredVariable { service, variable } => {
                Self::MissingRequiredVariable { service, variable }
            }
            ResolveError::UndefinedVariable { service, variable } => {
                Self::UndefinedVariable { service, variable }
            }
            ResolveError::UnresolvableRelativeVariable { service, variable } => {
                Self::UnresolvableRelativeVariable { service, variable }
            }
        }
    }
}

/// Fieldless mirror of [`ValidationError`], for matching and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ErrorKind {
    ApplicationMismatch,
    InvalidVersionFormat,
    VersionMismatch,
    UnknownService,
    ExplicitVersionOnAppService,
    MissingVersionOnExtraService,
    UnknownRegistryNamespace,
    UnboundSecret,
    UnknownSecret,
    UnboundConfig,
    UnknownConfig,
    MissingConfigFile,
    MissingRouteBinding,
    UnknownIngressHost,
    UnexpectedRouteBinding,
    ConflictingRouteBinding,
    InvalidRoutePrefix,
    MissingRequiredVariable,
    UndefinedVariable,
    UnresolvableRelativeVariable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ApplicationMismatch { .. } => ErrorKind::ApplicationMismatch,
            Self::InvalidVersionFormat(_) => ErrorKind::InvalidVersionFormat,
            Self::VersionMismatch { .. } => ErrorKind::VersionMismatch,
            Self::UnknownService(_) => ErrorKind::UnknownService,
            Self::ExplicitVersionOnAppService { .. } => ErrorKind::ExplicitVersionOnAppService,
            Self::MissingVersionOnExtraService { .. } => ErrorKind::MissingVersionOnExtraService,
            Self::UnknownRegistryNamespace { .. } => ErrorKind::UnknownRegistryNamespace,
            Self::UnboundSecret(_) => ErrorKind::UnboundSecret,
            Self::UnknownSecret { .. } => ErrorKind::UnknownSecret,
            Self::UnboundConfig { .. } => ErrorKind::UnboundConfig,
            Self::UnknownConfig { .. } => ErrorKind::UnknownConfig,
            Self::MissingConfigFile { .. } => ErrorKind::MissingConfigFile,
            Self::MissingRouteBinding { .. } => ErrorKind::MissingRouteBinding,
            Self::UnknownIngressHost { .. } => ErrorKind::UnknownIngressHost,
            Self::UnexpectedRouteBinding { .. } => ErrorKind::UnexpectedRouteBinding,
            Self::ConflictingRouteBinding { .. } => ErrorKind::ConflictingRouteBinding,
            Self::InvalidRoutePrefix { .. } => ErrorKind::InvalidRoutePrefix,
            Self::MissingRequiredVariable { .. } => ErrorKind::MissingRequiredVariable,
            Self::UndefinedVariable { .. } => ErrorKind::UndefinedVariable,
            Self::UnresolvableRelativeVariable { .. } => ErrorKind::UnresolvableRelativeVariable,
        }
    }
}

/// Every violation found for one (application, deployment) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub deployment: String,
    errors: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn new(deployment: impl Into<String>, errors: Vec<ValidationError>) -> Self {
        Self {
            deployment: deployment.into(),
            errors,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationError> {
        self.errors.iter()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.errors.iter().map(ValidationError::kind).collect()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deployment '{}' failed validation with {} error(s)",
            self.deployment,
            self.errors.len()
        )?;
        for err in &self.errors {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ValidationReport {
    type Item = &'a ValidationError;
    type IntoIter = std::slice::Iter<'a, ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

/// Everything validation needs besides the two descriptors.
pub struct ValidationContext<'a> {
    pub options: &'a CompileOptions,
    /// Image namespace to registry host. Empty disables rewriting.
    pub registry: &'a BTreeMap<String, String>,
    pub probe: &'a dyn HostProbe,
}

/// Error list with first-seen ordering and no duplicates.
#[derive(Default)]
struct Collector(Vec<ValidationError>);

impl Collector {
    fn push(&mut self, err: ValidationError) {
        if !self.0.contains(&err) {
            self.0.push(err);
        }
    }

    fn extend(&mut self, errs: impl IntoIterator<Item = ValidationError>) {
        for err in errs {
            self.push(err);
        }
    }
}

pub fn validate(
    app: &ApplicationDescription,
    deployment: &EnvironmentDeployment,
    ingress: &Ingress,
    ctx: &ValidationContext<'_>,
) -> Result<ResolvedBinding, Vec<ValidationError>> {
    let mut errors = Collector::default();

    check_application(app, deployment, &mut errors);
    check_secrets(app, deployment, &mut errors);
    let config_sources = check_configs(app, deployment, ctx.probe, &mut errors);

    for name in deployment.services.keys() {
        if app.service(name).is_none() {
            errors.push(ValidationError::UnknownService(name.clone()));
        }
    }

    for (name, _) in &deployment.overrides {
        if !app.variables.declares(name) {
            warn!(
                deployment = %deployment.name,
                variable = %name,
                "override for a variable the application does not declare is ignored"
            );
        }
    }

    let default_host = deployment.host.as_ref().and_then(|host| {
        if ingress.hosts.contains_key(host) {
            Some(host)
        } else {
            errors.push(ValidationError::UnknownIngressHost {
                host: host.clone(),
                context: format!("deployment '{}'", deployment.name),
            });
            None
        }
    });

    let mut claimed: BTreeMap<(String, String), ServiceName> = BTreeMap::new();
    let mut services = Vec::new();
    for decl in ordered_services(app, deployment) {
        let binding = deployment.services.get(&decl.name);
        if let Some(service) = resolve_service(
            app,
            deployment,
            ingress,
            ctx,
            decl,
            binding,
            default_host,
            &mut claimed,
            &mut errors,
        ) {
            services.push(service);
        }
    }

    if !errors.0.is_empty() {
        debug!(
            app = %app.name,
            deployment = %deployment.name,
            errors = errors.0.len(),
            "validation failed"
        );
        return Err(errors.0);
    }

    debug!(
        app = %app.name,
        deployment = %deployment.name,
        services = services.len(),
        "validation passed"
    );
    Ok(ResolvedBinding::new(
        app.name.clone(),
        app.version.clone(),
        deployment.name.clone(),
        services,
        config_sources,
    ))
}

fn check_application(
    app: &ApplicationDescription,
    deployment: &EnvironmentDeployment,
    errors: &mut Collector,
) {
    if deployment.application.name != app.name {
        errors.push(ValidationError::ApplicationMismatch {
            expected: deployment.application.name.clone(),
            found: app.name.clone(),
        });
    }

    let raw = deployment.application.version.as_deref().unwrap_or_default();
    match raw.parse::<VersionConstraint>() {
        Ok(constraint) => {
            if !matches(&constraint, &app.version) {
                errors.push(ValidationError::VersionMismatch {
                    constraint: raw.trim().to_owned(),
                    version: app.version.clone(),
                });
            }
        }
        Err(_) => errors.push(ValidationError::InvalidVersionFormat(raw.to_owned())),
    }
}

fn check_secrets(
    app: &ApplicationDescription,
    deployment: &EnvironmentDeployment,
    errors: &mut Collector,
) {
    for secret in &app.secrets {
        if !deployment.secrets.contains_key(secret) {
            errors.push(ValidationError::UnboundSecret(secret.clone()));
        }
    }
    for secret in deployment.secrets.keys() {
        if !app.declares_secret(secret) {
            errors.push(ValidationError::UnknownSecret {
                secret: secret.clone(),
                context: format!("deployment '{}'", deployment.name),
            });
        }
    }
    for service in app.services() {
        for used in &service.secrets {
            if !app.declares_secret(&used.secret) {
                errors.push(ValidationError::UnknownSecret {
                    secret: used.secret.clone(),
                    context: format!("service '{}'", service.name),
                });
            }
        }
    }
}

fn check_configs(
    app: &ApplicationDescription,
    deployment: &EnvironmentDeployment,
    probe: &dyn HostProbe,
    errors: &mut Collector,
) -> Vec<ConfigSource> {
    let mut sources = Vec::new();

    for (config, files) in &app.configs {
        let Some(dir) = deployment.configs.get(config) else {
            errors.push(ValidationError::UnboundConfig {
                config: config.clone(),
                reason: format!("deployment '{}' has no directory for it", deployment.name),
            });
            continue;
        };
        if !probe.is_dir(dir) {
            errors.push(ValidationError::UnboundConfig {
                config: config.clone(),
                reason: format!("directory {} does not exist", dir.display()),
            });
            continue;
        }
        let mut complete = true;
        for file in files {
            if !probe.is_file(&dir.join(file)) {
                complete = false;
                errors.push(ValidationError::MissingConfigFile {
                    config: config.clone(),
                    file: file.clone(),
                    dir: dir.clone(),
                });
            }
        }
        if complete {
            sources.push(ConfigSource {
                config: config.clone(),
                object: object_name(&app.name, config),
                dir: dir.clone(),
                files: files.clone(),
            });
        }
    }

    for config in deployment.configs.keys() {
        if !app.configs.contains_key(config) {
            errors.push(ValidationError::UnknownConfig {
                config: config.clone(),
                context: format!("deployment '{}'", deployment.name),
            });
        }
    }
    for service in app.services() {
        for mount in &service.configs {
            if !app.configs.contains_key(&mount.config) {
                errors.push(ValidationError::UnknownConfig {
                    config: mount.config.clone(),
                    context: format!("service '{}'", service.name),
                });
            }
        }
    }

    sources
}

/// Emission order: services in the deployment's `services` map first, then
/// the remaining application services in declaration order.
fn ordered_services<'a>(
    app: &'a ApplicationDescription,
    deployment: &EnvironmentDeployment,
) -> Vec<&'a ServiceDecl> {
    let bound = deployment
        .services
        .keys()
        .filter_map(|name| app.service(name));
    let unbound = app
        .services()
        .filter(|decl| !deployment.services.contains_key(&decl.name));
    bound.chain(unbound).collect()
}

fn resolve_image(
    app: &ApplicationDescription,
    decl: &ServiceDecl,
    registry: &BTreeMap<String, String>,
    errors: &mut Collector,
) -> Option<String> {
    match decl.origin {
        ServiceOrigin::App => {
            if decl.image.has_tag() {
                errors.push(ValidationError::ExplicitVersionOnAppService {
                    service: decl.name.clone(),
                    image: decl.image.to_string(),
                });
                return None;
            }
            let tagged = decl.image.with_tag(&app.version.to_string());
            if registry.is_empty() {
                return Some(tagged);
            }
            // Bare images such as `nginx` have no namespace to map.
            let Some(namespace) = decl.image.namespace() else {
                return Some(tagged);
            };
            match registry.get(namespace) {
                Some(host) => Some(format!("{}/{tagged}", host.trim_end_matches('/'))),
                None => {
                    errors.push(ValidationError::UnknownRegistryNamespace {
                        service: decl.name.clone(),
                        namespace: namespace.to_owned(),
                    });
                    None
                }
            }
        }
        ServiceOrigin::Extra => {
            if decl.image.has_tag() {
                Some(decl.image.to_string())
            } else {
                errors.push(ValidationError::MissingVersionOnExtraService {
                    service: decl.name.clone(),
                    image: decl.image.to_string(),
                });
                None
            }
        }
    }
}

/// Check a public service's path routing and turn it into a prefix list.
fn route_prefixes(
    decl: &ServiceDecl,
    binding: Option<&ServiceBinding>,
    errors: &mut Collector,
) -> Option<Vec<Prefix>> {
    let missing = |reason: &str| ValidationError::MissingRouteBinding {
        service: decl.name.clone(),
        reason: reason.to_owned(),
    };
    let Some(binding) = binding else {
        errors.push(missing("no entry under the deployment's services"));
        return None;
    };

    let prefixes = match (&binding.prefix, &binding.prefixes) {
        (Some(_), Some(_)) => {
            errors.push(ValidationError::ConflictingRouteBinding {
                service: decl.name.clone(),
                reason: "both 'prefix' and 'prefixes' are set".to_owned(),
            });
            return None;
        }
        (Some(path), None) => vec![Prefix {
            path: path.clone(),
            strip: binding.strip_prefix,
        }],
        (None, Some(list)) if !list.is_empty() => list.clone(),
        (None, _) => {
            errors.push(missing("binding has neither 'prefix' nor 'prefixes'"));
            return None;
        }
    };

    let mut valid = true;
    for prefix in &prefixes {
        if !prefix.path.starts_with('/') {
            valid = false;
            errors.push(ValidationError::InvalidRoutePrefix {
                service: decl.name.clone(),
                prefix: prefix.path.clone(),
            });
        }
    }
    valid.then_some(prefixes)
}

/// The ingress host a service is reachable under, if any.
fn service_host<'a>(
    decl: &ServiceDecl,
    binding: Option<&'a ServiceBinding>,
    default_host: Option<&'a HostName>,
    ingress: &'a Ingress,
    errors: &mut Collector,
) -> Option<&'a HostName> {
    if let Some(host) = binding.and_then(|b| b.host.as_ref()) {
        if ingress.hosts.contains_key(host) {
            return Some(host);
        }
        errors.push(ValidationError::UnknownIngressHost {
            host: host.clone(),
            context: format!("service '{}'", decl.name),
        });
        return None;
    }
    default_host.or_else(|| ingress.sole_host())
}

fn merge_quantities(service: &Quantities, defaults: &Quantities) -> ResourceQuantities {
    let fallback = ResourceQuantities::default();
    ResourceQuantities {
        cpu: service
            .cpu
            .clone()
            .or_else(|| defaults.cpu.clone())
            .unwrap_or(fallback.cpu),
        memory: service
            .memory
            .clone()
            .or_else(|| defaults.memory.clone())
            .unwrap_or(fallback.memory),
    }
}

fn merge_resources(service: &ResourceOverrides, defaults: &ResourceOverrides) -> Resources {
    Resources {
        requests: merge_quantities(&service.requests, &defaults.requests),
        limits: merge_quantities(&service.limits, &defaults.limits),
    }
}

fn resolve_secrets(
    app: &ApplicationDescription,
    decl: &ServiceDecl,
    deployment: &EnvironmentDeployment,
) -> Vec<ResolvedSecret> {
    decl.secrets
        .iter()
        .map(|used| {
            let bound = deployment.secrets.get(&used.secret).cloned().flatten();
            let mount = bound
                .or_else(|| used.mount.clone())
                .unwrap_or_else(|| SecretMount::default_for(&used.secret));
            ResolvedSecret {
                secret: used.secret.clone(),
                object: object_name(&app.name, &used.secret),
                mount,
            }
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn resolve_service(
    app: &ApplicationDescription,
    deployment: &EnvironmentDeployment,
    ingress: &Ingress,
    ctx: &ValidationContext<'_>,
    decl: &ServiceDecl,
    binding: Option<&ServiceBinding>,
    default_host: Option<&HostName>,
    claimed: &mut BTreeMap<(String, String), ServiceName>,
    errors: &mut Collector,
) -> Option<ResolvedService> {
    let image = resolve_image(app, decl, ctx.registry, errors);

    let prefixes = match decl.service_type {
        ServiceType::Public => route_prefixes(decl, binding, errors),
        ServiceType::Internal | ServiceType::Job => {
            if binding.is_some_and(ServiceBinding::has_routing) {
                errors.push(ValidationError::UnexpectedRouteBinding {
                    service: decl.name.clone(),
                    service_type: decl.service_type,
                });
            }
            None
        }
    };

    let host = service_host(decl, binding, default_host, ingress, errors);
    let domains = host.and_then(|h| ingress.domains(h)).unwrap_or_default();

    let route = match (decl.service_type, host) {
        (ServiceType::Public, None) => {
            if binding.is_some() && binding.and_then(|b| b.host.as_ref()).is_none() {
                errors.push(ValidationError::MissingRouteBinding {
                    service: decl.name.clone(),
                    reason: "no ingress host: set 'host' on the binding or the deployment"
                        .to_owned(),
                });
            }
            None
        }
        (ServiceType::Public, Some(host)) if domains.is_empty() => {
            errors.push(ValidationError::MissingRouteBinding {
                service: decl.name.clone(),
                reason: format!("ingress host '{host}' lists no domains"),
            });
            None
        }
        (ServiceType::Public, Some(host)) => prefixes.map(|prefixes| {
            for prefix in &prefixes {
                for domain in domains {
                    let key = (domain.clone(), prefix.path.clone());
                    if let Some(owner) = claimed.get(&key) {
                        errors.push(ValidationError::ConflictingRouteBinding {
                            service: decl.name.clone(),
                            reason: format!(
                                "{}{} is already routed to '{owner}'",
                                domain, prefix.path
                            ),
                        });
                    } else {
                        claimed.insert(key, decl.name.clone());
                    }
                }
            }
            ResolvedRoute {
                host: host.clone(),
                domains: domains.to_vec(),
                prefixes,
            }
        }),
        _ => None,
    };

    let self_url = domains
        .first()
        .map(|domain| format!("{}://{domain}", ctx.options.url_scheme.scheme(ingress.tls_enabled())));
    let environment = match resolve(
        &app.variables,
        &deployment.overrides,
        self_url.as_deref(),
        decl,
    ) {
        Ok(env) => Some(env),
        Err(errs) => {
            errors.extend(errs.into_iter().map(ValidationError::from));
            None
        }
    };

    // A secret exposed as a variable shadows a plain variable of the same name.
    let secrets = resolve_secrets(app, decl, deployment);
    let environment = environment.map(|mut env| {
        for secret in &secrets {
            if let SecretMount::EnvVar(var) = &secret.mount {
                if env.remove(var).is_some() {
                    debug!(service = %decl.name, variable = %var, "variable supplied by secret");
                }
            }
        }
        env
    });

    let ports = binding
        .map(|b| b.ports.clone())
        .filter(|ports| !ports.is_empty())
        .unwrap_or_else(|| vec![PortMapping::default()]);

    let defaults = &deployment.defaults;
    let resources = match binding {
        Some(b) => merge_resources(&b.resources, &defaults.resources),
        None => merge_resources(&ResourceOverrides::default(), &defaults.resources),
    };
    let replicas = binding
        .and_then(|b| b.replicas)
        .or(defaults.replicas)
        .unwrap_or(DEFAULT_REPLICAS);

    let configs = decl
        .configs
        .iter()
        .map(|mount| ResolvedConfig {
            config: mount.config.clone(),
            object: object_name(&app.name, &mount.config),
            mount_path: mount.path.clone(),
        })
        .collect();

    Some(ResolvedService {
        name: decl.name.clone(),
        full_name: object_name(&app.name, &decl.name),
        service_type: decl.service_type,
        image: image?,
        environment: environment?,
        secrets,
        configs,
        replicas,
        resources,
        ports,
        route,
    })
}

/// Distinct validation error kinds, sorted. Handy for assertions.
pub fn kinds_of(errors: &[ValidationError]) -> BTreeSet<ErrorKind> {
    errors.iter().map(ValidationError::kind).collect()
}
