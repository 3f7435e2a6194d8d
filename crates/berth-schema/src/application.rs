//! Typed Application Description and the load rules applied to it.

use crate::document::{
    parse_app_document, parse_extra_services_document, read_file, AppDocument,
    DescriptorError, SecretMountDoc, SecretsDoc, ServiceDoc, ServiceSecretDoc,
};
use crate::dotenv::{parse_assignment, Assignment};
use crate::types::{ConfigName, OrderedMap, SecretName, ServiceName};
use crate::version::Version;
pub use crate::document::ServiceType;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File names probed, in order, when an application directory is given.
pub const APP_DESCRIPTOR_NAMES: &[&str] = &["appspec.yaml", "appspec.yml"];

/// Sentinel that selects every variable of the merged map.
pub const SELECT_ALL: &str = "$all";

/// A variable whose value is always known at load time (`relative` paths and
/// `internal` values).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableScopes {
    /// Operator-supplied values, optionally with a default.
    pub external: Vec<Assignment>,
    /// Names that exist only when the environment overrides them.
    pub optional: Vec<String>,
    /// Paths joined onto the service's own public URL.
    pub relative: Vec<Variable>,
    pub internal: Vec<Variable>,
}

impl VariableScopes {
    pub fn declares(&self, name: &str) -> bool {
        self.external.iter().any(|v| v.name == name)
            || self.optional.iter().any(|v| v == name)
            || self.relative.iter().any(|v| v.name == name)
            || self.internal.iter().any(|v| v.name == name)
    }
}

/// A container image reference as written in the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the last path segment carries `:tag` or an `@digest`.
    pub fn has_tag(&self) -> bool {
        if self.0.contains('@') {
            return true;
        }
        let last = self.0.rsplit('/').next().unwrap_or(&self.0);
        last.contains(':')
    }

    /// First path segment, when the reference has more than one.
    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once('/').map(|(ns, _)| ns)
    }

    pub fn with_tag(&self, tag: &str) -> String {
        format!("{}:{tag}", self.0)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of a service's `environment:` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvSelection {
    /// `$all`
    All,
    /// A bare name picked from the merged map.
    Name(String),
    /// `NAME=value`, visible to this service only.
    Assign { name: String, value: String },
}

impl EnvSelection {
    pub fn parse(input: &str) -> Result<Self, DescriptorError> {
        if input.trim() == SELECT_ALL {
            return Ok(Self::All);
        }
        let Assignment { name, value } = parse_assignment(input)?;
        Ok(match value {
            Some(value) => Self::Assign { name, value },
            None => Self::Name(name),
        })
    }
}

/// How a secret reaches the container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SecretMount {
    File(String),
    EnvVar(String),
}

impl SecretMount {
    pub fn default_for(secret: &SecretName) -> Self {
        Self::File(format!("/secrets/{secret}"))
    }

    pub(crate) fn from_doc(
        secret: &SecretName,
        doc: Option<&SecretMountDoc>,
    ) -> Result<Option<Self>, DescriptorError> {
        let Some(doc) = doc else {
            return Ok(None);
        };
        match (&doc.path, &doc.variable) {
            (None, None) => Ok(None),
            (Some(path), None) => Ok(Some(Self::File(path.clone()))),
            (None, Some(var)) => Ok(Some(Self::EnvVar(var.clone()))),
            (Some(_), Some(_)) => Err(DescriptorError::InvalidSecretMount(secret.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretUse {
    pub secret: SecretName,
    /// `None` when the service names the secret without saying how to mount it.
    pub mount: Option<SecretMount>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigMount {
    pub config: ConfigName,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceOrigin {
    /// Built from this application; image tag comes from the application version.
    App,
    /// Third-party; image carries its own tag.
    Extra,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDecl {
    pub name: ServiceName,
    pub origin: ServiceOrigin,
    pub service_type: ServiceType,
    pub image: ImageRef,
    pub environment: Vec<EnvSelection>,
    pub configs: Vec<ConfigMount>,
    pub secrets: Vec<SecretUse>,
}

/// A loaded application descriptor. Immutable once built, apart from
/// [`ApplicationDescription::with_extra_services`] which returns a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationDescription {
    pub name: String,
    pub version: Version,
    pub variables: VariableScopes,
    pub app_services: OrderedMap<ServiceName, ServiceDecl>,
    pub extra_services: OrderedMap<ServiceName, ServiceDecl>,
    pub configs: OrderedMap<ConfigName, Vec<String>>,
    pub secrets: Vec<SecretName>,
}

impl ApplicationDescription {
    /// All services: `app_services` first, then `extra_services`, each in
    /// declaration order.
    pub fn services(&self) -> impl Iterator<Item = &ServiceDecl> {
        self.app_services.values().chain(self.extra_services.values())
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDecl> {
        self.app_services
            .get(name)
            .or_else(|| self.extra_services.get(name))
    }

    pub fn declares_secret(&self, name: &str) -> bool {
        self.secrets.iter().any(|s| s == name)
    }

    /// Return a copy with additional extra services merged in.
    pub fn with_extra_services(
        &self,
        extra: OrderedMap<ServiceName, ServiceDoc>,
    ) -> Result<Self, DescriptorError> {
        let mut merged = self.clone();
        for (name, doc) in extra {
            if merged.service(&name).is_some() {
                return Err(DescriptorError::DuplicateService(name));
            }
            let decl = convert_service(&merged, &name, &doc, ServiceOrigin::Extra)?;
            merged.extra_services.insert(name, decl);
        }
        Ok(merged)
    }
}

impl TryFrom<AppDocument> for ApplicationDescription {
    type Error = DescriptorError;

    fn try_from(doc: AppDocument) -> Result<Self, Self::Error> {
        let version: Version = doc.version.parse()?;
        let variables = convert_scopes(&doc)?;
        let secrets = match doc.secrets {
            None => Vec::new(),
            Some(SecretsDoc::List(list)) => list,
            Some(SecretsDoc::Map(map)) => map.into_iter().map(|(k, _)| k).collect(),
        };

        let mut app = Self {
            name: doc.name.trim().to_owned(),
            version,
            variables,
            app_services: OrderedMap::new(),
            extra_services: OrderedMap::new(),
            configs: doc.configs,
            secrets,
        };

        for (name, service) in &doc.app_services {
            let decl = convert_service(&app, name, service, ServiceOrigin::App)?;
            app.app_services.insert(name.clone(), decl);
        }
        for (name, service) in &doc.extra_services {
            if app.app_services.contains_key(name) {
                return Err(DescriptorError::DuplicateService(name.clone()));
            }
            let decl = convert_service(&app, name, service, ServiceOrigin::Extra)?;
            app.extra_services.insert(name.clone(), decl);
        }

        Ok(app)
    }
}

fn convert_scopes(doc: &AppDocument) -> Result<VariableScopes, DescriptorError> {
    let scopes = &doc.environment;
    let mut out = VariableScopes::default();

    for raw in &scopes.external {
        out.external.push(parse_assignment(raw)?);
    }
    for raw in &scopes.optional {
        let assignment = parse_assignment(raw)?;
        if assignment.value.is_some() {
            return Err(DescriptorError::OptionalWithDefault(assignment.name));
        }
        out.optional.push(assignment.name);
    }
    for raw in &scopes.relative {
        let Assignment { name, value } = parse_assignment(raw)?;
        match value {
            Some(value) if value.starts_with('/') => out.relative.push(Variable { name, value }),
            other => {
                return Err(DescriptorError::InvalidRelativeVariable {
                    name,
                    value: other.unwrap_or_default(),
                })
            }
        }
    }
    for raw in &scopes.internal {
        let Assignment { name, value } = parse_assignment(raw)?;
        let Some(value) = value else {
            return Err(DescriptorError::MissingInternalValue(name));
        };
        out.internal.push(Variable { name, value });
    }

    Ok(out)
}

fn convert_service(
    app: &ApplicationDescription,
    name: &ServiceName,
    doc: &ServiceDoc,
    origin: ServiceOrigin,
) -> Result<ServiceDecl, DescriptorError> {
    let image = ImageRef::new(&doc.image);
    match origin {
        ServiceOrigin::App if image.has_tag() => {
            return Err(DescriptorError::ExplicitVersionOnAppService {
                service: name.clone(),
                image: image.to_string(),
            })
        }
        ServiceOrigin::Extra if !image.has_tag() => {
            return Err(DescriptorError::MissingVersionOnExtraService {
                service: name.clone(),
                image: image.to_string(),
            })
        }
        _ => {}
    }

    let environment = doc
        .environment
        .iter()
        .map(|raw| EnvSelection::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let mut configs = Vec::new();
    for entry in &doc.configs {
        for (config, path) in entry.iter() {
            if !app.configs.contains_key(config) {
                return Err(DescriptorError::UndeclaredConfig {
                    service: name.clone(),
                    config: config.clone(),
                });
            }
            configs.push(ConfigMount {
                config: config.clone(),
                path: path.clone(),
            });
        }
    }

    let mut secrets = Vec::new();
    for entry in &doc.secrets {
        let uses: Vec<(SecretName, Option<SecretMount>)> = match entry {
            ServiceSecretDoc::Name(secret) => vec![(secret.clone(), None)],
            ServiceSecretDoc::Detailed(map) => map
                .iter()
                .map(|(secret, mount)| {
                    SecretMount::from_doc(secret, mount.as_ref()).map(|m| (secret.clone(), m))
                })
                .collect::<Result<_, _>>()?,
        };
        for (secret, mount) in uses {
            if !app.declares_secret(&secret) {
                return Err(DescriptorError::UndeclaredSecret {
                    service: name.clone(),
                    secret,
                });
            }
            secrets.push(SecretUse { secret, mount });
        }
    }

    Ok(ServiceDecl {
        name: name.clone(),
        origin,
        service_type: doc.service_type,
        image,
        environment,
        configs,
        secrets,
    })
}

pub fn parse_application_str(input: &str) -> Result<ApplicationDescription, DescriptorError> {
    parse_app_document(input)?.try_into()
}

/// Locate the descriptor for `path`: the file itself, or the first
/// [`APP_DESCRIPTOR_NAMES`] entry inside a directory.
pub fn find_application_file(path: &Path) -> Result<PathBuf, DescriptorError> {
    if !path.is_dir() {
        return Ok(path.to_path_buf());
    }
    APP_DESCRIPTOR_NAMES
        .iter()
        .map(|name| path.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| DescriptorError::NotFound {
            dir: path.to_path_buf(),
            expected: APP_DESCRIPTOR_NAMES.join(" or "),
        })
}

pub fn load_application(path: &Path) -> Result<ApplicationDescription, DescriptorError> {
    let file = find_application_file(path)?;
    let app = parse_application_str(&read_file(&file)?)?;
    debug!(
        app = %app.name,
        version = %app.version,
        services = app.app_services.len() + app.extra_services.len(),
        "loaded application from {}",
        file.display()
    );
    Ok(app)
}

/// Read an `extra_services` file and merge it into `app`.
pub fn merge_extra_file(
    app: &ApplicationDescription,
    path: &Path,
) -> Result<ApplicationDescription, DescriptorError> {
    let doc = parse_extra_services_document(&read_file(path)?)?;
    debug!(
        app = %app.name,
        services = doc.extra_services.len(),
        "merging extra services from {}",
        path.display()
    );
    app.with_extra_services(doc.extra_services)
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: &str = r#"
name: myapp
version: 1.0.1
environment:
  external: [DB_HOST, "LOG_FORMAT=json"]
  optional: [SENTRY_DSN]
  relative: ["WEB_APP_LOGIN_URL=/login"]
  internal: ["LOGGING__LOGLEVEL__DEFAULT=Error"]
app_services:
  web-app:
    type: public
    image: mycompany/web-app
    environment: ["$all", "LOGGING__LOGLEVEL__DEFAULT=Debug"]
    configs:
      - web-config: /etc/web
    secrets:
      - db-password
      - api-key:
          variable: API_KEY
  worker:
    type: job
    image: mycompany/worker
    environment: [DB_HOST]
extra_services:
  auth-gateway:
    type: public
    image: 3rd-party/auth-gateway:26.4
configs:
  web-config: [app.json]
secrets: [db-password, api-key]
"#;

    #[test]
    fn converts_full_application() {
        let app = parse_application_str(APP).unwrap();
        assert_eq!(app.name, "myapp");
        assert_eq!(app.version, Version::new(1, 0, 1));
        assert_eq!(app.variables.external[1].value.as_deref(), Some("json"));
        assert_eq!(app.variables.relative[0].value, "/login");

        let names: Vec<_> = app.services().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["web-app", "worker", "auth-gateway"]);

        let web = app.service("web-app").unwrap();
        assert_eq!(web.origin, ServiceOrigin::App);
        assert_eq!(
            web.environment,
            vec![
                EnvSelection::All,
                EnvSelection::Assign {
                    name: "LOGGING__LOGLEVEL__DEFAULT".into(),
                    value: "Debug".into()
                }
            ]
        );
        assert_eq!(web.secrets[0].mount, None);
        assert_eq!(
            web.secrets[1].mount,
            Some(SecretMount::EnvVar("API_KEY".into()))
        );
        assert_eq!(web.configs[0].path, "/etc/web");
        assert_eq!(
            app.service("auth-gateway").unwrap().origin,
            ServiceOrigin::Extra
        );
    }

    #[test]
    fn image_tag_detection() {
        assert!(!ImageRef::new("mycompany/web-app").has_tag());
        assert!(!ImageRef::new("registry:5000/web-app").has_tag());
        assert!(ImageRef::new("registry:5000/web-app:1.2").has_tag());
        assert!(ImageRef::new("nginx@sha256:abcd").has_tag());
        assert_eq!(ImageRef::new("mycompany/web").namespace(), Some("mycompany"));
        assert_eq!(ImageRef::new("nginx").namespace(), None);
    }

    #[test]
    fn rejects_tag_on_app_service() {
        let input = "name: a\nversion: 1.0.0\napp_services:\n  web:\n    image: mycompany/web:2.0\n";
        assert!(matches!(
            parse_application_str(input),
            Err(DescriptorError::ExplicitVersionOnAppService { .. })
        ));
    }

    #[test]
    fn rejects_missing_tag_on_extra_service() {
        let input = "name: a\nversion: 1.0.0\nextra_services:\n  redis:\n    image: redis\n";
        assert!(matches!(
            parse_application_str(input),
            Err(DescriptorError::MissingVersionOnExtraService { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_service_names() {
        let input = r"
name: a
version: 1.0.0
app_services:
  web:
    image: mycompany/web
extra_services:
  web:
    image: nginx:1.25
";
        assert!(matches!(
            parse_application_str(input),
            Err(DescriptorError::DuplicateService(ref s)) if s == "web"
        ));
    }

    #[test]
    fn enforces_scope_rules() {
        let relative = "name: a\nversion: 1.0.0\nenvironment:\n  relative: [\"URL=login\"]\n";
        assert!(matches!(
            parse_application_str(relative),
            Err(DescriptorError::InvalidRelativeVariable { .. })
        ));
        let internal = "name: a\nversion: 1.0.0\nenvironment:\n  internal: [LEVEL]\n";
        assert!(matches!(
            parse_application_str(internal),
            Err(DescriptorError::MissingInternalValue(_))
        ));
        let optional = "name: a\nversion: 1.0.0\nenvironment:\n  optional: [\"DSN=x\"]\n";
        assert!(matches!(
            parse_application_str(optional),
            Err(DescriptorError::OptionalWithDefault(_))
        ));
    }

    #[test]
    fn rejects_undeclared_secret_and_config() {
        let secret = r"
name: a
version: 1.0.0
app_services:
  web:
    image: mycompany/web
    secrets: [db-password]
";
        assert!(matches!(
            parse_application_str(secret),
            Err(DescriptorError::UndeclaredSecret { .. })
        ));
        let config = r"
name: a
version: 1.0.0
app_services:
  web:
    image: mycompany/web
    configs:
      - missing: /etc/x
";
        assert!(matches!(
            parse_application_str(config),
            Err(DescriptorError::UndeclaredConfig { .. })
        ));
    }

    #[test]
    fn rejects_ambiguous_secret_mount() {
        let input = r"
name: a
version: 1.0.0
app_services:
  web:
    image: mycompany/web
    secrets:
      - key:
          path: /k
          variable: KEY
secrets: [key]
";
        assert!(matches!(
            parse_application_str(input),
            Err(DescriptorError::InvalidSecretMount(_))
        ));
    }

    #[test]
    fn loads_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("appspec.yml"), APP).unwrap();
        let app = load_application(dir.path()).unwrap();
        assert_eq!(app.name, "myapp");

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_application(empty.path()),
            Err(DescriptorError::NotFound { .. })
        ));
    }

    #[test]
    fn merges_extra_service_file() {
        let app = parse_application_str(APP).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let extra = dir.path().join("monitoring.yaml");
        std::fs::write(
            &extra,
            "extra_services:\n  exporter:\n    image: prom/exporter:0.9\n",
        )
        .unwrap();

        let merged = merge_extra_file(&app, &extra).unwrap();
        assert!(merged.extra_services.contains_key("exporter"));
        assert!(!app.extra_services.contains_key("exporter"));

        std::fs::write(&extra, "extra_services:\n  worker:\n    image: x/worker:1.0\n").unwrap();
        assert!(matches!(
            merge_extra_file(&app, &extra),
            Err(DescriptorError::DuplicateService(_))
        ));
    }
}
