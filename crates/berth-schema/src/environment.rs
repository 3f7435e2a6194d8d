//! Typed Environment Description: the ingress, the image registry map and the
//! per-application deployment entries.

use crate::application::SecretMount;
use crate::document::{
    parse_environment_document, read_file, DeploymentDoc, DescriptorError, EnvironmentDocument,
    HostDomainsDoc, OverridesDoc, QuantitiesDoc, ResourcesDoc, ServiceBindingDoc,
};
use crate::dotenv::{load_env_file, parse_binding};
use crate::types::{ConfigName, HostName, OrderedMap, SecretName, ServiceName};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

pub const DEFAULT_ACME_SERVER: &str = "https://acme-v02.api.letsencrypt.org/directory";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LetsEncrypt {
    pub email: String,
    pub server: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngressTls {
    pub secret: Option<String>,
    pub letsencrypt: Option<LetsEncrypt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingress {
    pub name: String,
    /// Abstract host to real domain names, first domain is canonical.
    pub hosts: OrderedMap<HostName, Vec<String>>,
    pub tls: IngressTls,
}

impl Ingress {
    pub fn domains(&self, host: &str) -> Option<&[String]> {
        self.hosts.get(host).map(Vec::as_slice)
    }

    /// Name of the TLS secret routing objects reference, if TLS is on.
    ///
    /// An explicit secret wins; with Let's Encrypt alone the secret is named
    /// `<ingress>--tls` and filled by cert-manager.
    pub fn tls_secret(&self) -> Option<String> {
        match (&self.tls.secret, &self.tls.letsencrypt) {
            (Some(secret), _) => Some(secret.clone()),
            (None, Some(_)) => Some(format!("{}--tls", self.name)),
            (None, None) => None,
        }
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_secret().is_some()
    }

    /// The host used when neither the binding nor the deployment names one.
    pub fn sole_host(&self) -> Option<&HostName> {
        if self.hosts.len() == 1 {
            self.hosts.keys().next()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRef {
    pub name: String,
    /// Raw range expression; parsed and matched during validation so a bad
    /// constraint is reported alongside every other violation.
    pub version: Option<String>,
    /// Extra-service files, resolved against the environment file directory.
    pub extra: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Quantities {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

impl From<QuantitiesDoc> for Quantities {
    fn from(doc: QuantitiesDoc) -> Self {
        Self {
            cpu: doc.cpu,
            memory: doc.memory,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceOverrides {
    pub requests: Quantities,
    pub limits: Quantities,
}

impl From<Option<ResourcesDoc>> for ResourceOverrides {
    fn from(doc: Option<ResourcesDoc>) -> Self {
        let doc = doc.unwrap_or_default();
        Self {
            requests: doc.requests.map(Into::into).unwrap_or_default(),
            limits: doc.limits.map(Into::into).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defaults {
    pub replicas: Option<u32>,
    pub resources: ResourceOverrides,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    pub path: String,
    pub strip: bool,
}

/// `external:internal` container port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortMapping {
    pub external: u16,
    pub internal: u16,
}

impl Default for PortMapping {
    fn default() -> Self {
        Self {
            external: 80,
            internal: 80,
        }
    }
}

impl FromStr for PortMapping {
    type Err = DescriptorError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || DescriptorError::InvalidPort(input.to_owned());
        let parse = |s: &str| s.trim().parse::<u16>().ok().filter(|p| *p != 0);
        let (external, internal) = match input.split_once(':') {
            Some((ext, int)) => (parse(ext), parse(int)),
            None => (parse(input), parse(input)),
        };
        match (external, internal) {
            (Some(external), Some(internal)) => Ok(Self { external, internal }),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.external, self.internal)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceBinding {
    pub host: Option<HostName>,
    pub prefix: Option<String>,
    /// Strip a single `prefix` before forwarding.
    pub strip_prefix: bool,
    pub prefixes: Option<Vec<Prefix>>,
    pub replicas: Option<u32>,
    pub resources: ResourceOverrides,
    pub ports: Vec<PortMapping>,
}

impl ServiceBinding {
    /// True when the binding carries path routing (`prefix` or `prefixes`).
    pub fn has_routing(&self) -> bool {
        self.prefix.is_some() || self.prefixes.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentDeployment {
    pub name: String,
    pub application: ApplicationRef,
    pub host: Option<HostName>,
    /// `NAME=value` overrides in declaration order; a later entry wins.
    pub overrides: Vec<(String, String)>,
    pub configs: OrderedMap<ConfigName, PathBuf>,
    /// Bound secrets; `None` keeps the mount the service declares.
    pub secrets: OrderedMap<SecretName, Option<SecretMount>>,
    pub defaults: Defaults,
    pub services: OrderedMap<ServiceName, ServiceBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentDescription {
    pub ingress: Ingress,
    /// Image namespace to registry host.
    pub registry: BTreeMap<String, String>,
    pub deployments: OrderedMap<String, EnvironmentDeployment>,
}

impl EnvironmentDescription {
    pub fn deployment(&self, name: &str) -> Option<&EnvironmentDeployment> {
        self.deployments.get(name)
    }

    /// Deployments bound to `app_name`, in declaration order.
    pub fn deployments_for<'a>(
        &'a self,
        app_name: &'a str,
    ) -> impl Iterator<Item = &'a EnvironmentDeployment> + 'a {
        self.deployments
            .values()
            .filter(move |d| d.application.name == app_name)
    }

    /// Convert a raw document. Relative file references (override files,
    /// config directories, extra-service files) resolve against `base_dir`.
    pub fn from_document(
        doc: EnvironmentDocument,
        base_dir: &Path,
    ) -> Result<Self, DescriptorError> {
        let hosts = doc
            .ingress
            .hosts
            .into_iter()
            .map(|(host, domains)| {
                let domains = match domains {
                    HostDomainsDoc::Single(d) => vec![d],
                    HostDomainsDoc::Multiple(d) => d,
                };
                (host, domains)
            })
            .collect();

        let tls = doc
            .ingress
            .tls
            .map(|tls| IngressTls {
                secret: tls.secret,
                letsencrypt: tls.letsencrypt.map(|le| LetsEncrypt {
                    email: le.email,
                    server: le.server.unwrap_or_else(|| DEFAULT_ACME_SERVER.to_owned()),
                }),
            })
            .unwrap_or_default();

        let mut deployments = OrderedMap::new();
        for (name, deployment) in doc.deployments {
            let converted = convert_deployment(&name, deployment, base_dir)?;
            deployments.insert(name, converted);
        }

        Ok(Self {
            ingress: Ingress {
                name: doc.ingress.name,
                hosts,
                tls,
            },
            registry: doc.registry,
            deployments,
        })
    }
}

fn convert_deployment(
    name: &str,
    doc: DeploymentDoc,
    base_dir: &Path,
) -> Result<EnvironmentDeployment, DescriptorError> {
    let overrides = match doc.environment {
        None => Vec::new(),
        Some(OverridesDoc::File(file)) => load_env_file(&base_dir.join(file))?,
        Some(OverridesDoc::Inline(list)) => list
            .iter()
            .map(|raw| parse_binding(raw))
            .collect::<Result<_, _>>()?,
    };

    let mut secrets = OrderedMap::new();
    for (secret, mount) in doc.secrets {
        let mount = SecretMount::from_doc(&secret, mount.as_ref())?;
        secrets.insert(secret, mount);
    }

    let mut services = OrderedMap::new();
    for (service, binding) in doc.services {
        services.insert(service, convert_binding(binding)?);
    }

    let defaults = doc.defaults.unwrap_or_default();

    Ok(EnvironmentDeployment {
        name: name.to_owned(),
        application: ApplicationRef {
            name: doc.application.name,
            version: doc.application.version,
            extra: doc
                .application
                .extra
                .iter()
                .map(|p| base_dir.join(p))
                .collect(),
        },
        host: doc.host,
        overrides,
        configs: doc
            .configs
            .into_iter()
            .map(|(config, dir)| (config, base_dir.join(dir)))
            .collect(),
        secrets,
        defaults: Defaults {
            replicas: defaults.replicas,
            resources: defaults.resources.into(),
        },
        services,
    })
}

fn convert_binding(doc: ServiceBindingDoc) -> Result<ServiceBinding, DescriptorError> {
    let ports = doc
        .ports
        .iter()
        .map(|p| p.parse())
        .collect::<Result<Vec<PortMapping>, _>>()?;

    Ok(ServiceBinding {
        host: doc.host,
        prefix: doc.prefix,
        strip_prefix: doc.strip_prefix.unwrap_or(true),
        prefixes: doc.prefixes.map(|map| {
            map.into_iter()
                .map(|(path, opts)| Prefix {
                    path,
                    strip: opts.and_then(|o| o.strip).unwrap_or(false),
                })
                .collect()
        }),
        replicas: doc.replicas,
        resources: doc.resources.into(),
        ports,
    })
}

/// Parse an environment descriptor held in memory.
pub fn parse_environment_str(
    input: &str,
    base_dir: &Path,
) -> Result<EnvironmentDescription, DescriptorError> {
    EnvironmentDescription::from_document(parse_environment_document(input)?, base_dir)
}

pub fn load_environment(path: &Path) -> Result<EnvironmentDescription, DescriptorError> {
    let content = read_file(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let env = parse_environment_str(&content, base_dir)?;
    debug!(
        ingress = %env.ingress.name,
        deployments = env.deployments.len(),
        "loaded environment from {}",
        path.display()
    );
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENV: &str = r#"
ingress:
  name: main
  hosts:
    myapp: app.myapp.com
    api: [api.myapp.com, api-eu.myapp.com]
  tls:
    letsencrypt:
      email: ops@myapp.com
registry:
  mycompany: registry.example.com
deployments:
  production:
    application:
      name: myapp
      version: "^1.0.0"
      extra: [monitoring.yaml]
    host: myapp
    environment: ["LOGGING__LOGLEVEL__DEFAULT=Warning", "LOGGING__LOGLEVEL__DEFAULT=Info"]
    configs:
      web-config: configs/web
    secrets:
      db-password:
      api-key:
        variable: GATEWAY_KEY
    defaults:
      replicas: 2
      resources:
        limits:
          memory: 256Mi
    services:
      web-app:
        prefix: /app
        ports: ["80:8080"]
      api:
        host: api
        prefixes:
          /api:
            strip: true
          /v2:
  other:
    application:
      name: otherapp
"#;

    fn env() -> EnvironmentDescription {
        parse_environment_str(ENV, Path::new("/srv/env")).unwrap()
    }

    fn last_override<'a>(deployment: &'a EnvironmentDeployment, name: &str) -> Option<&'a str> {
        deployment
            .overrides
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn converts_ingress() {
        let env = env();
        assert_eq!(env.ingress.domains("api").unwrap().len(), 2);
        assert_eq!(env.ingress.domains("myapp").unwrap(), ["app.myapp.com"]);
        assert_eq!(env.ingress.tls_secret().as_deref(), Some("main--tls"));
        assert_eq!(
            env.ingress.tls.letsencrypt.as_ref().unwrap().server,
            DEFAULT_ACME_SERVER
        );
        assert_eq!(env.ingress.sole_host(), None);
    }

    #[test]
    fn converts_deployment() {
        let env = env();
        let prod = env.deployment("production").unwrap();
        assert_eq!(prod.application.version.as_deref(), Some("^1.0.0"));
        assert_eq!(
            prod.application.extra,
            vec![PathBuf::from("/srv/env/monitoring.yaml")]
        );
        assert_eq!(last_override(prod, "LOGGING__LOGLEVEL__DEFAULT"), Some("Info"));
        assert_eq!(
            prod.configs.get("web-config"),
            Some(&PathBuf::from("/srv/env/configs/web"))
        );
        assert_eq!(prod.secrets.get("db-password"), Some(&None));
        assert_eq!(
            prod.secrets.get("api-key"),
            Some(&Some(SecretMount::EnvVar("GATEWAY_KEY".into())))
        );
        assert_eq!(prod.defaults.replicas, Some(2));
        assert_eq!(prod.defaults.resources.limits.memory.as_deref(), Some("256Mi"));

        let web = prod.services.get("web-app").unwrap();
        assert!(web.strip_prefix);
        assert_eq!(web.ports, vec![PortMapping { external: 80, internal: 8080 }]);

        let api = prod.services.get("api").unwrap();
        assert_eq!(
            api.prefixes.as_deref(),
            Some(
                &[
                    Prefix { path: "/api".into(), strip: true },
                    Prefix { path: "/v2".into(), strip: false },
                ][..]
            )
        );
    }

    #[test]
    fn filters_deployments_by_application() {
        let env = env();
        let names: Vec<_> = env.deployments_for("myapp").map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["production"]);
    }

    #[test]
    fn port_mapping_parsing() {
        assert_eq!(
            "8080".parse::<PortMapping>().unwrap(),
            PortMapping { external: 8080, internal: 8080 }
        );
        assert!("80:abc".parse::<PortMapping>().is_err());
        assert!("0:80".parse::<PortMapping>().is_err());
        assert!("70000".parse::<PortMapping>().is_err());
    }

    #[test]
    fn invalid_port_is_a_load_error() {
        let input = r#"
ingress:
  name: main
  hosts:
    myapp: app.myapp.com
deployments:
  production:
    application:
      name: myapp
    services:
      web:
        ports: ["http"]
"#;
        assert!(matches!(
            parse_environment_str(input, Path::new(".")),
            Err(DescriptorError::InvalidPort(_))
        ));
    }

    #[test]
    fn loads_override_file_relative_to_environment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("prod.env"), "# prod\nLEVEL=Warning\n").unwrap();
        let env_path = dir.path().join("envspec.yaml");
        std::fs::write(
            &env_path,
            r"
ingress:
  name: main
  hosts:
    myapp: app.myapp.com
deployments:
  production:
    application:
      name: myapp
    environment: prod.env
",
        )
        .unwrap();

        let env = load_environment(&env_path).unwrap();
        let prod = env.deployment("production").unwrap();
        assert_eq!(last_override(prod, "LEVEL"), Some("Warning"));
        assert_eq!(env.ingress.sole_host().map(HostName::as_str), Some("myapp"));
        assert!(!env.ingress.tls_enabled());
    }

    #[test]
    fn missing_override_file_is_reported() {
        let input = r"
ingress:
  name: main
  hosts:
    myapp: app.myapp.com
deployments:
  production:
    application:
      name: myapp
    environment: does-not-exist.env
";
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            parse_environment_str(input, dir.path()),
            Err(DescriptorError::Read { .. })
        ));
    }
}
