//! Per-service environment variable resolution.
//!
//! Three overlays are applied in order, each service getting its own map built
//! from the same declarations:
//!
//! 1. base values from the application scopes,
//! 2. deployment overrides (visible to every service),
//! 3. the service's own selection and `NAME=value` assignments.
//!
//! `${NAME}` references in `relative` paths, `internal` values and
//! service-local assignments are substituted in a single pass.

use berth_schema::{EnvSelection, ServiceDecl, ServiceName, VariableScopes};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
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

/// Why a name has no value. Carries the variable at fault, which may be a
/// reference inside another variable's template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Gap {
    Required(String),
    Undefined(String),
    NoHost(String),
}

impl Gap {
    fn into_error(self, service: &ServiceName) -> ResolveError {
        let service = service.clone();
        match self {
            Self::Required(variable) => ResolveError::MissingRequiredVariable { service, variable },
            Self::Undefined(variable) => ResolveError::UndefinedVariable { service, variable },
            Self::NoHost(variable) => {
                ResolveError::UnresolvableRelativeVariable { service, variable }
            }
        }
    }
}

type Slots = BTreeMap<String, Result<String, Gap>>;

/// Substitute every `${NAME}` in `template`. The first unavailable reference
/// is returned as the gap. An unterminated `${` is kept literally.
fn interpolate(template: &str, slots: &Slots) -> Result<String, Gap> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = &rest[start + 2..start + 2 + len];
        match slots.get(name) {
            Some(Ok(value)) => out.push_str(value),
            Some(Err(gap)) => return Err(gap.clone()),
            None => return Err(Gap::Undefined(name.to_owned())),
        }
        rest = &rest[start + 3 + len..];
    }
    out.push_str(rest);
    Ok(out)
}

/// The merged map after the base and override overlays.
fn merged_slots(
    vars: &VariableScopes,
    overrides: &[(String, String)],
    self_url: Option<&str>,
) -> Slots {
    let mut slots = Slots::new();

    for var in &vars.external {
        let slot = var.value.clone().ok_or_else(|| Gap::Required(var.name.clone()));
        slots.insert(var.name.clone(), slot);
    }

    for (name, value) in overrides {
        if vars.declares(name) {
            slots.insert(name.clone(), Ok(value.clone()));
        }
    }

    // Templates see literals and overrides anywhere, plus templates declared
    // before them.
    let overridden: BTreeSet<&str> = overrides.iter().map(|(n, _)| n.as_str()).collect();
    for var in &vars.relative {
        if overridden.contains(var.name.as_str()) {
            continue;
        }
        let slot = match self_url {
            Some(url) => interpolate(&var.value, &slots).map(|path| format!("{url}{path}")),
            None => Err(Gap::NoHost(var.name.clone())),
        };
        slots.insert(var.name.clone(), slot);
    }
    for var in &vars.internal {
        if overridden.contains(var.name.as_str()) {
            continue;
        }
        let slot = interpolate(&var.value, &slots);
        slots.insert(var.name.clone(), slot);
    }

    slots
}

/// Resolve the final environment of one service.
///
/// `self_url` is `scheme://domain` of the service's ingress host, if it has
/// one. Overrides for names no scope declares are ignored here; the validator
/// reports them. Errors are only raised for variables the service actually
/// selects, and every distinct error is returned.
pub fn resolve(
    vars: &VariableScopes,
    overrides: &[(String, String)],
    self_url: Option<&str>,
    service: &ServiceDecl,
) -> Result<BTreeMap<String, String>, Vec<ResolveError>> {
    let slots = merged_slots(vars, overrides, self_url);
    let mut env = BTreeMap::new();
    let mut errors: Vec<ResolveError> = Vec::new();
    let push = |errors: &mut Vec<ResolveError>, gap: Gap| {
        let err = gap.into_error(&service.name);
        if !errors.contains(&err) {
            errors.push(err);
        }
    };

    let local: BTreeSet<&str> = service
        .environment
        .iter()
        .filter_map(|sel| match sel {
            EnvSelection::Assign { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();

    for selection in &service.environment {
        match selection {
            EnvSelection::All => {
                for (name, slot) in &slots {
                    if local.contains(name.as_str()) {
                        continue;
                    }
                    match slot {
                        Ok(value) => {
                            env.insert(name.clone(), value.clone());
                        }
                        Err(gap) => push(&mut errors, gap.clone()),
                    }
                }
            }
            EnvSelection::Name(name) => {
                if local.contains(name.as_str()) {
                    continue;
                }
                match slots.get(name) {
                    Some(Ok(value)) => {
                        env.insert(name.clone(), value.clone());
                    }
                    Some(Err(gap)) => push(&mut errors, gap.clone()),
                    // Optional and not overridden: simply absent.
                    None if vars.optional.contains(name) => {}
                    None => push(&mut errors, Gap::Undefined(name.clone())),
                }
            }
            EnvSelection::Assign { .. } => {}
        }
    }

    for selection in &service.environment {
        if let EnvSelection::Assign { name, value } = selection {
            match interpolate(value, &slots) {
                Ok(value) => {
                    env.insert(name.clone(), value);
                }
                Err(gap) => push(&mut errors, gap),
            }
        }
    }

    if errors.is_empty() {
        Ok(env)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_schema::{
        Assignment, ImageRef, ServiceOrigin, ServiceType, Variable,
    };

    fn scopes() -> VariableScopes {
        VariableScopes {
            external: vec![
                Assignment {
                    name: "DB_HOST".into(),
                    value: None,
                },
                Assignment {
                    name: "LOG_FORMAT".into(),
                    value: Some("json".into()),
                },
            ],
            optional: vec!["SENTRY_DSN".into()],
            relative: vec![Variable {
                name: "WEB_APP_LOGIN_URL".into(),
                value: "/login".into(),
            }],
            internal: vec![
                Variable {
                    name: "LOGGING__LOGLEVEL__DEFAULT".into(),
                    value: "Error".into(),
                },
                Variable {
                    name: "DB_URL".into(),
                    value: "postgres://${DB_HOST}/app".into(),
                },
            ],
        }
    }

    fn service(name: &str, selections: &[&str]) -> ServiceDecl {
        ServiceDecl {
            name: ServiceName::new(name),
            origin: ServiceOrigin::App,
            service_type: ServiceType::Internal,
            image: ImageRef::new("mycompany/svc"),
            environment: selections
                .iter()
                .map(|s| EnvSelection::parse(s).unwrap())
                .collect(),
            configs: Vec::new(),
            secrets: Vec::new(),
        }
    }

    fn overrides(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    const URL: Option<&str> = Some("https://app.myapp.com");

    #[test]
    fn precedence_base_env_service() {
        let ov = overrides(&[("DB_HOST", "db"), ("LOGGING__LOGLEVEL__DEFAULT", "Warning")]);
        let web = service("web", &["$all", "LOGGING__LOGLEVEL__DEFAULT=Debug"]);
        let worker = service("worker", &["$all"]);

        let web_env = resolve(&scopes(), &ov, URL, &web).unwrap();
        let worker_env = resolve(&scopes(), &ov, URL, &worker).unwrap();

        assert_eq!(web_env["LOGGING__LOGLEVEL__DEFAULT"], "Debug");
        assert_eq!(worker_env["LOGGING__LOGLEVEL__DEFAULT"], "Warning");
        assert_eq!(worker_env["LOG_FORMAT"], "json");
    }

    #[test]
    fn relative_variable_joins_self_url() {
        let ov = overrides(&[("DB_HOST", "db")]);
        let env = resolve(&scopes(), &ov, URL, &service("web", &["WEB_APP_LOGIN_URL"])).unwrap();
        assert_eq!(env["WEB_APP_LOGIN_URL"], "https://app.myapp.com/login");
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn explicit_selection_filters() {
        let ov = overrides(&[("DB_HOST", "db")]);
        let env = resolve(&scopes(), &ov, URL, &service("web", &["DB_HOST", "LOG_FORMAT"])).unwrap();
        assert_eq!(env.keys().collect::<Vec<_>>(), vec!["DB_HOST", "LOG_FORMAT"]);
    }

    #[test]
    fn missing_required_only_when_selected() {
        let unselected = resolve(&scopes(), &[], URL, &service("web", &["LOG_FORMAT"]));
        assert!(unselected.is_ok());

        let errors = resolve(&scopes(), &[], URL, &service("web", &["DB_HOST"])).unwrap_err();
        assert_eq!(
            errors,
            vec![ResolveError::MissingRequiredVariable {
                service: "web".into(),
                variable: "DB_HOST".into()
            }]
        );
    }

    #[test]
    fn missing_required_through_template_is_reported_once() {
        let errors = resolve(&scopes(), &[], URL, &service("web", &["$all"])).unwrap_err();
        assert_eq!(
            errors,
            vec![ResolveError::MissingRequiredVariable {
                service: "web".into(),
                variable: "DB_HOST".into()
            }]
        );
    }

    #[test]
    fn interpolates_internal_values() {
        let ov = overrides(&[("DB_HOST", "db.internal")]);
        let env = resolve(&scopes(), &ov, URL, &service("web", &["DB_URL"])).unwrap();
        assert_eq!(env["DB_URL"], "postgres://db.internal/app");
    }

    #[test]
    fn local_assignment_interpolates() {
        let env = resolve(
            &scopes(),
            &overrides(&[("DB_HOST", "db")]),
            URL,
            &service("web", &["LOG_FORMAT", "GREETING=${LOG_FORMAT}-mode"]),
        )
        .unwrap();
        assert_eq!(env["GREETING"], "json-mode");
    }

    #[test]
    fn local_assignment_stays_local() {
        // The service supplies DB_HOST itself, but DB_URL was built from the
        // shared map where DB_HOST is still missing.
        let errors = resolve(
            &scopes(),
            &[],
            URL,
            &service("web", &["$all", "DB_HOST=local"]),
        )
        .unwrap_err();
        assert_eq!(errors_of(&errors), vec!["DB_HOST"]);

        let env = resolve(&scopes(), &[], URL, &service("web", &["DB_HOST=local"])).unwrap();
        assert_eq!(env["DB_HOST"], "local");
    }

    fn errors_of(errors: &[ResolveError]) -> Vec<&str> {
        errors
            .iter()
            .map(|e| match e {
                ResolveError::MissingRequiredVariable { variable, .. }
                | ResolveError::UndefinedVariable { variable, .. }
                | ResolveError::UnresolvableRelativeVariable { variable, .. } => variable.as_str(),
            })
            .collect()
    }

    #[test]
    fn optional_present_only_when_overridden() {
        let ov = overrides(&[("DB_HOST", "db")]);
        let env = resolve(&scopes(), &ov, URL, &service("web", &["SENTRY_DSN"])).unwrap();
        assert!(env.is_empty());

        let ov = overrides(&[("DB_HOST", "db"), ("SENTRY_DSN", "https://key@sentry")]);
        let env = resolve(&scopes(), &ov, URL, &service("web", &["$all"])).unwrap();
        assert_eq!(env["SENTRY_DSN"], "https://key@sentry");
    }

    #[test]
    fn undefined_selection_and_reference() {
        let ov = overrides(&[("DB_HOST", "db")]);
        let errors =
            resolve(&scopes(), &ov, URL, &service("web", &["NOPE", "X=${ALSO_NOPE}"])).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ResolveError::UndefinedVariable {
                    service: "web".into(),
                    variable: "NOPE".into()
                },
                ResolveError::UndefinedVariable {
                    service: "web".into(),
                    variable: "ALSO_NOPE".into()
                },
            ]
        );
    }

    #[test]
    fn undeclared_override_is_ignored() {
        let ov = overrides(&[("DB_HOST", "db"), ("STRAY", "1")]);
        let env = resolve(&scopes(), &ov, URL, &service("web", &["$all"])).unwrap();
        assert!(!env.contains_key("STRAY"));
    }

    #[test]
    fn relative_without_host() {
        let ov = overrides(&[("DB_HOST", "db")]);
        let errors = resolve(&scopes(), &ov, None, &service("job", &["WEB_APP_LOGIN_URL"])).unwrap_err();
        assert!(matches!(
            errors.as_slice(),
            [ResolveError::UnresolvableRelativeVariable { variable, .. }] if variable == "WEB_APP_LOGIN_URL"
        ));

        // Not selected: no error even without a host.
        assert!(resolve(&scopes(), &ov, None, &service("job", &["LOG_FORMAT"])).is_ok());
    }

    #[test]
    fn resolution_is_deterministic() {
        let ov = overrides(&[("DB_HOST", "db")]);
        let svc = service("web", &["$all"]);
        let first = resolve(&scopes(), &ov, URL, &svc).unwrap();
        for _ in 0..10 {
            assert_eq!(resolve(&scopes(), &ov, URL, &svc).unwrap(), first);
        }
    }

    #[test]
    fn interpolate_keeps_unterminated_reference() {
        let slots = Slots::new();
        assert_eq!(interpolate("a${b", &slots).unwrap(), "a${b");
        assert_eq!(interpolate("plain", &slots).unwrap(), "plain");
    }
}
