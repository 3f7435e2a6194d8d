//! Manifest synthesis from a validated binding.
//!
//! Synthesis has no failure path: a [`ResolvedBinding`] can only come out of
//! validation, so every reference in it is already known to be sound.

use crate::binding::{ResolvedBinding, ResolvedRoute, ResolvedService, SECRET_KEY};
use crate::manifest::{
    AcmeIssuer, AcmeSolver, ClusterIssuer, ClusterIssuerSpec, ConfigMapVolumeSource, Container,
    ContainerPort, Deployment, DeploymentSpec, EnvVar, Http01IngressSolver, Http01Solver,
    HttpIngressPath, HttpIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTlsEntry, Job, JobSpec, LabelSelector, Labels,
    ManifestObject, ObjectMeta, PodSpec, PodTemplate, PodTemplateMeta, ResourceRequirements,
    SecretRef, SecretVolumeSource, Service, ServiceBackendPort, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use crate::options::CompileOptions;
use crate::render::ManifestSet;
use berth_schema::{Ingress as IngressDescription, LetsEncrypt, Prefix, SecretMount, ServiceType};
use std::collections::BTreeSet;
use tracing::debug;

pub const LABEL_APP: &str = "app";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const ANNOTATION_ISSUER: &str = "cert-manager.io/cluster-issuer";
pub const ANNOTATION_REWRITE: &str = "nginx.ingress.kubernetes.io/rewrite-target";
pub const ANNOTATION_REGEX: &str = "nginx.ingress.kubernetes.io/use-regex";

pub fn issuer_name(ingress: &IngressDescription) -> String {
    format!("{}-letsencrypt", ingress.name)
}

/// Produce the ordered manifest set for one binding.
///
/// Order: the certificate issuer (when Let's Encrypt is configured), then for
/// each service its workload, its network service and its routing objects.
pub fn synthesize(
    binding: &ResolvedBinding,
    ingress: &IngressDescription,
    options: &CompileOptions,
) -> ManifestSet {
    let mut objects = Vec::new();

    if let Some(le) = &ingress.tls.letsencrypt {
        objects.push(cluster_issuer(ingress, le, options));
    }

    for service in binding.services() {
        let labels = object_labels(binding.application(), &service.full_name);
        objects.push(workload(service, &labels, options));

        if service.service_type == ServiceType::Job {
            continue;
        }
        objects.push(network_service(service, &labels));

        if let Some(route) = &service.route {
            objects.extend(ingresses(service, route, &labels, ingress, options));
        }
    }

    debug!(
        app = %binding.application(),
        deployment = %binding.deployment(),
        objects = objects.len(),
        "synthesized manifest set"
    );
    ManifestSet::new(objects)
}

fn object_labels(app: &str, full_name: &str) -> Labels {
    Labels::from([
        (LABEL_APP.to_owned(), full_name.to_owned()),
        (LABEL_PART_OF.to_owned(), app.to_owned()),
    ])
}

fn selector(full_name: &str) -> Labels {
    Labels::from([(LABEL_APP.to_owned(), full_name.to_owned())])
}

fn pod_spec(service: &ResolvedService, restart_policy: Option<String>) -> PodSpec {
    let mut env: Vec<EnvVar> = service
        .environment
        .iter()
        .map(|(name, value)| EnvVar::literal(name, value))
        .collect();

    let mut mounts = Vec::new();
    let mut volumes = Vec::new();
    let mut volume_names = BTreeSet::new();

    for config in &service.configs {
        let volume = format!("config-{}", config.config);
        mounts.push(VolumeMount {
            name: volume.clone(),
            mount_path: config.mount_path.clone(),
            read_only: true,
        });
        if volume_names.insert(volume.clone()) {
            volumes.push(Volume {
                name: volume,
                config_map: Some(ConfigMapVolumeSource {
                    name: config.object.clone(),
                }),
                secret: None,
            });
        }
    }

    for secret in &service.secrets {
        match &secret.mount {
            SecretMount::EnvVar(var) => {
                env.push(EnvVar::from_secret(var, &secret.object, SECRET_KEY));
            }
            SecretMount::File(path) => {
                let volume = format!("secret-{}", secret.secret);
                mounts.push(VolumeMount {
                    name: volume.clone(),
                    mount_path: path.clone(),
                    read_only: true,
                });
                if volume_names.insert(volume.clone()) {
                    volumes.push(Volume {
                        name: volume,
                        config_map: None,
                        secret: Some(SecretVolumeSource {
                            secret_name: secret.object.clone(),
                        }),
                    });
                }
            }
        }
    }

    let mut ports: Vec<u16> = service.ports.iter().map(|p| p.internal).collect();
    ports.sort_unstable();
    ports.dedup();

    PodSpec {
        containers: vec![Container {
            name: service.full_name.clone(),
            image: service.image.clone(),
            env,
            ports: if service.service_type == ServiceType::Job {
                Vec::new()
            } else {
                ports
                    .into_iter()
                    .map(|container_port| ContainerPort { container_port })
                    .collect()
            },
            volume_mounts: mounts,
            resources: ResourceRequirements {
                requests: service.resources.requests.clone(),
                limits: service.resources.limits.clone(),
            },
        }],
        volumes,
        restart_policy,
    }
}

fn workload(service: &ResolvedService, labels: &Labels, options: &CompileOptions) -> ManifestObject {
    let metadata = ObjectMeta::named(&service.full_name).with_labels(labels.clone());
    let template_meta = PodTemplateMeta {
        labels: labels.clone(),
    };

    if service.service_type == ServiceType::Job {
        return ManifestObject::Job(Job {
            api_version: "batch/v1".to_owned(),
            kind: "Job".to_owned(),
            metadata,
            spec: JobSpec {
                backoff_limit: options.job_backoff_limit,
                template: PodTemplate {
                    metadata: template_meta,
                    spec: pod_spec(
                        service,
                        Some(options.job_restart_policy.as_str().to_owned()),
                    ),
                },
            },
        });
    }

    ManifestObject::Deployment(Deployment {
        api_version: "apps/v1".to_owned(),
        kind: "Deployment".to_owned(),
        metadata,
        spec: DeploymentSpec {
            replicas: service.replicas,
            selector: LabelSelector {
                match_labels: selector(&service.full_name),
            },
            template: PodTemplate {
                metadata: template_meta,
                spec: pod_spec(service, None),
            },
        },
    })
}

fn network_service(service: &ResolvedService, labels: &Labels) -> ManifestObject {
    ManifestObject::Service(Service {
        api_version: "v1".to_owned(),
        kind: "Service".to_owned(),
        metadata: ObjectMeta::named(&service.full_name).with_labels(labels.clone()),
        spec: ServiceSpec {
            service_type: "ClusterIP".to_owned(),
            selector: selector(&service.full_name),
            ports: service
                .ports
                .iter()
                .map(|p| ServicePort {
                    name: format!("port-{}", p.external),
                    port: p.external,
                    target_port: p.internal,
                })
                .collect(),
        },
    })
}

/// Path and path type for one prefix. Stripped prefixes become a regex whose
/// second group is forwarded.
fn ingress_path(prefix: &Prefix) -> (String, &'static str, bool) {
    let trimmed = prefix.path.trim_end_matches('/');
    if prefix.strip && !trimmed.is_empty() {
        (format!("{trimmed}(/|$)(.*)"), "ImplementationSpecific", true)
    } else {
        (prefix.path.clone(), "Prefix", false)
    }
}

/// Routing objects for a public service: one for plain prefixes and one for
/// stripped prefixes, since the rewrite annotation applies per object.
fn ingresses(
    service: &ResolvedService,
    route: &ResolvedRoute,
    labels: &Labels,
    ingress: &IngressDescription,
    options: &CompileOptions,
) -> Vec<ManifestObject> {
    let port = service.ports.first().map_or(80, |p| p.external);
    let mut plain = Vec::new();
    let mut stripped = Vec::new();
    for prefix in &route.prefixes {
        let (path, path_type, strip) = ingress_path(prefix);
        let entry = HttpIngressPath {
            path,
            path_type: path_type.to_owned(),
            backend: IngressBackend {
                service: IngressServiceBackend {
                    name: service.full_name.clone(),
                    port: ServiceBackendPort { number: port },
                },
            },
        };
        if strip {
            stripped.push(entry);
        } else {
            plain.push(entry);
        }
    }

    let tls: Vec<IngressTlsEntry> = ingress
        .tls_secret()
        .map(|secret_name| IngressTlsEntry {
            hosts: route.domains.clone(),
            secret_name,
        })
        .into_iter()
        .collect();

    let mut objects = Vec::new();
    for (suffix, paths) in [("", plain), ("-strip", stripped)] {
        if paths.is_empty() {
            continue;
        }
        let mut metadata = ObjectMeta::named(format!("{}{suffix}", service.full_name))
            .with_labels(labels.clone());
        if ingress.tls.letsencrypt.is_some() {
            metadata
                .annotations
                .insert(ANNOTATION_ISSUER.to_owned(), issuer_name(ingress));
        }
        if !suffix.is_empty() {
            metadata
                .annotations
                .insert(ANNOTATION_REWRITE.to_owned(), "/$2".to_owned());
            metadata
                .annotations
                .insert(ANNOTATION_REGEX.to_owned(), "true".to_owned());
        }

        objects.push(ManifestObject::Ingress(Ingress {
            api_version: "networking.k8s.io/v1".to_owned(),
            kind: "Ingress".to_owned(),
            metadata,
            spec: IngressSpec {
                ingress_class_name: options.ingress_class.clone(),
                tls: tls.clone(),
                rules: route
                    .domains
                    .iter()
                    .map(|domain| IngressRule {
                        host: domain.clone(),
                        http: HttpIngressRuleValue {
                            paths: paths.clone(),
                        },
                    })
                    .collect(),
            },
        }));
    }
    objects
}

fn cluster_issuer(
    ingress: &IngressDescription,
    le: &LetsEncrypt,
    options: &CompileOptions,
) -> ManifestObject {
    let name = issuer_name(ingress);
    ManifestObject::ClusterIssuer(ClusterIssuer {
        api_version: "cert-manager.io/v1".to_owned(),
        kind: "ClusterIssuer".to_owned(),
        metadata: ObjectMeta::named(&name),
        spec: ClusterIssuerSpec {
            acme: AcmeIssuer {
                server: le.server.clone(),
                email: le.email.clone(),
                private_key_secret_ref: SecretRef { name },
                solvers: vec![AcmeSolver {
                    http01: Http01Solver {
                        ingress: Http01IngressSolver {
                            class: options.ingress_class.clone(),
                        },
                    },
                }],
            },
        },
    })
}
