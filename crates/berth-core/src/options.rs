use serde::{Deserialize, Serialize};

/// Scheme used when building a service's own public URL for `relative`
/// variables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UrlScheme {
    #[default]
    Https,
    Http,
    /// `https` when the ingress has TLS configured, `http` otherwise.
    FollowTls,
}

impl UrlScheme {
    pub fn scheme(self, tls_enabled: bool) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Http => "http",
            Self::FollowTls if tls_enabled => "https",
            Self::FollowTls => "http",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    #[default]
    Never,
    OnFailure,
}

impl RestartPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Never => "Never",
            Self::OnFailure => "OnFailure",
        }
    }
}

/// Compilation policy knobs that are not part of either descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileOptions {
    pub url_scheme: UrlScheme,
    pub ingress_class: String,
    pub job_restart_policy: RestartPolicy,
    pub job_backoff_limit: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            url_scheme: UrlScheme::default(),
            ingress_class: "nginx".to_owned(),
            job_restart_policy: RestartPolicy::default(),
            job_backoff_limit: 4,
        }
    }
}
