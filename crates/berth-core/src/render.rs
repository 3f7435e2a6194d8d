//! Rendering a manifest set to YAML documents, and its content digest.

use crate::binding::ConfigSource;
use crate::manifest::{ConfigMap, ManifestObject, ObjectMeta};
use base64::Engine as _;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to render {kind} '{name}': {source}")]
    Yaml {
        kind: String,
        name: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Ordered manifest objects for one deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestSet {
    objects: Vec<ManifestObject>,
}

/// One rendered YAML document and the file name it is written under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedDocument {
    pub file_name: String,
    pub content: String,
}

/// Content digest of a rendered manifest set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestDigest {
    pub digest: String,
    pub short: String,
}

impl ManifestSet {
    pub fn new(objects: Vec<ManifestObject>) -> Self {
        Self { objects }
    }

    pub fn objects(&self) -> &[ManifestObject] {
        &self.objects
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ManifestObject> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Insert `objects` ahead of the current ones, keeping their order.
    pub fn prepend(&mut self, objects: impl IntoIterator<Item = ManifestObject>) {
        let mut head: Vec<ManifestObject> = objects.into_iter().collect();
        head.append(&mut self.objects);
        self.objects = head;
    }

    /// Render every object as its own YAML document. File names are
    /// `NN-kind-name.yaml`, numbered in emission order.
    pub fn render(&self) -> Result<Vec<RenderedDocument>, RenderError> {
        let width = self.objects.len().to_string().len().max(2);
        self.objects
            .iter()
            .enumerate()
            .map(|(idx, object)| {
                let content = serde_yaml::to_string(object).map_err(|e| RenderError::Yaml {
                    kind: object.kind().to_owned(),
                    name: object.name().to_owned(),
                    source: e,
                })?;
                Ok(RenderedDocument {
                    file_name: format!(
                        "{:0width$}-{}-{}.yaml",
                        idx + 1,
                        object.kind().to_lowercase(),
                        object.name()
                    ),
                    content,
                })
            })
            .collect()
    }

    /// blake3 over file names and contents, in order.
    pub fn digest(&self) -> Result<ManifestDigest, RenderError> {
        Ok(digest_documents(&self.render()?))
    }
}

impl<'a> IntoIterator for &'a ManifestSet {
    type Item = &'a ManifestObject;
    type IntoIter = std::slice::Iter<'a, ManifestObject>;

    fn into_iter(self) -> Self::IntoIter {
        self.objects.iter()
    }
}

pub fn digest_documents(docs: &[RenderedDocument]) -> ManifestDigest {
    let mut hasher = blake3::Hasher::new();
    for doc in docs {
        hasher.update(format!("file:{}\n", doc.file_name).as_bytes());
        hasher.update(doc.content.as_bytes());
    }
    let hex = hasher.finalize().to_hex().to_string();
    let short = hex[..12].to_owned();
    ManifestDigest { digest: hex, short }
}

/// Build the config map for a bound config from its file contents.
pub fn config_map(source: &ConfigSource, files: &BTreeMap<String, Vec<u8>>) -> ManifestObject {
    let engine = base64::engine::general_purpose::STANDARD;
    ManifestObject::ConfigMap(ConfigMap {
        api_version: "v1".to_owned(),
        kind: "ConfigMap".to_owned(),
        metadata: ObjectMeta::named(&source.object),
        binary_data: files
            .iter()
            .map(|(name, content)| (name.clone(), engine.encode(content)))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_schema::ConfigName;
    use std::path::PathBuf;

    fn source() -> ConfigSource {
        ConfigSource {
            config: ConfigName::new("web-config"),
            object: "myapp-web-config".to_owned(),
            dir: PathBuf::from("/srv/web"),
            files: vec!["app.json".to_owned()],
        }
    }

    fn set() -> ManifestSet {
        let files = BTreeMap::from([("app.json".to_owned(), b"{\"a\":1}".to_vec())]);
        ManifestSet::new(vec![config_map(&source(), &files)])
    }

    #[test]
    fn config_map_is_base64_encoded() {
        let docs = set().render().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].file_name, "01-configmap-myapp-web-config.yaml");
        assert!(docs[0].content.contains("binaryData:"));
        assert!(docs[0].content.contains("app.json: eyJhIjoxfQ=="));
        assert!(docs[0].content.starts_with("apiVersion: v1\nkind: ConfigMap\n"));
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let a = set().digest().unwrap();
        let b = set().digest().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest.len(), 64);
        assert_eq!(a.short, &a.digest[..12]);

        let other = ManifestSet::new(vec![config_map(&source(), &BTreeMap::new())]);
        assert_ne!(other.digest().unwrap(), a);
    }

    #[test]
    fn prepend_keeps_order() {
        let mut set = set();
        let extra = config_map(
            &ConfigSource {
                object: "myapp-first".to_owned(),
                ..source()
            },
            &BTreeMap::new(),
        );
        set.prepend([extra]);
        let names: Vec<_> = set.iter().map(ManifestObject::name).collect();
        assert_eq!(names, vec!["myapp-first", "myapp-web-config"]);
    }
}
