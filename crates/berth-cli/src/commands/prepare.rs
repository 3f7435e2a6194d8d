use super::{
    describe, error_entries, json_pretty, load_app, load_env, print_report, spin_fail, spin_ok, spinner,
    EXIT_SUCCESS, EXIT_VALIDATION_FAILED,
};
use berth_core::{
    config_map, digest_documents, CompileOptions, Compiler, ConfigSource, CoreError,
    RenderedDocument,
};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Read the files a bound config provides. An empty file list means every
/// regular file in the directory.
pub fn read_config_files(source: &ConfigSource) -> Result<BTreeMap<String, Vec<u8>>, String> {
    let names: Vec<String> = if source.files.is_empty() {
        let entries = fs::read_dir(&source.dir)
            .map_err(|e| format!("failed to read config dir {}: {e}", source.dir.display()))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| format!("failed to read config dir entry: {e}"))?;
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names
    } else {
        source.files.clone()
    };

    names
        .into_iter()
        .map(|name| {
            let path = source.dir.join(&name);
            fs::read(&path)
                .map(|content| (name, content))
                .map_err(|e| format!("failed to read config file {}: {e}", path.display()))
        })
        .collect()
}

fn write_document(dir: &Path, doc: &RenderedDocument) -> Result<(), String> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| format!("write temp file: {e}"))?;
    tmp.write_all(doc.content.as_bytes())
        .map_err(|e| format!("write temp file: {e}"))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| format!("fsync temp file: {e}"))?;
    tmp.persist(dir.join(&doc.file_name))
        .map_err(|e| format!("persist {}: {}", doc.file_name, e.error))?;
    Ok(())
}

/// Write all documents into `target`, replacing whatever was there. The
/// documents are staged next to `target` and moved in one rename.
fn write_output(target: &Path, docs: &[RenderedDocument]) -> Result<(), String> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&parent)
        .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;

    let staging = tempfile::Builder::new()
        .prefix(".berth-staging-")
        .tempdir_in(&parent)
        .map_err(|e| format!("failed to create staging dir: {e}"))?;
    for doc in docs {
        write_document(staging.path(), doc)?;
    }

    if target.exists() {
        fs::remove_dir_all(target)
            .map_err(|e| format!("failed to replace {}: {e}", target.display()))?;
    }
    fs::rename(staging.path(), target)
        .map_err(|e| format!("failed to move output to {}: {e}", target.display()))
}

pub fn run(
    options: CompileOptions,
    deployment: &str,
    app_dir: &Path,
    env_path: &Path,
    output_dir: &Path,
    json: bool,
) -> Result<u8, String> {
    let app = load_app(app_dir)?;
    let env = load_env(env_path)?;

    let pb = if json {
        None
    } else {
        Some(spinner(&format!("compiling deployment '{deployment}'...")))
    };

    let compiled = match Compiler::new(options).compile(&app, &env, deployment) {
        Ok(result) => result,
        Err(CoreError::Validation(report)) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "validation failed");
            }
            if json {
                let payload = serde_json::json!({
                    "deployment": deployment,
                    "status": "invalid",
                    "errors": error_entries(&report),
                });
                println!("{}", json_pretty(&payload)?);
            } else {
                print_report(&report);
            }
            return Ok(EXIT_VALIDATION_FAILED);
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "compilation failed");
            }
            return Err(describe(&e));
        }
    };

    let mut manifests = compiled.manifests;
    let mut config_maps = Vec::new();
    for source in compiled.binding.config_sources() {
        config_maps.push(config_map(source, &read_config_files(source)?));
    }
    manifests.prepend(config_maps);

    let docs = manifests.render().map_err(|e| e.to_string())?;
    let digest = digest_documents(&docs);
    let target = output_dir.join(deployment);
    if let Err(e) = write_output(&target, &docs) {
        if let Some(ref pb) = pb {
            spin_fail(pb, "write failed");
        }
        return Err(e);
    }
    tracing::info!(
        deployment,
        objects = docs.len(),
        digest = %digest.short,
        "manifests written"
    );

    if json {
        let files: Vec<&str> = docs.iter().map(|d| d.file_name.as_str()).collect();
        let payload = serde_json::json!({
            "deployment": deployment,
            "status": "written",
            "output": target,
            "files": files,
            "digest": digest.digest,
            "short_digest": digest.short,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        if let Some(ref pb) = pb {
            spin_ok(pb, &format!("{} manifests written", docs.len()));
        }
        println!("output: {}", target.display());
        println!("digest: {}", digest.digest);
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_schema::ConfigName;

    fn doc(name: &str, content: &str) -> RenderedDocument {
        RenderedDocument {
            file_name: name.to_owned(),
            content: content.to_owned(),
        }
    }

    #[test]
    fn reads_listed_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        fs::write(dir.path().join("b.json"), "[]").unwrap();
        let source = ConfigSource {
            config: ConfigName::new("web"),
            object: "app-web".to_owned(),
            dir: dir.path().to_path_buf(),
            files: vec!["b.json".to_owned()],
        };
        let files = read_config_files(&source).unwrap();
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["b.json"]);
    }

    #[test]
    fn empty_list_reads_whole_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("z.conf"), "z").unwrap();
        fs::write(dir.path().join("a.conf"), "a").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        let source = ConfigSource {
            config: ConfigName::new("web"),
            object: "app-web".to_owned(),
            dir: dir.path().to_path_buf(),
            files: Vec::new(),
        };
        let files = read_config_files(&source).unwrap();
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["a.conf", "z.conf"]);
        assert_eq!(files["a.conf"], b"a");
    }

    #[test]
    fn output_replaces_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out/production");
        write_output(&target, &[doc("01-a.yaml", "a: 1\n"), doc("02-b.yaml", "b: 2\n")]).unwrap();
        write_output(&target, &[doc("01-c.yaml", "c: 3\n")]).unwrap();

        let mut names: Vec<_> = fs::read_dir(&target)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["01-c.yaml"]);
        assert_eq!(fs::read_to_string(target.join("01-c.yaml")).unwrap(), "c: 3\n");

        let leftovers = fs::read_dir(dir.path().join("out")).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
