use super::{
    colorize_status, describe, error_entries, json_pretty, load_app, load_env, print_report,
    ErrorEntry, EXIT_SUCCESS, EXIT_VALIDATION_FAILED,
};
use berth_core::{CompileOptions, Compiler, CoreError, ResolvedBinding};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct DeploymentStatus {
    deployment: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Serialize)]
struct VerifyOutput {
    application: String,
    version: String,
    deployments: Vec<DeploymentStatus>,
}

pub fn run(
    options: CompileOptions,
    app_dir: &Path,
    env_path: Option<&Path>,
    deployment: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    let app = load_app(app_dir)?;

    let Some(env_path) = env_path else {
        if json {
            let payload = VerifyOutput {
                application: app.name.clone(),
                version: app.version.to_string(),
                deployments: Vec::new(),
            };
            println!("{}", json_pretty(&payload)?);
        } else {
            println!(
                "application '{}' {} is {}",
                app.name,
                app.version,
                colorize_status("valid")
            );
        }
        return Ok(EXIT_SUCCESS);
    };

    let env = load_env(env_path)?;
    let compiler = Compiler::new(options);

    let results: Vec<(String, Result<ResolvedBinding, CoreError>)> = match deployment {
        Some(name) => vec![(name.to_owned(), compiler.validate(&app, &env, name))],
        None => compiler.validate_all(&app, &env),
    };
    if results.is_empty() {
        return Err(format!(
            "no deployment in {} binds application '{}'",
            env_path.display(),
            app.name
        ));
    }

    let mut statuses = Vec::with_capacity(results.len());
    let mut failed = false;
    for (name, result) in results {
        match result {
            Ok(_) => statuses.push(DeploymentStatus {
                deployment: name,
                status: "valid",
                errors: Vec::new(),
            }),
            Err(CoreError::Validation(report)) => {
                failed = true;
                if !json {
                    print_report(&report);
                }
                statuses.push(DeploymentStatus {
                    deployment: name,
                    status: "invalid",
                    errors: error_entries(&report),
                });
            }
            Err(other) => return Err(describe(&other)),
        }
    }

    if json {
        let payload = VerifyOutput {
            application: app.name.clone(),
            version: app.version.to_string(),
            deployments: statuses,
        };
        println!("{}", json_pretty(&payload)?);
    } else {
        for status in statuses.iter().filter(|s| s.errors.is_empty()) {
            println!(
                "{} deployment '{}' of '{}' {}",
                colorize_status(status.status),
                status.deployment,
                app.name,
                app.version
            );
        }
    }

    Ok(if failed {
        EXIT_VALIDATION_FAILED
    } else {
        EXIT_SUCCESS
    })
}
