use berth_core::{CompileOptions, Compiler, CoreError, ErrorKind, ManifestObject, UrlScheme};
use berth_schema::{load_application, load_environment};
use std::fs;
use std::path::Path;

const APPSPEC: &str = r#"
name: myapp
version: 1.0.1
environment:
  external: [DB_HOST, "LOG_FORMAT=json"]
  optional: [SENTRY_DSN]
  relative: ["WEB_APP_LOGIN_URL=/login"]
  internal: ["LOGGING__LOGLEVEL__DEFAULT=Error", "DB_URL=postgres://${DB_HOST}/myapp"]
app_services:
  web-app:
    type: public
    image: mycompany/web-app
    environment: ["$all", "LOGGING__LOGLEVEL__DEFAULT=Debug"]
    configs:
      - web-config: /etc/web
    secrets:
      - db-password
  api:
    type: public
    image: mycompany/api
    environment: ["$all"]
    secrets:
      - db-password:
          variable: DB_PASSWORD
  migrate:
    type: job
    image: mycompany/migrate
    environment: [DB_URL]
extra_services:
  auth-gateway:
    type: public
    image: 3rd-party/auth-gateway:26.4
configs:
  web-config: [app.json]
secrets: [db-password]
"#;

const ENVSPEC: &str = r#"
ingress:
  name: main
  hosts:
    myapp: app.myapp.com
    api: api.myapp.com
  tls:
    secret: myapp-tls
registry:
  mycompany: registry.example.com
deployments:
  production:
    application:
      name: myapp
      version: "^1.1.0"
    host: myapp
    environment: production.env
    configs:
      web-config: configs/web
    secrets:
      db-password:
    services:
      web-app:
        prefix: /
      api:
        host: api
        prefixes:
          /v1:
            strip: true
      auth-gateway:
        prefix: /auth
  staging:
    application:
      name: myapp
      version: "^1.0.0"
    host: myapp
    environment: production.env
    configs:
      web-config: configs/web
    secrets:
      db-password:
    services:
      web-app:
        prefix: /
      api:
        host: api
        prefix: /
      auth-gateway:
        prefix: /auth
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    app: berth_schema::ApplicationDescription,
    env: berth_schema::EnvironmentDescription,
}

fn write_fixture(root: &Path) {
    fs::create_dir_all(root.join("app")).unwrap();
    fs::write(root.join("app/appspec.yaml"), APPSPEC).unwrap();
    fs::create_dir_all(root.join("env/configs/web")).unwrap();
    fs::write(root.join("env/configs/web/app.json"), "{}").unwrap();
    fs::write(
        root.join("env/production.env"),
        "# shared overrides\nDB_HOST=db.internal\nLOGGING__LOGLEVEL__DEFAULT=Warning\n",
    )
    .unwrap();
    fs::write(root.join("env/envspec.yaml"), ENVSPEC).unwrap();
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    let app = load_application(&dir.path().join("app")).unwrap();
    let env = load_environment(&dir.path().join("env/envspec.yaml")).unwrap();
    Fixture {
        _dir: dir,
        app,
        env,
    }
}

fn workload_env<'a>(object: &'a ManifestObject, name: &str) -> Option<&'a str> {
    let pod = match object {
        ManifestObject::Deployment(d) => &d.spec.template.spec,
        ManifestObject::Job(j) => &j.spec.template.spec,
        _ => return None,
    };
    pod.containers[0]
        .env
        .iter()
        .find(|e| e.name == name)
        .and_then(|e| e.value.as_deref())
}

#[test]
fn version_range_excludes_older_release() {
    let fx = fixture();
    match Compiler::default().compile(&fx.app, &fx.env, "production") {
        Err(CoreError::Validation(report)) => {
            assert_eq!(report.kinds(), vec![ErrorKind::VersionMismatch]);
        }
        other => panic!("expected version mismatch, got {other:?}"),
    }
}

#[test]
fn compiles_from_disk_end_to_end() {
    let fx = fixture();
    let result = Compiler::default()
        .compile(&fx.app, &fx.env, "staging")
        .unwrap();

    let kinds: Vec<_> = result
        .manifests
        .iter()
        .map(|o| format!("{}/{}", o.kind(), o.name()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            "Deployment/myapp-web-app",
            "Service/myapp-web-app",
            "Ingress/myapp-web-app",
            "Deployment/myapp-api",
            "Service/myapp-api",
            "Ingress/myapp-api",
            "Deployment/myapp-auth-gateway",
            "Service/myapp-auth-gateway",
            "Ingress/myapp-auth-gateway-strip",
            "Job/myapp-migrate",
        ]
    );

    let web = &result.manifests.objects()[0];
    assert_eq!(workload_env(web, "LOGGING__LOGLEVEL__DEFAULT"), Some("Debug"));
    assert_eq!(
        workload_env(web, "WEB_APP_LOGIN_URL"),
        Some("https://app.myapp.com/login")
    );

    let api = &result.manifests.objects()[3];
    assert_eq!(workload_env(api, "LOGGING__LOGLEVEL__DEFAULT"), Some("Warning"));
    assert_eq!(
        workload_env(api, "WEB_APP_LOGIN_URL"),
        Some("https://api.myapp.com/login")
    );
    assert_eq!(workload_env(api, "SENTRY_DSN"), None);

    let job = &result.manifests.objects()[9];
    assert_eq!(
        workload_env(job, "DB_URL"),
        Some("postgres://db.internal/myapp")
    );

    let binding = &result.binding;
    assert_eq!(
        binding.service("web-app").unwrap().image,
        "registry.example.com/mycompany/web-app:1.0.1"
    );
    assert_eq!(
        binding.service("auth-gateway").unwrap().image,
        "3rd-party/auth-gateway:26.4"
    );
    assert_eq!(binding.config_sources().len(), 1);
}

#[test]
fn output_is_byte_identical_across_runs() {
    let fx = fixture();
    let compiler = Compiler::default();
    let first = compiler.compile(&fx.app, &fx.env, "staging").unwrap();
    let second = compiler.compile(&fx.app, &fx.env, "staging").unwrap();
    assert_eq!(
        first.manifests.render().unwrap(),
        second.manifests.render().unwrap()
    );
    assert_eq!(
        first.manifests.digest().unwrap(),
        second.manifests.digest().unwrap()
    );
}

#[test]
fn scheme_policy_follows_tls() {
    let fx = fixture();
    let options = CompileOptions {
        url_scheme: UrlScheme::Http,
        ..CompileOptions::default()
    };
    let result = Compiler::new(options)
        .compile(&fx.app, &fx.env, "staging")
        .unwrap();
    assert_eq!(
        result.binding.service("web-app").unwrap().environment["WEB_APP_LOGIN_URL"],
        "http://app.myapp.com/login"
    );
}

#[test]
fn missing_config_directory_is_reported_with_everything_else() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    fs::remove_dir_all(dir.path().join("env/configs")).unwrap();
    let app = load_application(&dir.path().join("app")).unwrap();
    let env = load_environment(&dir.path().join("env/envspec.yaml")).unwrap();

    let results = Compiler::default().validate_all(&app, &env);
    assert_eq!(results.len(), 2);
    for (name, result) in &results {
        let Err(CoreError::Validation(report)) = result else {
            panic!("{name} should fail");
        };
        assert!(report.kinds().contains(&ErrorKind::UnboundConfig), "{name}");
    }
    let Err(CoreError::Validation(production)) = &results[0].1 else {
        unreachable!();
    };
    assert_eq!(
        production.kinds(),
        vec![ErrorKind::VersionMismatch, ErrorKind::UnboundConfig]
    );
}
