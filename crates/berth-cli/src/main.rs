mod commands;
mod config;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::exit_code_for;
use config::BerthConfig;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "berth",
    version,
    about = "Compile application and environment descriptors into deterministic Kubernetes manifests"
)]
struct Cli {
    /// Path to a berth.toml config file (default: ./berth.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check an application descriptor, and optionally its deployments.
    Verify {
        /// Directory containing appspec.yaml (or the file itself).
        #[arg(long, default_value = ".")]
        app: PathBuf,
        /// Environment descriptor to validate the application against.
        #[arg(long)]
        env: Option<PathBuf>,
        /// Only validate this deployment (requires --env).
        #[arg(long, requires = "env")]
        deployment: Option<String>,
    },
    /// Validate one deployment and write its manifests.
    PrepareDeployment {
        /// Deployment name in the environment descriptor.
        deployment: String,
        /// Directory containing appspec.yaml (or the file itself).
        #[arg(long, default_value = ".")]
        app: PathBuf,
        /// Environment descriptor.
        #[arg(long, default_value = "envspec.yaml")]
        env: PathBuf,
        /// Output directory; manifests land in <output>/<deployment>/.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BERTH_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let json_output = cli.json;
    let result = match cli.command {
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
        command => BerthConfig::discover(cli.config.as_deref())
            .and_then(|config| run_compiler_command(command, config, json_output)),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}

fn run_compiler_command(
    command: Commands,
    config: BerthConfig,
    json_output: bool,
) -> Result<u8, String> {
    match command {
        Commands::Verify {
            app,
            env,
            deployment,
        } => commands::verify::run(
            config.compile,
            &app,
            env.as_deref(),
            deployment.as_deref(),
            json_output,
        ),
        Commands::PrepareDeployment {
            deployment,
            app,
            env,
            output,
        } => {
            let output = output.unwrap_or(config.output.dir);
            commands::prepare::run(
                config.compile,
                &deployment,
                &app,
                &env,
                &output,
                json_output,
            )
        }
        Commands::Completions { .. } | Commands::ManPages { .. } => {
            Err("internal error: command does not compile descriptors".to_owned())
        }
    }
}
