//! Xcode task CLI
//!
//! Entry point for the `xcode-task` command-line tool.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;
use xcode_task::config::DEFAULT_INPUTS_FILE;
use xcode_task::profile::ProfileInspector;
use xcode_task::telemetry::{emit_telemetry, TelemetryData};
use xcode_task::{HostEnv, Pipeline, SystemRunner, TaskError, TaskInputs, TaskState, Teardown};
use xcode_task_profile::Platform;

#[derive(Parser)]
#[command(name = "xcode-task")]
#[command(about = "Build, sign, archive and export Xcode projects", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the main phase: build, then archive and export when packaging
    Run {
        /// Path to task inputs (default: xcode-task.toml)
        #[arg(long, short = 'i')]
        inputs: Option<PathBuf>,

        /// Directory holding state handed to the post phase
        #[arg(long, env = "XCODE_TASK_STATE_DIR")]
        state_dir: Option<PathBuf>,
    },

    /// Run the post phase: delete temporary signing state and upload logs
    Post {
        /// Path to task inputs (default: xcode-task.toml)
        #[arg(long, short = 'i')]
        inputs: Option<PathBuf>,

        /// Directory holding state recorded by the main phase
        #[arg(long, env = "XCODE_TASK_STATE_DIR")]
        state_dir: Option<PathBuf>,
    },

    /// Classify a provisioning profile and print it as JSON
    Profile {
        /// Profile file
        path: PathBuf,

        /// Treat the profile as a macOS profile
        #[arg(long)]
        macos: bool,
    },

    /// Parse and validate task inputs without running anything
    Validate {
        /// Path to task inputs (default: xcode-task.toml)
        #[arg(long, short = 'i')]
        inputs: Option<PathBuf>,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { inputs, state_dir } => {
            run_main(inputs, state_dir);
        }
        Commands::Post { inputs, state_dir } => {
            run_post(inputs, state_dir);
        }
        Commands::Profile { path, macos } => {
            run_profile(&path, macos);
        }
        Commands::Validate { inputs } => {
            run_validate(inputs);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn inputs_path(inputs: Option<PathBuf>) -> PathBuf {
    inputs.unwrap_or_else(|| PathBuf::from(DEFAULT_INPUTS_FILE))
}

fn run_main(inputs: Option<PathBuf>, state_dir: Option<PathBuf>) {
    let path = inputs_path(inputs);
    let inputs = match TaskInputs::from_file(&path) {
        Ok(i) => i,
        Err(e) => fail(TaskError::from(e), &HostEnv::from_env(None), TelemetryData::unloaded()),
    };
    let host = HostEnv::from_env(inputs.temp_dir.as_deref());
    let state = match TaskState::open_or_disabled(state_dir.as_deref()) {
        Ok(s) => s,
        Err(e) => fail(
            TaskError::from(e),
            &host,
            TelemetryData::new(inputs.xcode.version.clone()),
        ),
    };

    let mut pipeline = Pipeline::new(SystemRunner::new(), inputs, host, state);
    let outcome = pipeline.run();
    println!("{}", outcome.summary_line());
    match outcome.result {
        Ok(()) => process::exit(0),
        Err(ref e) => process::exit(e.exit_code()),
    }
}

/// Report a failure that happened before the pipeline started.
fn fail(error: TaskError, host: &HostEnv, telemetry: TelemetryData) -> ! {
    emit_telemetry(host.agent_version.as_deref(), &telemetry);
    println!("Xcode task failed: {}", error);
    process::exit(error.exit_code());
}

fn run_post(inputs: Option<PathBuf>, state_dir: Option<PathBuf>) {
    let path = inputs_path(inputs);
    // Teardown only needs the temp dir; unreadable inputs fall back to defaults.
    let temp_dir = match TaskInputs::from_file(&path) {
        Ok(i) => i.temp_dir,
        Err(e) => {
            tracing::debug!("inputs {} not loaded: {}", path.display(), e);
            None
        }
    };
    let host = HostEnv::from_env(temp_dir.as_deref());

    let report = Teardown::new(SystemRunner::new(), host.profiles_dir()).run(state_dir.as_deref());
    if !report.warnings.is_empty() {
        tracing::info!("Teardown finished with {} warnings", report.warnings.len());
    }
    process::exit(0);
}

fn run_profile(path: &Path, macos: bool) {
    let platform = if macos { Platform::MacOS } else { Platform::IOS };
    let host = HostEnv::from_env(None);
    let inspector = ProfileInspector::new(SystemRunner::new(), host.temp_dir);

    match inspector.inspect(path, platform) {
        Ok(profile) => match serde_json::to_string_pretty(&profile) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing profile: {}", e);
                process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("Error reading profile {}: {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn run_validate(inputs: Option<PathBuf>) {
    let path = inputs_path(inputs);

    match TaskInputs::from_file(&path) {
        Ok(inputs) => {
            println!("Inputs valid: {}", path.display());
            println!();
            println!("  Working directory: {}", inputs.working_dir().display());
            if let Some(ref ws) = inputs.workspace {
                println!("  Workspace: {}", ws);
            }
            if let Some(scheme) = inputs.scheme() {
                println!("  Scheme: {}", scheme);
            }
            println!("  Actions: {}", inputs.actions().join(" "));
            println!("  Xcode: {}", inputs.xcode.version);
            println!("  Signing: {}", inputs.signing.option);
            if inputs.package_app {
                println!("  Export options: {}", inputs.export.options.as_str());
            }
        }
        Err(e) => {
            let error = TaskError::from(e);
            eprintln!("Inputs error: {}", error);
            process::exit(error.exit_code());
        }
    }
}
