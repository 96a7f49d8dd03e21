//! scad-tool - OpenSCAD render orchestration CLI
//!
//! ## Commands
//!
//! - `validate`: Compile a model and report parse errors with line/column
//! - `screenshots`: Render previews from presets, named views, angles or a turntable
//! - `stl`: Export a solid
//! - `libs`: List, fetch or update OpenSCAD libraries under the tool home

mod report;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use report::ReportFormat;
use scadkit_core::config::expand_home;
use scadkit_core::library::{self, SyncAction};
use scadkit_core::{
    compiler, BatchOrchestrator, BatchStatus, CancelHandle, Capabilities, ErrorMarker,
    InvocationBuilder, OperationRequest, OutputTarget, ProcessRunner, Projection, RenderSettings,
    ScadError, ToolConfig, ViewSelector,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info, warn, Level};

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "scad-tool")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Validate, preview and export OpenSCAD models", long_about = None)]
struct Cli {
    /// Path to the OpenSCAD binary
    #[arg(long, global = true, env = "OPENSCAD_BIN")]
    openscad: Option<PathBuf>,

    /// Tool home for libraries, renders and exports (default: ~/.scad)
    #[arg(long, global = true, env = "SCAD_HOME")]
    scad_home: Option<String>,

    /// Per-invocation timeout in seconds
    #[arg(long, global = true, env = "SCAD_TIMEOUT_SECS", value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Maximum concurrent compiler processes (default: CPU cores)
    #[arg(long, global = true, env = "SCAD_JOBS", value_parser = clap::value_parser!(u64).range(1..))]
    jobs: Option<u64>,

    /// Regex recognising parse errors; needs a named group `line`
    #[arg(long, global = true, env = "SCAD_ERROR_PATTERN")]
    error_pattern: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Summary format written to stdout
    #[arg(long, global = true, value_enum, default_value = "text")]
    report: ReportFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a model without keeping output; report syntax errors
    Validate {
        /// Input .scad file
        #[arg(long = "in")]
        input: PathBuf,

        /// Variable override NAME=VALUE (repeatable)
        #[arg(short = 'D', long = "define")]
        defines: Vec<String>,

        /// Keep the scratch STL
        #[arg(long)]
        keep: bool,
    },

    /// Render preview images, one per resolved view
    #[command(group(ArgGroup::new("selector").args(["preset", "views", "angles", "turntable"])))]
    Screenshots {
        /// Input .scad file
        #[arg(long = "in")]
        input: PathBuf,

        /// View preset: single, iso, ortho, standard
        #[arg(long)]
        preset: Option<String>,

        /// Named views, comma-separated (e.g. iso,front,top)
        #[arg(long)]
        views: Option<String>,

        /// Explicit az:el pairs, comma-separated (e.g. 45:30,90:45)
        #[arg(long)]
        angles: Option<String>,

        /// Turntable step in degrees
        #[arg(long)]
        turntable: Option<f64>,

        /// Turntable elevation in degrees
        #[arg(long, default_value = "25", requires = "turntable", allow_hyphen_values = true)]
        elevation: f64,

        /// Turntable start azimuth in degrees
        #[arg(long, default_value = "0", requires = "turntable", allow_hyphen_values = true)]
        az_start: f64,

        /// Camera distance
        #[arg(long, default_value = "200")]
        distance: f64,

        /// Image width
        #[arg(long, default_value = "1024")]
        width: u32,

        /// Image height
        #[arg(long, default_value = "1024")]
        height: u32,

        /// Projection: o (orthographic) or p (perspective)
        #[arg(long, value_enum, default_value = "p")]
        projection: ProjectionArg,

        /// Color scheme
        #[arg(long, default_value = "Cornfield")]
        colorscheme: String,

        /// View options: axes,crosshairs,edges,scales
        #[arg(long)]
        view_opts: Option<String>,

        /// Variable override NAME=VALUE (repeatable)
        #[arg(short = 'D', long = "define")]
        defines: Vec<String>,

        /// Output directory (default: <scad-home>/renders/<stem>)
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Export a solid
    Stl {
        /// Input .scad file
        #[arg(long = "in")]
        input: PathBuf,

        /// Variable override NAME=VALUE (repeatable)
        #[arg(short = 'D', long = "define")]
        defines: Vec<String>,

        /// Output .stl path (default: <scad-home>/outputs/<stem>.stl)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Manage OpenSCAD libraries under the tool home
    Libs {
        #[command(subcommand)]
        action: LibsAction,
    },
}

#[derive(Subcommand)]
enum LibsAction {
    /// List known libraries and whether they are installed
    List,
    /// Clone libraries (all known when none named), updating existing clones
    Fetch {
        names: Vec<String>,
    },
    /// Fast-forward installed libraries (all installed when none named)
    Update {
        names: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProjectionArg {
    #[value(name = "o", alias = "ortho")]
    Orthographic,
    #[value(name = "p", alias = "perspective")]
    Perspective,
}

impl From<ProjectionArg> for Projection {
    fn from(arg: ProjectionArg) -> Self {
        match arg {
            ProjectionArg::Orthographic => Projection::Orthographic,
            ProjectionArg::Perspective => Projection::Perspective,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    scadkit_core::init_tracing(cli.json_logs, level);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = resolve_config(&cli);
    debug!(?config, "resolved configuration");
    let report = cli.report;

    match cli.command {
        Commands::Validate {
            input,
            defines,
            keep,
        } => {
            let request = OperationRequest::validate(input)
                .with_defines(&defines)?
                .keep_scratch(keep);
            run_batch(&config, request, report).await
        }
        Commands::Screenshots {
            input,
            preset,
            views,
            angles,
            turntable,
            elevation,
            az_start,
            distance,
            width,
            height,
            projection,
            colorscheme,
            view_opts,
            defines,
            out_dir,
        } => {
            let selector = selector_from_args(preset, views, angles, turntable, elevation, az_start);
            let render = RenderSettings {
                width,
                height,
                distance,
                colorscheme,
                projection: projection.into(),
                view_options: view_opts,
                ..RenderSettings::default()
            };
            let output = out_dir.map(OutputTarget::Directory).unwrap_or_default();
            let request = OperationRequest::screenshot(input, &selector)?
                .with_defines(&defines)?
                .with_render(render)
                .with_output(output);
            run_batch(&config, request, report).await
        }
        Commands::Stl { input, defines, out } => {
            let output = out.map(OutputTarget::File).unwrap_or_default();
            let request = OperationRequest::export(input)
                .with_defines(&defines)?
                .with_output(output);
            run_batch(&config, request, report).await
        }
        Commands::Libs { action } => match action {
            LibsAction::List => cmd_libs_list(&config),
            LibsAction::Fetch { names } => cmd_libs_sync(&config, &names, false),
            LibsAction::Update { names } => cmd_libs_sync(&config, &names, true),
        },
    }
}

/// Environment first, then explicit flags on top.
fn resolve_config(cli: &Cli) -> ToolConfig {
    let mut config = ToolConfig::from_env();
    if let Some(path) = &cli.openscad {
        config.compiler = Some(path.clone());
    }
    if let Some(home) = &cli.scad_home {
        config.scad_home = expand_home(home);
    }
    if let Some(secs) = cli.timeout {
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(jobs) = cli.jobs {
        config.max_concurrent = jobs as usize;
    }
    if let Some(pattern) = &cli.error_pattern {
        config.error_pattern = Some(pattern.clone());
    }
    config
}

fn selector_from_args(
    preset: Option<String>,
    views: Option<String>,
    angles: Option<String>,
    turntable: Option<f64>,
    elevation: f64,
    az_start: f64,
) -> ViewSelector {
    if let Some(step) = turntable {
        ViewSelector::Turntable {
            step,
            elevation,
            start_azimuth: az_start,
        }
    } else if let Some(list) = angles {
        ViewSelector::Angles(list)
    } else if let Some(list) = views {
        ViewSelector::views_from_list(&list)
    } else if let Some(name) = preset {
        ViewSelector::Preset(name)
    } else {
        ViewSelector::default()
    }
}

/// Locate and probe the compiler, then wire up the orchestrator.
async fn build_orchestrator(config: &ToolConfig) -> Result<BatchOrchestrator<ProcessRunner>> {
    let marker = ErrorMarker::from_override(config.error_pattern.as_deref())?;
    let binary = compiler::locate(config.compiler.as_deref())?;
    let capabilities = Capabilities::probe(&binary, config.timeout).await;
    info!(compiler = %binary.display(), "using OpenSCAD");

    let runner = ProcessRunner::new(config.timeout, marker);
    let builder = InvocationBuilder::new(binary, capabilities, &config.scad_home);
    Ok(BatchOrchestrator::new(runner, builder, config.max_concurrent))
}

/// Run one request to completion, print its summary and map it to an exit
/// code. Ctrl-C cancels the batch.
async fn run_batch(
    config: &ToolConfig,
    request: OperationRequest,
    report: ReportFormat,
) -> Result<ExitCode> {
    let orchestrator = build_orchestrator(config).await?;

    let cancel = CancelHandle::new();
    let token = cancel.token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling remaining invocations");
            cancel.cancel();
        }
    });

    let outcome = orchestrator.run(&request, &token).await;
    interrupt.abort();
    let result = outcome?;

    let summary = report::render(&result, report, config.timeout)
        .context("failed to render report")?;
    print!("{summary}");
    if report == ReportFormat::Json {
        println!();
    }

    Ok(ExitCode::from(batch_exit_code(result.status)))
}

fn batch_exit_code(status: BatchStatus) -> u8 {
    match status {
        BatchStatus::Ok => 0,
        BatchStatus::Cancelled => EXIT_CANCELLED,
        BatchStatus::SyntaxError | BatchStatus::Timeout | BatchStatus::ProcessError => EXIT_FAILURE,
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ScadError>() {
        Some(e) if e.is_usage() => EXIT_USAGE,
        _ => EXIT_FAILURE,
    }
}

fn cmd_libs_list(config: &ToolConfig) -> Result<ExitCode> {
    println!("Libraries in {}:", config.scad_home.display());
    for lib in library::KNOWN_LIBRARIES {
        let dir = library::library_dir(&config.scad_home, lib);
        let state = if !dir.exists() {
            "not installed"
        } else if library::is_managed_clone(&dir) {
            "installed"
        } else {
            "present (not a managed clone)"
        };
        println!("  {:<12} {:<30} {}", lib.name, state, lib.url);
    }
    Ok(ExitCode::SUCCESS)
}

/// Fetch or update each named library, continuing past failures.
fn cmd_libs_sync(config: &ToolConfig, names: &[String], update_only: bool) -> Result<ExitCode> {
    let home = &config.scad_home;
    let targets = if names.is_empty() {
        library::KNOWN_LIBRARIES
            .iter()
            .filter(|lib| !update_only || library::library_dir(home, lib).exists())
            .collect::<Vec<_>>()
    } else {
        names
            .iter()
            .map(|n| library::find_library(n))
            .collect::<scadkit_core::Result<Vec<_>>>()?
    };

    if targets.is_empty() {
        println!("No libraries installed in {}", home.display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut failed = 0;
    for lib in targets {
        let outcome = if update_only {
            library::update(home, lib)
        } else {
            library::fetch(home, lib)
        };
        match outcome {
            Ok(SyncAction::Cloned) => println!("  ✓ {} cloned", lib.name),
            Ok(SyncAction::Updated) => println!("  ✓ {} updated", lib.name),
            Err(e) => {
                failed += 1;
                println!("  ✗ {}: {e}", lib.name);
            }
        }
    }

    if failed == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_FAILURE))
    }
}
