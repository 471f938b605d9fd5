use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use kconfig_matrix::Result;
use kconfig_matrix::project::Project;
use kconfig_matrix::runner::NinjaOptions;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Log output format (filter with RUST_LOG)
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate the build graph and print its actions in execution order
    Plan {
        /// Root build definition TOML
        build: PathBuf,
        /// Extra directories to scan for kernel_config.toml files
        #[arg(long)]
        scan: Vec<PathBuf>,
        /// Print GraphViz dot instead of a linear plan
        #[arg(long, conflicts_with = "json")]
        dot: bool,
        /// Print the actions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the fully-resolved TOML (after imports/extends)
    Resolve {
        /// Root build definition TOML
        build: PathBuf,
    },
    /// Write build.ninja for the build graph
    Ninja {
        /// Root build definition TOML
        build: PathBuf,
        /// Extra directories to scan for kernel_config.toml files
        #[arg(long)]
        scan: Vec<PathBuf>,
        /// Output file (defaults to [workspace].ninja_file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write build.ninja and run ninja on it
    Build {
        /// Root build definition TOML
        build: PathBuf,
        /// Extra directories to scan for kernel_config.toml files
        #[arg(long)]
        scan: Vec<PathBuf>,
        /// Ask ninja to walk the graph without running commands
        #[arg(long)]
        dry_run: bool,
        /// Parallel ninja jobs (0 = use CPU count)
        #[arg(short, long, default_value_t = 0)]
        jobs: usize,
        /// Ninja targets: module names or output paths (default: everything)
        targets: Vec<String>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_format);

    let res = match args.cmd {
        Command::Plan {
            build,
            scan,
            dot,
            json,
        } => cmd_plan(&build, &scan, dot, json),
        Command::Resolve { build } => cmd_resolve(&build),
        Command::Ninja {
            build,
            scan,
            output,
        } => cmd_ninja(&build, &scan, output.as_deref()).map(|_| ()),
        Command::Build {
            build,
            scan,
            dry_run,
            jobs,
            targets,
        } => cmd_build(
            &build,
            &scan,
            &NinjaOptions {
                dry_run,
                jobs,
                targets,
            },
        ),
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_plan(path: &Path, scan: &[PathBuf], dot: bool, json: bool) -> Result<()> {
    let project = Project::load(path, scan)?;
    let graph = project.generate()?;

    if dot {
        print!("{}", graph.to_dot());
        return Ok(());
    }

    let ordered = graph.ordered()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ordered)?);
        return Ok(());
    }

    for (i, action) in ordered.iter().enumerate() {
        let outputs = action
            .outputs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{:>2}. {:<28} {:<18} {}",
            i + 1,
            action.module,
            action.rule.name,
            outputs
        );
    }
    Ok(())
}

fn cmd_resolve(path: &Path) -> Result<()> {
    let doc = kconfig_matrix::config::load(path)?;
    let s = toml::to_string_pretty(&doc.value)
        .map_err(|e| kconfig_matrix::Error::msg(format!("failed to render TOML: {e}")))?;
    print!("{s}");
    Ok(())
}

fn cmd_ninja(path: &Path, scan: &[PathBuf], output: Option<&Path>) -> Result<(Project, PathBuf)> {
    let project = Project::load(path, scan)?;
    let text = project.render_ninja()?;
    let out = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project.workspace.ninja_file.clone());
    kconfig_matrix::ninja::write_if_changed(&out, &text)?;
    println!("{}", out.display());
    Ok((project, out))
}

fn cmd_build(path: &Path, scan: &[PathBuf], opts: &NinjaOptions) -> Result<()> {
    let (project, ninja_file) = cmd_ninja(path, scan, None)?;
    kconfig_matrix::runner::run_ninja(&project.tools, &ninja_file, opts)
}
