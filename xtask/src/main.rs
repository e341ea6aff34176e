use anyhow::{
    Context,
    Result,
    ensure,
};
use clap::{
    Parser,
    Subcommand,
};
use std::{
    path::Path,
    process::Command,
};

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Dice workspace helper tasks (clippy, tests)",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run clippy for the entire workspace with warnings-as-errors
    Clippy,
    /// Run the workspace tests
    Test {
        /// Only run the scenario tests in integration-tests
        #[arg(long)]
        scenarios_only: bool,
        /// Also print test output
        #[arg(long)]
        nocapture: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = repo_root()?;

    match cli.command {
        Commands::Clippy => run_clippy(&root)?,
        Commands::Test {
            scenarios_only,
            nocapture,
        } => run_tests(&root, scenarios_only, nocapture)?,
    }

    Ok(())
}

fn repo_root() -> Result<std::path::PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .context("xtask has no parent directory")
}

fn run_clippy(root: &Path) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("clippy")
        .arg("--workspace")
        .arg("--all-targets")
        .arg("--all-features")
        .arg("--")
        .arg("-D")
        .arg("warnings")
        .current_dir(root);
    run_command(cmd, "cargo clippy")?;
    Ok(())
}

fn run_tests(root: &Path, scenarios_only: bool, nocapture: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("test").current_dir(root);
    let label = if scenarios_only {
        cmd.arg("-p").arg("integration-tests");
        "cargo test -p integration-tests"
    } else {
        cmd.arg("--workspace");
        "cargo test --workspace"
    };
    if nocapture {
        cmd.arg("--").arg("--nocapture");
    }
    run_command(cmd, label)?;
    Ok(())
}

fn run_command(mut cmd: Command, label: &str) -> Result<()> {
    println!("Running: {}", label);
    let status = cmd
        .status()
        .with_context(|| format!("failed to run {label}"))?;
    ensure!(status.success(), "{label} failed with status {status}");
    Ok(())
}
