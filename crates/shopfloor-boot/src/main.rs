//! Command-line bootstrap for split-packaged shopfloor services.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use shopfloor_boot::{process_exit_code, Bootstrap, StartupError};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Start a split-packaged service: assemble the plugin loader chain from a
/// classpath descriptor and delegate to the service entry unit.
#[derive(Parser, Debug)]
#[command(name = "shopfloor-boot")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Classpath descriptor listing plugin archives in load order.
    descriptor: PathBuf,

    /// Entry unit to load through the assembled loader chain.
    entry: String,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,

    /// Arguments passed through unmodified to the delegated entry point.
    #[arg(last = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match run(args) {
        Ok(code) => ExitCode::from(process_exit_code(code)),
        Err(e) => {
            error!(error = %e, "startup failed");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(args: Args) -> Result<i32, StartupError> {
    let mut boot = Bootstrap::from_descriptor(&args.descriptor, args.entry, args.args)?;
    let scratch = std::env::temp_dir().join(format!("shopfloor-boot-{}", std::process::id()));
    let code = boot.execute(&scratch);
    let _ = std::fs::remove_dir_all(&scratch);
    code
}
