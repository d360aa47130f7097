//! bgstrip command-line tool

#[cfg(feature = "cli")]
use bgstrip::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<std::process::ExitCode> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("bgstrip was built without the `cli` feature");
    std::process::exit(2);
}
