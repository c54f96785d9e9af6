use clap::{Parser, Subcommand};
use realm_core::file::Allocator;

/// Inspect and drive a realm-core-rs store file from the command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Params {
    /// Path to the store file.
    path: std::path::PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new, empty store file.
    Create,
    /// Print the store's current committed version and top-ref.
    Info,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Params::parse();

    match args.command {
        Command::Create => {
            let allocator = Allocator::create(&args.path)?;
            log::info!("created {} at version {}", args.path.display(), allocator.committed_version());
        }
        Command::Info => {
            let allocator = Allocator::open(&args.path)?;
            println!("version: {}", allocator.committed_version());
            let top = allocator.active_top_ref();
            println!("top_ref: {}", if top.is_null() { "null".to_string() } else { top.0.to_string() });
        }
    }

    Ok(())
}
