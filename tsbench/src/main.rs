//! Entrypoint of the tsbench binary
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use dotenvy::dotenv;

mod commands {
    pub(crate) mod common;
    pub(crate) mod load;
}
mod logging;

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "tsbench",
    version,
    about = "Time-series benchmark loading tools",
    long_about = r#"Time-series benchmark loading tools

Examples:
    # Load a generated data file with eight parallel workers
    tsbench load --file data.txt --workers 8

    # Parse and count the input without touching the database
    tsbench load --file data.txt --do-load false

    # Run with full debug logging specified with LOG_FILTER
    LOG_FILTER=debug tsbench load --file data.txt
"#
)]
struct Config {
    #[clap(flatten)]
    logging_config: logging::LoggingConfig,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Load benchmark data into the target database
    Load(commands::load::Config),
}

#[tokio::main]
async fn main() {
    // Source .env before clap reads the environment.
    load_dotenv();

    let config: Config = clap::Parser::parse();

    if let Err(e) = logging::init(&config.logging_config) {
        eprintln!("Initializing logs failed: {e}");
        std::process::exit(ReturnCode::Failure as _);
    }

    match config.command {
        None => println!("command required, -h/--help for help"),
        Some(Command::Load(config)) => {
            if let Err(e) = commands::load::command(config).await {
                eprintln!("Load command failed: {e:#}");
                std::process::exit(ReturnCode::Failure as _)
            }
        }
    }
}

/// Load environment variables from a .env file, if present. Variables
/// already set in the environment keep their values.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // A missing .env file is not an error; defaults apply when the
            // Config struct is initialised.
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(1);
        }
    };
}
