//! Command-line argument parsing for the posts maintenance tool.

use crate::error::{PostsError, Result};
use std::env;
use std::path::PathBuf;
use std::process;

/// Maintenance commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Migrate {
        dry_run: bool,
    },
    ExportGenesis {
        file: PathBuf,
    },
    ImportGenesis {
        file: PathBuf,
    },
    ValidateGenesis {
        file: PathBuf,
    },
    EndExpiredPolls {
        block_time: u64,
    },
}

/// A parsed command line: global options and the command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub command: Command,
}

/// Parse the process arguments, exiting with usage on error
pub fn parse_args() -> Invocation {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() {
        print_usage();
        process::exit(1);
    }

    match parse_args_from(&args) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            process::exit(1);
        }
    }
}

fn usage_error(message: impl Into<String>) -> PostsError {
    PostsError::config(message)
}

/// Parse arguments, without the program name
pub fn parse_args_from(args: &[String]) -> Result<Invocation> {
    let mut config = None;
    let mut data_dir = None;
    let mut positional: Vec<&str> = Vec::new();
    let mut dry_run = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| usage_error("--config requires a file path"))?;
                config = Some(PathBuf::from(value));
            }
            "--data-dir" => {
                let value = iter
                    .next()
                    .ok_or_else(|| usage_error("--data-dir requires a directory"))?;
                data_dir = Some(PathBuf::from(value));
            }
            "--dry-run" => dry_run = true,
            other if other.starts_with("--") => {
                return Err(usage_error(format!("unknown option '{}'", other)));
            }
            other => positional.push(other),
        }
    }

    let (name, rest) = positional
        .split_first()
        .ok_or_else(|| usage_error("missing command"))?;

    let file_arg = |command: &str| -> Result<PathBuf> {
        match rest {
            [file] => Ok(PathBuf::from(file)),
            _ => Err(usage_error(format!("{} requires exactly one file path", command))),
        }
    };

    let command = match *name {
        "status" => Command::Status,
        "migrate" => Command::Migrate { dry_run },
        "export-genesis" => Command::ExportGenesis {
            file: file_arg("export-genesis")?,
        },
        "import-genesis" => Command::ImportGenesis {
            file: file_arg("import-genesis")?,
        },
        "validate-genesis" => Command::ValidateGenesis {
            file: file_arg("validate-genesis")?,
        },
        "end-expired-polls" => {
            let raw = match rest {
                [raw] => raw,
                _ => return Err(usage_error("end-expired-polls requires a block time")),
            };
            let block_time = raw
                .parse::<u64>()
                .map_err(|_| usage_error(format!("invalid block time '{}'", raw)))?;
            Command::EndExpiredPolls { block_time }
        }
        other => return Err(usage_error(format!("unknown command '{}'", other))),
    };

    if dry_run && !matches!(command, Command::Migrate { .. }) {
        return Err(usage_error("--dry-run only applies to migrate"));
    }

    Ok(Invocation {
        config,
        data_dir,
        command,
    })
}

/// Print usage information
pub fn print_usage() {
    println!("subspace-posts - posts store maintenance");
    println!("========================================");
    println!();
    println!("Usage: subspace-posts [--config <file>] [--data-dir <dir>] <command> [args...]");
    println!();
    println!("Commands:");
    println!("  status                      Show the schema version and store contents");
    println!("  migrate [--dry-run]         Upgrade the store to the current schema version");
    println!("  export-genesis <file>       Write the whole store to a JSON genesis file");
    println!("  import-genesis <file>       Load a valid genesis file into an empty store");
    println!("  validate-genesis <file>     Validate a genesis file without touching the store");
    println!("  end-expired-polls <time>    Tally every poll ended at or before a unix time");
    println!();
    println!("Examples:");
    println!("  subspace-posts --data-dir /var/lib/posts migrate");
    println!("  subspace-posts export-genesis genesis.json");
    println!("  RUST_LOG=subspace_posts=debug subspace-posts status");
}
