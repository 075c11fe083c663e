//! Posts store maintenance tool
//!
//! Offline schema migration, genesis export/import and poll housekeeping
//! for a subspace posts database.

use subspace_posts::{cli, PostsConfig};
use tracing_subscriber::EnvFilter;

fn main() {
    let invocation = cli::args::parse_args();

    let config = match PostsConfig::load(invocation.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = cli::run(invocation, config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
