// src/main.rs

use taskdag::cli;
use taskdag::logging::init_logging;

#[tokio::main]
async fn main() {
    let args = cli::parse();
    if let Err(err) = init_logging(args.log_level) {
        eprintln!("failed to initialise logging: {err}");
        std::process::exit(1);
    }

    match taskdag::run(args).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!(error = %err, "taskdag failed");
            std::process::exit(1);
        }
    }
}
