//! repl-tunnel binary entry point.

use std::process::ExitCode;

use repl_tunnel::api::{serve_with_state, AppState};
use repl_tunnel::cli::{parse_args, print_help, print_version};
use repl_tunnel::config::Config;
use repl_tunnel::{logging, Engine};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'repl-tunnel --help' for more information.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init_with_filter(&config.log_filter());

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> repl_tunnel::Result<()> {
    let server_config = config.to_server_config()?;
    let engine_config = config.engine_config()?;

    info!("repl-tunnel v{}", env!("CARGO_PKG_VERSION"));
    info!(
        max_call_depth = engine_config.max_call_depth,
        stack_kib = engine_config.stack_size / 1024,
        "Script engine configured"
    );

    let state = AppState::with_engine(Engine::new(engine_config));
    serve_with_state(server_config, state).await
}
