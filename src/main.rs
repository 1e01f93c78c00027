#![forbid(unsafe_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::{info, error};
use poem::listener::TcpListener;

// Hello Server Utilities
use crate::utils::config::{get_config, get_parms, init_log, init_runtime_context, HelloArgs};
use crate::utils::errors::Errors;
use crate::utils::telemetry::shutdown_tracer;
use crate::v1::build_app;

// Modules
mod utils;
mod v1;

// ***************************************************************************
//                                Constants
// ***************************************************************************
const SERVER_NAME : &str = "HelloServer"; // for poem logging

// In-flight requests get this long to finish after Ctrl-C.
const SHUTDOWN_TIMEOUT : Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// main:
// ---------------------------------------------------------------------------
#[tokio::main]
async fn main() -> Result<()> {
    // --------------- Initialize Server --------------
    // Announce ourselves.
    println!("Starting hello_server!");

    // Any failure during initialization terminates the process.
    let args = HelloArgs::parse();
    let (config_file, config) = get_config(&args)?;
    init_log(&args, &config)?;
    let parms = get_parms(config_file, config)?;
    info!("{}", Errors::InputParms(format!("{:#?}", parms)));
    print_version_info();

    let ctx = Arc::new(init_runtime_context(parms).await?);

    // --------------- Main Loop Set Up ---------------
    let addr = ctx.parms.config.bind_addr();
    let app = build_app(ctx.clone());
    info!("Listening on http://{}", addr);

    // ------------------ Main Loop -------------------
    let result = poem::Server::new(TcpListener::bind(addr))
        .name(SERVER_NAME)
        .run_with_graceful_shutdown(
            app,
            shutdown_signal(tokio::signal::ctrl_c()),
            Some(SHUTDOWN_TIMEOUT),
        )
        .await;

    // Flush whatever spans are still buffered.
    shutdown_tracer(&ctx.tracer_provider);

    if let Err(e) = &result {
        error!("Server terminated: {}", e);
    }
    result?;
    Ok(())
}

// ***************************************************************************
//                             Private Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// shutdown_signal:
// ---------------------------------------------------------------------------
/** Resolve when the signal fires.  If the signal handler can't be installed
 * the error is logged and the future never resolves, so the server keeps
 * running instead of shutting down immediately.
 */
async fn shutdown_signal(signal: impl Future<Output = std::io::Result<()>>) {
    match signal.await {
        Ok(_) => info!("Shutdown requested"),
        Err(e) => {
            error!("Unable to listen for the shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// print_version_info:
// ---------------------------------------------------------------------------
fn print_version_info() {
    // Log build info.
    info!("{}.", format!("\n*** Running HELLO_SERVER={}, RUSTC={}",
                        option_env!("CARGO_PKG_VERSION").unwrap_or("unknown"),
                        env!("RUSTC_VERSION")),
    );
}
