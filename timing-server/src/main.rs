//! Timing server entry point.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, Level};

use timing_server::{serve, Cli, PermissiveOriginPolicy, Registry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let format = tracing_subscriber::fmt::format()
        .with_level(true)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    let builder = tracing_subscriber::fmt().with_max_level(Level::DEBUG);

    if args.json_output {
        builder.event_format(format.json().flatten_event(true)).init();
    } else {
        builder.event_format(format).init();
    };

    info!("timing server is starting");

    let tuning = args.recommended_sync_tuning();
    info!(
        n_init = tuning.n_init,
        batch_interval_ms = tuning.batch_interval_ms,
        max_attempts = tuning.max_attempts,
        "recommended client sync tuning (not transmitted on the wire; mirror these in client configuration)"
    );

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, delta_ms = args.delta, "listening");

    let registry = Registry::new(args.delta);
    let policy = Arc::new(PermissiveOriginPolicy);

    tokio::select! {
        result = serve(listener, registry, policy) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}
