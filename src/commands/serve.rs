use std::sync::Arc;

use clap::ArgMatches;
use meridian_runtime::mcp::{http, ToolRegistry};
use meridian_runtime::{Config, Runtime};

pub async fn run(matches: &ArgMatches) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("configuration error: {e}");
        std::process::exit(1);
    });

    if let Some(port) = matches.get_one::<String>("port") {
        if let Ok(p) = port.parse() {
            config.transport.server_port = p;
        }
    }

    let auth_secret = config.transport.auth_secret.clone();
    let port = config.transport.server_port;

    let runtime = match Runtime::new(config).await {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    tokio::spawn(runtime.clone().run_lease_recovery_loop());
    for i in 0..runtime.config.jobs.worker_concurrency {
        tokio::spawn(runtime.clone().run_research_worker_loop(format!("worker-{i}")));
    }

    let registry = Arc::new(ToolRegistry::new(runtime));
    let addr = format!("0.0.0.0:{port}");

    tracing::info!(%addr, "Meridian HTTP/WebSocket server listening");
    if let Err(e) = http::serve(&addr, registry, auth_secret).await {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}
