use std::sync::Arc;

use meridian_runtime::{Config, Runtime};

pub async fn run() {
    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("configuration error: {e}");
        std::process::exit(1);
    });

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

    if let Err(e) = crate::mcp_server::start_mcp_server(runtime).await {
        eprintln!("MCP server error: {e}");
        std::process::exit(1);
    }
}
