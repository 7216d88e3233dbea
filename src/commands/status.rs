use meridian_runtime::Config;

pub async fn run() {
    println!("Meridian Runtime Status\n");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            println!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let addr = format!("127.0.0.1:{}", config.transport.server_port);
    print!("HTTP server {addr}  ");
    match reqwest::get(format!("http://{addr}/healthz")).await {
        Ok(resp) if resp.status().is_success() => println!("reachable"),
        Ok(resp) => println!("responded with {}", resp.status()),
        Err(_) => println!("not reachable (start with: meridian serve)"),
    }

    println!("\nConfiguration:");
    println!("  store path            {}", config.store.database_path);
    println!("  durable required      {}", config.store.durable_required);
    println!("  worker concurrency    {}", config.jobs.worker_concurrency);
    println!("  global parallelism    {}", config.jobs.global_parallelism);
    println!("  protocol version      {}", config.transport.protocol_version);
    println!("  tool exposure         {:?}", config.transport.tool_exposure);
}
