use meridian_runtime::Config;

pub async fn run() {
    println!("Checking Meridian configuration...\n");

    let mut all_ok = true;

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            println!("✗ configuration error: {e}");
            std::process::exit(1);
        }
    };

    print!("• Store path... ");
    if config.store.database_path == ":memory:" {
        println!("○ in-memory (non-durable)");
    } else {
        let path = std::path::Path::new(&config.store.database_path);
        match path.parent() {
            Some(dir) if dir.as_os_str().is_empty() || dir.exists() => {
                println!("✓ {}", config.store.database_path)
            }
            _ => {
                println!("✗ parent directory does not exist: {}", config.store.database_path);
                all_ok = false;
            }
        }
    }

    print!("• Model provider keys... ");
    if std::env::var("ANTHROPIC_API_KEY").is_ok()
        || std::env::var("OPENAI_API_KEY").is_ok()
        || std::env::var("OPENROUTER_API_KEY").is_ok()
    {
        println!("✓ at least one provider key is set");
    } else {
        println!("○ none set (cloud model calls will fail with missing_api_key)");
    }

    print!("• Embedder endpoint... ");
    match &config.embedder.endpoint {
        Some(endpoint) => println!("✓ {endpoint}"),
        None => println!("○ unset, falling back to the built-in mock embedder"),
    }

    print!("• HTTP port {} available... ", config.transport.server_port);
    if std::net::TcpListener::bind(("127.0.0.1", config.transport.server_port)).is_ok() {
        println!("✓ free");
    } else {
        println!("✗ already in use");
        all_ok = false;
    }

    println!();
    if all_ok {
        println!("All checks passed. Start with: meridian serve, or meridian mcp for stdio transport.");
    } else {
        println!("Some checks failed. Fix the issues above before starting the server.");
        std::process::exit(1);
    }
}
