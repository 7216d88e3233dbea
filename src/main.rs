#![allow(clippy::multiple_crate_versions)]

use clap::{Arg, Command};

mod commands;
mod mcp_server;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let matches = Command::new("meridian")
        .version(VERSION)
        .about("Meridian - multi-agent research orchestrator over MCP")
        .subcommand(Command::new("mcp").about("Start the MCP server over stdio transport"))
        .subcommand(
            Command::new("serve").about("Start the MCP server over HTTP and WebSocket").arg(
                Arg::new("port")
                    .short('p')
                    .long("port")
                    .value_name("PORT")
                    .help("Port to bind the server to (overrides SERVER_PORT)"),
            ),
        )
        .subcommand(Command::new("status").about("Show whether the server is reachable and its configuration"))
        .subcommand(Command::new("doctor").about("Check configuration and environment health"))
        .get_matches();

    match matches.subcommand() {
        Some(("mcp", _)) => commands::mcp::run().await,
        Some(("serve", sub_matches)) => commands::serve::run(sub_matches).await,
        Some(("status", _)) => commands::status::run().await,
        Some(("doctor", _)) => commands::doctor::run().await,
        _ => {
            println!("Meridian v{VERSION}");
            println!("Use --help for available commands");
        }
    }
}
