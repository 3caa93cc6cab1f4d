mod identify;
mod render;
mod verify;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const VERIFY_EXAMPLES: &str = "\
Examples:
  mcprobe verify -- --stdio fs npx -y @modelcontextprotocol/server-filesystem /tmp
  mcprobe verify -- --http docs https://example.com/mcp --header Authorization 'Bearer TOKEN'
  mcprobe verify --config ~/.cursor/mcp.json --json";

#[derive(Parser, Debug)]
#[command(author, version, about = "Verify MCP tool servers and price their tools in tokens")]
struct Cli {
    /// Log protocol traffic to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to servers, list their tools and estimate token cost.
    #[command(after_help = VERIFY_EXAMPLES)]
    Verify {
        /// `mcpServers` JSON file to verify in addition to the listed servers
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Handshake budget per server [default: config, then 30000]
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Server flags: --stdio NAME CMD [ARGS...] | --http NAME URL [--header K V]...
        #[arg(last = true)]
        servers: Vec<String>,
    },
    /// Show which package a launcher command would run.
    Identify {
        launcher: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "mcprobe_core=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Verify {
            config,
            timeout_ms,
            json,
            servers,
        } => {
            let opts = verify::VerifyOptions {
                config,
                timeout_ms,
                json,
                servers,
            };
            let all_ok = verify::run(opts).await?;
            Ok(if all_ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Identify { launcher, args } => {
            identify::run(&launcher, &args);
            Ok(ExitCode::SUCCESS)
        }
    }
}
