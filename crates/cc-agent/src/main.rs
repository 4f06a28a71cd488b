//! cc-agent: Agent Main Binary
//!
//! Usage:
//!   cc-agent                   - Start interactive CLI mode
//!   cc-agent --prompt <text>   - Run one prompt headless (sub-agent mode)
//!   cc-agent --file <path>     - Run a prompt read from a file
//!   cc-agent --help            - Show help

mod cli;
mod console;

use std::path::PathBuf;

use cc_core::Config;
use tracing_subscriber::EnvFilter;

/// Run mode
#[derive(Debug, PartialEq, Eq)]
enum RunMode {
    Interactive,
    Prompt(String),
    File(PathBuf),
    Help,
    Version,
}

/// Parse command line arguments (without the program name)
fn parse_args<I>(args: I) -> anyhow::Result<RunMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(RunMode::Help),
            "--version" | "-v" => return Ok(RunMode::Version),
            "--prompt" | "-p" => {
                let prompt = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--prompt requires a value"))?;
                return Ok(RunMode::Prompt(prompt));
            }
            "--file" | "-f" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--file requires a path"))?;
                return Ok(RunMode::File(PathBuf::from(path)));
            }
            other => {
                if let Some(prompt) = other.strip_prefix("--prompt=") {
                    return Ok(RunMode::Prompt(prompt.to_string()));
                }
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
    }
    Ok(RunMode::Interactive)
}

fn print_help() {
    println!("cc-agent - agent with sub-agent delegation");
    println!();
    println!("Usage:");
    println!("  cc-agent                  Start interactive CLI mode");
    println!("  cc-agent --prompt <text>  Run one prompt and print the answer");
    println!("  cc-agent --file <path>    Run a prompt read from a file");
    println!("  cc-agent --help           Show this help message");
    println!("  cc-agent --version        Show version");
    println!();
    println!("Configuration is read from ./cc-agent.toml when present.");
    println!();
    println!("Environment Variables:");
    println!("  LLM_API_KEY                API key (required)");
    println!("  LLM_MODEL                  Model name");
    println!("  LLM_BASE_URL               Custom API endpoint");
    println!("  CC_MAX_CONCURRENT_AGENTS   Parallel sub-agents, 1-5 (default: 3)");
    println!("  CC_SUBAGENT_TIMEOUT_SECS   Sub-agent timeout, 5-300 (default: 120)");
    println!("  CC_SUBAGENT_MAX_ATTEMPTS   Attempts per failed sub-agent (default: 1)");
    println!("  CC_AGENT_COMMAND           Command used to launch sub-agents");
    println!("  CC_APPROVAL_MODE           prompt, auto or deny (default: prompt)");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mode = parse_args(std::env::args().skip(1))?;

    match mode {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("cc-agent {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    // Logs go to stderr; stdout carries the answer in headless mode
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::load().map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    match mode {
        RunMode::Interactive => cli::run_interactive(config).await,
        RunMode::Prompt(prompt) => {
            let code = cli::run_prompt(config, &prompt).await?;
            std::process::exit(code);
        }
        RunMode::File(path) => {
            let prompt = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
            let code = cli::run_prompt(config, &prompt).await?;
            std::process::exit(code);
        }
        RunMode::Help | RunMode::Version => Ok(()),
    }
}
