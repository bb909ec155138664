//! scholarly CLI: the main entry point.
//!
//! Commands:
//! - `chat`: Interactive chat or single-message mode
//! - `serve`: Start the HTTP gateway
//! - `capabilities`: List loaded capabilities and provider status
//! - `init`: Write a starter config file

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "scholarly",
    about = "scholarly — research paper assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the research assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Continue an existing thread
        #[arg(short, long)]
        thread: Option<String>,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List capabilities loaded from the configured providers
    Capabilities,

    /// Write a starter configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Chat { message, thread } => commands::chat::run(message, thread).await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Capabilities => commands::capabilities::run().await?,
        Commands::Init => commands::init::run()?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn chat_flags_parse() {
        let cli = Cli::parse_from(["scholarly", "chat", "-m", "hello", "--thread", "t1"]);
        match cli.command {
            Commands::Chat { message, thread } => {
                assert_eq!(message.as_deref(), Some("hello"));
                assert_eq!(thread.as_deref(), Some("t1"));
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::parse_from(["scholarly", "serve", "--port", "9000", "-v"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Serve { port: Some(9000) }));
    }
}
