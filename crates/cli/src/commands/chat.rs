//! `scholarly chat`: Interactive or single-message chat mode.

use std::io::Write;

use scholarly_agent::SessionCoordinator;
use scholarly_config::AppConfig;
use scholarly_core::message::ThreadId;
use tokio::io::{AsyncBufReadExt, BufReader};

/// What one line of REPL input asks for.
#[derive(Debug, PartialEq)]
pub(crate) enum ReplInput {
    Skip,
    Exit,
    NewThread,
    Message(String),
}

pub(crate) fn parse_line(line: &str) -> ReplInput {
    let line = line.trim();
    match line {
        "" => ReplInput::Skip,
        "exit" | "quit" | "/exit" | "/quit" => ReplInput::Exit,
        "/new" => ReplInput::NewThread,
        other => ReplInput::Message(other.to_string()),
    }
}

pub async fn run(
    message: Option<String>,
    thread: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    GOOGLE_API_KEY / GEMINI_API_KEY   (Gemini, the default)");
        eprintln!("    OPENROUTER_API_KEY                (OpenRouter)");
        eprintln!("    OPENAI_API_KEY                    (OpenAI direct)");
        eprintln!("    SCHOLARLY_API_KEY                 (generic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_path().display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let coordinator = SessionCoordinator::new(config);
    let status = coordinator.initialize().await;
    if !status.ok {
        return Err(status.message.into());
    }

    let mut thread_id = thread
        .as_deref()
        .map(ThreadId::from)
        .unwrap_or_else(|| coordinator.new_thread());

    if let Some(msg) = message {
        eprint!("  Thinking...");
        let response = coordinator.get_response(&msg, &[], &thread_id).await;
        eprint!("\r              \r");
        println!("{response}");
        return Ok(());
    }

    let config = coordinator.config();
    println!();
    println!("  scholarly — interactive research assistant");
    println!();
    println!("  Provider:      {}", config.default_provider);
    println!("  Model:         {}", config.default_model);
    println!("  Capabilities:  {}", coordinator.capabilities().await.len());
    println!("  Status:        {}", status.message);
    println!("  Thread:        {thread_id}");
    println!();
    println!("  Type your question and press Enter.");
    println!("  '/new' starts a fresh thread, 'exit' quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_line(&line) {
            ReplInput::Skip => continue,
            ReplInput::Exit => break,
            ReplInput::NewThread => {
                thread_id = coordinator.new_thread();
                println!("  Started thread {thread_id}");
                println!();
            }
            ReplInput::Message(text) => {
                eprint!("  ...");
                let response = coordinator.get_response(&text, &[], &thread_id).await;
                eprint!("\r     \r");
                println!();
                for line in response.lines() {
                    println!("  Assistant > {line}");
                }
                println!();
            }
        }
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repl_commands() {
        assert_eq!(parse_line("   "), ReplInput::Skip);
        assert_eq!(parse_line("exit"), ReplInput::Exit);
        assert_eq!(parse_line("quit\n"), ReplInput::Exit);
        assert_eq!(parse_line("/new"), ReplInput::NewThread);
    }

    #[test]
    fn anything_else_is_a_question() {
        assert_eq!(
            parse_line("  papers on diffusion models \n"),
            ReplInput::Message("papers on diffusion models".into())
        );
        assert_eq!(
            parse_line("/newer ideas"),
            ReplInput::Message("/newer ideas".into())
        );
    }
}
