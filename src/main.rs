//! Forager - 命令行对话
//!
//! 用法: forager [--stream] [--config <path>]
//! 输入 reset 清空对话，quit / exit / bye 退出。

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use forager::agent::{
    create_agent_components, process_message, process_message_stream, AgentComponents,
};
use forager::config::load_config;
use forager::react::UserInput;
use forager::stream::{StreamConfig, StreamEventKind};
use tokio::io::{AsyncBufReadExt, BufReader};

/// 命令行会话固定使用同一个 session_id
const CLI_SESSION: &str = "cli";

struct CliArgs {
    stream: bool,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut args = CliArgs {
        stream: false,
        config: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--stream" => args.stream = true,
            "--config" => {
                let path = it.next().context("--config requires a path")?;
                args.config = Some(PathBuf::from(path));
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

fn print_banner(components: &AgentComponents) {
    println!("🤖 {} initialized!", components.config.app.name);
    println!("Available capabilities:");
    println!("- Answer questions and have conversations");
    for cap in components.capabilities() {
        match cap.examples.first() {
            Some(example) => println!("- {} (try: '{}')", cap.description, example),
            None => println!("- {}", cap.description),
        }
    }
    println!("\nCommands:");
    println!("- Type 'reset' to clear conversation history");
    println!("- Type 'quit' to exit\n");
}

async fn answer_once(components: &Arc<AgentComponents>, text: &str) -> anyhow::Result<()> {
    print!("🤖: ");
    std::io::stdout().flush().ok();
    match process_message(components, Some(CLI_SESSION), UserInput::new(text)).await {
        Ok((answer, _)) => println!("{answer}\n"),
        Err(e) => println!("Error: {e}\n"),
    }
    Ok(())
}

async fn answer_streaming(components: &Arc<AgentComponents>, text: &str) -> anyhow::Result<()> {
    let (_, mut rx) = process_message_stream(
        components,
        Some(CLI_SESSION),
        UserInput::new(text),
        StreamConfig::unpaced(),
    )
    .await;
    let mut stdout = std::io::stdout();
    while let Some(ev) = rx.recv().await {
        match ev.event {
            StreamEventKind::Connected => {
                write!(stdout, "🤖: ")?;
            }
            StreamEventKind::ToolStart | StreamEventKind::ToolEnd => {
                write!(stdout, "[{}] ", ev.data)?;
            }
            StreamEventKind::Token => {
                write!(stdout, "{}", ev.data)?;
            }
            StreamEventKind::Done => {
                writeln!(stdout, "\n")?;
            }
            StreamEventKind::Error => {
                writeln!(stdout, "\nError: {}\n", ev.data)?;
            }
        }
        stdout.flush()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forager::observability::init();

    let args = parse_args()?;
    let cfg = load_config(args.config).context("Failed to load config")?;
    let components =
        Arc::new(create_agent_components(&cfg).context("Failed to initialize agent")?);
    print_banner(&components);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                println!("\n\nGoodbye! 👋");
                break;
            }
        };
        // EOF
        let Some(line) = line else {
            println!("\nGoodbye! 👋");
            break;
        };

        let input = line.trim();
        match input.to_lowercase().as_str() {
            "" => continue,
            "quit" | "exit" | "bye" => {
                println!("Goodbye! 👋");
                break;
            }
            "reset" => {
                components.reset_session(CLI_SESSION).await;
                println!("🔄 Conversation history cleared!");
                continue;
            }
            _ => {}
        }

        if args.stream {
            answer_streaming(&components, input).await?;
        } else {
            answer_once(&components, input).await?;
        }
    }

    components.shutdown.cancel();
    Ok(())
}
