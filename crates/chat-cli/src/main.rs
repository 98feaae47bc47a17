mod logging;
mod openai;

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chat_core::{Config, MessageId, MessageRecord, MessageStatus};
use chat_request::{
    set_request_defaults, RequestController, RequestDefaults, RequestOptions, ReqwestTransport,
};
use chat_state::{ChatContext, ChatOrchestrator, ChatProvider, Fallback, FallbackContext, Placeholder};
use clap::{Parser, Subcommand};
use colored::Colorize;
use log::debug;
use tokio::sync::mpsc;

use openai::{CompletionCodec, DeltaTransform};

type Chat = ChatOrchestrator<String, String>;

#[derive(Parser)]
#[command(name = "chat-cli")]
#[command(about = "Stream chat completions from an OpenAI-compatible endpoint")]
#[command(version)]
struct Cli {
    /// Base URL of the API; overrides the configuration
    #[arg(long)]
    api_base: Option<String>,

    /// Model name sent with every request
    #[arg(long)]
    model: Option<String>,

    /// Conversation key shared by every request of this process
    #[arg(long)]
    conversation: Option<String>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long)]
    stream_timeout_ms: Option<u64>,

    /// Enable debug mode
    #[arg(long, short, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive chat
    Chat,
    /// Send a single message
    Send {
        /// Message content
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.debug);

    let mut config = Config::new();
    if let Some(api_base) = &cli.api_base {
        config.api_base = Some(api_base.clone());
    }
    if cli.timeout_ms.is_some() {
        config.timeout_ms = cli.timeout_ms;
    }
    if cli.stream_timeout_ms.is_some() {
        config.stream_timeout_ms = cli.stream_timeout_ms;
    }
    debug!("Effective configuration: {:?}", config);

    let chat = build_chat(&cli, &config)?;

    match cli.command {
        Commands::Send { message } => {
            stream_reply(&chat, Turn::Request(message)).await?;
            Ok(())
        }
        Commands::Chat => run_interactive_chat(&chat).await,
    }
}

fn build_chat(cli: &Cli, config: &Config) -> anyhow::Result<Chat> {
    let Some(api_base) = config.api_base.as_deref() else {
        bail!("No API base configured; pass --api-base or set API_BASE");
    };
    let url = format!("{}/chat/completions", api_base.trim_end_matches('/'));

    let transport = ReqwestTransport::from_config(config).context("Failed to build HTTP client")?;
    set_request_defaults(RequestDefaults {
        transport: Some(Arc::new(transport)),
        ..RequestDefaults::from_config(config)
    });

    let mut options = RequestOptions::new(url).manual(true);
    if let Some(interval) = config.retry_interval_ms {
        options = options.retry(Duration::from_millis(interval), config.retry_times);
    }
    let provider = ChatProvider::new(
        RequestController::new(options),
        CompletionCodec {
            model: cli.model.clone(),
        },
        DeltaTransform,
    )?;

    let mut builder = ChatOrchestrator::builder(ChatContext::global())
        .provider(provider)
        .placeholder(Placeholder::Value(String::new()))
        .fallback(Fallback::generate(|context: FallbackContext<String, String>| {
            let partial = context.failed.map(|m| m.payload.as_str()).unwrap_or_default();
            if context.error.is_cancelled() {
                partial.to_string()
            } else {
                format!("{partial}\n[{}] {}", context.error.name(), context.error)
            }
        }));
    if let Some(conversation) = &cli.conversation {
        builder = builder.conversation(conversation.as_str());
    }
    Ok(builder.build()?)
}

enum Turn {
    Request(String),
    Reload(MessageId, String),
}

/// Prints the reply as it grows.
#[derive(Default)]
struct ReplyPrinter {
    id: Option<MessageId>,
    printed: usize,
}

impl ReplyPrinter {
    fn render(&mut self, messages: &[MessageRecord<String>]) -> io::Result<()> {
        let Some(reply) = messages.last() else {
            return Ok(());
        };
        if matches!(reply.status, MessageStatus::Local | MessageStatus::Loading) {
            return Ok(());
        }
        if self.id.as_ref() != Some(&reply.id) {
            self.id = Some(reply.id.clone());
            self.printed = 0;
        }
        if let Some(fresh) = reply.payload.get(self.printed..) {
            let fresh = match reply.status {
                MessageStatus::Error => fresh.red(),
                _ => fresh.green(),
            };
            print!("{fresh}");
            io::stdout().flush()?;
        }
        self.printed = reply.payload.len();
        Ok(())
    }
}

async fn stream_reply(chat: &Chat, turn: Turn) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = chat.subscribe(move || {
        let _ = tx.send(());
    });

    let handle = match turn {
        Turn::Request(message) => chat.request(message)?,
        Turn::Reload(id, message) => chat.reload(&id, message)?,
    };
    let mut printer = ReplyPrinter::default();
    let run = handle.wait();
    tokio::pin!(run);

    loop {
        tokio::select! {
            _ = &mut run => break,
            Some(()) = rx.recv() => printer.render(&chat.messages())?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("{}", "⏹ Aborting".yellow());
                chat.abort()?;
            }
        }
    }

    chat.store().flush_now();
    printer.render(&chat.messages())?;
    println!();
    if let Some(reply) = chat.messages().last() {
        match reply.status {
            MessageStatus::Abort => println!("{}", "(aborted)".yellow()),
            MessageStatus::Error => println!("{}", "❌ Request failed".red()),
            _ => {}
        }
    }
    Ok(())
}

/// The last reply and the user message it answers.
fn last_exchange(messages: &[MessageRecord<String>]) -> Option<(MessageId, String)> {
    let reply = messages.iter().rposition(|m| m.status != MessageStatus::Local)?;
    let question = messages[..reply]
        .iter()
        .rev()
        .find(|m| m.status == MessageStatus::Local)?;
    Some((messages[reply].id.clone(), question.payload.clone()))
}

async fn run_interactive_chat(chat: &Chat) -> anyhow::Result<()> {
    println!("{}", "🤖 Interactive Chat".cyan().bold());
    if let Some(conversation) = chat.conversation() {
        println!("{}", format!("Conversation: {}", conversation).dimmed());
    }
    println!(
        "{}",
        "Type 'exit' or 'quit' to leave, '/reload' to regenerate the last reply".dimmed()
    );
    println!();

    loop {
        print!("{} ", "You:".cyan().bold());
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("{}", "👋 Goodbye!".cyan());
            break;
        }
        if input.is_empty() {
            continue;
        }

        let turn = if input == "/reload" {
            match last_exchange(&chat.messages()) {
                Some((id, question)) => Turn::Reload(id, question),
                None => {
                    println!("{}", "Nothing to reload yet".yellow());
                    continue;
                }
            }
        } else {
            Turn::Request(input.to_string())
        };

        println!("{}", "Assistant:".green().bold());
        if let Err(e) = stream_reply(chat, turn).await {
            println!("{}", format!("❌ Error: {}", e).red());
        }
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_exchange_pairs_reply_with_question() {
        let messages = vec![
            MessageRecord::new("1", "first".to_string(), MessageStatus::Local),
            MessageRecord::new("2", "answer".to_string(), MessageStatus::Success),
            MessageRecord::new("3", "second".to_string(), MessageStatus::Local),
            MessageRecord::new("4", "broken".to_string(), MessageStatus::Error),
        ];
        assert_eq!(
            last_exchange(&messages),
            Some((MessageId::from("4"), "second".to_string()))
        );
        assert_eq!(last_exchange(&messages[..1]), None);
    }
}
