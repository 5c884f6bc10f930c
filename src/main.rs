//! Mind-Chat console: a line-oriented chat loop over the conversation core.
//!
//! This is a demo surface for the core, not the product UI: it streams
//! reply fragments to stdout and exposes the history operations as slash
//! commands.

use std::io::Write as _;
use std::process::ExitCode;

use anyhow::Context as _;

use mindchat::bootstrap::{self, AppContext};
use mindchat::errors::ChatError;
use mindchat::generation::scheduler::GenerationEvent;
use mindchat::history::conversation::Conversation;
use mindchat::history::message::MessageRole;
use mindchat::history::mode::ConversationMode;
use mindchat::ids::ConversationId;
use mindchat::service::ReplyTicket;

#[tokio::main]
async fn main() -> ExitCode {
    bootstrap::init_tracing();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("fatal: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let context = bootstrap::build_context()
        .await
        .context("failed to initialize the Mind-Chat core")?;

    let mut mode = ConversationMode::Counseling;
    let mut current = bootstrap::bootstrap_conversation(&context.service, mode).await?;

    println!("Mind-Chat ({mode}) こんにちは。本日はどうされましたか？");
    println!("Commands: /new /list /switch N /fav N /del N /regen /retry /mode KEY /quit");

    loop {
        print!("you> ");
        std::io::stdout().flush()?;
        let Some(line) = read_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            if !handle_command(&context, command, &mut mode, &mut current).await? {
                break;
            }
            continue;
        }

        match context
            .service
            .send_message(mode, Some(current.id), line)
            .await
        {
            Ok(ticket) => {
                if let Some(evicted) = ticket.evicted {
                    println!("(evicted old conversation {evicted})");
                }
                stream_reply(ticket).await;
                current = context.service.get(current.id).await?;
            }
            Err(err) => println!("error: {err}"),
        }
    }

    context.scheduler.shutdown();
    Ok(())
}

/// Read one line from stdin without blocking the runtime.
async fn read_line() -> anyhow::Result<Option<String>> {
    tokio::task::spawn_blocking(|| -> anyhow::Result<Option<String>> {
        let mut line = String::new();
        let read = std::io::stdin().read_line(&mut line)?;
        Ok(if read == 0 { None } else { Some(line) })
    })
    .await
    .context("stdin reader task failed")?
}

/// Run one slash command. Returns `false` when the console should exit.
async fn handle_command(
    context: &AppContext,
    command: &str,
    mode: &mut ConversationMode,
    current: &mut Conversation,
) -> anyhow::Result<bool> {
    let mut parts = command.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    let argument = parts.next();

    match verb {
        "quit" | "exit" => return Ok(false),
        "new" => match context.service.new_conversation(*mode).await {
            Ok(conversation) => {
                *current = conversation;
                println!("(new conversation)");
            }
            Err(err) => println!("error: {err}"),
        },
        "list" => {
            for (index, conversation) in context.service.list(*mode).await.iter().enumerate() {
                let marker = if conversation.id == current.id { ">" } else { " " };
                let star = if conversation.favorite { "★" } else { " " };
                let title = if conversation.title.is_empty() {
                    "(untitled)"
                } else {
                    &conversation.title
                };
                println!("{marker}{star} {index}: {title}");
            }
        }
        "switch" => {
            if let Some(id) = pick(context, *mode, argument).await {
                match context.service.switch_conversation(id).await {
                    Ok((conversation, reattach)) => {
                        *current = conversation;
                        print_transcript(current);
                        if reattach.is_some() {
                            println!("(a reply is still being generated here)");
                        }
                    }
                    Err(err) => println!("error: {err}"),
                }
            }
        }
        "fav" => {
            if let Some(id) = pick(context, *mode, argument).await {
                match context.service.toggle_favorite(id).await {
                    Ok(conversation) => {
                        let state = if conversation.favorite { "on" } else { "off" };
                        println!("(favorite {state})");
                    }
                    Err(err @ ChatError::FavoriteLimitReached { .. }) => println!("{err}"),
                    Err(err) => println!("error: {err}"),
                }
            }
        }
        "del" => {
            if let Some(id) = pick(context, *mode, argument).await {
                match context.service.delete_conversation(id).await {
                    Ok(()) => {
                        println!("(deleted)");
                        if id == current.id {
                            *current =
                                bootstrap::bootstrap_conversation(&context.service, *mode).await?;
                        }
                    }
                    Err(err) => println!("error: {err}"),
                }
            }
        }
        "regen" => match context.service.regenerate(current.id).await {
            Ok(ticket) => {
                stream_reply(ticket).await;
                *current = context.service.get(current.id).await?;
            }
            Err(err) => println!("error: {err}"),
        },
        "retry" => match context.service.retry(current.id).await {
            Ok(ticket) => {
                stream_reply(ticket).await;
                *current = context.service.get(current.id).await?;
            }
            Err(err) => println!("error: {err}"),
        },
        "mode" => match argument.and_then(ConversationMode::parse_key) {
            Some(picked) => {
                *mode = picked;
                *current = bootstrap::bootstrap_conversation(&context.service, *mode).await?;
                println!("(mode: {mode})");
                print_transcript(current);
            }
            None => println!("usage: /mode counseling|casual"),
        },
        other => println!("unknown command: /{other}"),
    }
    Ok(true)
}

/// Resolve a `/list` index argument into a conversation id.
async fn pick(
    context: &AppContext,
    mode: ConversationMode,
    argument: Option<&str>,
) -> Option<ConversationId> {
    let index: usize = match argument.and_then(|raw| raw.parse().ok()) {
        Some(index) => index,
        None => {
            println!("usage: give the index shown by /list");
            return None;
        }
    };
    let listed = context.service.list(mode).await;
    match listed.get(index) {
        Some(conversation) => Some(conversation.id),
        None => {
            println!("no conversation at index {index}");
            None
        }
    }
}

/// Stream one reply to stdout until its terminal event.
async fn stream_reply(mut ticket: ReplyTicket) {
    print!("chat> ");
    let _ = std::io::stdout().flush();
    while let Some(event) = ticket.events.recv().await {
        match event {
            GenerationEvent::Fragment(fragment) => {
                print!("{fragment}");
                let _ = std::io::stdout().flush();
            }
            GenerationEvent::Completed(_) => {
                println!();
                return;
            }
            GenerationEvent::Cancelled => {
                println!("\n(cancelled)");
                return;
            }
            GenerationEvent::Failed(reason) => {
                println!("\n(failed: {reason}; use /retry to try again)");
                return;
            }
        }
    }
}

/// Print the current conversation transcript.
fn print_transcript(conversation: &Conversation) {
    for message in &conversation.messages {
        let label = match message.role {
            MessageRole::User => "you",
            MessageRole::Assistant => "chat",
        };
        println!("{label}> {}", message.content);
    }
}
