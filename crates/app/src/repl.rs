use pdf_chat_core::{ChatResponse, ChatService, Generator};
use std::future::Future;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

enum Input {
    Exit,
    Clear,
    Rebuild,
    Skip,
    Question(String),
}

fn classify(line: &str) -> Input {
    let trimmed = line.trim();
    match trimmed.to_lowercase().as_str() {
        "exit" | "quit" => Input::Exit,
        "clear" => Input::Clear,
        "rebuild" => Input::Rebuild,
        "" => Input::Skip,
        _ => Input::Question(trimmed.to_string()),
    }
}

pub fn print_response(response: &ChatResponse, with_previews: bool) {
    println!("\nBot: {}", response.answer);

    if !response.sources.is_empty() {
        println!("\nSources:");
        for (position, source) in response.sources.iter().enumerate() {
            println!("  {}. {}", position + 1, source.source);
            if with_previews {
                println!("     {}", source.content.replace('\n', " "));
            }
        }
    }
}

fn prompt() {
    print!("\nYou: ");
    let _ = std::io::stdout().flush();
}

fn terminated() {
    info!("session interrupted by user");
    println!("\nApplication terminated by user");
}

/// Runs `work` unless `interrupt` completes first; the abandoned work is dropped.
async fn race_interrupt<W, I>(work: W, interrupt: I) -> Option<W::Output>
where
    W: Future,
    I: Future,
{
    tokio::select! {
        output = work => Some(output),
        _ = interrupt => None,
    }
}

async fn until_ctrl_c<W: Future>(work: W) -> Option<W::Output> {
    race_interrupt(work, tokio::signal::ctrl_c()).await
}

/// Interactive loop over stdin. Ctrl-C at the prompt, while answering or
/// while rebuilding ends the session.
pub async fn run<G: Generator>(service: &mut ChatService<G>) -> anyhow::Result<()> {
    println!("\n==== PDF Specification Chatbot ====");
    println!("Type 'exit' or 'quit' to end the conversation.");
    println!("Type 'clear' to clear conversation history.");
    println!("Type 'rebuild' to re-index the PDF folder.");
    println!("====================================");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt();

        let Some(line) = until_ctrl_c(lines.next_line()).await else {
            terminated();
            return Ok(());
        };
        let Some(line) = line? else {
            println!("\nGoodbye!");
            return Ok(());
        };

        match classify(&line) {
            Input::Exit => {
                println!("\nGoodbye!");
                return Ok(());
            }
            Input::Clear => {
                service.clear_history();
                println!("\nConversation history cleared.");
            }
            Input::Rebuild => {
                let Some(outcome) = until_ctrl_c(service.rebuild(None)).await else {
                    terminated();
                    return Ok(());
                };

                match outcome {
                    Ok(summary) => {
                        for skipped in &summary.skipped {
                            warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
                        }
                        println!(
                            "\nIndex rebuilt: {} documents, {} chunks.",
                            summary.documents, summary.chunks
                        );
                    }
                    Err(rebuild_error) => {
                        error!(error = %rebuild_error, "rebuild failed");
                        println!("\nRebuild failed; the previous index is still in use.");
                    }
                }
            }
            Input::Skip => {}
            Input::Question(question) => {
                let Some(outcome) = until_ctrl_c(service.ask(&question)).await else {
                    terminated();
                    return Ok(());
                };

                match outcome {
                    Ok(response) => print_response(&response, false),
                    Err(ask_error) => {
                        error!(error = %ask_error, "error in chat");
                        println!("\nAn error occurred while processing your query. Please try again.");
                    }
                }
            }
        }
    }
}
