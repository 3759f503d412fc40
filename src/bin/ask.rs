//! Ask the answer backend a question from the terminal.
//!
//! Usage: cargo run --bin ask [question...]
//!
//! Without arguments the question is read from stdin. Prints the raw markdown
//! answer, the citation links and the Telegram HTML it renders to.

use std::io::{BufRead, Write};

use tracing_subscriber::EnvFilter;

use xplora::config::AnswerSettings;
use xplora::pipeline::AnswerClient;
use xplora::pipeline::render::{collapse_fenced_citations, render_or_raw};

fn read_question() -> std::io::Result<String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return Ok(args.join(" "));
    }

    print!("Введите ваш запрос: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let question = match read_question() {
        Ok(q) if !q.is_empty() => q,
        Ok(_) => {
            eprintln!("Empty question");
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("Failed to read question: {e}");
            std::process::exit(1);
        }
    };

    let client = AnswerClient::new(reqwest::Client::new(), &AnswerSettings::default());
    let answer = match client.ask(&question).await {
        Ok(answer) => answer,
        Err(e) => {
            eprintln!("Произошла ошибка: {e}");
            std::process::exit(1);
        }
    };

    println!("\nТекст ответа:\n{}", answer.markdown_text);
    if !answer.citation_links.is_empty() {
        println!("\nИсточники:");
        for (i, link) in answer.citation_links.iter().enumerate() {
            println!("  [{}] {}", i + 1, link);
        }
    }

    let markdown = collapse_fenced_citations(&answer.markdown_text);
    println!("\nHTML:\n{}", render_or_raw(&markdown, &answer.citation_links));
}
