//! An interactive agent in the terminal, answering questions with web search
//! and time lookup.

#[macro_use]
extern crate tracing;

use std::io::Write as _;
use std::path::PathBuf;
use std::pin::pin;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tern::{Config, DEFAULT_THREAD_ID, SessionBuilder, load_api_key};
use tern_openai_model::{OpenAIConfigBuilder, OpenAIProvider};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt};
use tokio::select;
use tokio::time::sleep;

const BAR_CHAR: &str = "▎";
const EXIT_WORDS: [&str; 3] = ["bye", "exit", "quit"];

#[derive(Parser)]
#[command(name = "tern", version, about = "Chat with a tool-using agent")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, env = "TERN_CONFIG")]
    config: Option<PathBuf>,

    /// Conversation thread to continue.
    #[arg(long, default_value = DEFAULT_THREAD_ID)]
    thread_id: String,

    /// Maximum number of model invocations per question.
    #[arg(long)]
    max_steps: Option<usize>,

    /// Keep conversations in long-term storage.
    #[arg(long)]
    long_term_memory: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("{} {err:#}", "error:".bright_red().bold());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::default(),
    };
    if let Some(max_steps) = cli.max_steps {
        config.max_steps = max_steps;
    }
    config.long_term_memory |= cli.long_term_memory;

    let api_key = load_api_key(&config.model.key_name)?;
    let search_api_key = load_api_key(&config.search_key_name)?;

    let model_config = OpenAIConfigBuilder::with_api_key(api_key)
        .with_base_url(&config.model.base_url)
        .with_model(&config.model.model)
        .with_temperature(config.model.temperature)
        .with_max_tokens(config.model.max_tokens)
        .build();
    let model_provider = OpenAIProvider::new(model_config);

    let session = SessionBuilder::with_model_provider(model_provider)
        .with_config(config)
        .with_search_api_key(search_api_key)
        .with_thread_id(cli.thread_id)
        .build()
        .context("failed to set up the session")?;
    info!("session started on thread {}", session.thread_id());

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")?
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    // One reader for the whole session, so buffered lines are not lost.
    let mut stdin = io::BufReader::new(io::stdin());
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = read_line(&mut stdin).await else {
            break;
        };
        let line = match parse_input(&line) {
            Input::Empty => continue,
            Input::Exit => break,
            Input::Message(line) => line,
        };

        let progress_bar = ProgressBar::new_spinner();
        progress_bar.set_style(progress_style.clone());
        progress_bar.set_message("🤔 Thinking...");

        let mut reply = pin!(session.send_message(line));
        let reply = loop {
            select! {
                reply = &mut reply => break reply,
                _ = sleep(Duration::from_millis(100)) => progress_bar.inc(1),
            }
        };

        // Finish the progress bar before printing anything else.
        progress_bar.finish_and_clear();

        match reply {
            Ok(answer) => {
                println!(
                    "{}🤖 {}",
                    BAR_CHAR.bright_cyan(),
                    answer.bright_white()
                );
            }
            Err(err) => {
                error!("run failed: {err}");
                println!("{}⚠️  {err}", BAR_CHAR.bright_red());
            }
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Empty,
    Exit,
    Message(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        Input::Empty
    } else if EXIT_WORDS.contains(&line) {
        Input::Exit
    } else {
        Input::Message(line)
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<String> {
    let mut line = String::new();

    match reader.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_every_piped_line() {
        let mut reader = io::BufReader::new(&b"\nWhat time is it in UTC?\nexit\n"[..]);

        let mut inputs = vec![];
        while let Some(line) = read_line(&mut reader).await {
            inputs.push(line);
        }
        let inputs: Vec<_> = inputs.iter().map(|line| parse_input(line)).collect();
        assert_eq!(
            inputs,
            [
                Input::Empty,
                Input::Message("What time is it in UTC?"),
                Input::Exit,
            ]
        );
    }

    #[test]
    fn test_exit_words() {
        for word in ["bye", "exit", "quit", "  quit \r\n"] {
            assert_eq!(parse_input(word), Input::Exit);
        }
        assert_eq!(parse_input("exit now"), Input::Message("exit now"));
    }
}
