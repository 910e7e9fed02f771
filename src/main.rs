use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use medibot::chat::{self, ChatContext};
use medibot::config::Config;
use medibot::embedder::{Embedder, load_embedder};
use medibot::format::format_plain_sources;
use medibot::llm::GroqClient;
use medibot::llm::groq::GroqFactory;
use medibot::pipeline::{AnswerPipeline, EXHAUSTED_MESSAGE, QueryOutcome, RetryPolicy};
use medibot::prompt::PromptTemplate;
use medibot::store::{DiskLoader, StoreCache, StoreLoader};

#[derive(Parser)]
#[command(name = "medibot", version, about = "Answer medical questions from a local vector index")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a single question read from stdin
    Ask,
    /// Chat in the terminal
    Chat,
    /// Serve chat sessions over HTTP
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;

    match cli.command {
        Command::Ask => ask(&config).await,
        Command::Chat => chat::repl::run(chat_context(&config).await?).await,
        Command::Serve { addr } => {
            chat::server::serve(chat_context(&config).await?, addr, config.server.idle_timeout())
                .await
        }
    }
}

/// One-shot mode: load everything, answer one question, exit.
async fn ask(config: &Config) -> Result<()> {
    let model = GroqClient::from_env(&config.llm, config.llm.ask_temperature)
        .context("Error initializing Groq LLM")?;
    let embedder = embedder(config).await?;

    let loader = DiskLoader::new(&config.vectorstore_path, config.model.dimensions);
    let store = tokio::task::spawn_blocking(move || loader.load())
        .await
        .context("vector store loader panicked")?
        .context("failed to load the vector store")?;

    let pipeline = AnswerPipeline::new(
        Arc::new(store),
        embedder,
        Arc::new(model),
        PromptTemplate::ask(),
    )
    .with_top_k(config.search_top_k);

    let query = read_query().await?;
    let outcome = pipeline
        .answer_with_retry(&query, RetryPolicy::from(&config.retry), |notice| {
            println!("{notice}")
        })
        .await;

    match outcome {
        QueryOutcome::Answered { answer, .. } => {
            println!("RESULT:  {}", answer.text);
            println!("SOURCE DOCUMENTS:  {}", format_plain_sources(&answer.sources));
        }
        QueryOutcome::Aborted { error, .. } => println!("Unexpected error: {error}"),
        QueryOutcome::Exhausted { .. } => println!("{EXHAUSTED_MESSAGE}"),
    }
    Ok(())
}

async fn read_query() -> Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"Write Query Here: ").await?;
    stdout.flush().await?;

    read_query_from(BufReader::new(tokio::io::stdin())).await
}

/// One line of input, without its line ending. End of input is an error.
async fn read_query_from<R: AsyncBufRead + Unpin>(mut input: R) -> Result<String> {
    let mut line = String::new();
    let read = input
        .read_line(&mut line)
        .await
        .context("failed to read query")?;
    if read == 0 {
        bail!("no query given (end of input)");
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Load the embedding model off the async runtime; the first run may also
/// download it.
async fn embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let model = config.model.clone();
    info!("Loading embedding model {}", model.name);
    tokio::task::spawn_blocking(move || load_embedder(&model))
        .await
        .context("embedding model loader panicked")?
        .context("failed to load embedding model")
}

async fn chat_context(config: &Config) -> Result<Arc<ChatContext>> {
    let loader = DiskLoader::new(&config.vectorstore_path, config.model.dimensions);
    Ok(Arc::new(ChatContext {
        stores: Arc::new(StoreCache::new(Arc::new(loader))),
        embedder: embedder(config).await?,
        models: Arc::new(GroqFactory {
            config: config.llm.clone(),
            temperature: config.llm.chat_temperature,
        }),
        prompt: PromptTemplate::chat(),
        retry: RetryPolicy::from(&config.retry),
        top_k: config.search_top_k,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_query_strips_line_ending() {
        let query = read_query_from("what is anemia?\r\nignored\n".as_bytes())
            .await
            .unwrap();
        assert_eq!(query, "what is anemia?");
    }

    #[tokio::test]
    async fn test_read_query_rejects_end_of_input() {
        let err = read_query_from("".as_bytes()).await.unwrap_err();
        assert!(err.to_string().contains("end of input"));
    }
}
