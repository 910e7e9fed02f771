//! Terminal host for a single chat session.
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::{BotMessage, ChatContext, ChatSession};

const CLEAR_COMMAND: &str = "/clear";
const QUIT_COMMAND: &str = "/quit";

/// Run one session over stdin/stdout until `/quit` or end of input.
pub async fn run(ctx: Arc<ChatContext>) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    run_with_io(ctx, stdin, &mut stdout).await
}

/// [`run`] over arbitrary line input and output.
pub async fn run_with_io<R, W>(ctx: Arc<ChatContext>, input: R, output: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (mut session, greeting) = ChatSession::start(ctx).await;
    write_messages(output, &greeting).await?;
    output
        .write_all(format!("(type {CLEAR_COMMAND} to clear history, {QUIT_COMMAND} to exit)\n").as_bytes())
        .await?;

    let mut lines = input.lines();
    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await.context("failed to read input")? else {
            break;
        };
        let replies = match line.trim() {
            QUIT_COMMAND => break,
            CLEAR_COMMAND => session.clear(),
            _ => session.on_message(&line).await,
        };
        write_messages(output, &replies).await?;
    }

    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}

async fn write_messages<W: AsyncWrite + Unpin>(output: &mut W, messages: &[BotMessage]) -> Result<()> {
    for message in messages {
        output.write_all(message.content.as_bytes()).await?;
        output.write_all(b"\n\n").await?;
    }
    output.flush().await?;
    Ok(())
}
