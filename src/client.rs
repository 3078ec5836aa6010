use std::io;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpStream, tcp::OwnedWriteHalf},
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    wire::{Frame, read_frame, write_frame},
};

/// Separates the sender label from the body inside a text payload. Payloads
/// without it are treated as anonymous system notices.
const SENDER_DELIMITER: char = '|';

pub async fn run(args: ClientArgs) -> Result<()> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    print_line(&format!("*** connected as {}", args.name)).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        select! {
            frame = read_frame(&mut reader) => {
                if !process_frame(frame?, &mut writer).await? {
                    break;
                }
            }
            line = stdin.next_line() => {
                if !forward_line(line?, &mut writer, &args.name).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shut down the connection cleanly");
    }
    Ok(())
}

/// Applies one frame from the hub. Returns false once the conversation is
/// over.
async fn process_frame(frame: Option<Frame>, writer: &mut OwnedWriteHalf) -> Result<bool> {
    match frame {
        Some(Frame::Text { payload }) => {
            match payload.split_once(SENDER_DELIMITER) {
                Some((who, text)) => print_line(&format!("<{who}> {text}")).await?,
                None => print_line(&format!("*** {payload}")).await?,
            }
            Ok(true)
        }
        Some(Frame::Ping) => {
            // The acknowledgement that keeps the hub's read deadline fresh.
            write_frame(writer, &Frame::Pong).await?;
            Ok(true)
        }
        Some(Frame::Pong) => Ok(true),
        Some(Frame::Close) | None => {
            print_line("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

/// Frames one line of user input and sends it. Returns false on `/quit` or
/// stdin closing.
async fn forward_line(
    line: Option<String>,
    writer: &mut OwnedWriteHalf,
    name: &str,
) -> Result<bool> {
    let Some(line) = line else {
        return Ok(false);
    };

    let text = line.trim();
    if text.is_empty() {
        return Ok(true);
    }
    if text.eq_ignore_ascii_case("/quit") {
        print_line("*** leaving chat").await?;
        return Ok(false);
    }

    let payload = format!("{name}{SENDER_DELIMITER}{text}");
    write_frame(writer, &Frame::Text { payload }).await?;
    Ok(true)
}

async fn print_line(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
