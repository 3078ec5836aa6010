use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// One discrete message on the wire.
///
/// `Text` carries an opaque payload the hub relays untouched; the
/// `sender|body` convention inside it is a presentation-layer concern.
/// `Ping`/`Pong` are the liveness probe and its acknowledgement, and `Close`
/// tells the peer no further frames will follow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Text { payload: String },
    Ping,
    Pong,
    Close,
}

/// Reads the next frame, one JSON object per line. `Ok(None)` is EOF; a
/// line that does not parse is an `InvalidData` error.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        // Bare newlines between frames are tolerated.
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }

        let parsed = serde_json::from_str(trimmed).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Flushed per frame: a probe or close notification must not sit in a
    // buffer.
    let mut encoded = serde_json::to_vec(frame).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
