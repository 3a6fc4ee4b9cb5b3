//! Line-oriented tee for subprocess pipes.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipe {
    Stdout,
    Stderr,
}

impl Pipe {
    fn as_str(self) -> &'static str {
        match self {
            Pipe::Stdout => "stdout",
            Pipe::Stderr => "stderr",
        }
    }
}

/// Read `reader` to EOF, logging every line under the `agent` target as it
/// arrives and returning everything that was read.
///
/// Bytes that are not UTF-8 are replaced, never rejected. A read error ends
/// the tee with a warning and returns what was collected so far.
pub async fn tee_lines<R>(reader: Option<R>, pipe: Pipe) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };

    let mut reader = BufReader::new(reader);
    let mut buffer = String::new();
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(target: "agent", pipe = pipe.as_str(), error = %e, "stopped reading agent output");
                break;
            }
        }
        let decoded = String::from_utf8_lossy(&raw);
        let line = decoded.trim_end_matches(['\n', '\r']);
        match pipe {
            Pipe::Stdout => tracing::info!(target: "agent", pipe = pipe.as_str(), "{}", line),
            Pipe::Stderr => tracing::warn!(target: "agent", pipe = pipe.as_str(), "{}", line),
        }
        buffer.push_str(line);
        buffer.push('\n');
    }
    buffer
}

/// The last `max_chars` characters of `text`, trimmed.
pub fn tail(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let start = text
        .char_indices()
        .nth(count - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    format!("...{}", &text[start..])
}
