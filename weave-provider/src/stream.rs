//! Line-oriented decoding of streamed response bodies (SSE and NDJSON).

use futures::{Stream, StreamExt};
use weave_core::error::WeaveError;

/// Split a byte stream into lines.
///
/// Lines are split on raw `\n` bytes before UTF-8 decoding, so multi-byte
/// characters straddling two network chunks survive intact. A trailing line
/// without a newline is still yielded.
pub fn lines<S, B, E>(body: S) -> impl Stream<Item = Result<String, WeaveError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(next) = body.next().await {
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(WeaveError::stream(format!("response body interrupted: {}", e)));
                    return;
                }
            };
            buffer.extend_from_slice(bytes.as_ref());

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line).trim().to_string();
                if !line.is_empty() {
                    yield Ok(line);
                }
            }
        }

        let rest = String::from_utf8_lossy(&buffer).trim().to_string();
        if !rest.is_empty() {
            yield Ok(rest);
        }
    }
}

/// One server-sent event line.
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    Data(&'a str),
    Done,
    /// Comments, `event:` / `id:` fields and keep-alives
    Other,
}

pub fn parse_sse_line(line: &str) -> SseLine<'_> {
    match line.strip_prefix("data:") {
        Some(data) if data.trim() == "[DONE]" => SseLine::Done,
        Some(data) => SseLine::Data(data.trim()),
        None => SseLine::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lines_survive_chunk_boundaries() {
        let text = "你好\n世界\n尾".as_bytes().to_vec();
        // split inside a multi-byte character
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
            vec![Ok(text[..4].to_vec()), Ok(text[4..].to_vec())];

        let collected: Vec<String> = lines(futures::stream::iter(chunks))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(collected, vec!["你好", "世界", "尾"]);
    }

    #[tokio::test]
    async fn test_lines_report_body_errors() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"one\ntw".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let collected: Vec<_> = lines(futures::stream::iter(chunks)).collect().await;
        assert_eq!(collected.len(), 2);
        assert!(collected[1].is_err());
    }

    #[test]
    fn test_sse_lines() {
        assert_eq!(parse_sse_line("data: {\"a\":1}"), SseLine::Data("{\"a\":1}"));
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Other);
    }
}
