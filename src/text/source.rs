//! Text inputs for the pipeline.
//!
//! Pairs with `PlaybackSink` for output - this feeds text in as it arrives.

use crate::error::{Result, TtsError};
use std::io::BufRead;

/// Pluggable text input. `next_chunk` may block until text arrives.
pub trait TextSource: Send + 'static {
    /// Next piece of text, or `None` at end of input.
    ///
    /// # Errors
    /// `TtsError::Segmentation` for undecodable input.
    fn next_chunk(&mut self) -> Result<Option<String>>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "text"
    }
}

/// A fully available string, delivered as one chunk.
#[derive(Debug, Clone)]
pub struct StaticText {
    text: Option<String>,
}

impl StaticText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }
}

impl TextSource for StaticText {
    fn next_chunk(&mut self) -> Result<Option<String>> {
        Ok(self.text.take())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Line-by-line reader (stdin, pipes, files).
pub struct ReaderSource<R> {
    reader: R,
    line: u64,
}

impl<R: BufRead + Send + 'static> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, line: 0 }
    }
}

impl ReaderSource<std::io::BufReader<std::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(std::io::BufReader::new(std::io::stdin()))
    }
}

impl<R: BufRead + Send + 'static> TextSource for ReaderSource<R> {
    fn next_chunk(&mut self) -> Result<Option<String>> {
        let mut bytes = Vec::new();
        if self.reader.read_until(b'\n', &mut bytes)? == 0 {
            return Ok(None);
        }
        self.line += 1;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| TtsError::Segmentation {
                message: format!(
                    "line {} is not valid UTF-8 (byte {}): {}",
                    self.line,
                    e.utf8_error().valid_up_to(),
                    e.utf8_error()
                ),
            })
    }

    fn name(&self) -> &'static str {
        "reader"
    }
}

/// Chunks pushed from another thread. Ends when every sender is dropped.
pub struct ChannelSource {
    rx: crossbeam_channel::Receiver<String>,
}

impl ChannelSource {
    pub fn new(rx: crossbeam_channel::Receiver<String>) -> Self {
        Self { rx }
    }

    /// A connected sender/source pair.
    pub fn pair() -> (crossbeam_channel::Sender<String>, Self) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (tx, Self::new(rx))
    }
}

impl TextSource for ChannelSource {
    fn next_chunk(&mut self) -> Result<Option<String>> {
        Ok(self.rx.recv().ok())
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn drain(source: &mut dyn TextSource) -> Result<Vec<String>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = source.next_chunk()? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    #[test]
    fn test_static_text_single_chunk() {
        let mut source = StaticText::new("Hello there.");
        assert_eq!(drain(&mut source).unwrap(), vec!["Hello there."]);
        assert_eq!(source.next_chunk().unwrap(), None);
    }

    #[test]
    fn test_reader_source_yields_lines() {
        let mut source = ReaderSource::new(Cursor::new(b"one.\ntwo\n".to_vec()));
        assert_eq!(drain(&mut source).unwrap(), vec!["one.\n", "two\n"]);
    }

    #[test]
    fn test_reader_source_rejects_invalid_utf8() {
        let mut source = ReaderSource::new(Cursor::new(b"fine\n\xff\xfe bad\n".to_vec()));
        assert_eq!(source.next_chunk().unwrap(), Some("fine\n".to_string()));
        match source.next_chunk() {
            Err(TtsError::Segmentation { message }) => assert!(message.contains("line 2")),
            other => panic!("Expected Segmentation error, got {:?}", other),
        }
    }

    #[test]
    fn test_channel_source_ends_when_senders_dropped() {
        let (tx, mut source) = ChannelSource::pair();
        tx.send("a".to_string()).unwrap();
        tx.send("b".to_string()).unwrap();
        drop(tx);
        assert_eq!(drain(&mut source).unwrap(), vec!["a", "b"]);
    }
}
