use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use conduit_core::terminal::{OutputSink, StdinReader, TermSize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

/// Prints pipeline output on stdout and transient status lines on stderr.
pub struct TerminalSink {
    status_visible: AtomicBool,
    show_status: bool,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self {
            status_visible: AtomicBool::new(false),
            show_status: atty::is(atty::Stream::Stderr),
        }
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for TerminalSink {
    fn print(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn print_status(&self, status: &str) {
        if !self.show_status {
            return;
        }
        let mut err = std::io::stderr().lock();
        let _ = write!(err, "\r\x1b[2K{status}");
        let _ = err.flush();
        self.status_visible.store(true, Ordering::SeqCst);
    }

    fn clear_status(&self) {
        if self.status_visible.swap(false, Ordering::SeqCst) {
            let mut err = std::io::stderr().lock();
            let _ = write!(err, "\r\x1b[2K");
            let _ = err.flush();
        }
    }

    fn term_size(&self) -> Option<TermSize> {
        if !atty::is(atty::Stream::Stdout) {
            return None;
        }
        crossterm::terminal::size()
            .ok()
            .map(|(cols, rows)| TermSize { rows, cols })
    }
}

/// Line source shared by the command prompt and the first stage of the
/// running pipeline.
pub struct LineInput<R> {
    lines: Mutex<Lines<R>>,
}

impl LineInput<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R> LineInput<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: Mutex::new(reader.lines()),
        }
    }

    pub async fn next_line(&self) -> Option<String> {
        match self.lines.lock().await.next_line().await {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error.kind = "stdin.read", error.message = %e, "reading input failed");
                None
            }
        }
    }
}

#[async_trait]
impl<R> StdinReader for LineInput<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn read_line(&self) -> Option<String> {
        self.next_line().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lines_are_shared_between_readers() {
        let input = LineInput::new(&b"echo hi\nfirst\n"[..]);
        assert_eq!(input.next_line().await.as_deref(), Some("echo hi"));
        assert_eq!(input.read_line().await.as_deref(), Some("first"));
        assert_eq!(input.read_line().await, None);
    }
}
