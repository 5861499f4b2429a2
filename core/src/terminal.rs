use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub rows: u16,
    pub cols: u16,
}

/// Where the last stage's output and pipeline diagnostics go.
pub trait OutputSink: Send + Sync {
    fn print(&self, text: &str);

    /// Transient status line (e.g. while a command is being fetched).
    fn print_status(&self, _status: &str) {}

    fn clear_status(&self) {}

    /// Terminal geometry, injected into stage environments as LINES/COLUMNS.
    fn term_size(&self) -> Option<TermSize> {
        None
    }
}

/// Interactive input for the first stage of a pipeline.
#[async_trait]
pub trait StdinReader: Send + Sync {
    /// Next line without its terminator; `None` at end of input.
    async fn read_line(&self) -> Option<String>;
}
