use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use bytes::Bytes;

use crate::fs::FsSnapshot;
use crate::relay::SharedStdin;

use super::events::StageEmitter;

/// What a running module sees of the world.
pub trait StageIo {
    fn args(&self) -> &[String];
    fn env(&self) -> &BTreeMap<String, String>;
    /// Reads up to `buf.len()` bytes of stdin; `Ok(0)` is end of input.
    fn read_stdin(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_stdout(&mut self, data: &[u8]) -> io::Result<()>;
    fn fs(&mut self) -> &mut FsSnapshot;
}

/// Splits stdin into lines without holding a borrow of the `StageIo`
/// between calls, so a program can interleave reads and writes.
#[derive(Debug, Default)]
pub struct LineReader {
    buf: Vec<u8>,
    eof: bool,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next line without its `\n` (and `\r`), or `None` at end of input.
    pub fn next_line(&mut self, io: &mut dyn StageIo) -> io::Result<Option<String>> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let rest = std::mem::take(&mut self.buf);
                return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
            }
            let n = io.read_stdin(&mut chunk)?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

pub fn read_all_stdin(io: &mut dyn StageIo) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = io.read_stdin(&mut chunk)?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&chunk[..n]);
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "stage terminated")
}

/// Stage I/O over a fully materialised stdin (in-process backend).
pub(crate) struct BufferedIo {
    args: Vec<String>,
    env: BTreeMap<String, String>,
    stdin: Bytes,
    emitter: StageEmitter,
    fs: FsSnapshot,
}

impl BufferedIo {
    pub(crate) fn new(
        args: Vec<String>,
        env: BTreeMap<String, String>,
        stdin: Bytes,
        emitter: StageEmitter,
        fs: FsSnapshot,
    ) -> Self {
        Self {
            args,
            env,
            stdin,
            emitter,
            fs,
        }
    }

    pub(crate) fn into_fs(self) -> FsSnapshot {
        self.fs
    }
}

impl StageIo for BufferedIo {
    fn args(&self) -> &[String] {
        &self.args
    }

    fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    fn read_stdin(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.stdin.len());
        buf[..n].copy_from_slice(&self.stdin.split_to(n));
        Ok(n)
    }

    fn write_stdout(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.emitter.data(Bytes::copy_from_slice(data)) {
            Ok(())
        } else {
            Err(broken_pipe())
        }
    }

    fn fs(&mut self) -> &mut FsSnapshot {
        &mut self.fs
    }
}

/// Stage I/O over a shared stdin channel (concurrent backend). Asks the
/// orchestrator for input whenever a read would block.
pub(crate) struct SharedIo {
    args: Vec<String>,
    env: BTreeMap<String, String>,
    stdin: Arc<SharedStdin>,
    emitter: StageEmitter,
    fs: FsSnapshot,
}

impl SharedIo {
    pub(crate) fn new(
        args: Vec<String>,
        env: BTreeMap<String, String>,
        stdin: Arc<SharedStdin>,
        emitter: StageEmitter,
        fs: FsSnapshot,
    ) -> Self {
        Self {
            args,
            env,
            stdin,
            emitter,
            fs,
        }
    }

    pub(crate) fn into_fs(self) -> FsSnapshot {
        self.fs
    }
}

impl StageIo for SharedIo {
    fn args(&self) -> &[String] {
        &self.args
    }

    fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    fn read_stdin(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(n) = self.stdin.try_read(buf)? {
            return Ok(n);
        }
        self.emitter.request_stdin();
        self.stdin.read(buf)
    }

    fn write_stdout(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.emitter.data(Bytes::copy_from_slice(data)) {
            Ok(())
        } else {
            Err(broken_pipe())
        }
    }

    fn fs(&mut self) -> &mut FsSnapshot {
        &mut self.fs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn line_reader_handles_split_chunks_and_trailing_line() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut io = BufferedIo::new(
            vec!["t".into()],
            BTreeMap::new(),
            Bytes::from_static(b"one\r\ntwo\nthree"),
            StageEmitter::new(0, tx),
            FsSnapshot::default(),
        );
        let mut lines = LineReader::new();
        let mut got = Vec::new();
        while let Some(line) = lines.next_line(&mut io).unwrap() {
            got.push(line);
        }
        assert_eq!(got, vec!["one", "two", "three"]);
    }

    #[test]
    fn writes_fail_once_emitter_is_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let emitter = StageEmitter::new(0, tx);
        let mut io = BufferedIo::new(
            vec![],
            BTreeMap::new(),
            Bytes::new(),
            emitter.clone(),
            FsSnapshot::default(),
        );
        io.write_stdout(b"x").unwrap();
        emitter.cancel();
        assert_eq!(
            io.write_stdout(b"y").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
