use std::collections::VecDeque;
use std::io;
use std::sync::{Condvar, Mutex, MutexGuard};

use thiserror::Error;

pub const DEFAULT_SHARED_STDIN_BYTES: usize = 8 * 1024;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    #[error("stdin channel closed")]
    Closed,
    #[error("stdin channel terminated")]
    Terminated,
}

/// Fixed-capacity single-producer/single-consumer byte channel.
///
/// The producer is the orchestrator's control task and never blocks: bytes
/// that do not fit into the ring are parked in an overflow queue and moved in
/// as the consumer frees space. The consumer blocks on a condition variable
/// until the producer writes, closes or terminates the channel.
///
/// Unread bytes are never overwritten: `read_cursor() <= write_cursor() + 1`
/// and `written - read <= capacity` hold at all times.
///
/// `capacity` bounds the ring only. The overflow queue is unbounded, so a
/// producer that outpaces its consumer grows `pending()` without limit; the
/// channel trades memory for a control task that never waits on a stage.
pub struct SharedStdin {
    state: Mutex<RingState>,
    wake: Condvar,
    capacity: usize,
}

struct RingState {
    buf: Box<[u8]>,
    /// Index of the last byte written, `None` until the first write.
    cursor: Option<u64>,
    /// Number of bytes consumed so far.
    read: u64,
    overflow: VecDeque<u8>,
    closed: bool,
    terminated: bool,
}

impl RingState {
    fn written(&self) -> u64 {
        self.cursor.map(|c| c + 1).unwrap_or(0)
    }

    fn available(&self) -> usize {
        (self.written() - self.read) as usize
    }

    fn push_ring(&mut self, data: &[u8]) -> usize {
        let cap = self.buf.len();
        let free = cap - self.available();
        let n = free.min(data.len());
        let mut pos = self.written();
        for &b in &data[..n] {
            self.buf[(pos % cap as u64) as usize] = b;
            pos += 1;
        }
        if n > 0 {
            self.cursor = Some(pos - 1);
        }
        n
    }

    fn refill_from_overflow(&mut self) {
        let free = self.buf.len() - self.available();
        let n = free.min(self.overflow.len());
        if n == 0 {
            return;
        }
        let chunk: Vec<u8> = self.overflow.drain(..n).collect();
        self.push_ring(&chunk);
    }
}

impl SharedStdin {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(RingState {
                buf: vec![0u8; capacity].into_boxed_slice(),
                cursor: None,
                read: 0,
                overflow: VecDeque::new(),
                closed: false,
                terminated: false,
            }),
            wake: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `data` after the current write cursor and wakes the reader.
    pub fn write(&self, data: &[u8]) -> Result<(), RelayError> {
        let mut st = self.lock();
        if st.terminated {
            return Err(RelayError::Terminated);
        }
        if st.closed {
            return Err(RelayError::Closed);
        }
        if data.is_empty() {
            return Ok(());
        }
        let n = if st.overflow.is_empty() {
            st.push_ring(data)
        } else {
            0
        };
        st.overflow.extend(&data[n..]);
        drop(st);
        self.wake.notify_one();
        Ok(())
    }

    /// Marks end of input. Buffered bytes stay readable.
    pub fn close(&self) {
        let mut st = self.lock();
        st.closed = true;
        drop(st);
        self.wake.notify_all();
    }

    /// Tears the channel down: pending and future reads fail.
    pub fn terminate(&self) {
        let mut st = self.lock();
        st.terminated = true;
        st.overflow.clear();
        drop(st);
        self.wake.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        let st = self.lock();
        st.closed || st.terminated
    }

    /// Index of the last byte written, `None` before the first write.
    pub fn write_cursor(&self) -> Option<u64> {
        self.lock().cursor
    }

    pub fn read_cursor(&self) -> u64 {
        self.lock().read
    }

    /// Bytes written but not read yet, including the overflow queue.
    pub fn pending(&self) -> usize {
        let st = self.lock();
        st.available() + st.overflow.len()
    }

    /// Non-blocking read. `Ok(None)` means the reader would block.
    pub fn try_read(&self, out: &mut [u8]) -> io::Result<Option<usize>> {
        let mut st = self.lock();
        Self::read_locked(&mut st, out)
    }

    /// Blocks until bytes are available, the channel is closed (`Ok(0)`), or
    /// it is terminated (`Err`).
    pub fn read(&self, out: &mut [u8]) -> io::Result<usize> {
        let mut st = self.lock();
        loop {
            if let Some(n) = Self::read_locked(&mut st, out)? {
                return Ok(n);
            }
            st = self.wake.wait(st).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn read_locked(st: &mut RingState, out: &mut [u8]) -> io::Result<Option<usize>> {
        if st.terminated {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                RelayError::Terminated,
            ));
        }
        if out.is_empty() {
            return Ok(Some(0));
        }
        let available = st.available();
        if available == 0 {
            return Ok(if st.closed { Some(0) } else { None });
        }

        let cap = st.buf.len() as u64;
        let n = available.min(out.len());
        for (i, slot) in out[..n].iter_mut().enumerate() {
            *slot = st.buf[((st.read + i as u64) % cap) as usize];
        }
        st.read += n as u64;
        debug_assert!(st.read <= st.written());
        st.refill_from_overflow();
        Ok(Some(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn cursor_starts_unset_and_tracks_last_byte() {
        let ch = SharedStdin::new(16);
        assert_eq!(ch.write_cursor(), None);
        ch.write(b"abc").unwrap();
        assert_eq!(ch.write_cursor(), Some(2));
        ch.write(b"de").unwrap();
        assert_eq!(ch.write_cursor(), Some(4));
    }

    #[test]
    fn overflow_never_overwrites_unread_bytes() {
        let ch = SharedStdin::new(4);
        ch.write(b"abcdef").unwrap();
        ch.write(b"gh").unwrap();
        assert_eq!(ch.pending(), 8);
        assert!(ch.pending() > ch.capacity());

        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        while out.len() < 8 {
            let n = ch.try_read(&mut buf).unwrap().unwrap();
            assert!(ch.read_cursor() <= ch.write_cursor().unwrap() + 1);
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"abcdefgh");
        assert_eq!(ch.try_read(&mut buf).unwrap(), None);
    }

    #[test]
    fn close_drains_then_reports_eof() {
        let ch = SharedStdin::new(8);
        ch.write(b"hi").unwrap();
        ch.close();
        assert_eq!(ch.write(b"x"), Err(RelayError::Closed));

        let mut buf = [0u8; 8];
        assert_eq!(ch.read(&mut buf).unwrap(), 2);
        assert_eq!(ch.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn blocked_reader_wakes_on_write() {
        let ch = Arc::new(SharedStdin::new(8));
        let reader = {
            let ch = ch.clone();
            std::thread::spawn(move || {
                let mut buf = [0u8; 8];
                let n = ch.read(&mut buf).unwrap();
                buf[..n].to_vec()
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        ch.write(b"ping").unwrap();
        assert_eq!(reader.join().unwrap(), b"ping");
    }

    #[test]
    fn terminate_fails_blocked_reader() {
        let ch = Arc::new(SharedStdin::new(8));
        let reader = {
            let ch = ch.clone();
            std::thread::spawn(move || {
                let mut buf = [0u8; 8];
                ch.read(&mut buf)
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        ch.terminate();
        let err = reader.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(ch.write(b"late"), Err(RelayError::Terminated));
    }
}
