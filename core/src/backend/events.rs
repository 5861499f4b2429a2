use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::fs::FsSnapshot;

/// Message a stage sends to the orchestrator. The four kinds form the whole
/// contract between a stage's execution context and the control task.
#[derive(Debug)]
pub enum StageEventKind {
    Data(Bytes),
    End(Option<FsSnapshot>),
    Error {
        message: String,
        snapshot: Option<FsSnapshot>,
    },
    StdinRequest,
}

#[derive(Debug)]
pub struct StageEvent {
    pub index: usize,
    pub kind: StageEventKind,
}

/// Sending half handed to one stage. Cloneable so it can cross into the
/// stage's execution context.
#[derive(Clone)]
pub struct StageEmitter {
    index: usize,
    tx: mpsc::UnboundedSender<StageEvent>,
    cancelled: Arc<AtomicBool>,
}

impl StageEmitter {
    pub fn new(index: usize, tx: mpsc::UnboundedSender<StageEvent>) -> Self {
        Self {
            index,
            tx,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn send(&self, kind: StageEventKind) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.tx
            .send(StageEvent {
                index: self.index,
                kind,
            })
            .is_ok()
    }

    pub fn data(&self, data: impl Into<Bytes>) -> bool {
        self.send(StageEventKind::Data(data.into()))
    }

    pub fn end(&self, snapshot: Option<FsSnapshot>) -> bool {
        self.send(StageEventKind::End(snapshot))
    }

    pub fn error(&self, message: impl Into<String>, snapshot: Option<FsSnapshot>) -> bool {
        self.send(StageEventKind::Error {
            message: message.into(),
            snapshot,
        })
    }

    pub fn request_stdin(&self) -> bool {
        self.send(StageEventKind::StdinRequest)
    }

    /// Stops delivery; later sends are dropped.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_emitter_drops_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let emitter = StageEmitter::new(3, tx);

        assert!(emitter.data(&b"a"[..]));
        emitter.cancel();
        assert!(!emitter.end(None));

        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.index, 3);
        assert!(matches!(ev.kind, StageEventKind::Data(ref b) if b.as_ref() == b"a"));
        assert!(rx.try_recv().is_err());
    }
}
