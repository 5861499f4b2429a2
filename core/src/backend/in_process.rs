use std::panic::{catch_unwind, AssertUnwindSafe};

use bytes::Bytes;

use crate::fs::FsSnapshot;
use crate::resolver::{CallbackInput, Executable, StageDescriptor};

use super::events::StageEmitter;
use super::io::BufferedIo;
use super::panic_message;

/// Runs a stage inline on the control task. `start` returns only once the
/// stage has finished and queued all of its events.
pub struct InProcessBackend {
    descriptor: StageDescriptor,
    emitter: StageEmitter,
    snapshot: Option<FsSnapshot>,
}

impl InProcessBackend {
    pub(crate) fn new(
        descriptor: StageDescriptor,
        snapshot: FsSnapshot,
        emitter: StageEmitter,
    ) -> Self {
        Self {
            descriptor,
            emitter,
            snapshot: Some(snapshot),
        }
    }

    pub fn is_started(&self) -> bool {
        self.snapshot.is_none()
    }

    pub async fn start(&mut self, initial_stdin: Option<Bytes>) {
        let Some(snapshot) = self.snapshot.take() else {
            return;
        };
        let stdin = initial_stdin.unwrap_or_default();
        let original = snapshot.clone();

        let (result, fs) = match &self.descriptor.executable {
            Executable::Callback(callback) => {
                let mut fs = snapshot;
                let result = callback
                    .call(CallbackInput {
                        args: &self.descriptor.argv,
                        env: &self.descriptor.env,
                        stdin: String::from_utf8_lossy(&stdin).into_owned(),
                        fs: &mut fs,
                    })
                    .await;
                let result = result.map(|output| {
                    if let Some(output) = output {
                        self.emitter.data(format!("{output}\n"));
                    }
                });
                (result.map_err(|e| format!("{e:#}")), fs)
            }
            Executable::Module(module) => {
                let mut io = BufferedIo::new(
                    self.descriptor.argv.clone(),
                    self.descriptor.env.clone(),
                    stdin,
                    self.emitter.clone(),
                    snapshot,
                );
                let program = module.program().clone();
                let result = catch_unwind(AssertUnwindSafe(|| program.run(&mut io)));
                let result = match result {
                    Ok(r) => r.map_err(|e| format!("{e:#}")),
                    Err(panic) => Err(panic_message(panic.as_ref())),
                };
                (result, io.into_fs())
            }
        };

        let changed = (fs != original).then_some(fs);
        match result {
            Ok(()) => {
                self.emitter.end(changed);
            }
            Err(message) => {
                self.emitter.error(message, changed);
            }
        }
    }

    /// Nothing can be interrupted here; only later events are suppressed.
    pub fn terminate(&mut self) {
        self.emitter.cancel();
    }
}
