//! Pending request correlation
//! Matches asynchronous read and write completions to whoever asked for them,
//! keyed by characteristic.

use std::collections::HashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::core::error::{IronError, IronResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write,
}

/// Who is waiting on a pending request
#[derive(Debug)]
pub enum Responder<T> {
    /// A caller awaiting the result, identified for cancellation
    Caller {
        request_id: u64,
        reply: oneshot::Sender<IronResult<T>>,
    },
    /// Issued by the session itself; the result is only processed internally
    Internal,
}

impl<T> Responder<T> {
    fn resolve(self, result: IronResult<T>) {
        if let Self::Caller { reply, .. } = self {
            // Receiver gone means the caller stopped waiting
            let _ = reply.send(result);
        }
    }

    fn request_id(&self) -> Option<u64> {
        match self {
            Self::Caller { request_id, .. } => Some(*request_id),
            Self::Internal => None,
        }
    }
}

/// At most one pending read and one pending write per characteristic.
/// A later request replaces the earlier one, which resolves as failed.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    reads: HashMap<Uuid, Responder<Vec<u8>>>,
    writes: HashMap<Uuid, Responder<()>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_read(&mut self, characteristic: Uuid, responder: Responder<Vec<u8>>) {
        if let Some(previous) = self.reads.insert(characteristic, responder) {
            previous.resolve(Err(IronError::ReadFailed(format!(
                "superseded by a later read of {characteristic}"
            ))));
        }
    }

    pub fn register_write(&mut self, characteristic: Uuid, responder: Responder<()>) {
        if let Some(previous) = self.writes.insert(characteristic, responder) {
            previous.resolve(Err(IronError::WriteFailed(format!(
                "superseded by a later write to {characteristic}"
            ))));
        }
    }

    pub fn has_pending_read(&self, characteristic: &Uuid) -> bool {
        self.reads.contains_key(characteristic)
    }

    /// Resolves the pending read, returns false when nobody was waiting.
    pub fn complete_read(&mut self, characteristic: Uuid, result: Result<Vec<u8>, String>) -> bool {
        match self.reads.remove(&characteristic) {
            Some(responder) => {
                responder.resolve(result.map_err(IronError::ReadFailed));
                true
            }
            None => false,
        }
    }

    /// Resolves the pending write, returns false when nobody was waiting.
    pub fn complete_write(&mut self, characteristic: Uuid, result: Result<(), String>) -> bool {
        match self.writes.remove(&characteristic) {
            Some(responder) => {
                responder.resolve(result.map_err(IronError::WriteFailed));
                true
            }
            None => false,
        }
    }

    /// Drops an expired entry if it still belongs to `request_id`.
    pub fn cancel(&mut self, kind: RequestKind, characteristic: Uuid, request_id: u64) -> bool {
        match kind {
            RequestKind::Read => Self::remove_matching(&mut self.reads, characteristic, request_id),
            RequestKind::Write => {
                Self::remove_matching(&mut self.writes, characteristic, request_id)
            }
        }
    }

    fn remove_matching<T>(
        entries: &mut HashMap<Uuid, Responder<T>>,
        characteristic: Uuid,
        request_id: u64,
    ) -> bool {
        let matches = entries
            .get(&characteristic)
            .and_then(Responder::request_id)
            .is_some_and(|id| id == request_id);
        if matches {
            if let Some(responder) = entries.remove(&characteristic) {
                responder.resolve(Err(IronError::Timeout(characteristic)));
            }
        }
        matches
    }

    /// Resolves every pending request with `error`.
    pub fn fail_all(&mut self, error: IronError) {
        for (_, responder) in self.reads.drain() {
            responder.resolve(Err(error.clone()));
        }
        for (_, responder) in self.writes.drain() {
            responder.resolve(Err(error.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.reads.len() + self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
