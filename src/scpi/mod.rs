//! Bridge between the single-threaded runtime and whatever owns the instrument.
//!
//! Every transaction gets its own reply channel. The runtime keeps the receiving
//! half in the component's execution state and polls it with `try_recv` on later
//! ticks, so a component can never have more than one transaction in flight.
//!
//! ```text
//! Runtime (tick)                     Instrument worker
//! ──────────────                     ─────────────────
//! PendingTransaction::new()
//!   └─ dispatch(request) ──────────→ recv request
//! poll() → None                        ├─ transport.execute()
//! poll() → None                        └─ respond(response)
//! poll() → Some(response) ←─────────── reply channel
//! ```

use crate::error::FlowError;
use std::sync::mpsc::{Receiver, SyncSender, TryRecvError, TrySendError, sync_channel};
use std::thread::{self, JoinHandle};

/// Whether the instrument is expected to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScpiRequestKind {
    Command,
    Query,
}

/// Answer to one transaction. `error` is the instrument status code, 0 on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpiResponse {
    pub text: String,
    pub error: i32,
}

impl ScpiResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: 0,
        }
    }

    pub fn error(code: i32) -> Self {
        Self {
            text: String::new(),
            error: code,
        }
    }
}

/// A command or query on its way to the instrument, carrying its own reply channel.
#[derive(Debug)]
pub struct ScpiRequest {
    pub command: String,
    pub kind: ScpiRequestKind,
    responder: SyncSender<ScpiResponse>,
}

impl ScpiRequest {
    /// Completes the transaction. Returns `false` if the runtime abandoned it.
    pub fn respond(self, response: ScpiResponse) -> bool {
        self.responder.send(response).is_ok()
    }
}

/// The runtime's half of an outstanding transaction.
#[derive(Debug)]
pub struct PendingTransaction {
    receiver: Receiver<ScpiResponse>,
}

impl PendingTransaction {
    pub fn new(command: impl Into<String>, kind: ScpiRequestKind) -> (ScpiRequest, Self) {
        let (responder, receiver) = sync_channel(1);
        let request = ScpiRequest {
            command: command.into(),
            kind,
            responder,
        };
        (request, Self { receiver })
    }

    /// `Ok(None)` while the instrument is still busy. A request dropped without an
    /// answer can never complete and is reported as an error.
    pub fn poll(&self) -> Result<Option<ScpiResponse>, FlowError> {
        match self.receiver.try_recv() {
            Ok(response) => Ok(Some(response)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(FlowError::ResultUnavailable),
        }
    }
}

/// Hands requests to the instrument owner without blocking the caller.
pub trait ScpiDispatch {
    fn dispatch(&mut self, request: ScpiRequest) -> Result<(), FlowError>;
}

/// Executes transactions against an instrument. Runs on the worker thread.
pub trait ScpiTransport: Send {
    fn execute(&mut self, command: &str, kind: ScpiRequestKind) -> ScpiResponse;
}

impl<F> ScpiTransport for F
where
    F: FnMut(&str, ScpiRequestKind) -> ScpiResponse + Send,
{
    fn execute(&mut self, command: &str, kind: ScpiRequestKind) -> ScpiResponse {
        self(command, kind)
    }
}

/// Owns a transport on a background thread fed through a bounded channel.
pub struct ScpiWorker {
    tx: Option<SyncSender<ScpiRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl ScpiWorker {
    pub fn spawn<T>(transport: T, capacity: usize) -> Result<Self, FlowError>
    where
        T: ScpiTransport + 'static,
    {
        let (tx, rx) = sync_channel(capacity);
        let handle = thread::Builder::new()
            .name("scpi-worker".to_string())
            .spawn(move || run_worker(transport, rx))
            .map_err(|e| FlowError::Dispatch(format!("Failed to spawn SCPI worker: {}", e)))?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }
}

impl ScpiDispatch for ScpiWorker {
    fn dispatch(&mut self, request: ScpiRequest) -> Result<(), FlowError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| FlowError::Dispatch("SCPI worker stopped".to_string()))?;
        match tx.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::warn!("SCPI worker queue full");
                Err(FlowError::Dispatch("SCPI worker queue is full".to_string()))
            }
            Err(TrySendError::Disconnected(_)) => {
                log::error!("SCPI worker thread died");
                Err(FlowError::Dispatch("SCPI worker stopped".to_string()))
            }
        }
    }
}

impl Drop for ScpiWorker {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("SCPI worker thread panicked");
            }
        }
    }
}

fn run_worker<T: ScpiTransport>(mut transport: T, rx: Receiver<ScpiRequest>) {
    log::debug!("SCPI worker started");
    while let Ok(request) = rx.recv() {
        let response = transport.execute(&request.command, request.kind);
        if !request.respond(response) {
            log::debug!("SCPI transaction abandoned by the runtime");
        }
    }
    log::debug!("SCPI worker shutting down");
}

/// Dispatcher whose requests are completed by the host itself, typically from
/// its own event loop or from a test.
pub struct ManualDispatch {
    tx: SyncSender<ScpiRequest>,
}

impl ManualDispatch {
    pub fn new(capacity: usize) -> (Self, Receiver<ScpiRequest>) {
        let (tx, rx) = sync_channel(capacity);
        (Self { tx }, rx)
    }
}

impl ScpiDispatch for ManualDispatch {
    fn dispatch(&mut self, request: ScpiRequest) -> Result<(), FlowError> {
        self.tx.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => FlowError::Dispatch("SCPI request queue is full".to_string()),
            TrySendError::Disconnected(_) => {
                FlowError::Dispatch("SCPI request receiver dropped".to_string())
            }
        })
    }
}
