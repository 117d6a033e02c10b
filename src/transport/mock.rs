//! Mock transport for testing the protocol engine without hardware.
//!
//! Provides:
//! - Scripted reply lines, handed out one per `read_line` call
//! - An ordered operation log for verifying framing and lock discipline
//! - Controllable failure injection
//! - An optional read hook for steering tests (e.g. cancelling a sequence
//!   the moment a particular reply is observed)

use crate::error::{AppResult, ScanError};
use crate::transport::ByteTransport;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type ReadHook = Box<dyn Fn(&str) + Send + Sync>;

/// One entry of the mock's operation log, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    Write(Vec<u8>),
    Read(String),
}

/// Scripted in-memory transport.
///
/// # Example
///
/// ```
/// use scandaq::transport::{ByteTransport, MockTransport};
///
/// # tokio_test::block_on(async {
/// let transport = MockTransport::new();
/// transport.push_response("F");
/// transport.open().await.unwrap();
/// assert_eq!(transport.read_line().await.unwrap(), "F");
/// // Script exhausted: further reads time out (empty line).
/// assert_eq!(transport.read_line().await.unwrap(), "");
/// # })
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    open: Arc<AtomicBool>,
    fail_next: Arc<AtomicBool>,
    responses: Arc<Mutex<VecDeque<String>>>,
    ops: Arc<Mutex<Vec<TransportOp>>>,
    read_hook: Arc<Mutex<Option<ReadHook>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that already reports open.
    pub fn opened() -> Self {
        let transport = Self::new();
        transport.open.store(true, Ordering::SeqCst);
        transport
    }

    /// Queue one reply line for a future `read_line`.
    pub fn push_response(&self, line: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(line.into());
    }

    /// Queue several reply lines at once.
    pub fn push_responses<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut queue = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        for line in lines {
            queue.push_back(line.into());
        }
    }

    /// Reply lines not yet consumed by `read_line`.
    pub fn remaining_responses(&self) -> Vec<String> {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Trigger a failure on the next write or read.
    pub fn trigger_failure(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Install a hook invoked with every line `read_line` hands out.
    pub fn set_read_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        let mut slot = self.read_hook.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Box::new(hook));
    }

    /// Copy of the ordered operation log.
    pub fn ops(&self) -> Vec<TransportOp> {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Bytes of every write, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|op| match op {
                TransportOp::Write(bytes) => Some(bytes.clone()),
                TransportOp::Read(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl ByteTransport for MockTransport {
    async fn open(&self) -> AppResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ScanError::Transport("mock open failure".to_string()));
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    async fn write_bytes(&self, bytes: &[u8]) -> AppResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ScanError::Transport("mock write failure".to_string()));
        }
        if !self.is_open() {
            return Err(ScanError::PortNotOpen);
        }
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TransportOp::Write(bytes.to_vec()));
        Ok(())
    }

    async fn read_line(&self) -> AppResult<String> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ScanError::Transport("mock read failure".to_string()));
        }
        if !self.is_open() {
            return Err(ScanError::PortNotOpen);
        }
        let line = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default();
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TransportOp::Read(line.clone()));
        let hook = self.read_hook.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hook) = hook.as_ref() {
            hook(&line);
        }
        Ok(line)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
