//! In-memory media engine for tests. Records every operation and lets the
//! test script engine events (candidates, connectivity) by hand.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::engine::{
    EngineEvent, IceCandidate, MediaEngine, MediaEngineFactory, SessionDescription,
};
use crate::error::EngineError;

/// Operations a test can force to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    CreateOffer,
    CreateAnswer,
    SetLocal,
    SetRemote,
    AddCandidate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedOp {
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
    Close,
}

pub struct MockEngine {
    label: String,
    counter: AtomicU64,
    ops: Mutex<Vec<RecordedOp>>,
    failures: Mutex<HashSet<MockOp>>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
    closed: AtomicBool,
}

impl MockEngine {
    pub fn create(label: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            label: label.into(),
            counter: AtomicU64::new(0),
            ops: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
            events_tx: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
        });
        (engine, rx)
    }

    /// Push an event to whoever is pumping this engine. A no-op after close.
    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = self.events_tx.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn fail_on(&self, op: MockOp) {
        self.failures.lock().unwrap().insert(op);
    }

    pub fn ops(&self) -> Vec<RecordedOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .filter_map(|op| match op {
                RecordedOp::AddCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, op: RecordedOp) {
        self.ops.lock().unwrap().push(op);
    }

    fn check(&self, op: MockOp) -> Result<(), EngineError> {
        if self.failures.lock().unwrap().contains(&op) {
            Err(EngineError::new(format!("mock failure injected for {op:?}")))
        } else {
            Ok(())
        }
    }

    fn next_sdp(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=-\r\n", self.label, n)
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        self.check(MockOp::CreateOffer)?;
        self.record(RecordedOp::CreateOffer);
        Ok(SessionDescription::offer(self.next_sdp()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        self.check(MockOp::CreateAnswer)?;
        self.record(RecordedOp::CreateAnswer);
        Ok(SessionDescription::answer(self.next_sdp()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.check(MockOp::SetLocal)?;
        self.record(RecordedOp::SetLocal(desc));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.check(MockOp::SetRemote)?;
        self.record(RecordedOp::SetRemote(desc));
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.check(MockOp::AddCandidate)?;
        self.record(RecordedOp::AddCandidate(candidate));
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.record(RecordedOp::Close);
            // Dropping the sender ends the event pump for this engine.
            self.events_tx.lock().unwrap().take();
        }
    }
}

pub struct MockEngineFactory {
    label: String,
    engines: Mutex<Vec<Arc<MockEngine>>>,
    failures: Mutex<HashSet<MockOp>>,
}

impl MockEngineFactory {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            engines: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
        })
    }

    /// Every engine created from here on fails the given operation.
    pub fn fail_on(&self, op: MockOp) {
        self.failures.lock().unwrap().insert(op);
    }

    pub fn engines(&self) -> Vec<Arc<MockEngine>> {
        self.engines.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Arc<MockEngine>> {
        self.engines.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl MediaEngineFactory for MockEngineFactory {
    async fn create(
        &self,
    ) -> Result<(Arc<dyn MediaEngine>, mpsc::UnboundedReceiver<EngineEvent>), EngineError> {
        let (engine, rx) = MockEngine::create(self.label.clone());
        for op in self.failures.lock().unwrap().iter() {
            engine.fail_on(*op);
        }
        self.engines.lock().unwrap().push(engine.clone());
        Ok((engine, rx))
    }
}
