//! In-memory change feed driven by per-operation scripts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bson::{doc, Document, RawDocumentBuf};
use tokio::sync::Notify;

use super::feed::{ChangeEvent, ChangeFeed, RawChange, Subscription, TransportError};
use super::watcher::Callback;
use crate::trigger::Operation;

pub enum Step {
    Record(RawChange),
    Fail(&'static str),
    /// Wait for the notify before moving on.
    Gate(Arc<Notify>),
    /// Never yield again.
    Hang,
}

#[derive(Clone, Default)]
pub struct ScriptedFeed {
    scripts: Arc<Mutex<HashMap<Operation, Vec<Step>>>>,
    opened: Arc<Mutex<Vec<Operation>>>,
    closed: Arc<Mutex<Vec<Operation>>>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, operation: Operation, steps: Vec<Step>) -> Self {
        self.scripts.lock().unwrap().insert(operation, steps);
        self
    }

    pub fn opened(&self) -> Vec<Operation> {
        self.opened.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<Operation> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeFeed for ScriptedFeed {
    async fn subscribe(
        &self,
        operation: Operation,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let steps = self
            .scripts
            .lock()
            .unwrap()
            .remove(&operation)
            .ok_or_else(|| format!("no change stream scripted for {operation}"))?;
        self.opened.lock().unwrap().push(operation);
        Ok(Box::new(ScriptedSubscription {
            operation,
            steps: steps.into(),
            closed: self.closed.clone(),
        }))
    }
}

/// A feed whose subscriptions never finish opening.
pub struct PendingFeed;

#[async_trait]
impl ChangeFeed for PendingFeed {
    async fn subscribe(
        &self,
        _operation: Operation,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        std::future::pending().await
    }
}

struct ScriptedSubscription {
    operation: Operation,
    steps: VecDeque<Step>,
    closed: Arc<Mutex<Vec<Operation>>>,
}

#[async_trait]
impl Subscription for ScriptedSubscription {
    async fn next(&mut self) -> Option<Result<RawChange, TransportError>> {
        loop {
            match self.steps.pop_front()? {
                Step::Record(raw) => return Some(Ok(raw)),
                Step::Fail(msg) => return Some(Err(msg.into())),
                Step::Gate(gate) => gate.notified().await,
                Step::Hang => std::future::pending::<()>().await,
            }
        }
    }

    async fn close(&mut self) {
        self.closed.lock().unwrap().push(self.operation);
    }
}

/// A well formed change document for `operation` carrying `full_document`.
pub fn change(operation: &str, full_document: Document) -> RawChange {
    let event = doc! {
        "_id": { "_data": "8263A1B2C3000000012B022C0100296E5A1004" },
        "operationType": operation,
        "ns": { "db": "db1", "coll": "users" },
        "fullDocument": full_document,
    };
    RawDocumentBuf::from_document(&event).unwrap().into()
}

/// Bytes that claim to be a 22 byte document but stop after a few.
pub fn malformed() -> RawChange {
    RawChange::from_bytes(vec![0x16, 0x00, 0x00, 0x00, 0x02, b'a'])
}

/// A callback that stores every event it receives.
pub fn recorder() -> (Callback, Arc<Mutex<Vec<ChangeEvent>>>) {
    let seen: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let callback: Callback = {
        let seen = seen.clone();
        Arc::new(move |event: ChangeEvent| seen.lock().unwrap().push(event))
    };
    (callback, seen)
}
