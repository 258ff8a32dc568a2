use async_trait::async_trait;
use bson::{Document, RawDocumentBuf};
use thiserror::Error;

use crate::trigger::Operation;

/// A decoded change stream document, handed to the callback as is.
pub type ChangeEvent = Document;

/// Error reported by the underlying change stream transport.
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
#[error("failed to decode change event: {0}")]
pub struct DecodeError(#[from] bson::de::Error);

/// An undecoded change record as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange(Vec<u8>);

impl RawChange {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn decode(&self) -> Result<ChangeEvent, DecodeError> {
        Ok(bson::from_slice(&self.0)?)
    }
}

impl From<RawDocumentBuf> for RawChange {
    fn from(doc: RawDocumentBuf) -> Self {
        Self(doc.into_bytes())
    }
}

/// Source of change subscriptions for one collection.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a subscription that only yields `operation` changes, with the
    /// full post-change document looked up for updates.
    async fn subscribe(
        &self,
        operation: Operation,
    ) -> Result<Box<dyn Subscription>, TransportError>;
}

/// A live, ordered feed of raw change records.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next record.
    ///
    /// `None` means the feed ended cleanly, `Some(Err(_))` that it failed.
    async fn next(&mut self) -> Option<Result<RawChange, TransportError>>;

    /// Release server side resources. Called exactly once by the watcher.
    async fn close(&mut self);
}
