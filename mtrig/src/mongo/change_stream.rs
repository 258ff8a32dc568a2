use async_trait::async_trait;
use bson::{doc, Document, RawDocumentBuf};
use futures_util::stream::StreamExt;
use mongodb::{change_stream::ChangeStream, options::FullDocumentType, Collection};
use tracing::debug;

use super::feed::{ChangeFeed, RawChange, Subscription, TransportError};
use crate::trigger::Operation;

/// [`ChangeFeed`] backed by MongoDB change streams on a single collection.
///
/// Each subscription is its own server side cursor. The collection handle is
/// shared, cloning it only clones the underlying client reference.
#[derive(Clone, Debug)]
pub struct MongoFeed {
    collection: Collection<Document>,
}

impl MongoFeed {
    pub fn new(collection: Collection<Document>) -> Self {
        Self { collection }
    }

    fn pipeline(operation: Operation) -> [Document; 1] {
        [doc! { "$match": { "operationType": operation.as_str() } }]
    }
}

#[async_trait]
impl ChangeFeed for MongoFeed {
    async fn subscribe(
        &self,
        operation: Operation,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let stream = self
            .collection
            .watch()
            .pipeline(Self::pipeline(operation))
            .full_document(FullDocumentType::UpdateLookup)
            .await?
            // Decoding is done per record by the watcher so that one bad
            // document does not look like a broken stream.
            .with_type::<RawDocumentBuf>();
        debug!(
            db = %self.collection.namespace().db,
            coll = %self.collection.name(),
            %operation,
            "Opened change stream"
        );
        Ok(Box::new(MongoSubscription {
            stream: Some(stream),
        }))
    }
}

struct MongoSubscription {
    stream: Option<ChangeStream<RawDocumentBuf>>,
}

#[async_trait]
impl Subscription for MongoSubscription {
    async fn next(&mut self) -> Option<Result<RawChange, TransportError>> {
        let stream = self.stream.as_mut()?;
        stream
            .next()
            .await
            .map(|res| res.map(RawChange::from).map_err(Into::into))
    }

    async fn close(&mut self) {
        // Dropping the stream kills the cursor on the server.
        self.stream.take();
    }
}
