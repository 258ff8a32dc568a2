pub mod change_stream;
pub mod feed;
#[cfg(test)]
pub(crate) mod testing;
pub mod watcher;

pub use change_stream::MongoFeed;
pub use feed::{ChangeEvent, ChangeFeed, RawChange, Subscription};
pub use watcher::{Callback, Termination, Watcher};
