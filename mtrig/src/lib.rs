pub mod config;
pub mod metrics;
pub mod mongo;
pub mod server;
pub mod shutdown;
pub mod trigger;
pub use mongo::{Callback, ChangeEvent};
pub use server::{listen, Server as TriggerServer, WatchReport};
