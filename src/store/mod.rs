//! Storage seams: the async traits the subsystem is written against and the
//! in-memory implementations used by tests and the demo.

pub mod local;
pub mod remote;

pub use local::{LocalStore, MemoryLocalStore, UpdateFn, QUEUE_KEY, SNAPSHOT_KEY};
pub use remote::{MemoryRemoteStore, RemoteStore};
