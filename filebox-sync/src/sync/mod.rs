pub mod detector;
pub mod engine;
pub mod local;
pub mod paths;
pub mod remote;
pub mod report;
pub mod watch;

pub use engine::{EngineError, SyncEngine, SyncMode};
pub use report::SyncResult;
