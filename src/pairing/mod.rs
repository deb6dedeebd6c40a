mod engine;
mod lock;
mod scorer;

pub use engine::PairEngine;
pub use lock::{NamedLock, SqliteLeaseLock};
pub use scorer::BiasScorer;
