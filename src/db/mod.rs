mod articles;
mod dedup;
mod leases;
mod pairs;
mod repository;
mod schema;

pub use dedup::{ArticleStore, TargetStore};
pub use leases::LeaseCheck;
pub use pairs::PairWrite;
pub use repository::Repository;

#[cfg(test)]
pub(crate) use repository::tests::temp_repository;
