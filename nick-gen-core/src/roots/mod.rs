//! Word root supply: cache, persistence and generation of roots per style.

pub mod persistence;
pub mod source;
pub mod store;

pub use persistence::{RootPersistence, YamlRootFiles};
pub use source::{LlmRootSource, RootSource};
pub use store::RootStore;
