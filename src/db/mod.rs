

pub mod json_store;
pub mod models;
pub mod store;

pub use json_store::{JsonNodeStore, normalize_documents};
pub use models::{Attribute, NodeRecord};
pub use store::{InMemoryNodeStore, NodeStore, StoreError};
