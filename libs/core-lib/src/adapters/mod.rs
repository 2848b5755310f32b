pub mod in_memory_document_store;
pub mod in_memory_identity;
pub mod in_memory_preferences;

pub use in_memory_document_store::InMemoryDocumentStore;
pub use in_memory_identity::InMemoryIdentity;
pub use in_memory_preferences::InMemoryPreferences;
