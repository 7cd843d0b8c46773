//! Trained artifacts: storage, model-type catalog and the persister.

pub mod persister;
pub mod postgres;
pub mod store;

pub use persister::{ArtifactPersister, PersistError};
pub use postgres::{PostgresArtifactStore, PostgresModelTypeStore};
pub use store::{ArtifactStore, InMemoryArtifactStore, InMemoryModelTypeStore, ModelTypeStore};
