//! Document persistence behind one contract, with a local filesystem backend
//! and a remote document-library backend.

pub mod cloud;
pub mod error;
pub mod local;
pub mod store;

pub use cloud::{
    CloudDocumentStore, CloudTarget, DriveItem, EnvSettings, NoSettings, SettingsSource,
    StaticSettings, StaticToken, TokenProvider,
};
pub use error::{StorageError, StorageResult};
pub use local::LocalFileStorage;
pub use store::{DocumentContent, DocumentStore, NewDocument};
