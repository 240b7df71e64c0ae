pub mod config;
pub mod error;
pub mod model;
pub mod secret;
pub mod store;
pub mod view;

pub use config::Config;
pub use error::*;
pub use model::*;
pub use secret::{AesGcmCipher, SecretCipher};
pub use store::{JsonFileStore, MemoryStore, MigrationStore};
pub use view::*;
