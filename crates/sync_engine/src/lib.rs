//! Keeps the wearable's gesture mapping in step with the remote store and
//! tells an external endpoint whenever the operator changes it.

pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod mapping_store;
pub mod mode;
pub mod notifier;
pub mod runtime;
pub mod status;

pub use config::{load_settings, ConfigError, Settings};
pub use dispatcher::LocalExport;
pub use engine::{Clock, SystemClock};
pub use events::{EngineEvent, EngineSnapshot, StoreDocument};
pub use notifier::{DispatchError, Envelope, HttpNotifier, MissingNotifier, Notifier};
pub use runtime::{seed_default_mappings, EngineHandle, SyncEngine};
