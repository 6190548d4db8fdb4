mod server;

pub use server::{DatabaseLocation, ModuleHosting, ServerConfig, StorageBackendKind};
