pub mod server_registry;

pub use server_registry::ServerRegistry;
