pub mod common;
pub mod resources;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::AdapterError;
pub type Result<T> = std::result::Result<T, Error>;

pub type Map<K, V> = hashbrown::HashMap<K, V>;

pub const ADAPTER_VERSION: &str = env!("CARGO_PKG_VERSION");
