pub mod client;
pub mod config;
pub mod fetch;
pub mod metadata;
pub mod mirror;
pub mod names;
pub mod rpc;
pub mod runtime;
pub mod sync;

#[cfg(test)]
mod mock;
