//! Capability providers for Scholarly.
//!
//! Remote providers are reached over MCP (streamable HTTP); local ones are
//! plain async closures. [`CapabilityLoader`] merges every configured
//! provider into one [`scholarly_core::CapabilityRegistry`] at startup.

pub mod loader;
pub mod local;
pub mod mcp;
pub mod schema;

pub use loader::{CapabilityLoader, ProviderReport};
pub use local::LocalCapability;
pub use mcp::{McpCapability, McpClient, RemoteTool};
