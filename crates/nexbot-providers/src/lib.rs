//! Language-model provider abstraction and the OpenAI-compatible HTTP
//! implementation.

pub mod http_provider;
pub mod registry;
pub mod traits;

pub use http_provider::HttpProvider;
pub use registry::{create_provider, lookup_spec, ProviderSpec};
pub use traits::{ChatRequest, Provider, ProviderError};
