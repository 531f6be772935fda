//! OpenAPI -> tool mapping for restbridge.
//!
//! - [`index`]: the immutable operation index (`resolve`, `list`, `base_url`)
//! - [`request`]: pure request construction from call arguments
//! - [`auth`]: credential binding from a [`auth::SecretSource`]
//! - [`spec`]: document loading
//!
//! Nothing here sends requests; the adapter crate owns the network.

pub mod auth;
pub mod error;
pub mod index;
pub mod request;
pub mod resolver;
pub mod spec;
