//! Outbound HTTP plumbing and response shaping for restbridge.
//!
//! - [`client`]: request/response values and the [`client::OutboundClient`] seam
//! - [`response_shaping`]: direct / query / template shaping of upstream bodies
//! - [`query`] and [`template`]: the two small languages behind shaping

pub mod client;
pub mod query;
pub mod response_shaping;
pub mod template;
