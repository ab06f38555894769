//! HTTP client for the remote encoding service.
//!
//! [`HttpEncodingService`] implements [`encbatch_core::remote::EncodingService`]
//! on top of [`reqwest`].

pub mod api;
pub mod wire;

pub use api::{ApiError, HttpEncodingService};
