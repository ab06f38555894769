//! Core domain for batch encoding runs.
//!
//! Holds the job model, the retry policy, the [`JobDispatcher`] state
//! machine and the [`EncodingService`] seam through which all remote
//! communication flows. Nothing in this crate performs network I/O.
//!
//! [`JobDispatcher`]: dispatcher::JobDispatcher
//! [`EncodingService`]: remote::EncodingService

pub mod dispatcher;
pub mod error;
pub mod job;
pub mod poll;
pub mod remote;
pub mod retry;
pub mod summary;
pub mod types;
