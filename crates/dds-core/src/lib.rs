//! Core types and traits for the coherent DDS control stack.
//!
//! - [`words`]: frequency/phase/amplitude word codec
//! - [`pulse_shape`]: envelope tables for the pulse-enable line
//! - [`timing`]: profile-select bus timing and control words
//! - [`capabilities`]: async traits implemented by drivers
//! - [`driver`]: factory plugin API used by the device registry
//! - [`serial`]: shared serial port helpers
//! - [`error`]: the [`DdsError`](error::DdsError) taxonomy

pub mod capabilities;
pub mod driver;
pub mod error;
pub mod pulse_shape;
pub mod serial;
pub mod timing;
pub mod words;

pub use error::{DdsError, DdsResult};
pub use words::{ProfileWords, WordCodec};
