//! Driver for the four-channel phase-coherent DDS board.
//!
//! The board is programmed over a 115200 baud newline-terminated ASCII link.
//! Profile switching happens on a separate real-time bus and is not handled
//! here.
//!
//! ```rust,ignore
//! use dds_driver_coherent::CoherentDdsFactory;
//!
//! registry.register_factory(Box::new(CoherentDdsFactory));
//! ```

mod coherent_dds;

pub use coherent_dds::{CoherentDds, CoherentDdsConfig, CoherentDdsFactory};
