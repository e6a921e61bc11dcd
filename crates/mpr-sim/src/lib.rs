//! MPR-6ZHMAUT Simulation Library
//!
//! This crate provides a simulated amplifier bus for exercising the zone
//! engine without physical hardware. It includes:
//!
//! - **VirtualAmplifier**: Holds the state of up to three chained units and
//!   answers request frames byte-for-byte like the hardware
//! - **run_virtual_amp_task**: Drives a `VirtualAmplifier` over any async
//!   stream, such as one end of `tokio::io::duplex`
//!
//! # Example
//!
//! ```rust
//! use mpr_protocol::{Param, Request, ZoneCode};
//! use mpr_sim::VirtualAmplifier;
//!
//! let mut amp = VirtualAmplifier::new("bus", 3);
//! let zone: ZoneCode = "11".parse().unwrap();
//!
//! let response = amp.process_request(&Request::QueryParam { zone, param: Param::VO });
//! assert!(response.unwrap().ends_with(b">11VO00\r\r\n"));
//! ```

pub mod amplifier;
pub mod amplifier_task;

pub use amplifier::VirtualAmplifier;
pub use amplifier_task::{run_virtual_amp_task, VirtualAmpCommand, VirtualAmpEvent};
