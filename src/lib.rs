// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # FPGA Frame Grabber Library
//!
//! This library extracts a single still image from a video capture pipeline
//! whose control registers and frame buffers live in the physical address
//! space of an FPGA/SoC, reached through a physical-memory device such as
//! `/dev/mem`.
//!
//! ## Features
//!
//! - **Register Addressing**: Per-channel freeze, unfreeze and image pointer
//!   registers computed from a configurable [`RegisterLayout`].
//! - **Mapped Regions**: Page-aligned windows of physical memory with
//!   bounds-checked word access and length-prefixed payload extraction.
//! - **Freeze Handshake**: Channels are frozen for the duration of a capture
//!   and always unfrozen again, including when the capture fails.
//! - **Channel Ownership**: Per-channel tokens keep concurrent captures from
//!   interleaving their handshakes.
//!
//! ## Example
//!
//! ```no_run
//! use fpga_framegrab::{cgi, Access, CaptureConfig, DevMem, FrameGrabber};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mem = DevMem::open("/dev/mem", Access::ReadWrite)?;
//! let grabber = FrameGrabber::new(mem, CaptureConfig::default())?;
//!
//! let frame = grabber.capture(1)?;
//! cgi::write_response(&mut std::io::stdout(), frame.as_bytes(), true)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Requirements
//!
//! - **Linux**: `/dev/mem` access (root or `CAP_SYS_RAWIO`) and a kernel
//!   that permits mapping the capture address range.
//!
//! ## Safety
//!
//! `unsafe` is confined to [`memory`], which wraps `mmap(2)` / `munmap(2)`
//! and the volatile accesses into the mapped window behind bounds-checked
//! methods.

pub mod capture;
pub mod cgi;
pub mod error;
pub mod lock;
pub mod memory;
pub mod region;
pub mod registers;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use capture::{CaptureConfig, CaptureState, Frame, FrameGrabber};
pub use error::{CaptureError, Result};
pub use lock::{ChannelLocks, ChannelToken};
pub use memory::{Access, DevMem, PhysicalMemory, Window};
pub use region::MappedRegion;
pub use registers::{ChannelRegisters, RegisterLayout};
