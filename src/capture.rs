// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Still-frame capture.
//!
//! A capture walks one channel through
//! `Idle -> Frozen -> PointerRead -> DataMapped -> Extracted -> Unfrozen`:
//!
//! 1. map the control window over the register block and write the channel's
//!    freeze register, which pins the frame buffer;
//! 2. read the image pointer register;
//! 3. map a read-only data window at that pointer;
//! 4. copy the length-prefixed payload out of it;
//! 5. write the unfreeze register and release both windows.
//!
//! Once the control window exists, the unfreeze write is attempted on every
//! exit path, so a failed capture never leaves the channel frozen.

use crate::{
    error::{CaptureError, Result},
    lock::{ChannelLocks, ChannelToken},
    memory::{page_base, Access, PhysicalMemory, Window},
    region::{MappedRegion, PAYLOAD_HEADER_OFFSET},
    registers::{ChannelRegisters, RegisterLayout},
};
use serde::Deserialize;
use std::{fmt, fs::File, io::BufReader, path::Path, sync::Arc, time::Instant};
use tracing::{debug, error, info, warn};

/// Default upper bound of a single frame payload.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Capture parameters of one hardware variant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub layout: RegisterLayout,
    /// Offset of the payload from the frame descriptor.
    pub header_offset: usize,
    /// Largest payload accepted, in bytes.
    pub max_frame_size: usize,
    /// Length of the control window; one page when unset.
    pub control_window_len: Option<usize>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            layout: RegisterLayout::default(),
            header_offset: PAYLOAD_HEADER_OFFSET,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            control_window_len: None,
        }
    }
}

impl CaptureConfig {
    /// Loads a JSON hardware profile.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| CaptureError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;
        if self.max_frame_size == 0 {
            return Err(CaptureError::config("max frame size must be non-zero"));
        }
        if self.control_window_len == Some(0) {
            return Err(CaptureError::config("control window length must be non-zero"));
        }
        Ok(())
    }

    /// Bytes to map for the data window of a frame at `in_page` bytes into
    /// its page.
    fn data_window_len(&self, in_page: usize) -> Result<usize> {
        in_page
            .checked_add(self.header_offset)
            .and_then(|len| len.checked_add(self.max_frame_size))
            .ok_or_else(|| CaptureError::config("data window length overflows"))
    }
}

/// Protocol state of a capture, used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Frozen,
    PointerRead,
    DataMapped,
    Extracted,
    Unfrozen,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::Frozen => "frozen",
            CaptureState::PointerRead => "pointer-read",
            CaptureState::DataMapped => "data-mapped",
            CaptureState::Extracted => "extracted",
            CaptureState::Unfrozen => "unfrozen",
        };
        f.write_str(name)
    }
}

/// A captured still frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    channel: u32,
    address: u64,
    data: Vec<u8>,
}

impl Frame {
    pub fn channel(&self) -> u32 {
        self.channel
    }

    /// Physical address the image pointer register held.
    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "channel {} frame at {:#010x} ({} bytes)",
            self.channel,
            self.address,
            self.data.len()
        )
    }
}

/// Holds the control window while a channel is frozen and writes the
/// unfreeze register when dropped unless [`thaw`](Self::thaw) already did.
struct FreezeGuard<W: Window> {
    control: MappedRegion<W>,
    regs: ChannelRegisters,
    frozen: bool,
}

impl<W: Window> FreezeGuard<W> {
    fn new(control: MappedRegion<W>, regs: ChannelRegisters) -> Self {
        Self {
            control,
            regs,
            frozen: false,
        }
    }

    fn freeze(&mut self) -> Result<()> {
        // A failed write may still have reached the device.
        self.frozen = true;
        self.control.try_poke(self.regs.freeze, 0)
    }

    fn image_pointer(&self) -> Result<u64> {
        self.control.try_peek(self.regs.image_pointer).map(u64::from)
    }

    fn thaw(&mut self) -> Result<()> {
        self.frozen = false;
        self.control.try_poke(self.regs.unfreeze, 0)
    }
}

impl<W: Window> Drop for FreezeGuard<W> {
    fn drop(&mut self) {
        if !self.frozen {
            return;
        }
        match self.thaw() {
            Ok(()) => warn!("channel {} unfrozen after aborted capture", self.regs.channel),
            Err(err) => error!(
                "channel {} may be left frozen, unfreeze failed: {err}",
                self.regs.channel
            ),
        }
    }
}

/// Grabs still frames from capture channels through a [`PhysicalMemory`].
///
/// # Example
///
/// ```no_run
/// use fpga_framegrab::{Access, CaptureConfig, DevMem, FrameGrabber};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mem = DevMem::open("/dev/mem", Access::ReadWrite)?;
/// let grabber = FrameGrabber::new(mem, CaptureConfig::default())?;
/// let frame = grabber.capture(1)?;
/// std::fs::write("frame.jpeg", frame.as_bytes())?;
/// # Ok(())
/// # }
/// ```
pub struct FrameGrabber<M: PhysicalMemory> {
    memory: M,
    config: CaptureConfig,
    locks: Arc<ChannelLocks>,
}

impl<M: PhysicalMemory> FrameGrabber<M> {
    pub fn new(memory: M, config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            memory,
            config,
            locks: ChannelLocks::new(),
        })
    }

    /// Shares channel ownership with other grabbers using the same registry.
    pub fn with_locks(mut self, locks: Arc<ChannelLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &Arc<ChannelLocks> {
        &self.locks
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Captures one frame, waiting for the channel if another capture owns it.
    pub fn capture(&self, channel: u32) -> Result<Frame> {
        let token = self.locks.acquire(channel);
        self.capture_with(&token)
    }

    /// Captures one frame, failing with [`CaptureError::ChannelBusy`] if the
    /// channel is owned elsewhere.
    pub fn try_capture(&self, channel: u32) -> Result<Frame> {
        let token = self.locks.try_acquire(channel)?;
        self.capture_with(&token)
    }

    fn control_window(&self) -> (u64, usize) {
        let base = self.config.layout.base_address;
        let len = self
            .config
            .control_window_len
            .unwrap_or(self.memory.page_size() as usize);
        (base, len)
    }

    /// Rejects channels whose registers fall outside the control window
    /// before anything is mapped.
    fn check_channel(&self, regs: &ChannelRegisters) -> Result<()> {
        let (base, len) = self.control_window();
        let start = page_base(base, self.memory.page_size());
        let end = start.saturating_add(len as u64);
        for address in [regs.freeze, regs.unfreeze, regs.image_pointer] {
            if address < start || address.saturating_add(4) > end {
                return Err(CaptureError::config(format!(
                    "channel {} register {address:#010x} is outside the control window",
                    regs.channel
                )));
            }
        }
        Ok(())
    }

    fn capture_with(&self, token: &ChannelToken) -> Result<Frame> {
        let regs = self.config.layout.channel(token.channel());
        self.check_channel(&regs)?;

        let now = Instant::now();
        let mut state = CaptureState::Idle;
        let result = self.run(regs, &mut state);
        match &result {
            Ok(frame) => info!("captured {} in {:?}", frame, now.elapsed()),
            Err(err) => warn!(
                "capture on channel {} aborted after {state}: {err}",
                regs.channel
            ),
        }
        result
    }

    fn run(&self, regs: ChannelRegisters, state: &mut CaptureState) -> Result<Frame> {
        let (base, len) = self.control_window();
        let control = MappedRegion::open(&self.memory, base, len, Access::ReadWrite)?;
        let mut guard = FreezeGuard::new(control, regs);

        guard.freeze()?;
        *state = CaptureState::Frozen;
        debug!("channel {} {state}", regs.channel);

        let pointer = guard.image_pointer()?;
        *state = CaptureState::PointerRead;
        debug!("channel {} {state}: frame at {pointer:#010x}", regs.channel);

        let in_page = (pointer - page_base(pointer, self.memory.page_size())) as usize;
        let data_len = self.config.data_window_len(in_page)?;
        let data = MappedRegion::open(&self.memory, pointer, data_len, Access::ReadOnly)?
            .with_header_offset(self.config.header_offset);
        *state = CaptureState::DataMapped;
        debug!("channel {} {state}", regs.channel);

        let payload = data.read_payload(pointer, self.config.max_frame_size)?;
        *state = CaptureState::Extracted;
        debug!("channel {} {state}: {} bytes", regs.channel, payload.len());

        guard.thaw()?;
        *state = CaptureState::Unfrozen;
        debug!("channel {} {state}", regs.channel);
        drop(data);
        drop(guard);

        Ok(Frame {
            channel: regs.channel,
            address: pointer,
            data: payload,
        })
    }
}
