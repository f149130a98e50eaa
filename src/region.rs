// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! A single page-aligned window of physical memory.

use crate::{
    error::{CaptureError, Result},
    memory::{page_base, Access, PhysicalMemory, Window},
};
use tracing::{debug, warn};

/// Byte offset of the payload from the start of a frame descriptor.
pub const PAYLOAD_HEADER_OFFSET: usize = 0x80;

/// Owns one mapping of physical memory.
///
/// The mapping starts at the page containing the requested address, and all
/// accesses take physical addresses which are translated to offsets from that
/// page base. A region whose mapping failed still exists when created through
/// [`MappedRegion::map`]: its soft accessors ([`peek`](Self::peek),
/// [`poke`](Self::poke)) then degrade to `0` and no-op, so callers that care
/// must check [`is_mapped`](Self::is_mapped) or use the `try_` variants.
#[derive(Debug)]
pub struct MappedRegion<W: Window> {
    requested: u64,
    page_base: u64,
    len: usize,
    access: Access,
    header_offset: usize,
    window: Option<W>,
}

impl<W: Window> MappedRegion<W> {
    /// Maps `len` bytes from the page containing `address`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Map`] when the underlying mapping call fails.
    pub fn open<M>(memory: &M, address: u64, len: usize, access: Access) -> Result<Self>
    where
        M: PhysicalMemory<Window = W> + ?Sized,
    {
        let base = page_base(address, memory.page_size());
        let window = memory
            .map(base, len, access)
            .map_err(|source| CaptureError::Map {
                address: base,
                len,
                source,
            })?;
        debug!("region {address:#010x} mapped from page {base:#010x} len {len:#x}");
        Ok(Self {
            requested: address,
            page_base: base,
            len,
            access,
            header_offset: PAYLOAD_HEADER_OFFSET,
            window: Some(window),
        })
    }

    /// Like [`open`](Self::open) but keeps an unmapped region on failure.
    pub fn map<M>(memory: &M, address: u64, len: usize, access: Access) -> Self
    where
        M: PhysicalMemory<Window = W> + ?Sized,
    {
        Self::open(memory, address, len, access).unwrap_or_else(|err| {
            warn!("{err}");
            Self {
                requested: address,
                page_base: page_base(address, memory.page_size()),
                len,
                access,
                header_offset: PAYLOAD_HEADER_OFFSET,
                window: None,
            }
        })
    }

    /// Overrides the payload header offset used by the payload readers.
    pub fn with_header_offset(mut self, header_offset: usize) -> Self {
        self.header_offset = header_offset;
        self
    }

    pub fn is_mapped(&self) -> bool {
        self.window.is_some()
    }

    pub fn page_base(&self) -> u64 {
        self.page_base
    }

    pub fn requested_address(&self) -> u64 {
        self.requested
    }

    /// Offset of the requested address inside its page.
    pub fn in_page_offset(&self) -> usize {
        (self.requested - self.page_base) as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn header_offset(&self) -> usize {
        self.header_offset
    }

    /// Translates `[address, address + width)` to a window offset.
    pub fn offset_of(&self, address: u64, width: usize) -> Result<usize> {
        let outside = || CaptureError::OutOfWindow { address, width };
        let offset = address.checked_sub(self.page_base).ok_or_else(outside)?;
        let end = offset.checked_add(width as u64).ok_or_else(outside)?;
        if end > self.len as u64 {
            return Err(outside());
        }
        Ok(offset as usize)
    }

    fn window(&self, address: u64) -> Result<&W> {
        self.window
            .as_ref()
            .ok_or(CaptureError::UnmappedAccess { address })
    }

    /// Reads the 32-bit word at physical `address`.
    pub fn try_peek(&self, address: u64) -> Result<u32> {
        let window = self.window(address)?;
        let offset = self.offset_of(address, 4)?;
        window
            .read_u32(offset)
            .ok_or(CaptureError::OutOfWindow { address, width: 4 })
    }

    /// Writes the 32-bit word at physical `address`.
    pub fn try_poke(&mut self, address: u64, value: u32) -> Result<()> {
        let offset = self.offset_of(address, 4);
        let window = self
            .window
            .as_mut()
            .ok_or(CaptureError::UnmappedAccess { address })?;
        window
            .write_u32(offset?, value)
            .ok_or(CaptureError::OutOfWindow { address, width: 4 })
    }

    /// Reads the word at `address`, or `0` when the access is not possible.
    pub fn peek(&self, address: u64) -> u32 {
        self.try_peek(address).unwrap_or_else(|err| {
            warn!("peek degraded to 0: {err}");
            0
        })
    }

    /// Writes the word at `address`; does nothing when the access is not
    /// possible.
    pub fn poke(&mut self, address: u64, value: u32) {
        if let Err(err) = self.try_poke(address, value) {
            warn!("poke dropped: {err}");
        }
    }

    /// Validates the length word at the start of the window and returns the
    /// window offset of the payload along with its length.
    fn payload_span(&self, address: u64, limit: usize) -> Result<(usize, usize)> {
        let window = self.window(address)?;
        let declared = window
            .read_u32(0)
            .ok_or(CaptureError::OutOfWindow {
                address: self.page_base,
                width: 4,
            })?;

        let extra = address
            .checked_sub(self.page_base)
            .ok_or(CaptureError::OutOfWindow { address, width: 0 })?;
        let start = usize::try_from(extra)
            .ok()
            .and_then(|extra| extra.checked_add(self.header_offset))
            .ok_or(CaptureError::OutOfWindow { address, width: 0 })?;
        let capacity = self.len.saturating_sub(start).min(limit);

        if declared as u64 > capacity as u64 {
            return Err(CaptureError::PayloadOverflow {
                declared: declared.into(),
                capacity: capacity as u64,
            });
        }
        Ok((start, declared as usize))
    }

    /// Reads the length-prefixed payload belonging to `address`.
    ///
    /// The length is the first word of the window; the payload itself starts
    /// at the header offset plus the in-page offset of `address`. The length
    /// is checked against `max_size` and the mapped capacity before exactly
    /// that many bytes are allocated and copied.
    pub fn read_payload(&self, address: u64, max_size: usize) -> Result<Vec<u8>> {
        let (start, len) = self.payload_span(address, max_size)?;
        let mut payload = vec![0u8; len];
        self.window(address)?
            .read_bytes(start, &mut payload)
            .ok_or(CaptureError::OutOfWindow {
                address: self.page_base + start as u64,
                width: len,
            })?;
        debug!("read {len} byte payload for {address:#010x}");
        Ok(payload)
    }

    /// Same as [`read_payload`](Self::read_payload) but copies into `buffer`,
    /// returning the number of bytes written.
    pub fn read_payload_into(
        &self,
        address: u64,
        max_size: usize,
        buffer: &mut [u8],
    ) -> Result<usize> {
        let (start, len) = self.payload_span(address, max_size.min(buffer.len()))?;
        self.window(address)?
            .read_bytes(start, &mut buffer[..len])
            .ok_or(CaptureError::OutOfWindow {
                address: self.page_base + start as u64,
                width: len,
            })?;
        Ok(len)
    }

    /// Releases the mapping. Calling this again, or on a region that never
    /// mapped, does nothing.
    pub fn release(&mut self) {
        if self.window.take().is_some() {
            debug!("region {:#010x} released", self.page_base);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{MemEvent, SimulatedMemory};
    use std::io;

    #[test]
    fn test_open_rounds_down() {
        let mem = SimulatedMemory::new();
        let region = MappedRegion::open(&mem, 0x4000_000C, 4096, Access::ReadOnly).unwrap();
        assert_eq!(region.page_base(), 0x4000_0000);
        assert_eq!(region.in_page_offset(), 0xC);
        assert!(region.is_mapped());
    }

    #[test]
    fn test_peek_poke_byte_offsets() {
        let mem = SimulatedMemory::new();
        mem.write_u32(0x4000_000C, 0x1800_0000);
        let mut region = MappedRegion::open(&mem, 0x4000_0000, 4096, Access::ReadWrite).unwrap();
        assert_eq!(region.peek(0x4000_000C), 0x1800_0000);
        region.poke(0x4000_0004, 0xAB);
        assert_eq!(mem.read_u32(0x4000_0004), 0xAB);
        assert_eq!(mem.read_u32(0x4000_0010), 0);
    }

    #[test]
    fn test_out_of_window() {
        let mem = SimulatedMemory::new();
        let mut region = MappedRegion::open(&mem, 0x1000, 4096, Access::ReadWrite).unwrap();
        assert!(matches!(
            region.try_peek(0x0FFC),
            Err(CaptureError::OutOfWindow { .. })
        ));
        assert!(matches!(
            region.try_peek(0x1FFE),
            Err(CaptureError::OutOfWindow { .. })
        ));
        assert!(matches!(
            region.try_poke(0x2000, 1),
            Err(CaptureError::OutOfWindow { .. })
        ));
        assert_eq!(region.peek(0x2000), 0);
        assert!(region.try_peek(0x1FFC).is_ok());
    }

    #[test]
    fn test_unmapped_region_degrades() {
        let mem = SimulatedMemory::new();
        mem.fail_map_at(0x1000, io::ErrorKind::PermissionDenied);
        let mut region = MappedRegion::map(&mem, 0x1000, 4096, Access::ReadWrite);
        assert!(!region.is_mapped());
        assert_eq!(region.peek(0x1000), 0);
        region.poke(0x1000, 5);
        assert!(matches!(
            region.try_peek(0x1000),
            Err(CaptureError::UnmappedAccess { address: 0x1000 })
        ));
        assert!(matches!(
            region.read_payload(0x1000, 16),
            Err(CaptureError::UnmappedAccess { .. })
        ));
        let mut buf = [0u8; 4];
        assert!(matches!(
            region.read_payload_into(0x1000, 4, &mut buf),
            Err(CaptureError::UnmappedAccess { .. })
        ));
        assert!(mem.events().is_empty());
    }

    #[test]
    fn test_open_failure_is_map_error() {
        let mem = SimulatedMemory::new();
        mem.fail_map_at(0x1000, io::ErrorKind::PermissionDenied);
        let err = MappedRegion::open(&mem, 0x1008, 4096, Access::ReadWrite).unwrap_err();
        match err {
            CaptureError::Map {
                address, source, ..
            } => {
                assert_eq!(address, 0x1000);
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_payload() {
        let mem = SimulatedMemory::new();
        mem.write_u32(0x1800_0000, 16);
        mem.write_bytes(0x1800_0080, &[0xFF; 16]);
        mem.write_bytes(0x1800_0090, &[0x11; 16]);
        let region = MappedRegion::open(&mem, 0x1800_0000, 8192, Access::ReadOnly).unwrap();
        for max in [16, 17, 4096] {
            assert_eq!(region.read_payload(0x1800_0000, max).unwrap(), vec![0xFF; 16]);
        }
    }

    #[test]
    fn test_payload_uses_in_page_offset() {
        let mem = SimulatedMemory::new();
        mem.write_u32(0x1800_0000, 4);
        mem.write_bytes(0x1800_0080 + 0x20, &[1, 2, 3, 4]);
        let region = MappedRegion::open(&mem, 0x1800_0020, 4096, Access::ReadOnly).unwrap();
        assert_eq!(region.read_payload(0x1800_0020, 64).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_payload_exceeds_window() {
        let mem = SimulatedMemory::new();
        mem.write_u32(0x1800_0000, 4096);
        let region = MappedRegion::open(&mem, 0x1800_0000, 4096, Access::ReadOnly).unwrap();
        let err = region.read_payload(0x1800_0000, usize::MAX).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::PayloadOverflow {
                declared: 4096,
                capacity: 3968
            }
        ));
        assert!(!mem
            .events()
            .iter()
            .any(|e| matches!(e, MemEvent::Copy { .. })));
    }

    #[test]
    fn test_payload_exceeds_max_size() {
        let mem = SimulatedMemory::new();
        mem.write_u32(0, 100);
        let region = MappedRegion::open(&mem, 0, 4096, Access::ReadOnly).unwrap();
        assert!(matches!(
            region.read_payload(0, 99),
            Err(CaptureError::PayloadOverflow {
                declared: 100,
                capacity: 99
            })
        ));
    }

    #[test]
    fn test_payload_into_buffer() {
        let mem = SimulatedMemory::new();
        mem.write_u32(0, 8);
        mem.write_bytes(0x80, b"abcdefgh");
        let region = MappedRegion::open(&mem, 0, 4096, Access::ReadOnly).unwrap();

        let mut buf = [0u8; 12];
        assert_eq!(region.read_payload_into(0, 64, &mut buf).unwrap(), 8);
        assert_eq!(&buf[..8], b"abcdefgh");
        assert_eq!(&buf[8..], &[0; 4]);

        let mut small = [0u8; 4];
        assert!(matches!(
            region.read_payload_into(0, 64, &mut small),
            Err(CaptureError::PayloadOverflow { declared: 8, capacity: 4 })
        ));
    }

    #[test]
    fn test_custom_header_offset() {
        let mem = SimulatedMemory::new();
        mem.write_u32(0, 2);
        mem.write_bytes(0x40, &[9, 8]);
        let region = MappedRegion::open(&mem, 0, 4096, Access::ReadOnly)
            .unwrap()
            .with_header_offset(0x40);
        assert_eq!(region.read_payload(0, 16).unwrap(), vec![9, 8]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mem = SimulatedMemory::new();
        let mut region = MappedRegion::open(&mem, 0, 4096, Access::ReadOnly).unwrap();
        region.release();
        region.release();
        drop(region);
        let unmaps = mem
            .events()
            .iter()
            .filter(|e| matches!(e, MemEvent::Unmap { .. }))
            .count();
        assert_eq!(unmaps, 1);
        assert_eq!(mem.live_mappings(), 0);

        mem.fail_map_at(0, io::ErrorKind::OutOfMemory);
        let mut failed = MappedRegion::map(&mem, 0, 4096, Access::ReadOnly);
        failed.release();
        drop(failed);
        assert_eq!(mem.live_mappings(), 0);
    }
}
