// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-channel register addressing.
//!
//! Every capture channel owns a block of `channel_stride` bytes starting at
//! `base_address + channel * channel_stride`. Inside that block three 32-bit
//! registers are used by the grabber:
//!
//! | Register      | Default offset | Purpose                                   |
//! |---------------|----------------|-------------------------------------------|
//! | freeze        | `0x0`          | any write stops frame-buffer updates      |
//! | unfreeze      | `0x4`          | any write resumes frame-buffer updates    |
//! | image pointer | `0xC`          | physical address of the frozen frame      |

use crate::error::{CaptureError, Result};
use serde::Deserialize;

/// Default physical base address of the capture register block.
pub const DEFAULT_BASE_ADDRESS: u64 = 0x4000_0000;

/// Default byte stride between two channels.
pub const DEFAULT_CHANNEL_STRIDE: u64 = 0x10;

/// Register map of one hardware variant.
///
/// Loaded from a JSON profile so that other bitstreams can be served
/// without rebuilding. Missing fields take the defaults of the reference
/// design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegisterLayout {
    pub base_address: u64,
    pub freeze_offset: u64,
    pub unfreeze_offset: u64,
    pub pointer_offset: u64,
    pub channel_stride: u64,
}

impl Default for RegisterLayout {
    fn default() -> Self {
        Self {
            base_address: DEFAULT_BASE_ADDRESS,
            freeze_offset: 0x0,
            unfreeze_offset: 0x4,
            pointer_offset: 0xC,
            channel_stride: DEFAULT_CHANNEL_STRIDE,
        }
    }
}

/// The three control addresses derived for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRegisters {
    pub channel: u32,
    pub freeze: u64,
    pub unfreeze: u64,
    pub image_pointer: u64,
}

impl RegisterLayout {
    /// Start of the register block belonging to `channel`.
    pub fn channel_base(&self, channel: u32) -> u64 {
        self.base_address
            .wrapping_add(u64::from(channel).wrapping_mul(self.channel_stride))
    }

    pub fn freeze(&self, channel: u32) -> u64 {
        self.channel_base(channel).wrapping_add(self.freeze_offset)
    }

    pub fn unfreeze(&self, channel: u32) -> u64 {
        self.channel_base(channel).wrapping_add(self.unfreeze_offset)
    }

    pub fn image_pointer(&self, channel: u32) -> u64 {
        self.channel_base(channel).wrapping_add(self.pointer_offset)
    }

    /// Computes all control addresses for `channel`.
    ///
    /// Channels beyond what the bitstream implements are not detected here;
    /// they simply address whatever follows the register block.
    pub fn channel(&self, channel: u32) -> ChannelRegisters {
        ChannelRegisters {
            channel,
            freeze: self.freeze(channel),
            unfreeze: self.unfreeze(channel),
            image_pointer: self.image_pointer(channel),
        }
    }

    /// Checks that the layout describes non-overlapping, word aligned
    /// registers that stay inside one channel block.
    pub fn validate(&self) -> Result<()> {
        if self.channel_stride == 0 || self.channel_stride % 4 != 0 {
            return Err(CaptureError::config(format!(
                "channel stride {:#x} must be a non-zero multiple of 4",
                self.channel_stride
            )));
        }

        let offsets = [
            ("freeze", self.freeze_offset),
            ("unfreeze", self.unfreeze_offset),
            ("pointer", self.pointer_offset),
        ];
        for (name, offset) in offsets {
            if offset % 4 != 0 {
                return Err(CaptureError::config(format!(
                    "{name} offset {offset:#x} is not word aligned"
                )));
            }
            if offset.checked_add(4).map_or(true, |end| end > self.channel_stride) {
                return Err(CaptureError::config(format!(
                    "{name} offset {offset:#x} does not fit in a {:#x} byte channel block",
                    self.channel_stride
                )));
            }
        }

        if self.freeze_offset == self.unfreeze_offset
            || self.freeze_offset == self.pointer_offset
            || self.unfreeze_offset == self.pointer_offset
        {
            return Err(CaptureError::config(
                "freeze, unfreeze and pointer offsets must be distinct",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_zero() {
        let regs = RegisterLayout::default().channel(0);
        assert_eq!(regs.freeze, 0x4000_0000);
        assert_eq!(regs.unfreeze, 0x4000_0004);
        assert_eq!(regs.image_pointer, 0x4000_000C);
    }

    #[test]
    fn test_offsets_per_channel() {
        let layout = RegisterLayout::default();
        for ch in [0, 1, 2, 7, 255, 4096] {
            let base = layout.channel_base(ch);
            let regs = layout.channel(ch);
            assert_eq!(base, 0x4000_0000 + u64::from(ch) * 0x10);
            assert_eq!(regs.freeze - base, 0x0);
            assert_eq!(regs.unfreeze - base, 0x4);
            assert_eq!(regs.image_pointer - base, 0xC);
        }
    }

    #[test]
    fn test_freeze_addresses_unique() {
        let layout = RegisterLayout::default();
        let mut seen = std::collections::HashSet::new();
        for ch in 0..1024 {
            assert!(seen.insert(layout.freeze(ch)), "duplicate for {ch}");
        }
    }

    #[test]
    fn test_custom_layout() {
        let layout = RegisterLayout {
            base_address: 0x43C0_0000,
            freeze_offset: 0x8,
            unfreeze_offset: 0xC,
            pointer_offset: 0x10,
            channel_stride: 0x20,
        };
        layout.validate().unwrap();
        let regs = layout.channel(3);
        assert_eq!(regs.freeze, 0x43C0_0068);
        assert_eq!(regs.unfreeze, 0x43C0_006C);
        assert_eq!(regs.image_pointer, 0x43C0_0070);
    }

    #[test]
    fn test_validate() {
        assert!(RegisterLayout::default().validate().is_ok());

        let unaligned = RegisterLayout {
            unfreeze_offset: 0x6,
            ..Default::default()
        };
        assert!(unaligned.validate().is_err());

        let overlapping = RegisterLayout {
            pointer_offset: 0x4,
            ..Default::default()
        };
        assert!(overlapping.validate().is_err());

        let outside = RegisterLayout {
            pointer_offset: 0x10,
            ..Default::default()
        };
        assert!(outside.validate().is_err());

        let zero = RegisterLayout {
            channel_stride: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_validate_offset_near_max() {
        let pointer = RegisterLayout {
            pointer_offset: u64::MAX - 3,
            ..Default::default()
        };
        assert!(matches!(pointer.validate(), Err(CaptureError::Config(_))));

        let layout: RegisterLayout =
            serde_json::from_str(r#"{ "freeze_offset": 18446744073709551612 }"#).unwrap();
        assert!(matches!(layout.validate(), Err(CaptureError::Config(_))));
    }

    #[test]
    fn test_partial_json() {
        let layout: RegisterLayout =
            serde_json::from_str(r#"{ "base_address": 1073741824, "channel_stride": 32 }"#)
                .unwrap();
        assert_eq!(layout.base_address, 0x4000_0000);
        assert_eq!(layout.channel_stride, 0x20);
        assert_eq!(layout.pointer_offset, 0xC);
    }
}
