// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Physical-memory access.
//!
//! The grabber never opens `/dev/mem` on its own; it is handed something that
//! implements [`PhysicalMemory`]. [`DevMem`] maps a device node (or any file
//! standing in for one) with `mmap(2)`, while [`crate::sim::SimulatedMemory`]
//! provides an in-process address space for tests.

use crate::error::{CaptureError, Result};
use libc::{c_void, mmap, munmap, off_t, MAP_FAILED, MAP_SHARED, PROT_READ, PROT_WRITE};
use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::{fs::OpenOptionsExt, io::AsRawFd},
    path::{Path, PathBuf},
    ptr::{self, NonNull},
};
use tracing::{debug, warn};

/// Page size assumed when the platform refuses to report one.
pub const FALLBACK_PAGE_SIZE: u64 = 4096;

/// Access mode of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

impl Access {
    fn prot(self) -> libc::c_int {
        match self {
            Access::ReadOnly => PROT_READ,
            Access::ReadWrite => PROT_READ | PROT_WRITE,
        }
    }

    pub fn is_writable(self) -> bool {
        self == Access::ReadWrite
    }
}

/// Returns the platform page size.
pub fn system_page_size() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        warn!("sysconf(_SC_PAGESIZE) failed, assuming {FALLBACK_PAGE_SIZE}");
        return FALLBACK_PAGE_SIZE;
    }
    size as u64
}

/// Rounds `address` down to the start of its page. `page_size` must be a
/// power of two.
pub const fn page_base(address: u64, page_size: u64) -> u64 {
    address & !(page_size - 1)
}

/// A live mapping of physical memory, addressed by byte offset from the
/// page base it was mapped at.
///
/// Implementations check every access against the mapped length and the
/// access mode; a rejected access returns `None` and touches nothing.
pub trait Window {
    /// Mapped length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn access(&self) -> Access;

    /// Reads the word at `offset`, which must be 4-byte aligned.
    fn read_u32(&self, offset: usize) -> Option<u32>;

    /// Writes the word at `offset`, which must be 4-byte aligned.
    fn write_u32(&mut self, offset: usize, value: u32) -> Option<()>;

    /// Copies `dst.len()` bytes starting at `offset` into `dst`.
    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Option<()>;
}

/// A capability to map windows of the physical address space.
pub trait PhysicalMemory {
    type Window: Window;

    fn page_size(&self) -> u64;

    /// Maps `len` bytes starting at `page_base`, which the caller has already
    /// aligned to [`PhysicalMemory::page_size`].
    fn map(&self, page_base: u64, len: usize, access: Access) -> io::Result<Self::Window>;
}

impl<M: PhysicalMemory + ?Sized> PhysicalMemory for &M {
    type Window = M::Window;

    fn page_size(&self) -> u64 {
        (**self).page_size()
    }

    fn map(&self, page_base: u64, len: usize, access: Access) -> io::Result<Self::Window> {
        (**self).map(page_base, len, access)
    }
}

/// Physical memory reached through a device node such as `/dev/mem`.
#[derive(Debug)]
pub struct DevMem {
    file: File,
    path: PathBuf,
    access: Access,
    page_size: u64,
}

impl DevMem {
    /// Opens `path` for the given access. The descriptor is opened with
    /// `O_SYNC` so that `/dev/mem` hands out uncached mappings.
    pub fn open(path: impl AsRef<Path>, access: Access) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(access.is_writable())
            .custom_flags(libc::O_SYNC)
            .open(&path)
            .map_err(|source| CaptureError::Open {
                path: path.clone(),
                source,
            })?;
        debug!("opened {} ({:?})", path.display(), access);
        Ok(Self {
            file,
            path,
            access,
            page_size: system_page_size(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn access(&self) -> Access {
        self.access
    }
}

impl PhysicalMemory for DevMem {
    type Window = MmapWindow;

    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn map(&self, page_base: u64, len: usize, access: Access) -> io::Result<MmapWindow> {
        if access.is_writable() && !self.access.is_writable() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "device was opened read-only",
            ));
        }
        let offset = off_t::try_from(page_base).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "physical address exceeds off_t",
            )
        })?;

        let addr = unsafe {
            mmap(
                ptr::null_mut(),
                len,
                access.prot(),
                MAP_SHARED,
                self.file.as_raw_fd(),
                offset,
            )
        };
        if addr == MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;
        debug!("mapped {len:#x} bytes at {page_base:#010x}");
        Ok(MmapWindow { ptr, len, access })
    }
}

/// A window mapped with `mmap(2)`; unmapped on drop.
///
/// Word accesses are volatile since the window may cover device registers.
#[derive(Debug)]
pub struct MmapWindow {
    ptr: NonNull<u8>,
    len: usize,
    access: Access,
}

// The mapping is exclusively owned and only reached through &self / &mut self.
unsafe impl Send for MmapWindow {}

impl MmapWindow {
    fn check(&self, offset: usize, width: usize) -> Option<()> {
        let end = offset.checked_add(width)?;
        (end <= self.len).then_some(())
    }
}

impl Window for MmapWindow {
    fn len(&self) -> usize {
        self.len
    }

    fn access(&self) -> Access {
        self.access
    }

    fn read_u32(&self, offset: usize) -> Option<u32> {
        self.check(offset, 4)?;
        if offset % 4 != 0 {
            return None;
        }
        let word = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>() };
        Some(unsafe { ptr::read_volatile(word) })
    }

    fn write_u32(&mut self, offset: usize, value: u32) -> Option<()> {
        self.check(offset, 4)?;
        if offset % 4 != 0 || !self.access.is_writable() {
            return None;
        }
        let word = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>() };
        unsafe { ptr::write_volatile(word, value) };
        Some(())
    }

    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Option<()> {
        self.check(offset, dst.len())?;
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), dst.as_mut_ptr(), dst.len());
        }
        Some(())
    }
}

impl Drop for MmapWindow {
    fn drop(&mut self) {
        if unsafe { munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) } != 0 {
            warn!("munmap failed: {}", io::Error::last_os_error());
        } else {
            debug!("unmapped {:#x} bytes", self.len);
        }
    }
}
