// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Simulated physical address space.
//!
//! [`SimulatedMemory`] implements [`PhysicalMemory`] on top of a sparse,
//! page-granular byte store. Every map, unmap, word access and bulk copy is
//! appended to an event log so tests can assert on the exact order in which
//! the grabber touched the hardware. Map failures can be injected per page.

use crate::memory::{page_base, Access, PhysicalMemory, Window};
use parking_lot::Mutex;
use std::{collections::HashMap, io, sync::Arc};

/// One observed interaction with the simulated address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemEvent {
    Map {
        page_base: u64,
        len: usize,
        access: Access,
    },
    Unmap {
        page_base: u64,
    },
    Read {
        address: u64,
        value: u32,
    },
    Write {
        address: u64,
        value: u32,
    },
    Copy {
        address: u64,
        len: usize,
    },
}

#[derive(Debug, Default)]
struct State {
    pages: HashMap<u64, Box<[u8]>>,
    events: Vec<MemEvent>,
    faults: HashMap<u64, io::ErrorKind>,
    live: usize,
}

impl State {
    fn read(&self, page_size: u64, address: u64, dst: &mut [u8]) {
        for (i, byte) in dst.iter_mut().enumerate() {
            let addr = address + i as u64;
            let page = page_base(addr, page_size);
            *byte = self
                .pages
                .get(&page)
                .map_or(0, |bytes| bytes[(addr - page) as usize]);
        }
    }

    fn write(&mut self, page_size: u64, address: u64, src: &[u8]) {
        for (i, byte) in src.iter().enumerate() {
            let addr = address + i as u64;
            let page = page_base(addr, page_size);
            let bytes = self
                .pages
                .entry(page)
                .or_insert_with(|| vec![0; page_size as usize].into_boxed_slice());
            bytes[(addr - page) as usize] = *byte;
        }
    }
}

/// An in-process physical address space. Clones share the same store.
#[derive(Debug, Clone)]
pub struct SimulatedMemory {
    state: Arc<Mutex<State>>,
    page_size: u64,
}

impl Default for SimulatedMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedMemory {
    pub fn new() -> Self {
        Self::with_page_size(4096)
    }

    /// # Panics
    ///
    /// Panics if `page_size` is not a power of two.
    pub fn with_page_size(page_size: u64) -> Self {
        assert!(page_size.is_power_of_two(), "page size must be a power of two");
        Self {
            state: Arc::default(),
            page_size,
        }
    }

    /// Stores a native-endian word without logging an event.
    pub fn write_u32(&self, address: u64, value: u32) {
        self.write_bytes(address, &value.to_ne_bytes());
    }

    pub fn write_bytes(&self, address: u64, bytes: &[u8]) {
        self.state.lock().write(self.page_size, address, bytes);
    }

    /// Loads a native-endian word without logging an event.
    pub fn read_u32(&self, address: u64) -> u32 {
        let mut bytes = [0u8; 4];
        self.state.lock().read(self.page_size, address, &mut bytes);
        u32::from_ne_bytes(bytes)
    }

    /// Makes every later attempt to map the page containing `address` fail
    /// with `kind`.
    pub fn fail_map_at(&self, address: u64, kind: io::ErrorKind) {
        let page = page_base(address, self.page_size);
        self.state.lock().faults.insert(page, kind);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Snapshot of the event log.
    pub fn events(&self) -> Vec<MemEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Windows mapped and not yet dropped.
    pub fn live_mappings(&self) -> usize {
        self.state.lock().live
    }
}

impl PhysicalMemory for SimulatedMemory {
    type Window = SimWindow;

    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn map(&self, page_base: u64, len: usize, access: Access) -> io::Result<SimWindow> {
        let mut state = self.state.lock();
        if let Some(kind) = state.faults.get(&page_base) {
            return Err(io::Error::from(*kind));
        }
        if page_base % self.page_size != 0 || len == 0 {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        if page_base.checked_add(len as u64).is_none() {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        state.events.push(MemEvent::Map {
            page_base,
            len,
            access,
        });
        state.live += 1;
        Ok(SimWindow {
            state: Arc::clone(&self.state),
            page_size: self.page_size,
            page_base,
            len,
            access,
        })
    }
}

/// A window into [`SimulatedMemory`].
#[derive(Debug)]
pub struct SimWindow {
    state: Arc<Mutex<State>>,
    page_size: u64,
    page_base: u64,
    len: usize,
    access: Access,
}

impl SimWindow {
    fn check(&self, offset: usize, width: usize) -> Option<u64> {
        let end = offset.checked_add(width)?;
        (end <= self.len).then_some(self.page_base + offset as u64)
    }
}

impl Window for SimWindow {
    fn len(&self) -> usize {
        self.len
    }

    fn access(&self) -> Access {
        self.access
    }

    fn read_u32(&self, offset: usize) -> Option<u32> {
        let address = self.check(offset, 4)?;
        if offset % 4 != 0 {
            return None;
        }
        let mut state = self.state.lock();
        let mut bytes = [0u8; 4];
        state.read(self.page_size, address, &mut bytes);
        let value = u32::from_ne_bytes(bytes);
        state.events.push(MemEvent::Read { address, value });
        Some(value)
    }

    fn write_u32(&mut self, offset: usize, value: u32) -> Option<()> {
        let address = self.check(offset, 4)?;
        if offset % 4 != 0 || !self.access.is_writable() {
            return None;
        }
        let mut state = self.state.lock();
        state.write(self.page_size, address, &value.to_ne_bytes());
        state.events.push(MemEvent::Write { address, value });
        Some(())
    }

    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Option<()> {
        let address = self.check(offset, dst.len())?;
        let mut state = self.state.lock();
        state.read(self.page_size, address, dst);
        state.events.push(MemEvent::Copy {
            address,
            len: dst.len(),
        });
        Some(())
    }
}

impl Drop for SimWindow {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.live -= 1;
        state.events.push(MemEvent::Unmap {
            page_base: self.page_base,
        });
    }
}
