// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-channel exclusive access.
//!
//! The freeze/unfreeze handshake is not reentrant: a second capture on the
//! same channel would unfreeze it while the first one is still reading the
//! frame. A [`ChannelToken`] is held for the whole freeze to unfreeze
//! sequence and released when dropped.

use crate::error::{CaptureError, Result};
use parking_lot::{Condvar, Mutex};
use std::{collections::HashSet, sync::Arc};
use tracing::trace;

/// Registry of channels currently owned by a capture.
#[derive(Debug, Default)]
pub struct ChannelLocks {
    held: Mutex<HashSet<u32>>,
    released: Condvar,
}

impl ChannelLocks {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// Blocks until `channel` is free and takes it.
    pub fn acquire(self: &Arc<Self>, channel: u32) -> ChannelToken {
        let mut held = self.held.lock();
        while held.contains(&channel) {
            trace!("waiting for channel {channel}");
            self.released.wait(&mut held);
        }
        held.insert(channel);
        ChannelToken {
            locks: Arc::clone(self),
            channel,
        }
    }

    /// Takes `channel` if nobody else holds it.
    pub fn try_acquire(self: &Arc<Self>, channel: u32) -> Result<ChannelToken> {
        let mut held = self.held.lock();
        if !held.insert(channel) {
            return Err(CaptureError::ChannelBusy { channel });
        }
        Ok(ChannelToken {
            locks: Arc::clone(self),
            channel,
        })
    }

    pub fn is_held(&self, channel: u32) -> bool {
        self.held.lock().contains(&channel)
    }
}

/// Exclusive ownership of one channel.
#[derive(Debug)]
pub struct ChannelToken {
    locks: Arc<ChannelLocks>,
    channel: u32,
}

impl ChannelToken {
    pub fn channel(&self) -> u32 {
        self.channel
    }
}

impl Drop for ChannelToken {
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.channel);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
        time::Duration,
    };

    #[test]
    fn test_try_acquire_busy() {
        let locks = ChannelLocks::new();
        let token = locks.try_acquire(1).unwrap();
        assert!(locks.is_held(1));
        assert!(matches!(
            locks.try_acquire(1),
            Err(CaptureError::ChannelBusy { channel: 1 })
        ));
        let other = locks.try_acquire(2).unwrap();
        assert_eq!(other.channel(), 2);
        drop(token);
        assert!(!locks.is_held(1));
        assert!(locks.try_acquire(1).is_ok());
    }

    #[test]
    fn test_acquire_waits_for_release() {
        let locks = ChannelLocks::new();
        let token = locks.acquire(3);
        let acquired = Arc::new(AtomicBool::new(false));

        let waiter = {
            let locks = Arc::clone(&locks);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _token = locks.acquire(3);
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(token);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert!(!locks.is_held(3));
    }
}
