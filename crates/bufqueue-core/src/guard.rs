//! RAII CPU mapping of a graphic buffer

use crate::buffer::BufferData;
use crate::storage::AccessMode;
use crate::{Error, Result};
use parking_lot::MutexGuard;

/// Live CPU mapping; the buffer is unmapped when the guard drops
pub struct BufferGuard<'a> {
    data: MutexGuard<'a, BufferData>,
    mode: AccessMode,
}

impl<'a> BufferGuard<'a> {
    pub(crate) fn new(data: MutexGuard<'a, BufferData>, mode: AccessMode) -> Self {
        Self { data, mode }
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.data.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Mutable view, requires a ReadWrite mapping
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        if self.mode == AccessMode::ReadOnly {
            return Err(Error::ReadOnly);
        }
        Ok(self.data.as_mut_slice())
    }
}
