//! Byte blocks backing stack frames and objects
//!
//! A [`Block`] is a zero-initialised byte region plus a side table of handle
//! slots keyed by byte offset. Value-typed data lives in the bytes; every
//! handle-typed slot reserves [`HANDLE_SIZE`] bytes of layout and stores the
//! actual [`Handle`] in the side table, so no handle is ever reinterpreted from
//! raw bytes.

use super::handle::{Handle, HANDLE_SIZE};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A shared, mutable object block
pub type ObjectRef = Rc<RefCell<Block>>;

#[derive(Default)]
pub struct Block {
    bytes: Vec<u8>,
    handles: BTreeMap<usize, Handle>,
}

impl Block {
    /// Create a zeroed block of `size` bytes
    pub fn new(size: usize) -> Self {
        Block {
            bytes: vec![0; size],
            handles: BTreeMap::new(),
        }
    }

    /// Create a block holding a copy of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Block {
            bytes: bytes.to_vec(),
            handles: BTreeMap::new(),
        }
    }

    /// Wrap in a shared object reference
    pub fn into_object(self) -> ObjectRef {
        Rc::new(RefCell::new(self))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `len` bytes starting at `offset`, or `None` if out of bounds
    pub fn slice(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.bytes.get(offset..end)
    }

    pub fn slice_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        let end = offset.checked_add(len)?;
        self.bytes.get_mut(offset..end)
    }

    /// Copy `data` in at `offset`; false if it would not fit
    pub fn write(&mut self, offset: usize, data: &[u8]) -> bool {
        match self.slice_mut(offset, data.len()) {
            Some(dest) => {
                dest.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    /// Whether a handle slot starting at `offset` fits in the block
    pub fn has_handle_slot(&self, offset: usize) -> bool {
        offset
            .checked_add(HANDLE_SIZE)
            .map(|end| end <= self.bytes.len())
            .unwrap_or(false)
    }

    /// The handle stored at `offset`; a null handle if the slot is empty
    pub fn handle(&self, offset: usize) -> Handle {
        self.handles.get(&offset).cloned().unwrap_or_default()
    }

    /// Borrow the handle at `offset` without adding a reference
    pub fn handle_ref(&self, offset: usize) -> Option<&Handle> {
        self.handles.get(&offset)
    }

    /// Store `handle` at `offset` and hand back the previous occupant
    ///
    /// The caller drops the returned handle once it no longer borrows this
    /// block, so releasing it can never re-enter the same `RefCell`.
    pub fn replace_handle(&mut self, offset: usize, handle: Handle) -> Option<Handle> {
        if handle.is_null() {
            self.handles.remove(&offset)
        } else {
            self.handles.insert(offset, handle)
        }
    }

    /// Remove the handle at `offset`, leaving the slot null
    pub fn take_handle(&mut self, offset: usize) -> Option<Handle> {
        self.handles.remove(&offset)
    }

    /// Number of non-null handle slots
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Release every handle, last slot first
    pub fn release_handles(&mut self) {
        while let Some((_, handle)) = self.handles.pop_last() {
            drop(handle);
        }
    }

    /// Hex dump of the byte contents for diagnostics
    pub fn dump(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        self.release_handles();
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("bytes", &self.dump())
            .field("handles", &self.handles.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_checked_access() {
        let mut block = Block::new(8);
        assert!(block.write(4, &[1, 2, 3, 4]));
        assert!(!block.write(6, &[1, 2, 3]));
        assert_eq!(block.slice(4, 4), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(block.slice(usize::MAX, 2), None);
        assert_eq!(block.dump(), "0000000001020304");
    }

    #[test]
    fn empty_slots_read_as_null() {
        let block = Block::new(32);
        assert!(block.handle(0).is_null());
        assert!(block.has_handle_slot(16));
        assert!(!block.has_handle_slot(17));
    }
}
