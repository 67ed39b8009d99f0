//! Per-invocation stack frames
//!
//! A frame is one [`Block`] sized from the function's declared frame size.
//! The fixed slots (return, `this`, parameters) come first, at the offsets in
//! [`FrameLayout`](crate::library::FrameLayout); locals and temporaries follow.
//! Dropping the frame releases every handle it holds, last slot first.

use super::handle::Handle;
use super::memory::Block;
use super::value::Marshal;
use crate::library::Function;
use std::ops::{Deref, DerefMut};

#[derive(Debug)]
pub struct StackFrame {
    block: Block,
}

impl StackFrame {
    pub fn new(size: usize) -> Self {
        StackFrame { block: Block::new(size) }
    }

    pub fn for_function(function: &Function) -> Self {
        StackFrame::new(function.frame_size)
    }

    /// Read a value stored at `offset`
    pub fn read_value<T: Marshal>(&self, offset: usize) -> Option<T> {
        self.block.slice(offset, T::SIZE).map(T::read)
    }

    /// Write a value at `offset`; false if it does not fit
    pub fn write_value<T: Marshal>(&mut self, offset: usize, value: &T) -> bool {
        match self.block.slice_mut(offset, T::SIZE) {
            Some(bytes) => {
                value.write(bytes);
                true
            }
            None => false,
        }
    }

    /// Overwrite the handle slot at `offset`, releasing the old handle
    pub fn set_handle(&mut self, offset: usize, handle: Handle) -> bool {
        if !self.block.has_handle_slot(offset) {
            return false;
        }
        let previous = self.block.replace_handle(offset, handle);
        drop(previous);
        true
    }

    /// Release the handles of locals going out of scope
    pub fn release_locals(&mut self, offsets: &[usize]) {
        for offset in offsets.iter().rev() {
            let released = self.block.take_handle(*offset);
            drop(released);
        }
    }
}

impl Deref for StackFrame {
    type Target = Block;

    fn deref(&self) -> &Block {
        &self.block
    }
}

impl DerefMut for StackFrame {
    fn deref_mut(&mut self) -> &mut Block {
        &mut self.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_access() {
        let mut frame = StackFrame::new(8);
        assert!(frame.write_value(4, &42i32));
        assert_eq!(frame.read_value::<i32>(4), Some(42));
        assert!(!frame.write_value(6, &1i32));
        assert_eq!(frame.read_value::<f64>(4), None);
    }

    #[test]
    fn handle_slots_must_fit() {
        let mut frame = StackFrame::new(20);
        assert!(frame.set_handle(4, Handle::null()));
        assert!(!frame.set_handle(8, Handle::null()));
    }
}
