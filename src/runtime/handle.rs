//! Type-erased references to script and host objects
//!
//! A [`Handle`] pairs the stored [`TypeId`] with the manager that resolves it.
//! Copying, moving and null-checking a handle never looks at the concrete
//! type; only [`Handle::dereference`] and the typed getters do.

use super::exception::{ExceptionKind, ExceptionReport};
use super::manager::HandleManager;
use super::memory::{Block, ObjectRef};
use super::state::ExecutableState;
use super::value::Marshal;
use crate::library::{Library, ManagerId, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Bytes a handle slot occupies in a frame or object layout
pub const HANDLE_SIZE: usize = 16;

/// Largest value the value manager stores inside the handle itself
pub const INLINE_CAPACITY: usize = 16;

/// Manager-specific storage carried by a handle
#[derive(Clone)]
pub enum HandleData {
    Null,
    /// Small value copied into the handle
    Inline {
        bytes: [u8; INLINE_CAPACITY],
        len: usize,
    },
    /// Slot in a heap manager's table
    Heap(usize),
    /// Host-owned object the handle does not keep alive
    Pointer(Weak<RefCell<Block>>),
    /// Immutable shared text
    Text(Rc<str>),
}

impl HandleData {
    /// Inline storage holding a copy of `data`, truncated to the capacity
    pub fn inline(data: &[u8]) -> Self {
        let len = data.len().min(INLINE_CAPACITY);
        let mut bytes = [0u8; INLINE_CAPACITY];
        bytes[..len].copy_from_slice(&data[..len]);
        HandleData::Inline { bytes, len }
    }

    fn kind(&self) -> &'static str {
        match self {
            HandleData::Null => "null",
            HandleData::Inline { .. } => "inline",
            HandleData::Heap(_) => "heap",
            HandleData::Pointer(_) => "pointer",
            HandleData::Text(_) => "text",
        }
    }
}

pub struct Handle {
    stored_type: Option<TypeId>,
    manager: Option<Rc<dyn HandleManager>>,
    data: HandleData,
}

impl Handle {
    /// The null handle: no stored type, dereferences to nothing
    pub fn null() -> Self {
        Handle {
            stored_type: None,
            manager: None,
            data: HandleData::Null,
        }
    }

    /// Build a handle that already owns one reference
    ///
    /// Managers call this after accounting for the new reference, so no
    /// `add_reference` is issued here.
    pub fn new(stored_type: TypeId, manager: Rc<dyn HandleManager>, data: HandleData) -> Self {
        Handle {
            stored_type: Some(stored_type),
            manager: Some(manager),
            data,
        }
    }

    pub fn is_null(&self) -> bool {
        self.stored_type.is_none()
    }

    pub fn stored_type(&self) -> Option<TypeId> {
        self.stored_type
    }

    pub fn manager_id(&self) -> Option<ManagerId> {
        self.manager.as_ref().map(|m| m.id())
    }

    pub fn data(&self) -> &HandleData {
        &self.data
    }

    /// Value handles carry their data inline and cannot be written through
    pub fn is_inline(&self) -> bool {
        matches!(self.data, HandleData::Inline { .. })
    }

    /// Whether the referenced object still exists
    pub fn is_alive(&self) -> bool {
        match &self.manager {
            Some(manager) => manager.is_alive(self),
            None => false,
        }
    }

    /// Resolve to the object block; `None` for null or dead handles
    ///
    /// Inline values resolve to a fresh snapshot of their bytes.
    pub fn dereference(&self) -> Option<ObjectRef> {
        self.manager.as_ref()?.handle_to_object(self)
    }

    /// Run `f` over the raw bytes of the referenced value
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        match &self.data {
            HandleData::Null => None,
            HandleData::Inline { bytes, len } => Some(f(&bytes[..*len])),
            HandleData::Text(text) => Some(f(text.as_bytes())),
            HandleData::Heap(_) | HandleData::Pointer(_) => {
                let object = self.dereference()?;
                let block = object.borrow();
                Some(f(block.bytes()))
            }
        }
    }

    /// The text of a string handle
    pub fn text(&self) -> Option<Rc<str>> {
        match &self.data {
            HandleData::Text(text) => Some(text.clone()),
            _ => None,
        }
    }

    /// A new reference to the same object, viewed as `stored_type`
    pub fn retyped(&self, stored_type: TypeId) -> Handle {
        let mut copy = self.clone();
        if !copy.is_null() {
            copy.stored_type = Some(stored_type);
        }
        copy
    }

    pub fn is_raw_castable_to(&self, library: &Library, to: TypeId) -> bool {
        match self.stored_type {
            Some(from) => library.is_raw_castable(from, to),
            None => false,
        }
    }

    fn check_castable(&self, library: &Library, expected: TypeId) -> Result<(), ExceptionKind> {
        let Some(stored) = self.stored_type else {
            return Err(ExceptionKind::NullReference);
        };
        if !library.is_raw_castable(stored, expected) {
            return Err(ExceptionKind::TypeMismatch {
                expected: library.type_name(expected).to_string(),
                actual: library.type_name(stored).to_string(),
            });
        }
        Ok(())
    }

    /// Read the referenced value as `T` after checking the stored type
    pub fn try_get<T: Marshal>(&self, library: &Library) -> Result<T, ExceptionKind> {
        let expected = T::script_type(library).ok_or_else(|| ExceptionKind::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            actual: self
                .stored_type
                .map(|t| library.type_name(t).to_string())
                .unwrap_or_else(|| "null".to_string()),
        })?;
        self.check_castable(library, expected)?;
        self.with_bytes(|bytes| (bytes.len() >= T::SIZE).then(|| T::read(&bytes[..T::SIZE])))
            .flatten()
            .ok_or(ExceptionKind::NullReference)
    }

    /// Read the referenced value, reporting a failure and returning zero
    pub fn get<T: Marshal>(&self, state: &ExecutableState, report: &mut ExceptionReport) -> T {
        match self.try_get(state.library()) {
            Ok(value) => value,
            Err(kind) => {
                state.throw_exception(report, kind);
                T::zeroed()
            }
        }
    }

    /// Resolve the object block after checking it can be viewed as `expected`
    pub fn get_object(&self, library: &Library, expected: TypeId) -> Result<ObjectRef, ExceptionKind> {
        self.check_castable(library, expected)?;
        self.dereference().ok_or(ExceptionKind::NullReference)
    }
}

impl Default for Handle {
    fn default() -> Self {
        Handle::null()
    }
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        let copy = Handle {
            stored_type: self.stored_type,
            manager: self.manager.clone(),
            data: self.data.clone(),
        };
        if let Some(manager) = &copy.manager {
            manager.add_reference(&copy);
        }
        copy
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.take() {
            manager.release_reference(self);
        }
        self.stored_type = None;
        self.data = HandleData::Null;
    }
}

/// Identity comparison
///
/// Object handles are equal when they reference the same object, whatever
/// type they view it as. Inline values also compare their stored type.
impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        match (&self.data, &other.data) {
            (HandleData::Null, HandleData::Null) => true,
            (HandleData::Inline { bytes: a, len: la }, HandleData::Inline { bytes: b, len: lb }) => {
                self.stored_type == other.stored_type && a[..*la] == b[..*lb]
            }
            (HandleData::Heap(a), HandleData::Heap(b)) => a == b && self.manager_id() == other.manager_id(),
            (HandleData::Pointer(a), HandleData::Pointer(b)) => a.ptr_eq(b),
            (HandleData::Text(a), HandleData::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stored_type {
            None => write!(f, "Handle(null)"),
            Some(type_id) => match &self.data {
                HandleData::Text(text) => write!(f, "Handle(type {}, {:?})", type_id.0, text),
                HandleData::Heap(slot) => write!(f, "Handle(type {}, heap #{slot})", type_id.0),
                data => write!(f, "Handle(type {}, {})", type_id.0, data.kind()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle() {
        let handle = Handle::null();
        assert!(handle.is_null());
        assert!(handle.dereference().is_none());
        assert!(handle.with_bytes(|b| b.len()).is_none());
        assert_eq!(handle, Handle::default());
        assert_eq!(format!("{handle:?}"), "Handle(null)");
    }

    #[test]
    fn inline_data_is_truncated_to_capacity() {
        let data = HandleData::inline(&[7u8; 20]);
        match data {
            HandleData::Inline { len, bytes } => {
                assert_eq!(len, INLINE_CAPACITY);
                assert_eq!(bytes, [7u8; INLINE_CAPACITY]);
            }
            _ => panic!("expected inline data"),
        }
    }
}
