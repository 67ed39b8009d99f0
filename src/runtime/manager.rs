//! Handle manager strategies
//!
//! Every bound type names the manager that resolves its handles. Managers
//! live for as long as any handle they issued, because each handle keeps an
//! `Rc` to its manager.

use super::handle::{Handle, HandleData};
use super::memory::{Block, ObjectRef};
use crate::library::{ManagerId, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// Allocation strategy behind a family of handles
pub trait HandleManager: fmt::Debug {
    fn id(&self) -> ManagerId;

    fn name(&self) -> &'static str;

    /// Wrap an existing object in a handle of `stored_type`
    fn object_to_handle(self: Rc<Self>, object: &ObjectRef, stored_type: TypeId) -> Handle;

    /// Resolve a handle issued by this manager
    fn handle_to_object(&self, handle: &Handle) -> Option<ObjectRef>;

    /// Create a zeroed instance of `size` bytes
    fn allocate(self: Rc<Self>, stored_type: TypeId, size: usize) -> Handle;

    fn add_reference(&self, _handle: &Handle) {}

    /// Drop one reference; must tolerate handles that were already released
    fn release_reference(&self, _handle: &Handle) {}

    fn is_alive(&self, handle: &Handle) -> bool {
        self.handle_to_object(handle).is_some()
    }

    /// Objects this manager currently keeps alive
    fn live_objects(&self) -> usize {
        0
    }
}

/// Wraps host-owned objects without taking ownership
///
/// Instances the script creates through [`HandleManager::allocate`] are kept
/// until the manager itself is dropped.
#[derive(Debug)]
pub struct PointerManager {
    id: ManagerId,
    owned: RefCell<Vec<ObjectRef>>,
}

impl PointerManager {
    pub fn new(id: ManagerId) -> Self {
        PointerManager {
            id,
            owned: RefCell::new(Vec::new()),
        }
    }
}

impl HandleManager for PointerManager {
    fn id(&self) -> ManagerId {
        self.id
    }

    fn name(&self) -> &'static str {
        "Pointer"
    }

    fn object_to_handle(self: Rc<Self>, object: &ObjectRef, stored_type: TypeId) -> Handle {
        Handle::new(stored_type, self, HandleData::Pointer(Rc::downgrade(object)))
    }

    fn handle_to_object(&self, handle: &Handle) -> Option<ObjectRef> {
        match handle.data() {
            HandleData::Pointer(object) => object.upgrade(),
            _ => None,
        }
    }

    fn allocate(self: Rc<Self>, stored_type: TypeId, size: usize) -> Handle {
        let object = Block::new(size).into_object();
        self.owned.borrow_mut().push(object.clone());
        self.object_to_handle(&object, stored_type)
    }

    fn live_objects(&self) -> usize {
        self.owned.borrow().len()
    }
}

/// Counters kept by [`HeapManager`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    pub allocations: usize,
    pub frees: usize,
    /// Releases that arrived after the object was already freed
    pub stale_releases: usize,
}

impl AllocationStats {
    pub fn live(&self) -> usize {
        self.allocations - self.frees
    }
}

#[derive(Debug)]
struct HeapEntry {
    references: usize,
    object: ObjectRef,
}

/// Owns reference counted object blocks
#[derive(Debug)]
pub struct HeapManager {
    id: ManagerId,
    slots: RefCell<Vec<Option<HeapEntry>>>,
    free_slots: RefCell<Vec<usize>>,
    /// Slot of each live object, keyed by its address
    by_object: RefCell<HashMap<*const RefCell<Block>, usize>>,
    stats: Cell<AllocationStats>,
}

impl HeapManager {
    pub fn new(id: ManagerId) -> Self {
        HeapManager {
            id,
            slots: RefCell::new(Vec::new()),
            free_slots: RefCell::new(Vec::new()),
            by_object: RefCell::new(HashMap::new()),
            stats: Cell::new(AllocationStats::default()),
        }
    }

    pub fn stats(&self) -> AllocationStats {
        self.stats.get()
    }

    /// Current reference count of the object behind `handle`
    pub fn reference_count(&self, handle: &Handle) -> usize {
        match handle.data() {
            HandleData::Heap(slot) => self
                .slots
                .borrow()
                .get(*slot)
                .and_then(|entry| entry.as_ref())
                .map(|entry| entry.references)
                .unwrap_or(0),
            _ => 0,
        }
    }

    fn adopt(self: Rc<Self>, object: ObjectRef, stored_type: TypeId) -> Handle {
        let address = Rc::as_ptr(&object);
        let entry = HeapEntry { references: 1, object };
        let slot = {
            let mut slots = self.slots.borrow_mut();
            match self.free_slots.borrow_mut().pop() {
                Some(slot) => {
                    slots[slot] = Some(entry);
                    slot
                }
                None => {
                    slots.push(Some(entry));
                    slots.len() - 1
                }
            }
        };
        self.by_object.borrow_mut().insert(address, slot);
        let mut stats = self.stats.get();
        stats.allocations += 1;
        self.stats.set(stats);
        tracing::trace!(slot, type_id = stored_type.0, "heap allocation");
        Handle::new(stored_type, self, HandleData::Heap(slot))
    }
}

impl HandleManager for HeapManager {
    fn id(&self) -> ManagerId {
        self.id
    }

    fn name(&self) -> &'static str {
        "Heap"
    }

    /// Objects already on the heap gain a reference instead of a second slot
    fn object_to_handle(self: Rc<Self>, object: &ObjectRef, stored_type: TypeId) -> Handle {
        let existing = self.by_object.borrow().get(&Rc::as_ptr(object)).copied();
        let Some(slot) = existing else {
            return self.adopt(object.clone(), stored_type);
        };
        if let Some(Some(entry)) = self.slots.borrow_mut().get_mut(slot) {
            entry.references += 1;
        }
        Handle::new(stored_type, self, HandleData::Heap(slot))
    }

    fn handle_to_object(&self, handle: &Handle) -> Option<ObjectRef> {
        let HandleData::Heap(slot) = handle.data() else {
            return None;
        };
        let slots = self.slots.borrow();
        slots.get(*slot)?.as_ref().map(|entry| entry.object.clone())
    }

    fn allocate(self: Rc<Self>, stored_type: TypeId, size: usize) -> Handle {
        self.adopt(Block::new(size).into_object(), stored_type)
    }

    fn add_reference(&self, handle: &Handle) {
        if let HandleData::Heap(slot) = handle.data() {
            if let Some(Some(entry)) = self.slots.borrow_mut().get_mut(*slot) {
                entry.references += 1;
            }
        }
    }

    fn release_reference(&self, handle: &Handle) {
        let HandleData::Heap(slot) = handle.data() else {
            return;
        };
        let slot = *slot;
        let freed = {
            let mut slots = self.slots.borrow_mut();
            let remaining = match slots.get_mut(slot) {
                Some(Some(entry)) => {
                    entry.references -= 1;
                    entry.references
                }
                _ => {
                    let mut stats = self.stats.get();
                    stats.stale_releases += 1;
                    self.stats.set(stats);
                    tracing::warn!(slot, "release of an already freed heap object");
                    return;
                }
            };
            if remaining == 0 {
                slots[slot].take()
            } else {
                None
            }
        };
        if let Some(entry) = freed {
            self.by_object.borrow_mut().remove(&Rc::as_ptr(&entry.object));
            self.free_slots.borrow_mut().push(slot);
            let mut stats = self.stats.get();
            stats.frees += 1;
            self.stats.set(stats);
            tracing::trace!(slot, "heap free");
            // Nested handles release here, after the slot table is unborrowed
            drop(entry);
        }
    }

    fn live_objects(&self) -> usize {
        self.stats.get().live()
    }
}

/// Stores small values inside the handle
#[derive(Debug)]
pub struct ValueManager {
    id: ManagerId,
}

impl ValueManager {
    pub fn new(id: ManagerId) -> Self {
        ValueManager { id }
    }

    /// Box raw value bytes
    pub fn boxed(self: Rc<Self>, stored_type: TypeId, bytes: &[u8]) -> Handle {
        Handle::new(stored_type, self, HandleData::inline(bytes))
    }
}

impl HandleManager for ValueManager {
    fn id(&self) -> ManagerId {
        self.id
    }

    fn name(&self) -> &'static str {
        "Value"
    }

    fn object_to_handle(self: Rc<Self>, object: &ObjectRef, stored_type: TypeId) -> Handle {
        let data = HandleData::inline(object.borrow().bytes());
        Handle::new(stored_type, self, data)
    }

    fn handle_to_object(&self, handle: &Handle) -> Option<ObjectRef> {
        match handle.data() {
            HandleData::Inline { bytes, len } => Some(Block::from_bytes(&bytes[..*len]).into_object()),
            _ => None,
        }
    }

    fn allocate(self: Rc<Self>, stored_type: TypeId, size: usize) -> Handle {
        self.boxed(stored_type, &vec![0u8; size])
    }
}

/// Interns immutable text
#[derive(Debug)]
pub struct StringManager {
    id: ManagerId,
    interned: RefCell<HashSet<Rc<str>>>,
}

impl StringManager {
    pub fn new(id: ManagerId) -> Self {
        StringManager {
            id,
            interned: RefCell::new(HashSet::new()),
        }
    }

    /// A handle to `text`, sharing storage with equal strings
    pub fn intern(self: Rc<Self>, text: &str) -> Handle {
        let shared = {
            let mut interned = self.interned.borrow_mut();
            match interned.get(text) {
                Some(existing) => existing.clone(),
                None => {
                    let created: Rc<str> = Rc::from(text);
                    interned.insert(created.clone());
                    created
                }
            }
        };
        Handle::new(TypeId::STRING, self, HandleData::Text(shared))
    }

    pub fn interned_count(&self) -> usize {
        self.interned.borrow().len()
    }
}

impl HandleManager for StringManager {
    fn id(&self) -> ManagerId {
        self.id
    }

    fn name(&self) -> &'static str {
        "String"
    }

    fn object_to_handle(self: Rc<Self>, object: &ObjectRef, _stored_type: TypeId) -> Handle {
        let text = String::from_utf8_lossy(object.borrow().bytes()).into_owned();
        self.intern(&text)
    }

    fn handle_to_object(&self, handle: &Handle) -> Option<ObjectRef> {
        match handle.data() {
            HandleData::Text(text) => Some(Block::from_bytes(text.as_bytes()).into_object()),
            _ => None,
        }
    }

    fn allocate(self: Rc<Self>, _stored_type: TypeId, _size: usize) -> Handle {
        self.intern("")
    }

    fn release_reference(&self, handle: &Handle) {
        let HandleData::Text(text) = handle.data() else {
            return;
        };
        // The set and the handle being dropped hold the last two references
        if Rc::strong_count(text) <= 2 {
            let mut interned = self.interned.borrow_mut();
            if interned.get(text).is_some_and(|entry| Rc::ptr_eq(entry, text)) {
                interned.remove(text);
            }
        }
    }
}
