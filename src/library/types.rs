//! Bound type descriptors
//!
//! A [`BoundType`] describes one script-visible type: its size, single base
//! type, copy mode, handle manager and members. Types are created by the
//! [`LibraryBuilder`](super::LibraryBuilder) and are never mutated afterwards.

use crate::runtime::handle::Handle;
use std::fmt;

/// Index of a type in its library's type table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Index of a function in its library's function table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

/// Key into the handle manager registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagerId(pub u16);

impl ManagerId {
    /// Wraps host-owned objects, no reference counting
    pub const POINTER: ManagerId = ManagerId(0);
    /// Owns reference counted heap blocks
    pub const HEAP: ManagerId = ManagerId(1);
    /// Stores small values inside the handle itself
    pub const VALUE: ManagerId = ManagerId(2);
    /// Immutable interned text
    pub const STRING: ManagerId = ManagerId(3);
}

impl TypeId {
    pub const BOOLEAN: TypeId = TypeId(0);
    pub const BOOLEAN2: TypeId = TypeId(1);
    pub const BOOLEAN3: TypeId = TypeId(2);
    pub const BOOLEAN4: TypeId = TypeId(3);
    pub const BYTE: TypeId = TypeId(4);
    pub const INTEGER: TypeId = TypeId(5);
    pub const INTEGER2: TypeId = TypeId(6);
    pub const INTEGER3: TypeId = TypeId(7);
    pub const INTEGER4: TypeId = TypeId(8);
    pub const DOUBLE_INTEGER: TypeId = TypeId(9);
    pub const REAL: TypeId = TypeId(10);
    pub const REAL2: TypeId = TypeId(11);
    pub const REAL3: TypeId = TypeId(12);
    pub const REAL4: TypeId = TypeId(13);
    pub const DOUBLE_REAL: TypeId = TypeId(14);
    pub const STRING: TypeId = TypeId(15);
    pub const ANY: TypeId = TypeId(16);

    /// Number of core types every library starts with
    pub const CORE_COUNT: u32 = 17;

    /// The fixed core type for a primitive kind
    pub fn of_primitive(kind: PrimitiveKind) -> Option<TypeId> {
        PrimitiveKind::ALL
            .iter()
            .position(|k| *k == kind)
            .map(|index| TypeId(index as u32))
    }
}

/// How values of a type are copied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Byte-for-byte duplication
    Value,
    /// Copying shares the underlying object through a handle
    Reference,
}

/// Scalar component kinds the generic arithmetic family is instantiated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Boolean,
    Byte,
    Integer,
    DoubleInteger,
    Real,
    DoubleReal,
}

impl ScalarKind {
    /// Size of one component in bytes
    pub fn size(self) -> usize {
        match self {
            ScalarKind::Boolean | ScalarKind::Byte => 1,
            ScalarKind::Integer | ScalarKind::Real => 4,
            ScalarKind::DoubleInteger | ScalarKind::DoubleReal => 8,
        }
    }

    pub fn is_integral(self) -> bool {
        matches!(self, ScalarKind::Byte | ScalarKind::Integer | ScalarKind::DoubleInteger)
    }

    pub fn is_real(self) -> bool {
        matches!(self, ScalarKind::Real | ScalarKind::DoubleReal)
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Boolean => "Boolean",
            ScalarKind::Byte => "Byte",
            ScalarKind::Integer => "Integer",
            ScalarKind::DoubleInteger => "DoubleInteger",
            ScalarKind::Real => "Real",
            ScalarKind::DoubleReal => "DoubleReal",
        }
    }
}

/// A scalar kind together with a component count (1 for scalars)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimitiveKind {
    pub scalar: ScalarKind,
    pub components: u8,
}

impl PrimitiveKind {
    pub const BOOLEAN: PrimitiveKind = PrimitiveKind::vector(ScalarKind::Boolean, 1);
    pub const BOOLEAN2: PrimitiveKind = PrimitiveKind::vector(ScalarKind::Boolean, 2);
    pub const BOOLEAN3: PrimitiveKind = PrimitiveKind::vector(ScalarKind::Boolean, 3);
    pub const BOOLEAN4: PrimitiveKind = PrimitiveKind::vector(ScalarKind::Boolean, 4);
    pub const BYTE: PrimitiveKind = PrimitiveKind::vector(ScalarKind::Byte, 1);
    pub const INTEGER: PrimitiveKind = PrimitiveKind::vector(ScalarKind::Integer, 1);
    pub const INTEGER2: PrimitiveKind = PrimitiveKind::vector(ScalarKind::Integer, 2);
    pub const INTEGER3: PrimitiveKind = PrimitiveKind::vector(ScalarKind::Integer, 3);
    pub const INTEGER4: PrimitiveKind = PrimitiveKind::vector(ScalarKind::Integer, 4);
    pub const DOUBLE_INTEGER: PrimitiveKind = PrimitiveKind::vector(ScalarKind::DoubleInteger, 1);
    pub const REAL: PrimitiveKind = PrimitiveKind::vector(ScalarKind::Real, 1);
    pub const REAL2: PrimitiveKind = PrimitiveKind::vector(ScalarKind::Real, 2);
    pub const REAL3: PrimitiveKind = PrimitiveKind::vector(ScalarKind::Real, 3);
    pub const REAL4: PrimitiveKind = PrimitiveKind::vector(ScalarKind::Real, 4);
    pub const DOUBLE_REAL: PrimitiveKind = PrimitiveKind::vector(ScalarKind::DoubleReal, 1);

    /// Core primitive kinds, in [`TypeId`] order
    pub const ALL: [PrimitiveKind; 15] = [
        PrimitiveKind::BOOLEAN,
        PrimitiveKind::BOOLEAN2,
        PrimitiveKind::BOOLEAN3,
        PrimitiveKind::BOOLEAN4,
        PrimitiveKind::BYTE,
        PrimitiveKind::INTEGER,
        PrimitiveKind::INTEGER2,
        PrimitiveKind::INTEGER3,
        PrimitiveKind::INTEGER4,
        PrimitiveKind::DOUBLE_INTEGER,
        PrimitiveKind::REAL,
        PrimitiveKind::REAL2,
        PrimitiveKind::REAL3,
        PrimitiveKind::REAL4,
        PrimitiveKind::DOUBLE_REAL,
    ];

    pub const fn scalar(scalar: ScalarKind) -> Self {
        PrimitiveKind { scalar, components: 1 }
    }

    pub const fn vector(scalar: ScalarKind, components: u8) -> Self {
        PrimitiveKind { scalar, components }
    }

    /// Packed size of all components
    pub fn size(self) -> usize {
        self.scalar.size() * self.components as usize
    }

    pub fn is_vector(self) -> bool {
        self.components > 1
    }

    /// The scalar kind with a single component
    pub fn component(self) -> PrimitiveKind {
        PrimitiveKind::scalar(self.scalar)
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_vector() {
            write!(f, "{}{}", self.scalar.name(), self.components)
        } else {
            write!(f, "{}", self.scalar.name())
        }
    }
}

/// What a bound type represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Primitive(PrimitiveKind),
    /// An enumeration stored as its backing integer type
    Enum { backing: TypeId },
    String,
    /// A boxed value of any type, always stored as a handle
    Any,
    Class,
}

/// A data member at a fixed byte offset inside the object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub offset: usize,
    pub field_type: TypeId,
}

/// A member accessed through getter and setter functions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub property_type: TypeId,
    pub getter: FunctionId,
    pub setter: Option<FunctionId>,
}

/// Resolves the most derived type of the object behind a handle
pub type DerivedTypeFn = fn(&Handle) -> Option<TypeId>;

/// Immutable descriptor of one script-visible type
#[derive(Clone)]
pub struct BoundType {
    pub id: TypeId,
    pub name: String,
    pub kind: TypeKind,
    /// Size of an instance in bytes
    pub size: usize,
    /// Single inheritance only
    pub base: Option<TypeId>,
    pub copy_mode: CopyMode,
    pub handle_manager: ManagerId,
    pub fields: Vec<Field>,
    pub properties: Vec<Property>,
    pub functions: Vec<FunctionId>,
    /// Bound from host code rather than declared by a script
    pub native: bool,
    /// Dynamic type lookup used by virtual calls; static type when absent
    pub derived_type: Option<DerivedTypeFn>,
}

impl BoundType {
    /// Whether values of this type live in frames and fields as handles
    pub fn is_handle(&self) -> bool {
        match self.kind {
            TypeKind::String | TypeKind::Any => true,
            TypeKind::Primitive(_) | TypeKind::Enum { .. } => false,
            TypeKind::Class => self.copy_mode == CopyMode::Reference,
        }
    }

    /// Bytes reserved in a frame or object for one value of this type
    pub fn stack_size(&self) -> usize {
        if self.is_handle() {
            crate::runtime::handle::HANDLE_SIZE
        } else {
            self.size
        }
    }

    pub fn primitive(&self) -> Option<PrimitiveKind> {
        match self.kind {
            TypeKind::Primitive(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|property| property.name == name)
    }
}

impl fmt::Debug for BoundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("base", &self.base)
            .field("copy_mode", &self.copy_mode)
            .field("handle_manager", &self.handle_manager)
            .field("native", &self.native)
            .field("dynamic", &self.derived_type.is_some())
            .finish()
    }
}

impl fmt::Display for BoundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_type_ids_follow_table_order() {
        assert_eq!(TypeId::of_primitive(PrimitiveKind::BOOLEAN), Some(TypeId::BOOLEAN));
        assert_eq!(TypeId::of_primitive(PrimitiveKind::INTEGER), Some(TypeId::INTEGER));
        assert_eq!(TypeId::of_primitive(PrimitiveKind::REAL3), Some(TypeId::REAL3));
        assert_eq!(TypeId::of_primitive(PrimitiveKind::DOUBLE_REAL), Some(TypeId::DOUBLE_REAL));
        assert_eq!(TypeId::of_primitive(PrimitiveKind::vector(ScalarKind::Byte, 3)), None);
    }

    #[test]
    fn primitive_sizes() {
        assert_eq!(PrimitiveKind::BOOLEAN3.size(), 3);
        assert_eq!(PrimitiveKind::REAL4.size(), 16);
        assert_eq!(PrimitiveKind::DOUBLE_INTEGER.size(), 8);
    }

    #[test]
    fn primitive_names() {
        assert_eq!(PrimitiveKind::INTEGER.to_string(), "Integer");
        assert_eq!(PrimitiveKind::REAL3.to_string(), "Real3");
    }
}
