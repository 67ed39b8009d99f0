//! Primitive values and their byte representation
//!
//! Frames and objects are raw little-endian byte regions. [`Scalar`] knows how
//! to read and write one component, [`Vector`] packs up to four components,
//! and [`Marshal`] ties a Rust type to the script type it travels as.

use super::handle::Handle;
use crate::library::{Library, PrimitiveKind, ScalarKind, TypeId};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Stride every argument and local slot is aligned to
pub const BUS_WIDTH: usize = 4;

/// Round `size` up to the next multiple of [`BUS_WIDTH`]
pub fn align_to_bus_width(size: usize) -> usize {
    (size + BUS_WIDTH - 1) & !(BUS_WIDTH - 1)
}

/// One component of a primitive value
pub trait Scalar: Copy + Default + PartialEq + PartialOrd + fmt::Debug + 'static {
    const KIND: ScalarKind;

    fn read(bytes: &[u8]) -> Self;
    fn write(self, bytes: &mut [u8]);
    fn is_zero(self) -> bool;
    fn to_f64(self) -> f64;
    fn to_i64(self) -> i64;
    fn from_f64(value: f64) -> Self;
    fn from_i64(value: i64) -> Self;
}

impl Scalar for bool {
    const KIND: ScalarKind = ScalarKind::Boolean;

    fn read(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
    fn write(self, bytes: &mut [u8]) {
        bytes[0] = self as u8;
    }
    fn is_zero(self) -> bool {
        !self
    }
    fn to_f64(self) -> f64 {
        self as u8 as f64
    }
    fn to_i64(self) -> i64 {
        self as i64
    }
    fn from_f64(value: f64) -> Self {
        value != 0.0
    }
    fn from_i64(value: i64) -> Self {
        value != 0
    }
}

impl Scalar for u8 {
    const KIND: ScalarKind = ScalarKind::Byte;

    fn read(bytes: &[u8]) -> Self {
        bytes[0]
    }
    fn write(self, bytes: &mut [u8]) {
        bytes[0] = self;
    }
    fn is_zero(self) -> bool {
        self == 0
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn to_i64(self) -> i64 {
        self as i64
    }
    fn from_f64(value: f64) -> Self {
        value as u8
    }
    fn from_i64(value: i64) -> Self {
        value as u8
    }
}

macro_rules! impl_scalar {
    ($ty:ty, $kind:ident, $read:ident, $write:ident) => {
        impl Scalar for $ty {
            const KIND: ScalarKind = ScalarKind::$kind;

            fn read(bytes: &[u8]) -> Self {
                LittleEndian::$read(bytes)
            }
            fn write(self, bytes: &mut [u8]) {
                LittleEndian::$write(bytes, self)
            }
            fn is_zero(self) -> bool {
                self == (0 as $ty)
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn to_i64(self) -> i64 {
                self as i64
            }
            fn from_f64(value: f64) -> Self {
                value as $ty
            }
            fn from_i64(value: i64) -> Self {
                value as $ty
            }
        }
    };
}

impl_scalar!(i32, Integer, read_i32, write_i32);
impl_scalar!(i64, DoubleInteger, read_i64, write_i64);
impl_scalar!(f32, Real, read_f32, write_f32);
impl_scalar!(f64, DoubleReal, read_f64, write_f64);

/// Read `count` packed components
pub fn read_lanes<T: Scalar>(bytes: &[u8], count: usize) -> [T; 4] {
    let size = T::KIND.size();
    let mut lanes = [T::default(); 4];
    for (i, lane) in lanes.iter_mut().enumerate().take(count) {
        *lane = T::read(&bytes[i * size..(i + 1) * size]);
    }
    lanes
}

/// Write `count` packed components
pub fn write_lanes<T: Scalar>(bytes: &mut [u8], lanes: &[T; 4], count: usize) {
    let size = T::KIND.size();
    for (i, lane) in lanes.iter().enumerate().take(count) {
        lane.write(&mut bytes[i * size..(i + 1) * size]);
    }
}

/// A fixed-size vector of scalar components, e.g. `Vector<f32, 3>` is Real3
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector<T: Scalar, const N: usize>(pub [T; N]);

impl<T: Scalar, const N: usize> Default for Vector<T, N> {
    fn default() -> Self {
        Vector([T::default(); N])
    }
}

impl<T: Scalar, const N: usize> From<[T; N]> for Vector<T, N> {
    fn from(components: [T; N]) -> Self {
        Vector(components)
    }
}

pub type Boolean2 = Vector<bool, 2>;
pub type Boolean3 = Vector<bool, 3>;
pub type Boolean4 = Vector<bool, 4>;
pub type Integer2 = Vector<i32, 2>;
pub type Integer3 = Vector<i32, 3>;
pub type Integer4 = Vector<i32, 4>;
pub type Real2 = Vector<f32, 2>;
pub type Real3 = Vector<f32, 3>;
pub type Real4 = Vector<f32, 4>;

/// A Rust type that can cross the native/script boundary by value
pub trait Marshal: Sized {
    /// Packed size in bytes
    const SIZE: usize;

    /// The script type this value travels as
    fn script_type(library: &Library) -> Option<TypeId>;
    fn read(bytes: &[u8]) -> Self;
    fn write(&self, bytes: &mut [u8]);
    /// Value returned alongside a reported failure
    fn zeroed() -> Self;
}

macro_rules! impl_marshal_scalar {
    ($($ty:ty),*) => {
        $(
            impl Marshal for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn script_type(_library: &Library) -> Option<TypeId> {
                    TypeId::of_primitive(PrimitiveKind::scalar(<$ty as Scalar>::KIND))
                }
                fn read(bytes: &[u8]) -> Self {
                    <$ty as Scalar>::read(bytes)
                }
                fn write(&self, bytes: &mut [u8]) {
                    <$ty as Scalar>::write(*self, bytes)
                }
                fn zeroed() -> Self {
                    <$ty>::default()
                }
            }
        )*
    };
}

impl_marshal_scalar!(bool, u8, i32, i64, f32, f64);

impl<T: Scalar, const N: usize> Marshal for Vector<T, N> {
    const SIZE: usize = N * std::mem::size_of::<T>();

    fn script_type(_library: &Library) -> Option<TypeId> {
        TypeId::of_primitive(PrimitiveKind::vector(T::KIND, N as u8))
    }
    fn read(bytes: &[u8]) -> Self {
        let size = T::KIND.size();
        let mut out = [T::default(); N];
        for (i, component) in out.iter_mut().enumerate() {
            *component = T::read(&bytes[i * size..(i + 1) * size]);
        }
        Vector(out)
    }
    fn write(&self, bytes: &mut [u8]) {
        let size = T::KIND.size();
        for (i, component) in self.0.iter().enumerate() {
            component.write(&mut bytes[i * size..(i + 1) * size]);
        }
    }
    fn zeroed() -> Self {
        Vector::default()
    }
}

/// Dynamically typed value used by the top-level invoke API
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Byte(u8),
    Integer(i32),
    DoubleInteger(i64),
    Real(f32),
    DoubleReal(f64),
    Boolean2(Boolean2),
    Boolean3(Boolean3),
    Boolean4(Boolean4),
    Integer2(Integer2),
    Integer3(Integer3),
    Integer4(Integer4),
    Real2(Real2),
    Real3(Real3),
    Real4(Real4),
    /// Strings, objects and boxed `Any` values
    Handle(Handle),
}

impl Value {
    /// The primitive kind of a by-value variant
    pub fn primitive(&self) -> Option<PrimitiveKind> {
        Some(match self {
            Value::Boolean(_) => PrimitiveKind::BOOLEAN,
            Value::Byte(_) => PrimitiveKind::BYTE,
            Value::Integer(_) => PrimitiveKind::INTEGER,
            Value::DoubleInteger(_) => PrimitiveKind::DOUBLE_INTEGER,
            Value::Real(_) => PrimitiveKind::REAL,
            Value::DoubleReal(_) => PrimitiveKind::DOUBLE_REAL,
            Value::Boolean2(_) => PrimitiveKind::BOOLEAN2,
            Value::Boolean3(_) => PrimitiveKind::BOOLEAN3,
            Value::Boolean4(_) => PrimitiveKind::BOOLEAN4,
            Value::Integer2(_) => PrimitiveKind::INTEGER2,
            Value::Integer3(_) => PrimitiveKind::INTEGER3,
            Value::Integer4(_) => PrimitiveKind::INTEGER4,
            Value::Real2(_) => PrimitiveKind::REAL2,
            Value::Real3(_) => PrimitiveKind::REAL3,
            Value::Real4(_) => PrimitiveKind::REAL4,
            Value::Handle(_) => return None,
        })
    }

    /// Script type of the value; handles report their stored type
    pub fn type_id(&self) -> Option<TypeId> {
        match self {
            Value::Handle(handle) => handle.stored_type(),
            other => other.primitive().and_then(TypeId::of_primitive),
        }
    }

    /// Packed bytes of a by-value variant
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        let kind = self.primitive()?;
        let mut bytes = vec![0u8; kind.size()];
        match self {
            Value::Boolean(v) => Marshal::write(v, &mut bytes),
            Value::Byte(v) => Marshal::write(v, &mut bytes),
            Value::Integer(v) => Marshal::write(v, &mut bytes),
            Value::DoubleInteger(v) => Marshal::write(v, &mut bytes),
            Value::Real(v) => Marshal::write(v, &mut bytes),
            Value::DoubleReal(v) => Marshal::write(v, &mut bytes),
            Value::Boolean2(v) => v.write(&mut bytes),
            Value::Boolean3(v) => v.write(&mut bytes),
            Value::Boolean4(v) => v.write(&mut bytes),
            Value::Integer2(v) => v.write(&mut bytes),
            Value::Integer3(v) => v.write(&mut bytes),
            Value::Integer4(v) => v.write(&mut bytes),
            Value::Real2(v) => v.write(&mut bytes),
            Value::Real3(v) => v.write(&mut bytes),
            Value::Real4(v) => v.write(&mut bytes),
            Value::Handle(_) => return None,
        }
        Some(bytes)
    }

    /// Decode a primitive value from packed bytes
    pub fn from_bytes(kind: PrimitiveKind, bytes: &[u8]) -> Option<Value> {
        Some(match kind {
            PrimitiveKind::BOOLEAN => Value::Boolean(Marshal::read(bytes)),
            PrimitiveKind::BYTE => Value::Byte(Marshal::read(bytes)),
            PrimitiveKind::INTEGER => Value::Integer(Marshal::read(bytes)),
            PrimitiveKind::DOUBLE_INTEGER => Value::DoubleInteger(Marshal::read(bytes)),
            PrimitiveKind::REAL => Value::Real(Marshal::read(bytes)),
            PrimitiveKind::DOUBLE_REAL => Value::DoubleReal(Marshal::read(bytes)),
            PrimitiveKind::BOOLEAN2 => Value::Boolean2(Marshal::read(bytes)),
            PrimitiveKind::BOOLEAN3 => Value::Boolean3(Marshal::read(bytes)),
            PrimitiveKind::BOOLEAN4 => Value::Boolean4(Marshal::read(bytes)),
            PrimitiveKind::INTEGER2 => Value::Integer2(Marshal::read(bytes)),
            PrimitiveKind::INTEGER3 => Value::Integer3(Marshal::read(bytes)),
            PrimitiveKind::INTEGER4 => Value::Integer4(Marshal::read(bytes)),
            PrimitiveKind::REAL2 => Value::Real2(Marshal::read(bytes)),
            PrimitiveKind::REAL3 => Value::Real3(Marshal::read(bytes)),
            PrimitiveKind::REAL4 => Value::Real4(Marshal::read(bytes)),
            _ => return None,
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::DoubleInteger(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::DoubleReal(v) => write!(f, "{v}"),
            Value::Boolean2(v) => write!(f, "{:?}", v.0),
            Value::Boolean3(v) => write!(f, "{:?}", v.0),
            Value::Boolean4(v) => write!(f, "{:?}", v.0),
            Value::Integer2(v) => write!(f, "{:?}", v.0),
            Value::Integer3(v) => write!(f, "{:?}", v.0),
            Value::Integer4(v) => write!(f, "{:?}", v.0),
            Value::Real2(v) => write!(f, "{:?}", v.0),
            Value::Real3(v) => write!(f, "{:?}", v.0),
            Value::Real4(v) => write!(f, "{:?}", v.0),
            Value::Handle(handle) => write!(f, "{handle:?}"),
        }
    }
}
