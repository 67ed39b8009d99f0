//! Function descriptors
//!
//! A [`Function`] is either a native callback or a script body. Both share the
//! same [`FrameLayout`], so a caller marshals arguments the same way regardless
//! of which kind it is calling.

use super::instruction::{Instruction, Operand};
use super::types::{FunctionId, TypeId};
use crate::runtime::call::Call;
use crate::runtime::exception::ExceptionReport;
use crate::runtime::value::{align_to_bus_width, Marshal};
use std::fmt;
use std::sync::Arc;

/// Host callback invoked through [`Call::invoke`]
pub type NativeFn = Arc<dyn Fn(&mut Call<'_>, &mut ExceptionReport) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub param_type: TypeId,
}

/// Declaration of a function's signature, used when adding it to a library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDecl {
    pub name: String,
    pub owner: Option<TypeId>,
    pub has_this: bool,
    pub is_virtual: bool,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<TypeId>,
    /// Number of trailing `Any` parameters that make up the variable arguments
    pub variadic: Option<usize>,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>) -> Self {
        FunctionDecl {
            name: name.into(),
            owner: None,
            has_this: false,
            is_virtual: false,
            parameters: Vec::new(),
            return_type: None,
            variadic: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, param_type: TypeId) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            param_type,
        });
        self
    }

    pub fn returns(mut self, return_type: TypeId) -> Self {
        self.return_type = Some(return_type);
        self
    }

    /// An instance method taking a `this` handle
    pub fn method(mut self, owner: TypeId) -> Self {
        self.owner = Some(owner);
        self.has_this = true;
        self
    }

    /// A static function listed on a type
    pub fn static_on(mut self, owner: TypeId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn virtual_method(self, owner: TypeId) -> Self {
        let mut decl = self.method(owner);
        decl.is_virtual = true;
        decl
    }

    pub fn variadic(mut self, count: usize) -> Self {
        self.variadic = Some(count);
        self
    }
}

/// Byte offsets of the fixed slots at the start of every frame
///
/// ```text
/// [ return ][ this ][ param 0 ][ param 1 ] ... [ locals ... ]
/// ```
///
/// Every slot is aligned to the bus width, so three Booleans followed by an
/// Integer land at offsets 0, 4, 8 and 12.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameLayout {
    pub return_offset: Option<usize>,
    pub this_offset: Option<usize>,
    pub parameter_offsets: Vec<usize>,
    /// First byte after the fixed slots
    pub locals_start: usize,
}

impl FrameLayout {
    /// Lays out slots given the stack size of each type
    pub fn compute(decl: &FunctionDecl, stack_size: impl Fn(TypeId) -> usize) -> Self {
        let mut offset = 0;
        let mut layout = FrameLayout::default();

        if let Some(return_type) = decl.return_type {
            layout.return_offset = Some(offset);
            offset += align_to_bus_width(stack_size(return_type));
        }
        if decl.has_this {
            layout.this_offset = Some(offset);
            offset += align_to_bus_width(crate::runtime::handle::HANDLE_SIZE);
        }
        for parameter in &decl.parameters {
            layout.parameter_offsets.push(offset);
            offset += align_to_bus_width(stack_size(parameter.param_type));
        }
        layout.locals_start = offset;
        layout
    }
}

/// A `[start, end)` instruction range guarded by a catch handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedRange {
    pub start: usize,
    pub end: usize,
    /// Instruction index the handler starts at
    pub handler: usize,
    /// Local that receives the exception message as a string handle
    pub exception_local: Option<usize>,
    /// Handle locals declared inside the range, released before the handler runs
    pub scoped_locals: Vec<usize>,
}

impl ProtectedRange {
    pub fn new(start: usize, end: usize, handler: usize) -> Self {
        ProtectedRange {
            start,
            end,
            handler,
            exception_local: None,
            scoped_locals: Vec::new(),
        }
    }

    pub fn contains(&self, pc: usize) -> bool {
        pc >= self.start && pc < self.end
    }
}

/// Compiled body of a script function
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptBody {
    pub instructions: Vec<Instruction>,
    /// Declared frame size; raised to cover the fixed slots if smaller
    pub frame_size: usize,
    pub constants: Vec<u8>,
    pub strings: Vec<String>,
    pub protected_ranges: Vec<ProtectedRange>,
}

impl ScriptBody {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        ScriptBody {
            instructions,
            ..ScriptBody::default()
        }
    }

    pub fn frame_size(mut self, size: usize) -> Self {
        self.frame_size = size;
        self
    }

    pub fn protect(mut self, range: ProtectedRange) -> Self {
        self.protected_ranges.push(range);
        self
    }

    /// Append a constant to the pool and return its operand
    pub fn constant<T: Marshal>(&mut self, value: T) -> Operand {
        let offset = self.constants.len();
        self.constants.resize(offset + align_to_bus_width(T::SIZE), 0);
        value.write(&mut self.constants[offset..offset + T::SIZE]);
        Operand::Constant(offset)
    }

    /// Append a string literal and return its index
    pub fn string(&mut self, text: impl Into<String>) -> usize {
        self.strings.push(text.into());
        self.strings.len() - 1
    }

    /// The innermost protected range covering `pc`
    pub fn handler_for(&self, pc: usize) -> Option<&ProtectedRange> {
        self.protected_ranges
            .iter()
            .filter(|range| range.contains(pc))
            .min_by_key(|range| range.end - range.start)
    }
}

pub enum FunctionBody {
    Native(NativeFn),
    Script(ScriptBody),
}

impl fmt::Debug for FunctionBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionBody::Native(_) => write!(f, "Native"),
            FunctionBody::Script(body) => write!(f, "Script({} instructions)", body.instructions.len()),
        }
    }
}

/// Immutable descriptor of a callable function
#[derive(Debug)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    pub owner: Option<TypeId>,
    pub has_this: bool,
    pub is_virtual: bool,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<TypeId>,
    pub variadic: Option<usize>,
    pub layout: FrameLayout,
    /// Total bytes of a frame for this function
    pub frame_size: usize,
    pub body: FunctionBody,
}

impl Function {
    pub fn is_native(&self) -> bool {
        matches!(self.body, FunctionBody::Native(_))
    }

    pub fn script(&self) -> Option<&ScriptBody> {
        match &self.body {
            FunctionBody::Script(body) => Some(body),
            FunctionBody::Native(_) => None,
        }
    }

    /// Same name and parameter types, used to find overrides
    pub fn same_signature(&self, other: &Function) -> bool {
        self.name == other.name
            && self.parameters.len() == other.parameters.len()
            && self
                .parameters
                .iter()
                .zip(&other.parameters)
                .all(|(a, b)| a.param_type == b.param_type)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
