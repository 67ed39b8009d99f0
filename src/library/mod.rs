//! The immutable type and function table consumed by the runtime
//!
//! A [`Library`] is built once through a [`LibraryBuilder`] and then shared
//! read-only (`Arc<Library>` is `Send + Sync`). Every library starts with the
//! same core primitive types so [`TypeId`] constants such as
//! [`TypeId::INTEGER`] mean the same thing everywhere.

pub mod function;
pub mod instruction;
pub mod types;

pub use function::{
    FrameLayout, Function, FunctionBody, FunctionDecl, NativeFn, Parameter, ProtectedRange, ScriptBody,
};
pub use instruction::{BinaryOp, CodeLocation, CompareOp, CopyKind, Instruction, Opcode, Operand, UnaryOp};
pub use types::{
    BoundType, CopyMode, DerivedTypeFn, Field, FunctionId, ManagerId, PrimitiveKind, Property, ScalarKind, TypeId,
    TypeKind,
};

use crate::runtime::call::Call;
use crate::runtime::exception::ExceptionReport;
use crate::runtime::handle::HANDLE_SIZE;
use crate::runtime::manager::HandleManager;
use crate::runtime::value::align_to_bus_width;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Allocation strategy registered under a [`ManagerId`]
///
/// Each [`ExecutableState`](crate::runtime::ExecutableState) creates its own
/// manager instances from these kinds.
#[derive(Clone, Copy)]
pub enum ManagerKind {
    Pointer,
    Heap,
    Value,
    String,
    Custom(fn(ManagerId) -> Rc<dyn HandleManager>),
}

impl std::fmt::Debug for ManagerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagerKind::Pointer => write!(f, "Pointer"),
            ManagerKind::Heap => write!(f, "Heap"),
            ManagerKind::Value => write!(f, "Value"),
            ManagerKind::String => write!(f, "String"),
            ManagerKind::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Immutable collection of bound types and functions
#[derive(Debug)]
pub struct Library {
    pub name: String,
    types: Vec<BoundType>,
    functions: Vec<Arc<Function>>,
    managers: Vec<ManagerKind>,
    type_names: HashMap<String, TypeId>,
}

impl Library {
    pub fn get_type(&self, id: TypeId) -> Option<&BoundType> {
        self.types.get(id.0 as usize)
    }

    pub fn find_type(&self, name: &str) -> Option<TypeId> {
        self.type_names.get(name).copied()
    }

    pub fn type_name(&self, id: TypeId) -> &str {
        self.get_type(id).map(|t| t.name.as_str()).unwrap_or("<unknown>")
    }

    pub fn types(&self) -> impl Iterator<Item = &BoundType> {
        self.types.iter()
    }

    pub fn function(&self, id: FunctionId) -> Option<&Arc<Function>> {
        self.functions.get(id.0 as usize)
    }

    /// Find a free function (no owner) by name
    pub fn find_function(&self, name: &str) -> Option<&Arc<Function>> {
        self.functions.iter().find(|f| f.owner.is_none() && f.name == name)
    }

    /// Find a function declared directly on `owner`
    pub fn find_method(&self, owner: TypeId, name: &str) -> Option<&Arc<Function>> {
        self.get_type(owner)?
            .functions
            .iter()
            .filter_map(|id| self.function(*id))
            .find(|f| f.name == name)
    }

    pub fn managers(&self) -> &[ManagerKind] {
        &self.managers
    }

    /// Bytes a value of `id` occupies in a frame or object, zero when unknown
    pub fn stack_size(&self, id: TypeId) -> usize {
        self.get_type(id).map_or(0, BoundType::stack_size)
    }

    pub fn is_handle_type(&self, id: TypeId) -> bool {
        self.get_type(id).is_some_and(BoundType::is_handle)
    }

    /// Whether a value stored as `from` may be read directly as `to`
    ///
    /// Permits identity, derived-to-base upcasts along the single inheritance
    /// chain, and enum-to-backing-integer widening.
    pub fn is_raw_castable(&self, from: TypeId, to: TypeId) -> bool {
        if from == to {
            return true;
        }
        let Some(from_type) = self.get_type(from) else {
            return false;
        };
        if let TypeKind::Enum { backing } = from_type.kind {
            if backing == to {
                return true;
            }
        }
        let mut current = from_type.base;
        while let Some(base) = current {
            if base == to {
                return true;
            }
            current = self.get_type(base).and_then(|t| t.base);
        }
        false
    }

    /// Resolve the override of `function` for an object whose dynamic type is `dynamic`
    ///
    /// Walks from the dynamic type towards the base until a type declares a
    /// function with the same signature; falls back to `function` itself.
    pub fn resolve_virtual(&self, dynamic: TypeId, function: &Arc<Function>) -> Arc<Function> {
        let mut current = Some(dynamic);
        while let Some(type_id) = current {
            let Some(bound) = self.get_type(type_id) else {
                break;
            };
            let found = bound
                .functions
                .iter()
                .filter_map(|id| self.function(*id))
                .find(|candidate| candidate.has_this && candidate.same_signature(function));
            if let Some(found) = found {
                return found.clone();
            }
            current = bound.base;
        }
        function.clone()
    }
}

/// Builds a [`Library`]
///
/// Stands in for the excluded binding layer and code generator: hosts describe
/// their types and functions here, by hand.
pub struct LibraryBuilder {
    name: String,
    types: Vec<BoundType>,
    functions: Vec<Arc<Function>>,
    managers: Vec<ManagerKind>,
}

impl LibraryBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let mut builder = LibraryBuilder {
            name: name.into(),
            types: Vec::new(),
            functions: Vec::new(),
            managers: vec![
                ManagerKind::Pointer,
                ManagerKind::Heap,
                ManagerKind::Value,
                ManagerKind::String,
            ],
        };
        for kind in PrimitiveKind::ALL {
            builder.push_type(
                kind.to_string(),
                TypeKind::Primitive(kind),
                kind.size(),
                None,
                CopyMode::Value,
                ManagerId::VALUE,
                true,
            );
        }
        builder.push_type(
            "String",
            TypeKind::String,
            HANDLE_SIZE,
            None,
            CopyMode::Reference,
            ManagerId::STRING,
            true,
        );
        builder.push_type("Any", TypeKind::Any, HANDLE_SIZE, None, CopyMode::Value, ManagerId::VALUE, true);
        debug_assert_eq!(builder.types.len() as u32, TypeId::CORE_COUNT);
        builder
    }

    #[allow(clippy::too_many_arguments)]
    fn push_type(
        &mut self,
        name: impl Into<String>,
        kind: TypeKind,
        size: usize,
        base: Option<TypeId>,
        copy_mode: CopyMode,
        handle_manager: ManagerId,
        native: bool,
    ) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(BoundType {
            id,
            name: name.into(),
            kind,
            size,
            base,
            copy_mode,
            handle_manager,
            fields: Vec::new(),
            properties: Vec::new(),
            functions: Vec::new(),
            native,
            derived_type: None,
        });
        id
    }

    /// Register an additional handle manager strategy
    pub fn add_manager(&mut self, kind: ManagerKind) -> ManagerId {
        self.managers.push(kind);
        ManagerId((self.managers.len() - 1) as u16)
    }

    /// Add a script class whose layout grows as fields are added
    ///
    /// A derived class starts with its base's layout.
    pub fn add_class(&mut self, name: impl Into<String>, base: Option<TypeId>) -> TypeId {
        let size = base.map(|b| self.types[b.0 as usize].size).unwrap_or(0);
        let fields = base
            .map(|b| self.types[b.0 as usize].fields.clone())
            .unwrap_or_default();
        let id = self.push_type(name, TypeKind::Class, size, base, CopyMode::Reference, ManagerId::HEAP, false);
        self.types[id.0 as usize].fields = fields;
        id
    }

    /// Add a host type of fixed size managed by `manager`
    pub fn add_native_type(
        &mut self,
        name: impl Into<String>,
        size: usize,
        base: Option<TypeId>,
        copy_mode: CopyMode,
        manager: ManagerId,
    ) -> TypeId {
        self.push_type(name, TypeKind::Class, size, base, copy_mode, manager, true)
    }

    /// Add an enumeration backed by Integer
    pub fn add_enum(&mut self, name: impl Into<String>) -> TypeId {
        self.push_type(
            name,
            TypeKind::Enum {
                backing: TypeId::INTEGER,
            },
            PrimitiveKind::INTEGER.size(),
            None,
            CopyMode::Value,
            ManagerId::VALUE,
            false,
        )
    }

    /// Append a field to a class and return its byte offset
    pub fn add_field(&mut self, owner: TypeId, name: impl Into<String>, field_type: TypeId) -> usize {
        let field_size = self.stack_size(field_type);
        let bound = &mut self.types[owner.0 as usize];
        let offset = align_to_bus_width(bound.size);
        bound.size = offset + field_size;
        bound.fields.push(Field {
            name: name.into(),
            offset,
            field_type,
        });
        offset
    }

    /// Declare a field of a native type at a known offset
    pub fn add_native_field(&mut self, owner: TypeId, name: impl Into<String>, offset: usize, field_type: TypeId) {
        self.types[owner.0 as usize].fields.push(Field {
            name: name.into(),
            offset,
            field_type,
        });
    }

    pub fn add_property(
        &mut self,
        owner: TypeId,
        name: impl Into<String>,
        property_type: TypeId,
        getter: FunctionId,
        setter: Option<FunctionId>,
    ) -> usize {
        let bound = &mut self.types[owner.0 as usize];
        bound.properties.push(Property {
            name: name.into(),
            property_type,
            getter,
            setter,
        });
        bound.properties.len() - 1
    }

    /// Opt a type into dynamic dispatch through a derived type lookup
    pub fn set_derived_type(&mut self, owner: TypeId, lookup: DerivedTypeFn) {
        self.types[owner.0 as usize].derived_type = Some(lookup);
    }

    pub fn add_native_function(
        &mut self,
        decl: FunctionDecl,
        callback: impl Fn(&mut Call<'_>, &mut ExceptionReport) + Send + Sync + 'static,
    ) -> FunctionId {
        self.push_function(decl, FunctionBody::Native(Arc::new(callback)))
    }

    pub fn add_script_function(&mut self, decl: FunctionDecl, body: ScriptBody) -> FunctionId {
        self.push_function(decl, FunctionBody::Script(body))
    }

    fn push_function(&mut self, decl: FunctionDecl, body: FunctionBody) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        let layout = FrameLayout::compute(&decl, |t| self.stack_size(t));
        let frame_size = match &body {
            FunctionBody::Script(script) => script.frame_size.max(layout.locals_start),
            FunctionBody::Native(_) => layout.locals_start,
        };
        if let Some(owner) = decl.owner {
            self.types[owner.0 as usize].functions.push(id);
        }
        self.functions.push(Arc::new(Function {
            id,
            name: decl.name,
            owner: decl.owner,
            has_this: decl.has_this,
            is_virtual: decl.is_virtual,
            parameters: decl.parameters,
            return_type: decl.return_type,
            variadic: decl.variadic,
            layout,
            frame_size,
            body,
        }));
        id
    }

    /// Unknown ids lay out as empty and are reported by [`LibraryBuilder::build`]
    fn stack_size(&self, id: TypeId) -> usize {
        self.types.get(id.0 as usize).map_or(0, BoundType::stack_size)
    }

    /// Type ids named by fields, bases and signatures that no type answers to
    fn unknown_type_references(&self) -> Vec<TypeId> {
        let known = |id: &TypeId| (id.0 as usize) < self.types.len();
        let from_types = self.types.iter().flat_map(|t| {
            let fields = t.fields.iter().map(|f| f.field_type);
            let properties = t.properties.iter().map(|p| p.property_type);
            t.base.into_iter().chain(fields).chain(properties)
        });
        let from_functions = self.functions.iter().flat_map(|f| {
            let parameters = f.parameters.iter().map(|p| p.param_type);
            f.owner.into_iter().chain(f.return_type).chain(parameters)
        });
        from_types.chain(from_functions).filter(|id| !known(id)).collect()
    }

    /// Layout a function with this signature would get, for hand-written bodies
    pub fn layout_of(&self, decl: &FunctionDecl) -> FrameLayout {
        FrameLayout::compute(decl, |t| self.stack_size(t))
    }

    pub fn build(self) -> Arc<Library> {
        debug_assert!(
            self.unknown_type_references().is_empty(),
            "library {} references unknown types {:?}",
            self.name,
            self.unknown_type_references()
        );
        let type_names = self.types.iter().map(|t| (t.name.clone(), t.id)).collect();
        Arc::new(Library {
            name: self.name,
            types: self.types,
            functions: self.functions,
            managers: self.managers,
            type_names,
        })
    }
}
