//! # The type registry
//!
//! All types live in a single arena owned by [Types] and are referred to by
//! [TypeId]. The registry interns aggressively: it guarantees at most one
//! instance per canonical printed form, so *all* type equality checks in
//! the analyzer are id comparisons. Types form a cyclic graph — a class
//! refers to its vtable, whose slot types are function types whose first
//! argument is a pointer back to the class — which ids express without any
//! ownership cycle.
//!
//! Aliases are transparent: looking a name up through [Types::get] unwraps
//! an alias to its base type, so a typedef'd function pointer and the
//! equivalent structural type are the same id. The raw registry still holds
//! the alias so its name survives into printed output.

pub mod names;

use std::collections::HashMap;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::common::multiphase::Identifier;
use crate::parsing::nodes::{NodeId, Virtuality};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TypeId(u32);

impl TypeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The built-in plain-old-data types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pod {
    Int,
    Double,
    Char,
    Void,
}

impl Pod {
    pub fn as_str(self) -> &'static str {
        match self {
            Pod::Int => "int",
            Pod::Double => "double",
            Pod::Char => "char",
            Pod::Void => "void",
        }
    }
}

/// A named member of a complex type: a struct or class field, an interface
/// method signature, or a vtable slot.
#[derive(Clone, Debug)]
pub struct FieldInfo {
    pub name: Identifier,
    pub ty: TypeId,
    pub decl: NodeId,
}

/// A class method: its declared name, the mangled free-function name it
/// lowers to, its function type (first argument: pointer to the owning
/// class), the class that declared it, and how it dispatches.
#[derive(Clone, Debug)]
pub struct MethodInfo {
    pub name: Identifier,
    pub full_name: Identifier,
    pub ty: TypeId,
    pub decl: NodeId,
    pub owner: TypeId,
    pub virtuality: Virtuality,
}

#[derive(Clone, Debug)]
pub struct StructData {
    pub name: Identifier,
    pub fields: IndexMap<Identifier, FieldInfo>,
    pub fully_defined: bool,
}

#[derive(Clone, Debug)]
pub struct InterfaceData {
    pub name: Identifier,
    pub methods: IndexMap<Identifier, FieldInfo>,
    pub fully_defined: bool,
}

#[derive(Clone, Debug)]
pub struct VTableData {
    pub name: Identifier,
    pub slots: IndexMap<Identifier, FieldInfo>,
}

#[derive(Clone, Debug)]
pub struct ClassData {
    pub name: Identifier,
    pub base: Option<TypeId>,
    pub vtable: TypeId,
    pub fields: IndexMap<Identifier, FieldInfo>,
    pub methods: IndexMap<Identifier, MethodInfo>,
    pub interfaces: Vec<TypeId>,
    pub is_abstract: bool,
    pub fully_defined: bool,
    /// The defining declaration, once analyzed. The emitter follows this to
    /// flatten base-class fields into derived structs.
    pub decl: Option<NodeId>,
}

#[derive(Clone, Debug)]
pub enum Type {
    Pod(Pod),
    Pointer { base: TypeId },
    Alias { name: Identifier, base: TypeId },
    Function { return_type: TypeId, args: Vec<TypeId> },
    Struct(StructData),
    Interface(InterfaceData),
    VTable(VTableData),
    Class(ClassData),
}

#[derive(Debug)]
pub struct Types {
    entries: Vec<Type>,
    by_name: HashMap<String, TypeId>,
    int: TypeId,
    double: TypeId,
    char_: TypeId,
    void: TypeId,
}

impl Default for Types {
    fn default() -> Self {
        let mut types = Self {
            entries: vec![],
            by_name: HashMap::new(),
            int: TypeId(0),
            double: TypeId(0),
            char_: TypeId(0),
            void: TypeId(0),
        };
        types.int = types.insert_named(Pod::Int.as_str(), Type::Pod(Pod::Int));
        types.double = types.insert_named(Pod::Double.as_str(), Type::Pod(Pod::Double));
        types.char_ = types.insert_named(Pod::Char.as_str(), Type::Pod(Pod::Char));
        types.void = types.insert_named(Pod::Void.as_str(), Type::Pod(Pod::Void));
        types
    }
}

impl Types {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, ty: Type) -> TypeId {
        let id = TypeId(self.entries.len() as u32);
        self.entries.push(ty);
        id
    }

    fn insert_named(&mut self, name: impl Into<String>, ty: Type) -> TypeId {
        let id = self.insert(ty);
        self.by_name.insert(name.into(), id);
        id
    }

    pub fn type_of(&self, id: TypeId) -> &Type {
        &self.entries[id.index()]
    }

    fn type_mut(&mut self, id: TypeId) -> &mut Type {
        &mut self.entries[id.index()]
    }

    // POD singletons.

    pub fn int(&self) -> TypeId {
        self.int
    }

    pub fn double(&self) -> TypeId {
        self.double
    }

    pub fn char_(&self) -> TypeId {
        self.char_
    }

    pub fn void(&self) -> TypeId {
        self.void
    }

    /// Look a type name up, unwrapping an alias to its base type.
    pub fn get(&self, name: &str) -> Option<TypeId> {
        let id = *self.by_name.get(name)?;
        match self.type_of(id) {
            Type::Alias { base, .. } => Some(*base),
            _ => Some(id),
        }
    }

    pub fn is_type_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    // Canonical printed forms. Interning keys off these, which is what
    // makes id equality coincide with structural equality.

    pub fn name_of(&self, id: TypeId) -> String {
        match self.type_of(id) {
            Type::Pod(pod) => pod.as_str().to_owned(),
            Type::Pointer { base } => format!("{}*", self.name_of(*base)),
            Type::Alias { name, .. } => name.to_string(),
            Type::Function { return_type, args } => format!(
                "{} ({})",
                self.name_of(*return_type),
                args.iter().map(|&arg| self.name_of(arg)).join(", ")
            ),
            Type::Struct(data) => data.name.to_string(),
            Type::Interface(data) => data.name.to_string(),
            Type::VTable(data) => data.name.to_string(),
            Type::Class(data) => data.name.to_string(),
        }
    }

    // Interning constructors.

    /// Requesting a pointer type for the same base always yields the same
    /// id.
    pub fn pointer_to(&mut self, base: TypeId) -> TypeId {
        let name = format!("{}*", self.name_of(base));
        if let Some(&id) = self.by_name.get(&name) {
            return id;
        }
        self.insert_named(name, Type::Pointer { base })
    }

    /// A function type whose printed signature collides with an existing
    /// entry returns the existing entry.
    pub fn function(&mut self, return_type: TypeId, args: Vec<TypeId>) -> TypeId {
        let name = format!(
            "{} ({})",
            self.name_of(return_type),
            args.iter().map(|&arg| self.name_of(arg)).join(", ")
        );
        if let Some(&id) = self.by_name.get(&name) {
            return id;
        }
        self.insert_named(name, Type::Function { return_type, args })
    }

    /// Creating an alias with an already-bound name is an error.
    pub fn alias(&mut self, name: Identifier, base: TypeId) -> Option<TypeId> {
        if self.by_name.contains_key(name.as_str()) {
            return None;
        }
        Some(self.insert_named(name.to_string(), Type::Alias { name, base }))
    }

    /// Return the struct already registered under `name`, or register an
    /// empty, not-yet-defined one. `None` means the name is already bound
    /// to a different kind of type.
    pub fn get_or_create_struct(&mut self, name: &Identifier) -> Option<TypeId> {
        if let Some(&id) = self.by_name.get(name.as_str()) {
            return match self.type_of(id) {
                Type::Struct(_) => Some(id),
                _ => None,
            };
        }
        Some(self.insert_named(
            name.to_string(),
            Type::Struct(StructData {
                name: name.clone(),
                fields: IndexMap::new(),
                fully_defined: false,
            }),
        ))
    }

    pub fn get_or_create_interface(&mut self, name: &Identifier) -> Option<TypeId> {
        if let Some(&id) = self.by_name.get(name.as_str()) {
            return match self.type_of(id) {
                Type::Interface(_) => Some(id),
                _ => None,
            };
        }
        Some(self.insert_named(
            name.to_string(),
            Type::Interface(InterfaceData {
                name: name.clone(),
                methods: IndexMap::new(),
                fully_defined: false,
            }),
        ))
    }

    /// Return the class already registered under `name`, or register an
    /// empty one along with its vtable type.
    pub fn get_or_create_class(&mut self, name: &Identifier) -> Option<TypeId> {
        if let Some(&id) = self.by_name.get(name.as_str()) {
            return match self.type_of(id) {
                Type::Class(_) => Some(id),
                _ => None,
            };
        }
        let vtable_name = names::vtable(name);
        let vtable = self.insert_named(
            vtable_name.to_string(),
            Type::VTable(VTableData {
                name: vtable_name,
                slots: IndexMap::new(),
            }),
        );
        Some(self.insert_named(
            name.to_string(),
            Type::Class(ClassData {
                name: name.clone(),
                base: None,
                vtable,
                fields: IndexMap::new(),
                methods: IndexMap::new(),
                interfaces: vec![],
                is_abstract: false,
                fully_defined: false,
                decl: None,
            }),
        ))
    }

    // Structured accessors. These panic on kind mismatches, which are
    // internal invariant violations rather than user errors.

    pub fn as_class(&self, id: TypeId) -> Option<&ClassData> {
        match self.type_of(id) {
            Type::Class(data) => Some(data),
            _ => None,
        }
    }

    pub fn class(&self, id: TypeId) -> &ClassData {
        self.as_class(id).expect("type is not a class")
    }

    pub fn class_mut(&mut self, id: TypeId) -> &mut ClassData {
        match self.type_mut(id) {
            Type::Class(data) => data,
            _ => panic!("type is not a class"),
        }
    }

    pub fn struct_data(&self, id: TypeId) -> &StructData {
        match self.type_of(id) {
            Type::Struct(data) => data,
            _ => panic!("type is not a struct"),
        }
    }

    pub fn struct_mut(&mut self, id: TypeId) -> &mut StructData {
        match self.type_mut(id) {
            Type::Struct(data) => data,
            _ => panic!("type is not a struct"),
        }
    }

    pub fn interface_mut(&mut self, id: TypeId) -> &mut InterfaceData {
        match self.type_mut(id) {
            Type::Interface(data) => data,
            _ => panic!("type is not an interface"),
        }
    }

    pub fn vtable(&self, id: TypeId) -> &VTableData {
        match self.type_of(id) {
            Type::VTable(data) => data,
            _ => panic!("type is not a vtable"),
        }
    }

    pub fn vtable_mut(&mut self, id: TypeId) -> &mut VTableData {
        match self.type_mut(id) {
            Type::VTable(data) => data,
            _ => panic!("type is not a vtable"),
        }
    }

    // Predicates.

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.type_of(id), Type::Pointer { .. })
    }

    pub fn is_pod(&self, id: TypeId) -> bool {
        id == self.int || id == self.double || id == self.char_
    }

    pub fn converts_to_bool(&self, id: TypeId) -> bool {
        self.is_pointer(id) || self.is_pod(id)
    }

    pub fn is_complex(&self, id: TypeId) -> bool {
        matches!(
            self.type_of(id),
            Type::Struct(_) | Type::Interface(_) | Type::VTable(_) | Type::Class(_)
        )
    }

    /// Whether the type's layout is finalized and it is therefore safe to
    /// instantiate. Fully-defined is recursive through aliases; structs and
    /// classes become fully defined only once their bodies have been
    /// analyzed.
    pub fn is_fully_defined(&self, id: TypeId) -> bool {
        match self.type_of(id) {
            Type::Pod(_) | Type::Pointer { .. } | Type::Function { .. } | Type::VTable(_) => true,
            Type::Alias { base, .. } => self.is_fully_defined(*base),
            Type::Struct(data) => data.fully_defined,
            Type::Interface(data) => data.fully_defined,
            Type::Class(data) => data.fully_defined,
        }
    }

    /// Whether a variable of this type needs a generated constructor call:
    /// classes always do (their vtable pointer must be set), and a struct
    /// does as soon as it transitively contains such a field. Pointer
    /// fields do not propagate the requirement.
    pub fn requires_implicit_construction(&self, id: TypeId) -> bool {
        match self.type_of(id) {
            Type::Class(_) => true,
            Type::VTable(_) => false,
            Type::Struct(StructData { fields, .. })
            | Type::Interface(InterfaceData { methods: fields, .. }) => fields
                .values()
                .any(|field| {
                    self.is_complex(field.ty) && self.requires_implicit_construction(field.ty)
                }),
            _ => false,
        }
    }

    /// Unwrap pointers and aliases down to a complex type, if one is at the
    /// core. Member access works through one level of pointer, which this
    /// serves.
    pub fn core_complex(&self, id: TypeId) -> Option<TypeId> {
        match self.type_of(id) {
            Type::Pointer { base } => self.core_complex(*base),
            Type::Alias { base, .. } => self.core_complex(*base),
            _ if self.is_complex(id) => Some(id),
            _ => None,
        }
    }

    pub fn core_class(&self, id: TypeId) -> Option<TypeId> {
        let core = self.core_complex(id)?;
        self.as_class(core).map(|_| core)
    }

    /// The function type behind a callee: a function id itself, or one
    /// pointer (possibly via a typedef alias) away from one.
    pub fn function_core(&self, id: TypeId) -> Option<TypeId> {
        match self.type_of(id) {
            Type::Function { .. } => Some(id),
            Type::Pointer { base } | Type::Alias { base, .. } => match self.type_of(*base) {
                Type::Function { .. } => Some(*base),
                Type::Alias { base: inner, .. } | Type::Pointer { base: inner } => {
                    match self.type_of(*inner) {
                        Type::Function { .. } => Some(*inner),
                        _ => None,
                    }
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// The return type and arguments behind a callee, via `function_core`.
    pub fn as_function(&self, id: TypeId) -> Option<(TypeId, &[TypeId])> {
        let core = self.function_core(id)?;
        match self.type_of(core) {
            Type::Function { return_type, args } => Some((*return_type, args)),
            _ => None,
        }
    }

    // Member lookups.

    /// A field (or interface method signature, or vtable slot) by name.
    /// Class lookups continue into the base chain.
    pub fn field_info(&self, id: TypeId, name: &Identifier) -> Option<&FieldInfo> {
        match self.type_of(id) {
            Type::Struct(data) => data.fields.get(name),
            Type::Interface(data) => data.methods.get(name),
            Type::VTable(data) => data.slots.get(name),
            Type::Class(data) => data.fields.get(name).or_else(|| {
                data.base
                    .and_then(|base| self.field_info(base, name))
            }),
            _ => None,
        }
    }

    /// A class method by name, searching the base chain.
    pub fn method_info(&self, class: TypeId, name: &Identifier) -> Option<&MethodInfo> {
        let data = self.as_class(class)?;
        data.methods.get(name).or_else(|| {
            data.base.and_then(|base| self.method_info(base, name))
        })
    }

    pub fn has_method(&self, class: TypeId, name: &Identifier, include_base: bool) -> bool {
        let data = self.class(class);
        if data.methods.contains_key(name) {
            return true;
        }
        include_base
            && data
                .base
                .map_or(false, |base| self.has_method(base, name, true))
    }

    /// The type of any member, field or method, visible on a complex type.
    pub fn member_type(&self, id: TypeId, name: &Identifier) -> Option<TypeId> {
        if let Some(field) = self.field_info(id, name) {
            return Some(field.ty);
        }
        if self.as_class(id).is_some() {
            return self.method_info(id, name).map(|method| method.ty);
        }
        None
    }

    /// Every field in layout order. For classes that is base-class fields
    /// first, recursively, then the class's own.
    pub fn collect_fields_ordered(&self, id: TypeId, result: &mut Vec<FieldInfo>) {
        match self.type_of(id) {
            Type::Struct(data) => result.extend(data.fields.values().cloned()),
            Type::Interface(data) => result.extend(data.methods.values().cloned()),
            Type::VTable(data) => result.extend(data.slots.values().cloned()),
            Type::Class(data) => {
                if let Some(base) = data.base {
                    self.collect_fields_ordered(base, result);
                }
                result.extend(data.fields.values().cloned());
            }
            _ => {}
        }
    }

    /// Record `base` as the base class and copy its vtable slots, in order,
    /// into the derived class's vtable. Overrides registered later replace
    /// these slots in place.
    pub fn set_class_base(&mut self, class: TypeId, base: TypeId) {
        let base_vtable = self.class(base).vtable;
        let slots = self.vtable(base_vtable).slots.clone();
        let class_data = self.class_mut(class);
        class_data.base = Some(base);
        let vtable = class_data.vtable;
        self.vtable_mut(vtable).slots.extend(slots);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn pointer_interning_is_by_identity() {
        let mut types = Types::new();
        let int_ptr = types.pointer_to(types.int());
        let int_ptr_again = types.pointer_to(types.int());
        let char_ptr = types.pointer_to(types.char_());
        assert_eq!(int_ptr, int_ptr_again);
        assert_ne!(int_ptr, char_ptr);
        assert_eq!(types.name_of(int_ptr), "int*");
    }

    #[test]
    fn function_interning_is_by_printed_signature() {
        let mut types = Types::new();
        let first = types.function(types.void(), vec![types.int(), types.char_()]);
        let second = types.function(types.void(), vec![types.int(), types.char_()]);
        let different = types.function(types.void(), vec![types.int()]);
        assert_eq!(first, second);
        assert_ne!(first, different);
        assert_eq!(types.name_of(first), "void (int, char)");
    }

    #[test]
    fn aliases_are_transparent_in_get_but_named_in_print() {
        let mut types = Types::new();
        let int_ptr = types.pointer_to(types.int());
        let alias = types.alias("number".into(), int_ptr).unwrap();
        assert_eq!(types.get("number"), Some(int_ptr));
        assert_eq!(types.name_of(alias), "number");
        assert!(types.alias("number".into(), int_ptr).is_none());
    }

    #[test]
    fn class_creation_brings_a_vtable() {
        let mut types = Types::new();
        let class = types.get_or_create_class(&"C".into()).unwrap();
        let vtable = types.class(class).vtable;
        assert_eq!(types.name_of(vtable), "__declass__C__vtable__");
        assert!(types.requires_implicit_construction(class));
        assert!(!types.requires_implicit_construction(vtable));
        assert_eq!(types.get_or_create_class(&"C".into()), Some(class));
        assert_eq!(types.get_or_create_struct(&"C".into()), None);
    }

    #[test]
    fn base_vtable_slots_are_copied_and_replaced_in_place() {
        let mut types = Types::new();
        let base = types.get_or_create_class(&"B".into()).unwrap();
        let derived = types.get_or_create_class(&"D".into()).unwrap();
        let f = Identifier::from("f");
        let g = Identifier::from("g");
        let slot_ty = types.pointer_to(types.int());
        let decl = crate::parsing::nodes::Ast::new()
            .add(crate::parsing::nodes::NodeKind::Break, Default::default());

        let base_vtable = types.class(base).vtable;
        for name in [&f, &g] {
            types.vtable_mut(base_vtable).slots.insert(
                name.clone(),
                FieldInfo {
                    name: name.clone(),
                    ty: slot_ty,
                    decl,
                },
            );
        }
        types.set_class_base(derived, base);

        let derived_vtable = types.class(derived).vtable;
        let replacement = types.pointer_to(types.char_());
        types.vtable_mut(derived_vtable).slots.insert(
            f.clone(),
            FieldInfo {
                name: f.clone(),
                ty: replacement,
                decl,
            },
        );

        let slots: Vec<_> = types.vtable(derived_vtable).slots.keys().cloned().collect();
        assert_eq!(slots, vec![f.clone(), g]);
        assert_eq!(types.vtable(derived_vtable).slots[&f].ty, replacement);
    }

    #[test]
    fn implicit_construction_propagates_through_struct_fields() {
        let mut types = Types::new();
        let class = types.get_or_create_class(&"C".into()).unwrap();
        let plain = types.get_or_create_struct(&"Plain".into()).unwrap();
        let holder = types.get_or_create_struct(&"Holder".into()).unwrap();
        let decl = crate::parsing::nodes::Ast::new()
            .add(crate::parsing::nodes::NodeKind::Break, Default::default());

        let int_ty = types.int();
        types.struct_mut(plain).fields.insert(
            "n".into(),
            FieldInfo {
                name: "n".into(),
                ty: int_ty,
                decl,
            },
        );
        types.struct_mut(holder).fields.insert(
            "c".into(),
            FieldInfo {
                name: "c".into(),
                ty: class,
                decl,
            },
        );

        assert!(!types.requires_implicit_construction(plain));
        assert!(types.requires_implicit_construction(holder));
    }
}
