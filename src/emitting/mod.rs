//! # Lowering and emission
//!
//! The emitter walks the typed AST and prints the translated program,
//! rewriting every object-oriented construct into plain-struct code:
//!
//! * each class becomes a struct whose first field is its vtable pointer,
//!   with base-class fields flattened in ahead of its own;
//! * each method becomes a free function taking a pointer to the class as
//!   its explicit first parameter, under a deterministic mangled name;
//! * each virtual method gains a function-pointer typedef and a slot in the
//!   class's vtable struct, whose single global instance is filled by a
//!   generated init function;
//! * method calls are rewritten to direct calls (non-virtual, and `base`
//!   receivers) or vtable-indirect calls (virtual), with the receiver
//!   passed explicitly and downcast when the method was inherited;
//! * declarations of types requiring construction gain implicit
//!   `= __declass__make_T()` initializers, and the generated constructors
//!   set up vtable pointers and constructed fields.
//!
//! The emitted program must compile under a plain C-like back-end with no
//! runtime support, so the translated entry function starts by calling
//! every vtable init function emitted before it.

pub mod cpp;
pub mod printer;

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::common::error::LocatedError;
use crate::common::multiphase::Identifier;
use crate::emitting::printer::Printer;
use crate::parsing::nodes::{Ast, MemberOp, NodeId, NodeKind};
use crate::types::{names, Type, TypeId, Types};

type Result<T> = std::result::Result<T, LocatedError>;

pub struct Transpiler<'a> {
    ast: &'a Ast,
    types: &'a Types,
    printer: Printer,

    /// Every emitted global definition, mapped to how many further
    /// definitions of the same name remain acceptable. Guards against
    /// mangled-name collisions slipping through to the back-end.
    definitions: HashMap<String, i64>,

    /// Constructors and vtable init functions already emitted, so repeated
    /// declarations cannot duplicate them.
    emitted: HashSet<String>,

    /// VTables whose init functions exist so far, in class declaration
    /// order; the emitted entry function calls each in turn.
    vtables_awaiting_init: Vec<TypeId>,

    entry_defined: bool,

    /// Depth of base-class recursion while flattening fields into a
    /// derived struct. Zero means the class being visited is the one being
    /// emitted.
    inheritance_depth: usize,
}

/// Emit the translated program for a fully analyzed AST.
pub fn emit(ast: &Ast, types: &Types, root: NodeId, colorful: bool) -> Result<String> {
    let mut transpiler = Transpiler {
        ast,
        types,
        printer: Printer::new(colorful),
        definitions: HashMap::new(),
        emitted: HashSet::new(),
        vtables_awaiting_init: vec![],
        entry_defined: false,
        inheritance_depth: 0,
    };
    transpiler.visit(root)?;
    debug!("emission finished");
    Ok(transpiler.printer.finish())
}

impl<'a> Transpiler<'a> {
    fn err<T>(&self, message: impl Into<String>, at: NodeId) -> Result<T> {
        Err(LocatedError::new(message, self.ast.location(at)))
    }

    fn node_ty(&self, id: NodeId) -> TypeId {
        self.ast
            .ty(id)
            .expect("emission runs only after successful analysis")
    }

    fn register_declaration(&mut self, name: &str, at: NodeId, limit: i64) -> Result<()> {
        match self.definitions.get_mut(name) {
            None => {
                self.definitions.insert(name.to_owned(), limit);
                Ok(())
            }
            Some(remaining) => {
                *remaining -= 1;
                if *remaining < 0 {
                    self.err(format!("Multiple redefinitions of {}", name), at)
                } else {
                    Ok(())
                }
            }
        }
    }

    fn visit(&mut self, id: NodeId) -> Result<()> {
        match self.ast.kind(id).clone() {
            NodeKind::Program { declarations } => {
                for declaration in declarations {
                    self.visit(declaration)?;
                    if matches!(self.ast.kind(declaration), NodeKind::Sequence { .. }) {
                        self.printer.symbol(";");
                    }
                    self.printer.newline();
                }
                if !self.entry_defined {
                    return self.err(
                        format!("Entry function {} was not defined", names::ENTRY),
                        id,
                    );
                }
                Ok(())
            }

            NodeKind::Int(value) => {
                self.printer.literal(&value.to_string());
                Ok(())
            }
            NodeKind::Double(value) => {
                self.printer.literal(&value.to_string());
                Ok(())
            }
            NodeKind::Char(value) => {
                self.printer.literal(&format!("'{}'", escaped(value)));
                Ok(())
            }
            NodeKind::Str(value) => {
                let escaped: String = value.chars().map(escaped).collect();
                self.printer.literal(&format!("\"{}\"", escaped));
                Ok(())
            }

            NodeKind::Identifier(name) => {
                if name.as_str() == names::BASE {
                    // `base` lowers to `this` downcast to the base class.
                    let ty = self.node_ty(id);
                    self.printer.keyword("cast");
                    self.printer.symbol("<");
                    self.printer.type_name(&self.types.name_of(ty));
                    self.printer.symbol(">");
                    self.printer.symbol("(");
                    self.printer.identifier(names::THIS);
                    self.printer.symbol(")");
                } else {
                    self.printer.identifier(name.as_str());
                }
                Ok(())
            }

            NodeKind::NamedType(name) => {
                self.printer.type_name(name.as_str());
                Ok(())
            }
            NodeKind::PointerType { base } => {
                self.visit(base)?;
                self.printer.symbol("*");
                Ok(())
            }
            NodeKind::ArrayType { base, size } => {
                self.visit(base)?;
                self.printer.symbol("[");
                self.visit(size)?;
                self.printer.symbol("]");
                Ok(())
            }

            NodeKind::Sequence { items } => {
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        self.printer.symbol(",");
                        self.printer.space();
                    }
                    self.visit(*item)?;
                }
                Ok(())
            }
            NodeKind::Block { body } => self.visit_block(&body, &[]),

            NodeKind::VarDecl {
                var_type,
                name,
                value,
                ..
            } => self.visit_var_decl(id, var_type, name, value),

            NodeKind::FunDecl {
                return_type,
                name,
                params,
                body,
            } => self.visit_fun_decl(id, return_type, &name, &params, body),

            NodeKind::MethodDecl {
                return_type,
                params,
                body,
                name,
                ..
            } => self.visit_method_decl(id, return_type, &name, &params, body),

            NodeKind::ConstructorDecl { .. } => {
                unreachable!("analysis rejects user-defined constructors")
            }

            NodeKind::StructDecl {
                name,
                fields,
                is_definition,
            } => {
                self.printer.keyword("struct");
                self.printer.space();
                self.printer.identifier(name.as_str());
                if is_definition {
                    self.printer.space();
                    self.printer.symbol("{");
                    self.printer.indent();
                    for field in fields {
                        self.printer.newline();
                        self.visit(field)?;
                        self.printer.symbol(";");
                    }
                    self.printer.dedent();
                    self.printer.newline();
                    self.printer.symbol("}");
                }
                self.printer.symbol(";");
                self.printer.newline();
                self.emit_constructor(self.node_ty(id))?;
                Ok(())
            }

            NodeKind::ClassDecl { .. } => self.visit_class_decl(id),

            // Interfaces have no lowered form; analysis already rejected
            // every instantiation or implementation of one.
            NodeKind::InterfaceDecl { .. } => Ok(()),

            NodeKind::FunPtrDecl {
                name,
                return_type,
                params,
            } => {
                self.printer.keyword("typedef");
                self.printer.space();
                self.visit(return_type)?;
                self.printer.space();
                self.printer.symbol("(");
                self.printer.symbol("*");
                self.visit(name)?;
                self.printer.symbol(")");
                self.printer.symbol("(");
                for (index, param) in params.iter().enumerate() {
                    if index > 0 {
                        self.printer.symbol(",");
                        self.printer.space();
                    }
                    self.visit(*param)?;
                }
                self.printer.symbol(")");
                self.printer.symbol(";");
                self.printer.newline();
                Ok(())
            }

            NodeKind::If {
                condition,
                true_case,
                false_case,
            } => {
                self.printer.keyword("if");
                self.printer.space();
                self.printer.symbol("(");
                self.visit(condition)?;
                self.printer.symbol(")");
                self.printer.space();
                self.visit(true_case)?;
                if let Some(false_case) = false_case {
                    self.printer.space();
                    self.printer.keyword("else");
                    self.printer.space();
                    self.visit(false_case)?;
                }
                Ok(())
            }
            NodeKind::Switch {
                condition,
                cases,
                default_case,
            } => {
                self.printer.keyword("switch");
                self.printer.space();
                self.printer.symbol("(");
                self.visit(condition)?;
                self.printer.symbol(")");
                self.printer.space();
                self.printer.symbol("{");
                self.printer.indent();
                for (value, case_body) in cases {
                    self.printer.newline();
                    self.printer.keyword("case");
                    self.printer.space();
                    self.printer.literal(&value.to_string());
                    self.printer.symbol(":");
                    self.printer.space();
                    self.visit(case_body)?;
                }
                if let Some(default_case) = default_case {
                    self.printer.newline();
                    self.printer.keyword("default");
                    self.printer.symbol(":");
                    self.printer.space();
                    self.visit(default_case)?;
                }
                self.printer.dedent();
                self.printer.newline();
                self.printer.symbol("}");
                Ok(())
            }
            NodeKind::While { condition, body } => {
                self.printer.keyword("while");
                self.printer.space();
                self.printer.symbol("(");
                self.visit(condition)?;
                self.printer.symbol(")");
                self.printer.space();
                self.visit(body)
            }
            NodeKind::DoWhile { body, condition } => {
                self.printer.keyword("do");
                self.printer.space();
                self.visit(body)?;
                self.printer.space();
                self.printer.keyword("while");
                self.printer.space();
                self.printer.symbol("(");
                self.visit(condition)?;
                self.printer.symbol(")");
                Ok(())
            }
            NodeKind::For {
                init,
                condition,
                increment,
                body,
            } => {
                self.printer.keyword("for");
                self.printer.space();
                self.printer.symbol("(");
                if let Some(init) = init {
                    self.visit(init)?;
                }
                self.printer.symbol(";");
                if let Some(condition) = condition {
                    self.printer.space();
                    self.visit(condition)?;
                }
                self.printer.symbol(";");
                if let Some(increment) = increment {
                    self.printer.space();
                    self.visit(increment)?;
                }
                self.printer.symbol(")");
                self.printer.space();
                self.visit(body)
            }
            NodeKind::Break => {
                self.printer.keyword("break");
                Ok(())
            }
            NodeKind::Continue => {
                self.printer.keyword("continue");
                Ok(())
            }
            NodeKind::Return { value } => {
                self.printer.keyword("return");
                if let Some(value) = value {
                    self.printer.space();
                    self.visit(value)?;
                }
                Ok(())
            }

            NodeKind::Binary { op, left, right } => {
                self.visit(left)?;
                self.printer.space();
                self.printer.symbol(op.as_str());
                self.printer.space();
                self.visit(right)
            }
            NodeKind::Assignment { lvalue, value } => {
                self.visit(lvalue)?;
                self.printer.space();
                self.printer.symbol("=");
                self.printer.space();
                self.visit(value)
            }
            NodeKind::UnaryPre { op, operand } => {
                self.printer.symbol(op.as_str());
                self.visit(operand)
            }
            NodeKind::UnaryPost { op, operand } => {
                self.visit(operand)?;
                self.printer.symbol(op.as_str());
                Ok(())
            }
            NodeKind::AddressOf { target } => {
                self.printer.symbol("&");
                self.visit(target)
            }
            NodeKind::Deref { target } => {
                self.printer.symbol("*");
                self.visit(target)
            }
            NodeKind::Index { base, index } => {
                self.visit(base)?;
                self.printer.symbol("[");
                self.visit(index)?;
                self.printer.symbol("]");
                Ok(())
            }
            NodeKind::Member { op, base, member } => {
                let is_method_call = match self.ast.kind(member) {
                    NodeKind::Call { callee, .. } => {
                        self.enclosing_member_call(member, *callee).is_some()
                    }
                    _ => false,
                };
                if is_method_call {
                    // Method calls rewrite the whole member access.
                    self.visit(member)
                } else {
                    // Field reads, and calls through function-pointer
                    // fields, keep the access as written.
                    self.visit(base)?;
                    self.printer.symbol(op.as_str());
                    self.visit(member)
                }
            }
            NodeKind::Call { callee, args } => self.visit_call(id, callee, &args),
            NodeKind::Cast { target_type, value } => {
                self.printer.keyword("cast");
                self.printer.symbol("<");
                self.visit(target_type)?;
                self.printer.symbol(">");
                self.printer.symbol("(");
                self.visit(value)?;
                self.printer.symbol(")");
                Ok(())
            }
        }
    }

    fn visit_block(&mut self, body: &[NodeId], prelude: &[Identifier]) -> Result<()> {
        self.printer.symbol("{");
        self.printer.indent();
        for call in prelude {
            self.printer.newline();
            self.printer.identifier(call.as_str());
            self.printer.symbol("(");
            self.printer.symbol(")");
            self.printer.symbol(";");
        }
        for &statement in body {
            self.printer.newline();
            self.visit(statement)?;
            self.printer.symbol(";");
        }
        self.printer.dedent();
        self.printer.newline();
        self.printer.symbol("}");
        Ok(())
    }

    fn visit_var_decl(
        &mut self,
        id: NodeId,
        var_type: NodeId,
        name: NodeId,
        value: Option<NodeId>,
    ) -> Result<()> {
        if let NodeKind::ArrayType { base, size } = self.ast.kind(var_type).clone() {
            self.visit(base)?;
            self.printer.space();
            self.visit(name)?;
            self.printer.symbol("[");
            self.visit(size)?;
            self.printer.symbol("]");
        } else {
            self.visit(var_type)?;
            self.printer.space();
            self.visit(name)?;
        }
        if let Some(value) = value {
            self.printer.space();
            self.printer.symbol("=");
            self.printer.space();
            self.visit(value)?;
        } else {
            // A local of a type that needs construction gets the implicit
            // constructor call; fields and parameters do not (their parent
            // is not a declaration sequence).
            let ty = self.node_ty(id);
            let in_sequence = matches!(
                self.ast.parent(id).map(|parent| self.ast.kind(parent)),
                Some(NodeKind::Sequence { .. })
            );
            if in_sequence
                && self.types.is_complex(ty)
                && self.types.requires_implicit_construction(ty)
            {
                let constructor = names::constructor(&Identifier::from(
                    self.types.name_of(ty),
                ));
                self.printer.space();
                self.printer.symbol("=");
                self.printer.space();
                self.printer.identifier(constructor.as_str());
                self.printer.symbol("(");
                self.printer.symbol(")");
            }
        }
        Ok(())
    }

    fn visit_fun_decl(
        &mut self,
        id: NodeId,
        return_type: NodeId,
        name: &Identifier,
        params: &[NodeId],
        body: Option<NodeId>,
    ) -> Result<()> {
        self.visit(return_type)?;
        self.printer.space();
        self.printer.identifier(name.as_str());
        self.register_declaration(name.as_str(), id, 1)?;
        self.printer.symbol("(");
        for (index, param) in params.iter().enumerate() {
            if index > 0 {
                self.printer.symbol(",");
                self.printer.space();
            }
            self.visit(*param)?;
        }
        self.printer.symbol(")");
        match body {
            Some(body) => {
                self.printer.space();
                if name.as_str() == names::ENTRY {
                    // The entry function fills every vtable before any user
                    // code can dispatch through one.
                    self.entry_defined = true;
                    let inits: Vec<Identifier> = self
                        .vtables_awaiting_init
                        .iter()
                        .map(|&vtable| names::vtable_init(&self.types.vtable(vtable).name))
                        .collect();
                    let NodeKind::Block { body } = self.ast.kind(body).clone() else {
                        unreachable!("function bodies are blocks");
                    };
                    self.visit_block(&body, &inits)?;
                } else {
                    self.visit(body)?;
                }
                self.printer.newline();
            }
            None => {
                self.printer.symbol(";");
                self.printer.newline();
            }
        }
        Ok(())
    }

    fn visit_method_decl(
        &mut self,
        id: NodeId,
        return_type: NodeId,
        name: &Identifier,
        params: &[NodeId],
        body: Option<NodeId>,
    ) -> Result<()> {
        let class_node = self
            .ast
            .find_parent(id, |kind| matches!(kind, NodeKind::ClassDecl { .. }), None)
            .expect("methods hang off class declarations");
        let class_id = self.node_ty(class_node);
        let class_name = self.types.class(class_id).name.clone();
        let info = self
            .types
            .method_info(class_id, name)
            .expect("analysis registered every method")
            .clone();

        self.visit(return_type)?;
        self.printer.space();
        self.printer.identifier(info.full_name.as_str());
        self.register_declaration(info.full_name.as_str(), id, 1)?;

        // The receiver becomes the explicit first parameter.
        self.printer.symbol("(");
        self.printer.type_name(class_name.as_str());
        self.printer.symbol("*");
        self.printer.space();
        self.printer.identifier(names::THIS);
        for param in params {
            self.printer.symbol(",");
            self.printer.space();
            self.visit(*param)?;
        }
        self.printer.symbol(")");
        match body {
            Some(body) => {
                self.printer.space();
                self.visit(body)?;
            }
            None => self.printer.symbol(";"),
        }
        self.printer.newline();
        Ok(())
    }

    fn visit_class_decl(&mut self, id: NodeId) -> Result<()> {
        let NodeKind::ClassDecl {
            name,
            base,
            fields,
            methods,
            is_definition,
            ..
        } = self.ast.kind(id).clone()
        else {
            unreachable!("visit_class_decl is dispatched on class declarations");
        };
        let is_processing_self = self.inheritance_depth == 0;
        let class_id = self.node_ty(id);
        let vtable_id = self.types.class(class_id).vtable;
        let has_slots = !self.types.vtable(vtable_id).slots.is_empty();

        if is_processing_self {
            self.printer.newline();
            self.printer.comment(&format!("=== class {} ===", name));
            if is_definition && has_slots {
                self.emit_slot_typedefs(id, vtable_id)?;
                self.emit_vtable_struct(vtable_id);
            }
            self.printer.keyword("struct");
            self.printer.space();
            self.printer.identifier(name.as_str());
        }
        if is_definition {
            if is_processing_self {
                self.printer.space();
                self.printer.symbol("{");
                self.printer.indent();
                self.printer.newline();
                // The vtable pointer is always the first field, so a
                // virtual call compiles to an indirect call through it. A
                // class with no slots keeps the field as an untyped null.
                if has_slots {
                    let vtable_name = self.types.vtable(vtable_id).name.clone();
                    self.printer.type_name(vtable_name.as_str());
                } else {
                    self.printer.type_name("void");
                }
                self.printer.symbol("*");
                self.printer.space();
                self.printer.identifier(names::VTABLE_FIELD);
                self.printer.symbol(";");
            }
            if let Some(base_node) = base {
                let base_ty = self.node_ty(base_node);
                let base_decl = self
                    .types
                    .class(base_ty)
                    .decl
                    .expect("base classes are fully defined");
                self.inheritance_depth += 1;
                self.visit_class_decl(base_decl)?;
                self.inheritance_depth -= 1;
            }
            for field in &fields {
                self.printer.newline();
                self.visit(*field)?;
                self.printer.symbol(";");
            }
            if is_processing_self {
                self.printer.dedent();
                self.printer.newline();
                self.printer.symbol("}");
                self.printer.symbol(";");
                self.printer.newline();
                for method in &methods {
                    self.printer.newline();
                    self.visit(*method)?;
                }
                self.printer.newline();
                if has_slots {
                    self.emit_vtable_init(class_id, vtable_id)?;
                    self.vtables_awaiting_init.push(vtable_id);
                }
                self.emit_constructor(class_id)?;
            }
        } else if is_processing_self {
            self.printer.symbol(";");
            self.printer.newline();
        }
        Ok(())
    }

    /// One function-pointer typedef per slot this class itself declares or
    /// overrides; inherited slots were typedef'd by the base class.
    fn emit_slot_typedefs(&mut self, class_node: NodeId, vtable_id: TypeId) -> Result<()> {
        let slots: Vec<_> = self.types.vtable(vtable_id).slots.values().cloned().collect();
        for slot in slots {
            let owner = self.ast.find_parent(
                slot.decl,
                |kind| matches!(kind, NodeKind::ClassDecl { .. }),
                None,
            );
            if owner != Some(class_node) {
                continue;
            }
            let (alias_name, function) = match self.types.type_of(slot.ty) {
                Type::Alias { name, base } => (
                    name.clone(),
                    self.types
                        .function_core(*base)
                        .expect("slot aliases point at function pointers"),
                ),
                _ => unreachable!("vtable slots have typedef'd types"),
            };
            let (ret, args) = self
                .types
                .as_function(function)
                .expect("function_core yields function types");
            let args = args.to_vec();
            self.printer.keyword("typedef");
            self.printer.space();
            self.printer.type_name(&self.types.name_of(ret));
            self.printer.space();
            self.printer.symbol("(");
            self.printer.symbol("*");
            self.printer.type_name(alias_name.as_str());
            self.printer.symbol(")");
            self.printer.symbol("(");
            for (index, arg) in args.iter().enumerate() {
                if index > 0 {
                    self.printer.symbol(",");
                    self.printer.space();
                }
                self.printer.type_name(&self.types.name_of(*arg));
            }
            self.printer.symbol(")");
            self.printer.symbol(";");
            self.printer.newline();
        }
        self.printer.newline();
        Ok(())
    }

    /// The vtable struct itself, slots in declaration order with inherited
    /// slots first, followed by its single global instance.
    fn emit_vtable_struct(&mut self, vtable_id: TypeId) {
        let data = self.types.vtable(vtable_id);
        let vtable_name = data.name.clone();
        let slots: Vec<_> = data.slots.values().cloned().collect();

        self.printer.keyword("struct");
        self.printer.space();
        self.printer.identifier(vtable_name.as_str());
        self.printer.space();
        self.printer.symbol("{");
        self.printer.indent();
        for slot in &slots {
            self.printer.newline();
            self.printer.type_name(&self.types.name_of(slot.ty));
            self.printer.space();
            self.printer.identifier(slot.name.as_str());
            self.printer.symbol(";");
        }
        self.printer.dedent();
        self.printer.newline();
        self.printer.symbol("}");
        self.printer.symbol(";");
        self.printer.newline();
        self.printer.newline();

        self.printer.type_name(vtable_name.as_str());
        self.printer.space();
        self.printer
            .identifier(names::vtable_instance(&vtable_name).as_str());
        self.printer.symbol(";");
        self.printer.newline();
        self.printer.newline();
    }

    /// `void <vtable>init() { <instance>.slot = &<mangled method>; … }`,
    /// resolving each slot against this class so overrides win.
    fn emit_vtable_init(&mut self, class_id: TypeId, vtable_id: TypeId) -> Result<()> {
        let vtable_name = self.types.vtable(vtable_id).name.clone();
        let init_name = names::vtable_init(&vtable_name);
        if !self.emitted.insert(init_name.to_string()) {
            return Ok(());
        }
        let instance = names::vtable_instance(&vtable_name);
        let slots: Vec<_> = self.types.vtable(vtable_id).slots.values().cloned().collect();

        self.printer.type_name("void");
        self.printer.space();
        self.printer.identifier(init_name.as_str());
        self.printer.symbol("(");
        self.printer.symbol(")");
        self.printer.space();
        self.printer.symbol("{");
        self.printer.indent();
        for slot in &slots {
            let info = self
                .types
                .method_info(class_id, &slot.name)
                .expect("every slot has a backing method")
                .clone();
            self.printer.newline();
            self.printer.identifier(instance.as_str());
            self.printer.symbol(".");
            self.printer.identifier(slot.name.as_str());
            self.printer.space();
            self.printer.symbol("=");
            self.printer.space();
            self.printer.symbol("&");
            self.printer.identifier(info.full_name.as_str());
            self.printer.symbol(";");
        }
        self.printer.dedent();
        self.printer.newline();
        self.printer.symbol("}");
        self.printer.newline();
        self.printer.newline();
        Ok(())
    }

    /// The implicit constructor: declare a local, point its vtable field at
    /// the global instance (or null without one), construct every field
    /// that itself requires construction, return the local.
    fn emit_constructor(&mut self, complex_id: TypeId) -> Result<()> {
        if !self.types.requires_implicit_construction(complex_id) {
            return Ok(());
        }
        let type_name = self.types.name_of(complex_id);
        let constructor = names::constructor(&Identifier::from(type_name.clone()));
        if !self.emitted.insert(constructor.to_string()) {
            return Ok(());
        }

        self.printer.type_name(&type_name);
        self.printer.space();
        self.printer.identifier(constructor.as_str());
        self.printer.symbol("(");
        self.printer.symbol(")");
        self.printer.space();
        self.printer.symbol("{");
        self.printer.indent();
        self.printer.newline();

        self.printer.type_name(&type_name);
        self.printer.space();
        self.printer.identifier(names::THIS);
        self.printer.symbol(";");
        self.printer.newline();

        if let Some(class) = self.types.as_class(complex_id) {
            let vtable_id = class.vtable;
            let vtable_name = self.types.vtable(vtable_id).name.clone();
            let has_slots = !self.types.vtable(vtable_id).slots.is_empty();
            self.printer.identifier(names::THIS);
            self.printer.symbol(".");
            self.printer.identifier(names::VTABLE_FIELD);
            self.printer.space();
            self.printer.symbol("=");
            self.printer.space();
            if has_slots {
                self.printer.symbol("&");
                self.printer
                    .identifier(names::vtable_instance(&vtable_name).as_str());
            } else {
                self.printer.keyword("cast");
                self.printer.symbol("<");
                self.printer.type_name("void");
                self.printer.symbol("*");
                self.printer.symbol(">");
                self.printer.symbol("(");
                self.printer.literal("0");
                self.printer.symbol(")");
            }
            self.printer.symbol(";");
            self.printer.newline();
        }

        let mut fields = vec![];
        self.types.collect_fields_ordered(complex_id, &mut fields);
        for field in fields {
            if self.types.is_pointer(field.ty) || !self.types.is_complex(field.ty) {
                continue;
            }
            if !self.types.requires_implicit_construction(field.ty) {
                continue;
            }
            let field_constructor =
                names::constructor(&Identifier::from(self.types.name_of(field.ty)));
            self.printer.identifier(names::THIS);
            self.printer.symbol(".");
            self.printer.identifier(field.name.as_str());
            self.printer.space();
            self.printer.symbol("=");
            self.printer.space();
            self.printer.identifier(field_constructor.as_str());
            self.printer.symbol("(");
            self.printer.symbol(")");
            self.printer.symbol(";");
            self.printer.newline();
        }

        self.printer.keyword("return");
        self.printer.space();
        self.printer.identifier(names::THIS);
        self.printer.symbol(";");
        self.printer.dedent();
        self.printer.newline();
        self.printer.symbol("}");
        self.printer.newline();
        Ok(())
    }

    fn visit_call(&mut self, id: NodeId, callee: NodeId, args: &[NodeId]) -> Result<()> {
        // Constructor calls lower to the implicit constructor.
        if let NodeKind::NamedType(type_name) = self.ast.kind(callee) {
            let constructor = names::constructor(type_name);
            self.printer.identifier(constructor.as_str());
            self.printer.symbol("(");
            self.printer.symbol(")");
            return Ok(());
        }

        if let Some(member) = self.enclosing_member_call(id, callee) {
            return self.emit_method_call(member, callee, args);
        }

        // A plain function or function-pointer call.
        self.visit(callee)?;
        self.printer.symbol("(");
        for (index, arg) in args.iter().enumerate() {
            if index > 0 {
                self.printer.symbol(",");
                self.printer.space();
            }
            self.visit(*arg)?;
        }
        self.printer.symbol(")");
        Ok(())
    }

    /// The member access this call rewrites, when the call is a method
    /// call: its parent is a member node whose named member resolves
    /// through the receiver class's method table.
    fn enclosing_member_call(&self, call: NodeId, callee: NodeId) -> Option<NodeId> {
        let parent = self.ast.parent(call)?;
        let NodeKind::Member { base, member, .. } = self.ast.kind(parent) else {
            return None;
        };
        if *member != call {
            return None;
        }
        let class = self.types.core_class(self.node_ty(*base))?;
        let name = self.ast.identifier(callee)?;
        self.types.method_info(class, name).map(|_| parent)
    }

    fn emit_method_call(&mut self, member: NodeId, callee: NodeId, args: &[NodeId]) -> Result<()> {
        let NodeKind::Member { op, base, .. } = self.ast.kind(member).clone() else {
            unreachable!("enclosing_member_call yields member accesses");
        };
        let receiver_ty = self.node_ty(base);
        let receiver_class = self
            .types
            .core_class(receiver_ty)
            .expect("method calls have class receivers");
        let method_name = self
            .ast
            .identifier(callee)
            .cloned()
            .expect("method callees are identifiers");
        let info = self
            .types
            .method_info(receiver_class, &method_name)
            .expect("analysis resolved the method")
            .clone();
        // Calls through `base` bypass the vtable so that an overriding
        // method can reach its parent's implementation.
        let receiver_is_base = self
            .ast
            .identifier(base)
            .map(|name| name.as_str() == names::BASE)
            .unwrap_or(false);

        if info.virtuality.is_virtual() && !receiver_is_base {
            self.visit(base)?;
            self.printer.symbol(if self.types.is_pointer(receiver_ty) {
                "->"
            } else {
                "."
            });
            self.printer.identifier(names::VTABLE_FIELD);
            self.printer.symbol("->");
            self.printer.identifier(method_name.as_str());
        } else {
            self.printer.identifier(info.full_name.as_str());
        }

        self.printer.symbol("(");
        // The receiver becomes the first argument: its address when the
        // access was dotted, downcast when the method was inherited from a
        // base class. `base` is already a pointer expression.
        let needs_cast = info.owner != receiver_class;
        let needs_address = op == MemberOp::Dot && !receiver_is_base;
        if needs_cast {
            let owner_name = self.types.class(info.owner).name.clone();
            self.printer.keyword("cast");
            self.printer.symbol("<");
            self.printer.type_name(owner_name.as_str());
            self.printer.symbol("*");
            self.printer.symbol(">");
            self.printer.symbol("(");
            if needs_address {
                self.printer.symbol("&");
            }
            self.visit(base)?;
            self.printer.symbol(")");
        } else {
            if needs_address {
                self.printer.symbol("&");
            }
            self.visit(base)?;
        }
        for arg in args {
            self.printer.symbol(",");
            self.printer.space();
            self.visit(*arg)?;
        }
        self.printer.symbol(")");
        Ok(())
    }
}

fn escaped(c: char) -> String {
    match c {
        '\n' => "\\n".to_owned(),
        '\r' => "\\r".to_owned(),
        '\t' => "\\t".to_owned(),
        '\0' => "\\0".to_owned(),
        '\\' => "\\\\".to_owned(),
        '\'' => "\\'".to_owned(),
        '"' => "\\\"".to_owned(),
        _ => c.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use crate::transpile;

    /// Collapse whitespace runs so the scenario expectations can compare
    /// structure rather than formatting.
    fn normalized(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn emit_ok(source: &str) -> String {
        normalized(&transpile(source, false).expect("expected source to transpile"))
    }

    fn assert_emits(source: &str, expectations: &[&str]) {
        let output = emit_ok(source);
        for expectation in expectations {
            assert!(
                output.contains(&normalized(expectation)),
                "missing {:?} in:\n{}",
                expectation,
                output
            );
        }
    }

    #[test]
    fn scenario_empty_class() {
        assert_emits(
            "class C {}; int main() { return 0; }",
            &[
                "struct C { void* __vtable; };",
                "C __declass__make_C() { C this; this.__vtable = cast<void*>(0); return this; }",
            ],
        );
    }

    #[test]
    fn scenario_single_virtual_method() {
        assert_emits(
            "class C { public int f() virtual { return 1; } };\
             int main() { C c; return c.f(); }",
            &[
                "typedef int (*__declass__C__vtable__f)(C*);",
                "struct __declass__C__vtable__ { __declass__C__vtable__f f; };",
                "__declass__C__vtable__ __declass__C__vtable__instance;",
                "void __declass__C__vtable__init() { \
                     __declass__C__vtable__instance.f = &__declass__C__virtual__f; }",
                "int __declass__C__virtual__f(C* this) { return 1; }",
                "C c = __declass__make_C();",
                "return c.__vtable->f(&c);",
                "__declass__C__vtable__init();",
            ],
        );
    }

    #[test]
    fn scenario_override() {
        let source = "class B { public int f() virtual { return 1; } };\
                      class D : B { public int f() override { return 2; } };\
                      int main() { D d; return d.f(); }";
        assert_emits(
            source,
            &[
                "typedef int (*__declass__D__vtable__f)(D*);",
                "struct __declass__D__vtable__ { __declass__D__vtable__f f; };",
                "__declass__D__vtable__instance.f = &__declass__D__virtual__f;",
                "return d.__vtable->f(&d);",
            ],
        );
    }

    #[test]
    fn scenario_base_call() {
        assert_emits(
            "class B { public int f() virtual { return 1; } };\
             class D : B { public int f() override { return base.f() + 1; } };\
             int main() { D d; return d.f(); }",
            &["__declass__B__virtual__f(cast<B*>(this))"],
        );
    }

    #[test]
    fn scenario_implicit_construction() {
        assert_emits(
            "class C {}; int main() { C c; return 0; }",
            &["C c = __declass__make_C();"],
        );
    }

    #[test]
    fn base_fields_flatten_ahead_of_derived_ones() {
        assert_emits(
            "class B { public int x; };\
             class D : B { public int y; };\
             int main() { D d; return d.x + d.y; }",
            &["struct D { void* __vtable; int x; int y; };"],
        );
    }

    #[test]
    fn non_virtual_calls_are_direct_with_inherited_downcast() {
        assert_emits(
            "class B { public int f() { return 1; } };\
             class D : B { };\
             int main() { D d; B b; return d.f() + b.f(); }",
            &[
                "__declass__B__f(cast<B*>(&d))",
                "__declass__B__f(&b)",
            ],
        );
    }

    #[test]
    fn pointer_receivers_skip_the_address_of() {
        assert_emits(
            "class C { public int f() virtual { return 1; } };\
             int g(C* p) { return p->f(); }\
             int main() { C c; return g(&c); }",
            &["p->__vtable->f(p)"],
        );
    }

    #[test]
    fn struct_constructors_chain_through_complex_fields() {
        assert_emits(
            "class C {};\
             struct Holder { C c; };\
             int main() { Holder h; return 0; }",
            &[
                "Holder __declass__make_Holder() { \
                     Holder this; \
                     this.c = __declass__make_C(); \
                     return this; }",
                "Holder h = __declass__make_Holder();",
            ],
        );
    }

    #[test]
    fn function_pointer_fields_keep_their_receiver() {
        assert_emits(
            "typedef int (*operation)(int);\
             int twice(int x) { return x + x; }\
             struct S { operation fp; };\
             int main() { S s; s.fp = &twice; return s.fp(3); }",
            &["s.fp = &twice;", "return s.fp(3);"],
        );
    }

    #[test]
    fn missing_entry_function_is_an_error() {
        let error = transpile("int helper() { return 1; }", false).unwrap_err();
        assert!(
            error.message.contains("was not defined"),
            "{}",
            error.message
        );
    }

    #[test]
    fn explicit_constructor_calls_lower_to_the_implicit_constructor() {
        assert_emits(
            "class C {}; int main() { C c = C(); return 0; }",
            &["C c = __declass__make_C();"],
        );
    }

    #[test]
    fn fields_do_not_get_implicit_initializers() {
        let output = emit_ok(
            "class C {};\
             struct Holder { C c; };\
             int main() { return 0; }",
        );
        assert!(
            output.contains(&normalized("struct Holder { C c; };")),
            "{}",
            output
        );
    }
}
