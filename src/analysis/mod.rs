//! # Semantic analysis
//!
//! The type checker walks the parsed, parent-linked AST once, assigning
//! every node a canonical [TypeId] and populating the type registry along
//! the way. Traversal is structural: blocks and function bodies push name
//! scopes, declarations register themselves, and expressions combine the
//! types of their children under the promotion rules.
//!
//! Class analysis is ordered carefully: the class type is created or
//! retrieved, the base class is resolved and its vtable slots copied, the
//! fields are analyzed (each checked for full definition, while the class
//! itself is still incomplete), method signatures are registered along
//! with their vtable slots, and only then is the class marked fully
//! defined — after which the method bodies are checked, so methods may
//! instantiate their own class.

pub mod scopes;

use log::debug;

use crate::analysis::scopes::Scopes;
use crate::common::error::LocatedError;
use crate::common::multiphase::Identifier;
use crate::lexing::tokens::Symbol;
use crate::parsing::nodes::{Ast, NodeId, NodeKind, Virtuality};
use crate::types::{names, FieldInfo, MethodInfo, Type, TypeId, Types};

type Result<T> = std::result::Result<T, LocatedError>;

pub struct TypeChecker<'a> {
    ast: &'a mut Ast,
    types: &'a mut Types,
    scopes: Scopes,
}

/// Assign every node under `root` a type, filling `types` as declarations
/// are encountered. The first error aborts the whole analysis.
pub fn analyze(ast: &mut Ast, types: &mut Types, root: NodeId) -> Result<()> {
    let global_return_type = types.void();
    let mut checker = TypeChecker {
        ast,
        types,
        scopes: Scopes::new(global_return_type),
    };
    checker.visit(root)?;
    debug!("analysis finished; {} nodes typed", checker.ast.len());
    Ok(())
}

impl<'a> TypeChecker<'a> {
    /// Fail at analysis with a message located at `at`.
    fn err<T>(&self, message: impl Into<String>, at: NodeId) -> Result<T> {
        Err(LocatedError::new(message, self.ast.location(at)))
    }

    fn set(&mut self, id: NodeId, ty: TypeId) -> Result<TypeId> {
        self.ast.set_ty(id, ty);
        Ok(ty)
    }

    fn check_reserved(&self, name: &Identifier, at: NodeId) -> Result<()> {
        if names::is_reserved(name.as_str()) {
            self.err(format!("Name {} is reserved", name), at)
        } else {
            Ok(())
        }
    }

    fn check_fully_defined(&self, ty: TypeId, at: NodeId) -> Result<()> {
        if self.types.is_fully_defined(ty) {
            Ok(())
        } else {
            self.err(
                format!("Type {} is not fully defined yet", self.types.name_of(ty)),
                at,
            )
        }
    }

    /// Interface types parse and analyze, but nothing may take their shape:
    /// emission has no story for them, so every use site rejects them.
    fn check_not_interface(&self, ty: TypeId, at: NodeId) -> Result<()> {
        if matches!(self.types.type_of(ty), Type::Interface(_)) {
            self.err("interface types cannot be instantiated", at)
        } else {
            Ok(())
        }
    }

    fn check_condition(&mut self, condition: NodeId) -> Result<()> {
        let ty = self.visit(condition)?;
        if self.types.converts_to_bool(ty) {
            Ok(())
        } else {
            self.err(
                format!(
                    "Condition must convert to bool, but {} found",
                    self.types.name_of(ty)
                ),
                condition,
            )
        }
    }

    /// The arithmetic promotion table: double dominates int and char, int
    /// dominates char, and char with char stays char.
    fn arithmetic_result(&self, lhs: TypeId, rhs: TypeId) -> Option<TypeId> {
        let (int, double, char_) = (self.types.int(), self.types.double(), self.types.char_());
        let numeric = |ty| ty == int || ty == double || ty == char_;
        if !numeric(lhs) || !numeric(rhs) {
            return None;
        }
        if lhs == double || rhs == double {
            Some(double)
        } else if lhs == int || rhs == int {
            Some(int)
        } else {
            Some(char_)
        }
    }

    fn is_int_or_char(&self, ty: TypeId) -> bool {
        ty == self.types.int() || ty == self.types.char_()
    }

    fn visit(&mut self, id: NodeId) -> Result<TypeId> {
        let kind = self.ast.kind(id).clone();
        match kind {
            NodeKind::Program { declarations } => {
                for declaration in declarations {
                    self.visit(declaration)?;
                }
                let void = self.types.void();
                self.set(id, void)
            }

            NodeKind::Int(_) => {
                let ty = self.types.int();
                self.set(id, ty)
            }
            NodeKind::Double(_) => {
                let ty = self.types.double();
                self.set(id, ty)
            }
            NodeKind::Char(_) => {
                let ty = self.types.char_();
                self.set(id, ty)
            }
            NodeKind::Str(_) => {
                let char_ = self.types.char_();
                let ty = self.types.pointer_to(char_);
                self.set(id, ty)
            }

            NodeKind::Identifier(name) => self.visit_identifier(id, &name),

            NodeKind::NamedType(name) => match self.types.get(name.as_str()) {
                Some(ty) => self.set(id, ty),
                None => self.err(format!("Unknown type {}", name), id),
            },
            NodeKind::PointerType { base } => {
                let base_ty = self.visit(base)?;
                let ty = self.types.pointer_to(base_ty);
                self.set(id, ty)
            }
            NodeKind::ArrayType { base, size } => {
                // Arrays are treated as pointers throughout.
                let base_ty = self.visit(base)?;
                self.visit(size)?;
                let ty = self.types.pointer_to(base_ty);
                self.set(id, ty)
            }

            NodeKind::Sequence { items } => {
                let mut ty = self.types.void();
                for item in items {
                    ty = self.visit(item)?;
                }
                self.set(id, ty)
            }
            NodeKind::Block { body } => {
                self.scopes.enter_block();
                let mut ty = self.types.void();
                for statement in &body {
                    let statement_ty = self.visit(*statement)?;
                    if matches!(self.ast.kind(*statement), NodeKind::Return { .. }) {
                        ty = statement_ty;
                    }
                }
                self.scopes.leave();
                self.set(id, ty)
            }

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

            NodeKind::MethodDecl { .. } => {
                // Methods are analyzed by their class; one reaching the
                // generic dispatch sits outside any class body.
                self.err("method declarations are only allowed inside classes", id)
            }

            NodeKind::ConstructorDecl { class, .. } => self.err(
                format!(
                    "user-defined constructors are not supported; {} is constructed implicitly",
                    class
                ),
                id,
            ),

            NodeKind::StructDecl {
                name,
                fields,
                is_definition,
            } => self.visit_struct_decl(id, &name, &fields, is_definition),

            NodeKind::ClassDecl { .. } => self.visit_class_decl(id),

            NodeKind::InterfaceDecl { name, methods } => {
                self.visit_interface_decl(id, &name, &methods)
            }

            NodeKind::FunPtrDecl {
                name,
                return_type,
                params,
            } => self.visit_funptr_decl(id, name, return_type, &params),

            NodeKind::If {
                condition,
                true_case,
                false_case,
            } => {
                self.check_condition(condition)?;
                self.visit(true_case)?;
                if let Some(false_case) = false_case {
                    self.visit(false_case)?;
                }
                let void = self.types.void();
                self.set(id, void)
            }
            NodeKind::Switch {
                condition,
                cases,
                default_case,
            } => {
                self.check_condition(condition)?;
                for (_, case_body) in cases {
                    self.visit(case_body)?;
                }
                if let Some(default_case) = default_case {
                    self.visit(default_case)?;
                }
                let void = self.types.void();
                self.set(id, void)
            }
            NodeKind::While { condition, body } => {
                self.check_condition(condition)?;
                self.visit(body)?;
                let void = self.types.void();
                self.set(id, void)
            }
            NodeKind::DoWhile { body, condition } => {
                self.check_condition(condition)?;
                self.visit(body)?;
                let void = self.types.void();
                self.set(id, void)
            }
            NodeKind::For {
                init,
                condition,
                increment,
                body,
            } => {
                if let Some(init) = init {
                    self.visit(init)?;
                }
                if let Some(condition) = condition {
                    self.check_condition(condition)?;
                }
                if let Some(increment) = increment {
                    self.visit(increment)?;
                }
                self.visit(body)?;
                let void = self.types.void();
                self.set(id, void)
            }
            NodeKind::Break | NodeKind::Continue => {
                let void = self.types.void();
                self.set(id, void)
            }
            NodeKind::Return { value } => {
                let ty = match value {
                    Some(value) => self.visit(value)?,
                    None => self.types.void(),
                };
                let expected = self.scopes.return_type();
                if ty != expected {
                    return self.err(
                        format!(
                            "Invalid return type, expected {}, but {} found",
                            self.types.name_of(expected),
                            self.types.name_of(ty)
                        ),
                        id,
                    );
                }
                self.set(id, ty)
            }

            NodeKind::Binary { op, left, right } => self.visit_binary(id, op, left, right),
            NodeKind::Assignment { lvalue, value } => {
                let lvalue_ty = self.visit(lvalue)?;
                let value_ty = self.visit(value)?;
                if !self.ast.has_address(lvalue) {
                    return self.err("Assignment target must have address", id);
                }
                // Exact types only; there are no implicit conversions.
                if lvalue_ty != value_ty {
                    return self.err(
                        format!(
                            "Value of type {} cannot be assigned to variable of type {}",
                            self.types.name_of(value_ty),
                            self.types.name_of(lvalue_ty)
                        ),
                        id,
                    );
                }
                self.set(id, lvalue_ty)
            }
            NodeKind::UnaryPre { op, operand } => self.visit_unary_pre(id, op, operand),
            NodeKind::UnaryPost { operand, .. } => {
                if !self.ast.has_address(operand) {
                    return self.err("Cannot increment or decrement non l-value", id);
                }
                let ty = self.visit(operand)?;
                if self.types.is_pointer(ty) || self.types.is_pod(ty) {
                    self.set(id, ty)
                } else {
                    self.err(
                        format!("Cannot increment value of type {}", self.types.name_of(ty)),
                        id,
                    )
                }
            }
            NodeKind::AddressOf { target } => {
                let ty = self.visit(target)?;
                if !self.ast.has_address(target) {
                    return self.err(
                        "Address can only be taken from a non-temporary value (l-value)",
                        id,
                    );
                }
                let pointer = self.types.pointer_to(ty);
                self.set(id, pointer)
            }
            NodeKind::Deref { target } => {
                let ty = self.visit(target)?;
                match self.types.type_of(ty) {
                    Type::Pointer { base } => {
                        let base = *base;
                        self.set(id, base)
                    }
                    _ => self.err(
                        format!(
                            "Cannot dereference a non-pointer type {}",
                            self.types.name_of(ty)
                        ),
                        id,
                    ),
                }
            }
            NodeKind::Index { base, index } => {
                let base_ty = self.visit(base)?;
                let pointee = match self.types.type_of(base_ty) {
                    Type::Pointer { base } => *base,
                    _ => {
                        return self.err(
                            format!("Expected pointer, but {} found", self.types.name_of(base_ty)),
                            id,
                        )
                    }
                };
                let index_ty = self.visit(index)?;
                if !self.is_int_or_char(index_ty) {
                    return self.err(
                        format!(
                            "Expected int or char, but {} found",
                            self.types.name_of(index_ty)
                        ),
                        id,
                    );
                }
                self.set(id, pointee)
            }
            NodeKind::Member { base, member, .. } => {
                self.visit(base)?;
                let ty = self.visit(member)?;
                self.set(id, ty)
            }
            NodeKind::Call { callee, args } => self.visit_call(id, callee, &args),
            NodeKind::Cast { target_type, value } => {
                let value_ty = self.visit(value)?;
                let cast_ty = self.visit(target_type)?;
                let legal = if self.types.is_pointer(cast_ty) {
                    self.types.is_pointer(value_ty) || value_ty == self.types.int()
                } else if cast_ty == self.types.int() {
                    self.types.is_pointer(value_ty) || self.types.is_pod(value_ty)
                } else {
                    self.types.is_pod(cast_ty) && self.types.is_pod(value_ty)
                };
                if legal {
                    self.set(id, cast_ty)
                } else {
                    self.err(
                        format!(
                            "Value of type {} cannot be cast to {}",
                            self.types.name_of(value_ty),
                            self.types.name_of(cast_ty)
                        ),
                        id,
                    )
                }
            }
        }
    }

    /// Identifiers usually resolve through the scope chain, but one in
    /// member position resolves inside the complex type of the member
    /// access's base instead. The parent walk distinguishes the member
    /// symbol itself from call arguments that merely sit under the member's
    /// call.
    fn visit_identifier(&mut self, id: NodeId, name: &Identifier) -> Result<TypeId> {
        let mut ty = self.scopes.lookup(name);

        let member = self.ast.find_parent(
            id,
            |kind| matches!(kind, NodeKind::Member { .. }),
            Some(1),
        );
        if let Some(member) = member {
            let NodeKind::Member { base, member: member_child, .. } = self.ast.kind(member)
            else {
                unreachable!("find_parent matched a member access");
            };
            let (base, member_child) = (*base, *member_child);
            if self.ast.is_descendant_of(id, member_child) {
                let call = self.ast.find_parent(
                    id,
                    |kind| matches!(kind, NodeKind::Call { .. }),
                    Some(0),
                );
                let is_callee = match call {
                    None => true,
                    Some(call) => match self.ast.kind(call) {
                        NodeKind::Call { callee, .. } => self.ast.is_descendant_of(id, *callee),
                        _ => unreachable!("find_parent matched a call"),
                    },
                };
                if is_callee {
                    let base_ty = self
                        .ast
                        .ty(base)
                        .expect("a member's base is visited before its member");
                    if let Some(complex) = self.types.core_complex(base_ty) {
                        ty = self.types.member_type(complex, name);
                    }
                }
            }
        }

        match ty {
            Some(ty) => self.set(id, ty),
            None => self.err(format!("Unknown variable {}", name), id),
        }
    }

    fn visit_var_decl(
        &mut self,
        id: NodeId,
        var_type: NodeId,
        name: NodeId,
        value: Option<NodeId>,
    ) -> Result<TypeId> {
        let ty = self.visit(var_type)?;
        self.check_fully_defined(ty, id)?;
        self.check_not_interface(ty, id)?;
        if let Some(class) = self.types.as_class(ty) {
            if class.is_abstract {
                return self.err(
                    format!("Cannot instantiate abstract class {}", class.name),
                    id,
                );
            }
        }

        let name_identifier = self
            .ast
            .identifier(name)
            .cloned()
            .expect("variable declarations name identifiers");
        self.check_reserved(&name_identifier, name)?;

        if let Some(value) = value {
            let value_ty = self.visit(value)?;
            if value_ty != ty {
                return self.err(
                    format!(
                        "Value of type {} cannot be assigned to variable of type {}",
                        self.types.name_of(value_ty),
                        self.types.name_of(ty)
                    ),
                    id,
                );
            }
        }

        // Struct and class fields are registered by their owning
        // declaration, not bound in the name scopes.
        let is_field = matches!(
            self.ast.parent(id).map(|parent| self.ast.kind(parent)),
            Some(NodeKind::StructDecl { .. }) | Some(NodeKind::ClassDecl { .. })
        );
        if !is_field && !self.scopes.add_variable(name_identifier.clone(), ty) {
            return self.err(format!("Name {} already declared", name_identifier), id);
        }

        self.ast.set_ty(name, ty);
        self.set(id, ty)
    }

    fn visit_fun_decl(
        &mut self,
        id: NodeId,
        return_type: NodeId,
        name: &Identifier,
        params: &[NodeId],
        body: Option<NodeId>,
    ) -> Result<TypeId> {
        self.check_reserved(name, id)?;
        let ret = self.visit(return_type)?;
        if !self.types.is_fully_defined(ret) {
            return self.err(
                format!(
                    "Return type {} is not fully defined",
                    self.types.name_of(ret)
                ),
                return_type,
            );
        }
        self.check_not_interface(ret, return_type)?;

        let mut args = vec![];
        for &param in params {
            args.push(self.visit_param(param)?);
        }
        let ftype = self.types.function(ret, args);

        // Functions are bound as global variables of their own function
        // type; doing it before the body makes recursive calls possible.
        if !self.scopes.add_global(name.clone(), ftype) {
            return self.err(format!("Name {} already used", name), id);
        }
        self.ast.set_ty(id, ftype);

        if let Some(body) = body {
            self.scopes.enter_function(ret);
            self.bind_params(params);
            let actual = self.visit(body)?;
            if actual != ret {
                return self.err(
                    format!(
                        "Invalid function return type: {}",
                        self.types.name_of(actual)
                    ),
                    id,
                );
            }
            self.scopes.leave();
        }
        Ok(ftype)
    }

    fn visit_param(&mut self, param: NodeId) -> Result<TypeId> {
        let NodeKind::VarDecl { var_type, name, .. } = self.ast.kind(param).clone() else {
            unreachable!("function parameters are variable declarations");
        };
        let ty = self.visit(var_type)?;
        if !self.types.is_fully_defined(ty) {
            return self.err(
                format!("Type {} is not fully defined", self.types.name_of(ty)),
                param,
            );
        }
        self.check_not_interface(ty, param)?;
        let name_identifier = self
            .ast
            .identifier(name)
            .cloned()
            .expect("parameters name identifiers");
        self.check_reserved(&name_identifier, name)?;
        self.ast.set_ty(name, ty);
        self.ast.set_ty(param, ty);
        Ok(ty)
    }

    fn bind_params(&mut self, params: &[NodeId]) {
        for &param in params {
            let NodeKind::VarDecl { name, .. } = self.ast.kind(param) else {
                unreachable!("function parameters are variable declarations");
            };
            let name_identifier = self
                .ast
                .identifier(*name)
                .cloned()
                .expect("parameters name identifiers");
            let ty = self
                .ast
                .ty(param)
                .expect("parameter types are set during signature analysis");
            self.scopes.add_variable(name_identifier, ty);
        }
    }

    fn visit_struct_decl(
        &mut self,
        id: NodeId,
        name: &Identifier,
        fields: &[NodeId],
        is_definition: bool,
    ) -> Result<TypeId> {
        self.check_reserved(name, id)?;
        let struct_id = match self.types.get_or_create_struct(name) {
            Some(struct_id) => struct_id,
            None => {
                return self.err(
                    format!("Type {} already defined and is not a struct", name),
                    id,
                )
            }
        };
        self.ast.set_ty(id, struct_id);
        if is_definition {
            if self.types.is_fully_defined(struct_id) {
                return self.err(format!("Type {} already fully defined", name), id);
            }
            for &field in fields {
                // The struct itself stays not-fully-defined while its
                // fields are analyzed, so a directly recursive field is
                // caught by the full-definition check.
                let field_ty = self.visit(field)?;
                let field_name = self.field_name(field);
                if self.types.struct_data(struct_id).fields.contains_key(&field_name) {
                    return self.err(format!("Member {} already defined", field_name), field);
                }
                self.types.struct_mut(struct_id).fields.insert(
                    field_name.clone(),
                    FieldInfo {
                        name: field_name,
                        ty: field_ty,
                        decl: field,
                    },
                );
            }
            self.types.struct_mut(struct_id).fully_defined = true;
        }
        self.set(id, struct_id)
    }

    fn field_name(&self, field: NodeId) -> Identifier {
        let NodeKind::VarDecl { name, .. } = self.ast.kind(field) else {
            unreachable!("fields are variable declarations");
        };
        self.ast
            .identifier(*name)
            .cloned()
            .expect("fields name identifiers")
    }

    fn visit_class_decl(&mut self, id: NodeId) -> Result<TypeId> {
        let NodeKind::ClassDecl {
            name,
            base,
            interfaces,
            fields,
            methods,
            constructors,
            is_definition,
        } = self.ast.kind(id).clone()
        else {
            unreachable!("visit_class_decl is dispatched on class declarations");
        };

        self.check_reserved(&name, id)?;
        let class_id = match self.types.get_or_create_class(&name) {
            Some(class_id) => class_id,
            None => {
                return self.err(
                    format!("Type {} already defined and is not a class", name),
                    id,
                )
            }
        };
        if self.types.is_fully_defined(class_id) {
            return self.err(format!("Type {} already fully defined", name), id);
        }
        self.ast.set_ty(id, class_id);
        self.types.class_mut(class_id).decl = Some(id);

        if let Some(base) = base {
            let base_ty = self.visit(base)?;
            if self.types.as_class(base_ty).is_none() {
                return self.err(
                    format!("Base type {} is not a class", self.types.name_of(base_ty)),
                    base,
                );
            }
            if !self.types.is_fully_defined(base_ty) {
                return self.err(
                    format!(
                        "Base class {} is not fully defined",
                        self.types.name_of(base_ty)
                    ),
                    base,
                );
            }
            self.types.set_class_base(class_id, base_ty);
        }

        if let Some(&first) = interfaces.first() {
            return self.err("implementing interfaces is not supported", first);
        }

        if is_definition {
            for &field in &fields {
                let field_ty = self.visit(field)?;
                let field_name = self.field_name(field);
                // Fields and methods share the class's single namespace.
                let class_data = self.types.class(class_id);
                if class_data.fields.contains_key(&field_name)
                    || class_data.methods.contains_key(&field_name)
                {
                    return self.err(format!("Member {} already defined", field_name), field);
                }
                self.types.class_mut(class_id).fields.insert(
                    field_name.clone(),
                    FieldInfo {
                        name: field_name,
                        ty: field_ty,
                        decl: field,
                    },
                );
            }

            for &method in &methods {
                self.register_method(class_id, &name, method)?;
            }

            // The layout and dispatch tables are complete; bodies analyzed
            // from here on may instantiate the class.
            self.types.class_mut(class_id).fully_defined = true;

            for &method in &methods {
                self.visit_method_body(class_id, method)?;
            }

            for &constructor in &constructors {
                self.visit(constructor)?;
            }
        }
        self.set(id, class_id)
    }

    fn register_method(
        &mut self,
        class_id: TypeId,
        class_name: &Identifier,
        method: NodeId,
    ) -> Result<TypeId> {
        let NodeKind::MethodDecl {
            return_type,
            name,
            params,
            virtuality,
            ..
        } = self.ast.kind(method).clone()
        else {
            unreachable!("class methods are method declarations");
        };

        self.check_reserved(&name, method)?;
        let ret = self.visit(return_type)?;
        if !self.types.is_fully_defined(ret) {
            return self.err(
                format!(
                    "Return type {} is not fully defined",
                    self.types.name_of(ret)
                ),
                return_type,
            );
        }
        self.check_not_interface(ret, return_type)?;

        // The implicit first argument is the receiver.
        let mut args = vec![self.types.pointer_to(class_id)];
        for &param in &params {
            args.push(self.visit_param(param)?);
        }
        let ftype = self.types.function(ret, args);
        self.ast.set_ty(method, ftype);

        let class_data = self.types.class(class_id);
        if class_data.fields.contains_key(&name) || class_data.methods.contains_key(&name) {
            return self.err(format!("Member {} already defined", name), method);
        }

        if virtuality == Virtuality::Override {
            let base = self.types.class(class_id).base;
            match base {
                None => return self.err("There is no base class to override", method),
                Some(base) => {
                    if !self.types.has_method(base, &name, true) {
                        return self.err(
                            format!("There is no base method called {} to override", name),
                            method,
                        );
                    }
                }
            }
        }

        let full_name = names::method(class_name, &name, virtuality.is_virtual());
        if !self.scopes.add_global(full_name.clone(), ftype) {
            return self.err(format!("Name {} already used", full_name), method);
        }

        if virtuality == Virtuality::Abstract {
            self.types.class_mut(class_id).is_abstract = true;
        }
        self.types.class_mut(class_id).methods.insert(
            name.clone(),
            MethodInfo {
                name: name.clone(),
                full_name,
                ty: ftype,
                decl: method,
                owner: class_id,
                virtuality,
            },
        );

        if virtuality.is_virtual() {
            let vtable = self.types.class(class_id).vtable;
            let vtable_name = self.types.vtable(vtable).name.clone();
            let slot_type_name = names::vtable_slot(&vtable_name, &name);
            let fptr = self.types.pointer_to(ftype);
            let slot_ty = match self.types.alias(slot_type_name.clone(), fptr) {
                Some(slot_ty) => slot_ty,
                None => {
                    return self.err(
                        format!("Name {} already reserved for another type", slot_type_name),
                        method,
                    )
                }
            };
            // Overrides replace the inherited slot in place; new virtual
            // methods append.
            self.types.vtable_mut(vtable).slots.insert(
                name.clone(),
                FieldInfo {
                    name,
                    ty: slot_ty,
                    decl: method,
                },
            );
        }
        Ok(ftype)
    }

    fn visit_method_body(&mut self, class_id: TypeId, method: NodeId) -> Result<()> {
        let NodeKind::MethodDecl { name, params, body, .. } = self.ast.kind(method).clone()
        else {
            unreachable!("class methods are method declarations");
        };
        let Some(body) = body else {
            // Abstract methods have no body to check.
            return Ok(());
        };

        let info_ty = self
            .types
            .method_info(class_id, &name)
            .expect("the method was registered before its body is checked")
            .ty;
        let (ret, _) = self
            .types
            .as_function(info_ty)
            .expect("methods have function types");

        self.scopes.enter_function(ret);
        let this_ty = self.types.pointer_to(class_id);
        self.scopes.add_variable(Identifier::from(names::THIS), this_ty);
        if let Some(base) = self.types.class(class_id).base {
            let base_ptr = self.types.pointer_to(base);
            self.scopes.add_variable(Identifier::from(names::BASE), base_ptr);
        }
        self.bind_params(&params);

        let actual = self.visit(body)?;
        if actual != ret {
            return self.err(
                format!(
                    "Invalid function return type: {}",
                    self.types.name_of(actual)
                ),
                method,
            );
        }
        self.scopes.leave();
        Ok(())
    }

    fn visit_interface_decl(
        &mut self,
        id: NodeId,
        name: &Identifier,
        methods: &[NodeId],
    ) -> Result<TypeId> {
        self.check_reserved(name, id)?;
        let interface_id = match self.types.get_or_create_interface(name) {
            Some(interface_id) => interface_id,
            None => {
                return self.err(
                    format!("Type {} already defined and is not an interface", name),
                    id,
                )
            }
        };
        self.ast.set_ty(id, interface_id);

        for &method in methods {
            let NodeKind::MethodDecl {
                return_type,
                name: method_name,
                params,
                ..
            } = self.ast.kind(method).clone()
            else {
                unreachable!("interface methods are method declarations");
            };
            self.check_reserved(&method_name, method)?;
            let ret = self.visit(return_type)?;
            let mut args = vec![self.types.pointer_to(interface_id)];
            for &param in &params {
                args.push(self.visit_param(param)?);
            }
            let ftype = self.types.function(ret, args);
            self.ast.set_ty(method, ftype);
            let known = self
                .types
                .interface_mut(interface_id)
                .methods
                .insert(
                    method_name.clone(),
                    FieldInfo {
                        name: method_name.clone(),
                        ty: ftype,
                        decl: method,
                    },
                )
                .is_some();
            if known {
                return self.err(format!("Member {} already defined", method_name), method);
            }
        }
        self.types.interface_mut(interface_id).fully_defined = true;
        self.set(id, interface_id)
    }

    /// A typedef can restate a function type that already exists under
    /// another name; the alias keeps the new name attached to the same
    /// interned type.
    fn visit_funptr_decl(
        &mut self,
        id: NodeId,
        name: NodeId,
        return_type: NodeId,
        params: &[NodeId],
    ) -> Result<TypeId> {
        let name_identifier = self
            .ast
            .identifier(name)
            .cloned()
            .expect("typedefs name identifiers");
        self.check_reserved(&name_identifier, name)?;
        if self.types.is_type_name(name_identifier.as_str()) {
            return self.err(format!("Type {} already exists", name_identifier), id);
        }

        let ret = self.visit(return_type)?;
        if !self.types.is_fully_defined(ret) {
            return self.err(
                format!(
                    "Return type {} is not fully defined",
                    self.types.name_of(ret)
                ),
                return_type,
            );
        }
        let mut args = vec![];
        for &param in params {
            let arg_ty = self.visit(param)?;
            if !self.types.is_fully_defined(arg_ty) {
                return self.err(
                    format!("Type {} is not fully defined", self.types.name_of(arg_ty)),
                    param,
                );
            }
            args.push(arg_ty);
        }
        let ftype = self.types.function(ret, args);
        let fptr = self.types.pointer_to(ftype);
        let alias = self
            .types
            .alias(name_identifier, fptr)
            .expect("the name was checked to be unbound");
        self.ast.set_ty(name, alias);
        self.set(id, alias)
    }

    fn visit_binary(&mut self, id: NodeId, op: Symbol, left: NodeId, right: NodeId) -> Result<TypeId> {
        let left_ty = self.visit(left)?;
        let right_ty = self.visit(right)?;
        let int = self.types.int();
        let result = match op {
            // Pointer arithmetic permits pointer + int on the left.
            Symbol::Add | Symbol::Sub => {
                if self.types.is_pointer(left_ty) && right_ty == int {
                    Some(left_ty)
                } else {
                    self.arithmetic_result(left_ty, right_ty)
                }
            }
            Symbol::Mul | Symbol::Div => self.arithmetic_result(left_ty, right_ty),
            Symbol::Mod
            | Symbol::ShiftLeft
            | Symbol::ShiftRight
            | Symbol::BitAnd
            | Symbol::BitOr => {
                if self.is_int_or_char(left_ty) && self.is_int_or_char(right_ty) {
                    Some(left_ty)
                } else {
                    None
                }
            }
            // There is no bool; logical operators yield int.
            Symbol::And | Symbol::Or | Symbol::BitXor => {
                if self.types.converts_to_bool(left_ty) && self.types.converts_to_bool(right_ty) {
                    Some(int)
                } else {
                    None
                }
            }
            Symbol::Lt | Symbol::Gt | Symbol::Lte | Symbol::Gte => {
                if left_ty == right_ty
                    && (self.types.is_pointer(left_ty) || self.types.is_pod(left_ty))
                {
                    Some(int)
                } else {
                    None
                }
            }
            Symbol::Eq | Symbol::NotEq => {
                if left_ty == right_ty {
                    Some(int)
                } else {
                    None
                }
            }
            _ => None,
        };
        match result {
            Some(ty) => self.set(id, ty),
            None => self.err(
                format!(
                    "Operator {} cannot be applied to {} and {}",
                    op,
                    self.types.name_of(left_ty),
                    self.types.name_of(right_ty)
                ),
                id,
            ),
        }
    }

    fn visit_unary_pre(&mut self, id: NodeId, op: Symbol, operand: NodeId) -> Result<TypeId> {
        let ty = self.visit(operand)?;
        let result = match op {
            Symbol::Add | Symbol::Sub => self.arithmetic_result(ty, ty),
            Symbol::BitNot => {
                if self.is_int_or_char(ty) {
                    Some(ty)
                } else {
                    None
                }
            }
            Symbol::Not => {
                if self.types.converts_to_bool(ty) {
                    Some(self.types.int())
                } else {
                    None
                }
            }
            Symbol::Inc | Symbol::Dec => {
                if !self.ast.has_address(operand) {
                    return self.err("Cannot increment or decrement non l-value", id);
                }
                if self.types.is_pointer(ty) || self.types.is_pod(ty) {
                    Some(ty)
                } else {
                    None
                }
            }
            _ => None,
        };
        match result {
            Some(ty) => self.set(id, ty),
            None => self.err(
                format!(
                    "Operator {} cannot be applied to {}",
                    op,
                    self.types.name_of(ty)
                ),
                id,
            ),
        }
    }

    fn visit_call(&mut self, id: NodeId, callee: NodeId, args: &[NodeId]) -> Result<TypeId> {
        // A call whose callee is a type name is a constructor call,
        // lowering to the type's implicit constructor.
        if matches!(self.ast.kind(callee), NodeKind::NamedType(_)) {
            let ty = self.visit(callee)?;
            self.check_fully_defined(ty, id)?;
            self.check_not_interface(ty, id)?;
            if let Some(class) = self.types.as_class(ty) {
                if class.is_abstract {
                    return self.err(
                        format!("Cannot instantiate abstract class {}", class.name),
                        id,
                    );
                }
            }
            if !self.types.requires_implicit_construction(ty) {
                return self.err(
                    format!("Type {} has no constructor", self.types.name_of(ty)),
                    id,
                );
            }
            if !args.is_empty() {
                return self.err(
                    format!(
                        "Constructor of {} takes no arguments, but {} given",
                        self.types.name_of(ty),
                        args.len()
                    ),
                    id,
                );
            }
            return self.set(id, ty);
        }

        let callee_ty = self.visit(callee)?;
        let Some(function) = self.types.function_core(callee_ty) else {
            return self.err(
                format!(
                    "Expected function, but value of {} found",
                    self.types.name_of(callee_ty)
                ),
                id,
            );
        };
        let (ret, expected): (TypeId, Vec<TypeId>) = match self.types.type_of(function) {
            Type::Function { return_type, args } => (*return_type, args.clone()),
            _ => unreachable!("function_core yields function types"),
        };

        // For a method, the receiver fills the synthetic first argument
        // and is not counted against the caller's argument list.
        let method_offset = usize::from(self.is_method_call(id, callee));

        if args.len() != expected.len() - method_offset {
            return self.err(
                format!(
                    "Function of type {} requires {} arguments, but {} given",
                    self.types.name_of(function),
                    expected.len(),
                    args.len()
                ),
                id,
            );
        }
        for (index, &arg) in args.iter().enumerate() {
            let arg_ty = self.visit(arg)?;
            let expected_ty = expected[index + method_offset];
            if arg_ty != expected_ty {
                return self.err(
                    format!(
                        "Type {} expected for argument {}, but {} found",
                        self.types.name_of(expected_ty),
                        index + 1,
                        self.types.name_of(arg_ty)
                    ),
                    arg,
                );
            }
        }
        self.set(id, ret)
    }

    /// A call is a method call when it is the member of a member access
    /// whose base is (a pointer to) a class, and the named member resolves
    /// through the class's method table rather than its fields.
    fn is_method_call(&self, call: NodeId, callee: NodeId) -> bool {
        let Some(parent) = self.ast.parent(call) else {
            return false;
        };
        let NodeKind::Member { base, member, .. } = self.ast.kind(parent) else {
            return false;
        };
        if *member != call {
            return false;
        }
        let Some(base_ty) = self.ast.ty(*base) else {
            return false;
        };
        let Some(class) = self.types.core_class(base_ty) else {
            return false;
        };
        match self.ast.identifier(callee) {
            Some(name) => self.types.method_info(class, name).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::lexing::lexer::Lexer;
    use crate::lexing::source::Source;
    use crate::lexing::Tokens;
    use crate::parsing::parenting::link_parents;
    use crate::parsing::Parser;

    use super::*;

    fn analyze_source(source: &str) -> Result<(Ast, Types, NodeId)> {
        let tokens = Lexer::from(Source::from(source)).lex_all().expect("lexes");
        let (mut ast, root) = Parser::from(Tokens::from(tokens)).parse()?;
        link_parents(&mut ast, root);
        let mut types = Types::new();
        analyze(&mut ast, &mut types, root)?;
        Ok((ast, types, root))
    }

    fn analyze_ok(source: &str) -> (Ast, Types, NodeId) {
        analyze_source(source).expect("expected source to analyze")
    }

    fn analyze_err(source: &str) -> LocatedError {
        analyze_source(source).expect_err("expected analysis to fail")
    }

    #[test]
    fn every_node_is_typed() {
        let (ast, _, _) = analyze_ok(
            "struct S { int n; };\
             int add(int a, int b) { return a + b; }\
             int main() { S s; s.n = add(1, 2); return s.n; }",
        );
        for id in ast.ids() {
            assert!(
                ast.ty(id).is_some(),
                "node {:?} has no type",
                ast.kind(id)
            );
        }
    }

    #[test]
    fn type_interning_means_pointer_equality() {
        let (ast, _, _) = analyze_ok("int* a; int* b;");
        let declared: Vec<_> = ast
            .ids()
            .filter(|&id| matches!(ast.kind(id), NodeKind::PointerType { .. }))
            .map(|id| ast.ty(id).unwrap())
            .collect();
        assert_eq!(declared.len(), 2);
        assert_eq!(declared[0], declared[1]);
    }

    #[test]
    fn promotion_table() {
        analyze_ok("void f() { int i; char c; double d; d = d + i; i = i + c; c = c + c; }");
        let error = analyze_err("void f() { char c; int i; c = c + i; }");
        assert!(error.message.contains("cannot be assigned"), "{}", error.message);
    }

    #[test]
    fn pointer_arithmetic_needs_int_offset() {
        analyze_ok("void f(int* p) { p = p + 1; }");
        let error = analyze_err("void f(int* p) { p = p + 1.5; }");
        assert!(error.message.contains("Operator"), "{}", error.message);
    }

    #[test]
    fn conditions_must_convert_to_bool() {
        let error = analyze_err("struct S {}; void f() { S s; if (s) { } }");
        assert!(
            error.message.contains("Condition must convert to bool"),
            "{}",
            error.message
        );
    }

    #[test]
    fn assignment_needs_an_lvalue() {
        let error = analyze_err("void f() { int a; a + 1 = 2; }");
        assert!(
            error.message.contains("must have address"),
            "{}",
            error.message
        );
    }

    #[test]
    fn use_before_full_definition_is_rejected() {
        let error = analyze_err("struct S; void f() { S s; }");
        assert!(
            error.message.contains("not fully defined"),
            "{}",
            error.message
        );
        analyze_ok("struct S; void f() { S* s; } struct S { int n; };");
    }

    #[test]
    fn recursive_struct_field_is_rejected_but_pointer_is_fine() {
        let error = analyze_err("struct S { S inner; };");
        assert!(
            error.message.contains("not fully defined"),
            "{}",
            error.message
        );
        analyze_ok("struct S { S* next; };");
    }

    #[test]
    fn override_rules() {
        analyze_ok(
            "class B { public int f() virtual { return 1; } };\
             class D : B { public int f() override { return 2; } };",
        );
        // `virtual` instead of `override` introduces a new slot rather
        // than erroring.
        let (_, types, _) = analyze_ok(
            "class B { public int f() virtual { return 1; } };\
             class D : B { public int f() virtual { return 2; } };",
        );
        let d = types.get("D").unwrap();
        assert_eq!(types.vtable(types.class(d).vtable).slots.len(), 1);

        let error = analyze_err(
            "class B { public int f() virtual { return 1; } };\
             class D : B { public int g() override { return 2; } };",
        );
        assert_eq!(
            error.message,
            "There is no base method called g to override"
        );

        let error = analyze_err("class C { public int f() override { return 1; } };");
        assert_eq!(error.message, "There is no base class to override");
    }

    #[test]
    fn vtables_append_new_slots_after_inherited_ones() {
        let (_, types, _) = analyze_ok(
            "class B {\
                 public int f() virtual { return 1; }\
             };\
             class D : B {\
                 public int g() virtual { return 2; }\
                 public int f() override { return 3; }\
             };",
        );
        let d = types.get("D").unwrap();
        let slots: Vec<_> = types
            .vtable(types.class(d).vtable)
            .slots
            .keys()
            .map(|name| name.to_string())
            .collect();
        assert_eq!(slots, vec!["f", "g"]);

        // The overriding slot's typedef takes a D receiver; the inherited
        // one keeps B's.
        let f_slot = &types.vtable(types.class(d).vtable).slots[&Identifier::from("f")];
        assert_eq!(types.name_of(f_slot.ty), "__declass__D__vtable__f");
    }

    #[test]
    fn class_member_namespace_is_shared() {
        let error = analyze_err("class C { public int x; public int x() { return 1; } };");
        assert!(
            error.message.contains("Member x already defined"),
            "{}",
            error.message
        );
    }

    #[test]
    fn methods_may_instantiate_their_own_class() {
        analyze_ok("class C { public int f() { C other; return 0; } };");
    }

    #[test]
    fn method_calls_do_not_count_the_receiver() {
        analyze_ok(
            "class C { public int f(int x) { return x; } };\
             int main() { C c; return c.f(1); }",
        );
        let error = analyze_err(
            "class C { public int f(int x) { return x; } };\
             int main() { C c; return c.f(); }",
        );
        assert!(error.message.contains("requires"), "{}", error.message);
    }

    #[test]
    fn base_resolves_to_the_base_class() {
        analyze_ok(
            "class B { public int f() virtual { return 1; } };\
             class D : B { public int f() override { return base.f(); } };",
        );
        let error = analyze_err("class C { public int f() { return base.f(); } };");
        assert!(
            error.message.contains("Unknown variable base"),
            "{}",
            error.message
        );
    }

    #[test]
    fn reserved_names_are_rejected() {
        let error = analyze_err("int __declass__x;");
        assert!(error.message.contains("reserved"), "{}", error.message);
        let error = analyze_err("void f() { int this; }");
        assert!(error.message.contains("reserved"), "{}", error.message);
        let error = analyze_err("struct __declass__S {};");
        assert!(error.message.contains("reserved"), "{}", error.message);
    }

    #[test]
    fn user_constructors_are_rejected() {
        let error = analyze_err("class C { public C() { } };");
        assert!(
            error.message.contains("constructors are not supported"),
            "{}",
            error.message
        );
    }

    #[test]
    fn interfaces_analyze_but_cannot_be_used() {
        analyze_ok("interface I { int f(int x); };");
        let error = analyze_err("interface I {}; void f() { I i; }");
        assert!(
            error.message.contains("cannot be instantiated"),
            "{}",
            error.message
        );
        let error = analyze_err("interface I {}; class B {}; class C : B, I {};");
        assert!(
            error.message.contains("not supported"),
            "{}",
            error.message
        );
    }

    #[test]
    fn abstract_classes_cannot_be_instantiated() {
        let error = analyze_err(
            "class C { public int f() abstract; };\
             void g() { C c; }",
        );
        assert!(
            error.message.contains("abstract class"),
            "{}",
            error.message
        );
    }

    #[test]
    fn typedef_aliases_share_the_interned_type() {
        let (ast, types, _) = analyze_ok(
            "typedef int (*operation)(int);\
             int twice(int x) { return x + x; }\
             void f() { operation op; op = &twice; op(3); }",
        );
        // The declared variable's type unwraps the alias to the pointer.
        let op_decl = ast
            .ids()
            .find(|&id| {
                matches!(ast.kind(id), NodeKind::VarDecl { name, .. }
                    if ast.identifier(*name).map(|n| n.as_str()) == Some("op"))
            })
            .unwrap();
        let ty = ast.ty(op_decl).unwrap();
        assert!(types.is_pointer(ty));
    }

    #[test]
    fn casts_follow_the_compatibility_rules() {
        analyze_ok(
            "void f(int* p) {\
                 char* c; c = cast<char*>(p);\
                 int n; n = cast<int>(p);\
                 p = cast<int*>(n);\
                 double d; d = cast<double>(n);\
             }",
        );
        let error = analyze_err("struct S {}; void f() { S s; int n; n = cast<int>(s); }");
        assert!(error.message.contains("cast"), "{}", error.message);
    }

    #[test]
    fn string_literals_are_char_pointers() {
        analyze_ok("void f() { char* s; s = \"hello\"; }");
    }
}
