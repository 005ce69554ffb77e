//! The abstract syntax tree, stored as an arena.
//!
//! Nodes live in a single `Vec` owned by [Ast] and refer to each other with
//! [NodeId] indices, including the parent back-reference each node gains in
//! the parent-linking pass. Indices rather than references keep the
//! ownership graph a tree even though parent links point "upwards", and
//! they let the parser throw away speculatively created nodes by truncating
//! the arena when it rewinds.
//!
//! Each node records the location of its defining token and, once analysis
//! has run, the resolved type of the expression or declaration it
//! represents. Type resolution is total: after a successful analysis every
//! node's type is set.

use crate::common::location::Location;
use crate::common::multiphase::Identifier;
use crate::lexing::tokens::Symbol;
use crate::types::TypeId;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The access modifier every class member carries. Parsed and recorded but
/// not enforced; access checking is left to the source dialect's front-end
/// conventions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Access {
    Public,
    Private,
    Protected,
}

/// How a method participates in dynamic dispatch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Virtuality {
    None,
    Virtual,
    Override,
    Abstract,
}

impl Virtuality {
    /// Whether the method occupies a vtable slot. Overriding and abstract
    /// methods are implicitly virtual.
    pub fn is_virtual(self) -> bool {
        !matches!(self, Virtuality::None)
    }
}

/// Whether a member access was written with `.` (value receiver) or `->`
/// (pointer receiver). Lowering needs the distinction to decide whether to
/// take the receiver's address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemberOp {
    Dot,
    Arrow,
}

impl MemberOp {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberOp::Dot => ".",
            MemberOp::Arrow => "->",
        }
    }
}

/// The `: Base(arg, …)` delegation clause of a user constructor.
#[derive(Clone, Debug, PartialEq)]
pub struct BaseCall {
    pub base_type: NodeId,
    pub args: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Program {
        declarations: Vec<NodeId>,
    },

    // Literals.
    Int(i64),
    Double(f64),
    Char(char),
    Str(String),

    Identifier(Identifier),

    // Type expressions.
    NamedType(Identifier),
    PointerType {
        base: NodeId,
    },
    ArrayType {
        base: NodeId,
        size: NodeId,
    },

    // Statements.
    Sequence {
        items: Vec<NodeId>,
    },
    Block {
        body: Vec<NodeId>,
    },
    If {
        condition: NodeId,
        true_case: NodeId,
        false_case: Option<NodeId>,
    },
    Switch {
        condition: NodeId,
        cases: Vec<(i64, NodeId)>,
        default_case: Option<NodeId>,
    },
    While {
        condition: NodeId,
        body: NodeId,
    },
    DoWhile {
        body: NodeId,
        condition: NodeId,
    },
    For {
        init: Option<NodeId>,
        condition: Option<NodeId>,
        increment: Option<NodeId>,
        body: NodeId,
    },
    Break,
    Continue,
    Return {
        value: Option<NodeId>,
    },

    // Declarations.
    VarDecl {
        var_type: NodeId,
        name: NodeId,
        value: Option<NodeId>,
        access: Access,
    },
    FunDecl {
        return_type: NodeId,
        name: Identifier,
        params: Vec<NodeId>,
        body: Option<NodeId>,
    },
    MethodDecl {
        return_type: NodeId,
        name: Identifier,
        params: Vec<NodeId>,
        body: Option<NodeId>,
        virtuality: Virtuality,
        access: Access,
    },
    ConstructorDecl {
        class: Identifier,
        params: Vec<NodeId>,
        base_call: Option<BaseCall>,
        body: NodeId,
        access: Access,
    },
    StructDecl {
        name: Identifier,
        fields: Vec<NodeId>,
        is_definition: bool,
    },
    ClassDecl {
        name: Identifier,
        base: Option<NodeId>,
        interfaces: Vec<NodeId>,
        fields: Vec<NodeId>,
        methods: Vec<NodeId>,
        constructors: Vec<NodeId>,
        is_definition: bool,
    },
    InterfaceDecl {
        name: Identifier,
        methods: Vec<NodeId>,
    },
    FunPtrDecl {
        name: NodeId,
        return_type: NodeId,
        params: Vec<NodeId>,
    },

    // Expressions.
    Binary {
        op: Symbol,
        left: NodeId,
        right: NodeId,
    },
    Assignment {
        lvalue: NodeId,
        value: NodeId,
    },
    UnaryPre {
        op: Symbol,
        operand: NodeId,
    },
    UnaryPost {
        op: Symbol,
        operand: NodeId,
    },
    AddressOf {
        target: NodeId,
    },
    Deref {
        target: NodeId,
    },
    Index {
        base: NodeId,
        index: NodeId,
    },
    Member {
        op: MemberOp,
        base: NodeId,
        member: NodeId,
    },
    Call {
        callee: NodeId,
        args: Vec<NodeId>,
    },
    Cast {
        target_type: NodeId,
        value: NodeId,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub location: Location,
    pub parent: Option<NodeId>,
    pub ty: Option<TypeId>,
}

#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: NodeKind, location: Location) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            location,
            parent: None,
            ty: None,
        });
        id
    }

    /// The arena length, captured by parser checkpoints.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Every node id currently in the arena, in creation order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(|index| NodeId(index as u32))
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop every node created after a checkpoint, as part of a parser
    /// rewind. Nothing else can reference the dropped tail: the nodes were
    /// created during the speculation being abandoned.
    pub fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn location(&self, id: NodeId) -> Location {
        self.nodes[id.index()].location
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn set_parent(&mut self, id: NodeId, parent: NodeId) {
        self.nodes[id.index()].parent = Some(parent);
    }

    pub fn ty(&self, id: NodeId) -> Option<TypeId> {
        self.nodes[id.index()].ty
    }

    pub fn set_ty(&mut self, id: NodeId, ty: TypeId) {
        self.nodes[id.index()].ty = Some(ty);
    }

    /// The identifier a node names, when it is an identifier node.
    pub fn identifier(&self, id: NodeId) -> Option<&Identifier> {
        match self.kind(id) {
            NodeKind::Identifier(name) => Some(name),
            _ => None,
        }
    }

    /// Walk parent links until a node matching `predicate` is found,
    /// optionally giving up after `depth` additional hops beyond the
    /// immediate parent.
    pub fn find_parent(
        &self,
        from: NodeId,
        predicate: impl Fn(&NodeKind) -> bool,
        depth: Option<usize>,
    ) -> Option<NodeId> {
        let parent = self.parent(from)?;
        if predicate(self.kind(parent)) {
            return Some(parent);
        }
        match depth {
            Some(0) => None,
            Some(remaining) => self.find_parent(parent, predicate, Some(remaining - 1)),
            None => self.find_parent(parent, predicate, None),
        }
    }

    pub fn is_descendant_of(&self, id: NodeId, ancestor: NodeId) -> bool {
        if id == ancestor {
            return true;
        }
        match self.parent(id) {
            Some(parent) => self.is_descendant_of(parent, ancestor),
            None => false,
        }
    }

    /// Whether the node denotes an l-value: a named storage location that
    /// may be assigned to or have its address taken. This is a pure
    /// function of the node kind and its children.
    pub fn has_address(&self, id: NodeId) -> bool {
        match self.kind(id) {
            NodeKind::Identifier(_) | NodeKind::Deref { .. } => true,
            NodeKind::Index { base, .. } | NodeKind::Member { base, .. } => {
                self.has_address(*base)
            }
            NodeKind::Assignment { lvalue, .. } => self.has_address(*lvalue),
            NodeKind::Sequence { items } => items
                .last()
                .map_or(false, |&last| self.has_address(last)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> Location {
        Location::default()
    }

    #[test]
    fn address_rules() {
        let mut ast = Ast::new();
        let x = ast.add(NodeKind::Identifier("x".into()), loc());
        let one = ast.add(NodeKind::Int(1), loc());
        let deref = ast.add(NodeKind::Deref { target: one }, loc());
        let member = ast.add(
            NodeKind::Member {
                op: MemberOp::Dot,
                base: x,
                member: one,
            },
            loc(),
        );
        let call = ast.add(NodeKind::Call { callee: x, args: vec![] }, loc());
        let index_of_call = ast.add(NodeKind::Index { base: call, index: one }, loc());
        let assign = ast.add(NodeKind::Assignment { lvalue: x, value: one }, loc());
        let post = ast.add(
            NodeKind::UnaryPost {
                op: Symbol::Inc,
                operand: x,
            },
            loc(),
        );

        assert!(ast.has_address(x));
        assert!(ast.has_address(deref));
        assert!(ast.has_address(member));
        assert!(ast.has_address(assign));
        assert!(!ast.has_address(one));
        assert!(!ast.has_address(call));
        assert!(!ast.has_address(index_of_call));
        assert!(!ast.has_address(post));
    }

    #[test]
    fn parent_queries() {
        let mut ast = Ast::new();
        let inner = ast.add(NodeKind::Int(1), loc());
        let block = ast.add(NodeKind::Block { body: vec![inner] }, loc());
        let program = ast.add(
            NodeKind::Program {
                declarations: vec![block],
            },
            loc(),
        );
        ast.set_parent(inner, block);
        ast.set_parent(block, program);

        let is_program = |kind: &NodeKind| matches!(kind, NodeKind::Program { .. });
        assert_eq!(ast.find_parent(inner, is_program, None), Some(program));
        assert_eq!(ast.find_parent(inner, is_program, Some(0)), None);
        assert_eq!(ast.find_parent(inner, is_program, Some(1)), Some(program));
        assert!(ast.is_descendant_of(inner, program));
        assert!(!ast.is_descendant_of(program, inner));
    }
}
