//! The parent-linking pass.
//!
//! A single traversal after parsing sets each node's parent back-reference
//! to the node it hangs off. The walk mirrors the structural children of
//! each AST variant exactly and does nothing beyond the assignment; it
//! exists so that the analyzer and emitter can ask contextual questions
//! (`find_parent`) that the grammar alone cannot answer locally, such as
//! whether an identifier sits in member position or whether a variable
//! declaration lives in a declaration sequence.

use crate::parsing::nodes::{Ast, NodeId, NodeKind};

pub fn link_parents(ast: &mut Ast, root: NodeId) {
    for child in children(ast, root) {
        ast.set_parent(child, root);
        link_parents(ast, child);
    }
}

/// The structural children of a node, in declaration order.
fn children(ast: &Ast, id: NodeId) -> Vec<NodeId> {
    let mut result = vec![];
    let mut push = |child: &NodeId| result.push(*child);
    match ast.kind(id) {
        NodeKind::Program { declarations } => declarations.iter().for_each(push),

        NodeKind::Int(_)
        | NodeKind::Double(_)
        | NodeKind::Char(_)
        | NodeKind::Str(_)
        | NodeKind::Identifier(_)
        | NodeKind::NamedType(_)
        | NodeKind::Break
        | NodeKind::Continue => {}

        NodeKind::PointerType { base } => push(base),
        NodeKind::ArrayType { base, size } => {
            push(base);
            push(size);
        }

        NodeKind::Sequence { items } => items.iter().for_each(push),
        NodeKind::Block { body } => body.iter().for_each(push),
        NodeKind::If {
            condition,
            true_case,
            false_case,
        } => {
            push(condition);
            push(true_case);
            false_case.iter().for_each(push);
        }
        NodeKind::Switch {
            condition,
            cases,
            default_case,
        } => {
            push(condition);
            cases.iter().for_each(|(_, body)| push(body));
            default_case.iter().for_each(push);
        }
        NodeKind::While { condition, body } => {
            push(condition);
            push(body);
        }
        NodeKind::DoWhile { body, condition } => {
            push(body);
            push(condition);
        }
        NodeKind::For {
            init,
            condition,
            increment,
            body,
        } => {
            init.iter().for_each(&mut push);
            condition.iter().for_each(&mut push);
            increment.iter().for_each(&mut push);
            push(body);
        }
        NodeKind::Return { value } => value.iter().for_each(push),

        NodeKind::VarDecl {
            var_type,
            name,
            value,
            ..
        } => {
            push(var_type);
            push(name);
            value.iter().for_each(push);
        }
        NodeKind::FunDecl {
            return_type,
            params,
            body,
            ..
        }
        | NodeKind::MethodDecl {
            return_type,
            params,
            body,
            ..
        } => {
            push(return_type);
            params.iter().for_each(&mut push);
            body.iter().for_each(push);
        }
        NodeKind::ConstructorDecl {
            params,
            base_call,
            body,
            ..
        } => {
            params.iter().for_each(&mut push);
            if let Some(base_call) = base_call {
                push(&base_call.base_type);
                base_call.args.iter().for_each(&mut push);
            }
            push(body);
        }
        NodeKind::StructDecl { fields, .. } => fields.iter().for_each(push),
        NodeKind::ClassDecl {
            base,
            interfaces,
            fields,
            methods,
            constructors,
            ..
        } => {
            base.iter().for_each(&mut push);
            interfaces.iter().for_each(&mut push);
            fields.iter().for_each(&mut push);
            methods.iter().for_each(&mut push);
            constructors.iter().for_each(&mut push);
        }
        NodeKind::InterfaceDecl { methods, .. } => methods.iter().for_each(push),
        NodeKind::FunPtrDecl {
            name,
            return_type,
            params,
        } => {
            push(return_type);
            push(name);
            params.iter().for_each(&mut push);
        }

        NodeKind::Binary { left, right, .. } => {
            push(left);
            push(right);
        }
        NodeKind::Assignment { lvalue, value } => {
            push(lvalue);
            push(value);
        }
        NodeKind::UnaryPre { operand, .. } | NodeKind::UnaryPost { operand, .. } => push(operand),
        NodeKind::AddressOf { target } | NodeKind::Deref { target } => push(target),
        NodeKind::Index { base, index } => {
            push(base);
            push(index);
        }
        NodeKind::Member { base, member, .. } => {
            push(base);
            push(member);
        }
        NodeKind::Call { callee, args } => {
            push(callee);
            args.iter().for_each(&mut push);
        }
        NodeKind::Cast { target_type, value } => {
            push(target_type);
            push(value);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use crate::lexing::lexer::Lexer;
    use crate::lexing::source::Source;
    use crate::lexing::Tokens;
    use crate::parsing::Parser;

    use super::*;

    fn parse_and_link(source: &str) -> (Ast, NodeId) {
        let tokens = Lexer::from(Source::from(source)).lex_all().unwrap();
        let (mut ast, root) = Parser::from(Tokens::from(tokens)).parse().unwrap();
        link_parents(&mut ast, root);
        (ast, root)
    }

    #[test]
    fn every_reachable_node_gains_a_parent() {
        let (ast, root) = parse_and_link(
            "struct S { int n; };\
             int main() { S s; if (1) { s.n = 2; } return 0; }",
        );
        fn assert_linked(ast: &Ast, id: NodeId) {
            for child in children(ast, id) {
                assert_eq!(ast.parent(child), Some(id));
                assert_linked(ast, child);
            }
        }
        assert!(ast.parent(root).is_none());
        assert_linked(&ast, root);
    }

    #[test]
    fn member_context_is_queryable() {
        let (ast, _) = parse_and_link("struct S { int n; }; int f(S s) { return s.n; }");
        let member_name = ast
            .ids()
            .find(|&id| {
                ast.identifier(id).map(|name| name.as_str()) == Some("n")
                    && matches!(
                        ast.parent(id).map(|parent| ast.kind(parent)),
                        Some(NodeKind::Member { .. })
                    )
            })
            .expect("the member identifier is linked under the member node");
        let member = ast
            .find_parent(
                member_name,
                |kind| matches!(kind, NodeKind::Member { .. }),
                Some(1),
            )
            .expect("find_parent reaches the member access");
        assert!(ast.is_descendant_of(member_name, member));
    }
}
