//! # Parsing
//!
//! The parser turns the token stream into an AST arena, ready for the
//! parent-linking pass and the analyzer. There is no CST step between
//! tokens and the AST; the grammar is small enough that the AST can be
//! built directly.
//!
//! ## The type/expression ambiguity
//!
//! The grammar shares the unfortunate C problem that `A * b;` is either a
//! declaration of `b` with type `A*` or a multiplication of `A` and `b`,
//! and nothing but knowledge of which identifiers name types can decide
//! it. The parser therefore tracks a set of *tentative type names*,
//! populated as struct, class, interface, and typedef declarations are
//! encountered; a bare identifier is a type name iff it is in that set.
//!
//! ## Speculation
//!
//! Two productions cannot be decided by bounded lookahead alone: the
//! function-or-variable declaration (and its constructor variant inside
//! class bodies), and the constructor-call discrimination inside postfix
//! expressions. Both are handled by saving a checkpoint, parsing
//! speculatively, and rewinding. A checkpoint restores the token cursor,
//! the tentative-type-name stack height, and the AST arena length, so a
//! rewind undoes everything the speculation did, including any nodes it
//! created.

pub mod nodes;
pub mod parenting;

use std::collections::HashSet;
use std::result;

use log::trace;

use crate::common::error::LocatedError;
use crate::common::multiphase::Identifier;
use crate::common::peekable_buffer::PeekableBuffer;
use crate::lexing::lexer::LexedToken;
use crate::lexing::tokens::{Keyword, Literal, Symbol, Token};
use crate::lexing::Tokens;
use crate::parsing::nodes::{
    Access, Ast, BaseCall, MemberOp, NodeId, NodeKind, Virtuality,
};

type Result<T> = result::Result<T, LocatedError>;

/// What a `FUN_HEAD`-shaped declaration is being parsed as, which decides
/// the modifiers and body forms accepted after it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FunctionKind {
    Function,
    Method,
    InterfaceMethod,
    Constructor,
}

/// A saved parser position. Restoring must undo the tentative type names
/// recorded after the save, not just the cursor, and it drops the AST
/// nodes the speculation created.
struct Checkpoint {
    cursor: usize,
    tentative_len: usize,
    nodes_len: usize,
}

/// The binary-operator ladder, outermost (loosest-binding) level first.
/// `^` sits with `|`; the language has no dedicated xor level.
const BINARY_PRECEDENCE: [&[Symbol]; 9] = [
    &[Symbol::Or],
    &[Symbol::And],
    &[Symbol::BitOr, Symbol::BitXor],
    &[Symbol::BitAnd],
    &[Symbol::Eq, Symbol::NotEq],
    &[Symbol::Lt, Symbol::Gt, Symbol::Lte, Symbol::Gte],
    &[Symbol::ShiftLeft, Symbol::ShiftRight],
    &[Symbol::Add, Symbol::Sub],
    &[Symbol::Mul, Symbol::Div, Symbol::Mod],
];

pub struct Parser {
    tokens: Tokens,
    ast: Ast,

    /// Identifiers currently believed to name types, plus the insertion
    /// stack that lets checkpoints unwind them. A name is pushed on the
    /// stack only when it is new to the set, so rewinding past a
    /// re-declaration of an already-known name cannot erase the earlier
    /// fact.
    tentative_types: HashSet<Identifier>,
    tentative_types_stack: Vec<Identifier>,

    /// The name of the class whose body is being parsed, if any; it is
    /// what constructor detection compares against.
    class_name: Option<Identifier>,
}

impl From<Tokens> for Parser {
    fn from(tokens: Tokens) -> Self {
        Self {
            tokens,
            ast: Ast::new(),
            tentative_types: HashSet::new(),
            tentative_types_stack: vec![],
            class_name: None,
        }
    }
}

impl Parser {
    /// Parse a whole program, returning the arena and the program root.
    pub fn parse(mut self) -> Result<(Ast, NodeId)> {
        let root = self.parse_program()?;
        if self.tokens.top().token != Token::Eof {
            return self.expected("end of file");
        }
        Ok((self.ast, root))
    }

    #[cfg(test)]
    fn tentative_type_names(&self) -> &HashSet<Identifier> {
        &self.tentative_types
    }

    // Failure helpers.

    /// Fail at parsing, describing the reason why.
    fn fail<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(LocatedError::new(message, self.tokens.location()))
    }

    /// Fail at parsing, stating that the `expected` token was expected but
    /// did not appear.
    fn expected<T>(&self, expected: impl std::fmt::Display) -> Result<T> {
        self.fail(format!(
            "Expected {}, but {} found",
            expected,
            self.tokens.top().token
        ))
    }

    // Token cursor helpers.

    fn top(&self) -> &LexedToken {
        self.tokens.top()
    }

    fn location(&self) -> crate::common::location::Location {
        self.tokens.location()
    }

    fn next_is_symbol(&self, symbol: Symbol) -> bool {
        self.top().token == Token::Symbol(symbol)
    }

    fn next_is_keyword(&self, keyword: Keyword) -> bool {
        self.top().token == Token::Keyword(keyword)
    }

    /// Discard the next token and succeed if it is the expected symbol;
    /// fail at parsing otherwise.
    fn pop_symbol(&mut self, symbol: Symbol) -> Result<LexedToken> {
        if self.next_is_symbol(symbol) {
            Ok(self.tokens.read().unwrap_or_default())
        } else {
            self.expected(format!("'{}'", symbol))
        }
    }

    fn pop_keyword(&mut self, keyword: Keyword) -> Result<LexedToken> {
        if self.next_is_keyword(keyword) {
            Ok(self.tokens.read().unwrap_or_default())
        } else {
            self.expected(format!("'{}'", keyword))
        }
    }

    /// Discard the next token if it is the expected symbol, reporting
    /// whether it was.
    fn cond_pop_symbol(&mut self, symbol: Symbol) -> bool {
        let matches = self.next_is_symbol(symbol);
        if matches {
            self.tokens.discard();
        }
        matches
    }

    fn cond_pop_keyword(&mut self, keyword: Keyword) -> bool {
        let matches = self.next_is_keyword(keyword);
        if matches {
            self.tokens.discard();
        }
        matches
    }

    /// Any identifier token, including one naming a type. Declaration
    /// heads use this: a forward-declared struct's name is already a
    /// tentative type name when its definition arrives.
    fn pop_any_identifier(&mut self) -> Result<Identifier> {
        match &self.top().token {
            Token::Identifier(name) => {
                let name = name.clone();
                self.tokens.discard();
                Ok(name)
            }
            _ => self.expected("identifier"),
        }
    }

    /// An identifier in value position: type names are rejected, which is
    /// what stops `S(1)` from parsing `S` as a variable once `S` is known
    /// to be a type.
    fn parse_identifier(&mut self) -> Result<NodeId> {
        match &self.top().token {
            Token::Identifier(name) if !self.is_type_name(name) => {
                let name = name.clone();
                let location = self.location();
                self.tokens.discard();
                Ok(self.ast.add(NodeKind::Identifier(name), location))
            }
            _ => self.expected("identifier"),
        }
    }

    // The tentative-type-name set.

    fn is_type_name(&self, name: &Identifier) -> bool {
        self.tentative_types.contains(name)
    }

    /// Record `name` as a tentative type name. The same name can arrive
    /// multiple times for forward-declared structs.
    fn add_type_name(&mut self, name: Identifier) {
        if self.tentative_types.insert(name.clone()) {
            self.tentative_types_stack.push(name);
        }
    }

    // Checkpointing.

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            cursor: self.tokens.position(),
            tentative_len: self.tentative_types_stack.len(),
            nodes_len: self.ast.len(),
        }
    }

    fn revert_to(&mut self, checkpoint: &Checkpoint) {
        trace!("rewinding parser to token {}", checkpoint.cursor);
        self.tokens.seek(checkpoint.cursor);
        while self.tentative_types_stack.len() > checkpoint.tentative_len {
            let name = self
                .tentative_types_stack
                .pop()
                .expect("stack length was just checked");
            self.tentative_types.remove(&name);
        }
        self.ast.truncate(checkpoint.nodes_len);
    }

    // The following methods are sub-parsers that are reentrant and handle
    // the parsing of a particular subcontext of the overall source. Each
    // expects the whole context next in the stream, so previous steps
    // working out which sub-parser to delegate to should use peeks and not
    // reads to discern it from subsequent tokens in the buffer.

    /* PROGRAM := { STRUCT_DECL | CLASS_DECL | INTERFACE_DECL | FUNPTR_DECL
                  | FUN_OR_VAR_DECL } */
    fn parse_program(&mut self) -> Result<NodeId> {
        let location = self.location();
        let mut declarations = vec![];
        while self.top().token != Token::Eof {
            let declaration = if self.next_is_keyword(Keyword::Struct) {
                self.parse_struct_decl()?
            } else if self.next_is_keyword(Keyword::Class) {
                self.parse_class_decl()?
            } else if self.next_is_keyword(Keyword::Interface) {
                self.parse_interface_decl()?
            } else if self.next_is_keyword(Keyword::Typedef) {
                self.parse_funptr_decl()?
            } else {
                self.parse_fun_or_var_decl(false)?
            };
            declarations.push(declaration);
        }
        Ok(self.ast.add(NodeKind::Program { declarations }, location))
    }

    /// The speculative strategy for the function-or-variable ambiguity: a
    /// type followed by `(` is a constructor, a type and an identifier
    /// followed by `(` is a function, and anything else is a variable
    /// declaration. The dirty trick is to parse that far, look at the next
    /// token, then rewind and parse the proper production for real.
    fn parse_fun_or_var_decl(&mut self, in_class: bool) -> Result<NodeId> {
        let checkpoint = self.checkpoint();
        if in_class {
            self.parse_access_mod()?;
        }
        self.parse_type(true)?;
        if in_class && self.next_is_symbol(Symbol::ParOpen) {
            self.revert_to(&checkpoint);
            return self.parse_fun_decl(FunctionKind::Constructor);
        }
        self.parse_identifier()?;
        if self.next_is_symbol(Symbol::ParOpen) {
            self.revert_to(&checkpoint);
            let kind = if in_class {
                FunctionKind::Method
            } else {
                FunctionKind::Function
            };
            self.parse_fun_decl(kind)
        } else {
            self.revert_to(&checkpoint);
            let declaration = if in_class {
                self.parse_var_decl(true)?
            } else {
                self.parse_var_decls()?
            };
            self.pop_symbol(Symbol::Semicolon)?;
            Ok(declaration)
        }
    }

    /* ACCESS_MOD := 'public' | 'private' | 'protected' */
    fn parse_access_mod(&mut self) -> Result<Access> {
        if self.cond_pop_keyword(Keyword::Public) {
            Ok(Access::Public)
        } else if self.cond_pop_keyword(Keyword::Private) {
            Ok(Access::Private)
        } else if self.cond_pop_keyword(Keyword::Protected) {
            Ok(Access::Protected)
        } else {
            self.expected("access modifier")
        }
    }

    /* FUN_ARG := TYPE identifier
       FUN_HEAD := TYPE_FUN_RET identifier '(' [ FUN_ARG { ',' FUN_ARG } ] ')'
       FUN_DECL := FUN_HEAD [ BLOCK_STMT | ';' ]
       METHOD_DECL := FUN_HEAD [ 'virtual' | 'override' | 'abstract' ]
                      [ BLOCK_STMT | ';' ]
       CONSTRUCTOR_DECL := identifier '(' [ FUN_ARG { ',' FUN_ARG } ] ')'
                           [ ':' TYPE '(' [ identifier { ',' identifier } ] ')' ]
                           BLOCK_STMT */
    fn parse_fun_decl(&mut self, kind: FunctionKind) -> Result<NodeId> {
        let access = match kind {
            FunctionKind::Method | FunctionKind::Constructor => self.parse_access_mod()?,
            _ => Access::Public,
        };
        let location = self.location();

        if kind == FunctionKind::Constructor {
            return self.parse_constructor_decl(access, location);
        }

        let return_type = self.parse_type_fun_ret()?;
        let name = self.pop_any_identifier()?;
        let params = self.parse_fun_params()?;

        match kind {
            FunctionKind::Method => {
                let virtuality = if self.cond_pop_keyword(Keyword::Virtual) {
                    Virtuality::Virtual
                } else if self.cond_pop_keyword(Keyword::Override) {
                    Virtuality::Override
                } else if self.cond_pop_keyword(Keyword::Abstract) {
                    Virtuality::Abstract
                } else {
                    Virtuality::None
                };
                let body = if virtuality == Virtuality::Abstract {
                    if self.next_is_symbol(Symbol::CurlyOpen) {
                        return self.fail(format!(
                            "abstract method {} cannot have a body",
                            name
                        ));
                    }
                    self.pop_symbol(Symbol::Semicolon)?;
                    None
                } else if self.next_is_symbol(Symbol::CurlyOpen) {
                    Some(self.parse_block_stmt()?)
                } else {
                    self.pop_symbol(Symbol::Semicolon)?;
                    None
                };
                Ok(self.ast.add(
                    NodeKind::MethodDecl {
                        return_type,
                        name,
                        params,
                        body,
                        virtuality,
                        access,
                    },
                    location,
                ))
            }
            FunctionKind::InterfaceMethod => {
                if self.next_is_symbol(Symbol::CurlyOpen) {
                    return self.fail(format!(
                        "interface method {} must not have a body",
                        name
                    ));
                }
                self.pop_symbol(Symbol::Semicolon)?;
                Ok(self.ast.add(
                    NodeKind::MethodDecl {
                        return_type,
                        name,
                        params,
                        body: None,
                        virtuality: Virtuality::Virtual,
                        access,
                    },
                    location,
                ))
            }
            _ => {
                // A body makes this a definition; a semicolon leaves it a
                // forward declaration.
                let body = if self.next_is_symbol(Symbol::CurlyOpen) {
                    Some(self.parse_block_stmt()?)
                } else {
                    self.pop_symbol(Symbol::Semicolon)?;
                    None
                };
                Ok(self.ast.add(
                    NodeKind::FunDecl {
                        return_type,
                        name,
                        params,
                        body,
                    },
                    location,
                ))
            }
        }
    }

    fn parse_constructor_decl(
        &mut self,
        access: Access,
        location: crate::common::location::Location,
    ) -> Result<NodeId> {
        let class = self
            .class_name
            .clone()
            .expect("constructors are only parsed inside class bodies");
        let name = self.pop_any_identifier()?;
        if name != class {
            return self.fail(format!(
                "expected constructor name to match class {}, but {} found",
                class, name
            ));
        }
        let params = self.parse_fun_params()?;
        let base_call = if self.cond_pop_symbol(Symbol::Colon) {
            let base_type = self.parse_type(false)?;
            self.pop_symbol(Symbol::ParOpen)?;
            let mut args = vec![];
            if !self.next_is_symbol(Symbol::ParClose) {
                loop {
                    args.push(self.parse_identifier()?);
                    if !self.cond_pop_symbol(Symbol::Comma) {
                        break;
                    }
                }
            }
            self.pop_symbol(Symbol::ParClose)?;
            Some(BaseCall { base_type, args })
        } else {
            None
        };
        let body = self.parse_block_stmt()?;
        Ok(self.ast.add(
            NodeKind::ConstructorDecl {
                class,
                params,
                base_call,
                body,
                access,
            },
            location,
        ))
    }

    fn parse_fun_params(&mut self) -> Result<Vec<NodeId>> {
        self.pop_symbol(Symbol::ParOpen)?;
        let mut params: Vec<NodeId> = vec![];
        if !self.next_is_symbol(Symbol::ParClose) {
            loop {
                let location = self.location();
                let var_type = self.parse_type(false)?;
                let name_location = self.location();
                let name = self.parse_identifier()?;
                let name_identifier = self
                    .ast
                    .identifier(name)
                    .cloned()
                    .expect("parse_identifier yields identifier nodes");
                let duplicate = params.iter().any(|&param| {
                    matches!(
                        self.ast.kind(param),
                        NodeKind::VarDecl { name, .. }
                            if self.ast.identifier(*name) == Some(&name_identifier)
                    )
                });
                if duplicate {
                    return Err(LocatedError::new(
                        format!("function argument {} already defined", name_identifier),
                        name_location,
                    ));
                }
                params.push(self.ast.add(
                    NodeKind::VarDecl {
                        var_type,
                        name,
                        value: None,
                        access: Access::Public,
                    },
                    location,
                ));
                if !self.cond_pop_symbol(Symbol::Comma) {
                    break;
                }
            }
        }
        self.pop_symbol(Symbol::ParClose)?;
        Ok(params)
    }

    // Statements.

    /* STATEMENT := BLOCK_STMT | IF_STMT | SWITCH_STMT | WHILE_STMT
                  | DO_WHILE_STMT | FOR_STMT | BREAK_STMT | CONTINUE_STMT
                  | RETURN_STMT | EXPR_STMT */
    fn parse_statement(&mut self) -> Result<NodeId> {
        if self.next_is_symbol(Symbol::CurlyOpen) {
            self.parse_block_stmt()
        } else if self.next_is_keyword(Keyword::If) {
            self.parse_if_stmt()
        } else if self.next_is_keyword(Keyword::Switch) {
            self.parse_switch_stmt()
        } else if self.next_is_keyword(Keyword::While) {
            self.parse_while_stmt()
        } else if self.next_is_keyword(Keyword::Do) {
            self.parse_do_while_stmt()
        } else if self.next_is_keyword(Keyword::For) {
            self.parse_for_stmt()
        } else if self.next_is_keyword(Keyword::Break) {
            self.parse_break_stmt()
        } else if self.next_is_keyword(Keyword::Continue) {
            self.parse_continue_stmt()
        } else if self.next_is_keyword(Keyword::Return) {
            self.parse_return_stmt()
        } else {
            self.parse_expr_stmt()
        }
    }

    /* BLOCK_STMT := '{' { STATEMENT } '}' */
    fn parse_block_stmt(&mut self) -> Result<NodeId> {
        let location = self.pop_symbol(Symbol::CurlyOpen)?.location;
        let mut body = vec![];
        while !self.cond_pop_symbol(Symbol::CurlyClose) {
            if self.top().token == Token::Eof {
                return self.expected("'}'");
            }
            body.push(self.parse_statement()?);
        }
        Ok(self.ast.add(NodeKind::Block { body }, location))
    }

    /* IF_STMT := if '(' EXPR ')' STATEMENT [ else STATEMENT ] */
    fn parse_if_stmt(&mut self) -> Result<NodeId> {
        let location = self.pop_keyword(Keyword::If)?.location;
        self.pop_symbol(Symbol::ParOpen)?;
        let condition = self.parse_expr()?;
        self.pop_symbol(Symbol::ParClose)?;
        let true_case = self.parse_statement()?;
        let false_case = if self.cond_pop_keyword(Keyword::Else) {
            Some(self.parse_statement()?)
        } else {
            None
        };
        Ok(self.ast.add(
            NodeKind::If {
                condition,
                true_case,
                false_case,
            },
            location,
        ))
    }

    /* SWITCH_STMT := switch '(' EXPR ')' '{' { CASE_STMT }
                      [ default ':' CASE_BODY ] { CASE_STMT } '}'
       CASE_STMT := case integer_literal ':' CASE_BODY */
    fn parse_switch_stmt(&mut self) -> Result<NodeId> {
        let location = self.pop_keyword(Keyword::Switch)?.location;
        self.pop_symbol(Symbol::ParOpen)?;
        let condition = self.parse_expr()?;
        self.pop_symbol(Symbol::ParClose)?;
        self.pop_symbol(Symbol::CurlyOpen)?;
        let mut cases: Vec<(i64, NodeId)> = vec![];
        let mut default_case = None;
        while !self.cond_pop_symbol(Symbol::CurlyClose) {
            if self.next_is_keyword(Keyword::Default) {
                if default_case.is_some() {
                    return self.fail("default case already provided");
                }
                self.tokens.discard();
                self.pop_symbol(Symbol::Colon)?;
                default_case = Some(self.parse_case_body()?);
            } else if self.cond_pop_keyword(Keyword::Case) {
                let case_location = self.location();
                let value = match &self.top().token {
                    Token::Literal(Literal::Int(value)) => {
                        let value = *value;
                        self.tokens.discard();
                        value
                    }
                    _ => return self.expected("integer literal"),
                };
                if cases.iter().any(|&(existing, _)| existing == value) {
                    return Err(LocatedError::new(
                        format!("case {} already provided", value),
                        case_location,
                    ));
                }
                self.pop_symbol(Symbol::Colon)?;
                cases.push((value, self.parse_case_body()?));
            } else {
                return self.expected("case or default keyword");
            }
        }
        Ok(self.ast.add(
            NodeKind::Switch {
                condition,
                cases,
                default_case,
            },
            location,
        ))
    }

    /* CASE_BODY := { STATEMENT }
       Can be empty if followed by case, default, or '}'. */
    fn parse_case_body(&mut self) -> Result<NodeId> {
        let location = self.location();
        let mut body = vec![];
        while !self.next_is_keyword(Keyword::Case)
            && !self.next_is_keyword(Keyword::Default)
            && !self.next_is_symbol(Symbol::CurlyClose)
        {
            body.push(self.parse_statement()?);
        }
        Ok(self.ast.add(NodeKind::Block { body }, location))
    }

    /* WHILE_STMT := while '(' EXPR ')' STATEMENT */
    fn parse_while_stmt(&mut self) -> Result<NodeId> {
        let location = self.pop_keyword(Keyword::While)?.location;
        self.pop_symbol(Symbol::ParOpen)?;
        let condition = self.parse_expr()?;
        self.pop_symbol(Symbol::ParClose)?;
        let body = self.parse_statement()?;
        Ok(self.ast.add(NodeKind::While { condition, body }, location))
    }

    /* DO_WHILE_STMT := do STATEMENT while '(' EXPR ')' ';' */
    fn parse_do_while_stmt(&mut self) -> Result<NodeId> {
        let location = self.pop_keyword(Keyword::Do)?.location;
        let body = self.parse_statement()?;
        self.pop_keyword(Keyword::While)?;
        self.pop_symbol(Symbol::ParOpen)?;
        let condition = self.parse_expr()?;
        self.pop_symbol(Symbol::ParClose)?;
        self.pop_symbol(Symbol::Semicolon)?;
        Ok(self.ast.add(NodeKind::DoWhile { body, condition }, location))
    }

    /* FOR_STMT := for '(' [ EXPR_OR_VAR_DECL ] ';' [ EXPR ] ';' [ EXPR ] ')'
                   STATEMENT */
    fn parse_for_stmt(&mut self) -> Result<NodeId> {
        let location = self.pop_keyword(Keyword::For)?.location;
        self.pop_symbol(Symbol::ParOpen)?;
        let init = if self.next_is_symbol(Symbol::Semicolon) {
            None
        } else {
            Some(self.parse_expr_or_var_decl()?)
        };
        self.pop_symbol(Symbol::Semicolon)?;
        let condition = if self.next_is_symbol(Symbol::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.pop_symbol(Symbol::Semicolon)?;
        let increment = if self.next_is_symbol(Symbol::ParClose) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.pop_symbol(Symbol::ParClose)?;
        let body = self.parse_statement()?;
        Ok(self.ast.add(
            NodeKind::For {
                init,
                condition,
                increment,
                body,
            },
            location,
        ))
    }

    /* BREAK_STMT := break ';'
       The parser allows a break statement even when there is no loop or
       switch around it. */
    fn parse_break_stmt(&mut self) -> Result<NodeId> {
        let location = self.pop_keyword(Keyword::Break)?.location;
        self.pop_symbol(Symbol::Semicolon)?;
        Ok(self.ast.add(NodeKind::Break, location))
    }

    /* CONTINUE_STMT := continue ';' */
    fn parse_continue_stmt(&mut self) -> Result<NodeId> {
        let location = self.pop_keyword(Keyword::Continue)?.location;
        self.pop_symbol(Symbol::Semicolon)?;
        Ok(self.ast.add(NodeKind::Continue, location))
    }

    /* RETURN_STMT := return [ EXPR ] ';' */
    fn parse_return_stmt(&mut self) -> Result<NodeId> {
        let location = self.pop_keyword(Keyword::Return)?.location;
        let value = if self.next_is_symbol(Symbol::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.pop_symbol(Symbol::Semicolon)?;
        Ok(self.ast.add(NodeKind::Return { value }, location))
    }

    /* EXPR_STMT := EXPR_OR_VAR_DECL ';' */
    fn parse_expr_stmt(&mut self) -> Result<NodeId> {
        let result = self.parse_expr_or_var_decl()?;
        self.pop_symbol(Symbol::Semicolon)?;
        Ok(result)
    }

    // Types.

    /* TYPE := (int | double | char | identifier) { '*' }
             | void '*' { '*' }
       The identifier must be a tentative type name. */
    fn parse_type(&mut self, can_be_void: bool) -> Result<NodeId> {
        let location = self.location();
        let mut result = match &self.top().token {
            Token::Keyword(Keyword::Void) => {
                self.tokens.discard();
                let named = self
                    .ast
                    .add(NodeKind::NamedType(Identifier::from("void")), location);
                if can_be_void {
                    named
                } else {
                    // If it can't be void, it must be at least void*.
                    let star = self.pop_symbol(Symbol::Mul)?;
                    self.ast
                        .add(NodeKind::PointerType { base: named }, star.location)
                }
            }
            Token::Keyword(keyword @ (Keyword::Int | Keyword::Char | Keyword::Double)) => {
                let name = Identifier::from(keyword.as_str());
                self.tokens.discard();
                self.ast.add(NodeKind::NamedType(name), location)
            }
            Token::Identifier(name) if self.is_type_name(name) => {
                let name = name.clone();
                self.tokens.discard();
                self.ast.add(NodeKind::NamedType(name), location)
            }
            _ => return self.expected("type"),
        };
        // Deal with pointers to pointers.
        while self.next_is_symbol(Symbol::Mul) {
            let star = self.pop_symbol(Symbol::Mul)?;
            result = self
                .ast
                .add(NodeKind::PointerType { base: result }, star.location);
        }
        Ok(result)
    }

    /* TYPE_FUN_RET := void | TYPE */
    fn parse_type_fun_ret(&mut self) -> Result<NodeId> {
        self.parse_type(true)
    }

    // Type declarations.

    /* STRUCT_DECL := struct identifier [ '{' { TYPE identifier ';' } '}' ] ';' */
    fn parse_struct_decl(&mut self) -> Result<NodeId> {
        let location = self.pop_keyword(Keyword::Struct)?.location;
        let name = self.pop_any_identifier()?;
        self.add_type_name(name.clone());
        let mut fields = vec![];
        let is_definition = self.cond_pop_symbol(Symbol::CurlyOpen);
        if is_definition {
            while !self.cond_pop_symbol(Symbol::CurlyClose) {
                fields.push(self.parse_var_decl(false)?);
                self.pop_symbol(Symbol::Semicolon)?;
            }
        }
        self.pop_symbol(Symbol::Semicolon)?;
        Ok(self.ast.add(
            NodeKind::StructDecl {
                name,
                fields,
                is_definition,
            },
            location,
        ))
    }

    /* FUNPTR_DECL := 'typedef' TYPE_FUN_RET '(' '*' identifier ')'
                      '(' [ TYPE { ',' TYPE } ] ')' ';' */
    fn parse_funptr_decl(&mut self) -> Result<NodeId> {
        let location = self.pop_keyword(Keyword::Typedef)?.location;
        let return_type = self.parse_type_fun_ret()?;
        self.pop_symbol(Symbol::ParOpen)?;
        self.pop_symbol(Symbol::Mul)?;
        let name = self.parse_identifier()?;
        let name_identifier = self
            .ast
            .identifier(name)
            .cloned()
            .expect("parse_identifier yields identifier nodes");
        self.add_type_name(name_identifier);
        self.pop_symbol(Symbol::ParClose)?;
        self.pop_symbol(Symbol::ParOpen)?;
        let mut params = vec![];
        if !self.next_is_symbol(Symbol::ParClose) {
            loop {
                params.push(self.parse_type(false)?);
                if !self.cond_pop_symbol(Symbol::Comma) {
                    break;
                }
            }
        }
        self.pop_symbol(Symbol::ParClose)?;
        self.pop_symbol(Symbol::Semicolon)?;
        Ok(self.ast.add(
            NodeKind::FunPtrDecl {
                name,
                return_type,
                params,
            },
            location,
        ))
    }

    /* INTERFACE_DECL := 'interface' identifier [ '{' { FUN_HEAD ';' } '}' ] ';' */
    fn parse_interface_decl(&mut self) -> Result<NodeId> {
        let location = self.pop_keyword(Keyword::Interface)?.location;
        let name = self.pop_any_identifier()?;
        self.add_type_name(name.clone());
        let mut methods = vec![];
        if self.cond_pop_symbol(Symbol::CurlyOpen) {
            while !self.cond_pop_symbol(Symbol::CurlyClose) {
                methods.push(self.parse_fun_decl(FunctionKind::InterfaceMethod)?);
            }
        }
        self.pop_symbol(Symbol::Semicolon)?;
        Ok(self.ast.add(NodeKind::InterfaceDecl { name, methods }, location))
    }

    /* CLASS_DECL := 'class' identifier
                     [ ':' TYPE { ',' TYPE } ]
                     [ '{' { FUN_OR_VAR_DECL } '}' ] ';' */
    fn parse_class_decl(&mut self) -> Result<NodeId> {
        let location = self.pop_keyword(Keyword::Class)?.location;
        let name = self.pop_any_identifier()?;
        self.class_name = Some(name.clone());
        self.add_type_name(name.clone());
        let mut base = None;
        let mut interfaces = vec![];
        if self.cond_pop_symbol(Symbol::Colon) {
            base = Some(self.parse_type(false)?);
            while self.cond_pop_symbol(Symbol::Comma) {
                interfaces.push(self.parse_type(false)?);
            }
        }
        let mut fields = vec![];
        let mut methods = vec![];
        let mut constructors = vec![];
        let is_definition = self.cond_pop_symbol(Symbol::CurlyOpen);
        if is_definition {
            while !self.cond_pop_symbol(Symbol::CurlyClose) {
                let member = self.parse_fun_or_var_decl(true)?;
                match self.ast.kind(member) {
                    NodeKind::VarDecl { .. } => fields.push(member),
                    NodeKind::ConstructorDecl { .. } => constructors.push(member),
                    NodeKind::MethodDecl {
                        name: method_name,
                        body,
                        virtuality,
                        ..
                    } => {
                        if body.is_none() && *virtuality != Virtuality::Abstract {
                            return Err(LocatedError::new(
                                format!(
                                    "method {} was declared but its body was not defined",
                                    method_name
                                ),
                                self.ast.location(member),
                            ));
                        }
                        methods.push(member);
                    }
                    _ => return self.fail("expected a field, method, or constructor"),
                }
            }
        }
        self.pop_symbol(Symbol::Semicolon)?;
        self.class_name = None;
        Ok(self.ast.add(
            NodeKind::ClassDecl {
                name,
                base,
                interfaces,
                fields,
                methods,
                constructors,
                is_definition,
            },
            location,
        ))
    }

    // Expressions.

    /* EXPR_OR_VAR_DECL := ( EXPR | VAR_DECL ) { ',' ( EXPR | VAR_DECL ) }
       We can either be smart and play with FIRST and FOLLOW sets, or we
       can be lazy and just try TYPE first and rewind if it fails. */
    fn parse_expr_or_var_decl(&mut self) -> Result<NodeId> {
        let checkpoint = self.checkpoint();
        let is_declaration = self.parse_type(false).is_ok();
        self.revert_to(&checkpoint);
        if is_declaration {
            self.parse_var_decls()
        } else {
            self.parse_exprs()
        }
    }

    /* VAR_DECL := [ ACCESS_MOD ] TYPE identifier [ '[' E9 ']' ] [ '=' EXPR ]
       The access modifier is parsed only for class fields. */
    fn parse_var_decl(&mut self, is_field: bool) -> Result<NodeId> {
        let location = self.location();
        let access = if is_field {
            self.parse_access_mod()?
        } else {
            Access::Public
        };
        let mut var_type = self.parse_type(false)?;
        let name = self.parse_identifier()?;
        if self.cond_pop_symbol(Symbol::SquareOpen) {
            let size = self.parse_binary(0)?;
            self.pop_symbol(Symbol::SquareClose)?;
            var_type = self.ast.add(
                NodeKind::ArrayType {
                    base: var_type,
                    size,
                },
                location,
            );
        }
        let value = if self.cond_pop_symbol(Symbol::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(self.ast.add(
            NodeKind::VarDecl {
                var_type,
                name,
                value,
                access,
            },
            location,
        ))
    }

    /* VAR_DECLS := VAR_DECL { ',' VAR_DECL } */
    fn parse_var_decls(&mut self) -> Result<NodeId> {
        let location = self.location();
        let mut items = vec![self.parse_var_decl(false)?];
        while self.cond_pop_symbol(Symbol::Comma) {
            items.push(self.parse_var_decl(false)?);
        }
        Ok(self.ast.add(NodeKind::Sequence { items }, location))
    }

    /* EXPR := E9 [ '=' EXPR ]
       Note that assignment is right associative. */
    fn parse_expr(&mut self) -> Result<NodeId> {
        let result = self.parse_binary(0)?;
        if self.next_is_symbol(Symbol::Assign) {
            let location = self.pop_symbol(Symbol::Assign)?.location;
            let value = self.parse_expr()?;
            return Ok(self.ast.add(
                NodeKind::Assignment {
                    lvalue: result,
                    value,
                },
                location,
            ));
        }
        Ok(result)
    }

    /* EXPRS := EXPR { ',' EXPR } */
    fn parse_exprs(&mut self) -> Result<NodeId> {
        let location = self.location();
        let mut items = vec![self.parse_expr()?];
        while self.cond_pop_symbol(Symbol::Comma) {
            items.push(self.parse_expr()?);
        }
        Ok(self.ast.add(NodeKind::Sequence { items }, location))
    }

    /* E9 := E8 { '||' E8 }          E8 := E7 { '&&' E7 }
       E7 := E6 { ('|' | '^') E6 }   E6 := E5 { '&' E5 }
       E5 := E4 { ('==' | '!=') E4 } E4 := E3 { ('<' | '<=' | '>' | '>=') E3 }
       E3 := E2 { ('<<' | '>>') E2 } E2 := E1 { ('+' | '-') E1 }
       E1 := E_UNARY_PRE { ('*' | '/' | '%') E_UNARY_PRE }
       All levels are left associative, so they share one implementation
       indexed into the precedence table. */
    fn parse_binary(&mut self, level: usize) -> Result<NodeId> {
        let ops = match BINARY_PRECEDENCE.get(level) {
            Some(&ops) => ops,
            None => return self.parse_unary_pre(),
        };
        let mut result = self.parse_binary(level + 1)?;
        loop {
            let op = match &self.top().token {
                Token::Symbol(symbol) if ops.contains(symbol) => *symbol,
                _ => break,
            };
            let location = self.location();
            self.tokens.discard();
            let right = self.parse_binary(level + 1)?;
            result = self.ast.add(
                NodeKind::Binary {
                    op,
                    left: result,
                    right,
                },
                location,
            );
        }
        Ok(result)
    }

    /* E_UNARY_PRE := { '+' | '-' | '!' | '~' | '++' | '--' | '*' | '&' }
                      E_CALL_INDEX_MEMBER_POST */
    fn parse_unary_pre(&mut self) -> Result<NodeId> {
        let op = match &self.top().token {
            Token::Symbol(
                symbol @ (Symbol::Add
                | Symbol::Sub
                | Symbol::Not
                | Symbol::BitNot
                | Symbol::Inc
                | Symbol::Dec
                | Symbol::Mul
                | Symbol::BitAnd),
            ) => *symbol,
            _ => return self.parse_call_index_member_post(),
        };
        let location = self.location();
        self.tokens.discard();
        let operand = self.parse_unary_pre()?;
        let kind = match op {
            Symbol::Mul => NodeKind::Deref { target: operand },
            Symbol::BitAnd => NodeKind::AddressOf { target: operand },
            _ => NodeKind::UnaryPre { op, operand },
        };
        Ok(self.ast.add(kind, location))
    }

    /* E_CALL := '(' [ EXPR { ',' EXPR } ] ')' */
    fn parse_call(&mut self, callee: NodeId) -> Result<NodeId> {
        let location = self.pop_symbol(Symbol::ParOpen)?.location;
        let mut args = vec![];
        if !self.next_is_symbol(Symbol::ParClose) {
            loop {
                args.push(self.parse_expr()?);
                if !self.cond_pop_symbol(Symbol::Comma) {
                    break;
                }
            }
        }
        self.pop_symbol(Symbol::ParClose)?;
        Ok(self.ast.add(NodeKind::Call { callee, args }, location))
    }

    /* E_CALL_INDEX_MEMBER_POST := F { E_CALL | E_INDEX | E_MEMBER | E_POST }
       E_INDEX := '[' EXPR ']'
       E_MEMBER := ('.' | '->') identifier { E_CALL }
       E_POST := '++' | '--'
       A leading known type name followed by '(' is a constructor call,
       which is decided speculatively: parse the type, peek for '(', and
       rewind either way. */
    fn parse_call_index_member_post(&mut self) -> Result<NodeId> {
        let checkpoint = self.checkpoint();
        let mut is_constructor_call = matches!(
            &self.top().token,
            Token::Identifier(name) if self.is_type_name(name)
        );
        if is_constructor_call {
            self.parse_type(false)?;
            is_constructor_call = self.cond_pop_symbol(Symbol::ParOpen);
            self.revert_to(&checkpoint);
        }
        let mut result = if is_constructor_call {
            self.parse_type(false)?
        } else {
            self.parse_factor()?
        };
        loop {
            if self.next_is_symbol(Symbol::ParOpen) {
                result = self.parse_call(result)?;
            } else if self.next_is_symbol(Symbol::SquareOpen) {
                let location = self.pop_symbol(Symbol::SquareOpen)?.location;
                let index = self.parse_expr()?;
                self.pop_symbol(Symbol::SquareClose)?;
                result = self.ast.add(
                    NodeKind::Index {
                        base: result,
                        index,
                    },
                    location,
                );
            } else if self.next_is_symbol(Symbol::Dot) || self.next_is_symbol(Symbol::Arrow) {
                let op = if self.next_is_symbol(Symbol::Dot) {
                    MemberOp::Dot
                } else {
                    MemberOp::Arrow
                };
                let location = self.location();
                self.tokens.discard();
                let mut member = self.parse_identifier()?;
                if self.next_is_symbol(Symbol::ParOpen) {
                    // A method call: the call becomes the member.
                    member = self.parse_call(member)?;
                }
                result = self.ast.add(
                    NodeKind::Member {
                        op,
                        base: result,
                        member,
                    },
                    location,
                );
            } else if self.next_is_symbol(Symbol::Inc) || self.next_is_symbol(Symbol::Dec) {
                let op = match &self.top().token {
                    Token::Symbol(symbol) => *symbol,
                    _ => unreachable!(),
                };
                let location = self.location();
                self.tokens.discard();
                result = self.ast.add(
                    NodeKind::UnaryPost {
                        op,
                        operand: result,
                    },
                    location,
                );
            } else {
                break;
            }
        }
        Ok(result)
    }

    /* F := integer | double | char | string | identifier | '(' EXPR ')'
          | E_CAST
       E_CAST := cast '<' TYPE '>' '(' EXPR ')' */
    fn parse_factor(&mut self) -> Result<NodeId> {
        let location = self.location();
        match &self.top().token {
            Token::Literal(Literal::Int(value)) => {
                let value = *value;
                self.tokens.discard();
                Ok(self.ast.add(NodeKind::Int(value), location))
            }
            Token::Literal(Literal::Double(value)) => {
                let value = *value;
                self.tokens.discard();
                Ok(self.ast.add(NodeKind::Double(value), location))
            }
            Token::Literal(Literal::Char(value)) => {
                let value = *value;
                self.tokens.discard();
                Ok(self.ast.add(NodeKind::Char(value), location))
            }
            Token::Literal(Literal::Str(value)) => {
                let value = value.clone();
                self.tokens.discard();
                Ok(self.ast.add(NodeKind::Str(value), location))
            }
            Token::Keyword(Keyword::Cast) => {
                self.tokens.discard();
                self.pop_symbol(Symbol::Lt)?;
                let target_type = self.parse_type(false)?;
                self.pop_symbol(Symbol::Gt)?;
                self.pop_symbol(Symbol::ParOpen)?;
                let value = self.parse_expr()?;
                self.pop_symbol(Symbol::ParClose)?;
                Ok(self
                    .ast
                    .add(NodeKind::Cast { target_type, value }, location))
            }
            Token::Identifier(_) => self.parse_identifier(),
            Token::Symbol(Symbol::ParOpen) => {
                self.tokens.discard();
                let expression = self.parse_expr()?;
                self.pop_symbol(Symbol::ParClose)?;
                Ok(expression)
            }
            _ => self.expected("literal, (expr) or cast"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::lexing::lexer::Lexer;
    use crate::lexing::source::Source;

    use super::*;

    fn test_parser(source: &str) -> Parser {
        let tokens = Lexer::from(Source::from(source))
            .lex_all()
            .expect("test sources lex");
        Parser::from(Tokens::from(tokens))
    }

    fn parse(source: &str) -> Result<(Ast, NodeId)> {
        test_parser(source).parse()
    }

    fn parse_ok(source: &str) -> (Ast, NodeId) {
        parse(source).expect("expected source to parse")
    }

    #[test]
    fn empty_program() {
        let (ast, root) = parse_ok("");
        assert_eq!(
            ast.kind(root),
            &NodeKind::Program {
                declarations: vec![]
            }
        );
    }

    #[test]
    fn forward_declared_struct_names_become_types() {
        parse_ok("struct S; S* s;");
    }

    #[test]
    fn unknown_type_name_is_rejected() {
        let error = parse("S* s;").unwrap_err();
        assert!(error.message.contains("Expected type"), "{}", error.message);
    }

    #[test]
    fn declaration_versus_multiplication() {
        // With `S` a known type this is a declaration; with `a` unknown it
        // must parse as a multiplication expression statement.
        let (ast, root) = parse_ok("struct S {}; void f() { S* s; a * b; }");
        let NodeKind::Program { declarations } = ast.kind(root) else {
            panic!("root is a program");
        };
        let NodeKind::FunDecl { body: Some(body), .. } = ast.kind(declarations[1]) else {
            panic!("second declaration is a function");
        };
        let NodeKind::Block { body } = ast.kind(*body) else {
            panic!("function has a block body");
        };
        let NodeKind::Sequence { items } = ast.kind(body[0]) else {
            panic!("declaration statement is a sequence");
        };
        assert!(matches!(ast.kind(items[0]), NodeKind::VarDecl { .. }));
        let NodeKind::Sequence { items } = ast.kind(body[1]) else {
            panic!("expression statement is a sequence");
        };
        assert!(matches!(
            ast.kind(items[0]),
            NodeKind::Binary {
                op: Symbol::Mul,
                ..
            }
        ));
    }

    #[test]
    fn constructor_call_discrimination() {
        let (ast, _) = parse_ok("struct S {}; void f() { S s = S(); }");
        // The initializer must be a call whose callee is a type name, not
        // an identifier read.
        let callees: Vec<_> = ast
            .ids()
            .filter_map(|id| match ast.kind(id) {
                NodeKind::Call { callee, .. } => Some(*callee),
                _ => None,
            })
            .collect();
        assert_eq!(callees.len(), 1);
        assert!(matches!(ast.kind(callees[0]), NodeKind::NamedType(_)));
    }

    #[test]
    fn speculation_leaves_tentative_types_unchanged() {
        let mut parser = test_parser(
            "struct S {};\
             class C : S { public int f() { C c; return 0; } };\
             typedef void (*callback)(int);\
             int main() { c * d; return 0; }",
        );
        let root = parser.parse_program().expect("program parses");
        assert!(matches!(
            parser.ast.kind(root),
            NodeKind::Program { .. }
        ));
        let mut names: Vec<String> = parser
            .tentative_type_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["C", "S", "callback"]);
    }

    #[test]
    fn duplicate_function_argument_is_rejected() {
        let error = parse("void f(int a, char a) {}").unwrap_err();
        assert!(
            error.message.contains("already defined"),
            "{}",
            error.message
        );
    }

    #[test]
    fn duplicate_case_labels_are_rejected() {
        let error = parse("void f() { switch (1) { case 1: case 1: } }").unwrap_err();
        assert!(error.message.contains("case 1"), "{}", error.message);

        let error =
            parse("void f() { switch (1) { default: default: } }").unwrap_err();
        assert!(error.message.contains("default"), "{}", error.message);
    }

    #[test]
    fn abstract_method_with_body_is_rejected() {
        let error = parse("class C { public int f() abstract { return 1; } };").unwrap_err();
        assert!(
            error.message.contains("cannot have a body"),
            "{}",
            error.message
        );
    }

    #[test]
    fn undefined_method_is_rejected() {
        let error = parse("class C { public int f(); };").unwrap_err();
        assert!(
            error.message.contains("body was not defined"),
            "{}",
            error.message
        );
    }

    #[test]
    fn class_with_base_interfaces_and_constructor() {
        parse_ok(
            "interface I { void f(int x); };\
             class B { public int x; };\
             class C : B, I {\
                 public C(int y) : B(y) { }\
                 public void f(int x) virtual { }\
                 public int g() override { return 1; }\
             };",
        );
    }

    #[test]
    fn interface_method_with_body_is_rejected() {
        let error = parse("interface I { void f() { } };").unwrap_err();
        assert!(
            error.message.contains("must not have a body"),
            "{}",
            error.message
        );
    }

    #[test]
    fn expression_ladder_shapes() {
        let (ast, _) = parse_ok("int x = 1 + 2 * 3;");
        let add = ast
            .ids()
            .map(|id| ast.kind(id))
            .find(|kind| matches!(kind, NodeKind::Binary { op: Symbol::Add, .. }));
        let NodeKind::Binary { right, .. } = add.expect("addition parsed") else {
            unreachable!();
        };
        assert!(matches!(
            ast.kind(*right),
            NodeKind::Binary {
                op: Symbol::Mul,
                ..
            }
        ));
    }

    #[test]
    fn postfix_chains() {
        parse_ok(
            "struct S { int n; };\
             void f(S* s) { s->n++; (*s).n = s->n[0]; }",
        );
    }
}
