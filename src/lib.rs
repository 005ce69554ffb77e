//! # declass
//!
//! A source-to-source translator that accepts a small object-oriented
//! extension of a C-like language — classes, single inheritance, virtual
//! methods, interfaces, constructors — and emits an equivalent program in
//! the plain, class-free subset of the same family. The output relies only
//! on structs, function pointers, and explicit `this` arguments; all
//! dynamic dispatch becomes explicit vtable indirection, so it compiles
//! under a plain C-like back-end with no runtime support.
//!
//! ## Modules
//!
//! The pipeline is strictly linear and leaves-first; each pass finishes
//! before the next begins, on a single thread:
//!
//! ```text
//! lexing -> parsing -> parenting -> analysis -> emitting
//! ```
//!
//! * [lexing] turns the source text into located tokens;
//! * [parsing] builds the AST arena, disambiguating types from
//!   expressions with a tentative-type-name set and speculative rewinds;
//! * [parsing::parenting] links each node to its parent for the
//!   contextual queries later passes need;
//! * [analysis] interns every type in one registry and assigns every node
//!   a type, enforcing the language's definition and dispatch rules;
//! * [emitting] lowers the typed AST into the translated program text.
//!
//! The shared, mutable state — the type registry and the name scopes — is
//! owned by the analyzer and read-only to the emitter. Every failure along
//! the way is a [common::error::LocatedError]; the first one aborts the
//! invocation.

pub mod analysis;
pub mod common;
pub mod emitting;
pub mod lexing;
pub mod parsing;
pub mod types;

use log::debug;

use common::error::LocatedError;
use lexing::lexer::Lexer;
use lexing::source::Source;
use lexing::Tokens;
use parsing::parenting::link_parents;
use parsing::Parser;
use types::Types;

/// Run the whole pipeline over one source text, producing the translated
/// program.
pub fn transpile(source: &str, colorful: bool) -> Result<String, LocatedError> {
    let tokens = Lexer::from(Source::from(source)).lex_all()?;
    debug!("lexed {} tokens", tokens.len());

    let (mut ast, root) = Parser::from(Tokens::from(tokens)).parse()?;
    debug!("parsed {} nodes", ast.len());

    link_parents(&mut ast, root);

    let mut types = Types::new();
    analysis::analyze(&mut ast, &mut types, root)?;

    emitting::emit(&ast, &types, root, colorful)
}
