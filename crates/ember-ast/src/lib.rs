//! AST node shapes consumed from the (out-of-scope) lexer/parser/annotator
//!
//! This crate does not lex or parse source text. It defines the stable node
//! shapes the front end hands to the compiler, plus the symbol interner those
//! nodes are keyed against. Tests and the CLI tools build or deserialize
//! `Module` values directly rather than parsing source.

pub mod ast;
pub mod interner;
pub mod span;

pub use ast::*;
pub use interner::{Interner, Symbol};
pub use span::Span;
