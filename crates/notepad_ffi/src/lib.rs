//! Flutter bridge crate for the notepad core.
//!
//! Bridge codegen reads `api` and generates the Dart bindings from it.

pub mod api;
