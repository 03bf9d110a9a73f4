//! A compiler for PINS'24 targeting an abstract stack machine, and the
//! machine itself.
//!
//! ```text
//! source ─ frontend::analyze ─▶ AnnotatedTree ─ backend::compile ─▶ Segments ─ machine ─▶ exit code
//! ```

pub mod backend;
pub mod frontend;
mod index;
pub mod machine;
pub mod report;
