//! The front end turns source text into the annotated tree consumed by the
//! back end: a [`ast::Program`] plus the [`resolve::ResolutionResult`] side
//! tables describing what every name refers to and which expressions denote
//! assignable locations.

use std::path::PathBuf;

use self::{ast::Program, error::CompileError, lexer::Span, parser::Parser, resolve::Resolver};

pub mod ast;
pub mod error;
pub mod intern;
pub mod lexer;
pub mod parser;
pub mod resolve;

/// Declarations of the functions the abstract machine implements natively.
/// They have no bodies and therefore never produce code.
pub const PRELUDE: &str = include_str!("prelude.pins");

#[derive(Debug)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
}

impl SourceFile {
    pub fn new(contents: impl Into<String>, origin: SourceFileOrigin) -> Self {
        Self {
            contents: contents.into(),
            origin,
        }
    }

    /// Appends the prelude after the user's text so that positions reported
    /// for the user's code are unaffected
    pub fn with_prelude(mut self) -> Self {
        if !self.contents.ends_with('\n') {
            self.contents.push('\n');
        }

        self.contents.push_str(PRELUDE);
        self
    }

    pub fn value_of_span(&self, span: Span) -> &str {
        &self.contents[span.start..span.end]
    }

    /// 1-based line number of a byte position
    pub fn row_for_position(&self, position: usize) -> usize {
        let position = position.min(self.contents.len());

        self.contents[..position].matches('\n').count() + 1
    }

    /// 1-based column number of a byte position
    pub fn column_for_position(&self, position: usize) -> usize {
        let position = position.min(self.contents.len());
        let line_start = self.contents[..position]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);

        position - line_start + 1
    }

    /// Renders the line containing the start of `span` with carets under the
    /// offending characters (clipped to the end of that line)
    pub fn highlight_span(&self, span: Span) -> String {
        let start = span.start.min(self.contents.len());
        let line_start = self.contents[..start]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let line_end = self.contents[start..]
            .find('\n')
            .map(|i| start + i)
            .unwrap_or(self.contents.len());

        let line = &self.contents[line_start..line_end];
        let width = span.end.clamp(start + 1, line_end.max(start + 1)) - start;

        format!(
            "{line}\n{}{}",
            " ".repeat(start - line_start),
            "^".repeat(width)
        )
    }
}

#[derive(Debug)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

/// The immutable input of the back end: the tree plus its name resolution and
/// addressability annotations
#[derive(Debug)]
pub struct AnnotatedTree {
    pub program: Program,
    pub resolution: resolve::ResolutionResult,
}

/// Parses and resolves a source file
pub fn analyze(source_file: &SourceFile) -> Result<AnnotatedTree, CompileError> {
    let program = Parser::parse_program(source_file)?;
    let resolution = Resolver::resolve(&program)?;

    Ok(AnnotatedTree {
        program,
        resolution,
    })
}
