use super::{SourceFile, lexer::Span};

/// A user-facing error detected while reading the source program. Errors of
/// this kind always point at the offending piece of source text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CompileError {
    pub span: Span,
    pub message: String,
}

impl CompileError {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }

    /// Formats the error the way the command line reports it:
    /// `message (file:line:column)` followed by the highlighted source line
    pub fn render(&self, source_file: &SourceFile) -> String {
        format!(
            "{} ({}:{}:{})\n{}",
            self.message,
            source_file.origin,
            source_file.row_for_position(self.span.start),
            source_file.column_for_position(self.span.start),
            source_file.highlight_span(self.span)
        )
    }
}
