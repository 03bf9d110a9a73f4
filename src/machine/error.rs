use thiserror::Error;

/// A fault of the running program
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    #[error("invalid memory access at address {0}")]
    InvalidAddress(i32),
    #[error("stack overflow (stack pointer {stack_pointer} below heap end {heap_end})")]
    StackOverflow { stack_pointer: i32, heap_end: i32 },
    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(i32),
    #[error("division by zero")]
    DivisionByZero,
    #[error("jump to address {0} which holds no instruction")]
    InvalidJump(i32),
    #[error("undefined label '{0}'")]
    UndefinedLabel(String),
    #[error("label '{0}' is defined more than once")]
    DuplicateLabel(String),
    #[error("stack pointer {actual} does not match the frame of '{function}' (expected {expected})")]
    FrameMismatch {
        function: String,
        expected: i32,
        actual: i32,
    },
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RuntimeErrorKind {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    /// Names of the active functions, outermost first
    pub call_stack: Vec<String>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self {
            kind,
            call_stack: Vec::new(),
        }
    }

    pub fn with_call_stack(mut self, call_stack: Vec<String>) -> Self {
        self.call_stack = call_stack;
        self
    }
}

impl From<RuntimeErrorKind> for RuntimeError {
    fn from(kind: RuntimeErrorKind) -> Self {
        Self::new(kind)
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error: {}", self.kind)?;

        if !self.call_stack.is_empty() {
            write!(f, "\n  call stack:")?;

            for (i, frame) in self.call_stack.iter().rev().enumerate() {
                write!(f, "\n    {}: {}", i, frame)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_innermost_frame_first() {
        let error = RuntimeError::new(RuntimeErrorKind::DivisionByZero)
            .with_call_stack(vec!["main".to_owned(), "main.helper".to_owned()]);

        assert_eq!(
            error.to_string(),
            "runtime error: division by zero\n  call stack:\n    0: main.helper\n    1: main"
        );
    }
}
