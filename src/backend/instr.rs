//! Instructions of the abstract stack machine. Code and data instructions are
//! separate types since they live in separate segments.

use itertools::Itertools;
use strum::{Display, EnumString};

use super::layout::{Frame, Inits, WORD_SIZE};
use crate::frontend::{intern::InternedSymbol, lexer::Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeInstruction {
    pub span: Span,
    pub kind: CodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeKind {
    /// Marks the address of the next instruction
    Label(InternedSymbol),
    /// Pushes a constant
    Push(i32),
    /// Pops `n`, then moves the stack top by `n` bytes. Negative values
    /// reserve space.
    PopN,
    /// Pushes the value of a register
    Regn(Register),
    Oper(Oper),
    /// Replaces the address on top with the word stored there
    Load,
    /// Pops an address, then a value, and stores the value at the address
    Save,
    /// Pushes the address of a label
    Name(InternedSymbol),
    Call(Frame),
    Retn(Frame),
    Ujmp,
    Cjmp,
    /// Pops a data label and a destination address and expands the
    /// initializer stored at the label into the destination
    Init,
}

impl CodeKind {
    /// Number of bytes the instruction occupies in the code segment
    pub fn size(&self) -> i32 {
        match self {
            Self::Label(_) => 0,
            Self::Push(_) | Self::Name(_) => 1 + WORD_SIZE,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum Register {
    #[strum(serialize = "FP")]
    FramePointer,
}

/// Operators popping `y` (the top) and then `x` for binary forms and pushing
/// `x op y`. The reversed forms push `y op x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Oper {
    Add,
    Mul,
    RSub,
    RDiv,
    RMod,
    Equ,
    Neq,
    Lth,
    Gth,
    Leq,
    Geq,
    And,
    Or,
    Not,
    Neg,
}

impl Oper {
    pub fn is_unary(self) -> bool {
        matches!(self, Self::Not | Self::Neg)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataInstruction {
    pub span: Span,
    pub kind: DataKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataKind {
    Label(InternedSymbol),
    /// One literal word
    Data(i32),
    /// Reserves `size` bytes, filled from `inits` when the program is loaded
    Size { size: i32, inits: Option<Inits> },
}

impl DataKind {
    pub fn size(&self) -> i32 {
        match self {
            Self::Label(_) => 0,
            Self::Data(_) => WORD_SIZE,
            Self::Size { size, .. } => *size,
        }
    }
}

impl core::fmt::Display for CodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Label(label) => write!(f, "{label}:"),
            Self::Push(value) => write!(f, "PUSH {value}"),
            Self::PopN => write!(f, "POPN"),
            Self::Regn(register) => write!(f, "REGN {register}"),
            Self::Oper(oper) => write!(f, "OPER {oper}"),
            Self::Load => write!(f, "LOAD"),
            Self::Save => write!(f, "SAVE"),
            Self::Name(label) => write!(f, "NAME {label}"),
            Self::Call(frame) => write!(f, "CALL {}", frame.label),
            Self::Retn(frame) => write!(f, "RETN {}", frame.label),
            Self::Ujmp => write!(f, "UJMP"),
            Self::Cjmp => write!(f, "CJMP"),
            Self::Init => write!(f, "INIT"),
        }
    }
}

impl core::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Label(label) => write!(f, "{label}:"),
            Self::Data(value) => write!(f, "DATA {value}"),
            Self::Size { size, inits: None } => write!(f, "SIZE {size}"),
            Self::Size {
                size,
                inits: Some(inits),
            } => write!(f, "SIZE {size} [{}]", inits.0.iter().join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CodeKind::Label(InternedSymbol::new("main")), 0)]
    #[case(CodeKind::Push(-8), 5)]
    #[case(CodeKind::Name(InternedSymbol::new(":0")), 5)]
    #[case(CodeKind::PopN, 1)]
    #[case(CodeKind::Oper(Oper::RSub), 1)]
    #[case(CodeKind::Init, 1)]
    fn code_sizes(#[case] kind: CodeKind, #[case] size: i32) {
        assert_eq!(kind.size(), size);
    }

    #[test]
    fn data_sizes() {
        assert_eq!(DataKind::Data(1).size(), 4);
        assert_eq!(
            DataKind::Size {
                size: 12,
                inits: None
            }
            .size(),
            12
        );
    }

    #[test]
    fn operator_mnemonics() {
        assert_eq!(CodeKind::Oper(Oper::RSub).to_string(), "OPER RSUB");
        assert_eq!(CodeKind::Regn(Register::FramePointer).to_string(), "REGN FP");
        assert_eq!("GEQ".parse::<Oper>().unwrap(), Oper::Geq);
    }
}
