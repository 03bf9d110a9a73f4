use super::intern::InternedSymbol;
use crate::{frontend::lexer::Span, index::simple_index, report::internal_error};

simple_index! {
    /// Identity of a tree node, assigned in construction order by the parser
    pub struct NodeId;
}

#[derive(Debug)]
pub struct Program {
    /// Top level definitions in declaration order (nested definitions are in
    /// the tree and not in this list)
    pub definitions: Vec<Definition>,
}

#[derive(Debug)]
pub enum Definition {
    Function(Box<FunctionDefinition>),
    Variable(Box<VariableDefinition>),
}

impl Definition {
    pub fn id(&self) -> NodeId {
        match self {
            Self::Function(function) => function.id,
            Self::Variable(variable) => variable.id,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::Function(function) => function.span,
            Self::Variable(variable) => variable.span,
        }
    }

    pub fn name(&self) -> &Identifier {
        match self {
            Self::Function(function) => &function.name,
            Self::Variable(variable) => &variable.name,
        }
    }
}

#[derive(Debug)]
pub struct FunctionDefinition {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
    pub parameters: Vec<Parameter>,
    /// Empty for functions declared without a body (the system functions)
    pub body: Vec<Statement>,
}

impl FunctionDefinition {
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }
}

#[derive(Debug)]
pub struct Parameter {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
}

#[derive(Debug)]
pub struct VariableDefinition {
    pub id: NodeId,
    pub span: Span,
    pub name: Identifier,
    pub initializers: Vec<Initializer>,
}

/// `count * value`, where a missing count means one
#[derive(Debug)]
pub struct Initializer {
    pub id: NodeId,
    pub span: Span,
    pub count: Option<Literal>,
    pub value: Literal,
}

#[derive(Debug)]
pub struct Identifier {
    pub id: NodeId,
    pub span: Span,
    pub symbol: InternedSymbol,
}

#[derive(Debug)]
pub struct Statement {
    pub id: NodeId,
    pub span: Span,
    pub kind: StatementKind,
}

#[derive(Debug)]
pub enum StatementKind {
    Expression(Box<Expression>),
    Assignment {
        target: Box<Expression>,
        source: Box<Expression>,
    },
    If {
        condition: Box<Expression>,
        positive: Vec<Statement>,
        /// Empty when there is no else branch
        negative: Vec<Statement>,
    },
    While {
        condition: Box<Expression>,
        body: Vec<Statement>,
    },
    Let {
        definitions: Vec<Definition>,
        body: Vec<Statement>,
    },
}

#[derive(Debug)]
pub struct Expression {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExpressionKind,
}

#[derive(Debug)]
pub enum ExpressionKind {
    Literal(Box<Literal>),
    Name(Box<Identifier>),
    FunctionCall {
        function: Box<Identifier>,
        arguments: Vec<Expression>,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Expression>,
    },
    Binary {
        lhs: Box<Expression>,
        operator: BinaryOperator,
        rhs: Box<Expression>,
    },
}

#[derive(Debug)]
pub struct BinaryOperator {
    pub id: NodeId,
    pub span: Span,
    pub kind: BinaryOperatorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperatorKind {
    Add,                  // +
    Subtract,             // -
    Multiply,             // *
    Divide,               // /
    Modulus,              // %
    Equals,               // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=
    LogicalAnd,           // &&
    LogicalOr,            // ||
}

impl core::fmt::Display for BinaryOperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulus => "%",
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqualTo => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqualTo => ">=",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
        })
    }
}

#[derive(Debug)]
pub struct UnaryOperator {
    pub id: NodeId,
    pub span: Span,
    pub kind: UnaryOperatorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperatorKind {
    LogicalNot, // !
    Identity,   // +
    Negate,     // -
    AddressOf,  // ^e
    Deref,      // e^
}

impl core::fmt::Display for UnaryOperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LogicalNot => write!(f, "!"),
            Self::Identity => write!(f, "+"),
            Self::Negate => write!(f, "-"),
            Self::AddressOf | Self::Deref => write!(f, "^"),
        }
    }
}

#[derive(Debug)]
pub struct Literal {
    pub id: NodeId,
    pub span: Span,
    pub kind: LiteralKind,
    /// Decoded value: the digits of an integer or the unescaped characters of
    /// a char or string constant
    pub symbol: InternedSymbol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Integer, // 1
    Char,    // 'A'
    String,  // "hello, world"
}

impl Literal {
    /// The words this constant stands for. Integers were range checked by the
    /// parser.
    pub fn words(&self) -> Vec<i32> {
        match self.kind {
            LiteralKind::Integer => vec![self.symbol.value().parse().unwrap_or_else(|_| {
                internal_error!("integer constant '{}' escaped range checking", self.symbol)
            })],
            LiteralKind::Char | LiteralKind::String => {
                self.symbol.value().chars().map(|c| c as i32).collect()
            }
        }
    }
}
