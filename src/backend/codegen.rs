//! Instruction selection: lowers function bodies to flat code instruction
//! lists and variable initializers to data instruction lists.

use std::collections::BTreeMap;

use super::{
    instr::{CodeInstruction, CodeKind, DataInstruction, DataKind, Oper, Register},
    layout::{Access, Frame, HEADER_SIZE, Layout, STATIC_LINK_SIZE, WORD_SIZE},
};
use crate::{
    frontend::{
        AnnotatedTree,
        ast::{
            BinaryOperatorKind, Definition, Expression, ExpressionKind, FunctionDefinition,
            LiteralKind, NodeId, Statement, StatementKind, UnaryOperatorKind, VariableDefinition,
        },
        intern::InternedSymbol,
        lexer::Span,
    },
    report::internal_error,
};

/// Source of the numbers making synthesized labels unique. One generator is
/// used for a whole compilation.
#[derive(Debug, Default)]
pub struct LabelGenerator {
    next: u32,
}

impl LabelGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_number(&mut self) -> u32 {
        let number = self.next;
        self.next += 1;
        number
    }

    /// Label of an anonymous data block
    pub fn data_label(&mut self) -> InternedSymbol {
        InternedSymbol::new(&format!(":{}", self.next_number()))
    }

    pub fn if_labels(&mut self) -> IfLabels {
        let number = self.next_number();

        IfLabels {
            condition: InternedSymbol::new(&format!("if-cond:{number}")),
            positive: InternedSymbol::new(&format!("then:{number}")),
            negative: InternedSymbol::new(&format!("else:{number}")),
            end: InternedSymbol::new(&format!("end:{number}")),
        }
    }

    pub fn while_labels(&mut self) -> WhileLabels {
        let number = self.next_number();

        WhileLabels {
            condition: InternedSymbol::new(&format!("while-cond:{number}")),
            body: InternedSymbol::new(&format!("do:{number}")),
            end: InternedSymbol::new(&format!("end:{number}")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IfLabels {
    pub condition: InternedSymbol,
    pub positive: InternedSymbol,
    pub negative: InternedSymbol,
    pub end: InternedSymbol,
}

#[derive(Debug, Clone, Copy)]
pub struct WhileLabels {
    pub condition: InternedSymbol,
    pub body: InternedSymbol,
    pub end: InternedSymbol,
}

/// Everything the generator produced, keyed by the defining node
#[derive(Debug, Default, PartialEq, Eq)]
pub struct GeneratedCode {
    /// Code of every function with a body
    pub functions: BTreeMap<NodeId, Vec<CodeInstruction>>,
    /// Storage or initializer block of every variable
    pub variables: BTreeMap<NodeId, Vec<DataInstruction>>,
    /// Blocks holding string constants used in expressions, in the order they
    /// were generated
    pub strings: Vec<Vec<DataInstruction>>,
}

pub struct CodeGenerator<'tree> {
    tree: &'tree AnnotatedTree,
    layout: &'tree Layout,
    labels: &'tree mut LabelGenerator,
    output: GeneratedCode,
}

impl<'tree> CodeGenerator<'tree> {
    pub fn generate(
        tree: &'tree AnnotatedTree,
        layout: &'tree Layout,
        labels: &'tree mut LabelGenerator,
    ) -> GeneratedCode {
        let mut generator = Self {
            tree,
            layout,
            labels,
            output: GeneratedCode::default(),
        };

        for definition in &tree.program.definitions {
            match definition {
                Definition::Function(function) => generator.generate_function(function),
                Definition::Variable(variable) => generator.generate_global_variable(variable),
            }
        }

        generator.output
    }

    fn frame(&self, id: NodeId) -> &'tree Frame {
        let layout = self.layout;
        layout.frame(id)
    }

    fn access(&self, id: NodeId) -> &'tree Access {
        let layout = self.layout;
        layout.access(id)
    }

    fn definition_of(&self, expression: &Expression) -> NodeId {
        self.tree
            .resolution
            .definition_of(expression.id)
            .unwrap_or_else(|| internal_error!("unresolved name at node {:?}", expression.id))
    }

    fn generate_function(&mut self, function: &FunctionDefinition) {
        if !function.has_body() {
            return;
        }

        let frame = self.frame(function.id);
        let mut code = Vec::new();
        let span = function.span;

        emit(&mut code, span, CodeKind::Label(frame.label));
        // The header was pushed by CALL, only locals are reserved here
        emit(&mut code, span, CodeKind::Push(-(frame.vars_size - HEADER_SIZE)));
        emit(&mut code, span, CodeKind::PopN);

        self.generate_statements(frame, &function.body, true, &mut code);

        emit(&mut code, span, CodeKind::Push(frame.pars_size - STATIC_LINK_SIZE));
        emit(&mut code, span, CodeKind::Retn(frame.clone()));

        self.output.functions.insert(function.id, code);
    }

    fn generate_global_variable(&mut self, variable: &VariableDefinition) {
        let Access::Absolute { name, size, inits } = self.access(variable.id) else {
            internal_error!("global variable '{}' has a relative access", variable.name.symbol);
        };

        self.output.variables.insert(
            variable.id,
            vec![
                DataInstruction {
                    span: variable.span,
                    kind: DataKind::Label(*name),
                },
                DataInstruction {
                    span: variable.span,
                    kind: DataKind::Size {
                        size: *size,
                        inits: inits.clone(),
                    },
                },
            ],
        );
    }

    /// Emits the data block of a local variable and the code copying it into
    /// the frame
    fn generate_local_variable(
        &mut self,
        variable: &VariableDefinition,
        code: &mut Vec<CodeInstruction>,
    ) {
        let Access::Relative {
            offset,
            inits: Some(inits),
            ..
        } = self.access(variable.id)
        else {
            internal_error!("local variable '{}' has no frame slot", variable.name.symbol);
        };

        let label = self.labels.data_label();
        let span = variable.span;

        let mut data = vec![DataInstruction {
            span,
            kind: DataKind::Label(label),
        }];
        data.extend(inits.0.iter().map(|word| DataInstruction {
            span,
            kind: DataKind::Data(*word),
        }));
        self.output.variables.insert(variable.id, data);

        emit(code, span, CodeKind::Regn(Register::FramePointer));
        emit(code, span, CodeKind::Push(*offset));
        emit(code, span, CodeKind::Oper(Oper::Add));
        emit(code, span, CodeKind::Name(label));
        emit(code, span, CodeKind::Init);
    }

    /// With `keep_value` the last statement leaves exactly one word on the
    /// stack (its value, or 0 if it has none). Otherwise nothing is left.
    fn generate_statements(
        &mut self,
        frame: &Frame,
        statements: &[Statement],
        keep_value: bool,
        code: &mut Vec<CodeInstruction>,
    ) {
        let count = statements.len();

        for (index, statement) in statements.iter().enumerate() {
            let is_last = index + 1 == count;
            self.generate_statement(frame, statement, keep_value && is_last, code);
        }

        if keep_value && statements.is_empty() {
            emit(code, Span::default(), CodeKind::Push(0));
        }
    }

    fn generate_statement(
        &mut self,
        frame: &Frame,
        statement: &Statement,
        keep_value: bool,
        code: &mut Vec<CodeInstruction>,
    ) {
        let span = statement.span;

        match &statement.kind {
            StatementKind::Expression(expression) => {
                self.generate_expression(frame, expression, code);

                if !keep_value {
                    emit(code, span, CodeKind::Push(WORD_SIZE));
                    emit(code, span, CodeKind::PopN);
                }

                return;
            }
            StatementKind::Assignment { target, source } => {
                self.generate_expression(frame, source, code);
                self.generate_address(frame, target, code);
                emit(code, span, CodeKind::Save);
            }
            StatementKind::If {
                condition,
                positive,
                negative,
            } => {
                let labels = self.labels.if_labels();

                emit(code, span, CodeKind::Name(labels.condition));
                emit(code, span, CodeKind::Ujmp);

                emit(code, span, CodeKind::Label(labels.positive));
                self.generate_statements(frame, positive, false, code);
                emit(code, span, CodeKind::Name(labels.end));
                emit(code, span, CodeKind::Ujmp);

                emit(code, span, CodeKind::Label(labels.negative));
                self.generate_statements(frame, negative, false, code);
                emit(code, span, CodeKind::Name(labels.end));
                emit(code, span, CodeKind::Ujmp);

                emit(code, span, CodeKind::Label(labels.condition));
                self.generate_expression(frame, condition, code);
                emit(code, span, CodeKind::Name(labels.positive));
                emit(code, span, CodeKind::Name(labels.negative));
                emit(code, span, CodeKind::Cjmp);

                emit(code, span, CodeKind::Label(labels.end));
            }
            StatementKind::While { condition, body } => {
                let labels = self.labels.while_labels();

                emit(code, span, CodeKind::Label(labels.condition));
                self.generate_expression(frame, condition, code);
                emit(code, span, CodeKind::Name(labels.body));
                emit(code, span, CodeKind::Name(labels.end));
                emit(code, span, CodeKind::Cjmp);

                emit(code, span, CodeKind::Label(labels.body));
                self.generate_statements(frame, body, false, code);
                emit(code, span, CodeKind::Name(labels.condition));
                emit(code, span, CodeKind::Ujmp);

                emit(code, span, CodeKind::Label(labels.end));
            }
            StatementKind::Let { definitions, body } => {
                for definition in definitions {
                    match definition {
                        Definition::Function(function) => self.generate_function(function),
                        Definition::Variable(variable) => {
                            self.generate_local_variable(variable, code)
                        }
                    }
                }

                // The body decides what is left on the stack
                self.generate_statements(frame, body, keep_value, code);
                return;
            }
        }

        if keep_value {
            emit(code, span, CodeKind::Push(0));
        }
    }

    /// Leaves the value of the expression on the stack
    fn generate_expression(
        &mut self,
        frame: &Frame,
        expression: &Expression,
        code: &mut Vec<CodeInstruction>,
    ) {
        let span = expression.span;

        match &expression.kind {
            ExpressionKind::Literal(literal) => match literal.kind {
                LiteralKind::Integer | LiteralKind::Char => {
                    for word in literal.words() {
                        emit(code, span, CodeKind::Push(word));
                    }
                }
                LiteralKind::String => {
                    let label = self.labels.data_label();

                    let mut data = vec![DataInstruction {
                        span,
                        kind: DataKind::Label(label),
                    }];
                    data.extend(
                        literal
                            .words()
                            .into_iter()
                            .chain([0])
                            .map(|word| DataInstruction {
                                span,
                                kind: DataKind::Data(word),
                            }),
                    );
                    self.output.strings.push(data);

                    emit(code, span, CodeKind::Name(label));
                }
            },
            ExpressionKind::Name(_) => {
                self.generate_address(frame, expression, code);
                emit(code, span, CodeKind::Load);
            }
            ExpressionKind::FunctionCall { arguments, .. } => {
                let callee = self.frame(self.definition_of(expression));

                for argument in arguments.iter().rev() {
                    self.generate_expression(frame, argument, code);
                }

                // Static link: the frame of the function enclosing the callee
                let Some(hops) = (frame.depth + 1).checked_sub(callee.depth) else {
                    internal_error!(
                        "'{}' at depth {} cannot see '{}' at depth {}",
                        frame.name,
                        frame.depth,
                        callee.name,
                        callee.depth
                    );
                };
                emit(code, span, CodeKind::Regn(Register::FramePointer));
                for _ in 0..hops {
                    emit(code, span, CodeKind::Load);
                }

                emit(code, span, CodeKind::Name(callee.label));
                emit(code, span, CodeKind::Call(callee.clone()));
            }
            ExpressionKind::Unary { operator, operand } => match operator.kind {
                UnaryOperatorKind::LogicalNot => {
                    self.generate_expression(frame, operand, code);
                    emit(code, span, CodeKind::Oper(Oper::Not));
                }
                UnaryOperatorKind::Negate => {
                    self.generate_expression(frame, operand, code);
                    emit(code, span, CodeKind::Oper(Oper::Neg));
                }
                UnaryOperatorKind::Identity => self.generate_expression(frame, operand, code),
                UnaryOperatorKind::AddressOf => self.generate_address(frame, operand, code),
                UnaryOperatorKind::Deref => {
                    self.generate_expression(frame, operand, code);
                    emit(code, span, CodeKind::Load);
                }
            },
            ExpressionKind::Binary { lhs, operator, rhs } => {
                // Right to left, which flips the operands of OPER
                self.generate_expression(frame, rhs, code);
                self.generate_expression(frame, lhs, code);
                emit(code, operator.span, CodeKind::Oper(mirrored_operator(operator.kind)));
            }
        }
    }

    /// Leaves the address of an addressable expression on the stack
    fn generate_address(
        &mut self,
        frame: &Frame,
        expression: &Expression,
        code: &mut Vec<CodeInstruction>,
    ) {
        let span = expression.span;

        match &expression.kind {
            ExpressionKind::Name(_) => match self.access(self.definition_of(expression)) {
                Access::Absolute { name, .. } => emit(code, span, CodeKind::Name(*name)),
                Access::Relative { offset, depth, .. } => {
                    let Some(hops) = frame.depth.checked_sub(*depth) else {
                        internal_error!(
                            "variable at depth {depth} read from shallower '{}'",
                            frame.name
                        );
                    };

                    emit(code, span, CodeKind::Regn(Register::FramePointer));
                    for _ in 0..hops {
                        emit(code, span, CodeKind::Load);
                    }
                    emit(code, span, CodeKind::Push(*offset));
                    emit(code, span, CodeKind::Oper(Oper::Add));
                }
            },
            ExpressionKind::Unary { operator, operand }
                if operator.kind == UnaryOperatorKind::Deref =>
            {
                self.generate_expression(frame, operand, code)
            }
            _ => internal_error!("node {:?} has no address", expression.id),
        }
    }
}

fn emit(code: &mut Vec<CodeInstruction>, span: Span, kind: CodeKind) {
    code.push(CodeInstruction { span, kind });
}

/// The machine operator computing `lhs op rhs` when `rhs` was pushed first
pub fn mirrored_operator(kind: BinaryOperatorKind) -> Oper {
    match kind {
        BinaryOperatorKind::Add => Oper::Add,
        BinaryOperatorKind::Multiply => Oper::Mul,
        BinaryOperatorKind::Subtract => Oper::RSub,
        BinaryOperatorKind::Divide => Oper::RDiv,
        BinaryOperatorKind::Modulus => Oper::RMod,
        BinaryOperatorKind::Equals => Oper::Equ,
        BinaryOperatorKind::NotEquals => Oper::Neq,
        BinaryOperatorKind::LessThan => Oper::Gth,
        BinaryOperatorKind::LessThanOrEqualTo => Oper::Geq,
        BinaryOperatorKind::GreaterThan => Oper::Lth,
        BinaryOperatorKind::GreaterThanOrEqualTo => Oper::Leq,
        BinaryOperatorKind::LogicalAnd => Oper::And,
        BinaryOperatorKind::LogicalOr => Oper::Or,
    }
}
