use super::{
    ast::{Definition, NodeId},
    error::CompileError,
    intern::InternedSymbol,
    lexer::unescape_literal,
};
use crate::{
    frontend::{
        SourceFile,
        ast::{
            BinaryOperator, BinaryOperatorKind, Expression, ExpressionKind, FunctionDefinition,
            Identifier, Initializer, Literal, LiteralKind, Parameter, Program, Statement,
            StatementKind, UnaryOperator, UnaryOperatorKind, VariableDefinition,
        },
        lexer::{Keyword, Lexer, Span, Token, TokenKind},
    },
    index::Index,
};

type ParseResult<T> = Result<T, CompileError>;

#[derive(Debug)]
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    next_node_id: usize,
}

impl<'source> Parser<'source> {
    pub fn parse_program(source_file: &'source SourceFile) -> ParseResult<Program> {
        let mut parser = Self {
            lexer: Lexer::new(source_file),
            next_node_id: 0,
        };

        let mut program = Program {
            definitions: Vec::new(),
        };

        while parser.lexer.peek()?.kind != TokenKind::EndOfFile {
            program.definitions.push(parser.parse_definition()?);
        }

        Ok(program)
    }

    fn create_node_id(&mut self) -> NodeId {
        let id = NodeId::new(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    fn unexpected(&self, found: Token, expecting: &str) -> CompileError {
        CompileError::new(
            found.span,
            format!("Expected {expecting} but found {}.", found.kind),
        )
    }

    fn peek_is(&mut self, kind: TokenKind) -> ParseResult<bool> {
        Ok(self.lexer.peek()?.kind == kind)
    }

    fn expect_next_to_be(&mut self, kind: TokenKind) -> ParseResult<Token> {
        let token = self.lexer.next()?;

        if token.kind != kind {
            return Err(self.unexpected(token, &kind.to_string()));
        }

        Ok(token)
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> ParseResult<Token> {
        self.expect_next_to_be(TokenKind::Keyword(keyword))
    }

    /// definition -> function_definition | variable_definition
    fn parse_definition(&mut self) -> ParseResult<Definition> {
        let peeked = self.lexer.peek()?;

        match peeked.kind {
            TokenKind::Keyword(Keyword::Fun) => Ok(Definition::Function(Box::new(
                self.parse_function_definition()?,
            ))),
            TokenKind::Keyword(Keyword::Var) => Ok(Definition::Variable(Box::new(
                self.parse_variable_definition()?,
            ))),
            _ => Err(self.unexpected(peeked, "'fun' or 'var'")),
        }
    }

    /// "fun" IDENTIFIER "(" ( IDENTIFIER ( "," IDENTIFIER )* )? ")" ( "=" statements )?
    fn parse_function_definition(&mut self) -> ParseResult<FunctionDefinition> {
        let fun_keyword = self.expect_keyword(Keyword::Fun)?;
        let name = self.parse_identifier()?;

        self.expect_next_to_be(TokenKind::OpenParen)?;

        let mut parameters = Vec::new();

        if !self.peek_is(TokenKind::CloseParen)? {
            parameters.push(self.parse_parameter()?);

            while self.peek_is(TokenKind::Comma)? {
                self.expect_next_to_be(TokenKind::Comma)?;
                parameters.push(self.parse_parameter()?);
            }
        }

        let close_paren = self.expect_next_to_be(TokenKind::CloseParen)?;

        let body = if self.peek_is(TokenKind::Equals)? {
            self.expect_next_to_be(TokenKind::Equals)?;
            self.parse_statements()?
        } else {
            Vec::new()
        };

        let end = body
            .last()
            .map(|statement| statement.span.end)
            .unwrap_or(close_paren.span.end);

        Ok(FunctionDefinition {
            id: self.create_node_id(),
            span: Span::new(fun_keyword.span.start, end),
            name,
            parameters,
            body,
        })
    }

    fn parse_parameter(&mut self) -> ParseResult<Parameter> {
        let name = self.parse_identifier()?;

        Ok(Parameter {
            id: self.create_node_id(),
            span: name.span,
            name,
        })
    }

    /// "var" IDENTIFIER "=" initializer ( "," initializer )*
    fn parse_variable_definition(&mut self) -> ParseResult<VariableDefinition> {
        let var_keyword = self.expect_keyword(Keyword::Var)?;
        let name = self.parse_identifier()?;

        self.expect_next_to_be(TokenKind::Equals)?;

        let mut initializers = vec![self.parse_initializer()?];

        while self.peek_is(TokenKind::Comma)? {
            self.expect_next_to_be(TokenKind::Comma)?;
            initializers.push(self.parse_initializer()?);
        }

        let end = initializers
            .last()
            .map(|initializer| initializer.span.end)
            .unwrap_or(name.span.end);

        Ok(VariableDefinition {
            id: self.create_node_id(),
            span: Span::new(var_keyword.span.start, end),
            name,
            initializers,
        })
    }

    /// INTEGER ( "*" constant )? | CHAR | STRING
    fn parse_initializer(&mut self) -> ParseResult<Initializer> {
        let first = self.parse_literal()?;

        let (count, value) =
            if first.kind == LiteralKind::Integer && self.peek_is(TokenKind::Asterisk)? {
                self.expect_next_to_be(TokenKind::Asterisk)?;
                (Some(first), self.parse_literal()?)
            } else {
                (None, first)
            };

        let start = count.as_ref().unwrap_or(&value).span.start;

        Ok(Initializer {
            id: self.create_node_id(),
            span: Span::new(start, value.span.end),
            count,
            value,
        })
    }

    // main
    fn parse_identifier(&mut self) -> ParseResult<Identifier> {
        let token = self.expect_next_to_be(TokenKind::Identifier)?;

        Ok(Identifier {
            id: self.create_node_id(),
            span: token.span,
            symbol: InternedSymbol::new(self.lexer.source().value_of_span(token.span)),
        })
    }

    /// statement ( "," statement )*
    fn parse_statements(&mut self) -> ParseResult<Vec<Statement>> {
        let mut statements = vec![self.parse_statement()?];

        while self.peek_is(TokenKind::Comma)? {
            self.expect_next_to_be(TokenKind::Comma)?;
            statements.push(self.parse_statement()?);
        }

        Ok(statements)
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        match self.lexer.peek()?.kind {
            TokenKind::Keyword(Keyword::If) => return self.parse_if_statement(),
            TokenKind::Keyword(Keyword::While) => return self.parse_while_statement(),
            TokenKind::Keyword(Keyword::Let) => return self.parse_let_statement(),
            _ => {}
        }

        let expression = self.parse_expression()?;

        if !self.peek_is(TokenKind::Equals)? {
            return Ok(Statement {
                id: self.create_node_id(),
                span: expression.span,
                kind: StatementKind::Expression(Box::new(expression)),
            });
        }

        self.expect_next_to_be(TokenKind::Equals)?;
        let source = self.parse_expression()?;

        Ok(Statement {
            id: self.create_node_id(),
            span: Span::new(expression.span.start, source.span.end),
            kind: StatementKind::Assignment {
                target: Box::new(expression),
                source: Box::new(source),
            },
        })
    }

    /// "if" expression "then" statements ( "else" statements )? "end"
    fn parse_if_statement(&mut self) -> ParseResult<Statement> {
        let if_keyword = self.expect_keyword(Keyword::If)?;
        let condition = self.parse_expression()?;

        self.expect_keyword(Keyword::Then)?;
        let positive = self.parse_statements()?;

        let negative = if self.peek_is(TokenKind::Keyword(Keyword::Else))? {
            self.expect_keyword(Keyword::Else)?;
            self.parse_statements()?
        } else {
            Vec::new()
        };

        let end_keyword = self.expect_keyword(Keyword::End)?;

        Ok(Statement {
            id: self.create_node_id(),
            span: Span::new(if_keyword.span.start, end_keyword.span.end),
            kind: StatementKind::If {
                condition: Box::new(condition),
                positive,
                negative,
            },
        })
    }

    /// "while" expression "do" statements "end"
    fn parse_while_statement(&mut self) -> ParseResult<Statement> {
        let while_keyword = self.expect_keyword(Keyword::While)?;
        let condition = self.parse_expression()?;

        self.expect_keyword(Keyword::Do)?;
        let body = self.parse_statements()?;
        let end_keyword = self.expect_keyword(Keyword::End)?;

        Ok(Statement {
            id: self.create_node_id(),
            span: Span::new(while_keyword.span.start, end_keyword.span.end),
            kind: StatementKind::While {
                condition: Box::new(condition),
                body,
            },
        })
    }

    /// "let" definition+ "in" statements "end"
    fn parse_let_statement(&mut self) -> ParseResult<Statement> {
        let let_keyword = self.expect_keyword(Keyword::Let)?;

        let mut definitions = vec![self.parse_definition()?];

        while !self.peek_is(TokenKind::Keyword(Keyword::In))? {
            definitions.push(self.parse_definition()?);
        }

        self.expect_keyword(Keyword::In)?;
        let body = self.parse_statements()?;
        let end_keyword = self.expect_keyword(Keyword::End)?;

        Ok(Statement {
            id: self.create_node_id(),
            span: Span::new(let_keyword.span.start, end_keyword.span.end),
            kind: StatementKind::Let { definitions, body },
        })
    }

    /// expression     -> logical_or
    /// logical_or     -> logical_and ( "||" logical_and )*
    /// logical_and    -> comparison ( "&&" comparison )*
    /// comparison     -> term ( ( "!=" | "==" | "<" | "<=" | ">" | ">=" ) term )?
    /// term           -> factor ( ( "-" | "+" ) factor )*
    /// factor         -> prefix ( ( "/" | "*" | "%" ) prefix )*
    /// prefix         -> ( "!" | "+" | "-" | "^" ) prefix
    ///                   | postfix
    /// postfix        -> atom ( "^" )*
    /// atom           -> IDENTIFIER ( "(" ( expression ( "," expression )* )? ")" )?
    ///                   | INTEGER | CHAR | STRING
    ///                   | "(" expression ")"
    fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_logical_or_expression()
    }

    fn new_binary(
        &mut self,
        lhs: Expression,
        operator: Token,
        kind: BinaryOperatorKind,
        rhs: Expression,
    ) -> Expression {
        Expression {
            id: self.create_node_id(),
            span: Span::new(lhs.span.start, rhs.span.end),
            kind: ExpressionKind::Binary {
                lhs: Box::new(lhs),
                operator: BinaryOperator {
                    id: self.create_node_id(),
                    span: operator.span,
                    kind,
                },
                rhs: Box::new(rhs),
            },
        }
    }

    fn parse_logical_or_expression(&mut self) -> ParseResult<Expression> {
        let mut expression = self.parse_logical_and_expression()?;

        while self.peek_is(TokenKind::LogicalOr)? {
            let operator = self.expect_next_to_be(TokenKind::LogicalOr)?;
            let rhs = self.parse_logical_and_expression()?;

            expression = self.new_binary(expression, operator, BinaryOperatorKind::LogicalOr, rhs);
        }

        Ok(expression)
    }

    fn parse_logical_and_expression(&mut self) -> ParseResult<Expression> {
        let mut expression = self.parse_comparison_expression()?;

        while self.peek_is(TokenKind::LogicalAnd)? {
            let operator = self.expect_next_to_be(TokenKind::LogicalAnd)?;
            let rhs = self.parse_comparison_expression()?;

            expression = self.new_binary(expression, operator, BinaryOperatorKind::LogicalAnd, rhs);
        }

        Ok(expression)
    }

    // Comparisons do not chain: `a < b < c` is rejected by whoever sees the
    // second operator
    fn parse_comparison_expression(&mut self) -> ParseResult<Expression> {
        let expression = self.parse_term_expression()?;

        if !self.lexer.peek()?.kind.is_comparison_operator() {
            return Ok(expression);
        }

        let operator = self.lexer.next()?;
        let kind = match operator.kind {
            TokenKind::DoubleEquals => BinaryOperatorKind::Equals,
            TokenKind::NotEquals => BinaryOperatorKind::NotEquals,
            TokenKind::LessThan => BinaryOperatorKind::LessThan,
            TokenKind::LessThanOrEqualTo => BinaryOperatorKind::LessThanOrEqualTo,
            TokenKind::GreaterThan => BinaryOperatorKind::GreaterThan,
            TokenKind::GreaterThanOrEqualTo => BinaryOperatorKind::GreaterThanOrEqualTo,
            _ => return Err(self.unexpected(operator, "comparison operator")),
        };
        let rhs = self.parse_term_expression()?;

        Ok(self.new_binary(expression, operator, kind, rhs))
    }

    fn parse_term_expression(&mut self) -> ParseResult<Expression> {
        let mut expression = self.parse_factor_expression()?;

        while self.lexer.peek()?.kind.is_term_operator() {
            let operator = self.lexer.next()?;
            let kind = if operator.kind == TokenKind::Plus {
                BinaryOperatorKind::Add
            } else {
                BinaryOperatorKind::Subtract
            };
            let rhs = self.parse_factor_expression()?;

            expression = self.new_binary(expression, operator, kind, rhs);
        }

        Ok(expression)
    }

    fn parse_factor_expression(&mut self) -> ParseResult<Expression> {
        let mut expression = self.parse_prefix_expression()?;

        while self.lexer.peek()?.kind.is_factor_operator() {
            let operator = self.lexer.next()?;
            let kind = match operator.kind {
                TokenKind::Asterisk => BinaryOperatorKind::Multiply,
                TokenKind::Divide => BinaryOperatorKind::Divide,
                _ => BinaryOperatorKind::Modulus,
            };
            let rhs = self.parse_prefix_expression()?;

            expression = self.new_binary(expression, operator, kind, rhs);
        }

        Ok(expression)
    }

    fn parse_prefix_expression(&mut self) -> ParseResult<Expression> {
        if !self.lexer.peek()?.kind.is_prefix_operator() {
            return self.parse_postfix_expression();
        }

        let operator = self.lexer.next()?;
        let kind = match operator.kind {
            TokenKind::Bang => UnaryOperatorKind::LogicalNot,
            TokenKind::Plus => UnaryOperatorKind::Identity,
            TokenKind::Minus => UnaryOperatorKind::Negate,
            _ => UnaryOperatorKind::AddressOf,
        };
        let operand = self.parse_prefix_expression()?;

        Ok(Expression {
            id: self.create_node_id(),
            span: Span::new(operator.span.start, operand.span.end),
            kind: ExpressionKind::Unary {
                operator: UnaryOperator {
                    id: self.create_node_id(),
                    span: operator.span,
                    kind,
                },
                operand: Box::new(operand),
            },
        })
    }

    fn parse_postfix_expression(&mut self) -> ParseResult<Expression> {
        let mut expression = self.parse_atomic_expression()?;

        while self.peek_is(TokenKind::Caret)? {
            let operator = self.expect_next_to_be(TokenKind::Caret)?;

            expression = Expression {
                id: self.create_node_id(),
                span: Span::new(expression.span.start, operator.span.end),
                kind: ExpressionKind::Unary {
                    operator: UnaryOperator {
                        id: self.create_node_id(),
                        span: operator.span,
                        kind: UnaryOperatorKind::Deref,
                    },
                    operand: Box::new(expression),
                },
            };
        }

        Ok(expression)
    }

    fn parse_atomic_expression(&mut self) -> ParseResult<Expression> {
        let peeked = self.lexer.peek()?;

        match peeked.kind {
            TokenKind::Identifier => self.parse_name_or_call(),
            TokenKind::OpenParen => {
                // Grouping only changes precedence so no node is created for it
                self.expect_next_to_be(TokenKind::OpenParen)?;
                let expression = self.parse_expression()?;
                self.expect_next_to_be(TokenKind::CloseParen)?;

                Ok(expression)
            }
            kind if kind.is_literal() => {
                let literal = self.parse_literal()?;

                Ok(Expression {
                    id: self.create_node_id(),
                    span: literal.span,
                    kind: ExpressionKind::Literal(Box::new(literal)),
                })
            }
            _ => Err(self.unexpected(peeked, "expression")),
        }
    }

    fn parse_name_or_call(&mut self) -> ParseResult<Expression> {
        let name = self.parse_identifier()?;

        if !self.peek_is(TokenKind::OpenParen)? {
            return Ok(Expression {
                id: self.create_node_id(),
                span: name.span,
                kind: ExpressionKind::Name(Box::new(name)),
            });
        }

        self.expect_next_to_be(TokenKind::OpenParen)?;

        let mut arguments = Vec::new();

        // If a close paren was not found then there MUST be at least one
        // argument
        if !self.peek_is(TokenKind::CloseParen)? {
            arguments.push(self.parse_expression()?);

            while self.peek_is(TokenKind::Comma)? {
                self.expect_next_to_be(TokenKind::Comma)?;
                arguments.push(self.parse_expression()?);
            }
        }

        let close_paren = self.expect_next_to_be(TokenKind::CloseParen)?;

        Ok(Expression {
            id: self.create_node_id(),
            span: Span::new(name.span.start, close_paren.span.end),
            kind: ExpressionKind::FunctionCall {
                function: Box::new(name),
                arguments,
            },
        })
    }

    fn parse_literal(&mut self) -> ParseResult<Literal> {
        let token = self.lexer.next()?;
        let raw = self.lexer.source().value_of_span(token.span);

        let (kind, value) = match token.kind {
            TokenKind::IntegerLiteral => {
                if raw.parse::<i32>().is_err() {
                    return Err(CompileError::new(token.span, "Illegal integer value."));
                }

                (LiteralKind::Integer, raw.to_owned())
            }
            TokenKind::CharLiteral => (LiteralKind::Char, unescape_literal(raw).into_iter().collect()),
            TokenKind::StringLiteral => {
                (LiteralKind::String, unescape_literal(raw).into_iter().collect())
            }
            _ => return Err(self.unexpected(token, "constant")),
        };

        Ok(Literal {
            id: self.create_node_id(),
            span: token.span,
            kind,
            symbol: InternedSymbol::new(&value),
        })
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::frontend::SourceFileOrigin;

    fn parse(text: &str) -> ParseResult<Program> {
        let source = SourceFile::new(text, SourceFileOrigin::Memory);
        Parser::parse_program(&source)
    }

    fn main_body(program: &Program) -> &[Statement] {
        let Definition::Function(function) = &program.definitions[0] else {
            panic!("expected a function");
        };

        &function.body
    }

    #[test]
    fn parses_definitions() {
        let program = parse(indoc! {"
            var x = 3
            var buffer = 10 * 0, \"ab\"
            fun putint(n)
            fun main() = putint(x), x = x + 1
        "})
        .unwrap();

        assert_eq!(program.definitions.len(), 4);

        let Definition::Variable(buffer) = &program.definitions[1] else {
            panic!("expected a variable");
        };
        assert_eq!(buffer.initializers.len(), 2);
        assert_eq!(buffer.initializers[0].count.as_ref().unwrap().words(), vec![10]);
        assert_eq!(buffer.initializers[1].value.words(), vec!['a' as i32, 'b' as i32]);

        let Definition::Function(putint) = &program.definitions[2] else {
            panic!("expected a function");
        };
        assert!(!putint.has_body());

        let Definition::Function(main) = &program.definitions[3] else {
            panic!("expected a function");
        };
        assert_eq!(main.body.len(), 2);
        assert!(matches!(main.body[1].kind, StatementKind::Assignment { .. }));
    }

    #[test]
    fn precedence_binds_factors_tighter_than_terms() {
        let program = parse("fun main() = 1 + 2 * 3").unwrap();

        let StatementKind::Expression(expression) = &main_body(&program)[0].kind else {
            panic!("expected an expression statement");
        };
        let ExpressionKind::Binary { operator, rhs, .. } = &expression.kind else {
            panic!("expected a binary expression");
        };

        assert_eq!(operator.kind, BinaryOperatorKind::Add);
        assert!(matches!(
            rhs.kind,
            ExpressionKind::Binary {
                operator: BinaryOperator {
                    kind: BinaryOperatorKind::Multiply,
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn caret_is_prefix_address_and_postfix_deref() {
        let program = parse("fun main() = ^x^").unwrap();

        let StatementKind::Expression(expression) = &main_body(&program)[0].kind else {
            panic!("expected an expression statement");
        };
        let ExpressionKind::Unary { operator, operand } = &expression.kind else {
            panic!("expected a unary expression");
        };

        assert_eq!(operator.kind, UnaryOperatorKind::AddressOf);
        assert!(matches!(
            operand.kind,
            ExpressionKind::Unary {
                operator: UnaryOperator {
                    kind: UnaryOperatorKind::Deref,
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn parses_structured_statements() {
        let program = parse(indoc! {"
            fun main() =
                let var i = 0 in
                    while i < 10 do
                        if i % 2 == 0 then putint(i) else i = i end,
                        i = i + 1
                    end
                end
        "})
        .unwrap();

        let StatementKind::Let { definitions, body } = &main_body(&program)[0].kind else {
            panic!("expected a let statement");
        };
        assert_eq!(definitions.len(), 1);

        let StatementKind::While { body, .. } = &body[0].kind else {
            panic!("expected a while statement");
        };
        assert_eq!(body.len(), 2);
        assert!(matches!(body[0].kind, StatementKind::If { .. }));
    }

    #[test]
    fn node_ids_are_unique() {
        let program = parse("fun main() = f(1, 2) + g(3)").unwrap();
        let StatementKind::Expression(expression) = &main_body(&program)[0].kind else {
            panic!("expected an expression statement");
        };
        let ExpressionKind::Binary { lhs, rhs, .. } = &expression.kind else {
            panic!("expected a binary expression");
        };

        assert_ne!(lhs.id, rhs.id);
        assert_ne!(expression.id, lhs.id);
    }

    #[test]
    fn rejects_out_of_range_integers() {
        let error = parse("var x = 2147483648").unwrap_err();

        assert_eq!(error.message, "Illegal integer value.");
        assert_eq!(error.span, Span::new(8, 18));
    }

    #[test]
    fn rejects_chained_comparisons() {
        assert!(parse("fun main() = 1 < 2 < 3").is_err());
    }

    #[test]
    fn reports_unexpected_token() {
        let error = parse("fun main() = if 1 do 2 end").unwrap_err();

        assert_eq!(error.message, "Expected 'then' but found 'do'.");
    }
}
