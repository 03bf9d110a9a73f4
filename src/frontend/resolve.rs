use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::{
    ast::{
        Definition, Expression, ExpressionKind, FunctionDefinition, Identifier, NodeId, Program,
        Statement, StatementKind, UnaryOperatorKind, VariableDefinition,
    },
    error::CompileError,
    intern::InternedSymbol,
    lexer::Span,
};
use crate::backend::layout::{MAX_STORAGE_SIZE, WORD_SIZE};

type ResolveResult<T = ()> = Result<T, CompileError>;

#[derive(Debug)]
pub struct Resolver {
    scope_stack: ScopeStack<NameResolution>,
    /// Bytes of locals declared so far, one entry per enclosing function
    frame_sizes: Vec<i64>,
    /// Bytes of all globals
    static_size: i64,
    result: ResolutionResult,
}

impl Resolver {
    pub fn resolve(program: &Program) -> ResolveResult<ResolutionResult> {
        let mut resolver = Self {
            scope_stack: ScopeStack::new(),
            frame_sizes: Vec::new(),
            static_size: 0,
            result: ResolutionResult::default(),
        };

        // All top level definitions see each other regardless of order
        resolver.bind_definitions(&program.definitions)?;
        resolver.check_entry_point()?;

        for definition in &program.definitions {
            resolver.resolve_definition(definition)?;
        }

        Ok(resolver.result)
    }

    fn check_entry_point(&self) -> ResolveResult {
        match self
            .scope_stack
            .get_global_binding(InternedSymbol::new("main"))
        {
            Some(NameResolution::Function {
                parameter_count: 0, ..
            }) => Ok(()),
            Some(NameResolution::Function { span, .. }) => Err(CompileError::new(
                *span,
                "Function 'main' must not have parameters.",
            )),
            Some(NameResolution::Variable { span, .. }) => Err(CompileError::new(
                *span,
                "'main' must be a function.",
            )),
            _ => Err(CompileError::new(
                Span::default(),
                "Missing function 'main'.",
            )),
        }
    }

    fn bind_definitions(&mut self, definitions: &[Definition]) -> ResolveResult {
        for definition in definitions {
            let name = definition.name();

            if self.scope_stack.get_shallow_binding(name.symbol).is_some() {
                return Err(CompileError::new(
                    name.span,
                    format!("Duplicate definition of '{}'.", name.symbol),
                ));
            }

            let resolution = match definition {
                Definition::Function(function) => NameResolution::Function {
                    id: function.id,
                    span: name.span,
                    parameter_count: function.parameters.len(),
                },
                Definition::Variable(variable) => {
                    self.reserve_storage(variable)?;

                    NameResolution::Variable {
                        id: variable.id,
                        span: name.span,
                    }
                }
            };

            self.scope_stack.add_shallow_binding(name.symbol, resolution);
        }

        Ok(())
    }

    /// Sizes must fit a word once summed into a frame or into the globals
    fn reserve_storage(&mut self, variable: &VariableDefinition) -> ResolveResult {
        let total = match self.frame_sizes.last_mut() {
            Some(frame_size) => frame_size,
            None => &mut self.static_size,
        };

        let reserved = storage_size(variable)
            .and_then(|size| total.checked_add(size))
            .filter(|reserved| *reserved <= i64::from(MAX_STORAGE_SIZE));

        match reserved {
            Some(reserved) => {
                *total = reserved;
                Ok(())
            }
            None => Err(CompileError::new(variable.span, "Illegal variable size.")),
        }
    }

    fn resolve_definition(&mut self, definition: &Definition) -> ResolveResult {
        match definition {
            Definition::Function(function) => self.resolve_function_definition(function),
            // Initializers are constants
            Definition::Variable(_) => Ok(()),
        }
    }

    /// Resolves all names within a function definition
    fn resolve_function_definition(&mut self, function: &FunctionDefinition) -> ResolveResult {
        self.scope_stack.push_shallow_scope();
        self.frame_sizes.push(0);

        for parameter in &function.parameters {
            if self
                .scope_stack
                .get_shallow_binding(parameter.name.symbol)
                .is_some()
            {
                return Err(CompileError::new(
                    parameter.name.span,
                    format!("Duplicate parameter '{}'.", parameter.name.symbol),
                ));
            }

            self.scope_stack.add_shallow_binding(
                parameter.name.symbol,
                NameResolution::Variable {
                    id: parameter.id,
                    span: parameter.span,
                },
            );
        }

        self.resolve_statements(&function.body)?;

        self.frame_sizes.pop();
        self.scope_stack.pop_shallow_scope();

        Ok(())
    }

    fn resolve_statements(&mut self, statements: &[Statement]) -> ResolveResult {
        statements
            .iter()
            .try_for_each(|statement| self.resolve_statement(statement))
    }

    fn resolve_statement(&mut self, statement: &Statement) -> ResolveResult {
        match &statement.kind {
            StatementKind::Expression(expression) => self.resolve_expression(expression),
            StatementKind::Assignment { target, source } => {
                self.resolve_expression(source)?;
                self.resolve_expression(target)?;

                if !self.result.is_addressable(target.id) {
                    return Err(CompileError::new(
                        target.span,
                        "Cannot assign to a non-addressable expression.",
                    ));
                }

                Ok(())
            }
            StatementKind::If {
                condition,
                positive,
                negative,
            } => {
                self.resolve_expression(condition)?;
                self.resolve_statements(positive)?;
                self.resolve_statements(negative)
            }
            StatementKind::While { condition, body } => {
                self.resolve_expression(condition)?;
                self.resolve_statements(body)
            }
            StatementKind::Let { definitions, body } => {
                self.scope_stack.push_shallow_scope();

                self.bind_definitions(definitions)?;

                for definition in definitions {
                    self.resolve_definition(definition)?;
                }

                self.resolve_statements(body)?;

                self.scope_stack.pop_shallow_scope();

                Ok(())
            }
        }
    }

    fn resolve_expression(&mut self, expression: &Expression) -> ResolveResult {
        match &expression.kind {
            ExpressionKind::Literal(_) => Ok(()),
            ExpressionKind::Name(name) => {
                let NameResolution::Variable { id, .. } = self.lookup(name)? else {
                    return Err(CompileError::new(
                        name.span,
                        format!("Function '{}' cannot be used as a value.", name.symbol),
                    ));
                };

                self.result.definitions.insert(expression.id, id);
                self.result.addressable.insert(expression.id);

                Ok(())
            }
            ExpressionKind::FunctionCall {
                function,
                arguments,
            } => {
                let NameResolution::Function {
                    id,
                    parameter_count,
                    ..
                } = self.lookup(function)?
                else {
                    return Err(CompileError::new(
                        function.span,
                        format!("'{}' is not a function.", function.symbol),
                    ));
                };

                if arguments.len() != parameter_count {
                    return Err(CompileError::new(
                        expression.span,
                        format!(
                            "Function '{}' expects {} argument(s) but {} were given.",
                            function.symbol,
                            parameter_count,
                            arguments.len()
                        ),
                    ));
                }

                self.result.definitions.insert(expression.id, id);

                arguments
                    .iter()
                    .try_for_each(|argument| self.resolve_expression(argument))
            }
            ExpressionKind::Unary { operator, operand } => {
                self.resolve_expression(operand)?;

                match operator.kind {
                    UnaryOperatorKind::AddressOf if !self.result.is_addressable(operand.id) => {
                        Err(CompileError::new(
                            operand.span,
                            "Cannot take the address of a non-addressable expression.",
                        ))
                    }
                    UnaryOperatorKind::Deref => {
                        self.result.addressable.insert(expression.id);
                        Ok(())
                    }
                    _ => Ok(()),
                }
            }
            ExpressionKind::Binary { lhs, rhs, .. } => {
                self.resolve_expression(lhs)?;
                self.resolve_expression(rhs)
            }
        }
    }

    fn lookup(&self, name: &Identifier) -> ResolveResult<NameResolution> {
        self.scope_stack
            .get_binding(name.symbol)
            .copied()
            .ok_or_else(|| {
                CompileError::new(name.span, format!("Undeclared name '{}'.", name.symbol))
            })
    }
}

/// Bytes occupied by the expanded initializers of a variable
fn storage_size(variable: &VariableDefinition) -> Option<i64> {
    variable
        .initializers
        .iter()
        .try_fold(0i64, |total, initializer| {
            let repeat = initializer
                .count
                .as_ref()
                .map(|count| i64::from(count.words()[0]))
                .unwrap_or(1);
            let length = i64::try_from(initializer.value.words().len()).ok()?;

            total.checked_add(repeat.checked_mul(length)?.checked_mul(i64::from(WORD_SIZE))?)
        })
}

#[derive(Debug, Default)]
pub struct ResolutionResult {
    /// Maps every name expression and call expression to the node defining the
    /// variable, parameter or function it refers to
    pub definitions: BTreeMap<NodeId, NodeId>,
    /// Expressions denoting assignable locations
    pub addressable: BTreeSet<NodeId>,
}

impl ResolutionResult {
    pub fn definition_of(&self, id: NodeId) -> Option<NodeId> {
        self.definitions.get(&id).copied()
    }

    pub fn is_addressable(&self, id: NodeId) -> bool {
        self.addressable.contains(&id)
    }
}

#[derive(Debug)]
struct ScopeStack<R> {
    global_scope: BTreeMap<InternedSymbol, R>,
    stack: VecDeque<BTreeMap<InternedSymbol, R>>,
}

impl<R> ScopeStack<R> {
    fn new() -> Self {
        Self {
            global_scope: BTreeMap::new(),
            stack: VecDeque::new(),
        }
    }

    /// Creates a new function or let scope
    fn push_shallow_scope(&mut self) {
        self.stack.push_back(BTreeMap::new());
    }

    /// Destroys the current function or let scope
    fn pop_shallow_scope(&mut self) {
        assert!(
            !self.stack.is_empty(),
            "Attempted to pop a shallow scope from the global context"
        );

        self.stack.pop_back();
    }

    /// Looks for a binding only within the current (most nested) scope
    fn get_shallow_binding(&self, symbol: InternedSymbol) -> Option<&R> {
        self.stack
            .back()
            .unwrap_or(&self.global_scope)
            .get(&symbol)
    }

    /// Adds a binding only within the current (most nested) scope
    fn add_shallow_binding(&mut self, symbol: InternedSymbol, name_resolution: R) {
        let scope = match self.stack.back_mut() {
            Some(scope) => scope,
            None => &mut self.global_scope,
        };

        scope.insert(symbol, name_resolution);
    }

    /// Gets a binding from the global scope
    fn get_global_binding(&self, symbol: InternedSymbol) -> Option<&R> {
        self.global_scope.get(&symbol)
    }

    /// Traverses the scope stack from back to front looking for bindings before
    /// checking the global scope.
    fn get_binding(&self, symbol: InternedSymbol) -> Option<&R> {
        for scope in self.stack.iter().rev() {
            if let Some(binding) = scope.get(&symbol) {
                return Some(binding);
            }
        }

        self.global_scope.get(&symbol)
    }
}

#[derive(Debug, Clone, Copy)]
enum NameResolution {
    Function {
        id: NodeId,
        span: Span,
        parameter_count: usize,
    },
    /// Variables and parameters
    Variable { id: NodeId, span: Span },
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;
    use crate::frontend::{SourceFile, SourceFileOrigin, parser::Parser};

    fn resolve(text: &str) -> ResolveResult<ResolutionResult> {
        let source = SourceFile::new(text, SourceFileOrigin::Memory);
        let program = Parser::parse_program(&source)?;

        Resolver::resolve(&program)
    }

    #[test]
    fn resolves_forward_references_and_shadowing() {
        let result = resolve(indoc! {"
            fun main() = f(1)
            fun f(x) = let var x = 2 fun g() = x in g() end
        "})
        .unwrap();

        // f(1), x inside g, g()
        assert_eq!(result.definitions.len(), 3);
        assert_eq!(result.addressable.len(), 1);
    }

    #[test]
    fn dereference_is_addressable() {
        let result = resolve("var p = 0 fun main() = p^ = 1, ^p").unwrap();

        // p, p^ and the p under the address-of
        assert_eq!(result.addressable.len(), 3);
    }

    #[rstest]
    #[case("fun main() = y", "Undeclared name 'y'.")]
    #[case("var x = 1 var x = 2 fun main() = x", "Duplicate definition of 'x'.")]
    #[case("fun f(a, a) = a fun main() = f(1, 2)", "Duplicate parameter 'a'.")]
    #[case("var x = 1 fun main() = x()", "'x' is not a function.")]
    #[case("fun main() = main", "Function 'main' cannot be used as a value.")]
    #[case(
        "fun f(a) = a fun main() = f()",
        "Function 'f' expects 1 argument(s) but 0 were given."
    )]
    #[case("fun main() = 1 = 2", "Cannot assign to a non-addressable expression.")]
    #[case(
        "fun main() = ^(1 + 2)",
        "Cannot take the address of a non-addressable expression."
    )]
    #[case("fun f() = 0", "Missing function 'main'.")]
    #[case("fun main(a) = a", "Function 'main' must not have parameters.")]
    #[case("var main = 0", "'main' must be a function.")]
    #[case(
        "fun main() = let var a = 1000000000 * 1 in 0 end",
        "Illegal variable size."
    )]
    #[case(
        "var a = 600000000 * 1 var b = 600000000 * 1 fun main() = 0",
        "Illegal variable size."
    )]
    fn reports_user_errors(#[case] text: &str, #[case] message: &str) {
        assert_eq!(resolve(text).unwrap_err().message, message);
    }

    #[test]
    fn globals_share_one_size_limit() {
        let text = "var a = 200000000 * 1 var b = 200000000 * 1 fun main() = 0";
        let error = resolve(text).unwrap_err();

        assert_eq!(error.message, "Illegal variable size.");
        assert_eq!(error.span.start, text.find("var b").unwrap());
    }

    #[test]
    fn each_function_has_its_own_size_limit() {
        let text = indoc! {"
            fun f() = let var a = 200000000 * 1 in 0 end
            fun main() = let var b = 200000000 * 1 in f() end
        "};

        assert!(resolve(text).is_ok());
    }

    #[test]
    fn let_scope_ends_with_let() {
        let error = resolve("fun main() = let var t = 1 in t end, t").unwrap_err();

        assert_eq!(error.message, "Undeclared name 't'.");
    }
}
