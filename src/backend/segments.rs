//! Linearizes the generated per-function and per-variable lists into the code
//! and data segments of one program.

use super::{
    codegen::GeneratedCode,
    instr::{CodeInstruction, CodeKind, DataInstruction},
    layout::{Frame, Layout},
};
use crate::{
    frontend::{
        AnnotatedTree,
        ast::{Definition, Statement, StatementKind},
        intern::InternedSymbol,
        lexer::Span,
    },
    report::internal_error,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segments {
    pub code: Vec<CodeInstruction>,
    pub data: Vec<DataInstruction>,
}

impl Segments {
    pub fn assemble(tree: &AnnotatedTree, layout: &Layout, mut generated: GeneratedCode) -> Self {
        let main = top_level_frame(tree, layout, "main");
        let exit = top_level_frame(tree, layout, "exit");

        let mut segments = Self {
            code: init_stub(main, exit),
            data: Vec::new(),
        };

        segments.append_definitions(&tree.program.definitions, &mut generated);

        for block in generated.strings {
            segments.data.extend(block);
        }

        segments
    }

    /// Depth first, functions before the functions nested in them, variables
    /// in declaration order
    fn append_definitions(&mut self, definitions: &[Definition], generated: &mut GeneratedCode) {
        for definition in definitions {
            match definition {
                Definition::Function(function) => {
                    // Bodiless functions have no entry here
                    if let Some(code) = generated.functions.remove(&function.id) {
                        self.code.extend(code);
                    }

                    self.append_statements(&function.body, generated);
                }
                Definition::Variable(variable) => {
                    let Some(data) = generated.variables.remove(&variable.id) else {
                        internal_error!("no data generated for '{}'", variable.name.symbol);
                    };

                    self.data.extend(data);
                }
            }
        }
    }

    fn append_statements(&mut self, statements: &[Statement], generated: &mut GeneratedCode) {
        for statement in statements {
            match &statement.kind {
                StatementKind::Expression(_) | StatementKind::Assignment { .. } => {}
                StatementKind::If {
                    positive, negative, ..
                } => {
                    self.append_statements(positive, generated);
                    self.append_statements(negative, generated);
                }
                StatementKind::While { body, .. } => self.append_statements(body, generated),
                StatementKind::Let { definitions, body } => {
                    self.append_definitions(definitions, generated);
                    self.append_statements(body, generated);
                }
            }
        }
    }

    /// Code instructions paired with their addresses
    pub fn code_with_addresses(&self) -> impl Iterator<Item = (i32, &CodeInstruction)> + '_ {
        self.code.iter().scan(0, |address, instruction| {
            let current = *address;
            *address += instruction.kind.size();
            Some((current, instruction))
        })
    }

    /// Data instructions paired with their offsets from the start of the data
    /// segment
    pub fn data_with_offsets(&self) -> impl Iterator<Item = (i32, &DataInstruction)> + '_ {
        self.data.iter().scan(0, |offset, instruction| {
            let current = *offset;
            *offset += instruction.kind.size();
            Some((current, instruction))
        })
    }

    pub fn code_size(&self) -> i32 {
        total_size(self.code.iter().map(|instruction| instruction.kind.size()))
    }

    pub fn data_size(&self) -> i32 {
        total_size(self.data.iter().map(|instruction| instruction.kind.size()))
    }
}

fn total_size(mut sizes: impl Iterator<Item = i32>) -> i32 {
    sizes
        .try_fold(0i32, i32::checked_add)
        .unwrap_or_else(|| internal_error!("segment does not fit the address space"))
}

fn top_level_frame<'a>(tree: &AnnotatedTree, layout: &'a Layout, name: &str) -> &'a Frame {
    let symbol = InternedSymbol::new(name);

    let Some(definition) = tree.program.definitions.iter().find(|definition| {
        matches!(definition, Definition::Function(_)) && definition.name().symbol == symbol
    }) else {
        internal_error!("program has no top level function '{name}'");
    };

    layout.frame(definition.id())
}

/// `main(); exit(<result of main>)`
fn init_stub(main: &Frame, exit: &Frame) -> Vec<CodeInstruction> {
    [
        CodeKind::Push(0),
        CodeKind::Name(main.label),
        CodeKind::Call(main.clone()),
        CodeKind::Push(0),
        CodeKind::Name(exit.label),
        CodeKind::Call(exit.clone()),
    ]
    .into_iter()
    .map(|kind| CodeInstruction {
        span: Span::default(),
        kind,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::backend::compile;
    use crate::frontend::{SourceFile, SourceFileOrigin, analyze};

    fn segments(text: &str) -> Segments {
        let source = SourceFile::new(text, SourceFileOrigin::Memory).with_prelude();
        let tree = analyze(&source).unwrap();

        compile(&tree)
    }

    fn code_listing(segments: &Segments) -> Vec<String> {
        segments
            .code
            .iter()
            .map(|instruction| instruction.kind.to_string())
            .collect()
    }

    #[test]
    fn starts_with_init_stub() {
        let segments = segments("fun main() = 0");

        assert_eq!(
            code_listing(&segments)[..6],
            ["PUSH 0", "NAME main", "CALL main", "PUSH 0", "NAME exit", "CALL exit"]
        );
        assert_eq!(code_listing(&segments)[6], "main:");
    }

    #[test]
    fn bodiless_functions_produce_no_code() {
        let segments = segments("fun main() = putint(1)");

        assert!(!code_listing(&segments).iter().any(|line| line == "putint:"));
    }

    #[test]
    fn nested_functions_follow_their_parent() {
        let segments = segments(
            "fun main() = let fun a() = let fun b() = 1 in b() end in a() end fun z() = 0",
        );

        let labels = code_listing(&segments)
            .into_iter()
            .filter(|line| line.ends_with(':'))
            .collect::<Vec<_>>();

        assert_eq!(labels, vec!["main:", "main.a:", "main.a.b:", "z:"]);
    }

    #[test]
    fn data_in_declaration_order_then_strings() {
        let segments = segments(indoc::indoc! {r#"
            var first = 1
            fun main() = let var local = 2 in putstr("s") end
            var last = 3
        "#});

        let data = segments
            .data
            .iter()
            .map(|instruction| instruction.kind.to_string())
            .collect::<Vec<_>>();

        assert_eq!(
            data,
            vec![
                "first:",
                "SIZE 4 [1, 1, 1, 1]",
                ":0:",
                "DATA 1",
                "DATA 1",
                "DATA 1",
                "DATA 2",
                "last:",
                "SIZE 4 [1, 1, 1, 3]",
                ":1:",
                "DATA 115",
                "DATA 0",
            ]
        );
        assert_eq!(segments.data_size(), 4 + 16 + 4 + 8);
    }

    #[test]
    fn addresses_account_for_sizes() {
        let segments = segments("fun main() = 0");
        let addresses = segments
            .code_with_addresses()
            .map(|(address, _)| address)
            .take(7)
            .collect::<Vec<_>>();

        assert_eq!(addresses, vec![0, 5, 10, 11, 16, 21, 22]);
        assert_eq!(segments.code_size(), 22 + 5 + 1 + 5 + 5 + 1);
    }
}
