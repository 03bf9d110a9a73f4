//! Frame layout: assigns every function a nesting depth and frame sizes and
//! every variable and parameter a storage location.
//!
//! A frame looks like this (addresses grow upward, `FP` is the frame pointer):
//!
//! ```text
//!   FP + 4k   last parameter
//!   ...
//!   FP + 4    first parameter
//!   FP + 0    static link
//!   FP - 4    saved frame pointer
//!   FP - 8    return address
//!   FP - 12   first local (locals grow downward)
//! ```

use std::collections::BTreeMap;

use hashbrown::HashSet;

use crate::{
    frontend::{
        ast::{
            Definition, FunctionDefinition, NodeId, Program, Statement, StatementKind,
            VariableDefinition,
        },
        intern::InternedSymbol,
    },
    report::internal_error,
};

/// Size of a machine word and of an address, in bytes
pub const WORD_SIZE: i32 = 4;

/// The static link sits at offset 0 of the parameter region
pub const STATIC_LINK_SIZE: i32 = WORD_SIZE;

/// Saved frame pointer plus return address
pub const HEADER_SIZE: i32 = 2 * WORD_SIZE;

/// Upper bound on the locals of one frame and on all globals together, so
/// that every size and offset fits a word
pub const MAX_STORAGE_SIZE: i32 = 1 << 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub name: InternedSymbol,
    /// Code label of the function entry, unique in the whole program
    pub label: InternedSymbol,
    /// 1 for top level functions
    pub depth: u32,
    /// Parameters plus the static link
    pub pars_size: i32,
    /// Locals plus the saved frame pointer and return address
    pub vars_size: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Frame pointer relative storage of a parameter or a local variable
    Relative {
        offset: i32,
        /// Depth of the function owning the frame
        depth: u32,
        size: i32,
        inits: Option<Inits>,
    },
    /// Statically allocated storage of a global variable
    Absolute {
        name: InternedSymbol,
        size: i32,
        inits: Option<Inits>,
    },
}

impl Access {
    pub fn size(&self) -> i32 {
        match self {
            Self::Relative { size, .. } | Self::Absolute { size, .. } => *size,
        }
    }

    pub fn inits(&self) -> Option<&Inits> {
        match self {
            Self::Relative { inits, .. } | Self::Absolute { inits, .. } => inits.as_ref(),
        }
    }
}

/// Decoded initializer: `[groups, (repeat, length, values...)...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inits(pub Vec<i32>);

impl Inits {
    pub fn decode(variable: &VariableDefinition) -> Self {
        let mut encoding = vec![variable.initializers.len() as i32];

        for initializer in &variable.initializers {
            let repeat = initializer
                .count
                .as_ref()
                .map(|count| count.words()[0])
                .unwrap_or(1);
            let values = initializer.value.words();

            encoding.push(repeat);
            encoding.push(values.len() as i32);
            encoding.extend(values);
        }

        Self(encoding)
    }

    /// `(repeat, values)` for every group
    pub fn groups(&self) -> impl Iterator<Item = (i32, &[i32])> + '_ {
        let mut rest = self.0.get(1..).unwrap_or_default();

        std::iter::from_fn(move || {
            let [repeat, length, tail @ ..] = rest else {
                return None;
            };

            let length = (*length).clamp(0, tail.len() as i32) as usize;
            let (values, remaining) = tail.split_at(length);
            rest = remaining;

            Some((*repeat, values))
        })
    }

    /// Total size in bytes of the initialized storage
    pub fn size(&self) -> i32 {
        self.groups()
            .try_fold(0i32, |total, (repeat, values)| {
                let length = i32::try_from(values.len()).ok()?;

                total.checked_add(repeat.checked_mul(length)?.checked_mul(WORD_SIZE)?)
            })
            .unwrap_or_else(|| internal_error!("initializer {:?} overflows a word", self.0))
    }

    /// The words in memory order
    pub fn expand(&self) -> Vec<i32> {
        self.groups()
            .flat_map(|(repeat, values)| {
                std::iter::repeat_n(values, repeat.max(0) as usize).flatten().copied()
            })
            .collect()
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Layout {
    /// One frame per function definition
    pub frames: BTreeMap<NodeId, Frame>,
    /// One access per variable and parameter definition
    pub accesses: BTreeMap<NodeId, Access>,
}

impl Layout {
    pub fn compute(program: &Program) -> Self {
        let mut calculator = LayoutCalculator {
            layout: Layout::default(),
            accumulators: Vec::new(),
            used_labels: HashSet::new(),
        };

        for definition in &program.definitions {
            calculator.lay_out_definition(definition);
        }

        calculator.layout
    }

    pub fn frame(&self, id: NodeId) -> &Frame {
        self.frames
            .get(&id)
            .unwrap_or_else(|| internal_error!("no frame for function node {id:?}"))
    }

    pub fn access(&self, id: NodeId) -> &Access {
        self.accesses
            .get(&id)
            .unwrap_or_else(|| internal_error!("no access for definition node {id:?}"))
    }
}

/// Sizes collected while inside one function body
#[derive(Debug)]
struct FrameAccumulator {
    label: InternedSymbol,
    pars_size: i32,
    vars_size: i32,
}

struct LayoutCalculator {
    layout: Layout,
    accumulators: Vec<FrameAccumulator>,
    used_labels: HashSet<InternedSymbol>,
}

impl LayoutCalculator {
    fn depth(&self) -> u32 {
        self.accumulators.len() as u32
    }

    fn lay_out_definition(&mut self, definition: &Definition) {
        match definition {
            Definition::Function(function) => self.lay_out_function(function),
            Definition::Variable(variable) => self.lay_out_variable(variable),
        }
    }

    /// Top level functions are labelled by name, nested ones by their path
    fn unique_label(&mut self, name: InternedSymbol) -> InternedSymbol {
        let base = match self.accumulators.last() {
            Some(parent) => format!("{}.{}", parent.label, name),
            None => name.to_string(),
        };

        let mut label = InternedSymbol::new(&base);
        let mut suffix = 1;

        while !self.used_labels.insert(label) {
            label = InternedSymbol::new(&format!("{base}.{suffix}"));
            suffix += 1;
        }

        label
    }

    fn lay_out_function(&mut self, function: &FunctionDefinition) {
        let label = self.unique_label(function.name.symbol);

        self.accumulators.push(FrameAccumulator {
            label,
            pars_size: 0,
            vars_size: 0,
        });

        let depth = self.depth();

        for parameter in &function.parameters {
            let Some(accumulator) = self.accumulators.last_mut() else {
                internal_error!("parameter outside of a function");
            };

            let access = Access::Relative {
                offset: accumulator.pars_size + STATIC_LINK_SIZE,
                depth,
                size: WORD_SIZE,
                inits: None,
            };
            accumulator.pars_size += WORD_SIZE;

            self.layout.accesses.insert(parameter.id, access);
        }

        self.lay_out_statements(&function.body);

        let Some(accumulator) = self.accumulators.pop() else {
            internal_error!("frame accumulator stack underflow");
        };

        let frame = Frame {
            name: function.name.symbol,
            label,
            depth,
            pars_size: accumulator.pars_size + STATIC_LINK_SIZE,
            vars_size: accumulator
                .vars_size
                .checked_add(HEADER_SIZE)
                .unwrap_or_else(|| internal_error!("frame of '{}' overflows a word", label)),
        };

        if frame.vars_size < HEADER_SIZE {
            internal_error!(
                "frame of '{}' has vars size {} below the header size",
                frame.name,
                frame.vars_size
            );
        }

        self.layout.frames.insert(function.id, frame);
    }

    fn lay_out_variable(&mut self, variable: &VariableDefinition) {
        let inits = Inits::decode(variable);
        let size = inits.size();
        let depth = self.depth();

        let access = match self.accumulators.last_mut() {
            None => Access::Absolute {
                name: variable.name.symbol,
                size,
                inits: Some(inits),
            },
            Some(accumulator) => {
                let Some((vars_size, offset)) = accumulator
                    .vars_size
                    .checked_add(size)
                    .and_then(|vars_size| Some((vars_size, (-HEADER_SIZE).checked_sub(vars_size)?)))
                else {
                    internal_error!("locals of '{}' overflow a word", accumulator.label);
                };
                accumulator.vars_size = vars_size;

                Access::Relative {
                    offset,
                    depth,
                    size,
                    inits: Some(inits),
                }
            }
        };

        self.layout.accesses.insert(variable.id, access);
    }

    fn lay_out_statements(&mut self, statements: &[Statement]) {
        for statement in statements {
            match &statement.kind {
                StatementKind::Expression(_) | StatementKind::Assignment { .. } => {}
                StatementKind::If {
                    positive, negative, ..
                } => {
                    self.lay_out_statements(positive);
                    self.lay_out_statements(negative);
                }
                StatementKind::While { body, .. } => self.lay_out_statements(body),
                StatementKind::Let { definitions, body } => {
                    for definition in definitions {
                        self.lay_out_definition(definition);
                    }

                    self.lay_out_statements(body);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::frontend::{SourceFile, SourceFileOrigin, parser::Parser};

    fn lay_out(text: &str) -> (Program, Layout) {
        let source = SourceFile::new(text, SourceFileOrigin::Memory);
        let program = Parser::parse_program(&source).unwrap();
        let layout = Layout::compute(&program);

        (program, layout)
    }

    fn frame_named<'a>(layout: &'a Layout, label: &str) -> &'a Frame {
        layout
            .frames
            .values()
            .find(|frame| frame.label.value() == label)
            .unwrap()
    }

    #[test]
    fn decodes_initializer_groups() {
        let (program, _) = lay_out("var v = 3 * 7, 'a', \"hi\"");
        let Definition::Variable(variable) = &program.definitions[0] else {
            panic!("expected a variable");
        };

        let inits = Inits::decode(variable);

        assert_eq!(inits.0, vec![3, 3, 1, 7, 1, 1, 97, 1, 2, 104, 105]);
        assert_eq!(inits.size(), 6 * WORD_SIZE);
        assert_eq!(inits.expand(), vec![7, 7, 7, 97, 104, 105]);
    }

    #[test]
    #[should_panic(expected = "overflows a word")]
    fn oversized_initializer_is_an_internal_error() {
        Inits(vec![1, 1_000_000_000, 1, 1]).size();
    }

    #[test]
    fn largest_legal_global_keeps_its_size() {
        let (program, layout) = lay_out("var big = 268435456 * 1");

        assert_eq!(layout.access(program.definitions[0].id()).size(), MAX_STORAGE_SIZE);
    }

    #[test]
    fn globals_are_absolute() {
        let (program, layout) = lay_out("var x = 3");

        assert_eq!(
            layout.access(program.definitions[0].id()),
            &Access::Absolute {
                name: InternedSymbol::new("x"),
                size: WORD_SIZE,
                inits: Some(Inits(vec![1, 1, 1, 3])),
            }
        );
    }

    #[test]
    fn parameters_and_locals_get_frame_offsets() {
        let (program, layout) = lay_out(indoc! {"
            fun f(a, b) = let var x = 1 var y = 2 * 0 in a end
        "});
        let Definition::Function(function) = &program.definitions[0] else {
            panic!("expected a function");
        };

        let frame = layout.frame(function.id);
        assert_eq!(frame.depth, 1);
        assert_eq!(frame.pars_size, 12);
        assert_eq!(frame.vars_size, 8 + 12);

        assert!(matches!(
            layout.access(function.parameters[0].id),
            Access::Relative { offset: 4, depth: 1, size: 4, .. }
        ));
        assert!(matches!(
            layout.access(function.parameters[1].id),
            Access::Relative { offset: 8, .. }
        ));

        let StatementKind::Let { definitions, .. } = &function.body[0].kind else {
            panic!("expected a let statement");
        };
        assert!(matches!(
            layout.access(definitions[0].id()),
            Access::Relative { offset: -12, size: 4, .. }
        ));
        assert!(matches!(
            layout.access(definitions[1].id()),
            Access::Relative { offset: -20, size: 8, .. }
        ));
    }

    #[test]
    fn nested_functions_are_deeper_and_uniquely_labelled() {
        let (_, layout) = lay_out(indoc! {"
            fun outer() =
                let fun inner() = 1 in inner() end,
                let fun inner() = let fun leaf() = 2 in leaf() end in inner() end
        "});

        assert_eq!(frame_named(&layout, "outer").depth, 1);
        assert_eq!(frame_named(&layout, "outer.inner").depth, 2);
        assert_eq!(frame_named(&layout, "outer.inner.1").depth, 2);
        assert_eq!(frame_named(&layout, "outer.inner.1.leaf").depth, 3);
    }

    #[test]
    fn empty_function_has_minimal_frame() {
        let (program, layout) = lay_out("fun exit(code) fun main()");

        let exit = layout.frame(program.definitions[0].id());
        assert_eq!((exit.pars_size, exit.vars_size), (8, 8));

        let main = layout.frame(program.definitions[1].id());
        assert_eq!((main.pars_size, main.vars_size), (4, 8));
    }
}
