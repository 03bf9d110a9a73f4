//! The back end turns the annotated tree into a program for the abstract stack
//! machine. It runs three passes, each consuming the output of the previous:
//!
//! 1. Frame layout: nesting depths, frame sizes and storage of every variable.
//! 2. Code generation: flat instruction lists per function and per variable,
//!    with structured control flow lowered to labels and jumps.
//! 3. Segment assembly: one code segment behind a small init stub and one data
//!    segment.

use self::{
    codegen::{CodeGenerator, LabelGenerator},
    layout::Layout,
    segments::Segments,
};
use crate::{frontend::AnnotatedTree, report};

pub mod codegen;
pub mod instr;
pub mod layout;
pub mod pretty_print;
pub mod segments;

#[derive(Debug)]
pub struct CompiledProgram {
    pub layout: Layout,
    pub segments: Segments,
}

pub fn compile_program(tree: &AnnotatedTree) -> CompiledProgram {
    let layout = Layout::compute(&tree.program);
    report::info(format!(
        "laid out {} frames and {} variables",
        layout.frames.len(),
        layout.accesses.len()
    ));

    let mut labels = LabelGenerator::new();
    let generated = CodeGenerator::generate(tree, &layout, &mut labels);
    report::info(format!(
        "generated code for {} functions",
        generated.functions.len()
    ));

    let segments = Segments::assemble(tree, &layout, generated);
    report::info(format!(
        "assembled {} bytes of code and {} bytes of data",
        segments.code_size(),
        segments.data_size()
    ));

    CompiledProgram { layout, segments }
}

pub fn compile(tree: &AnnotatedTree) -> Segments {
    compile_program(tree).segments
}
