use colored::Colorize;
use itertools::Itertools;

use super::{
    instr::{CodeKind, DataKind},
    layout::{Access, Layout},
    segments::Segments,
};
use crate::frontend::ast::{Definition, Program, Statement, StatementKind};

/// Lists the code segment followed by the data segment, one instruction per
/// line prefixed with its address and size
pub fn render_segments(segments: &Segments) -> String {
    let data_start = segments.code_size();

    let code = segments.code_with_addresses().map(|(address, instruction)| {
        format!(
            "{} {}",
            address_prefix(address, instruction.kind.size()),
            colored_code(&instruction.kind)
        )
    });
    let data = segments.data_with_offsets().map(|(offset, instruction)| {
        format!(
            "{} {}",
            address_prefix(data_start + offset, instruction.kind.size()),
            colored_data(&instruction.kind)
        )
    });

    std::iter::once("code segment:".bright_white().to_string())
        .chain(code)
        .chain(std::iter::once("data segment:".bright_white().to_string()))
        .chain(data)
        .map(|line| line + "\n")
        .collect()
}

/// [`render_segments`] without colour codes
pub fn render_plain(segments: &Segments) -> String {
    strip_ansi_escapes::strip_str(render_segments(segments))
}

fn address_prefix(address: i32, size: i32) -> String {
    format!("{address:8} [{size}]").bright_black().to_string()
}

fn colored_code(kind: &CodeKind) -> String {
    match kind {
        CodeKind::Label(label) => format!("{label}:").bright_red().to_string(),
        CodeKind::Push(value) => format!("    {} {}", "PUSH".cyan(), value.to_string().purple()),
        CodeKind::Regn(register) => {
            format!("    {} {}", "REGN".cyan(), register.to_string().yellow())
        }
        CodeKind::Oper(oper) => format!("    {} {}", "OPER".cyan(), oper.to_string().white()),
        CodeKind::Name(label) => format!("    {} {}", "NAME".cyan(), label.value().blue()),
        CodeKind::Call(frame) => format!("    {} {}", "CALL".cyan(), frame.label.value().blue()),
        CodeKind::Retn(frame) => format!("    {} {}", "RETN".cyan(), frame.label.value().blue()),
        CodeKind::PopN
        | CodeKind::Load
        | CodeKind::Save
        | CodeKind::Ujmp
        | CodeKind::Cjmp
        | CodeKind::Init => format!("    {}", kind.to_string().cyan()),
    }
}

fn colored_data(kind: &DataKind) -> String {
    match kind {
        DataKind::Label(label) => format!("{label}:").bright_red().to_string(),
        DataKind::Data(value) => format!("    {} {}", "DATA".cyan(), value.to_string().purple()),
        DataKind::Size { size, inits } => {
            let inits = inits
                .as_ref()
                .map(|inits| format!(" [{}]", inits.0.iter().join(", ")))
                .unwrap_or_default();

            format!(
                "    {} {}{}",
                "SIZE".cyan(),
                size.to_string().purple(),
                inits.white()
            )
        }
    }
}

/// Describes the frame of every function and the storage of every variable,
/// nested definitions indented under their function
pub fn render_layout(program: &Program, layout: &Layout) -> String {
    let output: String = definition_lines(&program.definitions, layout, 0)
        .into_iter()
        .map(|line| line + "\n")
        .collect();

    strip_ansi_escapes::strip_str(output)
}

fn definition_lines(definitions: &[Definition], layout: &Layout, level: usize) -> Vec<String> {
    let indent = "    ".repeat(level);

    definitions
        .iter()
        .flat_map(|definition| match definition {
            Definition::Function(function) => {
                let frame = layout.frame(function.id);

                let header = format!(
                    "{indent}{} {} (label {}) depth {} pars {} vars {}",
                    "fun".magenta(),
                    frame.name.value().blue(),
                    frame.label,
                    frame.depth,
                    frame.pars_size,
                    frame.vars_size
                );
                let parameters = function.parameters.iter().map(|parameter| {
                    format!(
                        "{indent}    {} {} {}",
                        "par".magenta(),
                        parameter.name.symbol,
                        describe_access(layout.access(parameter.id))
                    )
                });

                std::iter::once(header)
                    .chain(parameters)
                    .chain(statement_lines(&function.body, layout, level + 1))
                    .collect_vec()
            }
            Definition::Variable(variable) => vec![format!(
                "{indent}{} {} {}",
                "var".magenta(),
                variable.name.symbol,
                describe_access(layout.access(variable.id))
            )],
        })
        .collect()
}

fn statement_lines(statements: &[Statement], layout: &Layout, level: usize) -> Vec<String> {
    statements
        .iter()
        .flat_map(|statement| match &statement.kind {
            StatementKind::Expression(_) | StatementKind::Assignment { .. } => Vec::new(),
            StatementKind::If {
                positive, negative, ..
            } => {
                let mut lines = statement_lines(positive, layout, level);
                lines.extend(statement_lines(negative, layout, level));
                lines
            }
            StatementKind::While { body, .. } => statement_lines(body, layout, level),
            StatementKind::Let { definitions, body } => {
                let mut lines = definition_lines(definitions, layout, level);
                lines.extend(statement_lines(body, layout, level));
                lines
            }
        })
        .collect()
}

fn describe_access(access: &Access) -> String {
    let inits = access
        .inits()
        .map(|inits| format!(" inits [{}]", inits.0.iter().join(", ")))
        .unwrap_or_default();

    match access {
        Access::Relative {
            offset,
            depth,
            size,
            ..
        } => format!("offset {offset} depth {depth} size {size}{inits}"),
        Access::Absolute { name, size, .. } => format!("absolute {name} size {size}{inits}"),
    }
}
