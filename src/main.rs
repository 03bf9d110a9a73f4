use std::{
    io,
    path::{Path, PathBuf},
    process,
};

use clap::Parser as ClapParser;
use pinsc::{
    backend::{
        compile_program,
        pretty_print::{render_layout, render_segments},
    },
    frontend::{AnnotatedTree, SourceFile, SourceFileOrigin, analyze},
    machine::{Config, run_segments},
    report,
};

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Program to compile and run
    source_file: Option<PathBuf>,

    /// Anything after the source file is ignored
    #[arg(hide = true)]
    extra_arguments: Vec<String>,

    /// Print the syntax tree
    #[arg(long)]
    dump_ast: bool,

    /// Print frames and variable storage
    #[arg(long)]
    dump_layout: bool,

    /// Print the code and data segments
    #[arg(long)]
    dump_code: bool,

    /// Log every executed instruction to stderr
    #[arg(long)]
    trace: bool,

    #[arg(long)]
    no_color: bool,

    /// Report what every compilation phase produced
    #[arg(long)]
    verbose: bool,

    /// Memory of the machine in bytes
    #[arg(long, value_name = "BYTES", default_value_t = Config::default().memory_size)]
    memory: usize,
}

fn main() {
    let args = Args::parse();

    if args.no_color {
        colored::control::set_override(false);
    }
    report::set_verbose(args.verbose);

    let Some(path) = args.source_file.as_deref() else {
        report::error("Missing source file!");
        process::exit(1);
    };

    if !args.extra_arguments.is_empty() {
        report::warning(format!(
            "Ignoring extra arguments: {}",
            args.extra_arguments.join(" ")
        ));
    }

    let source_file = read_source_file(path).with_prelude();

    let tree = match analyze(&source_file) {
        Ok(tree) => tree,
        Err(error) => {
            report::error(error.render(&source_file));
            process::exit(1);
        }
    };

    process::exit(compile_and_run(&args, &tree));
}

fn read_source_file(path: &Path) -> SourceFile {
    if !path.is_file() {
        report::error(format!("Source file '{}' does not exist!", path.display()));
        process::exit(1);
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => SourceFile::new(contents, SourceFileOrigin::File(path.to_owned())),
        Err(error) => {
            report::error(format!("Failed to read '{}': {error}", path.display()));
            process::exit(1);
        }
    }
}

/// Returns the exit code of the program, or 1 if it faulted
fn compile_and_run(args: &Args, tree: &AnnotatedTree) -> i32 {
    if args.dump_ast {
        println!("{:#?}", tree.program);
    }

    let compiled = compile_program(tree);

    if args.dump_layout {
        print!("{}", render_layout(&tree.program, &compiled.layout));
    }

    if args.dump_code {
        print!("{}", render_segments(&compiled.segments));
    }

    let config = Config {
        memory_size: args.memory,
        trace: args.trace,
    };

    match run_segments(&compiled.segments, config, io::stdin().lock(), io::stdout().lock()) {
        Ok(code) => code,
        Err(error) => {
            report::error(error);
            1
        }
    }
}
