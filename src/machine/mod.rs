//! The abstract stack machine executing assembled segments.
//!
//! Memory is one byte array. The code segment sits at address 0 and is only
//! reachable through the program counter, the data segment follows it, the heap
//! grows upward from the end of data and the stack grows downward from the top.

use std::io::{BufRead, Write};

use hashbrown::HashMap;
use strum::IntoEnumIterator;

use self::{
    error::{RuntimeError, RuntimeErrorKind},
    memory::Memory,
    syscall::{Completion, SystemFunction},
};
use crate::{
    backend::{
        instr::{CodeInstruction, CodeKind, DataKind, Oper, Register},
        layout::{Frame, HEADER_SIZE, WORD_SIZE},
        segments::Segments,
    },
    frontend::intern::InternedSymbol,
    report,
};

pub mod error;
pub mod memory;
pub mod syscall;

#[derive(Debug, Clone)]
pub struct Config {
    /// Bytes of memory shared by code, data, heap and stack
    pub memory_size: usize,
    /// Log every executed instruction
    pub trace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory_size: 1 << 20,
            trace: false,
        }
    }
}

pub struct Machine<R: BufRead, W: Write> {
    config: Config,
    memory: Memory,
    /// Executable instructions, labels removed
    program: Vec<CodeInstruction>,
    index_of_address: HashMap<i32, usize>,
    labels: HashMap<InternedSymbol, i32>,
    pc: i32,
    sp: i32,
    fp: i32,
    heap_end: i32,
    /// Labels of the active functions, outermost first
    call_stack: Vec<InternedSymbol>,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Machine<R, W> {
    /// Loads the segments: resolves labels and writes the data segment with
    /// its initial contents into memory
    pub fn new(
        segments: &Segments,
        config: Config,
        input: R,
        output: W,
    ) -> Result<Self, RuntimeError> {
        let memory_size = i32::try_from(config.memory_size).unwrap_or(i32::MAX) & !(WORD_SIZE - 1);
        let code_size = segments.code_size();
        let data_end = code_size
            .checked_add(segments.data_size())
            .filter(|end| *end <= memory_size)
            .ok_or(RuntimeErrorKind::OutOfMemory(segments.data_size()))?;

        let mut labels = HashMap::new();
        let mut program = Vec::new();
        let mut index_of_address = HashMap::new();

        for (address, instruction) in segments.code_with_addresses() {
            match &instruction.kind {
                CodeKind::Label(label) => define_label(&mut labels, *label, address)?,
                _ => {
                    index_of_address.insert(address, program.len());
                    program.push(instruction.clone());
                }
            }
        }

        let mut memory = Memory::new(memory_size, code_size);

        for (offset, instruction) in segments.data_with_offsets() {
            let address = code_size + offset;

            match &instruction.kind {
                DataKind::Label(label) => define_label(&mut labels, *label, address)?,
                DataKind::Data(value) => memory.write_word(address, *value)?,
                DataKind::Size {
                    inits: Some(inits), ..
                } => memory.write_words(address, &inits.expand())?,
                DataKind::Size { inits: None, .. } => {}
            }
        }

        for function in SystemFunction::iter() {
            labels
                .entry(InternedSymbol::new(function.as_ref()))
                .or_insert(function.address());
        }

        for instruction in &program {
            match instruction.kind {
                CodeKind::Name(label) if !labels.contains_key(&label) => {
                    return Err(RuntimeErrorKind::UndefinedLabel(label.to_string()).into());
                }
                _ => {}
            }
        }

        report::info(format!(
            "loaded {} instructions, heap starts at {}",
            program.len(),
            align_up(data_end)
        ));

        Ok(Self {
            config,
            memory,
            program,
            index_of_address,
            labels,
            pc: 0,
            sp: memory_size,
            fp: memory_size,
            heap_end: align_up(data_end),
            call_stack: Vec::new(),
            input,
            output,
        })
    }

    /// Runs until the program calls `exit` and returns the exit code
    pub fn run(&mut self) -> Result<i32, RuntimeError> {
        let result = self.execute();
        let flushed = self.output.flush();

        let code = result.map_err(|kind| self.fault(kind))?;
        flushed.map_err(|error| self.fault(error.into()))?;

        Ok(code)
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Resolved address of a label
    pub fn address_of(&self, label: InternedSymbol) -> Result<i32, RuntimeErrorKind> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| RuntimeErrorKind::UndefinedLabel(label.to_string()))
    }

    fn fault(&self, kind: RuntimeErrorKind) -> RuntimeError {
        RuntimeError::new(kind).with_call_stack(
            self.call_stack
                .iter()
                .map(|label| label.to_string())
                .collect(),
        )
    }

    fn execute(&mut self) -> Result<i32, RuntimeErrorKind> {
        loop {
            if let Some(code) = self.step()? {
                return Ok(code);
            }
        }
    }

    /// Executes one instruction. Returns the exit code once `exit` was called.
    fn step(&mut self) -> Result<Option<i32>, RuntimeErrorKind> {
        let Some(&index) = self.index_of_address.get(&self.pc) else {
            return Err(RuntimeErrorKind::InvalidJump(self.pc));
        };
        let kind = self.program[index].kind.clone();

        if self.config.trace {
            report::trace(format!(
                "{:8} {:<20} SP={} FP={}",
                self.pc,
                kind.to_string(),
                self.sp,
                self.fp
            ));
        }

        self.pc += kind.size();

        match kind {
            CodeKind::Label(_) => {}
            CodeKind::Push(value) => self.push(value)?,
            CodeKind::PopN => {
                let bytes = self.pop()?;
                self.move_stack_top(bytes)?;
            }
            CodeKind::Regn(Register::FramePointer) => {
                let fp = self.fp;
                self.push(fp)?;
            }
            CodeKind::Oper(oper) => self.operate(oper)?,
            CodeKind::Load => {
                let address = self.pop()?;
                let value = self.memory.read_word(address)?;
                self.push(value)?;
            }
            CodeKind::Save => {
                let address = self.pop()?;
                let value = self.pop()?;
                self.memory.write_word(address, value)?;
            }
            CodeKind::Name(label) => {
                let address = self.address_of(label)?;
                self.push(address)?;
            }
            CodeKind::Call(frame) => {
                let target = self.pop()?;
                return self.call(target, &frame);
            }
            CodeKind::Retn(frame) => self.ret(&frame)?,
            CodeKind::Ujmp => {
                let target = self.pop()?;
                self.jump(target)?;
            }
            CodeKind::Cjmp => {
                let negative = self.pop()?;
                let positive = self.pop()?;
                let condition = self.pop()?;

                self.jump(if condition != 0 { positive } else { negative })?;
            }
            CodeKind::Init => {
                let encoding = self.pop()?;
                let destination = self.pop()?;
                self.initialize(destination, encoding)?;
            }
        }

        Ok(None)
    }

    fn push(&mut self, value: i32) -> Result<(), RuntimeErrorKind> {
        let sp = self.sp - WORD_SIZE;
        self.check_stack(sp)?;

        self.memory.write_word(sp, value)?;
        self.sp = sp;

        Ok(())
    }

    fn pop(&mut self) -> Result<i32, RuntimeErrorKind> {
        let value = self.memory.read_word(self.sp)?;
        self.sp += WORD_SIZE;

        Ok(value)
    }

    fn move_stack_top(&mut self, bytes: i32) -> Result<(), RuntimeErrorKind> {
        let sp = self
            .sp
            .checked_add(bytes)
            .filter(|sp| *sp <= self.memory.size())
            .ok_or(RuntimeErrorKind::InvalidAddress(self.sp.wrapping_add(bytes)))?;
        self.check_stack(sp)?;

        self.sp = sp;

        Ok(())
    }

    fn check_stack(&self, sp: i32) -> Result<(), RuntimeErrorKind> {
        if sp < self.heap_end {
            return Err(RuntimeErrorKind::StackOverflow {
                stack_pointer: sp,
                heap_end: self.heap_end,
            });
        }

        Ok(())
    }

    fn operate(&mut self, oper: Oper) -> Result<(), RuntimeErrorKind> {
        let y = self.pop()?;
        let x = if oper.is_unary() { 0 } else { self.pop()? };

        let result = match oper {
            Oper::Add => x.wrapping_add(y),
            Oper::Mul => x.wrapping_mul(y),
            Oper::RSub => y.wrapping_sub(x),
            Oper::RDiv | Oper::RMod if x == 0 => return Err(RuntimeErrorKind::DivisionByZero),
            Oper::RDiv => y.wrapping_div(x),
            Oper::RMod => y.wrapping_rem(x),
            Oper::Equ => i32::from(x == y),
            Oper::Neq => i32::from(x != y),
            Oper::Lth => i32::from(x < y),
            Oper::Gth => i32::from(x > y),
            Oper::Leq => i32::from(x <= y),
            Oper::Geq => i32::from(x >= y),
            Oper::And => i32::from(x != 0 && y != 0),
            Oper::Or => i32::from(x != 0 || y != 0),
            Oper::Not => i32::from(y == 0),
            Oper::Neg => y.wrapping_neg(),
        };

        self.push(result)
    }

    fn jump(&mut self, target: i32) -> Result<(), RuntimeErrorKind> {
        if !self.index_of_address.contains_key(&target) {
            return Err(RuntimeErrorKind::InvalidJump(target));
        }

        self.pc = target;

        Ok(())
    }

    /// The static link is on top of the stack, the arguments below it
    fn call(&mut self, target: i32, frame: &Frame) -> Result<Option<i32>, RuntimeErrorKind> {
        self.call_stack.push(frame.label);

        if let Some(function) = SystemFunction::from_address(target) {
            return match self.call_system_function(function, frame)? {
                Completion::Return => {
                    self.call_stack.pop();
                    Ok(None)
                }
                Completion::Exit(code) => Ok(Some(code)),
            };
        }

        let return_address = self.pc;
        let caller_fp = self.fp;

        self.jump(target)?;
        self.fp = self.sp;
        self.push(caller_fp)?;
        self.push(return_address)?;

        Ok(None)
    }

    fn ret(&mut self, frame: &Frame) -> Result<(), RuntimeErrorKind> {
        let kept = self.pop()?;
        let result = self.pop()?;

        let expected = self.fp - frame.vars_size;
        if self.sp != expected {
            return Err(RuntimeErrorKind::FrameMismatch {
                function: frame.label.to_string(),
                expected,
                actual: self.sp,
            });
        }

        let caller_fp = self.memory.read_word(self.fp - WORD_SIZE)?;
        let return_address = self.memory.read_word(self.fp - HEADER_SIZE)?;

        let destination = self.fp + kept;
        self.memory.write_word(destination, result)?;
        self.sp = destination;
        self.fp = caller_fp;
        self.call_stack.pop();

        self.jump(return_address)
    }

    /// Expands the initializer encoding stored at `encoding` into memory
    /// starting at `destination`
    fn initialize(&mut self, destination: i32, encoding: i32) -> Result<(), RuntimeErrorKind> {
        let groups = self.memory.read_word(encoding)?;
        let mut source = word_after(encoding, 1);
        let mut target = destination;

        for _ in 0..groups {
            let repeat = self.memory.read_word(source)?;
            let length = self.memory.read_word(word_after(source, 1))?;
            let values = word_after(source, 2);

            for _ in 0..repeat {
                for index in 0..length {
                    let value = self.memory.read_word(word_after(values, index))?;
                    self.memory.write_word(target, value)?;
                    target = word_after(target, 1);
                }
            }

            source = word_after(values, length);
        }

        Ok(())
    }
}

/// Compiles nothing, just loads and runs
pub fn run_segments<R: BufRead, W: Write>(
    segments: &Segments,
    config: Config,
    input: R,
    output: W,
) -> Result<i32, RuntimeError> {
    Machine::new(segments, config, input, output)?.run()
}

fn define_label(
    labels: &mut HashMap<InternedSymbol, i32>,
    label: InternedSymbol,
    address: i32,
) -> Result<(), RuntimeErrorKind> {
    if labels.insert(label, address).is_some() {
        return Err(RuntimeErrorKind::DuplicateLabel(label.to_string()));
    }

    Ok(())
}

fn word_after(address: i32, words: i32) -> i32 {
    address.wrapping_add(words.wrapping_mul(WORD_SIZE))
}

fn align_up(address: i32) -> i32 {
    (address + WORD_SIZE - 1) & !(WORD_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::{
        backend::{compile, instr::DataInstruction},
        frontend::{SourceFile, SourceFileOrigin, analyze, lexer::Span},
    };

    fn compile_text(text: &str) -> Segments {
        let source = SourceFile::new(text, SourceFileOrigin::Memory).with_prelude();

        compile(&analyze(&source).unwrap())
    }

    fn run_with_input(text: &str, input: &str) -> (Result<i32, RuntimeError>, String) {
        let segments = compile_text(text);
        let mut machine =
            Machine::new(&segments, Config::default(), input.as_bytes(), Vec::new()).unwrap();
        let result = machine.run();

        (result, String::from_utf8(machine.into_output()).unwrap())
    }

    fn run(text: &str) -> Result<i32, RuntimeError> {
        run_with_input(text, "").0
    }

    #[rstest]
    #[case("fun main() = 42", 42)]
    #[case("fun main() = 7 - 2 - 1", 4)]
    #[case("fun main() = 17 / 5 * 5 + 17 % 5", 17)]
    #[case("fun main() = -3 + +1", -2)]
    #[case("fun main() = (1 < 2) + (2 <= 2) + (3 > 4) + (4 >= 5)", 2)]
    #[case("fun main() = (1 == 1) && !(2 != 2) || 0", 1)]
    #[case("fun main() = if 0 then 1 end", 0)]
    fn evaluates_expressions(#[case] text: &str, #[case] code: i32) {
        assert_eq!(run(text), Ok(code));
    }

    #[test]
    fn recursion() {
        let text = indoc! {"
            fun fact(n) = let var r = 1 in if n > 1 then r = n * fact(n - 1) end, r end
            fun main() = fact(5)
        "};

        assert_eq!(run(text), Ok(120));
    }

    #[test]
    fn output_system_functions() {
        let (result, output) =
            run_with_input("fun main() = putstr(\"hi\"), putchr(10), putint(-5), 3", "");

        assert_eq!(result, Ok(3));
        assert_eq!(output, "hi\n-5");
    }

    #[test]
    fn input_system_functions() {
        let (result, _) = run_with_input(
            "fun main() = let var n = 0 in n = getint(), n + getchr() end",
            "40\nB",
        );

        assert_eq!(result, Ok(40 + 'B' as i32));
    }

    #[test]
    fn getchr_returns_minus_one_at_end_of_input() {
        assert_eq!(run("fun main() = getchr()"), Ok(-1));
    }

    #[test]
    fn globals_are_initialized_at_load_time() {
        let text = indoc! {"
            var a = 2 * 7, 9
            fun main() = (^a)^ + (^a + 4)^ * 10 + (^a + 8)^ * 100
        "};

        assert_eq!(run(text), Ok(7 + 70 + 900));
    }

    #[test]
    fn locals_are_initialized_on_every_entry() {
        let text = indoc! {"
            fun f() = let var x = 5 in x = x + 1, x end
            fun main() = f() + f()
        "};

        assert_eq!(run(text), Ok(12));
    }

    #[test]
    fn heap_blocks_are_word_aligned() {
        let text = indoc! {"
            fun main() = let var p = 0 var q = 0 in
                p = new(6), q = new(4), p^ = 1, q^ = 2, q - p
            end
        "};

        assert_eq!(run(text), Ok(8));
    }

    #[test]
    fn division_by_zero_reports_call_stack() {
        let error = run("fun f(x) = 10 / x fun main() = f(0)").unwrap_err();

        assert_eq!(error.kind, RuntimeErrorKind::DivisionByZero);
        assert_eq!(error.call_stack, vec!["main".to_owned(), "f".to_owned()]);
    }

    #[test]
    fn unbounded_recursion_overflows_the_stack() {
        let segments = compile_text("fun f(n) = f(n + 1) fun main() = f(0)");
        let config = Config {
            memory_size: 4096,
            ..Config::default()
        };
        let error = run_segments(&segments, config, &b""[..], Vec::new()).unwrap_err();

        assert!(matches!(error.kind, RuntimeErrorKind::StackOverflow { .. }));
    }

    #[test]
    fn bodiless_function_without_implementation_is_undefined() {
        let segments = compile_text("fun missing() fun main() = missing()");
        let error = Machine::new(&segments, Config::default(), &b""[..], Vec::new())
            .err()
            .unwrap();

        assert_eq!(error.kind, RuntimeErrorKind::UndefinedLabel("missing".to_owned()));
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let mut segments = compile_text("fun main() = 0");
        segments.data.push(DataInstruction {
            span: Span::default(),
            kind: DataKind::Label(InternedSymbol::new("main")),
        });
        let error = Machine::new(&segments, Config::default(), &b""[..], Vec::new())
            .err()
            .unwrap();

        assert_eq!(error.kind, RuntimeErrorKind::DuplicateLabel("main".to_owned()));
    }

    #[test]
    fn program_too_large_for_memory() {
        let segments = compile_text("var big = 1000 * 0 fun main() = 0");
        let config = Config {
            memory_size: 256,
            ..Config::default()
        };
        let error = Machine::new(&segments, config, &b""[..], Vec::new())
            .err()
            .unwrap();

        assert!(matches!(error.kind, RuntimeErrorKind::OutOfMemory(_)));
    }

    #[test]
    fn unbalanced_frame_is_detected_at_return() {
        let main = Frame {
            name: InternedSymbol::new("main"),
            label: InternedSymbol::new("main"),
            depth: 1,
            pars_size: 4,
            vars_size: 8,
        };
        let exit = Frame {
            name: InternedSymbol::new("exit"),
            label: InternedSymbol::new("exit"),
            depth: 1,
            pars_size: 8,
            vars_size: 8,
        };
        let code = [
            CodeKind::Push(0),
            CodeKind::Name(main.label),
            CodeKind::Call(main.clone()),
            CodeKind::Push(0),
            CodeKind::Name(exit.label),
            CodeKind::Call(exit),
            CodeKind::Label(main.label),
            CodeKind::Push(1),
            CodeKind::Push(2),
            CodeKind::Push(0),
            CodeKind::Retn(main),
        ]
        .into_iter()
        .map(|kind| CodeInstruction {
            span: Span::default(),
            kind,
        })
        .collect();
        let segments = Segments {
            code,
            data: Vec::new(),
        };

        let error = run_segments(&segments, Config::default(), &b""[..], Vec::new()).unwrap_err();

        assert!(matches!(error.kind, RuntimeErrorKind::FrameMismatch { .. }));
        assert_eq!(error.call_stack, vec!["main".to_owned()]);
    }

    #[test]
    fn reading_code_as_data_is_invalid() {
        let error = run("fun main() = let var p = 0 in p = 3, p^ end").unwrap_err();

        assert_eq!(error.kind, RuntimeErrorKind::InvalidAddress(3));
    }
}
