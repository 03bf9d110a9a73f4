//! Functions the machine implements natively. They are declared without a body
//! in the prelude, so the compiler treats them as ordinary functions, and
//! their labels resolve to reserved negative addresses.

use std::io::{BufRead, Write};

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator};

use super::{Machine, error::RuntimeErrorKind};
use crate::backend::layout::{Frame, STATIC_LINK_SIZE, WORD_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, EnumIter, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum SystemFunction {
    Exit,
    GetInt,
    PutInt,
    GetChr,
    PutChr,
    PutStr,
    New,
    Del,
}

impl SystemFunction {
    pub fn address(self) -> i32 {
        -1 - self as i32
    }

    pub fn from_address(address: i32) -> Option<Self> {
        let index = usize::try_from(-1 - address).ok()?;

        Self::iter().nth(index)
    }
}

/// What the caller sees after a system function returns
pub(super) enum Completion {
    Return,
    Exit(i32),
}

impl<R: BufRead, W: Write> Machine<R, W> {
    /// The `index`th argument of a call whose static link is on top of the
    /// stack
    fn argument(&self, index: i32) -> Result<i32, RuntimeErrorKind> {
        self.memory
            .read_word(self.sp + STATIC_LINK_SIZE + index * WORD_SIZE)
    }

    /// Runs a system function and performs the return half of the call
    /// protocol on its behalf
    pub(super) fn call_system_function(
        &mut self,
        function: SystemFunction,
        frame: &Frame,
    ) -> Result<Completion, RuntimeErrorKind> {
        let result = match function {
            SystemFunction::Exit => return Ok(Completion::Exit(self.argument(0)?)),
            SystemFunction::GetInt => {
                let mut line = String::new();

                if self.input.read_line(&mut line)? == 0 {
                    return Err(RuntimeErrorKind::Io("unexpected end of input".to_owned()));
                }

                line.trim().parse().map_err(|_| {
                    RuntimeErrorKind::Io(format!("'{}' is not an integer", line.trim()))
                })?
            }
            SystemFunction::PutInt => {
                let value = self.argument(0)?;
                write!(self.output, "{value}")?;
                0
            }
            SystemFunction::GetChr => {
                let mut byte = [0];

                match self.input.read(&mut byte)? {
                    0 => -1,
                    _ => byte[0] as i32,
                }
            }
            SystemFunction::PutChr => {
                let character = self.argument(0)?;
                self.output.write_all(&[character as u8])?;
                0
            }
            SystemFunction::PutStr => {
                let mut address = self.argument(0)?;

                loop {
                    let character = self.memory.read_word(address)?;

                    if character == 0 {
                        break;
                    }

                    self.output.write_all(&[character as u8])?;
                    address += WORD_SIZE;
                }

                0
            }
            SystemFunction::New => {
                let size = self.argument(0)?;
                self.allocate(size)?
            }
            SystemFunction::Del => 0,
        };

        let destination = self.sp + frame.pars_size - STATIC_LINK_SIZE;
        self.memory.write_word(destination, result)?;
        self.sp = destination;

        Ok(Completion::Return)
    }

    /// Bump allocation from the end of the heap, word aligned
    fn allocate(&mut self, size: i32) -> Result<i32, RuntimeErrorKind> {
        let aligned = size
            .checked_add(WORD_SIZE - 1)
            .filter(|_| size >= 0)
            .map(|size| size & !(WORD_SIZE - 1))
            .ok_or(RuntimeErrorKind::OutOfMemory(size))?;

        let start = self.heap_end;
        let end = start
            .checked_add(aligned)
            .filter(|end| *end <= self.sp)
            .ok_or(RuntimeErrorKind::OutOfMemory(size))?;

        self.heap_end = end;

        Ok(start)
    }
}
