//! Diagnostics printed by the compiler driver. User facing messages go to
//! stderr with a coloured severity prefix; internal errors abort with a panic.

use std::{
    fmt::Display,
    sync::atomic::{AtomicBool, Ordering},
};

use colored::Colorize;

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Enables `info` output
pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

pub fn info(message: impl Display) {
    if is_verbose() {
        eprintln!("{}: {message}", "info".blue());
    }
}

/// One line of the machine's execution trace
pub fn trace(message: impl Display) {
    eprintln!("{}: {message}", "trace".bright_black());
}

pub fn warning(message: impl Display) {
    eprintln!("{}: {message}", "warning".yellow());
}

pub fn error(message: impl Display) {
    eprintln!("{}: {message}", "error".red());
}

/// Aborts compilation because of a bug in the compiler itself. Use the
/// [`internal_error!`] macro so the location gets attached.
pub fn abort_internal(message: String) -> ! {
    panic!("internal compiler error: {message}")
}

/// Appends a backtrace of the current thread, captured even when
/// `RUST_BACKTRACE` is unset
pub fn with_backtrace(message: String) -> String {
    format!(
        "{message}\nstack backtrace:\n{}",
        std::backtrace::Backtrace::force_capture()
    )
}

macro_rules! function {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        type_name_of(f)
            .rsplit("::")
            .find(|&part| part != "f" && part != "{{closure}}")
            .unwrap_or("<unknown>")
    }};
}

macro_rules! internal_error {
    ($($arg:tt)+) => {{
        let message = format!($($arg)+);

        #[cfg(feature = "error-backtrace")]
        let message = format!(
            "{}\n{}: {}::{} {}",
            message,
            colored::Colorize::blue("backtrace"),
            module_path!(),
            $crate::report::function!(),
            colored::Colorize::white(
                format!("(at {}:{}:{})", file!(), line!(), column!()).as_str()
            )
        );

        #[cfg(feature = "error-backtrace")]
        let message = $crate::report::with_backtrace(message);

        $crate::report::abort_internal(message)
    }};
}

pub(crate) use function;
pub(crate) use internal_error;
