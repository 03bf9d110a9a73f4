use indoc::indoc;
use pinsc::{
    backend::{compile, segments::Segments},
    frontend::{SourceFile, SourceFileOrigin, analyze},
    machine::{Config, Machine, error::RuntimeErrorKind},
};
use pretty_assertions::assert_eq;

fn compile_text(text: &str) -> Segments {
    let source = SourceFile::new(text, SourceFileOrigin::Memory).with_prelude();

    compile(&analyze(&source).unwrap())
}

fn run(text: &str, input: &str) -> (i32, String) {
    let segments = compile_text(text);
    let mut machine =
        Machine::new(&segments, Config::default(), input.as_bytes(), Vec::new()).unwrap();
    let code = machine.run().unwrap();

    (code, String::from_utf8(machine.into_output()).unwrap())
}

#[test]
fn global_update_then_exit() {
    let (code, _) = run("var x = 3 fun main() = x = x + 2, exit(x)", "");

    assert_eq!(code, 5);
}

#[test]
fn arguments_are_evaluated_right_to_left() {
    let text = indoc! {"
        var counter = 0
        fun next() = counter = counter + 1, counter
        fun pair(a, b) = a * 10 + b
        fun main() = pair(next(), next())
    "};

    assert_eq!(run(text, "").0, 21);
}

#[test]
fn nested_function_assigns_outer_local() {
    let text = indoc! {"
        fun main() = let
            var x = 1
            fun a() = let fun b() = x = x + 41 in b() end
        in
            a(), x
        end
    "};

    assert_eq!(run(text, "").0, 42);
}

#[test]
fn parameters_of_enclosing_functions_are_visible() {
    let text = indoc! {"
        fun add(a) = let fun inner(b) = a + b in inner(2) end
        fun main() = add(40)
    "};

    assert_eq!(run(text, "").0, 42);
}

#[test]
fn compiling_twice_gives_identical_segments() {
    let text = indoc! {r#"
        var table = 3 * 1, 2 * 'x', "end"
        fun main() = let var i = 0 in
            while i < 3 do
                if i == 1 then putstr("one") else putint(i) end,
                i = i + 1
            end
        end
    "#};

    assert_eq!(compile_text(text), compile_text(text));
}

#[test]
fn strings_and_loops() {
    let text = indoc! {r#"
        fun main() = let var i = 0 in
            while i < 3 do
                putstr("n="), putint(i), putchr('\0A'),
                i = i + 1
            end,
            i
        end
    "#};

    let (code, output) = run(text, "");

    assert_eq!(code, 3);
    assert_eq!(output, "n=0\nn=1\nn=2\n");
}

#[test]
fn echo_input_until_end() {
    let text = indoc! {"
        fun main() = let var c = 0 in
            c = getchr(),
            while c != -1 do
                putchr(c), c = getchr()
            end,
            0
        end
    "};

    assert_eq!(run(text, "abc").1, "abc");
}

#[test]
fn arrays_on_the_heap() {
    let text = indoc! {"
        fun main() = let var a = 0 var i = 0 var sum = 0 in
            a = new(40),
            while i < 10 do (a + i * 4)^ = i, i = i + 1 end,
            i = 0,
            while i < 10 do sum = sum + (a + i * 4)^, i = i + 1 end,
            del(a),
            sum
        end
    "};

    assert_eq!(run(text, "").0, 45);
}

#[test]
fn exit_from_nested_call() {
    let text = indoc! {"
        fun deep(n) = if n == 0 then exit(9) else deep(n - 1) end
        fun main() = deep(5), 1
    "};

    assert_eq!(run(text, "").0, 9);
}

#[test]
fn malformed_input_for_getint() {
    let segments = compile_text("fun main() = getint()");
    let mut machine =
        Machine::new(&segments, Config::default(), "twelve\n".as_bytes(), Vec::new()).unwrap();

    assert!(matches!(machine.run().unwrap_err().kind, RuntimeErrorKind::Io(_)));
}
