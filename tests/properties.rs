use itertools::Itertools;
use pinsc::{
    backend::{
        compile,
        instr::CodeKind,
        layout::{Access, HEADER_SIZE, Layout, STATIC_LINK_SIZE, WORD_SIZE},
        segments::Segments,
    },
    frontend::{AnnotatedTree, SourceFile, SourceFileOrigin, analyze},
    machine::{Config, run_segments},
};
use proptest::prelude::*;

fn analyze_text(text: &str) -> AnnotatedTree {
    let source = SourceFile::new(text, SourceFileOrigin::Memory).with_prelude();

    analyze(&source).unwrap()
}

fn evaluate(text: &str) -> i32 {
    let segments = compile(&analyze_text(text));

    run_segments(&segments, Config::default(), &b""[..], Vec::new()).unwrap()
}

/// The mnemonic of the last operator instruction in `main`
fn last_operator(segments: &Segments) -> String {
    segments
        .code
        .iter()
        .filter_map(|instruction| match instruction.kind {
            CodeKind::Oper(oper) => Some(oper.to_string()),
            _ => None,
        })
        .last()
        .unwrap()
}

/// A function `f` with `parameters` parameters whose locals are split between
/// two nested `let`s
fn function_with_locals(parameters: usize, locals: &[(i32, i32)]) -> String {
    let (outer, inner) = locals.split_at(locals.len() / 2);
    let declare = |locals: &[(i32, i32)], prefix: &str| {
        locals
            .iter()
            .enumerate()
            .map(|(index, (repeat, value))| format!("var {prefix}{index} = {repeat} * {value}"))
            .join(" ")
    };
    let parameters = (0..parameters).map(|index| format!("p{index}")).join(", ");

    let body = match (outer.is_empty(), inner.is_empty()) {
        (true, true) => "0".to_owned(),
        (_, true) => format!("let {} in 0 end", declare(outer, "o")),
        (true, _) => format!("let {} in 0 end", declare(inner, "i")),
        _ => format!(
            "let {} in let {} in 0 end end",
            declare(outer, "o"),
            declare(inner, "i")
        ),
    };

    format!("fun f({parameters}) = {body} fun main() = 0")
}

fn nested_reader(levels: usize) -> String {
    let mut body = "x".to_owned();

    for level in (1..=levels).rev() {
        body = format!("let fun f{level}() = {body} in f{level}() end");
    }

    format!("fun main() = let var x = 7 in {body} end")
}

proptest! {
    #[test]
    fn frames_hold_their_locals(
        parameters in 0usize..5,
        locals in prop::collection::vec((1i32..6, 0i32..100), 0..8),
    ) {
        let tree = analyze_text(&function_with_locals(parameters, &locals));
        let layout = Layout::compute(&tree.program);

        for frame in layout.frames.values() {
            prop_assert!(frame.vars_size >= HEADER_SIZE);
            prop_assert!(frame.pars_size >= STATIC_LINK_SIZE);
        }

        let f = layout
            .frames
            .values()
            .find(|frame| frame.name.value() == "f")
            .unwrap();
        prop_assert_eq!(f.pars_size, (parameters as i32 + 1) * WORD_SIZE);

        let local_ranges = layout
            .accesses
            .values()
            .filter_map(|access| match access {
                Access::Relative { offset, size, .. } if *offset < 0 => Some((*offset, offset + size)),
                _ => None,
            })
            .sorted()
            .collect_vec();

        prop_assert_eq!(local_ranges.len(), locals.len());

        for (start, end) in &local_ranges {
            prop_assert!(*start >= -f.vars_size);
            prop_assert!(*end <= -HEADER_SIZE);
        }

        for ((_, end), (start, _)) in local_ranges.iter().tuple_windows() {
            prop_assert!(end <= start);
        }

        for access in layout.accesses.values() {
            if let Some(inits) = access.inits() {
                prop_assert_eq!(inits.size(), access.size());
            }
        }
    }

    #[test]
    fn static_links_are_followed_once_per_level(levels in 1usize..6) {
        let text = nested_reader(levels);
        let segments = compile(&analyze_text(&text));

        let label = std::iter::once("main".to_owned())
            .chain((1..=levels).map(|level| format!("f{level}")))
            .join(".");
        let entry = segments
            .code
            .iter()
            .position(|instruction| instruction.kind.to_string() == format!("{label}:"))
            .unwrap();
        let loads = segments.code[entry..]
            .iter()
            .skip_while(|instruction| !matches!(instruction.kind, CodeKind::Regn(_)))
            .skip(1)
            .take_while(|instruction| instruction.kind == CodeKind::Load)
            .count();

        prop_assert_eq!(loads, levels);
        prop_assert_eq!(
            run_segments(&segments, Config::default(), &b""[..], Vec::new()).unwrap(),
            7
        );
    }

    #[test]
    fn greater_or_equal_is_lowered_to_less_or_equal(a in -10_000i32..10_000, b in -10_000i32..10_000) {
        let greater_or_equal = format!("fun main() = ({a}) >= ({b})");
        let less_or_equal = format!("fun main() = ({b}) <= ({a})");

        prop_assert_eq!(last_operator(&compile(&analyze_text(&greater_or_equal))), "LEQ");
        prop_assert_eq!(last_operator(&compile(&analyze_text(&less_or_equal))), "GEQ");
        prop_assert_eq!(evaluate(&greater_or_equal), i32::from(a >= b));
        prop_assert_eq!(evaluate(&less_or_equal), i32::from(b <= a));
    }

    #[test]
    fn arithmetic_matches_host(a in -10_000i32..10_000, b in -10_000i32..10_000) {
        prop_assume!(b != 0);

        let text = |operator: &str| format!("fun main() = ({a}) {operator} ({b})");

        prop_assert_eq!(evaluate(&text("+")), a + b);
        prop_assert_eq!(evaluate(&text("-")), a - b);
        prop_assert_eq!(evaluate(&text("*")), a * b);
        prop_assert_eq!(evaluate(&text("/")), a / b);
        prop_assert_eq!(evaluate(&text("%")), a % b);
        prop_assert_eq!(evaluate(&text("<")), i32::from(a < b));
        prop_assert_eq!(evaluate(&text(">")), i32::from(a > b));
    }
}
