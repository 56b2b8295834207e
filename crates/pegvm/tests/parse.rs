//! End-to-end VM scenarios: matching, backtracking, ordered choice,
//! repetition, predicates, actions, memoization and error reporting.

mod util;

use std::cell::Cell;
use std::rc::Rc;

use bumpalo::Bump;
use pegvm::{
    compile, ActionFn, ErrorCause, ErrorList, Grammar, ParseOptions, Position, Rule, Value,
    VmParser,
};
use util::*;

fn parse_with<'a, 'i>(
    arena: &'a Bump,
    g: &Grammar<'a>,
    input: &'i [u8],
    opts: &ParseOptions,
) -> Result<Value<'i>, ErrorList> {
    let program = compile(arena, g).unwrap();
    let parser = VmParser::new(&program, mock_actions(&program), mock_predicates(&program));
    parser.parse("test", input, opts)
}

fn parse<'a, 'i>(arena: &'a Bump, g: &Grammar<'a>, input: &'i [u8]) -> Result<Value<'i>, ErrorList> {
    parse_with(arena, g, input, &ParseOptions::default())
}

fn expected_cause(errs: &ErrorList) -> (&str, char) {
    assert_eq!(errs.len(), 1, "want one error, got: {}", errs);
    match &errs.as_slice()[0].cause {
        ErrorCause::Expected { want, got } => (want, *got),
        other => panic!("want Expected cause, got {:?}", other),
    }
}

#[test]
fn literal_match() {
    let arena = Bump::new();
    let g = grammar(&arena, &[rule("A", lit("a"))]);
    assert_eq!(parse(&arena, &g, b"a").unwrap(), Value::bytes(b"a"));
}

#[test]
fn literal_mismatch_reports_farthest_failure() {
    let arena = Bump::new();
    let g = grammar(&arena, &[rule("A", lit("a"))]);
    let errs = parse(&arena, &g, b"b").unwrap_err();
    let (want, got) = expected_cause(&errs);
    assert_eq!(want, "\"a\"");
    assert_eq!(got, 'b');
    assert_eq!(errs.as_slice()[0].prefix, "test:1:1 (0): rule A");
}

#[test]
fn sequence_yields_ordered_list() {
    let arena = Bump::new();
    let g = grammar(&arena, &[rule("A", seq(&arena, &[lit("a"), lit("b")]))]);
    assert_eq!(
        parse(&arena, &g, b"ab").unwrap(),
        Value::List(vec![Value::bytes(b"a"), Value::bytes(b"b")])
    );
}

#[test]
fn ordered_choice_is_left_biased() {
    let arena = Bump::new();
    let g = grammar(&arena, &[rule("A", choice(&arena, &[lit("a"), lit("b")]))]);
    assert_eq!(parse(&arena, &g, b"a").unwrap(), Value::bytes(b"a"));
    assert_eq!(parse(&arena, &g, b"b").unwrap(), Value::bytes(b"b"));

    let errs = parse(&arena, &g, b"c").unwrap_err();
    let (want, got) = expected_cause(&errs);
    assert_eq!(want, "\"a\"");
    assert_eq!(got, 'c');
}

#[test]
fn losing_alternatives_never_run_actions() {
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[rule(
            "A",
            choice(
                &arena,
                &[action(&arena, lit("a"), "first"), action(&arena, lit("a"), "second")],
            ),
        )],
    );
    let program = compile(&arena, &g).unwrap();

    let first = Rc::new(Cell::new(0u32));
    let second = Rc::new(Cell::new(0u32));
    let actions: Vec<ActionFn> = vec![
        {
            let hits = first.clone();
            action_fn(move |_, _| {
                hits.set(hits.get() + 1);
                Ok(Value::Nil)
            })
        },
        {
            let hits = second.clone();
            action_fn(move |_, _| {
                hits.set(hits.get() + 1);
                Ok(Value::Nil)
            })
        },
    ];
    let parser = VmParser::new(&program, actions, vec![]);
    parser
        .parse("test", b"a", &ParseOptions::default())
        .unwrap();
    assert_eq!(first.get(), 1);
    assert_eq!(second.get(), 0);
}

#[test]
fn zero_or_more() {
    let arena = Bump::new();
    let g = grammar(&arena, &[rule("A", star(&arena, lit("a")))]);
    assert_eq!(
        parse(&arena, &g, b"aaa").unwrap(),
        Value::List(vec![
            Value::bytes(b"a"),
            Value::bytes(b"a"),
            Value::bytes(b"a")
        ])
    );
    // A nullable start rule accepts empty input with the empty list.
    assert_eq!(parse(&arena, &g, b"").unwrap(), Value::List(vec![]));
}

#[test]
fn one_or_more() {
    let arena = Bump::new();
    let g = grammar(&arena, &[rule("A", plus(&arena, lit("a")))]);
    assert_eq!(
        parse(&arena, &g, b"a").unwrap(),
        Value::List(vec![Value::bytes(b"a")])
    );

    let errs = parse(&arena, &g, b"").unwrap_err();
    let (want, got) = expected_cause(&errs);
    assert_eq!(want, "\"a\"");
    assert_eq!(got, '\u{FFFD}');
}

#[test]
fn optional_yields_nil_when_absent() {
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[rule("A", seq(&arena, &[opt(&arena, lit("a")), lit("b")]))],
    );
    assert_eq!(
        parse(&arena, &g, b"ab").unwrap(),
        Value::List(vec![Value::bytes(b"a"), Value::bytes(b"b")])
    );
    assert_eq!(
        parse(&arena, &g, b"b").unwrap(),
        Value::List(vec![Value::Nil, Value::bytes(b"b")])
    );
}

#[test]
fn and_predicate_consumes_nothing() {
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[rule("A", seq(&arena, &[and_pred(&arena, lit("a")), lit("a")]))],
    );
    assert_eq!(
        parse(&arena, &g, b"a").unwrap(),
        Value::List(vec![Value::Nil, Value::bytes(b"a")])
    );
    assert!(parse(&arena, &g, b"b").is_err());
}

#[test]
fn not_any_matches_eof() {
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[rule("A", seq(&arena, &[lit("a"), not_pred(&arena, any())]))],
    );
    assert_eq!(
        parse(&arena, &g, b"a").unwrap(),
        Value::List(vec![Value::bytes(b"a"), Value::Nil])
    );

    // Trailing input makes !. fail; no matcher failed, so no FFP exists.
    let errs = parse(&arena, &g, b"ab").unwrap_err();
    assert!(matches!(
        errs.as_slice()[0].cause,
        ErrorCause::NoMatch
    ));
}

#[test]
fn trailing_input_is_not_anchored_implicitly() {
    let arena = Bump::new();
    let g = grammar(&arena, &[rule("A", lit("a"))]);
    assert_eq!(parse(&arena, &g, b"ab").unwrap(), Value::bytes(b"a"));
}

#[test]
fn sequence_of_choices_accumulates_cleanly() {
    // ('a' / 'b') ('c' / 'd') - losing alternatives must leave no trace
    // on the V stack, or the second cumulation would restart the list.
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[rule(
            "A",
            seq(
                &arena,
                &[
                    choice(&arena, &[lit("a"), lit("b")]),
                    choice(&arena, &[lit("c"), lit("d")]),
                ],
            ),
        )],
    );
    assert_eq!(
        parse(&arena, &g, b"bd").unwrap(),
        Value::List(vec![Value::bytes(b"b"), Value::bytes(b"d")])
    );
    assert!(parse(&arena, &g, b"be").is_err());
}

#[test]
fn backtracking_restores_the_cursor() {
    // ('a' 'b') / 'a' - the first alternative consumes 'a' before failing.
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[rule(
            "A",
            choice(&arena, &[seq(&arena, &[lit("a"), lit("b")]), lit("a")]),
        )],
    );
    assert_eq!(parse(&arena, &g, b"ac").unwrap(), Value::bytes(b"a"));
}

#[test]
fn action_replaces_the_child_value() {
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[rule(
            "A",
            action(&arena, labeled(&arena, "v", lit("a")), "return v"),
        )],
    );
    let program = compile(&arena, &g).unwrap();
    let actions: Vec<ActionFn> = vec![action_fn(|_, args| {
        Ok(args.get("v").cloned().unwrap_or(Value::Nil))
    })];
    let parser = VmParser::new(&program, actions, vec![]);
    assert_eq!(
        parser.parse("test", b"a", &ParseOptions::default()).unwrap(),
        Value::bytes(b"a")
    );
}

#[test]
fn action_sees_match_text_and_position() {
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[rule("A", action(&arena, plus(&arena, lit("a")), "text"))],
    );
    let program = compile(&arena, &g).unwrap();
    let actions: Vec<ActionFn> = vec![action_fn(|cur, _| {
        assert_eq!(cur.pos, Position { line: 1, col: 1, offset: 0 });
        Ok(Value::user(cur.text_str().to_string()))
    })];
    let parser = VmParser::new(&program, actions, vec![]);
    let value = parser.parse("test", b"aaa", &ParseOptions::default()).unwrap();
    assert_eq!(value.as_user::<String>().unwrap(), "aaa");
}

#[test]
fn code_predicates_gate_the_match() {
    let arena = Bump::new();
    // &{T} succeeds, &{F} fails, !{F} succeeds.
    let g = grammar(&arena, &[rule("A", seq(&arena, &[and_code("T"), lit("a")]))]);
    assert_eq!(
        parse(&arena, &g, b"a").unwrap(),
        Value::List(vec![Value::Nil, Value::bytes(b"a")])
    );

    let g_fail = grammar(&arena, &[rule("B", seq(&arena, &[and_code("F"), lit("a")]))]);
    assert!(parse(&arena, &g_fail, b"a").is_err());

    let g_not = grammar(&arena, &[rule("C", seq(&arena, &[not_code("F"), lit("a")]))]);
    assert_eq!(
        parse(&arena, &g_not, b"a").unwrap(),
        Value::List(vec![Value::Nil, Value::bytes(b"a")])
    );
}

#[test]
fn case_fold_literal() {
    let arena = Bump::new();
    let g = grammar(&arena, &[rule("A", lit_i("AbC"))]);
    // The value is the input slice, not the folded literal.
    assert_eq!(parse(&arena, &g, b"aBc").unwrap(), Value::bytes(b"aBc"));
    assert!(parse(&arena, &g, b"abd").is_err());
}

#[test]
fn unicode_class_matcher() {
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[rule("A", plus(&arena, class_unicode(&arena, &["L"])))],
    );
    let input = "aé中".as_bytes();
    let value = parse(&arena, &g, input).unwrap();
    assert_eq!(value.as_list().unwrap().len(), 3);
    assert_eq!(value.as_list().unwrap()[2].as_str(), Some("中"));
}

#[test]
fn inverted_class_stops_at_member() {
    let arena = Bump::new();
    let class = pegvm::CharClassExpr {
        chars: arena.alloc_slice_copy(&[',']),
        ranges: &[],
        classes: &[],
        ignore_case: false,
        inverted: true,
    };
    let expr = pegvm::Expr::CharClassMatcher(arena.alloc(class));
    let g = grammar(&arena, &[rule("A", plus(&arena, expr))]);
    assert_eq!(
        parse(&arena, &g, b"ab,").unwrap(),
        Value::List(vec![Value::bytes(b"a"), Value::bytes(b"b")])
    );
}

#[test]
fn memoization_is_transparent() {
    // &B 'x' / B forces B to be re-invoked at the same offset.
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[
            rule(
                "A",
                choice(
                    &arena,
                    &[
                        seq(&arena, &[and_pred(&arena, rule_ref("B")), lit("x")]),
                        rule_ref("B"),
                    ],
                ),
            ),
            rule("B", lit("a")),
        ],
    );
    let plain = parse(&arena, &g, b"a").unwrap();
    let memoized = parse_with(
        &arena,
        &g,
        b"a",
        &ParseOptions {
            memoize: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(plain, memoized);
    assert_eq!(memoized, Value::bytes(b"a"));
}

#[test]
fn memoized_failures_replay() {
    // (B 'x') / (B 'y') - the second alternative replays B's results.
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[
            rule(
                "A",
                choice(
                    &arena,
                    &[
                        seq(&arena, &[rule_ref("B"), lit("x")]),
                        seq(&arena, &[rule_ref("B"), lit("y")]),
                    ],
                ),
            ),
            rule("B", lit("b")),
        ],
    );
    for memoize in [false, true] {
        let opts = ParseOptions {
            memoize,
            ..Default::default()
        };
        assert_eq!(
            parse_with(&arena, &g, b"by", &opts).unwrap(),
            Value::List(vec![Value::bytes(b"b"), Value::bytes(b"y")]),
            "memoize={}",
            memoize
        );
    }
}

#[test]
fn failures_inside_negative_lookahead_do_not_move_ffp() {
    // 'a' !'z' 'c' on "ab": the 'z' failure is desired; the report names 'c'.
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[rule(
            "A",
            seq(&arena, &[lit("a"), not_pred(&arena, lit("z")), lit("c")]),
        )],
    );
    let errs = parse(&arena, &g, b"ab").unwrap_err();
    let (want, got) = expected_cause(&errs);
    assert_eq!(want, "\"c\"");
    assert_eq!(got, 'b');
    assert_eq!(errs.as_slice()[0].pos, Position { line: 1, col: 2, offset: 1 });
}

#[test]
fn ffp_tracks_line_and_column() {
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[rule("A", seq(&arena, &[lit("a"), lit("\n"), lit("b")]))],
    );
    let errs = parse(&arena, &g, b"a\nc").unwrap_err();
    assert_eq!(
        errs.as_slice()[0].pos,
        Position { line: 2, col: 1, offset: 2 }
    );
    assert_eq!(errs.as_slice()[0].prefix, "test:2:1 (2): rule A");
}

#[test]
fn failure_in_referenced_rule_names_that_rule() {
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[rule("A", rule_ref("B")), rule("B", lit("b"))],
    );
    let errs = parse(&arena, &g, b"c").unwrap_err();
    assert_eq!(errs.as_slice()[0].prefix, "test:1:1 (0): rule B");
}

#[test]
fn display_name_appears_in_errors() {
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[Rule {
            name: "A",
            display_name: Some("letter a"),
            expr: lit("a"),
        }],
    );
    let errs = parse(&arena, &g, b"b").unwrap_err();
    assert_eq!(errs.as_slice()[0].prefix, "test:1:1 (0): rule letter a");
}

#[test]
fn user_errors_accumulate_and_dedupe() {
    // (B 'x') / (B 'y') with B's action reporting an error both times.
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[
            rule(
                "A",
                choice(
                    &arena,
                    &[
                        seq(&arena, &[rule_ref("B"), lit("x")]),
                        seq(&arena, &[rule_ref("B"), lit("y")]),
                    ],
                ),
            ),
            rule("B", action(&arena, lit("a"), "boom")),
        ],
    );
    let program = compile(&arena, &g).unwrap();
    let actions: Vec<ActionFn> = vec![action_fn(|_, _| Err("boom".into()))];
    let parser = VmParser::new(&program, actions, vec![]);

    let errs = parser
        .parse("test", b"ay", &ParseOptions::default())
        .unwrap_err();
    assert_eq!(errs.len(), 1, "duplicates removed: {}", errs);
    let err = &errs.as_slice()[0];
    assert!(matches!(err.cause, ErrorCause::User(_)));
    assert_eq!(err.to_string(), "test:1:1 (0): rule B: boom");
}

#[test]
fn panicking_action_is_recovered() {
    let arena = Bump::new();
    let g = grammar(&arena, &[rule("A", action(&arena, lit("a"), "kaboom"))]);
    let program = compile(&arena, &g).unwrap();

    let actions: Vec<ActionFn> = vec![action_fn(|_, _| panic!("kaboom"))];
    let parser = VmParser::new(&program, actions, vec![]);
    let errs = parser
        .parse("test", b"a", &ParseOptions::default())
        .unwrap_err();
    assert!(matches!(
        &errs.as_slice()[0].cause,
        ErrorCause::Panic(msg) if msg == "kaboom"
    ));
}

#[test]
fn panicking_action_propagates_without_recover() {
    let arena = Bump::new();
    let g = grammar(&arena, &[rule("A", action(&arena, lit("a"), "kaboom"))]);
    let program = compile(&arena, &g).unwrap();

    let actions: Vec<ActionFn> = vec![action_fn(|_, _| panic!("kaboom"))];
    let parser = VmParser::new(&program, actions, vec![]);
    let opts = ParseOptions {
        recover: false,
        ..Default::default()
    };
    let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        parser.parse("test", b"a", &opts)
    }));
    assert!(caught.is_err());
}

#[test]
fn invalid_utf8_aborts_the_parse() {
    let arena = Bump::new();
    let g = grammar(&arena, &[rule("A", star(&arena, lit("a")))]);

    let errs = parse(&arena, &g, &[0xFF]).unwrap_err();
    assert!(matches!(
        errs.as_slice()[0].cause,
        ErrorCause::InvalidEncoding
    ));

    let errs = parse(&arena, &g, &[b'a', 0xFF]).unwrap_err();
    assert!(matches!(
        errs.as_slice()[0].cause,
        ErrorCause::InvalidEncoding
    ));
}

#[test]
fn parse_reader_returns_owned_values() {
    let arena = Bump::new();
    let g = grammar(&arena, &[rule("A", lit("a"))]);
    let program = compile(&arena, &g).unwrap();
    let parser = VmParser::new(&program, vec![], vec![]);

    let value = parser
        .parse_reader("buf", std::io::Cursor::new(b"a".to_vec()), &ParseOptions::default())
        .unwrap();
    assert_eq!(value, Value::bytes(b"a"));
}

#[test]
fn parse_file_reads_and_reports_io_errors() {
    let arena = Bump::new();
    let g = grammar(&arena, &[rule("A", plus(&arena, lit("a")))]);
    let program = compile(&arena, &g).unwrap();
    let parser = VmParser::new(&program, vec![], vec![]);

    let path = std::env::temp_dir().join("pegvm_parse_file_test.txt");
    std::fs::write(&path, b"aa").unwrap();
    let value = parser
        .parse_file(path.to_str().unwrap(), &ParseOptions::default())
        .unwrap();
    assert_eq!(value.as_list().unwrap().len(), 2);
    std::fs::remove_file(&path).ok();

    let errs = parser
        .parse_file("/no/such/pegvm/file", &ParseOptions::default())
        .unwrap_err();
    assert!(matches!(errs.as_slice()[0].cause, ErrorCause::Io(_)));
}

#[test]
fn debug_mode_is_not_observable_in_the_result() {
    let arena = Bump::new();
    let g = grammar(
        &arena,
        &[rule(
            "A",
            choice(&arena, &[seq(&arena, &[lit("a"), lit("b")]), lit("a")]),
        )],
    );
    let opts = ParseOptions {
        debug: true,
        memoize: true,
        ..Default::default()
    };
    assert_eq!(
        parse_with(&arena, &g, b"ac", &opts).unwrap(),
        parse(&arena, &g, b"ac").unwrap()
    );
}
