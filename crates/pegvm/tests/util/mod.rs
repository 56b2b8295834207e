//! Shared helpers for building grammar ASTs and thunk tables in tests.

#![allow(dead_code)]

use bumpalo::Bump;
use pegvm::{
    ActionFn, ArgsSet, CharClassExpr, Current, Expr, Grammar, PredicateFn, Program, Rule,
    ThunkError, Value,
};

pub fn lit(value: &str) -> Expr<'_> {
    Expr::LitMatcher {
        value,
        ignore_case: false,
    }
}

pub fn lit_i(value: &str) -> Expr<'_> {
    Expr::LitMatcher {
        value,
        ignore_case: true,
    }
}

pub fn any<'a>() -> Expr<'a> {
    Expr::AnyMatcher
}

pub fn class_ranges<'a>(arena: &'a Bump, ranges: &[(char, char)]) -> Expr<'a> {
    Expr::CharClassMatcher(arena.alloc(CharClassExpr {
        chars: &[],
        ranges: arena.alloc_slice_copy(ranges),
        classes: &[],
        ignore_case: false,
        inverted: false,
    }))
}

pub fn class_chars<'a>(arena: &'a Bump, chars: &[char], inverted: bool) -> Expr<'a> {
    Expr::CharClassMatcher(arena.alloc(CharClassExpr {
        chars: arena.alloc_slice_copy(chars),
        ranges: &[],
        classes: &[],
        ignore_case: false,
        inverted,
    }))
}

pub fn class_unicode<'a>(arena: &'a Bump, names: &[&'a str]) -> Expr<'a> {
    Expr::CharClassMatcher(arena.alloc(CharClassExpr {
        chars: &[],
        ranges: &[],
        classes: arena.alloc_slice_copy(names),
        ignore_case: false,
        inverted: false,
    }))
}

pub fn seq<'a>(arena: &'a Bump, children: &[Expr<'a>]) -> Expr<'a> {
    Expr::Sequence(arena.alloc_slice_copy(children))
}

pub fn choice<'a>(arena: &'a Bump, alternatives: &[Expr<'a>]) -> Expr<'a> {
    Expr::Choice(arena.alloc_slice_copy(alternatives))
}

pub fn labeled<'a>(arena: &'a Bump, label: &'a str, expr: Expr<'a>) -> Expr<'a> {
    Expr::Labeled {
        label,
        expr: arena.alloc(expr),
    }
}

pub fn action<'a>(arena: &'a Bump, expr: Expr<'a>, code: &'a str) -> Expr<'a> {
    Expr::Action {
        expr: arena.alloc(expr),
        code,
    }
}

pub fn rule_ref(name: &str) -> Expr<'_> {
    Expr::RuleRef(name)
}

pub fn star<'a>(arena: &'a Bump, expr: Expr<'a>) -> Expr<'a> {
    Expr::ZeroOrMore(arena.alloc(expr))
}

pub fn plus<'a>(arena: &'a Bump, expr: Expr<'a>) -> Expr<'a> {
    Expr::OneOrMore(arena.alloc(expr))
}

pub fn opt<'a>(arena: &'a Bump, expr: Expr<'a>) -> Expr<'a> {
    Expr::Optional(arena.alloc(expr))
}

pub fn and_pred<'a>(arena: &'a Bump, expr: Expr<'a>) -> Expr<'a> {
    Expr::And(arena.alloc(expr))
}

pub fn not_pred<'a>(arena: &'a Bump, expr: Expr<'a>) -> Expr<'a> {
    Expr::Not(arena.alloc(expr))
}

pub fn and_code(code: &str) -> Expr<'_> {
    Expr::AndCode(code)
}

pub fn not_code(code: &str) -> Expr<'_> {
    Expr::NotCode(code)
}

pub fn rule<'a>(name: &'a str, expr: Expr<'a>) -> Rule<'a> {
    Rule {
        name,
        display_name: None,
        expr,
    }
}

pub fn grammar<'a>(arena: &'a Bump, rules: &[Rule<'a>]) -> Grammar<'a> {
    Grammar {
        initializer: None,
        rules: arena.alloc_slice_copy(rules),
    }
}

/// Mock thunk tables: every action returns its code text as a user value,
/// every predicate holds iff its code text is "T".
pub fn mock_actions(program: &Program<'_>) -> Vec<ActionFn> {
    program
        .actions
        .iter()
        .map(|thunk| {
            let code = thunk.code.to_string();
            let f: ActionFn = Box::new(move |_, _| Ok(Value::user(code.clone())));
            f
        })
        .collect()
}

pub fn mock_predicates(program: &Program<'_>) -> Vec<PredicateFn> {
    program
        .predicates
        .iter()
        .map(|thunk| {
            let holds = thunk.code == "T";
            let f: PredicateFn = Box::new(move |_, _| Ok(holds));
            f
        })
        .collect()
}

/// Wrap a closure as an action, pinning down the higher-ranked signature.
pub fn action_fn<F>(f: F) -> ActionFn
where
    F: for<'i> Fn(&Current<'i>, &ArgsSet<'i>) -> Result<Value<'i>, ThunkError> + 'static,
{
    Box::new(f)
}

/// Wrap a closure as a predicate.
pub fn pred_fn<F>(f: F) -> PredicateFn
where
    F: for<'i> Fn(&Current<'i>, &ArgsSet<'i>) -> Result<bool, ThunkError> + 'static,
{
    Box::new(f)
}
