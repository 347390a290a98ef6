//! Unit tests for the smart constructor, the let-inlining policy, freeze,
//! and the analysis monoid.

use crate::analysis::{Analysis, Complexity};
use crate::ast::{EvalRef, Ident, InlineDirective, Level, Literal, Op1, PrimOp, Qualified};
use crate::ir::{BackendExpr, NeutralExpr, Rewrite, Syntax};
use crate::rewrite::{build, build_stop, freeze, make, should_inline_let, BuildCtx};

fn ctx() -> BuildCtx {
    BuildCtx::default()
}

fn ident(name: &str) -> Option<Ident> {
    Some(Ident::new(name))
}

fn q(module: &str, name: &str) -> Qualified {
    Qualified::new(crate::ast::ModuleName::new(module), Ident::new(name))
}

fn blit(n: i32) -> BackendExpr {
    build(&ctx(), Syntax::Lit(Literal::Int(n)))
}

fn bbool(b: bool) -> BackendExpr {
    build(&ctx(), Syntax::Lit(Literal::Boolean(b)))
}

fn blocal(name: &str, level: u32) -> BackendExpr {
    build(&ctx(), Syntax::Local(ident(name), Level(level)))
}

fn bvar(module: &str, name: &str) -> BackendExpr {
    build(&ctx(), Syntax::Var(q(module, name)))
}

fn bnot(e: BackendExpr) -> BackendExpr {
    build(&ctx(), Syntax::PrimOp(PrimOp::Op1(Op1::Not, e)))
}

// =============================================================================
// Flattening
// =============================================================================

#[test]
fn test_app_flattening() {
    let inner = build(&ctx(), Syntax::App(bvar("M", "f"), vec![blit(1)]));
    let outer = build(&ctx(), Syntax::App(inner, vec![blit(2)]));
    match outer.syntax() {
        Some(Syntax::App(head, args)) => {
            assert!(matches!(head.syntax(), Some(Syntax::Var(_))));
            assert_eq!(args.len(), 2);
        }
        other => panic!("expected flattened application, got {:?}", other.is_some()),
    }
}

#[test]
fn test_abs_flattening() {
    let inner = build(
        &ctx(),
        Syntax::Abs(vec![(ident("y"), Level(1))], blocal("y", 1)),
    );
    let outer = build(&ctx(), Syntax::Abs(vec![(ident("x"), Level(0))], inner));
    match outer.syntax() {
        Some(Syntax::Abs(params, _)) => assert_eq!(params.len(), 2),
        other => panic!("expected flattened abstraction, got {:?}", other.is_some()),
    }
}

#[test]
fn test_nested_let_binding_becomes_assoc_chain() {
    // let x = (let y = f 1 in y) in <body>  queues a flattened chain.
    let f_app = build(&ctx(), Syntax::App(bvar("M", "f"), vec![blit(1)]));
    let inner = make(Syntax::Let(ident("y"), Level(0), f_app, blocal("y", 0)));
    // A body that uses x twice under an abstraction, so x itself is not
    // inlined away by the policy.
    let body = build(
        &ctx(),
        Syntax::Abs(
            vec![(ident("z"), Level(2))],
            build(
                &ctx(),
                Syntax::App(blocal("x", 1), vec![blocal("x", 1)]),
            ),
        ),
    );
    let outer = build(&ctx(), Syntax::Let(ident("x"), Level(1), inner, body));
    match &outer {
        BackendExpr::Rewrite(analysis, rewrite) => {
            assert!(analysis.rewrite);
            match &**rewrite {
                Rewrite::LetAssoc(entries, _) => {
                    assert_eq!(entries.len(), 2);
                    assert_eq!(entries[0].1, Level(0));
                    assert_eq!(entries[1].1, Level(1));
                }
                other => panic!("expected an associated chain, got {:?}", other),
            }
        }
        BackendExpr::Syntax(..) => panic!("expected a queued rewrite"),
    }
}

// =============================================================================
// Let inlining policy
// =============================================================================

#[test]
fn test_dead_binding_inlines() {
    let binding = build(&ctx(), Syntax::App(bvar("M", "f"), vec![blit(1)]));
    let body = blit(7);
    assert!(should_inline_let(Level(0), &binding, &body));
}

#[test]
fn test_single_use_inlines() {
    let binding = build(&ctx(), Syntax::App(bvar("M", "f"), vec![blit(1)]));
    let body = blocal("x", 0);
    assert!(should_inline_let(Level(0), &binding, &body));
}

#[test]
fn test_captured_multi_use_nontrivial_stays() {
    let binding = build(&ctx(), Syntax::App(bvar("M", "f"), vec![blit(1)]));
    let body = build(
        &ctx(),
        Syntax::Abs(
            vec![(ident("z"), Level(1))],
            build(&ctx(), Syntax::App(blocal("x", 0), vec![blocal("x", 0)])),
        ),
    );
    assert!(!should_inline_let(Level(0), &binding, &body));
}

#[test]
fn test_trivial_binding_inlines_even_captured() {
    let binding = blit(1);
    let body = build(
        &ctx(),
        Syntax::Abs(
            vec![(ident("z"), Level(1))],
            build(&ctx(), Syntax::App(blocal("x", 0), vec![blocal("x", 0)])),
        ),
    );
    assert!(should_inline_let(Level(0), &binding, &body));
}

#[test]
fn test_small_abstraction_inlines_on_multi_use() {
    let binding = build(
        &ctx(),
        Syntax::Abs(vec![(ident("y"), Level(1))], blocal("y", 1)),
    );
    let body = build(
        &ctx(),
        Syntax::App(blocal("f", 0), vec![blocal("f", 0)]),
    );
    assert!(should_inline_let(Level(0), &binding, &body));
}

#[test]
fn test_local_never_directive_blocks_inlining() {
    let mut directives = im::HashMap::new();
    directives.insert(
        EvalRef::Local(ident("x"), Level(0)),
        InlineDirective::Never,
    );
    let ctx = BuildCtx::new(directives);
    // A trivially inlinable binding stays put under the directive.
    let expr = build(
        &ctx,
        Syntax::Let(ident("x"), Level(0), blit(1), blocal("x", 0)),
    );
    assert!(matches!(expr.syntax(), Some(Syntax::Let(..))));
    assert!(!expr.analysis().rewrite);
}

// =============================================================================
// EffectBind and negation
// =============================================================================

#[test]
fn test_effect_bind_of_pure_becomes_let() {
    let pure = build(&ctx(), Syntax::EffectPure(blit(1)));
    let body = build(&ctx(), Syntax::EffectPure(blocal("x", 0)));
    let expr = build(&ctx(), Syntax::EffectBind(ident("x"), Level(0), pure, body));
    match &expr {
        BackendExpr::Rewrite(analysis, rewrite) => {
            assert!(analysis.rewrite);
            assert!(matches!(&**rewrite, Rewrite::Inline(..)));
        }
        BackendExpr::Syntax(..) => panic!("expected the binding to queue an inline"),
    }
}

#[test]
fn test_double_negation_collapses() {
    let expr = bnot(bnot(blocal("b", 0)));
    assert!(matches!(expr.syntax(), Some(Syntax::Local(..))));
}

// =============================================================================
// Branch simplification
// =============================================================================

#[test]
fn test_branch_guard_true_false_collapses_to_guard() {
    let expr = build(
        &ctx(),
        Syntax::Branch(vec![(blocal("g", 0), bbool(true))], Some(bbool(false))),
    );
    assert!(matches!(expr.syntax(), Some(Syntax::Local(..))));
}

#[test]
fn test_branch_guard_false_true_collapses_to_negation() {
    let expr = build(
        &ctx(),
        Syntax::Branch(vec![(blocal("g", 0), bbool(false))], Some(bbool(true))),
    );
    assert!(matches!(
        expr.syntax(),
        Some(Syntax::PrimOp(PrimOp::Op1(Op1::Not, _)))
    ));
}

#[test]
fn test_branch_default_fuses() {
    let inner = make(Syntax::Branch(
        vec![(blocal("b", 1), blit(2))],
        Some(blit(3)),
    ));
    let expr = build(
        &ctx(),
        Syntax::Branch(vec![(blocal("a", 0), blit(1))], Some(inner)),
    );
    match expr.syntax() {
        Some(Syntax::Branch(pairs, Some(_))) => assert_eq!(pairs.len(), 2),
        other => panic!("expected fused branch, got {:?}", other.is_some()),
    }
}

#[test]
fn test_complementary_guards_drop_failure_default() {
    let failing = build(&ctx(), Syntax::Fail("Failed pattern match".to_string()));
    let expr = build(
        &ctx(),
        Syntax::Branch(
            vec![
                (blocal("l", 0), blit(1)),
                (bnot(blocal("l", 0)), blit(2)),
            ],
            Some(failing),
        ),
    );
    match expr.syntax() {
        Some(Syntax::Branch(pairs, Some(default))) => {
            assert_eq!(pairs.len(), 1);
            assert!(matches!(
                default.syntax(),
                Some(Syntax::Lit(Literal::Int(2)))
            ));
        }
        other => panic!("expected simplified branch, got {:?}", other.is_some()),
    }
}

// =============================================================================
// Freeze
// =============================================================================

#[test]
fn test_freeze_stop_becomes_var() {
    let expr = build_stop(q("M", "stop"));
    assert_eq!(
        freeze(&expr),
        NeutralExpr::new(Syntax::Var(q("M", "stop")))
    );
}

#[test]
fn test_freeze_assoc_chain_becomes_nested_lets() {
    let f_app = build(&ctx(), Syntax::App(bvar("M", "f"), vec![blit(1)]));
    let inner = make(Syntax::Let(ident("y"), Level(0), f_app, blocal("y", 0)));
    let body = build(
        &ctx(),
        Syntax::Abs(
            vec![(ident("z"), Level(2))],
            build(&ctx(), Syntax::App(blocal("x", 1), vec![blocal("x", 1)])),
        ),
    );
    let expr = build(&ctx(), Syntax::Let(ident("x"), Level(1), inner, body));
    let frozen = freeze(&expr);
    match frozen.syntax() {
        Syntax::Let(first, Level(0), _, rest) => {
            assert_eq!(first, &ident("y"));
            assert!(matches!(rest.syntax(), Syntax::Let(_, Level(1), _, _)));
        }
        other => panic!("expected nested lets, got {:?}", other),
    }
}

#[test]
fn test_freeze_inline_becomes_let() {
    let binding = blit(1);
    let body = blocal("x", 0);
    let expr = build(&ctx(), Syntax::Let(ident("x"), Level(0), binding, body));
    assert!(matches!(&expr, BackendExpr::Rewrite(..)));
    let frozen = freeze(&expr);
    assert!(matches!(frozen.syntax(), Syntax::Let(_, Level(0), _, _)));
}

// =============================================================================
// Analysis
// =============================================================================

#[test]
fn test_analysis_usage_counts_sum() {
    let expr = build(
        &ctx(),
        Syntax::App(blocal("x", 0), vec![blocal("x", 0), blocal("y", 1)]),
    );
    let usages = &expr.analysis().usages;
    assert_eq!(usages.get(&Level(0)).unwrap().count, 2);
    assert_eq!(usages.get(&Level(1)).unwrap().count, 1);
    assert_eq!(expr.analysis().complexity, Complexity::NonTrivial);
}

#[test]
fn test_analysis_binding_site_removes_level() {
    let expr = build(
        &ctx(),
        Syntax::Abs(vec![(ident("x"), Level(0))], blocal("x", 0)),
    );
    assert!(expr.analysis().usages.is_empty());
    assert_eq!(expr.analysis().args.len(), 1);
    assert_eq!(expr.analysis().args[0].count, 1);
}

#[test]
fn test_analysis_capture_marks_free_levels() {
    let expr = build(
        &ctx(),
        Syntax::Abs(vec![(ident("x"), Level(1))], blocal("free", 0)),
    );
    assert!(expr.analysis().usages.get(&Level(0)).unwrap().captured);
}

#[test]
fn test_analysis_power_scales_counts() {
    let a = Analysis::empty().used(Level(3)).power(2);
    assert_eq!(a.usages.get(&Level(3)).unwrap().count, 2);
}

#[test]
fn test_analysis_deps_track_modules() {
    let expr = build(
        &ctx(),
        Syntax::App(bvar("Data.Maybe", "maybe"), vec![bvar("Data.Either", "either")]),
    );
    let deps = &expr.analysis().deps;
    assert!(deps.contains(&crate::ast::ModuleName::new("Data.Maybe")));
    assert!(deps.contains(&crate::ast::ModuleName::new("Data.Either")));
}
