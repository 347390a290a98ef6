//! Tests for the cross-module driver: implementation publishing, inline
//! directives, constructor metadata, and foreign semantics.

use std::rc::Rc;

use crate::ast::{
    Accessor, BindGroup, Binding, CtorKind, EvalRef, Ident, InlineDirective, Label, Literal,
    Module, ModuleDirectives, ModuleName, Op1, Op2, OpNum, PrimOp, Prop, ProperName, Qualified,
    SourceExpr, SourceExprKind, Span,
};
use crate::driver::{BackendModule, BuildOptions, Builder};
use crate::error::CompilerError;
use crate::ir::{Impl, NeutralExpr, Syntax};
use crate::semantics::{eval_mk_fn, ExternSpine, Sem, SemKind};

// =============================================================================
// Builders
// =============================================================================

fn e(kind: SourceExprKind) -> SourceExpr {
    SourceExpr::new(kind)
}

fn var(name: &str) -> SourceExpr {
    e(SourceExprKind::Var(Qualified::unqualified(Ident::new(name))))
}

fn qvar(module: &str, name: &str) -> SourceExpr {
    e(SourceExprKind::Var(Qualified::new(
        ModuleName::new(module),
        Ident::new(name),
    )))
}

fn int(n: i32) -> SourceExpr {
    e(SourceExprKind::Lit(Literal::Int(n)))
}

fn app(head: SourceExpr, args: Vec<SourceExpr>) -> SourceExpr {
    e(SourceExprKind::App(Box::new(head), args))
}

fn abs(params: &[&str], body: SourceExpr) -> SourceExpr {
    e(SourceExprKind::Abs(
        params.iter().map(|p| Some(Ident::new(*p))).collect(),
        Box::new(body),
    ))
}

fn add(a: SourceExpr, b: SourceExpr) -> SourceExpr {
    e(SourceExprKind::PrimOp(Box::new(PrimOp::Op2(
        Op2::IntNum(OpNum::Add),
        a,
        b,
    ))))
}

fn record(props: Vec<(&str, SourceExpr)>) -> SourceExpr {
    e(SourceExprKind::Lit(Literal::Record(
        props
            .into_iter()
            .map(|(l, v)| Prop(Label::new(l), v))
            .collect(),
    )))
}

fn ctor(ty: &str, name: &str, fields: &[&str], newtype: bool) -> SourceExpr {
    e(SourceExprKind::Constructor {
        ty: ProperName::new(ty),
        name: Ident::new(name),
        fields: fields.iter().map(|f| Ident::new(*f)).collect(),
        newtype,
    })
}

fn nonrec(name: &str, expr: SourceExpr) -> BindGroup {
    BindGroup::NonRec(Binding {
        span: Span::default(),
        name: Ident::new(name),
        expr,
    })
}

fn rec(bindings: Vec<(&str, SourceExpr)>) -> BindGroup {
    BindGroup::Rec(
        bindings
            .into_iter()
            .map(|(name, expr)| Binding {
                span: Span::default(),
                name: Ident::new(name),
                expr,
            })
            .collect(),
    )
}

fn module(name: &str, decls: Vec<BindGroup>) -> Module {
    Module {
        name: ModuleName::new(name),
        imports: Vec::new(),
        exports: Vec::new(),
        reexports: Vec::new(),
        foreign: Vec::new(),
        directives: ModuleDirectives::default(),
        decls,
    }
}

fn q(module: &str, name: &str) -> Qualified {
    Qualified::new(ModuleName::new(module), Ident::new(name))
}

fn binding_of<'a>(backend: &'a BackendModule, name: &str) -> &'a NeutralExpr {
    backend
        .bindings
        .iter()
        .flat_map(|g| g.bindings.iter())
        .find(|(id, _)| id.as_str() == name)
        .map(|(_, expr)| expr)
        .unwrap_or_else(|| panic!("no binding named {}", name))
}

fn nint(v: i32) -> NeutralExpr {
    NeutralExpr::new(Syntax::Lit(Literal::Int(v)))
}

// =============================================================================
// Inlining across declarations and modules
// =============================================================================

#[test]
fn test_small_function_inlines_across_declarations() {
    let mut builder = Builder::new(BuildOptions::default());
    let m = module(
        "A",
        vec![
            nonrec("id", abs(&["x"], var("x"))),
            nonrec("three", app(var("id"), vec![int(3)])),
        ],
    );
    let backend = builder.build_module(&m).unwrap();
    assert_eq!(binding_of(&backend, "three"), &nint(3));
    assert!(builder.implementation(&q("A", "three")).is_some());
}

#[test]
fn test_literal_inlines_across_modules() {
    let mut builder = Builder::new(BuildOptions::default());
    let a = module("A", vec![nonrec("answer", int(42))]);
    let b = module(
        "B",
        vec![
            nonrec("double", add(qvar("A", "answer"), qvar("A", "answer"))),
            nonrec("mystery", qvar("Other", "unknown")),
        ],
    );

    let mut finished: Vec<BackendModule> = Vec::new();
    builder
        .build_modules(
            vec![a, b],
            |_, module| module,
            |_, backend| finished.push(backend.clone()),
        )
        .unwrap();

    let backend = &finished[1];
    assert_eq!(binding_of(backend, "double"), &nint(84));
    // The folded binding no longer depends on A, while the stuck reference
    // keeps its module in the dependency closure.
    assert_eq!(backend.imports, vec![ModuleName::new("Other")]);
    assert_eq!(builder.module_index(), 2);
}

#[test]
fn test_inline_never_directive_preserves_reference() {
    let mut builder = Builder::new(BuildOptions::default());
    let mut m = module(
        "M",
        vec![
            nonrec("nvr", abs(&["x"], var("x"))),
            nonrec("use", app(var("nvr"), vec![int(3)])),
        ],
    );
    m.directives
        .locals
        .insert(EvalRef::Extern(q("M", "nvr"), None), InlineDirective::Never);
    let backend = builder.build_module(&m).unwrap();
    let expected = NeutralExpr::new(Syntax::App(
        NeutralExpr::new(Syntax::Var(q("M", "nvr"))),
        vec![nint(3)],
    ));
    assert_eq!(binding_of(&backend, "use"), &expected);
}

#[test]
fn test_partial_application_propagates_arity() {
    let mut builder = Builder::new(BuildOptions::default());
    let mut m = module(
        "AR",
        vec![
            nonrec("f", abs(&["x", "y"], var("x"))),
            nonrec("r", app(var("f"), vec![int(1)])),
        ],
    );
    m.directives
        .locals
        .insert(EvalRef::Extern(q("AR", "f"), None), InlineDirective::Arity(2));
    let backend = builder.build_module(&m).unwrap();

    let expected = NeutralExpr::new(Syntax::App(
        NeutralExpr::new(Syntax::Var(q("AR", "f"))),
        vec![nint(1)],
    ));
    assert_eq!(binding_of(&backend, "r"), &expected);

    let remainder = EvalRef::Extern(q("AR", "r"), None);
    assert_eq!(
        builder.directives().get(&remainder),
        Some(&InlineDirective::Arity(1))
    );
    assert_eq!(
        backend.directives.get(&remainder),
        Some(&InlineDirective::Arity(1))
    );
}

#[test]
fn test_dictionary_field_inlines_under_directive() {
    let mut builder = Builder::new(BuildOptions::default());
    let mut m = module(
        "D",
        vec![
            nonrec(
                "dict",
                record(vec![("f", abs(&["x"], var("x"))), ("g", int(5))]),
            ),
            nonrec(
                "use",
                app(
                    e(SourceExprKind::Accessor(
                        Box::new(var("dict")),
                        Accessor::GetProp(Label::new("f")),
                    )),
                    vec![int(7)],
                ),
            ),
        ],
    );
    m.directives.locals.insert(
        crate::semantics::dict_prop_ref(&q("D", "dict"), &Label::new("f")),
        InlineDirective::Always,
    );
    let backend = builder.build_module(&m).unwrap();
    assert_eq!(binding_of(&backend, "use"), &nint(7));

    match builder.implementation(&q("D", "dict")) {
        Some((_, Impl::Dict(group, props))) => {
            assert!(group.is_empty());
            assert_eq!(props.len(), 2);
        }
        other => panic!("expected a dictionary implementation, got {:?}", other.map(|(_, i)| i)),
    }
}

// =============================================================================
// Constructors
// =============================================================================

#[test]
fn test_constructor_metadata_and_saturation() {
    let mut builder = Builder::new(BuildOptions::default());
    let m = module(
        "C",
        vec![
            nonrec("Just", ctor("Maybe", "Just", &["value0"], false)),
            nonrec("Nothing", ctor("Maybe", "Nothing", &[], false)),
            nonrec("mk", app(var("Just"), vec![int(1)])),
            nonrec("none", var("Nothing")),
            nonrec(
                "tagged",
                e(SourceExprKind::Let(
                    Some(Ident::new("m")),
                    Box::new(app(var("Just"), vec![int(1)])),
                    Box::new(e(SourceExprKind::PrimOp(Box::new(PrimOp::Op1(
                        Op1::IsTag(q("C", "Just")),
                        var("m"),
                    ))))),
                )),
            ),
        ],
    );
    let backend = builder.build_module(&m).unwrap();

    let maybe = backend.data_types.get(&ProperName::new("Maybe")).unwrap();
    assert_eq!(maybe.size, 1);
    let just = maybe.constructors.get(&Ident::new("Just")).unwrap();
    assert_eq!(just.tag, 0);
    assert_eq!(just.kind, CtorKind::Sum);
    let nothing = maybe.constructors.get(&Ident::new("Nothing")).unwrap();
    assert_eq!(nothing.tag, 1);

    match binding_of(&backend, "mk").syntax() {
        Syntax::CtorSaturated(ctor_q, CtorKind::Sum, ty, name, fields) => {
            assert_eq!(ctor_q, &q("C", "Just"));
            assert_eq!(ty, &ProperName::new("Maybe"));
            assert_eq!(name, &Ident::new("Just"));
            assert_eq!(fields.len(), 1);
            assert_eq!(fields[0].1, nint(1));
        }
        other => panic!("expected a saturated constructor, got {:?}", other),
    }

    // An unapplied nullary constructor stays a bare reference.
    assert_eq!(
        binding_of(&backend, "none"),
        &NeutralExpr::new(Syntax::Var(q("C", "Nothing")))
    );

    // The tag test folds against the saturated constructor.
    assert_eq!(
        binding_of(&backend, "tagged"),
        &NeutralExpr::new(Syntax::Lit(Literal::Boolean(true)))
    );

    assert!(matches!(
        builder.implementation(&q("C", "Just")),
        Some((_, Impl::Ctor(CtorKind::Sum, _, _, _)))
    ));
}

#[test]
fn test_newtype_constructor_erases() {
    let mut builder = Builder::new(BuildOptions::default());
    let m = module(
        "N",
        vec![
            nonrec("Wrap", ctor("W", "Wrap", &["unwrap"], true)),
            nonrec("val", app(var("Wrap"), vec![int(5)])),
        ],
    );
    let backend = builder.build_module(&m).unwrap();
    assert_eq!(binding_of(&backend, "val"), &nint(5));
    let w = backend.data_types.get(&ProperName::new("W")).unwrap();
    assert_eq!(w.constructors.get(&Ident::new("Wrap")).unwrap().kind, CtorKind::Product);
}

// =============================================================================
// Recursion
// =============================================================================

#[test]
fn test_recursive_group_is_published_but_not_inlined() {
    let mut builder = Builder::new(BuildOptions::default());
    let r = module(
        "R",
        vec![rec(vec![(
            "loop",
            abs(&["n"], app(var("loop"), vec![var("n")])),
        )])],
    );
    let backend = builder.build_module(&r).unwrap();
    assert!(backend.bindings[0].recursive);
    match builder.implementation(&q("R", "loop")) {
        Some((_, Impl::Rec(group, _))) => assert_eq!(group, vec![q("R", "loop")]),
        other => panic!("expected recursive impl, got {:?}", other.map(|(_, i)| i)),
    }

    let u = module("U", vec![nonrec("use", app(qvar("R", "loop"), vec![int(5)]))]);
    let backend = builder.build_module(&u).unwrap();
    let expected = NeutralExpr::new(Syntax::App(
        NeutralExpr::new(Syntax::Var(q("R", "loop"))),
        vec![nint(5)],
    ));
    assert_eq!(binding_of(&backend, "use"), &expected);
    assert_eq!(backend.imports, vec![ModuleName::new("R")]);
}

// =============================================================================
// Module assembly
// =============================================================================

#[test]
fn test_adjacent_nonrecursive_bindings_regroup() {
    let mut builder = Builder::new(BuildOptions::default());
    let m = module(
        "G",
        vec![
            nonrec("a", int(1)),
            nonrec("b", int(2)),
            rec(vec![("c", abs(&["n"], app(var("c"), vec![var("n")])))]),
            nonrec("d", int(3)),
        ],
    );
    let backend = builder.build_module(&m).unwrap();
    assert_eq!(backend.bindings.len(), 3);
    assert!(!backend.bindings[0].recursive);
    assert_eq!(backend.bindings[0].bindings.len(), 2);
    assert!(backend.bindings[1].recursive);
    assert!(!backend.bindings[2].recursive);
}

#[test]
fn test_exports_include_reexports() {
    let mut builder = Builder::new(BuildOptions::default());
    let mut m = module("E", vec![nonrec("a", int(1))]);
    m.exports.push(Ident::new("a"));
    m.reexports.push((ModuleName::new("Other"), Ident::new("b")));
    let backend = builder.build_module(&m).unwrap();
    assert_eq!(
        backend.exports,
        vec![
            (Ident::new("a"), q("E", "a")),
            (Ident::new("b"), q("Other", "b")),
        ]
    );
}

#[test]
fn test_empty_recursive_group_is_rejected() {
    let mut builder = Builder::new(BuildOptions::default());
    let m = module("Bad", vec![BindGroup::Rec(Vec::new())]);
    match builder.build_module(&m) {
        Err(CompilerError::EmptyRecGroup(name)) => assert_eq!(name, ModuleName::new("Bad")),
        other => panic!("expected empty-group error, got {:?}", other.map(|m| m.name)),
    }
}

#[test]
fn test_rewrite_limit_names_declaration() {
    let mut builder = Builder::new(BuildOptions {
        rewrite_limit: 1,
        ..BuildOptions::default()
    });
    let m = module(
        "L",
        vec![nonrec("use", app(abs(&["x"], var("x")), vec![int(5)]))],
    );
    match builder.build_module(&m) {
        Err(CompilerError::RewriteLimit(name, limit)) => {
            assert_eq!(name, q("L", "use"));
            assert_eq!(limit, 1);
        }
        other => panic!("expected rewrite-limit error, got {:?}", other.map(|m| m.name)),
    }
}

// =============================================================================
// Foreign semantics
// =============================================================================

#[test]
fn test_foreign_hook_lifts_curried_functions() {
    let mut options = BuildOptions::default();
    options.foreign.insert(
        q("F", "mkFn2"),
        Rc::new(|env, _q, spine| match spine {
            [ExternSpine::App(args)] if args.len() == 1 => Some(Sem::new(SemKind::MkFn(
                eval_mk_fn(env, 2, args[0].clone()),
            ))),
            _ => None,
        }),
    );
    let mut builder = Builder::new(options);
    let m = module(
        "FM",
        vec![nonrec(
            "seven",
            e(SourceExprKind::UncurriedApp(
                Box::new(app(
                    qvar("F", "mkFn2"),
                    vec![abs(&["a", "b"], add(var("a"), var("b")))],
                )),
                vec![int(3), int(4)],
            )),
        )],
    );
    let backend = builder.build_module(&m).unwrap();
    assert_eq!(binding_of(&backend, "seven"), &nint(7));
}
