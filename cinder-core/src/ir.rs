//! The build-time IR produced by conversion and quotation, and the neutral
//! (rewrite-free) IR published to the code emitter.
//!
//! `BackendExpr` carries an `Analysis` on every node plus either a syntactic
//! form or a queued rewrite. The rewrite layer exists so the quoter can
//! record decisions (inline this let, flatten this chain, stop inlining this
//! reference) that the *next* evaluation pass performs; `freeze` strips the
//! layer once the fixpoint is reached.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::analysis::Analysis;
use crate::ast::{
    Accessor, CtorKind, Ident, Label, Level, Literal, PrimOp, Prop, ProperName, Qualified,
};

/// Syntactic forms, parameterized over the child expression type. The build
/// IR instantiates `A = BackendExpr`; the frozen IR uses `A = NeutralExpr`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Syntax<A> {
    /// A global reference.
    Var(Qualified),
    /// A bound local at a de Bruijn level. The ident disambiguates members
    /// of a recursive group, which share one level.
    Local(Option<Ident>, Level),
    Lit(Literal<A>),
    /// Curried application; the argument list is non-empty.
    App(A, Vec<A>),
    /// Curried abstraction binding params at sequential levels.
    Abs(Vec<(Option<Ident>, Level)>, A),
    UncurriedApp(A, Vec<A>),
    UncurriedAbs(Vec<(Option<Ident>, Level)>, A),
    UncurriedEffectApp(A, Vec<A>),
    UncurriedEffectAbs(Vec<(Option<Ident>, Level)>, A),
    Let(Option<Ident>, Level, A, A),
    /// A mutually recursive group bound at a single level.
    LetRec(Level, Vec<(Ident, A)>, A),
    /// Effect-monadic bind: run the first computation, bind its result, and
    /// continue with the second.
    EffectBind(Option<Ident>, Level, A, A),
    EffectPure(A),
    Accessor(A, Accessor),
    /// Functional record update.
    Update(A, Vec<Prop<A>>),
    /// Ordered guarded alternatives with an optional fallthrough.
    Branch(Vec<(A, A)>, Option<A>),
    PrimOp(PrimOp<A>),
    /// Diverging pattern-match failure, preserved for the code emitter.
    Fail(String),
    /// A constructor as a value: its type, name, and field names.
    CtorDef(CtorKind, ProperName, Ident, Vec<Ident>),
    /// A fully applied constructor.
    CtorSaturated(Qualified, CtorKind, ProperName, Ident, Vec<(Ident, A)>),
}

impl<A> Syntax<A> {
    /// Map every child expression, preserving structure.
    pub fn map_children<B>(&self, f: &mut dyn FnMut(&A) -> B) -> Syntax<B> {
        match self {
            Syntax::Var(q) => Syntax::Var(q.clone()),
            Syntax::Local(id, lvl) => Syntax::Local(id.clone(), *lvl),
            Syntax::Lit(lit) => Syntax::Lit(map_literal(lit, f)),
            Syntax::App(head, args) => {
                Syntax::App(f(head), args.iter().map(|a| f(a)).collect())
            }
            Syntax::Abs(params, body) => Syntax::Abs(params.clone(), f(body)),
            Syntax::UncurriedApp(head, args) => {
                Syntax::UncurriedApp(f(head), args.iter().map(|a| f(a)).collect())
            }
            Syntax::UncurriedAbs(params, body) => Syntax::UncurriedAbs(params.clone(), f(body)),
            Syntax::UncurriedEffectApp(head, args) => {
                Syntax::UncurriedEffectApp(f(head), args.iter().map(|a| f(a)).collect())
            }
            Syntax::UncurriedEffectAbs(params, body) => {
                Syntax::UncurriedEffectAbs(params.clone(), f(body))
            }
            Syntax::Let(id, lvl, binding, body) => {
                Syntax::Let(id.clone(), *lvl, f(binding), f(body))
            }
            Syntax::LetRec(lvl, bindings, body) => Syntax::LetRec(
                *lvl,
                bindings.iter().map(|(id, b)| (id.clone(), f(b))).collect(),
                f(body),
            ),
            Syntax::EffectBind(id, lvl, eff, body) => {
                Syntax::EffectBind(id.clone(), *lvl, f(eff), f(body))
            }
            Syntax::EffectPure(v) => Syntax::EffectPure(f(v)),
            Syntax::Accessor(e, acc) => Syntax::Accessor(f(e), acc.clone()),
            Syntax::Update(e, props) => Syntax::Update(
                f(e),
                props.iter().map(|Prop(l, v)| Prop(l.clone(), f(v))).collect(),
            ),
            Syntax::Branch(pairs, default) => Syntax::Branch(
                pairs.iter().map(|(g, b)| (f(g), f(b))).collect(),
                default.as_ref().map(|d| f(d)),
            ),
            Syntax::PrimOp(op) => Syntax::PrimOp(map_prim_op(op, f)),
            Syntax::Fail(msg) => Syntax::Fail(msg.clone()),
            Syntax::CtorDef(ct, ty, name, fields) => {
                Syntax::CtorDef(*ct, ty.clone(), name.clone(), fields.clone())
            }
            Syntax::CtorSaturated(q, ct, ty, name, fields) => Syntax::CtorSaturated(
                q.clone(),
                *ct,
                ty.clone(),
                name.clone(),
                fields.iter().map(|(id, v)| (id.clone(), f(v))).collect(),
            ),
        }
    }
}

pub fn map_literal<A, B>(lit: &Literal<A>, f: &mut dyn FnMut(&A) -> B) -> Literal<B> {
    match lit {
        Literal::Int(n) => Literal::Int(*n),
        Literal::Number(n) => Literal::Number(*n),
        Literal::String(s) => Literal::String(s.clone()),
        Literal::Char(c) => Literal::Char(*c),
        Literal::Boolean(b) => Literal::Boolean(*b),
        Literal::Array(xs) => Literal::Array(xs.iter().map(|x| f(x)).collect()),
        Literal::Record(props) => {
            Literal::Record(props.iter().map(|Prop(l, v)| Prop(l.clone(), f(v))).collect())
        }
    }
}

pub fn map_prim_op<A, B>(op: &PrimOp<A>, f: &mut dyn FnMut(&A) -> B) -> PrimOp<B> {
    match op {
        PrimOp::Op1(op, a) => PrimOp::Op1(op.clone(), f(a)),
        PrimOp::Op2(op, a, b) => PrimOp::Op2(*op, f(a), f(b)),
    }
}

/// A queued rewrite, performed by the next evaluation pass.
#[derive(Debug, Clone)]
pub enum Rewrite {
    /// Let-inline queued: evaluation substitutes the binding; freeze would
    /// re-emit it as a plain `Let`.
    Inline(Option<Ident>, Level, BackendExpr, BackendExpr),
    /// A left-to-right flattened let chain.
    LetAssoc(Vec<(Option<Ident>, Level, BackendExpr)>, BackendExpr),
    /// The reference must not be inlined further during this pass.
    Stop(Qualified),
}

/// Build IR: a node analysis plus either a syntactic form or a rewrite.
#[derive(Debug, Clone)]
pub enum BackendExpr {
    Syntax(Analysis, Rc<Syntax<BackendExpr>>),
    Rewrite(Analysis, Rc<Rewrite>),
}

impl BackendExpr {
    pub fn analysis(&self) -> &Analysis {
        match self {
            BackendExpr::Syntax(a, _) => a,
            BackendExpr::Rewrite(a, _) => a,
        }
    }

    /// The syntactic form, when this node is not a rewrite.
    pub fn syntax(&self) -> Option<&Syntax<BackendExpr>> {
        match self {
            BackendExpr::Syntax(_, s) => Some(s),
            BackendExpr::Rewrite(..) => None,
        }
    }

    pub fn is_abs(&self) -> bool {
        matches!(
            self.syntax(),
            Some(Syntax::Abs(..))
                | Some(Syntax::UncurriedAbs(..))
                | Some(Syntax::UncurriedEffectAbs(..))
        )
    }
}

/// The rewrite-free IR handed to the code emitter and cached as the body of
/// published implementations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeutralExpr(pub Rc<Syntax<NeutralExpr>>);

impl NeutralExpr {
    pub fn new(syntax: Syntax<NeutralExpr>) -> Self {
        NeutralExpr(Rc::new(syntax))
    }

    pub fn syntax(&self) -> &Syntax<NeutralExpr> {
        &self.0
    }
}

/// The published shape of an optimized top-level declaration, consumed by
/// the inliner of later modules. The group lists the qualified members of
/// the declaration's recursive binding group (empty when non-recursive).
#[derive(Debug, Clone)]
pub enum Impl {
    Expr(Vec<Qualified>, NeutralExpr),
    /// Same as `Expr`, produced when the binding group is recursive.
    Rec(Vec<Qualified>, NeutralExpr),
    /// A literal record binding; per-field analyses enable dictionary-field
    /// inlining.
    Dict(Vec<Qualified>, Vec<(Label, (Analysis, NeutralExpr))>),
    Ctor(CtorKind, ProperName, Ident, Vec<Ident>),
}
