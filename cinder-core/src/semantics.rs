//! Normalization-by-evaluation semantics for the build IR.
//!
//! Evaluation interprets IR into semantic values: closures represented as
//! host functions, preserved let/effect forms, lazy branch alternatives,
//! neutrals stuck on free variables, and pending extern references carrying a
//! spine of applications and projections. Everything is reference-counted so
//! values can be shared through thunks and observed along several branch
//! paths; thunks memoize their forcing and are the only suspension points.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::rc::Rc;

use crate::analysis::{Analysis, Complexity};
use crate::ast::{
    normalize_props, Accessor, CtorKind, EvalRef, Ident, InlineDirective, Label, Level, Literal,
    ModuleName, Op1, Op2, OpNum, OpOrd, PrimOp, Prop, ProperName, Qualified,
};
use crate::ir::{map_literal, BackendExpr, Impl, NeutralExpr, Rewrite, Syntax};

// =============================================================================
// Thunks
// =============================================================================

/// A memoized suspension. Forcing runs the pending computation once and
/// caches the result; later forces are cheap clones of the cached value.
pub struct Thunk<T>(Rc<RefCell<ThunkState<T>>>);

enum ThunkState<T> {
    Pending(Box<dyn FnOnce() -> T>),
    Forcing,
    Done(T),
}

impl<T: Clone + 'static> Thunk<T> {
    pub fn new(f: impl FnOnce() -> T + 'static) -> Self {
        Thunk(Rc::new(RefCell::new(ThunkState::Pending(Box::new(f)))))
    }

    pub fn ready(value: T) -> Self {
        Thunk(Rc::new(RefCell::new(ThunkState::Done(value))))
    }

    pub fn force(&self) -> T {
        let state = mem::replace(&mut *self.0.borrow_mut(), ThunkState::Forcing);
        match state {
            ThunkState::Done(value) => {
                *self.0.borrow_mut() = ThunkState::Done(value.clone());
                value
            }
            ThunkState::Pending(f) => {
                let value = f();
                *self.0.borrow_mut() = ThunkState::Done(value.clone());
                value
            }
            ThunkState::Forcing => panic!("cyclic thunk forced during its own evaluation"),
        }
    }
}

impl<T> Clone for Thunk<T> {
    fn clone(&self) -> Self {
        Thunk(self.0.clone())
    }
}

impl<T> fmt::Debug for Thunk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<thunk>")
    }
}

// =============================================================================
// Semantic values
// =============================================================================

pub type SemClosure = Rc<dyn Fn(Sem) -> Sem>;
pub type GroupClosure = Rc<dyn Fn(LocalBinding) -> Sem>;
pub type CondClosure = Rc<dyn Fn(Option<SemTry>) -> Sem>;
pub type ExternEval = Rc<dyn Fn(&Env, &Qualified, &[ExternSpine]) -> Option<Sem>>;

/// A semantic value. Cheap to clone: one `Rc` bump.
#[derive(Clone)]
pub struct Sem(Rc<SemKind>);

impl Deref for Sem {
    type Target = SemKind;

    fn deref(&self) -> &SemKind {
        &self.0
    }
}

/// One step of an uncurried closure chain.
#[derive(Clone)]
pub enum MkFnStep {
    Next(Option<Ident>, Rc<dyn Fn(Sem) -> MkFnStep>),
    Applied(Sem),
}

/// A branch alternative whose guard has been evaluated. The continuation
/// receives the pending else-chain so a committed body can expose its
/// fallthrough to nested pattern groups.
#[derive(Clone)]
pub struct SemCond {
    pub guard: Sem,
    pub k: CondClosure,
}

#[derive(Clone)]
pub struct SemConditional(pub Thunk<SemCond>);

impl SemConditional {
    pub fn force(&self) -> SemCond {
        self.0.force()
    }
}

/// The else-chain carried into a committed branch body: the conditionals
/// that would have been tried next, and the final fallthrough.
#[derive(Clone)]
pub struct SemTry {
    pub conds: Vec<SemConditional>,
    pub default: Option<Thunk<Sem>>,
}

/// Pending work attached to an extern reference. Consecutive applications
/// coalesce into a single `App` with concatenated arguments.
#[derive(Clone)]
pub enum ExternSpine {
    App(Vec<Sem>),
    Accessor(Accessor),
    PrimOp(Op1),
}

pub enum SemKind {
    Lam(Option<Ident>, SemClosure),
    MkFn(MkFnStep),
    MkEffectFn(MkFnStep),
    Let(Option<Ident>, Sem, SemClosure),
    LetRec(Rc<Vec<(Ident, GroupClosure)>>, GroupClosure),
    EffectBind(Option<Ident>, Sem, SemClosure),
    EffectPure(Sem),
    Branch(Vec<SemConditional>, Option<Thunk<Sem>>),
    NeutLocal(Option<Ident>, Level),
    NeutVar(Qualified),
    NeutStop(Qualified),
    NeutData(Qualified, CtorKind, ProperName, Ident, Vec<(Ident, Sem)>),
    NeutCtorDef(Qualified, CtorKind, ProperName, Ident, Vec<Ident>),
    NeutApp(Sem, Vec<Sem>),
    NeutUncurriedApp(Sem, Vec<Sem>),
    NeutUncurriedEffectApp(Sem, Vec<Sem>),
    NeutAccessor(Sem, Accessor),
    NeutUpdate(Sem, Vec<Prop<Sem>>),
    NeutLit(Literal<Sem>),
    NeutPrimOp(PrimOp<Sem>),
    NeutFail(String),
    /// A cross-declaration reference awaiting more spine; the thunk reifies
    /// it as a neutral if inlining never commits.
    Extern(Qualified, Vec<ExternSpine>, Thunk<Sem>),
}

impl Sem {
    pub fn new(kind: SemKind) -> Sem {
        Sem(Rc::new(kind))
    }

    pub fn lam(ident: Option<Ident>, f: impl Fn(Sem) -> Sem + 'static) -> Sem {
        Sem::new(SemKind::Lam(ident, Rc::new(f)))
    }

    pub fn let_(ident: Option<Ident>, value: Sem, k: impl Fn(Sem) -> Sem + 'static) -> Sem {
        Sem::new(SemKind::Let(ident, value, Rc::new(k)))
    }

    pub fn effect_bind(ident: Option<Ident>, eff: Sem, k: impl Fn(Sem) -> Sem + 'static) -> Sem {
        Sem::new(SemKind::EffectBind(ident, eff, Rc::new(k)))
    }

    pub fn effect_pure(value: Sem) -> Sem {
        Sem::new(SemKind::EffectPure(value))
    }

    pub fn branch(conds: Vec<SemConditional>, default: Option<Thunk<Sem>>) -> Sem {
        Sem::new(SemKind::Branch(conds, default))
    }

    pub fn neut_local(ident: Option<Ident>, level: Level) -> Sem {
        Sem::new(SemKind::NeutLocal(ident, level))
    }

    pub fn neut_var(q: Qualified) -> Sem {
        Sem::new(SemKind::NeutVar(q))
    }

    pub fn neut_stop(q: Qualified) -> Sem {
        Sem::new(SemKind::NeutStop(q))
    }

    pub fn neut_fail(msg: impl Into<String>) -> Sem {
        Sem::new(SemKind::NeutFail(msg.into()))
    }

    pub fn neut_lit(lit: Literal<Sem>) -> Sem {
        Sem::new(SemKind::NeutLit(lit))
    }

    pub fn int(n: i32) -> Sem {
        Sem::neut_lit(Literal::Int(n))
    }

    pub fn number(n: f64) -> Sem {
        Sem::neut_lit(Literal::Number(n))
    }

    pub fn boolean(b: bool) -> Sem {
        Sem::neut_lit(Literal::Boolean(b))
    }

    pub fn string(s: impl Into<String>) -> Sem {
        Sem::neut_lit(Literal::String(s.into()))
    }

    pub fn neut_accessor(target: Sem, acc: Accessor) -> Sem {
        Sem::new(SemKind::NeutAccessor(target, acc))
    }

    /// Construct a neutral application, flattening a nested `NeutApp` head so
    /// application spines are never nested.
    pub fn neut_app(head: Sem, args: Vec<Sem>) -> Sem {
        if args.is_empty() {
            return head;
        }
        let flattened = match &*head {
            SemKind::NeutApp(inner, prev) => Some((inner.clone(), prev.clone())),
            _ => None,
        };
        match flattened {
            Some((inner, mut all)) => {
                all.extend(args);
                Sem::new(SemKind::NeutApp(inner, all))
            }
            None => Sem::new(SemKind::NeutApp(head, args)),
        }
    }
}

fn bool_of(sem: &Sem) -> Option<bool> {
    match &**sem {
        SemKind::NeutLit(Literal::Boolean(b)) => Some(*b),
        _ => None,
    }
}

fn int_of(sem: &Sem) -> Option<i32> {
    match &**sem {
        SemKind::NeutLit(Literal::Int(n)) => Some(*n),
        _ => None,
    }
}

fn number_of(sem: &Sem) -> Option<f64> {
    match &**sem {
        SemKind::NeutLit(Literal::Number(n)) => Some(*n),
        _ => None,
    }
}

fn char_of(sem: &Sem) -> Option<char> {
    match &**sem {
        SemKind::NeutLit(Literal::Char(c)) => Some(*c),
        _ => None,
    }
}

fn string_of(sem: &Sem) -> Option<&str> {
    match &**sem {
        SemKind::NeutLit(Literal::String(s)) => Some(s),
        _ => None,
    }
}

// =============================================================================
// Environment
// =============================================================================

/// How to fold integer arithmetic whose result may not be representable.
/// `LeaveUnreduced` keeps the expression for the emitter to translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntFoldMode {
    #[default]
    LeaveUnreduced,
    Wrap,
}

#[derive(Clone)]
pub enum LocalBinding {
    One(Sem),
    /// A recursive group: members share a level and are found by ident.
    Group(Rc<Vec<(Ident, Thunk<Sem>)>>),
}

/// The evaluation environment. Cloned freely: all collections inside are
/// persistent or reference-counted.
#[derive(Clone)]
pub struct Env {
    pub module: ModuleName,
    pub extern_eval: ExternEval,
    pub locals: im::HashMap<Level, LocalBinding>,
    pub directives: im::HashMap<EvalRef, InlineDirective>,
    /// The pending else-chain threaded into committed branch bodies.
    pub fallthrough: Option<SemTry>,
    pub int_fold: IntFoldMode,
}

impl Env {
    pub fn new(
        module: ModuleName,
        extern_eval: ExternEval,
        directives: im::HashMap<EvalRef, InlineDirective>,
        int_fold: IntFoldMode,
    ) -> Env {
        Env {
            module,
            extern_eval,
            locals: im::HashMap::new(),
            directives,
            fallthrough: None,
            int_fold,
        }
    }

    pub fn bind_at(&self, level: Level, binding: LocalBinding) -> Env {
        let mut env = self.clone();
        env.locals = env.locals.update(level, binding);
        env
    }

    pub fn lookup_local(&self, ident: &Option<Ident>, level: Level) -> Sem {
        match self.locals.get(&level) {
            Some(LocalBinding::One(sem)) => sem.clone(),
            Some(LocalBinding::Group(members)) => {
                let ident = ident.as_ref().unwrap_or_else(|| {
                    panic!(
                        "anonymous reference into recursive group at {} in module {}",
                        level, self.module
                    )
                });
                members
                    .iter()
                    .find(|(name, _)| name == ident)
                    .map(|(_, thunk)| thunk.force())
                    .unwrap_or_else(|| {
                        panic!(
                            "unbound group member {} at {} in module {}",
                            ident, level, self.module
                        )
                    })
            }
            None => panic!(
                "unbound local {:?} at {} in module {}",
                ident, level, self.module
            ),
        }
    }

    /// The directive for a reference, falling back from an accessor-narrowed
    /// extern ref to the whole declaration.
    pub fn directive_for(&self, r: &EvalRef) -> Option<InlineDirective> {
        if let Some(d) = self.directives.get(r) {
            return Some(*d);
        }
        if let EvalRef::Extern(q, Some(_)) = r {
            return self
                .directives
                .get(&EvalRef::Extern(q.clone(), None))
                .copied();
        }
        None
    }

    /// Install `InlineNever` stops for every member of a binding group, so
    /// inlining one member cannot re-enter the group.
    pub fn with_stops(&self, group: &[Qualified]) -> Env {
        let mut env = self.clone();
        for q in group {
            env.directives = env
                .directives
                .update(EvalRef::Extern(q.clone(), None), InlineDirective::Never);
        }
        env
    }

    /// The environment for evaluating a published implementation body:
    /// no locals, no pending else-chain, the declaring module current.
    pub fn impl_env(&self, q: &Qualified) -> Env {
        let mut env = self.clone();
        env.locals = im::HashMap::new();
        env.fallthrough = None;
        if let Some(module) = &q.module {
            env.module = module.clone();
        }
        env
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Anything the evaluator can interpret: build IR and frozen neutral IR
/// (published implementation bodies) share one evaluator.
pub trait Eval: Clone + 'static {
    fn eval(&self, env: &Env) -> Sem;
}

impl Eval for BackendExpr {
    fn eval(&self, env: &Env) -> Sem {
        match self {
            BackendExpr::Syntax(_, syntax) => eval_syntax(env, syntax),
            BackendExpr::Rewrite(_, rewrite) => match &**rewrite {
                Rewrite::Inline(_, level, binding, body) => {
                    let value = binding.eval(env);
                    body.eval(&env.bind_at(*level, LocalBinding::One(value)))
                }
                Rewrite::LetAssoc(bindings, body) => eval_let_assoc(env, bindings, body),
                Rewrite::Stop(q) => Sem::neut_stop(q.clone()),
            },
        }
    }
}

impl Eval for NeutralExpr {
    fn eval(&self, env: &Env) -> Sem {
        eval_syntax(env, self.syntax())
    }
}

fn eval_let_assoc(
    env: &Env,
    bindings: &[(Option<Ident>, Level, BackendExpr)],
    body: &BackendExpr,
) -> Sem {
    match bindings.split_first() {
        None => body.eval(env),
        Some(((ident, level, binding), rest)) => {
            let value = binding.eval(env);
            let env = env.clone();
            let rest = rest.to_vec();
            let body = body.clone();
            let level = *level;
            Sem::let_(ident.clone(), value, move |v| {
                eval_let_assoc(&env.bind_at(level, LocalBinding::One(v)), &rest, &body)
            })
        }
    }
}

pub fn eval_syntax<T: Eval>(env: &Env, syntax: &Syntax<T>) -> Sem {
    match syntax {
        Syntax::Var(q) => eval_extern(env, q, Vec::new()),
        Syntax::Local(ident, level) => env.lookup_local(ident, *level),
        Syntax::Lit(lit) => Sem::neut_lit(map_literal(lit, &mut |c| c.eval(env))),
        Syntax::App(head, args) => {
            let head = head.eval(env);
            let args = args.iter().map(|a| a.eval(env)).collect();
            eval_app(env, head, args)
        }
        Syntax::Abs(params, body) => eval_abs(env, params, body),
        Syntax::UncurriedAbs(params, body) => {
            Sem::new(SemKind::MkFn(eval_uncurried_abs(env, params, body)))
        }
        Syntax::UncurriedEffectAbs(params, body) => {
            Sem::new(SemKind::MkEffectFn(eval_uncurried_abs(env, params, body)))
        }
        Syntax::UncurriedApp(head, args) => {
            let head = head.eval(env);
            let args: Vec<Sem> = args.iter().map(|a| a.eval(env)).collect();
            eval_uncurried_app(env, head, args, false)
        }
        Syntax::UncurriedEffectApp(head, args) => {
            let head = head.eval(env);
            let args: Vec<Sem> = args.iter().map(|a| a.eval(env)).collect();
            eval_uncurried_app(env, head, args, true)
        }
        Syntax::Let(ident, level, binding, body) => {
            let value = binding.eval(env);
            let env2 = env.clone();
            let body = body.clone();
            let level = *level;
            Sem::let_(ident.clone(), value, move |v| {
                body.eval(&env2.bind_at(level, LocalBinding::One(v)))
            })
        }
        Syntax::LetRec(level, bindings, body) => {
            let level = *level;
            let group: Vec<(Ident, GroupClosure)> = bindings
                .iter()
                .map(|(ident, binding)| {
                    let env2 = env.clone();
                    let binding = binding.clone();
                    let k: GroupClosure =
                        Rc::new(move |group| binding.eval(&env2.bind_at(level, group)));
                    (ident.clone(), k)
                })
                .collect();
            let env2 = env.clone();
            let body = body.clone();
            let body_k: GroupClosure = Rc::new(move |group| body.eval(&env2.bind_at(level, group)));
            Sem::new(SemKind::LetRec(Rc::new(group), body_k))
        }
        Syntax::EffectBind(ident, level, eff, body) => {
            let value = eff.eval(env);
            let env2 = env.clone();
            let body = body.clone();
            let level = *level;
            Sem::effect_bind(ident.clone(), value, move |v| {
                body.eval(&env2.bind_at(level, LocalBinding::One(v)))
            })
        }
        Syntax::EffectPure(value) => Sem::effect_pure(value.eval(env)),
        Syntax::Accessor(target, acc) => eval_accessor(env, target.eval(env), acc.clone()),
        Syntax::Update(target, props) => {
            let target = target.eval(env);
            let props: Vec<Prop<Sem>> = props
                .iter()
                .map(|Prop(l, v)| Prop(l.clone(), v.eval(env)))
                .collect();
            eval_update(env, target, props)
        }
        Syntax::Branch(pairs, default) => eval_branch(env, pairs, default.as_ref()),
        Syntax::PrimOp(op) => match op {
            PrimOp::Op1(op1, a) => eval_prim1(env, op1.clone(), a.eval(env)),
            PrimOp::Op2(op2, l, r) => {
                let lhs = l.eval(env);
                let rhs = r.eval(env);
                eval_prim2(env, *op2, lhs, rhs)
            }
        },
        Syntax::Fail(msg) => Sem::neut_fail(msg.clone()),
        Syntax::CtorDef(ct, ty, name, fields) => Sem::new(SemKind::NeutCtorDef(
            Qualified::new(env.module.clone(), name.clone()),
            *ct,
            ty.clone(),
            name.clone(),
            fields.clone(),
        )),
        Syntax::CtorSaturated(q, ct, ty, name, fields) => Sem::new(SemKind::NeutData(
            q.clone(),
            *ct,
            ty.clone(),
            name.clone(),
            fields
                .iter()
                .map(|(id, v)| (id.clone(), v.eval(env)))
                .collect(),
        )),
    }
}

fn eval_abs<T: Eval>(env: &Env, params: &[(Option<Ident>, Level)], body: &T) -> Sem {
    match params.split_first() {
        None => body.eval(env),
        Some(((ident, level), rest)) => {
            let env = env.clone();
            let rest = rest.to_vec();
            let body = body.clone();
            let level = *level;
            Sem::lam(ident.clone(), move |v| {
                eval_abs(&env.bind_at(level, LocalBinding::One(v)), &rest, &body)
            })
        }
    }
}

fn eval_uncurried_abs<T: Eval>(env: &Env, params: &[(Option<Ident>, Level)], body: &T) -> MkFnStep {
    match params.split_first() {
        None => MkFnStep::Applied(body.eval(env)),
        Some(((ident, level), rest)) => {
            let env = env.clone();
            let rest = rest.to_vec();
            let body = body.clone();
            let level = *level;
            MkFnStep::Next(
                ident.clone(),
                Rc::new(move |a| {
                    eval_uncurried_abs(&env.bind_at(level, LocalBinding::One(a)), &rest, &body)
                }),
            )
        }
    }
}

// =============================================================================
// Application
// =============================================================================

enum AppHead {
    Lam(SemClosure),
    Extern(Qualified, Vec<ExternSpine>),
    Let(Option<Ident>, Sem, SemClosure),
    CtorDef(Qualified, CtorKind, ProperName, Ident, Vec<Ident>),
    Neutral,
}

/// Reduce a curried application. Arguments are consumed one at a time; each
/// beta step introduces a `Let` to preserve sharing of the argument.
pub fn eval_app(env: &Env, head: Sem, args: Vec<Sem>) -> Sem {
    if args.is_empty() {
        return head;
    }
    let case = match &*head {
        SemKind::Lam(_, k) => AppHead::Lam(k.clone()),
        SemKind::Extern(q, spine, _) => AppHead::Extern(q.clone(), spine.clone()),
        SemKind::Let(ident, value, k) => AppHead::Let(ident.clone(), value.clone(), k.clone()),
        SemKind::NeutCtorDef(q, ct, ty, name, fields) if fields.len() == args.len() => {
            AppHead::CtorDef(q.clone(), *ct, ty.clone(), name.clone(), fields.clone())
        }
        _ => AppHead::Neutral,
    };
    match case {
        AppHead::Lam(k) => {
            let mut args = args;
            let arg = args.remove(0);
            let env2 = env.clone();
            Sem::let_(None, arg, move |v| eval_app(&env2, k(v), args.clone()))
        }
        AppHead::Extern(q, spine) => {
            let mut args = args;
            let arg = args.remove(0);
            let head = eval_extern(env, &q, snoc_app(&spine, arg));
            eval_app(env, head, args)
        }
        AppHead::Let(ident, value, k) => {
            let env2 = env.clone();
            Sem::let_(ident, value, move |v| {
                let env3 = env2.clone();
                let args = args.clone();
                Sem::let_(None, k(v), move |f| eval_app(&env3, f.clone(), args.clone()))
            })
        }
        AppHead::CtorDef(q, ct, ty, name, fields) => Sem::new(SemKind::NeutData(
            q,
            ct,
            ty,
            name,
            fields.into_iter().zip(args).collect(),
        )),
        AppHead::Neutral => Sem::neut_app(head, args),
    }
}

fn eval_uncurried_app(env: &Env, head: Sem, args: Vec<Sem>, effect: bool) -> Sem {
    eval_assoc_let(
        env,
        head,
        Rc::new(move |_env, h| {
            let step = match (&*h, effect) {
                (SemKind::MkFn(step), false) => Some(step.clone()),
                (SemKind::MkEffectFn(step), true) => Some(step.clone()),
                _ => None,
            };
            if let Some(result) = step.and_then(|s| apply_mk_fn(s, &args)) {
                return result;
            }
            if effect {
                Sem::new(SemKind::NeutUncurriedEffectApp(h, args.clone()))
            } else {
                Sem::new(SemKind::NeutUncurriedApp(h, args.clone()))
            }
        }),
    )
}

/// Feed arguments through an uncurried closure chain. Returns `None` unless
/// the arity matches exactly.
fn apply_mk_fn(mut step: MkFnStep, args: &[Sem]) -> Option<Sem> {
    for arg in args {
        match step {
            MkFnStep::Next(_, f) => step = f(arg.clone()),
            MkFnStep::Applied(_) => return None,
        }
    }
    match step {
        MkFnStep::Applied(sem) => Some(sem),
        MkFnStep::Next(..) => None,
    }
}

/// Coerce a curried semantic value into an `n`-ary uncurried closure chain.
/// Foreign interop layers use this to adapt implementations to FFI shapes.
pub fn eval_mk_fn(env: &Env, n: usize, sem: Sem) -> MkFnStep {
    if n == 0 {
        return MkFnStep::Applied(sem);
    }
    let lam = match &*sem {
        SemKind::Lam(ident, k) => Some((ident.clone(), k.clone())),
        _ => None,
    };
    match lam {
        Some((ident, k)) => {
            let env = env.clone();
            MkFnStep::Next(ident, Rc::new(move |a| eval_mk_fn(&env, n - 1, k(a))))
        }
        None => {
            let env = env.clone();
            MkFnStep::Next(
                None,
                Rc::new(move |a| {
                    let applied = eval_app(&env, sem.clone(), vec![a]);
                    eval_mk_fn(&env, n - 1, applied)
                }),
            )
        }
    }
}

/// Push a computation under any surrounding preserved lets, so reductions
/// see through bindings without losing them.
pub fn eval_assoc_let(env: &Env, sem: Sem, f: Rc<dyn Fn(&Env, Sem) -> Sem>) -> Sem {
    let case = match &*sem {
        SemKind::Let(ident, value, k) => Some((ident.clone(), value.clone(), k.clone())),
        _ => None,
    };
    match case {
        Some((ident, value, k)) => {
            let env2 = env.clone();
            let f2 = f.clone();
            Sem::let_(ident, value, move |v| {
                eval_assoc_let(&env2, k(v), f2.clone())
            })
        }
        None => f(env, sem),
    }
}

// =============================================================================
// Accessors and updates
// =============================================================================

pub fn eval_accessor(env: &Env, target: Sem, acc: Accessor) -> Sem {
    eval_assoc_let(
        env,
        target,
        Rc::new(move |env, v| {
            if let SemKind::Extern(q, spine, _) = &*v {
                let q = q.clone();
                let mut spine = spine.clone();
                spine.push(ExternSpine::Accessor(acc.clone()));
                return eval_extern(env, &q, spine);
            }
            match (&*v, &acc) {
                (SemKind::NeutLit(Literal::Record(props)), Accessor::GetProp(label)) => {
                    match props.iter().find(|p| p.label() == label) {
                        Some(prop) => prop.value().clone(),
                        None => Sem::neut_accessor(v.clone(), acc.clone()),
                    }
                }
                (SemKind::NeutLit(Literal::Array(xs)), Accessor::GetIndex(n)) => {
                    match xs.get(*n as usize) {
                        Some(x) => x.clone(),
                        None => Sem::neut_accessor(v.clone(), acc.clone()),
                    }
                }
                (SemKind::NeutData(_, _, _, _, fields), Accessor::GetOffset(n)) => {
                    match fields.get(*n as usize) {
                        Some((_, value)) => value.clone(),
                        None => Sem::neut_accessor(v.clone(), acc.clone()),
                    }
                }
                _ => Sem::neut_accessor(v.clone(), acc.clone()),
            }
        }),
    )
}

pub fn eval_update(env: &Env, target: Sem, props: Vec<Prop<Sem>>) -> Sem {
    eval_assoc_let(
        env,
        target,
        Rc::new(move |_env, v| match &*v {
            SemKind::NeutLit(Literal::Record(old)) => {
                let mut merged = props.clone();
                merged.extend(old.iter().cloned());
                Sem::neut_lit(Literal::Record(normalize_props(merged)))
            }
            _ => Sem::new(SemKind::NeutUpdate(v.clone(), props.clone())),
        }),
    )
}

// =============================================================================
// Branches
// =============================================================================

pub fn eval_branch<T: Eval>(env: &Env, pairs: &[(T, T)], default: Option<&T>) -> Sem {
    let mut conds: Vec<SemConditional> = pairs
        .iter()
        .map(|(guard, body)| {
            let env2 = env.clone();
            let guard = guard.clone();
            let body = body.clone();
            SemConditional(Thunk::new(move || {
                let guard = guard.eval(&env2);
                let env3 = env2.clone();
                let k: CondClosure = Rc::new(move |fallthrough| {
                    let mut env4 = env3.clone();
                    env4.fallthrough = fallthrough;
                    body.eval(&env4)
                });
                SemCond { guard, k }
            }))
        })
        .collect();
    let default: Option<Thunk<Sem>> = match default {
        Some(d) => {
            let env2 = env.clone();
            let d = d.clone();
            Some(Thunk::new(move || d.eval(&env2)))
        }
        // With no fallthrough of its own, a branch adopts the pending
        // else-chain; this merges pattern groups split by the front end.
        None => match &env.fallthrough {
            Some(t) => {
                conds.extend(t.conds.iter().cloned());
                t.default.clone()
            }
            None => None,
        },
    };
    eval_branches(env, conds, default)
}

/// Walk the conditionals left to right, forcing each guard. A literal-true
/// guard commits its branch and packages the remaining alternatives as the
/// committed body's else-chain; a literal-false guard is dropped.
pub fn eval_branches(_env: &Env, conds: Vec<SemConditional>, default: Option<Thunk<Sem>>) -> Sem {
    let mut acc: Vec<SemConditional> = Vec::new();
    for (i, conditional) in conds.iter().enumerate() {
        let cond = conditional.force();
        match bool_of(&cond.guard) {
            Some(true) => {
                let rest = SemTry {
                    conds: conds[i + 1..].to_vec(),
                    default: default.clone(),
                };
                let k = cond.k.clone();
                let committed = Thunk::new(move || k(Some(rest)));
                return if acc.is_empty() {
                    committed.force()
                } else {
                    Sem::branch(acc, Some(committed))
                };
            }
            Some(false) => {}
            None => acc.push(conditional.clone()),
        }
    }
    if acc.is_empty() {
        match default {
            Some(d) => d.force(),
            None => Sem::neut_fail("Failed pattern match"),
        }
    } else {
        Sem::branch(acc, default)
    }
}

// =============================================================================
// Primitive operators
// =============================================================================

pub fn eval_prim1(env: &Env, op: Op1, operand: Sem) -> Sem {
    if let SemKind::Extern(q, spine, _) = &*operand {
        let q = q.clone();
        let mut spine = spine.clone();
        spine.push(ExternSpine::PrimOp(op.clone()));
        return eval_extern(env, &q, spine);
    }
    eval_assoc_let(
        env,
        operand,
        Rc::new(move |env, v| fold_op1(env, op.clone(), v)),
    )
}

pub fn eval_prim2(env: &Env, op: Op2, lhs: Sem, rhs: Sem) -> Sem {
    eval_assoc_let(
        env,
        lhs,
        Rc::new(move |env, l| {
            let rhs = rhs.clone();
            let l = l.clone();
            eval_assoc_let(
                env,
                rhs,
                Rc::new(move |env, r| fold_op2(env, op, l.clone(), r)),
            )
        }),
    )
}

fn negate_comparison(op: Op2) -> Option<Op2> {
    match op {
        Op2::BooleanOrd(o) => Some(Op2::BooleanOrd(o.negate())),
        Op2::CharOrd(o) => Some(Op2::CharOrd(o.negate())),
        Op2::IntOrd(o) => Some(Op2::IntOrd(o.negate())),
        Op2::NumberOrd(o) => Some(Op2::NumberOrd(o.negate())),
        Op2::StringOrd(o) => Some(Op2::StringOrd(o.negate())),
        _ => None,
    }
}

fn fold_op1(env: &Env, op: Op1, v: Sem) -> Sem {
    let folded = match (&op, &*v) {
        (Op1::Not, SemKind::NeutLit(Literal::Boolean(b))) => Some(Sem::boolean(!b)),
        (Op1::Not, SemKind::NeutPrimOp(PrimOp::Op1(Op1::Not, inner))) => Some(inner.clone()),
        (Op1::Not, SemKind::NeutPrimOp(PrimOp::Op2(op2, l, r))) => negate_comparison(*op2)
            .map(|neg| Sem::new(SemKind::NeutPrimOp(PrimOp::Op2(neg, l.clone(), r.clone())))),
        (Op1::IntBitNot, SemKind::NeutLit(Literal::Int(n))) => Some(Sem::int(!n)),
        (Op1::IntNegate, SemKind::NeutLit(Literal::Int(n))) => match env.int_fold {
            IntFoldMode::Wrap => Some(Sem::int(n.wrapping_neg())),
            IntFoldMode::LeaveUnreduced => n.checked_neg().map(Sem::int),
        },
        (Op1::NumberNegate, SemKind::NeutLit(Literal::Number(n))) => Some(Sem::number(-n)),
        (Op1::ArrayLength, SemKind::NeutLit(Literal::Array(xs))) => {
            Some(Sem::int(xs.len() as i32))
        }
        (Op1::IsTag(q), SemKind::NeutData(q2, ..)) => Some(Sem::boolean(q == q2)),
        _ => None,
    };
    folded.unwrap_or_else(|| Sem::new(SemKind::NeutPrimOp(PrimOp::Op1(op, v))))
}

fn fold_int_num(mode: IntFoldMode, op: OpNum, a: i32, b: i32) -> Option<i32> {
    match mode {
        IntFoldMode::Wrap => match op {
            OpNum::Add => Some(a.wrapping_add(b)),
            OpNum::Subtract => Some(a.wrapping_sub(b)),
            OpNum::Multiply => Some(a.wrapping_mul(b)),
            OpNum::Divide => {
                if b == 0 {
                    None
                } else {
                    Some(a.wrapping_div(b))
                }
            }
        },
        IntFoldMode::LeaveUnreduced => match op {
            OpNum::Add => a.checked_add(b),
            OpNum::Subtract => a.checked_sub(b),
            OpNum::Multiply => a.checked_mul(b),
            OpNum::Divide => {
                if b == 0 {
                    None
                } else {
                    a.checked_div(b)
                }
            }
        },
    }
}

fn fold_number_num(op: OpNum, a: f64, b: f64) -> f64 {
    match op {
        OpNum::Add => a + b,
        OpNum::Subtract => a - b,
        OpNum::Multiply => a * b,
        OpNum::Divide => a / b,
    }
}

/// Combine adjacent literal runs of a string append, up to two nodes deep on
/// either side, preserving the left-associated shape of the rest.
fn fold_string_append(l: Sem, r: Sem) -> Sem {
    let append = |a: Sem, b: Sem| Sem::new(SemKind::NeutPrimOp(PrimOp::Op2(Op2::StringAppend, a, b)));
    match (string_of(&l), string_of(&r)) {
        (Some(a), Some(b)) => return Sem::string(format!("{}{}", a, b)),
        (Some(a), None) => {
            if let SemKind::NeutPrimOp(PrimOp::Op2(Op2::StringAppend, rl, rr)) = &*r {
                if let Some(b) = string_of(rl) {
                    return append(Sem::string(format!("{}{}", a, b)), rr.clone());
                }
            }
        }
        (None, Some(b)) => {
            if let SemKind::NeutPrimOp(PrimOp::Op2(Op2::StringAppend, ll, lr)) = &*l {
                if let Some(a) = string_of(lr) {
                    return append(ll.clone(), Sem::string(format!("{}{}", a, b)));
                }
            }
        }
        (None, None) => {
            let shapes = match (&*l, &*r) {
                (
                    SemKind::NeutPrimOp(PrimOp::Op2(Op2::StringAppend, ll, lr)),
                    SemKind::NeutPrimOp(PrimOp::Op2(Op2::StringAppend, rl, rr)),
                ) => match (string_of(lr), string_of(rl)) {
                    (Some(a), Some(b)) => {
                        Some((ll.clone(), format!("{}{}", a, b), rr.clone()))
                    }
                    _ => None,
                },
                _ => None,
            };
            if let Some((left, mid, right)) = shapes {
                return append(append(left, Sem::string(mid)), right);
            }
        }
    }
    append(l, r)
}

fn fold_op2(env: &Env, op: Op2, l: Sem, r: Sem) -> Sem {
    let folded: Option<Sem> = match op {
        Op2::BooleanAnd => match (bool_of(&l), bool_of(&r)) {
            (Some(true), _) => Some(r.clone()),
            (Some(false), _) => Some(Sem::boolean(false)),
            (None, Some(true)) => Some(l.clone()),
            _ => None,
        },
        Op2::BooleanOr => match (bool_of(&l), bool_of(&r)) {
            (Some(false), _) => Some(r.clone()),
            (Some(true), _) => Some(Sem::boolean(true)),
            (None, Some(false)) => Some(l.clone()),
            _ => None,
        },
        Op2::BooleanOrd(o) => match (bool_of(&l), bool_of(&r)) {
            (Some(a), Some(b)) => Some(Sem::boolean(o.compare(a, b))),
            // Equality against a boolean literal folds to the other operand
            // or its negation.
            (Some(a), None) if o == OpOrd::Eq => Some(if a {
                r.clone()
            } else {
                eval_prim1(env, Op1::Not, r.clone())
            }),
            (None, Some(b)) if o == OpOrd::Eq => Some(if b {
                l.clone()
            } else {
                eval_prim1(env, Op1::Not, l.clone())
            }),
            (Some(a), None) if o == OpOrd::NotEq => Some(if a {
                eval_prim1(env, Op1::Not, r.clone())
            } else {
                r.clone()
            }),
            (None, Some(b)) if o == OpOrd::NotEq => Some(if b {
                eval_prim1(env, Op1::Not, l.clone())
            } else {
                l.clone()
            }),
            _ => None,
        },
        Op2::IntOrd(o) => match (int_of(&l), int_of(&r)) {
            (Some(a), Some(b)) => Some(Sem::boolean(o.compare(a, b))),
            _ => None,
        },
        Op2::NumberOrd(o) => match (number_of(&l), number_of(&r)) {
            (Some(a), Some(b)) => Some(Sem::boolean(o.compare(a, b))),
            _ => None,
        },
        Op2::CharOrd(o) => match (char_of(&l), char_of(&r)) {
            (Some(a), Some(b)) => Some(Sem::boolean(o.compare(a, b))),
            _ => None,
        },
        Op2::StringOrd(o) => match (string_of(&l), string_of(&r)) {
            (Some(a), Some(b)) => Some(Sem::boolean(o.compare(a, b))),
            _ => None,
        },
        Op2::IntNum(o) => match (int_of(&l), int_of(&r)) {
            (Some(a), Some(b)) => fold_int_num(env.int_fold, o, a, b).map(Sem::int),
            _ => None,
        },
        Op2::NumberNum(o) => match (number_of(&l), number_of(&r)) {
            (Some(a), Some(b)) => Some(Sem::number(fold_number_num(o, a, b))),
            _ => None,
        },
        Op2::IntBitAnd => match (int_of(&l), int_of(&r)) {
            (Some(a), Some(b)) => Some(Sem::int(a & b)),
            _ => None,
        },
        Op2::IntBitOr => match (int_of(&l), int_of(&r)) {
            (Some(a), Some(b)) => Some(Sem::int(a | b)),
            _ => None,
        },
        Op2::IntBitXor => match (int_of(&l), int_of(&r)) {
            (Some(a), Some(b)) => Some(Sem::int(a ^ b)),
            _ => None,
        },
        Op2::IntBitShiftLeft => match (int_of(&l), int_of(&r)) {
            (Some(a), Some(b)) => Some(Sem::int(a << (b & 31))),
            _ => None,
        },
        Op2::IntBitShiftRight => match (int_of(&l), int_of(&r)) {
            (Some(a), Some(b)) => Some(Sem::int(a >> (b & 31))),
            _ => None,
        },
        Op2::IntBitZeroFillShiftRight => match (int_of(&l), int_of(&r)) {
            (Some(a), Some(b)) => Some(Sem::int(((a as u32) >> (b & 31) as u32) as i32)),
            _ => None,
        },
        Op2::StringAppend => return fold_string_append(l, r),
        Op2::ArrayIndex => {
            let element = match (&*l, int_of(&r)) {
                (SemKind::NeutLit(Literal::Array(xs)), Some(n)) if n >= 0 => {
                    xs.get(n as usize).cloned()
                }
                _ => None,
            };
            element
        }
    };
    folded.unwrap_or_else(|| Sem::new(SemKind::NeutPrimOp(PrimOp::Op2(op, l, r))))
}

// =============================================================================
// Extern dispatch
// =============================================================================

fn snoc_app(spine: &[ExternSpine], arg: Sem) -> Vec<ExternSpine> {
    let mut spine = spine.to_vec();
    match spine.last_mut() {
        Some(ExternSpine::App(args)) => args.push(arg),
        _ => spine.push(ExternSpine::App(vec![arg])),
    }
    spine
}

/// Reify an extern reference as a neutral application of its spine.
fn neutralize_spine(base: Sem, spine: &[ExternSpine]) -> Sem {
    let mut sem = base;
    for item in spine {
        sem = match item {
            ExternSpine::App(args) => Sem::neut_app(sem, args.clone()),
            ExternSpine::Accessor(acc) => Sem::neut_accessor(sem, acc.clone()),
            ExternSpine::PrimOp(op) => {
                Sem::new(SemKind::NeutPrimOp(PrimOp::Op1(op.clone(), sem)))
            }
        };
    }
    sem
}

/// Apply the remaining spine semantically after an implementation commits.
fn apply_spine(env: &Env, base: Sem, spine: &[ExternSpine]) -> Sem {
    let mut sem = base;
    for item in spine {
        sem = match item {
            ExternSpine::App(args) => eval_app(env, sem, args.clone()),
            ExternSpine::Accessor(acc) => eval_accessor(env, sem, acc.clone()),
            ExternSpine::PrimOp(op) => eval_prim1(env, op.clone(), sem),
        };
    }
    sem
}

pub fn eval_extern(env: &Env, q: &Qualified, spine: Vec<ExternSpine>) -> Sem {
    if spine.is_empty() {
        if env.directive_for(&EvalRef::Extern(q.clone(), None)) == Some(InlineDirective::Never) {
            return Sem::neut_stop(q.clone());
        }
    } else if let [ExternSpine::Accessor(acc)] = spine.as_slice() {
        if env.directive_for(&EvalRef::Extern(q.clone(), Some(acc.clone())))
            == Some(InlineDirective::Never)
        {
            return Sem::neut_accessor(Sem::neut_stop(q.clone()), acc.clone());
        }
    }
    match (env.extern_eval)(env, q, &spine) {
        Some(sem) => sem,
        None => {
            let q2 = q.clone();
            let spine2 = spine.clone();
            let fallback = Thunk::new(move || neutralize_spine(Sem::neut_var(q2), &spine2));
            Sem::new(SemKind::Extern(q.clone(), spine, fallback))
        }
    }
}

fn is_abs_neutral(expr: &NeutralExpr) -> bool {
    matches!(
        expr.syntax(),
        Syntax::Abs(..) | Syntax::UncurriedAbs(..) | Syntax::UncurriedEffectAbs(..)
    )
}

fn neutral_is_trivial(expr: &NeutralExpr) -> bool {
    match expr.syntax() {
        Syntax::Var(_) | Syntax::Local(..) => true,
        Syntax::Lit(lit) => lit.is_scalar(),
        _ => false,
    }
}

pub fn should_inline_extern_literal(analysis: &Analysis, lit: &Literal<NeutralExpr>) -> bool {
    match lit {
        Literal::Array(xs) => analysis.size < 16 && xs.iter().all(neutral_is_trivial),
        Literal::Record(props) => {
            analysis.size < 16 && props.iter().all(|p| neutral_is_trivial(p.value()))
        }
        _ => true,
    }
}

pub fn should_inline_extern_app(
    env: &Env,
    r: &EvalRef,
    analysis: &Analysis,
    is_abs: bool,
    argc: usize,
) -> bool {
    match env.directive_for(r) {
        Some(InlineDirective::Never) => false,
        Some(InlineDirective::Always) => true,
        Some(InlineDirective::Arity(n)) => argc >= n as usize,
        None => {
            (analysis.complexity <= Complexity::Deref && analysis.size < 16)
                || (is_abs && analysis.size < 16)
        }
    }
}

pub fn should_inline_extern_accessor(env: &Env, r: &EvalRef, analysis: &Analysis) -> bool {
    match env.directive_for(r) {
        Some(InlineDirective::Never) => false,
        Some(InlineDirective::Always) => true,
        Some(InlineDirective::Arity(_)) => false,
        None => analysis.complexity <= Complexity::Deref && analysis.size < 16,
    }
}

/// Decide whether a previously compiled declaration commits to a value for
/// the given spine, by implementation shape and directive.
pub fn eval_extern_from_impl(
    env: &Env,
    q: &Qualified,
    analysis: &Analysis,
    impl_: &Impl,
    spine: &[ExternSpine],
) -> Option<Sem> {
    match impl_ {
        Impl::Ctor(ct, ty, name, fields) => match spine {
            // Only a nullary constructor commits without a spine; applied
            // constructors wait for the coalesced application so partial
            // applications saturate in one step.
            [] if fields.is_empty() => Some(Sem::new(SemKind::NeutData(
                q.clone(),
                *ct,
                ty.clone(),
                name.clone(),
                Vec::new(),
            ))),
            [ExternSpine::App(args)] if args.len() == fields.len() => {
                Some(Sem::new(SemKind::NeutData(
                    q.clone(),
                    *ct,
                    ty.clone(),
                    name.clone(),
                    fields.iter().cloned().zip(args.iter().cloned()).collect(),
                )))
            }
            _ => None,
        },
        Impl::Expr(group, expr) | Impl::Rec(group, expr) => {
            if !group.is_empty() {
                // A recursive binding only inlines under an explicit
                // directive, with stops installed for its whole group.
                let allowed = match env.directive_for(&EvalRef::Extern(q.clone(), None)) {
                    Some(InlineDirective::Always) => true,
                    Some(InlineDirective::Arity(n)) => matches!(
                        spine.first(),
                        Some(ExternSpine::App(args)) if args.len() >= n as usize
                    ),
                    _ => false,
                };
                if !allowed {
                    return None;
                }
                let impl_env = env.impl_env(q).with_stops(group);
                let head = expr.eval(&impl_env);
                return Some(apply_spine(env, head, spine));
            }
            match spine {
                [] => match expr.syntax() {
                    Syntax::Var(_) => Some(expr.eval(&env.impl_env(q))),
                    Syntax::Lit(lit) if should_inline_extern_literal(analysis, lit) => {
                        Some(expr.eval(&env.impl_env(q)))
                    }
                    _ => None,
                },
                [ExternSpine::App(args), rest @ ..] => {
                    let r = EvalRef::Extern(q.clone(), None);
                    if should_inline_extern_app(env, &r, analysis, is_abs_neutral(expr), args.len())
                    {
                        let head = expr.eval(&env.impl_env(q));
                        let applied = eval_app(env, head, args.clone());
                        Some(apply_spine(env, applied, rest))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        }
        Impl::Dict(group, props) => match spine {
            [ExternSpine::Accessor(Accessor::GetProp(label)), rest @ ..] => {
                let (prop_analysis, prop_expr) = props
                    .iter()
                    .find(|(l, _)| l == label)
                    .map(|(_, entry)| entry)?;
                let r = EvalRef::Extern(q.clone(), Some(Accessor::GetProp(label.clone())));
                match rest {
                    [] if should_inline_extern_accessor(env, &r, prop_analysis) => {
                        let impl_env = env.impl_env(q).with_stops(group);
                        Some(prop_expr.eval(&impl_env))
                    }
                    [ExternSpine::App(args)] => {
                        if should_inline_extern_app(
                            env,
                            &r,
                            prop_analysis,
                            is_abs_neutral(prop_expr),
                            args.len(),
                        ) {
                            let impl_env = env.impl_env(q).with_stops(group);
                            let head = prop_expr.eval(&impl_env);
                            Some(eval_app(env, head, args.clone()))
                        } else {
                            None
                        }
                    }
                    _ => None,
                }
            }
            _ => None,
        },
    }
}

/// A dictionary label helper used by the driver when deriving implementations.
pub fn dict_prop_ref(q: &Qualified, label: &Label) -> EvalRef {
    EvalRef::Extern(q.clone(), Some(Accessor::GetProp(label.clone())))
}
