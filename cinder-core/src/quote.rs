//! Reification of semantic values back into build IR.
//!
//! Fresh levels are allocated from a monotone counter; closures are entered
//! by feeding them a neutral local at a fresh level, and recursive groups are
//! entered through a neutral group binding so quotation breaks the cycle.
//! The local rewriter runs at every constructed node.

use std::rc::Rc;

use crate::ast::Level;
use crate::ir::{map_literal, map_prim_op, BackendExpr, Syntax};
use crate::rewrite::{build, build_branch_cond, build_pair, build_stop, BuildCtx};
use crate::semantics::{
    LocalBinding, MkFnStep, Sem, SemConditional, SemKind, Thunk,
};
use crate::IdSource;

/// Quotation context: the fresh-level counter for the declaration being
/// reified and the directives consulted by the rewriter.
pub struct Ctx {
    levels: IdSource<Level>,
    pub build: BuildCtx,
}

impl Ctx {
    pub fn new(build: BuildCtx) -> Ctx {
        Ctx {
            levels: IdSource::new(),
            build,
        }
    }

    fn fresh(&mut self) -> Level {
        self.levels.next_id()
    }
}

pub fn quote(ctx: &mut Ctx, sem: &Sem) -> BackendExpr {
    match &**sem {
        SemKind::Lam(ident, k) => {
            let level = ctx.fresh();
            let body = quote(ctx, &k(Sem::neut_local(ident.clone(), level)));
            build(&ctx.build, Syntax::Abs(vec![(ident.clone(), level)], body))
        }
        SemKind::MkFn(step) => quote_mk_fn(ctx, step.clone(), false),
        SemKind::MkEffectFn(step) => quote_mk_fn(ctx, step.clone(), true),
        SemKind::Let(ident, value, k) => {
            let binding = quote(ctx, value);
            let level = ctx.fresh();
            let body = quote(ctx, &k(Sem::neut_local(ident.clone(), level)));
            build(&ctx.build, Syntax::Let(ident.clone(), level, binding, body))
        }
        SemKind::LetRec(group, body_k) => {
            let level = ctx.fresh();
            let neutral = LocalBinding::Group(Rc::new(
                group
                    .iter()
                    .map(|(ident, _)| {
                        (
                            ident.clone(),
                            Thunk::ready(Sem::neut_local(Some(ident.clone()), level)),
                        )
                    })
                    .collect(),
            ));
            let bindings = group
                .iter()
                .map(|(ident, mk)| (ident.clone(), quote(ctx, &mk(neutral.clone()))))
                .collect();
            let body = quote(ctx, &body_k(neutral));
            build(&ctx.build, Syntax::LetRec(level, bindings, body))
        }
        SemKind::EffectBind(ident, eff, k) => {
            let eff = quote(ctx, eff);
            let level = ctx.fresh();
            let body = quote(ctx, &k(Sem::neut_local(ident.clone(), level)));
            build(
                &ctx.build,
                Syntax::EffectBind(ident.clone(), level, eff, body),
            )
        }
        SemKind::EffectPure(value) => {
            let value = quote(ctx, value);
            build(&ctx.build, Syntax::EffectPure(value))
        }
        SemKind::Branch(conds, default) => quote_branch(ctx, conds, default.as_ref()),
        SemKind::NeutLocal(ident, level) => {
            build(&ctx.build, Syntax::Local(ident.clone(), *level))
        }
        SemKind::NeutVar(q) => build(&ctx.build, Syntax::Var(q.clone())),
        SemKind::NeutStop(q) => build_stop(q.clone()),
        SemKind::NeutData(q, ct, ty, name, fields) => {
            // An unapplied constructor reference reifies as a bare variable.
            if fields.is_empty() {
                build(&ctx.build, Syntax::Var(q.clone()))
            } else {
                let fields = fields
                    .iter()
                    .map(|(id, v)| (id.clone(), quote(ctx, v)))
                    .collect();
                build(
                    &ctx.build,
                    Syntax::CtorSaturated(q.clone(), *ct, ty.clone(), name.clone(), fields),
                )
            }
        }
        SemKind::NeutCtorDef(_, ct, ty, name, fields) => build(
            &ctx.build,
            Syntax::CtorDef(*ct, ty.clone(), name.clone(), fields.clone()),
        ),
        SemKind::NeutApp(head, args) => {
            let head = quote(ctx, head);
            let args = args.iter().map(|a| quote(ctx, a)).collect();
            build(&ctx.build, Syntax::App(head, args))
        }
        SemKind::NeutUncurriedApp(head, args) => {
            let head = quote(ctx, head);
            let args = args.iter().map(|a| quote(ctx, a)).collect();
            build(&ctx.build, Syntax::UncurriedApp(head, args))
        }
        SemKind::NeutUncurriedEffectApp(head, args) => {
            let head = quote(ctx, head);
            let args = args.iter().map(|a| quote(ctx, a)).collect();
            build(&ctx.build, Syntax::UncurriedEffectApp(head, args))
        }
        SemKind::NeutAccessor(target, acc) => {
            let target = quote(ctx, target);
            build(&ctx.build, Syntax::Accessor(target, acc.clone()))
        }
        SemKind::NeutUpdate(target, props) => {
            let target = quote(ctx, target);
            let props = props
                .iter()
                .map(|p| crate::ast::Prop(p.0.clone(), quote(ctx, &p.1)))
                .collect();
            build(&ctx.build, Syntax::Update(target, props))
        }
        SemKind::NeutLit(lit) => {
            let lit = map_literal(lit, &mut |child| quote(ctx, child));
            build(&ctx.build, Syntax::Lit(lit))
        }
        SemKind::NeutPrimOp(op) => {
            let op = map_prim_op(op, &mut |child| quote(ctx, child));
            build(&ctx.build, Syntax::PrimOp(op))
        }
        SemKind::NeutFail(msg) => build(&ctx.build, Syntax::Fail(msg.clone())),
        // A pending extern that never committed reifies via its fallback.
        SemKind::Extern(_, _, fallback) => {
            let sem = fallback.force();
            quote(ctx, &sem)
        }
    }
}

fn quote_mk_fn(ctx: &mut Ctx, step: MkFnStep, effect: bool) -> BackendExpr {
    let mut params = Vec::new();
    let mut current = step;
    loop {
        match current {
            MkFnStep::Next(ident, f) => {
                let level = ctx.fresh();
                let arg = Sem::neut_local(ident.clone(), level);
                params.push((ident, level));
                current = f(arg);
            }
            MkFnStep::Applied(sem) => {
                let body = quote(ctx, &sem);
                let syntax = if effect {
                    Syntax::UncurriedEffectAbs(params, body)
                } else {
                    Syntax::UncurriedAbs(params, body)
                };
                return build(&ctx.build, syntax);
            }
        }
    }
}

fn quote_branch(
    ctx: &mut Ctx,
    conds: &[SemConditional],
    default: Option<&Thunk<Sem>>,
) -> BackendExpr {
    let mut pairs = Vec::new();
    for conditional in conds {
        let cond = conditional.force();
        let guard = quote(ctx, &cond.guard);
        let body = quote(ctx, &(cond.k)(None));
        pairs.push(build_pair(&ctx.build, guard, body));
    }
    let default = default.map(|d| {
        let sem = d.force();
        quote(ctx, &sem)
    });
    build_branch_cond(&ctx.build, pairs, default)
}
