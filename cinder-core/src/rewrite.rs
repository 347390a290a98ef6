//! The bottom-up smart constructor invoked at every quoted node.
//!
//! Pattern-directed rewrites: application and abstraction flattening, let
//! associativity, let inlining under the policy below, bind-of-pure
//! collapse, branch simplification, and double-negation elimination. Rules
//! that queue a rewrite node set the analysis `rewrite` bit, which keeps the
//! optimize fixpoint running for another pass.

use std::rc::Rc;

use crate::analysis::{analyze_syntax, Analysis, Complexity};
use crate::ast::{
    normalize_props, EvalRef, Ident, InlineDirective, Level, Literal, Op1, Op2, PrimOp, Qualified,
};
use crate::ir::{BackendExpr, NeutralExpr, Rewrite, Syntax};

/// Directives in force while a declaration is being rebuilt. Local inline
/// overrides are consulted by the let-inlining policy.
#[derive(Clone, Default)]
pub struct BuildCtx {
    pub directives: im::HashMap<EvalRef, InlineDirective>,
}

impl BuildCtx {
    pub fn new(directives: im::HashMap<EvalRef, InlineDirective>) -> Self {
        BuildCtx { directives }
    }

    fn local_directive(&self, ident: &Option<Ident>, level: Level) -> Option<InlineDirective> {
        self.directives
            .get(&EvalRef::Local(ident.clone(), level))
            .copied()
    }
}

/// Attach an analysis to a syntactic node without rewriting.
pub fn make(syntax: Syntax<BackendExpr>) -> BackendExpr {
    let analysis = analyze_syntax(&syntax);
    BackendExpr::Syntax(analysis, Rc::new(syntax))
}

/// The smart constructor: apply local rewrites, then attach the analysis.
pub fn build(ctx: &BuildCtx, syntax: Syntax<BackendExpr>) -> BackendExpr {
    match syntax {
        Syntax::App(head, args) => build_app(head, args),
        Syntax::Abs(params, body) => build_abs(params, body),
        Syntax::Let(ident, level, binding, body) => build_let(ctx, ident, level, binding, body),
        Syntax::EffectBind(ident, level, eff, body) => {
            // bind of pure is an ordinary binding
            let pure = match eff.syntax() {
                Some(Syntax::EffectPure(value)) => Some(value.clone()),
                _ => None,
            };
            match pure {
                Some(value) => build_let(ctx, ident, level, value, body),
                None => make(Syntax::EffectBind(ident, level, eff, body)),
            }
        }
        Syntax::Branch(pairs, default) => build_branch(ctx, pairs, default),
        Syntax::PrimOp(PrimOp::Op1(Op1::Not, operand)) => build_not(operand),
        Syntax::Update(target, props) => make(Syntax::Update(target, normalize_props(props))),
        other => make(other),
    }
}

/// A stop marker: the reference must not be inlined again this pass. Does
/// not set the rewrite bit, so lingering stops never keep the fixpoint
/// alive; freeze re-emits them as plain variables.
pub fn build_stop(q: Qualified) -> BackendExpr {
    let analysis = Analysis::empty().with_dep(&q).bump();
    BackendExpr::Rewrite(analysis, Rc::new(Rewrite::Stop(q)))
}

fn build_app(head: BackendExpr, args: Vec<BackendExpr>) -> BackendExpr {
    if args.is_empty() {
        return head;
    }
    let nested = match head.syntax() {
        Some(Syntax::App(inner, prev)) => Some((inner.clone(), prev.clone())),
        _ => None,
    };
    match nested {
        Some((inner, mut all)) => {
            all.extend(args);
            make(Syntax::App(inner, all))
        }
        None => make(Syntax::App(head, args)),
    }
}

fn build_abs(mut params: Vec<(Option<Ident>, Level)>, body: BackendExpr) -> BackendExpr {
    let nested = match body.syntax() {
        Some(Syntax::Abs(inner_params, inner_body)) => {
            Some((inner_params.clone(), inner_body.clone()))
        }
        _ => None,
    };
    match nested {
        Some((inner_params, inner_body)) => {
            params.extend(inner_params);
            make(Syntax::Abs(params, inner_body))
        }
        None => make(Syntax::Abs(params, body)),
    }
}

// =============================================================================
// Lets
// =============================================================================

type LetEntry = (Option<Ident>, Level, BackendExpr);

fn build_let(
    ctx: &BuildCtx,
    ident: Option<Ident>,
    level: Level,
    binding: BackendExpr,
    body: BackendExpr,
) -> BackendExpr {
    if let_like(&binding) {
        return build_let_assoc(vec![(ident, level, binding)], body);
    }
    match ctx.local_directive(&ident, level) {
        Some(InlineDirective::Never) => return make(Syntax::Let(ident, level, binding, body)),
        Some(InlineDirective::Always) => return rewrite_inline(ident, level, binding, body),
        _ => {}
    }
    if should_inline_let(level, &binding, &body) {
        rewrite_inline(ident, level, binding, body)
    } else {
        make(Syntax::Let(ident, level, binding, body))
    }
}

fn let_like(expr: &BackendExpr) -> bool {
    matches!(expr.syntax(), Some(Syntax::Let(..)))
        || matches!(expr, BackendExpr::Rewrite(_, r) if matches!(&**r, Rewrite::LetAssoc(..)))
}

/// Flatten nested lets in binding position into one left-to-right chain.
fn build_let_assoc(entries: Vec<LetEntry>, body: BackendExpr) -> BackendExpr {
    let mut flat: Vec<LetEntry> = Vec::new();
    for entry in entries {
        flatten_let_entry(entry, &mut flat);
    }
    let mut analysis = body.analysis().clone();
    for (_, level, binding) in flat.iter().rev() {
        analysis = binding.analysis().clone().append(analysis.bound(*level));
    }
    let analysis = analysis
        .complex(Complexity::NonTrivial)
        .bump()
        .with_rewrite();
    BackendExpr::Rewrite(analysis, Rc::new(Rewrite::LetAssoc(flat, body)))
}

fn flatten_let_entry(entry: LetEntry, out: &mut Vec<LetEntry>) {
    let (ident, level, mut binding) = entry;
    loop {
        let nested_let = match binding.syntax() {
            Some(Syntax::Let(id2, lvl2, b2, body2)) => {
                Some(((id2.clone(), *lvl2, b2.clone()), body2.clone()))
            }
            _ => None,
        };
        if let Some((inner, rest)) = nested_let {
            flatten_let_entry(inner, out);
            binding = rest;
            continue;
        }
        let nested_assoc = match &binding {
            BackendExpr::Rewrite(_, r) => match &**r {
                Rewrite::LetAssoc(binds, rest) => Some((binds.clone(), rest.clone())),
                _ => None,
            },
            _ => None,
        };
        if let Some((binds, rest)) = nested_assoc {
            for b in binds {
                flatten_let_entry(b, out);
            }
            binding = rest;
            continue;
        }
        out.push((ident, level, binding));
        return;
    }
}

fn rewrite_inline(
    ident: Option<Ident>,
    level: Level,
    binding: BackendExpr,
    body: BackendExpr,
) -> BackendExpr {
    let analysis = binding
        .analysis()
        .clone()
        .append(body.analysis().clone())
        .bound(level)
        .complex(Complexity::NonTrivial)
        .bump()
        .with_rewrite();
    BackendExpr::Rewrite(analysis, Rc::new(Rewrite::Inline(ident, level, binding, body)))
}

/// The let-inlining policy.
pub fn should_inline_let(level: Level, binding: &BackendExpr, body: &BackendExpr) -> bool {
    let b = binding.analysis();
    match body.analysis().usages.get(&level) {
        // Dead binding.
        None => true,
        Some(usage) => {
            (!usage.captured
                && (usage.count == 1
                    || (b.complexity <= Complexity::Deref && b.size < 5)))
                || (binding.is_abs()
                    && (usage.count == 1 || b.usages.is_empty() || b.size < 16))
                || (b.complexity == Complexity::Trivial && b.size < 5)
        }
    }
}

// =============================================================================
// Branches
// =============================================================================

fn bool_lit_of(expr: &BackendExpr) -> Option<bool> {
    match expr.syntax() {
        Some(Syntax::Lit(Literal::Boolean(b))) => Some(*b),
        _ => None,
    }
}

fn local_level_of(expr: &BackendExpr) -> Option<Level> {
    match expr.syntax() {
        Some(Syntax::Local(_, level)) => Some(*level),
        _ => None,
    }
}

fn build_branch(
    ctx: &BuildCtx,
    mut pairs: Vec<(BackendExpr, BackendExpr)>,
    mut default: Option<BackendExpr>,
) -> BackendExpr {
    // A default that is itself a branch fuses into one.
    loop {
        let fused = match &default {
            Some(d) => match d.syntax() {
                Some(Syntax::Branch(inner_pairs, inner_default)) => {
                    Some((inner_pairs.clone(), inner_default.clone()))
                }
                _ => None,
            },
            None => None,
        };
        match fused {
            Some((inner_pairs, inner_default)) => {
                pairs.extend(inner_pairs);
                default = inner_default;
            }
            None => break,
        }
    }

    // A literally-true guard commits during evaluation, which also resolves
    // the else-chain of any default-less branch in its body; truncating here
    // would lose that chain, so unreachable tails are left to the evaluator.

    // if l then a else if not l then b else <fail>  ==>  if l then a else b
    if pairs.len() == 2 {
        let failing_default = matches!(
            default.as_ref().and_then(|d| d.syntax()),
            Some(Syntax::Fail(_))
        );
        if failing_default {
            let complement = match (local_level_of(&pairs[0].0), pairs[1].0.syntax()) {
                (Some(level), Some(Syntax::PrimOp(PrimOp::Op1(Op1::Not, negated)))) => {
                    local_level_of(negated) == Some(level)
                }
                _ => false,
            };
            if complement {
                let second_body = pairs.pop().map(|(_, b)| b);
                return build_branch(ctx, pairs, second_body);
            }
        }
    }

    // Single alternatives over boolean literals collapse to the guard.
    if pairs.len() == 1 {
        if let Some(d) = &default {
            let (guard, body) = &pairs[0];
            match (bool_lit_of(body), bool_lit_of(d)) {
                (Some(true), Some(false)) => return pairs.remove(0).0,
                (Some(false), Some(true)) => {
                    let guard = guard.clone();
                    return build_not(guard);
                }
                _ => {}
            }
        }
    }

    make(Syntax::Branch(pairs, default))
}

fn build_not(operand: BackendExpr) -> BackendExpr {
    let inner = match operand.syntax() {
        Some(Syntax::PrimOp(PrimOp::Op1(Op1::Not, e))) => Some(e.clone()),
        _ => None,
    };
    match inner {
        Some(e) => e,
        None => make(Syntax::PrimOp(PrimOp::Op1(Op1::Not, operand))),
    }
}

/// Compress a quoted conditional whose body is a single-alternative,
/// default-less branch: `(g1, if g2 then b)` becomes `(g1 && g2, b)`.
pub fn build_pair(
    ctx: &BuildCtx,
    guard: BackendExpr,
    body: BackendExpr,
) -> (BackendExpr, BackendExpr) {
    let inner = match body.syntax() {
        Some(Syntax::Branch(pairs, None)) if pairs.len() == 1 => Some(pairs[0].clone()),
        _ => None,
    };
    match inner {
        Some((inner_guard, inner_body)) => {
            let merged = build(
                ctx,
                Syntax::PrimOp(PrimOp::Op2(Op2::BooleanAnd, guard, inner_guard)),
            );
            (merged, inner_body)
        }
        None => (guard, body),
    }
}

fn is_boolean_tail(expr: &BackendExpr) -> bool {
    matches!(
        expr.syntax(),
        Some(Syntax::Lit(Literal::Boolean(_)))
            | Some(Syntax::Var(_))
            | Some(Syntax::Local(..))
            | Some(Syntax::PrimOp(_))
    )
}

/// Fold a quoted branch over a literal-boolean body into boolean operators
/// when the fallthrough is a boolean tail.
pub fn build_branch_cond(
    ctx: &BuildCtx,
    pairs: Vec<(BackendExpr, BackendExpr)>,
    default: Option<BackendExpr>,
) -> BackendExpr {
    if pairs.len() == 1 {
        if let Some(d) = &default {
            if is_boolean_tail(d) {
                let (guard, body) = &pairs[0];
                match bool_lit_of(body) {
                    Some(true) => {
                        return build(
                            ctx,
                            Syntax::PrimOp(PrimOp::Op2(
                                Op2::BooleanOr,
                                guard.clone(),
                                d.clone(),
                            )),
                        );
                    }
                    Some(false) => {
                        let negated = build_not(guard.clone());
                        return build(
                            ctx,
                            Syntax::PrimOp(PrimOp::Op2(Op2::BooleanAnd, negated, d.clone())),
                        );
                    }
                    None => {}
                }
            }
        }
    }
    build(ctx, Syntax::Branch(pairs, default))
}

// =============================================================================
// Freeze
// =============================================================================

/// Strip the rewrite layer: queued inlines become plain lets, stop markers
/// become variables, and associated chains become right-nested lets.
pub fn freeze(expr: &BackendExpr) -> NeutralExpr {
    match expr {
        BackendExpr::Syntax(_, syntax) => {
            NeutralExpr::new(syntax.map_children(&mut |child| freeze(child)))
        }
        BackendExpr::Rewrite(_, rewrite) => match &**rewrite {
            Rewrite::Inline(ident, level, binding, body) => NeutralExpr::new(Syntax::Let(
                ident.clone(),
                *level,
                freeze(binding),
                freeze(body),
            )),
            Rewrite::Stop(q) => NeutralExpr::new(Syntax::Var(q.clone())),
            Rewrite::LetAssoc(bindings, body) => {
                let mut acc = freeze(body);
                for (ident, level, binding) in bindings.iter().rev() {
                    acc = NeutralExpr::new(Syntax::Let(
                        ident.clone(),
                        *level,
                        freeze(binding),
                        acc,
                    ));
                }
                acc
            }
        },
    }
}
