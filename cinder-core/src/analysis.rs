//! Per-node analysis records for the build IR.
//!
//! Every `BackendExpr` node carries an `Analysis`: a complexity tier, a
//! symbolic size, per-level usage counts, the per-parameter usages of
//! abstractions, the set of modules referenced, and a flag marking pending
//! rewrites. The rewriter's inlining policy depends on exact comparisons of
//! the complexity tiers, so their ordering is load-bearing.

use std::collections::{BTreeSet, HashMap};

use crate::ast::{Ident, Level, Literal, ModuleName, Op1, PrimOp, Qualified};
use crate::ir::{BackendExpr, Syntax};

/// How expensive it is to reference a value more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Complexity {
    /// Literals, locals, globals: free to duplicate.
    Trivial,
    /// A projection out of something trivial.
    Deref,
    /// An allocation of statically known extent (array/record literal,
    /// saturated constructor, closure).
    KnownSize,
    NonTrivial,
}

/// Usage of one level inside an expression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub count: u32,
    /// Whether any of the uses sit under an abstraction.
    pub captured: bool,
}

impl Usage {
    fn combine(self, other: Usage) -> Usage {
        Usage {
            count: self.count.saturating_add(other.count),
            captured: self.captured || other.captured,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub usages: HashMap<Level, Usage>,
    /// For abstractions, the usage of each formal parameter in the body.
    pub args: Vec<Usage>,
    pub size: usize,
    pub complexity: Complexity,
    pub deps: BTreeSet<ModuleName>,
    /// Set when this node (or a descendant) encodes a pending rewrite.
    pub rewrite: bool,
}

impl Default for Analysis {
    fn default() -> Self {
        Analysis {
            usages: HashMap::new(),
            args: Vec::new(),
            size: 0,
            complexity: Complexity::Trivial,
            deps: BTreeSet::new(),
            rewrite: false,
        }
    }
}

impl Analysis {
    pub fn empty() -> Self {
        Analysis::default()
    }

    /// Monoid composition for sequential subterms. Argument usages do not
    /// compose; they are reattached by the abstraction constructors.
    pub fn append(mut self, other: Analysis) -> Analysis {
        for (lvl, usage) in other.usages {
            let entry = self.usages.entry(lvl).or_default();
            *entry = entry.combine(usage);
        }
        self.args = Vec::new();
        self.size += other.size;
        self.complexity = self.complexity.max(other.complexity);
        self.deps.extend(other.deps);
        self.rewrite = self.rewrite || other.rewrite;
        self
    }

    /// Record one use of a level.
    pub fn used(mut self, level: Level) -> Analysis {
        let entry = self.usages.entry(level).or_default();
        *entry = entry.combine(Usage {
            count: 1,
            captured: false,
        });
        self
    }

    /// Close over a binding site: the level is no longer free.
    pub fn bound(mut self, level: Level) -> Analysis {
        self.usages.remove(&level);
        self
    }

    /// Mark every remaining usage as captured under an abstraction.
    pub fn capture(mut self) -> Analysis {
        for usage in self.usages.values_mut() {
            usage.captured = true;
        }
        self
    }

    /// Scale usage counts by `n`, for bindings that may run more than once.
    pub fn power(mut self, n: u32) -> Analysis {
        for usage in self.usages.values_mut() {
            usage.count = usage.count.saturating_mul(n);
        }
        self
    }

    pub fn with_rewrite(mut self) -> Analysis {
        self.rewrite = true;
        self
    }

    pub fn with_dep(mut self, q: &Qualified) -> Analysis {
        if let Some(module) = &q.module {
            self.deps.insert(module.clone());
        }
        self
    }

    /// Raise the complexity tier to at least `c`.
    pub fn complex(mut self, c: Complexity) -> Analysis {
        self.complexity = self.complexity.max(c);
        self
    }

    /// Account for this node itself.
    pub fn bump(mut self) -> Analysis {
        self.size += 1;
        self
    }
}

fn fold_children<'a>(children: impl Iterator<Item = &'a BackendExpr>) -> Analysis {
    children.fold(Analysis::empty(), |acc, c| acc.append(c.analysis().clone()))
}

fn analyze_abs(params: &[(Option<Ident>, Level)], body: &BackendExpr) -> Analysis {
    let body_analysis = body.analysis().clone();
    let args = params
        .iter()
        .map(|(_, lvl)| body_analysis.usages.get(lvl).copied().unwrap_or_default())
        .collect();
    let mut a = body_analysis.capture();
    for (_, lvl) in params {
        a = a.bound(*lvl);
    }
    a.args = args;
    a.complex(Complexity::KnownSize).bump()
}

/// Compute the analysis of a syntactic node from its children's analyses.
pub fn analyze_syntax(syntax: &Syntax<BackendExpr>) -> Analysis {
    match syntax {
        Syntax::Var(q) => Analysis::empty().with_dep(q).bump(),
        Syntax::Local(_, lvl) => Analysis::empty().used(*lvl).bump(),
        Syntax::Lit(lit) => match lit {
            Literal::Array(xs) => fold_children(xs.iter())
                .complex(Complexity::KnownSize)
                .bump(),
            Literal::Record(props) => fold_children(props.iter().map(|p| p.value()))
                .complex(Complexity::KnownSize)
                .bump(),
            _ => Analysis::empty().bump(),
        },
        Syntax::App(head, args) => fold_children(std::iter::once(head).chain(args.iter()))
            .complex(Complexity::NonTrivial)
            .bump(),
        Syntax::Abs(params, body)
        | Syntax::UncurriedAbs(params, body)
        | Syntax::UncurriedEffectAbs(params, body) => analyze_abs(params, body),
        Syntax::UncurriedApp(head, args) | Syntax::UncurriedEffectApp(head, args) => {
            fold_children(std::iter::once(head).chain(args.iter()))
                .complex(Complexity::NonTrivial)
                .bump()
        }
        Syntax::Let(_, lvl, binding, body) => binding
            .analysis()
            .clone()
            .append(body.analysis().clone())
            .bound(*lvl)
            .complex(Complexity::NonTrivial)
            .bump(),
        Syntax::LetRec(lvl, bindings, body) => {
            // Recursive bindings may run any number of times; scaling their
            // usage counts keeps single-use inlining away from them.
            let bound_part = fold_children(bindings.iter().map(|(_, b)| b)).power(2);
            bound_part
                .append(body.analysis().clone())
                .bound(*lvl)
                .complex(Complexity::NonTrivial)
                .bump()
        }
        Syntax::EffectBind(_, lvl, eff, body) => eff
            .analysis()
            .clone()
            .append(body.analysis().clone())
            .bound(*lvl)
            .complex(Complexity::NonTrivial)
            .bump(),
        Syntax::EffectPure(v) => v
            .analysis()
            .clone()
            .complex(Complexity::KnownSize)
            .bump(),
        Syntax::Accessor(e, _) => e.analysis().clone().complex(Complexity::Deref).bump(),
        Syntax::Update(e, props) => {
            fold_children(std::iter::once(e).chain(props.iter().map(|p| p.value())))
                .complex(Complexity::KnownSize)
                .bump()
        }
        Syntax::Branch(pairs, default) => {
            let children = pairs
                .iter()
                .flat_map(|(g, b)| [g, b])
                .chain(default.iter());
            fold_children(children).complex(Complexity::NonTrivial).bump()
        }
        Syntax::PrimOp(op) => {
            let a = match op {
                PrimOp::Op1(op1, x) => {
                    let a = x.analysis().clone();
                    match op1 {
                        Op1::IsTag(q) => a.with_dep(q),
                        _ => a,
                    }
                }
                PrimOp::Op2(_, l, r) => l.analysis().clone().append(r.analysis().clone()),
            };
            a.complex(Complexity::NonTrivial).bump()
        }
        Syntax::Fail(_) => Analysis::empty().bump(),
        Syntax::CtorDef(..) => Analysis::empty().complex(Complexity::KnownSize).bump(),
        Syntax::CtorSaturated(q, _, _, _, fields) => {
            fold_children(fields.iter().map(|(_, v)| v))
                .with_dep(q)
                .complex(Complexity::KnownSize)
                .bump()
        }
    }
}
