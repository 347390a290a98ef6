//! Cross-module driver.
//!
//! Folds a topologically sorted module list, carrying the accumulated inline
//! directives, the global implementations map, and a monotone module index.
//! Each declaration is converted, optimized to a rewrite fixpoint, frozen,
//! and published so later declarations and modules can inline it.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use indexmap::IndexMap;
use log::debug;

use crate::analysis::Analysis;
use crate::ast::{
    BindGroup, Binding, DirectiveMap, EvalRef, Ident, InlineDirective, Module, ModuleName,
    Qualified, PRIM_MODULE,
};
use crate::convert::{data_types_of_module, Converter, DataTypes};
use crate::error::{CompilerError, Result};
use crate::ir::{Impl, NeutralExpr, Syntax};
use crate::quote::{quote, Ctx};
use crate::rewrite::{freeze, BuildCtx};
use crate::semantics::{
    eval_extern_from_impl, Env, Eval, ExternEval, IntFoldMode,
};

pub type ForeignSemantics = IndexMap<Qualified, ExternEval>;
pub type Implementations = IndexMap<Qualified, (Analysis, Impl)>;

pub struct BuildOptions {
    /// Directives in force before any module is built.
    pub directives: DirectiveMap,
    /// Hand-coded semantics for foreign declarations; consulted before the
    /// implementations cache.
    pub foreign: ForeignSemantics,
    /// Per-declaration cap on optimize iterations.
    pub rewrite_limit: u32,
    pub int_fold: IntFoldMode,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            directives: DirectiveMap::new(),
            foreign: ForeignSemantics::new(),
            rewrite_limit: 10_000,
            int_fold: IntFoldMode::default(),
        }
    }
}

/// One output binding group; adjacent non-recursive bindings are collapsed
/// into a single group.
#[derive(Debug, Clone)]
pub struct BackendBindingGroup {
    pub recursive: bool,
    pub bindings: Vec<(Ident, NeutralExpr)>,
}

/// The per-module output of the driver.
#[derive(Debug, Clone)]
pub struct BackendModule {
    pub name: ModuleName,
    /// Dependency closure minus this module and the builtin module.
    pub imports: Vec<ModuleName>,
    pub bindings: Vec<BackendBindingGroup>,
    pub data_types: DataTypes,
    pub exports: Vec<(Ident, Qualified)>,
    pub implementations: Implementations,
    /// Directives this module publishes downstream.
    pub directives: DirectiveMap,
    pub foreign: Vec<Ident>,
}

pub struct Builder {
    directives: DirectiveMap,
    implementations: Rc<RefCell<Implementations>>,
    foreign: Rc<ForeignSemantics>,
    rewrite_limit: u32,
    int_fold: IntFoldMode,
    module_index: usize,
}

impl Builder {
    pub fn new(options: BuildOptions) -> Builder {
        Builder {
            directives: options.directives,
            implementations: Rc::new(RefCell::new(IndexMap::new())),
            foreign: Rc::new(options.foreign),
            rewrite_limit: options.rewrite_limit,
            int_fold: options.int_fold,
            module_index: 0,
        }
    }

    pub fn module_index(&self) -> usize {
        self.module_index
    }

    /// The published analysis and implementation of a declaration.
    pub fn implementation(&self, q: &Qualified) -> Option<(Analysis, Impl)> {
        self.implementations.borrow().get(q).cloned()
    }

    pub fn directives(&self) -> &DirectiveMap {
        &self.directives
    }

    fn extern_eval(&self) -> ExternEval {
        let foreign = self.foreign.clone();
        let implementations = self.implementations.clone();
        Rc::new(move |env, q, spine| {
            if let Some(hook) = foreign.get(q) {
                if let Some(sem) = hook(env, q, spine) {
                    return Some(sem);
                }
            }
            let entry = implementations.borrow().get(q).cloned();
            entry.and_then(|(analysis, impl_)| {
                eval_extern_from_impl(env, q, &analysis, &impl_, spine)
            })
        })
    }

    /// Build every module in order, applying `on_prepare` before conversion
    /// and handing each finished module to `on_codegen`.
    pub fn build_modules<F, G>(
        &mut self,
        modules: Vec<Module>,
        mut on_prepare: F,
        mut on_codegen: G,
    ) -> Result<()>
    where
        F: FnMut(&Builder, Module) -> Module,
        G: FnMut(&Builder, &BackendModule),
    {
        for module in modules {
            let module = on_prepare(self, module);
            let backend = self.build_module(&module)?;
            on_codegen(self, &backend);
        }
        Ok(())
    }

    pub fn build_module(&mut self, module: &Module) -> Result<BackendModule> {
        debug!("building module {} (index {})", module.name, self.module_index);
        let data_types = data_types_of_module(module);

        // Directives in force while optimizing this module: everything
        // accumulated so far plus the module's own locals. Arity remainders
        // derived mid-module extend this map for later declarations.
        let mut local_directives: im::HashMap<EvalRef, InlineDirective> = im::HashMap::new();
        for (r, d) in &self.directives {
            local_directives.insert(r.clone(), *d);
        }
        for (r, d) in &module.directives.locals {
            local_directives.insert(r.clone(), *d);
        }

        let extern_eval = self.extern_eval();
        let mut exported_directives = module.directives.exports.clone();
        let mut module_impls: Implementations = IndexMap::new();
        let mut groups: Vec<BackendBindingGroup> = Vec::new();
        let mut deps: BTreeSet<ModuleName> = BTreeSet::new();

        for group in &module.decls {
            match group {
                BindGroup::NonRec(binding) => {
                    let result = self.optimize_binding(
                        module,
                        &data_types,
                        &extern_eval,
                        &mut local_directives,
                        &mut exported_directives,
                        &mut deps,
                        &mut module_impls,
                        binding,
                        &[],
                    )?;
                    match groups.last_mut() {
                        Some(g) if !g.recursive => g.bindings.push(result),
                        _ => groups.push(BackendBindingGroup {
                            recursive: false,
                            bindings: vec![result],
                        }),
                    }
                }
                BindGroup::Rec(bindings) => {
                    if bindings.is_empty() {
                        return Err(CompilerError::EmptyRecGroup(module.name.clone()));
                    }
                    let members: Vec<Qualified> = bindings
                        .iter()
                        .map(|b| Qualified::new(module.name.clone(), b.name.clone()))
                        .collect();
                    let mut items = Vec::new();
                    for binding in bindings {
                        items.push(self.optimize_binding(
                            module,
                            &data_types,
                            &extern_eval,
                            &mut local_directives,
                            &mut exported_directives,
                            &mut deps,
                            &mut module_impls,
                            binding,
                            &members,
                        )?);
                    }
                    groups.push(BackendBindingGroup {
                        recursive: true,
                        bindings: items,
                    });
                }
            }
        }

        let imports: Vec<ModuleName> = deps
            .into_iter()
            .filter(|m| m != &module.name && m.as_str() != PRIM_MODULE)
            .collect();
        let exports = module
            .exports
            .iter()
            .map(|id| (id.clone(), Qualified::new(module.name.clone(), id.clone())))
            .chain(
                module
                    .reexports
                    .iter()
                    .map(|(m, id)| (id.clone(), Qualified::new(m.clone(), id.clone()))),
            )
            .collect();

        for (r, d) in &exported_directives {
            self.directives.insert(r.clone(), *d);
        }
        self.module_index += 1;

        Ok(BackendModule {
            name: module.name.clone(),
            imports,
            bindings: groups,
            data_types,
            exports,
            implementations: module_impls,
            directives: exported_directives,
            foreign: module.foreign.clone(),
        })
    }

    fn optimize_binding(
        &mut self,
        module: &Module,
        data_types: &DataTypes,
        extern_eval: &ExternEval,
        local_directives: &mut im::HashMap<EvalRef, InlineDirective>,
        exported_directives: &mut DirectiveMap,
        deps: &mut BTreeSet<ModuleName>,
        module_impls: &mut Implementations,
        binding: &Binding,
        group: &[Qualified],
    ) -> Result<(Ident, NeutralExpr)> {
        let q = Qualified::new(module.name.clone(), binding.name.clone());
        debug!("optimizing {}", q);
        let build_ctx = BuildCtx::new(local_directives.clone());
        let env = Env::new(
            module.name.clone(),
            extern_eval.clone(),
            local_directives.clone(),
            self.int_fold,
        );
        let mut converter = Converter::new(&module.name, data_types, build_ctx.clone());
        let converted = converter.convert(&binding.expr)?;
        let optimized = optimize(&env, &build_ctx, &q, self.rewrite_limit, converted)?;
        deps.extend(optimized.analysis().deps.iter().cloned());
        let analysis = optimized.analysis().clone();
        let (impl_, neutral) = derive_impl(group, &optimized);

        // A binding that reduces to a partial application of an
        // arity-directed declaration composes the remaining arity.
        if let Some(remaining) = arity_remainder(&env, &neutral) {
            let r = EvalRef::Extern(q.clone(), None);
            let d = InlineDirective::Arity(remaining);
            local_directives.insert(r.clone(), d);
            self.directives.insert(r.clone(), d);
            exported_directives.insert(r, d);
        }

        self.implementations
            .borrow_mut()
            .insert(q.clone(), (analysis.clone(), impl_.clone()));
        module_impls.insert(q, (analysis, impl_));
        Ok((binding.name.clone(), neutral))
    }
}

/// Iterate eval/quote until quotation stops producing rewrites. Exceeding
/// the limit is an engineering bug in a rewrite rule and fails loudly with
/// the offending declaration.
pub fn optimize(
    env: &Env,
    build: &BuildCtx,
    name: &Qualified,
    limit: u32,
    expr: crate::ir::BackendExpr,
) -> Result<crate::ir::BackendExpr> {
    let mut expr = expr;
    let mut passes = 0u32;
    loop {
        let sem = expr.eval(env);
        let mut ctx = Ctx::new(build.clone());
        let next = quote(&mut ctx, &sem);
        if !next.analysis().rewrite {
            debug!("{} converged after {} passes", name, passes);
            return Ok(next);
        }
        passes += 1;
        if passes >= limit {
            log::error!("rewrite limit {} exceeded while optimizing {}", limit, name);
            return Err(CompilerError::RewriteLimit(name.clone(), limit));
        }
        expr = next;
    }
}

/// Derive the published implementation shape from an optimized body.
fn derive_impl(group: &[Qualified], expr: &crate::ir::BackendExpr) -> (Impl, NeutralExpr) {
    match expr.syntax() {
        Some(Syntax::Lit(crate::ast::Literal::Record(props))) => {
            let dict = props
                .iter()
                .map(|p| {
                    (
                        p.label().clone(),
                        (p.value().analysis().clone(), freeze(p.value())),
                    )
                })
                .collect();
            (Impl::Dict(group.to_vec(), dict), freeze(expr))
        }
        Some(Syntax::CtorDef(ct, ty, name, fields)) => (
            Impl::Ctor(*ct, ty.clone(), name.clone(), fields.clone()),
            freeze(expr),
        ),
        _ => {
            let neutral = freeze(expr);
            let impl_ = if group.is_empty() {
                Impl::Expr(Vec::new(), neutral.clone())
            } else {
                Impl::Rec(group.to_vec(), neutral.clone())
            };
            (impl_, neutral)
        }
    }
}

/// When a frozen body is a partial application of an arity-directed
/// declaration, the remaining arity for the current declaration.
fn arity_remainder(env: &Env, neutral: &NeutralExpr) -> Option<u32> {
    if let Syntax::App(head, args) = neutral.syntax() {
        if let Syntax::Var(target) = head.syntax() {
            if let Some(InlineDirective::Arity(n)) =
                env.directive_for(&EvalRef::Extern(target.clone(), None))
            {
                if (args.len() as u32) < n {
                    return Some(n - args.len() as u32);
                }
            }
        }
    }
    None
}
