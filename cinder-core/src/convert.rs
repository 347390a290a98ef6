//! Conversion from the surface IR into the build IR.
//!
//! Binders are assigned monotone fresh levels per declaration; unqualified
//! variables resolve against the local scope and fall back to the current
//! module's top level. Constructor declarations are resolved against the
//! module's data-type metadata, and newtype constructors applied to exactly
//! one argument are erased.

use indexmap::IndexMap;

use crate::ast::{
    normalize_props, BindGroup, CtorKind, Ident, Level, Literal, Module, ModuleName, Prop,
    ProperName, Qualified, SourceExpr, SourceExprKind,
};
use crate::bail_convert;
use crate::err_convert;
use crate::error::Result;
use crate::ir::{BackendExpr, Syntax};
use crate::rewrite::{build, BuildCtx};
use crate::IdSource;

// =============================================================================
// Data-type metadata
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CtorMeta {
    pub fields: Vec<Ident>,
    pub tag: u32,
    pub kind: CtorKind,
    pub newtype: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataTypeMeta {
    pub constructors: IndexMap<Ident, CtorMeta>,
    /// Maximum field count across constructors.
    pub size: usize,
}

pub type DataTypes = IndexMap<ProperName, DataTypeMeta>;

/// Collect constructor declarations into per-type metadata. A type with
/// exactly one constructor is a product type; tags follow declaration order.
pub fn data_types_of_module(module: &Module) -> DataTypes {
    let mut by_type: IndexMap<ProperName, Vec<(Ident, Vec<Ident>, bool)>> = IndexMap::new();
    for group in &module.decls {
        let bindings: &[_] = match group {
            BindGroup::NonRec(b) => std::slice::from_ref(b),
            BindGroup::Rec(bs) => bs,
        };
        for binding in bindings {
            if let SourceExprKind::Constructor {
                ty,
                name,
                fields,
                newtype,
            } = &binding.expr.kind
            {
                by_type
                    .entry(ty.clone())
                    .or_default()
                    .push((name.clone(), fields.clone(), *newtype));
            }
        }
    }
    by_type
        .into_iter()
        .map(|(ty, ctors)| {
            let kind = if ctors.len() == 1 {
                CtorKind::Product
            } else {
                CtorKind::Sum
            };
            let size = ctors.iter().map(|(_, fields, _)| fields.len()).max().unwrap_or(0);
            let constructors = ctors
                .into_iter()
                .enumerate()
                .map(|(tag, (name, fields, newtype))| {
                    (
                        name,
                        CtorMeta {
                            fields,
                            tag: tag as u32,
                            kind,
                            newtype,
                        },
                    )
                })
                .collect();
            (ty, DataTypeMeta { constructors, size })
        })
        .collect()
}

// =============================================================================
// Expression conversion
// =============================================================================

type Scope = im::HashMap<Ident, Level>;

pub struct Converter<'a> {
    module: &'a ModuleName,
    data_types: &'a DataTypes,
    build: BuildCtx,
    levels: IdSource<Level>,
}

impl<'a> Converter<'a> {
    pub fn new(module: &'a ModuleName, data_types: &'a DataTypes, build: BuildCtx) -> Self {
        Converter {
            module,
            data_types,
            build,
            levels: IdSource::new(),
        }
    }

    /// Convert one declaration body. Level allocation starts fresh.
    pub fn convert(&mut self, expr: &SourceExpr) -> Result<BackendExpr> {
        self.levels = IdSource::new();
        self.convert_expr(&Scope::new(), expr)
    }

    fn fresh(&mut self) -> Level {
        self.levels.next_id()
    }

    fn bind_params(
        &mut self,
        scope: &Scope,
        params: &[Option<Ident>],
    ) -> (Scope, Vec<(Option<Ident>, Level)>) {
        let mut scope = scope.clone();
        let bound = params
            .iter()
            .map(|param| {
                let level = self.fresh();
                if let Some(name) = param {
                    scope.insert(name.clone(), level);
                }
                (param.clone(), level)
            })
            .collect();
        (scope, bound)
    }

    /// Whether a head variable names a single-field newtype constructor of
    /// this module, which is erased when applied.
    fn is_newtype_ctor(&self, scope: &Scope, q: &Qualified) -> bool {
        let in_current = match &q.module {
            None => !scope.contains_key(&q.name),
            Some(m) => m == self.module,
        };
        in_current
            && self.data_types.values().any(|dt| {
                dt.constructors
                    .get(&q.name)
                    .map_or(false, |ctor| ctor.newtype && ctor.fields.len() == 1)
            })
    }

    fn convert_expr(&mut self, scope: &Scope, expr: &SourceExpr) -> Result<BackendExpr> {
        match &expr.kind {
            SourceExprKind::Var(q) => {
                if q.module.is_none() {
                    if let Some(level) = scope.get(&q.name) {
                        return Ok(build(
                            &self.build,
                            Syntax::Local(Some(q.name.clone()), *level),
                        ));
                    }
                }
                let q = match &q.module {
                    Some(_) => q.clone(),
                    None => Qualified::new(self.module.clone(), q.name.clone()),
                };
                Ok(build(&self.build, Syntax::Var(q)))
            }
            SourceExprKind::Lit(lit) => {
                let lit = self.convert_literal(scope, lit)?;
                Ok(build(&self.build, Syntax::Lit(lit)))
            }
            SourceExprKind::App(head, args) => {
                if args.is_empty() {
                    bail_convert!("application with no arguments in module {}", self.module);
                }
                if args.len() == 1 {
                    if let SourceExprKind::Var(q) = &head.kind {
                        if self.is_newtype_ctor(scope, q) {
                            return self.convert_expr(scope, &args[0]);
                        }
                    }
                }
                let head = self.convert_expr(scope, head)?;
                let args = self.convert_all(scope, args)?;
                Ok(build(&self.build, Syntax::App(head, args)))
            }
            SourceExprKind::Abs(params, body) => {
                if params.is_empty() {
                    bail_convert!("abstraction with no parameters in module {}", self.module);
                }
                let (scope, params) = self.bind_params(scope, params);
                let body = self.convert_expr(&scope, body)?;
                Ok(build(&self.build, Syntax::Abs(params, body)))
            }
            SourceExprKind::UncurriedApp(head, args) => {
                let head = self.convert_expr(scope, head)?;
                let args = self.convert_all(scope, args)?;
                Ok(build(&self.build, Syntax::UncurriedApp(head, args)))
            }
            SourceExprKind::UncurriedAbs(params, body) => {
                let (scope, params) = self.bind_params(scope, params);
                let body = self.convert_expr(&scope, body)?;
                Ok(build(&self.build, Syntax::UncurriedAbs(params, body)))
            }
            SourceExprKind::UncurriedEffectApp(head, args) => {
                let head = self.convert_expr(scope, head)?;
                let args = self.convert_all(scope, args)?;
                Ok(build(&self.build, Syntax::UncurriedEffectApp(head, args)))
            }
            SourceExprKind::UncurriedEffectAbs(params, body) => {
                let (scope, params) = self.bind_params(scope, params);
                let body = self.convert_expr(&scope, body)?;
                Ok(build(&self.build, Syntax::UncurriedEffectAbs(params, body)))
            }
            SourceExprKind::Let(ident, binding, body) => {
                let binding = self.convert_expr(scope, binding)?;
                let level = self.fresh();
                let mut scope = scope.clone();
                if let Some(name) = ident {
                    scope.insert(name.clone(), level);
                }
                let body = self.convert_expr(&scope, body)?;
                Ok(build(
                    &self.build,
                    Syntax::Let(ident.clone(), level, binding, body),
                ))
            }
            SourceExprKind::LetRec(bindings, body) => {
                if bindings.is_empty() {
                    bail_convert!("empty recursive let group in module {}", self.module);
                }
                let level = self.fresh();
                let mut scope = scope.clone();
                for (name, _) in bindings {
                    scope.insert(name.clone(), level);
                }
                let bindings = bindings
                    .iter()
                    .map(|(name, e)| Ok((name.clone(), self.convert_expr(&scope, e)?)))
                    .collect::<Result<Vec<_>>>()?;
                let body = self.convert_expr(&scope, body)?;
                Ok(build(&self.build, Syntax::LetRec(level, bindings, body)))
            }
            SourceExprKind::EffectBind(ident, eff, body) => {
                let eff = self.convert_expr(scope, eff)?;
                let level = self.fresh();
                let mut scope = scope.clone();
                if let Some(name) = ident {
                    scope.insert(name.clone(), level);
                }
                let body = self.convert_expr(&scope, body)?;
                Ok(build(
                    &self.build,
                    Syntax::EffectBind(ident.clone(), level, eff, body),
                ))
            }
            SourceExprKind::EffectPure(value) => {
                let value = self.convert_expr(scope, value)?;
                Ok(build(&self.build, Syntax::EffectPure(value)))
            }
            SourceExprKind::Accessor(target, acc) => {
                let target = self.convert_expr(scope, target)?;
                Ok(build(&self.build, Syntax::Accessor(target, acc.clone())))
            }
            SourceExprKind::Update(target, props) => {
                let target = self.convert_expr(scope, target)?;
                let props = props
                    .iter()
                    .map(|Prop(l, v)| Ok(Prop(l.clone(), self.convert_expr(scope, v)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(build(&self.build, Syntax::Update(target, props)))
            }
            SourceExprKind::Branch(pairs, default) => {
                if pairs.is_empty() {
                    bail_convert!("branch with no alternatives in module {}", self.module);
                }
                let pairs = pairs
                    .iter()
                    .map(|(g, b)| {
                        Ok((self.convert_expr(scope, g)?, self.convert_expr(scope, b)?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let default = match default {
                    Some(d) => Some(self.convert_expr(scope, d)?),
                    None => None,
                };
                Ok(build(&self.build, Syntax::Branch(pairs, default)))
            }
            SourceExprKind::PrimOp(op) => {
                let op = match &**op {
                    crate::ast::PrimOp::Op1(o, a) => {
                        crate::ast::PrimOp::Op1(o.clone(), self.convert_expr(scope, a)?)
                    }
                    crate::ast::PrimOp::Op2(o, a, b) => crate::ast::PrimOp::Op2(
                        *o,
                        self.convert_expr(scope, a)?,
                        self.convert_expr(scope, b)?,
                    ),
                };
                Ok(build(&self.build, Syntax::PrimOp(op)))
            }
            SourceExprKind::Fail(msg) => Ok(build(&self.build, Syntax::Fail(msg.clone()))),
            SourceExprKind::Constructor { ty, name, fields, .. } => {
                let meta = self
                    .data_types
                    .get(ty)
                    .and_then(|dt| dt.constructors.get(name))
                    .ok_or_else(|| {
                        err_convert!("unknown constructor {} of type {} in module {}", name, ty, self.module)
                    })?;
                Ok(build(
                    &self.build,
                    Syntax::CtorDef(meta.kind, ty.clone(), name.clone(), fields.clone()),
                ))
            }
        }
    }

    fn convert_all(&mut self, scope: &Scope, exprs: &[SourceExpr]) -> Result<Vec<BackendExpr>> {
        exprs.iter().map(|e| self.convert_expr(scope, e)).collect()
    }

    fn convert_literal(
        &mut self,
        scope: &Scope,
        lit: &Literal<SourceExpr>,
    ) -> Result<Literal<BackendExpr>> {
        Ok(match lit {
            Literal::Int(n) => Literal::Int(*n),
            Literal::Number(n) => Literal::Number(*n),
            Literal::String(s) => Literal::String(s.clone()),
            Literal::Char(c) => Literal::Char(*c),
            Literal::Boolean(b) => Literal::Boolean(*b),
            Literal::Array(xs) => Literal::Array(self.convert_all(scope, xs)?),
            Literal::Record(props) => {
                let props = props
                    .iter()
                    .map(|Prop(l, v)| Ok(Prop(l.clone(), self.convert_expr(scope, v)?)))
                    .collect::<Result<Vec<_>>>()?;
                Literal::Record(normalize_props(props))
            }
        })
    }
}
