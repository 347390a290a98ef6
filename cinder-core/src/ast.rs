//! Shared vocabulary for the backend IR and the surface syntax shipped by
//! the front end.
//!
//! The surface IR is the serialization boundary: the external front end
//! parses serialized modules into these types. Variables are still *names*
//! here; `convert` resolves them against a scope map (global-by-default) and
//! assigns de Bruijn levels.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// =============================================================================
// Names and levels
// =============================================================================

/// An identifier for a value-level binding or constructor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ident(pub String);

impl Ident {
    pub fn new(name: impl Into<String>) -> Self {
        Ident(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A segmented module name, stored with `.`-joined segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleName(pub String);

impl ModuleName {
    pub fn new(name: impl Into<String>) -> Self {
        ModuleName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The builtin module that never appears in a dependency closure.
pub const PRIM_MODULE: &str = "Prim";

/// A name for a data type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProperName(pub String);

impl ProperName {
    pub fn new(name: impl Into<String>) -> Self {
        ProperName(name.into())
    }
}

impl fmt::Display for ProperName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A global reference, optionally qualified by module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Qualified {
    pub module: Option<ModuleName>,
    pub name: Ident,
}

impl Qualified {
    pub fn new(module: ModuleName, name: Ident) -> Self {
        Qualified {
            module: Some(module),
            name,
        }
    }

    pub fn unqualified(name: Ident) -> Self {
        Qualified { module: None, name }
    }
}

impl fmt::Display for Qualified {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(m) => write!(f, "{}.{}", m, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A de Bruijn level, counted from the outside of a declaration. Levels are
/// globally unique within a declaration and stable under body motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Level(pub u32);

impl From<u32> for Level {
    fn from(n: u32) -> Self {
        Level(n)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Source location attached to top-level bindings by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Span {
    pub fn new(start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Span {
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }
}

impl Default for Span {
    fn default() -> Self {
        Span::new(0, 0, 0, 0)
    }
}

// =============================================================================
// Literals, record props, accessors
// =============================================================================

/// A record field label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(pub String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Label(name.into())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A labeled record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prop<A>(pub Label, pub A);

impl<A> Prop<A> {
    pub fn label(&self) -> &Label {
        &self.0
    }

    pub fn value(&self) -> &A {
        &self.1
    }
}

/// Literals, parameterized over the child expression type so they are shared
/// between the surface IR, the build IR, and the semantic domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal<A> {
    Int(i32),
    Number(f64),
    String(String),
    Char(char),
    Boolean(bool),
    Array(Vec<A>),
    Record(Vec<Prop<A>>),
}

impl<A> Literal<A> {
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Literal::Array(_) | Literal::Record(_))
    }
}

/// Projection out of a record, array, or constructor value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Accessor {
    GetProp(Label),
    GetIndex(u32),
    GetOffset(u32),
}

/// Sort props by label (stable), keeping the first occurrence per label.
/// Record updates rely on this: update props are prepended, so they win.
pub fn normalize_props<A>(props: Vec<Prop<A>>) -> Vec<Prop<A>> {
    let mut props = props;
    props.sort_by(|a, b| a.0.cmp(&b.0));
    props.dedup_by(|b, a| a.0 == b.0);
    props
}

// =============================================================================
// Primitive operators
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpOrd {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl OpOrd {
    /// The comparison computing the negation of this one.
    pub fn negate(self) -> OpOrd {
        match self {
            OpOrd::Eq => OpOrd::NotEq,
            OpOrd::NotEq => OpOrd::Eq,
            OpOrd::Lt => OpOrd::Gte,
            OpOrd::Lte => OpOrd::Gt,
            OpOrd::Gt => OpOrd::Lte,
            OpOrd::Gte => OpOrd::Lt,
        }
    }

    pub fn compare<T: PartialOrd>(self, a: T, b: T) -> bool {
        match self {
            OpOrd::Eq => a == b,
            OpOrd::NotEq => a != b,
            OpOrd::Lt => a < b,
            OpOrd::Lte => a <= b,
            OpOrd::Gt => a > b,
            OpOrd::Gte => a >= b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpNum {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// Unary primitives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op1 {
    Not,
    IntBitNot,
    IntNegate,
    NumberNegate,
    ArrayLength,
    /// Constructor tag test against the named constructor.
    IsTag(Qualified),
}

/// Binary primitives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Op2 {
    ArrayIndex,
    BooleanAnd,
    BooleanOr,
    BooleanOrd(OpOrd),
    CharOrd(OpOrd),
    IntBitAnd,
    IntBitOr,
    IntBitXor,
    IntBitShiftLeft,
    IntBitShiftRight,
    IntBitZeroFillShiftRight,
    IntNum(OpNum),
    IntOrd(OpOrd),
    NumberNum(OpNum),
    NumberOrd(OpOrd),
    StringAppend,
    StringOrd(OpOrd),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimOp<A> {
    Op1(Op1, A),
    Op2(Op2, A, A),
}

// =============================================================================
// Constructors
// =============================================================================

/// Whether a data type has exactly one constructor (`Product`) or several
/// (`Sum`). Product types need no runtime tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CtorKind {
    Product,
    Sum,
}

// =============================================================================
// Inline directives
// =============================================================================

/// An external override of the inlining policy for a declaration or field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InlineDirective {
    Never,
    Always,
    Arity(u32),
}

/// The subject of an inline directive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvalRef {
    /// A global declaration, optionally narrowed to one accessor (used for
    /// per-field directives on dictionary records).
    Extern(Qualified, Option<Accessor>),
    /// A local binding inside the declaration being optimized.
    Local(Option<Ident>, Level),
}

pub type DirectiveMap = IndexMap<EvalRef, InlineDirective>;

/// Directives attached to a module by the (external) comment parser.
/// `locals` apply while optimizing this module; `exports` are published to
/// downstream modules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleDirectives {
    pub locals: DirectiveMap,
    pub exports: DirectiveMap,
}

// =============================================================================
// Surface IR
// =============================================================================

/// A module as shipped by the front end, topologically sorted by import
/// before it reaches the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: ModuleName,
    pub imports: Vec<ModuleName>,
    pub exports: Vec<Ident>,
    pub reexports: Vec<(ModuleName, Ident)>,
    /// Identifiers implemented by externally linked code.
    pub foreign: Vec<Ident>,
    pub directives: ModuleDirectives,
    pub decls: Vec<BindGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BindGroup {
    NonRec(Binding),
    Rec(Vec<Binding>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub span: Span,
    pub name: Ident,
    pub expr: SourceExpr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceExpr {
    pub span: Span,
    pub kind: SourceExprKind,
}

impl SourceExpr {
    pub fn new(kind: SourceExprKind) -> Self {
        SourceExpr {
            span: Span::default(),
            kind,
        }
    }
}

/// Surface expression forms. Binders use names; unqualified variables are
/// global-by-default unless found in the local scope during conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SourceExprKind {
    Var(Qualified),
    Lit(Literal<SourceExpr>),
    App(Box<SourceExpr>, Vec<SourceExpr>),
    Abs(Vec<Option<Ident>>, Box<SourceExpr>),
    UncurriedApp(Box<SourceExpr>, Vec<SourceExpr>),
    UncurriedAbs(Vec<Option<Ident>>, Box<SourceExpr>),
    UncurriedEffectApp(Box<SourceExpr>, Vec<SourceExpr>),
    UncurriedEffectAbs(Vec<Option<Ident>>, Box<SourceExpr>),
    Let(Option<Ident>, Box<SourceExpr>, Box<SourceExpr>),
    LetRec(Vec<(Ident, SourceExpr)>, Box<SourceExpr>),
    EffectBind(Option<Ident>, Box<SourceExpr>, Box<SourceExpr>),
    EffectPure(Box<SourceExpr>),
    Accessor(Box<SourceExpr>, Accessor),
    Update(Box<SourceExpr>, Vec<Prop<SourceExpr>>),
    /// Ordered guarded alternatives with an optional fallthrough.
    Branch(Vec<(SourceExpr, SourceExpr)>, Option<Box<SourceExpr>>),
    PrimOp(Box<PrimOp<SourceExpr>>),
    /// A diverging pattern-match failure, preserved for the code emitter.
    Fail(String),
    /// A constructor declaration appearing as a top-level binding.
    Constructor {
        ty: ProperName,
        name: Ident,
        fields: Vec<Ident>,
        newtype: bool,
    },
}
