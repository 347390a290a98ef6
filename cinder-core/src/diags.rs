//! Diagnostic formatting for the neutral IR.
//!
//! Renders expressions close to a surface syntax, for test assertions and
//! log output. Not a stable serialization format.

use std::fmt::Write;

use crate::ast::{Accessor, Literal, Op1, Op2, OpNum, OpOrd, PrimOp};
use crate::ir::{NeutralExpr, Syntax};

/// Pretty-print a neutral expression on one line.
pub fn format_neutral(expr: &NeutralExpr) -> String {
    let mut out = String::new();
    write_neutral(&mut out, expr);
    out
}

fn write_neutral(out: &mut String, expr: &NeutralExpr) {
    match expr.syntax() {
        Syntax::Var(q) => {
            let _ = write!(out, "{}", q);
        }
        Syntax::Local(ident, level) => match ident {
            Some(id) => {
                let _ = write!(out, "{}{}", id, level);
            }
            None => {
                let _ = write!(out, "_{}", level);
            }
        },
        Syntax::Lit(lit) => write_literal(out, lit),
        Syntax::App(head, args) => {
            out.push('(');
            write_neutral(out, head);
            for arg in args {
                out.push(' ');
                write_neutral(out, arg);
            }
            out.push(')');
        }
        Syntax::Abs(params, body) => {
            out.push('\\');
            write_params(out, params);
            out.push_str(" -> ");
            write_neutral(out, body);
        }
        Syntax::UncurriedApp(head, args) | Syntax::UncurriedEffectApp(head, args) => {
            write_neutral(out, head);
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_neutral(out, arg);
            }
            out.push(')');
        }
        Syntax::UncurriedAbs(params, body) | Syntax::UncurriedEffectAbs(params, body) => {
            out.push_str("fn(");
            write_params(out, params);
            out.push_str(") -> ");
            write_neutral(out, body);
        }
        Syntax::Let(ident, level, binding, body) => {
            out.push_str("let ");
            match ident {
                Some(id) => {
                    let _ = write!(out, "{}{}", id, level);
                }
                None => {
                    let _ = write!(out, "_{}", level);
                }
            }
            out.push_str(" = ");
            write_neutral(out, binding);
            out.push_str(" in ");
            write_neutral(out, body);
        }
        Syntax::LetRec(level, bindings, body) => {
            out.push_str("letrec ");
            for (i, (ident, binding)) in bindings.iter().enumerate() {
                if i > 0 {
                    out.push_str("; ");
                }
                let _ = write!(out, "{}{} = ", ident, level);
                write_neutral(out, binding);
            }
            out.push_str(" in ");
            write_neutral(out, body);
        }
        Syntax::EffectBind(ident, level, eff, body) => {
            out.push_str("bind ");
            match ident {
                Some(id) => {
                    let _ = write!(out, "{}{}", id, level);
                }
                None => {
                    let _ = write!(out, "_{}", level);
                }
            }
            out.push_str(" <- ");
            write_neutral(out, eff);
            out.push_str("; ");
            write_neutral(out, body);
        }
        Syntax::EffectPure(value) => {
            out.push_str("pure ");
            write_neutral(out, value);
        }
        Syntax::Accessor(target, acc) => {
            write_neutral(out, target);
            match acc {
                Accessor::GetProp(label) => {
                    let _ = write!(out, ".{}", label);
                }
                Accessor::GetIndex(n) => {
                    let _ = write!(out, "[{}]", n);
                }
                Accessor::GetOffset(n) => {
                    let _ = write!(out, "#{}", n);
                }
            }
        }
        Syntax::Update(target, props) => {
            write_neutral(out, target);
            out.push_str(" { ");
            for (i, prop) in props.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{} = ", prop.label());
                write_neutral(out, prop.value());
            }
            out.push_str(" }");
        }
        Syntax::Branch(pairs, default) => {
            for (i, (guard, body)) in pairs.iter().enumerate() {
                out.push_str(if i == 0 { "if " } else { " else if " });
                write_neutral(out, guard);
                out.push_str(" then ");
                write_neutral(out, body);
            }
            if let Some(d) = default {
                out.push_str(" else ");
                write_neutral(out, d);
            }
        }
        Syntax::PrimOp(op) => write_prim_op(out, op),
        Syntax::Fail(msg) => {
            let _ = write!(out, "fail {:?}", msg);
        }
        Syntax::CtorDef(_, ty, name, fields) => {
            let _ = write!(out, "ctor {}.{}/{}", ty, name, fields.len());
        }
        Syntax::CtorSaturated(q, _, _, _, fields) => {
            out.push('(');
            let _ = write!(out, "{}", q);
            for (_, value) in fields {
                out.push(' ');
                write_neutral(out, value);
            }
            out.push(')');
        }
    }
}

fn write_params(out: &mut String, params: &[(Option<crate::ast::Ident>, crate::ast::Level)]) {
    for (i, (ident, level)) in params.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        match ident {
            Some(id) => {
                let _ = write!(out, "{}{}", id, level);
            }
            None => {
                let _ = write!(out, "_{}", level);
            }
        }
    }
}

fn write_literal(out: &mut String, lit: &Literal<NeutralExpr>) {
    match lit {
        Literal::Int(n) => {
            let _ = write!(out, "{}", n);
        }
        Literal::Number(n) => {
            let _ = write!(out, "{:?}", n);
        }
        Literal::String(s) => {
            let _ = write!(out, "{:?}", s);
        }
        Literal::Char(c) => {
            let _ = write!(out, "{:?}", c);
        }
        Literal::Boolean(b) => {
            let _ = write!(out, "{}", b);
        }
        Literal::Array(xs) => {
            out.push('[');
            for (i, x) in xs.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_neutral(out, x);
            }
            out.push(']');
        }
        Literal::Record(props) => {
            out.push_str("{ ");
            for (i, prop) in props.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}: ", prop.label());
                write_neutral(out, prop.value());
            }
            out.push_str(" }");
        }
    }
}

fn op2_symbol(op: &Op2) -> &'static str {
    match op {
        Op2::ArrayIndex => "!!",
        Op2::BooleanAnd => "&&",
        Op2::BooleanOr => "||",
        Op2::BooleanOrd(o) | Op2::CharOrd(o) | Op2::IntOrd(o) | Op2::NumberOrd(o)
        | Op2::StringOrd(o) => ord_symbol(o),
        Op2::IntBitAnd => ".&.",
        Op2::IntBitOr => ".|.",
        Op2::IntBitXor => ".^.",
        Op2::IntBitShiftLeft => "shl",
        Op2::IntBitShiftRight => "shr",
        Op2::IntBitZeroFillShiftRight => "zshr",
        Op2::IntNum(o) | Op2::NumberNum(o) => num_symbol(o),
        Op2::StringAppend => "++",
    }
}

fn ord_symbol(op: &OpOrd) -> &'static str {
    match op {
        OpOrd::Eq => "==",
        OpOrd::NotEq => "/=",
        OpOrd::Lt => "<",
        OpOrd::Lte => "<=",
        OpOrd::Gt => ">",
        OpOrd::Gte => ">=",
    }
}

fn num_symbol(op: &OpNum) -> &'static str {
    match op {
        OpNum::Add => "+",
        OpNum::Subtract => "-",
        OpNum::Multiply => "*",
        OpNum::Divide => "/",
    }
}

fn write_prim_op(out: &mut String, op: &PrimOp<NeutralExpr>) {
    match op {
        PrimOp::Op1(op1, operand) => {
            match op1 {
                Op1::Not => out.push('!'),
                Op1::IntBitNot => out.push('~'),
                Op1::IntNegate | Op1::NumberNegate => out.push('-'),
                Op1::ArrayLength => out.push_str("length "),
                Op1::IsTag(q) => {
                    let _ = write!(out, "is<{}> ", q);
                }
            }
            write_neutral(out, operand);
        }
        PrimOp::Op2(op2, lhs, rhs) => {
            out.push('(');
            write_neutral(out, lhs);
            let _ = write!(out, " {} ", op2_symbol(op2));
            write_neutral(out, rhs);
            out.push(')');
        }
    }
}
