//! Register IR instructions definitions.

use crate::body::{Body, InsnId};
use crate::errors::IrResult;
use crate::registers::Reg;
use crate::types::{FieldRef, MethodRef, Type};
use serde::Serialize;
use std::fmt;

/// Pretty printing of IR elements that need their enclosing body (register names,
/// labels) to be displayed.
pub trait PrettyPrint {
    fn pp(&self, f: &mut fmt::Formatter, body: &Body) -> IrResult<()>;
}

pub struct PrettyPrinter<'a, T>(pub &'a T, pub &'a Body);

impl<'a, T: PrettyPrint> fmt::Display for PrettyPrinter<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.pp(f, self.1).map_err(|_| fmt::Error)
    }
}

/// Comparison operators of conditional branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Comp {
    pub const ALL: [Self; 6] = [Self::Eq, Self::Ne, Self::Lt, Self::Ge, Self::Gt, Self::Le];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Ge => "ge",
            Self::Gt => "gt",
            Self::Le => "le",
        }
    }

    /// Equality tests also apply to references, other comparisons only to integers.
    #[inline]
    #[must_use]
    pub const fn is_equality(self) -> bool {
        matches!(self, Self::Eq | Self::Ne)
    }
}

/// Binary arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinOp {
    Add,
    /// With a literal operand, this is a reverse subtraction (`lit - src`).
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

impl BinOp {
    pub const ALL: [Self; 11] = [
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Rem,
        Self::And,
        Self::Or,
        Self::Xor,
        Self::Shl,
        Self::Shr,
        Self::Ushr,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Ushr => "ushr",
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_shift(self) -> bool {
        matches!(self, Self::Shl | Self::Shr | Self::Ushr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnOp {
    Neg,
    Not,
}

impl UnOp {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Neg => "neg",
            Self::Not => "not",
        }
    }
}

/// Three-way comparisons producing an `int`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CmpKind {
    CmplFloat,
    CmpgFloat,
    CmplDouble,
    CmpgDouble,
    CmpLong,
}

impl CmpKind {
    pub const ALL: [Self; 5] = [
        Self::CmplFloat,
        Self::CmpgFloat,
        Self::CmplDouble,
        Self::CmpgDouble,
        Self::CmpLong,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CmplFloat => "cmpl-float",
            Self::CmpgFloat => "cmpg-float",
            Self::CmplDouble => "cmpl-double",
            Self::CmpgDouble => "cmpg-double",
            Self::CmpLong => "cmp-long",
        }
    }

    /// Type of the compared operands.
    #[must_use]
    pub const fn operand_type(self) -> Type {
        match self {
            Self::CmplFloat | Self::CmpgFloat => Type::Float,
            Self::CmplDouble | Self::CmpgDouble => Type::Double,
            Self::CmpLong => Type::Long,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InvokeKind {
    Virtual,
    Super,
    Direct,
    Static,
    Interface,
}

impl InvokeKind {
    pub const ALL: [Self; 5] = [
        Self::Virtual,
        Self::Super,
        Self::Direct,
        Self::Static,
        Self::Interface,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Virtual => "invoke-virtual",
            Self::Super => "invoke-super",
            Self::Direct => "invoke-direct",
            Self::Static => "invoke-static",
            Self::Interface => "invoke-interface",
        }
    }
}

/// A register IR instruction.
///
/// Registers are virtual register handles, branch targets are instruction handles of
/// the same [`Body`]. Typed instructions whose type is one of the ambiguous lattice
/// elements (see [`Type::is_ambiguous`]) are resolved by the typing pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Instr {
    /// Waste cycles.
    Nop,
    /// Loads a literal into a register. The type is ambiguous when the bit pattern
    /// alone does not tell between `int`, `float` and `null` (or `long` and `double`).
    Const(Type, Reg, i64),
    ConstString(Reg, String),
    ConstClass(Reg, Type),
    /// Copies a register (destination first), typed by the moved value.
    Move(Type, Reg, Reg),
    /// Retrieves the result of the preceding invoke or filled-new-array.
    MoveResult(Reg),
    /// Retrieves the caught exception, first instruction of a handler.
    MoveException(Reg),
    ReturnVoid,
    Return(Reg),
    MonitorEnter(Reg),
    MonitorExit(Reg),
    CheckCast(Reg, Type),
    /// `dst = src instanceof type`
    InstanceOf(Reg, Reg, Type),
    /// `dst = arr.length`
    ArrayLength(Reg, Reg),
    NewInstance(Reg, Type),
    /// `dst = new type[size]`, with `type` the array type.
    NewArray(Reg, Reg, Type),
    /// Builds an array of the given array type from the listed registers.
    FilledNewArray(Vec<Reg>, Type),
    /// Fills the array in register with literal elements of the given element type.
    FillArrayData(Reg, Type, Vec<i64>),
    Throw(Reg),
    Goto(InsnId),
    If(Comp, Reg, Reg, InsnId),
    /// Compares a register against zero (or `null`).
    IfZ(Comp, Reg, InsnId),
    /// Jumps to the nth target when the register value is `first_key + n`.
    PackedSwitch(Reg, i32, Vec<InsnId>),
    SparseSwitch(Reg, Vec<(i32, InsnId)>),
    /// `dst = cmp(a, b)`
    Cmp(CmpKind, Reg, Reg, Reg),
    /// `dst = arr[idx]`, typed by the element.
    Aget(Type, Reg, Reg, Reg),
    /// `arr[idx] = val` (value register first), typed by the element.
    Aput(Type, Reg, Reg, Reg),
    /// `dst = obj.field`
    Iget(Reg, Reg, FieldRef),
    /// `obj.field = val` (value register first).
    Iput(Reg, Reg, FieldRef),
    Sget(Reg, FieldRef),
    Sput(Reg, FieldRef),
    /// Calls a method, the receiver being the first argument of non static calls.
    Invoke(InvokeKind, Vec<Reg>, MethodRef),
    /// `dst = op src`
    Unary(UnOp, Type, Reg, Reg),
    /// `dst = (to) src`, with source type first.
    Convert(Type, Type, Reg, Reg),
    /// `dst = a op b`
    Binary(BinOp, Type, Reg, Reg, Reg),
    /// `dst = src op lit` on `int` values.
    BinaryLit(BinOp, Reg, Reg, i32),
}

impl Instr {
    /// Returns the registers read by the instruction, in operand order.
    #[must_use]
    pub fn reads(&self) -> Vec<Reg> {
        match self {
            Self::Nop
            | Self::Const(..)
            | Self::ConstString(..)
            | Self::ConstClass(..)
            | Self::MoveResult(_)
            | Self::MoveException(_)
            | Self::ReturnVoid
            | Self::NewInstance(..)
            | Self::Goto(_)
            | Self::Sget(..) => vec![],
            Self::Move(_, _, src)
            | Self::InstanceOf(_, src, _)
            | Self::ArrayLength(_, src)
            | Self::NewArray(_, src, _)
            | Self::Iget(_, src, _)
            | Self::Unary(_, _, _, src)
            | Self::Convert(_, _, _, src)
            | Self::BinaryLit(_, _, src, _) => vec![*src],
            Self::Return(r)
            | Self::MonitorEnter(r)
            | Self::MonitorExit(r)
            | Self::CheckCast(r, _)
            | Self::FillArrayData(r, _, _)
            | Self::Throw(r)
            | Self::IfZ(_, r, _)
            | Self::PackedSwitch(r, _, _)
            | Self::SparseSwitch(r, _)
            | Self::Sput(r, _) => vec![*r],
            Self::If(_, a, b, _) | Self::Cmp(_, _, a, b) | Self::Binary(_, _, _, a, b) => {
                vec![*a, *b]
            }
            Self::Aget(_, _, arr, idx) => vec![*arr, *idx],
            Self::Aput(_, val, arr, idx) => vec![*val, *arr, *idx],
            Self::Iput(val, obj, _) => vec![*val, *obj],
            Self::FilledNewArray(args, _) | Self::Invoke(_, args, _) => args.clone(),
        }
    }

    /// Returns the register written by the instruction, if any.
    #[must_use]
    pub const fn write(&self) -> Option<Reg> {
        match self {
            Self::Const(_, dst, _)
            | Self::ConstString(dst, _)
            | Self::ConstClass(dst, _)
            | Self::Move(_, dst, _)
            | Self::MoveResult(dst)
            | Self::MoveException(dst)
            | Self::CheckCast(dst, _)
            | Self::InstanceOf(dst, _, _)
            | Self::ArrayLength(dst, _)
            | Self::NewInstance(dst, _)
            | Self::NewArray(dst, _, _)
            | Self::Cmp(_, dst, _, _)
            | Self::Aget(_, dst, _, _)
            | Self::Iget(dst, _, _)
            | Self::Sget(dst, _)
            | Self::Unary(_, _, dst, _)
            | Self::Convert(_, _, dst, _)
            | Self::Binary(_, _, dst, _, _)
            | Self::BinaryLit(_, dst, _, _) => Some(*dst),
            _ => None,
        }
    }

    /// Returns mutable references on every register operand, written one included.
    pub fn registers_mut(&mut self) -> Vec<&mut Reg> {
        match self {
            Self::Nop | Self::ReturnVoid | Self::Goto(_) => vec![],
            Self::Const(_, r, _)
            | Self::ConstString(r, _)
            | Self::ConstClass(r, _)
            | Self::MoveResult(r)
            | Self::MoveException(r)
            | Self::Return(r)
            | Self::MonitorEnter(r)
            | Self::MonitorExit(r)
            | Self::CheckCast(r, _)
            | Self::NewInstance(r, _)
            | Self::FillArrayData(r, _, _)
            | Self::Throw(r)
            | Self::IfZ(_, r, _)
            | Self::PackedSwitch(r, _, _)
            | Self::SparseSwitch(r, _)
            | Self::Sget(r, _)
            | Self::Sput(r, _) => vec![r],
            Self::Move(_, a, b)
            | Self::InstanceOf(a, b, _)
            | Self::ArrayLength(a, b)
            | Self::NewArray(a, b, _)
            | Self::If(_, a, b, _)
            | Self::Iget(a, b, _)
            | Self::Iput(a, b, _)
            | Self::Unary(_, _, a, b)
            | Self::Convert(_, _, a, b)
            | Self::BinaryLit(_, a, b, _) => vec![a, b],
            Self::Cmp(_, a, b, c)
            | Self::Aget(_, a, b, c)
            | Self::Aput(_, a, b, c)
            | Self::Binary(_, _, a, b, c) => vec![a, b, c],
            Self::FilledNewArray(args, _) | Self::Invoke(_, args, _) => args.iter_mut().collect(),
        }
    }

    /// Returns the argument list of instructions that may be emitted in range form.
    pub fn range_arguments_mut(&mut self) -> Option<&mut Vec<Reg>> {
        match self {
            Self::FilledNewArray(args, _) | Self::Invoke(_, args, _) => Some(args),
            _ => None,
        }
    }

    /// Returns the explicit branch targets of the instruction (fallthrough excluded).
    #[must_use]
    pub fn targets(&self) -> Vec<InsnId> {
        match self {
            Self::Goto(t) | Self::If(_, _, _, t) | Self::IfZ(_, _, t) => vec![*t],
            Self::PackedSwitch(_, _, targets) => targets.clone(),
            Self::SparseSwitch(_, cases) => cases.iter().map(|(_, t)| *t).collect(),
            _ => vec![],
        }
    }

    pub fn targets_mut(&mut self) -> Vec<&mut InsnId> {
        match self {
            Self::Goto(t) | Self::If(_, _, _, t) | Self::IfZ(_, _, t) => vec![t],
            Self::PackedSwitch(_, _, targets) => targets.iter_mut().collect(),
            Self::SparseSwitch(_, cases) => cases.iter_mut().map(|(_, t)| t).collect(),
            _ => vec![],
        }
    }

    /// Checks if the execution may flow to the textually next instruction.
    #[inline]
    #[must_use]
    pub const fn can_continue(&self) -> bool {
        !matches!(
            self,
            Self::ReturnVoid | Self::Return(_) | Self::Throw(_) | Self::Goto(_)
        )
    }

    #[must_use]
    pub const fn can_throw(&self) -> bool {
        match self {
            Self::Nop
            | Self::Const(..)
            | Self::Move(..)
            | Self::MoveResult(_)
            | Self::MoveException(_)
            | Self::ReturnVoid
            | Self::Return(_)
            | Self::Goto(_)
            | Self::If(..)
            | Self::IfZ(..)
            | Self::PackedSwitch(..)
            | Self::SparseSwitch(..)
            | Self::Cmp(..)
            | Self::Unary(..)
            | Self::Convert(..) => false,
            Self::Binary(op, _, _, _, _) | Self::BinaryLit(op, _, _, _) => {
                matches!(op, BinOp::Div | BinOp::Rem)
            }
            _ => true,
        }
    }

    /// Returns the instruction own type, for instructions carrying a possibly
    /// ambiguous one.
    #[must_use]
    pub const fn own_type(&self) -> Option<&Type> {
        match self {
            Self::Const(t, _, _)
            | Self::Move(t, _, _)
            | Self::Aget(t, _, _, _)
            | Self::Aput(t, _, _, _)
            | Self::FillArrayData(_, t, _) => Some(t),
            _ => None,
        }
    }

    pub fn own_type_mut(&mut self) -> Option<&mut Type> {
        match self {
            Self::Const(t, _, _)
            | Self::Move(t, _, _)
            | Self::Aget(t, _, _, _)
            | Self::Aput(t, _, _, _)
            | Self::FillArrayData(_, t, _) => Some(t),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        self.own_type().map_or(false, Type::is_ambiguous)
    }

    #[must_use]
    pub fn mnemonic(&self) -> String {
        match self {
            Self::Nop => "nop".to_string(),
            Self::Const(..) => "const".to_string(),
            Self::ConstString(..) => "const-string".to_string(),
            Self::ConstClass(..) => "const-class".to_string(),
            Self::Move(..) => "move".to_string(),
            Self::MoveResult(_) => "move-result".to_string(),
            Self::MoveException(_) => "move-exception".to_string(),
            Self::ReturnVoid => "return-void".to_string(),
            Self::Return(_) => "return".to_string(),
            Self::MonitorEnter(_) => "monitor-enter".to_string(),
            Self::MonitorExit(_) => "monitor-exit".to_string(),
            Self::CheckCast(..) => "check-cast".to_string(),
            Self::InstanceOf(..) => "instance-of".to_string(),
            Self::ArrayLength(..) => "array-length".to_string(),
            Self::NewInstance(..) => "new-instance".to_string(),
            Self::NewArray(..) => "new-array".to_string(),
            Self::FilledNewArray(..) => "filled-new-array".to_string(),
            Self::FillArrayData(..) => "fill-array-data".to_string(),
            Self::Throw(_) => "throw".to_string(),
            Self::Goto(_) => "goto".to_string(),
            Self::If(comp, _, _, _) => format!("if-{}", comp.name()),
            Self::IfZ(comp, _, _) => format!("if-{}z", comp.name()),
            Self::PackedSwitch(..) => "packed-switch".to_string(),
            Self::SparseSwitch(..) => "sparse-switch".to_string(),
            Self::Cmp(kind, _, _, _) => kind.name().to_string(),
            Self::Aget(..) => "aget".to_string(),
            Self::Aput(..) => "aput".to_string(),
            Self::Iget(..) => "iget".to_string(),
            Self::Iput(..) => "iput".to_string(),
            Self::Sget(..) => "sget".to_string(),
            Self::Sput(..) => "sput".to_string(),
            Self::Invoke(kind, _, _) => kind.name().to_string(),
            Self::Unary(op, _, _, _) => op.name().to_string(),
            Self::Convert(..) => "convert".to_string(),
            Self::Binary(op, _, _, _, _) => op.name().to_string(),
            Self::BinaryLit(op, _, _, _) => format!("{}-lit", op.name()),
        }
    }
}

/// Escapes a string constant the way the textual reader expects it.
#[must_use]
pub fn escape(s: &str) -> String {
    let mut res = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => res.push_str("\\\\"),
            '"' => res.push_str("\\\""),
            '\n' => res.push_str("\\n"),
            '\r' => res.push_str("\\r"),
            '\t' => res.push_str("\\t"),
            c => res.push(c),
        }
    }
    res
}

fn pp_reg(f: &mut fmt::Formatter, body: &Body, reg: Reg) -> IrResult<()> {
    write!(f, "{}", body.reg(reg)?.name())?;
    Ok(())
}

fn pp_regs(f: &mut fmt::Formatter, body: &Body, regs: &[Reg]) -> IrResult<()> {
    write!(f, "{{")?;
    for (i, reg) in regs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        pp_reg(f, body, *reg)?;
    }
    write!(f, "}}")?;
    Ok(())
}

impl PrettyPrint for Instr {
    fn pp(&self, f: &mut fmt::Formatter, body: &Body) -> IrResult<()> {
        write!(f, "{}", self.mnemonic())?;
        match self {
            Self::Const(t, _, _)
            | Self::Move(t, _, _)
            | Self::Aget(t, _, _, _)
            | Self::Aput(t, _, _, _)
            | Self::FillArrayData(_, t, _)
            | Self::Unary(_, t, _, _)
            | Self::Binary(_, t, _, _, _) => write!(f, ":{t}")?,
            Self::Convert(from, to, _, _) => write!(f, ":{from}:{to}")?,
            _ => (),
        }

        match self {
            Self::Nop | Self::ReturnVoid => (),
            Self::Const(_, dst, lit) => {
                write!(f, " ")?;
                pp_reg(f, body, *dst)?;
                write!(f, ", {lit}")?;
            }
            Self::ConstString(dst, s) => {
                write!(f, " ")?;
                pp_reg(f, body, *dst)?;
                write!(f, ", \"{}\"", escape(s))?;
            }
            Self::ConstClass(r, t)
            | Self::CheckCast(r, t)
            | Self::NewInstance(r, t) => {
                write!(f, " ")?;
                pp_reg(f, body, *r)?;
                write!(f, ", {t}")?;
            }
            Self::MoveResult(r)
            | Self::MoveException(r)
            | Self::Return(r)
            | Self::MonitorEnter(r)
            | Self::MonitorExit(r)
            | Self::Throw(r) => {
                write!(f, " ")?;
                pp_reg(f, body, *r)?;
            }
            Self::Move(_, a, b)
            | Self::ArrayLength(a, b)
            | Self::Unary(_, _, a, b)
            | Self::Convert(_, _, a, b) => {
                write!(f, " ")?;
                pp_reg(f, body, *a)?;
                write!(f, ", ")?;
                pp_reg(f, body, *b)?;
            }
            Self::InstanceOf(a, b, t) | Self::NewArray(a, b, t) => {
                write!(f, " ")?;
                pp_reg(f, body, *a)?;
                write!(f, ", ")?;
                pp_reg(f, body, *b)?;
                write!(f, ", {t}")?;
            }
            Self::FilledNewArray(args, t) => {
                write!(f, " ")?;
                pp_regs(f, body, args)?;
                write!(f, ", {t}")?;
            }
            Self::FillArrayData(r, _, data) => {
                write!(f, " ")?;
                pp_reg(f, body, *r)?;
                write!(f, ", {{")?;
                for (i, v) in data.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "}}")?;
            }
            Self::Goto(target) => write!(f, " :{}", target)?,
            Self::If(_, a, b, target) => {
                write!(f, " ")?;
                pp_reg(f, body, *a)?;
                write!(f, ", ")?;
                pp_reg(f, body, *b)?;
                write!(f, ", :{}", target)?;
            }
            Self::IfZ(_, r, target) => {
                write!(f, " ")?;
                pp_reg(f, body, *r)?;
                write!(f, ", :{}", target)?;
            }
            Self::PackedSwitch(r, first_key, targets) => {
                write!(f, " ")?;
                pp_reg(f, body, *r)?;
                write!(f, ", {first_key}, {{")?;
                for (i, target) in targets.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, ":{}", target)?;
                }
                write!(f, "}}")?;
            }
            Self::SparseSwitch(r, cases) => {
                write!(f, " ")?;
                pp_reg(f, body, *r)?;
                write!(f, ", {{")?;
                for (i, (key, target)) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key} -> :{}", target)?;
                }
                write!(f, "}}")?;
            }
            Self::Cmp(_, a, b, c)
            | Self::Aget(_, a, b, c)
            | Self::Aput(_, a, b, c)
            | Self::Binary(_, _, a, b, c) => {
                write!(f, " ")?;
                pp_reg(f, body, *a)?;
                write!(f, ", ")?;
                pp_reg(f, body, *b)?;
                write!(f, ", ")?;
                pp_reg(f, body, *c)?;
            }
            Self::Iget(a, b, field) | Self::Iput(a, b, field) => {
                write!(f, " ")?;
                pp_reg(f, body, *a)?;
                write!(f, ", ")?;
                pp_reg(f, body, *b)?;
                write!(f, ", {field}")?;
            }
            Self::Sget(r, field) | Self::Sput(r, field) => {
                write!(f, " ")?;
                pp_reg(f, body, *r)?;
                write!(f, ", {field}")?;
            }
            Self::Invoke(_, args, method) => {
                write!(f, " ")?;
                pp_regs(f, body, args)?;
                write!(f, ", {method}")?;
            }
            Self::BinaryLit(_, a, b, lit) => {
                write!(f, " ")?;
                pp_reg(f, body, *a)?;
                write!(f, ", ")?;
                pp_reg(f, body, *b)?;
                write!(f, ", {lit}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operands() {
        let (a, b, c) = (Reg::new(0), Reg::new(1), Reg::new(2));
        let aput = Instr::Aput(Type::Narrow, a, b, c);
        assert_eq!(aput.reads(), vec![a, b, c]);
        assert_eq!(aput.write(), None);
        assert!(aput.is_ambiguous());
        assert!(aput.can_throw());

        let mut add = Instr::Binary(BinOp::Add, Type::Int, a, b, c);
        assert_eq!(add.reads(), vec![b, c]);
        assert_eq!(add.write(), Some(a));
        assert!(!add.can_throw());
        for r in add.registers_mut() {
            *r = c;
        }
        assert_eq!(add, Instr::Binary(BinOp::Add, Type::Int, c, c, c));

        let div = Instr::BinaryLit(BinOp::Div, a, b, 3);
        assert!(div.can_throw());
        assert_eq!(div.mnemonic(), "div-lit");
    }

    #[test]
    fn control_transfers() {
        let r = Reg::new(0);
        let (t1, t2) = (InsnId::new(4), InsnId::new(7));
        let mut switch = Instr::SparseSwitch(r, vec![(1, t1), (10, t2)]);
        assert_eq!(switch.targets(), vec![t1, t2]);
        for t in switch.targets_mut() {
            *t = t1;
        }
        assert_eq!(switch.targets(), vec![t1, t1]);
        assert!(switch.can_continue());
        assert!(!Instr::Goto(t1).can_continue());
        assert!(!Instr::Throw(r).can_continue());
        assert_eq!(Instr::IfZ(Comp::Ne, r, t1).mnemonic(), "if-nez");
    }
}
