//! Per-instruction typing hints.
//!
//! Every instruction is described by the registers it reads, each with the type it
//! expects, and the register it writes with the type it produces. For instructions
//! whose own type is ambiguous, operand types are expressed relatively to that own
//! type (see [`Shape`]) so that resolving the instruction refines its operands.

use crate::controlflow::{Branch, Cfg};
use crate::errors::AnalysisResult;
use crate::typing::errors::TypeError;
use dw_ir::instrs::{Instr, InvokeKind};
use dw_ir::types::{JAVA_LANG_CLASS, JAVA_LANG_OBJECT, JAVA_LANG_STRING, JAVA_LANG_THROWABLE};
use dw_ir::{Body, InsnId, Reg, Type};

/// How an operand type relates to the instruction own type.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Imposed by the instruction, whatever its own type.
    Fixed(Type),
    /// The instruction own type.
    Own,
    /// An array of the instruction own type.
    ArrayOfOwn,
}

impl Shape {
    /// Extracts from a neighbour type the information it gives about the
    /// instruction own type.
    #[must_use]
    pub fn extract(&self, t: &Type) -> Option<Type> {
        match self {
            Self::Fixed(_) => None,
            Self::Own => Some(t.clone()),
            Self::ArrayOfOwn => t.element(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub reg: Reg,
    pub shape: Shape,
}

impl Operand {
    fn fixed(reg: Reg, t: Type) -> Self {
        Self {
            reg,
            shape: Shape::Fixed(t),
        }
    }

    fn own(reg: Reg) -> Self {
        Self {
            reg,
            shape: Shape::Own,
        }
    }

    fn array_of_own(reg: Reg) -> Self {
        Self {
            reg,
            shape: Shape::ArrayOfOwn,
        }
    }

    /// Returns the operand type given the current instruction own type.
    #[must_use]
    pub fn resolve(&self, own: Option<&Type>) -> Option<Type> {
        match &self.shape {
            Shape::Fixed(t) => Some(t.clone()),
            Shape::Own => own.cloned(),
            Shape::ArrayOfOwn => own.map(|t| Type::array_of(t.clone())),
        }
    }
}

/// Register accesses of one instruction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Access {
    pub reads: Vec<Operand>,
    pub write: Option<Operand>,
}

impl Access {
    fn reads(reads: Vec<Operand>) -> Self {
        Self { reads, write: None }
    }

    fn write(write: Operand) -> Self {
        Self {
            reads: vec![],
            write: Some(write),
        }
    }

    fn new(reads: Vec<Operand>, write: Operand) -> Self {
        Self {
            reads,
            write: Some(write),
        }
    }
}

fn concrete(id: InsnId, t: &Type) -> AnalysisResult<Type> {
    if t.is_ambiguous() {
        Err(TypeError::Internal(format!("{id} cannot carry the ambiguous type {t}")).into())
    } else {
        Ok(t.clone())
    }
}

fn element(t: &Type) -> AnalysisResult<Type> {
    t.element()
        .ok_or_else(|| TypeError::ExpectedArray(t.clone()).into())
}

/// Type produced by the unique predecessor of a `move-result`.
fn result_type(body: &Body, cfg: &Cfg, id: InsnId) -> AnalysisResult<Type> {
    let preds = cfg.predecessors(id)?;
    if let [(pred, Branch::Sequence)] = preds.as_slice() {
        match body.instr(*pred)? {
            Instr::Invoke(_, _, method) if method.return_type != Type::Void => {
                return Ok(method.return_type.clone());
            }
            Instr::FilledNewArray(_, t) => return Ok(t.clone()),
            _ => (),
        }
    }
    Err(TypeError::MissingResult(id).into())
}

/// Type of the exception caught by a handler: the common caught type of every
/// incoming exceptional edge, `java/lang/Throwable` otherwise.
fn exception_type(cfg: &Cfg, id: InsnId) -> AnalysisResult<Type> {
    let mut caught = None;
    for (_, branch) in cfg.predecessors(id)? {
        let t = match branch {
            Branch::Catch(t) => t,
            _ => return Ok(JAVA_LANG_THROWABLE.clone()),
        };
        match &caught {
            None => caught = Some(t.clone()),
            Some(c) if c == t => (),
            Some(_) => return Ok(JAVA_LANG_THROWABLE.clone()),
        }
    }
    Ok(caught.unwrap_or_else(|| JAVA_LANG_THROWABLE.clone()))
}

/// Computes the register accesses of an instruction.
pub fn access(body: &Body, cfg: &Cfg, id: InsnId) -> AnalysisResult<Access> {
    let method = body.method();
    let access = match body.instr(id)? {
        Instr::Nop | Instr::Goto(_) => Access::default(),
        Instr::ReturnVoid => {
            if method.return_type != Type::Void {
                return Err(TypeError::BadReturnType(id).into());
            }
            Access::default()
        }
        Instr::Return(r) => {
            if method.return_type == Type::Void {
                return Err(TypeError::BadReturnType(id).into());
            }
            Access::reads(vec![Operand::fixed(*r, method.return_type.clone())])
        }
        Instr::Const(_, dst, _) => Access::write(Operand::own(*dst)),
        Instr::ConstString(dst, _) => Access::write(Operand::fixed(*dst, JAVA_LANG_STRING.clone())),
        Instr::ConstClass(dst, _) => Access::write(Operand::fixed(*dst, JAVA_LANG_CLASS.clone())),
        Instr::Move(_, dst, src) => Access::new(vec![Operand::own(*src)], Operand::own(*dst)),
        Instr::MoveResult(dst) => {
            Access::write(Operand::fixed(*dst, result_type(body, cfg, id)?))
        }
        Instr::MoveException(dst) => Access::write(Operand::fixed(*dst, exception_type(cfg, id)?)),
        Instr::MonitorEnter(r) | Instr::MonitorExit(r) => {
            Access::reads(vec![Operand::fixed(*r, JAVA_LANG_OBJECT.clone())])
        }
        Instr::CheckCast(r, t) => Access::new(
            vec![Operand::fixed(*r, JAVA_LANG_OBJECT.clone())],
            Operand::fixed(*r, t.clone()),
        ),
        Instr::InstanceOf(dst, src, _) => Access::new(
            vec![Operand::fixed(*src, JAVA_LANG_OBJECT.clone())],
            Operand::fixed(*dst, Type::Boolean),
        ),
        Instr::ArrayLength(dst, arr) => Access::new(
            vec![Operand::fixed(*arr, JAVA_LANG_OBJECT.clone())],
            Operand::fixed(*dst, Type::Int),
        ),
        Instr::NewInstance(dst, t) => Access::write(Operand::fixed(*dst, t.clone())),
        Instr::NewArray(dst, size, t) => {
            element(t)?;
            Access::new(
                vec![Operand::fixed(*size, Type::Int)],
                Operand::fixed(*dst, t.clone()),
            )
        }
        Instr::FilledNewArray(args, t) => {
            let elem = concrete(id, &element(t)?)?;
            Access::reads(
                args.iter()
                    .map(|r| Operand::fixed(*r, elem.clone()))
                    .collect(),
            )
        }
        Instr::FillArrayData(arr, _, _) => Access::reads(vec![Operand::array_of_own(*arr)]),
        Instr::Throw(r) => Access::reads(vec![Operand::fixed(*r, JAVA_LANG_THROWABLE.clone())]),
        Instr::If(comp, a, b, _) => {
            let t = if comp.is_equality() {
                Type::Zero
            } else {
                Type::Int
            };
            Access::reads(vec![Operand::fixed(*a, t.clone()), Operand::fixed(*b, t)])
        }
        Instr::IfZ(comp, r, _) => {
            let t = if comp.is_equality() {
                Type::Zero
            } else {
                Type::Int
            };
            Access::reads(vec![Operand::fixed(*r, t)])
        }
        Instr::PackedSwitch(r, _, _) | Instr::SparseSwitch(r, _) => {
            Access::reads(vec![Operand::fixed(*r, Type::Int)])
        }
        Instr::Cmp(kind, dst, a, b) => {
            let t = kind.operand_type();
            Access::new(
                vec![Operand::fixed(*a, t.clone()), Operand::fixed(*b, t)],
                Operand::fixed(*dst, Type::Int),
            )
        }
        Instr::Aget(_, dst, arr, idx) => Access::new(
            vec![
                Operand::array_of_own(*arr),
                Operand::fixed(*idx, Type::Int),
            ],
            Operand::own(*dst),
        ),
        Instr::Aput(_, val, arr, idx) => Access::reads(vec![
            Operand::own(*val),
            Operand::array_of_own(*arr),
            Operand::fixed(*idx, Type::Int),
        ]),
        Instr::Iget(dst, obj, field) => Access::new(
            vec![Operand::fixed(*obj, field.definer.clone())],
            Operand::fixed(*dst, field.type_.clone()),
        ),
        Instr::Iput(val, obj, field) => Access::reads(vec![
            Operand::fixed(*val, field.type_.clone()),
            Operand::fixed(*obj, field.definer.clone()),
        ]),
        Instr::Sget(dst, field) => Access::write(Operand::fixed(*dst, field.type_.clone())),
        Instr::Sput(val, field) => {
            Access::reads(vec![Operand::fixed(*val, field.type_.clone())])
        }
        Instr::Invoke(kind, args, callee) => {
            let receiver = match kind {
                InvokeKind::Static => None,
                _ => Some(callee.definer.clone()),
            };
            let expected: Vec<Type> = receiver
                .into_iter()
                .chain(callee.parameters.iter().cloned())
                .collect();
            if expected.len() != args.len() {
                return Err(TypeError::BadArity(id).into());
            }
            Access::reads(
                args.iter()
                    .zip(expected)
                    .map(|(r, t)| Operand::fixed(*r, t))
                    .collect(),
            )
        }
        Instr::Unary(_, t, dst, src) => {
            let t = concrete(id, t)?;
            Access::new(vec![Operand::fixed(*src, t.clone())], Operand::fixed(*dst, t))
        }
        Instr::Convert(from, to, dst, src) => Access::new(
            vec![Operand::fixed(*src, concrete(id, from)?)],
            Operand::fixed(*dst, concrete(id, to)?),
        ),
        Instr::Binary(op, t, dst, a, b) => {
            let t = concrete(id, t)?;
            // long shifts take an int distance
            let tb = if op.is_shift() { Type::Int } else { t.clone() };
            Access::new(
                vec![Operand::fixed(*a, t.clone()), Operand::fixed(*b, tb)],
                Operand::fixed(*dst, t),
            )
        }
        Instr::BinaryLit(_, dst, src, _) => Access::new(
            vec![Operand::fixed(*src, Type::Int)],
            Operand::fixed(*dst, Type::Int),
        ),
    };
    log::trace!("    {id}: {access:?}");
    Ok(access)
}

/// Checks if an instruction reads a register.
#[inline]
#[must_use]
pub fn reads(access: &Access, reg: Reg) -> bool {
    access.reads.iter().any(|op| op.reg == reg)
}

/// Checks if an instruction writes a register.
#[inline]
#[must_use]
pub fn writes(access: &Access, reg: Reg) -> bool {
    access.write.as_ref().map_or(false, |op| op.reg == reg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accesses(text: &str) -> (Body, Vec<AnalysisResult<Access>>) {
        let body = dw_ir::parse(text).unwrap().remove(0);
        let cfg = Cfg::build(&body).unwrap();
        let res = body
            .order()
            .iter()
            .map(|id| access(&body, &cfg, *id))
            .collect();
        (body, res)
    }

    #[test]
    fn shapes() {
        let (body, res) = accesses(
            r#"
.method static La;->f([J)J
    const:?0 i, 0
    aget:?64 v, p0, i
    shl:J w, v, i
    return w
.end method
"#,
        );
        let p0 = body.params()[0];
        let i = body.reg_by_name("i").unwrap();
        let aget = res[1].as_ref().unwrap();
        assert_eq!(aget.reads[0], Operand::array_of_own(p0));
        assert_eq!(
            aget.reads[0].resolve(Some(&Type::Wide)),
            Some(Type::array_of(Type::Wide))
        );
        assert_eq!(Shape::ArrayOfOwn.extract(&Type::array_of(Type::Long)), Some(Type::Long));
        assert_eq!(Shape::ArrayOfOwn.extract(&Type::Zero), None);

        let shl = res[2].as_ref().unwrap();
        assert_eq!(shl.reads[1], Operand::fixed(i, Type::Int));
        assert_eq!(
            res[3].as_ref().unwrap().reads,
            vec![Operand::fixed(body.reg_by_name("w").unwrap(), Type::Long)]
        );
    }

    #[test]
    fn move_result() {
        let (_, res) = accesses(
            r#"
.method static La;->f()V
    invoke-static {}, La;->g()I
    move-result r
    filled-new-array {r, r}, [I
    move-result a
    invoke-static {}, La;->h()V
    move-result x
    return-void
.end method
"#,
        );
        let r = res[1].as_ref().unwrap().write.clone().unwrap();
        assert_eq!(r.shape, Shape::Fixed(Type::Int));
        let a = res[3].as_ref().unwrap().write.clone().unwrap();
        assert_eq!(a.shape, Shape::Fixed(Type::array_of(Type::Int)));
        assert!(matches!(
            res[5],
            Err(crate::errors::AnalysisError::Type(TypeError::MissingResult(_)))
        ));
    }

    #[test]
    fn caught_exceptions() {
        let (_, res) = accesses(
            r#"
.method static La;->f()V
:start
    invoke-static {}, La;->g()V
:end
    return-void
:handler
    move-exception e
    throw e
    .catch Ljava/io/IOException; {:start .. :end} :handler
.end method
"#,
        );
        let e = res[2].as_ref().unwrap().write.clone().unwrap();
        assert_eq!(
            e.shape,
            Shape::Fixed(Type::Class("java/io/IOException".to_string()))
        );
    }

    #[test]
    fn arity() {
        let (_, res) = accesses(
            r#"
.method static La;->f()V
    invoke-virtual {x}, La;->g(I)V
    return-void
.end method
"#,
        );
        assert!(res[0].is_err());
    }
}
