//! Method bodies: the instruction and register arenas of one method.

use crate::errors::{IrError, IrResult};
use crate::instrs::{Instr, PrettyPrinter};
use crate::registers::{Reg, RegInfo, RegKind};
use crate::types::{MethodRef, Type};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// The instruction handle type.
///
/// Handles stay valid as long as the instruction is not removed from its body,
/// whatever the insertions and removals of other instructions are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct InsnId(u32);

impl fmt::Display for InsnId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl InsnId {
    #[inline]
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Returns the position of the instruction in its body arena.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// An exception handler of a try block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Handler {
    /// Caught exception type, `None` catches everything.
    pub catch: Option<Type>,
    pub target: InsnId,
}

/// A protected range of instructions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TryBlock {
    /// First protected instruction.
    pub start: InsnId,
    /// First instruction after the protected range, `None` when the range reaches the
    /// end of the method.
    pub end: Option<InsnId>,
    pub handlers: Vec<Handler>,
}

/// A method body, owning its instructions and virtual registers.
#[derive(Debug, Clone)]
pub struct Body {
    method: MethodRef,
    is_static: bool,
    instrs: Vec<Option<Instr>>,
    order: Vec<InsnId>,
    regs: Vec<Option<RegInfo>>,
    this: Option<Reg>,
    params: Vec<Reg>,
    tries: Vec<TryBlock>,
}

impl Body {
    /// Creates an empty body for the given method, with its `this` register (for
    /// instance methods) and parameter registers.
    #[must_use]
    pub fn new(method: MethodRef, is_static: bool) -> Self {
        let mut body = Self {
            method,
            is_static,
            instrs: Vec::new(),
            order: Vec::new(),
            regs: Vec::new(),
            this: None,
            params: Vec::new(),
            tries: Vec::new(),
        };
        if !is_static {
            let definer = body.method.definer.clone();
            let this = body.add_reg("this".to_string(), RegKind::This, Some(definer));
            body.this = Some(this);
        }
        let parameters = body.method.parameters.clone();
        for (i, t) in parameters.into_iter().enumerate() {
            let param = body.add_reg(format!("p{i}"), RegKind::Param(i), Some(t));
            body.params.push(param);
        }
        body
    }

    #[inline]
    #[must_use]
    pub const fn method(&self) -> &MethodRef {
        &self.method
    }

    #[inline]
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.is_static
    }

    #[inline]
    #[must_use]
    pub const fn this(&self) -> Option<Reg> {
        self.this
    }

    #[inline]
    #[must_use]
    pub fn params(&self) -> &[Reg] {
        &self.params
    }

    /// Returns `this` (if any) followed by the parameter registers.
    #[must_use]
    pub fn special_registers(&self) -> Vec<Reg> {
        self.this.iter().chain(self.params.iter()).copied().collect()
    }

    #[inline]
    #[must_use]
    pub fn tries(&self) -> &[TryBlock] {
        &self.tries
    }

    // ---------------------------------------------------------------------------------
    // instructions

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the size of the instruction arena, an upper bound on instruction
    /// handle indices.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.instrs.len()
    }

    /// Returns the instruction handles in textual order.
    #[inline]
    #[must_use]
    pub fn order(&self) -> &[InsnId] {
        &self.order
    }

    #[inline]
    #[must_use]
    pub fn entry(&self) -> Option<InsnId> {
        self.order.first().copied()
    }

    pub fn instructions(&self) -> impl Iterator<Item = (InsnId, &Instr)> {
        self.order
            .iter()
            .filter_map(move |id| self.instrs[id.index()].as_ref().map(|instr| (*id, instr)))
    }

    pub fn instr(&self, id: InsnId) -> IrResult<&Instr> {
        self.instrs
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(IrError::InstructionNotFound(id))
    }

    pub fn instr_mut(&mut self, id: InsnId) -> IrResult<&mut Instr> {
        self.instrs
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(IrError::InstructionNotFound(id))
    }

    /// Returns the textual position of an instruction.
    pub fn position(&self, id: InsnId) -> IrResult<usize> {
        self.order
            .iter()
            .position(|i| *i == id)
            .ok_or(IrError::InstructionNotFound(id))
    }

    /// Returns the textually next instruction, `None` for the last one.
    pub fn next_of(&self, id: InsnId) -> IrResult<Option<InsnId>> {
        let pos = self.position(id)?;
        Ok(self.order.get(pos + 1).copied())
    }

    /// Appends an instruction at the end of the body.
    pub fn push(&mut self, instr: Instr) -> InsnId {
        let id = InsnId::new(self.instrs.len());
        self.instrs.push(Some(instr));
        self.order.push(id);
        id
    }

    pub(crate) fn replace(&mut self, id: InsnId, instr: Instr) -> IrResult<()> {
        *self.instr_mut(id)? = instr;
        Ok(())
    }

    /// Adds a try block, merging handlers of blocks covering the very same range.
    pub fn add_try(
        &mut self,
        start: InsnId,
        end: Option<InsnId>,
        catch: Option<Type>,
        target: InsnId,
    ) -> IrResult<()> {
        let start_pos = self.position(start)?;
        let end_pos = match end {
            Some(end) => self.position(end)?,
            None => self.len(),
        };
        self.instr(target)?;
        if start_pos >= end_pos {
            return Err(IrError::Structure(format!(
                "empty try block from {start} to {}",
                end.map_or_else(|| "end".to_string(), |e| e.to_string())
            )));
        }
        let handler = Handler { catch, target };
        match self
            .tries
            .iter_mut()
            .find(|t| t.start == start && t.end == end)
        {
            Some(block) => block.handlers.push(handler),
            None => self.tries.push(TryBlock {
                start,
                end,
                handlers: vec![handler],
            }),
        }
        Ok(())
    }

    /// Returns the try blocks protecting the given instruction.
    pub fn tries_covering(&self, id: InsnId) -> IrResult<Vec<&TryBlock>> {
        let pos = self.position(id)?;
        let mut res = Vec::new();
        for block in &self.tries {
            let start = self.position(block.start)?;
            let end = match block.end {
                Some(end) => self.position(end)?,
                None => self.len(),
            };
            if start <= pos && pos < end {
                res.push(block);
            }
        }
        Ok(res)
    }

    /// Rewrites every reference (branch targets, try boundaries and handlers) to
    /// `from` into a reference to `to`.
    fn retarget(&mut self, from: InsnId, to: Option<InsnId>) -> IrResult<()> {
        for id in self.order.clone() {
            let instr = self.instr_mut(id)?;
            for target in instr.targets_mut() {
                if *target == from {
                    *target = to.ok_or_else(|| {
                        IrError::Structure(format!("{id} would branch after the end of the method"))
                    })?;
                }
            }
        }
        for block in &mut self.tries {
            if block.start == from {
                // an emptied block is dropped below
                block.start = to.unwrap_or(from);
            }
            if block.end == Some(from) {
                block.end = to;
            }
            for handler in &mut block.handlers {
                if handler.target == from {
                    handler.target = to.ok_or_else(|| {
                        IrError::Structure(format!("handler {from} removed at end of method"))
                    })?;
                }
            }
        }
        Ok(())
    }

    // The last instruction can only be removed when nothing else branches to it.
    fn check_unreferenced_end(&self, last: InsnId) -> IrResult<()> {
        if let Some((id, _)) = self
            .instructions()
            .find(|(id, instr)| *id != last && instr.targets().contains(&last))
        {
            return Err(IrError::Structure(format!(
                "{id} would branch after the end of the method"
            )));
        }
        if self
            .tries
            .iter()
            .any(|block| block.handlers.iter().any(|h| h.target == last))
        {
            return Err(IrError::Structure(format!(
                "handler {last} removed at end of method"
            )));
        }
        Ok(())
    }

    /// Inserts instructions just before `anchor`. References to `anchor` are moved to
    /// the first inserted instruction, so that branching to `anchor` executes the
    /// inserted code.
    pub fn insert_before(&mut self, anchor: InsnId, instrs: Vec<Instr>) -> IrResult<Vec<InsnId>> {
        let pos = self.position(anchor)?;
        if instrs.is_empty() {
            return Ok(vec![]);
        }
        let mut ids = Vec::with_capacity(instrs.len());
        for instr in instrs {
            let id = InsnId::new(self.instrs.len());
            self.instrs.push(Some(instr));
            ids.push(id);
        }
        self.retarget(anchor, Some(ids[0]))?;
        self.order.splice(pos..pos, ids.iter().copied());
        Ok(ids)
    }

    /// Removes an instruction. References to it are moved to the textually next
    /// instruction; try blocks that become empty are dropped.
    pub fn remove(&mut self, id: InsnId) -> IrResult<Instr> {
        let pos = self.position(id)?;
        let next = self.order.get(pos + 1).copied();
        if next.is_none() {
            self.check_unreferenced_end(id)?;
        }
        self.order.remove(pos);
        self.retarget(id, next)?;

        let order = &self.order;
        let position = |i: InsnId| order.iter().position(|x| *x == i);
        self.tries.retain(|block| {
            match (position(block.start), block.end) {
                (None, _) => false,
                (Some(start), Some(end)) => position(end).map_or(false, |end| start < end),
                (Some(_), None) => true,
            }
        });

        self.instrs[id.index()]
            .take()
            .ok_or(IrError::InstructionNotFound(id))
    }

    /// Checks if some instruction or try block refers to the given instruction.
    #[must_use]
    pub fn is_referenced(&self, id: InsnId) -> bool {
        self.instructions()
            .any(|(_, instr)| instr.targets().contains(&id))
            || self.tries.iter().any(|block| {
                block.start == id
                    || block.end == Some(id)
                    || block.handlers.iter().any(|h| h.target == id)
            })
    }

    // ---------------------------------------------------------------------------------
    // registers

    fn add_reg(&mut self, name: String, kind: RegKind, declared: Option<Type>) -> Reg {
        let reg = Reg::new(self.regs.len());
        self.regs.push(Some(RegInfo::new(name, kind, declared)));
        reg
    }

    /// Creates a fresh local register.
    pub fn new_reg(&mut self) -> Reg {
        let index = self.regs.len();
        let mut name = format!("t{index}");
        let mut k = 0;
        while self.reg_by_name(&name).is_some() {
            k += 1;
            name = format!("t{index}_{k}");
        }
        self.add_reg(name, RegKind::Local, None)
    }

    /// Returns the local register with the given name, creating it if needed.
    pub fn declare_reg(&mut self, name: &str) -> Reg {
        match self.reg_by_name(name) {
            Some(reg) => reg,
            None => self.add_reg(name.to_string(), RegKind::Local, None),
        }
    }

    #[must_use]
    pub fn reg_by_name(&self, name: &str) -> Option<Reg> {
        self.registers()
            .find(|(_, info)| info.name() == name)
            .map(|(reg, _)| reg)
    }

    pub fn reg(&self, reg: Reg) -> IrResult<&RegInfo> {
        self.regs
            .get(reg.index())
            .and_then(Option::as_ref)
            .ok_or(IrError::RegisterNotFound(reg))
    }

    pub fn reg_mut(&mut self, reg: Reg) -> IrResult<&mut RegInfo> {
        self.regs
            .get_mut(reg.index())
            .and_then(Option::as_mut)
            .ok_or(IrError::RegisterNotFound(reg))
    }

    /// Iterates over live registers, in creation order.
    pub fn registers(&self) -> impl Iterator<Item = (Reg, &RegInfo)> {
        self.regs
            .iter()
            .enumerate()
            .filter_map(|(i, info)| info.as_ref().map(|info| (Reg::new(i), info)))
    }

    /// Returns the size of the register arena, an upper bound on register handle
    /// indices.
    #[inline]
    #[must_use]
    pub fn registers_capacity(&self) -> usize {
        self.regs.len()
    }

    /// Deletes a register, that must not be used by any instruction anymore.
    pub fn remove_reg(&mut self, reg: Reg) -> IrResult<RegInfo> {
        if self
            .instructions()
            .any(|(_, instr)| instr.reads().contains(&reg) || instr.write() == Some(reg))
        {
            return Err(IrError::Structure(format!(
                "register {} is still in use",
                self.reg(reg)?.name()
            )));
        }
        let info = self
            .regs
            .get_mut(reg.index())
            .and_then(Option::take)
            .ok_or(IrError::RegisterNotFound(reg))?;
        if self.this == Some(reg) {
            self.this = None;
        }
        self.params.retain(|p| *p != reg);
        Ok(info)
    }

    /// Returns the registers used by instructions, in order of first use.
    #[must_use]
    pub fn used_registers(&self) -> Vec<Reg> {
        let mut seen = BTreeSet::new();
        let mut res = Vec::new();
        for (_, instr) in self.instructions() {
            for reg in instr.reads().into_iter().chain(instr.write()) {
                if seen.insert(reg) {
                    res.push(reg);
                }
            }
        }
        res
    }

    fn labeled(&self) -> BTreeSet<InsnId> {
        let mut labels = BTreeSet::new();
        for (_, instr) in self.instructions() {
            labels.extend(instr.targets());
        }
        for block in &self.tries {
            labels.insert(block.start);
            labels.extend(block.end);
            labels.extend(block.handlers.iter().map(|h| h.target));
        }
        labels
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let modifier = if self.is_static { "static " } else { "" };
        writeln!(f, ".method {modifier}{}", self.method)?;

        let locals: Vec<_> = self
            .registers()
            .filter(|(_, info)| !info.is_special())
            .collect();
        if !locals.is_empty() {
            write!(f, "    .registers ")?;
            for (i, (_, info)) in locals.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", info.name())?;
                if let Some(t) = info.type_() {
                    write!(f, ":{t}")?;
                }
            }
            writeln!(f)?;
        }

        let labels = self.labeled();
        for (id, instr) in self.instructions() {
            if labels.contains(&id) {
                writeln!(f, ":{id}")?;
            }
            writeln!(f, "    {}", PrettyPrinter(instr, self))?;
        }
        if self.tries.iter().any(|t| t.end.is_none()) {
            writeln!(f, ":end")?;
        }
        for block in &self.tries {
            let end = block
                .end
                .map_or_else(|| "end".to_string(), |e| e.to_string());
            for handler in &block.handlers {
                match &handler.catch {
                    Some(t) => write!(f, "    .catch {t}")?,
                    None => write!(f, "    .catchall")?,
                }
                writeln!(f, " {{:{} .. :{end}}} :{}", block.start, handler.target)?;
            }
        }
        writeln!(f, ".end method")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrs::Comp;
    use std::convert::TryFrom;

    fn empty_body() -> Body {
        let method = MethodRef::try_from("Lcom/example/Foo;->bar(IJ)V").unwrap();
        Body::new(method, false)
    }

    #[test]
    fn special_registers() {
        let body = empty_body();
        let this = body.this().unwrap();
        assert_eq!(body.reg(this).unwrap().kind(), RegKind::This);
        assert_eq!(body.params().len(), 2);
        let p1 = body.reg(body.params()[1]).unwrap();
        assert_eq!(p1.name(), "p1");
        assert_eq!(p1.declared_type(), Some(&Type::Long));
        assert_eq!(body.special_registers().len(), 3);
    }

    #[test]
    fn insert_moves_references() {
        let mut body = empty_body();
        let r = body.declare_reg("v0");
        let ret = body.push(Instr::ReturnVoid);
        let goto = body.push(Instr::Goto(ret));
        let ids = body
            .insert_before(ret, vec![Instr::Const(Type::Int, r, 1), Instr::Nop])
            .unwrap();
        assert_eq!(body.order(), &[ids[0], ids[1], ret, goto]);
        assert_eq!(body.instr(goto).unwrap(), &Instr::Goto(ids[0]));
    }

    #[test]
    fn remove_retargets_to_next() {
        let mut body = empty_body();
        let r = body.declare_reg("v0");
        let c = body.push(Instr::Const(Type::Zero, r, 0));
        let m = body.push(Instr::Move(Type::Zero, r, r));
        let goto = body.push(Instr::Goto(c));
        body.remove(c).unwrap();
        assert_eq!(body.instr(goto).unwrap(), &Instr::Goto(m));
        body.remove(m).unwrap();
        assert_eq!(body.instr(goto).unwrap(), &Instr::Goto(goto));
        assert_eq!(body.len(), 1);
        assert!(body.instr(m).is_err());
    }

    #[test]
    fn dangling_branch() {
        let mut body = empty_body();
        let r = body.declare_reg("v0");
        let first = body.push(Instr::IfZ(Comp::Eq, r, InsnId::new(1)));
        let last = body.push(Instr::ReturnVoid);
        assert_eq!(body.instr(first).unwrap().targets(), vec![last]);
        assert!(matches!(body.remove(last), Err(IrError::Structure(_))));

        // the failed removal leaves the body untouched
        assert_eq!(body.len(), 2);
        assert_eq!(body.order(), &[first, last]);
        assert!(body.instr(last).is_ok());
        assert_eq!(body.instr(first).unwrap().targets(), vec![last]);

        body.remove(first).unwrap();
        assert!(matches!(body.remove(last), Ok(Instr::ReturnVoid)));
        assert!(body.is_empty());
    }

    #[test]
    fn try_blocks() {
        let mut body = empty_body();
        let r = body.declare_reg("v0");
        let a = body.push(Instr::Nop);
        let b = body.push(Instr::Throw(r));
        let h = body.push(Instr::MoveException(r));
        body.push(Instr::ReturnVoid);
        body.add_try(a, Some(h), None, h).unwrap();
        assert_eq!(body.tries_covering(b).unwrap().len(), 1);
        assert!(body.tries_covering(h).unwrap().is_empty());
        assert!(body.add_try(h, Some(a), None, h).is_err());

        body.remove(a).unwrap();
        assert_eq!(body.tries()[0].start, b);
        body.remove(b).unwrap();
        assert!(body.tries().is_empty());
    }

    #[test]
    fn registers() {
        let mut body = empty_body();
        let v = body.declare_reg("v0");
        assert_eq!(body.declare_reg("v0"), v);
        let t = body.new_reg();
        assert_ne!(t, v);
        body.push(Instr::Return(v));
        assert!(body.remove_reg(v).is_err());
        body.remove_reg(t).unwrap();
        assert!(body.reg(t).is_err());
        assert_eq!(body.used_registers(), vec![v]);
    }
}
