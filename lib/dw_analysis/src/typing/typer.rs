//! Resolution of ambiguous instruction types and register typing.

use crate::controlflow::Cfg;
use crate::errors::{AnalysisError, AnalysisResult};
use crate::typing::errors::TypeError;
use crate::typing::hints::{self, Access, Shape};
use crate::typing::state::{RegisterState, Source};
use crate::typing::types;
use dw_ir::instrs::Instr;
use dw_ir::{Body, InsnId, Reg, Type};
use std::collections::{BTreeMap, BTreeSet};

/// Typing pass over a single method body.
///
/// The body is modified in place: ambiguous instructions get their concrete
/// type, dead ambiguous chains are removed, registers get their type and unused
/// registers are deleted.
pub struct DexTyper<'a> {
    body: &'a mut Body,
    cfg: Cfg,
    accesses: BTreeMap<InsnId, Access>,
    state: RegisterState,
}

impl<'a> DexTyper<'a> {
    pub fn new(body: &'a mut Body) -> AnalysisResult<Self> {
        if body.is_empty() {
            return Err(AnalysisError::NoCode);
        }
        let (cfg, accesses, state) = analyze(body)?;
        Ok(Self {
            body,
            cfg,
            accesses,
            state,
        })
    }

    /// Runs the whole typing pass.
    pub fn run(mut self) -> AnalysisResult<()> {
        log::debug!("typing {}", self.body.method());
        self.resolve()?;
        if !self.ambiguous().is_empty() {
            if self.remove_dead_chains()? {
                let (cfg, accesses, state) = analyze(self.body)?;
                self.cfg = cfg;
                self.accesses = accesses;
                self.state = state;
                self.resolve()?;
            }
            let remaining = self.ambiguous();
            if !remaining.is_empty() {
                return Err(TypeError::Untypable(remaining).into());
            }
        }
        self.type_registers()
    }

    #[must_use]
    pub const fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    fn ambiguous(&self) -> Vec<InsnId> {
        self.body
            .instructions()
            .filter(|(_, instr)| instr.is_ambiguous())
            .map(|(id, _)| id)
            .collect()
    }

    fn own_type(&self, id: InsnId) -> AnalysisResult<Option<Type>> {
        Ok(self.body.instr(id)?.own_type().cloned())
    }

    fn access(&self, id: InsnId) -> AnalysisResult<&Access> {
        self.accesses
            .get(&id)
            .ok_or(AnalysisError::InstructionNotFound(id))
    }

    /// Types read from `reg` by the instruction.
    fn demands(&self, reader: InsnId, reg: Reg) -> AnalysisResult<Vec<Type>> {
        let own = self.own_type(reader)?;
        Ok(self
            .access(reader)?
            .reads
            .iter()
            .filter(|op| op.reg == reg)
            .filter_map(|op| op.resolve(own.as_ref()))
            .collect())
    }

    /// Type of the value coming from a source.
    fn offer(&self, source: Source) -> AnalysisResult<Option<Type>> {
        match source {
            Source::Entry(reg) => Ok(self.body.reg(reg)?.declared_type().cloned()),
            Source::Insn(writer) => {
                let own = self.own_type(writer)?;
                Ok(self
                    .access(writer)?
                    .write
                    .as_ref()
                    .and_then(|op| op.resolve(own.as_ref())))
            }
        }
    }

    /// Computes the type of an ambiguous instruction from its neighbours.
    fn candidate(&self, id: InsnId, own: &Type) -> AnalysisResult<Type> {
        let mut res = own.clone();
        let access = self.access(id)?;
        let mut refine = |shape: &Shape, t: &Type| -> AnalysisResult<()> {
            if let Some(t) = shape.extract(t) {
                res = types::merge(&res, &t).map_err(|err| err.at(&id.to_string()))?;
            }
            Ok(())
        };

        if let Some(write) = &access.write {
            for reader in self.state.readers(id) {
                for t in self.demands(reader, write.reg)? {
                    refine(&write.shape, &t)?;
                }
            }
        }
        for read in &access.reads {
            if matches!(read.shape, Shape::Fixed(_)) {
                continue;
            }
            for source in self.state.writers(id, read.reg) {
                if let Some(t) = self.offer(source)? {
                    refine(&read.shape, &t)?;
                }
            }
        }
        Ok(res)
    }

    /// Refines ambiguous instructions until no progress is made.
    fn resolve(&mut self) -> AnalysisResult<()> {
        let mut pass = 0;
        loop {
            pass += 1;
            let mut progress = false;
            for id in self.ambiguous() {
                let own = match self.own_type(id)? {
                    Some(own) => own,
                    None => continue,
                };
                let refined = self.candidate(id, &own)?;
                if refined != own {
                    log::trace!("    {id}: {own} -> {refined}");
                    if let Some(t) = self.body.instr_mut(id)?.own_type_mut() {
                        *t = refined;
                    }
                    progress = true;
                }
            }
            if !progress {
                log::debug!("    ---- resolution stable after {pass} pass(es)");
                return Ok(());
            }
        }
    }

    fn is_ambiguous_move(&self, id: InsnId) -> AnalysisResult<bool> {
        let instr = self.body.instr(id)?;
        Ok(matches!(instr, Instr::Move(..)) && instr.is_ambiguous())
    }

    /// Removes ambiguous constants and moves whose value only flows into other
    /// ambiguous moves. Returns whether something was removed.
    fn remove_dead_chains(&mut self) -> AnalysisResult<bool> {
        let mut dead = BTreeSet::new();
        for start in self.ambiguous() {
            if dead.contains(&start)
                || !matches!(self.body.instr(start)?, Instr::Const(..) | Instr::Move(..))
            {
                continue;
            }
            let mut chain = BTreeSet::from([start]);
            let mut worklist = vec![start];
            let mut used = false;
            'walk: while let Some(id) = worklist.pop() {
                for reader in self.state.readers(id) {
                    if chain.contains(&reader) {
                        continue;
                    }
                    if !self.is_ambiguous_move(reader)? {
                        used = true;
                        break 'walk;
                    }
                    chain.insert(reader);
                    worklist.push(reader);
                }
            }
            if !used {
                dead.extend(chain);
            }
        }

        for id in &dead {
            log::debug!("    ---- removing dead ambiguous instruction {id}");
            self.body.remove(*id)?;
        }
        Ok(!dead.is_empty())
    }

    /// Gives every register the merge of every type it is accessed with.
    fn type_registers(&mut self) -> AnalysisResult<()> {
        let mut uses: BTreeMap<Reg, Vec<Type>> = BTreeMap::new();
        for (id, instr) in self.body.instructions() {
            let own = instr.own_type();
            let access = self.access(id)?;
            for op in access.reads.iter().chain(&access.write) {
                if let Some(t) = op.resolve(own) {
                    uses.entry(op.reg).or_default().push(t);
                }
            }
        }

        let mut unused = Vec::new();
        let mut typed = Vec::new();
        for (reg, info) in self.body.registers() {
            let mut types = info.declared_type().into_iter().cloned().collect::<Vec<_>>();
            types.extend(uses.remove(&reg).unwrap_or_default());
            let mut types = types.into_iter();
            let first = match types.next() {
                Some(t) => t,
                None => {
                    unused.push(reg);
                    continue;
                }
            };
            let merged = types.try_fold(first, |acc, t| {
                types::merge(&acc, &t).map_err(|err| err.at(&format!("register {}", info.name())))
            })?;
            if merged.is_ambiguous() {
                return Err(TypeError::Internal(format!(
                    "register {} remains ambiguous ({merged})",
                    info.name()
                ))
                .into());
            }
            typed.push((reg, merged));
        }

        for (reg, t) in typed {
            log::trace!("    {reg}: {t}");
            self.body.reg_mut(reg)?.set_type(t);
        }
        for reg in unused {
            log::debug!("    ---- removing unused register {reg}");
            self.body.remove_reg(reg)?;
        }
        Ok(())
    }
}

fn analyze(body: &Body) -> AnalysisResult<(Cfg, BTreeMap<InsnId, Access>, RegisterState)> {
    let cfg = Cfg::build(body)?;
    let accesses = body
        .order()
        .iter()
        .map(|id| hints::access(body, &cfg, *id).map(|access| (*id, access)))
        .collect::<AnalysisResult<_>>()?;
    let state = RegisterState::compute(body, &cfg, &accesses)?;
    Ok((cfg, accesses, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dw_ir::types::JAVA_LANG_STRING;

    fn parse(text: &str) -> Body {
        dw_ir::parse(text).unwrap().remove(0)
    }

    fn retype(body: &mut Body) -> AnalysisResult<()> {
        DexTyper::new(body)?.run()
    }

    fn reg_type(body: &Body, name: &str) -> Type {
        let reg = body.reg_by_name(name).unwrap();
        body.reg(reg).unwrap().type_().unwrap().clone()
    }

    fn array_store(element: &str) -> Body {
        parse(&format!(
            r#"
.method static La;->f()V
    const:?32 size, 4
    new-array array, size, [{element}
    const:?0 index, 0
    const:?32 value, 20
    aput:?32 value, array, index
    return-void
.end method
"#
        ))
    }

    #[test]
    fn int_array_store() {
        let mut body = array_store("I");
        retype(&mut body).unwrap();
        assert_eq!(reg_type(&body, "size"), Type::Int);
        assert_eq!(reg_type(&body, "array"), Type::array_of(Type::Int));
        assert_eq!(reg_type(&body, "index"), Type::Int);
        assert_eq!(reg_type(&body, "value"), Type::Int);
        let aput = body.instr(body.order()[4]).unwrap();
        assert_eq!(aput.own_type(), Some(&Type::Int));
        assert!(body.instructions().all(|(_, instr)| !instr.is_ambiguous()));
    }

    #[test]
    fn float_array_store() {
        let mut body = array_store("F");
        retype(&mut body).unwrap();
        assert_eq!(reg_type(&body, "size"), Type::Int);
        assert_eq!(reg_type(&body, "array"), Type::array_of(Type::Float));
        assert_eq!(reg_type(&body, "index"), Type::Int);
        assert_eq!(reg_type(&body, "value"), Type::Float);
    }

    #[test]
    fn conflict() {
        let mut body = parse(
            r#"
.method static La;->f(Z)V
    const:?0 v, 0
    if-eqz p0, :other
    invoke-static {v}, La;->g(I)V
    return-void
:other
    invoke-static {v}, La;->h(Ljava/lang/Object;)V
    return-void
.end method
"#,
        );
        assert!(matches!(
            retype(&mut body),
            Err(AnalysisError::Type(TypeError::Conflict { .. }))
        ));
    }

    #[test]
    fn references() {
        let mut body = parse(
            r#"
.method La;->f(Ljava/lang/String;)Ljava/lang/Object;
    const:?0 r, 0
    if-eqz p0, :done
    move:?0 r, p0
:done
    return r
.end method
"#,
        );
        retype(&mut body).unwrap();
        // null or the parameter
        assert_eq!(reg_type(&body, "r"), *JAVA_LANG_STRING);
        let this = body.this().unwrap();
        assert_eq!(
            body.reg(this).unwrap().type_(),
            Some(&Type::Class("a".to_string()))
        );
        assert_eq!(
            body.instr(body.order()[2]).unwrap().own_type(),
            Some(&*JAVA_LANG_STRING)
        );
    }

    #[test]
    fn dead_chain() {
        let mut body = parse(
            r#"
.method static La;->f()V
    const:?0 a, 0
    move:?0 b, a
    move:?0 c, b
    move:?0 d, c
    return-void
.end method
"#,
        );
        retype(&mut body).unwrap();
        assert_eq!(body.len(), 1);
        let (_, instr) = body.instructions().next().unwrap();
        assert_eq!(instr, &Instr::ReturnVoid);
        assert_eq!(body.registers().count(), 0);
    }

    #[test]
    fn dead_cycle() {
        let mut body = parse(
            r#"
.method static La;->f()V
    const:?32 a, 1
:loop
    move:?32 b, a
    move:?32 a, b
    goto :loop
.end method
"#,
        );
        retype(&mut body).unwrap();
        assert_eq!(body.len(), 1);
        let (id, instr) = body.instructions().next().unwrap();
        assert_eq!(instr, &Instr::Goto(id));
    }

    #[test]
    fn loop_terminates() {
        let mut body = parse(
            r#"
.method static La;->f(I)F
    const:?32 acc, 0
    const:?0 i, 0
:loop
    if-ge i, p0, :end
    move:?32 tmp, acc
    move:?32 acc, tmp
    add-lit i, i, 1
    goto :loop
:end
    return acc
.end method
"#,
        );
        retype(&mut body).unwrap();
        assert_eq!(reg_type(&body, "acc"), Type::Float);
        assert_eq!(reg_type(&body, "tmp"), Type::Float);
        assert_eq!(reg_type(&body, "i"), Type::Int);
    }

    #[test]
    fn untypable() {
        let mut body = parse(
            r#"
.method static La;->f()V
    const:?32 v, 0
    if-eqz v, :end
:end
    return-void
.end method
"#,
        );
        assert!(matches!(
            retype(&mut body),
            Err(AnalysisError::Type(TypeError::Untypable(ids))) if ids.len() == 1
        ));
    }

    #[test]
    fn bad_move_result() {
        let mut body = parse(
            r#"
.method static La;->f()V
    const:I v, 0
    move-result v
    return-void
.end method
"#,
        );
        assert!(matches!(
            retype(&mut body),
            Err(AnalysisError::Type(TypeError::MissingResult(_)))
        ));
    }

    #[test]
    fn no_code() {
        let mut body = parse(".method static La;->f()V\n.end method\n");
        assert!(matches!(retype(&mut body), Err(AnalysisError::NoCode)));
    }
}
