//! Def/use relations between register accesses.
//!
//! For each write, the instructions that may read the written value; for each read,
//! the instructions (or the method entry) that may have written the value read.
//! Both relations are computed by graph walks memoizing visited instructions, a
//! walk being dedicated to a single register.

use crate::controlflow::Cfg;
use crate::errors::{AnalysisError, AnalysisResult};
use crate::typing::hints::{self, Access};
use dw_ir::{Body, InsnId, Reg};
use fixedbitset::FixedBitSet;
use std::collections::{BTreeMap, BTreeSet};

/// Origin of a register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Source {
    /// The value held by the register when the method is entered.
    Entry(Reg),
    /// The value written by an instruction.
    Insn(InsnId),
}

#[derive(Debug, Default)]
pub struct RegisterState {
    readers: BTreeMap<InsnId, BTreeSet<InsnId>>,
    writers: BTreeMap<(InsnId, Reg), BTreeSet<Source>>,
}

impl RegisterState {
    pub fn compute(
        body: &Body,
        cfg: &Cfg,
        accesses: &BTreeMap<InsnId, Access>,
    ) -> AnalysisResult<Self> {
        let mut state = Self::default();
        for (id, access) in accesses {
            if let Some(write) = &access.write {
                let readers = forward(body, cfg, accesses, *id, write.reg)?;
                state.readers.insert(*id, readers);
            }
            for read in &access.reads {
                if state.writers.contains_key(&(*id, read.reg)) {
                    continue;
                }
                let writers = backward(body, cfg, accesses, *id, read.reg)?;
                state.writers.insert((*id, read.reg), writers);
            }
        }
        log::trace!(
            "register state: {} writes, {} reads",
            state.readers.len(),
            state.writers.len()
        );
        Ok(state)
    }

    /// Instructions that may read the value written by the given instruction.
    pub fn readers(&self, writer: InsnId) -> impl Iterator<Item = InsnId> + '_ {
        self.readers.get(&writer).into_iter().flatten().copied()
    }

    /// Possible origins of the value of `reg` read by the given instruction.
    pub fn writers(&self, reader: InsnId, reg: Reg) -> impl Iterator<Item = Source> + '_ {
        self.writers.get(&(reader, reg)).into_iter().flatten().copied()
    }
}

fn access_of(accesses: &BTreeMap<InsnId, Access>, id: InsnId) -> AnalysisResult<&Access> {
    accesses
        .get(&id)
        .ok_or(AnalysisError::InstructionNotFound(id))
}

fn visit(visited: &mut FixedBitSet, id: InsnId) -> bool {
    let first = !visited.contains(id.index());
    visited.insert(id.index());
    first
}

// The written value flows along normal edges only: when the writer throws, the
// register keeps its previous value.
fn forward(
    body: &Body,
    cfg: &Cfg,
    accesses: &BTreeMap<InsnId, Access>,
    writer: InsnId,
    reg: Reg,
) -> AnalysisResult<BTreeSet<InsnId>> {
    let mut readers = BTreeSet::new();
    let mut visited = FixedBitSet::with_capacity(body.capacity());
    let mut worklist: Vec<InsnId> = cfg
        .successors(writer)?
        .into_iter()
        .filter(|(_, branch)| !branch.is_exceptional())
        .map(|(succ, _)| succ)
        .collect();

    while let Some(id) = worklist.pop() {
        if !visit(&mut visited, id) {
            continue;
        }
        let access = access_of(accesses, id)?;
        if hints::reads(access, reg) {
            readers.insert(id);
        }
        let overwritten = hints::writes(access, reg);
        for (succ, branch) in cfg.successors(id)? {
            if !overwritten || branch.is_exceptional() {
                worklist.push(succ);
            }
        }
    }
    Ok(readers)
}

fn backward(
    body: &Body,
    cfg: &Cfg,
    accesses: &BTreeMap<InsnId, Access>,
    reader: InsnId,
    reg: Reg,
) -> AnalysisResult<BTreeSet<Source>> {
    let mut writers = BTreeSet::new();
    let mut visited = FixedBitSet::with_capacity(body.capacity());
    visited.insert(reader.index());
    let mut worklist = vec![reader];

    while let Some(id) = worklist.pop() {
        if cfg.entry() == Some(id) {
            writers.insert(Source::Entry(reg));
        }
        for (pred, branch) in cfg.predecessors(id)? {
            if !branch.is_exceptional() && hints::writes(access_of(accesses, pred)?, reg) {
                writers.insert(Source::Insn(pred));
            } else if visit(&mut visited, pred) {
                worklist.push(pred);
            }
        }
    }
    Ok(writers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(text: &str) -> (Body, RegisterState) {
        let body = dw_ir::parse(text).unwrap().remove(0);
        let cfg = Cfg::build(&body).unwrap();
        let accesses = body
            .order()
            .iter()
            .map(|id| (*id, hints::access(&body, &cfg, *id).unwrap()))
            .collect();
        let state = RegisterState::compute(&body, &cfg, &accesses).unwrap();
        (body, state)
    }

    #[test]
    fn loop_accesses() {
        let (body, state) = state(
            r#"
.method static La;->f(I)I
    const:?0 i, 0
:loop
    if-ge i, p0, :end
    add-lit i, i, 1
    goto :loop
:end
    return i
.end method
"#,
        );
        let o = body.order();
        let i = body.reg_by_name("i").unwrap();
        let p0 = body.params()[0];

        assert_eq!(state.readers(o[0]).collect::<Vec<_>>(), vec![o[1], o[2], o[4]]);
        assert_eq!(state.readers(o[2]).collect::<Vec<_>>(), vec![o[1], o[2], o[4]]);
        assert_eq!(
            state.writers(o[1], i).collect::<Vec<_>>(),
            vec![Source::Insn(o[0]), Source::Insn(o[2])]
        );
        assert_eq!(
            state.writers(o[1], p0).collect::<Vec<_>>(),
            vec![Source::Entry(p0)]
        );
        assert_eq!(
            state.writers(o[2], i).collect::<Vec<_>>(),
            vec![Source::Insn(o[0]), Source::Insn(o[2])]
        );
    }

    #[test]
    fn throwing_writer() {
        let (body, state) = state(
            r#"
.method static La;->f()I
    const:I r, 0
:start
    invoke-static {}, La;->g()I
    move-result r
    aget:I r, a, r
:end
    return r
:handler
    return r
    .catchall {:start .. :end} :handler
.end method
"#,
        );
        let o = body.order();
        let r = body.reg_by_name("r").unwrap();
        // the handler sees the constant and the move-result, not the array load
        assert_eq!(
            state.writers(o[5], r).collect::<Vec<_>>(),
            vec![Source::Insn(o[0]), Source::Insn(o[2])]
        );
        assert_eq!(state.readers(o[3]).collect::<Vec<_>>(), vec![o[4]]);
        assert_eq!(state.readers(o[2]).collect::<Vec<_>>(), vec![o[3], o[5]]);
    }
}
