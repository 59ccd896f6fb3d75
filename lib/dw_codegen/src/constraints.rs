//! Register constraints solving.
//!
//! Range instructions (`invoke-*/range`, `filled-new-array/range`) name their
//! arguments by a first register and a count: arguments must receive consecutive
//! register indices. Each such instruction yields a [`RegisterConstraint`], and the
//! solver gathers compatible constraints into disjoint ranges. Constraints that can't
//! be satisfied in place get fresh registers, filled by moves inserted before the
//! constrained instruction.
//!
//! `this` and parameter registers always take the last indices, in declaration
//! order: a range holding some of them must end with them, starting from the first
//! one.

use crate::errors::{CodegenError, CodegenResult};
use dw_ir::instrs::Instr;
use dw_ir::{Body, InsnId, Reg, Type};
use std::collections::BTreeSet;

/// Maximum argument words of a non-range invoke.
pub const MAX_ARGUMENT_WORDS: usize = 5;
/// Number of registers addressable by 4-bit register operands.
pub const MAX_NIBBLE_REGISTERS: usize = 16;

/// Registers of an instruction that must be allocated contiguously, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterConstraint {
    pub insn: InsnId,
    pub regs: Vec<Reg>,
}

/// Concrete type of a register.
pub(crate) fn typed(body: &Body, reg: Reg) -> CodegenResult<Type> {
    let info = body.reg(reg)?;
    match info.type_() {
        Some(t) if !t.is_ambiguous() => Ok(t.clone()),
        _ => Err(CodegenError::Untyped(format!("register {}", info.name()))),
    }
}

pub(crate) fn words(body: &Body, regs: &[Reg]) -> CodegenResult<usize> {
    regs.iter()
        .map(|r| typed(body, *r).map(|t| usize::from(t.width())))
        .sum()
}

fn body_words(body: &Body) -> CodegenResult<usize> {
    let regs: Vec<Reg> = body.registers().map(|(reg, _)| reg).collect();
    words(body, &regs)
}

/// Collects constraints of the instructions that must be lowered in range form
/// and are not yet constrained.
pub fn collect(
    body: &Body,
    constrained: &BTreeSet<InsnId>,
) -> CodegenResult<Vec<RegisterConstraint>> {
    let total = body_words(body)?;
    let mut constraints = Vec::new();
    for (id, instr) in body.instructions() {
        let args = match instr {
            Instr::Invoke(_, args, _) | Instr::FilledNewArray(args, _) => args,
            _ => continue,
        };
        if constrained.contains(&id) {
            continue;
        }
        if words(body, args)? > MAX_ARGUMENT_WORDS || total > MAX_NIBBLE_REGISTERS {
            constraints.push(RegisterConstraint {
                insn: id,
                regs: args.clone(),
            });
        }
    }
    Ok(constraints)
}

/// Checks if a register list can't be allocated contiguously with respect to the
/// fixed position of special registers.
///
/// Special registers of the list must be a suffix of it, and exactly the leading
/// sequence of `this` and parameters. A list starting with `this` (or the first
/// parameter of a static method) must hence be exactly that sequence.
fn collides(specials: &[Reg], regs: &[Reg]) -> bool {
    let distinct: BTreeSet<&Reg> = regs.iter().collect();
    if distinct.len() != regs.len() {
        return true;
    }
    match regs.iter().position(|r| specials.contains(r)) {
        None => false,
        Some(first) => {
            let tail = &regs[first..];
            tail.len() > specials.len() || tail != &specials[..tail.len()]
        }
    }
}

// `inner` starts at position `at` of `outer`.
fn splice(outer: &[Reg], at: usize, inner: &[Reg]) -> Option<Vec<Reg>> {
    let common = usize::min(outer.len() - at, inner.len());
    if outer[at..at + common] != inner[..common] {
        return None;
    }
    let mut merged = outer.to_vec();
    merged.extend_from_slice(&inner[common..]);
    let distinct: BTreeSet<&Reg> = merged.iter().collect();
    if distinct.len() == merged.len() {
        Some(merged)
    } else {
        None
    }
}

/// Computes the smallest range containing both ranges as contiguous sub-ranges,
/// if any.
///
/// The first element of one range must sit inside the other one, and both must
/// agree on the elements following it. A merge that would place a register twice
/// fails.
#[must_use]
pub fn overlap(a: &[Reg], b: &[Reg]) -> Option<Vec<Reg>> {
    match (a.first(), b.first()) {
        (None, _) => Some(b.to_vec()),
        (_, None) => Some(a.to_vec()),
        (Some(fa), Some(fb)) => {
            if let Some(at) = b.iter().position(|r| r == fa) {
                splice(b, at, a)
            } else if let Some(at) = a.iter().position(|r| r == fb) {
                splice(a, at, b)
            } else {
                None
            }
        }
    }
}

/// Accepted ranges, pairwise disjoint, in creation order.
#[derive(Debug, Default)]
pub struct RegisterSolver {
    ranges: Vec<Vec<Reg>>,
    constrained: BTreeSet<InsnId>,
}

impl RegisterSolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn ranges(&self) -> &[Vec<Reg>] {
        &self.ranges
    }

    /// Checks if an instruction must be lowered in range form.
    #[must_use]
    pub fn is_range(&self, insn: InsnId) -> bool {
        self.constrained.contains(&insn)
    }

    /// Constrains every instruction that needs it.
    ///
    /// Solving may insert moves and registers, which may push the body over the
    /// 4-bit register limit: constraints are collected again until none is new.
    pub fn solve(&mut self, body: &mut Body) -> CodegenResult<()> {
        loop {
            let constraints = collect(body, &self.constrained)?;
            if constraints.is_empty() {
                return Ok(());
            }
            log::debug!("    ---- solving {} register constraint(s)", constraints.len());
            self.add_constraints(body, constraints)?;
        }
    }

    pub fn add_constraints(
        &mut self,
        body: &mut Body,
        constraints: Vec<RegisterConstraint>,
    ) -> CodegenResult<()> {
        let specials = body.special_registers();
        self.constrained.extend(constraints.iter().map(|c| c.insn));

        let (mut colliding, candidates): (Vec<_>, Vec<_>) = constraints
            .into_iter()
            .partition(|c| collides(&specials, &c.regs));

        for constraint in candidates {
            if !self.merge(&specials, &constraint.regs) {
                colliding.push(constraint);
            }
        }

        for constraint in colliding {
            self.resolve_collision(body, constraint)?;
        }
        Ok(())
    }

    /// Tries to merge a register list with the ranges it shares registers with.
    fn merge(&mut self, specials: &[Reg], regs: &[Reg]) -> bool {
        if regs.is_empty() {
            return true;
        }
        let touched: Vec<usize> = self
            .ranges
            .iter()
            .enumerate()
            .filter(|(_, range)| range.iter().any(|r| regs.contains(r)))
            .map(|(i, _)| i)
            .collect();

        let mut merged = regs.to_vec();
        for i in &touched {
            match overlap(&merged, &self.ranges[*i]) {
                Some(m) => merged = m,
                None => return false,
            }
        }
        if collides(specials, &merged) {
            return false;
        }

        match touched.first() {
            None => self.ranges.push(merged),
            Some(first) => {
                for i in touched.iter().skip(1).rev() {
                    self.ranges.remove(*i);
                }
                self.ranges[*first] = merged;
            }
        }
        true
    }

    /// Copies the constrained registers to fresh ones forming a new range.
    fn resolve_collision(
        &mut self,
        body: &mut Body,
        constraint: RegisterConstraint,
    ) -> CodegenResult<()> {
        let mut fresh = Vec::with_capacity(constraint.regs.len());
        let mut moves = Vec::with_capacity(constraint.regs.len());
        for reg in &constraint.regs {
            let t = typed(body, *reg)?;
            let new = body.new_reg();
            body.reg_mut(new)?.set_type(t.clone());
            moves.push(Instr::Move(t, new, *reg));
            fresh.push(new);
        }
        log::debug!(
            "    ---- range collision at {}, {} register(s) copied",
            constraint.insn,
            fresh.len()
        );

        let args = body
            .instr_mut(constraint.insn)?
            .range_arguments_mut()
            .ok_or_else(|| {
                CodegenError::Structure(format!("{} is not a range instruction", constraint.insn))
            })?;
        *args = fresh.clone();
        if !moves.is_empty() {
            body.insert_before(constraint.insn, moves)?;
        }
        self.ranges.push(fresh);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regs(body: &mut Body, names: &[&str]) -> Vec<Reg> {
        names.iter().map(|n| body.declare_reg(n)).collect()
    }

    fn typed_body(text: &str) -> Body {
        let mut body = dw_ir::parse(text).unwrap().remove(0);
        dw_analysis::retype(&mut body).unwrap();
        body
    }

    #[test]
    fn overlaps() {
        let mut body = dw_ir::parse(".method static La;->f()V\n    return-void\n.end method\n")
            .unwrap()
            .remove(0);
        let r = regs(&mut body, &["a", "b", "c", "d", "e"]);
        let (a, b, c, d, e) = (r[0], r[1], r[2], r[3], r[4]);

        assert_eq!(overlap(&[a, b, c], &[b, c, d]), Some(vec![a, b, c, d]));
        assert_eq!(overlap(&[b, c, d], &[a, b, c]), Some(vec![a, b, c, d]));
        assert_eq!(overlap(&[a, b, c, d], &[b, c]), Some(vec![a, b, c, d]));
        assert_eq!(overlap(&[b, c], &[a, b, c, d]), Some(vec![a, b, c, d]));
        assert_eq!(overlap(&[a, b], &[c, d]), None);
        assert_eq!(overlap(&[a, b], &[c, b]), None);
        assert_eq!(overlap(&[a, b, c], &[b, d]), None);
        // shared at both ends
        assert_eq!(overlap(&[a, b, c], &[c, e, a]), None);
        assert_eq!(overlap(&[a, b], &[b, a]), None);
        assert_eq!(overlap(&[], &[a]), Some(vec![a]));
    }

    #[test]
    fn collisions() {
        let body = dw_ir::parse(".method La;->f(IJ)V\n    return-void\n.end method\n")
            .unwrap()
            .remove(0);
        let specials = body.special_registers();
        let (this, p0, p1) = (specials[0], specials[1], specials[2]);
        let mut body = body;
        let v = body.declare_reg("v");

        assert!(!collides(&specials, &[v]));
        assert!(!collides(&specials, &[this, p0, p1]));
        assert!(!collides(&specials, &[this, p0]));
        assert!(!collides(&specials, &[v, this, p0]));
        assert!(collides(&specials, &[p0, p1]));
        assert!(collides(&specials, &[this, p1]));
        assert!(collides(&specials, &[this, v]));
        assert!(collides(&specials, &[p0, this]));
        assert!(collides(&specials, &[v, v]));
    }

    #[test]
    fn merged_ranges() {
        let mut body = dw_ir::parse(".method static La;->f()V\n    return-void\n.end method\n")
            .unwrap()
            .remove(0);
        let r = regs(&mut body, &["a", "b", "c", "d", "e", "f"]);
        let mut solver = RegisterSolver::new();
        assert!(solver.merge(&[], &[r[0], r[1]]));
        assert!(solver.merge(&[], &[r[3], r[4]]));
        assert!(solver.merge(&[], &[r[5]]));
        assert!(solver.merge(&[], &[r[1], r[2], r[3]]));
        assert_eq!(
            solver.ranges(),
            &[vec![r[0], r[1], r[2], r[3], r[4]], vec![r[5]]]
        );
        assert!(!solver.merge(&[], &[r[4], r[0]]));
        assert!(!solver.merge(&[], &[r[2], r[5]]));
        assert_eq!(solver.ranges().len(), 2);
    }

    #[test]
    fn long_invoke() {
        let mut body = typed_body(
            r#"
.method static La;->f(II)V
    const:I a, 1
    const:I b, 2
    const:J c, 3
    invoke-static {a, b, c, p0, p1}, La;->g(IIJII)V
    return-void
.end method
"#,
        );
        let mut solver = RegisterSolver::new();
        solver.solve(&mut body).unwrap();
        let invoke = body.order()[3];
        assert!(solver.is_range(invoke));
        let p = body.params().to_vec();
        assert_eq!(solver.ranges().len(), 1);
        assert_eq!(solver.ranges()[0][3..], p[..]);
        assert_eq!(body.len(), 5);
    }

    #[test]
    fn constrained_once() {
        let mut body = typed_body(
            r#"
.method static La;->f()V
    const:I a, 1
    const:I b, 2
    const:I c, 3
    const:I d, 4
    const:I e, 5
    const:I f, 6
    invoke-static {a, b, c, d, e, f}, La;->g(IIIIII)V
    return-void
.end method
"#,
        );
        let invoke = body.order()[6];
        let mut solver = RegisterSolver::new();
        let constraints = collect(&body, &solver.constrained).unwrap();
        assert_eq!(constraints.len(), 1);
        solver.add_constraints(&mut body, constraints).unwrap();
        assert!(solver.is_range(invoke));
        assert!(collect(&body, &solver.constrained).unwrap().is_empty());

        solver.solve(&mut body).unwrap();
        assert_eq!(solver.ranges().len(), 1);
        assert_eq!(body.len(), 8);
    }

    #[test]
    fn colliding_invoke() {
        let mut body = typed_body(
            r#"
.method static La;->f(II)V
    const:I a, 1
    const:J b, 2
    invoke-static {p1, p0, a, a, b}, La;->g(IIIIJ)V
    return-void
.end method
"#,
        );
        let before = body.registers().count();
        let mut solver = RegisterSolver::new();
        solver.solve(&mut body).unwrap();

        // five moves are inserted before the invoke
        assert_eq!(body.len(), 9);
        let invoke = body.order()[7];
        let fresh = match body.instr(invoke).unwrap() {
            Instr::Invoke(_, args, _) => args.clone(),
            instr => panic!("unexpected {instr:?}"),
        };
        assert_eq!(solver.ranges(), &[fresh.clone()]);
        assert_eq!(body.registers().count(), before + 5);
        match body.instr(body.order()[2]).unwrap() {
            Instr::Move(t, dst, src) => {
                assert_eq!(*t, Type::Int);
                assert_eq!(*dst, fresh[0]);
                assert_eq!(*src, body.params()[1]);
            }
            instr => panic!("unexpected {instr:?}"),
        }
        match body.instr(body.order()[6]).unwrap() {
            Instr::Move(t, _, _) => assert_eq!(*t, Type::Long),
            instr => panic!("unexpected {instr:?}"),
        }
        assert_eq!(body.reg(fresh[4]).unwrap().type_(), Some(&Type::Long));
    }

    #[test]
    fn many_registers() {
        let mut text = String::from(".method static La;->f()V\n");
        for i in 0..17 {
            text.push_str(&format!("    const:I v{i}, {i}\n"));
        }
        for i in 0..17 {
            text.push_str(&format!("    invoke-static {{v{i}}}, La;->g(I)V\n"));
        }
        text.push_str("    return-void\n.end method\n");
        let mut body = typed_body(&text);
        let mut solver = RegisterSolver::new();
        solver.solve(&mut body).unwrap();
        assert_eq!(solver.ranges().len(), 17);
        assert!(body.order()[17..34].iter().all(|id| solver.is_range(*id)));
    }
}
