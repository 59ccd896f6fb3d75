//! Register index assignment.

use crate::constraints::typed;
use crate::errors::{CodegenError, CodegenResult};
use dw_ir::{Body, Reg};
use fixedbitset::FixedBitSet;
use serde::Serialize;
use std::collections::BTreeMap;

/// Final Dalvik register indices of a body.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterIndices {
    indices: BTreeMap<Reg, u16>,
    registers_size: u16,
    ins_size: u16,
}

impl RegisterIndices {
    pub fn index(&self, reg: Reg) -> CodegenResult<u16> {
        self.indices
            .get(&reg)
            .copied()
            .ok_or_else(|| CodegenError::Structure(format!("no index for register {reg}")))
    }

    /// Number of register words of the method frame.
    #[inline]
    #[must_use]
    pub const fn registers_size(&self) -> u16 {
        self.registers_size
    }

    /// Number of words of `this` and parameters.
    #[inline]
    #[must_use]
    pub const fn ins_size(&self) -> u16 {
        self.ins_size
    }
}

/// Assigns indices: ranges first, in creation order, then the other locals in
/// creation order, then `this` and parameters in declaration order.
///
/// A range holding special registers ends with them, its locals are placed right
/// before `this` and parameters. Wide registers take two consecutive indices.
pub fn assign(body: &Body, ranges: &[Vec<Reg>]) -> CodegenResult<RegisterIndices> {
    let specials = body.special_registers();
    let (trailing, plain): (Vec<&Vec<Reg>>, Vec<&Vec<Reg>>) = ranges
        .iter()
        .partition(|range| range.iter().any(|r| specials.contains(r)));

    let mut placed = FixedBitSet::with_capacity(body.registers_capacity());
    for reg in trailing.iter().copied().flatten().chain(&specials) {
        placed.insert(reg.index());
    }

    let mut order = Vec::new();
    for reg in plain.into_iter().flatten() {
        if !placed.put(reg.index()) {
            order.push(*reg);
        }
    }
    for (reg, _) in body.registers() {
        if !placed.put(reg.index()) {
            order.push(reg);
        }
    }
    for reg in trailing.into_iter().flatten() {
        if !specials.contains(reg) {
            order.push(*reg);
        }
    }
    let locals = order.len();
    order.extend(specials);

    let mut indices = BTreeMap::new();
    let mut next = 0usize;
    let mut ins = 0usize;
    for (i, reg) in order.into_iter().enumerate() {
        let width = usize::from(typed(body, reg)?.width());
        let index = u16::try_from(next).map_err(|_| CodegenError::TooManyRegisters(next))?;
        log::trace!("    {} -> v{index}", body.reg(reg)?.name());
        indices.insert(reg, index);
        next += width;
        if i >= locals {
            ins += width;
        }
    }

    let registers_size = u16::try_from(next).map_err(|_| CodegenError::TooManyRegisters(next))?;
    let ins_size = u16::try_from(ins).map_err(|_| CodegenError::TooManyRegisters(ins))?;
    Ok(RegisterIndices {
        indices,
        registers_size,
        ins_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::RegisterSolver;

    fn solved(text: &str) -> (Body, RegisterSolver, RegisterIndices) {
        let mut body = dw_ir::parse(text).unwrap().remove(0);
        dw_analysis::retype(&mut body).unwrap();
        let mut solver = RegisterSolver::new();
        solver.solve(&mut body).unwrap();
        let indices = assign(&body, solver.ranges()).unwrap();
        (body, solver, indices)
    }

    fn contiguous(body: &Body, indices: &RegisterIndices, regs: &[Reg]) -> bool {
        regs.windows(2).all(|w| {
            let width = body.reg(w[0]).unwrap().width();
            indices.index(w[0]).unwrap() + width == indices.index(w[1]).unwrap()
        })
    }

    #[test]
    fn trailing_specials() {
        let (body, solver, indices) = solved(
            r#"
.method La;->f(JI)V
    const:I a, 1
    const:J b, 2
    const:I c, 3
    const:J d, 4
    invoke-static {c, b, a, d}, La;->g(IJIJ)V
    invoke-virtual {this, p0, p1}, La;->h(JI)V
    return-void
.end method
"#,
        );
        assert_eq!(solver.ranges().len(), 1);
        // 6 words of locals, then this, p0 (wide) and p1
        assert_eq!(indices.registers_size(), 10);
        assert_eq!(indices.ins_size(), 4);
        let this = body.this().unwrap();
        assert_eq!(indices.index(this).unwrap(), 6);
        assert_eq!(indices.index(body.params()[0]).unwrap(), 7);
        assert_eq!(indices.index(body.params()[1]).unwrap(), 9);
        for range in solver.ranges() {
            assert!(contiguous(&body, &indices, range));
        }
    }

    #[test]
    fn wide_registers() {
        let (body, solver, indices) = solved(
            r#"
.method static La;->f(J)J
    const:J a, 1
    const:I b, 2
    const:J c, 3
    const:J d, 4
    invoke-static {b, a, c, d}, La;->g(IJJJ)V
    invoke-static {d, a}, La;->h(JJ)V
    return p0
.end method
"#,
        );
        assert_eq!(solver.ranges().len(), 1);
        let mut used = Vec::new();
        for (reg, info) in body.registers() {
            let index = indices.index(reg).unwrap();
            used.push(index);
            if info.width() == 2 {
                used.push(index + 1);
            }
        }
        used.sort_unstable();
        assert_eq!(used, (0..indices.registers_size()).collect::<Vec<_>>());
        assert_eq!(indices.registers_size(), 9);
        assert_eq!(
            indices.index(body.params()[0]).unwrap(),
            indices.registers_size() - 2
        );
        for range in solver.ranges() {
            assert!(contiguous(&body, &indices, range));
        }
    }

    #[test]
    fn special_range() {
        let (body, solver, indices) = solved(
            r#"
.method static La;->f(III)V
    const:I a, 1
    const:I b, 2
    const:I c, 3
    invoke-static {a, b, c, p0, p1, p2}, La;->g(IIIIII)V
    return-void
.end method
"#,
        );
        let range = &solver.ranges()[0];
        assert_eq!(range[3..], body.params()[..]);
        assert!(contiguous(&body, &indices, range));
        assert_eq!(indices.index(range[0]).unwrap(), 0);
        assert_eq!(indices.index(body.params()[2]).unwrap(), 5);
    }
}
