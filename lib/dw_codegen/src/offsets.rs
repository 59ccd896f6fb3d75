//! Code unit offsets computation.
//!
//! Lowered code is a sequence of providers (instructions, payload alignment
//! paddings and payloads). Offset cells hold signed distances, in code units,
//! between a base provider and a target provider. Since binding an offset may
//! change the format, hence the size, of its owner, cells are updated until a
//! fixpoint is reached: a size change triggers the update of every cell whose
//! distance spans the resized provider.

use crate::errors::{CodegenError, CodegenResult};
use crate::format::{Format, FormatQuery, OpClass};
use dw_ir::InsnId;

/// Index of a provider in the code sequence.
pub type ProviderId = usize;
/// Index of an offset cell.
pub type CellId = usize;

/// An instruction being lowered, with its final register indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Opcode {
    pub id: InsnId,
    /// Mnemonic without format suffix.
    pub base: String,
    pub class: OpClass,
    /// Register indices in encoding order; register pairs of invoke arguments are
    /// expanded.
    pub regs: Vec<u16>,
    pub literal: Option<i64>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Targets are the payload cells.
    PackedSwitch { first_key: i32, targets: usize },
    /// Keys are sorted, targets are the payload cells.
    SparseSwitch { keys: Vec<i32> },
    FillArrayData { width: usize, data: Vec<i64> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Instr(Opcode),
    Padding,
    Payload(Payload),
}

/// A unit of lowered code whose size is given by its format.
#[derive(Debug, Clone)]
pub struct Provider {
    source: Option<InsnId>,
    item: Item,
    cells: Vec<CellId>,
    format: Format,
}

impl Provider {
    #[must_use]
    pub const fn new(source: Option<InsnId>, item: Item) -> Self {
        Self {
            source,
            item,
            cells: Vec::new(),
            format: Format::Padding(0),
        }
    }

    /// IR instruction this provider was lowered from.
    #[inline]
    #[must_use]
    pub const fn source(&self) -> Option<InsnId> {
        self.source
    }

    #[inline]
    #[must_use]
    pub const fn item(&self) -> &Item {
        &self.item
    }

    #[inline]
    #[must_use]
    pub fn cells(&self) -> &[CellId] {
        &self.cells
    }

    #[inline]
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }
}

/// Signed distance from `base` to `target`, owned by the provider encoding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetCell {
    pub owner: ProviderId,
    pub base: ProviderId,
    pub target: ProviderId,
    pub value: Option<i32>,
}

/// The lowered code sequence with its offset cells.
#[derive(Debug, Clone, Default)]
pub struct CodeUnits {
    providers: Vec<Provider>,
    cells: Vec<OffsetCell>,
}

impl CodeUnits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, provider: Provider) -> ProviderId {
        self.providers.push(provider);
        self.providers.len() - 1
    }

    /// Adds an unbound offset cell to its owner.
    pub fn add_cell(
        &mut self,
        owner: ProviderId,
        base: ProviderId,
        target: ProviderId,
    ) -> CodegenResult<CellId> {
        let id = self.cells.len();
        self.providers
            .get_mut(owner)
            .ok_or_else(|| CodegenError::Structure(format!("no provider {owner}")))?
            .cells
            .push(id);
        self.cells.push(OffsetCell {
            owner,
            base,
            target,
            value: None,
        });
        Ok(id)
    }

    #[must_use]
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    #[must_use]
    pub fn cells(&self) -> &[OffsetCell] {
        &self.cells
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn size(&self, provider: ProviderId) -> usize {
        self.providers[provider].format.size()
    }

    fn check(&self, provider: ProviderId) -> CodegenResult<()> {
        if provider < self.providers.len() {
            Ok(())
        } else {
            Err(CodegenError::Structure(format!(
                "offset target {provider} is not part of the code"
            )))
        }
    }

    /// Walks forward and backward in lockstep from `from` until `to` is reached.
    /// Returns the providers walked over (those whose size is part of the
    /// distance) and the signed byte distance.
    fn walk(&self, from: ProviderId, to: ProviderId) -> CodegenResult<(Vec<ProviderId>, i64)> {
        self.check(from)?;
        self.check(to)?;
        let (mut fwd, mut bwd) = (from, from);
        let (mut fwd_size, mut bwd_size) = (0usize, 0usize);
        loop {
            if fwd == to {
                return Ok(((from..to).collect(), fwd_size as i64));
            }
            if bwd == to {
                return Ok(((to..from).collect(), -(bwd_size as i64)));
            }
            if fwd >= self.providers.len() && bwd == 0 {
                return Err(CodegenError::Structure(format!(
                    "offset target {to} not found from {from}"
                )));
            }
            if fwd < self.providers.len() {
                fwd_size += self.size(fwd);
                fwd += 1;
            }
            if bwd > 0 {
                bwd -= 1;
                bwd_size += self.size(bwd);
            }
        }
    }

    /// Signed distance in code units from `relative_to` to `target`.
    pub fn calculate_offset(
        &self,
        relative_to: ProviderId,
        target: ProviderId,
    ) -> CodegenResult<i32> {
        let (_, bytes) = self.walk(relative_to, target)?;
        i32::try_from(bytes / 2)
            .map_err(|_| CodegenError::Structure(format!("offset {} overflows", bytes / 2)))
    }

    /// For each provider, the cells whose value depends on its size.
    fn affection_map(&self) -> CodegenResult<Vec<Vec<CellId>>> {
        let mut affected = vec![Vec::new(); self.providers.len()];
        for (id, cell) in self.cells.iter().enumerate() {
            let (walked, _) = self.walk(cell.base, cell.target)?;
            for provider in walked {
                affected[provider].push(id);
            }
            if !affected[cell.base].contains(&id) {
                affected[cell.base].push(id);
            }
        }
        Ok(affected)
    }

    fn offsets_of(&self, provider: ProviderId) -> Vec<Option<i32>> {
        self.providers[provider]
            .cells
            .iter()
            .map(|cell| self.cells[*cell].value)
            .collect()
    }

    /// Queries the format of a provider. Instructions never shrink, paddings
    /// follow their address. Returns whether the size changed.
    fn refresh_format(
        &mut self,
        provider: ProviderId,
        formats: &dyn FormatQuery,
    ) -> CodegenResult<bool> {
        let offsets = self.offsets_of(provider);
        let p = &mut self.providers[provider];
        let format = formats.format(p, &offsets)?;
        let resized = match p.item {
            Item::Padding => format.units() != p.format.units(),
            _ => format.units() > p.format.units(),
        };
        if resized {
            p.format = format;
        }
        Ok(resized)
    }

    /// Gives every provider its format, offsets being unbound.
    pub fn init_formats(&mut self, formats: &dyn FormatQuery) -> CodegenResult<()> {
        for provider in &mut self.providers {
            let offsets = vec![None; provider.cells.len()];
            provider.format = formats.format(provider, &offsets)?;
        }
        for cell in &mut self.cells {
            cell.value = None;
        }
        Ok(())
    }

    /// Binds every offset cell, resizing providers until a fixpoint is reached.
    pub fn update_offsets(&mut self, formats: &dyn FormatQuery) -> CodegenResult<()> {
        let affected = self.affection_map()?;
        let budget = 16 * (self.cells.len() + 1) * (self.providers.len() + 1);
        let mut updates = 0;

        for provider in 0..self.providers.len() {
            let mut worklist: Vec<CellId> = self.providers[provider].cells.clone();
            while let Some(cell) = worklist.pop() {
                updates += 1;
                if updates > budget {
                    return Err(CodegenError::NoConvergence(budget));
                }
                let OffsetCell {
                    owner,
                    base,
                    target,
                    ..
                } = self.cells[cell];
                let value = self.calculate_offset(base, target)?;
                self.cells[cell].value = Some(value);
                if self.refresh_format(owner, formats)? {
                    log::trace!(
                        "    provider {owner} resized to {}",
                        self.providers[owner].format
                    );
                    worklist.extend(&affected[owner]);
                }
            }
        }
        log::debug!("    ---- offsets stable after {updates} update(s)");
        Ok(())
    }

    /// Checks that every cell holds the distance between its base and target.
    pub fn is_closed(&self) -> CodegenResult<bool> {
        for cell in &self.cells {
            if cell.value != Some(self.calculate_offset(cell.base, cell.target)?) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Code unit address of every provider.
    #[must_use]
    pub fn addresses(&self) -> Vec<usize> {
        let mut address = 0;
        self.providers
            .iter()
            .map(|p| {
                let current = address;
                address += p.format.units();
                current
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DalvikFormats;
    use std::cell::Cell;

    fn ids(n: usize) -> Vec<InsnId> {
        let mut text = String::from(".method static La;->f()V\n");
        for _ in 0..n {
            text.push_str("    nop\n");
        }
        text.push_str(".end method\n");
        dw_ir::parse(&text).unwrap().remove(0).order().to_vec()
    }

    fn opcode(id: InsnId, base: &str, class: OpClass) -> Provider {
        Provider::new(
            Some(id),
            Item::Instr(Opcode {
                id,
                base: base.to_string(),
                class,
                regs: vec![],
                literal: None,
                reference: None,
            }),
        )
    }

    #[test]
    fn lockstep_offsets() {
        let ids = ids(4);
        let mut code = CodeUnits::new();
        let goto = code.push(opcode(ids[0], "goto", OpClass::Goto));
        for id in &ids[1..] {
            code.push(opcode(*id, "nop", OpClass::NoOperand));
        }
        code.add_cell(goto, goto, 3).unwrap();
        code.init_formats(&DalvikFormats).unwrap();
        assert_eq!(code.calculate_offset(0, 3).unwrap(), 3);
        assert_eq!(code.calculate_offset(3, 0).unwrap(), -3);
        assert_eq!(code.calculate_offset(2, 2).unwrap(), 0);
        assert!(matches!(
            code.calculate_offset(0, 7),
            Err(CodegenError::Structure(_))
        ));
    }

    #[test]
    fn self_loop() {
        let ids = ids(2);
        let mut code = CodeUnits::new();
        code.push(opcode(ids[0], "nop", OpClass::NoOperand));
        let goto = code.push(opcode(ids[1], "goto", OpClass::Goto));
        code.add_cell(goto, goto, goto).unwrap();
        code.init_formats(&DalvikFormats).unwrap();
        code.update_offsets(&DalvikFormats).unwrap();
        assert_eq!(code.cells()[0].value, Some(0));
        assert_eq!(code.providers()[goto].format(), Format::F30t);
        assert_eq!(code.addresses(), vec![0, 1]);
        assert!(code.is_closed().unwrap());
    }

    #[test]
    fn cascading_resize() {
        let ids = ids(128);
        let mut code = CodeUnits::new();
        let forward = code.push(opcode(ids[0], "goto", OpClass::Goto));
        for id in &ids[1..126] {
            code.push(opcode(*id, "nop", OpClass::NoOperand));
        }
        let spin = code.push(opcode(ids[126], "goto", OpClass::Goto));
        let target = code.push(opcode(ids[127], "nop", OpClass::NoOperand));
        code.add_cell(forward, forward, target).unwrap();
        code.add_cell(spin, spin, spin).unwrap();
        code.init_formats(&DalvikFormats).unwrap();
        code.update_offsets(&DalvikFormats).unwrap();

        // the spin loop grows to goto/32, pushing the forward goto out of 8 bits
        assert_eq!(code.providers()[spin].format(), Format::F30t);
        assert_eq!(code.providers()[forward].format(), Format::F20t);
        assert_eq!(code.cells()[0].value, Some(2 + 125 + 3));
        assert!(code.is_closed().unwrap());
    }

    #[test]
    fn payload_alignment() {
        let ids = ids(1);
        let mut code = CodeUnits::new();
        let fill = code.push(Provider::new(
            Some(ids[0]),
            Item::Instr(Opcode {
                id: ids[0],
                base: "fill-array-data".to_string(),
                class: OpClass::PayloadRef,
                regs: vec![0],
                literal: None,
                reference: None,
            }),
        ));
        let padding = code.push(Provider::new(None, Item::Padding));
        let payload = code.push(Provider::new(
            None,
            Item::Payload(Payload::FillArrayData {
                width: 4,
                data: vec![1, 2],
            }),
        ));
        code.add_cell(fill, fill, payload).unwrap();
        code.add_cell(padding, 0, padding).unwrap();
        code.init_formats(&DalvikFormats).unwrap();
        code.update_offsets(&DalvikFormats).unwrap();

        assert_eq!(code.addresses(), vec![0, 3, 4]);
        assert_eq!(code.providers()[padding].format(), Format::Padding(1));
        assert_eq!(code.cells()[0].value, Some(4));
        assert!(code.is_closed().unwrap());
    }

    // Padding whose size changes on every query.
    struct Oscillating(Cell<usize>);

    impl FormatQuery for Oscillating {
        fn format(&self, _: &Provider, _: &[Option<i32>]) -> CodegenResult<Format> {
            let units = self.0.get();
            self.0.set(units + 1);
            Ok(Format::Padding(units))
        }
    }

    #[test]
    fn diverging_formats() {
        let ids = ids(1);
        let mut code = CodeUnits::new();
        code.push(opcode(ids[0], "nop", OpClass::NoOperand));
        let padding = code.push(Provider::new(None, Item::Padding));
        code.add_cell(padding, padding, padding).unwrap();

        let formats = Oscillating(Cell::new(0));
        code.init_formats(&formats).unwrap();
        assert!(matches!(
            code.update_offsets(&formats),
            Err(CodegenError::NoConvergence(96))
        ));
    }
}
