//! Dalvik instruction formats.
//!
//! The format of an instruction gives its encoded size. It depends on the bound
//! register indices, on literals and on branch offsets: binding a large offset may
//! make an instruction longer, and then move every instruction following it.

use crate::errors::{CodegenError, CodegenResult};
use crate::offsets::{Item, Opcode, Payload, Provider};
use serde::Serialize;
use std::fmt;

/// Dalvik instruction formats, named after their size in code units, their
/// register count and their extra operand kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Format {
    F10x,
    F12x,
    F11n,
    F11x,
    F10t,
    F20t,
    F22x,
    F21t,
    F21s,
    F21h,
    F21c,
    F23x,
    F22b,
    F22t,
    F22s,
    F22c,
    F30t,
    F32x,
    F31i,
    F31t,
    F35c,
    F3rc,
    F51l,
    /// Alignment before a payload, zero or one code unit.
    Padding(usize),
    PackedSwitchPayload(usize),
    SparseSwitchPayload(usize),
    FillArrayDataPayload { width: usize, len: usize },
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::F10x | Self::Padding(_) => "10x",
            Self::F12x => "12x",
            Self::F11n => "11n",
            Self::F11x => "11x",
            Self::F10t => "10t",
            Self::F20t => "20t",
            Self::F22x => "22x",
            Self::F21t => "21t",
            Self::F21s => "21s",
            Self::F21h => "21h",
            Self::F21c => "21c",
            Self::F23x => "23x",
            Self::F22b => "22b",
            Self::F22t => "22t",
            Self::F22s => "22s",
            Self::F22c => "22c",
            Self::F30t => "30t",
            Self::F32x => "32x",
            Self::F31i => "31i",
            Self::F31t => "31t",
            Self::F35c => "35c",
            Self::F3rc => "3rc",
            Self::F51l => "51l",
            Self::PackedSwitchPayload(_)
            | Self::SparseSwitchPayload(_)
            | Self::FillArrayDataPayload { .. } => "payload",
        };
        write!(f, "{name}")
    }
}

impl Format {
    /// Size in 16-bit code units.
    #[must_use]
    pub const fn units(&self) -> usize {
        match self {
            Self::Padding(units) => *units,
            Self::F10x | Self::F12x | Self::F11n | Self::F11x | Self::F10t => 1,
            Self::F20t
            | Self::F22x
            | Self::F21t
            | Self::F21s
            | Self::F21h
            | Self::F21c
            | Self::F23x
            | Self::F22b
            | Self::F22t
            | Self::F22s
            | Self::F22c => 2,
            Self::F30t | Self::F32x | Self::F31i | Self::F31t | Self::F35c | Self::F3rc => 3,
            Self::F51l => 5,
            Self::PackedSwitchPayload(targets) => *targets * 2 + 4,
            Self::SparseSwitchPayload(cases) => *cases * 4 + 2,
            Self::FillArrayDataPayload { width, len } => (*len * *width + 1) / 2 + 4,
        }
    }

    /// Size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.units() * 2
    }
}

/// Operand layout of an opcode family, deciding which formats it can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OpClass {
    /// `nop`, `return-void`
    NoOperand,
    /// `move`, `move-wide`, `move-object`
    Move,
    /// One 8-bit register: `move-result`, `return`, `throw`...
    Single,
    /// 32-bit literal into a register.
    Const,
    /// 64-bit literal into a register pair.
    ConstWide,
    /// One register and a constant pool reference.
    RegRef,
    /// Two 4-bit registers and a constant pool reference.
    RegRegRef,
    /// Two 4-bit registers: unary operations, conversions, `array-length`.
    Unop,
    /// Three 8-bit registers, or two 4-bit ones when the destination is the first
    /// source.
    Binop,
    /// Two registers and a literal; shifts only have the 8-bit literal form.
    BinopLit { shift: bool },
    /// Three 8-bit registers: comparisons and array accesses.
    Triple,
    Goto,
    IfTest,
    IfTestz,
    /// One register and an offset to a payload.
    PayloadRef,
    /// Register list or range: invokes and `filled-new-array`.
    Call { range: bool },
}

/// Gives the format of an instruction given its currently bound offsets.
///
/// Implementations must be pure: the same provider and offsets always give the
/// same format.
pub trait FormatQuery {
    fn format(&self, provider: &Provider, offsets: &[Option<i32>]) -> CodegenResult<Format>;
}

/// The Dalvik formats.
#[derive(Debug, Default, Clone, Copy)]
pub struct DalvikFormats;

const fn fits_nibble(index: u16) -> bool {
    index < 16
}

const fn fits_byte(index: u16) -> bool {
    index < 256
}

fn fits_i8(v: i64) -> bool {
    i8::try_from(v).is_ok()
}

fn fits_i16(v: i64) -> bool {
    i16::try_from(v).is_ok()
}

fn fits_i32(v: i64) -> bool {
    i32::try_from(v).is_ok()
}

fn out_of_range(op: &Opcode, index: u16) -> CodegenError {
    CodegenError::RegisterOutOfRange {
        insn: op.id,
        mnemonic: op.base.clone(),
        index,
    }
}

/// Checks every register index against a limit.
fn check(op: &Opcode, limit: fn(u16) -> bool) -> CodegenResult<()> {
    match op.regs.iter().find(|r| !limit(**r)) {
        Some(r) => Err(out_of_range(op, *r)),
        None => Ok(()),
    }
}

fn literal(op: &Opcode) -> CodegenResult<i64> {
    op.literal
        .ok_or_else(|| CodegenError::Structure(format!("{} at {} has no literal", op.base, op.id)))
}

fn literal_out_of_range(op: &Opcode, value: i64) -> CodegenError {
    CodegenError::LiteralOutOfRange {
        insn: op.id,
        mnemonic: op.base.clone(),
        value,
    }
}

fn branch(op: &Opcode, offset: Option<i32>) -> CodegenResult<()> {
    match offset {
        Some(offset) if offset == 0 || i16::try_from(offset).is_err() => {
            Err(CodegenError::BranchOutOfRange {
                insn: op.id,
                mnemonic: op.base.clone(),
                offset,
            })
        }
        _ => Ok(()),
    }
}

impl DalvikFormats {
    fn instr_format(op: &Opcode, offsets: &[Option<i32>]) -> CodegenResult<Format> {
        let format = match op.class {
            OpClass::NoOperand => Format::F10x,
            OpClass::Move => {
                let (dst, src) = match op.regs.as_slice() {
                    [dst, src] => (*dst, *src),
                    _ => return Err(CodegenError::Structure(format!("bad move at {}", op.id))),
                };
                if fits_nibble(dst) && fits_nibble(src) {
                    Format::F12x
                } else if fits_byte(dst) {
                    Format::F22x
                } else {
                    Format::F32x
                }
            }
            OpClass::Single => {
                check(op, fits_byte)?;
                Format::F11x
            }
            OpClass::Const => {
                check(op, fits_byte)?;
                let value = literal(op)?;
                // 32-bit patterns may be given unsigned
                let value = match u32::try_from(value) {
                    Ok(unsigned) => i64::from(unsigned as i32),
                    Err(_) if fits_i32(value) => value,
                    Err(_) => return Err(literal_out_of_range(op, value)),
                };
                if (-8..=7).contains(&value) && op.regs.iter().all(|r| fits_nibble(*r)) {
                    Format::F11n
                } else if fits_i16(value) {
                    Format::F21s
                } else if value & 0xffff == 0 {
                    Format::F21h
                } else {
                    Format::F31i
                }
            }
            OpClass::ConstWide => {
                check(op, fits_byte)?;
                let value = literal(op)?;
                if fits_i16(value) {
                    Format::F21s
                } else if fits_i32(value) {
                    Format::F31i
                } else if value & 0xffff_ffff_ffff == 0 {
                    Format::F21h
                } else {
                    Format::F51l
                }
            }
            OpClass::RegRef => {
                check(op, fits_byte)?;
                Format::F21c
            }
            OpClass::RegRegRef => {
                check(op, fits_nibble)?;
                Format::F22c
            }
            OpClass::Unop => {
                check(op, fits_nibble)?;
                Format::F12x
            }
            OpClass::Binop => match op.regs.as_slice() {
                [dst, a, b] if dst == a && fits_nibble(*dst) && fits_nibble(*b) => Format::F12x,
                _ => {
                    check(op, fits_byte)?;
                    Format::F23x
                }
            },
            OpClass::BinopLit { shift } => {
                let value = literal(op)?;
                if fits_i8(value) {
                    check(op, fits_byte)?;
                    Format::F22b
                } else if shift || !fits_i16(value) {
                    return Err(literal_out_of_range(op, value));
                } else {
                    check(op, fits_nibble)?;
                    Format::F22s
                }
            }
            OpClass::Triple => {
                check(op, fits_byte)?;
                Format::F23x
            }
            OpClass::Goto => match offsets.first().copied().flatten() {
                // goto and goto/16 can't encode a null offset
                Some(0) => Format::F30t,
                Some(offset) if i8::try_from(offset).is_ok() => Format::F10t,
                Some(offset) if i16::try_from(offset).is_ok() => Format::F20t,
                Some(_) => Format::F30t,
                None => Format::F10t,
            },
            OpClass::IfTest => {
                check(op, fits_nibble)?;
                branch(op, offsets.first().copied().flatten())?;
                Format::F22t
            }
            OpClass::IfTestz => {
                check(op, fits_byte)?;
                branch(op, offsets.first().copied().flatten())?;
                Format::F21t
            }
            OpClass::PayloadRef => {
                check(op, fits_byte)?;
                Format::F31t
            }
            OpClass::Call { range: false } => {
                if op.regs.len() > 5 {
                    return Err(CodegenError::Structure(format!(
                        "{} at {} has more than 5 argument words",
                        op.base, op.id
                    )));
                }
                check(op, fits_nibble)?;
                Format::F35c
            }
            OpClass::Call { range: true } => {
                if op.regs.len() > 255 {
                    return Err(CodegenError::Structure(format!(
                        "{} at {} has more than 255 argument words",
                        op.base, op.id
                    )));
                }
                let contiguous = op
                    .regs
                    .windows(2)
                    .all(|w| u32::from(w[0]) + 1 == u32::from(w[1]));
                if !contiguous {
                    return Err(CodegenError::Structure(format!(
                        "arguments of {} at {} are not contiguous",
                        op.base, op.id
                    )));
                }
                Format::F3rc
            }
        };
        Ok(format)
    }
}

impl FormatQuery for DalvikFormats {
    fn format(&self, provider: &Provider, offsets: &[Option<i32>]) -> CodegenResult<Format> {
        match provider.item() {
            Item::Instr(op) => Self::instr_format(op, offsets),
            Item::Padding => Ok(Format::Padding(
                offsets
                    .first()
                    .copied()
                    .flatten()
                    .map_or(0, |address| (address & 1) as usize),
            )),
            Item::Payload(Payload::PackedSwitch { targets, .. }) => {
                Ok(Format::PackedSwitchPayload(*targets))
            }
            Item::Payload(Payload::SparseSwitch { keys }) => {
                Ok(Format::SparseSwitchPayload(keys.len()))
            }
            Item::Payload(Payload::FillArrayData { width, data }) => {
                Ok(Format::FillArrayDataPayload {
                    width: *width,
                    len: data.len(),
                })
            }
        }
    }
}

/// Full mnemonic of an opcode in a given format.
#[must_use]
pub fn mnemonic(op: &Opcode, format: Format) -> String {
    let suffix = match (op.class, format) {
        (OpClass::Move, Format::F22x) => "/from16",
        (OpClass::Move, Format::F32x) => "/16",
        (OpClass::Const, Format::F11n) => "/4",
        (OpClass::Const | OpClass::ConstWide, Format::F21s) => "/16",
        (OpClass::Const | OpClass::ConstWide, Format::F21h) => "/high16",
        (OpClass::ConstWide, Format::F31i) => "/32",
        (OpClass::Binop, Format::F12x) => "/2addr",
        (OpClass::BinopLit { .. }, Format::F22b) => "/lit8",
        // reverse subtraction has no suffix in its 16-bit literal form
        (OpClass::BinopLit { .. }, Format::F22s) if op.base != "rsub-int" => "/lit16",
        (OpClass::Goto, Format::F20t) => "/16",
        (OpClass::Goto, Format::F30t) => "/32",
        (OpClass::Call { range: true }, _) => "/range",
        _ => "",
    };
    format!("{}{suffix}", op.base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(base: &str, class: OpClass, regs: &[u16], literal: Option<i64>) -> Provider {
        let body = dw_ir::parse(".method static La;->f()V\n    nop\n.end method\n")
            .unwrap()
            .remove(0);
        let op = Opcode {
            id: body.order()[0],
            base: base.to_string(),
            class,
            regs: regs.to_vec(),
            literal,
            reference: None,
        };
        Provider::new(Some(op.id), Item::Instr(op))
    }

    fn format(p: &Provider, offsets: &[Option<i32>]) -> CodegenResult<Format> {
        DalvikFormats.format(p, offsets)
    }

    fn named(p: &Provider, offsets: &[Option<i32>]) -> String {
        let format = format(p, offsets).unwrap();
        match p.item() {
            Item::Instr(op) => mnemonic(op, format),
            _ => unreachable!(),
        }
    }

    #[test]
    fn moves() {
        let mv = |d, s| provider("move-object", OpClass::Move, &[d, s], None);
        assert_eq!(named(&mv(1, 15), &[]), "move-object");
        assert_eq!(named(&mv(16, 2), &[]), "move-object/from16");
        assert_eq!(named(&mv(255, 4000), &[]), "move-object/from16");
        assert_eq!(named(&mv(256, 1), &[]), "move-object/16");
        assert_eq!(format(&mv(256, 1), &[]).unwrap().units(), 3);
    }

    #[test]
    fn constants() {
        let c = |r, v| provider("const", OpClass::Const, &[r], Some(v));
        assert_eq!(named(&c(0, 7), &[]), "const/4");
        assert_eq!(named(&c(0, -8), &[]), "const/4");
        assert_eq!(named(&c(16, 7), &[]), "const/16");
        assert_eq!(named(&c(0, 0x4120_0000), &[]), "const/high16");
        assert_eq!(named(&c(0, 0x8000_0000), &[]), "const/high16");
        assert_eq!(named(&c(0, 0x1234_5678), &[]), "const");
        assert!(matches!(
            format(&c(0, 1 << 40), &[]),
            Err(CodegenError::LiteralOutOfRange { .. })
        ));
        assert!(matches!(
            format(&c(256, 1), &[]),
            Err(CodegenError::RegisterOutOfRange { index: 256, .. })
        ));

        let w = |v| provider("const-wide", OpClass::ConstWide, &[0], Some(v));
        assert_eq!(named(&w(-2), &[]), "const-wide/16");
        assert_eq!(named(&w(1 << 20), &[]), "const-wide/32");
        assert_eq!(named(&w(0x4024_0000_0000_0000), &[]), "const-wide/high16");
        assert_eq!(named(&w(0x4024_0000_0000_0001), &[]), "const-wide");
        assert_eq!(format(&w(0x4024_0000_0000_0001), &[]).unwrap().units(), 5);
    }

    #[test]
    fn arithmetic() {
        let bin = |regs: &[u16]| provider("add-int", OpClass::Binop, regs, None);
        assert_eq!(named(&bin(&[1, 1, 2]), &[]), "add-int/2addr");
        assert_eq!(named(&bin(&[1, 2, 3]), &[]), "add-int");
        assert_eq!(named(&bin(&[16, 16, 2]), &[]), "add-int");

        let lit = |base, shift, regs: &[u16], v| {
            provider(base, OpClass::BinopLit { shift }, regs, Some(v))
        };
        assert_eq!(named(&lit("add-int", false, &[1, 2], 100), &[]), "add-int/lit8");
        assert_eq!(named(&lit("add-int", false, &[1, 2], 1000), &[]), "add-int/lit16");
        assert_eq!(named(&lit("rsub-int", false, &[1, 2], 1000), &[]), "rsub-int");
        assert_eq!(named(&lit("rsub-int", false, &[1, 2], 3), &[]), "rsub-int/lit8");
        assert!(format(&lit("shl-int", true, &[1, 2], 1000), &[]).is_err());
        assert!(format(&lit("add-int", false, &[16, 2], 1000), &[]).is_err());
    }

    #[test]
    fn branches() {
        let goto = provider("goto", OpClass::Goto, &[], None);
        assert_eq!(named(&goto, &[None]), "goto");
        assert_eq!(named(&goto, &[Some(-128)]), "goto");
        assert_eq!(named(&goto, &[Some(0)]), "goto/32");
        assert_eq!(named(&goto, &[Some(200)]), "goto/16");
        assert_eq!(named(&goto, &[Some(-40000)]), "goto/32");

        let ifz = provider("if-eqz", OpClass::IfTestz, &[3], None);
        assert_eq!(format(&ifz, &[Some(-4)]).unwrap(), Format::F21t);
        assert!(matches!(
            format(&ifz, &[Some(40000)]),
            Err(CodegenError::BranchOutOfRange { .. })
        ));
        assert!(format(&ifz, &[Some(0)]).is_err());
    }

    #[test]
    fn calls() {
        let call = |range, regs: &[u16]| {
            provider("invoke-static", OpClass::Call { range }, regs, None)
        };
        assert_eq!(named(&call(false, &[0, 1, 2, 3, 4]), &[]), "invoke-static");
        assert!(matches!(
            format(&call(false, &[0, 16]), &[]),
            Err(CodegenError::RegisterOutOfRange { index: 16, .. })
        ));
        assert_eq!(named(&call(true, &[20, 21, 22]), &[]), "invoke-static/range");
        assert_eq!(named(&call(true, &[]), &[]), "invoke-static/range");
        assert!(format(&call(true, &[20, 22]), &[]).is_err());
    }

    #[test]
    fn payloads() {
        let padding = Provider::new(None, Item::Padding);
        assert_eq!(format(&padding, &[Some(7)]).unwrap().units(), 1);
        assert_eq!(format(&padding, &[Some(8)]).unwrap().units(), 0);

        let packed = Provider::new(
            None,
            Item::Payload(Payload::PackedSwitch {
                first_key: 0,
                targets: 3,
            }),
        );
        assert_eq!(format(&packed, &[]).unwrap().units(), 10);
        let sparse = Provider::new(
            None,
            Item::Payload(Payload::SparseSwitch { keys: vec![1, 5] }),
        );
        assert_eq!(format(&sparse, &[]).unwrap().units(), 10);
        let data = Provider::new(
            None,
            Item::Payload(Payload::FillArrayData {
                width: 1,
                data: vec![1, 2, 3],
            }),
        );
        assert_eq!(format(&data, &[]).unwrap().units(), 6);
        assert_eq!(Format::PackedSwitchPayload(2).units(), 8);
        assert_eq!(Format::SparseSwitchPayload(3).units(), 14);
        assert_eq!(Format::FillArrayDataPayload { width: 4, len: 3 }.units(), 10);
        assert_eq!(Format::FillArrayDataPayload { width: 1, len: 3 }.size(), 12);
    }
}
