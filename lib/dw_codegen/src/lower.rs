//! Lowering of typed register IR bodies to flat Dalvik instruction lists.
//!
//! Lowering solves register constraints, assigns register indices, maps every
//! instruction to its Dalvik opcode and computes code unit offsets. The result is
//! positionally concrete: every instruction has its address, format and bound
//! offsets, only the binary encoding is left out.

use crate::assign::{assign, RegisterIndices};
use crate::constraints::{typed, RegisterSolver};
use crate::errors::{CodegenError, CodegenResult};
use crate::format::{mnemonic, DalvikFormats, Format, FormatQuery, OpClass};
use crate::offsets::{CodeUnits, Item, Opcode, Payload, Provider};
use dw_ir::instrs::{escape, BinOp, Instr, UnOp};
use dw_ir::{Body, InsnId, Reg, Type};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A positioned Dalvik instruction (or payload pseudo-instruction).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoweredInstr {
    /// Address in code units.
    pub address: usize,
    pub mnemonic: String,
    pub format: Format,
    pub registers: Vec<u16>,
    pub literal: Option<i64>,
    pub reference: Option<String>,
    /// Resolved offsets in code units. Payload offsets are relative to the
    /// instruction referencing the payload.
    pub offsets: Vec<i32>,
    /// Keys of sparse switches, elements of array data.
    pub data: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoweredHandler {
    pub catch: Option<String>,
    pub address: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoweredTry {
    pub start: usize,
    /// Number of covered code units.
    pub count: usize,
    pub handlers: Vec<LoweredHandler>,
}

/// Lowered code of one method.
#[derive(Debug, Clone, Serialize)]
pub struct LoweredCode {
    pub method: String,
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    /// Size of the code in code units, payloads included.
    pub insns_size: usize,
    pub instructions: Vec<LoweredInstr>,
    pub tries: Vec<LoweredTry>,
}

impl fmt::Display for LoweredCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, ".method {}", self.method)?;
        writeln!(
            f,
            "    .registers {} (ins {}, outs {})",
            self.registers_size, self.ins_size, self.outs_size
        )?;
        for instr in &self.instructions {
            write!(f, "    {:04x}: {}", instr.address, instr.mnemonic)?;
            let mut operands: Vec<String> =
                instr.registers.iter().map(|r| format!("v{r}")).collect();
            if let Some(literal) = instr.literal {
                operands.push(literal.to_string());
            }
            if let Some(reference) = &instr.reference {
                operands.push(reference.clone());
            }
            if !instr.data.is_empty() {
                let data: Vec<String> = instr.data.iter().map(ToString::to_string).collect();
                operands.push(format!("{{{}}}", data.join(", ")));
            }
            for offset in &instr.offsets {
                operands.push(format!("{offset:+}"));
            }
            if !operands.is_empty() {
                write!(f, " {}", operands.join(", "))?;
            }
            writeln!(f)?;
        }
        for try_ in &self.tries {
            write!(
                f,
                "    .try {:04x}..{:04x}",
                try_.start,
                try_.start + try_.count
            )?;
            for handler in &try_.handlers {
                match &handler.catch {
                    Some(catch) => write!(f, " {catch} -> {:04x}", handler.address)?,
                    None => write!(f, " all -> {:04x}", handler.address)?,
                }
            }
            writeln!(f)?;
        }
        writeln!(f, ".end method")
    }
}

/// Lowers a typed body with the Dalvik formats.
pub fn lower(body: &mut Body) -> CodegenResult<LoweredCode> {
    lower_with(body, &DalvikFormats)
}

/// Lowers a typed body, querying instruction formats from `formats`.
///
/// The body is modified: constrained instructions may get fresh argument
/// registers, copied by moves inserted before them.
pub fn lower_with(body: &mut Body, formats: &dyn FormatQuery) -> CodegenResult<LoweredCode> {
    log::debug!("lowering {}", body.method());
    if body.is_empty() {
        return Err(CodegenError::Structure(format!(
            "{} has no instruction",
            body.method()
        )));
    }
    check_typed(body)?;

    let mut solver = RegisterSolver::new();
    solver.solve(body)?;
    let indices = assign(body, solver.ranges())?;
    log::debug!(
        "    ---- {} register word(s), {} range(s)",
        indices.registers_size(),
        solver.ranges().len()
    );

    let body: &Body = body;
    let mut code = CodeUnits::new();
    let mut positions = BTreeMap::new();
    let mut branches = Vec::new();
    let mut payloads = Vec::new();
    let mut outs = 0;
    for id in body.order() {
        let lowering = Lowering::new(body, &indices, &solver, *id)?;
        if let Instr::Invoke(..) = body.instr(*id)? {
            outs = usize::max(outs, lowering.opcode.regs.len());
        }
        let provider = code.push(Provider::new(Some(*id), Item::Instr(lowering.opcode)));
        positions.insert(*id, provider);
        for target in lowering.targets {
            branches.push((provider, target));
        }
        if let Some((payload, targets)) = lowering.payload {
            payloads.push((provider, *id, payload, targets));
        }
    }
    let code_end = code.len();

    let position = |id: &InsnId| {
        positions
            .get(id)
            .copied()
            .ok_or_else(|| CodegenError::Structure(format!("{id} is not part of the code")))
    };
    for (owner, target) in branches {
        code.add_cell(owner, owner, position(&target)?)?;
    }
    for (owner, id, payload, targets) in payloads {
        let padding = code.push(Provider::new(None, Item::Padding));
        code.add_cell(padding, 0, padding)?;
        let data = code.push(Provider::new(Some(id), Item::Payload(payload)));
        code.add_cell(owner, owner, data)?;
        for target in targets {
            code.add_cell(data, owner, position(&target)?)?;
        }
    }

    code.init_formats(formats)?;
    code.update_offsets(formats)?;

    let addresses = code.addresses();
    let insns_size = addresses
        .last()
        .zip(code.providers().last())
        .map_or(0, |(address, p)| address + p.format().units());
    let end_of_instructions = addresses.get(code_end).copied().unwrap_or(insns_size);

    let mut instructions = Vec::with_capacity(code.len());
    for (provider, address) in code.providers().iter().zip(&addresses) {
        let offsets = provider
            .cells()
            .iter()
            .map(|cell| {
                code.cells()[*cell]
                    .value
                    .ok_or_else(|| CodegenError::Structure(format!("unbound offset cell {cell}")))
            })
            .collect::<CodegenResult<Vec<i32>>>()?;
        let format = provider.format();
        let lowered = match provider.item() {
            Item::Instr(op) => LoweredInstr {
                address: *address,
                mnemonic: mnemonic(op, format),
                format,
                registers: op.regs.clone(),
                literal: op.literal,
                reference: op.reference.clone(),
                offsets,
                data: vec![],
            },
            Item::Padding if format.units() == 0 => continue,
            Item::Padding => LoweredInstr {
                address: *address,
                mnemonic: "nop".to_string(),
                format,
                registers: vec![],
                literal: None,
                reference: None,
                offsets: vec![],
                data: vec![],
            },
            Item::Payload(payload) => {
                let (name, literal, data) = match payload {
                    Payload::PackedSwitch { first_key, .. } => {
                        ("packed-switch-payload", Some(i64::from(*first_key)), vec![])
                    }
                    Payload::SparseSwitch { keys } => (
                        "sparse-switch-payload",
                        None,
                        keys.iter().map(|k| i64::from(*k)).collect(),
                    ),
                    Payload::FillArrayData { data, .. } => ("array-payload", None, data.clone()),
                };
                LoweredInstr {
                    address: *address,
                    mnemonic: name.to_string(),
                    format,
                    registers: vec![],
                    literal,
                    reference: None,
                    offsets,
                    data,
                }
            }
        };
        instructions.push(lowered);
    }

    let address_of = |id: &InsnId| position(id).map(|p| addresses[p]);
    let mut tries = Vec::with_capacity(body.tries().len());
    for block in body.tries() {
        let start = address_of(&block.start)?;
        let end = match &block.end {
            Some(end) => address_of(end)?,
            None => end_of_instructions,
        };
        let handlers = block
            .handlers
            .iter()
            .map(|h| {
                Ok(LoweredHandler {
                    catch: h.catch.as_ref().map(ToString::to_string),
                    address: address_of(&h.target)?,
                })
            })
            .collect::<CodegenResult<Vec<_>>>()?;
        tries.push(LoweredTry {
            start,
            count: end.saturating_sub(start),
            handlers,
        });
    }

    let outs_size = u16::try_from(outs).map_err(|_| CodegenError::TooManyRegisters(outs))?;
    log::debug!("    ---- {insns_size} code unit(s)");
    Ok(LoweredCode {
        method: body.method().to_string(),
        registers_size: indices.registers_size(),
        ins_size: indices.ins_size(),
        outs_size,
        insns_size,
        instructions,
        tries,
    })
}

fn check_typed(body: &Body) -> CodegenResult<()> {
    for (reg, _) in body.registers() {
        typed(body, reg)?;
    }
    for (id, instr) in body.instructions() {
        if instr.is_ambiguous() {
            return Err(CodegenError::Untyped(format!("{} at {id}", instr.mnemonic())));
        }
    }
    Ok(())
}

/// Opcode suffix of typed moves, returns and results.
fn kind_suffix(t: &Type) -> &'static str {
    if t.is_wide() {
        "-wide"
    } else if t.is_reference() {
        "-object"
    } else {
        ""
    }
}

/// Opcode suffix of array and field accesses.
fn access_suffix(t: &Type) -> &'static str {
    match t {
        Type::Boolean => "-boolean",
        Type::Byte => "-byte",
        Type::Char => "-char",
        Type::Short => "-short",
        t => kind_suffix(t),
    }
}

fn arithmetic_name(t: &Type) -> Option<&'static str> {
    match t {
        Type::Int => Some("int"),
        Type::Long => Some("long"),
        Type::Float => Some("float"),
        Type::Double => Some("double"),
        _ => None,
    }
}

fn element_width(t: &Type) -> Option<usize> {
    match t {
        Type::Boolean | Type::Byte => Some(1),
        Type::Char | Type::Short => Some(2),
        Type::Int | Type::Float => Some(4),
        Type::Long | Type::Double => Some(8),
        _ => None,
    }
}

/// Lowering of one instruction: its opcode, branch targets and payload.
struct Lowering {
    opcode: Opcode,
    targets: Vec<InsnId>,
    payload: Option<(Payload, Vec<InsnId>)>,
}

impl Lowering {
    fn new(
        body: &Body,
        indices: &RegisterIndices,
        solver: &RegisterSolver,
        id: InsnId,
    ) -> CodegenResult<Self> {
        let instr = body.instr(id)?;
        let no_opcode = || CodegenError::NoOpcode(format!("{} at {id}", instr.mnemonic()));
        let index = |reg: &Reg| indices.index(*reg);
        let all_indices = |regs: &[Reg]| {
            regs.iter()
                .map(index)
                .collect::<CodegenResult<Vec<u16>>>()
        };

        let mut targets = vec![];
        let mut payload = None;
        let mut literal = None;
        let mut reference = None;

        let (base, class, operands) = match instr {
            Instr::Nop => ("nop".to_string(), OpClass::NoOperand, vec![]),
            Instr::Const(t, dst, value) => {
                literal = Some(*value);
                if t.is_wide() {
                    ("const-wide".to_string(), OpClass::ConstWide, vec![*dst])
                } else {
                    ("const".to_string(), OpClass::Const, vec![*dst])
                }
            }
            Instr::ConstString(dst, s) => {
                reference = Some(format!("\"{}\"", escape(s)));
                ("const-string".to_string(), OpClass::RegRef, vec![*dst])
            }
            Instr::ConstClass(dst, t) => {
                reference = Some(t.to_string());
                ("const-class".to_string(), OpClass::RegRef, vec![*dst])
            }
            Instr::Move(t, dst, src) => (
                format!("move{}", kind_suffix(t)),
                OpClass::Move,
                vec![*dst, *src],
            ),
            Instr::MoveResult(dst) => (
                format!("move-result{}", kind_suffix(&typed(body, *dst)?)),
                OpClass::Single,
                vec![*dst],
            ),
            Instr::MoveException(dst) => {
                ("move-exception".to_string(), OpClass::Single, vec![*dst])
            }
            Instr::ReturnVoid => ("return-void".to_string(), OpClass::NoOperand, vec![]),
            Instr::Return(src) => {
                let ret = &body.method().return_type;
                if *ret == Type::Void {
                    return Err(no_opcode());
                }
                (format!("return{}", kind_suffix(ret)), OpClass::Single, vec![*src])
            }
            Instr::MonitorEnter(r) => ("monitor-enter".to_string(), OpClass::Single, vec![*r]),
            Instr::MonitorExit(r) => ("monitor-exit".to_string(), OpClass::Single, vec![*r]),
            Instr::Throw(r) => ("throw".to_string(), OpClass::Single, vec![*r]),
            Instr::CheckCast(r, t) => {
                reference = Some(t.to_string());
                ("check-cast".to_string(), OpClass::RegRef, vec![*r])
            }
            Instr::InstanceOf(dst, src, t) => {
                reference = Some(t.to_string());
                ("instance-of".to_string(), OpClass::RegRegRef, vec![*dst, *src])
            }
            Instr::ArrayLength(dst, src) => (
                "array-length".to_string(),
                OpClass::Unop,
                vec![*dst, *src],
            ),
            Instr::NewInstance(dst, t) => {
                reference = Some(t.to_string());
                ("new-instance".to_string(), OpClass::RegRef, vec![*dst])
            }
            Instr::NewArray(dst, size, t) => {
                reference = Some(t.to_string());
                ("new-array".to_string(), OpClass::RegRegRef, vec![*dst, *size])
            }
            Instr::FilledNewArray(args, t) => {
                reference = Some(t.to_string());
                let range = solver.is_range(id);
                ("filled-new-array".to_string(), OpClass::Call { range }, args.clone())
            }
            Instr::FillArrayData(arr, t, data) => {
                let width = element_width(t).ok_or_else(no_opcode)?;
                payload = Some((
                    Payload::FillArrayData {
                        width,
                        data: data.clone(),
                    },
                    vec![],
                ));
                ("fill-array-data".to_string(), OpClass::PayloadRef, vec![*arr])
            }
            Instr::Goto(target) => {
                targets.push(*target);
                ("goto".to_string(), OpClass::Goto, vec![])
            }
            Instr::If(comp, a, b, target) => {
                targets.push(*target);
                (format!("if-{}", comp.name()), OpClass::IfTest, vec![*a, *b])
            }
            Instr::IfZ(comp, r, target) => {
                targets.push(*target);
                (format!("if-{}z", comp.name()), OpClass::IfTestz, vec![*r])
            }
            Instr::PackedSwitch(r, first_key, cases) => {
                payload = Some((
                    Payload::PackedSwitch {
                        first_key: *first_key,
                        targets: cases.len(),
                    },
                    cases.clone(),
                ));
                ("packed-switch".to_string(), OpClass::PayloadRef, vec![*r])
            }
            Instr::SparseSwitch(r, cases) => {
                let mut cases = cases.clone();
                cases.sort_by_key(|(key, _)| *key);
                let (keys, cases): (Vec<i32>, Vec<InsnId>) = cases.into_iter().unzip();
                payload = Some((Payload::SparseSwitch { keys }, cases));
                ("sparse-switch".to_string(), OpClass::PayloadRef, vec![*r])
            }
            Instr::Cmp(kind, dst, a, b) => (
                kind.name().to_string(),
                OpClass::Triple,
                vec![*dst, *a, *b],
            ),
            Instr::Aget(t, dst, arr, idx) => (
                format!("aget{}", access_suffix(t)),
                OpClass::Triple,
                vec![*dst, *arr, *idx],
            ),
            Instr::Aput(t, val, arr, idx) => (
                format!("aput{}", access_suffix(t)),
                OpClass::Triple,
                vec![*val, *arr, *idx],
            ),
            Instr::Iget(dst, obj, field) => {
                reference = Some(field.to_string());
                (
                    format!("iget{}", access_suffix(&field.type_)),
                    OpClass::RegRegRef,
                    vec![*dst, *obj],
                )
            }
            Instr::Iput(val, obj, field) => {
                reference = Some(field.to_string());
                (
                    format!("iput{}", access_suffix(&field.type_)),
                    OpClass::RegRegRef,
                    vec![*val, *obj],
                )
            }
            Instr::Sget(dst, field) => {
                reference = Some(field.to_string());
                (
                    format!("sget{}", access_suffix(&field.type_)),
                    OpClass::RegRef,
                    vec![*dst],
                )
            }
            Instr::Sput(val, field) => {
                reference = Some(field.to_string());
                (
                    format!("sput{}", access_suffix(&field.type_)),
                    OpClass::RegRef,
                    vec![*val],
                )
            }
            Instr::Invoke(kind, args, method) => {
                reference = Some(method.to_string());
                let range = solver.is_range(id);
                (kind.name().to_string(), OpClass::Call { range }, args.clone())
            }
            Instr::Unary(op, t, dst, src) => {
                let name = arithmetic_name(t).ok_or_else(no_opcode)?;
                if *op == UnOp::Not && !matches!(t, Type::Int | Type::Long) {
                    return Err(no_opcode());
                }
                (format!("{}-{name}", op.name()), OpClass::Unop, vec![*dst, *src])
            }
            Instr::Convert(from, to, dst, src) => {
                let valid = match (from, to) {
                    (Type::Int, Type::Byte | Type::Char | Type::Short) => true,
                    (from, to) => {
                        from != to
                            && arithmetic_name(from).is_some()
                            && arithmetic_name(to).is_some()
                    }
                };
                if !valid {
                    return Err(no_opcode());
                }
                (
                    format!("{}-to-{}", from.to_java_string(), to.to_java_string()),
                    OpClass::Unop,
                    vec![*dst, *src],
                )
            }
            Instr::Binary(op, t, dst, a, b) => {
                let name = arithmetic_name(t).ok_or_else(no_opcode)?;
                let bitwise = !matches!(
                    op,
                    BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem
                );
                if bitwise && !matches!(t, Type::Int | Type::Long) {
                    return Err(no_opcode());
                }
                (format!("{}-{name}", op.name()), OpClass::Binop, vec![*dst, *a, *b])
            }
            Instr::BinaryLit(op, dst, src, value) => {
                literal = Some(i64::from(*value));
                let base = match op {
                    BinOp::Sub => "rsub-int".to_string(),
                    op => format!("{}-int", op.name()),
                };
                (
                    base,
                    OpClass::BinopLit {
                        shift: op.is_shift(),
                    },
                    vec![*dst, *src],
                )
            }
        };

        let regs = match class {
            // register pairs of wide arguments take two words
            OpClass::Call { .. } => {
                let mut words = Vec::with_capacity(operands.len());
                for reg in &operands {
                    let first = index(reg)?;
                    words.push(first);
                    if typed(body, *reg)?.is_wide() {
                        words.push(first + 1);
                    }
                }
                words
            }
            _ => all_indices(&operands)?,
        };
        log::trace!("    {id}: {base} {regs:?}");

        Ok(Self {
            opcode: Opcode {
                id,
                base,
                class,
                regs,
                literal,
                reference,
            },
            targets,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lowered(text: &str) -> LoweredCode {
        let mut body = dw_ir::parse(text).unwrap().remove(0);
        dw_analysis::retype(&mut body).unwrap();
        lower(&mut body).unwrap()
    }

    fn mnemonics(code: &LoweredCode) -> Vec<&str> {
        code.instructions
            .iter()
            .map(|i| i.mnemonic.as_str())
            .collect()
    }

    #[test]
    fn constant_return() {
        let code = lowered(
            r#"
.method static La;->f()I
    const:?32 a, 1
    return a
.end method
"#,
        );
        assert_eq!(mnemonics(&code), vec!["const/4", "return"]);
        assert_eq!(code.instructions[0].registers, vec![0]);
        assert_eq!(code.instructions[0].literal, Some(1));
        assert_eq!(code.instructions[1].address, 1);
        assert_eq!(code.registers_size, 1);
        assert_eq!(code.ins_size, 0);
        assert_eq!(code.outs_size, 0);
        assert_eq!(code.insns_size, 2);
    }

    #[test]
    fn backward_branch() {
        let code = lowered(
            r#"
.method static La;->f(I)I
    const:?0 i, 0
:loop
    add-lit i, i, 1
    if-lt i, p0, :loop
    return i
.end method
"#,
        );
        assert_eq!(
            mnemonics(&code),
            vec!["const/4", "add-int/lit8", "if-lt", "return"]
        );
        let branch = &code.instructions[2];
        assert_eq!(branch.address, 3);
        assert_eq!(branch.registers, vec![0, 1]);
        assert_eq!(branch.offsets, vec![-2]);
        assert_eq!(code.registers_size, 2);
        assert_eq!(code.ins_size, 1);
        assert_eq!(code.insns_size, 6);
    }

    #[test]
    fn switch_payload() {
        let code = lowered(
            r#"
.method static La;->f(I)I
    packed-switch p0, 1, {:a, :b}
    const:?32 r, 0
    return r
:a
    const:?32 r, 1
    return r
:b
    const:?32 r, 2
    return r
.end method
"#,
        );
        assert_eq!(
            mnemonics(&code),
            vec![
                "packed-switch",
                "const/4",
                "return",
                "const/4",
                "return",
                "const/4",
                "return",
                "nop",
                "packed-switch-payload"
            ]
        );
        assert_eq!(code.instructions[0].offsets, vec![10]);
        let payload = &code.instructions[8];
        assert_eq!(payload.address, 10);
        assert_eq!(payload.literal, Some(1));
        assert_eq!(payload.offsets, vec![5, 7]);
        assert_eq!(code.insns_size, 18);
    }

    #[test]
    fn sparse_keys_sorted() {
        let code = lowered(
            r#"
.method static La;->f(I)V
    sparse-switch p0, {9 -> :a, -3 -> :b}
:b
    return-void
:a
    return-void
.end method
"#,
        );
        let payload = code.instructions.last().unwrap();
        assert_eq!(payload.mnemonic, "sparse-switch-payload");
        assert_eq!(payload.data, vec![-3, 9]);
        assert_eq!(payload.offsets, vec![3, 4]);
        assert_eq!(payload.address % 2, 0);
    }

    #[test]
    fn range_invoke() {
        let code = lowered(
            r#"
.method static La;->f()V
    const:?32 a, 1
    const:?32 b, 2
    const:?32 c, 3
    const:?32 d, 4
    const:?32 e, 5
    const:?32 f, 6
    invoke-static {a, b, c, d, e, f}, La;->g(IIIIII)V
    return-void
.end method
"#,
        );
        let invoke = &code.instructions[6];
        assert_eq!(invoke.mnemonic, "invoke-static/range");
        assert_eq!(invoke.format, Format::F3rc);
        assert_eq!(invoke.registers, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(invoke.reference.as_deref(), Some("La;->g(IIIIII)V"));
        assert_eq!(code.outs_size, 6);
        assert_eq!(code.registers_size, 6);
    }

    #[test]
    fn wide_arithmetic() {
        let code = lowered(
            r#"
.method static La;->f(J)J
    const:?64 a, 3
    add:J a, a, p0
    return a
.end method
"#,
        );
        assert_eq!(
            mnemonics(&code),
            vec!["const-wide/16", "add-long/2addr", "return-wide"]
        );
        assert_eq!(code.instructions[1].registers, vec![0, 0, 2]);
        assert_eq!(code.registers_size, 4);
        assert_eq!(code.ins_size, 2);
    }

    #[test]
    fn lowered_tries() {
        let code = lowered(
            r#"
.method static La;->f()V
:start
    const-string s, "x"
:end
    return-void
:handler
    move-exception e
    throw e
    .catch Ljava/lang/Exception; {:start .. :end} :handler
.end method
"#,
        );
        assert_eq!(
            code.tries,
            vec![LoweredTry {
                start: 0,
                count: 2,
                handlers: vec![LoweredHandler {
                    catch: Some("Ljava/lang/Exception;".to_string()),
                    address: 3,
                }],
            }]
        );
        assert_eq!(code.instructions[0].reference.as_deref(), Some("\"x\""));
    }

    #[test]
    fn untyped_body() {
        let mut body = dw_ir::parse(
            ".method static La;->f()V\n    const:?32 a, 1\n    return-void\n.end method\n",
        )
        .unwrap()
        .remove(0);
        assert!(matches!(lower(&mut body), Err(CodegenError::Untyped(_))));
    }

    #[test]
    fn invalid_conversion() {
        let mut body = dw_ir::parse(
            r#"
.method static La;->f(J)V
    convert:J:B b, p0
    return-void
.end method
"#,
        )
        .unwrap()
        .remove(0);
        dw_analysis::retype(&mut body).unwrap();
        assert!(matches!(lower(&mut body), Err(CodegenError::NoOpcode(_))));
    }
}
