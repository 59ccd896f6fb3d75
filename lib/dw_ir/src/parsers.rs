//! Textual register IR reader.
//!
//! The syntax is close to smali: one `.method` block per body, one instruction per
//! line, labels on their own lines. Instructions carrying types have them appended to
//! their mnemonic after colons (`const:?32 v0, 4`, `convert:I:J v0, v1`).

use crate::body::{Body, InsnId};
use crate::errors::{IrError, IrResult};
use crate::instrs::{BinOp, CmpKind, Comp, Instr, InvokeKind, UnOp};
use crate::registers::Reg;
use crate::types::{FieldRef, MethodRef, Type};
use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, tag, take_while1};
use nom::character::complete::{char, digit1, hex_digit1, none_of, space0, space1};
use nom::combinator::{all_consuming, map, map_res, opt, value};
use nom::multi::separated_list0;
use nom::sequence::{delimited, pair, preceded, separated_pair, tuple};
use nom::{Finish, IResult};
use std::collections::BTreeMap;
use std::convert::TryFrom;

#[derive(Debug, Clone, PartialEq)]
enum Operand<'a> {
    Int(i64),
    Str(String),
    Label(&'a str),
    Case(i64, &'a str),
    List(Vec<Operand<'a>>),
    Word(&'a str),
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && c != ',' && c != '{' && c != '}'
}

fn comma(input: &str) -> IResult<&str, char> {
    delimited(space0, char(','), space0)(input)
}

fn word(input: &str) -> IResult<&str, &str> {
    take_while1(is_word_char)(input)
}

fn label(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), word)(input)
}

fn integer(input: &str) -> IResult<&str, i64> {
    let (input, neg) = opt(char('-'))(input)?;
    let (input, value) = alt((
        map_res(
            preceded(alt((tag("0x"), tag("0X"))), hex_digit1),
            |s: &str| u64::from_str_radix(s, 16).map(|v| v as i64),
        ),
        map_res(digit1, |s: &str| s.parse::<i64>()),
    ))(input)?;
    Ok((input, if neg.is_some() { value.wrapping_neg() } else { value }))
}

fn string_literal(input: &str) -> IResult<&str, String> {
    let escapes = alt((
        value("\\", char('\\')),
        value("\"", char('"')),
        value("\n", char('n')),
        value("\r", char('r')),
        value("\t", char('t')),
    ));
    let content = escaped_transform(none_of("\\\""), '\\', escapes);
    delimited(char('"'), map(opt(content), Option::unwrap_or_default), char('"'))(input)
}

fn operand(input: &str) -> IResult<&str, Operand> {
    alt((
        map(
            delimited(
                pair(char('{'), space0),
                separated_list0(comma, operand),
                pair(space0, char('}')),
            ),
            Operand::List,
        ),
        map(string_literal, Operand::Str),
        map(label, Operand::Label),
        map(
            separated_pair(integer, tuple((space0, tag("->"), space0)), label),
            |(key, target)| Operand::Case(key, target),
        ),
        map(integer, Operand::Int),
        map(word, Operand::Word),
    ))(input)
}

fn instruction_line(input: &str) -> IResult<&str, (&str, Vec<Operand>)> {
    let (input, mnemonic) = word(input)?;
    let (input, operands) = opt(preceded(space1, separated_list0(comma, operand)))(input)?;
    let (input, _) = space0(input)?;
    Ok((input, (mnemonic, operands.unwrap_or_default())))
}

fn method_header(input: &str) -> IResult<&str, (bool, &str)> {
    let (input, _) = pair(tag(".method"), space1)(input)?;
    let (input, is_static) = opt(pair(tag("static"), space1))(input)?;
    let (input, method) = word(input)?;
    let (input, _) = space0(input)?;
    Ok((input, (is_static.is_some(), method)))
}

/// `.catch Ljava/lang/Exception; {:start .. :end} :handler`, `.catchall {...} :handler`
fn catch_directive(input: &str) -> IResult<&str, (Option<&str>, &str, &str, &str)> {
    let (input, catch) = alt((
        map(tag(".catchall"), |_| None),
        map(preceded(pair(tag(".catch"), space1), word), |t| {
            if t == "all" {
                None
            } else {
                Some(t)
            }
        }),
    ))(input)?;
    let (input, _) = space1(input)?;
    let (input, (start, end)) = delimited(
        pair(char('{'), space0),
        separated_pair(label, tuple((space1, tag(".."), space1)), label),
        pair(space0, char('}')),
    )(input)?;
    let (input, _) = space1(input)?;
    let (input, handler) = label(input)?;
    let (input, _) = space0(input)?;
    Ok((input, (catch, start, end, handler)))
}

fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => (),
        }
    }
    line
}

/// Operands cursor, converting raw operands on demand.
struct Operands<'a, 'b> {
    operands: Vec<Operand<'a>>,
    pos: usize,
    labels: &'b BTreeMap<String, Option<InsnId>>,
}

impl<'a, 'b> Operands<'a, 'b> {
    fn next(&mut self) -> Result<Operand<'a>, String> {
        let op = self
            .operands
            .get(self.pos)
            .cloned()
            .ok_or_else(|| format!("missing operand #{}", self.pos + 1))?;
        self.pos += 1;
        Ok(op)
    }

    fn reg(&mut self, body: &mut Body) -> Result<Reg, String> {
        match self.next()? {
            Operand::Word(name) => Ok(body.declare_reg(name)),
            op => Err(format!("expected a register, found {op:?}")),
        }
    }

    fn regs(&mut self, body: &mut Body) -> Result<Vec<Reg>, String> {
        match self.next()? {
            Operand::List(items) => items
                .into_iter()
                .map(|item| match item {
                    Operand::Word(name) => Ok(body.declare_reg(name)),
                    op => Err(format!("expected a register, found {op:?}")),
                })
                .collect(),
            op => Err(format!("expected a register list, found {op:?}")),
        }
    }

    fn word(&mut self) -> Result<&'a str, String> {
        match self.next()? {
            Operand::Word(w) => Ok(w),
            op => Err(format!("expected a word, found {op:?}")),
        }
    }

    fn type_(&mut self) -> Result<Type, String> {
        let w = self.word()?;
        Type::try_from(w).map_err(|e| e.to_string())
    }

    fn field(&mut self) -> Result<FieldRef, String> {
        let w = self.word()?;
        FieldRef::try_from(w).map_err(|e| e.to_string())
    }

    fn method(&mut self) -> Result<MethodRef, String> {
        let w = self.word()?;
        MethodRef::try_from(w).map_err(|e| e.to_string())
    }

    fn int(&mut self) -> Result<i64, String> {
        match self.next()? {
            Operand::Int(i) => Ok(i),
            op => Err(format!("expected an integer, found {op:?}")),
        }
    }

    fn int32(&mut self) -> Result<i32, String> {
        let i = self.int()?;
        i32::try_from(i).map_err(|_| format!("literal {i} does not fit in 32 bits"))
    }

    fn resolve(&self, name: &str) -> Result<InsnId, String> {
        match self.labels.get(name) {
            Some(Some(id)) => Ok(*id),
            Some(None) => Err(format!("label :{name} does not precede any instruction")),
            None => Err(IrError::UnknownLabel(name.to_string()).to_string()),
        }
    }

    fn label(&mut self) -> Result<InsnId, String> {
        match self.next()? {
            Operand::Label(name) => self.resolve(name),
            op => Err(format!("expected a label, found {op:?}")),
        }
    }

    fn labels(&mut self) -> Result<Vec<InsnId>, String> {
        match self.next()? {
            Operand::List(items) => items
                .into_iter()
                .map(|item| match item {
                    Operand::Label(name) => self.resolve(name),
                    op => Err(format!("expected a label, found {op:?}")),
                })
                .collect(),
            op => Err(format!("expected a label list, found {op:?}")),
        }
    }

    fn ints(&mut self) -> Result<Vec<i64>, String> {
        match self.next()? {
            Operand::List(items) => items
                .into_iter()
                .map(|item| match item {
                    Operand::Int(i) => Ok(i),
                    op => Err(format!("expected an integer, found {op:?}")),
                })
                .collect(),
            op => Err(format!("expected an integer list, found {op:?}")),
        }
    }

    fn cases(&mut self) -> Result<Vec<(i32, InsnId)>, String> {
        match self.next()? {
            Operand::List(items) => items
                .into_iter()
                .map(|item| match item {
                    Operand::Case(key, name) => {
                        let key = i32::try_from(key)
                            .map_err(|_| format!("switch key {key} does not fit in 32 bits"))?;
                        Ok((key, self.resolve(name)?))
                    }
                    op => Err(format!("expected a switch case, found {op:?}")),
                })
                .collect(),
            op => Err(format!("expected a switch case list, found {op:?}")),
        }
    }

    fn end(&self) -> Result<(), String> {
        if self.pos == self.operands.len() {
            Ok(())
        } else {
            Err(format!(
                "{} unexpected trailing operand(s)",
                self.operands.len() - self.pos
            ))
        }
    }
}

fn typed(types: &[Type], n: usize, mnemonic: &str) -> Result<(), String> {
    if types.len() == n {
        Ok(())
    } else {
        Err(format!(
            "{mnemonic} expects {n} type annotation(s), found {}",
            types.len()
        ))
    }
}

fn build_instr(
    body: &mut Body,
    mnemonic: &str,
    operands: &mut Operands,
) -> Result<Instr, String> {
    let mut parts = mnemonic.split(':');
    let base = parts.next().unwrap_or_default();
    let types = parts
        .map(|t| Type::try_from(t).map_err(|e| e.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    let ty = |i: usize| types[i].clone();

    let instr = match base {
        "nop" | "return-void" => {
            typed(&types, 0, base)?;
            if base == "nop" {
                Instr::Nop
            } else {
                Instr::ReturnVoid
            }
        }
        "const" => {
            typed(&types, 1, base)?;
            Instr::Const(ty(0), operands.reg(body)?, operands.int()?)
        }
        "const-string" => Instr::ConstString(operands.reg(body)?, {
            match operands.next()? {
                Operand::Str(s) => s,
                op => return Err(format!("expected a string, found {op:?}")),
            }
        }),
        "const-class" => Instr::ConstClass(operands.reg(body)?, operands.type_()?),
        "move" => {
            typed(&types, 1, base)?;
            Instr::Move(ty(0), operands.reg(body)?, operands.reg(body)?)
        }
        "move-result" => Instr::MoveResult(operands.reg(body)?),
        "move-exception" => Instr::MoveException(operands.reg(body)?),
        "return" => Instr::Return(operands.reg(body)?),
        "monitor-enter" => Instr::MonitorEnter(operands.reg(body)?),
        "monitor-exit" => Instr::MonitorExit(operands.reg(body)?),
        "throw" => Instr::Throw(operands.reg(body)?),
        "check-cast" => Instr::CheckCast(operands.reg(body)?, operands.type_()?),
        "new-instance" => Instr::NewInstance(operands.reg(body)?, operands.type_()?),
        "instance-of" => Instr::InstanceOf(
            operands.reg(body)?,
            operands.reg(body)?,
            operands.type_()?,
        ),
        "new-array" => Instr::NewArray(operands.reg(body)?, operands.reg(body)?, operands.type_()?),
        "array-length" => Instr::ArrayLength(operands.reg(body)?, operands.reg(body)?),
        "filled-new-array" => Instr::FilledNewArray(operands.regs(body)?, operands.type_()?),
        "fill-array-data" => {
            typed(&types, 1, base)?;
            Instr::FillArrayData(operands.reg(body)?, ty(0), operands.ints()?)
        }
        "goto" => Instr::Goto(operands.label()?),
        "packed-switch" => Instr::PackedSwitch(
            operands.reg(body)?,
            operands.int32()?,
            operands.labels()?,
        ),
        "sparse-switch" => Instr::SparseSwitch(operands.reg(body)?, operands.cases()?),
        "aget" | "aput" => {
            typed(&types, 1, base)?;
            let (a, b, c) = (operands.reg(body)?, operands.reg(body)?, operands.reg(body)?);
            if base == "aget" {
                Instr::Aget(ty(0), a, b, c)
            } else {
                Instr::Aput(ty(0), a, b, c)
            }
        }
        "iget" => Instr::Iget(operands.reg(body)?, operands.reg(body)?, operands.field()?),
        "iput" => Instr::Iput(operands.reg(body)?, operands.reg(body)?, operands.field()?),
        "sget" => Instr::Sget(operands.reg(body)?, operands.field()?),
        "sput" => Instr::Sput(operands.reg(body)?, operands.field()?),
        "neg" | "not" => {
            typed(&types, 1, base)?;
            let op = if base == "neg" { UnOp::Neg } else { UnOp::Not };
            Instr::Unary(op, ty(0), operands.reg(body)?, operands.reg(body)?)
        }
        "convert" => {
            typed(&types, 2, base)?;
            Instr::Convert(ty(0), ty(1), operands.reg(body)?, operands.reg(body)?)
        }
        _ => {
            if let Some(kind) = InvokeKind::ALL.iter().find(|k| k.name() == base) {
                Instr::Invoke(*kind, operands.regs(body)?, operands.method()?)
            } else if let Some(kind) = CmpKind::ALL.iter().find(|k| k.name() == base) {
                Instr::Cmp(
                    *kind,
                    operands.reg(body)?,
                    operands.reg(body)?,
                    operands.reg(body)?,
                )
            } else if let Some(op) = BinOp::ALL.iter().find(|op| op.name() == base) {
                typed(&types, 1, base)?;
                Instr::Binary(
                    *op,
                    ty(0),
                    operands.reg(body)?,
                    operands.reg(body)?,
                    operands.reg(body)?,
                )
            } else if let Some(op) = BinOp::ALL
                .iter()
                .find(|op| base.strip_suffix("-lit") == Some(op.name()))
            {
                Instr::BinaryLit(*op, operands.reg(body)?, operands.reg(body)?, operands.int32()?)
            } else if let Some(comp) = base.strip_prefix("if-") {
                if let Some(c) = Comp::ALL.iter().find(|c| c.name() == comp) {
                    Instr::If(*c, operands.reg(body)?, operands.reg(body)?, operands.label()?)
                } else if let Some(c) = Comp::ALL
                    .iter()
                    .find(|c| comp.strip_suffix('z') == Some(c.name()))
                {
                    Instr::IfZ(*c, operands.reg(body)?, operands.label()?)
                } else {
                    return Err(format!("unknown mnemonic {base}"));
                }
            } else {
                return Err(format!("unknown mnemonic {base}"));
            }
        }
    };
    operands.end()?;
    Ok(instr)
}

/// A method being read: instructions are first collected as placeholders so that
/// forward labels can be resolved.
struct MethodBuilder<'a> {
    body: Body,
    labels: BTreeMap<String, Option<InsnId>>,
    pending: Vec<&'a str>,
    lines: Vec<(usize, InsnId, &'a str)>,
    catches: Vec<(usize, &'a str)>,
}

impl<'a> MethodBuilder<'a> {
    fn new(line_no: usize, line: &str) -> IrResult<Self> {
        let (_, (is_static, method)) = all_consuming(method_header)(line)
            .finish()
            .map_err(|e| IrError::parsing(line_no, e.to_string()))?;
        let method = MethodRef::try_from(method)?;
        Ok(Self {
            body: Body::new(method, is_static),
            labels: BTreeMap::new(),
            pending: Vec::new(),
            lines: Vec::new(),
            catches: Vec::new(),
        })
    }

    fn label(&mut self, line_no: usize, name: &'a str) -> IrResult<()> {
        if self.labels.contains_key(name) || self.pending.contains(&name) {
            return Err(IrError::parsing(line_no, format!("duplicate label :{name}")));
        }
        self.pending.push(name);
        Ok(())
    }

    fn registers(&mut self, line_no: usize, decls: &str) -> IrResult<()> {
        for decl in decls.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            let (name, t) = match decl.split_once(':') {
                Some((name, t)) => (name, Some(Type::try_from(t)?)),
                None => (decl, None),
            };
            if name.is_empty() || !name.chars().all(is_word_char) {
                return Err(IrError::parsing(line_no, format!("bad register name {name:?}")));
            }
            let reg = self.body.declare_reg(name);
            if let Some(t) = t {
                self.body.reg_mut(reg)?.set_type(t);
            }
        }
        Ok(())
    }

    fn instruction(&mut self, line_no: usize, line: &'a str) {
        let id = self.body.push(Instr::Nop);
        for name in self.pending.drain(..) {
            self.labels.insert(name.to_string(), Some(id));
        }
        self.lines.push((line_no, id, line));
    }

    fn finish(mut self) -> IrResult<Body> {
        for name in self.pending.drain(..) {
            self.labels.insert(name.to_string(), None);
        }

        for (line_no, id, line) in std::mem::take(&mut self.lines) {
            let (_, (mnemonic, operands)) = all_consuming(instruction_line)(line)
                .finish()
                .map_err(|e| IrError::parsing(line_no, e.to_string()))?;
            let mut operands = Operands {
                operands,
                pos: 0,
                labels: &self.labels,
            };
            let instr = build_instr(&mut self.body, mnemonic, &mut operands)
                .map_err(|msg| IrError::parsing(line_no, msg))?;
            self.body.replace(id, instr)?;
        }

        for (line_no, line) in std::mem::take(&mut self.catches) {
            let (_, (catch, start, end, handler)) = all_consuming(catch_directive)(line)
                .finish()
                .map_err(|e| IrError::parsing(line_no, e.to_string()))?;
            let lookup = |name: &str| {
                self.labels
                    .get(name)
                    .copied()
                    .ok_or_else(|| IrError::UnknownLabel(name.to_string()))
            };
            let start = lookup(start)?
                .ok_or_else(|| IrError::parsing(line_no, "try block starts after the end"))?;
            let end = lookup(end)?;
            let handler = lookup(handler)?
                .ok_or_else(|| IrError::parsing(line_no, "handler after the end"))?;
            let catch = catch.map(Type::try_from).transpose()?;
            self.body.add_try(start, end, catch, handler)?;
        }

        log::trace!(
            "read method {} ({} instructions)",
            self.body.method(),
            self.body.len()
        );
        Ok(self.body)
    }
}

/// Reads every method body of a textual register IR listing.
pub fn parse(input: &str) -> IrResult<Vec<Body>> {
    let mut bodies = Vec::new();
    let mut current: Option<MethodBuilder> = None;

    for (i, raw) in input.lines().enumerate() {
        let line_no = i + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if line == ".end method" {
            match current.take() {
                Some(builder) => bodies.push(builder.finish()?),
                None => return Err(IrError::parsing(line_no, "unexpected .end method")),
            }
            continue;
        }

        match current.as_mut() {
            None => {
                if line.starts_with(".method") {
                    current = Some(MethodBuilder::new(line_no, line)?);
                } else {
                    return Err(IrError::parsing(line_no, "expected .method"));
                }
            }
            Some(builder) => {
                if let Some(decls) = line.strip_prefix(".registers") {
                    builder.registers(line_no, decls)?;
                } else if line.starts_with(".catch") {
                    builder.catches.push((line_no, line));
                } else if line.starts_with('.') {
                    return Err(IrError::parsing(line_no, format!("unknown directive {line}")));
                } else if let Some(name) = line.strip_prefix(':') {
                    if name.is_empty() || !name.chars().all(is_word_char) {
                        return Err(IrError::parsing(line_no, format!("bad label {line}")));
                    }
                    builder.label(line_no, name)?;
                } else {
                    builder.instruction(line_no, line);
                }
            }
        }
    }

    if current.is_some() {
        return Err(IrError::parsing(
            input.lines().count(),
            "missing .end method",
        ));
    }
    Ok(bodies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operands() {
        assert_eq!(integer("-0x10"), Ok(("", -16)));
        assert_eq!(integer("42,"), Ok((",", 42)));
        assert_eq!(
            string_literal(r#""a\"b\n" x"#),
            Ok((" x", "a\"b\n".to_string()))
        );
        assert_eq!(string_literal(r#""""#), Ok(("", String::new())));
        assert_eq!(
            operand("{1 -> :a, 2 -> :b}"),
            Ok((
                "",
                Operand::List(vec![Operand::Case(1, "a"), Operand::Case(2, "b")])
            ))
        );
        assert_eq!(
            strip_comment(r##"const-string v0, "#x" # comment"##),
            r##"const-string v0, "#x" "##
        );
    }

    #[test]
    fn method() {
        let bodies = parse(
            r#"
# an example
.method static Lcom/example/Foo;->fill(I)V
    .registers size:I
    const:?32 size, 4
    new-array arr, size, [I
    const:?0 idx, 0
:loop
    aput:?32 p0, arr, idx
    add-lit idx, idx, 1
    if-lt idx, size, :loop
    return-void
.end method
"#,
        )
        .unwrap();
        assert_eq!(bodies.len(), 1);
        let body = &bodies[0];
        assert!(body.is_static());
        assert_eq!(body.len(), 7);
        let size = body.reg_by_name("size").unwrap();
        assert_eq!(body.reg(size).unwrap().type_(), Some(&Type::Int));

        let aput = body.order()[3];
        let branch = body.instr(body.order()[5]).unwrap();
        assert_eq!(branch.targets(), vec![aput]);
        assert!(body.instr(aput).unwrap().is_ambiguous());
    }

    #[test]
    fn roundtrip_with_tries() {
        let text = r#"
.method Lcom/example/Foo;->run()V
:start
    invoke-virtual {this}, Lcom/example/Foo;->work()V
:stop
    return-void
:handler
    move-exception e
    sparse-switch x, {1 -> :start, 7 -> :stop}
    throw e
    .catch Ljava/io/IOException; {:start .. :stop} :handler
    .catchall {:start .. :stop} :handler
.end method
"#;
        let body = parse(text).unwrap().remove(0);
        assert_eq!(body.tries().len(), 1);
        assert_eq!(body.tries()[0].handlers.len(), 2);
        assert_eq!(body.tries()[0].handlers[1].catch, None);

        let printed = body.to_string();
        let again = parse(&printed).unwrap().remove(0);
        assert_eq!(again.to_string(), printed);
        assert_eq!(again.len(), body.len());
    }

    #[test]
    fn errors() {
        let res = parse(".method static La;->f()V\n    goto :nowhere\n.end method\n");
        assert!(matches!(res, Err(IrError::Parsing { line: 2, .. })));
        let res = parse(".method static La;->f()V\n    frobnicate v0\n.end method\n");
        assert!(matches!(res, Err(IrError::Parsing { line: 2, .. })));
        let res = parse(".method static La;->f()V\n    const:?32 v0, 1\n");
        assert!(matches!(res, Err(IrError::Parsing { .. })));
        let res = parse(".method static La;->f()V\n    add:I v0, v1\n.end method\n");
        assert!(matches!(res, Err(IrError::Parsing { line: 2, .. })));
    }
}
