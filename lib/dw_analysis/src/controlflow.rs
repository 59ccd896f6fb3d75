//! Control flow graph representation.
//!
//! Nodes are single instructions: the typing pass propagates register accesses
//! instruction per instruction, and instruction handles stay stable while the body is
//! rewritten.

use crate::errors::{AnalysisError, AnalysisResult};
use dw_ir::instrs::Instr;
use dw_ir::{Body, InsnId, PrettyPrinter, Type};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq)]
pub enum Branch {
    IfTrue,
    IfFalse,
    Switch(i32),
    SwitchDefault,
    Jmp,
    Sequence,
    Catch(Type),
    CatchAll,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::IfTrue => write!(f, "<true>"),
            Self::IfFalse => write!(f, "<false>"),
            Self::Switch(key) => write!(f, "<switch {key}>"),
            Self::SwitchDefault => write!(f, "<switch _>"),
            Self::Jmp => write!(f, "<jmp>"),
            Self::Sequence => write!(f, "<seq>"),
            Self::Catch(typ) => write!(f, "<catch {typ}>"),
            Self::CatchAll => write!(f, "<catch *>"),
        }
    }
}

impl Branch {
    /// Checks if the branch is taken when the source instruction throws, in which
    /// case the source instruction did not write its destination register.
    #[inline]
    #[must_use]
    pub const fn is_exceptional(&self) -> bool {
        matches!(self, Self::Catch(_) | Self::CatchAll)
    }
}

#[derive(Debug)]
pub struct Cfg {
    pub(crate) inner: DiGraph<InsnId, Branch>,
    node_ids: BTreeMap<InsnId, NodeIndex>,
    entry: Option<InsnId>,
}

impl Cfg {
    pub fn build(body: &Body) -> AnalysisResult<Self> {
        let mut cfgraph = DiGraph::new();
        let mut node_ids = BTreeMap::new();
        let mut positions = BTreeMap::new();
        for (pos, id) in body.order().iter().enumerate() {
            node_ids.insert(*id, cfgraph.add_node(*id));
            positions.insert(*id, pos);
        }

        // try blocks as ranges of textual positions
        let mut ranges = Vec::new();
        for block in body.tries() {
            let start = positions[&block.start];
            let end = match block.end {
                Some(end) => positions[&end],
                None => body.len(),
            };
            ranges.push((start, end, &block.handlers));
        }

        for (pos, (id, instr)) in body.instructions().enumerate() {
            let next = body.order().get(pos + 1).copied();
            let mut edges = instruction_branching(id, instr, next)?;
            if instr.can_throw() {
                for (start, end, handlers) in &ranges {
                    if *start <= pos && pos < *end {
                        for handler in handlers.iter() {
                            let branch = match &handler.catch {
                                Some(t) => Branch::Catch(t.clone()),
                                None => Branch::CatchAll,
                            };
                            edges.push((branch, handler.target));
                        }
                    }
                }
            }

            let src = node_ids[&id];
            for (branch, dst) in edges {
                let dst = node_ids
                    .get(&dst)
                    .ok_or(AnalysisError::InstructionNotFound(dst))?;
                cfgraph.add_edge(src, *dst, branch);
            }
        }

        log::trace!(
            "control flow graph: {} nodes, {} edges",
            cfgraph.node_count(),
            cfgraph.edge_count()
        );

        Ok(Self {
            inner: cfgraph,
            node_ids,
            entry: body.entry(),
        })
    }

    #[inline]
    #[must_use]
    pub const fn entry(&self) -> Option<InsnId> {
        self.entry
    }

    fn node(&self, id: InsnId) -> AnalysisResult<NodeIndex> {
        self.node_ids
            .get(&id)
            .copied()
            .ok_or(AnalysisError::InstructionNotFound(id))
    }

    fn neighbors(&self, id: InsnId, dir: Direction) -> AnalysisResult<Vec<(InsnId, &Branch)>> {
        let node = self.node(id)?;
        let mut res: Vec<_> = self
            .inner
            .edges_directed(node, dir)
            .map(|edge| {
                let other = match dir {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                (self.inner[other], edge.weight())
            })
            .collect();
        // petgraph iterates edges in reverse insertion order
        res.reverse();
        Ok(res)
    }

    /// Returns the successors of an instruction, with the branch leading to them.
    pub fn successors(&self, id: InsnId) -> AnalysisResult<Vec<(InsnId, &Branch)>> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Returns the predecessors of an instruction, with the branch leading from them.
    pub fn predecessors(&self, id: InsnId) -> AnalysisResult<Vec<(InsnId, &Branch)>> {
        self.neighbors(id, Direction::Incoming)
    }

    #[must_use]
    pub fn to_dot(&self, body: &Body) -> String {
        let mut res = String::new();
        res.push_str("digraph {\n");
        res.push_str("  nodesep=1;\n");
        let written = write!(
            res,
            "{}",
            Dot::with_attr_getters(
                &self.inner,
                &[
                    Config::GraphContentOnly,
                    Config::EdgeNoLabel,
                    Config::NodeNoLabel
                ],
                &|_, edge| {
                    let color = match edge.weight() {
                        Branch::IfTrue => "green",
                        Branch::IfFalse => "red",
                        Branch::Switch(_) | Branch::SwitchDefault => "purple",
                        Branch::Jmp => "blue",
                        Branch::Catch(_) | Branch::CatchAll => "orchid",
                        Branch::Sequence => "black",
                    };
                    format!("color={},xlabel=\"{}\"", color, edge.weight())
                },
                &|_, (_, id)| {
                    let text = match body.instr(*id) {
                        Ok(instr) => format!("{id}: {}", PrettyPrinter(instr, body)),
                        Err(_) => format!("{id}: <removed>"),
                    };
                    let color = match body.instr(*id) {
                        Ok(instr) if instr.can_throw() => "blue",
                        _ => "black",
                    };
                    format!(
                        "shape=box,color={color},label=\"{}\"",
                        text.replace('\\', "\\\\").replace('"', "\\\"")
                    )
                }
            )
        );
        if written.is_err() {
            log::warn!("could not render the control flow graph");
        }
        res.push('}');
        res
    }
}

fn instruction_branching(
    id: InsnId,
    instr: &Instr,
    next: Option<InsnId>,
) -> AnalysisResult<Vec<(Branch, InsnId)>> {
    let next_or_err = || next.ok_or(AnalysisError::FallThrough(id));
    match instr {
        Instr::Goto(target) => Ok(vec![(Branch::Jmp, *target)]),
        Instr::If(_, _, _, target) | Instr::IfZ(_, _, target) => Ok(vec![
            (Branch::IfTrue, *target),
            (Branch::IfFalse, next_or_err()?),
        ]),
        Instr::PackedSwitch(_, first_key, targets) => {
            Ok(std::iter::once(Ok((Branch::SwitchDefault, next_or_err()?)))
                .chain(targets.iter().enumerate().map(|(i, target)| {
                    let key = i32::try_from(i)
                        .ok()
                        .and_then(|i| first_key.checked_add(i))
                        .ok_or_else(|| {
                            AnalysisError::Internal(format!("{id}: switch keys overflow"))
                        })?;
                    Ok((Branch::Switch(key), *target))
                }))
                .collect::<AnalysisResult<_>>()?)
        }
        Instr::SparseSwitch(_, cases) => Ok(std::iter::once((Branch::SwitchDefault, next_or_err()?))
            .chain(
                cases
                    .iter()
                    .map(|(key, target)| (Branch::Switch(*key), *target)),
            )
            .collect()),
        instr if instr.can_continue() => Ok(vec![(Branch::Sequence, next_or_err()?)]),
        _ => Ok(vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branching() {
        let body = dw_ir::parse(
            r#"
.method static La;->f(I)V
    const:?32 v0, 1
    packed-switch p0, 3, {:a, :b}
    return-void
:a
    if-eqz p0, :b
    invoke-static {}, La;->g()V
:b
    return-void
:handler
    move-exception e
    throw e
    .catchall {:a .. :b} :handler
.end method
"#,
        )
        .unwrap()
        .remove(0);
        let cfg = Cfg::build(&body).unwrap();
        let o = body.order();
        assert_eq!(cfg.entry(), Some(o[0]));

        let succs = cfg.successors(o[1]).unwrap();
        assert_eq!(
            succs,
            vec![
                (o[2], &Branch::SwitchDefault),
                (o[3], &Branch::Switch(3)),
                (o[5], &Branch::Switch(4)),
            ]
        );
        assert!(cfg.successors(o[2]).unwrap().is_empty());

        // the if cannot throw, the invoke can
        assert_eq!(cfg.successors(o[3]).unwrap().len(), 2);
        let succs = cfg.successors(o[4]).unwrap();
        assert_eq!(succs, vec![(o[5], &Branch::Sequence), (o[6], &Branch::CatchAll)]);

        let preds = cfg.predecessors(o[5]).unwrap();
        assert_eq!(preds.len(), 3);
        assert!(cfg.to_dot(&body).contains("orchid"));
    }

    #[test]
    fn fall_through() {
        let body = dw_ir::parse(".method static La;->f()V\n    const:I v0, 1\n.end method\n")
            .unwrap()
            .remove(0);
        assert!(matches!(
            Cfg::build(&body),
            Err(AnalysisError::FallThrough(_))
        ));
    }
}
