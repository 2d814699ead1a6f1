#![forbid(unsafe_code)]

//! Control-flow graph construction.
//!
//! A function body lowers to basic blocks with typed edges in a single
//! linear scan that maintains a current-block cursor. Branching constructs
//! open blocks for each arm plus a join block; loop bodies get a back-edge
//! to their header; `return`/`throw` terminate a block with an edge to the
//! shared exit block and no fallthrough successor. Construction is total:
//! every syntactically valid body produces a graph, and statements the front
//! end widened to opaque land in blocks analyzers treat conservatively.
//!
//! Blocks created after an unconditional return have no incoming edges; the
//! post-construction reachability sweep flags them so the dataflow pass can
//! report dead code.

use std::collections::VecDeque;

use vow_ast::{Expr, Span, Stmt};

fn assigned_in(body: &[Stmt]) -> Vec<String> {
    vow_verify::encode::assigned_vars(body).into_iter().collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    Fallthrough,
    TrueBranch,
    FalseBranch,
    LoopBack,
    Return,
    Throw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub from: BlockId,
    pub to: BlockId,
    pub kind: EdgeKind,
}

/// Header information for a counting loop: `var` takes `from..=to`.
#[derive(Clone, Copy, Debug)]
pub struct LoopBounds<'f> {
    pub var: &'f str,
    pub from: &'f Expr,
    pub to: &'f Expr,
}

#[derive(Debug)]
pub struct BasicBlock<'f> {
    pub id: BlockId,
    /// Simple statements only; branching constructs become edges and guards.
    pub stmts: Vec<&'f Stmt>,
    /// Condition evaluated at the end of this block when it branches.
    pub guard: Option<&'f Expr>,
    /// Set on counting-loop headers.
    pub loop_bounds: Option<LoopBounds<'f>>,
    /// Variables assigned somewhere in the loop this block heads; analyzers
    /// widen them when entering the header.
    pub loop_widen: Vec<String>,
    pub reachable: bool,
}

impl<'f> BasicBlock<'f> {
    fn new(id: BlockId) -> Self {
        Self {
            id,
            stmts: Vec::new(),
            guard: None,
            loop_bounds: None,
            loop_widen: Vec::new(),
            reachable: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    /// Span of the first statement, for dead-code diagnostics.
    pub fn first_span(&self) -> Option<Span> {
        self.stmts.first().map(|s| s.span())
    }
}

#[derive(Debug)]
pub struct ControlFlowGraph<'f> {
    pub blocks: Vec<BasicBlock<'f>>,
    pub edges: Vec<Edge>,
    pub entry: BlockId,
    pub exit: BlockId,
}

impl<'f> ControlFlowGraph<'f> {
    pub fn block(&self, id: BlockId) -> &BasicBlock<'f> {
        &self.blocks[id.0]
    }

    pub fn successors(&self, id: BlockId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.from == id)
    }

    pub fn predecessors(&self, id: BlockId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.to == id)
    }

    /// Blocks recorded but never reachable from the entry block.
    pub fn unreachable_blocks(&self) -> impl Iterator<Item = &BasicBlock<'f>> {
        self.blocks.iter().filter(|b| !b.reachable)
    }
}

/// Lower a function body into a control-flow graph.
pub fn build(body: &[Stmt]) -> ControlFlowGraph<'_> {
    let mut builder = Builder {
        blocks: Vec::new(),
        edges: Vec::new(),
    };
    let entry = builder.new_block();
    let exit = builder.new_block();
    let last = builder.lower_stmts(body, entry, exit);
    if let Some(last) = last {
        // Falling off the end is an implicit return.
        builder.add_edge(last, exit, EdgeKind::Return);
    }

    let mut cfg = ControlFlowGraph {
        blocks: builder.blocks,
        edges: builder.edges,
        entry,
        exit,
    };
    mark_reachable(&mut cfg);
    cfg
}

struct Builder<'f> {
    blocks: Vec<BasicBlock<'f>>,
    edges: Vec<Edge>,
}

impl<'f> Builder<'f> {
    fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock::new(id));
        id
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) {
        self.edges.push(Edge { from, to, kind });
    }

    /// Lower a statement list starting in `current`; returns the block
    /// control falls out of, or `None` when every path terminated.
    fn lower_stmts(
        &mut self,
        stmts: &'f [Stmt],
        mut current: BlockId,
        exit: BlockId,
    ) -> Option<BlockId> {
        let mut terminated = false;
        for stmt in stmts {
            if terminated {
                // Code after an unconditional return/throw: a fresh block
                // with no incoming edges, flagged by the reachability sweep.
                current = self.new_block();
                terminated = false;
            }
            match stmt {
                Stmt::Let { .. }
                | Stmt::Assign { .. }
                | Stmt::Expr(_)
                | Stmt::Opaque { .. } => {
                    self.blocks[current.0].stmts.push(stmt);
                }
                Stmt::Return { .. } => {
                    self.blocks[current.0].stmts.push(stmt);
                    self.add_edge(current, exit, EdgeKind::Return);
                    terminated = true;
                }
                Stmt::Throw { .. } => {
                    self.blocks[current.0].stmts.push(stmt);
                    self.add_edge(current, exit, EdgeKind::Throw);
                    terminated = true;
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                    ..
                } => {
                    self.blocks[current.0].guard = Some(cond);
                    let join = self.new_block();

                    let then_block = self.new_block();
                    self.add_edge(current, then_block, EdgeKind::TrueBranch);
                    if let Some(end) = self.lower_stmts(then_body, then_block, exit) {
                        self.add_edge(end, join, EdgeKind::Fallthrough);
                    }

                    if else_body.is_empty() {
                        self.add_edge(current, join, EdgeKind::FalseBranch);
                    } else {
                        let else_block = self.new_block();
                        self.add_edge(current, else_block, EdgeKind::FalseBranch);
                        if let Some(end) = self.lower_stmts(else_body, else_block, exit) {
                            self.add_edge(end, join, EdgeKind::Fallthrough);
                        }
                    }
                    current = join;
                }
                Stmt::While { cond, body, .. } => {
                    let header = self.new_block();
                    self.add_edge(current, header, EdgeKind::Fallthrough);
                    self.blocks[header.0].guard = Some(cond);
                    self.blocks[header.0].loop_widen = assigned_in(body);

                    let body_block = self.new_block();
                    self.add_edge(header, body_block, EdgeKind::TrueBranch);
                    if let Some(end) = self.lower_stmts(body, body_block, exit) {
                        self.add_edge(end, header, EdgeKind::LoopBack);
                    }

                    let after = self.new_block();
                    self.add_edge(header, after, EdgeKind::FalseBranch);
                    current = after;
                }
                Stmt::DoWhile { body, cond, .. } => {
                    let body_block = self.new_block();
                    self.add_edge(current, body_block, EdgeKind::Fallthrough);
                    self.blocks[body_block.0].loop_widen = assigned_in(body);

                    let end = self.lower_stmts(body, body_block, exit);
                    let after = self.new_block();
                    if let Some(end) = end {
                        // The latch evaluates the condition: back to the
                        // body header or out.
                        self.blocks[end.0].guard = Some(cond);
                        self.add_edge(end, body_block, EdgeKind::LoopBack);
                        self.add_edge(end, after, EdgeKind::FalseBranch);
                    }
                    current = after;
                }
                Stmt::For {
                    var,
                    from,
                    to,
                    body,
                    ..
                } => {
                    let header = self.new_block();
                    self.add_edge(current, header, EdgeKind::Fallthrough);
                    self.blocks[header.0].loop_bounds = Some(LoopBounds {
                        var: var.as_str(),
                        from,
                        to,
                    });
                    let mut widen = assigned_in(body);
                    widen.retain(|name| name != var);
                    self.blocks[header.0].loop_widen = widen;

                    let body_block = self.new_block();
                    self.add_edge(header, body_block, EdgeKind::TrueBranch);
                    if let Some(end) = self.lower_stmts(body, body_block, exit) {
                        self.add_edge(end, header, EdgeKind::LoopBack);
                    }

                    let after = self.new_block();
                    self.add_edge(header, after, EdgeKind::FalseBranch);
                    current = after;
                }
            }
        }
        (!terminated).then_some(current)
    }
}

fn mark_reachable(cfg: &mut ControlFlowGraph<'_>) {
    let mut queue = VecDeque::new();
    queue.push_back(cfg.entry);
    cfg.blocks[cfg.entry.0].reachable = true;
    while let Some(id) = queue.pop_front() {
        let next: Vec<BlockId> = cfg.successors(id).map(|e| e.to).collect();
        for to in next {
            if !cfg.blocks[to.0].reachable {
                cfg.blocks[to.0].reachable = true;
                queue.push_back(to);
            }
        }
    }
}
