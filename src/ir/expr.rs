//! Instruction trees.

use super::{Const, Location, Type, Var};
use crate::opcode::Opcode;
use std::mem;

/// An owned, ordered sequence of instructions: a function body, a
/// block body, one arm of an `if`, or a `catch` handler.
pub type ExprList = Vec<Expr>;

/// One instruction. Structured instructions own their nested lists,
/// so trees can nest arbitrarily deep; cloning, comparing and dropping
/// walk them with explicit stacks.
#[derive(Debug)]
pub struct Expr {
    pub loc: Location,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr {
            loc: Location::default(),
            kind,
        }
    }

    pub fn at(loc: Location, kind: ExprKind) -> Self {
        Expr { loc, kind }
    }

    /// Number of nested instruction lists this expression owns.
    pub fn num_nested_lists(&self) -> usize {
        match &self.kind {
            ExprKind::Block(_) | ExprKind::Loop(_) => 1,
            ExprKind::If(_) | ExprKind::IfExcept(_) => 2,
            ExprKind::Try(t) => 1 + t.catches.len(),
            _ => 0,
        }
    }

    /// The `slot`th nested list: the body of a block or loop; the
    /// true then false arm of an `if`; the body of a `try` followed by
    /// each handler.
    pub fn nested_list(&self, slot: usize) -> Option<&ExprList> {
        match (&self.kind, slot) {
            (ExprKind::Block(b), 0) | (ExprKind::Loop(b), 0) => Some(&b.exprs),
            (ExprKind::If(i), 0) => Some(&i.true_.exprs),
            (ExprKind::If(i), 1) => Some(&i.false_),
            (ExprKind::IfExcept(i), 0) => Some(&i.true_.exprs),
            (ExprKind::IfExcept(i), 1) => Some(&i.false_),
            (ExprKind::Try(t), 0) => Some(&t.block.exprs),
            (ExprKind::Try(t), n) => t.catches.get(n - 1).map(|c| &c.exprs),
            _ => None,
        }
    }

    pub fn nested_list_mut(&mut self, slot: usize) -> Option<&mut ExprList> {
        match (&mut self.kind, slot) {
            (ExprKind::Block(b), 0) | (ExprKind::Loop(b), 0) => Some(&mut b.exprs),
            (ExprKind::If(i), 0) => Some(&mut i.true_.exprs),
            (ExprKind::If(i), 1) => Some(&mut i.false_),
            (ExprKind::IfExcept(i), 0) => Some(&mut i.true_.exprs),
            (ExprKind::IfExcept(i), 1) => Some(&mut i.false_),
            (ExprKind::Try(t), 0) => Some(&mut t.block.exprs),
            (ExprKind::Try(t), n) => t.catches.get_mut(n - 1).map(|c| &mut c.exprs),
            _ => None,
        }
    }

    /// This expression with its nested lists left empty.
    fn header(&self) -> Expr {
        Expr::at(self.loc, self.kind.header())
    }
}

impl Clone for Expr {
    fn clone(&self) -> Expr {
        struct Frame<'a> {
            src: &'a Expr,
            node: Expr,
            slot: usize,
            pos: usize,
            done: ExprList,
        }

        impl<'a> Frame<'a> {
            fn new(src: &'a Expr) -> Self {
                Frame {
                    src,
                    node: src.header(),
                    slot: 0,
                    pos: 0,
                    done: vec![],
                }
            }
        }

        let mut root = Frame::new(self);
        let mut stack: Vec<Frame> = vec![];
        loop {
            let top = stack.last_mut().unwrap_or(&mut root);
            let src = top.src;
            if let Some(list) = src.nested_list(top.slot) {
                match list.get(top.pos) {
                    Some(child) => {
                        top.pos += 1;
                        if child.kind.is_container() {
                            stack.push(Frame::new(child));
                        } else {
                            top.done.push(child.header());
                        }
                    }
                    None => {
                        let done = mem::take(&mut top.done);
                        if let Some(dst) = top.node.nested_list_mut(top.slot) {
                            *dst = done;
                        }
                        top.slot += 1;
                        top.pos = 0;
                    }
                }
                continue;
            }
            match stack.pop() {
                Some(frame) => stack.last_mut().unwrap_or(&mut root).done.push(frame.node),
                None => return root.node,
            }
        }
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Expr) -> bool {
        let mut pending: Vec<(&[Expr], &[Expr])> =
            vec![(std::slice::from_ref(self), std::slice::from_ref(other))];
        while let Some((lhs, rhs)) = pending.pop() {
            if lhs.len() != rhs.len() {
                return false;
            }
            for (a, b) in lhs.iter().zip(rhs) {
                if a.loc != b.loc || !a.kind.header_eq(&b.kind) {
                    return false;
                }
                for slot in 0..a.num_nested_lists() {
                    match (a.nested_list(slot), b.nested_list(slot)) {
                        (Some(l), Some(r)) => pending.push((l, r)),
                        _ => return false,
                    }
                }
            }
        }
        true
    }
}

impl Drop for Expr {
    fn drop(&mut self) {
        if !self.kind.is_container() {
            return;
        }
        let mut pending: Vec<ExprList> = vec![];
        take_nested_lists(self, &mut pending);
        while let Some(mut list) = pending.pop() {
            for expr in &mut list {
                take_nested_lists(expr, &mut pending);
            }
        }
    }
}

fn take_nested_lists(expr: &mut Expr, out: &mut Vec<ExprList>) {
    for slot in 0..expr.num_nested_lists() {
        if let Some(list) = expr.nested_list_mut(slot) {
            if !list.is_empty() {
                out.push(mem::take(list));
            }
        }
    }
}

/// The block type of a structured instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockDecl {
    /// No result or a single result type, written inline.
    Inline(Vec<Type>),
    /// A reference to a function type, for blocks with parameters or
    /// multiple results.
    FuncType(Var),
}

impl Default for BlockDecl {
    fn default() -> Self {
        BlockDecl::Inline(vec![])
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Block {
    pub label: String,
    pub decl: BlockDecl,
    pub exprs: ExprList,
}

impl Block {
    pub fn new(decl: BlockDecl) -> Self {
        Block {
            label: String::new(),
            decl,
            exprs: vec![],
        }
    }

    fn header(&self) -> Block {
        Block {
            label: self.label.clone(),
            decl: self.decl.clone(),
            exprs: vec![],
        }
    }

    fn header_eq(&self, other: &Block) -> bool {
        self.label == other.label && self.decl == other.decl
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IfExpr {
    pub true_: Block,
    pub false_: ExprList,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfExceptExpr {
    pub true_: Block,
    pub false_: ExprList,
    pub except_var: Var,
}

/// A `catch` (with an exception var) or `catch_all` (without) handler.
#[derive(Clone, Debug, PartialEq)]
pub struct Catch {
    pub loc: Location,
    pub var: Option<Var>,
    pub exprs: ExprList,
}

impl Catch {
    pub fn is_catch_all(&self) -> bool {
        self.var.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TryExpr {
    pub block: Block,
    pub catches: Vec<Catch>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Binary(Opcode),
    Compare(Opcode),
    Convert(Opcode),
    Unary(Opcode),
    Ternary(Opcode),
    Const(Const),
    /// `align` is the log2 exponent, as encoded.
    Load {
        opcode: Opcode,
        align: u32,
        offset: u64,
    },
    Store {
        opcode: Opcode,
        align: u32,
        offset: u64,
    },
    Drop,
    Select,
    Nop,
    Unreachable,
    Return,
    Br(Var),
    BrIf(Var),
    BrTable {
        targets: Vec<Var>,
        default: Var,
    },
    Call(Var),
    CallIndirect {
        type_var: Var,
        table: Var,
    },
    ReturnCall(Var),
    ReturnCallIndirect {
        type_var: Var,
        table: Var,
    },
    GetLocal(Var),
    SetLocal(Var),
    TeeLocal(Var),
    GetGlobal(Var),
    SetGlobal(Var),
    MemorySize,
    MemoryGrow,
    MemoryCopy,
    MemoryFill,
    MemoryInit(Var),
    DataDrop(Var),
    TableCopy,
    TableInit(Var),
    ElemDrop(Var),
    Throw(Var),
    Rethrow(Var),
    SimdLaneOp {
        opcode: Opcode,
        lane: u8,
    },
    SimdShuffleOp {
        opcode: Opcode,
        lanes: [u8; 16],
    },
    Block(Block),
    Loop(Block),
    If(IfExpr),
    IfExcept(IfExceptExpr),
    Try(TryExpr),
}

impl ExprKind {
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            ExprKind::Block(_)
                | ExprKind::Loop(_)
                | ExprKind::If(_)
                | ExprKind::IfExcept(_)
                | ExprKind::Try(_)
        )
    }

    /// A copy without the nested instruction lists. `try` keeps one
    /// empty handler per handler.
    fn header(&self) -> ExprKind {
        match self {
            ExprKind::Block(b) => ExprKind::Block(b.header()),
            ExprKind::Loop(b) => ExprKind::Loop(b.header()),
            ExprKind::If(i) => ExprKind::If(IfExpr {
                true_: i.true_.header(),
                false_: vec![],
            }),
            ExprKind::IfExcept(i) => ExprKind::IfExcept(IfExceptExpr {
                true_: i.true_.header(),
                false_: vec![],
                except_var: i.except_var.clone(),
            }),
            ExprKind::Try(t) => ExprKind::Try(TryExpr {
                block: t.block.header(),
                catches: t
                    .catches
                    .iter()
                    .map(|c| Catch {
                        loc: c.loc,
                        var: c.var.clone(),
                        exprs: vec![],
                    })
                    .collect(),
            }),
            leaf => leaf.clone(),
        }
    }

    /// Equality ignoring the nested instruction lists.
    fn header_eq(&self, other: &ExprKind) -> bool {
        match (self, other) {
            (ExprKind::Block(a), ExprKind::Block(b)) | (ExprKind::Loop(a), ExprKind::Loop(b)) => {
                a.header_eq(b)
            }
            (ExprKind::If(a), ExprKind::If(b)) => a.true_.header_eq(&b.true_),
            (ExprKind::IfExcept(a), ExprKind::IfExcept(b)) => {
                a.true_.header_eq(&b.true_) && a.except_var == b.except_var
            }
            (ExprKind::Try(a), ExprKind::Try(b)) => {
                a.block.header_eq(&b.block)
                    && a.catches.len() == b.catches.len()
                    && a
                        .catches
                        .iter()
                        .zip(&b.catches)
                        .all(|(x, y)| x.loc == y.loc && x.var == y.var)
            }
            (a, b) if !a.is_container() => a == b,
            _ => false,
        }
    }
}
