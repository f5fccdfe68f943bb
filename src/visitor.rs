//! Iterative traversal of instruction trees.
//!
//! `ExprVisitor` walks an `ExprList` depth-first in program order and
//! reports each node to a `Delegate`. The walk keeps its position in
//! three explicit stacks rather than on the native call stack, so the
//! nesting depth of the input is bounded only by memory. Each open
//! structured node is moved out of its parent list while its children
//! are walked, so every step is constant time regardless of depth.

use crate::errors::Status;
use crate::ir::{
    Block, Catch, Const, Expr, ExprKind, ExprList, Func, IfExceptExpr, IfExpr, Location,
    TryExpr, Var,
};
use crate::opcode::Opcode;

/// What the visitor is doing with the node on top of its stacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisitState {
    /// The node has not been dispatched yet.
    Default,
    Block,
    IfTrue,
    IfFalse,
    IfExceptTrue,
    IfExceptFalse,
    Loop,
    Try,
    /// Walking the handler with this index.
    Catch(usize),
}

impl VisitState {
    /// The nested list of the node that this state walks.
    fn slot(self) -> Option<usize> {
        match self {
            VisitState::Default => None,
            VisitState::Block
            | VisitState::Loop
            | VisitState::IfTrue
            | VisitState::IfExceptTrue
            | VisitState::Try => Some(0),
            VisitState::IfFalse | VisitState::IfExceptFalse => Some(1),
            VisitState::Catch(i) => Some(i + 1),
        }
    }
}

/// Callbacks for `ExprVisitor`, one per expression kind, plus
/// begin/end hooks for structured instructions. Every method defaults
/// to doing nothing. Returning `Status::Error` stops the walk.
#[allow(unused_variables)]
pub trait Delegate {
    fn on_binary_expr(&mut self, loc: Location, opcode: Opcode) -> Status {
        Status::Ok
    }
    fn on_compare_expr(&mut self, loc: Location, opcode: Opcode) -> Status {
        Status::Ok
    }
    fn on_convert_expr(&mut self, loc: Location, opcode: Opcode) -> Status {
        Status::Ok
    }
    fn on_unary_expr(&mut self, loc: Location, opcode: Opcode) -> Status {
        Status::Ok
    }
    fn on_ternary_expr(&mut self, loc: Location, opcode: Opcode) -> Status {
        Status::Ok
    }
    fn on_const_expr(&mut self, loc: Location, value: Const) -> Status {
        Status::Ok
    }
    fn on_load_expr(&mut self, loc: Location, opcode: Opcode, align: u32, offset: u64) -> Status {
        Status::Ok
    }
    fn on_store_expr(&mut self, loc: Location, opcode: Opcode, align: u32, offset: u64) -> Status {
        Status::Ok
    }
    fn on_drop_expr(&mut self, loc: Location) -> Status {
        Status::Ok
    }
    fn on_select_expr(&mut self, loc: Location) -> Status {
        Status::Ok
    }
    fn on_nop_expr(&mut self, loc: Location) -> Status {
        Status::Ok
    }
    fn on_unreachable_expr(&mut self, loc: Location) -> Status {
        Status::Ok
    }
    fn on_return_expr(&mut self, loc: Location) -> Status {
        Status::Ok
    }
    fn on_br_expr(&mut self, loc: Location, label: &mut Var) -> Status {
        Status::Ok
    }
    fn on_br_if_expr(&mut self, loc: Location, label: &mut Var) -> Status {
        Status::Ok
    }
    fn on_br_table_expr(&mut self, loc: Location, targets: &mut [Var], default: &mut Var) -> Status {
        Status::Ok
    }
    fn on_call_expr(&mut self, loc: Location, func: &mut Var) -> Status {
        Status::Ok
    }
    fn on_call_indirect_expr(&mut self, loc: Location, type_var: &mut Var, table: &mut Var) -> Status {
        Status::Ok
    }
    fn on_return_call_expr(&mut self, loc: Location, func: &mut Var) -> Status {
        Status::Ok
    }
    fn on_return_call_indirect_expr(
        &mut self,
        loc: Location,
        type_var: &mut Var,
        table: &mut Var,
    ) -> Status {
        Status::Ok
    }
    fn on_get_local_expr(&mut self, loc: Location, local: &mut Var) -> Status {
        Status::Ok
    }
    fn on_set_local_expr(&mut self, loc: Location, local: &mut Var) -> Status {
        Status::Ok
    }
    fn on_tee_local_expr(&mut self, loc: Location, local: &mut Var) -> Status {
        Status::Ok
    }
    fn on_get_global_expr(&mut self, loc: Location, global: &mut Var) -> Status {
        Status::Ok
    }
    fn on_set_global_expr(&mut self, loc: Location, global: &mut Var) -> Status {
        Status::Ok
    }
    fn on_memory_size_expr(&mut self, loc: Location) -> Status {
        Status::Ok
    }
    fn on_memory_grow_expr(&mut self, loc: Location) -> Status {
        Status::Ok
    }
    fn on_memory_copy_expr(&mut self, loc: Location) -> Status {
        Status::Ok
    }
    fn on_memory_fill_expr(&mut self, loc: Location) -> Status {
        Status::Ok
    }
    fn on_memory_init_expr(&mut self, loc: Location, segment: &mut Var) -> Status {
        Status::Ok
    }
    fn on_data_drop_expr(&mut self, loc: Location, segment: &mut Var) -> Status {
        Status::Ok
    }
    fn on_table_copy_expr(&mut self, loc: Location) -> Status {
        Status::Ok
    }
    fn on_table_init_expr(&mut self, loc: Location, segment: &mut Var) -> Status {
        Status::Ok
    }
    fn on_elem_drop_expr(&mut self, loc: Location, segment: &mut Var) -> Status {
        Status::Ok
    }
    fn on_throw_expr(&mut self, loc: Location, except: &mut Var) -> Status {
        Status::Ok
    }
    fn on_rethrow_expr(&mut self, loc: Location, label: &mut Var) -> Status {
        Status::Ok
    }
    fn on_simd_lane_op_expr(&mut self, loc: Location, opcode: Opcode, lane: u8) -> Status {
        Status::Ok
    }
    fn on_simd_shuffle_op_expr(&mut self, loc: Location, opcode: Opcode, lanes: &[u8; 16]) -> Status {
        Status::Ok
    }

    fn begin_block_expr(&mut self, loc: Location, block: &mut Block) -> Status {
        Status::Ok
    }
    fn end_block_expr(&mut self, loc: Location, block: &mut Block) -> Status {
        Status::Ok
    }
    fn begin_loop_expr(&mut self, loc: Location, block: &mut Block) -> Status {
        Status::Ok
    }
    fn end_loop_expr(&mut self, loc: Location, block: &mut Block) -> Status {
        Status::Ok
    }
    fn begin_if_expr(&mut self, loc: Location, expr: &mut IfExpr) -> Status {
        Status::Ok
    }
    fn after_if_true_expr(&mut self, loc: Location, expr: &mut IfExpr) -> Status {
        Status::Ok
    }
    fn end_if_expr(&mut self, loc: Location, expr: &mut IfExpr) -> Status {
        Status::Ok
    }
    fn begin_if_except_expr(&mut self, loc: Location, expr: &mut IfExceptExpr) -> Status {
        Status::Ok
    }
    fn after_if_except_true_expr(&mut self, loc: Location, expr: &mut IfExceptExpr) -> Status {
        Status::Ok
    }
    fn end_if_except_expr(&mut self, loc: Location, expr: &mut IfExceptExpr) -> Status {
        Status::Ok
    }
    fn begin_try_expr(&mut self, loc: Location, expr: &mut TryExpr) -> Status {
        Status::Ok
    }
    fn on_catch_expr(&mut self, loc: Location, catch: &mut Catch) -> Status {
        Status::Ok
    }
    fn end_try_expr(&mut self, loc: Location, expr: &mut TryExpr) -> Status {
        Status::Ok
    }
}

/// The list a frame is walking, detached from its node.
struct Cursor {
    list: ExprList,
    next: usize,
}

pub struct ExprVisitor<'d, D: Delegate + ?Sized> {
    delegate: &'d mut D,
    /// One entry per open structured node.
    state_stack: Vec<VisitState>,
    /// Open structured nodes, moved out of their parent lists. The
    /// list named by the matching state is moved out in turn.
    expr_stack: Vec<Expr>,
    /// The list each open node is walking. The node is put back at
    /// `next - 1` of the cursor below it, or into the root.
    expr_iter_stack: Vec<Cursor>,
}

fn placeholder() -> Expr {
    Expr::new(ExprKind::Nop)
}

fn take_list(expr: &mut Expr, state: VisitState) -> ExprList {
    state
        .slot()
        .and_then(|slot| expr.nested_list_mut(slot))
        .map(std::mem::take)
        .unwrap_or_default()
}

fn restore_list(expr: &mut Expr, state: VisitState, list: ExprList) {
    if let Some(slot) = state.slot().and_then(|slot| expr.nested_list_mut(slot)) {
        *slot = list;
    }
}

/// Reports the start of a structured node and picks the state that
/// walks its first list.
fn begin<D: Delegate + ?Sized>(delegate: &mut D, expr: &mut Expr) -> (Status, VisitState) {
    let loc = expr.loc;
    match &mut expr.kind {
        ExprKind::Block(block) => (delegate.begin_block_expr(loc, block), VisitState::Block),
        ExprKind::Loop(block) => (delegate.begin_loop_expr(loc, block), VisitState::Loop),
        ExprKind::If(e) => (delegate.begin_if_expr(loc, e), VisitState::IfTrue),
        ExprKind::IfExcept(e) => (
            delegate.begin_if_except_expr(loc, e),
            VisitState::IfExceptTrue,
        ),
        ExprKind::Try(e) => (delegate.begin_try_expr(loc, e), VisitState::Try),
        _ => (Status::Error, VisitState::Default),
    }
}

/// What follows a finished list.
enum Next {
    List(VisitState),
    Close,
}

impl<'d, D: Delegate + ?Sized> ExprVisitor<'d, D> {
    pub fn new(delegate: &'d mut D) -> Self {
        ExprVisitor {
            delegate,
            state_stack: vec![],
            expr_stack: vec![],
            expr_iter_stack: vec![],
        }
    }

    pub fn visit_func(&mut self, func: &mut Func) -> Status {
        self.visit_expr_list(&mut func.exprs)
    }

    pub fn visit_expr_list(&mut self, exprs: &mut [Expr]) -> Status {
        for expr in exprs {
            if self.visit_expr(expr).is_error() {
                return Status::Error;
            }
        }
        Status::Ok
    }

    /// Walks `root` and everything nested in it. The tree is whole
    /// again when this returns, whether or not the walk stopped early.
    pub fn visit_expr(&mut self, root: &mut Expr) -> Status {
        if !root.kind.is_container() {
            return dispatch_leaf(&mut *self.delegate, root);
        }
        let (status, state) = begin(&mut *self.delegate, root);
        if status.is_error() {
            return Status::Error;
        }
        let node = std::mem::replace(root, placeholder());
        self.open(node, state);

        while let Some(&state) = self.state_stack.last() {
            let status = self.step(state, root);
            if status.is_error() {
                self.unwind(root);
                return Status::Error;
            }
        }
        Status::Ok
    }

    fn open(&mut self, mut node: Expr, state: VisitState) {
        let list = take_list(&mut node, state);
        self.state_stack.push(state);
        self.expr_stack.push(node);
        self.expr_iter_stack.push(Cursor { list, next: 0 });
    }

    /// Puts a closed node back where it was taken from.
    fn place(&mut self, node: Expr, root: &mut Expr) {
        match self.expr_iter_stack.last_mut() {
            Some(cursor) => cursor.list[cursor.next - 1] = node,
            None => *root = node,
        }
    }

    /// Visits the next child of the top frame, or moves the frame past
    /// the list it has finished.
    fn step(&mut self, state: VisitState, root: &mut Expr) -> Status {
        let cursor = match self.expr_iter_stack.last_mut() {
            Some(cursor) => cursor,
            None => return Status::Error,
        };
        if let Some(child) = cursor.list.get_mut(cursor.next) {
            cursor.next += 1;
            if !child.kind.is_container() {
                return dispatch_leaf(&mut *self.delegate, child);
            }
            let (status, next) = begin(&mut *self.delegate, child);
            if status.is_ok() {
                let node = std::mem::replace(child, placeholder());
                self.open(node, next);
            }
            return status;
        }

        let list = match self.expr_iter_stack.pop() {
            Some(cursor) => cursor.list,
            None => return Status::Error,
        };
        let node = match self.expr_stack.last_mut() {
            Some(node) => node,
            None => return Status::Error,
        };
        restore_list(node, state, list);
        let loc = node.loc;
        let delegate = &mut *self.delegate;
        let (status, next) = match (state, &mut node.kind) {
            (VisitState::Block, ExprKind::Block(block)) => {
                (delegate.end_block_expr(loc, block), Next::Close)
            }
            (VisitState::Loop, ExprKind::Loop(block)) => {
                (delegate.end_loop_expr(loc, block), Next::Close)
            }
            (VisitState::IfTrue, ExprKind::If(e)) => (
                delegate.after_if_true_expr(loc, e),
                Next::List(VisitState::IfFalse),
            ),
            (VisitState::IfFalse, ExprKind::If(e)) => (delegate.end_if_expr(loc, e), Next::Close),
            (VisitState::IfExceptTrue, ExprKind::IfExcept(e)) => (
                delegate.after_if_except_true_expr(loc, e),
                Next::List(VisitState::IfExceptFalse),
            ),
            (VisitState::IfExceptFalse, ExprKind::IfExcept(e)) => {
                (delegate.end_if_except_expr(loc, e), Next::Close)
            }
            (VisitState::Try, ExprKind::Try(e)) => next_catch(delegate, loc, e, 0),
            (VisitState::Catch(i), ExprKind::Try(e)) => next_catch(delegate, loc, e, i + 1),
            _ => (Status::Error, Next::Close),
        };

        match next {
            Next::List(next) => {
                let list = take_list(node, next);
                if let Some(top) = self.state_stack.last_mut() {
                    *top = next;
                }
                self.expr_iter_stack.push(Cursor { list, next: 0 });
            }
            Next::Close => {
                self.state_stack.pop();
                if let Some(node) = self.expr_stack.pop() {
                    self.place(node, root);
                }
            }
        }
        status
    }

    /// Closes every open frame without reporting it, so the tree is
    /// whole again.
    fn unwind(&mut self, root: &mut Expr) {
        while let Some(state) = self.state_stack.pop() {
            let cursor = self.expr_iter_stack.pop();
            if let Some(mut node) = self.expr_stack.pop() {
                if let Some(cursor) = cursor {
                    restore_list(&mut node, state, cursor.list);
                }
                self.place(node, root);
            }
        }
    }
}

/// Moves a `try` to handler `index`, or ends it if there is no such
/// handler.
fn next_catch<D: Delegate + ?Sized>(
    delegate: &mut D,
    loc: Location,
    e: &mut TryExpr,
    index: usize,
) -> (Status, Next) {
    match e.catches.get_mut(index) {
        Some(catch) => (
            delegate.on_catch_expr(catch.loc, catch),
            Next::List(VisitState::Catch(index)),
        ),
        None => (delegate.end_try_expr(loc, e), Next::Close),
    }
}

fn dispatch_leaf<D: Delegate + ?Sized>(delegate: &mut D, expr: &mut Expr) -> Status {
    let loc = expr.loc;
    match &mut expr.kind {
        ExprKind::Binary(op) => delegate.on_binary_expr(loc, *op),
        ExprKind::Compare(op) => delegate.on_compare_expr(loc, *op),
        ExprKind::Convert(op) => delegate.on_convert_expr(loc, *op),
        ExprKind::Unary(op) => delegate.on_unary_expr(loc, *op),
        ExprKind::Ternary(op) => delegate.on_ternary_expr(loc, *op),
        ExprKind::Const(value) => delegate.on_const_expr(loc, *value),
        ExprKind::Load {
            opcode,
            align,
            offset,
        } => delegate.on_load_expr(loc, *opcode, *align, *offset),
        ExprKind::Store {
            opcode,
            align,
            offset,
        } => delegate.on_store_expr(loc, *opcode, *align, *offset),
        ExprKind::Drop => delegate.on_drop_expr(loc),
        ExprKind::Select => delegate.on_select_expr(loc),
        ExprKind::Nop => delegate.on_nop_expr(loc),
        ExprKind::Unreachable => delegate.on_unreachable_expr(loc),
        ExprKind::Return => delegate.on_return_expr(loc),
        ExprKind::Br(var) => delegate.on_br_expr(loc, var),
        ExprKind::BrIf(var) => delegate.on_br_if_expr(loc, var),
        ExprKind::BrTable { targets, default } => delegate.on_br_table_expr(loc, targets, default),
        ExprKind::Call(var) => delegate.on_call_expr(loc, var),
        ExprKind::CallIndirect { type_var, table } => {
            delegate.on_call_indirect_expr(loc, type_var, table)
        }
        ExprKind::ReturnCall(var) => delegate.on_return_call_expr(loc, var),
        ExprKind::ReturnCallIndirect { type_var, table } => {
            delegate.on_return_call_indirect_expr(loc, type_var, table)
        }
        ExprKind::GetLocal(var) => delegate.on_get_local_expr(loc, var),
        ExprKind::SetLocal(var) => delegate.on_set_local_expr(loc, var),
        ExprKind::TeeLocal(var) => delegate.on_tee_local_expr(loc, var),
        ExprKind::GetGlobal(var) => delegate.on_get_global_expr(loc, var),
        ExprKind::SetGlobal(var) => delegate.on_set_global_expr(loc, var),
        ExprKind::MemorySize => delegate.on_memory_size_expr(loc),
        ExprKind::MemoryGrow => delegate.on_memory_grow_expr(loc),
        ExprKind::MemoryCopy => delegate.on_memory_copy_expr(loc),
        ExprKind::MemoryFill => delegate.on_memory_fill_expr(loc),
        ExprKind::MemoryInit(var) => delegate.on_memory_init_expr(loc, var),
        ExprKind::DataDrop(var) => delegate.on_data_drop_expr(loc, var),
        ExprKind::TableCopy => delegate.on_table_copy_expr(loc),
        ExprKind::TableInit(var) => delegate.on_table_init_expr(loc, var),
        ExprKind::ElemDrop(var) => delegate.on_elem_drop_expr(loc, var),
        ExprKind::Throw(var) => delegate.on_throw_expr(loc, var),
        ExprKind::Rethrow(var) => delegate.on_rethrow_expr(loc, var),
        ExprKind::SimdLaneOp { opcode, lane } => delegate.on_simd_lane_op_expr(loc, *opcode, *lane),
        ExprKind::SimdShuffleOp { opcode, lanes } => {
            delegate.on_simd_shuffle_op_expr(loc, *opcode, lanes)
        }
        ExprKind::Block(_)
        | ExprKind::Loop(_)
        | ExprKind::If(_)
        | ExprKind::IfExcept(_)
        | ExprKind::Try(_) => Status::Error,
    }
}
