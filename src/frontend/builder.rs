//! Builds a `Module` from the reader's callbacks.

use super::reader::BinaryReaderDelegate;
use crate::errors::{ErrorHandler, Status};
use crate::ir::{
    unique_name, Binding, Block, BlockDecl, Catch, Const, DataSegment, ElemSegment, Except,
    Export, Expr, ExprKind, ExprList, ExternalKind, Func, FuncDeclaration, FuncSignature,
    FuncType, Global, IfExpr, Import, ImportKind, Index, Limits, Location, Memory, Module,
    ModuleField, Table, TryExpr, Type, Var,
};
use crate::opcode::Opcode;
use log::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LabelType {
    Func,
    Block,
    Loop,
    If,
    Else,
    Try,
    Catch,
}

/// One open construct. Its container and the list being filled are
/// owned here until the matching `end` hands them to the parent; the
/// function label has no container. `slot` selects which nested list
/// of the container `exprs` becomes.
#[derive(Debug)]
struct LabelNode {
    label_type: LabelType,
    expr: Option<Expr>,
    slot: usize,
    exprs: ExprList,
}

impl LabelNode {
    /// Moves the filled list into the container.
    fn stash(&mut self) {
        let exprs = std::mem::take(&mut self.exprs);
        let slot = self.slot;
        if let Some(list) = self
            .expr
            .as_mut()
            .and_then(|e| e.nested_list_mut(slot))
        {
            *list = exprs;
        }
    }
}

/// Where constant expressions are currently being collected.
#[derive(Clone, Copy, Debug)]
enum InitExprTarget {
    Global(Index),
    ElemOffset(Index),
    DataOffset(Index),
}

pub struct BinaryReaderIR<'a> {
    module: &'a mut Module,
    errors: &'a mut dyn ErrorHandler,
    current_func: Option<Index>,
    label_stack: Vec<LabelNode>,
    current_init_expr: Option<InitExprTarget>,
    /// Set when the error handler asks to stop.
    stopped: bool,
}

fn dollar_name(name: &str) -> String {
    format!("${}", name)
}

impl<'a> BinaryReaderIR<'a> {
    pub fn new(module: &'a mut Module, errors: &'a mut dyn ErrorHandler) -> Self {
        BinaryReaderIR {
            module,
            errors,
            current_func: None,
            label_stack: vec![],
            current_init_expr: None,
            stopped: false,
        }
    }

    /// Reports `message` unless the handler has already asked to stop.
    fn print_error(&mut self, loc: Location, message: &str) -> Status {
        if !self.stopped && !self.errors.on_error(loc, message) {
            self.stopped = true;
        }
        Status::Error
    }

    fn sig_of(&mut self, sig_index: Index) -> FuncSignature {
        match self.module.func_type(sig_index) {
            Some(ty) => ty.sig.clone(),
            None => {
                let message = format!("invalid function type index: {}", sig_index);
                self.print_error(Location::default(), &message);
                FuncSignature::default()
            }
        }
    }

    fn func_for_sig(&mut self, sig_index: Index) -> Func {
        Func {
            decl: FuncDeclaration {
                type_var: Some(Var::Index(sig_index)),
                sig: self.sig_of(sig_index),
            },
            ..Func::default()
        }
    }

    fn append_import(&mut self, module_name: &str, field_name: &str, kind: ImportKind) -> Status {
        self.module.append_field(ModuleField::Import(Import {
            module_name: module_name.to_owned(),
            field_name: field_name.to_owned(),
            kind,
        }));
        Status::Ok
    }

    /// The list the next instruction goes into.
    fn top_list(&mut self) -> Option<&mut ExprList> {
        if let Some(target) = self.current_init_expr {
            return match target {
                InitExprTarget::Global(i) => self.module.global_mut(i).map(|g| &mut g.init_expr),
                InitExprTarget::ElemOffset(i) => {
                    self.module.elem_segment_mut(i).map(|s| &mut s.offset)
                }
                InitExprTarget::DataOffset(i) => {
                    self.module.data_segment_mut(i).map(|s| &mut s.offset)
                }
            };
        }
        self.label_stack.last_mut().map(|label| &mut label.exprs)
    }

    /// Closes the top label: a container goes to the end of its
    /// parent's list, and the function label's list becomes the body.
    fn pop_label(&mut self) -> Option<LabelType> {
        let mut label = self.label_stack.pop()?;
        label.stash();
        match label.expr.take() {
            Some(expr) => {
                if let Some(parent) = self.label_stack.last_mut() {
                    parent.exprs.push(expr);
                }
            }
            None => {
                if let Some(func) = self.current_func.and_then(|i| self.module.func_mut(i)) {
                    func.exprs = std::mem::take(&mut label.exprs);
                }
            }
        }
        Some(label.label_type)
    }

    fn append_expr(&mut self, loc: Location, kind: ExprKind) -> Status {
        match self.top_list() {
            Some(list) => {
                list.push(Expr::at(loc, kind));
                Status::Ok
            }
            None => self.print_error(loc, "expression outside of a function body"),
        }
    }

    fn append_container(&mut self, loc: Location, kind: ExprKind, label_type: LabelType) -> Status {
        if self.current_init_expr.is_some() {
            return self.print_error(loc, "unexpected block in initializer expression");
        }
        if self.label_stack.is_empty() {
            return self.print_error(loc, "expression outside of a function body");
        }
        self.label_stack.push(LabelNode {
            label_type,
            expr: Some(Expr::at(loc, kind)),
            slot: 0,
            exprs: vec![],
        });
        Status::Ok
    }

    fn begin_init_expr(&mut self, target: InitExprTarget) -> Status {
        self.current_init_expr = Some(target);
        Status::Ok
    }

    fn end_init_expr(&mut self) -> Status {
        self.current_init_expr = None;
        Status::Ok
    }

    fn append_catch(&mut self, loc: Location, var: Option<Var>) -> Status {
        let label = match self.label_stack.last_mut() {
            Some(label) if matches!(label.label_type, LabelType::Try | LabelType::Catch) => label,
            _ => return self.print_error(loc, "catch expression without matching try"),
        };
        label.stash();
        let slot = match label.expr.as_mut().map(|e| &mut e.kind) {
            Some(ExprKind::Try(t)) => {
                t.catches.push(Catch {
                    loc,
                    var,
                    exprs: vec![],
                });
                t.catches.len()
            }
            _ => return self.print_error(loc, "catch expression without matching try"),
        };
        label.label_type = LabelType::Catch;
        label.slot = slot;
        Status::Ok
    }
}

impl<'a> BinaryReaderDelegate for BinaryReaderIR<'a> {
    fn stopped(&self) -> bool {
        self.stopped
    }

    fn on_type(&mut self, _index: Index, params: &[Type], results: &[Type]) -> Status {
        self.module.append_field(ModuleField::FuncType(FuncType {
            name: String::new(),
            sig: FuncSignature {
                param_types: params.to_vec(),
                result_types: results.to_vec(),
            },
        }));
        Status::Ok
    }

    fn on_import_func(
        &mut self,
        _import_index: Index,
        module_name: &str,
        field_name: &str,
        _func_index: Index,
        sig_index: Index,
    ) -> Status {
        let func = self.func_for_sig(sig_index);
        self.append_import(module_name, field_name, ImportKind::Func(func))
    }

    fn on_import_table(
        &mut self,
        _import_index: Index,
        module_name: &str,
        field_name: &str,
        _table_index: Index,
        elem_type: Type,
        elem_limits: Limits,
    ) -> Status {
        let table = Table {
            name: String::new(),
            elem_limits,
            elem_type,
        };
        self.append_import(module_name, field_name, ImportKind::Table(table))
    }

    fn on_import_memory(
        &mut self,
        _import_index: Index,
        module_name: &str,
        field_name: &str,
        _memory_index: Index,
        page_limits: Limits,
    ) -> Status {
        let memory = Memory {
            name: String::new(),
            page_limits,
        };
        self.append_import(module_name, field_name, ImportKind::Memory(memory))
    }

    fn on_import_global(
        &mut self,
        _import_index: Index,
        module_name: &str,
        field_name: &str,
        _global_index: Index,
        ty: Type,
        mutable: bool,
    ) -> Status {
        let global = Global {
            ty,
            mutable,
            ..Global::default()
        };
        self.append_import(module_name, field_name, ImportKind::Global(global))
    }

    fn on_import_except(
        &mut self,
        _import_index: Index,
        module_name: &str,
        field_name: &str,
        _except_index: Index,
        sig_index: Index,
    ) -> Status {
        let sig = self.sig_of(sig_index).param_types;
        let except = Except {
            name: String::new(),
            sig,
        };
        self.append_import(module_name, field_name, ImportKind::Except(except))
    }

    fn on_function(&mut self, _index: Index, sig_index: Index) -> Status {
        let func = self.func_for_sig(sig_index);
        self.module.append_field(ModuleField::Func(func));
        Status::Ok
    }

    fn on_table(&mut self, _index: Index, elem_type: Type, elem_limits: Limits) -> Status {
        self.module.append_field(ModuleField::Table(Table {
            name: String::new(),
            elem_limits,
            elem_type,
        }));
        Status::Ok
    }

    fn on_memory(&mut self, _index: Index, page_limits: Limits) -> Status {
        self.module.append_field(ModuleField::Memory(Memory {
            name: String::new(),
            page_limits,
        }));
        Status::Ok
    }

    fn on_tag(&mut self, _index: Index, sig_index: Index) -> Status {
        let sig = self.sig_of(sig_index).param_types;
        self.module.append_field(ModuleField::Except(Except {
            name: String::new(),
            sig,
        }));
        Status::Ok
    }

    fn on_except_type(&mut self, _index: Index, sig: &[Type]) -> Status {
        self.module.append_field(ModuleField::Except(Except {
            name: String::new(),
            sig: sig.to_vec(),
        }));
        Status::Ok
    }

    fn begin_global(&mut self, _index: Index, ty: Type, mutable: bool) -> Status {
        self.module.append_field(ModuleField::Global(Global {
            ty,
            mutable,
            ..Global::default()
        }));
        Status::Ok
    }

    fn begin_global_init_expr(&mut self, index: Index) -> Status {
        self.begin_init_expr(InitExprTarget::Global(index))
    }

    fn end_global_init_expr(&mut self, _index: Index) -> Status {
        self.end_init_expr()
    }

    fn on_export(
        &mut self,
        _index: Index,
        kind: ExternalKind,
        item_index: Index,
        name: &str,
    ) -> Status {
        self.module.append_field(ModuleField::Export(Export {
            name: name.to_owned(),
            kind,
            var: Var::Index(item_index),
        }));
        Status::Ok
    }

    fn on_start_function(&mut self, func_index: Index) -> Status {
        self.module
            .append_field(ModuleField::Start(Var::Index(func_index)));
        Status::Ok
    }

    fn begin_elem_segment(&mut self, _index: Index, table_index: Index, passive: bool) -> Status {
        self.module.append_field(ModuleField::ElemSegment(ElemSegment {
            name: String::new(),
            table_var: Var::Index(table_index),
            offset: vec![],
            vars: vec![],
            passive,
        }));
        Status::Ok
    }

    fn begin_elem_segment_init_expr(&mut self, index: Index) -> Status {
        self.begin_init_expr(InitExprTarget::ElemOffset(index))
    }

    fn end_elem_segment_init_expr(&mut self, _index: Index) -> Status {
        self.end_init_expr()
    }

    fn on_elem_segment_function_index(
        &mut self,
        segment_index: Index,
        func_index: Index,
    ) -> Status {
        match self.module.elem_segment_mut(segment_index) {
            Some(segment) => {
                segment.vars.push(Var::Index(func_index));
                Status::Ok
            }
            None => self.print_error(Location::default(), "invalid elem segment index"),
        }
    }

    fn begin_data_segment(&mut self, _index: Index, memory_index: Index, passive: bool) -> Status {
        self.module.append_field(ModuleField::DataSegment(DataSegment {
            name: String::new(),
            memory_var: Var::Index(memory_index),
            offset: vec![],
            data: vec![],
            passive,
        }));
        Status::Ok
    }

    fn begin_data_segment_init_expr(&mut self, index: Index) -> Status {
        self.begin_init_expr(InitExprTarget::DataOffset(index))
    }

    fn end_data_segment_init_expr(&mut self, _index: Index) -> Status {
        self.end_init_expr()
    }

    fn on_data_segment_data(&mut self, index: Index, data: &[u8]) -> Status {
        match self.module.data_segment_mut(index) {
            Some(segment) => {
                segment.data = data.to_vec();
                Status::Ok
            }
            None => self.print_error(Location::default(), "invalid data segment index"),
        }
    }

    fn begin_function_body(&mut self, index: Index) -> Status {
        if self.module.func(index).is_none() {
            let message = format!("invalid function index: {}", index);
            return self.print_error(Location::default(), &message);
        }
        trace!("begin function body {}", index);
        self.current_func = Some(index);
        self.label_stack.clear();
        self.label_stack.push(LabelNode {
            label_type: LabelType::Func,
            expr: None,
            slot: 0,
            exprs: vec![],
        });
        Status::Ok
    }

    fn on_local_decl(&mut self, _decl_index: Index, count: Index, ty: Type) -> Status {
        let func = match self.current_func.and_then(|i| self.module.func_mut(i)) {
            Some(func) => func,
            None => return self.print_error(Location::default(), "local outside of a function"),
        };
        func.local_types
            .extend(std::iter::repeat(ty).take(count as usize));
        Status::Ok
    }

    fn end_function_body(&mut self, index: Index) -> Status {
        let mut status = Status::Ok;
        if !self.label_stack.is_empty() {
            let message = format!("function {} body is missing its final end", index);
            status |= self.print_error(Location::default(), &message);
        }
        // Keep whatever was built of an unterminated body.
        while self.pop_label().is_some() {}
        self.current_func = None;
        status
    }

    fn on_binary_expr(&mut self, loc: Location, opcode: Opcode) -> Status {
        self.append_expr(loc, ExprKind::Binary(opcode))
    }

    fn on_compare_expr(&mut self, loc: Location, opcode: Opcode) -> Status {
        self.append_expr(loc, ExprKind::Compare(opcode))
    }

    fn on_convert_expr(&mut self, loc: Location, opcode: Opcode) -> Status {
        self.append_expr(loc, ExprKind::Convert(opcode))
    }

    fn on_unary_expr(&mut self, loc: Location, opcode: Opcode) -> Status {
        self.append_expr(loc, ExprKind::Unary(opcode))
    }

    fn on_ternary_expr(&mut self, loc: Location, opcode: Opcode) -> Status {
        self.append_expr(loc, ExprKind::Ternary(opcode))
    }

    fn on_const_expr(&mut self, loc: Location, value: Const) -> Status {
        self.append_expr(loc, ExprKind::Const(value))
    }

    fn on_load_expr(&mut self, loc: Location, opcode: Opcode, align: u32, offset: u64) -> Status {
        self.append_expr(
            loc,
            ExprKind::Load {
                opcode,
                align,
                offset,
            },
        )
    }

    fn on_store_expr(&mut self, loc: Location, opcode: Opcode, align: u32, offset: u64) -> Status {
        self.append_expr(
            loc,
            ExprKind::Store {
                opcode,
                align,
                offset,
            },
        )
    }

    fn on_drop_expr(&mut self, loc: Location) -> Status {
        self.append_expr(loc, ExprKind::Drop)
    }

    fn on_select_expr(&mut self, loc: Location) -> Status {
        self.append_expr(loc, ExprKind::Select)
    }

    fn on_nop_expr(&mut self, loc: Location) -> Status {
        self.append_expr(loc, ExprKind::Nop)
    }

    fn on_unreachable_expr(&mut self, loc: Location) -> Status {
        self.append_expr(loc, ExprKind::Unreachable)
    }

    fn on_return_expr(&mut self, loc: Location) -> Status {
        self.append_expr(loc, ExprKind::Return)
    }

    fn on_br_expr(&mut self, loc: Location, depth: Index) -> Status {
        self.append_expr(loc, ExprKind::Br(Var::Index(depth)))
    }

    fn on_br_if_expr(&mut self, loc: Location, depth: Index) -> Status {
        self.append_expr(loc, ExprKind::BrIf(Var::Index(depth)))
    }

    fn on_br_table_expr(&mut self, loc: Location, targets: &[Index], default: Index) -> Status {
        let targets = targets.iter().map(|&depth| Var::Index(depth)).collect();
        self.append_expr(
            loc,
            ExprKind::BrTable {
                targets,
                default: Var::Index(default),
            },
        )
    }

    fn on_call_expr(&mut self, loc: Location, func_index: Index) -> Status {
        self.append_expr(loc, ExprKind::Call(Var::Index(func_index)))
    }

    fn on_call_indirect_expr(&mut self, loc: Location, sig_index: Index, table_index: Index)
        -> Status {
        self.append_expr(
            loc,
            ExprKind::CallIndirect {
                type_var: Var::Index(sig_index),
                table: Var::Index(table_index),
            },
        )
    }

    fn on_return_call_expr(&mut self, loc: Location, func_index: Index) -> Status {
        self.append_expr(loc, ExprKind::ReturnCall(Var::Index(func_index)))
    }

    fn on_return_call_indirect_expr(
        &mut self,
        loc: Location,
        sig_index: Index,
        table_index: Index,
    ) -> Status {
        self.append_expr(
            loc,
            ExprKind::ReturnCallIndirect {
                type_var: Var::Index(sig_index),
                table: Var::Index(table_index),
            },
        )
    }

    fn on_get_local_expr(&mut self, loc: Location, local_index: Index) -> Status {
        self.append_expr(loc, ExprKind::GetLocal(Var::Index(local_index)))
    }

    fn on_set_local_expr(&mut self, loc: Location, local_index: Index) -> Status {
        self.append_expr(loc, ExprKind::SetLocal(Var::Index(local_index)))
    }

    fn on_tee_local_expr(&mut self, loc: Location, local_index: Index) -> Status {
        self.append_expr(loc, ExprKind::TeeLocal(Var::Index(local_index)))
    }

    fn on_get_global_expr(&mut self, loc: Location, global_index: Index) -> Status {
        self.append_expr(loc, ExprKind::GetGlobal(Var::Index(global_index)))
    }

    fn on_set_global_expr(&mut self, loc: Location, global_index: Index) -> Status {
        self.append_expr(loc, ExprKind::SetGlobal(Var::Index(global_index)))
    }

    fn on_memory_size_expr(&mut self, loc: Location) -> Status {
        self.append_expr(loc, ExprKind::MemorySize)
    }

    fn on_memory_grow_expr(&mut self, loc: Location) -> Status {
        self.append_expr(loc, ExprKind::MemoryGrow)
    }

    fn on_memory_copy_expr(&mut self, loc: Location) -> Status {
        self.append_expr(loc, ExprKind::MemoryCopy)
    }

    fn on_memory_fill_expr(&mut self, loc: Location) -> Status {
        self.append_expr(loc, ExprKind::MemoryFill)
    }

    fn on_memory_init_expr(&mut self, loc: Location, segment: Index) -> Status {
        self.append_expr(loc, ExprKind::MemoryInit(Var::Index(segment)))
    }

    fn on_data_drop_expr(&mut self, loc: Location, segment: Index) -> Status {
        self.append_expr(loc, ExprKind::DataDrop(Var::Index(segment)))
    }

    fn on_table_copy_expr(&mut self, loc: Location) -> Status {
        self.append_expr(loc, ExprKind::TableCopy)
    }

    fn on_table_init_expr(&mut self, loc: Location, segment: Index) -> Status {
        self.append_expr(loc, ExprKind::TableInit(Var::Index(segment)))
    }

    fn on_elem_drop_expr(&mut self, loc: Location, segment: Index) -> Status {
        self.append_expr(loc, ExprKind::ElemDrop(Var::Index(segment)))
    }

    fn on_throw_expr(&mut self, loc: Location, except_index: Index) -> Status {
        self.append_expr(loc, ExprKind::Throw(Var::Index(except_index)))
    }

    fn on_rethrow_expr(&mut self, loc: Location, depth: Index) -> Status {
        self.append_expr(loc, ExprKind::Rethrow(Var::Index(depth)))
    }

    fn on_simd_lane_op_expr(&mut self, loc: Location, opcode: Opcode, lane: u8) -> Status {
        self.append_expr(loc, ExprKind::SimdLaneOp { opcode, lane })
    }

    fn on_simd_shuffle_op_expr(&mut self, loc: Location, opcode: Opcode, lanes: [u8; 16])
        -> Status {
        self.append_expr(loc, ExprKind::SimdShuffleOp { opcode, lanes })
    }

    fn on_block_expr(&mut self, loc: Location, decl: BlockDecl) -> Status {
        self.append_container(loc, ExprKind::Block(Block::new(decl)), LabelType::Block)
    }

    fn on_loop_expr(&mut self, loc: Location, decl: BlockDecl) -> Status {
        self.append_container(loc, ExprKind::Loop(Block::new(decl)), LabelType::Loop)
    }

    fn on_if_expr(&mut self, loc: Location, decl: BlockDecl) -> Status {
        let expr = IfExpr {
            true_: Block::new(decl),
            false_: vec![],
        };
        self.append_container(loc, ExprKind::If(expr), LabelType::If)
    }

    fn on_else_expr(&mut self, loc: Location) -> Status {
        match self.label_stack.last_mut() {
            Some(label) if label.label_type == LabelType::If => {
                label.stash();
                label.label_type = LabelType::Else;
                label.slot = 1;
                Status::Ok
            }
            _ => self.print_error(loc, "else expression without matching if"),
        }
    }

    fn on_try_expr(&mut self, loc: Location, decl: BlockDecl) -> Status {
        let expr = TryExpr {
            block: Block::new(decl),
            catches: vec![],
        };
        self.append_container(loc, ExprKind::Try(expr), LabelType::Try)
    }

    fn on_catch_expr(&mut self, loc: Location, except_index: Index) -> Status {
        self.append_catch(loc, Some(Var::Index(except_index)))
    }

    fn on_catch_all_expr(&mut self, loc: Location) -> Status {
        self.append_catch(loc, None)
    }

    fn on_end_expr(&mut self, loc: Location) -> Status {
        match self.pop_label() {
            Some(_) => Status::Ok,
            None => self.print_error(loc, "popping empty label stack"),
        }
    }

    fn on_module_name(&mut self, name: &str) -> Status {
        if !name.is_empty() {
            self.module.name = dollar_name(name);
        }
        Status::Ok
    }

    fn on_function_names_count(&mut self, count: Index) -> Status {
        let num_funcs = self.module.funcs.len() as Index;
        if count > num_funcs {
            let message = format!(
                "expected function name count ({}) <= function count ({})",
                count, num_funcs
            );
            return self.print_error(Location::default(), &message);
        }
        Status::Ok
    }

    fn on_function_name(&mut self, loc: Location, func_index: Index, name: &str) -> Status {
        if name.is_empty() {
            return Status::Ok;
        }
        if self.module.func(func_index).is_none() {
            let message = format!("invalid function index in name section: {}", func_index);
            return self.print_error(loc, &message);
        }
        let name = unique_name(&[&self.module.func_bindings], dollar_name(name));
        self.module.func_bindings.emplace(
            name.as_str(),
            Binding {
                loc,
                index: func_index,
            },
        );
        if let Some(func) = self.module.func_mut(func_index) {
            func.name = name;
        }
        Status::Ok
    }

    fn on_local_name_local_count(&mut self, loc: Location, func_index: Index, count: Index)
        -> Status {
        let num_locals = match self.module.func(func_index) {
            Some(func) => func.num_params_and_locals(),
            None => {
                let message = format!("invalid function index in name section: {}", func_index);
                return self.print_error(loc, &message);
            }
        };
        if count > num_locals {
            let message = format!(
                "expected local name count ({}) <= local count ({})",
                count, num_locals
            );
            return self.print_error(loc, &message);
        }
        Status::Ok
    }

    fn on_local_name(
        &mut self,
        loc: Location,
        func_index: Index,
        local_index: Index,
        name: &str,
    ) -> Status {
        if name.is_empty() {
            return Status::Ok;
        }
        let func = match self.module.func_mut(func_index) {
            Some(func) => func,
            None => {
                let message = format!("invalid function index in name section: {}", func_index);
                return self.print_error(loc, &message);
            }
        };
        if local_index >= func.num_params_and_locals() {
            let message = format!("invalid local index in name section: {}", local_index);
            return self.print_error(loc, &message);
        }
        let name = unique_name(
            &[&func.param_bindings, &func.local_bindings],
            dollar_name(name),
        );
        let num_params = func.num_params();
        if local_index < num_params {
            func.param_bindings.emplace(
                name,
                Binding {
                    loc,
                    index: local_index,
                },
            );
        } else {
            func.local_bindings.emplace(
                name,
                Binding {
                    loc,
                    index: local_index - num_params,
                },
            );
        }
        Status::Ok
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::errors::{Errors, StopAfterFirst};
    use crate::frontend::{read_binary_ir, FrontendOptions};

    fn module_with_func() -> Module {
        let mut module = Module::default();
        module.append_field(ModuleField::FuncType(FuncType {
            name: String::new(),
            sig: FuncSignature {
                param_types: vec![Type::I32],
                result_types: vec![],
            },
        }));
        module
    }

    #[test]
    fn builds_nested_blocks() {
        let mut module = module_with_func();
        let mut errors: Errors = vec![];
        {
            let mut b = BinaryReaderIR::new(&mut module, &mut errors);
            let loc = Location::default();
            assert!(b.on_function(0, 0).is_ok());
            assert!(b.begin_function_body(0).is_ok());
            assert!(b.on_block_expr(loc, BlockDecl::default()).is_ok());
            assert!(b.on_if_expr(loc, BlockDecl::default()).is_ok());
            assert!(b.on_nop_expr(loc).is_ok());
            assert!(b.on_else_expr(loc).is_ok());
            assert!(b.on_unreachable_expr(loc).is_ok());
            assert!(b.on_end_expr(loc).is_ok());
            assert!(b.on_end_expr(loc).is_ok());
            assert!(b.on_drop_expr(loc).is_ok());
            assert!(b.on_end_expr(loc).is_ok());
            assert!(b.end_function_body(0).is_ok());
        }
        assert!(errors.is_empty());
        let func = module.func(0).unwrap();
        assert_eq!(func.exprs.len(), 2);
        let block = match &func.exprs[0].kind {
            ExprKind::Block(b) => b,
            other => panic!("unexpected {:?}", other),
        };
        match &block.exprs[0].kind {
            ExprKind::If(i) => {
                assert_eq!(i.true_.exprs, vec![Expr::new(ExprKind::Nop)]);
                assert_eq!(i.false_, vec![Expr::new(ExprKind::Unreachable)]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(func.exprs[1].kind, ExprKind::Drop);
    }

    #[test]
    fn catches_redirect_the_try() {
        let mut module = module_with_func();
        let mut errors: Errors = vec![];
        {
            let mut b = BinaryReaderIR::new(&mut module, &mut errors);
            let loc = Location::default();
            b.on_function(0, 0);
            b.begin_function_body(0);
            b.on_try_expr(loc, BlockDecl::default());
            b.on_nop_expr(loc);
            b.on_catch_expr(loc, 0);
            b.on_drop_expr(loc);
            b.on_catch_all_expr(loc);
            b.on_unreachable_expr(loc);
            b.on_end_expr(loc);
            b.on_end_expr(loc);
            b.end_function_body(0);
        }
        assert!(errors.is_empty());
        match &module.func(0).unwrap().exprs[0].kind {
            ExprKind::Try(t) => {
                assert_eq!(t.block.exprs.len(), 1);
                assert_eq!(t.catches.len(), 2);
                assert_eq!(t.catches[0].var, Some(Var::Index(0)));
                assert_eq!(t.catches[0].exprs[0].kind, ExprKind::Drop);
                assert!(t.catches[1].is_catch_all());
                assert_eq!(t.catches[1].exprs[0].kind, ExprKind::Unreachable);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn structural_errors_are_reported() {
        let mut module = module_with_func();
        let mut errors: Errors = vec![];
        {
            let mut b = BinaryReaderIR::new(&mut module, &mut errors);
            let loc = Location::at(7);
            b.on_function(0, 0);
            b.begin_function_body(0);
            assert!(b.on_else_expr(loc).is_error());
            assert!(b.on_end_expr(loc).is_ok());
            assert!(b.on_end_expr(loc).is_error());
            assert!(b.on_function_names_count(5).is_error());
        }
        let messages = errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>();
        assert_eq!(
            messages,
            vec![
                "else expression without matching if",
                "popping empty label stack",
                "expected function name count (5) <= function count (1)",
            ]
        );
    }

    #[test]
    fn init_exprs_go_to_their_owner() {
        let mut module = Module::default();
        let mut errors: Errors = vec![];
        {
            let mut b = BinaryReaderIR::new(&mut module, &mut errors);
            let loc = Location::default();
            b.begin_global(0, Type::I32, false);
            b.begin_global_init_expr(0);
            b.on_const_expr(loc, Const::I32(7));
            b.end_global_init_expr(0);
            b.begin_data_segment(0, 0, false);
            b.begin_data_segment_init_expr(0);
            b.on_get_global_expr(loc, 0);
            b.end_data_segment_init_expr(0);
            b.on_data_segment_data(0, b"hi");
        }
        assert!(errors.is_empty());
        assert_eq!(
            module.global(0).unwrap().init_expr,
            vec![Expr::new(ExprKind::Const(Const::I32(7)))]
        );
        let segment = module.data_segment(0).unwrap();
        assert_eq!(segment.offset, vec![Expr::new(ExprKind::GetGlobal(Var::Index(0)))]);
        assert_eq!(segment.data, b"hi".to_vec());
    }

    #[test]
    fn local_names_split_params_and_locals() {
        let mut module = module_with_func();
        let mut errors: Errors = vec![];
        {
            let mut b = BinaryReaderIR::new(&mut module, &mut errors);
            let loc = Location::default();
            b.on_function(0, 0);
            b.begin_function_body(0);
            b.on_local_decl(0, 2, Type::I64);
            b.on_function_name(loc, 0, "f");
            b.on_local_name(loc, 0, 0, "x");
            b.on_local_name(loc, 0, 1, "y");
            b.on_local_name(loc, 0, 2, "y");
        }
        assert!(errors.is_empty());
        let func = module.func(0).unwrap();
        assert_eq!(func.name, "$f");
        assert_eq!(module.func_index(&Var::Name("$f".into())), 0);
        assert_eq!(func.local_index(&Var::Name("$x".into())), 0);
        assert_eq!(func.local_index(&Var::Name("$y".into())), 1);
        assert_eq!(func.local_index(&Var::Name("$y.1".into())), 2);
    }

    #[test]
    fn deep_blocks_are_built() {
        const DEPTH: usize = 100_000;
        let mut module = module_with_func();
        let mut errors: Errors = vec![];
        {
            let mut b = BinaryReaderIR::new(&mut module, &mut errors);
            let loc = Location::default();
            b.on_function(0, 0);
            b.begin_function_body(0);
            for _ in 0..DEPTH {
                b.on_block_expr(loc, BlockDecl::default());
            }
            b.on_nop_expr(loc);
            for _ in 0..=DEPTH {
                b.on_end_expr(loc);
            }
            b.end_function_body(0);
        }
        assert!(errors.is_empty());
        let mut levels = 0;
        let mut list = &module.func(0).unwrap().exprs;
        while let Some(ExprKind::Block(block)) = list.first().map(|e| &e.kind) {
            levels += 1;
            list = &block.exprs;
        }
        assert_eq!(levels, DEPTH);
        assert_eq!(list, &vec![Expr::new(ExprKind::Nop)]);
    }

    #[test]
    fn unterminated_body_keeps_its_blocks() {
        let mut module = module_with_func();
        let mut errors: Errors = vec![];
        {
            let mut b = BinaryReaderIR::new(&mut module, &mut errors);
            let loc = Location::default();
            b.on_function(0, 0);
            b.begin_function_body(0);
            b.on_block_expr(loc, BlockDecl::default());
            b.on_nop_expr(loc);
            assert!(b.end_function_body(0).is_error());
        }
        assert_eq!(errors.len(), 1);
        match &module.func(0).unwrap().exprs[..] {
            [Expr {
                kind: ExprKind::Block(block),
                ..
            }] => assert_eq!(block.exprs.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    /// A `name` section naming functions 5 and 6 of a module without
    /// functions.
    #[rustfmt::skip]
    const BAD_NAMES: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00,
        0x00, 0x0e, 0x04, b'n', b'a', b'm', b'e',
        0x01, 0x07, 0x02, 0x05, 0x01, b'a', 0x06, 0x01, b'b',
    ];

    #[test]
    fn every_error_is_reported_by_default() {
        let mut module = Module::default();
        let mut errors: Errors = vec![];
        let status =
            read_binary_ir(BAD_NAMES, &FrontendOptions::default(), &mut module, &mut errors)
                .unwrap();
        assert!(status.is_error());
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn handler_can_stop_after_first_error() {
        let mut module = Module::default();
        let mut handler = StopAfterFirst::default();
        let status =
            read_binary_ir(BAD_NAMES, &FrontendOptions::default(), &mut module, &mut handler)
                .unwrap();
        assert!(status.is_error());
        assert_eq!(handler.0.len(), 1);
        assert_eq!(
            handler.0[0].message,
            "expected function name count (2) <= function count (0)"
        );
    }
}
