//! Drives a `BinaryReaderDelegate` from wasmparser's payload stream.
//!
//! wasmparser does the byte-level work (section framing, LEB128,
//! opcode decoding); this module turns each payload and operator into
//! one delegate callback, in module order.

use super::FrontendOptions;
use crate::errors::{FrontendError, Status};
use crate::ir::{BlockDecl, Const, ExternalKind, Index, Limits, Location, Type, Var};
use crate::opcode::{Opcode, OpcodeKind};
use anyhow::{bail, Result};
use log::{debug, trace, warn};
use wasmparser::{
    BinaryReader, BlockType, DataKind, ElementItem, ElementKind, Operator, OperatorsReader, Parser,
    Payload, TypeRef,
};

/// Upper bound on declared locals per function.
const MAX_FUNCTION_LOCALS: u64 = 50_000;

/// Receives the contents of a binary module, one syntactic unit at a
/// time. Indices are in the binary's index spaces; `loc` is the byte
/// offset of the unit.
#[allow(unused_variables)]
pub trait BinaryReaderDelegate {
    /// Whether reading should end early. Checked between payloads and
    /// between the instructions of a function body.
    fn stopped(&self) -> bool {
        false
    }

    fn on_type(&mut self, index: Index, params: &[Type], results: &[Type]) -> Status;

    fn on_import_func(
        &mut self,
        import_index: Index,
        module_name: &str,
        field_name: &str,
        func_index: Index,
        sig_index: Index,
    ) -> Status;
    fn on_import_table(
        &mut self,
        import_index: Index,
        module_name: &str,
        field_name: &str,
        table_index: Index,
        elem_type: Type,
        elem_limits: Limits,
    ) -> Status;
    fn on_import_memory(
        &mut self,
        import_index: Index,
        module_name: &str,
        field_name: &str,
        memory_index: Index,
        page_limits: Limits,
    ) -> Status;
    fn on_import_global(
        &mut self,
        import_index: Index,
        module_name: &str,
        field_name: &str,
        global_index: Index,
        ty: Type,
        mutable: bool,
    ) -> Status;
    fn on_import_except(
        &mut self,
        import_index: Index,
        module_name: &str,
        field_name: &str,
        except_index: Index,
        sig_index: Index,
    ) -> Status;

    fn on_function(&mut self, index: Index, sig_index: Index) -> Status;
    fn on_table(&mut self, index: Index, elem_type: Type, elem_limits: Limits) -> Status;
    fn on_memory(&mut self, index: Index, page_limits: Limits) -> Status;
    /// A tag declared in the tag section, typed by a function type.
    fn on_tag(&mut self, index: Index, sig_index: Index) -> Status;
    /// An exception declared in the custom `exception` section.
    fn on_except_type(&mut self, index: Index, sig: &[Type]) -> Status;

    fn begin_global(&mut self, index: Index, ty: Type, mutable: bool) -> Status;
    fn begin_global_init_expr(&mut self, index: Index) -> Status;
    fn end_global_init_expr(&mut self, index: Index) -> Status;
    fn end_global(&mut self, index: Index) -> Status {
        Status::Ok
    }

    fn on_export(&mut self, index: Index, kind: ExternalKind, item_index: Index, name: &str)
        -> Status;
    fn on_start_function(&mut self, func_index: Index) -> Status;

    fn begin_elem_segment(&mut self, index: Index, table_index: Index, passive: bool) -> Status;
    fn begin_elem_segment_init_expr(&mut self, index: Index) -> Status;
    fn end_elem_segment_init_expr(&mut self, index: Index) -> Status;
    fn on_elem_segment_function_index(&mut self, segment_index: Index, func_index: Index)
        -> Status;
    fn end_elem_segment(&mut self, index: Index) -> Status {
        Status::Ok
    }

    fn begin_data_segment(&mut self, index: Index, memory_index: Index, passive: bool) -> Status;
    fn begin_data_segment_init_expr(&mut self, index: Index) -> Status;
    fn end_data_segment_init_expr(&mut self, index: Index) -> Status;
    fn on_data_segment_data(&mut self, index: Index, data: &[u8]) -> Status;
    fn end_data_segment(&mut self, index: Index) -> Status {
        Status::Ok
    }

    fn begin_function_body(&mut self, index: Index) -> Status;
    fn on_local_decl(&mut self, decl_index: Index, count: Index, ty: Type) -> Status;
    fn end_function_body(&mut self, index: Index) -> Status;

    fn on_binary_expr(&mut self, loc: Location, opcode: Opcode) -> Status;
    fn on_compare_expr(&mut self, loc: Location, opcode: Opcode) -> Status;
    fn on_convert_expr(&mut self, loc: Location, opcode: Opcode) -> Status;
    fn on_unary_expr(&mut self, loc: Location, opcode: Opcode) -> Status;
    fn on_ternary_expr(&mut self, loc: Location, opcode: Opcode) -> Status;
    fn on_const_expr(&mut self, loc: Location, value: Const) -> Status;
    fn on_load_expr(&mut self, loc: Location, opcode: Opcode, align: u32, offset: u64) -> Status;
    fn on_store_expr(&mut self, loc: Location, opcode: Opcode, align: u32, offset: u64)
        -> Status;
    fn on_drop_expr(&mut self, loc: Location) -> Status;
    fn on_select_expr(&mut self, loc: Location) -> Status;
    fn on_nop_expr(&mut self, loc: Location) -> Status;
    fn on_unreachable_expr(&mut self, loc: Location) -> Status;
    fn on_return_expr(&mut self, loc: Location) -> Status;
    fn on_br_expr(&mut self, loc: Location, depth: Index) -> Status;
    fn on_br_if_expr(&mut self, loc: Location, depth: Index) -> Status;
    fn on_br_table_expr(&mut self, loc: Location, targets: &[Index], default: Index) -> Status;
    fn on_call_expr(&mut self, loc: Location, func_index: Index) -> Status;
    fn on_call_indirect_expr(&mut self, loc: Location, sig_index: Index, table_index: Index)
        -> Status;
    fn on_return_call_expr(&mut self, loc: Location, func_index: Index) -> Status;
    fn on_return_call_indirect_expr(
        &mut self,
        loc: Location,
        sig_index: Index,
        table_index: Index,
    ) -> Status;
    fn on_get_local_expr(&mut self, loc: Location, local_index: Index) -> Status;
    fn on_set_local_expr(&mut self, loc: Location, local_index: Index) -> Status;
    fn on_tee_local_expr(&mut self, loc: Location, local_index: Index) -> Status;
    fn on_get_global_expr(&mut self, loc: Location, global_index: Index) -> Status;
    fn on_set_global_expr(&mut self, loc: Location, global_index: Index) -> Status;
    fn on_memory_size_expr(&mut self, loc: Location) -> Status;
    fn on_memory_grow_expr(&mut self, loc: Location) -> Status;
    fn on_memory_copy_expr(&mut self, loc: Location) -> Status;
    fn on_memory_fill_expr(&mut self, loc: Location) -> Status;
    fn on_memory_init_expr(&mut self, loc: Location, segment: Index) -> Status;
    fn on_data_drop_expr(&mut self, loc: Location, segment: Index) -> Status;
    fn on_table_copy_expr(&mut self, loc: Location) -> Status;
    fn on_table_init_expr(&mut self, loc: Location, segment: Index) -> Status;
    fn on_elem_drop_expr(&mut self, loc: Location, segment: Index) -> Status;
    fn on_throw_expr(&mut self, loc: Location, except_index: Index) -> Status;
    fn on_rethrow_expr(&mut self, loc: Location, depth: Index) -> Status;
    fn on_simd_lane_op_expr(&mut self, loc: Location, opcode: Opcode, lane: u8) -> Status;
    fn on_simd_shuffle_op_expr(&mut self, loc: Location, opcode: Opcode, lanes: [u8; 16])
        -> Status;

    fn on_block_expr(&mut self, loc: Location, decl: BlockDecl) -> Status;
    fn on_loop_expr(&mut self, loc: Location, decl: BlockDecl) -> Status;
    fn on_if_expr(&mut self, loc: Location, decl: BlockDecl) -> Status;
    fn on_else_expr(&mut self, loc: Location) -> Status;
    fn on_try_expr(&mut self, loc: Location, decl: BlockDecl) -> Status;
    fn on_catch_expr(&mut self, loc: Location, except_index: Index) -> Status;
    fn on_catch_all_expr(&mut self, loc: Location) -> Status;
    fn on_end_expr(&mut self, loc: Location) -> Status;

    fn on_module_name(&mut self, name: &str) -> Status {
        Status::Ok
    }
    fn on_function_names_count(&mut self, count: Index) -> Status {
        Status::Ok
    }
    fn on_function_name(&mut self, loc: Location, func_index: Index, name: &str) -> Status {
        Status::Ok
    }
    fn on_local_name_local_count(&mut self, loc: Location, func_index: Index, count: Index)
        -> Status {
        Status::Ok
    }
    fn on_local_name(
        &mut self,
        loc: Location,
        func_index: Index,
        local_index: Index,
        name: &str,
    ) -> Status {
        Status::Ok
    }
}

/// Counters for the index spaces that imports and definitions share.
#[derive(Default)]
struct Counts {
    imports: Index,
    funcs: Index,
    tables: Index,
    memories: Index,
    globals: Index,
    excepts: Index,
    elem_segments: Index,
    data_segments: Index,
    types: Index,
    num_func_imports: Index,
    code_entries: Index,
}

fn limits(initial: u64, maximum: Option<u64>, is_shared: bool) -> Limits {
    Limits {
        initial,
        max: maximum,
        is_shared,
    }
}

fn block_decl(ty: BlockType) -> BlockDecl {
    match ty {
        BlockType::Empty => BlockDecl::Inline(vec![]),
        BlockType::Type(ty) => BlockDecl::Inline(vec![ty.into()]),
        BlockType::FuncType(index) => BlockDecl::FuncType(Var::Index(index)),
    }
}

fn unsupported<T>(what: String) -> Result<T> {
    Err(FrontendError::UnsupportedFeature(what).into())
}

/// Reads the whole module in `bytes`, reporting it to `delegate`.
/// Malformed input stops the read with an error; problems that the
/// delegate reports are folded into the returned status.
pub fn read_binary<D: BinaryReaderDelegate + ?Sized>(
    bytes: &[u8],
    options: &FrontendOptions,
    delegate: &mut D,
) -> Result<Status> {
    let mut counts = Counts::default();
    let mut status = Status::Ok;
    for payload in Parser::new(0).parse_all(bytes) {
        let payload = payload?;
        status |= read_payload(delegate, options, payload, &mut counts)?;
        if delegate.stopped() {
            debug!("reading stopped by the error handler");
            return Ok(Status::Error);
        }
    }
    debug!(
        "read {} funcs ({} imported), {} globals, {} imports",
        counts.funcs, counts.num_func_imports, counts.globals, counts.imports
    );
    Ok(status)
}

fn read_payload<D: BinaryReaderDelegate + ?Sized>(
    delegate: &mut D,
    options: &FrontendOptions,
    payload: Payload<'_>,
    counts: &mut Counts,
) -> Result<Status> {
    trace!("Wasm parser item: {:?}", payload);
    let mut status = Status::Ok;
    match payload {
        Payload::Version { num, .. } => {
            if num != 1 {
                return unsupported(format!("binary version {}", num));
            }
        }
        Payload::TypeSection(reader) => {
            for ty in reader {
                match ty? {
                    wasmparser::Type::Func(fty) => {
                        let params = fty.params().iter().map(|&t| t.into()).collect::<Vec<Type>>();
                        let results =
                            fty.results().iter().map(|&t| t.into()).collect::<Vec<Type>>();
                        status |= delegate.on_type(counts.types, &params, &results);
                        counts.types += 1;
                    }
                    #[allow(unreachable_patterns)]
                    other => return unsupported(format!("type {:?}", other)),
                }
            }
        }
        Payload::ImportSection(reader) => {
            for import in reader {
                let import = import?;
                let (module, field) = (import.module, import.name);
                let index = counts.imports;
                status |= match import.ty {
                    TypeRef::Func(sig_index) => {
                        counts.funcs += 1;
                        counts.num_func_imports += 1;
                        delegate.on_import_func(index, module, field, counts.funcs - 1, sig_index)
                    }
                    TypeRef::Table(ty) => {
                        counts.tables += 1;
                        delegate.on_import_table(
                            index,
                            module,
                            field,
                            counts.tables - 1,
                            ty.element_type.into(),
                            limits(ty.initial.into(), ty.maximum.map(u64::from), false),
                        )
                    }
                    TypeRef::Memory(ty) => {
                        if ty.memory64 {
                            return unsupported("64-bit memory".to_owned());
                        }
                        counts.memories += 1;
                        delegate.on_import_memory(
                            index,
                            module,
                            field,
                            counts.memories - 1,
                            limits(ty.initial, ty.maximum, ty.shared),
                        )
                    }
                    TypeRef::Global(ty) => {
                        counts.globals += 1;
                        delegate.on_import_global(
                            index,
                            module,
                            field,
                            counts.globals - 1,
                            ty.content_type.into(),
                            ty.mutable,
                        )
                    }
                    TypeRef::Tag(ty) => {
                        counts.excepts += 1;
                        delegate.on_import_except(
                            index,
                            module,
                            field,
                            counts.excepts - 1,
                            ty.func_type_idx,
                        )
                    }
                };
                counts.imports += 1;
            }
        }
        Payload::FunctionSection(reader) => {
            for sig_index in reader {
                let sig_index = sig_index?;
                status |= delegate.on_function(counts.funcs, sig_index);
                counts.funcs += 1;
            }
        }
        Payload::TableSection(reader) => {
            for ty in reader {
                let ty = ty?;
                status |= delegate.on_table(
                    counts.tables,
                    ty.element_type.into(),
                    limits(ty.initial.into(), ty.maximum.map(u64::from), false),
                );
                counts.tables += 1;
            }
        }
        Payload::MemorySection(reader) => {
            for ty in reader {
                let ty = ty?;
                if ty.memory64 {
                    return unsupported("64-bit memory".to_owned());
                }
                status |= delegate.on_memory(
                    counts.memories,
                    limits(ty.initial, ty.maximum, ty.shared),
                );
                counts.memories += 1;
            }
        }
        Payload::TagSection(reader) => {
            for ty in reader {
                let ty = ty?;
                status |= delegate.on_tag(counts.excepts, ty.func_type_idx);
                counts.excepts += 1;
            }
        }
        Payload::GlobalSection(reader) => {
            for global in reader {
                let global = global?;
                let index = counts.globals;
                status |= delegate.begin_global(
                    index,
                    global.ty.content_type.into(),
                    global.ty.mutable,
                );
                status |= delegate.begin_global_init_expr(index);
                status |= read_init_expr(delegate, global.init_expr.get_operators_reader())?;
                status |= delegate.end_global_init_expr(index);
                status |= delegate.end_global(index);
                counts.globals += 1;
            }
        }
        Payload::ExportSection(reader) => {
            for (index, export) in reader.into_iter().enumerate() {
                let export = export?;
                status |= delegate.on_export(
                    index as Index,
                    export.kind.into(),
                    export.index,
                    export.name,
                );
            }
        }
        Payload::StartSection { func, .. } => {
            status |= delegate.on_start_function(func);
        }
        Payload::ElementSection(reader) => {
            for elem in reader {
                let elem = elem?;
                let index = counts.elem_segments;
                match elem.kind {
                    ElementKind::Passive => {
                        status |= delegate.begin_elem_segment(index, 0, true);
                    }
                    ElementKind::Active {
                        table_index,
                        offset_expr,
                    } => {
                        status |= delegate.begin_elem_segment(index, table_index, false);
                        status |= delegate.begin_elem_segment_init_expr(index);
                        status |= read_init_expr(delegate, offset_expr.get_operators_reader())?;
                        status |= delegate.end_elem_segment_init_expr(index);
                    }
                    ElementKind::Declared => {
                        return unsupported("declarative element segment".to_owned());
                    }
                }
                let mut items = elem.items.get_items_reader()?;
                for _ in 0..items.get_count() {
                    match items.read()? {
                        ElementItem::Func(func_index) => {
                            status |= delegate.on_elem_segment_function_index(index, func_index);
                        }
                        ElementItem::Expr(_) => {
                            return unsupported("element expression".to_owned());
                        }
                    }
                }
                status |= delegate.end_elem_segment(index);
                counts.elem_segments += 1;
            }
        }
        Payload::DataSection(reader) => {
            for data in reader {
                let data = data?;
                let index = counts.data_segments;
                match data.kind {
                    DataKind::Passive => {
                        status |= delegate.begin_data_segment(index, 0, true);
                    }
                    DataKind::Active {
                        memory_index,
                        offset_expr,
                    } => {
                        status |= delegate.begin_data_segment(index, memory_index, false);
                        status |= delegate.begin_data_segment_init_expr(index);
                        status |= read_init_expr(delegate, offset_expr.get_operators_reader())?;
                        status |= delegate.end_data_segment_init_expr(index);
                    }
                }
                status |= delegate.on_data_segment_data(index, data.data);
                status |= delegate.end_data_segment(index);
                counts.data_segments += 1;
            }
        }
        Payload::CodeSectionEntry(body) => {
            let func_index = counts.num_func_imports + counts.code_entries;
            counts.code_entries += 1;
            status |= delegate.begin_function_body(func_index);

            let mut locals = body.get_locals_reader()?;
            let mut total: u64 = 0;
            for decl_index in 0..locals.get_count() {
                let (count, ty) = locals.read()?;
                total += u64::from(count);
                if total > MAX_FUNCTION_LOCALS {
                    return Err(FrontendError::TooLarge(format!(
                        "function {} declares more than {} locals",
                        func_index, MAX_FUNCTION_LOCALS
                    ))
                    .into());
                }
                status |= delegate.on_local_decl(decl_index, count, ty.into());
            }

            for item in body.get_operators_reader()?.into_iter_with_offsets() {
                let (op, offset) = item?;
                status |= read_operator(delegate, &op, Location::at(offset))?;
                if delegate.stopped() {
                    return Ok(Status::Error);
                }
            }
            status |= delegate.end_function_body(func_index);
        }
        Payload::CustomSection(reader) => match reader.name() {
            "name" if options.read_debug_names => {
                status |= read_name_section(delegate, reader.data(), reader.data_offset())?;
            }
            "exception" => {
                status |= read_exception_section(
                    delegate,
                    reader.data(),
                    reader.data_offset(),
                    counts,
                )?;
            }
            name => trace!("skipping custom section {:?}", name),
        },
        Payload::CodeSectionStart { .. }
        | Payload::DataCountSection { .. }
        | Payload::End(_) => {}
        other => {
            warn!("ignoring unsupported payload {:?}", other);
        }
    }
    Ok(status)
}

/// Constant expressions use the function-body callbacks; the closing
/// `end` is not reported.
fn read_init_expr<D: BinaryReaderDelegate + ?Sized>(
    delegate: &mut D,
    reader: OperatorsReader<'_>,
) -> Result<Status> {
    let mut status = Status::Ok;
    for item in reader.into_iter_with_offsets() {
        let (op, offset) = item?;
        if let Operator::End = op {
            continue;
        }
        status |= read_operator(delegate, &op, Location::at(offset))?;
    }
    Ok(status)
}

fn read_operator<D: BinaryReaderDelegate + ?Sized>(
    delegate: &mut D,
    op: &Operator<'_>,
    loc: Location,
) -> Result<Status> {
    let status = match op {
        Operator::Unreachable => delegate.on_unreachable_expr(loc),
        Operator::Nop => delegate.on_nop_expr(loc),
        Operator::Block { blockty } => delegate.on_block_expr(loc, block_decl(*blockty)),
        Operator::Loop { blockty } => delegate.on_loop_expr(loc, block_decl(*blockty)),
        Operator::If { blockty } => delegate.on_if_expr(loc, block_decl(*blockty)),
        Operator::Else => delegate.on_else_expr(loc),
        Operator::Try { blockty } => delegate.on_try_expr(loc, block_decl(*blockty)),
        Operator::Catch { tag_index } => delegate.on_catch_expr(loc, *tag_index),
        Operator::CatchAll => delegate.on_catch_all_expr(loc),
        Operator::Throw { tag_index } => delegate.on_throw_expr(loc, *tag_index),
        Operator::Rethrow { relative_depth } => delegate.on_rethrow_expr(loc, *relative_depth),
        Operator::End => delegate.on_end_expr(loc),
        Operator::Br { relative_depth } => delegate.on_br_expr(loc, *relative_depth),
        Operator::BrIf { relative_depth } => delegate.on_br_if_expr(loc, *relative_depth),
        Operator::BrTable { targets } => {
            let mut depths = vec![];
            for target in targets.targets() {
                depths.push(target?);
            }
            delegate.on_br_table_expr(loc, &depths, targets.default())
        }
        Operator::Return => delegate.on_return_expr(loc),
        Operator::Call { function_index } => delegate.on_call_expr(loc, *function_index),
        Operator::CallIndirect {
            type_index,
            table_index,
            ..
        } => delegate.on_call_indirect_expr(loc, *type_index, *table_index),
        Operator::ReturnCall { function_index } => {
            delegate.on_return_call_expr(loc, *function_index)
        }
        Operator::ReturnCallIndirect {
            type_index,
            table_index,
        } => delegate.on_return_call_indirect_expr(loc, *type_index, *table_index),
        Operator::Drop => delegate.on_drop_expr(loc),
        Operator::Select => delegate.on_select_expr(loc),
        Operator::LocalGet { local_index } => delegate.on_get_local_expr(loc, *local_index),
        Operator::LocalSet { local_index } => delegate.on_set_local_expr(loc, *local_index),
        Operator::LocalTee { local_index } => delegate.on_tee_local_expr(loc, *local_index),
        Operator::GlobalGet { global_index } => delegate.on_get_global_expr(loc, *global_index),
        Operator::GlobalSet { global_index } => delegate.on_set_global_expr(loc, *global_index),
        Operator::MemorySize { mem: 0, .. } => delegate.on_memory_size_expr(loc),
        Operator::MemoryGrow { mem: 0, .. } => delegate.on_memory_grow_expr(loc),
        Operator::I32Const { value } => delegate.on_const_expr(loc, Const::I32(*value as u32)),
        Operator::I64Const { value } => delegate.on_const_expr(loc, Const::I64(*value as u64)),
        Operator::F32Const { value } => delegate.on_const_expr(loc, Const::F32(value.bits())),
        Operator::F64Const { value } => delegate.on_const_expr(loc, Const::F64(value.bits())),
        Operator::V128Const { value } => delegate.on_const_expr(loc, Const::V128(*value.bytes())),
        Operator::MemoryInit { data_index, mem: 0 } => {
            delegate.on_memory_init_expr(loc, *data_index)
        }
        Operator::DataDrop { data_index } => delegate.on_data_drop_expr(loc, *data_index),
        Operator::MemoryCopy {
            dst_mem: 0,
            src_mem: 0,
        } => delegate.on_memory_copy_expr(loc),
        Operator::MemoryFill { mem: 0 } => delegate.on_memory_fill_expr(loc),
        Operator::TableInit {
            elem_index,
            table: 0,
        } => delegate.on_table_init_expr(loc, *elem_index),
        Operator::ElemDrop { elem_index } => delegate.on_elem_drop_expr(loc, *elem_index),
        Operator::TableCopy {
            dst_table: 0,
            src_table: 0,
        } => delegate.on_table_copy_expr(loc),
        Operator::I8x16Shuffle { lanes } => {
            delegate.on_simd_shuffle_op_expr(loc, Opcode::I8x16Shuffle, *lanes)
        }
        op => {
            if let Some((opcode, memarg)) = Opcode::from_memory_operator(op) {
                if memarg.memory != 0 {
                    return unsupported(format!("{:?}", op));
                }
                let align = u32::from(memarg.align);
                match opcode.kind() {
                    OpcodeKind::Store => delegate.on_store_expr(loc, opcode, align, memarg.offset),
                    _ => delegate.on_load_expr(loc, opcode, align, memarg.offset),
                }
            } else if let Some((opcode, lane)) = Opcode::from_lane_operator(op) {
                delegate.on_simd_lane_op_expr(loc, opcode, lane)
            } else if let Some(opcode) = Opcode::from_plain_operator(op) {
                match opcode.kind() {
                    OpcodeKind::Unary => delegate.on_unary_expr(loc, opcode),
                    OpcodeKind::Binary => delegate.on_binary_expr(loc, opcode),
                    OpcodeKind::Compare => delegate.on_compare_expr(loc, opcode),
                    OpcodeKind::Convert => delegate.on_convert_expr(loc, opcode),
                    OpcodeKind::Ternary => delegate.on_ternary_expr(loc, opcode),
                    _ => return unsupported(format!("{:?}", op)),
                }
            } else {
                return unsupported(format!("{:?}", op));
            }
        }
    };
    Ok(status)
}

fn read_name_section<D: BinaryReaderDelegate + ?Sized>(
    delegate: &mut D,
    data: &[u8],
    offset: usize,
) -> Result<Status> {
    let mut status = Status::Ok;
    let mut reader = BinaryReader::new_with_offset(data, offset);
    while !reader.eof() {
        let id = reader.read_u8()?;
        let size = reader.read_var_u32()? as usize;
        let start = reader.original_position();
        let mut sub = BinaryReader::new_with_offset(reader.read_bytes(size)?, start);
        match id {
            0 => {
                status |= delegate.on_module_name(sub.read_string()?);
            }
            1 => {
                let count = sub.read_var_u32()?;
                status |= delegate.on_function_names_count(count);
                for _ in 0..count {
                    if delegate.stopped() {
                        return Ok(Status::Error);
                    }
                    let loc = Location::at(sub.original_position());
                    let func_index = sub.read_var_u32()?;
                    let name = sub.read_string()?;
                    status |= delegate.on_function_name(loc, func_index, name);
                }
            }
            2 => {
                let count = sub.read_var_u32()?;
                for _ in 0..count {
                    let loc = Location::at(sub.original_position());
                    let func_index = sub.read_var_u32()?;
                    let num_names = sub.read_var_u32()?;
                    status |= delegate.on_local_name_local_count(loc, func_index, num_names);
                    for _ in 0..num_names {
                        if delegate.stopped() {
                            return Ok(Status::Error);
                        }
                        let loc = Location::at(sub.original_position());
                        let local_index = sub.read_var_u32()?;
                        let name = sub.read_string()?;
                        status |= delegate.on_local_name(loc, func_index, local_index, name);
                    }
                }
            }
            _ => warn!("skipping name subsection {}", id),
        }
    }
    Ok(status)
}

fn read_value_type(reader: &mut BinaryReader<'_>) -> Result<Type> {
    let pos = reader.original_position();
    Ok(match reader.read_u8()? {
        0x7f => Type::I32,
        0x7e => Type::I64,
        0x7d => Type::F32,
        0x7c => Type::F64,
        0x7b => Type::V128,
        0x70 => Type::FuncRef,
        0x6f => Type::ExternRef,
        code => bail!("invalid value type {:#x} at offset {:#x}", code, pos),
    })
}

fn read_exception_section<D: BinaryReaderDelegate + ?Sized>(
    delegate: &mut D,
    data: &[u8],
    offset: usize,
    counts: &mut Counts,
) -> Result<Status> {
    let mut status = Status::Ok;
    let mut reader = BinaryReader::new_with_offset(data, offset);
    let count = reader.read_var_u32()?;
    for _ in 0..count {
        let num_types = reader.read_var_u32()?;
        let mut sig = vec![];
        for _ in 0..num_types {
            sig.push(read_value_type(&mut reader)?);
        }
        status |= delegate.on_except_type(counts.excepts, &sig);
        counts.excepts += 1;
    }
    Ok(status)
}
