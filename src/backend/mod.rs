//! Backend: IR to Wasm.

use crate::entity::EntityRef;
use crate::errors::{ErrorHandler, Status};
use crate::ir::{
    make_type_binding_reverse_mapping, BlockDecl, Catch, Const, DataSegment, ElemSegment, Expr,
    ExprKind, ExprList, ExternalKind, Func, FuncDeclaration, FuncSignature, Global, ImportKind,
    Index, Limits, Location, Module, Type, Var, INVALID_INDEX,
};
use crate::opcode::Opcode;
use fxhash::FxHashMap;
use log::{debug, trace};

pub mod linking;
pub mod stream;

use linking::{
    Reloc, RelocSection, RelocType, SymbolInfo, SymbolKind, SymbolTable,
    LINKING_METADATA_VERSION, LINKING_SYMBOL_TABLE, SYMBOL_FLAG_EXPORTED, SYMBOL_FLAG_UNDEFINED,
};
use stream::{Stream, MAX_U32_LEB128_BYTES};

const BINARY_MAGIC: u32 = 0x6d73_6100;
const BINARY_VERSION: u32 = 1;

/// Width first reserved for a size when sizes are canonicalized.
const LEB_SIZE_GUESS: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SectionCode {
    Custom = 0,
    Type = 1,
    Import = 2,
    Function = 3,
    Table = 4,
    Memory = 5,
    Global = 6,
    Export = 7,
    Start = 8,
    Elem = 9,
    Code = 10,
    Data = 11,
    DataCount = 12,
}

impl SectionCode {
    fn name(self) -> &'static str {
        match self {
            SectionCode::Custom => "CUSTOM",
            SectionCode::Type => "TYPE",
            SectionCode::Import => "IMPORT",
            SectionCode::Function => "FUNCTION",
            SectionCode::Table => "TABLE",
            SectionCode::Memory => "MEMORY",
            SectionCode::Global => "GLOBAL",
            SectionCode::Export => "EXPORT",
            SectionCode::Start => "START",
            SectionCode::Elem => "ELEM",
            SectionCode::Code => "CODE",
            SectionCode::Data => "DATA",
            SectionCode::DataCount => "DATACOUNT",
        }
    }
}

/// Options for the backend.
#[derive(Clone, Debug)]
pub struct WriteBinaryOptions {
    /// Encode section, subsection and body sizes minimally. Otherwise
    /// they are padded to five bytes.
    pub canonicalize_lebs: bool,
    /// Pad relocatable operands to five bytes and emit `linking` and
    /// `reloc.*` sections.
    pub relocatable: bool,
    /// Emit a `name` section.
    pub write_debug_names: bool,
}

impl Default for WriteBinaryOptions {
    fn default() -> Self {
        WriteBinaryOptions {
            canonicalize_lebs: true,
            relocatable: false,
            write_debug_names: false,
        }
    }
}

/// A reserved size slot awaiting its value.
#[derive(Clone, Copy, Debug)]
struct Fixup {
    offset: usize,
    guess: usize,
}

/// Work left over from an open structured instruction.
enum Pending<'e> {
    Exprs(std::slice::Iter<'e, Expr>),
    /// `else` followed by the false arm.
    Else(&'e [Expr]),
    /// A handler header followed by its body.
    Catch(&'e Catch),
    End,
}

fn strip_dollar(name: &str) -> &str {
    name.strip_prefix('$').unwrap_or(name)
}

struct BinaryWriter<'a> {
    module: &'a Module,
    options: &'a WriteBinaryOptions,
    errors: &'a mut dyn ErrorHandler,
    stream: Stream,
    status: Status,
    /// Sections finished so far; also the index of the open section.
    section_count: Index,
    section_code: SectionCode,
    section_size: Option<Fixup>,
    section_payload_offset: usize,
    subsection_size: Option<Fixup>,
    reloc_sections: Vec<RelocSection>,
    symtab: SymbolTable,
    exported: FxHashMap<(ExternalKind, Index), &'a str>,
    /// Set when the error handler asks to stop.
    stopped: bool,
}

impl<'a> BinaryWriter<'a> {
    fn new(
        module: &'a Module,
        options: &'a WriteBinaryOptions,
        errors: &'a mut dyn ErrorHandler,
    ) -> Self {
        BinaryWriter {
            module,
            options,
            errors,
            stream: Stream::new(),
            status: Status::Ok,
            section_count: 0,
            section_code: SectionCode::Custom,
            section_size: None,
            section_payload_offset: 0,
            subsection_size: None,
            reloc_sections: vec![],
            symtab: SymbolTable::default(),
            exported: module.export_names(),
            stopped: false,
        }
    }

    fn error(&mut self, loc: Location, message: String) {
        if !self.errors.on_error(loc, &message) {
            self.stopped = true;
        }
        self.status = Status::Error;
    }

    fn size_guess(&self) -> usize {
        if self.options.canonicalize_lebs {
            LEB_SIZE_GUESS
        } else {
            MAX_U32_LEB128_BYTES
        }
    }

    fn reserve_size(&mut self) -> Fixup {
        let guess = self.size_guess();
        let offset = self.stream.write_u32_leb128_space(guess);
        Fixup { offset, guess }
    }

    /// Fills a size slot inside the open section, moving the relocs
    /// recorded after it along with the payload.
    fn fixup_inner_size(&mut self, fixup: Fixup) {
        let delta = self.stream.fixup_u32_leb128_size(
            fixup.offset,
            fixup.guess,
            self.options.canonicalize_lebs,
        );
        if delta == 0 {
            return;
        }
        let from = (fixup.offset + fixup.guess - self.section_payload_offset) as u32;
        let section_count = self.section_count;
        if let Some(section) = self
            .reloc_sections
            .last_mut()
            .filter(|s| s.section_index == section_count)
        {
            section.shift_from(from, delta);
        }
    }

    fn begin_known_section(&mut self, code: SectionCode) {
        debug_assert!(self.section_size.is_none());
        self.stream.write_u8(code as u8);
        self.section_code = code;
        self.section_size = Some(self.reserve_size());
        self.section_payload_offset = self.stream.offset();
    }

    fn begin_custom_section(&mut self, name: &str) {
        self.begin_known_section(SectionCode::Custom);
        self.stream.write_str(name);
    }

    fn end_section(&mut self) {
        if let Some(fixup) = self.section_size.take() {
            self.stream.fixup_u32_leb128_size(
                fixup.offset,
                fixup.guess,
                self.options.canonicalize_lebs,
            );
            trace!(
                "wrote section {} ({}) ending at {:#x}",
                self.section_count,
                self.section_code.name(),
                self.stream.offset()
            );
            self.section_count += 1;
        }
    }

    fn begin_subsection(&mut self, id: u8) {
        debug_assert!(self.subsection_size.is_none());
        self.stream.write_u8(id);
        self.subsection_size = Some(self.reserve_size());
    }

    fn end_subsection(&mut self) {
        if let Some(fixup) = self.subsection_size.take() {
            self.fixup_inner_size(fixup);
        }
    }

    fn add_reloc(&mut self, ty: RelocType, index: Index) {
        let offset = (self.stream.offset() - self.section_payload_offset) as u32;
        let needs_section = match self.reloc_sections.last() {
            Some(section) => section.section_index != self.section_count,
            None => true,
        };
        if needs_section {
            self.reloc_sections
                .push(RelocSection::new(self.section_code.name(), self.section_count));
        }
        if let Some(section) = self.reloc_sections.last_mut() {
            section.relocs.push(Reloc {
                ty,
                offset,
                index,
                addend: 0,
            });
        }
    }

    fn is_exported(&self, kind: ExternalKind, index: Index) -> bool {
        self.exported.contains_key(&(kind, index))
    }

    fn symbol_index(&mut self, kind: SymbolKind, index: Index) -> Index {
        let module = self.module;
        let (external, name) = match kind {
            SymbolKind::Function => (
                ExternalKind::Func,
                module.func(index).map(|f| f.name.as_str()),
            ),
            SymbolKind::Global => (
                ExternalKind::Global,
                module.global(index).map(|g| g.name.as_str()),
            ),
        };
        let mut flags = 0;
        if module.is_import(external, index) {
            flags |= SYMBOL_FLAG_UNDEFINED;
        }
        if self.is_exported(external, index) {
            flags |= SYMBOL_FLAG_EXPORTED;
        }
        let info = SymbolInfo {
            kind,
            flags,
            element_index: index,
            name: strip_dollar(name.unwrap_or("")).to_owned(),
        };
        self.symtab.intern(kind, index, move || info).index() as Index
    }

    /// Writes an index operand a linker may rewrite: padded to five
    /// bytes and recorded when relocatable.
    fn write_u32_leb128_with_reloc(&mut self, value: Index, ty: RelocType) {
        if !self.options.relocatable {
            self.stream.write_u32_leb128(value);
            return;
        }
        let index = match ty {
            RelocType::FuncIndexLEB => self.symbol_index(SymbolKind::Function, value),
            RelocType::GlobalIndexLEB => self.symbol_index(SymbolKind::Global, value),
            _ => value,
        };
        self.add_reloc(ty, index);
        self.stream.write_fixed_u32_leb128(value);
    }

    fn checked_index(&mut self, loc: Location, what: &str, var: &Var, index: Index) -> Index {
        if index == INVALID_INDEX {
            self.error(loc, format!("undefined {} variable \"{}\"", what, var));
            0
        } else {
            index
        }
    }

    fn func_index(&mut self, loc: Location, var: &Var) -> Index {
        let index = self.module.func_index(var);
        self.checked_index(loc, "function", var, index)
    }

    fn global_index(&mut self, loc: Location, var: &Var) -> Index {
        let index = self.module.global_index(var);
        self.checked_index(loc, "global", var, index)
    }

    fn table_index(&mut self, loc: Location, var: &Var) -> Index {
        let index = self.module.table_index(var);
        self.checked_index(loc, "table", var, index)
    }

    fn memory_index(&mut self, loc: Location, var: &Var) -> Index {
        let index = self.module.memory_index(var);
        self.checked_index(loc, "memory", var, index)
    }

    fn func_type_index(&mut self, loc: Location, var: &Var) -> Index {
        let index = self.module.func_type_index(var);
        self.checked_index(loc, "function type", var, index)
    }

    fn except_index(&mut self, loc: Location, var: &Var) -> Index {
        let index = self.module.except_index(var);
        self.checked_index(loc, "exception", var, index)
    }

    fn elem_segment_index(&mut self, loc: Location, var: &Var) -> Index {
        let index = self.module.elem_segment_index(var);
        self.checked_index(loc, "elem segment", var, index)
    }

    fn data_segment_index(&mut self, loc: Location, var: &Var) -> Index {
        let index = self.module.data_segment_index(var);
        self.checked_index(loc, "data segment", var, index)
    }

    fn local_index(&mut self, loc: Location, func: Option<&Func>, var: &Var) -> Index {
        let index = match func {
            Some(func) => func.local_index(var),
            None => INVALID_INDEX,
        };
        self.checked_index(loc, "local", var, index)
    }

    fn label_depth(&mut self, loc: Location, var: &Var) -> Index {
        match var {
            Var::Index(depth) => *depth,
            Var::Name(name) => {
                self.error(loc, format!("unresolved label \"{}\"", name));
                0
            }
        }
    }

    fn write_opcode(&mut self, opcode: Opcode) {
        match opcode.encoding() {
            (Some(prefix), code) => {
                self.stream.write_u8(prefix);
                self.stream.write_u32_leb128(code);
            }
            (None, code) => self.stream.write_u8(code as u8),
        }
    }

    fn write_type(&mut self, ty: Type) {
        self.stream.write_u8(ty.code());
    }

    fn write_types(&mut self, types: &[Type]) {
        self.stream.write_u32_leb128(types.len() as u32);
        for &ty in types {
            self.write_type(ty);
        }
    }

    fn write_limits(&mut self, limits: &Limits) {
        self.stream.write_u32_leb128(limits.flags());
        self.stream.write_u64_leb128(limits.initial);
        if let Some(max) = limits.max {
            self.stream.write_u64_leb128(max);
        }
    }

    fn write_block_decl(&mut self, loc: Location, decl: &BlockDecl) {
        match decl {
            BlockDecl::Inline(types) => match types.as_slice() {
                [] => self.write_type(Type::Void),
                [ty] => self.write_type(*ty),
                _ => {
                    self.error(
                        loc,
                        "multiple inline block result types need a function type".to_owned(),
                    );
                    self.write_type(Type::Void);
                }
            },
            BlockDecl::FuncType(var) => {
                let index = self.func_type_index(loc, var);
                self.stream.write_s64_leb128(i64::from(index));
            }
        }
    }

    fn write_const(&mut self, value: &Const) {
        match *value {
            Const::I32(v) => {
                self.write_opcode(Opcode::I32Const);
                self.stream.write_s32_leb128(v as i32);
            }
            Const::I64(v) => {
                self.write_opcode(Opcode::I64Const);
                self.stream.write_s64_leb128(v as i64);
            }
            Const::F32(bits) => {
                self.write_opcode(Opcode::F32Const);
                self.stream.write_u32(bits);
            }
            Const::F64(bits) => {
                self.write_opcode(Opcode::F64Const);
                self.stream.write_u64(bits);
            }
            Const::V128(bytes) => {
                self.write_opcode(Opcode::V128Const);
                self.stream.write_bytes(&bytes);
            }
        }
    }

    /// Writes `exprs` and everything nested in them. Structured
    /// instructions push their remaining parts onto `pending` instead of
    /// recursing, so nesting depth costs heap rather than stack.
    fn write_expr_list(&mut self, func: Option<&Func>, exprs: &[Expr]) {
        let mut pending = vec![Pending::Exprs(exprs.iter())];
        while let Some(work) = pending.pop() {
            if self.stopped {
                return;
            }
            match work {
                Pending::Exprs(mut iter) => {
                    if let Some(expr) = iter.next() {
                        pending.push(Pending::Exprs(iter));
                        self.write_expr(func, expr, &mut pending);
                    }
                }
                Pending::Else(exprs) => {
                    self.write_opcode(Opcode::Else);
                    pending.push(Pending::Exprs(exprs.iter()));
                }
                Pending::Catch(catch) => {
                    match &catch.var {
                        Some(var) => {
                            self.write_opcode(Opcode::Catch);
                            let index = self.except_index(catch.loc, var);
                            self.stream.write_u32_leb128(index);
                        }
                        None => self.write_opcode(Opcode::CatchAll),
                    }
                    pending.push(Pending::Exprs(catch.exprs.iter()));
                }
                Pending::End => self.write_opcode(Opcode::End),
            }
        }
    }

    /// Writes one instruction. For structured instructions only the
    /// header is written here; the rest is queued on `pending`.
    fn write_expr<'e>(
        &mut self,
        func: Option<&Func>,
        expr: &'e Expr,
        pending: &mut Vec<Pending<'e>>,
    ) {
        let loc = expr.loc;
        match &expr.kind {
            ExprKind::Binary(opcode)
            | ExprKind::Compare(opcode)
            | ExprKind::Convert(opcode)
            | ExprKind::Unary(opcode)
            | ExprKind::Ternary(opcode) => self.write_opcode(*opcode),
            ExprKind::Const(value) => self.write_const(value),
            ExprKind::Load {
                opcode,
                align,
                offset,
            }
            | ExprKind::Store {
                opcode,
                align,
                offset,
            } => {
                self.write_opcode(*opcode);
                self.stream.write_u32_leb128(*align);
                self.stream.write_u64_leb128(*offset);
            }
            ExprKind::Drop => self.write_opcode(Opcode::Drop),
            ExprKind::Select => self.write_opcode(Opcode::Select),
            ExprKind::Nop => self.write_opcode(Opcode::Nop),
            ExprKind::Unreachable => self.write_opcode(Opcode::Unreachable),
            ExprKind::Return => self.write_opcode(Opcode::Return),
            ExprKind::Br(var) => {
                self.write_opcode(Opcode::Br);
                let depth = self.label_depth(loc, var);
                self.stream.write_u32_leb128(depth);
            }
            ExprKind::BrIf(var) => {
                self.write_opcode(Opcode::BrIf);
                let depth = self.label_depth(loc, var);
                self.stream.write_u32_leb128(depth);
            }
            ExprKind::BrTable { targets, default } => {
                self.write_opcode(Opcode::BrTable);
                self.stream.write_u32_leb128(targets.len() as u32);
                for target in targets {
                    let depth = self.label_depth(loc, target);
                    self.stream.write_u32_leb128(depth);
                }
                let depth = self.label_depth(loc, default);
                self.stream.write_u32_leb128(depth);
            }
            ExprKind::Call(var) => {
                self.write_opcode(Opcode::Call);
                let index = self.func_index(loc, var);
                self.write_u32_leb128_with_reloc(index, RelocType::FuncIndexLEB);
            }
            ExprKind::ReturnCall(var) => {
                self.write_opcode(Opcode::ReturnCall);
                let index = self.func_index(loc, var);
                self.write_u32_leb128_with_reloc(index, RelocType::FuncIndexLEB);
            }
            ExprKind::CallIndirect { type_var, table } => {
                self.write_opcode(Opcode::CallIndirect);
                self.write_call_indirect_operands(loc, type_var, table);
            }
            ExprKind::ReturnCallIndirect { type_var, table } => {
                self.write_opcode(Opcode::ReturnCallIndirect);
                self.write_call_indirect_operands(loc, type_var, table);
            }
            ExprKind::GetLocal(var) => self.write_local_op(Opcode::LocalGet, loc, func, var),
            ExprKind::SetLocal(var) => self.write_local_op(Opcode::LocalSet, loc, func, var),
            ExprKind::TeeLocal(var) => self.write_local_op(Opcode::LocalTee, loc, func, var),
            ExprKind::GetGlobal(var) => {
                self.write_opcode(Opcode::GlobalGet);
                let index = self.global_index(loc, var);
                self.write_u32_leb128_with_reloc(index, RelocType::GlobalIndexLEB);
            }
            ExprKind::SetGlobal(var) => {
                self.write_opcode(Opcode::GlobalSet);
                let index = self.global_index(loc, var);
                self.write_u32_leb128_with_reloc(index, RelocType::GlobalIndexLEB);
            }
            ExprKind::MemorySize => {
                self.write_opcode(Opcode::MemorySize);
                self.stream.write_u8(0);
            }
            ExprKind::MemoryGrow => {
                self.write_opcode(Opcode::MemoryGrow);
                self.stream.write_u8(0);
            }
            ExprKind::MemoryCopy => {
                self.write_opcode(Opcode::MemoryCopy);
                self.stream.write_u8(0);
                self.stream.write_u8(0);
            }
            ExprKind::MemoryFill => {
                self.write_opcode(Opcode::MemoryFill);
                self.stream.write_u8(0);
            }
            ExprKind::MemoryInit(var) => {
                self.write_opcode(Opcode::MemoryInit);
                let index = self.data_segment_index(loc, var);
                self.stream.write_u32_leb128(index);
                self.stream.write_u8(0);
            }
            ExprKind::DataDrop(var) => {
                self.write_opcode(Opcode::DataDrop);
                let index = self.data_segment_index(loc, var);
                self.stream.write_u32_leb128(index);
            }
            ExprKind::TableCopy => {
                self.write_opcode(Opcode::TableCopy);
                self.stream.write_u8(0);
                self.stream.write_u8(0);
            }
            ExprKind::TableInit(var) => {
                self.write_opcode(Opcode::TableInit);
                let index = self.elem_segment_index(loc, var);
                self.stream.write_u32_leb128(index);
                self.stream.write_u8(0);
            }
            ExprKind::ElemDrop(var) => {
                self.write_opcode(Opcode::ElemDrop);
                let index = self.elem_segment_index(loc, var);
                self.stream.write_u32_leb128(index);
            }
            ExprKind::Throw(var) => {
                self.write_opcode(Opcode::Throw);
                let index = self.except_index(loc, var);
                self.stream.write_u32_leb128(index);
            }
            ExprKind::Rethrow(var) => {
                self.write_opcode(Opcode::Rethrow);
                let depth = self.label_depth(loc, var);
                self.stream.write_u32_leb128(depth);
            }
            ExprKind::SimdLaneOp { opcode, lane } => {
                self.write_opcode(*opcode);
                self.stream.write_u8(*lane);
            }
            ExprKind::SimdShuffleOp { opcode, lanes } => {
                self.write_opcode(*opcode);
                self.stream.write_bytes(lanes);
            }
            ExprKind::Block(block) => {
                self.write_opcode(Opcode::Block);
                self.write_block_decl(loc, &block.decl);
                pending.push(Pending::End);
                pending.push(Pending::Exprs(block.exprs.iter()));
            }
            ExprKind::Loop(block) => {
                self.write_opcode(Opcode::Loop);
                self.write_block_decl(loc, &block.decl);
                pending.push(Pending::End);
                pending.push(Pending::Exprs(block.exprs.iter()));
            }
            ExprKind::If(if_) => {
                self.write_opcode(Opcode::If);
                self.write_block_decl(loc, &if_.true_.decl);
                pending.push(Pending::End);
                if !if_.false_.is_empty() {
                    pending.push(Pending::Else(&if_.false_));
                }
                pending.push(Pending::Exprs(if_.true_.exprs.iter()));
            }
            ExprKind::IfExcept(if_) => {
                self.write_opcode(Opcode::IfExcept);
                self.write_block_decl(loc, &if_.true_.decl);
                let index = self.except_index(loc, &if_.except_var);
                self.stream.write_u32_leb128(index);
                pending.push(Pending::End);
                if !if_.false_.is_empty() {
                    pending.push(Pending::Else(&if_.false_));
                }
                pending.push(Pending::Exprs(if_.true_.exprs.iter()));
            }
            ExprKind::Try(try_) => {
                self.write_opcode(Opcode::Try);
                self.write_block_decl(loc, &try_.block.decl);
                pending.push(Pending::End);
                for catch in try_.catches.iter().rev() {
                    pending.push(Pending::Catch(catch));
                }
                pending.push(Pending::Exprs(try_.block.exprs.iter()));
            }
        }
    }

    fn write_call_indirect_operands(&mut self, loc: Location, type_var: &Var, table: &Var) {
        let type_index = self.func_type_index(loc, type_var);
        self.write_u32_leb128_with_reloc(type_index, RelocType::TypeIndexLEB);
        let table_index = self.table_index(loc, table);
        self.stream.write_u32_leb128(table_index);
    }

    fn write_local_op(&mut self, opcode: Opcode, loc: Location, func: Option<&Func>, var: &Var) {
        self.write_opcode(opcode);
        let index = self.local_index(loc, func, var);
        self.stream.write_u32_leb128(index);
    }

    fn write_init_expr(&mut self, exprs: &ExprList) {
        self.write_expr_list(None, exprs);
        self.write_opcode(Opcode::End);
    }

    /// Locals are declared as runs of one type.
    fn write_func_locals(&mut self, local_types: &[Type]) {
        let mut runs: Vec<(u32, Type)> = vec![];
        for &ty in local_types {
            match runs.last_mut() {
                Some((count, last)) if *last == ty => *count += 1,
                _ => runs.push((1, ty)),
            }
        }
        self.stream.write_u32_leb128(runs.len() as u32);
        for (count, ty) in runs {
            self.stream.write_u32_leb128(count);
            self.write_type(ty);
        }
    }

    fn write_func(&mut self, func: &Func) {
        self.write_func_locals(&func.local_types);
        self.write_expr_list(Some(func), &func.exprs);
        self.write_opcode(Opcode::End);
    }

    fn write_table(&mut self, elem_type: Type, limits: &Limits) {
        self.write_type(elem_type);
        self.write_limits(limits);
    }

    fn write_global_header(&mut self, global: &Global) {
        self.write_type(global.ty);
        self.stream.write_u8(global.mutable as u8);
    }

    fn except_type_index(&mut self, loc: Location, sig: &[Type]) -> Index {
        let sig = FuncSignature {
            param_types: sig.to_vec(),
            result_types: vec![],
        };
        let index = self.module.func_type_index_by_sig(&sig);
        if index == INVALID_INDEX {
            self.error(
                loc,
                "no function type matches the exception signature".to_owned(),
            );
            return 0;
        }
        index
    }

    /// The type index of a function declaration. `what` names the
    /// function when it has no type variable.
    fn decl_type_index(&mut self, decl: &FuncDeclaration, what: &str) -> Index {
        let index = self.module.func_type_index_by_decl(decl);
        if index != INVALID_INDEX {
            return index;
        }
        let message = match &decl.type_var {
            Some(var) => format!("undefined function type variable \"{}\"", var),
            None => format!("no function type matches the signature of {}", what),
        };
        self.error(Location::default(), message);
        0
    }

    fn write_type_section(&mut self) {
        let module = self.module;
        if module.func_types.is_empty() {
            return;
        }
        self.begin_known_section(SectionCode::Type);
        self.stream.write_u32_leb128(module.func_types.len() as u32);
        for i in 0..module.func_types.len() as Index {
            self.write_type(Type::Func);
            match module.func_type(i) {
                Some(ty) => {
                    self.write_types(&ty.sig.param_types);
                    self.write_types(&ty.sig.result_types);
                }
                None => {
                    self.write_types(&[]);
                    self.write_types(&[]);
                }
            }
        }
        self.end_section();
    }

    fn write_import_section(&mut self) {
        let module = self.module;
        if module.imports.is_empty() {
            return;
        }
        self.begin_known_section(SectionCode::Import);
        self.stream.write_u32_leb128(module.imports.len() as u32);
        for import in (0..module.imports.len() as Index).filter_map(|i| module.import(i)) {
            self.stream.write_str(&import.module_name);
            self.stream.write_str(&import.field_name);
            self.stream.write_u8(import.kind.external_kind().code());
            match &import.kind {
                ImportKind::Func(func) => {
                    let what = format!("imported function \"{}\"", import.field_name);
                    let index = self.decl_type_index(&func.decl, &what);
                    self.stream.write_u32_leb128(index);
                }
                ImportKind::Table(table) => self.write_table(table.elem_type, &table.elem_limits),
                ImportKind::Memory(memory) => self.write_limits(&memory.page_limits),
                ImportKind::Global(global) => self.write_global_header(global),
                ImportKind::Except(except) => {
                    self.stream.write_u8(0);
                    let index = self.except_type_index(Location::default(), &except.sig);
                    self.stream.write_u32_leb128(index);
                }
            }
        }
        self.end_section();
    }

    fn write_function_section(&mut self) {
        let module = self.module;
        let num_funcs = module.num_defined_funcs();
        if num_funcs == 0 {
            return;
        }
        self.begin_known_section(SectionCode::Function);
        self.stream.write_u32_leb128(num_funcs);
        for (index, func) in module.defined_funcs() {
            let type_index = self.decl_type_index(&func.decl, &format!("function {}", index));
            self.stream.write_u32_leb128(type_index);
        }
        self.end_section();
    }

    fn write_table_section(&mut self) {
        let module = self.module;
        let first = module.num_table_imports;
        let count = module.tables.len() as Index - first;
        if count == 0 {
            return;
        }
        self.begin_known_section(SectionCode::Table);
        self.stream.write_u32_leb128(count);
        for table in (first..first + count).filter_map(|i| module.table(i)) {
            self.write_table(table.elem_type, &table.elem_limits);
        }
        self.end_section();
    }

    fn write_memory_section(&mut self) {
        let module = self.module;
        let first = module.num_memory_imports;
        let count = module.memories.len() as Index - first;
        if count == 0 {
            return;
        }
        self.begin_known_section(SectionCode::Memory);
        self.stream.write_u32_leb128(count);
        for memory in (first..first + count).filter_map(|i| module.memory(i)) {
            self.write_limits(&memory.page_limits);
        }
        self.end_section();
    }

    fn write_global_section(&mut self) {
        let module = self.module;
        let first = module.num_global_imports;
        let count = module.globals.len() as Index - first;
        if count == 0 {
            return;
        }
        self.begin_known_section(SectionCode::Global);
        self.stream.write_u32_leb128(count);
        for global in (first..first + count).filter_map(|i| module.global(i)) {
            self.write_global_header(global);
            self.write_init_expr(&global.init_expr);
        }
        self.end_section();
    }

    fn write_export_section(&mut self) {
        let module = self.module;
        if module.exports.is_empty() {
            return;
        }
        self.begin_known_section(SectionCode::Export);
        self.stream.write_u32_leb128(module.exports.len() as u32);
        for export in (0..module.exports.len() as Index).filter_map(|i| module.export(i)) {
            self.stream.write_str(&export.name);
            self.stream.write_u8(export.kind.code());
            let loc = Location::default();
            let index = match export.kind {
                ExternalKind::Func => self.func_index(loc, &export.var),
                ExternalKind::Table => self.table_index(loc, &export.var),
                ExternalKind::Memory => self.memory_index(loc, &export.var),
                ExternalKind::Global => self.global_index(loc, &export.var),
                ExternalKind::Except => self.except_index(loc, &export.var),
            };
            self.stream.write_u32_leb128(index);
        }
        self.end_section();
    }

    fn write_start_section(&mut self) {
        let module = self.module;
        let var = match module.start() {
            Some(var) => var,
            None => return,
        };
        let index = module.func_index(var);
        if index == INVALID_INDEX {
            self.error(
                Location::default(),
                format!("undefined start function \"{}\"", var),
            );
            return;
        }
        self.begin_known_section(SectionCode::Start);
        self.stream.write_u32_leb128(index);
        self.end_section();
    }

    fn write_elem_segment(&mut self, segment: &ElemSegment) {
        let loc = Location::default();
        if segment.passive {
            self.stream.write_u8(0x01);
            self.stream.write_u8(0x00);
        } else {
            let table_index = self.table_index(loc, &segment.table_var);
            if table_index == 0 {
                self.stream.write_u8(0x00);
                self.write_init_expr(&segment.offset);
            } else {
                self.stream.write_u8(0x02);
                self.stream.write_u32_leb128(table_index);
                self.write_init_expr(&segment.offset);
                self.stream.write_u8(0x00);
            }
        }
        self.stream.write_u32_leb128(segment.vars.len() as u32);
        for var in &segment.vars {
            let index = self.func_index(loc, var);
            self.write_u32_leb128_with_reloc(index, RelocType::FuncIndexLEB);
        }
    }

    fn write_elem_section(&mut self) {
        let module = self.module;
        if module.elem_segments.is_empty() {
            return;
        }
        self.begin_known_section(SectionCode::Elem);
        self.stream.write_u32_leb128(module.elem_segments.len() as u32);
        for segment in (0..module.elem_segments.len() as Index).filter_map(|i| module.elem_segment(i))
        {
            self.write_elem_segment(segment);
        }
        self.end_section();
    }

    fn write_exception_section(&mut self) {
        let module = self.module;
        let first = module.num_except_imports;
        let count = module.excepts.len() as Index - first;
        if count == 0 {
            return;
        }
        self.begin_custom_section("exception");
        self.stream.write_u32_leb128(count);
        for except in (first..first + count).filter_map(|i| module.except(i)) {
            self.write_types(&except.sig);
        }
        self.end_section();
    }

    fn write_data_count_section(&mut self) {
        let module = self.module;
        let any_passive = (0..module.data_segments.len() as Index)
            .filter_map(|i| module.data_segment(i))
            .any(|s| s.passive);
        if !any_passive {
            return;
        }
        self.begin_known_section(SectionCode::DataCount);
        self.stream.write_u32_leb128(module.data_segments.len() as u32);
        self.end_section();
    }

    fn write_code_section(&mut self) {
        let module = self.module;
        let num_funcs = module.num_defined_funcs();
        if num_funcs == 0 {
            return;
        }
        self.begin_known_section(SectionCode::Code);
        self.stream.write_u32_leb128(num_funcs);
        for (index, func) in module.defined_funcs() {
            trace!("writing body of function {}", index);
            let fixup = self.reserve_size();
            self.write_func(func);
            self.fixup_inner_size(fixup);
        }
        self.end_section();
    }

    fn write_data_segment(&mut self, segment: &DataSegment) {
        if segment.passive {
            self.stream.write_u8(0x01);
        } else {
            let memory_index = self.memory_index(Location::default(), &segment.memory_var);
            if memory_index == 0 {
                self.stream.write_u8(0x00);
            } else {
                self.stream.write_u8(0x02);
                self.stream.write_u32_leb128(memory_index);
            }
            self.write_init_expr(&segment.offset);
        }
        self.stream.write_u32_leb128(segment.data.len() as u32);
        self.stream.write_bytes(&segment.data);
    }

    fn write_data_section(&mut self) {
        let module = self.module;
        if module.data_segments.is_empty() {
            return;
        }
        self.begin_known_section(SectionCode::Data);
        self.stream.write_u32_leb128(module.data_segments.len() as u32);
        for segment in (0..module.data_segments.len() as Index).filter_map(|i| module.data_segment(i))
        {
            self.write_data_segment(segment);
        }
        self.end_section();
    }

    fn write_names_section(&mut self) {
        let module = self.module;
        let func_names = (0..module.funcs.len() as Index)
            .filter_map(|i| module.func(i).map(|f| (i, f)))
            .filter(|(_, f)| !f.name.is_empty())
            .map(|(i, f)| (i, strip_dollar(&f.name)))
            .collect::<Vec<_>>();
        let local_names = (0..module.funcs.len() as Index)
            .filter_map(|i| module.func(i).map(|f| (i, f)))
            .map(|(i, f)| {
                let num_params = f.num_params() as usize;
                let params =
                    make_type_binding_reverse_mapping(num_params, &f.param_bindings);
                let locals = make_type_binding_reverse_mapping(
                    f.local_types.len(),
                    &f.local_bindings,
                );
                let names = params
                    .into_iter()
                    .chain(locals)
                    .enumerate()
                    .filter(|(_, name)| !name.is_empty())
                    .map(|(j, name)| (j as Index, strip_dollar(&name).to_owned()))
                    .collect::<Vec<_>>();
                (i, names)
            })
            .filter(|(_, names)| !names.is_empty())
            .collect::<Vec<_>>();
        if module.name.is_empty() && func_names.is_empty() && local_names.is_empty() {
            return;
        }

        self.begin_custom_section("name");
        if !module.name.is_empty() {
            self.begin_subsection(0);
            self.stream.write_str(strip_dollar(&module.name));
            self.end_subsection();
        }
        if !func_names.is_empty() {
            self.begin_subsection(1);
            self.stream.write_u32_leb128(func_names.len() as u32);
            for (index, name) in &func_names {
                self.stream.write_u32_leb128(*index);
                self.stream.write_str(name);
            }
            self.end_subsection();
        }
        if !local_names.is_empty() {
            self.begin_subsection(2);
            self.stream.write_u32_leb128(local_names.len() as u32);
            for (func_index, names) in &local_names {
                self.stream.write_u32_leb128(*func_index);
                self.stream.write_u32_leb128(names.len() as u32);
                for (local_index, name) in names {
                    self.stream.write_u32_leb128(*local_index);
                    self.stream.write_str(name);
                }
            }
            self.end_subsection();
        }
        self.end_section();
    }

    fn write_linking_section(&mut self) {
        self.begin_custom_section("linking");
        self.stream.write_u32_leb128(LINKING_METADATA_VERSION);
        if !self.symtab.is_empty() {
            self.begin_subsection(LINKING_SYMBOL_TABLE);
            self.symtab.write_payload(&mut self.stream);
            self.end_subsection();
        }
        self.end_section();
    }

    fn write_reloc_sections(&mut self) {
        let sections = std::mem::take(&mut self.reloc_sections);
        for section in &sections {
            self.begin_custom_section(&format!("reloc.{}", section.name));
            section.write_payload(&mut self.stream);
            self.end_section();
        }
        self.reloc_sections = sections;
    }

    fn write_module(&mut self) {
        self.stream.write_u32(BINARY_MAGIC);
        self.stream.write_u32(BINARY_VERSION);

        let mut sections: Vec<fn(&mut Self)> = vec![
            Self::write_type_section,
            Self::write_import_section,
            Self::write_function_section,
            Self::write_table_section,
            Self::write_memory_section,
            Self::write_global_section,
            Self::write_export_section,
            Self::write_start_section,
            Self::write_elem_section,
            Self::write_exception_section,
            Self::write_data_count_section,
            Self::write_code_section,
            Self::write_data_section,
        ];
        if self.options.write_debug_names {
            sections.push(Self::write_names_section);
        }
        if self.options.relocatable {
            sections.push(Self::write_linking_section);
            sections.push(Self::write_reloc_sections);
        }
        for write_section in sections {
            if self.stopped {
                debug!("stopped after section {}", self.section_count);
                return;
            }
            write_section(self);
        }
    }
}

/// Encodes `module`. Problems (such as names that do not resolve) go
/// to `errors` and make the status `Error`, but the whole module is
/// still written, unless the handler returns `false` from `on_error`.
/// Then writing stops there and the bytes so far are returned.
pub fn write_binary_module(
    module: &Module,
    options: &WriteBinaryOptions,
    errors: &mut dyn ErrorHandler,
) -> (Vec<u8>, Status) {
    let mut writer = BinaryWriter::new(module, options, errors);
    writer.write_module();
    debug!(
        "wrote {} sections, {} bytes, {} relocation sections",
        writer.section_count,
        writer.stream.offset(),
        writer.reloc_sections.len()
    );
    let status = writer.status;
    (writer.stream.into_bytes(), status)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::errors::StopAfterFirst;
    use crate::ir::{Export, FuncType, ModuleField};

    fn answer_module() -> Module {
        let mut module = Module::default();
        module.append_field(ModuleField::FuncType(FuncType {
            name: String::new(),
            sig: FuncSignature {
                param_types: vec![],
                result_types: vec![Type::I32],
            },
        }));
        module.append_field(ModuleField::Func(Func {
            decl: FuncDeclaration {
                type_var: Some(Var::Index(0)),
                sig: FuncSignature {
                    param_types: vec![],
                    result_types: vec![Type::I32],
                },
            },
            exprs: vec![Expr::new(ExprKind::Const(Const::I32(42)))],
            ..Func::default()
        }));
        module.append_field(ModuleField::Export(Export {
            name: "answer".to_owned(),
            kind: ExternalKind::Func,
            var: Var::Index(0),
        }));
        module
    }

    #[test]
    fn writes_minimal_module() {
        let module = answer_module();
        let mut errors = vec![];
        let (bytes, status) =
            write_binary_module(&module, &WriteBinaryOptions::default(), &mut errors);
        assert!(status.is_ok());
        #[rustfmt::skip]
        let expected: &[u8] = &[
            0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00,
            0x01, 0x05, 0x01, 0x60, 0x00, 0x01, 0x7f,
            0x03, 0x02, 0x01, 0x00,
            0x07, 0x0a, 0x01, 0x06, b'a', b'n', b's', b'w', b'e', b'r', 0x00, 0x00,
            0x0a, 0x06, 0x01, 0x04, 0x00, 0x41, 0x2a, 0x0b,
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn fixed_sizes_are_padded() {
        let module = answer_module();
        let options = WriteBinaryOptions {
            canonicalize_lebs: false,
            ..WriteBinaryOptions::default()
        };
        let mut errors = vec![];
        let (bytes, status) = write_binary_module(&module, &options, &mut errors);
        assert!(status.is_ok());
        assert_eq!(&bytes[8..15], &[0x01, 0x85, 0x80, 0x80, 0x80, 0x00, 0x01]);
    }

    #[test]
    fn unresolved_names_are_reported() {
        let mut module = answer_module();
        if let Some(func) = module.func_mut(0) {
            func.exprs.push(Expr::new(ExprKind::Call(Var::Name("$missing".into()))));
        }
        let mut errors = vec![];
        let (bytes, status) =
            write_binary_module(&module, &WriteBinaryOptions::default(), &mut errors);
        assert!(status.is_error());
        assert!(!bytes.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].message,
            "undefined function variable \"$missing\""
        );
    }

    #[test]
    fn relocatable_calls_are_padded_and_recorded() {
        let mut module = answer_module();
        if let Some(func) = module.func_mut(0) {
            func.exprs.push(Expr::new(ExprKind::Call(Var::Index(0))));
        }
        let options = WriteBinaryOptions {
            relocatable: true,
            ..WriteBinaryOptions::default()
        };
        let mut errors = vec![];
        let mut writer = BinaryWriter::new(&module, &options, &mut errors);
        writer.write_module();
        assert!(writer.status.is_ok());
        assert_eq!(writer.reloc_sections.len(), 1);
        let section = &writer.reloc_sections[0];
        assert_eq!(section.name, "CODE");
        assert_eq!(section.section_index, 3);
        assert_eq!(section.relocs.len(), 1);
        let reloc = &section.relocs[0];
        assert_eq!(reloc.ty, RelocType::FuncIndexLEB);
        // count, body size, local decls, i32.const 42, call
        assert_eq!(reloc.offset, 6);
        let info = writer.symtab.get(crate::entity::Symbol::new(0)).unwrap();
        assert_eq!(info.flags, SYMBOL_FLAG_EXPORTED);
    }

    #[test]
    fn handler_can_stop_after_first_error() {
        let mut module = answer_module();
        if let Some(func) = module.func_mut(0) {
            func.exprs.push(Expr::new(ExprKind::Call(Var::Name("$a".into()))));
            func.exprs.push(Expr::new(ExprKind::Call(Var::Name("$b".into()))));
        }
        module.append_field(ModuleField::Export(Export {
            name: "c".to_owned(),
            kind: ExternalKind::Global,
            var: Var::Name("$c".into()),
        }));

        let mut all = vec![];
        let (_, status) = write_binary_module(&module, &WriteBinaryOptions::default(), &mut all);
        assert!(status.is_error());
        assert_eq!(all.len(), 3);

        let mut first = StopAfterFirst::default();
        let (bytes, status) =
            write_binary_module(&module, &WriteBinaryOptions::default(), &mut first);
        assert!(status.is_error());
        assert_eq!(first.0.len(), 1);
        assert_eq!(first.0[0].message, "undefined global variable \"$c\"");
        // Nothing after the export section.
        assert!(!bytes.contains(&(SectionCode::Code as u8)));
    }

    #[test]
    fn unresolved_function_type_names_the_type() {
        let mut module = answer_module();
        if let Some(func) = module.func_mut(0) {
            func.decl.type_var = Some(Var::Name("$sig".into()));
        }
        let mut errors = vec![];
        let (_, status) = write_binary_module(&module, &WriteBinaryOptions::default(), &mut errors);
        assert!(status.is_error());
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].message,
            "undefined function type variable \"$sig\""
        );

        if let Some(func) = module.func_mut(0) {
            func.decl.type_var = None;
            func.decl.sig.param_types = vec![Type::F64];
        }
        let mut errors = vec![];
        write_binary_module(&module, &WriteBinaryOptions::default(), &mut errors);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].message,
            "no function type matches the signature of function 0"
        );
    }
}
