use super::{
    Binding, BindingHash, ExprList, ExternalKind, Func, FuncDeclaration, FuncSignature, Index,
    Limits, Location, ModuleDisplay, Type, Var, INVALID_INDEX,
};
use crate::backend::{self, WriteBinaryOptions};
use crate::entity::{EntityRef, EntityVec, FieldId};
use crate::errors::{BackendError, FrontendError};
use crate::frontend;
use anyhow::Result;
use fxhash::FxHashMap;

pub use crate::frontend::FrontendOptions;

#[derive(Clone, Debug, Default)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub mutable: bool,
    /// A constant expression; empty for imported globals.
    pub init_expr: ExprList,
}

#[derive(Clone, Debug)]
pub struct Table {
    pub name: String,
    pub elem_limits: Limits,
    pub elem_type: Type,
}

impl Default for Table {
    fn default() -> Self {
        Table {
            name: String::new(),
            elem_limits: Limits::default(),
            elem_type: Type::FuncRef,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Memory {
    pub name: String,
    pub page_limits: Limits,
}

/// An exception (tag) declaration: the types of its payload.
#[derive(Clone, Debug, Default)]
pub struct Except {
    pub name: String,
    pub sig: Vec<Type>,
}

#[derive(Clone, Debug, Default)]
pub struct FuncType {
    pub name: String,
    pub sig: FuncSignature,
}

#[derive(Clone, Debug)]
pub struct Export {
    pub name: String,
    pub kind: ExternalKind,
    pub var: Var,
}

#[derive(Clone, Debug)]
pub struct ElemSegment {
    pub name: String,
    pub table_var: Var,
    /// Constant offset expression; empty when `passive`.
    pub offset: ExprList,
    /// Function references.
    pub vars: Vec<Var>,
    pub passive: bool,
}

#[derive(Clone, Debug)]
pub struct DataSegment {
    pub name: String,
    pub memory_var: Var,
    /// Constant offset expression; empty when `passive`.
    pub offset: ExprList,
    pub data: Vec<u8>,
    pub passive: bool,
}

#[derive(Clone, Debug)]
pub enum ImportKind {
    Func(Func),
    Table(Table),
    Memory(Memory),
    Global(Global),
    Except(Except),
}

impl ImportKind {
    pub fn external_kind(&self) -> ExternalKind {
        match self {
            ImportKind::Func(_) => ExternalKind::Func,
            ImportKind::Table(_) => ExternalKind::Table,
            ImportKind::Memory(_) => ExternalKind::Memory,
            ImportKind::Global(_) => ExternalKind::Global,
            ImportKind::Except(_) => ExternalKind::Except,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ImportKind::Func(f) => &f.name,
            ImportKind::Table(t) => &t.name,
            ImportKind::Memory(m) => &m.name,
            ImportKind::Global(g) => &g.name,
            ImportKind::Except(e) => &e.name,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Import {
    pub module_name: String,
    pub field_name: String,
    pub kind: ImportKind,
}

/// One top-level declaration, in source order.
#[derive(Clone, Debug)]
pub enum ModuleField {
    Func(Func),
    Global(Global),
    Import(Import),
    Export(Export),
    FuncType(FuncType),
    Table(Table),
    ElemSegment(ElemSegment),
    Memory(Memory),
    DataSegment(DataSegment),
    Start(Var),
    Except(Except),
}

/// A Wasm module as a list of fields plus per-index-space views.
///
/// `fields` owns every declaration, in the order it was appended. The
/// per-kind vectors (`funcs`, `globals`, ...) hold `FieldId`s into
/// `fields` and define each index space: imports of a kind share the
/// vector with local definitions of that kind, and come first. The
/// binding hashes map names to indices in those spaces.
///
/// Always add fields through `append_field`, which keeps the views,
/// bindings and import counts in step with `fields`.
#[derive(Clone, Debug, Default)]
pub struct Module {
    /// Module name, from the name section.
    pub name: String,
    pub fields: EntityVec<FieldId, ModuleField>,

    pub num_except_imports: Index,
    pub num_func_imports: Index,
    pub num_table_imports: Index,
    pub num_memory_imports: Index,
    pub num_global_imports: Index,

    pub excepts: Vec<FieldId>,
    pub funcs: Vec<FieldId>,
    pub globals: Vec<FieldId>,
    pub imports: Vec<FieldId>,
    pub exports: Vec<FieldId>,
    pub func_types: Vec<FieldId>,
    pub tables: Vec<FieldId>,
    pub elem_segments: Vec<FieldId>,
    pub memories: Vec<FieldId>,
    pub data_segments: Vec<FieldId>,
    pub starts: Vec<FieldId>,

    pub except_bindings: BindingHash,
    pub func_bindings: BindingHash,
    pub global_bindings: BindingHash,
    pub export_bindings: BindingHash,
    pub func_type_bindings: BindingHash,
    pub table_bindings: BindingHash,
    pub memory_bindings: BindingHash,
    pub elem_segment_bindings: BindingHash,
    pub data_segment_bindings: BindingHash,
}

macro_rules! importable_accessors {
    ($get:ident, $get_mut:ident, $list:ident, $variant:ident, $ty:ty) => {
        pub fn $get(&self, index: Index) -> Option<&$ty> {
            let id = *self.$list.get(index as usize)?;
            match &self.fields[id] {
                ModuleField::$variant(x) => Some(x),
                ModuleField::Import(Import {
                    kind: ImportKind::$variant(x),
                    ..
                }) => Some(x),
                _ => None,
            }
        }

        pub fn $get_mut(&mut self, index: Index) -> Option<&mut $ty> {
            let id = *self.$list.get(index as usize)?;
            match &mut self.fields[id] {
                ModuleField::$variant(x) => Some(x),
                ModuleField::Import(Import {
                    kind: ImportKind::$variant(x),
                    ..
                }) => Some(x),
                _ => None,
            }
        }
    };
}

macro_rules! local_accessors {
    ($get:ident, $get_mut:ident, $list:ident, $variant:ident, $ty:ty) => {
        pub fn $get(&self, index: Index) -> Option<&$ty> {
            let id = *self.$list.get(index as usize)?;
            match &self.fields[id] {
                ModuleField::$variant(x) => Some(x),
                _ => None,
            }
        }

        pub fn $get_mut(&mut self, index: Index) -> Option<&mut $ty> {
            let id = *self.$list.get(index as usize)?;
            match &mut self.fields[id] {
                ModuleField::$variant(x) => Some(x),
                _ => None,
            }
        }
    };
}

impl Module {
    pub fn from_wasm_bytes(bytes: &[u8], options: &FrontendOptions) -> Result<Self> {
        let (module, errors) = frontend::wasm_to_ir(bytes, options)?;
        if !errors.is_empty() {
            return Err(FrontendError::Invalid(errors).into());
        }
        Ok(module)
    }

    pub fn to_wasm_bytes(&self) -> Result<Vec<u8>> {
        self.to_wasm_bytes_with(&WriteBinaryOptions::default())
    }

    pub fn to_wasm_bytes_with(&self, options: &WriteBinaryOptions) -> Result<Vec<u8>> {
        let mut errors = vec![];
        let (bytes, status) = backend::write_binary_module(self, options, &mut errors);
        if status.is_error() {
            return Err(BackendError::Invalid(errors).into());
        }
        Ok(bytes)
    }

    pub fn display<'a>(&'a self) -> ModuleDisplay<'a> {
        ModuleDisplay(self)
    }

    pub fn append_field(&mut self, field: ModuleField) -> FieldId {
        self.append_field_at(Location::default(), field)
    }

    /// Adds `field` to the module: stores it, extends the matching
    /// index space, binds its name (if any) to its new index, and
    /// counts it as an import when it is one.
    pub fn append_field_at(&mut self, loc: Location, field: ModuleField) -> FieldId {
        let id = FieldId::new(self.fields.len());
        let target = match &field {
            ModuleField::Func(f) => Some((&f.name, &mut self.funcs, &mut self.func_bindings)),
            ModuleField::Global(g) => {
                Some((&g.name, &mut self.globals, &mut self.global_bindings))
            }
            ModuleField::Export(e) => {
                Some((&e.name, &mut self.exports, &mut self.export_bindings))
            }
            ModuleField::FuncType(t) => {
                Some((&t.name, &mut self.func_types, &mut self.func_type_bindings))
            }
            ModuleField::Table(t) => Some((&t.name, &mut self.tables, &mut self.table_bindings)),
            ModuleField::ElemSegment(s) => Some((
                &s.name,
                &mut self.elem_segments,
                &mut self.elem_segment_bindings,
            )),
            ModuleField::Memory(m) => {
                Some((&m.name, &mut self.memories, &mut self.memory_bindings))
            }
            ModuleField::DataSegment(s) => Some((
                &s.name,
                &mut self.data_segments,
                &mut self.data_segment_bindings,
            )),
            ModuleField::Except(e) => {
                Some((&e.name, &mut self.excepts, &mut self.except_bindings))
            }
            ModuleField::Start(_) => {
                self.starts.push(id);
                None
            }
            ModuleField::Import(import) => {
                self.imports.push(id);
                match &import.kind {
                    ImportKind::Func(f) => {
                        self.num_func_imports += 1;
                        Some((&f.name, &mut self.funcs, &mut self.func_bindings))
                    }
                    ImportKind::Table(t) => {
                        self.num_table_imports += 1;
                        Some((&t.name, &mut self.tables, &mut self.table_bindings))
                    }
                    ImportKind::Memory(m) => {
                        self.num_memory_imports += 1;
                        Some((&m.name, &mut self.memories, &mut self.memory_bindings))
                    }
                    ImportKind::Global(g) => {
                        self.num_global_imports += 1;
                        Some((&g.name, &mut self.globals, &mut self.global_bindings))
                    }
                    ImportKind::Except(e) => {
                        self.num_except_imports += 1;
                        Some((&e.name, &mut self.excepts, &mut self.except_bindings))
                    }
                }
            }
        };
        if let Some((name, list, bindings)) = target {
            let index = list.len() as Index;
            if !name.is_empty() {
                bindings.emplace(name.as_str(), Binding { loc, index });
            }
            list.push(id);
        }
        self.fields.push(field)
    }

    importable_accessors!(func, func_mut, funcs, Func, Func);
    importable_accessors!(global, global_mut, globals, Global, Global);
    importable_accessors!(table, table_mut, tables, Table, Table);
    importable_accessors!(memory, memory_mut, memories, Memory, Memory);
    importable_accessors!(except, except_mut, excepts, Except, Except);
    local_accessors!(func_type, func_type_mut, func_types, FuncType, FuncType);
    local_accessors!(export, export_mut, exports, Export, Export);
    local_accessors!(elem_segment, elem_segment_mut, elem_segments, ElemSegment, ElemSegment);
    local_accessors!(data_segment, data_segment_mut, data_segments, DataSegment, DataSegment);

    pub fn import(&self, index: Index) -> Option<&Import> {
        let id = *self.imports.get(index as usize)?;
        match &self.fields[id] {
            ModuleField::Import(import) => Some(import),
            _ => None,
        }
    }

    /// The import record behind an index in the `kind` space, if that
    /// index is imported.
    pub fn import_of(&self, kind: ExternalKind, index: Index) -> Option<&Import> {
        if !self.is_import(kind, index) {
            return None;
        }
        let list = match kind {
            ExternalKind::Func => &self.funcs,
            ExternalKind::Table => &self.tables,
            ExternalKind::Memory => &self.memories,
            ExternalKind::Global => &self.globals,
            ExternalKind::Except => &self.excepts,
        };
        match &self.fields[*list.get(index as usize)?] {
            ModuleField::Import(import) => Some(import),
            _ => None,
        }
    }

    pub fn num_imports(&self, kind: ExternalKind) -> Index {
        match kind {
            ExternalKind::Func => self.num_func_imports,
            ExternalKind::Table => self.num_table_imports,
            ExternalKind::Memory => self.num_memory_imports,
            ExternalKind::Global => self.num_global_imports,
            ExternalKind::Except => self.num_except_imports,
        }
    }

    pub fn is_import(&self, kind: ExternalKind, index: Index) -> bool {
        index < self.num_imports(kind)
    }

    /// The start function, if one was declared. A later declaration
    /// replaces an earlier one.
    pub fn start(&self) -> Option<&Var> {
        self.starts.iter().rev().find_map(|&id| match &self.fields[id] {
            ModuleField::Start(var) => Some(var),
            _ => None,
        })
    }

    pub fn func_index(&self, var: &Var) -> Index {
        self.func_bindings.find_index(var)
    }

    pub fn global_index(&self, var: &Var) -> Index {
        self.global_bindings.find_index(var)
    }

    pub fn table_index(&self, var: &Var) -> Index {
        self.table_bindings.find_index(var)
    }

    pub fn memory_index(&self, var: &Var) -> Index {
        self.memory_bindings.find_index(var)
    }

    pub fn func_type_index(&self, var: &Var) -> Index {
        self.func_type_bindings.find_index(var)
    }

    pub fn except_index(&self, var: &Var) -> Index {
        self.except_bindings.find_index(var)
    }

    pub fn elem_segment_index(&self, var: &Var) -> Index {
        self.elem_segment_bindings.find_index(var)
    }

    pub fn data_segment_index(&self, var: &Var) -> Index {
        self.data_segment_bindings.find_index(var)
    }

    pub fn func_by_var(&self, var: &Var) -> Option<&Func> {
        self.func(self.func_index(var))
    }

    pub fn func_type_by_var(&self, var: &Var) -> Option<&FuncType> {
        self.func_type(self.func_type_index(var))
    }

    pub fn export_by_name(&self, name: &str) -> Option<&Export> {
        self.export(self.export_bindings.find_index_by_name(name))
    }

    /// The name each exported entity is exported under, keyed by kind
    /// and index. An entity exported twice keeps its first name;
    /// exports that do not resolve are left out.
    pub fn export_names(&self) -> FxHashMap<(ExternalKind, Index), &str> {
        let mut names = FxHashMap::default();
        for export in self.exports.iter().map(|&id| &self.fields[id]) {
            let export = match export {
                ModuleField::Export(export) => export,
                _ => continue,
            };
            let index = match export.kind {
                ExternalKind::Func => self.func_index(&export.var),
                ExternalKind::Table => self.table_index(&export.var),
                ExternalKind::Memory => self.memory_index(&export.var),
                ExternalKind::Global => self.global_index(&export.var),
                ExternalKind::Except => self.except_index(&export.var),
            };
            if index != INVALID_INDEX {
                names
                    .entry((export.kind, index))
                    .or_insert_with(|| export.name.as_str());
            }
        }
        names
    }

    /// Index of the first function type whose signature is `sig`.
    pub fn func_type_index_by_sig(&self, sig: &FuncSignature) -> Index {
        (0..self.func_types.len() as Index)
            .find(|&i| self.func_type(i).map(|t| &t.sig) == Some(sig))
            .unwrap_or(INVALID_INDEX)
    }

    pub fn func_type_index_by_decl(&self, decl: &FuncDeclaration) -> Index {
        match &decl.type_var {
            Some(var) => self.func_type_index(var),
            None => self.func_type_index_by_sig(&decl.sig),
        }
    }

    pub fn num_defined_funcs(&self) -> Index {
        self.funcs.len() as Index - self.num_func_imports
    }

    /// Iterates the locally defined functions with their indices.
    pub fn defined_funcs(&self) -> impl Iterator<Item = (Index, &Func)> {
        (self.num_func_imports..self.funcs.len() as Index)
            .filter_map(move |i| self.func(i).map(|f| (i, f)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{Const, Expr, ExprKind};

    fn sig(params: &[Type], results: &[Type]) -> FuncSignature {
        FuncSignature {
            param_types: params.to_vec(),
            result_types: results.to_vec(),
        }
    }

    #[test]
    fn empty_module() {
        let module = Module::default();
        assert_eq!(module.funcs.len(), 0);
        assert!(module.func(0).is_none());
        assert!(module.start().is_none());
    }

    #[test]
    fn imports_share_index_space() {
        let mut module = Module::default();
        module.append_field(ModuleField::Import(Import {
            module_name: "env".into(),
            field_name: "log".into(),
            kind: ImportKind::Func(Func {
                name: "$log".into(),
                ..Func::default()
            }),
        }));
        let mut local = Func {
            name: "$main".into(),
            ..Func::default()
        };
        local
            .exprs
            .push(Expr::new(ExprKind::Const(Const::I32(42))));
        module.append_field(ModuleField::Func(local));

        assert_eq!(module.num_func_imports, 1);
        assert_eq!(module.funcs.len(), 2);
        assert_eq!(module.imports.len(), 1);
        assert!(module.is_import(ExternalKind::Func, 0));
        assert!(!module.is_import(ExternalKind::Func, 1));
        assert_eq!(module.func_index(&Var::Name("$main".into())), 1);
        assert_eq!(module.func_index(&Var::Name("$log".into())), 0);
        assert_eq!(module.func(1).map(|f| f.exprs.len()), Some(1));
        assert_eq!(
            module
                .import_of(ExternalKind::Func, 0)
                .map(|i| i.field_name.as_str()),
            Some("log")
        );
        assert_eq!(module.defined_funcs().count(), 1);
    }

    #[test]
    fn func_type_lookup_by_sig() {
        let mut module = Module::default();
        module.append_field(ModuleField::FuncType(FuncType {
            name: String::new(),
            sig: sig(&[Type::I32], &[]),
        }));
        module.append_field(ModuleField::FuncType(FuncType {
            name: "$t".into(),
            sig: sig(&[], &[Type::I32]),
        }));
        assert_eq!(module.func_type_index_by_sig(&sig(&[], &[Type::I32])), 1);
        assert_eq!(module.func_type_index_by_sig(&sig(&[Type::F64], &[])), INVALID_INDEX);
        let decl = FuncDeclaration {
            type_var: Some(Var::Name("$t".into())),
            sig: FuncSignature::default(),
        };
        assert_eq!(module.func_type_index_by_decl(&decl), 1);
    }

    #[test]
    fn export_by_name() {
        let mut module = Module::default();
        module.append_field(ModuleField::Export(Export {
            name: "answer".into(),
            kind: ExternalKind::Func,
            var: Var::Index(1),
        }));
        let export = module.export_by_name("answer").unwrap();
        assert_eq!(export.var, Var::Index(1));
        assert!(module.export_by_name("question").is_none());
    }

    #[test]
    fn export_names_keep_first_name() {
        let mut module = Module::default();
        module.append_field(ModuleField::Func(Func {
            name: "$f".into(),
            ..Func::default()
        }));
        for (name, kind, var) in vec![
            ("first", ExternalKind::Func, Var::Name("$f".into())),
            ("second", ExternalKind::Func, Var::Index(0)),
            ("missing", ExternalKind::Func, Var::Name("$g".into())),
            ("mem", ExternalKind::Memory, Var::Index(0)),
        ] {
            module.append_field(ModuleField::Export(Export {
                name: name.into(),
                kind,
                var,
            }));
        }
        let names = module.export_names();
        assert_eq!(names.len(), 2);
        assert_eq!(names.get(&(ExternalKind::Func, 0)), Some(&"first"));
        assert_eq!(names.get(&(ExternalKind::Memory, 0)), Some(&"mem"));
    }
}
