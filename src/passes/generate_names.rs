//! Give every unnamed entity and label a name.

use crate::errors::Status;
use crate::ir::{
    make_type_binding_reverse_mapping, unique_name, Binding, BindingHash, Block, ExternalKind,
    IfExceptExpr, IfExpr, Index, Location, Module, TryExpr,
};
use crate::visitor::{Delegate, ExprVisitor};
use fxhash::FxHashMap;
use log::debug;

/// Export names by the kind and index of what they export.
type ExportNames = FxHashMap<(ExternalKind, Index), String>;

/// An index space whose entities carry names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Space {
    Func,
    Global,
    FuncType,
    Table,
    Memory,
    Except,
    ElemSegment,
    DataSegment,
}

const SPACES: [Space; 8] = [
    Space::FuncType,
    Space::Func,
    Space::Table,
    Space::Memory,
    Space::Global,
    Space::Except,
    Space::ElemSegment,
    Space::DataSegment,
];

impl Space {
    fn prefix(self) -> &'static str {
        match self {
            Space::Func => "$f",
            Space::Global => "$g",
            Space::FuncType => "$t",
            Space::Table => "$T",
            Space::Memory => "$M",
            Space::Except => "$e",
            Space::ElemSegment => "$e",
            Space::DataSegment => "$d",
        }
    }

    fn external_kind(self) -> Option<ExternalKind> {
        match self {
            Space::Func => Some(ExternalKind::Func),
            Space::Global => Some(ExternalKind::Global),
            Space::Table => Some(ExternalKind::Table),
            Space::Memory => Some(ExternalKind::Memory),
            Space::Except => Some(ExternalKind::Except),
            Space::FuncType | Space::ElemSegment | Space::DataSegment => None,
        }
    }

    fn len(self, module: &Module) -> Index {
        let len = match self {
            Space::Func => module.funcs.len(),
            Space::Global => module.globals.len(),
            Space::FuncType => module.func_types.len(),
            Space::Table => module.tables.len(),
            Space::Memory => module.memories.len(),
            Space::Except => module.excepts.len(),
            Space::ElemSegment => module.elem_segments.len(),
            Space::DataSegment => module.data_segments.len(),
        };
        len as Index
    }

    fn name(self, module: &Module, index: Index) -> Option<&str> {
        let name = match self {
            Space::Func => &module.func(index)?.name,
            Space::Global => &module.global(index)?.name,
            Space::FuncType => &module.func_type(index)?.name,
            Space::Table => &module.table(index)?.name,
            Space::Memory => &module.memory(index)?.name,
            Space::Except => &module.except(index)?.name,
            Space::ElemSegment => &module.elem_segment(index)?.name,
            Space::DataSegment => &module.data_segment(index)?.name,
        };
        Some(name.as_str())
    }

    fn name_mut(self, module: &mut Module, index: Index) -> Option<&mut String> {
        let name = match self {
            Space::Func => &mut module.func_mut(index)?.name,
            Space::Global => &mut module.global_mut(index)?.name,
            Space::FuncType => &mut module.func_type_mut(index)?.name,
            Space::Table => &mut module.table_mut(index)?.name,
            Space::Memory => &mut module.memory_mut(index)?.name,
            Space::Except => &mut module.except_mut(index)?.name,
            Space::ElemSegment => &mut module.elem_segment_mut(index)?.name,
            Space::DataSegment => &mut module.data_segment_mut(index)?.name,
        };
        Some(name)
    }

    fn bindings(self, module: &Module) -> &BindingHash {
        match self {
            Space::Func => &module.func_bindings,
            Space::Global => &module.global_bindings,
            Space::FuncType => &module.func_type_bindings,
            Space::Table => &module.table_bindings,
            Space::Memory => &module.memory_bindings,
            Space::Except => &module.except_bindings,
            Space::ElemSegment => &module.elem_segment_bindings,
            Space::DataSegment => &module.data_segment_bindings,
        }
    }

    fn bindings_mut(self, module: &mut Module) -> &mut BindingHash {
        match self {
            Space::Func => &mut module.func_bindings,
            Space::Global => &mut module.global_bindings,
            Space::FuncType => &mut module.func_type_bindings,
            Space::Table => &mut module.table_bindings,
            Space::Memory => &mut module.memory_bindings,
            Space::Except => &mut module.except_bindings,
            Space::ElemSegment => &mut module.elem_segment_bindings,
            Space::DataSegment => &mut module.data_segment_bindings,
        }
    }
}

/// `$module.field` for imports, then `$name` of the first export,
/// then the space's prefix followed by the index.
fn preferred_name(module: &Module, exports: &ExportNames, space: Space, index: Index) -> String {
    if let Some(kind) = space.external_kind() {
        if let Some(import) = module.import_of(kind, index) {
            return format!("${}.{}", import.module_name, import.field_name);
        }
        if let Some(name) = exports.get(&(kind, index)) {
            return format!("${}", name);
        }
    }
    format!("{}{}", space.prefix(), index)
}

fn name_space(module: &mut Module, exports: &ExportNames, space: Space) -> usize {
    let mut named = 0;
    for index in 0..space.len(module) {
        match space.name(module, index) {
            Some(name) if name.is_empty() => {}
            _ => continue,
        }
        let name = unique_name(
            &[space.bindings(module)],
            preferred_name(module, exports, space, index),
        );
        space.bindings_mut(module).emplace(
            name.as_str(),
            Binding {
                loc: Location::default(),
                index,
            },
        );
        if let Some(slot) = space.name_mut(module, index) {
            *slot = name;
        }
        named += 1;
    }
    named
}

/// Names parameters `$pN` and locals `$lN`, where `N` counts through
/// parameters and then locals.
fn name_params_and_locals(module: &mut Module, index: Index) {
    let func = match module.func_mut(index) {
        Some(func) => func,
        None => return,
    };
    let num_params = func.num_params() as usize;
    let params = make_type_binding_reverse_mapping(num_params, &func.param_bindings);
    let locals = make_type_binding_reverse_mapping(func.local_types.len(), &func.local_bindings);

    for (i, existing) in params.iter().enumerate() {
        if !existing.is_empty() {
            continue;
        }
        let name = unique_name(
            &[&func.param_bindings, &func.local_bindings],
            format!("$p{}", i),
        );
        func.param_bindings.emplace(
            name,
            Binding {
                loc: Location::default(),
                index: i as Index,
            },
        );
    }
    for (i, existing) in locals.iter().enumerate() {
        if !existing.is_empty() {
            continue;
        }
        let name = unique_name(
            &[&func.param_bindings, &func.local_bindings],
            format!("$l{}", num_params + i),
        );
        func.local_bindings.emplace(
            name,
            Binding {
                loc: Location::default(),
                index: i as Index,
            },
        );
    }
}

/// Labels structured instructions in visiting order. The counter
/// advances for named labels too, so a second run picks the same
/// numbers.
#[derive(Default)]
struct LabelNamer {
    next: usize,
}

impl LabelNamer {
    fn name(&mut self, block: &mut Block, prefix: &str) -> Status {
        if block.label.is_empty() {
            block.label = format!("{}{}", prefix, self.next);
        }
        self.next += 1;
        Status::Ok
    }
}

impl Delegate for LabelNamer {
    fn begin_block_expr(&mut self, _loc: Location, block: &mut Block) -> Status {
        self.name(block, "$B")
    }
    fn begin_loop_expr(&mut self, _loc: Location, block: &mut Block) -> Status {
        self.name(block, "$L")
    }
    fn begin_if_expr(&mut self, _loc: Location, expr: &mut IfExpr) -> Status {
        self.name(&mut expr.true_, "$I")
    }
    fn begin_if_except_expr(&mut self, _loc: Location, expr: &mut IfExceptExpr) -> Status {
        self.name(&mut expr.true_, "$I")
    }
    fn begin_try_expr(&mut self, _loc: Location, expr: &mut TryExpr) -> Status {
        self.name(&mut expr.block, "$T")
    }
}

/// Names every unnamed module entity (functions, globals, function
/// types, tables, memories, exceptions and segments), every parameter
/// and local, and every label. Existing names are kept, so running
/// this twice changes nothing the second time.
pub fn generate_names(module: &mut Module) -> Status {
    let mut status = Status::Ok;
    let mut named = 0;
    let exports: ExportNames = module
        .export_names()
        .into_iter()
        .map(|(key, name)| (key, name.to_owned()))
        .collect();
    for &space in SPACES.iter() {
        named += name_space(module, &exports, space);
    }
    for index in 0..module.funcs.len() as Index {
        name_params_and_locals(module, index);
        if let Some(func) = module.func_mut(index) {
            let mut namer = LabelNamer::default();
            status |= ExprVisitor::new(&mut namer).visit_func(func);
        }
    }
    debug!("generate_names: named {} entities", named);
    status
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{
        BlockDecl, DataSegment, ElemSegment, Except, Export, Expr, ExprKind, Func, Import,
        ImportKind, ModuleField, Type, Var,
    };

    fn sample() -> Module {
        let mut module = Module::default();
        module.append_field(ModuleField::Import(Import {
            module_name: "env".into(),
            field_name: "log".into(),
            kind: ImportKind::Func(Func::default()),
        }));
        let mut func = Func::default();
        func.decl.sig.param_types = vec![Type::I32];
        func.local_types = vec![Type::I64, Type::I64];
        func.exprs = vec![Expr::new(ExprKind::Block(Block::new(BlockDecl::default())))];
        module.append_field(ModuleField::Func(func));
        module.append_field(ModuleField::Func(Func::default()));
        module.append_field(ModuleField::Export(Export {
            name: "main".into(),
            kind: ExternalKind::Func,
            var: Var::Index(1),
        }));
        module
    }

    #[test]
    fn prefers_import_and_export_names() {
        let mut module = sample();
        assert!(generate_names(&mut module).is_ok());
        let names = (0..3)
            .map(|i| module.func(i).unwrap().name.clone())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["$env.log", "$main", "$f2"]);
        assert_eq!(module.func_index(&Var::Name("$main".into())), 1);
    }

    #[test]
    fn names_params_locals_and_labels() {
        let mut module = sample();
        generate_names(&mut module);
        let func = module.func(1).unwrap();
        assert_eq!(func.local_index(&Var::Name("$p0".into())), 0);
        assert_eq!(func.local_index(&Var::Name("$l1".into())), 1);
        assert_eq!(func.local_index(&Var::Name("$l2".into())), 2);
        match &func.exprs[0].kind {
            ExprKind::Block(block) => assert_eq!(block.label, "$B0"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn collisions_get_suffixes() {
        let mut module = Module::default();
        module.append_field(ModuleField::Func(Func {
            name: "$f1".into(),
            ..Func::default()
        }));
        module.append_field(ModuleField::Func(Func::default()));
        generate_names(&mut module);
        assert_eq!(module.func(1).unwrap().name, "$f1.1");
    }

    #[test]
    fn second_run_changes_nothing() {
        let mut module = sample();
        generate_names(&mut module);
        let before = format!("{:?}", module.fields);
        let bindings = module.func_bindings.len();
        generate_names(&mut module);
        assert_eq!(format!("{:?}", module.fields), before);
        assert_eq!(module.func_bindings.len(), bindings);
    }

    #[test]
    fn segments_get_their_own_prefixes() {
        let mut module = Module::default();
        module.append_field(ModuleField::Except(Except::default()));
        module.append_field(ModuleField::ElemSegment(ElemSegment {
            name: String::new(),
            table_var: Var::Index(0),
            offset: vec![],
            vars: vec![],
            passive: true,
        }));
        module.append_field(ModuleField::DataSegment(DataSegment {
            name: "$d0".into(),
            memory_var: Var::Index(0),
            offset: vec![],
            data: vec![],
            passive: true,
        }));
        module.append_field(ModuleField::DataSegment(DataSegment {
            name: String::new(),
            memory_var: Var::Index(0),
            offset: vec![],
            data: vec![],
            passive: true,
        }));
        generate_names(&mut module);
        assert_eq!(module.except(0).unwrap().name, "$e0");
        assert_eq!(module.elem_segment(0).unwrap().name, "$e0");
        assert_eq!(module.data_segment(1).unwrap().name, "$d1");
        assert_eq!(module.elem_segment_index(&Var::Name("$e0".into())), 0);
        assert_eq!(module.data_segment_index(&Var::Name("$d1".into())), 1);
    }
}
