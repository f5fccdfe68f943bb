//! Rewrite named references into index references.

use crate::errors::{ErrorHandler, Status};
use crate::ir::{
    BindingHash, Block, BlockDecl, ExprList, ExternalKind, IfExceptExpr, IfExpr, Index,
    Location, Module, ModuleField, TryExpr, Var, INVALID_INDEX,
};
use crate::visitor::{Delegate, ExprVisitor};
use log::debug;

/// Passes diagnostics on until the handler asks to stop, then drops
/// them.
struct Reporter<'e> {
    errors: &'e mut dyn ErrorHandler,
    stopped: bool,
}

impl<'e> Reporter<'e> {
    fn report(&mut self, loc: Location, message: String) -> Status {
        if !self.stopped && !self.errors.on_error(loc, &message) {
            self.stopped = true;
        }
        Status::Error
    }
}

/// Replaces a named `var` with `index`, or reports it as undefined.
fn resolve_var(
    errors: &mut Reporter,
    loc: Location,
    what: &str,
    var: &mut Var,
    index: Index,
) -> Status {
    let name = match var {
        Var::Index(_) => return Status::Ok,
        Var::Name(name) => name,
    };
    if index == INVALID_INDEX {
        return errors.report(loc, format!("undefined {} variable \"{}\"", what, name));
    }
    *var = Var::Index(index);
    Status::Ok
}

fn check_duplicates(errors: &mut Reporter, bindings: &BindingHash, what: &str) -> Status {
    let mut status = Status::Ok;
    bindings.find_duplicates(|name, _first, dup| {
        status |= errors.report(dup.loc, format!("redefinition of {} \"{}\"", what, name));
    });
    status
}

/// Resolves the references inside one instruction list. `func` is the
/// function the list belongs to; init expressions have none.
struct NameResolver<'a, 'e> {
    module: &'a Module,
    func: Option<Index>,
    errors: &'a mut Reporter<'e>,
    labels: Vec<String>,
    status: Status,
}

impl<'a, 'e> NameResolver<'a, 'e> {
    fn new(module: &'a Module, func: Option<Index>, errors: &'a mut Reporter<'e>) -> Self {
        NameResolver {
            module,
            func,
            errors,
            labels: vec![],
            status: Status::Ok,
        }
    }

    fn resolve(&mut self, loc: Location, what: &str, var: &mut Var, index: Index) {
        self.status |= resolve_var(&mut *self.errors, loc, what, var, index);
    }

    fn resolve_label(&mut self, loc: Location, var: &mut Var) {
        let name = match var {
            Var::Index(_) => return,
            Var::Name(name) => name,
        };
        match self.labels.iter().rposition(|label| label.as_str() == name.as_str()) {
            Some(pos) => *var = Var::Index((self.labels.len() - 1 - pos) as Index),
            None => {
                self.status |= self
                    .errors
                    .report(loc, format!("undefined label variable \"{}\"", name));
            }
        }
    }

    fn resolve_func(&mut self, loc: Location, var: &mut Var) {
        let index = self.module.func_index(var);
        self.resolve(loc, "function", var, index);
    }

    fn resolve_global(&mut self, loc: Location, var: &mut Var) {
        let index = self.module.global_index(var);
        self.resolve(loc, "global", var, index);
    }

    fn resolve_table(&mut self, loc: Location, var: &mut Var) {
        let index = self.module.table_index(var);
        self.resolve(loc, "table", var, index);
    }

    fn resolve_func_type(&mut self, loc: Location, var: &mut Var) {
        let index = self.module.func_type_index(var);
        self.resolve(loc, "function type", var, index);
    }

    fn resolve_except(&mut self, loc: Location, var: &mut Var) {
        let index = self.module.except_index(var);
        self.resolve(loc, "exception", var, index);
    }

    fn resolve_local(&mut self, loc: Location, var: &mut Var) {
        let index = match self.func.and_then(|i| self.module.func(i)) {
            Some(func) => func.local_index(var),
            None => INVALID_INDEX,
        };
        self.resolve(loc, "local", var, index);
    }

    fn resolve_elem_segment(&mut self, loc: Location, var: &mut Var) {
        let index = self.module.elem_segment_index(var);
        self.resolve(loc, "elem segment", var, index);
    }

    fn resolve_data_segment(&mut self, loc: Location, var: &mut Var) {
        let index = self.module.data_segment_index(var);
        self.resolve(loc, "data segment", var, index);
    }

    fn begin_label(&mut self, loc: Location, block: &mut Block) -> Status {
        if let BlockDecl::FuncType(var) = &mut block.decl {
            self.resolve_func_type(loc, var);
        }
        self.labels.push(block.label.clone());
        self.walk_status()
    }

    fn end_label(&mut self) -> Status {
        self.labels.pop();
        self.walk_status()
    }

    /// Ends the walk once the handler has asked to stop.
    fn walk_status(&self) -> Status {
        if self.errors.stopped {
            Status::Error
        } else {
            Status::Ok
        }
    }
}

impl<'a, 'e> Delegate for NameResolver<'a, 'e> {
    fn on_br_expr(&mut self, loc: Location, label: &mut Var) -> Status {
        self.resolve_label(loc, label);
        self.walk_status()
    }
    fn on_br_if_expr(&mut self, loc: Location, label: &mut Var) -> Status {
        self.resolve_label(loc, label);
        self.walk_status()
    }
    fn on_br_table_expr(&mut self, loc: Location, targets: &mut [Var], default: &mut Var) -> Status {
        for target in targets {
            self.resolve_label(loc, target);
        }
        self.resolve_label(loc, default);
        self.walk_status()
    }
    fn on_call_expr(&mut self, loc: Location, func: &mut Var) -> Status {
        self.resolve_func(loc, func);
        self.walk_status()
    }
    fn on_call_indirect_expr(&mut self, loc: Location, type_var: &mut Var, table: &mut Var) -> Status {
        self.resolve_func_type(loc, type_var);
        self.resolve_table(loc, table);
        self.walk_status()
    }
    fn on_return_call_expr(&mut self, loc: Location, func: &mut Var) -> Status {
        self.resolve_func(loc, func);
        self.walk_status()
    }
    fn on_return_call_indirect_expr(
        &mut self,
        loc: Location,
        type_var: &mut Var,
        table: &mut Var,
    ) -> Status {
        self.resolve_func_type(loc, type_var);
        self.resolve_table(loc, table);
        self.walk_status()
    }
    fn on_get_local_expr(&mut self, loc: Location, local: &mut Var) -> Status {
        self.resolve_local(loc, local);
        self.walk_status()
    }
    fn on_set_local_expr(&mut self, loc: Location, local: &mut Var) -> Status {
        self.resolve_local(loc, local);
        self.walk_status()
    }
    fn on_tee_local_expr(&mut self, loc: Location, local: &mut Var) -> Status {
        self.resolve_local(loc, local);
        self.walk_status()
    }
    fn on_get_global_expr(&mut self, loc: Location, global: &mut Var) -> Status {
        self.resolve_global(loc, global);
        self.walk_status()
    }
    fn on_set_global_expr(&mut self, loc: Location, global: &mut Var) -> Status {
        self.resolve_global(loc, global);
        self.walk_status()
    }
    fn on_memory_init_expr(&mut self, loc: Location, segment: &mut Var) -> Status {
        self.resolve_data_segment(loc, segment);
        self.walk_status()
    }
    fn on_data_drop_expr(&mut self, loc: Location, segment: &mut Var) -> Status {
        self.resolve_data_segment(loc, segment);
        self.walk_status()
    }
    fn on_table_init_expr(&mut self, loc: Location, segment: &mut Var) -> Status {
        self.resolve_elem_segment(loc, segment);
        self.walk_status()
    }
    fn on_elem_drop_expr(&mut self, loc: Location, segment: &mut Var) -> Status {
        self.resolve_elem_segment(loc, segment);
        self.walk_status()
    }
    fn on_throw_expr(&mut self, loc: Location, except: &mut Var) -> Status {
        self.resolve_except(loc, except);
        self.walk_status()
    }
    fn on_rethrow_expr(&mut self, loc: Location, label: &mut Var) -> Status {
        self.resolve_label(loc, label);
        self.walk_status()
    }

    fn begin_block_expr(&mut self, loc: Location, block: &mut Block) -> Status {
        self.begin_label(loc, block)
    }
    fn end_block_expr(&mut self, _loc: Location, _block: &mut Block) -> Status {
        self.end_label()
    }
    fn begin_loop_expr(&mut self, loc: Location, block: &mut Block) -> Status {
        self.begin_label(loc, block)
    }
    fn end_loop_expr(&mut self, _loc: Location, _block: &mut Block) -> Status {
        self.end_label()
    }
    fn begin_if_expr(&mut self, loc: Location, expr: &mut IfExpr) -> Status {
        self.begin_label(loc, &mut expr.true_)
    }
    fn end_if_expr(&mut self, _loc: Location, _expr: &mut IfExpr) -> Status {
        self.end_label()
    }
    fn begin_if_except_expr(&mut self, loc: Location, expr: &mut IfExceptExpr) -> Status {
        self.resolve_except(loc, &mut expr.except_var);
        self.begin_label(loc, &mut expr.true_)
    }
    fn end_if_except_expr(&mut self, _loc: Location, _expr: &mut IfExceptExpr) -> Status {
        self.end_label()
    }
    fn begin_try_expr(&mut self, loc: Location, expr: &mut TryExpr) -> Status {
        for catch in &mut expr.catches {
            if let Some(var) = &mut catch.var {
                let index = self.module.except_index(var);
                self.resolve(catch.loc, "exception", var, index);
            }
        }
        self.begin_label(loc, &mut expr.block)
    }
    fn end_try_expr(&mut self, _loc: Location, _expr: &mut TryExpr) -> Status {
        self.end_label()
    }
}

fn resolve_expr_list(
    module: &Module,
    func: Option<Index>,
    exprs: &mut ExprList,
    errors: &mut Reporter,
) -> Status {
    let mut resolver = NameResolver::new(module, func, errors);
    let walked = ExprVisitor::new(&mut resolver).visit_expr_list(exprs);
    walked | resolver.status
}

fn check_all_duplicates(module: &Module, errors: &mut Reporter) -> Status {
    let mut status = Status::Ok;
    status |= check_duplicates(errors, &module.func_bindings, "function");
    status |= check_duplicates(errors, &module.global_bindings, "global");
    status |= check_duplicates(errors, &module.func_type_bindings, "function type");
    status |= check_duplicates(errors, &module.table_bindings, "table");
    status |= check_duplicates(errors, &module.memory_bindings, "memory");
    status |= check_duplicates(errors, &module.except_bindings, "exception");
    status |= check_duplicates(errors, &module.elem_segment_bindings, "elem segment");
    status |= check_duplicates(errors, &module.data_segment_bindings, "data segment");
    status |= check_duplicates(errors, &module.export_bindings, "export");
    for func in (0..module.funcs.len() as Index).filter_map(|i| module.func(i)) {
        status |= check_duplicates(errors, &func.param_bindings, "parameter");
        status |= check_duplicates(errors, &func.local_bindings, "local");
    }
    status
}

fn resolve_funcs(module: &mut Module, errors: &mut Reporter) -> Status {
    let mut status = Status::Ok;
    for index in 0..module.funcs.len() as Index {
        let (mut type_var, mut exprs) = match module.func_mut(index) {
            Some(func) => (func.decl.type_var.take(), std::mem::take(&mut func.exprs)),
            None => continue,
        };
        if let Some(var) = &mut type_var {
            let type_index = module.func_type_index(var);
            status |= resolve_var(errors, Location::default(), "function type", var, type_index);
        }
        status |= resolve_expr_list(module, Some(index), &mut exprs, errors);
        if let Some(func) = module.func_mut(index) {
            func.decl.type_var = type_var;
            func.exprs = exprs;
        }
    }
    status
}

fn resolve_globals(module: &mut Module, errors: &mut Reporter) -> Status {
    let mut status = Status::Ok;
    for index in 0..module.globals.len() as Index {
        let mut init_expr = match module.global_mut(index) {
            Some(global) => std::mem::take(&mut global.init_expr),
            None => continue,
        };
        status |= resolve_expr_list(module, None, &mut init_expr, errors);
        if let Some(global) = module.global_mut(index) {
            global.init_expr = init_expr;
        }
    }
    status
}

fn resolve_elem_segments(module: &mut Module, errors: &mut Reporter) -> Status {
    let mut status = Status::Ok;
    let loc = Location::default();
    for index in 0..module.elem_segments.len() as Index {
        let (mut table_var, mut offset, mut vars) = match module.elem_segment_mut(index) {
            Some(segment) => (
                segment.table_var.clone(),
                std::mem::take(&mut segment.offset),
                std::mem::take(&mut segment.vars),
            ),
            None => continue,
        };
        let table_index = module.table_index(&table_var);
        status |= resolve_var(errors, loc, "table", &mut table_var, table_index);
        status |= resolve_expr_list(module, None, &mut offset, errors);
        for var in &mut vars {
            let func_index = module.func_index(var);
            status |= resolve_var(errors, loc, "function", var, func_index);
        }
        if let Some(segment) = module.elem_segment_mut(index) {
            segment.table_var = table_var;
            segment.offset = offset;
            segment.vars = vars;
        }
    }
    status
}

fn resolve_data_segments(module: &mut Module, errors: &mut Reporter) -> Status {
    let mut status = Status::Ok;
    for index in 0..module.data_segments.len() as Index {
        let (mut memory_var, mut offset) = match module.data_segment_mut(index) {
            Some(segment) => (
                segment.memory_var.clone(),
                std::mem::take(&mut segment.offset),
            ),
            None => continue,
        };
        let memory_index = module.memory_index(&memory_var);
        status |= resolve_var(
            errors,
            Location::default(),
            "memory",
            &mut memory_var,
            memory_index,
        );
        status |= resolve_expr_list(module, None, &mut offset, errors);
        if let Some(segment) = module.data_segment_mut(index) {
            segment.memory_var = memory_var;
            segment.offset = offset;
        }
    }
    status
}

fn resolve_exports(module: &mut Module, errors: &mut Reporter) -> Status {
    let mut status = Status::Ok;
    for index in 0..module.exports.len() as Index {
        let (kind, mut var) = match module.export(index) {
            Some(export) => (export.kind, export.var.clone()),
            None => continue,
        };
        let target = match kind {
            ExternalKind::Func => module.func_index(&var),
            ExternalKind::Table => module.table_index(&var),
            ExternalKind::Memory => module.memory_index(&var),
            ExternalKind::Global => module.global_index(&var),
            ExternalKind::Except => module.except_index(&var),
        };
        let what = match kind {
            ExternalKind::Func => "function",
            ExternalKind::Except => "exception",
            other => other.name(),
        };
        status |= resolve_var(errors, Location::default(), what, &mut var, target);
        if let Some(export) = module.export_mut(index) {
            export.var = var;
        }
    }
    status
}

fn resolve_start(module: &mut Module, errors: &mut Reporter) -> Status {
    let mut status = Status::Ok;
    for id in module.starts.clone() {
        let mut var = match &module.fields[id] {
            ModuleField::Start(var) => var.clone(),
            _ => continue,
        };
        let index = module.func_index(&var);
        status |= resolve_var(errors, Location::default(), "function", &mut var, index);
        if let ModuleField::Start(start) = &mut module.fields[id] {
            *start = var;
        }
    }
    status
}

/// Resolves every named reference in `module` to an index. Labels
/// resolve to their relative depth (0 is the innermost enclosing
/// construct). Undefined names and duplicate bindings are reported to
/// `errors`; resolution continues past them unless the handler returns
/// `false`, which ends the pass at the next instruction or phase.
pub fn resolve_names(module: &mut Module, errors: &mut dyn ErrorHandler) -> Status {
    let mut errors = Reporter {
        errors,
        stopped: false,
    };
    let phases: [fn(&mut Module, &mut Reporter) -> Status; 7] = [
        |module, errors| check_all_duplicates(module, errors),
        resolve_funcs,
        resolve_globals,
        resolve_elem_segments,
        resolve_data_segments,
        resolve_exports,
        resolve_start,
    ];
    let mut status = Status::Ok;
    for phase in phases.iter() {
        if errors.stopped {
            break;
        }
        status |= phase(module, &mut errors);
    }
    debug!("resolve_names: finished with status {:?}", status);
    status
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::errors::{Errors, StopAfterFirst};
    use crate::ir::{Binding, Expr, ExprKind, Func, Global, Type};

    fn named_func(name: &str, exprs: ExprList) -> ModuleField {
        ModuleField::Func(Func {
            name: name.into(),
            exprs,
            ..Func::default()
        })
    }

    #[test]
    fn resolves_funcs_globals_and_locals() {
        let mut module = Module::default();
        module.append_field(ModuleField::Global(Global {
            name: "$g".into(),
            ty: Type::I32,
            ..Global::default()
        }));
        let mut func = Func {
            name: "$f".into(),
            ..Func::default()
        };
        func.decl.sig.param_types = vec![Type::I32];
        func.local_types = vec![Type::I64];
        func.local_bindings.emplace(
            "$x",
            Binding {
                loc: Location::default(),
                index: 0,
            },
        );
        func.exprs = vec![
            Expr::new(ExprKind::Call(Var::Name("$f".into()))),
            Expr::new(ExprKind::GetGlobal(Var::Name("$g".into()))),
            Expr::new(ExprKind::GetLocal(Var::Name("$x".into()))),
        ];
        module.append_field(ModuleField::Func(func));

        let mut errors = Errors::new();
        assert!(resolve_names(&mut module, &mut errors).is_ok());
        assert!(errors.is_empty());
        let exprs = &module.func(0).unwrap().exprs;
        assert_eq!(exprs[0].kind, ExprKind::Call(Var::Index(0)));
        assert_eq!(exprs[1].kind, ExprKind::GetGlobal(Var::Index(0)));
        assert_eq!(exprs[2].kind, ExprKind::GetLocal(Var::Index(1)));
    }

    #[test]
    fn labels_resolve_to_relative_depth() {
        let inner = Block {
            label: "$inner".into(),
            decl: BlockDecl::default(),
            exprs: vec![
                Expr::new(ExprKind::Br(Var::Name("$outer".into()))),
                Expr::new(ExprKind::Br(Var::Name("$inner".into()))),
            ],
        };
        let outer = Block {
            label: "$outer".into(),
            decl: BlockDecl::default(),
            exprs: vec![Expr::new(ExprKind::Loop(inner))],
        };
        let mut module = Module::default();
        module.append_field(named_func("$f", vec![Expr::new(ExprKind::Block(outer))]));

        let mut errors = Errors::new();
        assert!(resolve_names(&mut module, &mut errors).is_ok());
        let body = &module.func(0).unwrap().exprs;
        let inner = match &body[0].kind {
            ExprKind::Block(outer) => match &outer.exprs[0].kind {
                ExprKind::Loop(inner) => inner,
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(inner.exprs[0].kind, ExprKind::Br(Var::Index(1)));
        assert_eq!(inner.exprs[1].kind, ExprKind::Br(Var::Index(0)));
    }

    #[test]
    fn reports_every_undefined_name() {
        let mut module = Module::default();
        module.append_field(named_func(
            "$f",
            vec![
                Expr::new(ExprKind::Call(Var::Name("$nope".into()))),
                Expr::new(ExprKind::Br(Var::Name("$nowhere".into()))),
            ],
        ));
        let mut errors = Errors::new();
        assert!(resolve_names(&mut module, &mut errors).is_error());
        let messages = errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>();
        assert_eq!(
            messages,
            vec![
                "undefined function variable \"$nope\"",
                "undefined label variable \"$nowhere\"",
            ]
        );
    }

    #[test]
    fn reports_duplicate_bindings() {
        let mut module = Module::default();
        module.append_field(named_func("$f", vec![]));
        module.append_field(named_func("$f", vec![]));
        let mut errors = Errors::new();
        assert!(resolve_names(&mut module, &mut errors).is_error());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "redefinition of function \"$f\"");
    }

    #[test]
    fn index_only_module_is_unchanged() {
        let mut module = Module::default();
        module.append_field(named_func(
            "",
            vec![Expr::new(ExprKind::Call(Var::Index(0)))],
        ));
        let before = module.func(0).unwrap().exprs.clone();
        let mut errors = Errors::new();
        assert!(resolve_names(&mut module, &mut errors).is_ok());
        assert_eq!(module.func(0).unwrap().exprs, before);
    }

    #[test]
    fn handler_can_stop_after_first_error() {
        let mut module = Module::default();
        module.append_field(named_func(
            "$f",
            vec![
                Expr::new(ExprKind::Call(Var::Name("$a".into()))),
                Expr::new(ExprKind::Call(Var::Name("$b".into()))),
            ],
        ));
        module.append_field(ModuleField::Start(Var::Name("$c".into())));

        let mut all = Errors::new();
        assert!(resolve_names(&mut module.clone(), &mut all).is_error());
        assert_eq!(all.len(), 3);

        let mut first = StopAfterFirst::default();
        assert!(resolve_names(&mut module, &mut first).is_error());
        assert_eq!(first.0.len(), 1);
        assert_eq!(first.0[0].message, "undefined function variable \"$a\"");
        // The walk ended before the second call; the body is intact.
        let body = &module.func(0).unwrap().exprs;
        assert_eq!(body.len(), 2);
        assert_eq!(body[1].kind, ExprKind::Call(Var::Name("$b".into())));
    }
}
