//! Displaying IR.

use super::{
    make_type_binding_reverse_mapping, BlockDecl, Catch, Expr, ExprKind, Func, FuncDeclaration,
    FuncSignature, Global, ImportKind, Limits, Module, ModuleField, Type,
};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Text dump of a module in a folded, wat-like syntax. Meant for
/// humans and tests, not for reassembly.
pub struct ModuleDisplay<'a>(pub(crate) &'a Module);

fn opt_name(name: &str) -> String {
    if name.is_empty() {
        String::new()
    } else {
        format!(" {}", name)
    }
}

fn types(kw: &str, tys: &[Type]) -> String {
    if tys.is_empty() {
        return String::new();
    }
    let tys = tys.iter().map(|ty| ty.to_string()).collect::<Vec<_>>();
    format!(" ({} {})", kw, tys.join(" "))
}

fn sig(sig: &FuncSignature) -> String {
    format!(
        "{}{}",
        types("param", &sig.param_types),
        types("result", &sig.result_types)
    )
}

fn decl(decl: &FuncDeclaration) -> String {
    match &decl.type_var {
        Some(var) => format!(" (type {}){}", var, sig(&decl.sig)),
        None => sig(&decl.sig),
    }
}

fn limits(limits: &Limits) -> String {
    let mut s = limits.initial.to_string();
    if let Some(max) = limits.max {
        s += &format!(" {}", max);
    }
    if limits.is_shared {
        s += " shared";
    }
    s
}

fn global_type(global: &Global) -> String {
    if global.mutable {
        format!("(mut {})", global.ty)
    } else {
        global.ty.to_string()
    }
}

fn block_decl(decl: &BlockDecl) -> String {
    match decl {
        BlockDecl::Inline(tys) => types("result", tys),
        BlockDecl::FuncType(var) => format!(" (type {})", var),
    }
}

fn write_indent(f: &mut Formatter, depth: usize) -> FmtResult {
    write!(f, "{:width$}", "", width = depth * 2)
}

/// Lines still owed to an open structured instruction, with the
/// depth they are indented to.
enum Pending<'e> {
    Exprs(std::slice::Iter<'e, Expr>, usize),
    Else(&'e [Expr], usize),
    Catch(&'e Catch, usize),
    End(usize),
}

fn write_exprs(f: &mut Formatter, exprs: &[Expr], depth: usize) -> FmtResult {
    let mut pending = vec![Pending::Exprs(exprs.iter(), depth)];
    while let Some(work) = pending.pop() {
        match work {
            Pending::Exprs(mut iter, depth) => {
                if let Some(expr) = iter.next() {
                    pending.push(Pending::Exprs(iter, depth));
                    write_expr(f, expr, depth, &mut pending)?;
                }
            }
            Pending::Else(exprs, depth) => {
                write_indent(f, depth)?;
                writeln!(f, "else")?;
                pending.push(Pending::Exprs(exprs.iter(), depth + 1));
            }
            Pending::Catch(catch, depth) => {
                write_indent(f, depth)?;
                match &catch.var {
                    Some(var) => writeln!(f, "catch {}", var)?,
                    None => writeln!(f, "catch_all")?,
                }
                pending.push(Pending::Exprs(catch.exprs.iter(), depth + 1));
            }
            Pending::End(depth) => {
                write_indent(f, depth)?;
                writeln!(f, "end")?;
            }
        }
    }
    Ok(())
}

/// Writes one instruction, or the opening line of a structured one
/// with the rest queued on `pending`.
fn write_expr<'e>(
    f: &mut Formatter,
    expr: &'e Expr,
    depth: usize,
    pending: &mut Vec<Pending<'e>>,
) -> FmtResult {
    write_indent(f, depth)?;
    match &expr.kind {
        ExprKind::Binary(op)
        | ExprKind::Compare(op)
        | ExprKind::Convert(op)
        | ExprKind::Unary(op)
        | ExprKind::Ternary(op) => writeln!(f, "{}", op.name()),
        ExprKind::Const(value) => writeln!(f, "{}", value),
        ExprKind::Load {
            opcode,
            align,
            offset,
        }
        | ExprKind::Store {
            opcode,
            align,
            offset,
        } => writeln!(
            f,
            "{} offset={} align={}",
            opcode.name(),
            offset,
            1u64.checked_shl(*align).unwrap_or(0)
        ),
        ExprKind::Drop => writeln!(f, "drop"),
        ExprKind::Select => writeln!(f, "select"),
        ExprKind::Nop => writeln!(f, "nop"),
        ExprKind::Unreachable => writeln!(f, "unreachable"),
        ExprKind::Return => writeln!(f, "return"),
        ExprKind::Br(var) => writeln!(f, "br {}", var),
        ExprKind::BrIf(var) => writeln!(f, "br_if {}", var),
        ExprKind::BrTable { targets, default } => {
            write!(f, "br_table")?;
            for target in targets {
                write!(f, " {}", target)?;
            }
            writeln!(f, " {}", default)
        }
        ExprKind::Call(var) => writeln!(f, "call {}", var),
        ExprKind::ReturnCall(var) => writeln!(f, "return_call {}", var),
        ExprKind::CallIndirect { type_var, table } => {
            writeln!(f, "call_indirect {} (type {})", table, type_var)
        }
        ExprKind::ReturnCallIndirect { type_var, table } => {
            writeln!(f, "return_call_indirect {} (type {})", table, type_var)
        }
        ExprKind::GetLocal(var) => writeln!(f, "local.get {}", var),
        ExprKind::SetLocal(var) => writeln!(f, "local.set {}", var),
        ExprKind::TeeLocal(var) => writeln!(f, "local.tee {}", var),
        ExprKind::GetGlobal(var) => writeln!(f, "global.get {}", var),
        ExprKind::SetGlobal(var) => writeln!(f, "global.set {}", var),
        ExprKind::MemorySize => writeln!(f, "memory.size"),
        ExprKind::MemoryGrow => writeln!(f, "memory.grow"),
        ExprKind::MemoryCopy => writeln!(f, "memory.copy"),
        ExprKind::MemoryFill => writeln!(f, "memory.fill"),
        ExprKind::MemoryInit(var) => writeln!(f, "memory.init {}", var),
        ExprKind::DataDrop(var) => writeln!(f, "data.drop {}", var),
        ExprKind::TableCopy => writeln!(f, "table.copy"),
        ExprKind::TableInit(var) => writeln!(f, "table.init {}", var),
        ExprKind::ElemDrop(var) => writeln!(f, "elem.drop {}", var),
        ExprKind::Throw(var) => writeln!(f, "throw {}", var),
        ExprKind::Rethrow(var) => writeln!(f, "rethrow {}", var),
        ExprKind::SimdLaneOp { opcode, lane } => writeln!(f, "{} {}", opcode.name(), lane),
        ExprKind::SimdShuffleOp { opcode, lanes } => {
            write!(f, "{}", opcode.name())?;
            for lane in lanes {
                write!(f, " {}", lane)?;
            }
            writeln!(f)
        }
        ExprKind::Block(block) | ExprKind::Loop(block) => {
            let kw = if let ExprKind::Loop(_) = expr.kind {
                "loop"
            } else {
                "block"
            };
            writeln!(f, "{}{}{}", kw, opt_name(&block.label), block_decl(&block.decl))?;
            pending.push(Pending::End(depth));
            pending.push(Pending::Exprs(block.exprs.iter(), depth + 1));
            Ok(())
        }
        ExprKind::If(if_) => {
            writeln!(
                f,
                "if{}{}",
                opt_name(&if_.true_.label),
                block_decl(&if_.true_.decl)
            )?;
            pending.push(Pending::End(depth));
            if !if_.false_.is_empty() {
                pending.push(Pending::Else(&if_.false_, depth));
            }
            pending.push(Pending::Exprs(if_.true_.exprs.iter(), depth + 1));
            Ok(())
        }
        ExprKind::IfExcept(if_) => {
            writeln!(
                f,
                "if_except{}{} {}",
                opt_name(&if_.true_.label),
                block_decl(&if_.true_.decl),
                if_.except_var
            )?;
            pending.push(Pending::End(depth));
            if !if_.false_.is_empty() {
                pending.push(Pending::Else(&if_.false_, depth));
            }
            pending.push(Pending::Exprs(if_.true_.exprs.iter(), depth + 1));
            Ok(())
        }
        ExprKind::Try(try_) => {
            writeln!(
                f,
                "try{}{}",
                opt_name(&try_.block.label),
                block_decl(&try_.block.decl)
            )?;
            pending.push(Pending::End(depth));
            for catch in try_.catches.iter().rev() {
                pending.push(Pending::Catch(catch, depth));
            }
            pending.push(Pending::Exprs(try_.block.exprs.iter(), depth + 1));
            Ok(())
        }
    }
}

fn write_func(f: &mut Formatter, func: &Func) -> FmtResult {
    let params = make_type_binding_reverse_mapping(func.num_params() as usize, &func.param_bindings);
    let locals = make_type_binding_reverse_mapping(func.local_types.len(), &func.local_bindings);
    writeln!(f, "  (func{}{}", opt_name(&func.name), decl(&func.decl))?;
    for (i, name) in params.iter().enumerate() {
        if !name.is_empty() {
            writeln!(f, "    ;; param {} is {}", i, name)?;
        }
    }
    for (i, ty) in func.local_types.iter().enumerate() {
        writeln!(f, "    (local{} {})", opt_name(&locals[i]), ty)?;
    }
    write_exprs(f, &func.exprs, 2)?;
    writeln!(f, "  )")
}

impl<'a> Display for ModuleDisplay<'a> {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let module = self.0;
        writeln!(f, "(module{}", opt_name(&module.name))?;
        for field in module.fields.values() {
            match field {
                ModuleField::FuncType(ty) => {
                    writeln!(f, "  (type{} (func{}))", opt_name(&ty.name), sig(&ty.sig))?
                }
                ModuleField::Import(import) => {
                    let desc = match &import.kind {
                        ImportKind::Func(func) => {
                            format!("func{}{}", opt_name(&func.name), decl(&func.decl))
                        }
                        ImportKind::Table(table) => format!(
                            "table{} {} {}",
                            opt_name(&table.name),
                            limits(&table.elem_limits),
                            table.elem_type
                        ),
                        ImportKind::Memory(memory) => format!(
                            "memory{} {}",
                            opt_name(&memory.name),
                            limits(&memory.page_limits)
                        ),
                        ImportKind::Global(global) => {
                            format!("global{} {}", opt_name(&global.name), global_type(global))
                        }
                        ImportKind::Except(except) => {
                            format!("except{}{}", opt_name(&except.name), types("param", &except.sig))
                        }
                    };
                    writeln!(
                        f,
                        "  (import \"{}\" \"{}\" ({}))",
                        import.module_name, import.field_name, desc
                    )?
                }
                ModuleField::Func(func) => write_func(f, func)?,
                ModuleField::Table(table) => writeln!(
                    f,
                    "  (table{} {} {})",
                    opt_name(&table.name),
                    limits(&table.elem_limits),
                    table.elem_type
                )?,
                ModuleField::Memory(memory) => writeln!(
                    f,
                    "  (memory{} {})",
                    opt_name(&memory.name),
                    limits(&memory.page_limits)
                )?,
                ModuleField::Global(global) => {
                    writeln!(f, "  (global{} {}", opt_name(&global.name), global_type(global))?;
                    write_exprs(f, &global.init_expr, 2)?;
                    writeln!(f, "  )")?
                }
                ModuleField::Except(except) => writeln!(
                    f,
                    "  (except{}{})",
                    opt_name(&except.name),
                    types("param", &except.sig)
                )?,
                ModuleField::Export(export) => writeln!(
                    f,
                    "  (export \"{}\" ({} {}))",
                    export.name,
                    export.kind.name(),
                    export.var
                )?,
                ModuleField::Start(var) => writeln!(f, "  (start {})", var)?,
                ModuleField::ElemSegment(segment) => {
                    if segment.passive {
                        write!(f, "  (elem{} passive", opt_name(&segment.name))?;
                    } else {
                        writeln!(f, "  (elem{} (table {})", opt_name(&segment.name), segment.table_var)?;
                        write_exprs(f, &segment.offset, 2)?;
                        write!(f, "   ")?;
                    }
                    write!(f, " func")?;
                    for var in &segment.vars {
                        write!(f, " {}", var)?;
                    }
                    writeln!(f, ")")?
                }
                ModuleField::DataSegment(segment) => {
                    if segment.passive {
                        write!(f, "  (data{} passive", opt_name(&segment.name))?;
                    } else {
                        writeln!(
                            f,
                            "  (data{} (memory {})",
                            opt_name(&segment.name),
                            segment.memory_var
                        )?;
                        write_exprs(f, &segment.offset, 2)?;
                        write!(f, "   ")?;
                    }
                    writeln!(f, " ;; {} bytes)", segment.data.len())?
                }
            }
        }
        writeln!(f, ")")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{Block, Const, Export, ExternalKind, IfExpr, TryExpr, Var};

    #[test]
    fn displays_nested_bodies() {
        let mut module = Module::default();
        let mut func = Func {
            name: "$f".into(),
            ..Func::default()
        };
        func.decl.sig.result_types = vec![Type::I32];
        let mut block = Block::new(BlockDecl::Inline(vec![Type::I32]));
        block.label = "$B0".into();
        block
            .exprs
            .push(Expr::new(ExprKind::Const(Const::I32(-1i32 as u32))));
        func.exprs.push(Expr::new(ExprKind::Block(block)));
        module.append_field(ModuleField::Func(func));
        module.append_field(ModuleField::Export(Export {
            name: "f".into(),
            kind: ExternalKind::Func,
            var: Var::Index(0),
        }));

        let text = module.display().to_string();
        assert_eq!(
            text,
            "(module\n\
             \x20 (func $f (result i32)\n\
             \x20   block $B0 (result i32)\n\
             \x20     i32.const -1\n\
             \x20   end\n\
             \x20 )\n\
             \x20 (export \"f\" (func 0))\n\
             )\n"
        );
    }

    #[test]
    fn displays_arms_and_handlers_in_order() {
        let mut func = Func::default();
        func.exprs.push(Expr::new(ExprKind::If(IfExpr {
            true_: Block::default(),
            false_: vec![Expr::new(ExprKind::Nop)],
        })));
        func.exprs.push(Expr::new(ExprKind::Try(TryExpr {
            block: Block::default(),
            catches: vec![
                Catch {
                    loc: Default::default(),
                    var: Some(Var::Index(0)),
                    exprs: vec![Expr::new(ExprKind::Drop)],
                },
                Catch {
                    loc: Default::default(),
                    var: None,
                    exprs: vec![],
                },
            ],
        })));
        let mut module = Module::default();
        module.append_field(ModuleField::Func(func));
        let text = module.display().to_string();
        let body = text.lines().skip(2).take(9).collect::<Vec<_>>();
        assert_eq!(
            body,
            vec![
                "    if",
                "    else",
                "      nop",
                "    end",
                "    try",
                "    catch 0",
                "      drop",
                "    catch_all",
                "    end",
            ]
        );
    }
}
