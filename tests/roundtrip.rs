//! Integration tests for reading, writing and re-reading modules.

use std::path::PathBuf;
use wasmtree::{
    generate_names, resolve_names, Block, BlockDecl, Catch, Const, Delegate, Errors, Except,
    Expr, ExprKind, ExprVisitor, ExternalKind, FrontendError, FrontendOptions, Func,
    FuncDeclaration, FuncSignature, FuncType, IfExpr, Location, Module, ModuleField, Status,
    TryExpr, Type, Var, WriteBinaryOptions,
};

fn get_wats() -> Vec<PathBuf> {
    let test_dir = std::env::current_dir()
        .unwrap()
        .join("tests")
        .join("roundtrip");
    let mut ret = vec![];
    for item in std::fs::read_dir(test_dir).unwrap() {
        let path = item.unwrap().path();
        if path.extension().and_then(|s| s.to_str()) == Some("wat") {
            ret.push(path);
        }
    }
    ret.sort(); // Deterministic test order.
    ret
}

fn read(bytes: &[u8]) -> Module {
    Module::from_wasm_bytes(bytes, &FrontendOptions::default()).unwrap()
}

fn read_leb(bytes: &[u8], pos: &mut usize) -> (u32, usize) {
    let start = *pos;
    let mut value = 0u32;
    let mut shift = 0;
    loop {
        let byte = bytes[*pos];
        *pos += 1;
        value |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    (value, *pos - start)
}

/// A section as written: its id, its custom name (if any), the width
/// of its size field and its payload (after the name, for customs).
struct Section<'a> {
    id: u8,
    name: Option<String>,
    size_width: usize,
    payload: &'a [u8],
}

fn sections(bytes: &[u8]) -> Vec<Section<'_>> {
    let mut ret = vec![];
    let mut pos = 8;
    while pos < bytes.len() {
        let id = bytes[pos];
        pos += 1;
        let (size, size_width) = read_leb(bytes, &mut pos);
        let end = pos + size as usize;
        let mut start = pos;
        let name = if id == 0 {
            let (len, _) = read_leb(bytes, &mut start);
            let name = std::str::from_utf8(&bytes[start..start + len as usize]).unwrap();
            start += len as usize;
            Some(name.to_owned())
        } else {
            None
        };
        ret.push(Section {
            id,
            name,
            size_width,
            payload: &bytes[start..end],
        });
        pos = end;
    }
    ret
}

fn known_sections(bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    sections(bytes)
        .into_iter()
        .filter(|s| s.id != 0)
        .map(|s| (s.id, s.payload.to_vec()))
        .collect()
}

fn custom_section<'a>(bytes: &'a [u8], name: &str) -> Option<Section<'a>> {
    sections(bytes)
        .into_iter()
        .find(|s| s.name.as_deref() == Some(name))
}

/// Payload of the section at `section_index`, counting customs.
fn section_payload(bytes: &[u8], section_index: usize) -> &[u8] {
    sections(bytes)[section_index].payload
}

/// Function body sizes (with their widths) and bodies of a code
/// section payload.
fn code_bodies(payload: &[u8]) -> Vec<(usize, Vec<u8>)> {
    let mut pos = 0;
    let (count, _) = read_leb(payload, &mut pos);
    (0..count)
        .map(|_| {
            let (size, width) = read_leb(payload, &mut pos);
            let body = payload[pos..pos + size as usize].to_vec();
            pos += size as usize;
            (width, body)
        })
        .collect()
}

#[test]
fn idempotent_roundtrips() {
    for wat in get_wats() {
        let bytes1 = wat::parse_file(&wat).unwrap();
        let opts = FrontendOptions::default();
        let module1 = Module::from_wasm_bytes(&bytes1, &opts).unwrap();
        let bytes2 = module1.to_wasm_bytes().unwrap();
        let module2 = Module::from_wasm_bytes(&bytes2, &opts).unwrap();
        let bytes3 = module2.to_wasm_bytes().unwrap();
        assert_eq!(bytes2, bytes3, "{}", wat.display());
    }
}

#[test]
fn answer_module_is_reproduced() {
    let bytes = wat::parse_str(
        r#"(module
             (import "env" "log" (func (param i32)))
             (func (result i32) i32.const 42)
             (export "answer" (func 1)))"#,
    )
    .unwrap();
    let module = read(&bytes);
    assert_eq!(module.funcs.len(), 2);
    assert_eq!(module.num_func_imports, 1);
    let body = module
        .func(1)
        .unwrap()
        .exprs
        .iter()
        .map(|e| &e.kind)
        .collect::<Vec<_>>();
    assert_eq!(body, vec![&ExprKind::Const(Const::I32(42))]);
    assert_eq!(
        module.export_by_name("answer").map(|e| e.kind),
        Some(ExternalKind::Func)
    );

    let out = module.to_wasm_bytes().unwrap();
    assert_eq!(known_sections(&out), known_sections(&bytes));
}

#[test]
fn fixed_and_canonical_sizes() {
    for wat in get_wats() {
        let bytes = wat::parse_file(&wat).unwrap();
        let module = read(&bytes);
        let canonical = module.to_wasm_bytes().unwrap();
        let fixed = module
            .to_wasm_bytes_with(&WriteBinaryOptions {
                canonicalize_lebs: false,
                ..WriteBinaryOptions::default()
            })
            .unwrap();

        let canonical_sections = sections(&canonical);
        let fixed_sections = sections(&fixed);
        assert_eq!(canonical_sections.len(), fixed_sections.len());
        for (c, f) in canonical_sections.iter().zip(fixed_sections.iter()) {
            assert_eq!(c.id, f.id);
            assert_eq!(f.size_width, 5);
            assert!(c.size_width < 5);
            if c.id == 10 {
                let c_bodies = code_bodies(c.payload);
                let f_bodies = code_bodies(f.payload);
                assert_eq!(c_bodies.len(), f_bodies.len());
                for ((cw, cb), (fw, fb)) in c_bodies.iter().zip(f_bodies.iter()) {
                    assert_eq!(*fw, 5);
                    assert!(*cw < 5);
                    assert_eq!(cb, fb);
                }
            } else {
                assert_eq!(c.payload, f.payload);
            }
        }

        let again = read(&fixed).to_wasm_bytes().unwrap();
        assert_eq!(again, canonical, "{}", wat.display());
    }
}

#[test]
fn relocations_point_at_padded_indices() {
    let bytes = wat::parse_str(
        r#"(module
             (type (func))
             (import "env" "f" (func (type 0)))
             (table 1 funcref)
             (global (mut i32) (i32.const 0))
             (elem (i32.const 0) func 1)
             (func (export "main") (type 0)
               call 0
               call 1
               global.get 0
               global.set 0
               i32.const 0
               call_indirect (type 0)))"#,
    )
    .unwrap();
    let module = read(&bytes);
    let out = module
        .to_wasm_bytes_with(&WriteBinaryOptions {
            relocatable: true,
            ..WriteBinaryOptions::default()
        })
        .unwrap();

    // type, import, function, table, global, export, elem, code
    let ids = sections(&out).iter().map(|s| s.id).collect::<Vec<_>>();
    assert_eq!(&ids[..8], &[1, 2, 3, 4, 6, 7, 9, 10]);
    assert!(custom_section(&out, "linking").is_some());

    let elem = custom_section(&out, "reloc.ELEM").unwrap();
    let mut pos = 0;
    assert_eq!(read_leb(elem.payload, &mut pos).0, 6);

    let reloc = custom_section(&out, "reloc.CODE").unwrap();
    let mut pos = 0;
    let (section_index, _) = read_leb(reloc.payload, &mut pos);
    assert_eq!(section_index, 7);
    let (count, _) = read_leb(reloc.payload, &mut pos);
    let mut types = vec![];
    let mut symbols = vec![];
    let mut values = vec![];
    let code = section_payload(&out, section_index as usize);
    for _ in 0..count {
        types.push(read_leb(reloc.payload, &mut pos).0);
        let (offset, _) = read_leb(reloc.payload, &mut pos);
        symbols.push(read_leb(reloc.payload, &mut pos).0);
        let mut at = offset as usize;
        let (value, width) = read_leb(code, &mut at);
        assert_eq!(width, 5);
        values.push(value);
    }
    assert_eq!(types, vec![0, 0, 7, 7, 6]);
    assert_eq!(values, vec![0, 1, 0, 0, 0]);
    // func 1 is first referenced from the elem segment
    assert_eq!(symbols, vec![1, 0, 2, 2, 0]);
}

#[test]
fn debug_names_survive() {
    let bytes = wat::parse_str(
        r#"(module
             (func $add (param $a i32) (param $b i32) (result i32) (local $tmp i32)
               local.get $a
               local.get $b
               i32.add
               local.tee $tmp)
             (func $nop))"#,
    )
    .unwrap();
    let module = read(&bytes);
    let add = module.func(0).unwrap();
    assert_eq!(add.name, "$add");
    assert_eq!(add.local_index(&Var::Name("$b".into())), 1);
    assert_eq!(add.local_index(&Var::Name("$tmp".into())), 2);
    assert_eq!(module.func_index(&Var::Name("$nop".into())), 1);

    let options = WriteBinaryOptions {
        write_debug_names: true,
        ..WriteBinaryOptions::default()
    };
    let bytes2 = module.to_wasm_bytes_with(&options).unwrap();
    assert!(custom_section(&bytes2, "name").is_some());
    let module2 = read(&bytes2);
    assert_eq!(module2.func(0).unwrap().name, "$add");
    assert_eq!(module2.func(1).unwrap().name, "$nop");
    assert_eq!(
        module2.func(0).unwrap().local_index(&Var::Name("$a".into())),
        0
    );
    let bytes3 = module2.to_wasm_bytes_with(&options).unwrap();
    assert_eq!(bytes2, bytes3);

    let plain = module.to_wasm_bytes().unwrap();
    assert!(custom_section(&plain, "name").is_none());
}

#[test]
fn generated_names_resolve_back() {
    for wat in get_wats() {
        let bytes = wat::parse_file(&wat).unwrap();
        let mut module = read(&bytes);
        let before = module.to_wasm_bytes().unwrap();

        assert!(generate_names(&mut module).is_ok());
        let mut errors = Errors::new();
        assert!(resolve_names(&mut module, &mut errors).is_ok());
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(module.to_wasm_bytes().unwrap(), before);

        let named = format!("{}", module.display());
        assert!(generate_names(&mut module).is_ok());
        assert_eq!(format!("{}", module.display()), named);

        let with_names = module
            .to_wasm_bytes_with(&WriteBinaryOptions {
                write_debug_names: true,
                ..WriteBinaryOptions::default()
            })
            .unwrap();
        assert_eq!(known_sections(&with_names), known_sections(&before));
    }
}

#[derive(Default)]
struct Balance {
    blocks: (usize, usize),
    loops: (usize, usize),
    ifs: (usize, usize, usize),
    tries: (usize, usize),
    catches: usize,
}

impl Delegate for Balance {
    fn begin_block_expr(&mut self, _loc: Location, _block: &mut Block) -> Status {
        self.blocks.0 += 1;
        Status::Ok
    }
    fn end_block_expr(&mut self, _loc: Location, _block: &mut Block) -> Status {
        self.blocks.1 += 1;
        Status::Ok
    }
    fn begin_loop_expr(&mut self, _loc: Location, _block: &mut Block) -> Status {
        self.loops.0 += 1;
        Status::Ok
    }
    fn end_loop_expr(&mut self, _loc: Location, _block: &mut Block) -> Status {
        self.loops.1 += 1;
        Status::Ok
    }
    fn begin_if_expr(&mut self, _loc: Location, _expr: &mut IfExpr) -> Status {
        self.ifs.0 += 1;
        Status::Ok
    }
    fn after_if_true_expr(&mut self, _loc: Location, _expr: &mut IfExpr) -> Status {
        self.ifs.1 += 1;
        Status::Ok
    }
    fn end_if_expr(&mut self, _loc: Location, _expr: &mut IfExpr) -> Status {
        self.ifs.2 += 1;
        Status::Ok
    }
    fn begin_try_expr(&mut self, _loc: Location, _expr: &mut TryExpr) -> Status {
        self.tries.0 += 1;
        Status::Ok
    }
    fn on_catch_expr(&mut self, _loc: Location, _catch: &mut Catch) -> Status {
        self.catches += 1;
        Status::Ok
    }
    fn end_try_expr(&mut self, _loc: Location, _expr: &mut TryExpr) -> Status {
        self.tries.1 += 1;
        Status::Ok
    }
}

#[test]
fn visitor_hooks_balance() {
    let bytes = wat::parse_file("tests/roundtrip/control.wat").unwrap();
    let mut module = read(&bytes);
    let mut balance = Balance::default();
    for index in 0..module.funcs.len() as u32 {
        let func = module.func_mut(index).unwrap();
        assert!(ExprVisitor::new(&mut balance).visit_func(func).is_ok());
    }
    assert_eq!(balance.blocks, (2, 2));
    assert_eq!(balance.loops, (1, 1));
    assert_eq!(balance.ifs, (2, 2, 2));

    let mut module = exceptions_module();
    let mut balance = Balance::default();
    let func = module.func_mut(0).unwrap();
    assert!(ExprVisitor::new(&mut balance).visit_func(func).is_ok());
    assert_eq!(balance.tries, (1, 1));
    assert_eq!(balance.catches, 2);
}

#[test]
fn imports_come_first_in_each_space() {
    let bytes = wat::parse_str(
        r#"(module
             (import "env" "f" (func))
             (import "env" "t" (table 1 funcref))
             (import "env" "m" (memory 1))
             (import "env" "g" (global i32))
             (import "env" "e" (tag (param i32)))
             (func)
             (table 2 funcref)
             (global i64 (i64.const 0))
             (tag (param i32))
             (func (export "x")))"#,
    )
    .unwrap();
    let check = |module: &Module| {
        assert_eq!(module.imports.len(), 5);
        assert_eq!((module.num_func_imports, module.funcs.len()), (1, 3));
        assert_eq!((module.num_table_imports, module.tables.len()), (1, 2));
        assert_eq!((module.num_memory_imports, module.memories.len()), (1, 1));
        assert_eq!((module.num_global_imports, module.globals.len()), (1, 2));
        assert_eq!((module.num_except_imports, module.excepts.len()), (1, 2));
        assert!(module.is_import(ExternalKind::Func, 0));
        assert!(!module.is_import(ExternalKind::Func, 1));
        assert_eq!(
            module.import_of(ExternalKind::Except, 0).map(|i| i.field_name.as_str()),
            Some("e")
        );
        assert_eq!(module.except(1).map(|e| e.sig.clone()), Some(vec![Type::I32]));
        assert_eq!(module.export_by_name("x").map(|e| &e.var), Some(&Var::Index(2)));
    };
    let module = read(&bytes);
    check(&module);
    let module2 = read(&module.to_wasm_bytes().unwrap());
    check(&module2);
}

fn exceptions_module() -> Module {
    let mut module = Module::default();
    for params in vec![vec![], vec![Type::I32]] {
        module.append_field(ModuleField::FuncType(FuncType {
            name: String::new(),
            sig: FuncSignature {
                param_types: params,
                result_types: vec![],
            },
        }));
    }
    module.append_field(ModuleField::Except(Except {
        name: String::new(),
        sig: vec![Type::I32],
    }));
    let body = TryExpr {
        block: Block {
            label: String::new(),
            decl: BlockDecl::default(),
            exprs: vec![
                Expr::new(ExprKind::Const(Const::I32(1))),
                Expr::new(ExprKind::Throw(Var::Index(0))),
            ],
        },
        catches: vec![
            Catch {
                loc: Location::default(),
                var: Some(Var::Index(0)),
                exprs: vec![Expr::new(ExprKind::Drop)],
            },
            Catch {
                loc: Location::default(),
                var: None,
                exprs: vec![],
            },
        ],
    };
    module.append_field(ModuleField::Func(Func {
        decl: FuncDeclaration {
            type_var: Some(Var::Index(0)),
            sig: FuncSignature::default(),
        },
        exprs: vec![Expr::new(ExprKind::Try(body))],
        ..Func::default()
    }));
    module
}

#[test]
fn exceptions_roundtrip() {
    let module = exceptions_module();
    let bytes = module.to_wasm_bytes().unwrap();
    assert!(custom_section(&bytes, "exception").is_some());

    let module2 = read(&bytes);
    assert_eq!(module2.excepts.len(), 1);
    assert_eq!(module2.num_except_imports, 0);
    match &module2.func(0).unwrap().exprs[0].kind {
        ExprKind::Try(try_) => {
            assert_eq!(try_.block.exprs.len(), 2);
            assert_eq!(try_.catches.len(), 2);
            assert_eq!(try_.catches[0].var, Some(Var::Index(0)));
            assert!(try_.catches[1].is_catch_all());
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(module2.to_wasm_bytes().unwrap(), bytes);
}

#[test]
fn memory64_is_unsupported() {
    #[rustfmt::skip]
    let bytes: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00,
        0x05, 0x03, 0x01, 0x04, 0x01,
    ];
    let err = Module::from_wasm_bytes(bytes, &FrontendOptions::default()).unwrap_err();
    match err.downcast_ref::<FrontendError>() {
        Some(FrontendError::UnsupportedFeature(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn stray_end_is_reported() {
    #[rustfmt::skip]
    let bytes: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00,
        0x01, 0x04, 0x01, 0x60, 0x00, 0x00,
        0x03, 0x02, 0x01, 0x00,
        0x0a, 0x05, 0x01, 0x03, 0x00, 0x0b, 0x0b,
    ];
    let err = Module::from_wasm_bytes(bytes, &FrontendOptions::default()).unwrap_err();
    match err.downcast_ref::<FrontendError>() {
        Some(FrontendError::Invalid(errors)) => {
            assert!(errors
                .iter()
                .any(|e| e.message.contains("popping empty label stack")));
        }
        other => panic!("unexpected {:?}", other),
    }
}

/// Code relocations of a relocatable module: the code section's index
/// and `(type, offset, symbol)` for each entry.
fn code_relocs(bytes: &[u8]) -> (usize, Vec<(u32, usize, u32)>) {
    let reloc = custom_section(bytes, "reloc.CODE").unwrap();
    let mut pos = 0;
    let (section_index, _) = read_leb(reloc.payload, &mut pos);
    let (count, _) = read_leb(reloc.payload, &mut pos);
    let entries = (0..count)
        .map(|_| {
            let ty = read_leb(reloc.payload, &mut pos).0;
            let offset = read_leb(reloc.payload, &mut pos).0 as usize;
            let symbol = read_leb(reloc.payload, &mut pos).0;
            (ty, offset, symbol)
        })
        .collect();
    (section_index as usize, entries)
}

fn padded_leb(value: u32) -> [u8; 5] {
    let mut out = [0; 5];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = ((value >> (7 * i)) & 0x7f) as u8;
        if i < 4 {
            *byte |= 0x80;
        }
    }
    out
}

/// A small body followed by one whose size needs a two-byte LEB, so
/// relocations in the second body sit behind a grown size field.
fn long_body_module() -> Module {
    let padding = "i32.const 0\ndrop\n".repeat(60);
    let bytes = wat::parse_str(format!(
        r#"(module
             (import "env" "f" (func))
             (global (mut i32) (i32.const 0))
             (global (mut i32) (i32.const 1))
             (func call 0)
             (func (export "main")
               {}
               call 0
               global.get 1
               drop
               call 1))"#,
        padding
    ))
    .unwrap();
    read(&bytes)
}

fn relocatable_canonical() -> WriteBinaryOptions {
    WriteBinaryOptions {
        relocatable: true,
        canonicalize_lebs: true,
        ..WriteBinaryOptions::default()
    }
}

/// `call` and `global.get` operands of every defined function, in
/// body order.
fn references(module: &Module) -> Vec<ExprKind> {
    module
        .defined_funcs()
        .flat_map(|(_, func)| func.exprs.iter())
        .filter(|e| matches!(e.kind, ExprKind::Call(_) | ExprKind::GetGlobal(_)))
        .map(|e| e.kind.clone())
        .collect()
}

#[test]
fn relocations_follow_grown_body_sizes() {
    let module = long_body_module();
    let out = module.to_wasm_bytes_with(&relocatable_canonical()).unwrap();

    let (section_index, relocs) = code_relocs(&out);
    let code = section_payload(&out, section_index);
    let bodies = code_bodies(code);
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0].0, 1);
    assert!(bodies[1].1.len() >= 128);
    assert_eq!(bodies[1].0, 2);

    let mut seen = vec![];
    for &(ty, offset, _) in &relocs {
        let opcode = code[offset - 1];
        let mut at = offset;
        let (value, width) = read_leb(code, &mut at);
        assert_eq!(width, 5);
        seen.push((ty, opcode, value));
    }
    assert_eq!(
        seen,
        vec![(0, 0x10, 0), (0, 0x10, 0), (7, 0x23, 1), (0, 0x10, 1)]
    );
}

#[test]
fn patched_relocations_retarget_their_reference() {
    let module = long_body_module();
    let out = module.to_wasm_bytes_with(&relocatable_canonical()).unwrap();
    let before = references(&read(&out));
    assert_eq!(
        before,
        vec![
            ExprKind::Call(Var::Index(0)),
            ExprKind::Call(Var::Index(0)),
            ExprKind::GetGlobal(Var::Index(1)),
            ExprKind::Call(Var::Index(1)),
        ]
    );

    let (section_index, relocs) = code_relocs(&out);
    let code = section_payload(&out, section_index);
    let code_start = code.as_ptr() as usize - out.as_ptr() as usize;
    assert_eq!(relocs.len(), before.len());
    for (i, &(ty, offset, _)) in relocs.iter().enumerate() {
        let (replacement, expected) = match (ty, &before[i]) {
            (0, ExprKind::Call(Var::Index(n))) => {
                let n = (n + 1) % 3;
                (n, ExprKind::Call(Var::Index(n)))
            }
            (7, ExprKind::GetGlobal(Var::Index(n))) => {
                let n = 1 - n;
                (n, ExprKind::GetGlobal(Var::Index(n)))
            }
            other => panic!("unexpected relocation {:?}", other),
        };
        let mut patched = out.clone();
        let at = code_start + offset;
        patched[at..at + 5].copy_from_slice(&padded_leb(replacement));

        let mut wanted = before.clone();
        wanted[i] = expected;
        assert_eq!(references(&read(&patched)), wanted, "relocation {}", i);
    }
}

#[test]
fn deeply_nested_blocks_encode() {
    const DEPTH: usize = 100_000;
    let mut module = Module::default();
    module.append_field(ModuleField::FuncType(FuncType {
        name: String::new(),
        sig: FuncSignature::default(),
    }));
    let mut exprs = vec![Expr::new(ExprKind::Nop)];
    for _ in 0..DEPTH {
        exprs = vec![Expr::new(ExprKind::Block(Block {
            label: String::new(),
            decl: BlockDecl::default(),
            exprs,
        }))];
    }
    module.append_field(ModuleField::Func(Func {
        decl: FuncDeclaration {
            type_var: Some(Var::Index(0)),
            sig: FuncSignature::default(),
        },
        exprs,
        ..Func::default()
    }));

    let bytes = module.to_wasm_bytes().unwrap();
    let code = known_sections(&bytes)
        .into_iter()
        .find(|(id, _)| *id == 10)
        .unwrap()
        .1;
    let body = &code_bodies(&code)[0].1;
    // locals count, then `block` with an empty type per level, `nop`,
    // one `end` per level and the function's own `end`
    assert_eq!(body.len(), 1 + DEPTH * 3 + 2);
    assert_eq!(&body[1..3], &[0x02, 0x40]);
    assert_eq!(&body[body.len() - 2..], &[0x0b, 0x0b]);

    let module2 = read(&bytes);
    assert_eq!(module2.to_wasm_bytes().unwrap(), bytes);
    drop(module2);
    drop(module);
}
