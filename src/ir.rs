//! Intermediate representation for Wasm: a module of fields whose
//! functions hold instruction trees.

mod bindings;
mod display;
mod expr;
mod func;
mod module;

pub use bindings::*;
pub use display::*;
pub use expr::*;
pub use func::*;
pub use module::*;

/// An index into one of a module's index spaces.
pub type Index = u32;

/// Returned by lookups that fail to resolve.
pub const INVALID_INDEX: Index = u32::MAX;

/// A value or block type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    I32,
    I64,
    F32,
    F64,
    V128,
    FuncRef,
    ExternRef,
    /// The function type constructor in the type section.
    Func,
    /// The empty block type.
    Void,
}

impl Type {
    /// The single-byte encoding used in the binary format.
    pub fn code(self) -> u8 {
        match self {
            Type::I32 => 0x7f,
            Type::I64 => 0x7e,
            Type::F32 => 0x7d,
            Type::F64 => 0x7c,
            Type::V128 => 0x7b,
            Type::FuncRef => 0x70,
            Type::ExternRef => 0x6f,
            Type::Func => 0x60,
            Type::Void => 0x40,
        }
    }

    pub fn is_ref(self) -> bool {
        matches!(self, Type::FuncRef | Type::ExternRef)
    }
}

impl Default for Type {
    fn default() -> Self {
        Type::I32
    }
}

impl From<wasmparser::ValType> for Type {
    fn from(ty: wasmparser::ValType) -> Self {
        match ty {
            wasmparser::ValType::I32 => Type::I32,
            wasmparser::ValType::I64 => Type::I64,
            wasmparser::ValType::F32 => Type::F32,
            wasmparser::ValType::F64 => Type::F64,
            wasmparser::ValType::V128 => Type::V128,
            wasmparser::ValType::FuncRef => Type::FuncRef,
            wasmparser::ValType::ExternRef => Type::ExternRef,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::V128 => "v128",
            Type::FuncRef => "funcref",
            Type::ExternRef => "externref",
            Type::Func => "func",
            Type::Void => "void",
        };
        f.write_str(s)
    }
}

/// Where something came from: a byte offset in the decoded binary,
/// or nothing for IR built by hand.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Location {
    pub offset: Option<usize>,
}

impl Location {
    pub fn at(offset: usize) -> Self {
        Location {
            offset: Some(offset),
        }
    }
}

/// A reference to an entity in some index space (or to a label),
/// either by name or by index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Var {
    Name(String),
    Index(Index),
}

impl Var {
    pub fn is_index(&self) -> bool {
        matches!(self, Var::Index(_))
    }

    pub fn is_name(&self) -> bool {
        matches!(self, Var::Name(_))
    }

    pub fn index(&self) -> Option<Index> {
        match self {
            Var::Index(i) => Some(*i),
            Var::Name(_) => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Var::Name(name) => Some(name.as_str()),
            Var::Index(_) => None,
        }
    }
}

impl From<Index> for Var {
    fn from(index: Index) -> Self {
        Var::Index(index)
    }
}

impl std::fmt::Display for Var {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Var::Name(name) => f.write_str(name),
            Var::Index(index) => write!(f, "{}", index),
        }
    }
}

/// A constant operand. Floats are kept as raw bits so that NaN
/// payloads survive a round trip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Const {
    I32(u32),
    I64(u64),
    F32(u32),
    F64(u64),
    V128([u8; 16]),
}

impl Const {
    pub fn ty(&self) -> Type {
        match self {
            Const::I32(_) => Type::I32,
            Const::I64(_) => Type::I64,
            Const::F32(_) => Type::F32,
            Const::F64(_) => Type::F64,
            Const::V128(_) => Type::V128,
        }
    }
}

impl std::fmt::Display for Const {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Const::I32(v) => write!(f, "i32.const {}", *v as i32),
            Const::I64(v) => write!(f, "i64.const {}", *v as i64),
            Const::F32(bits) => write!(f, "f32.const {}", f32::from_bits(*bits)),
            Const::F64(bits) => write!(f, "f64.const {}", f64::from_bits(*bits)),
            Const::V128(bytes) => {
                write!(f, "v128.const i8x16")?;
                for b in bytes {
                    write!(f, " {}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Size limits of a table (in elements) or memory (in pages).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Limits {
    pub initial: u64,
    pub max: Option<u64>,
    pub is_shared: bool,
}

impl Limits {
    pub const HAS_MAX_FLAG: u32 = 0x1;
    pub const IS_SHARED_FLAG: u32 = 0x2;

    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.max.is_some() {
            flags |= Self::HAS_MAX_FLAG;
        }
        if self.is_shared {
            flags |= Self::IS_SHARED_FLAG;
        }
        flags
    }
}

/// The kind of an import or export.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExternalKind {
    Func,
    Table,
    Memory,
    Global,
    Except,
}

impl ExternalKind {
    pub fn code(self) -> u8 {
        match self {
            ExternalKind::Func => 0,
            ExternalKind::Table => 1,
            ExternalKind::Memory => 2,
            ExternalKind::Global => 3,
            ExternalKind::Except => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ExternalKind::Func => "func",
            ExternalKind::Table => "table",
            ExternalKind::Memory => "memory",
            ExternalKind::Global => "global",
            ExternalKind::Except => "except",
        }
    }
}

impl From<wasmparser::ExternalKind> for ExternalKind {
    fn from(kind: wasmparser::ExternalKind) -> Self {
        match kind {
            wasmparser::ExternalKind::Func => ExternalKind::Func,
            wasmparser::ExternalKind::Table => ExternalKind::Table,
            wasmparser::ExternalKind::Memory => ExternalKind::Memory,
            wasmparser::ExternalKind::Global => ExternalKind::Global,
            wasmparser::ExternalKind::Tag => ExternalKind::Except,
        }
    }
}
