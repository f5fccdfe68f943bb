//! Relocations and the symbol table of the `linking` custom section.

use super::stream::Stream;
use crate::entity::{EntityVec, Symbol};
use crate::ir::Index;
use fxhash::FxHashMap;

/// Subsection id of the symbol table in the `linking` section.
pub const LINKING_SYMBOL_TABLE: u8 = 8;
pub const LINKING_METADATA_VERSION: u32 = 1;

pub const SYMBOL_FLAG_UNDEFINED: u32 = 0x10;
pub const SYMBOL_FLAG_EXPORTED: u32 = 0x20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RelocType {
    FuncIndexLEB = 0,
    TableIndexSLEB = 1,
    TableIndexI32 = 2,
    MemoryAddressLEB = 3,
    MemoryAddressSLEB = 4,
    MemoryAddressI32 = 5,
    TypeIndexLEB = 6,
    GlobalIndexLEB = 7,
}

impl RelocType {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Only memory addresses carry an addend.
    pub fn has_addend(self) -> bool {
        matches!(
            self,
            RelocType::MemoryAddressLEB
                | RelocType::MemoryAddressSLEB
                | RelocType::MemoryAddressI32
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reloc {
    pub ty: RelocType,
    /// Byte offset from the start of the section payload.
    pub offset: u32,
    /// A symbol index, or a type index for `TypeIndexLEB`.
    pub index: Index,
    pub addend: i32,
}

/// The relocations that apply to one output section.
#[derive(Clone, Debug)]
pub struct RelocSection {
    /// Name of the relocated section, as in `reloc.<name>`.
    pub name: &'static str,
    /// Position of the relocated section among all sections written.
    pub section_index: Index,
    pub relocs: Vec<Reloc>,
}

impl RelocSection {
    pub fn new(name: &'static str, section_index: Index) -> Self {
        RelocSection {
            name,
            section_index,
            relocs: vec![],
        }
    }

    /// Moves every reloc at or after `from` by `delta` bytes.
    pub fn shift_from(&mut self, from: u32, delta: isize) {
        for reloc in self.relocs.iter_mut().filter(|r| r.offset >= from) {
            reloc.offset = (reloc.offset as isize + delta) as u32;
        }
    }

    pub fn write_payload(&self, stream: &mut Stream) {
        stream.write_u32_leb128(self.section_index);
        stream.write_u32_leb128(self.relocs.len() as u32);
        for reloc in &self.relocs {
            stream.write_u32_leb128(reloc.ty.code());
            stream.write_u32_leb128(reloc.offset);
            stream.write_u32_leb128(reloc.index);
            if reloc.ty.has_addend() {
                stream.write_s32_leb128(reloc.addend);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Function = 0,
    Global = 2,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolInfo {
    pub kind: SymbolKind,
    pub flags: u32,
    pub element_index: Index,
    pub name: String,
}

impl SymbolInfo {
    pub fn is_undefined(&self) -> bool {
        self.flags & SYMBOL_FLAG_UNDEFINED != 0
    }
}

/// Symbols referenced by relocations, one per entity, in order of
/// first reference.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    symbols: EntityVec<Symbol, SymbolInfo>,
    by_entity: FxHashMap<(SymbolKind, Index), Symbol>,
}

impl SymbolTable {
    /// The symbol for the entity, creating it with `make` on first use.
    pub fn intern<F: FnOnce() -> SymbolInfo>(
        &mut self,
        kind: SymbolKind,
        element_index: Index,
        make: F,
    ) -> Symbol {
        if let Some(&sym) = self.by_entity.get(&(kind, element_index)) {
            return sym;
        }
        let sym = self.symbols.push(make());
        self.by_entity.insert((kind, element_index), sym);
        sym
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn get(&self, sym: Symbol) -> Option<&SymbolInfo> {
        self.symbols.get(sym)
    }

    /// Writes the symbol table subsection body (without its id and
    /// size).
    pub fn write_payload(&self, stream: &mut Stream) {
        stream.write_u32_leb128(self.symbols.len() as u32);
        for info in self.symbols.values() {
            stream.write_u8(info.kind as u8);
            stream.write_u32_leb128(info.flags);
            stream.write_u32_leb128(info.element_index);
            if !info.is_undefined() {
                stream.write_str(&info.name);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entity::EntityRef;

    fn info(kind: SymbolKind, element_index: Index, flags: u32, name: &str) -> SymbolInfo {
        SymbolInfo {
            kind,
            flags,
            element_index,
            name: name.to_owned(),
        }
    }

    #[test]
    fn symbols_are_deduplicated() {
        let mut table = SymbolTable::default();
        let a = table.intern(SymbolKind::Function, 3, || info(SymbolKind::Function, 3, 0, "f"));
        let b = table.intern(SymbolKind::Global, 3, || info(SymbolKind::Global, 3, 0, "g"));
        let c = table.intern(SymbolKind::Function, 3, || unreachable!());
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(b.index(), 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn undefined_symbols_omit_names() {
        let mut table = SymbolTable::default();
        table.intern(SymbolKind::Function, 0, || {
            info(SymbolKind::Function, 0, SYMBOL_FLAG_UNDEFINED, "imp")
        });
        table.intern(SymbolKind::Function, 1, || {
            info(SymbolKind::Function, 1, SYMBOL_FLAG_EXPORTED, "f")
        });
        let mut s = Stream::new();
        table.write_payload(&mut s);
        assert_eq!(s.as_slice(), &[2, 0, 0x10, 0, 0, 0x20, 1, 1, b'f']);
    }

    #[test]
    fn addends_only_for_memory_addresses() {
        let mut section = RelocSection::new("CODE", 4);
        section.relocs.push(Reloc {
            ty: RelocType::FuncIndexLEB,
            offset: 3,
            index: 0,
            addend: 9,
        });
        section.relocs.push(Reloc {
            ty: RelocType::MemoryAddressLEB,
            offset: 10,
            index: 1,
            addend: 9,
        });
        section.shift_from(5, 2);
        assert_eq!(section.relocs[0].offset, 3);
        assert_eq!(section.relocs[1].offset, 12);
        let mut s = Stream::new();
        section.write_payload(&mut s);
        assert_eq!(s.as_slice(), &[4, 2, 0, 3, 0, 3, 12, 1, 9]);
    }
}
