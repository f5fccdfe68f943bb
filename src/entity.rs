//! Typed indices into append-only arenas.

use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A dense `u32` index that names one kind of entity.
pub trait EntityRef: Copy + Eq + Ord + Hash + Debug {
    fn new(index: usize) -> Self;
    fn index(self) -> usize;
}

/// Declares a newtype index printed as `<prefix><n>`.
macro_rules! entity_id {
    ($(#[$attr:meta])* $name:ident, $prefix:literal) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl EntityRef for $name {
            fn new(index: usize) -> Self {
                debug_assert!(index < u32::MAX as usize);
                $name(index as u32)
            }
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                std::fmt::Debug::fmt(self, f)
            }
        }
    };
}

entity_id!(
    /// Position of a field in `Module::fields`.
    FieldId,
    "field"
);
entity_id!(
    /// Position of a symbol in the `linking` symbol table.
    Symbol,
    "sym"
);

/// Storage addressed by `Id`. Entries are only ever appended, so an
/// id returned by `push` stays valid.
#[derive(Clone, Debug)]
pub struct EntityVec<Id: EntityRef, T> {
    items: Vec<T>,
    _id: PhantomData<Id>,
}

impl<Id: EntityRef, T> Default for EntityVec<Id, T> {
    fn default() -> Self {
        EntityVec {
            items: vec![],
            _id: PhantomData,
        }
    }
}

impl<Id: EntityRef, T> EntityVec<Id, T> {
    pub fn push(&mut self, item: T) -> Id {
        let id = Id::new(self.items.len());
        self.items.push(item);
        id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: Id) -> Option<&T> {
        self.items.get(id.index())
    }

    /// Items in the order they were pushed.
    pub fn values(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<Id: EntityRef, T> Index<Id> for EntityVec<Id, T> {
    type Output = T;
    fn index(&self, id: Id) -> &T {
        &self.items[id.index()]
    }
}

impl<Id: EntityRef, T> IndexMut<Id> for EntityVec<Id, T> {
    fn index_mut(&mut self, id: Id) -> &mut T {
        &mut self.items[id.index()]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn push_hands_out_dense_ids() {
        let mut v: EntityVec<FieldId, &str> = EntityVec::default();
        let a = v.push("a");
        let b = v.push("b");
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(v[b], "b");
        assert_eq!(v.get(FieldId::new(0)), Some(&"a"));
        assert_eq!(v.len(), 2);
        assert_eq!(format!("{}", b), "field1");
        assert_eq!(format!("{:?}", Symbol::new(3)), "sym3");
    }
}
