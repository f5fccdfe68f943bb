//! Name-to-index bindings.

use super::{Index, Location, Var, INVALID_INDEX};
use fxhash::FxHashMap;
use smallvec::SmallVec;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Binding {
    pub loc: Location,
    pub index: Index,
}

/// A multimap from names to indices. Inserting a name twice keeps
/// both bindings; `find_duplicates` reports them later.
#[derive(Clone, Debug, Default)]
pub struct BindingHash {
    map: FxHashMap<String, SmallVec<[Binding; 1]>>,
}

impl BindingHash {
    pub fn emplace<S: Into<String>>(&mut self, name: S, binding: Binding) {
        self.map.entry(name.into()).or_default().push(binding);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Index of the first binding for `name`.
    pub fn find_index_by_name(&self, name: &str) -> Index {
        self.map
            .get(name)
            .and_then(|bindings| bindings.first())
            .map(|b| b.index)
            .unwrap_or(INVALID_INDEX)
    }

    pub fn find_index(&self, var: &Var) -> Index {
        match var {
            Var::Index(index) => *index,
            Var::Name(name) => self.find_index_by_name(name),
        }
    }

    /// Calls `callback(name, first, duplicate)` for every binding of a
    /// name after its first. Names are visited in sorted order.
    pub fn find_duplicates<F: FnMut(&str, &Binding, &Binding)>(&self, mut callback: F) {
        let mut names = self
            .map
            .iter()
            .filter(|(_, bindings)| bindings.len() > 1)
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>();
        names.sort_unstable();
        for name in names {
            let bindings = &self.map[name];
            for dup in &bindings[1..] {
                callback(name, &bindings[0], dup);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.map
            .iter()
            .flat_map(|(name, bindings)| bindings.iter().map(move |b| (name.as_str(), b)))
    }

    pub fn len(&self) -> usize {
        self.map.values().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

/// Inverts `bindings` into an index-addressed table of names. Slots
/// without a binding, and bindings at or past `len`, are left empty.
pub fn make_type_binding_reverse_mapping(len: usize, bindings: &BindingHash) -> Vec<String> {
    let mut out = vec![String::new(); len];
    for (name, binding) in bindings.iter() {
        if let Some(slot) = out.get_mut(binding.index as usize) {
            *slot = name.to_owned();
        }
    }
    out
}

/// `name` if no hash binds it yet; otherwise the first `name.N` that
/// is free in all of them.
pub fn unique_name(hashes: &[&BindingHash], name: String) -> String {
    let taken = |candidate: &str| hashes.iter().any(|h| h.contains(candidate));
    if !taken(&name) {
        return name;
    }
    let mut i = 1;
    loop {
        let candidate = format!("{}.{}", name, i);
        if !taken(&candidate) {
            return candidate;
        }
        i += 1;
    }
}
