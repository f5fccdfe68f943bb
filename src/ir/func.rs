use super::{BindingHash, ExprList, Index, Type, Var, INVALID_INDEX};

/// Parameter and result types of a function.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FuncSignature {
    pub param_types: Vec<Type>,
    pub result_types: Vec<Type>,
}

impl From<&wasmparser::FuncType> for FuncSignature {
    fn from(fty: &wasmparser::FuncType) -> Self {
        Self {
            param_types: fty.params().iter().map(|&ty| ty.into()).collect(),
            result_types: fty.results().iter().map(|&ty| ty.into()).collect(),
        }
    }
}

/// A function's type: an explicit reference to a type-section entry,
/// an inline signature, or both (in which case they must agree).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FuncDeclaration {
    pub type_var: Option<Var>,
    pub sig: FuncSignature,
}

impl FuncDeclaration {
    pub fn has_func_type(&self) -> bool {
        self.type_var.is_some()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Func {
    pub name: String,
    pub decl: FuncDeclaration,
    /// Types of the declared locals, not including parameters.
    pub local_types: Vec<Type>,
    pub param_bindings: BindingHash,
    /// Local bindings are relative to the first local, not to the
    /// first parameter.
    pub local_bindings: BindingHash,
    pub exprs: ExprList,
}

impl Func {
    pub fn num_params(&self) -> Index {
        self.decl.sig.param_types.len() as Index
    }

    pub fn num_locals(&self) -> Index {
        self.local_types.len() as Index
    }

    pub fn num_params_and_locals(&self) -> Index {
        self.num_params() + self.num_locals()
    }

    pub fn num_results(&self) -> Index {
        self.decl.sig.result_types.len() as Index
    }

    /// Type of a local in the combined parameters-then-locals space.
    pub fn local_type(&self, index: Index) -> Option<Type> {
        let index = index as usize;
        let params = &self.decl.sig.param_types;
        if index < params.len() {
            Some(params[index])
        } else {
            self.local_types.get(index - params.len()).copied()
        }
    }

    /// Resolves a local var into the parameters-then-locals space.
    /// Parameter names shadow local names.
    pub fn local_index(&self, var: &Var) -> Index {
        let name = match var {
            Var::Index(index) => return *index,
            Var::Name(name) => name,
        };
        let index = self.param_bindings.find_index_by_name(name);
        if index != INVALID_INDEX {
            return index;
        }
        let index = self.local_bindings.find_index_by_name(name);
        if index == INVALID_INDEX {
            return INVALID_INDEX;
        }
        self.num_params() + index
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{Binding, Location};

    fn bind(h: &mut BindingHash, name: &str, index: Index) {
        h.emplace(
            name,
            Binding {
                loc: Location::default(),
                index,
            },
        );
    }

    #[test]
    fn local_index_offsets_locals_by_params() {
        let mut func = Func::default();
        func.decl.sig.param_types = vec![Type::I32, Type::I64];
        func.local_types = vec![Type::F32];
        bind(&mut func.param_bindings, "$a", 1);
        bind(&mut func.local_bindings, "$x", 0);
        bind(&mut func.local_bindings, "$a", 0);
        assert_eq!(func.local_index(&Var::Name("$a".into())), 1);
        assert_eq!(func.local_index(&Var::Name("$x".into())), 2);
        assert_eq!(func.local_index(&Var::Name("$nope".into())), INVALID_INDEX);
        assert_eq!(func.local_index(&Var::Index(7)), 7);
        assert_eq!(func.local_type(2), Some(Type::F32));
        assert_eq!(func.local_type(3), None);
    }
}
