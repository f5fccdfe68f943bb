//! Passes over a whole module.

mod generate_names;
mod resolve_names;

pub use generate_names::generate_names;
pub use resolve_names::resolve_names;
