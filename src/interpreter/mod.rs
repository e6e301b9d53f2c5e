//! Interpreter discovery, probing and selection

mod constraints;
mod descriptor;
mod discovery;
mod probe;
pub(crate) mod selector;

pub use constraints::{InterpreterConstraint, InterpreterConstraints};
pub use descriptor::{Implementation, Interpreter};
pub use discovery::{find_candidates, is_interpreter_name, SearchPath};
pub use probe::{InterpreterProbe, SubprocessProbe};
pub use selector::{find_compatible, resolve_explicit, select_primary, InterpreterSelection};
