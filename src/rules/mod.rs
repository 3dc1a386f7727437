//! Rule engine: per-mapping policy compilation and evaluation.

pub mod compiler;
pub mod evaluator;
pub mod transforms;

pub use compiler::{compile, CompiledPolicy, PolicyCache};
pub use evaluator::{evaluate, Decision, FilterReason};
