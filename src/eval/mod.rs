//! Evaluation state shared by the functions of one step

pub mod context;

pub use context::EvalContext;
