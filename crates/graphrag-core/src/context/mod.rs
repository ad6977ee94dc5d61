pub mod assembler;

pub use assembler::{AssembledContext, ContextAssembler};
