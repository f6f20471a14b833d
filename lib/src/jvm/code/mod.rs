//! Method bodies as seen by the analysis
//!
//! ### Structure
//!
//! A method body is an [`InsnList`]: a flat, ordered sequence of [`Node`]s. We split up the
//! [list of bytecode instructions][0] into two groups:
//!
//!   - [`Instruction`] for straight-line instructions
//!   - [`BranchInstruction`] for instructions that may branch or leave the method
//!
//! Jump targets and exception ranges refer to [`Label`] nodes placed in the list, so the list
//! can be freely edited (the analysis itself inserts labels before `new` instructions and,
//! optionally, frame nodes) without invalidating any of them.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod insn_list;
mod instructions;
mod label;
mod method;
mod try_catch;

pub use insn_list::*;
pub use instructions::*;
pub use label::*;
pub use method::*;
pub use try_catch::*;
