//! Stack map frame inference
//!
//! For any specific instruction inside a method body, the stack and locals should have the same
//! structure, regardless of which control flow was used to reach that instruction. In other words:
//! although the values on the stack and in the locals may obviously be different, the types and
//! order of the stack and local variables cannot. This information is referred to as the _stack
//! map frame_ (represented using [`VerifierFrame`], or [`FrameSnapshot`] once it is frozen) and
//! the set of stack map frames for all possible jump targets in a method is the _stack map table_.
//!
//! Knowing the stack map frame at a point in the code makes it possible to check that the next
//! instruction makes sense (eg. `dadd` only makes sense if the top two elements on the stack are
//! of type `double`). The "types" used here (represented using [`VerificationType`]) are slightly
//! augmented to take into account initialization and null, following the JVM's own
//! [verification by type-checking][0].
//!
//! Executing straight-line instructions is pretty simple (see [`Frame::verify_instruction`]), but
//! things get more complicated when an instruction can be reached from multiple locations (eg. it
//! is the target of jumps). In those cases, the frames from the different source locations need to
//! be unified (see [`LabelMergeGraph`]). This ends up being a fix-point algorithm which converges
//! towards the right answer, driven by the [`Analyzer`]. Its output is the maximum stack and
//! locals sizes along with a compressed frame ([`StackMapFrame`]) for every join point.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1

mod analyzer;
mod frame;
mod merge_graph;
mod settings;
mod snapshot;
mod types;

pub use analyzer::*;
pub use frame::*;
pub use merge_graph::*;
pub use settings::*;
pub use snapshot::*;
pub use types::*;
