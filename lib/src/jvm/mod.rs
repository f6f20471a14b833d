//! Compute stack map frames for JVM method bodies
//!
//! ### Simple example
//!
//! Consider the following simple Java method:
//!
//! ```java,ignore,no_run
//! public static int max(int x, int y) {
//!     return x > y ? x : y;
//! }
//! ```
//!
//! The frames needed at its join points, along with the maximum stack and locals sizes, can be
//! computed as follows:
//!
//! ```
//! use jvm_stackmap::jvm::class_graph::ClassHierarchy;
//! use jvm_stackmap::jvm::code::{BranchInstruction::*, Instruction::*, *};
//! use jvm_stackmap::jvm::verifier::{compute_frames, StackMapFrame, VerificationType};
//! use jvm_stackmap::jvm::*;
//!
//! # fn analyze_method() -> Result<(), Error> {
//! let method = MethodInfo::parse(
//!     "me/alec/Util",
//!     "max",
//!     "(II)I",
//!     MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
//! )?;
//!
//! // Build the method body
//! let mut code = InsnList::new();
//! let else_label = code.fresh_label();
//! let end_label = code.fresh_label();
//! code.push(ILoad(0));
//! code.push(ILoad(1));
//! code.push_branch(IfICmp(OrdComparison::LE, else_label));
//! code.push(ILoad(0));
//! code.push_branch(Goto(end_label));
//! code.place_label(else_label);
//! code.push(ILoad(1));
//! code.place_label(end_label);
//! code.push_branch(IReturn);
//!
//! // Run the analysis
//! let hierarchy = ClassHierarchy::with_java_lang();
//! let analysis = compute_frames(&method, &mut code, &[], &hierarchy)?;
//!
//! assert_eq!(analysis.max_stack, 2);
//! assert_eq!(analysis.max_locals, 2);
//! assert_eq!(analysis.frames[0].frame, StackMapFrame::Same);
//! assert_eq!(
//!     analysis.frames[1].frame,
//!     StackMapFrame::SameLocalsOneStack(VerificationType::Integer)
//! );
//! # Ok(())
//! # }
//! # analyze_method().unwrap();
//! ```

mod access_flags;
pub mod class_file;
pub mod class_graph;
pub mod code;
mod descriptors;
mod errors;
mod names;
pub mod verifier;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
