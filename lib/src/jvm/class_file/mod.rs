//! Class file encoding of analysis results
//!
//! The analysis works in terms of labels and class names, but the [`StackMapTable`] attribute
//! refers to bytecode offsets and constant pool entries. Both are only known once the method body
//! has been laid out, which is up to the caller: a [`ConstantResolver`] bridges the gap.

mod attribute;
mod binary_format;

pub use attribute::*;
pub use binary_format::*;
