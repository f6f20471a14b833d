use super::Label;
use crate::jvm::{BinaryName, RefType};

/// Entry of a method's exception table
///
/// The protected range covers every node from `start` (inclusive) up to `end` (exclusive).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TryCatchBlock {
    pub start: Label,
    pub end: Label,

    /// Where control goes when an exception is caught
    pub handler: Label,

    /// Exception type to catch (`None` catches everything, like a `finally`)
    pub catch_type: Option<RefType<BinaryName>>,
}

impl TryCatchBlock {
    /// Type of the exception on the stack when the handler is entered
    pub fn caught_type(&self) -> RefType<BinaryName> {
        self.catch_type.clone().unwrap_or(RefType::THROWABLE)
    }
}
