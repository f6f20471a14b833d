use super::code::Label;
use super::verifier::{FrameSnapshot, VType, VerificationType};
use crate::util::Offset;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Failure while analyzing or encoding a method body
///
/// None of these are transient: they all indicate that the input method (or the way it was
/// described) is malformed, so analysis of that method should be abandoned.
#[derive(Debug)]
pub enum Error {
    MethodCodeMaxStackOverflow(Offset),
    MethodCodeMaxLocalsOverflow(Offset),

    /// A jump, exception range, or frame refers to a label that is not in the instruction list
    UnknownLabel(Label),

    /// A label was placed more than once
    DuplicateLabel(Label),

    /// Malformed name or descriptor
    BadDescriptor(String),

    /// Class which could not be resolved to a constant pool entry
    MissingClass(String),

    /// Error trying to verify
    VerifierError {
        /// Index of the offending node in the instruction list
        position: usize,
        instruction: String,

        /// State just before the instruction
        frame: FrameSnapshot<VType>,
        kind: VerifierErrorKind,
    },

    /// A label is reached by paths with incompatible frames
    IncompatibleFrames {
        label: Label,
        current: FrameSnapshot<VType>,
        incoming: FrameSnapshot<VType>,
        kind: VerifierErrorKind,
    },

    /// A particular offset has two conflicting frames
    ConflictingFrames(
        Offset,
        FrameSnapshot<VerificationType<u16, u16>>,
        FrameSnapshot<VerificationType<u16, u16>>,
    ),
}

/// Why an instruction could not be executed on a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierErrorKind {
    /// Popped a value off an empty stack
    EmptyStack,

    /// Read a local variable slot which is unset or holds an unusable value
    LoadInvalid(u16),

    /// Found a value of the wrong type
    TypeMismatch { expected: String, found: VType },

    /// Stack shuffle needed a value of a different width
    SizeMismatch { expected: usize, found: usize },

    /// Stack shuffle needed a run of words which splits a wide value
    SizeRangeMismatch(usize),

    /// Array operation on something that is neither an array of the right kind nor `null`
    ArrayTypeMismatch(VType),

    /// Paths disagree on the depth of the stack
    StackDepthMismatch { expected: usize, found: usize },

    /// Subroutine instructions (`jsr`, `ret`) are not supported
    ObsoleteOpcode(&'static str),

    /// `new` instruction which is not preceded by a label
    MissingAllocationSite,

    /// Control reaches the end of the method without returning or throwing
    FallsOffEnd,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Error::MethodCodeMaxStackOverflow(Offset(size)) => {
                write!(f, "maximum stack size {} does not fit in a u16", size)
            }
            Error::MethodCodeMaxLocalsOverflow(Offset(size)) => {
                write!(f, "maximum locals size {} does not fit in a u16", size)
            }
            Error::UnknownLabel(label) => write!(f, "label {} is never placed", label),
            Error::DuplicateLabel(label) => write!(f, "label {} is placed twice", label),
            Error::BadDescriptor(msg) => write!(f, "bad descriptor: {}", msg),
            Error::MissingClass(name) => write!(f, "no constant for class {}", name),
            Error::VerifierError {
                position,
                instruction,
                frame,
                kind,
            } => write!(
                f,
                "{} at instruction {} ({}) with frame {:?}",
                kind, position, instruction, frame
            ),
            Error::IncompatibleFrames {
                label,
                current,
                incoming,
                kind,
            } => write!(
                f,
                "cannot merge frame {:?} into {:?} at {}: {}",
                incoming, current, label, kind
            ),
            Error::ConflictingFrames(Offset(offset), frame1, frame2) => write!(
                f,
                "conflicting frames {:?} and {:?} at offset {}",
                frame1, frame2, offset
            ),
        }
    }
}

impl Display for VerifierErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            VerifierErrorKind::EmptyStack => f.write_str("stack underflow"),
            VerifierErrorKind::LoadInvalid(slot) => {
                write!(f, "local {} is unset or invalid", slot)
            }
            VerifierErrorKind::TypeMismatch { expected, found } => {
                write!(f, "expected {} but found {:?}", expected, found)
            }
            VerifierErrorKind::SizeMismatch { expected, found } => write!(
                f,
                "expected a value of width {} but found width {}",
                expected, found
            ),
            VerifierErrorKind::SizeRangeMismatch(words) => {
                write!(f, "top {} stack words split a wide value", words)
            }
            VerifierErrorKind::ArrayTypeMismatch(found) => {
                write!(f, "expected an array but found {:?}", found)
            }
            VerifierErrorKind::StackDepthMismatch { expected, found } => write!(
                f,
                "stack depth mismatch (expected {} but found {})",
                expected, found
            ),
            VerifierErrorKind::ObsoleteOpcode(opcode) => {
                write!(f, "obsolete opcode `{}` is not supported", opcode)
            }
            VerifierErrorKind::MissingAllocationSite => {
                f.write_str("`new` is not preceded by a label")
            }
            VerifierErrorKind::FallsOffEnd => f.write_str("control falls off the end of the code"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::VerifierError { kind, .. } | Error::IncompatibleFrames { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

impl std::error::Error for VerifierErrorKind {}

impl VerifierErrorKind {
    /// Whether a recovery handler gets a say in this error
    ///
    /// Subroutines are rejected no matter what, since a `jsr` can't be treated as a jump.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, VerifierErrorKind::ObsoleteOpcode(_))
    }
}
