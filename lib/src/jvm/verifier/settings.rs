use super::VerifierFrame;
use crate::jvm::code::Node;
use crate::jvm::VerifierErrorKind;

pub struct AnalyzerSettings {
    /// Insert `Frame` nodes into the instruction list
    ///
    /// Frames are placed right before the first instruction following each join point. Any
    /// `Frame` nodes already in the list are removed first.
    pub insert_frames: bool,

    /// What to do when an instruction can't be executed on the current frame
    ///
    /// By default (`None`), analysis stops with an error. With a handler, the failure is handed
    /// off along with the frame as it was before the instruction, and the handler decides whether
    /// the analysis keeps going with whatever frame it leaves behind.
    pub recovery: Option<Box<dyn RecoveryHandler>>,
}

impl Default for AnalyzerSettings {
    fn default() -> AnalyzerSettings {
        AnalyzerSettings {
            insert_frames: false,
            recovery: None,
        }
    }
}

/// Outcome of a [`RecoveryHandler`]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Recovery {
    /// Keep going with the frame as the handler left it
    Continue,

    /// Give up and report the original error
    Abort,
}

/// Best-effort fallback for instructions that fail to execute
///
/// This is meant for transformations that don't need correct frames everywhere. Frames that fail
/// to merge at a join point and `jsr`/`ret` instructions are never recoverable.
pub trait RecoveryHandler {
    fn recover(
        &mut self,
        error: &VerifierErrorKind,
        node: &Node,
        frame: &mut VerifierFrame,
    ) -> Recovery;
}

impl<F> RecoveryHandler for F
where
    F: FnMut(&VerifierErrorKind, &Node, &mut VerifierFrame) -> Recovery,
{
    fn recover(
        &mut self,
        error: &VerifierErrorKind,
        node: &Node,
        frame: &mut VerifierFrame,
    ) -> Recovery {
        self(error, node, frame)
    }
}
