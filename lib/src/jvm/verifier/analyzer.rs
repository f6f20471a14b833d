use super::{
    AnalyzerSettings, FrameSnapshot, LabelMergeGraph, Recovery, StackMapFrame, VType,
    VerifierFrame,
};
use crate::jvm::class_graph::CommonSuperclass;
use crate::jvm::code::{InsnList, Label, MethodInfo, Node, TryCatchBlock};
use crate::jvm::{Error, VerifierErrorKind};
use crate::util::Offset;

/// Frame to emit at a join point
#[derive(Clone, Debug, PartialEq)]
pub struct FrameDirective {
    /// Join point (the frame describes the state at the first instruction after the label)
    pub label: Label,

    /// Full state at the join point
    pub snapshot: FrameSnapshot<VType>,

    /// `snapshot`, compressed relative to the previous directive (or the initial frame)
    pub frame: StackMapFrame<VType>,
}

/// Result of analyzing a method body
#[derive(Clone, Debug, PartialEq)]
pub struct Analysis {
    pub max_stack: u16,
    pub max_locals: u16,

    /// State on entry to the method (what the first directive is compressed against)
    pub initial_frame: FrameSnapshot<VType>,

    /// Frames at every reachable join point, in instruction order
    pub frames: Vec<FrameDirective>,
}

/// Abstract interpreter computing stack map frames for method bodies
///
/// Analysis proceeds as a worklist of paths: each path starts at some position with a frame and
/// executes instructions until it either leaves the method or reaches a join point whose merged
/// frame doesn't change. Every time a join point's merged frame does change, a new path is started
/// from there. Once the worklist is empty, exception handlers whose entry frames changed are
/// analyzed one at a time, until nothing changes anymore.
pub struct Analyzer<'a> {
    oracle: &'a dyn CommonSuperclass,
    settings: AnalyzerSettings,
}

impl<'a> Analyzer<'a> {
    pub fn new(oracle: &'a dyn CommonSuperclass, settings: AnalyzerSettings) -> Analyzer<'a> {
        Analyzer { oracle, settings }
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    /// Analyze one method body
    ///
    /// The instruction list is edited in place: labels are placed before allocation sites, and
    /// frames get inserted if [`AnalyzerSettings::insert_frames`] is set. All other state is
    /// fresh for each call.
    pub fn analyze(
        &mut self,
        method: &MethodInfo,
        insns: &mut InsnList,
        try_catch_blocks: &[TryCatchBlock],
    ) -> Result<Analysis, Error> {
        let oracle = self.oracle;
        if self.settings.insert_frames {
            insns.remove_frames();
        }
        let mut graph = LabelMergeGraph::pre_mark(insns, try_catch_blocks, oracle)?;

        let initial = VerifierFrame::initial(method);
        let return_type = method.descriptor.return_type.as_ref();
        let mut max_locals = Offset(0);
        let mut max_stack = Offset(0);
        let mut worklist: Vec<(usize, VerifierFrame)> = vec![(0, initial.clone())];

        'paths: loop {
            let (mut position, mut frame) = match worklist.pop() {
                Some(work) => work,
                None => match graph.next_pending_handler() {
                    Some((handler, position, frame)) => {
                        log::debug!("Analyzing handler {} with {:?}", handler, frame);
                        (position, frame)
                    }
                    None => break,
                },
            };
            frame.update_maximums(&mut max_locals, &mut max_stack);

            loop {
                let node = match insns.get(position) {
                    Some(node) => node,
                    None => {
                        return Err(Error::VerifierError {
                            position,
                            instruction: String::from("<end of code>"),
                            frame: frame.snapshot(),
                            kind: VerifierErrorKind::FallsOffEnd,
                        })
                    }
                };
                log::trace!("{}: {:?}", position, node);

                match node {
                    Node::Label(label) => {
                        if graph.is_join(*label) {
                            if !graph.mark(*label, &frame, oracle)? {
                                continue 'paths;
                            }
                            if let Some(merged) = graph.frame_at(*label) {
                                frame = merged.clone();
                            }
                        }
                    }

                    Node::Frame(_) => (),

                    Node::Insn(insn) => {
                        graph.feed_handlers(position, &frame, oracle)?;
                        let site = match position.checked_sub(1).and_then(|p| insns.get(p)) {
                            Some(Node::Label(label)) => Some(*label),
                            _ => None,
                        };

                        let before = frame.clone();
                        if let Err(kind) = frame.verify_instruction(insn, site, &method.class) {
                            frame = before;
                            self.recover(position, node, &mut frame, kind)?;
                        }
                        frame.update_maximums(&mut max_locals, &mut max_stack);
                    }

                    Node::Branch(insn) => {
                        graph.feed_handlers(position, &frame, oracle)?;

                        let before = frame.clone();
                        if let Err(kind) = frame.verify_branch_instruction(insn, return_type) {
                            frame = before;
                            self.recover(position, node, &mut frame, kind)?;
                        }
                        frame.update_maximums(&mut max_locals, &mut max_stack);

                        for target in insn.jump_targets() {
                            if graph.mark(target, &frame, oracle)? {
                                if let Some(merged) = graph.frame_at(target) {
                                    worklist.push((graph.position(target)? + 1, merged.clone()));
                                }
                            }
                        }
                        if !insn.falls_through() {
                            continue 'paths;
                        }
                    }
                }

                position += 1;
            }
        }

        let max_stack =
            u16::try_from(max_stack.0).map_err(|_| Error::MethodCodeMaxStackOverflow(max_stack))?;
        let max_locals = u16::try_from(max_locals.0)
            .map_err(|_| Error::MethodCodeMaxLocalsOverflow(max_locals))?;

        let initial_frame = initial.snapshot();
        let (frames, insert_at) = finalize(insns, &graph, &initial_frame);
        if self.settings.insert_frames {
            for (position, directive) in insert_at.into_iter().zip(&frames).rev() {
                insns.insert(position, Node::Frame(directive.frame.clone()));
            }
        }

        log::debug!(
            "Analyzed {}.{}: max stack {}, max locals {}, {} frames",
            method.class,
            method.name,
            max_stack,
            max_locals,
            frames.len()
        );
        Ok(Analysis {
            max_stack,
            max_locals,
            initial_frame,
            frames,
        })
    }

    /// Hand a failed instruction to the recovery handler, if there is one
    fn recover(
        &mut self,
        position: usize,
        node: &Node,
        frame: &mut VerifierFrame,
        kind: VerifierErrorKind,
    ) -> Result<(), Error> {
        let snapshot = frame.snapshot();
        if let (true, Some(handler)) = (kind.is_recoverable(), &mut self.settings.recovery) {
            if handler.recover(&kind, node, frame) == Recovery::Continue {
                log::warn!(
                    "Continuing past {:?} at instruction {} ({})",
                    node,
                    position,
                    kind
                );
                return Ok(());
            }
        }

        let instruction = match node {
            Node::Insn(insn) => format!("{:?}", insn),
            Node::Branch(insn) => format!("{:?}", insn),
            other => format!("{:?}", other),
        };
        Err(Error::VerifierError {
            position,
            instruction,
            frame: snapshot,
            kind,
        })
    }
}

/// Compute the frame directives in instruction order
///
/// A run of labels with no instruction between them shares one frame, which is the merged frame
/// of the last join point in the run. Also returns, for each directive, the position of the
/// instruction it describes.
fn finalize(
    insns: &InsnList,
    graph: &LabelMergeGraph,
    initial_frame: &FrameSnapshot<VType>,
) -> (Vec<FrameDirective>, Vec<usize>) {
    let mut directives = vec![];
    let mut positions = vec![];
    let mut previous = initial_frame.clone();
    let mut anchor: Option<Label> = None;

    for (position, node) in insns.iter().enumerate() {
        match node {
            Node::Label(label) if graph.is_join(*label) => anchor = Some(*label),
            Node::Label(_) | Node::Frame(_) => (),
            Node::Insn(_) | Node::Branch(_) => {
                let label = match anchor.take() {
                    Some(label) => label,
                    None => continue,
                };
                let frame = match graph.frame_at(label) {
                    Some(frame) => frame,
                    None => {
                        log::warn!("Label {} is unreachable, so it gets no frame", label);
                        continue;
                    }
                };

                let snapshot = frame.snapshot();
                let compressed = snapshot.stack_map_frame(&previous);
                previous = snapshot.clone();
                positions.push(position);
                directives.push(FrameDirective {
                    label,
                    snapshot,
                    frame: compressed,
                });
            }
        }
    }

    (directives, positions)
}

/// Analyze a method body with the default settings
pub fn compute_frames(
    method: &MethodInfo,
    insns: &mut InsnList,
    try_catch_blocks: &[TryCatchBlock],
    oracle: &dyn CommonSuperclass,
) -> Result<Analysis, Error> {
    Analyzer::new(oracle, AnalyzerSettings::default()).analyze(method, insns, try_catch_blocks)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::ClassHierarchy;
    use crate::jvm::code::{BranchInstruction, Instruction, OrdComparison};
    use crate::jvm::verifier::VerificationType::*;
    use crate::jvm::MethodAccessFlags;

    fn static_method(descriptor: &str) -> MethodInfo {
        MethodInfo::parse(
            "Test",
            "test",
            descriptor,
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        )
        .unwrap()
    }

    #[test]
    fn straight_line_code() {
        let mut insns = InsnList::new();
        insns.push(Instruction::LConst1);
        insns.push(Instruction::ILoad(0));
        insns.push(Instruction::I2L);
        insns.push(Instruction::LAdd);
        insns.push(Instruction::LStore(1));
        insns.push_branch(BranchInstruction::Return);

        let hierarchy = ClassHierarchy::with_java_lang();
        let analysis = compute_frames(&static_method("(I)V"), &mut insns, &[], &hierarchy).unwrap();
        assert_eq!(analysis.max_stack, 4);
        assert_eq!(analysis.max_locals, 3);
        assert_eq!(analysis.initial_frame, FrameSnapshot::new(vec![Integer], vec![]));
        assert!(analysis.frames.is_empty());
    }

    #[test]
    fn frames_are_inserted_before_instructions() {
        let mut insns = InsnList::new();
        let else_branch = insns.fresh_label();
        let join = insns.fresh_label();
        insns.push(Instruction::ILoad(0));
        insns.push_branch(BranchInstruction::If(OrdComparison::EQ, else_branch));
        insns.push(Instruction::IConst1);
        insns.push_branch(BranchInstruction::Goto(join));
        insns.place_label(else_branch);
        insns.push(Instruction::IConst0);
        insns.place_label(join);
        insns.push_branch(BranchInstruction::IReturn);

        let hierarchy = ClassHierarchy::with_java_lang();
        let settings = AnalyzerSettings {
            insert_frames: true,
            ..AnalyzerSettings::default()
        };
        let mut analyzer = Analyzer::new(&hierarchy, settings);
        let method = static_method("(I)I");
        let analysis = analyzer.analyze(&method, &mut insns, &[]).unwrap();

        assert_eq!(analysis.max_stack, 1);
        assert_eq!(analysis.frames.len(), 2);
        assert_eq!(analysis.frames[0].label, else_branch);
        assert_eq!(analysis.frames[0].frame, StackMapFrame::Same);
        assert_eq!(analysis.frames[1].label, join);
        assert_eq!(analysis.frames[1].frame, StackMapFrame::SameLocalsOneStack(Integer));

        assert!(matches!(insns.get(5), Some(Node::Frame(StackMapFrame::Same))));
        assert!(matches!(
            insns.get(8),
            Some(Node::Frame(StackMapFrame::SameLocalsOneStack(Integer)))
        ));

        // Analyzing again replaces the frames instead of duplicating them
        let again = analyzer.analyze(&method, &mut insns, &[]).unwrap();
        assert_eq!(again, analysis);
        assert_eq!(insns.len(), 10);
    }

    #[test]
    fn falls_off_end() {
        let mut insns = InsnList::new();
        insns.push(Instruction::IConst0);
        insns.push(Instruction::Pop);

        let hierarchy = ClassHierarchy::with_java_lang();
        let result = compute_frames(&static_method("()V"), &mut insns, &[], &hierarchy);
        assert!(matches!(
            result,
            Err(Error::VerifierError {
                position: 2,
                kind: VerifierErrorKind::FallsOffEnd,
                ..
            })
        ));
    }
}
