use super::{FrameSnapshot, VType, VerifierFrame};
use crate::jvm::class_graph::CommonSuperclass;
use crate::jvm::code::{Instruction, InsnList, Label, Node, TryCatchBlock};
use crate::jvm::{BinaryName, Error, RefType};
use crate::util::OffsetVec;
use std::collections::{HashMap, HashSet};

/// Handle to a join point tracked by a [`LabelMergeGraph`]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct LabelId(usize);

/// Accumulated state for one join point
#[derive(Debug)]
struct LabelRecord {
    label: Label,

    /// Merge of every frame that reached this label (`None` until the label is first reached)
    frame: Option<VerifierFrame>,

    /// Snapshots of every incoming frame already merged into `frame`
    seen: HashSet<FrameSnapshot<VType>>,

    /// Exception handler information, if the label is a handler entry
    handler: Option<HandlerState>,
}

#[derive(Debug)]
struct HandlerState {
    /// Common superclass of the catch types of every range pointing at this handler
    catch_type: RefType<BinaryName>,

    /// The entry frame changed since the handler was last analyzed
    pending: bool,
}

/// Per-label merge state for one traversal of a method body
///
/// Only labels that are actually jumped to (branch targets and exception handlers) get a record.
/// Every other label is just a position marker and never needs a frame.
#[derive(Debug)]
pub struct LabelMergeGraph {
    records: Vec<LabelRecord>,
    ids: HashMap<Label, LabelId>,

    /// Position of every label placed in the list
    positions: HashMap<Label, usize>,

    /// Handlers whose protected range covers each position in the list
    handlers_at: Vec<Vec<LabelId>>,
}

impl LabelMergeGraph {
    /// Scan the instructions once to find the join points
    ///
    /// This also edits the list: every `new` instruction which doesn't already directly follow a
    /// label gets a fresh label placed right before it, so that its uninitialized value can be
    /// tied to that allocation site.
    pub fn pre_mark(
        insns: &mut InsnList,
        try_catch_blocks: &[TryCatchBlock],
        oracle: &dyn CommonSuperclass,
    ) -> Result<LabelMergeGraph, Error> {
        let mut position = 0;
        while position < insns.len() {
            if let Some(Node::Insn(Instruction::New(_))) = insns.get(position) {
                let has_label =
                    position > 0 && matches!(insns.get(position - 1), Some(Node::Label(_)));
                if !has_label {
                    let site = insns.fresh_label();
                    insns.insert(position, Node::Label(site));
                    position += 1;
                }
            }
            position += 1;
        }

        let mut graph = LabelMergeGraph {
            records: vec![],
            ids: HashMap::new(),
            positions: HashMap::new(),
            handlers_at: vec![vec![]; insns.len()],
        };

        for (position, node) in insns.iter().enumerate() {
            if let Node::Label(label) = node {
                if graph.positions.insert(*label, position).is_some() {
                    return Err(Error::DuplicateLabel(*label));
                }
            }
        }

        for node in insns.iter() {
            if let Node::Branch(branch) = node {
                for target in branch.jump_targets() {
                    graph.position(target)?;
                    graph.add_record(target);
                }
            }
        }

        for block in try_catch_blocks {
            let start = graph.position(block.start)?;
            let end = graph.position(block.end)?;
            graph.position(block.handler)?;

            let id = graph.add_record(block.handler);
            let caught_type = block.caught_type();
            let record = &mut graph.records[id.0];
            match &mut record.handler {
                None => {
                    record.handler = Some(HandlerState {
                        catch_type: caught_type,
                        pending: false,
                    });
                }
                Some(handler) => {
                    handler.catch_type = oracle.common_superclass(&handler.catch_type, &caught_type);
                }
            }

            for handlers in &mut graph.handlers_at[start..end.max(start)] {
                if !handlers.contains(&id) {
                    handlers.push(id);
                }
            }
        }

        log::debug!(
            "Found {} join points in {} nodes",
            graph.records.len(),
            insns.len()
        );
        Ok(graph)
    }

    fn add_record(&mut self, label: Label) -> LabelId {
        if let Some(id) = self.ids.get(&label) {
            return *id;
        }
        let id = LabelId(self.records.len());
        self.records.push(LabelRecord {
            label,
            frame: None,
            seen: HashSet::new(),
            handler: None,
        });
        self.ids.insert(label, id);
        id
    }

    /// Position of a placed label in the instruction list
    pub fn position(&self, label: Label) -> Result<usize, Error> {
        self.positions
            .get(&label)
            .copied()
            .ok_or(Error::UnknownLabel(label))
    }

    /// Is the label a join point (and so needs a frame)?
    pub fn is_join(&self, label: Label) -> bool {
        self.ids.contains_key(&label)
    }

    /// Merged frame at a join point, if the label has been reached at all
    pub fn frame_at(&self, label: Label) -> Option<&VerifierFrame> {
        self.ids
            .get(&label)
            .and_then(|id| self.records[id.0].frame.as_ref())
    }

    /// Catch type for a handler entry
    pub fn catch_type(&self, label: Label) -> Option<&RefType<BinaryName>> {
        self.ids
            .get(&label)
            .and_then(|id| self.records[id.0].handler.as_ref())
            .map(|handler| &handler.catch_type)
    }

    /// Merge an incoming frame into a join point
    ///
    /// Returns `true` if the label needs to be (re-)analyzed: either this is the first frame to
    /// reach the label, or the frame is new and changed the merged state. A frame whose snapshot
    /// was already merged in is ignored, which is what makes the traversal terminate.
    pub fn mark(
        &mut self,
        label: Label,
        frame: &VerifierFrame,
        oracle: &dyn CommonSuperclass,
    ) -> Result<bool, Error> {
        let id = *self.ids.get(&label).ok_or(Error::UnknownLabel(label))?;
        let record = &mut self.records[id.0];

        let incoming = frame.snapshot();
        if !record.seen.insert(incoming.clone()) {
            return Ok(false);
        }

        let changed = if let Some(current) = &mut record.frame {
            let before = current.snapshot();
            current
                .merge(frame, oracle)
                .map_err(|kind| Error::IncompatibleFrames {
                    label,
                    current: before,
                    incoming,
                    kind,
                })?
        } else {
            record.frame = Some(frame.clone());
            true
        };

        if changed {
            log::debug!("Label {} now has frame {:?}", label, record.frame);
            let position = self.position(label)?;
            self.feed_handlers(position, frame, oracle)?;
        }
        Ok(changed)
    }

    /// Merge the locals of a frame into every handler protecting the given position
    ///
    /// An exception can be thrown before or during any instruction in a protected range, so the
    /// handler entry has to account for the locals at each of those points. The stack at the
    /// handler entry is always just the caught exception.
    pub fn feed_handlers(
        &mut self,
        position: usize,
        frame: &VerifierFrame,
        oracle: &dyn CommonSuperclass,
    ) -> Result<(), Error> {
        let handlers = match self.handlers_at.get(position) {
            Some(handlers) if !handlers.is_empty() => handlers.clone(),
            _ => return Ok(()),
        };

        for id in handlers {
            let record = &mut self.records[id.0];
            let catch_type = match &record.handler {
                Some(handler) => handler.catch_type.clone(),
                None => continue,
            };

            let mut entry = VerifierFrame {
                locals: frame.locals.clone(),
                stack: OffsetVec::new(),
            };
            entry.push(VType::Object(catch_type));

            let incoming = entry.snapshot();
            if !record.seen.insert(incoming.clone()) {
                continue;
            }

            let changed = if let Some(current) = &mut record.frame {
                let before = current.snapshot();
                current
                    .merge(&entry, oracle)
                    .map_err(|kind| Error::IncompatibleFrames {
                        label: record.label,
                        current: before,
                        incoming,
                        kind,
                    })?
            } else {
                record.frame = Some(entry);
                true
            };

            if changed {
                if let Some(handler) = &mut record.handler {
                    handler.pending = true;
                }
                log::debug!(
                    "Handler {} now has frame {:?}",
                    record.label,
                    record.frame
                );
            }
        }
        Ok(())
    }

    /// Take the next handler whose entry frame changed since it was last analyzed
    ///
    /// Returns the handler label, the position where analysis of the handler starts, and its
    /// entry frame.
    pub fn next_pending_handler(&mut self) -> Option<(Label, usize, VerifierFrame)> {
        for record in &mut self.records {
            let handler = match &mut record.handler {
                Some(handler) if handler.pending => handler,
                _ => continue,
            };
            handler.pending = false;

            let frame = match &record.frame {
                Some(frame) => frame.clone(),
                None => continue,
            };
            let position = match self.positions.get(&record.label) {
                Some(position) => *position,
                None => continue,
            };
            return Some((record.label, position + 1, frame));
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::ClassHierarchy;
    use crate::jvm::code::{BranchInstruction, Instruction, OrdComparison};
    use crate::jvm::verifier::VerificationType::*;

    fn frame_with_stack<const N: usize>(stack: [VType; N]) -> VerifierFrame {
        VerifierFrame {
            locals: OffsetVec::new(),
            stack: OffsetVec::from(stack),
        }
    }

    #[test]
    fn synthesizes_allocation_sites() {
        let hierarchy = ClassHierarchy::with_java_lang();
        let mut insns = InsnList::new();
        let existing = insns.fresh_label();
        insns.push(Instruction::New(BinaryName::OBJECT));
        insns.place_label(existing);
        insns.push(Instruction::New(BinaryName::STRING));
        insns.push(Instruction::Pop);
        insns.push(Instruction::Pop);
        insns.push_branch(BranchInstruction::Return);

        let graph = LabelMergeGraph::pre_mark(&mut insns, &[], &hierarchy).unwrap();
        assert_eq!(insns.len(), 7);
        assert!(matches!(insns.get(0), Some(Node::Label(_))));
        assert_eq!(graph.position(existing).unwrap(), 2);
        assert!(!graph.is_join(existing), "allocation sites are not join points");
    }

    #[test]
    fn unknown_and_duplicate_labels() {
        let hierarchy = ClassHierarchy::with_java_lang();

        let mut insns = InsnList::new();
        let nowhere = insns.fresh_label();
        insns.push_branch(BranchInstruction::Goto(nowhere));
        assert!(matches!(
            LabelMergeGraph::pre_mark(&mut insns, &[], &hierarchy),
            Err(Error::UnknownLabel(label)) if label == nowhere
        ));

        let mut insns = InsnList::new();
        let twice = insns.fresh_label();
        insns.place_label(twice);
        insns.place_label(twice);
        insns.push_branch(BranchInstruction::Return);
        assert!(matches!(
            LabelMergeGraph::pre_mark(&mut insns, &[], &hierarchy),
            Err(Error::DuplicateLabel(label)) if label == twice
        ));
    }

    #[test]
    fn mark_is_idempotent() {
        let hierarchy = ClassHierarchy::with_java_lang();
        let mut insns = InsnList::new();
        let target = insns.fresh_label();
        insns.place_label(target);
        insns.push_branch(BranchInstruction::If(OrdComparison::EQ, target));
        insns.push_branch(BranchInstruction::Return);

        let mut graph = LabelMergeGraph::pre_mark(&mut insns, &[], &hierarchy).unwrap();
        assert!(graph.is_join(target));
        assert!(graph.frame_at(target).is_none());

        let ints = frame_with_stack([Integer]);
        assert!(graph.mark(target, &ints, &hierarchy).unwrap());
        assert!(!graph.mark(target, &ints, &hierarchy).unwrap());

        // New snapshot which generalizes the merged frame
        let string = frame_with_stack([Object(RefType::STRING)]);
        let null = frame_with_stack([Null]);
        let mut graph = LabelMergeGraph::pre_mark(&mut insns, &[], &hierarchy).unwrap();
        assert!(graph.mark(target, &null, &hierarchy).unwrap());
        assert!(graph.mark(target, &string, &hierarchy).unwrap());
        assert!(!graph.mark(target, &null, &hierarchy).unwrap());
        assert_eq!(graph.frame_at(target), Some(&string));

        // Stack depths must agree
        assert!(matches!(
            graph.mark(target, &frame_with_stack([]), &hierarchy),
            Err(Error::IncompatibleFrames { label, .. }) if label == target
        ));
    }

    #[test]
    fn handler_catch_types_merge() {
        let hierarchy = ClassHierarchy::with_java_lang();
        let mut insns = InsnList::new();
        let start = insns.fresh_label();
        let middle = insns.fresh_label();
        let end = insns.fresh_label();
        let handler = insns.fresh_label();
        insns.place_label(start);
        insns.push(Instruction::IConst0);
        insns.place_label(middle);
        insns.push(Instruction::Pop);
        insns.place_label(end);
        insns.push_branch(BranchInstruction::Return);
        insns.place_label(handler);
        insns.push_branch(BranchInstruction::AThrow);

        let blocks = [
            TryCatchBlock {
                start,
                end: middle,
                handler,
                catch_type: Some(RefType::Object(BinaryName::ARITHMETICEXCEPTION)),
            },
            TryCatchBlock {
                start: middle,
                end,
                handler,
                catch_type: Some(RefType::Object(BinaryName::ERROR)),
            },
        ];
        let mut graph = LabelMergeGraph::pre_mark(&mut insns, &blocks, &hierarchy).unwrap();
        assert_eq!(graph.catch_type(handler), Some(&RefType::THROWABLE));

        // Nothing to do until some protected code was reached
        assert!(graph.next_pending_handler().is_none());

        let locals = VerifierFrame {
            locals: OffsetVec::from([Integer]),
            stack: OffsetVec::from([Float]),
        };
        graph.feed_handlers(1, &locals, &hierarchy).unwrap();
        let (label, position, frame) = graph.next_pending_handler().unwrap();
        assert_eq!(label, handler);
        assert_eq!(position, 7);
        assert_eq!(frame.stack, OffsetVec::from([Object(RefType::THROWABLE)]));
        assert_eq!(frame.locals, OffsetVec::from([Integer]));
        assert!(graph.next_pending_handler().is_none());

        // Positions outside the range don't feed the handler
        graph.feed_handlers(5, &frame_with_stack([]), &hierarchy).unwrap();
        assert!(graph.next_pending_handler().is_none());
    }
}
