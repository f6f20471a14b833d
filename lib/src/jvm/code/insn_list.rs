use super::{BranchInstruction, Instruction, Label, LabelGenerator};
use crate::jvm::verifier::{StackMapFrame, VType};
use std::slice::Iter;

/// Entry in an instruction list
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// Position marker that jumps, exception ranges, and frames can refer to
    Label(Label),

    /// Straight-line instruction
    Insn(Instruction),

    /// Instruction that may jump or leave the method
    Branch(BranchInstruction),

    /// Computed stack map frame for the next instruction
    ///
    /// These are produced by the analysis and otherwise ignored by it.
    Frame(StackMapFrame<VType>),
}

impl Node {
    /// Is this an actual bytecode instruction (as opposed to a label or frame marker)?
    pub fn is_instruction(&self) -> bool {
        matches!(self, Node::Insn(_) | Node::Branch(_))
    }
}

/// Ordered, mutable list of instructions making up a method body
///
/// The list owns the generator for its labels, so every label handed out by
/// [`InsnList::fresh_label`] is unique within the list.
#[derive(Clone, Debug, Default)]
pub struct InsnList {
    nodes: Vec<Node>,
    labels: LabelGenerator,
}

impl InsnList {
    pub fn new() -> InsnList {
        InsnList {
            nodes: vec![],
            labels: LabelGenerator::new(),
        }
    }

    /// Generate a label which has not been used in this list yet
    pub fn fresh_label(&mut self) -> Label {
        self.labels.fresh_label()
    }

    /// Place a label at the end of the list
    pub fn place_label(&mut self, label: Label) {
        self.nodes.push(Node::Label(label));
    }

    /// Add a straight-line instruction to the end of the list
    pub fn push(&mut self, insn: Instruction) {
        self.nodes.push(Node::Insn(insn));
    }

    /// Add a branching instruction to the end of the list
    pub fn push_branch(&mut self, insn: BranchInstruction) {
        self.nodes.push(Node::Branch(insn));
    }

    /// Insert a node before the node at `index` (shifting everything after it)
    pub fn insert(&mut self, index: usize, node: Node) {
        self.nodes.insert(index, node);
    }

    pub fn get(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, Node> {
        self.nodes.iter()
    }

    /// Index of the node where a label is placed
    pub fn position_of(&self, label: Label) -> Option<usize> {
        self.nodes
            .iter()
            .position(|node| matches!(node, Node::Label(l) if *l == label))
    }

    /// Drop all `Frame` nodes (eg. left over from a previous analysis)
    pub fn remove_frames(&mut self) {
        self.nodes.retain(|node| !matches!(node, Node::Frame(_)));
    }
}

impl<'a> IntoIterator for &'a InsnList {
    type Item = &'a Node;
    type IntoIter = Iter<'a, Node>;

    fn into_iter(self) -> Iter<'a, Node> {
        self.nodes.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn labels_and_positions() {
        let mut insns = InsnList::new();
        let start = insns.fresh_label();
        let end = insns.fresh_label();
        assert_ne!(start, end);

        insns.place_label(start);
        insns.push(Instruction::IConst0);
        insns.place_label(end);
        insns.push_branch(BranchInstruction::IReturn);

        assert_eq!(insns.position_of(start), Some(0));
        assert_eq!(insns.position_of(end), Some(2));
        assert_eq!(insns.len(), 4);

        insns.insert(1, Node::Frame(StackMapFrame::Same));
        assert_eq!(insns.position_of(end), Some(3));
        insns.remove_frames();
        assert_eq!(insns.position_of(end), Some(2));
        assert_eq!(
            insns.iter().filter(|node| node.is_instruction()).count(),
            2
        );
    }
}
