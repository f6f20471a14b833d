use super::Serialize;
use crate::jvm::code::Label;
use crate::jvm::verifier::{FrameDirective, FrameSnapshot, StackMapFrame, VType, VerificationType};
use crate::jvm::{BinaryName, Error, RefType};
use crate::util::Offset;
use byteorder::WriteBytesExt;
use std::io::{Error as IoError, ErrorKind};

/// Verification type as it appears in a class file: classes are `CONSTANT_Class` indices and
/// uninitialized values are the bytecode offsets of their `new` instructions
pub type SerializableType = VerificationType<u16, u16>;

/// Maps symbolic references onto the laid out method and its constant pool
///
/// Methods take `&mut self` so that constant pool entries can be allocated on demand.
pub trait ConstantResolver {
    /// Bytecode offset of the first instruction following a label
    fn label_offset(&mut self, label: Label) -> Option<u16>;

    /// Index of the `CONSTANT_Class` entry for a class or array type
    fn class_index(&mut self, class: &RefType<BinaryName>) -> Option<u16>;
}

/// Body of the [`StackMapTable` attribute][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.7.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapTable(pub Vec<StackMapTableEntry>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapTableEntry {
    /// Offset from the previous entry (minus one), or from the start of the code for the first
    pub offset_delta: u16,
    pub frame: StackMapFrame<SerializableType>,
}

impl StackMapTable {
    pub const NAME: &'static str = "StackMapTable";

    /// Lay out the frames computed for a method
    ///
    /// Frames are ordered by offset, and each one is compressed relative to the one before it
    /// (since resolving labels may reorder frames or put two labels at the same offset). Identical
    /// frames at the same offset are collapsed, but different frames at one offset are an error.
    pub fn from_directives<R: ConstantResolver + ?Sized>(
        initial_frame: &FrameSnapshot<VType>,
        directives: &[FrameDirective],
        resolver: &mut R,
    ) -> Result<StackMapTable, Error> {
        let initial = initial_frame.try_map(|typ| resolve_type(typ, resolver))?;

        let mut resolved: Vec<(u16, FrameSnapshot<SerializableType>)> = vec![];
        for directive in directives {
            let offset = resolver
                .label_offset(directive.label)
                .ok_or(Error::UnknownLabel(directive.label))?;
            let frame = directive
                .snapshot
                .try_map(|typ| resolve_type(typ, resolver))?;
            resolved.push((offset, frame));
        }
        resolved.sort_by_key(|(offset, _)| *offset);

        let mut entries = vec![];
        let mut previous = initial;
        let mut previous_offset: Option<u16> = None;
        for (offset, frame) in resolved {
            let offset_delta = match previous_offset {
                None => offset,
                Some(previous_offset) if previous_offset == offset => {
                    if frame == previous {
                        continue;
                    }
                    return Err(Error::ConflictingFrames(
                        Offset(offset as usize),
                        previous,
                        frame,
                    ));
                }
                Some(previous_offset) => offset - previous_offset - 1,
            };

            entries.push(StackMapTableEntry {
                offset_delta,
                frame: frame.stack_map_frame(&previous),
            });
            previous = frame;
            previous_offset = Some(offset);
        }

        Ok(StackMapTable(entries))
    }
}

fn resolve_type<R: ConstantResolver + ?Sized>(
    typ: &VType,
    resolver: &mut R,
) -> Result<SerializableType, Error> {
    Ok(match typ {
        VerificationType::Top => VerificationType::Top,
        VerificationType::Integer => VerificationType::Integer,
        VerificationType::Float => VerificationType::Float,
        VerificationType::Double => VerificationType::Double,
        VerificationType::Long => VerificationType::Long,
        VerificationType::Null => VerificationType::Null,
        VerificationType::UninitializedThis => VerificationType::UninitializedThis,
        VerificationType::Object(class) => VerificationType::Object(
            resolver
                .class_index(class)
                .ok_or_else(|| Error::MissingClass(class.class_name()))?,
        ),
        VerificationType::Uninitialized(uninit) => VerificationType::Uninitialized(
            resolver
                .label_offset(uninit.site)
                .ok_or(Error::UnknownLabel(uninit.site))?,
        ),
    })
}

impl Serialize for StackMapTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for StackMapTableEntry {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let offset_delta = self.offset_delta;
        match &self.frame {
            // `same_frame` and `same_frame_extended`
            StackMapFrame::Same => {
                if offset_delta <= 63 {
                    (offset_delta as u8).serialize(writer)?;
                } else {
                    251u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
            }

            // `same_locals_1_stack_item_frame` and `same_locals_1_stack_item_frame_extended`
            StackMapFrame::SameLocalsOneStack(stack) => {
                if offset_delta <= 63 {
                    (offset_delta as u8 + 64).serialize(writer)?;
                } else {
                    247u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
                stack.serialize(writer)?;
            }

            // `chop_frame`
            StackMapFrame::Chop(chopped_k) => {
                if !(1..4).contains(chopped_k) {
                    let msg = format!("Chop frame removes {} locals (expected 1-3)", chopped_k);
                    return Err(IoError::new(ErrorKind::InvalidInput, msg));
                }
                (251 - chopped_k).serialize(writer)?;
                offset_delta.serialize(writer)?;
            }

            // `append_frame`
            StackMapFrame::Append(locals) => {
                let added_k = locals.len();
                if !(1..4).contains(&added_k) {
                    let msg = format!("Append frame adds {} locals (expected 1-3)", added_k);
                    return Err(IoError::new(ErrorKind::InvalidInput, msg));
                }
                (251 + added_k as u8).serialize(writer)?;
                offset_delta.serialize(writer)?;
                for local in locals {
                    local.serialize(writer)?;
                }
            }

            // `full_frame`
            StackMapFrame::Full(frame) => {
                255u8.serialize(writer)?;
                offset_delta.serialize(writer)?;
                frame.locals.serialize(writer)?;
                frame.stack.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Serialize for SerializableType {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(cls) => {
                7u8.serialize(writer)?;
                cls.serialize(writer)?;
            }
            VerificationType::Uninitialized(off) => {
                8u8.serialize(writer)?;
                off.serialize(writer)?;
            }
        };
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::LabelGenerator;
    use std::collections::HashMap;
    use VerificationType::*;

    #[derive(Default)]
    struct Layout {
        offsets: HashMap<Label, u16>,
        classes: HashMap<RefType<BinaryName>, u16>,
    }

    impl ConstantResolver for Layout {
        fn label_offset(&mut self, label: Label) -> Option<u16> {
            self.offsets.get(&label).copied()
        }

        fn class_index(&mut self, class: &RefType<BinaryName>) -> Option<u16> {
            let next = self.classes.len() as u16 + 1;
            Some(*self.classes.entry(class.clone()).or_insert(next))
        }
    }

    fn directive(label: Label, locals: Vec<VType>, stack: Vec<VType>) -> FrameDirective {
        FrameDirective {
            label,
            snapshot: FrameSnapshot::new(locals, stack),
            frame: StackMapFrame::Same,
        }
    }

    fn to_bytes(table: &StackMapTable) -> Vec<u8> {
        let mut bytes = vec![];
        table.serialize(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn offsets_and_tags() {
        let mut labels = LabelGenerator::new();
        let (l1, l2, l3, l4) = (
            labels.fresh_label(),
            labels.fresh_label(),
            labels.fresh_label(),
            labels.fresh_label(),
        );
        let mut layout = Layout::default();
        layout.offsets.extend([(l1, 5), (l2, 9), (l3, 200), (l4, 201)]);

        let initial = FrameSnapshot::new(vec![Integer], vec![]);
        let directives = [
            directive(l2, vec![Integer], vec![Object(RefType::STRING)]),
            directive(l1, vec![Integer], vec![]),
            directive(l3, vec![Integer, Long, Float], vec![]),
            directive(l4, vec![], vec![Integer, Integer]),
        ];
        let table = StackMapTable::from_directives(&initial, &directives, &mut layout).unwrap();

        assert_eq!(
            table.0,
            vec![
                StackMapTableEntry {
                    offset_delta: 5,
                    frame: StackMapFrame::Same
                },
                StackMapTableEntry {
                    offset_delta: 3,
                    frame: StackMapFrame::SameLocalsOneStack(Object(1))
                },
                StackMapTableEntry {
                    offset_delta: 190,
                    frame: StackMapFrame::Append(vec![Long, Float])
                },
                StackMapTableEntry {
                    offset_delta: 0,
                    frame: StackMapFrame::Full(FrameSnapshot::new(
                        vec![],
                        vec![Integer, Integer]
                    ))
                },
            ]
        );

        assert_eq!(
            to_bytes(&table),
            vec![
                0, 4, // number of entries
                5, // same
                67, 7, 0, 1, // same locals 1 stack item
                253, 0, 190, 4, 2, // append
                255, 0, 0, 0, 0, 0, 2, 1, 1, // full
            ]
        );
    }

    #[test]
    fn extended_forms() {
        let table = StackMapTable(vec![
            StackMapTableEntry {
                offset_delta: 100,
                frame: StackMapFrame::Same,
            },
            StackMapTableEntry {
                offset_delta: 64,
                frame: StackMapFrame::SameLocalsOneStack(Uninitialized(3)),
            },
            StackMapTableEntry {
                offset_delta: 1,
                frame: StackMapFrame::Chop(2),
            },
        ]);
        assert_eq!(
            to_bytes(&table),
            vec![0, 3, 251, 0, 100, 247, 0, 64, 8, 0, 3, 249, 0, 1]
        );

        let bad = StackMapTable(vec![StackMapTableEntry {
            offset_delta: 0,
            frame: StackMapFrame::Chop(4),
        }]);
        assert!(bad.serialize(&mut Vec::<u8>::new()).is_err());
    }

    #[test]
    fn frames_at_the_same_offset() {
        let mut labels = LabelGenerator::new();
        let (l1, l2) = (labels.fresh_label(), labels.fresh_label());
        let mut layout = Layout::default();
        layout.offsets.extend([(l1, 3), (l2, 3)]);
        let initial = FrameSnapshot::new(vec![], vec![]);

        let same = [
            directive(l1, vec![Integer], vec![]),
            directive(l2, vec![Integer], vec![]),
        ];
        let table = StackMapTable::from_directives(&initial, &same, &mut layout).unwrap();
        assert_eq!(table.0.len(), 1);

        let different = [
            directive(l1, vec![Integer], vec![]),
            directive(l2, vec![Float], vec![]),
        ];
        assert!(matches!(
            StackMapTable::from_directives(&initial, &different, &mut layout),
            Err(Error::ConflictingFrames(Offset(3), _, _))
        ));

        let missing = [directive(labels.fresh_label(), vec![], vec![])];
        assert!(matches!(
            StackMapTable::from_directives(&initial, &missing, &mut layout),
            Err(Error::UnknownLabel(_))
        ));
    }
}
