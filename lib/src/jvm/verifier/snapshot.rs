use super::VerificationType;

/// Immutable view of the locals and stack at a point in the code
///
/// Unlike a [`super::Frame`], entries are listed the way stack map frames list them: one entry
/// per value, with `long` and `double` implicitly covering two words. Trailing `Top` locals are
/// dropped, so frames which only differ in unusable trailing slots have equal snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FrameSnapshot<V> {
    pub locals: Vec<V>,
    pub stack: Vec<V>,
}

/// Compressed encoding of a frame relative to the previous frame
///
/// This mirrors the frame kinds of the [`StackMapTable` attribute][0], but without the offset
/// delta (which is only known once the code is laid out).
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame<V> {
    /// Frame has the same locals as the previous frame and number of stack items is zero
    Same,

    /// Frame has the same locals as the previous frame and number of stack items is one
    SameLocalsOneStack(V),

    /// Frame is like the previous frame, but without the last `k` locals (`k` must be 1 to 3)
    Chop(u8),

    /// Frame is like the previous frame, but with 1 to 3 extra locals
    Append(Vec<V>),

    /// Frame has exactly the locals and stack specified
    Full(FrameSnapshot<V>),
}

impl<C, U> FrameSnapshot<VerificationType<C, U>> {
    /// Build a snapshot, dropping any trailing `Top` locals
    pub fn new(
        mut locals: Vec<VerificationType<C, U>>,
        stack: Vec<VerificationType<C, U>>,
    ) -> Self {
        while let Some(VerificationType::Top) = locals.last() {
            locals.pop();
        }
        FrameSnapshot { locals, stack }
    }
}

impl<V> FrameSnapshot<V> {
    pub fn try_map<V2, E>(
        &self,
        mut map_value: impl FnMut(&V) -> Result<V2, E>,
    ) -> Result<FrameSnapshot<V2>, E> {
        Ok(FrameSnapshot {
            locals: self
                .locals
                .iter()
                .map(&mut map_value)
                .collect::<Result<_, _>>()?,
            stack: self
                .stack
                .iter()
                .map(&mut map_value)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl<V: Clone + PartialEq> FrameSnapshot<V> {
    /// Compute a stack map frame for this frame, given the previous frame
    ///
    /// This will fall back to the `Full` option only if none of the other stack map frame
    /// variants are enough to encode the transition.
    pub fn stack_map_frame(&self, previous_frame: &Self) -> StackMapFrame<V> {
        match self.stack.len() {
            0 => {
                let this_locals_len = self.locals.len();
                let prev_locals_len = previous_frame.locals.len();

                if this_locals_len <= prev_locals_len {
                    let len_difference = prev_locals_len - this_locals_len;
                    let this_is_prefix_of_prev = previous_frame.locals.starts_with(&self.locals);
                    if len_difference < 4 && this_is_prefix_of_prev {
                        if len_difference == 0 {
                            return StackMapFrame::Same;
                        } else {
                            return StackMapFrame::Chop(len_difference as u8);
                        }
                    }
                } else if this_locals_len - prev_locals_len < 4
                    && self.locals.starts_with(&previous_frame.locals)
                {
                    return StackMapFrame::Append(self.locals[prev_locals_len..].to_vec());
                }
            }
            1 if self.locals == previous_frame.locals => {
                return StackMapFrame::SameLocalsOneStack(self.stack[0].clone());
            }
            _ => (),
        }

        StackMapFrame::Full(self.clone())
    }
}

impl<V: Clone> StackMapFrame<V> {
    /// Decode the full frame, given the previous frame
    ///
    /// Returns `None` if the frame cannot apply to the previous frame (chopping more locals than
    /// there are).
    pub fn apply(&self, previous_frame: &FrameSnapshot<V>) -> Option<FrameSnapshot<V>> {
        match self {
            StackMapFrame::Same => Some(FrameSnapshot {
                locals: previous_frame.locals.clone(),
                stack: vec![],
            }),
            StackMapFrame::SameLocalsOneStack(stack) => Some(FrameSnapshot {
                locals: previous_frame.locals.clone(),
                stack: vec![stack.clone()],
            }),
            StackMapFrame::Chop(chopped_k) => {
                let len = previous_frame
                    .locals
                    .len()
                    .checked_sub(*chopped_k as usize)?;
                Some(FrameSnapshot {
                    locals: previous_frame.locals[..len].to_vec(),
                    stack: vec![],
                })
            }
            StackMapFrame::Append(extra) => {
                let mut locals = previous_frame.locals.clone();
                locals.extend(extra.iter().cloned());
                Some(FrameSnapshot {
                    locals,
                    stack: vec![],
                })
            }
            StackMapFrame::Full(frame) => Some(frame.clone()),
        }
    }

    pub fn try_map<V2, E>(
        &self,
        mut map_value: impl FnMut(&V) -> Result<V2, E>,
    ) -> Result<StackMapFrame<V2>, E> {
        Ok(match self {
            StackMapFrame::Same => StackMapFrame::Same,
            StackMapFrame::SameLocalsOneStack(stack) => {
                StackMapFrame::SameLocalsOneStack(map_value(stack)?)
            }
            StackMapFrame::Chop(chopped_k) => StackMapFrame::Chop(*chopped_k),
            StackMapFrame::Append(extra) => StackMapFrame::Append(
                extra.iter().map(&mut map_value).collect::<Result<_, _>>()?,
            ),
            StackMapFrame::Full(frame) => StackMapFrame::Full(frame.try_map(map_value)?),
        })
    }
}
