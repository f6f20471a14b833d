use std::fmt;

/// Opaque label
///
/// Labels are compared by identity: two labels are equal only if they came out of the same
/// `fresh_label` call.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Label(usize);

impl Label {
    /// Get the next fresh label
    fn next(&self) -> Label {
        Label(self.0 + 1)
    }
}

/// Generates new labels
///
/// Cloning does not split the generator source - the cloned generator will produce the same
/// sequence of labels as the original.
#[derive(Clone, Debug)]
pub struct LabelGenerator(Label);

impl LabelGenerator {
    pub fn new() -> LabelGenerator {
        LabelGenerator(Label(0))
    }

    /// Generate a fresh label
    pub fn fresh_label(&mut self) -> Label {
        let to_return = self.0;
        self.0 = self.0.next();
        to_return
    }
}

impl Default for LabelGenerator {
    fn default() -> LabelGenerator {
        LabelGenerator::new()
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}
