use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Error, ErrorKind, Result};

/// Write out a piece of a class file
///
/// Everything in a class file is big endian, and tables are preceded by a `u16` count, so
/// `Vec<T>` gets that count written before its elements.
pub trait Serialize {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Serialize for u16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(*self)
    }
}

impl<T: Serialize> Serialize for Vec<T> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        let count = u16::try_from(self.len()).map_err(|_| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("table has {} entries, but a class file allows at most 65535", self.len()),
            )
        })?;
        count.serialize(writer)?;
        self.iter().try_for_each(|elem| elem.serialize(writer))
    }
}
