use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::{Error, Result};

/// Size of an entry as written by this crate; tables read from disk may
/// use larger ones.
pub const ENTRY_SIZE: u32 = 128;
pub const NAME_OFFSET: usize = 0x38;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GptEntry {
    pub type_guid: Uuid,
    pub unique_guid: Uuid,
    pub start_lba: u64,
    /// Inclusive.
    pub end_lba: u64,
    pub attributes: u64,
    pub name: String,
}

impl GptEntry {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);

        let type_guid = read_guid(&mut cursor)?;
        let unique_guid = read_guid(&mut cursor)?;
        let start_lba = cursor.read_u64::<LittleEndian>()?;
        let end_lba = cursor.read_u64::<LittleEndian>()?;
        let attributes = cursor.read_u64::<LittleEndian>()?;
        debug_assert_eq!(cursor.position(), NAME_OFFSET as u64);

        let units = buf[NAME_OFFSET..]
            .chunks_exact(2)
            .map(|x| u16::from_le_bytes([x[0], x[1]]))
            .take_while(|x| *x != 0);
        let name = std::char::decode_utf16(units)
            .map(|x| x.unwrap_or(std::char::REPLACEMENT_CHARACTER))
            .collect();

        Ok(Self {
            type_guid,
            unique_guid,
            start_lba,
            end_lba,
            attributes,
            name,
        })
    }

    /// Encodes into `buf`, which spans exactly one entry. Names that do not
    /// fit are truncated.
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        for x in buf.iter_mut() {
            *x = 0;
        }
        let max_units = (buf.len() - NAME_OFFSET) / 2;

        let mut cursor = Cursor::new(&mut buf[..]);
        write_guid(&mut cursor, self.type_guid)?;
        write_guid(&mut cursor, self.unique_guid)?;
        cursor.write_u64::<LittleEndian>(self.start_lba)?;
        cursor.write_u64::<LittleEndian>(self.end_lba)?;
        cursor.write_u64::<LittleEndian>(self.attributes)?;
        debug_assert_eq!(cursor.position(), NAME_OFFSET as u64);

        for x in self.name.encode_utf16().take(max_units) {
            cursor.write_u16::<LittleEndian>(x)?;
        }

        Ok(())
    }

    pub fn is_used(&self) -> bool {
        !self.type_guid.is_nil()
    }
}

pub fn read_guid<T>(reader: &mut T) -> Result<Uuid>
where
    T: Read,
{
    let p0 = reader.read_u32::<LittleEndian>()?;
    let p1 = reader.read_u16::<LittleEndian>()?;
    let p2 = reader.read_u16::<LittleEndian>()?;
    let mut p3 = [0u8; 8];
    reader.read_exact(&mut p3)?;

    Uuid::from_fields(p0, p1, p2, &p3).map_err(|e| Error::decode(e.to_string()))
}

pub fn write_guid<T>(writer: &mut T, uuid: Uuid) -> Result<()>
where
    T: Write,
{
    let (p0, p1, p2, p3) = uuid.as_fields();

    writer.write_u32::<LittleEndian>(p0)?;
    writer.write_u16::<LittleEndian>(p1)?;
    writer.write_u16::<LittleEndian>(p2)?;
    writer.write_all(&p3[..])?;

    Ok(())
}
