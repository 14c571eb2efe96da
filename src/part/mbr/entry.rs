use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::Result;

pub const PTE_OFFSET: usize = 0x1BE;
pub const PTE_SIZE: usize = 16;
pub const SIGNATURE_OFFSET: usize = 0x1FE;
pub const SIGNATURE: [u8; 2] = [0x55, 0xAA];

pub const PT_UNUSED: u8 = 0x00;
pub const PT_EXTENDED: u8 = 0x05;
pub const PT_EXTENDED_LBA: u8 = 0x0F;
pub const PT_LINUX_EXTENDED: u8 = 0x85;
pub const PT_GPT_PROTECTIVE: u8 = 0xEE;

pub fn is_extended_type(ptype: u8) -> bool {
    matches!(ptype, PT_EXTENDED | PT_EXTENDED_LBA | PT_LINUX_EXTENDED)
}

/// One 16-byte partition table entry, as found in the MBR and in EBRs.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct MbrEntry {
    pub status: u8,
    pub start_chs: (u16, u8, u8),
    pub ptype: u8,
    pub end_chs: (u16, u8, u8),
    pub first_lba: u32,
    pub length: u32,
}

impl MbrEntry {
    pub fn new(ptype: u8, first_lba: u32, length: u32) -> Self {
        Self {
            ptype,
            first_lba,
            length,
            ..Self::default()
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);

        let status = cursor.read_u8()?;
        let start_chs = Self::decode_chs(&mut cursor)?;
        let ptype = cursor.read_u8()?;
        let end_chs = Self::decode_chs(&mut cursor)?;

        let first_lba = cursor.read_u32::<LittleEndian>()?;
        let length = cursor.read_u32::<LittleEndian>()?;

        debug_assert_eq!(cursor.position(), PTE_SIZE as u64);

        Ok(Self {
            status,
            start_chs,
            ptype,
            end_chs,
            first_lba,
            length,
        })
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        let mut cursor = Cursor::new(buf);

        cursor.write_u8(self.status)?;
        Self::encode_chs(&mut cursor, self.start_chs)?;
        cursor.write_u8(self.ptype)?;
        Self::encode_chs(&mut cursor, self.end_chs)?;
        cursor.write_u32::<LittleEndian>(self.first_lba)?;
        cursor.write_u32::<LittleEndian>(self.length)?;

        debug_assert_eq!(cursor.position(), PTE_SIZE as u64);
        Ok(())
    }

    /// Entries with a zero type or zero length describe nothing.
    pub fn is_unused(&self) -> bool {
        self.ptype == PT_UNUSED || self.length == 0
    }

    fn decode_chs<T: AsRef<[u8]>>(cursor: &mut Cursor<T>) -> Result<(u16, u8, u8)> {
        let x1 = cursor.read_u8()?;
        let x2 = cursor.read_u8()?;
        let x3 = cursor.read_u8()?;

        let head = x1;
        let sector = x2 & 0x3F;
        let cylinder = x3 as u16 | (((x2 as u16) & 0xC0) << 2);

        Ok((cylinder, head, sector))
    }

    fn encode_chs(cursor: &mut Cursor<&mut [u8]>, chs: (u16, u8, u8)) -> Result<()> {
        let (cylinder, head, sector) = chs;

        cursor.write_u8(head)?;
        cursor.write_u8((sector & 0x3F) | (((cylinder >> 2) & 0xC0) as u8))?;
        cursor.write_u8(cylinder as u8)?;
        Ok(())
    }
}

/// Reads entry `i` of the table in a boot record.
pub fn read_slot(block: &[u8], i: usize) -> Result<MbrEntry> {
    let offset = PTE_OFFSET + i * PTE_SIZE;
    MbrEntry::decode(&block[offset..offset + PTE_SIZE])
}

pub fn write_slot(block: &mut [u8], i: usize, entry: &MbrEntry) -> Result<()> {
    let offset = PTE_OFFSET + i * PTE_SIZE;
    entry.encode(&mut block[offset..offset + PTE_SIZE])
}

pub fn has_signature(block: &[u8]) -> bool {
    block[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2] == SIGNATURE
}

pub fn set_signature(block: &mut [u8]) {
    block[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2].copy_from_slice(&SIGNATURE);
}

/// Boot sectors of these file systems carry the same `55 AA` signature as
/// an MBR.
pub fn foreign_fs_signature(block: &[u8]) -> Option<&'static str> {
    if &block[0x03..0x0B] == b"NTFS    " {
        Some("NTFS")
    } else if &block[0x03..0x0B] == b"EXFAT   " {
        Some("exFAT")
    } else if &block[0x52..0x57] == b"FAT32" {
        Some("FAT32")
    } else if &block[0x36..0x39] == b"FAT" {
        Some("FAT12/16")
    } else {
        None
    }
}
