use std::io::Cursor;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use crc::crc32;
use uuid::Uuid;

use super::entry::{read_guid, write_guid};
use crate::{Error, Result};

pub const SIGNATURE: u64 = 0x5452415020494645;
pub const REVISION: u32 = 0x00010000;
pub const HEADER_SIZE: u32 = 0x5C;

const HEADER_CRC_OFFSET: usize = 16;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GptHeader {
    pub revision: u32,
    /// Bytes covered by the header CRC, at least `HEADER_SIZE`.
    pub header_size: u32,
    pub header_crc32: u32,
    pub my_lba: u64,
    pub alternate_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: Uuid,
    pub entry_lba: u64,
    pub num_entries: u32,
    pub entry_size: u32,
    pub entry_array_crc32: u32,
}

impl GptHeader {
    pub fn decode(block: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(block);

        let signature = cursor.read_u64::<LittleEndian>()?;
        if signature != SIGNATURE {
            return Err(Error::decode("GPT signature not found"));
        }

        let revision = cursor.read_u32::<LittleEndian>()?;
        let header_size = cursor.read_u32::<LittleEndian>()?;
        if header_size < HEADER_SIZE || header_size as usize > block.len() {
            return Err(Error::decode(format!(
                "header size {} is outside {}..={}",
                header_size,
                HEADER_SIZE,
                block.len()
            )));
        }

        let header_crc32 = cursor.read_u32::<LittleEndian>()?;
        let _reserved = cursor.read_u32::<LittleEndian>()?;
        let my_lba = cursor.read_u64::<LittleEndian>()?;
        let alternate_lba = cursor.read_u64::<LittleEndian>()?;
        let first_usable_lba = cursor.read_u64::<LittleEndian>()?;
        let last_usable_lba = cursor.read_u64::<LittleEndian>()?;
        let disk_guid = read_guid(&mut cursor)?;
        let entry_lba = cursor.read_u64::<LittleEndian>()?;
        let num_entries = cursor.read_u32::<LittleEndian>()?;
        let entry_size = cursor.read_u32::<LittleEndian>()?;
        let entry_array_crc32 = cursor.read_u32::<LittleEndian>()?;

        debug_assert_eq!(cursor.position(), HEADER_SIZE as u64);

        Ok(Self {
            revision,
            header_size,
            header_crc32,
            my_lba,
            alternate_lba,
            first_usable_lba,
            last_usable_lba,
            disk_guid,
            entry_lba,
            num_entries,
            entry_size,
            entry_array_crc32,
        })
    }

    /// Writes the header over the start of `block`, bytes past `HEADER_SIZE`
    /// are kept, and fills in the header CRC.
    pub fn encode(&self, block: &mut [u8]) -> Result<u32> {
        let header_size = self.header_size as usize;
        assert!(header_size >= HEADER_SIZE as usize && header_size <= block.len());

        let mut cursor = Cursor::new(&mut block[..]);
        cursor.write_u64::<LittleEndian>(SIGNATURE)?;
        cursor.write_u32::<LittleEndian>(self.revision)?;
        cursor.write_u32::<LittleEndian>(self.header_size)?;
        cursor.write_u32::<LittleEndian>(0)?;
        cursor.write_u32::<LittleEndian>(0)?;
        cursor.write_u64::<LittleEndian>(self.my_lba)?;
        cursor.write_u64::<LittleEndian>(self.alternate_lba)?;
        cursor.write_u64::<LittleEndian>(self.first_usable_lba)?;
        cursor.write_u64::<LittleEndian>(self.last_usable_lba)?;
        write_guid(&mut cursor, self.disk_guid)?;
        cursor.write_u64::<LittleEndian>(self.entry_lba)?;
        cursor.write_u32::<LittleEndian>(self.num_entries)?;
        cursor.write_u32::<LittleEndian>(self.entry_size)?;
        cursor.write_u32::<LittleEndian>(self.entry_array_crc32)?;
        debug_assert_eq!(cursor.position(), HEADER_SIZE as u64);

        let crc = crc32::checksum_ieee(&block[..header_size]);
        LittleEndian::write_u32(&mut block[HEADER_CRC_OFFSET..HEADER_CRC_OFFSET + 4], crc);

        Ok(crc)
    }

    pub fn dump(&self) {
        debug!("GPT Header dump:");
        debug!("Revision                       : 0x{:08x}", self.revision);
        debug!("Header Size                    : {}", self.header_size);
        debug!("Header CRC32                   : 0x{:08x}", self.header_crc32);
        debug!("Current LBA                    : {}", self.my_lba);
        debug!("Alternate LBA                  : {}", self.alternate_lba);
        debug!("First Usable LBA               : {}", self.first_usable_lba);
        debug!("Last Usable LBA                : {}", self.last_usable_lba);
        debug!("Disk GUID                      : {{{}}}", self.disk_guid);
        debug!("Partition Table Start          : {}", self.entry_lba);
        debug!("Partition Table Entries Count  : {}", self.num_entries);
        debug!("Partition Table Entry Size     : {}", self.entry_size);
        debug!(
            "Partition Table CRC32          : 0x{:08x}",
            self.entry_array_crc32
        );
    }
}
