//! GUID partition table.
//!
//! Every structure exists twice: the primary header at LBA 1 followed by
//! its entry array, and a backup entry array followed by the backup header
//! in the last block of the device. Modifications always go to the primary
//! copy first.

mod entry;
mod header;
mod partition_type;

pub use entry::GptEntry;
pub use header::GptHeader;
pub use partition_type::GptPartitionType;

use std::cmp::min;

use crc::crc32;
use uuid::Uuid;

use self::entry::ENTRY_SIZE;
use self::header::{HEADER_SIZE, REVISION};
use super::mbr::entry::{set_signature, write_slot, MbrEntry, PT_GPT_PROTECTIVE};
use super::util::{check_free_range, find_free_regions, pick_index};
use super::{
    read_block, write_block, HandleAlloc, LabelFlags, LabelInfo, LabelOps, LabelType,
    PartContent, PartHandle, PartInfo, PartKind, PartSpec, PartType,
};
use crate::disk::BlockDevice;
use crate::region::Region;
use crate::utils::{blocks_for_bytes, is_valid_block_size};
use crate::{Error, Result};

const PRIMARY_HDR_BA: u64 = 1;
const PRIMARY_PTABLE_BA: u64 = 2;
/// Smallest entry array a new label gets.
const MIN_TABLE_BYTES: u64 = 16384;
/// Entry arrays larger than this are not read.
const MAX_TABLE_BYTES: u64 = 16 << 20;

pub const DEFAULT_NUM_ENTRIES: u32 = (MIN_TABLE_BYTES / ENTRY_SIZE as u64) as u32;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TableCopy {
    Primary,
    Backup,
}

impl TableCopy {
    const BOTH: [Self; 2] = [Self::Primary, Self::Backup];

    fn idx(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Backup => 1,
        }
    }
}

#[derive(Debug, Clone)]
struct GptPartition {
    handle: PartHandle,
    index: u32,
    block0: u64,
    nblocks: u64,
    type_guid: Uuid,
    unique_guid: Uuid,
}

impl GptPartition {
    fn info(&self) -> PartInfo {
        PartInfo {
            index: self.index,
            kind: PartKind::Primary,
            block0: self.block0,
            nblocks: self.nblocks,
            hdr_blocks: 0,
            ptype: PartType::Uuid(self.type_guid),
        }
    }

    fn region(&self) -> Region {
        Region::new(self.block0, self.block0 + self.nblocks - 1)
    }
}

pub struct GptLabel {
    block_size: usize,
    usable: Region,
    header_size: u32,
    hdr_ba: [u64; 2],
    ptable_ba: [u64; 2],
    num_entries: u32,
    entry_size: u32,
    pt_blocks: u64,
    disk_guid: Uuid,
    /// Ordered by entry index.
    parts: Vec<GptPartition>,
    handles: HandleAlloc,
}

impl GptLabel {
    pub fn open(disk: &mut dyn BlockDevice) -> Result<Self> {
        let block_size = disk.block_size()?;
        let nblocks = disk.block_count()?;

        if !is_valid_block_size(block_size) {
            return Err(Error::decode(format!("unsupported block size {}", block_size)));
        }
        if nblocks <= PRIMARY_PTABLE_BA {
            return Err(Error::decode(format!("device of {} blocks is too small", nblocks)));
        }

        let primary = GptHeader::decode(&read_block(disk, PRIMARY_HDR_BA, block_size)?)?;
        primary.dump();

        if primary.my_lba != PRIMARY_HDR_BA {
            return Err(Error::decode(format!(
                "primary header claims to be at {}",
                primary.my_lba
            )));
        }
        if primary.alternate_lba <= PRIMARY_HDR_BA || primary.alternate_lba >= nblocks {
            return Err(Error::decode(format!(
                "alternate header LBA {} is not on the device",
                primary.alternate_lba
            )));
        }

        let backup = GptHeader::decode(&read_block(disk, primary.alternate_lba, block_size)?)
            .map_err(|e| Error::decode(format!("backup header: {}", e)))?;
        if backup.my_lba != primary.alternate_lba || backup.alternate_lba != PRIMARY_HDR_BA {
            return Err(Error::decode("backup header does not point back at the primary"));
        }
        if backup.revision != primary.revision
            || backup.header_size != primary.header_size
            || backup.first_usable_lba != primary.first_usable_lba
            || backup.last_usable_lba != primary.last_usable_lba
            || backup.disk_guid != primary.disk_guid
            || backup.num_entries != primary.num_entries
            || backup.entry_size != primary.entry_size
        {
            return Err(Error::decode("primary and backup headers disagree"));
        }

        if primary.num_entries < 1 {
            return Err(Error::decode("empty partition entry array"));
        }
        if primary.entry_size < ENTRY_SIZE {
            return Err(Error::decode(format!(
                "entry size {} is below {}",
                primary.entry_size, ENTRY_SIZE
            )));
        }
        if primary.last_usable_lba < primary.first_usable_lba
            || primary.last_usable_lba >= nblocks
        {
            return Err(Error::decode(format!(
                "invalid usable range {} - {}",
                primary.first_usable_lba, primary.last_usable_lba
            )));
        }

        let table_bytes = u64::from(primary.num_entries) * u64::from(primary.entry_size);
        if table_bytes > MAX_TABLE_BYTES {
            return Err(Error::decode(format!(
                "entry array of {} bytes is too large",
                table_bytes
            )));
        }
        let pt_blocks = blocks_for_bytes(table_bytes, block_size as u64);
        for ba in &[primary.entry_lba, backup.entry_lba] {
            match ba.checked_add(pt_blocks) {
                Some(end) if *ba > 0 && end <= nblocks => (),
                _ => {
                    return Err(Error::decode(format!(
                        "entry array at {} is not on the device",
                        ba
                    )))
                }
            }
        }

        // headers, protective MBR and both entry arrays stay out of reach
        let usable = Region::new(primary.first_usable_lba, primary.last_usable_lba);
        let metadata = [
            Region::new(0, PRIMARY_HDR_BA),
            Region::new(primary.alternate_lba, primary.alternate_lba),
            Region::new(primary.entry_lba, primary.entry_lba + pt_blocks - 1),
            Region::new(backup.entry_lba, backup.entry_lba + pt_blocks - 1),
        ];
        if let Some(r) = metadata.iter().find(|r| r.overlaps(&usable)) {
            return Err(Error::decode(format!(
                "usable region {} overlaps label metadata {}",
                usable, r
            )));
        }

        let mut label = Self {
            block_size,
            usable,
            header_size: primary.header_size,
            hdr_ba: [PRIMARY_HDR_BA, primary.alternate_lba],
            ptable_ba: [primary.entry_lba, backup.entry_lba],
            num_entries: primary.num_entries,
            entry_size: primary.entry_size,
            pt_blocks,
            disk_guid: primary.disk_guid,
            parts: Vec::new(),
            handles: HandleAlloc::default(),
        };

        let table = label.read_table(disk, TableCopy::Primary)?;
        for (index, e) in label.decode_table(&table)? {
            let region = Region::new(e.start_lba, e.end_lba);
            if !region.belongs(&label.usable) {
                return Err(Error::decode(format!(
                    "entry {} {} lies outside usable region {}",
                    index, region, label.usable
                )));
            }
            if let Some(p) = label.parts.iter().find(|p| p.region().overlaps(&region)) {
                return Err(Error::decode(format!(
                    "entry {} {} overlaps with entry {}",
                    index, region, p.index
                )));
            }

            debug!(
                "{:>5} {} {{{}}} ({:?}) {{{}}} {:?}",
                index,
                region,
                e.type_guid,
                GptPartitionType::from_guid(&e.type_guid),
                e.unique_guid,
                e.name
            );

            let handle = label.handles.alloc();
            label.parts.push(GptPartition {
                handle,
                index,
                block0: region.start(),
                nblocks: region.size(),
                type_guid: e.type_guid,
                unique_guid: e.unique_guid,
            });
        }

        Ok(label)
    }

    pub fn create(disk: &mut dyn BlockDevice) -> Result<Self> {
        Self::create_ex(disk, DEFAULT_NUM_ENTRIES)
    }

    pub fn create_ex(disk: &mut dyn BlockDevice, num_entries: u32) -> Result<Self> {
        let block_size = disk.block_size()?;
        let nblocks = disk.block_count()?;

        if !is_valid_block_size(block_size) {
            return Err(Error::invalid(format!("unsupported block size {}", block_size)));
        }
        if num_entries == 0 {
            return Err(Error::invalid("entry array must hold at least one entry"));
        }
        let table_bytes = u64::from(num_entries) * u64::from(ENTRY_SIZE);
        if table_bytes > MAX_TABLE_BYTES {
            return Err(Error::invalid(format!("{} entries are too many", num_entries)));
        }

        let pt_blocks = blocks_for_bytes(table_bytes, block_size as u64);
        if nblocks <= 3 + 2 * pt_blocks {
            return Err(Error::invalid(format!(
                "device of {} blocks is too small for a GPT",
                nblocks
            )));
        }

        let backup_ptable_ba = nblocks - 1 - pt_blocks;
        let label = Self {
            block_size,
            usable: Region::new(PRIMARY_PTABLE_BA + pt_blocks, backup_ptable_ba - 1),
            header_size: HEADER_SIZE,
            hdr_ba: [PRIMARY_HDR_BA, nblocks - 1],
            ptable_ba: [PRIMARY_PTABLE_BA, backup_ptable_ba],
            num_entries,
            entry_size: ENTRY_SIZE,
            pt_blocks,
            disk_guid: Uuid::new_v4(),
            parts: Vec::new(),
            handles: HandleAlloc::default(),
        };

        label.write_pmbr(disk, nblocks)?;

        let table = vec![0u8; pt_blocks as usize * block_size];
        let table_crc = label.table_crc(&table);
        for copy in TableCopy::BOTH.iter().copied() {
            disk.write_blocks(label.ptable_ba[copy.idx()], pt_blocks as usize, &table)?;
            label.write_header(disk, copy, table_crc)?;
        }

        info!(
            "created GPT {{{}}} with {} entries, usable {}",
            label.disk_guid, num_entries, label.usable
        );
        Ok(label)
    }

    /// Protective MBR covering the whole device.
    fn write_pmbr(&self, disk: &mut dyn BlockDevice, nblocks: u64) -> Result<()> {
        let mut block = vec![0u8; self.block_size];
        let length = min(nblocks - 1, u64::from(u32::MAX)) as u32;
        write_slot(
            &mut block,
            0,
            &MbrEntry::new(PT_GPT_PROTECTIVE, PRIMARY_HDR_BA as u32, length),
        )?;
        set_signature(&mut block);
        write_block(disk, 0, &block)
    }

    fn header(&self, copy: TableCopy, table_crc: u32) -> GptHeader {
        let i = copy.idx();
        GptHeader {
            revision: REVISION,
            header_size: self.header_size,
            header_crc32: 0,
            my_lba: self.hdr_ba[i],
            alternate_lba: self.hdr_ba[1 - i],
            first_usable_lba: self.usable.start(),
            last_usable_lba: self.usable.end(),
            disk_guid: self.disk_guid,
            entry_lba: self.ptable_ba[i],
            num_entries: self.num_entries,
            entry_size: self.entry_size,
            entry_array_crc32: table_crc,
        }
    }

    /// Read-modify-write of a header block, so that anything past the
    /// header itself is preserved.
    fn write_header(&self, disk: &mut dyn BlockDevice, copy: TableCopy, table_crc: u32) -> Result<()> {
        let ba = self.hdr_ba[copy.idx()];
        let mut block = read_block(disk, ba, self.block_size)?;
        self.header(copy, table_crc).encode(&mut block)?;
        write_block(disk, ba, &block)
    }

    fn read_table(&self, disk: &mut dyn BlockDevice, copy: TableCopy) -> Result<Vec<u8>> {
        let mut table = vec![0u8; self.pt_blocks as usize * self.block_size];
        disk.read_blocks(self.ptable_ba[copy.idx()], self.pt_blocks as usize, &mut table)?;
        Ok(table)
    }

    fn table_crc(&self, table: &[u8]) -> u32 {
        crc32::checksum_ieee(&table[..self.num_entries as usize * self.entry_size as usize])
    }

    /// Used entries of an entry array, with their 1-based indices.
    fn decode_table(&self, table: &[u8]) -> Result<Vec<(u32, GptEntry)>> {
        let entry_size = self.entry_size as usize;
        let mut entries = Vec::new();

        for (i, raw) in table
            .chunks_exact(entry_size)
            .take(self.num_entries as usize)
            .enumerate()
        {
            let e = GptEntry::decode(raw)?;
            if !e.is_used() {
                continue;
            }
            if e.end_lba < e.start_lba {
                return Err(Error::decode(format!(
                    "entry {} ends at {} before it starts at {}",
                    i + 1,
                    e.end_lba,
                    e.start_lba
                )));
            }
            entries.push((i as u32 + 1, e));
        }

        Ok(entries)
    }

    /// Updates entry `index` in both copies, `None` clears it.
    fn pte_update(&self, disk: &mut dyn BlockDevice, index: u32, e: Option<&GptEntry>) -> Result<()> {
        let bs = self.block_size;
        let offset = (index as usize - 1) * self.entry_size as usize;
        let end = offset + self.entry_size as usize;
        let first = offset / bs;
        let last = (end - 1) / bs;

        for copy in TableCopy::BOTH.iter().copied() {
            let mut table = self.read_table(disk, copy)?;

            let raw = &mut table[offset..end];
            match e {
                Some(e) => e.encode(raw)?,
                None => {
                    for x in raw.iter_mut() {
                        *x = 0;
                    }
                }
            }

            disk.write_blocks(
                self.ptable_ba[copy.idx()] + first as u64,
                last - first + 1,
                &table[first * bs..(last + 1) * bs],
            )?;
            self.write_header(disk, copy, self.table_crc(&table))?;
        }

        Ok(())
    }

    /// Decodes one copy of the entry array on its own.
    pub fn read_table_copy(&self, disk: &mut dyn BlockDevice, copy: TableCopy) -> Result<Vec<PartInfo>> {
        let table = self.read_table(disk, copy)?;

        Ok(self
            .decode_table(&table)?
            .into_iter()
            .map(|(index, e)| PartInfo {
                index,
                kind: PartKind::Primary,
                block0: e.start_lba,
                nblocks: e.end_lba - e.start_lba + 1,
                hdr_blocks: 0,
                ptype: PartType::Uuid(e.type_guid),
            })
            .collect())
    }

    pub fn disk_guid(&self) -> Uuid {
        self.disk_guid
    }

    /// Unique GUID of a partition.
    pub fn part_guid(&self, part: PartHandle) -> Option<Uuid> {
        self.find(part).map(|p| p.unique_guid)
    }

    fn find(&self, part: PartHandle) -> Option<&GptPartition> {
        self.parts.iter().find(|p| p.handle == part)
    }
}

impl LabelOps for GptLabel {
    fn info(&self) -> LabelInfo {
        let mut flags = LabelFlags::PTYPE_UUID;

        if self.parts.len() < self.num_entries as usize {
            flags |= LabelFlags::CAN_CREATE_PRI;
        }
        if !self.parts.is_empty() {
            flags |= LabelFlags::CAN_DELETE_PART;
        }

        LabelInfo {
            ltype: LabelType::Gpt,
            flags,
            ablock0: self.usable.start(),
            anblocks: self.usable.size(),
        }
    }

    fn handles(&self) -> Vec<PartHandle> {
        self.parts.iter().map(|p| p.handle).collect()
    }

    fn part_info(&self, part: PartHandle) -> Option<PartInfo> {
        self.find(part).map(|p| p.info())
    }

    fn part_create(&mut self, disk: &mut dyn BlockDevice, spec: &PartSpec) -> Result<PartHandle> {
        if spec.kind != PartKind::Primary {
            return Err(Error::invalid(format!(
                "GPT does not support {:?} partitions",
                spec.kind
            )));
        }

        let type_guid = match spec.ptype {
            PartType::Uuid(x) if !x.is_nil() => x,
            PartType::Uuid(_) => return Err(Error::invalid("nil partition type")),
            PartType::Num(_) => return Err(Error::invalid("GPT partition types are GUIDs")),
        };

        let index = pick_index(spec.index, self.num_entries, self.parts.iter().map(|p| p.index))?;
        let region = check_free_range(
            spec.block0,
            spec.nblocks,
            self.usable,
            self.parts.iter().map(|p| p.region()),
        )?;

        let e = GptEntry {
            type_guid,
            unique_guid: Uuid::new_v4(),
            start_lba: region.start(),
            end_lba: region.end(),
            attributes: 0,
            name: String::new(),
        };
        self.pte_update(disk, index, Some(&e))?;

        info!("created partition {} at {} {{{}}}", index, region, e.unique_guid);

        let part = GptPartition {
            handle: self.handles.alloc(),
            index,
            block0: region.start(),
            nblocks: region.size(),
            type_guid,
            unique_guid: e.unique_guid,
        };
        let handle = part.handle;
        let pos = self
            .parts
            .iter()
            .position(|p| p.index > index)
            .unwrap_or_else(|| self.parts.len());
        self.parts.insert(pos, part);
        Ok(handle)
    }

    fn part_destroy(&mut self, disk: &mut dyn BlockDevice, part: PartHandle) -> Result<()> {
        let pos = self
            .parts
            .iter()
            .position(|p| p.handle == part)
            .ok_or_else(|| Error::invalid("no such partition"))?;

        let index = self.parts[pos].index;
        self.pte_update(disk, index, None)?;
        info!("destroyed partition {}", index);

        self.parts.remove(pos);
        Ok(())
    }

    fn destroy(&mut self, disk: &mut dyn BlockDevice) -> Result<()> {
        if !self.parts.is_empty() {
            return Err(Error::NotEmpty);
        }

        let zero = vec![0u8; self.block_size];
        for copy in TableCopy::BOTH.iter().copied() {
            write_block(disk, self.hdr_ba[copy.idx()], &zero)?;
        }
        write_block(disk, 0, &zero)?;

        info!("destroyed GPT {{{}}}", self.disk_guid);
        Ok(())
    }

    fn suggest_ptype(&self, pcnt: PartContent) -> Result<PartType> {
        let t = match pcnt {
            PartContent::Fat12_16 | PartContent::Exfat | PartContent::Fat32 => {
                GptPartitionType::MicrosoftBasicData
            }
            PartContent::Ext4 => GptPartitionType::LinuxFilesystem,
            PartContent::Minix => GptPartitionType::Minix,
        };

        Ok(PartType::Uuid(t.to_guid()))
    }

    fn free_ranges(&self, kind: PartKind) -> Vec<Region> {
        match kind {
            PartKind::Primary => {
                find_free_regions(self.usable, &mut self.parts.iter().map(|p| p.region()))
            }
            PartKind::Extended | PartKind::Logical => Vec::new(),
        }
    }
}
