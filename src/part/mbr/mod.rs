//! DOS partition table.
//!
//! Four primary slots live in block 0. At most one of them may be an
//! extended partition, which holds a singly linked chain of extended boot
//! records (EBRs), one in front of every logical partition.

pub(crate) mod entry;

use std::cmp::min;
use std::convert::TryFrom;

use self::entry::*;
use super::util::{check_free_range, find_free_regions, pick_index};
use super::{
    read_block, write_block, HandleAlloc, LabelFlags, LabelInfo, LabelOps, LabelType,
    PartContent, PartHandle, PartInfo, PartKind, PartSpec, PartType,
};
use crate::disk::BlockDevice;
use crate::region::Region;
use crate::utils::is_valid_block_size;
use crate::{Error, Result};

const MBR_BA: u64 = 0;
pub const NUM_PRIMARY: u32 = 4;
/// Index given to the first logical partition.
pub const FIRST_LOGICAL: u32 = NUM_PRIMARY + 1;

const EBR_PTE_THIS: usize = 0;
const EBR_PTE_NEXT: usize = 1;

const MBR_ABLOCK0: u64 = 1;
/// Highest block count a 32-bit LBA can describe.
const MAX_BLOCKS: u64 = 1 << 32;

#[derive(Debug, Clone)]
struct MbrPartition {
    handle: PartHandle,
    index: u32,
    kind: PartKind,
    block0: u64,
    nblocks: u64,
    hdr_blocks: u64,
    ptype: u8,
}

impl MbrPartition {
    fn info(&self) -> PartInfo {
        PartInfo {
            index: self.index,
            kind: self.kind,
            block0: self.block0,
            nblocks: self.nblocks,
            hdr_blocks: self.hdr_blocks,
            ptype: PartType::Num(self.ptype),
        }
    }

    fn region(&self) -> Region {
        Region::new(self.block0, self.block0 + self.nblocks - 1)
    }

    /// Data blocks plus the header blocks in front of them.
    fn span(&self) -> Region {
        Region::new(self.block0 - self.hdr_blocks, self.block0 + self.nblocks - 1)
    }
}

pub struct MbrLabel {
    block_size: usize,
    usable: Region,
    /// Primary and extended partitions, ordered by slot.
    primary: Vec<MbrPartition>,
    /// Logical partitions, ordered by address.
    logical: Vec<MbrPartition>,
    handles: HandleAlloc,
}

impl MbrLabel {
    pub fn open(disk: &mut dyn BlockDevice) -> Result<Self> {
        let block_size = disk.block_size()?;
        let nblocks = disk.block_count()?;

        if !is_valid_block_size(block_size) {
            return Err(Error::decode(format!("unsupported block size {}", block_size)));
        }
        if nblocks <= MBR_ABLOCK0 {
            return Err(Error::decode(format!("device of {} blocks is too small", nblocks)));
        }

        let block = read_block(disk, MBR_BA, block_size)?;
        if !has_signature(&block) {
            return Err(Error::decode("boot record signature not found"));
        }
        if let Some(fs) = foreign_fs_signature(&block) {
            return Err(Error::decode(format!("block 0 is a {} boot sector", fs)));
        }

        let mut label = Self::new(block_size, nblocks);
        // existing slots may reach past the 32-bit limit new ones are held to
        let device = Region::new(MBR_ABLOCK0, nblocks - 1);

        for i in 0..NUM_PRIMARY as usize {
            let e = read_slot(&block, i)?;
            if e.is_unused() {
                continue;
            }
            if e.ptype == PT_GPT_PROTECTIVE {
                return Err(Error::decode(format!("slot {} is a GPT protective entry", i + 1)));
            }

            let kind = if is_extended_type(e.ptype) {
                if label.extended().is_some() {
                    return Err(Error::decode("more than one extended partition"));
                }
                PartKind::Extended
            } else {
                PartKind::Primary
            };

            let region = Region::from_extent(e.first_lba.into(), e.length.into())
                .ok_or_else(|| Error::decode(format!("slot {} has an invalid extent", i + 1)))?;
            if !region.belongs(&device) {
                return Err(Error::decode(format!(
                    "slot {} {} lies outside the device {}",
                    i + 1,
                    region,
                    device
                )));
            }
            if let Some(p) = label.primary.iter().find(|p| p.region().overlaps(&region)) {
                return Err(Error::decode(format!(
                    "slot {} {} overlaps with slot {}",
                    i + 1,
                    region,
                    p.index
                )));
            }

            debug!("slot {}: type {:#04x} {}", i + 1, e.ptype, region);
            let handle = label.handles.alloc();
            label.primary.push(MbrPartition {
                handle,
                index: i as u32 + 1,
                kind,
                block0: region.start(),
                nblocks: region.size(),
                hdr_blocks: 0,
                ptype: e.ptype,
            });
        }

        if let Some(ext) = label.extended().cloned() {
            label.open_ext(disk, &ext)?;
        }

        Ok(label)
    }

    /// Walks the EBR chain of the extended partition.
    fn open_ext(&mut self, disk: &mut dyn BlockDevice, ext: &MbrPartition) -> Result<()> {
        let ext_region = ext.region();
        let mut ebr_b0 = ext.block0;
        let mut max = ext.nblocks;

        loop {
            let block = read_block(disk, ebr_b0, self.block_size)?;
            if !has_signature(&block) {
                return Err(Error::decode(format!("EBR at {} has no signature", ebr_b0)));
            }

            let this = read_slot(&block, EBR_PTE_THIS)?;
            if this.is_unused() {
                break;
            }
            if this.first_lba == 0 {
                return Err(Error::decode(format!(
                    "logical partition at {} overlaps its EBR",
                    ebr_b0
                )));
            }
            if is_extended_type(this.ptype) {
                return Err(Error::decode(format!("nested extended partition at {}", ebr_b0)));
            }

            let block0 = ebr_b0 + u64::from(this.first_lba);
            let nblocks = u64::from(this.length);
            if block0 + nblocks > ebr_b0 + max {
                return Err(Error::decode(format!(
                    "logical partition {}+{} exceeds the extent of its EBR at {}",
                    block0, nblocks, ebr_b0
                )));
            }

            debug!(
                "EBR at {}: type {:#04x} {}+{}",
                ebr_b0, this.ptype, block0, nblocks
            );
            let handle = self.handles.alloc();
            self.logical.push(MbrPartition {
                handle,
                index: 0,
                kind: PartKind::Logical,
                block0,
                nblocks,
                hdr_blocks: u64::from(this.first_lba),
                ptype: this.ptype,
            });

            let next = read_slot(&block, EBR_PTE_NEXT)?;
            if next.is_unused() {
                break;
            }

            let next_b0 = ext.block0 + u64::from(next.first_lba);
            let next_end = next_b0 + u64::from(next.length) - 1;
            if next_b0 < block0 + nblocks || next_end > ext_region.end() {
                return Err(Error::decode(format!(
                    "EBR at {} links to invalid extent {}+{}",
                    ebr_b0, next_b0, next.length
                )));
            }

            ebr_b0 = next_b0;
            max = u64::from(next.length);
        }

        self.renumber();
        Ok(())
    }

    pub fn create(disk: &mut dyn BlockDevice) -> Result<Self> {
        let block_size = disk.block_size()?;
        let nblocks = disk.block_count()?;

        if !is_valid_block_size(block_size) {
            return Err(Error::invalid(format!("unsupported block size {}", block_size)));
        }
        if nblocks <= MBR_ABLOCK0 {
            return Err(Error::invalid(format!("device of {} blocks is too small", nblocks)));
        }

        let mut block = vec![0u8; block_size];
        set_signature(&mut block);
        write_block(disk, MBR_BA, &block)?;

        Ok(Self::new(block_size, nblocks))
    }

    fn new(block_size: usize, nblocks: u64) -> Self {
        Self {
            block_size,
            usable: Region::new(MBR_ABLOCK0, min(nblocks, MAX_BLOCKS) - 1),
            primary: Vec::new(),
            logical: Vec::new(),
            handles: HandleAlloc::default(),
        }
    }

    fn extended(&self) -> Option<&MbrPartition> {
        self.primary.iter().find(|p| p.kind == PartKind::Extended)
    }

    fn find(&self, part: PartHandle) -> Option<&MbrPartition> {
        self.primary
            .iter()
            .chain(self.logical.iter())
            .find(|p| p.handle == part)
    }

    fn renumber(&mut self) {
        for (i, p) in self.logical.iter_mut().enumerate() {
            p.index = FIRST_LOGICAL + i as u32;
        }
    }

    /// Address of the EBR describing the logical partition at `pos`.
    fn ebr_ba(&self, pos: usize, ext: &MbrPartition) -> u64 {
        if pos == 0 {
            ext.block0
        } else {
            let p = &self.logical[pos];
            p.block0 - p.hdr_blocks
        }
    }

    fn encode_ebr(
        &self,
        ebr_ba: u64,
        this: Option<&MbrPartition>,
        next: Option<&MbrPartition>,
        ext: &MbrPartition,
    ) -> Result<Vec<u8>> {
        let mut block = vec![0u8; self.block_size];

        if let Some(p) = this {
            let e = MbrEntry::new(p.ptype, lba32(p.block0 - ebr_ba)?, lba32(p.nblocks)?);
            write_slot(&mut block, EBR_PTE_THIS, &e)?;
        }

        if let Some(n) = next {
            let e = MbrEntry::new(
                PT_EXTENDED,
                lba32(n.block0 - n.hdr_blocks - ext.block0)?,
                lba32(n.hdr_blocks + n.nblocks)?,
            );
            write_slot(&mut block, EBR_PTE_NEXT, &e)?;
        }

        set_signature(&mut block);
        Ok(block)
    }

    fn write_ebr(
        &self,
        disk: &mut dyn BlockDevice,
        ebr_ba: u64,
        this: Option<&MbrPartition>,
        next: Option<&MbrPartition>,
        ext: &MbrPartition,
    ) -> Result<()> {
        let block = self.encode_ebr(ebr_ba, this, next, ext)?;
        debug!(
            "writing EBR at {}: this {:?}, next {:?}",
            ebr_ba,
            this.map(|p| p.block0),
            next.map(|p| p.block0)
        );
        write_block(disk, ebr_ba, &block)
    }

    /// Read-modify-write of one primary slot.
    fn write_pte(&self, disk: &mut dyn BlockDevice, index: u32, e: &MbrEntry) -> Result<()> {
        let mut block = read_block(disk, MBR_BA, self.block_size)?;
        write_slot(&mut block, index as usize - 1, e)?;
        write_block(disk, MBR_BA, &block)
    }

    fn create_primary(&mut self, disk: &mut dyn BlockDevice, spec: &PartSpec) -> Result<PartHandle> {
        let extended = spec.kind == PartKind::Extended;

        let ptype = if extended {
            if self.extended().is_some() {
                return Err(Error::invalid("an extended partition already exists"));
            }
            PT_EXTENDED_LBA
        } else {
            data_ptype(spec.ptype)?
        };

        let index = pick_index(spec.index, NUM_PRIMARY, self.primary.iter().map(|p| p.index))?;
        check_free_range(
            spec.block0,
            spec.nblocks,
            self.usable,
            self.primary.iter().map(|p| p.region()),
        )?;

        let entry = MbrEntry::new(ptype, lba32(spec.block0)?, lba32(spec.nblocks)?);

        let part = MbrPartition {
            handle: self.handles.alloc(),
            index,
            kind: spec.kind,
            block0: spec.block0,
            nblocks: spec.nblocks,
            hdr_blocks: 0,
            ptype,
        };

        if extended {
            // the chain must be valid before anything points at it
            self.write_ebr(disk, part.block0, None, None, &part)?;
        }
        self.write_pte(disk, index, &entry)?;

        info!(
            "created {:?} partition {} at {}",
            part.kind,
            part.index,
            part.region()
        );

        let handle = part.handle;
        let pos = self
            .primary
            .iter()
            .position(|p| p.index > index)
            .unwrap_or_else(|| self.primary.len());
        self.primary.insert(pos, part);
        Ok(handle)
    }

    fn create_logical(&mut self, disk: &mut dyn BlockDevice, spec: &PartSpec) -> Result<PartHandle> {
        let ext = self
            .extended()
            .cloned()
            .ok_or_else(|| Error::invalid("no extended partition"))?;

        if spec.hdr_blocks == 0 {
            return Err(Error::invalid("logical partition needs room for its EBR"));
        }
        if spec.nblocks == 0 {
            return Err(Error::invalid("empty partition"));
        }
        let span_b0 = spec
            .block0
            .checked_sub(spec.hdr_blocks)
            .ok_or_else(|| Error::invalid("header blocks reach below block 0"))?;
        let span_len = spec
            .hdr_blocks
            .checked_add(spec.nblocks)
            .ok_or_else(|| Error::invalid("partition size overflows"))?;
        let ptype = data_ptype(spec.ptype)?;

        check_free_range(
            span_b0,
            span_len,
            ext.region(),
            self.logical.iter().map(|p| p.span()),
        )?;
        lba32(span_len)?;

        let new = MbrPartition {
            handle: self.handles.alloc(),
            index: 0,
            kind: PartKind::Logical,
            block0: spec.block0,
            nblocks: spec.nblocks,
            hdr_blocks: spec.hdr_blocks,
            ptype,
        };

        let pos = self
            .logical
            .iter()
            .position(|p| p.block0 > new.block0)
            .unwrap_or_else(|| self.logical.len());

        if pos == 0 {
            if let Some(old) = self.logical.first() {
                // former head moves out of the canonical head address
                self.write_ebr(
                    disk,
                    old.block0 - old.hdr_blocks,
                    Some(old),
                    self.logical.get(1),
                    &ext,
                )?;
            }
            self.write_ebr(disk, ext.block0, Some(&new), self.logical.first(), &ext)?;
        } else {
            self.write_ebr(disk, span_b0, Some(&new), self.logical.get(pos), &ext)?;
            let prev = &self.logical[pos - 1];
            self.write_ebr(disk, self.ebr_ba(pos - 1, &ext), Some(prev), Some(&new), &ext)?;
        }

        let handle = new.handle;
        self.logical.insert(pos, new);
        self.renumber();

        info!(
            "created logical partition {} at {}",
            self.logical[pos].index,
            self.logical[pos].region()
        );
        Ok(handle)
    }

    fn destroy_primary(&mut self, disk: &mut dyn BlockDevice, pos: usize) -> Result<()> {
        let part = &self.primary[pos];

        if part.kind == PartKind::Extended && !self.logical.is_empty() {
            return Err(Error::NotEmpty);
        }

        self.write_pte(disk, part.index, &MbrEntry::default())?;
        info!("destroyed {:?} partition {}", part.kind, part.index);

        self.primary.remove(pos);
        Ok(())
    }

    fn destroy_logical(&mut self, disk: &mut dyn BlockDevice, pos: usize) -> Result<()> {
        let ext = self
            .extended()
            .cloned()
            .ok_or_else(|| Error::decode("logical partition without extended partition"))?;

        if pos == 0 {
            // successor's EBR takes over the canonical head address
            self.write_ebr(
                disk,
                ext.block0,
                self.logical.get(1),
                self.logical.get(2),
                &ext,
            )?;
        } else {
            let prev = &self.logical[pos - 1];
            self.write_ebr(
                disk,
                self.ebr_ba(pos - 1, &ext),
                Some(prev),
                self.logical.get(pos + 1),
                &ext,
            )?;
        }

        // the chain no longer reaches the partition once its predecessor
        // is relinked
        let removed = self.logical.remove(pos);
        self.renumber();
        info!("destroyed logical partition {}", removed.index);

        if pos > 0 {
            let ebr_ba = removed.block0 - removed.hdr_blocks;
            if let Err(e) = write_block(disk, ebr_ba, &vec![0u8; self.block_size]) {
                warn!("failed to erase unlinked EBR at {}: {}", ebr_ba, e);
            }
        }
        Ok(())
    }
}

impl LabelOps for MbrLabel {
    fn info(&self) -> LabelInfo {
        let mut flags = LabelFlags::EXT_SUPP;

        if self.primary.len() < NUM_PRIMARY as usize {
            flags |= LabelFlags::CAN_CREATE_PRI;
            if self.extended().is_none() {
                flags |= LabelFlags::CAN_CREATE_EXT;
            }
        }
        if self.extended().is_some() {
            flags |= LabelFlags::CAN_CREATE_LOG;
        }
        if !self.primary.is_empty() {
            flags |= LabelFlags::CAN_DELETE_PART;
        }

        LabelInfo {
            ltype: LabelType::Mbr,
            flags,
            ablock0: self.usable.start(),
            anblocks: self.usable.size(),
        }
    }

    fn handles(&self) -> Vec<PartHandle> {
        self.primary
            .iter()
            .chain(self.logical.iter())
            .map(|p| p.handle)
            .collect()
    }

    fn part_info(&self, part: PartHandle) -> Option<PartInfo> {
        self.find(part).map(|p| p.info())
    }

    fn part_create(&mut self, disk: &mut dyn BlockDevice, spec: &PartSpec) -> Result<PartHandle> {
        match spec.kind {
            PartKind::Primary | PartKind::Extended => self.create_primary(disk, spec),
            PartKind::Logical => self.create_logical(disk, spec),
        }
    }

    fn part_destroy(&mut self, disk: &mut dyn BlockDevice, part: PartHandle) -> Result<()> {
        if let Some(pos) = self.primary.iter().position(|p| p.handle == part) {
            return self.destroy_primary(disk, pos);
        }

        match self.logical.iter().position(|p| p.handle == part) {
            Some(pos) => self.destroy_logical(disk, pos),
            None => Err(Error::invalid("no such partition")),
        }
    }

    fn destroy(&mut self, disk: &mut dyn BlockDevice) -> Result<()> {
        if !self.primary.is_empty() {
            return Err(Error::NotEmpty);
        }

        write_block(disk, MBR_BA, &vec![0u8; self.block_size])?;
        info!("destroyed MBR label");
        Ok(())
    }

    fn suggest_ptype(&self, pcnt: PartContent) -> Result<PartType> {
        let ptype = match pcnt {
            PartContent::Fat12_16 => 0x0E,
            PartContent::Exfat => 0x07,
            PartContent::Fat32 => 0x0C,
            PartContent::Ext4 => 0x83,
            PartContent::Minix => 0x81,
        };

        Ok(PartType::Num(ptype))
    }

    fn free_ranges(&self, kind: PartKind) -> Vec<Region> {
        match kind {
            PartKind::Primary | PartKind::Extended => {
                find_free_regions(self.usable, &mut self.primary.iter().map(|p| p.region()))
            }
            PartKind::Logical => match self.extended() {
                Some(ext) => {
                    find_free_regions(ext.region(), &mut self.logical.iter().map(|p| p.span()))
                }
                None => Vec::new(),
            },
        }
    }
}

fn lba32(v: u64) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::invalid(format!("{} does not fit into 32 bits", v)))
}

/// Type of a partition holding data, extended codes are not accepted.
fn data_ptype(ptype: PartType) -> Result<u8> {
    match ptype {
        PartType::Num(0) => Err(Error::invalid("partition type 0 marks an unused slot")),
        PartType::Num(x) if is_extended_type(x) => Err(Error::invalid(format!(
            "type {:#04x} is reserved for extended partitions",
            x
        ))),
        PartType::Num(x) => Ok(x),
        PartType::Uuid(_) => Err(Error::invalid("MBR partition types are numeric")),
    }
}
