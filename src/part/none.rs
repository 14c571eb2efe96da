use super::{
    HandleAlloc, LabelFlags, LabelInfo, LabelOps, LabelType, PartContent, PartHandle, PartInfo,
    PartKind, PartSpec, PartType,
};
use crate::disk::BlockDevice;
use crate::region::Region;
use crate::{Error, Result};

/// Device without a recognized partition table, presented as a single
/// partition covering all of it.
pub struct NoneLabel {
    nblocks: u64,
    handle: PartHandle,
}

impl NoneLabel {
    pub fn open(disk: &mut dyn BlockDevice) -> Result<Self> {
        let block_size = disk.block_size()?;
        let nblocks = disk.block_count()?;
        debug!("whole disk: {} blocks of {} bytes", nblocks, block_size);

        Ok(Self {
            nblocks,
            handle: HandleAlloc::default().alloc(),
        })
    }
}

impl LabelOps for NoneLabel {
    fn info(&self) -> LabelInfo {
        LabelInfo {
            ltype: LabelType::None,
            flags: LabelFlags::empty(),
            ablock0: 0,
            anblocks: self.nblocks,
        }
    }

    fn handles(&self) -> Vec<PartHandle> {
        vec![self.handle]
    }

    fn part_info(&self, part: PartHandle) -> Option<PartInfo> {
        if part != self.handle {
            return None;
        }

        Some(PartInfo {
            index: 0,
            kind: PartKind::Primary,
            block0: 0,
            nblocks: self.nblocks,
            hdr_blocks: 0,
            ptype: PartType::Num(0),
        })
    }

    fn part_create(&mut self, _disk: &mut dyn BlockDevice, _spec: &PartSpec) -> Result<PartHandle> {
        Err(Error::NotSupported)
    }

    fn part_destroy(&mut self, _disk: &mut dyn BlockDevice, _part: PartHandle) -> Result<()> {
        Err(Error::NotSupported)
    }

    fn destroy(&mut self, _disk: &mut dyn BlockDevice) -> Result<()> {
        Err(Error::NotSupported)
    }

    fn suggest_ptype(&self, _pcnt: PartContent) -> Result<PartType> {
        Err(Error::NotSupported)
    }

    fn free_ranges(&self, _kind: PartKind) -> Vec<Region> {
        Vec::new()
    }
}
