pub mod gpt;
pub mod mbr;
pub mod none;
mod util;

use crate::disk::BlockDevice;
use crate::region::Region;
use crate::{Error, Result};
use uuid::Uuid;

pub use gpt::{GptLabel, TableCopy};
pub use mbr::MbrLabel;
pub use none::NoneLabel;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LabelType {
    /// No recognized partition table, the whole disk is one pseudo partition.
    None,
    Mbr,
    Gpt,
}

bitflags! {
    pub struct LabelFlags: u32 {
        /// Label supports extended (and logical) partitions.
        const EXT_SUPP = 0x01;
        const CAN_CREATE_PRI = 0x02;
        const CAN_CREATE_EXT = 0x04;
        const CAN_CREATE_LOG = 0x08;
        const CAN_DELETE_PART = 0x10;
        const CAN_MODIFY_PART = 0x20;
        /// Partition types are GUIDs rather than numbers.
        const PTYPE_UUID = 0x40;
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LabelInfo {
    pub ltype: LabelType,
    pub flags: LabelFlags,
    /// First block available for partitions.
    pub ablock0: u64,
    /// Number of blocks available for partitions.
    pub anblocks: u64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PartKind {
    Primary,
    Extended,
    Logical,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PartType {
    Num(u8),
    Uuid(Uuid),
}

/// What a new partition is going to hold, used to pick a type.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PartContent {
    Fat12_16,
    Exfat,
    Fat32,
    Ext4,
    Minix,
}

/// Request for a new partition.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PartSpec {
    /// 1-based slot/entry index, `0` picks the lowest free one. Ignored
    /// for logical partitions, whose index follows from their address.
    pub index: u32,
    pub block0: u64,
    pub nblocks: u64,
    /// Blocks reserved in front of a logical partition for its EBR.
    pub hdr_blocks: u64,
    pub kind: PartKind,
    /// Ignored for extended partitions.
    pub ptype: PartType,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PartInfo {
    pub index: u32,
    pub kind: PartKind,
    pub block0: u64,
    pub nblocks: u64,
    pub hdr_blocks: u64,
    pub ptype: PartType,
}

/// Stable identity of a partition within one label.
///
/// Unlike the index, which is renumbered for logical partitions, a handle
/// keeps referring to the same partition until it is destroyed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PartHandle(u64);

#[derive(Debug, Default)]
pub(crate) struct HandleAlloc {
    next: u64,
}

impl HandleAlloc {
    pub(crate) fn alloc(&mut self) -> PartHandle {
        self.next += 1;
        PartHandle(self.next)
    }
}

/// Operations every label engine provides. Engines never own the device,
/// it is lent to them per call by `Label`.
pub(crate) trait LabelOps {
    fn info(&self) -> LabelInfo;
    /// Handles in iteration order.
    fn handles(&self) -> Vec<PartHandle>;
    fn part_info(&self, part: PartHandle) -> Option<PartInfo>;
    fn part_create(&mut self, disk: &mut dyn BlockDevice, spec: &PartSpec) -> Result<PartHandle>;
    fn part_destroy(&mut self, disk: &mut dyn BlockDevice, part: PartHandle) -> Result<()>;
    /// Erases the top-level on-disk structures. Must refuse with
    /// `Error::NotEmpty` while partitions exist.
    fn destroy(&mut self, disk: &mut dyn BlockDevice) -> Result<()>;
    fn suggest_ptype(&self, pcnt: PartContent) -> Result<PartType>;
    fn free_ranges(&self, kind: PartKind) -> Vec<Region>;
}

enum Engine {
    None(NoneLabel),
    Mbr(MbrLabel),
    Gpt(GptLabel),
}

impl Engine {
    fn ops(&self) -> &dyn LabelOps {
        match self {
            Self::None(l) => l,
            Self::Mbr(l) => l,
            Self::Gpt(l) => l,
        }
    }

    fn ops_mut(&mut self) -> &mut dyn LabelOps {
        match self {
            Self::None(l) => l,
            Self::Mbr(l) => l,
            Self::Gpt(l) => l,
        }
    }
}

/// Partitioning scheme of one device.
///
/// The label owns the device for its whole lifetime; `close` and `destroy`
/// hand it back.
pub struct Label<D: BlockDevice> {
    disk: D,
    engine: Engine,
}

impl<D: BlockDevice> Label<D> {
    /// Opens whatever label is on the device, trying GPT, then MBR and
    /// finally falling back to a whole-disk pseudo label.
    pub fn open(mut disk: D) -> Result<Self> {
        match GptLabel::open(&mut disk) {
            Ok(l) => return Ok(Self::new(disk, Engine::Gpt(l))),
            Err(e) => debug!("not a GPT label: {}", e),
        }

        match MbrLabel::open(&mut disk) {
            Ok(l) => return Ok(Self::new(disk, Engine::Mbr(l))),
            Err(e) => debug!("not an MBR label: {}", e),
        }

        let l = NoneLabel::open(&mut disk)?;
        Ok(Self::new(disk, Engine::None(l)))
    }

    /// Writes a new, empty label of the requested type.
    pub fn create(mut disk: D, ltype: LabelType) -> Result<Self> {
        let engine = match ltype {
            LabelType::Mbr => Engine::Mbr(MbrLabel::create(&mut disk)?),
            LabelType::Gpt => Engine::Gpt(GptLabel::create(&mut disk)?),
            LabelType::None => return Err(Error::invalid("cannot create a label of type none")),
        };

        Ok(Self::new(disk, engine))
    }

    /// Creates a GPT label with room for `num_entries` partition entries.
    pub fn create_gpt_ex(mut disk: D, num_entries: u32) -> Result<Self> {
        let l = GptLabel::create_ex(&mut disk, num_entries)?;
        Ok(Self::new(disk, Engine::Gpt(l)))
    }

    fn new(disk: D, engine: Engine) -> Self {
        let label = Self { disk, engine };
        let info = label.get_info();
        info!(
            "{:?} label, usable blocks {}+{}, {} partition(s)",
            info.ltype,
            info.ablock0,
            info.anblocks,
            label.engine.ops().handles().len()
        );
        label
    }

    /// Releases the in-memory state, the device is left untouched.
    pub fn close(self) -> D {
        self.disk
    }

    /// Erases the label from the device.
    ///
    /// Only an empty label can be destroyed. On failure the label is
    /// handed back unchanged along with the error.
    pub fn destroy(mut self) -> std::result::Result<D, (Self, Error)> {
        match self.engine.ops_mut().destroy(&mut self.disk) {
            Ok(()) => Ok(self.disk),
            Err(e) => Err((self, e)),
        }
    }

    pub fn get_info(&self) -> LabelInfo {
        self.engine.ops().info()
    }

    pub fn part_first(&self) -> Option<PartHandle> {
        self.engine.ops().handles().first().copied()
    }

    /// Partition following `part`, `None` at the end or if `part` no longer
    /// exists.
    pub fn part_next(&self, part: PartHandle) -> Option<PartHandle> {
        let handles = self.engine.ops().handles();
        let i = handles.iter().position(|x| *x == part)?;
        handles.get(i + 1).copied()
    }

    pub fn part_get_info(&self, part: PartHandle) -> Option<PartInfo> {
        self.engine.ops().part_info(part)
    }

    /// Snapshot of all partitions in iteration order.
    pub fn partitions(&self) -> Vec<PartInfo> {
        let ops = self.engine.ops();
        ops.handles()
            .into_iter()
            .filter_map(|x| ops.part_info(x))
            .collect()
    }

    pub fn part_create(&mut self, spec: &PartSpec) -> Result<PartHandle> {
        self.engine.ops_mut().part_create(&mut self.disk, spec)
    }

    pub fn part_destroy(&mut self, part: PartHandle) -> Result<()> {
        self.engine.ops_mut().part_destroy(&mut self.disk, part)
    }

    pub fn suggest_ptype(&self, pcnt: PartContent) -> Result<PartType> {
        self.engine.ops().suggest_ptype(pcnt)
    }

    /// Unallocated regions where a partition of the given kind could be
    /// placed. For logical partitions the regions include room for the EBR.
    pub fn free_ranges(&self, kind: PartKind) -> Vec<Region> {
        self.engine.ops().free_ranges(kind)
    }

    /// Decodes one copy of the GPT entry array independently of the
    /// in-memory state.
    pub fn gpt_table_copy(&mut self, copy: TableCopy) -> Result<Vec<PartInfo>> {
        match &self.engine {
            Engine::Gpt(l) => l.read_table_copy(&mut self.disk, copy),
            _ => Err(Error::NotSupported),
        }
    }

    pub fn device(&self) -> &D {
        &self.disk
    }

    /// Direct access to the device. Writing through it behind the label's
    /// back leaves the in-memory state stale.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.disk
    }
}

pub(crate) fn read_block(disk: &mut dyn BlockDevice, ba: u64, block_size: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; block_size];
    disk.read_blocks(ba, 1, &mut buf)?;
    Ok(buf)
}

pub(crate) fn write_block(disk: &mut dyn BlockDevice, ba: u64, block: &[u8]) -> Result<()> {
    trace!("writing block {}", ba);
    disk.write_blocks(ba, 1, block)?;
    Ok(())
}

#[cfg(test)]
mod tests;
