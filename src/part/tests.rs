use std::fs::File;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use super::*;
use crate::disk::fault::FaultyDisk;
use crate::disk::{RamDisk, RawDisk};

fn spec(kind: PartKind, block0: u64, nblocks: u64, hdr_blocks: u64, ptype: PartType) -> PartSpec {
    PartSpec {
        index: 0,
        block0,
        nblocks,
        hdr_blocks,
        kind,
        ptype,
    }
}

/// 1,000,000 blocks of 512 bytes, backed by a sparse temporary file.
fn big_disk() -> RawDisk<File> {
    let file = tempfile::tempfile().unwrap();
    file.set_len(1_000_000 * 512).unwrap();
    RawDisk::from_stream(file, 512).unwrap()
}

fn destroyed<D: BlockDevice>(r: std::result::Result<D, (Label<D>, Error)>) -> D {
    match r {
        Ok(disk) => disk,
        Err((_, e)) => panic!("destroy failed: {}", e),
    }
}

fn walk<D: BlockDevice>(label: &Label<D>) -> Vec<PartInfo> {
    let mut parts = Vec::new();
    let mut it = label.part_first();
    while let Some(h) = it {
        parts.push(label.part_get_info(h).unwrap());
        it = label.part_next(h);
    }
    parts
}

fn reopen(label: &Label<RamDisk>) -> Label<RamDisk> {
    let bs = label.device().block_size().unwrap();
    Label::open(RamDisk::from_vec(label.device().as_slice().to_vec(), bs)).unwrap()
}

/// Partition attributes that survive a close/open cycle. The chain head's
/// header size is re-derived from its EBR address on open.
fn summary(parts: &[PartInfo]) -> Vec<(u32, PartKind, u64, u64, PartType)> {
    parts
        .iter()
        .map(|p| (p.index, p.kind, p.block0, p.nblocks, p.ptype))
        .collect()
}

fn region(p: &PartInfo) -> Region {
    Region::from_extent(p.block0, p.nblocks).unwrap()
}

fn check_invariants<D: BlockDevice>(label: &Label<D>) {
    let info = label.get_info();
    let usable = Region::from_extent(info.ablock0, info.anblocks).unwrap();
    let parts = walk(label);
    assert_eq!(parts, label.partitions());

    for p in &parts {
        assert!(region(p).belongs(&usable), "{:?} outside {}", p, usable);
    }

    let top: Vec<&PartInfo> = parts.iter().filter(|p| p.kind != PartKind::Logical).collect();
    for (i, a) in top.iter().enumerate() {
        for b in &top[i + 1..] {
            assert!(!region(a).overlaps(&region(b)), "{:?} overlaps {:?}", a, b);
        }
    }

    let logical: Vec<&PartInfo> = parts.iter().filter(|p| p.kind == PartKind::Logical).collect();
    if logical.is_empty() {
        return;
    }

    let ext = top
        .iter()
        .find(|p| p.kind == PartKind::Extended)
        .expect("logical partitions without an extended partition");
    for (i, p) in logical.iter().enumerate() {
        assert_eq!(p.index, 5 + i as u32);
        assert!(p.hdr_blocks >= 1);
        let span = Region::new(p.block0 - p.hdr_blocks, p.block0 + p.nblocks - 1);
        assert!(span.belongs(&region(ext)));
        if i > 0 {
            let prev = logical[i - 1];
            assert!(prev.block0 + prev.nblocks <= span.start());
        }
    }
}

/// Creates `s` and checks that it is refused exactly when `violates` says
/// so, leaving the partition set alone. Returns whether it was refused.
fn create_checked<D: BlockDevice>(label: &mut Label<D>, s: &PartSpec, violates: bool, step: usize) -> bool {
    let before = label.partitions();

    match label.part_create(s) {
        Ok(h) => {
            assert!(!violates, "step {}: {:?} was accepted", step, s);
            assert!(label.part_get_info(h).is_some());
            false
        }
        Err(Error::InvalidArgument(e)) => {
            assert!(violates, "step {}: {:?} was refused: {}", step, s, e);
            assert_eq!(label.partitions(), before, "step {}", step);
            true
        }
        Err(e) => panic!("step {}: creating {:?} failed: {}", step, s, e),
    }
}

/// Whether an MBR label with `parts` has to refuse `s`.
fn mbr_violates(info: &LabelInfo, parts: &[PartInfo], s: &PartSpec) -> bool {
    let usable = Region::from_extent(info.ablock0, info.anblocks).unwrap();
    let ext = parts.iter().find(|p| p.kind == PartKind::Extended);

    match s.kind {
        PartKind::Primary | PartKind::Extended => {
            let r = match Region::from_extent(s.block0, s.nblocks) {
                Some(r) => r,
                None => return true,
            };
            let top: Vec<&PartInfo> = parts.iter().filter(|p| p.kind != PartKind::Logical).collect();

            top.len() >= 4
                || (s.kind == PartKind::Extended && ext.is_some())
                || !r.belongs(&usable)
                || top.iter().any(|p| region(p).overlaps(&r))
        }
        PartKind::Logical => {
            let ext = match ext {
                Some(e) => region(e),
                None => return true,
            };
            if s.hdr_blocks == 0 || s.nblocks == 0 || s.block0 < s.hdr_blocks {
                return true;
            }
            let span = Region::new(s.block0 - s.hdr_blocks, s.block0 + s.nblocks - 1);

            !span.belongs(&ext)
                || parts
                    .iter()
                    .filter(|p| p.kind == PartKind::Logical)
                    .any(|p| Region::new(p.block0 - p.hdr_blocks, p.block0 + p.nblocks - 1).overlaps(&span))
        }
    }
}

#[test]
fn test_open_empty() {
    crate::tests_init();

    let label = Label::open(RamDisk::new_zeroed(512, 1024)).unwrap();
    let info = label.get_info();
    assert_eq!(info.ltype, LabelType::None);
    assert!(info.flags.is_empty());

    let parts = walk(&label);
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].index, 0);
    assert_eq!(parts[0].block0, 0);
    assert_eq!(parts[0].nblocks, 1024);
    assert_eq!(parts[0].ptype, PartType::Num(0));
    assert_eq!(label.part_next(label.part_first().unwrap()), None);

    assert!(matches!(label.suggest_ptype(PartContent::Ext4), Err(Error::NotSupported)));

    let mut label = label;
    let r = label.part_create(&spec(PartKind::Primary, 1, 10, 0, PartType::Num(0x83)));
    assert!(matches!(r, Err(Error::NotSupported)));
    let h = label.part_first().unwrap();
    assert!(matches!(label.part_destroy(h), Err(Error::NotSupported)));

    match label.destroy() {
        Err((_, Error::NotSupported)) => (),
        _ => panic!("whole-disk label must not be destroyable"),
    }
}

#[test]
fn test_open_fails_without_geometry() {
    crate::tests_init();

    let mut disk = FaultyDisk::new(RamDisk::new_zeroed(512, 1024));
    disk.fail_geometry = true;
    assert!(matches!(Label::open(disk).err(), Some(Error::IoError(_))));
}

#[test]
fn test_create_none_rejected() {
    crate::tests_init();

    let r = Label::create(RamDisk::new_zeroed(512, 1024), LabelType::None);
    assert!(matches!(r.err(), Some(Error::InvalidArgument(_))));
}

#[test]
fn test_mbr_create_destroy() {
    crate::tests_init();

    let label = Label::create(RamDisk::new_zeroed(512, 1024), LabelType::Mbr).unwrap();
    let info = label.get_info();
    assert_eq!(info.ltype, LabelType::Mbr);
    assert_eq!(
        info.flags,
        LabelFlags::EXT_SUPP | LabelFlags::CAN_CREATE_PRI | LabelFlags::CAN_CREATE_EXT
    );
    assert_eq!((info.ablock0, info.anblocks), (1, 1023));
    assert_eq!(label.part_first(), None);

    let label = Label::open(label.close()).unwrap();
    assert_eq!(label.get_info().ltype, LabelType::Mbr);

    let disk = destroyed(label.destroy());
    let label = Label::open(disk).unwrap();
    assert_eq!(label.get_info().ltype, LabelType::None);
}

#[test]
fn test_gpt_create_destroy() {
    crate::tests_init();

    let label = Label::create(RamDisk::new_zeroed(512, 1024), LabelType::Gpt).unwrap();
    let info = label.get_info();
    assert_eq!(info.ltype, LabelType::Gpt);
    assert_eq!(info.flags, LabelFlags::PTYPE_UUID | LabelFlags::CAN_CREATE_PRI);
    assert_eq!((info.ablock0, info.anblocks), (34, 1024 - 34 - 33));

    let label = Label::open(label.close()).unwrap();
    assert_eq!(label.get_info().ltype, LabelType::Gpt);

    let disk = destroyed(label.destroy());
    let label = Label::open(disk).unwrap();
    assert_eq!(label.get_info().ltype, LabelType::None);
}

#[test]
fn test_destroy_refused_while_not_empty() {
    crate::tests_init();

    let mut label = Label::create(RamDisk::new_zeroed(512, 4096), LabelType::Mbr).unwrap();
    let h = label
        .part_create(&spec(PartKind::Primary, 100, 100, 0, PartType::Num(0x83)))
        .unwrap();

    let mut label = match label.destroy() {
        Err((label, Error::NotEmpty)) => label,
        _ => panic!("label with partitions was destroyed"),
    };
    assert_eq!(label.part_get_info(h).unwrap().block0, 100);

    label.part_destroy(h).unwrap();
    assert_eq!(label.part_get_info(h), None);
    destroyed(label.destroy());
}

#[test]
fn test_suggest_ptype() {
    crate::tests_init();

    let label = Label::create(RamDisk::new_zeroed(512, 1024), LabelType::Mbr).unwrap();
    for (pcnt, ptype) in &[
        (PartContent::Fat12_16, 0x0E),
        (PartContent::Exfat, 0x07),
        (PartContent::Fat32, 0x0C),
        (PartContent::Ext4, 0x83),
        (PartContent::Minix, 0x81),
    ] {
        assert_eq!(label.suggest_ptype(*pcnt).unwrap(), PartType::Num(*ptype));
    }

    let label = Label::create(RamDisk::new_zeroed(512, 1024), LabelType::Gpt).unwrap();
    let basic_data = Uuid::parse_str("EBD0A0A2-B9E5-4433-87C0-68B6B72699C7").unwrap();
    for (pcnt, guid) in &[
        (PartContent::Fat12_16, basic_data),
        (PartContent::Exfat, basic_data),
        (PartContent::Fat32, basic_data),
        (
            PartContent::Ext4,
            Uuid::parse_str("0FC63DAF-8483-4772-8E79-3D69D8477DE4").unwrap(),
        ),
        (
            PartContent::Minix,
            Uuid::parse_str("8308E350-4E2D-46C7-8E3B-24B07E8AC674").unwrap(),
        ),
    ] {
        assert_eq!(label.suggest_ptype(*pcnt).unwrap(), PartType::Uuid(*guid));
    }
}

#[test]
fn test_mbr_primary() {
    crate::tests_init();

    let mut label = Label::create(RamDisk::new_zeroed(512, 4096), LabelType::Mbr).unwrap();

    let mut s = spec(PartKind::Primary, 200, 100, 0, PartType::Num(0x83));
    s.index = 3;
    let h3 = label.part_create(&s).unwrap();
    let h1 = label
        .part_create(&spec(PartKind::Primary, 1000, 100, 0, PartType::Num(0x0C)))
        .unwrap();

    let parts = walk(&label);
    assert_eq!(parts.iter().map(|p| p.index).collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(label.part_get_info(h1).unwrap().ptype, PartType::Num(0x0C));

    // slot already taken
    s.block0 = 2000;
    assert!(matches!(label.part_create(&s), Err(Error::InvalidArgument(_))));
    s.index = 5;
    assert!(matches!(label.part_create(&s), Err(Error::InvalidArgument(_))));

    // past the end of the device
    let r = label.part_create(&spec(PartKind::Primary, 4000, 100, 0, PartType::Num(0x83)));
    assert!(matches!(r, Err(Error::InvalidArgument(_))));
    // block 0 holds the MBR
    let r = label.part_create(&spec(PartKind::Primary, 0, 10, 0, PartType::Num(0x83)));
    assert!(matches!(r, Err(Error::InvalidArgument(_))));

    label.part_destroy(h3).unwrap();
    let label = reopen_raw(label);
    let parts = walk(&label);
    assert_eq!(parts.len(), 1);
    assert_eq!((parts[0].index, parts[0].block0, parts[0].nblocks), (1, 1000, 100));
}

fn reopen_raw(label: Label<RamDisk>) -> Label<RamDisk> {
    Label::open(label.close()).unwrap()
}

#[test]
fn test_mbr_logical() {
    crate::tests_init();

    let mut label = Label::create(RamDisk::new_zeroed(512, 8192), LabelType::Mbr).unwrap();

    let r = label.part_create(&spec(PartKind::Logical, 1010, 100, 10, PartType::Num(0x83)));
    assert!(matches!(r, Err(Error::InvalidArgument(_))));

    label
        .part_create(&spec(PartKind::Extended, 1000, 4000, 0, PartType::Num(0)))
        .unwrap();
    assert!(label.get_info().flags.contains(LabelFlags::CAN_CREATE_LOG));
    assert!(!label.get_info().flags.contains(LabelFlags::CAN_CREATE_EXT));

    // no room for the EBR
    let r = label.part_create(&spec(PartKind::Logical, 1010, 100, 0, PartType::Num(0x83)));
    assert!(matches!(r, Err(Error::InvalidArgument(_))));
    // extended type is not a valid logical type
    let r = label.part_create(&spec(PartKind::Logical, 1010, 100, 10, PartType::Num(0x05)));
    assert!(matches!(r, Err(Error::InvalidArgument(_))));
    // sticks out of the extended partition
    let r = label.part_create(&spec(PartKind::Logical, 4900, 200, 10, PartType::Num(0x83)));
    assert!(matches!(r, Err(Error::InvalidArgument(_))));

    let a = label
        .part_create(&spec(PartKind::Logical, 3010, 100, 10, PartType::Num(0x83)))
        .unwrap();
    let b = label
        .part_create(&spec(PartKind::Logical, 1010, 100, 10, PartType::Num(0x07)))
        .unwrap();
    assert_eq!(label.part_get_info(a).unwrap().index, 6);
    assert_eq!(label.part_get_info(b).unwrap().index, 5);

    // overlaps `a` including its EBR
    let r = label.part_create(&spec(PartKind::Logical, 2960, 50, 1, PartType::Num(0x83)));
    assert!(matches!(r, Err(Error::InvalidArgument(_))));
    let r = label.part_create(&spec(PartKind::Logical, 3005, 10, 1, PartType::Num(0x83)));
    assert!(matches!(r, Err(Error::InvalidArgument(_))));

    check_invariants(&label);
    assert_eq!(summary(&reopen(&label).partitions()), summary(&label.partitions()));
}

#[test]
fn test_scenario_primary_and_overlap() {
    crate::tests_init();

    let mut label = Label::create(big_disk(), LabelType::Mbr).unwrap();

    let h = label
        .part_create(&spec(PartKind::Primary, 2048, 204800, 0, PartType::Num(0x83)))
        .unwrap();
    let info = label.part_get_info(h).unwrap();
    assert_eq!(info.index, 1);
    assert_eq!(info.kind, PartKind::Primary);
    assert_eq!(label.partitions(), vec![info.clone()]);

    let r = label.part_create(&spec(PartKind::Primary, 100000, 104800, 0, PartType::Num(0x0C)));
    assert!(matches!(r, Err(Error::InvalidArgument(_))));
    assert_eq!(label.partitions(), vec![info]);
}

#[test]
fn test_scenario_logical_head_relocation() {
    crate::tests_init();

    let mut label = Label::create(big_disk(), LabelType::Mbr).unwrap();
    let ext = label
        .part_create(&spec(PartKind::Extended, 300000, 300000, 0, PartType::Num(0)))
        .unwrap();

    let first = label
        .part_create(&spec(PartKind::Logical, 300100, 49900, 100, PartType::Num(0x83)))
        .unwrap();
    let second = label
        .part_create(&spec(PartKind::Logical, 350100, 49900, 100, PartType::Num(0x83)))
        .unwrap();
    assert_eq!(label.part_get_info(first).unwrap().index, 5);
    assert_eq!(label.part_get_info(second).unwrap().index, 6);

    label.part_destroy(first).unwrap();

    let parts = walk(&label);
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0], label.part_get_info(ext).unwrap());
    assert_eq!(parts[1].kind, PartKind::Logical);
    assert_eq!(parts[1].index, 5);
    assert_eq!((parts[1].block0, parts[1].nblocks), (350100, 49900));
    assert_eq!(label.part_get_info(second).unwrap().index, 5);

    // the head record at the start of the extended partition now
    // describes the former second partition
    let mut ebr = vec![0u8; 512];
    label.device_mut().read_blocks(300000, 1, &mut ebr).unwrap();
    assert_eq!(&ebr[510..], &[0x55, 0xAA]);
    assert_eq!(ebr[0x1BE + 4], 0x83);
    assert_eq!(&ebr[0x1BE + 8..0x1BE + 12], &50100u32.to_le_bytes());
    assert_eq!(&ebr[0x1BE + 12..0x1BE + 16], &49900u32.to_le_bytes());
    assert!(ebr[0x1CE..0x1DE].iter().all(|x| *x == 0));

    let label = Label::open(label.close()).unwrap();
    let parts = walk(&label);
    assert_eq!(parts.len(), 2);
    assert_eq!((parts[1].index, parts[1].block0, parts[1].nblocks), (5, 350100, 49900));
}

#[test]
fn test_scenario_gpt_backup_corruption() {
    crate::tests_init();

    let mut label = Label::create(big_disk(), LabelType::Gpt).unwrap();
    let ptype = label.suggest_ptype(PartContent::Ext4).unwrap();
    let h = label
        .part_create(&spec(PartKind::Primary, 2048, 204800, 0, ptype))
        .unwrap();
    let expected = label.partitions();
    assert_eq!(label.part_get_info(h).unwrap().index, 1);
    assert_eq!(label.gpt_table_copy(TableCopy::Backup).unwrap(), expected);

    // first block of the backup entry array holds entry 1
    let garbage = vec![0x5Au8; 512];
    label.device_mut().write_blocks(999_967, 1, &garbage).unwrap();

    let mut label = Label::open(label.close()).unwrap();
    assert_eq!(label.get_info().ltype, LabelType::Gpt);
    assert_eq!(label.partitions(), expected);
    assert_eq!(label.gpt_table_copy(TableCopy::Primary).unwrap(), expected);

    let backup = label.gpt_table_copy(TableCopy::Backup);
    assert!(match backup {
        Ok(parts) => parts != expected,
        Err(_) => true,
    });
}

#[test]
fn test_gpt_with_damaged_backup_header() {
    crate::tests_init();

    let mut label = Label::create(RamDisk::new_zeroed(512, 1024), LabelType::Gpt).unwrap();
    label.device_mut().write_blocks(1023, 1, &[0u8; 512]).unwrap();

    // the protective MBR alone is not an editable MBR label
    let label = Label::open(label.close()).unwrap();
    assert_eq!(label.get_info().ltype, LabelType::None);
    assert_eq!(label.partitions().len(), 1);
}

#[test]
fn test_gpt_part() {
    crate::tests_init();

    let mut label = Label::create(RamDisk::new_zeroed(512, 8192), LabelType::Gpt).unwrap();
    let ptype = label.suggest_ptype(PartContent::Fat32).unwrap();

    let r = label.part_create(&spec(PartKind::Logical, 100, 100, 1, ptype));
    assert!(matches!(r, Err(Error::InvalidArgument(_))));

    let a = label.part_create(&spec(PartKind::Primary, 100, 100, 0, ptype)).unwrap();
    let mut s = spec(PartKind::Primary, 1000, 500, 0, ptype);
    s.index = 7;
    let b = label.part_create(&s).unwrap();
    assert!(label.get_info().flags.contains(LabelFlags::CAN_DELETE_PART));

    let r = label.part_create(&spec(PartKind::Primary, 150, 100, 0, ptype));
    assert!(matches!(r, Err(Error::InvalidArgument(_))));

    assert_eq!(label.part_get_info(a).unwrap().index, 1);
    assert_eq!(label.part_get_info(b).unwrap().index, 7);
    assert_eq!(label.part_next(a), Some(b));
    assert_eq!(label.part_next(b), None);

    assert_eq!(
        label.free_ranges(PartKind::Primary),
        vec![
            Region::new(34, 99),
            Region::new(200, 999),
            Region::new(1500, 8192 - 34)
        ]
    );

    label.part_destroy(a).unwrap();
    assert_eq!(label.part_next(a), None);

    let label = reopen(&label);
    let parts = label.partitions();
    assert_eq!(parts.len(), 1);
    assert_eq!((parts[0].index, parts[0].block0, parts[0].nblocks), (7, 1000, 500));
    assert_eq!(parts[0].ptype, ptype);
}

#[test]
fn test_failed_write_leaves_state() {
    crate::tests_init();

    let disk = FaultyDisk::new(RamDisk::new_zeroed(512, 8192));
    let mut label = Label::create(disk, LabelType::Mbr).unwrap();
    label
        .part_create(&spec(PartKind::Extended, 1000, 4000, 0, PartType::Num(0)))
        .unwrap();
    label
        .part_create(&spec(PartKind::Logical, 1010, 100, 10, PartType::Num(0x83)))
        .unwrap();
    let before = label.partitions();

    label.device_mut().writes_left = Some(0);
    let r = label.part_create(&spec(PartKind::Primary, 100, 100, 0, PartType::Num(0x83)));
    assert!(matches!(r, Err(Error::IoError(_))));
    let r = label.part_create(&spec(PartKind::Logical, 2010, 100, 10, PartType::Num(0x83)));
    assert!(matches!(r, Err(Error::IoError(_))));
    assert_eq!(label.partitions(), before);

    // new EBR written, predecessor not relinked
    label.device_mut().writes_left = Some(1);
    let r = label.part_create(&spec(PartKind::Logical, 2010, 100, 10, PartType::Num(0x83)));
    assert!(r.is_err());
    assert_eq!(label.partitions(), before);

    let h = label.part_first().unwrap();
    assert!(label.part_destroy(h).is_err());
    assert_eq!(label.partitions(), before);
}

#[test]
fn test_gpt_backup_write_failure() {
    crate::tests_init();

    let disk = FaultyDisk::new(RamDisk::new_zeroed(512, 8192));
    let mut label = Label::create(disk, LabelType::Gpt).unwrap();
    let ptype = label.suggest_ptype(PartContent::Ext4).unwrap();

    label.device_mut().writes.clear();
    label.device_mut().writes_left = Some(2);
    let r = label.part_create(&spec(PartKind::Primary, 100, 100, 0, ptype));
    assert!(matches!(r, Err(Error::IoError(_))));
    assert!(label.partitions().is_empty());
    // primary array block, then primary header
    assert_eq!(label.device().writes, vec![2, 1]);

    // no rollback of the primary copy
    assert_eq!(label.gpt_table_copy(TableCopy::Primary).unwrap().len(), 1);
    assert!(label.gpt_table_copy(TableCopy::Backup).unwrap().is_empty());
}

#[test]
fn test_gpt_table_copy_on_mbr() {
    crate::tests_init();

    let mut label = Label::create(RamDisk::new_zeroed(512, 1024), LabelType::Mbr).unwrap();
    assert!(matches!(
        label.gpt_table_copy(TableCopy::Primary),
        Err(Error::NotSupported)
    ));
}

#[test]
fn test_create_gpt_ex() {
    crate::tests_init();

    let label = Label::create_gpt_ex(RamDisk::new_zeroed(512, 1024), 16).unwrap();
    let info = label.get_info();
    // 4 table blocks per copy
    assert_eq!((info.ablock0, info.anblocks), (6, 1024 - 6 - 5));

    assert!(Label::create_gpt_ex(RamDisk::new_zeroed(512, 1024), 0).is_err());
}

#[test]
fn test_random_mbr_sequence() {
    crate::tests_init();

    let mut rng = StdRng::seed_from_u64(0x6d6272);
    let mut label = Label::create(RamDisk::new_zeroed(512, 20_000), LabelType::Mbr).unwrap();

    let (mut refused, mut accepted) = (0, 0);

    for step in 0..300 {
        let flags = label.get_info().flags;
        let roll = rng.gen_range(0..10);

        if roll < 3 {
            // arbitrary candidate, possibly overlapping or out of bounds
            let kind = [PartKind::Primary, PartKind::Extended, PartKind::Logical][rng.gen_range(0..3)];
            let hdr = if kind == PartKind::Logical { rng.gen_range(0..4) } else { 0 };
            let s = spec(
                kind,
                rng.gen_range(0..20_100),
                rng.gen_range(0..4000),
                hdr,
                PartType::Num(0x83),
            );

            let violates = mbr_violates(&label.get_info(), &label.partitions(), &s);
            if create_checked(&mut label, &s, violates, step) {
                refused += 1;
            } else {
                accepted += 1;
            }
        } else if roll < 7 {
            let kind = if rng.gen_bool(0.5) && flags.contains(LabelFlags::CAN_CREATE_LOG) {
                PartKind::Logical
            } else if flags.contains(LabelFlags::CAN_CREATE_EXT) && rng.gen_bool(0.3) {
                PartKind::Extended
            } else if flags.contains(LabelFlags::CAN_CREATE_PRI) {
                PartKind::Primary
            } else {
                continue;
            };

            let free: Vec<Region> = label
                .free_ranges(kind)
                .into_iter()
                .filter(|r| r.size() >= 2)
                .collect();
            if free.is_empty() {
                continue;
            }
            let r = free[rng.gen_range(0..free.len())];

            let hdr = if kind == PartKind::Logical {
                rng.gen_range(1..=std::cmp::min(8, r.size() - 1))
            } else {
                0
            };
            let nblocks = rng.gen_range(1..=std::cmp::min(3000, r.size() - hdr));
            let offset = rng.gen_range(0..=r.size() - hdr - nblocks);
            let block0 = r.start() + offset + hdr;
            let ptype = PartType::Num(rng.gen_range(0x01..=0x04));

            let s = spec(kind, block0, nblocks, hdr, ptype);
            if let Err(e) = label.part_create(&s) {
                panic!("step {}: creating {:?} failed: {}", step, s, e);
            }
        } else {
            let handles: Vec<PartHandle> = {
                let mut v = Vec::new();
                let mut it = label.part_first();
                while let Some(h) = it {
                    v.push(h);
                    it = label.part_next(h);
                }
                v
            };
            if handles.is_empty() {
                continue;
            }

            let h = handles[rng.gen_range(0..handles.len())];
            let info = label.part_get_info(h).unwrap();
            let has_logical = label.partitions().iter().any(|p| p.kind == PartKind::Logical);

            match label.part_destroy(h) {
                Ok(()) => assert!(info.kind != PartKind::Extended || !has_logical),
                Err(Error::NotEmpty) => assert!(info.kind == PartKind::Extended && has_logical),
                Err(e) => panic!("step {}: destroying {:?} failed: {}", step, info, e),
            }
            assert_eq!(label.part_get_info(h), None);
        }

        check_invariants(&label);
        let other = reopen(&label);
        assert_eq!(
            summary(&other.partitions()),
            summary(&label.partitions()),
            "step {}",
            step
        );
        check_invariants(&other);
    }

    assert!(refused > 0 && accepted > 0, "{} refused, {} accepted", refused, accepted);
}

#[test]
fn test_random_gpt_sequence() {
    crate::tests_init();

    let mut rng = StdRng::seed_from_u64(0x677074);
    let mut label =
        Label::create_gpt_ex(RamDisk::new_zeroed(512, 20_000), 32).unwrap();
    let types = [
        label.suggest_ptype(PartContent::Fat32).unwrap(),
        label.suggest_ptype(PartContent::Ext4).unwrap(),
        label.suggest_ptype(PartContent::Minix).unwrap(),
    ];

    let (mut refused, mut accepted) = (0, 0);

    for step in 0..200 {
        let info = label.get_info();
        let free = label.free_ranges(PartKind::Primary);
        let roll = rng.gen_range(0..10);

        if roll < 3 {
            let s = spec(
                PartKind::Primary,
                rng.gen_range(0..20_100),
                rng.gen_range(0..3000),
                0,
                types[rng.gen_range(0..types.len())],
            );

            let usable = Region::from_extent(info.ablock0, info.anblocks).unwrap();
            let parts = label.partitions();
            let violates = match Region::from_extent(s.block0, s.nblocks) {
                Some(r) => {
                    parts.len() >= 32
                        || !r.belongs(&usable)
                        || parts.iter().any(|p| region(p).overlaps(&r))
                }
                None => true,
            };

            if create_checked(&mut label, &s, violates, step) {
                refused += 1;
            } else {
                accepted += 1;
            }
        } else if roll < 7 && info.flags.contains(LabelFlags::CAN_CREATE_PRI) && !free.is_empty() {
            let r = free[rng.gen_range(0..free.len())];
            let nblocks = rng.gen_range(1..=std::cmp::min(2000, r.size()));
            let block0 = r.start() + rng.gen_range(0..=r.size() - nblocks);
            let ptype = types[rng.gen_range(0..types.len())];

            let s = spec(PartKind::Primary, block0, nblocks, 0, ptype);
            if let Err(e) = label.part_create(&s) {
                panic!("step {}: creating {:?} failed: {}", step, s, e);
            }
        } else if let Some(first) = label.part_first() {
            let n = label.partitions().len();
            let mut h = first;
            for _ in 0..rng.gen_range(0..n) {
                h = label.part_next(h).unwrap();
            }
            label.part_destroy(h).unwrap();
        }

        check_invariants(&label);
        let parts = label.partitions();
        assert_eq!(label.gpt_table_copy(TableCopy::Primary).unwrap(), parts);
        assert_eq!(label.gpt_table_copy(TableCopy::Backup).unwrap(), parts);
        assert_eq!(reopen(&label).partitions(), parts, "step {}", step);
    }

    assert!(refused > 0 && accepted > 0, "{} refused, {} accepted", refused, accepted);
}
