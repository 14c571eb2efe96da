use std::iter::once;

use crate::region::Region;
use crate::{Error, Result};

/// Picks a partition index. `0` means the lowest free index in `1..=max`,
/// anything else must be in range and unused.
pub(crate) fn pick_index<I>(requested: u32, max: u32, used: I) -> Result<u32>
where
    I: Iterator<Item = u32> + Clone,
{
    if requested == 0 {
        return (1..=max)
            .find(|i| !used.clone().any(|x| x == *i))
            .ok_or_else(|| Error::invalid("no free partition slot"));
    }

    if requested > max {
        return Err(Error::invalid(format!(
            "index {} is out of range 1..={}",
            requested, max
        )));
    }

    if used.clone().any(|x| x == requested) {
        return Err(Error::invalid(format!("index {} is already in use", requested)));
    }

    Ok(requested)
}

/// Validates that `[block0, block0 + nblocks)` lies within `bounds` and does
/// not overlap any of `used`.
pub(crate) fn check_free_range<I>(
    block0: u64,
    nblocks: u64,
    bounds: Region,
    used: I,
) -> Result<Region>
where
    I: Iterator<Item = Region>,
{
    let region = Region::from_extent(block0, nblocks).ok_or_else(|| {
        Error::invalid(format!("invalid extent {}+{}", block0, nblocks))
    })?;

    if !region.belongs(&bounds) {
        return Err(Error::invalid(format!(
            "{} does not fit into usable region {}",
            region, bounds
        )));
    }

    for r in used {
        if region.overlaps(&r) {
            return Err(Error::invalid(format!("{} overlaps with {}", region, r)));
        }
    }

    Ok(region)
}

/// Regions of `usable_region` not covered by any of `region_it`, in
/// ascending order.
pub(crate) fn find_free_regions(
    usable_region: Region,
    region_it: &mut dyn Iterator<Item = Region>,
) -> Vec<Region> {
    let mut usable_regions = once(Some(usable_region)).collect::<Vec<_>>();

    for used_region in region_it {
        for i in 0..usable_regions.len() {
            if let Some(usable) = &usable_regions[i] {
                let (first, second) = usable.substract(&used_region);
                if let Some(first) = first {
                    usable_regions[i] = Some(first);

                    if let Some(second) = second {
                        usable_regions.push(Some(second));
                    }
                } else {
                    usable_regions[i] = None;
                }
            }
        }
    }

    let mut free: Vec<Region> = usable_regions.into_iter().flatten().collect();
    free.sort_by_key(|r| r.start());
    free
}
