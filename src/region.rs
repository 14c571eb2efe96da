use std::fmt;

/// Inclusive range of block addresses `{start - end}`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Region {
    start: u64,
    end: u64,
}

impl Region {
    pub fn new(start: u64, end: u64) -> Self {
        assert!(end >= start);
        Self { start, end }
    }

    /// Region covering `nblocks` blocks starting at `block0`.
    ///
    /// Returns `None` for an empty extent or one that would run past the end
    /// of the 64-bit address space.
    pub fn from_extent(block0: u64, nblocks: u64) -> Option<Self> {
        if nblocks == 0 {
            return None;
        }

        let end = block0.checked_add(nblocks - 1)?;
        Some(Self { start: block0, end })
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        !(self.end < other.start || self.start > other.end)
    }

    /// `true` if `self` lies entirely within `other`.
    pub fn belongs(&self, other: &Self) -> bool {
        self.start >= other.start && self.end <= other.end
    }

    pub fn substract(&self, other: &Self) -> (Option<Self>, Option<Self>) {
        if self.belongs(other) {
            (None, None)
        } else if !self.overlaps(other) {
            (Some(*self), None)
        } else if other.start > self.start && other.end < self.end {
            (
                Some(Region::new(self.start, other.start - 1)),
                Some(Region::new(other.end + 1, self.end)),
            )
        } else if other.start <= self.start {
            (Some(Region::new(other.end + 1, self.end)), None)
        } else {
            (Some(Region::new(self.start, other.start - 1)), None)
        }
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.end
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{} - {}}}", self.start, self.end)
    }
}

#[cfg(test)]
#[test]
fn test_region_overlap() {
    crate::tests_init();

    macro_rules! test {
        (false, $r0:expr, $r1:expr) => {{
            assert!(!$r0.overlaps(&$r1));
            assert!(!$r1.overlaps(&$r0));
        }};
        (true, $r0:expr, $r1:expr) => {{
            assert!($r0.overlaps(&$r1));
            assert!($r1.overlaps(&$r0));
        }};
    }

    test!(false, Region::new(0, 4), Region::new(8, 20));
    test!(false, Region::new(2048, 206847), Region::new(206848, 300000));
    test!(true, Region::new(0, 4), Region::new(4, 4));
    test!(true, Region::new(8, 524), Region::new(4, 22));
    test!(true, Region::new(2048, 206847), Region::new(100000, 204799));
}

#[cfg(test)]
#[test]
fn test_region_from_extent() {
    crate::tests_init();

    assert_eq!(Region::from_extent(2048, 204800), Some(Region::new(2048, 206847)));
    assert_eq!(Region::from_extent(7, 1), Some(Region::new(7, 7)));
    assert_eq!(Region::from_extent(7, 0), None);
    assert_eq!(Region::from_extent(u64::MAX, 2), None);
    assert_eq!(Region::from_extent(u64::MAX, 1).map(|r| r.size()), Some(1));
}

#[cfg(test)]
#[test]
fn test_region_belongs() {
    crate::tests_init();

    macro_rules! test {
        ($cond:ident, {$x0:expr, $x1:expr}, {$y0:expr, $y1:expr}) => {{
            let r0 = Region::new($x0, $x1);
            let r1 = Region::new($y0, $y1);
            assert!(r1.belongs(&r0) == $cond);
        }};
    }

    test!(true, {500, 10000}, {600, 5021});
    test!(true, {20, 20}, {20, 20});
    test!(true, {10, 40}, {10, 24});
    test!(true, {10, 40}, {20, 40});

    test!(false, {10, 40}, {9, 40});
    test!(false, {0, 4}, {4, 5});
}

#[cfg(test)]
#[test]
fn test_region_substract() {
    crate::tests_init();

    macro_rules! test {
        ({$x0:expr, $x1:expr}, {$y0:expr, $y1:expr}, $expect:pat) => {{
            let r0 = Region::new($x0, $x1);
            let r1 = Region::new($y0, $y1);

            let r = r0.substract(&r1);
            assert!(matches!(r, $expect), "{} - {} gave {:?}", r0, r1, r);
        }};
    }

    test!({100, 200}, {100, 200}, (None, None));
    test!({100, 200}, {50, 250}, (None, None));

    test!({100, 200}, {140, 160}, (Some(Region { start: 100, end: 139 }), Some(Region { start: 161, end: 200 })));

    test!({100, 200}, {50, 99}, (Some(Region { start: 100, end: 200 }), None));
    test!({100, 200}, {201, 208}, (Some(Region { start: 100, end: 200 }), None));

    test!({100, 200}, {50, 105}, (Some(Region { start: 106, end: 200 }), None));
    test!({100, 200}, {150, 500}, (Some(Region { start: 100, end: 149 }), None));

    test!({100, 200}, {100, 100}, (Some(Region { start: 101, end: 200 }), None));
    test!({100, 200}, {200, 200}, (Some(Region { start: 100, end: 199 }), None));
}
