//! 帧索引与有序索引集合
//!
//! 关键帧轨道的时间轴。索引按数值排序，支持查找前后相邻帧。

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Bound::{Excluded, Unbounded};

/// 帧索引
///
/// 文件中的关键帧都是整数帧，但查询时允许使用小数帧（帧间求值）。
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameIndex(f32);

impl FrameIndex {
    pub const ZERO: FrameIndex = FrameIndex(0.0);

    pub fn new(value: f32) -> Self {
        // -0.0 与 0.0 视为同一帧
        if value == 0.0 {
            Self(0.0)
        } else {
            Self(value)
        }
    }

    pub fn value(self) -> f32 {
        self.0
    }

    /// 向下取整为文件中的整数帧（负数帧截断为 0）
    pub fn as_u32(self) -> u32 {
        self.0.max(0.0).floor() as u32
    }

    pub fn is_whole(self) -> bool {
        self.0.fract() == 0.0
    }
}

impl PartialEq for FrameIndex {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrameIndex {}

impl PartialOrd for FrameIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrameIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for FrameIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl From<u32> for FrameIndex {
    fn from(value: u32) -> Self {
        Self::new(value as f32)
    }
}

impl From<i32> for FrameIndex {
    fn from(value: i32) -> Self {
        Self::new(value as f32)
    }
}

impl From<f32> for FrameIndex {
    fn from(value: f32) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for FrameIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 有序帧索引集合（平衡树，O(log n) 增删查）
#[derive(Clone, Debug, Default)]
pub struct FrameIndexSet {
    indexes: BTreeSet<FrameIndex>,
}

impl FrameIndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入索引（已存在时无变化）
    pub fn insert(&mut self, index: FrameIndex) -> bool {
        self.indexes.insert(index)
    }

    pub fn remove(&mut self, index: FrameIndex) -> bool {
        self.indexes.remove(&index)
    }

    pub fn contains(&self, index: FrameIndex) -> bool {
        self.indexes.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// 最小索引，空集合返回 None
    pub fn min(&self) -> Option<FrameIndex> {
        self.indexes.first().copied()
    }

    /// 最大索引，空集合返回 None
    pub fn max(&self) -> Option<FrameIndex> {
        self.indexes.last().copied()
    }

    /// 严格小于 `index` 的最大索引
    pub fn prev(&self, index: FrameIndex) -> Option<FrameIndex> {
        self.indexes.range(..index).next_back().copied()
    }

    /// 严格大于 `index` 的最小索引
    pub fn next(&self, index: FrameIndex) -> Option<FrameIndex> {
        self.indexes.range((Excluded(index), Unbounded)).next().copied()
    }

    /// 升序遍历
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = FrameIndex> + '_ {
        self.indexes.iter().copied()
    }

    pub fn clear(&mut self) {
        self.indexes.clear();
    }
}

impl FromIterator<FrameIndex> for FrameIndexSet {
    fn from_iter<I: IntoIterator<Item = FrameIndex>>(iter: I) -> Self {
        Self {
            indexes: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(values: &[u32]) -> FrameIndexSet {
        values.iter().map(|&v| FrameIndex::from(v)).collect()
    }

    #[test]
    fn test_neighbors() {
        let set = set_of(&[0, 30, 60]);
        assert_eq!(set.prev(15.into()), Some(0.into()));
        assert_eq!(set.next(15.into()), Some(30.into()));
        // 命中时仍然取严格的前后帧
        assert_eq!(set.prev(30.into()), Some(0.into()));
        assert_eq!(set.next(30.into()), Some(60.into()));
        assert_eq!(set.prev(0.into()), None);
        assert_eq!(set.next(60.into()), None);
        assert_eq!(set.prev(FrameIndex::from(-5)), None);
        assert_eq!(set.next(FrameIndex::from(-5)), Some(0.into()));
    }

    #[test]
    fn test_fractional_query() {
        let set = set_of(&[1, 2, 3]);
        assert_eq!(set.prev(FrameIndex::from(2.5)), Some(2.into()));
        assert_eq!(set.next(FrameIndex::from(2.5)), Some(3.into()));
    }

    #[test]
    fn test_empty_has_no_bounds() {
        let set = FrameIndexSet::new();
        assert_eq!(set.min(), None);
        assert_eq!(set.max(), None);
        assert_eq!(set.prev(10.into()), None);
        assert_eq!(set.next(10.into()), None);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut set = FrameIndexSet::new();
        assert!(set.insert(5.into()));
        assert!(!set.insert(5.into()));
        assert!(set.insert(1.into()));
        assert_eq!(set.len(), 2);
        assert_eq!(set.min(), Some(1.into()));
        assert_eq!(set.max(), Some(5.into()));
        assert!(set.remove(5.into()));
        assert!(!set.contains(5.into()));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![FrameIndex::from(1)]);
    }

    #[test]
    fn test_negative_zero_is_zero() {
        let mut set = FrameIndexSet::new();
        set.insert(FrameIndex::from(-0.0f32));
        assert!(set.contains(FrameIndex::ZERO));
    }
}
