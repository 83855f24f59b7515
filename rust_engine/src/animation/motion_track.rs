//! 动画轨道
//!
//! 存储单个骨骼 / Morph / IK / 相机的所有关键帧，并提供查找和插值功能。
//! 有序索引集合与关键帧映射的键集合始终一致。

use std::collections::HashMap;

use super::index_set::{FrameIndex, FrameIndexSet};
use super::keyframe::Keyframe;

/// 单通道关键帧轨道
#[derive(Debug, Clone)]
pub struct MotionTrack<K: Keyframe> {
    indexes: FrameIndexSet,
    keyframes: HashMap<FrameIndex, K>,
}

impl<K: Keyframe> Default for MotionTrack<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Keyframe> MotionTrack<K> {
    pub fn new() -> Self {
        Self {
            indexes: FrameIndexSet::new(),
            keyframes: HashMap::new(),
        }
    }

    /// 求值指定帧
    ///
    /// - 命中：返回存储的关键帧
    /// - 空轨道：返回该帧的默认关键帧
    /// - 超过最后一帧：保持最后一帧
    /// - 早于第一帧：保持第一帧
    /// - 其余：由后一帧从前一帧插值
    pub fn get(&self, index: impl Into<FrameIndex>) -> K {
        let index = index.into();
        if let Some(keyframe) = self.keyframes.get(&index) {
            return keyframe.clone();
        }

        let (Some(next), prev) = (self.indexes.next(index), self.indexes.prev(index)) else {
            // 空轨道或超过最后一帧
            return match self.last() {
                Some(last) => Self::held(last, index),
                None => K::new_at(index),
            };
        };

        let next = &self.keyframes[&next];
        match prev {
            Some(prev) => next.interpolate_from(&self.keyframes[&prev], index),
            None => Self::held(next, index),
        }
    }

    /// 精确查找（不插值）
    pub fn find(&self, index: impl Into<FrameIndex>) -> Option<&K> {
        self.keyframes.get(&index.into())
    }

    /// 编辑时插入关键帧
    ///
    /// 落在两帧之间时，后一帧的曲线被一分为二：前半段交给新帧，
    /// 后半段留给后一帧，插值结果与插入前一致。
    pub fn insert(&mut self, mut keyframe: K) -> Option<K> {
        let index = keyframe.index();
        if !self.keyframes.contains_key(&index) {
            if let (Some(prev), Some(next)) = (self.indexes.prev(index), self.indexes.next(index)) {
                if let Some(next_keyframe) = self.keyframes.get_mut(&next) {
                    next_keyframe.split_curve_at(&mut keyframe, prev);
                }
            }
        }
        self.store(keyframe)
    }

    /// 批量顺序加载，不调整曲线
    pub fn append(&mut self, keyframe: K) -> Option<K> {
        self.store(keyframe)
    }

    /// 无条件覆盖
    pub fn update(&mut self, keyframe: K) -> Option<K> {
        self.store(keyframe)
    }

    /// 移除关键帧
    pub fn delete(&mut self, index: impl Into<FrameIndex>) -> Option<K> {
        let index = index.into();
        self.indexes.remove(index);
        self.keyframes.remove(&index)
    }

    pub fn contains(&self, index: impl Into<FrameIndex>) -> bool {
        self.indexes.contains(index.into())
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// 登录帧数量
    pub fn registered_count(&self) -> usize {
        self.keyframes.values().filter(|k| k.is_registered()).count()
    }

    pub fn first_index(&self) -> Option<FrameIndex> {
        self.indexes.min()
    }

    pub fn last_index(&self) -> Option<FrameIndex> {
        self.indexes.max()
    }

    /// 最大帧索引，空轨道为 0
    pub fn max_frame_index(&self) -> u32 {
        self.last_index().map_or(0, FrameIndex::as_u32)
    }

    pub fn indexes(&self) -> &FrameIndexSet {
        &self.indexes
    }

    /// 按帧升序遍历
    pub fn iter(&self) -> impl Iterator<Item = &K> + '_ {
        self.indexes.iter().map(move |index| &self.keyframes[&index])
    }

    pub fn clear(&mut self) {
        self.indexes.clear();
        self.keyframes.clear();
    }

    fn last(&self) -> Option<&K> {
        self.indexes.max().map(|index| &self.keyframes[&index])
    }

    fn held(keyframe: &K, index: FrameIndex) -> K {
        let mut held = keyframe.clone();
        held.set_index(index);
        held.set_registered(false);
        held
    }

    fn store(&mut self, keyframe: K) -> Option<K> {
        let index = keyframe.index();
        self.indexes.insert(index);
        self.keyframes.insert(index, keyframe)
    }
}

impl<K: Keyframe> FromIterator<K> for MotionTrack<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut track = Self::new();
        for keyframe in iter {
            track.append(keyframe);
        }
        track
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{BezierCurve, BoneCurveSet, BoneKeyframe, MorphKeyframe};
    use glam::{Quat, Vec3};

    fn assert_vec3_eq(actual: Vec3, expected: Vec3) {
        assert!(
            (actual - expected).abs().max_element() < 1e-4,
            "{actual:?} != {expected:?}"
        );
    }

    fn scenario_a() -> MotionTrack<BoneKeyframe> {
        [
            BoneKeyframe::new(0, Vec3::ZERO, Quat::IDENTITY),
            BoneKeyframe::new(30, Vec3::new(0.0, 10.0, 0.0), Quat::IDENTITY),
            BoneKeyframe::new(60, Vec3::ZERO, Quat::IDENTITY),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_scenario_a() {
        let track = scenario_a();
        assert_vec3_eq(track.get(15).position_or_zero(), Vec3::new(0.0, 5.0, 0.0));
        assert_vec3_eq(track.get(90).position_or_zero(), Vec3::ZERO);
        assert_eq!(track.get(90).index, FrameIndex::from(90));
        assert!(!track.get(90).registered);

        let before = track.get(-5);
        assert_vec3_eq(before.position_or_zero(), Vec3::ZERO);
        assert_eq!(before.index, FrameIndex::from(-5));
    }

    #[test]
    fn test_exact_hit() {
        let track = scenario_a();
        let hit = track.get(30);
        assert_eq!(&hit, track.find(30).unwrap());
        assert!(hit.registered);
    }

    #[test]
    fn test_linear_interpolation_between_neighbors() {
        let track = scenario_a();
        for i in 31..60 {
            let ratio = (i - 30) as f32 / 30.0;
            let expected = Vec3::new(0.0, 10.0, 0.0).lerp(Vec3::ZERO, ratio);
            assert_vec3_eq(track.get(i).position_or_zero(), expected);
        }
    }

    #[test]
    fn test_fractional_query() {
        let track = scenario_a();
        assert_vec3_eq(track.get(7.5f32).position_or_zero(), Vec3::new(0.0, 2.5, 0.0));
    }

    #[test]
    fn test_empty_track_returns_default() {
        let track: MotionTrack<BoneKeyframe> = MotionTrack::new();
        let keyframe = track.get(12);
        assert_eq!(keyframe.index, FrameIndex::from(12));
        assert_eq!(keyframe.position, None);
        assert!(!keyframe.registered);
    }

    #[test]
    fn test_scenario_b_insert() {
        let mut track = scenario_a();
        let before_15 = track.get(15).position_or_zero();
        let before_50 = track.get(50).position_or_zero();

        let mut inserted = track.get(45);
        assert_vec3_eq(inserted.position_or_zero(), Vec3::new(0.0, 5.0, 0.0));
        inserted.registered = true;
        track.insert(inserted.clone());

        assert_eq!(track.len(), 4);
        assert_eq!(track.get(45).position, inserted.position);
        assert_vec3_eq(track.get(15).position_or_zero(), before_15);
        assert_vec3_eq(track.get(50).position_or_zero(), before_50);
    }

    #[test]
    fn test_insert_splits_curves() {
        let eased = BoneCurveSet::new(
            BezierCurve::from_bytes([64, 0, 64, 127]),
            BezierCurve::from_bytes([100, 10, 30, 120]),
            BezierCurve::linear(),
            BezierCurve::from_bytes([0, 64, 64, 127]),
        );
        let mut track: MotionTrack<BoneKeyframe> = [
            BoneKeyframe::new(0, Vec3::ZERO, Quat::IDENTITY),
            BoneKeyframe::new(40, Vec3::new(20.0, -8.0, 4.0), Quat::from_rotation_z(1.2))
                .with_curves(eased.clone()),
        ]
        .into_iter()
        .collect();

        let original: Vec<BoneKeyframe> = (0..=40).map(|i| track.get(i)).collect();

        let mut inserted = track.get(13);
        inserted.registered = true;
        track.insert(inserted);

        assert_ne!(track.find(40).unwrap().curves.as_ref(), Some(&eased));
        for (i, expected) in original.iter().enumerate() {
            let actual = track.get(i as u32);
            assert_vec3_eq(actual.position_or_zero(), expected.position_or_zero());
            assert!(actual
                .rotation_or_identity()
                .abs_diff_eq(expected.rotation_or_identity(), 1e-4)
                || actual
                    .rotation_or_identity()
                    .abs_diff_eq(-expected.rotation_or_identity(), 1e-4));
        }
    }

    #[test]
    fn test_append_does_not_touch_curves() {
        let eased = BoneCurveSet::new(
            BezierCurve::from_bytes([64, 0, 64, 127]),
            BezierCurve::linear(),
            BezierCurve::linear(),
            BezierCurve::linear(),
        );
        let mut track: MotionTrack<BoneKeyframe> = MotionTrack::new();
        track.append(BoneKeyframe::new(0, Vec3::ZERO, Quat::IDENTITY));
        track.append(BoneKeyframe::new(20, Vec3::X, Quat::IDENTITY).with_curves(eased.clone()));
        track.append(BoneKeyframe::new(10, Vec3::Y, Quat::IDENTITY));
        assert_eq!(track.find(20).unwrap().curves.as_ref(), Some(&eased));
    }

    #[test]
    fn test_update_and_delete() {
        let mut track: MotionTrack<MorphKeyframe> = MotionTrack::new();
        track.append(MorphKeyframe::new(0, 0.0));
        track.append(MorphKeyframe::new(10, 1.0));
        assert_eq!(track.update(MorphKeyframe::new(10, 0.5)).map(|k| k.weight), Some(1.0));
        assert_eq!(track.get(5).weight, 0.25);
        assert!(track.delete(10).is_some());
        assert!(!track.contains(10));
        assert_eq!(track.indexes().len(), 1);
        assert_eq!(track.get(5).weight, 0.0);
        assert!(track.delete(10).is_none());
    }

    #[test]
    fn test_iter_ascending() {
        let track: MotionTrack<MorphKeyframe> = [30, 10, 20]
            .into_iter()
            .map(|i| MorphKeyframe::new(i, i as f32))
            .collect();
        let order: Vec<f32> = track.iter().map(|k| k.weight).collect();
        assert_eq!(order, vec![10.0, 20.0, 30.0]);
        assert_eq!(track.max_frame_index(), 30);
        assert_eq!(track.registered_count(), 3);
    }
}
