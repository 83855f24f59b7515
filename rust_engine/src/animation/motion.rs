//! Motion 核心数据结构
//!
//! 按名称存放多条轨道。名称目录是写时复制的 `Arc<Vec<String>>`：
//! `names()` 拿到的快照在之后新增轨道时保持不变，可以放心遍历。

use std::collections::HashMap;
use std::sync::Arc;

use super::config::{get_config, ReduceConfig};
use super::keyframe::{BoneKeyframe, CameraKeyframe, IkKeyframe, Keyframe, MorphKeyframe};
use super::motion_track::MotionTrack;

/// 按名称索引的多条轨道
#[derive(Debug, Clone)]
pub struct MotionTracks<K: Keyframe> {
    tracks: HashMap<String, MotionTrack<K>>,
    /// 名称目录（插入顺序）
    names: Arc<Vec<String>>,
}

impl<K: Keyframe> Default for MotionTracks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Keyframe> MotionTracks<K> {
    pub fn new() -> Self {
        Self {
            tracks: HashMap::new(),
            names: Arc::new(Vec::new()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tracks.contains_key(name)
    }

    /// 获取轨道，不存在时创建空轨道
    pub fn get(&mut self, name: &str) -> &mut MotionTrack<K> {
        if !self.tracks.contains_key(name) {
            Arc::make_mut(&mut self.names).push(name.to_string());
        }
        self.tracks.entry(name.to_string()).or_default()
    }

    /// 只读查找
    pub fn find(&self, name: &str) -> Option<&MotionTrack<K>> {
        self.tracks.get(name)
    }

    /// 整条替换（名称不存在时追加到目录）
    pub fn set(&mut self, name: &str, track: MotionTrack<K>) {
        if !self.tracks.contains_key(name) {
            Arc::make_mut(&mut self.names).push(name.to_string());
        }
        self.tracks.insert(name.to_string(), track);
    }

    pub fn delete(&mut self, name: &str) -> Option<MotionTrack<K>> {
        let removed = self.tracks.remove(name)?;
        Arc::make_mut(&mut self.names).retain(|n| n != name);
        Some(removed)
    }

    /// 名称快照
    ///
    /// 快照不会因之后的新增而改变；遍历期间删除轨道时，
    /// 快照里可能仍包含已删除的名称。
    pub fn names(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.names)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// 按目录顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MotionTrack<K>)> + '_ {
        self.names
            .iter()
            .filter_map(move |name| self.tracks.get(name).map(|track| (name.as_str(), track)))
    }

    /// 所有轨道的最大帧索引
    pub fn max_frame(&self) -> u32 {
        self.tracks
            .values()
            .map(MotionTrack::max_frame_index)
            .max()
            .unwrap_or(0)
    }

    /// 移除没有任何有效关键帧的轨道，返回移除的数量
    pub fn clean(&mut self) -> usize {
        let inactive: Vec<String> = self
            .iter()
            .filter(|(_, track)| !Self::is_track_active(track))
            .map(|(name, _)| name.to_string())
            .collect();
        for name in &inactive {
            self.delete(name);
        }
        inactive.len()
    }

    fn is_track_active(track: &MotionTrack<K>) -> bool {
        let keyframes: Vec<&K> = track.iter().collect();
        keyframes
            .iter()
            .enumerate()
            .any(|(i, keyframe)| keyframe.is_active(keyframes.get(i + 1).copied()))
    }
}

/// 动画数据
#[derive(Debug, Clone, Default)]
pub struct Motion {
    /// 模型名称
    pub model_name: String,
    /// 骨骼动画轨道（骨骼名称 -> 轨道）
    pub bones: MotionTracks<BoneKeyframe>,
    /// Morph 动画轨道（Morph 名称 -> 轨道）
    pub morphs: MotionTracks<MorphKeyframe>,
    /// IK 动画轨道（IK 骨骼名称 -> 轨道）
    pub iks: MotionTracks<IkKeyframe>,
    /// 相机动画轨道（单一轨道）
    pub camera: MotionTrack<CameraKeyframe>,
}

impl Motion {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Default::default()
        }
    }

    /// 获取动画持续时间（最大帧索引）
    pub fn max_frame(&self) -> u32 {
        self.bones
            .max_frame()
            .max(self.morphs.max_frame())
            .max(self.iks.max_frame())
            .max(self.camera.max_frame_index())
    }

    /// 移除无效的骨骼和 Morph 轨道
    pub fn clean(&mut self) -> usize {
        self.bones.clean() + self.morphs.clean()
    }

    /// 使用全局配置精简骨骼轨道，返回新的 Motion
    pub fn reduce(&self) -> Motion {
        self.reduce_with(&get_config())
    }

    /// 使用指定配置精简骨骼轨道，返回新的 Motion
    pub fn reduce_with(&self, config: &ReduceConfig) -> Motion {
        Motion {
            model_name: self.model_name.clone(),
            bones: self.bones.reduce_with(config),
            morphs: self.morphs.clone(),
            iks: self.iks.clone(),
            camera: self.camera.clone(),
        }
    }
}
