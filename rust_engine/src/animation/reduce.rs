//! 动作精简
//!
//! 把逐帧采样的骨骼轨道压缩成少量带拟合曲线的关键帧：
//!
//! 1. 逐帧采样 X/Y/Z 平移和旋转特征量（与单位旋转的点积）
//! 2. 在每个特征量的斜率、曲率符号变化处取拐点，合并排序
//! 3. 从起点向后隔两个拐点尝试拟合，成功则继续延伸，失败则向起点二分
//! 4. 最后一个拐点就是末帧，循环结束时全程覆盖
//!
//! 输出是新的轨道，输入不会被修改。任何失败都退回原始关键帧，
//! 最坏情况是没有压缩，不会丢失数据。

use std::collections::BTreeSet;
use std::time::Instant;

use glam::Quat;
use rayon::prelude::*;

use super::bezier_curve::{BezierCurve, CurveFitter, LeastSquaresFitter};
use super::config::{get_config, ReduceConfig};
use super::index_set::FrameIndex;
use super::interpolation::BoneCurveSet;
use super::keyframe::{BoneKeyframe, Keyframe};
use super::motion::MotionTracks;
use super::motion_track::MotionTrack;

/// 精简单条骨骼轨道（默认拟合器）
pub fn reduce_track(track: &MotionTrack<BoneKeyframe>, config: &ReduceConfig) -> MotionTrack<BoneKeyframe> {
    let fitter = LeastSquaresFitter::new(config.fit_search_radius, config.fit_refine_iterations);
    reduce_track_with(track, config, &fitter)
}

/// 精简单条骨骼轨道（指定拟合器）
pub fn reduce_track_with(
    track: &MotionTrack<BoneKeyframe>,
    config: &ReduceConfig,
    fitter: &dyn CurveFitter,
) -> MotionTrack<BoneKeyframe> {
    let (Some(first), Some(last)) = (track.first_index(), track.last_index()) else {
        return track.clone();
    };
    let start = first.value().floor() as i32;
    let end = last.value().ceil() as i32;
    if end - start < 2 {
        return track.clone();
    }

    let samples = Samples::collect(track, start, end);
    let breakpoints = samples.breakpoints(config.breakpoint_epsilon);
    if breakpoints.len() < 3 {
        return track.clone();
    }

    let reducer = Reducer {
        samples: &samples,
        config,
        fitter,
        deadline: config.channel_deadline.map(|limit| Instant::now() + limit),
    };

    match reducer.run(&breakpoints) {
        Some(keyframes) if keyframes.len() < track.len() => keyframes.into_iter().collect(),
        Some(_) => track.clone(),
        None => {
            log::warn!(
                "动作精简超时，轨道保持原样 ({} 帧)",
                track.len()
            );
            track.clone()
        }
    }
}

impl MotionTracks<BoneKeyframe> {
    /// 使用全局配置精简所有骨骼轨道
    pub fn reduce(&self) -> Self {
        self.reduce_with(&get_config())
    }

    /// 每条轨道一个任务并行精简，全部完成后返回新的集合
    pub fn reduce_with(&self, config: &ReduceConfig) -> Self {
        let names = self.names();
        let reduced: Vec<(String, MotionTrack<BoneKeyframe>)> = names
            .par_iter()
            .filter_map(|name| {
                let track = self.find(name)?;
                let result = reduce_track(track, config);
                log::debug!("骨骼轨道精简: {} {} -> {} 帧", name, track.len(), result.len());
                Some((name.clone(), result))
            })
            .collect();

        let before: usize = self.iter().map(|(_, track)| track.len()).sum();
        let mut tracks = MotionTracks::new();
        for (name, track) in reduced {
            tracks.set(&name, track);
        }
        let after: usize = tracks.iter().map(|(_, track)| track.len()).sum();
        log::info!(
            "动作精简完成: {} 条轨道, 关键帧 {} -> {}",
            tracks.len(),
            before,
            after
        );
        tracks
    }
}

/// 逐帧采样结果
struct Samples {
    start: i32,
    frames: Vec<BoneKeyframe>,
    /// X, Y, Z 平移与旋转特征量
    features: [Vec<f64>; 4],
}

impl Samples {
    fn collect(track: &MotionTrack<BoneKeyframe>, start: i32, end: i32) -> Self {
        let frames: Vec<BoneKeyframe> = (start..=end).map(|frame| track.get(frame)).collect();
        let feature = |f: fn(&BoneKeyframe) -> f64| frames.iter().map(f).collect::<Vec<f64>>();
        let features = [
            feature(|k| k.position_or_zero().x as f64),
            feature(|k| k.position_or_zero().y as f64),
            feature(|k| k.position_or_zero().z as f64),
            // q 与 -q 是同一旋转，取绝对值
            feature(|k| Quat::IDENTITY.dot(k.rotation_or_identity()).abs() as f64),
        ];
        Self {
            start,
            frames,
            features,
        }
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn index_of(&self, offset: usize) -> FrameIndex {
        FrameIndex::from(self.start + offset as i32)
    }

    /// 采样值原样作为登录帧
    fn raw(&self, offset: usize) -> BoneKeyframe {
        let mut keyframe = self.frames[offset].clone();
        keyframe.set_index(self.index_of(offset));
        keyframe.set_registered(true);
        keyframe.curves = None;
        keyframe
    }

    /// 所有特征量的拐点并集（含首尾），升序
    fn breakpoints(&self, epsilon: f64) -> Vec<usize> {
        let mut offsets: BTreeSet<usize> = BTreeSet::new();
        offsets.insert(0);
        offsets.insert(self.len() - 1);
        for values in &self.features {
            offsets.extend(detect_breakpoints(values, epsilon));
        }
        offsets.into_iter().collect()
    }
}

fn sign(value: f64, epsilon: f64) -> i8 {
    if value > epsilon {
        1
    } else if value < -epsilon {
        -1
    } else {
        0
    }
}

/// 单个特征量的拐点：斜率符号变化（含开始/停止运动）或曲率符号翻转
fn detect_breakpoints(values: &[f64], epsilon: f64) -> Vec<usize> {
    let n = values.len();
    if n < 3 {
        return Vec::new();
    }
    let (min, max) = values
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if max - min <= epsilon {
        return Vec::new();
    }

    let mut found = Vec::new();
    let mut last_curvature = 0i8;
    for i in 1..n - 1 {
        let slope_before = sign(values[i] - values[i - 1], epsilon);
        let slope_after = sign(values[i + 1] - values[i], epsilon);
        let curvature = sign(values[i + 1] - 2.0 * values[i] + values[i - 1], epsilon);

        let inflection = curvature != 0 && last_curvature != 0 && curvature != last_curvature;
        if slope_before != slope_after || inflection {
            found.push(i);
        }
        if curvature != 0 {
            last_curvature = curvature;
        }
    }
    found
}

struct Reducer<'a> {
    samples: &'a Samples,
    config: &'a ReduceConfig,
    fitter: &'a dyn CurveFitter,
    deadline: Option<Instant>,
}

impl Reducer<'_> {
    /// 逐段生长，返回输出关键帧；超时返回 None
    fn run(&self, breakpoints: &[usize]) -> Option<Vec<BoneKeyframe>> {
        let last = self.samples.len() - 1;
        let mut keyframes = vec![self.samples.raw(0)];
        let mut start = 0usize;

        while start < last {
            if self.expired() {
                return None;
            }
            let ahead = &breakpoints[breakpoints.partition_point(|&b| b <= start)..];
            let (end, keyframe) = self.grow(start, ahead);
            if self.config.debug_log {
                log::debug!(
                    "精简区间 [{}, {}] 曲线={}",
                    self.samples.index_of(start),
                    self.samples.index_of(end),
                    keyframe.curves.is_some()
                );
            }
            keyframes.push(keyframe);
            start = end;
        }

        Some(keyframes)
    }

    /// 从 `start` 开始隔两个拐点延伸，拟合全部失败时向起点二分
    fn grow(&self, start: usize, ahead: &[usize]) -> (usize, BoneKeyframe) {
        let last = ahead.len() - 1;
        let mut k = last.min(1);
        let mut accepted = None;

        loop {
            match self.fit_segment(start, ahead[k]) {
                Some(keyframe) => {
                    accepted = Some((ahead[k], keyframe));
                    if k == last || self.expired() {
                        break;
                    }
                    k = last.min(k + 2);
                }
                None => break,
            }
        }

        match accepted {
            Some(result) => result,
            None => self.bisect(start, ahead[k]),
        }
    }

    fn bisect(&self, start: usize, failed_end: usize) -> (usize, BoneKeyframe) {
        let mut end = failed_end;
        loop {
            let mid = start + (end - start) / 2;
            if mid <= start {
                // 区间无法再缩小：原样保留末端帧
                return (end, self.samples.raw(end));
            }
            end = mid;
            if let Some(keyframe) = self.fit_segment(start, end) {
                return (end, keyframe);
            }
        }
    }

    /// 拟合 `[start, end]` 的四条曲线并逐帧校验
    fn fit_segment(&self, start: usize, end: usize) -> Option<BoneKeyframe> {
        let [x, y, z, rotation] = &self.samples.features;
        let position_tolerance = self.config.position_tolerance as f64;
        let curves = BoneCurveSet::new(
            self.fit_feature(&x[start..=end], position_tolerance)?,
            self.fit_feature(&y[start..=end], position_tolerance)?,
            self.fit_feature(&z[start..=end], position_tolerance)?,
            self.fit_feature(&rotation[start..=end], self.config.rotation_fit_tolerance)?,
        );

        let mut keyframe = self.samples.raw(end);
        keyframe.curves = Some(curves);

        let prev = &self.samples.frames[start];
        let valid = (start + 1..end).all(|offset| {
            let expected = &self.samples.frames[offset];
            // 缩放、可取消分量等也随这四条曲线缓动，全部分量都要还原
            keyframe
                .interpolate_from(prev, self.samples.index_of(offset))
                .payload_near(expected, self.config.position_tolerance, self.config.rotation_tolerance)
        });

        valid.then_some(keyframe)
    }

    /// 单个特征量归一化后交给拟合器；容差按值域换算成比例
    fn fit_feature(&self, values: &[f64], tolerance: f64) -> Option<BezierCurve> {
        let first = values[0];
        let range = values[values.len() - 1] - first;
        if range == 0.0 {
            return values
                .iter()
                .all(|v| (v - first).abs() <= tolerance)
                .then(BezierCurve::linear);
        }
        let ratios: Vec<f64> = values.iter().map(|v| (v - first) / range).collect();
        self.fitter.fit(&ratios, tolerance / range.abs())
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::quat_near_eq;
    use glam::Vec3;
    use std::f32::consts::PI;
    use std::time::Duration;

    fn dense_track(len: u32, sample: impl Fn(u32) -> (Vec3, Quat)) -> MotionTrack<BoneKeyframe> {
        (0..=len)
            .map(|f| {
                let (position, rotation) = sample(f);
                BoneKeyframe::new(f, position, rotation)
            })
            .collect()
    }

    fn wave(f: u32) -> (Vec3, Quat) {
        let f = f as f32;
        (
            Vec3::new(0.1 * f, 10.0 * (f * PI / 30.0).sin(), 2.0),
            Quat::IDENTITY,
        )
    }

    fn twist(f: u32) -> (Vec3, Quat) {
        let f = f as f32;
        (
            Vec3::new(0.0, 5.0 * (f * PI / 40.0).sin(), 0.0),
            Quat::from_rotation_z(0.6 * (f * PI / 40.0).sin()),
        )
    }

    fn assert_fidelity(original: &MotionTrack<BoneKeyframe>, reduced: &MotionTrack<BoneKeyframe>, config: &ReduceConfig) {
        for f in 0..=original.max_frame_index() {
            let expected = original.get(f);
            let actual = reduced.get(f);
            let error = (actual.position_or_zero() - expected.position_or_zero())
                .abs()
                .max_element();
            assert!(error <= config.position_tolerance, "frame {f}: position error {error}");
            assert!(
                quat_near_eq(
                    actual.rotation_or_identity(),
                    expected.rotation_or_identity(),
                    config.rotation_tolerance
                ),
                "frame {f}: rotation mismatch"
            );
        }
    }

    #[test]
    fn test_detect_breakpoints() {
        let ramp: Vec<f64> = (0..50).map(|i| i as f64 * 0.5).collect();
        assert!(detect_breakpoints(&ramp, 1e-4).is_empty());

        let constant = vec![3.0; 20];
        assert!(detect_breakpoints(&constant, 1e-4).is_empty());

        let sine: Vec<f64> = (0..=60).map(|i| (i as f64 * std::f64::consts::PI / 30.0).sin()).collect();
        let found = detect_breakpoints(&sine, 1e-4);
        assert!(found.contains(&15));
        assert!(found.contains(&45));
        // 30 附近的拐点
        assert!(found.iter().any(|&i| (29..=31).contains(&i)));
    }

    #[test]
    fn test_hold_then_move_marks_start() {
        let values: Vec<f64> = (0..20).map(|i| if i < 10 { 0.0 } else { (i - 10) as f64 }).collect();
        assert_eq!(detect_breakpoints(&values, 1e-4), vec![10]);
    }

    #[test]
    fn test_ramp_is_unchanged() {
        let config = ReduceConfig::default();
        let track = dense_track(60, |f| (Vec3::new(f as f32, 2.0 * f as f32, 0.0), Quat::IDENTITY));
        let reduced = reduce_track(&track, &config);
        assert_eq!(reduced.len(), track.len());
        for f in 0..=60 {
            assert_eq!(reduced.find(f), track.find(f));
        }
    }

    #[test]
    fn test_reduces_wave_within_tolerance() {
        let config = ReduceConfig::default();
        let track = dense_track(120, wave);
        let reduced = reduce_track(&track, &config);
        assert!(reduced.len() < track.len(), "{} keyframes left", reduced.len());
        assert!(!reduced.is_empty());
        assert_eq!(reduced.first_index(), track.first_index());
        assert_eq!(reduced.last_index(), track.last_index());
        assert_fidelity(&track, &reduced, &config);
    }

    #[test]
    fn test_rotation_within_tolerance() {
        let config = ReduceConfig::default();
        let track = dense_track(160, twist);
        let reduced = reduce_track(&track, &config);
        assert!(reduced.len() <= track.len());
        assert_fidelity(&track, &reduced, &config);
    }

    #[test]
    fn test_scale_and_cancelable_preserved() {
        let config = ReduceConfig::default();
        let track = dense_track(120, wave);
        let track: MotionTrack<BoneKeyframe> = track
            .iter()
            .map(|keyframe| {
                let f = keyframe.index.value();
                let mut keyframe = keyframe.clone();
                keyframe.scale = Some(Vec3::splat(1.0 + 0.5 * (f * PI / 7.0).sin()));
                keyframe.cancelable_position = Some(Vec3::new(0.0, 3.0 * (f * PI / 9.0).cos(), 0.0));
                keyframe
            })
            .collect();

        let reduced = reduce_track(&track, &config);
        assert!(reduced.len() <= track.len());
        assert_fidelity(&track, &reduced, &config);
        for f in 0..=120u32 {
            let expected = track.get(f);
            let actual = reduced.get(f);
            let scale_error = (actual.scale.unwrap() - expected.scale.unwrap()).abs().max_element();
            let cancelable_error = (actual.cancelable_position.unwrap() - expected.cancelable_position.unwrap())
                .abs()
                .max_element();
            assert!(scale_error <= config.position_tolerance, "frame {f}: scale error {scale_error}");
            assert!(
                cancelable_error <= config.position_tolerance,
                "frame {f}: cancelable position error {cancelable_error}"
            );
        }
    }

    #[test]
    fn test_never_adds_keyframes() {
        let config = ReduceConfig::default();
        let eased = BoneCurveSet::new(
            BezierCurve::from_bytes([127, 0, 0, 127]),
            BezierCurve::from_bytes([0, 127, 127, 0]),
            BezierCurve::linear(),
            BezierCurve::linear(),
        );
        let track: MotionTrack<BoneKeyframe> = [
            BoneKeyframe::new(0, Vec3::ZERO, Quat::IDENTITY),
            BoneKeyframe::new(30, Vec3::new(8.0, -3.0, 0.0), Quat::from_rotation_y(0.4)).with_curves(eased.clone()),
            BoneKeyframe::new(60, Vec3::new(-2.0, 6.0, 1.0), Quat::IDENTITY).with_curves(eased),
        ]
        .into_iter()
        .collect();
        let reduced = reduce_track(&track, &config);
        assert!(reduced.len() <= track.len());
        assert_fidelity(&track, &reduced, &config);
    }

    #[test]
    fn test_single_keyframe() {
        let track: MotionTrack<BoneKeyframe> =
            std::iter::once(BoneKeyframe::new(5, Vec3::X, Quat::IDENTITY)).collect();
        let reduced = reduce_track(&track, &ReduceConfig::default());
        assert_eq!(reduced.len(), 1);
        assert_eq!(reduced.find(5), track.find(5));

        let empty: MotionTrack<BoneKeyframe> = MotionTrack::new();
        assert!(reduce_track(&empty, &ReduceConfig::default()).is_empty());
    }

    #[test]
    fn test_deadline_returns_input() {
        let config = ReduceConfig {
            channel_deadline: Some(Duration::ZERO),
            ..Default::default()
        };
        let track = dense_track(120, wave);
        let reduced = reduce_track(&track, &config);
        assert_eq!(reduced.len(), track.len());
    }

    #[test]
    fn test_reduce_collection() {
        let config = ReduceConfig::default();
        let mut tracks: MotionTracks<BoneKeyframe> = MotionTracks::new();
        tracks.set("センター", dense_track(120, wave));
        tracks.set("右腕", dense_track(60, |f| (Vec3::splat(f as f32), Quat::IDENTITY)));
        tracks.set("左腕", dense_track(160, twist));

        let reduced = tracks.reduce_with(&config);
        assert_eq!(reduced.names(), tracks.names());
        // 输入不变
        assert_eq!(tracks.find("センター").unwrap().len(), 121);

        for (name, original) in tracks.iter() {
            let result = reduced.find(name).unwrap();
            assert!(result.len() <= original.len());
            assert!(!result.is_empty());
            assert_fidelity(original, result, &config);
        }
        assert!(reduced.find("センター").unwrap().len() < 121);
        assert_eq!(reduced.find("右腕").unwrap().len(), 61);
    }
}
