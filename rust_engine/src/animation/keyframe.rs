//! 动画关键帧
//!
//! 所有关键帧类型共用 [`Keyframe`] 约定：按帧索引存放、能从前一帧插值、
//! 插入新帧时能把自己的曲线一分为二。

use std::fmt::Debug;

use glam::{Quat, Vec3};

use super::bezier_curve::BezierCurve;
use super::index_set::FrameIndex;
use super::interpolation::{
    coefficient, lerp_element_wise, lerp_f32, quat_near_eq, BoneCurveSet, CameraCurveSet,
};

/// 判断关键帧是否“有效”时使用的数值容差
pub const ACTIVE_EPSILON: f32 = 1e-5;

/// 关键帧约定
pub trait Keyframe: Clone + Debug + Send + Sync {
    /// 指定帧上的默认（中性）关键帧
    fn new_at(index: FrameIndex) -> Self;

    fn index(&self) -> FrameIndex;

    fn set_index(&mut self, index: FrameIndex);

    /// 是否为登录帧（文件中真实存在，而非插值得到）
    fn is_registered(&self) -> bool;

    fn set_registered(&mut self, registered: bool);

    /// `self` 为后一帧，求 `prev` 与 `self` 之间 `index` 处的关键帧
    fn interpolate_from(&self, prev: &Self, index: FrameIndex) -> Self;

    /// `self` 为后一帧，`inserted` 插入到 `prev` 与 `self` 之间时分割曲线
    fn split_curve_at(&mut self, _inserted: &mut Self, _prev: FrameIndex) {}

    /// 数值内容是否相同（忽略帧索引和曲线）
    fn payload_eq(&self, other: &Self, tolerance: f32) -> bool;

    /// 与中性值或后一帧有区别时视为有效
    fn is_active(&self, next: Option<&Self>) -> bool {
        let neutral = Self::new_at(self.index());
        if !self.payload_eq(&neutral, ACTIVE_EPSILON) {
            return true;
        }
        match next {
            Some(next) => !self.payload_eq(next, ACTIVE_EPSILON),
            None => false,
        }
    }
}

fn vec3_near_eq(a: Vec3, b: Vec3, tolerance: f32) -> bool {
    (a - b).abs().max_element() <= tolerance
}

fn option_vec3_eq(a: Option<Vec3>, b: Option<Vec3>, neutral: Vec3, tolerance: f32) -> bool {
    match (a, b) {
        (None, None) => true,
        _ => vec3_near_eq(a.unwrap_or(neutral), b.unwrap_or(neutral), tolerance),
    }
}

fn option_quat_eq(a: Option<Quat>, b: Option<Quat>, tolerance: f32) -> bool {
    match (a, b) {
        (None, None) => true,
        _ => quat_near_eq(
            a.unwrap_or(Quat::IDENTITY),
            b.unwrap_or(Quat::IDENTITY),
            tolerance,
        ),
    }
}

/// 两侧都未登录时保持 None，只有一侧时用中性值补齐
fn lerp_option_vec3(prev: Option<Vec3>, next: Option<Vec3>, neutral: Vec3, amounts: Vec3) -> Option<Vec3> {
    match (prev, next) {
        (None, None) => None,
        _ => Some(lerp_element_wise(
            prev.unwrap_or(neutral),
            next.unwrap_or(neutral),
            amounts,
        )),
    }
}

fn slerp_option(prev: Option<Quat>, next: Option<Quat>, amount: f32) -> Option<Quat> {
    match (prev, next) {
        (None, None) => None,
        _ => Some(
            prev.unwrap_or(Quat::IDENTITY)
                .slerp(next.unwrap_or(Quat::IDENTITY), amount),
        ),
    }
}

/// 骨骼关键帧
///
/// 各分量都是可选的，用来区分“登录为零”和“未登录”，叠加合成时需要。
#[derive(Clone, Debug, PartialEq)]
pub struct BoneKeyframe {
    pub index: FrameIndex,
    pub registered: bool,
    pub position: Option<Vec3>,
    pub cancelable_position: Option<Vec3>,
    pub rotation: Option<Quat>,
    pub cancelable_rotation: Option<Quat>,
    pub unit_rotation: Option<Quat>,
    pub scale: Option<Vec3>,
    pub cancelable_scale: Option<Vec3>,
    pub curves: Option<BoneCurveSet>,
    /// 该区间关闭物理（写入插值块的物理开关）
    pub disable_physics: bool,
}

impl BoneKeyframe {
    /// 登录帧，带平移和旋转
    pub fn new(index: impl Into<FrameIndex>, position: Vec3, rotation: Quat) -> Self {
        Self {
            registered: true,
            position: Some(position),
            rotation: Some(rotation),
            ..Self::new_at(index.into())
        }
    }

    pub fn with_curves(mut self, curves: BoneCurveSet) -> Self {
        self.curves = Some(curves);
        self
    }

    /// 未登录时为零
    pub fn position_or_zero(&self) -> Vec3 {
        self.position.unwrap_or(Vec3::ZERO)
    }

    /// 未登录时为单位旋转
    pub fn rotation_or_identity(&self) -> Quat {
        self.rotation.unwrap_or(Quat::IDENTITY)
    }

    /// 所有分量是否在容差内一致
    ///
    /// 平移和缩放按分量比较 `vector_tolerance`，旋转按夹角比较 `rotation_tolerance`。
    pub fn payload_near(&self, other: &Self, vector_tolerance: f32, rotation_tolerance: f32) -> bool {
        let vec3_eq = |a, b, neutral| option_vec3_eq(a, b, neutral, vector_tolerance);
        let quat_eq = |a, b| option_quat_eq(a, b, rotation_tolerance);
        vec3_eq(self.position, other.position, Vec3::ZERO)
            && vec3_eq(self.cancelable_position, other.cancelable_position, Vec3::ZERO)
            && quat_eq(self.rotation, other.rotation)
            && quat_eq(self.cancelable_rotation, other.cancelable_rotation)
            && quat_eq(self.unit_rotation, other.unit_rotation)
            && vec3_eq(self.scale, other.scale, Vec3::ONE)
            && vec3_eq(self.cancelable_scale, other.cancelable_scale, Vec3::ONE)
    }

    /// 四条曲线在 `index` 处的缓动比例（X, Y, Z, 旋转）
    fn ease_amounts(&self, prev: FrameIndex, index: FrameIndex) -> (Vec3, f32) {
        match &self.curves {
            Some(curves) => {
                let (p, n, i) = (prev.value(), self.index.value(), index.value());
                (
                    Vec3::new(
                        curves.x.evaluate(p, i, n) as f32,
                        curves.y.evaluate(p, i, n) as f32,
                        curves.z.evaluate(p, i, n) as f32,
                    ),
                    curves.rotation.evaluate(p, i, n) as f32,
                )
            }
            None => {
                let t = coefficient(prev, self.index, index);
                (Vec3::splat(t), t)
            }
        }
    }
}

impl Keyframe for BoneKeyframe {
    fn new_at(index: FrameIndex) -> Self {
        Self {
            index,
            registered: false,
            position: None,
            cancelable_position: None,
            rotation: None,
            cancelable_rotation: None,
            unit_rotation: None,
            scale: None,
            cancelable_scale: None,
            curves: None,
            disable_physics: false,
        }
    }

    fn index(&self) -> FrameIndex {
        self.index
    }

    fn set_index(&mut self, index: FrameIndex) {
        self.index = index;
    }

    fn is_registered(&self) -> bool {
        self.registered
    }

    fn set_registered(&mut self, registered: bool) {
        self.registered = registered;
    }

    fn interpolate_from(&self, prev: &Self, index: FrameIndex) -> Self {
        let (amounts, rotation_amount) = self.ease_amounts(prev.index, index);
        Self {
            index,
            registered: false,
            position: lerp_option_vec3(prev.position, self.position, Vec3::ZERO, amounts),
            cancelable_position: lerp_option_vec3(
                prev.cancelable_position,
                self.cancelable_position,
                Vec3::ZERO,
                amounts,
            ),
            rotation: slerp_option(prev.rotation, self.rotation, rotation_amount),
            cancelable_rotation: slerp_option(
                prev.cancelable_rotation,
                self.cancelable_rotation,
                rotation_amount,
            ),
            unit_rotation: slerp_option(prev.unit_rotation, self.unit_rotation, rotation_amount),
            scale: lerp_option_vec3(prev.scale, self.scale, Vec3::ONE, amounts),
            cancelable_scale: lerp_option_vec3(
                prev.cancelable_scale,
                self.cancelable_scale,
                Vec3::ONE,
                amounts,
            ),
            curves: self.curves.clone(),
            disable_physics: prev.disable_physics || self.disable_physics,
        }
    }

    fn split_curve_at(&mut self, inserted: &mut Self, prev: FrameIndex) {
        let Some(curves) = &self.curves else {
            inserted.curves = None;
            return;
        };
        let (left, right) = curves.split(prev.value(), inserted.index.value(), self.index.value());
        inserted.curves = Some(left);
        self.curves = Some(right);
    }

    fn payload_eq(&self, other: &Self, tolerance: f32) -> bool {
        self.payload_near(other, tolerance, tolerance)
    }
}

/// Morph 关键帧（线性插值，无曲线）
#[derive(Clone, Debug, PartialEq)]
pub struct MorphKeyframe {
    pub index: FrameIndex,
    pub registered: bool,
    pub weight: f32,
}

impl MorphKeyframe {
    pub fn new(index: impl Into<FrameIndex>, weight: f32) -> Self {
        Self {
            index: index.into(),
            registered: true,
            weight,
        }
    }
}

impl Keyframe for MorphKeyframe {
    fn new_at(index: FrameIndex) -> Self {
        Self {
            index,
            registered: false,
            weight: 0.0,
        }
    }

    fn index(&self) -> FrameIndex {
        self.index
    }

    fn set_index(&mut self, index: FrameIndex) {
        self.index = index;
    }

    fn is_registered(&self) -> bool {
        self.registered
    }

    fn set_registered(&mut self, registered: bool) {
        self.registered = registered;
    }

    fn interpolate_from(&self, prev: &Self, index: FrameIndex) -> Self {
        let coef = coefficient(prev.index, self.index, index);
        Self {
            index,
            registered: false,
            weight: lerp_f32(prev.weight, self.weight, coef),
        }
    }

    fn payload_eq(&self, other: &Self, tolerance: f32) -> bool {
        (self.weight - other.weight).abs() <= tolerance
    }
}

/// IK 开关关键帧（阶梯插值，保持前一帧的状态）
#[derive(Clone, Debug, PartialEq)]
pub struct IkKeyframe {
    pub index: FrameIndex,
    pub registered: bool,
    /// 模型是否显示（VMD 中按帧记录，与 IK 名无关）
    pub visible: bool,
    pub enabled: bool,
}

impl IkKeyframe {
    pub fn new(index: impl Into<FrameIndex>, visible: bool, enabled: bool) -> Self {
        Self {
            index: index.into(),
            registered: true,
            visible,
            enabled,
        }
    }
}

impl Keyframe for IkKeyframe {
    fn new_at(index: FrameIndex) -> Self {
        Self {
            index,
            registered: false,
            visible: true,
            enabled: true,
        }
    }

    fn index(&self) -> FrameIndex {
        self.index
    }

    fn set_index(&mut self, index: FrameIndex) {
        self.index = index;
    }

    fn is_registered(&self) -> bool {
        self.registered
    }

    fn set_registered(&mut self, registered: bool) {
        self.registered = registered;
    }

    fn interpolate_from(&self, prev: &Self, index: FrameIndex) -> Self {
        Self {
            index,
            registered: false,
            ..prev.clone()
        }
    }

    fn payload_eq(&self, other: &Self, _tolerance: f32) -> bool {
        self.visible == other.visible && self.enabled == other.enabled
    }
}

/// 相机关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct CameraKeyframe {
    pub index: FrameIndex,
    pub registered: bool,
    /// 注视点
    pub position: Vec3,
    /// 欧拉角（弧度）
    pub rotation: Vec3,
    pub distance: f32,
    pub view_of_angle: f32,
    pub is_perspective: bool,
    pub curves: CameraCurveSet,
}

impl Keyframe for CameraKeyframe {
    fn new_at(index: FrameIndex) -> Self {
        Self {
            index,
            registered: false,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            distance: 0.0,
            view_of_angle: 30.0,
            is_perspective: true,
            curves: CameraCurveSet::default(),
        }
    }

    fn index(&self) -> FrameIndex {
        self.index
    }

    fn set_index(&mut self, index: FrameIndex) {
        self.index = index;
    }

    fn is_registered(&self) -> bool {
        self.registered
    }

    fn set_registered(&mut self, registered: bool) {
        self.registered = registered;
    }

    fn interpolate_from(&self, prev: &Self, index: FrameIndex) -> Self {
        let (p, n, i) = (prev.index.value(), self.index.value(), index.value());
        let ease = |curve: &BezierCurve| curve.evaluate(p, i, n) as f32;
        let curves = &self.curves;

        let amounts = Vec3::new(ease(&curves.x), ease(&curves.y), ease(&curves.z));
        let rotation_amount = ease(&curves.rotation);

        Self {
            index,
            registered: false,
            position: lerp_element_wise(prev.position, self.position, amounts),
            rotation: prev.rotation.lerp(self.rotation, rotation_amount),
            distance: lerp_f32(prev.distance, self.distance, ease(&curves.distance)),
            view_of_angle: lerp_f32(prev.view_of_angle, self.view_of_angle, ease(&curves.view_of_angle)),
            is_perspective: prev.is_perspective,
            curves: self.curves.clone(),
        }
    }

    fn split_curve_at(&mut self, inserted: &mut Self, prev: FrameIndex) {
        let (left, right) = self
            .curves
            .split(prev.value(), inserted.index.value(), self.index.value());
        inserted.curves = left;
        self.curves = right;
    }

    fn payload_eq(&self, other: &Self, tolerance: f32) -> bool {
        vec3_near_eq(self.position, other.position, tolerance)
            && vec3_near_eq(self.rotation, other.rotation, tolerance)
            && (self.distance - other.distance).abs() <= tolerance
            && (self.view_of_angle - other.view_of_angle).abs() <= tolerance
            && self.is_perspective == other.is_perspective
    }
}
