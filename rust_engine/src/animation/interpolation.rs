//! 插值曲线组与插值工具函数
//!
//! 骨骼关键帧带 4 条曲线（X/Y/Z 平移 + 旋转），在 VMD 中打包成 64 字节；
//! 相机关键帧带 6 条曲线，打包成 24 字节。

use glam::{Quat, Vec3};

use crate::{MmdError, Result};

use super::bezier_curve::BezierCurve;
use super::index_set::FrameIndex;

/// 骨骼曲线块长度
pub const BONE_CURVE_BLOCK_LEN: usize = 64;
/// 相机曲线块长度
pub const CAMERA_CURVE_BLOCK_LEN: usize = 24;

/// 第 0 行第 2、3 字节：物理开关（关闭物理时写 99, 15）
const PHYSICS_FLAG_OFFSET: usize = 2;
const PHYSICS_DISABLED_FLAG: [u8; 2] = [99, 15];

/// 骨骼关键帧的插值曲线组
///
/// 从文件读入时会保留原始 64 字节，曲线未改动时原样写回。
#[derive(Clone, Debug, Default)]
pub struct BoneCurveSet {
    pub x: BezierCurve,
    pub y: BezierCurve,
    pub z: BezierCurve,
    pub rotation: BezierCurve,
    cache: Option<[u8; BONE_CURVE_BLOCK_LEN]>,
}

impl PartialEq for BoneCurveSet {
    fn eq(&self, other: &Self) -> bool {
        self.curves() == other.curves()
    }
}

impl BoneCurveSet {
    pub fn new(x: BezierCurve, y: BezierCurve, z: BezierCurve, rotation: BezierCurve) -> Self {
        Self {
            x,
            y,
            z,
            rotation,
            cache: None,
        }
    }

    pub fn curves(&self) -> [BezierCurve; 4] {
        [self.x, self.y, self.z, self.rotation]
    }

    pub fn is_linear(&self) -> bool {
        self.curves().iter().all(BezierCurve::is_linear)
    }

    /// 从 64 字节插值块解析
    ///
    /// 每行 16 字节，第 n 行是完整序列左移 n 字节；
    /// 各曲线从自己所在的行读取，避开第 0 行的物理开关。
    pub fn from_bytes(values: &[u8; BONE_CURVE_BLOCK_LEN]) -> Self {
        let [x, y, z, rotation] = Self::decode(values);
        Self {
            x,
            y,
            z,
            rotation,
            cache: Some(*values),
        }
    }

    /// 从任意长度切片解析，长度不是 64 时报错
    pub fn try_from_slice(values: &[u8]) -> Result<Self> {
        let block: &[u8; BONE_CURVE_BLOCK_LEN] = values.try_into().map_err(|_| {
            MmdError::VmdParse(format!(
                "Invalid bone curve block length: {} (expected {})",
                values.len(),
                BONE_CURVE_BLOCK_LEN
            ))
        })?;
        Ok(Self::from_bytes(block))
    }

    /// 插值块中是否标记了关闭物理
    pub fn is_physics_disabled(values: &[u8; BONE_CURVE_BLOCK_LEN]) -> bool {
        values[PHYSICS_FLAG_OFFSET..PHYSICS_FLAG_OFFSET + 2] == PHYSICS_DISABLED_FLAG
    }

    /// 打包为 64 字节
    pub fn to_bytes(&self, disable_physics: bool) -> [u8; BONE_CURVE_BLOCK_LEN] {
        if let Some(cache) = &self.cache {
            let unchanged = Self::decode(cache) == self.curves().map(|c| c.quantized());
            if unchanged && Self::is_physics_disabled(cache) == disable_physics {
                return *cache;
            }
        }
        self.merge(disable_physics)
    }

    /// 在 `at` 处分割全部曲线
    pub fn split(&self, prev: f32, at: f32, next: f32) -> (Self, Self) {
        let (x0, x1) = self.x.split(prev, at, next);
        let (y0, y1) = self.y.split(prev, at, next);
        let (z0, z1) = self.z.split(prev, at, next);
        let (r0, r1) = self.rotation.split(prev, at, next);
        (Self::new(x0, y0, z0, r0), Self::new(x1, y1, z1, r1))
    }

    fn decode(values: &[u8; BONE_CURVE_BLOCK_LEN]) -> [BezierCurve; 4] {
        let curve = |row: usize| {
            let base = row * 16;
            BezierCurve::from_bytes([
                values[base],
                values[base + 4],
                values[base + 8],
                values[base + 12],
            ])
        };
        [curve(0), curve(1), curve(2), curve(3)]
    }

    fn merge(&self, disable_physics: bool) -> [u8; BONE_CURVE_BLOCK_LEN] {
        let [xx1, xy1, xx2, xy2] = self.x.to_bytes();
        let [yx1, yy1, yx2, yy2] = self.y.to_bytes();
        let [zx1, zy1, zx2, zy2] = self.z.to_bytes();
        let [rx1, ry1, rx2, ry2] = self.rotation.to_bytes();
        let full = [
            xx1, yx1, zx1, rx1, xy1, yy1, zy1, ry1, xx2, yx2, zx2, rx2, xy2, yy2, zy2, ry2,
        ];

        let mut values = [0u8; BONE_CURVE_BLOCK_LEN];
        values[..16].copy_from_slice(&full);
        values[PHYSICS_FLAG_OFFSET..PHYSICS_FLAG_OFFSET + 2].copy_from_slice(if disable_physics {
            &PHYSICS_DISABLED_FLAG
        } else {
            &[0, 0]
        });
        values[16..31].copy_from_slice(&full[1..]);
        values[31] = 1;
        values[32..46].copy_from_slice(&full[2..]);
        values[48..61].copy_from_slice(&full[3..]);
        values
    }
}

/// 相机关键帧的插值曲线组
///
/// 24 字节，每条曲线按 x1, x2, y1, y2 顺序存放。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CameraCurveSet {
    pub x: BezierCurve,
    pub y: BezierCurve,
    pub z: BezierCurve,
    pub rotation: BezierCurve,
    pub distance: BezierCurve,
    pub view_of_angle: BezierCurve,
}

impl CameraCurveSet {
    pub fn curves(&self) -> [BezierCurve; 6] {
        [
            self.x,
            self.y,
            self.z,
            self.rotation,
            self.distance,
            self.view_of_angle,
        ]
    }

    pub fn from_bytes(values: &[u8; CAMERA_CURVE_BLOCK_LEN]) -> Self {
        let curve = |i: usize| {
            let b = &values[i * 4..i * 4 + 4];
            BezierCurve::from_bytes([b[0], b[2], b[1], b[3]])
        };
        Self {
            x: curve(0),
            y: curve(1),
            z: curve(2),
            rotation: curve(3),
            distance: curve(4),
            view_of_angle: curve(5),
        }
    }

    pub fn to_bytes(&self) -> [u8; CAMERA_CURVE_BLOCK_LEN] {
        let mut values = [0u8; CAMERA_CURVE_BLOCK_LEN];
        for (chunk, curve) in values.chunks_exact_mut(4).zip(self.curves()) {
            let [x1, y1, x2, y2] = curve.to_bytes();
            chunk.copy_from_slice(&[x1, x2, y1, y2]);
        }
        values
    }

    pub fn split(&self, prev: f32, at: f32, next: f32) -> (Self, Self) {
        let [x, y, z, rotation, distance, view_of_angle] =
            self.curves().map(|c| c.split(prev, at, next));
        (
            Self {
                x: x.0,
                y: y.0,
                z: z.0,
                rotation: rotation.0,
                distance: distance.0,
                view_of_angle: view_of_angle.0,
            },
            Self {
                x: x.1,
                y: y.1,
                z: z.1,
                rotation: rotation.1,
                distance: distance.1,
                view_of_angle: view_of_angle.1,
            },
        )
    }
}

/// 线性时间比例，退化区间返回 0
pub fn coefficient(prev: FrameIndex, next: FrameIndex, now: FrameIndex) -> f32 {
    let span = next.value() - prev.value();
    if span <= 0.0 {
        return 0.0;
    }
    ((now.value() - prev.value()) / span).clamp(0.0, 1.0)
}

pub fn lerp_f32(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// 按分量使用不同系数插值
pub fn lerp_element_wise(a: Vec3, b: Vec3, amounts: Vec3) -> Vec3 {
    a + (b - a) * amounts
}

/// 两个旋转的夹角是否在 `tolerance`（弧度）以内
pub fn quat_near_eq(a: Quat, b: Quat, tolerance: f32) -> bool {
    let (a, b) = (a.normalize(), b.normalize());
    let dot = a.dot(b).abs().min(1.0);
    dot >= (tolerance * 0.5).cos()
}
