//! MMD 动作曲线引擎
//!
//! - 按帧索引有序存储的关键帧轨道（骨骼 / Morph / IK / 相机）
//! - VMD 贝塞尔插值曲线的求值、分割与拟合
//! - 64 字节骨骼插值块的编解码
//! - 逐帧采样动作的关键帧精简
//! - VMD 文件读写

pub mod animation;

pub use animation::{
    BezierCurve, BoneCurveSet, BoneKeyframe, CameraKeyframe, FrameIndex, IkKeyframe, Keyframe, MorphKeyframe,
    Motion, MotionTrack, MotionTracks, ReduceConfig, VmdFile,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MmdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("VMD parse error: {0}")]
    VmdParse(String),

    #[error("Animation error: {0}")]
    Animation(String),
}

pub type Result<T> = std::result::Result<T, MmdError>;
