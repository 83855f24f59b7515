//! 动画系统
//!
//! 关键帧轨道、贝塞尔插值曲线、骨骼动作精简以及 VMD 读写。

mod bezier_curve;
mod config;
mod index_set;
mod interpolation;
mod keyframe;
mod motion;
mod motion_track;
mod reduce;
mod vmd_file;

pub use bezier_curve::{BezierCurve, CurveFitter, LeastSquaresFitter, CURVE_MAX};
pub use config::{get_config, reset_config, set_config, ReduceConfig};
pub use index_set::{FrameIndex, FrameIndexSet};
pub use interpolation::{
    coefficient, quat_near_eq, BoneCurveSet, CameraCurveSet, BONE_CURVE_BLOCK_LEN, CAMERA_CURVE_BLOCK_LEN,
};
pub use keyframe::{BoneKeyframe, CameraKeyframe, IkKeyframe, Keyframe, MorphKeyframe, ACTIVE_EPSILON};
pub use motion::{Motion, MotionTracks};
pub use motion_track::MotionTrack;
pub use reduce::{reduce_track, reduce_track_with};
pub use vmd_file::VmdFile;
