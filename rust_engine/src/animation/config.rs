//! 动作精简配置
//!
//! 所有参数扁平化，直接在代码中修改默认值即可。

use std::sync::RwLock;
use std::time::Duration;

use once_cell::sync::Lazy;

/// 精简配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct ReduceConfig {
    // ========== 还原精度 ==========
    /// 平移还原误差上限（各分量绝对值），默认 0.1
    pub position_tolerance: f32,
    /// 旋转还原误差上限（夹角，弧度），默认 0.1
    pub rotation_tolerance: f32,

    // ========== 曲线拟合 ==========
    /// 旋转特征量（与单位旋转的点积）拟合容差，默认 0.01
    pub rotation_fit_tolerance: f64,
    /// 拐点检测阈值，默认 1e-4
    /// 斜率或曲率变化小于此值时不视为拐点
    pub breakpoint_epsilon: f64,
    /// 量化后邻域搜索半径（字节值），默认 2
    pub fit_search_radius: i32,
    /// 最小二乘重新参数化次数，默认 4
    pub fit_refine_iterations: usize,

    // ========== 运行 ==========
    /// 单条轨道的处理时限，超时后原样返回该轨道，默认 10 秒
    pub channel_deadline: Option<Duration>,
    /// 是否输出逐段调试日志，默认 false
    pub debug_log: bool,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            position_tolerance: 0.1,
            rotation_tolerance: 0.1,

            rotation_fit_tolerance: 0.01,
            breakpoint_epsilon: 1e-4,
            // 搜索量为 (2r+1)^4，r=2 时 625 个候选
            fit_search_radius: 2,
            fit_refine_iterations: 4,

            channel_deadline: Some(Duration::from_secs(10)),
            debug_log: false,
        }
    }
}

/// 全局配置实例
static REDUCE_CONFIG: Lazy<RwLock<ReduceConfig>> = Lazy::new(|| RwLock::new(ReduceConfig::default()));

/// 获取当前配置（只读）
pub fn get_config() -> ReduceConfig {
    match REDUCE_CONFIG.read() {
        Ok(config) => config.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: ReduceConfig) {
    match REDUCE_CONFIG.write() {
        Ok(mut guard) => *guard = config,
        Err(poisoned) => *poisoned.into_inner() = config,
    }
}

/// 重置为默认配置
pub fn reset_config() {
    set_config(ReduceConfig::default());
}
