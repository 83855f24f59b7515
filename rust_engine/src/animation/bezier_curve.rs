//! 贝塞尔插值曲线
//!
//! VMD 的插值曲线是起点 (0,0)、终点 (127,127) 固定的三次贝塞尔曲线，
//! 两个控制点量化到 0..=127 的整数域（每条曲线 4 字节）。
//! x 轴为时间比例，y 轴为数值比例。

use glam::DVec2;

/// 控制点坐标上限（文件中的字节值域）
pub const CURVE_MAX: f64 = 127.0;

/// 线性曲线的默认控制点
const LINEAR_START: f64 = 20.0;
const LINEAR_END: f64 = 107.0;

const SOLVE_EPSILON: f64 = 1e-12;
const SOLVE_MAX_ITERATIONS: usize = 64;

/// 贝塞尔插值曲线
///
/// 控制点以字节值域保存。分割产生的曲线保留小数精度，
/// 写入文件时才量化（见 [`BezierCurve::quantized`]）。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BezierCurve {
    pub start: DVec2,
    pub end: DVec2,
}

impl Default for BezierCurve {
    fn default() -> Self {
        Self::linear()
    }
}

impl BezierCurve {
    pub fn new(start: DVec2, end: DVec2) -> Self {
        Self { start, end }
    }

    /// 线性插值
    pub fn linear() -> Self {
        Self::new(DVec2::splat(LINEAR_START), DVec2::splat(LINEAR_END))
    }

    /// 从 VMD 插值数据创建（x1, y1, x2, y2）
    pub fn from_bytes(data: [u8; 4]) -> Self {
        Self::new(
            DVec2::new(data[0] as f64, data[1] as f64),
            DVec2::new(data[2] as f64, data[3] as f64),
        )
    }

    /// 量化后的字节（x1, y1, x2, y2）
    pub fn to_bytes(&self) -> [u8; 4] {
        let q = self.quantized();
        [q.start.x as u8, q.start.y as u8, q.end.x as u8, q.end.y as u8]
    }

    /// 四舍五入并钳制到字节值域
    pub fn quantized(&self) -> Self {
        let quantize = |v: DVec2| v.round().clamp(DVec2::ZERO, DVec2::splat(CURVE_MAX));
        Self::new(quantize(self.start), quantize(self.end))
    }

    /// 控制点都在对角线上时曲线就是直线
    pub fn is_linear(&self) -> bool {
        (self.start.x - self.start.y).abs() < SOLVE_EPSILON
            && (self.end.x - self.end.y).abs() < SOLVE_EPSILON
    }

    /// 求 `now` 在 `[prev, next]` 区间内的缓动比例
    ///
    /// `next <= prev` 的退化区间返回 0。
    pub fn evaluate(&self, prev: f32, now: f32, next: f32) -> f64 {
        let span = next as f64 - prev as f64;
        if span <= 0.0 {
            return 0.0;
        }
        let t = ((now as f64 - prev as f64) / span).clamp(0.0, 1.0);
        self.ease(t)
    }

    /// 时间比例 -> 数值比例
    pub fn ease(&self, t: f64) -> f64 {
        if t <= 0.0 {
            return 0.0;
        }
        if t >= 1.0 {
            return 1.0;
        }
        if self.is_linear() {
            return t;
        }
        let p1 = self.start / CURVE_MAX;
        let p2 = self.end / CURVE_MAX;
        let u = solve_parameter(p1.x, p2.x, t);
        bezier(p1.y, p2.y, u)
    }

    /// 在 `at` 处把曲线一分为二
    ///
    /// 左半段覆盖 `[prev, at]`，右半段覆盖 `[at, next]`，各自重新归一化。
    /// `at` 不在区间内部时返回 (线性, 原曲线)。
    pub fn split(&self, prev: f32, at: f32, next: f32) -> (Self, Self) {
        let span = next as f64 - prev as f64;
        if span <= 0.0 || at <= prev || at >= next {
            return (Self::linear(), *self);
        }
        if self.is_linear() {
            return (Self::linear(), Self::linear());
        }

        let t = (at as f64 - prev as f64) / span;
        let p0 = DVec2::ZERO;
        let p1 = self.start / CURVE_MAX;
        let p2 = self.end / CURVE_MAX;
        let p3 = DVec2::ONE;
        let u = solve_parameter(p1.x, p2.x, t);

        // De Casteljau
        let p01 = p0.lerp(p1, u);
        let p12 = p1.lerp(p2, u);
        let p23 = p2.lerp(p3, u);
        let p012 = p01.lerp(p12, u);
        let p123 = p12.lerp(p23, u);
        let p0123 = p012.lerp(p123, u);

        (
            Self::from_segment(p0, p01, p012, p0123),
            Self::from_segment(p0123, p123, p23, p3),
        )
    }

    /// 用采样值拟合曲线（默认拟合器）
    pub fn fit_from_samples(ratios: &[f64], tolerance: f64) -> Option<Self> {
        LeastSquaresFitter::default().fit(ratios, tolerance)
    }

    /// 把任意一段贝塞尔曲线归一化到单位正方形
    fn from_segment(a: DVec2, b: DVec2, c: DVec2, d: DVec2) -> Self {
        let scale = d - a;
        if scale.x <= SOLVE_EPSILON || scale.y.abs() <= SOLVE_EPSILON {
            return Self::linear();
        }
        Self::new((b - a) / scale * CURVE_MAX, (c - a) / scale * CURVE_MAX)
    }

    fn max_error(&self, xs: &[f64], ratios: &[f64], limit: f64) -> f64 {
        let mut worst = 0.0f64;
        for (&x, &ratio) in xs.iter().zip(ratios) {
            worst = worst.max((self.ease(x) - ratio).abs());
            if worst > limit {
                break;
            }
        }
        worst
    }
}

/// 端点固定为 0 和 1 的一维三次贝塞尔
fn bezier(p1: f64, p2: f64, u: f64) -> f64 {
    let s = 1.0 - u;
    3.0 * s * s * u * p1 + 3.0 * s * u * u * p2 + u * u * u
}

fn bezier_derivative(p1: f64, p2: f64, u: f64) -> f64 {
    let s = 1.0 - u;
    3.0 * s * s * p1 + 6.0 * s * u * (p2 - p1) + 3.0 * u * u * (1.0 - p2)
}

/// 求 x(u) = x 的参数 u
///
/// x 轴单调，牛顿迭代失败时退回二分，保证收敛。
fn solve_parameter(x1: f64, x2: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let (mut lo, mut hi) = (0.0f64, 1.0f64);
    let mut u = x;
    for _ in 0..SOLVE_MAX_ITERATIONS {
        let err = bezier(x1, x2, u) - x;
        if err.abs() < SOLVE_EPSILON {
            break;
        }
        if err > 0.0 {
            hi = u;
        } else {
            lo = u;
        }
        let dx = bezier_derivative(x1, x2, u);
        let candidate = if dx.abs() > 1e-9 { u - err / dx } else { f64::NAN };
        u = if candidate > lo && candidate < hi {
            candidate
        } else {
            0.5 * (lo + hi)
        };
        if hi - lo < SOLVE_EPSILON {
            break;
        }
    }
    u
}

/// 曲线拟合策略
///
/// 输入为时间均匀分布、已归一化到 [0,1] 的数值比例，
/// 找不到满足容差的量化曲线时返回 None。
pub trait CurveFitter: Send + Sync {
    fn fit(&self, ratios: &[f64], tolerance: f64) -> Option<BezierCurve>;
}

/// 最小二乘 + 量化邻域搜索
#[derive(Clone, Debug)]
pub struct LeastSquaresFitter {
    /// 量化后在每个坐标上搜索的半径（单位：字节值）
    pub search_radius: i32,
    /// 重新参数化的迭代次数
    pub refine_iterations: usize,
}

impl Default for LeastSquaresFitter {
    fn default() -> Self {
        Self {
            search_radius: 2,
            refine_iterations: 4,
        }
    }
}

impl LeastSquaresFitter {
    pub fn new(search_radius: i32, refine_iterations: usize) -> Self {
        Self {
            search_radius,
            refine_iterations,
        }
    }

    /// 连续域中的最小二乘解（控制点归一化到 [0,1]）
    fn least_squares(&self, xs: &[f64], ratios: &[f64]) -> Option<(DVec2, DVec2)> {
        let mut params = xs.to_vec();
        let mut p1 = DVec2::splat(1.0 / 3.0);
        let mut p2 = DVec2::splat(2.0 / 3.0);

        for _ in 0..=self.refine_iterations {
            let (mut a11, mut a12, mut a22) = (0.0, 0.0, 0.0);
            let (mut r1, mut r2) = (DVec2::ZERO, DVec2::ZERO);
            for ((&u, &x), &y) in params.iter().zip(xs).zip(ratios) {
                let s = 1.0 - u;
                let b1 = 3.0 * s * s * u;
                let b2 = 3.0 * s * u * u;
                let target = DVec2::new(x, y) - DVec2::splat(u * u * u);
                a11 += b1 * b1;
                a12 += b1 * b2;
                a22 += b2 * b2;
                r1 += target * b1;
                r2 += target * b2;
            }
            let det = a11 * a22 - a12 * a12;
            if det.abs() < SOLVE_EPSILON {
                break;
            }
            p1 = ((r1 * a22 - r2 * a12) / det).clamp(DVec2::ZERO, DVec2::ONE);
            p2 = ((r2 * a11 - r1 * a12) / det).clamp(DVec2::ZERO, DVec2::ONE);

            for (u, &x) in params.iter_mut().zip(xs) {
                *u = solve_parameter(p1.x, p2.x, x);
            }
        }

        if p1.is_finite() && p2.is_finite() {
            Some((p1, p2))
        } else {
            None
        }
    }

    fn search_quantized(
        &self,
        estimate: BezierCurve,
        xs: &[f64],
        ratios: &[f64],
        tolerance: f64,
    ) -> Option<BezierCurve> {
        let base = estimate.quantized();
        let r = self.search_radius.max(0);
        let in_range = |v: f64| (0.0..=CURVE_MAX).contains(&v);
        let mut best: Option<(f64, BezierCurve)> = None;

        for dx1 in -r..=r {
            for dy1 in -r..=r {
                for dx2 in -r..=r {
                    for dy2 in -r..=r {
                        let start = base.start + DVec2::new(dx1 as f64, dy1 as f64);
                        let end = base.end + DVec2::new(dx2 as f64, dy2 as f64);
                        if !(in_range(start.x) && in_range(start.y) && in_range(end.x) && in_range(end.y)) {
                            continue;
                        }
                        let candidate = BezierCurve::new(start, end);
                        let limit = best.map_or(tolerance, |(err, _)| err);
                        let err = candidate.max_error(xs, ratios, limit);
                        if err <= limit && best.map_or(true, |(best_err, _)| err < best_err) {
                            best = Some((err, candidate));
                        }
                    }
                }
            }
        }

        best.map(|(_, curve)| curve)
    }
}

impl CurveFitter for LeastSquaresFitter {
    fn fit(&self, ratios: &[f64], tolerance: f64) -> Option<BezierCurve> {
        let n = ratios.len();
        if n <= 2 {
            return Some(BezierCurve::linear());
        }
        // 控制点在值域内时曲线不会越出 [0,1]
        if ratios
            .iter()
            .any(|r| !r.is_finite() || *r < -tolerance || *r > 1.0 + tolerance)
        {
            return None;
        }

        let xs: Vec<f64> = (0..n).map(|i| i as f64 / (n - 1) as f64).collect();
        let linear = BezierCurve::linear();
        if linear.max_error(&xs, ratios, tolerance) <= tolerance {
            return Some(linear);
        }

        let (p1, p2) = self.least_squares(&xs, ratios)?;
        let estimate = BezierCurve::new(p1 * CURVE_MAX, p2 * CURVE_MAX);
        self.search_quantized(estimate, &xs, ratios, tolerance)
    }
}
