//! Float comparison helpers with one shared epsilon.

pub const F64_EPSILON: f64 = 1e-6;

#[inline]
pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < F64_EPSILON
}

#[inline]
pub fn approx_zero(a: f64) -> bool {
    a.abs() < F64_EPSILON
}
