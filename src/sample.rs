//! Complex baseband sample type shared by every DSP component.
//!
//! Design note: the original C core aliases `complex double` directly onto
//! a two-element float array. We keep the real/imaginary split explicit
//! through `num_complex::Complex64` instead, which is portable to any
//! language binding and gives every call site named `.re`/`.im` accessors.

pub type Sample = num_complex::Complex64;

/// Build a unit-modulus phasor for angle `theta` radians.
pub fn unit_phasor(theta: f64) -> Sample {
    Sample::new(theta.cos(), theta.sin())
}

/// Build a unit-modulus phasor advancing at `cycles` cycles (i.e. `2*pi*cycles` radians).
pub fn cispi(cycles: f64) -> Sample {
    unit_phasor(2.0 * std::f64::consts::PI * cycles)
}
