use crate::error::{GraphError, Result};
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};

// Weight shapes are (n_in, n_out): fan-in is the second to last axis and fan-out
// the last one.
fn fans(shape: &[usize]) -> (usize, usize) {
    let fan_in = if shape.len() >= 2 {
        shape[shape.len() - 2]
    } else {
        1
    };
    let fan_out = shape.last().copied().unwrap_or(1);
    (fan_in, fan_out)
}

fn sample<D: Distribution<f64>, R: Rng + ?Sized>(
    shape: &[usize],
    distribution: D,
    rng: &mut R,
) -> ArrayD<f64> {
    ArrayD::from_shape_simple_fn(IxDyn(shape), || distribution.sample(rng))
}

fn uniform(bound: f64) -> Result<Uniform<f64>> {
    Uniform::new_inclusive(-bound, bound)
        .map_err(|e| GraphError::Config(format!("Invalid uniform bound {}: {}", bound, e)))
}

fn normal(std: f64) -> Result<Normal<f64>> {
    Normal::new(0.0, std)
        .map_err(|e| GraphError::Config(format!("Invalid standard deviation {}: {}", std, e)))
}

/// Xavier/Glorot uniform initialization.
/// Samples from U(-a, a) where a = gain * sqrt(6 / (fan_in + fan_out)).
pub fn xavier_uniform<R: Rng + ?Sized>(shape: &[usize], gain: f64, rng: &mut R) -> Result<ArrayD<f64>> {
    let (fan_in, fan_out) = fans(shape);
    let bound = gain * (6.0 / (fan_in + fan_out) as f64).sqrt();
    Ok(sample(shape, uniform(bound)?, rng))
}

/// Xavier/Glorot normal initialization.
/// Samples from N(0, std) where std = gain * sqrt(2 / (fan_in + fan_out)).
pub fn xavier_normal<R: Rng + ?Sized>(shape: &[usize], gain: f64, rng: &mut R) -> Result<ArrayD<f64>> {
    let (fan_in, fan_out) = fans(shape);
    let std = gain * (2.0 / (fan_in + fan_out) as f64).sqrt();
    Ok(sample(shape, normal(std)?, rng))
}

/// Kaiming/He uniform initialization for ReLU layers.
/// Samples from U(-bound, bound) where bound = sqrt(6 / fan_in).
pub fn kaiming_uniform<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Result<ArrayD<f64>> {
    let (fan_in, _) = fans(shape);
    let bound = (6.0 / fan_in as f64).sqrt();
    Ok(sample(shape, uniform(bound)?, rng))
}

/// Kaiming/He normal initialization for ReLU layers.
/// Samples from N(0, std) where std = sqrt(2 / fan_in).
pub fn kaiming_normal<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Result<ArrayD<f64>> {
    let (fan_in, _) = fans(shape);
    let std = (2.0 / fan_in as f64).sqrt();
    Ok(sample(shape, normal(std)?, rng))
}

pub fn zeros(shape: &[usize]) -> ArrayD<f64> {
    ArrayD::zeros(IxDyn(shape))
}

/// Deterministic generator when a seed is given, otherwise one seeded from the
/// thread-local generator.
pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}
