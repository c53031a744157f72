use std::time::Duration;

use rand::Rng;

/// Draws before falling back to the mean
const MAX_SAMPLES: usize = 16;

/// Sample a lifespan from a normal distribution around `base`.
///
/// Standard deviation is a quarter of `base`, and samples are kept within
/// one standard deviation so functions created together expire at
/// different times without any of them living unreasonably long or short.
pub fn randomized_lifespan(base: Duration) -> Duration {
    let mean = base.as_secs_f64();
    let sd = mean / 4.0;
    if sd <= 0.0 {
        return base;
    }

    let mut rng = rand::thread_rng();
    for _ in 0..MAX_SAMPLES {
        let sample = mean + sd * standard_normal(&mut rng);
        if (sample - mean).abs() <= sd {
            return Duration::from_secs_f64(sample);
        }
    }
    base
}

/// Box-Muller transform
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
