use rand::rngs::{StdRng, ThreadRng};
use rand::{Rng, RngCore, SeedableRng};

/// Source of uniform values in `[0, 1)` for the placeholder estimate.
pub trait RandomSource {
    fn next_unit(&mut self) -> f64;
}

/// Adapts any `rand` generator.
#[derive(Clone, Debug)]
pub struct RngSource<R: RngCore>(pub R);

impl RngSource<StdRng> {
    pub fn seeded(seed: u64) -> Self {
        RngSource(StdRng::seed_from_u64(seed))
    }
}

impl RngSource<ThreadRng> {
    pub fn thread() -> Self {
        RngSource(rand::thread_rng())
    }
}

impl<R: RngCore> RandomSource for RngSource<R> {
    fn next_unit(&mut self) -> f64 {
        self.0.gen::<f64>()
    }
}

/// Always yields the same value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedSource(pub f64);

impl RandomSource for FixedSource {
    fn next_unit(&mut self) -> f64 {
        self.0
    }
}

/// Wraps a closure, e.g. a host-provided `Math.random`.
pub struct FnSource<F: FnMut() -> f64>(pub F);

impl<F: FnMut() -> f64> RandomSource for FnSource<F> {
    fn next_unit(&mut self) -> f64 {
        (self.0)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_sources_repeat() {
        let mut a = RngSource::seeded(42);
        let mut b = RngSource::seeded(42);
        for _ in 0..16 {
            let x = a.next_unit();
            assert_eq!(x, b.next_unit());
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn closures_are_sources() {
        let mut calls = 0;
        let mut source = FnSource(|| {
            calls += 1;
            0.25
        });
        assert_eq!(source.next_unit(), 0.25);
        assert_eq!(source.next_unit(), 0.25);
        drop(source);
        assert_eq!(calls, 2);
    }
}
