//! Secure random byte sources.
//!
//! The identity manager never reaches for a global RNG; it is handed a
//! [`RandomSource`] so tests can drive key generation deterministically.

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

/// Supplier of bytes suitable for key seeds.
pub trait RandomSource {
    fn fill(&mut self, buf: &mut [u8]);
}

impl<T: RandomSource + ?Sized> RandomSource for &mut T {
    fn fill(&mut self, buf: &mut [u8]) {
        (**self).fill(buf);
    }
}

/// The operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&mut self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }
}

/// Adapter for any `rand` generator marked cryptographically secure.
#[derive(Debug, Clone)]
pub struct RngSource<R>(pub R);

impl<R: RngCore + CryptoRng> RandomSource for RngSource<R> {
    fn fill(&mut self, buf: &mut [u8]) {
        self.0.fill_bytes(buf);
    }
}
