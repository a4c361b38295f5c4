use sha2::{Digest, Sha256};

/// Digest bytes kept in a fingerprint.
const FINGERPRINT_BYTES: usize = 16;

/// Incremental digest of the inputs that determine an energy.
///
/// Every value is written with a fixed-width or length-prefixed encoding, so two
/// different sequences of calls never produce the same byte stream. Floats are
/// hashed by bit pattern.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub fn new(domain: &str) -> Self {
        let mut fingerprint = Self {
            hasher: Sha256::new(),
        };
        fingerprint.str(domain);
        fingerprint
    }

    pub fn str(&mut self, value: &str) -> &mut Self {
        self.u64(value.len() as u64);
        self.hasher.update(value.as_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(value.to_le_bytes());
        self
    }

    pub fn f64(&mut self, value: f64) -> &mut Self {
        self.u64(value.to_bits())
    }

    pub fn f64s(&mut self, values: &[f64]) -> &mut Self {
        self.u64(values.len() as u64);
        for &value in values {
            self.f64(value);
        }
        self
    }

    pub fn finish(self) -> String {
        let digest = self.hasher.finalize();
        hex::encode(&digest[..FINGERPRINT_BYTES])
    }
}
