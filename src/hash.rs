//! Key hashing
//!
//! The directory and the record checksum share one multiplicative rolling
//! hash. It is exposed through a small closed trait so the directory can be
//! parameterised without dynamic dispatch.

/// Hash function over raw key or record bytes
pub trait KeyHasher: Send + Sync + 'static {
    fn hash(bytes: &[u8]) -> u32;
}

/// DJB rolling hash: seed 5381, `h = h * 33 + byte`
///
/// Each byte is added as a signed `char`, so bytes `>= 0x80` contribute
/// negatively. Bucket placement and on-media checksums depend on this.
#[derive(Debug, Clone, Copy, Default)]
pub struct Djb2;

impl Djb2 {
    pub const SEED: u32 = 5381;
}

impl KeyHasher for Djb2 {
    #[inline]
    fn hash(bytes: &[u8]) -> u32 {
        bytes.iter().fold(Self::SEED, |h, &b| {
            (h << 5).wrapping_add(h).wrapping_add(b as i8 as i32 as u32)
        })
    }
}
