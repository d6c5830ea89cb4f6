use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Perceptual hash families. Each kind fixes how many 64-bit components a
/// fingerprint has and how far apart two fingerprints may be while still
/// counting as duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    /// Mean hash over a DCT-transformed thumbnail. One component.
    #[default]
    Dct,
    /// Row and column difference hashes. Two components.
    DHash,
}

impl HashKind {
    pub const ALL: [HashKind; 2] = [HashKind::Dct, HashKind::DHash];

    pub const fn components(self) -> usize {
        match self {
            HashKind::Dct => 1,
            HashKind::DHash => 2,
        }
    }

    /// Largest summed Hamming distance still classified as a duplicate.
    pub const fn threshold(self) -> u32 {
        match self {
            HashKind::Dct => 10,
            HashKind::DHash => 20,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            HashKind::Dct => "dct",
            HashKind::DHash => "dhash",
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dct" | "phash" => Ok(HashKind::Dct),
            "dhash" | "gradient" => Ok(HashKind::DHash),
            other => Err(format!("unknown hash kind '{}' (expected dct or dhash)", other)),
        }
    }
}

/// Ordered 64-bit hash components of one image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(Box<[u64]>);

impl Fingerprint {
    pub fn new(components: impl Into<Box<[u64]>>) -> Self {
        Self(components.into())
    }

    pub fn single(value: u64) -> Self {
        Self(Box::new([value]))
    }

    pub fn pair(rows: u64, cols: u64) -> Self {
        Self(Box::new([rows, cols]))
    }

    pub fn components(&self) -> &[u64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of per-component Hamming distances.
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        debug_assert_eq!(
            self.0.len(),
            other.0.len(),
            "fingerprints of different hash kinds are not comparable"
        );
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:016x}", part)?;
        }
        Ok(())
    }
}

/// Turns a decoded image into a fingerprint of the requested kind. Assumed
/// total: every image that loads can be hashed.
pub trait Hasher<I>: Sync {
    fn compute(&self, image: &I, kind: HashKind) -> Fingerprint;
}

/// Default hasher backed by `image_hasher`, all hashes on an 8x8 grid so each
/// component is exactly 64 bits.
pub struct PerceptualHasher {
    dct: image_hasher::Hasher,
    rows: image_hasher::Hasher,
    cols: image_hasher::Hasher,
}

impl PerceptualHasher {
    pub fn new() -> Self {
        Self {
            dct: HasherConfig::new()
                .hash_alg(HashAlg::Mean)
                .hash_size(8, 8)
                .preproc_dct()
                .to_hasher(),
            rows: HasherConfig::new()
                .hash_alg(HashAlg::Gradient)
                .hash_size(8, 8)
                .to_hasher(),
            cols: HasherConfig::new()
                .hash_alg(HashAlg::VertGradient)
                .hash_size(8, 8)
                .to_hasher(),
        }
    }
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher<DynamicImage> for PerceptualHasher {
    fn compute(&self, image: &DynamicImage, kind: HashKind) -> Fingerprint {
        match kind {
            HashKind::Dct => Fingerprint::single(pack(self.dct.hash_image(image).as_bytes())),
            HashKind::DHash => Fingerprint::pair(
                pack(self.rows.hash_image(image).as_bytes()),
                pack(self.cols.hash_image(image).as_bytes()),
            ),
        }
    }
}

/// Big-endian fold of up to eight hash bytes into one component.
fn pack(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(8)
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
            let intensity = ((x * 255 / width.max(1)) ^ (y * 3)) as u8;
            Rgb([intensity, intensity / 2, 255 - intensity])
        }))
    }

    #[test]
    fn test_kind_constants() {
        assert_eq!(HashKind::Dct.components(), 1);
        assert_eq!(HashKind::DHash.components(), 2);
        assert!(HashKind::DHash.threshold() >= HashKind::Dct.threshold());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("dct".parse::<HashKind>().unwrap(), HashKind::Dct);
        assert_eq!("DHASH".parse::<HashKind>().unwrap(), HashKind::DHash);
        assert!("sha256".parse::<HashKind>().is_err());
        for kind in HashKind::ALL {
            assert_eq!(kind.to_string().parse::<HashKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_distance_sums_components() {
        let a = Fingerprint::pair(0b1111, 0);
        let b = Fingerprint::pair(0b0000, 0b11);
        assert_eq!(a.distance(&b), 6);
        assert_eq!(b.distance(&a), 6);
        assert_eq!(a.distance(&a), 0);
        assert_eq!(
            Fingerprint::single(0).distance(&Fingerprint::single(u64::MAX)),
            64
        );
    }

    #[test]
    fn test_pack_is_big_endian() {
        assert_eq!(pack(&[0x01, 0x02]), 0x0102);
        assert_eq!(pack(&[0xff; 8]), u64::MAX);
        assert_eq!(pack(&[0x01; 10]), 0x0101_0101_0101_0101);
    }

    #[test]
    fn test_fingerprint_length_matches_kind() {
        let hasher = PerceptualHasher::new();
        let img = gradient(64, 48);
        for kind in HashKind::ALL {
            assert_eq!(hasher.compute(&img, kind).len(), kind.components());
        }
    }

    #[test]
    fn test_perceptual_hash_consistency() {
        let hasher = PerceptualHasher::new();
        let img = gradient(120, 90);
        for kind in HashKind::ALL {
            let first = hasher.compute(&img, kind);
            let second = hasher.compute(&img.clone(), kind);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_fingerprint_display() {
        assert_eq!(Fingerprint::single(0xab).to_string(), "00000000000000ab");
        assert_eq!(
            Fingerprint::pair(1, 2).to_string(),
            "0000000000000001:0000000000000002"
        );
    }
}
