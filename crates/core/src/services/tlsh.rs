//! Trend Micro Locality Sensitive Hash (TLSH), 128-bucket / 1-byte checksum variant.
//!
//! Digests are emitted in the `T1` + 70 hex character form. Parsing also accepts
//! the legacy 70 character form without the version prefix, which older
//! identity database rows still carry.

/// Inputs shorter than this cannot be hashed.
pub const MIN_DATA_LENGTH: usize = 50;

const BUCKETS: usize = 256;
const EFF_BUCKETS: usize = 128;
const CODE_SIZE: usize = 32;
const WINDOW: usize = 5;
const DIGEST_BYTES: usize = 3 + CODE_SIZE;
const VERSION_PREFIX: &str = "T1";

const LOG_1_5: f64 = 0.405_465_1;
const LOG_1_3: f64 = 0.262_364_26;
const LOG_1_1: f64 = 0.095_310_180;

/// Pearson permutation table.
const V_TABLE: [u8; 256] = [
    1, 87, 49, 12, 176, 178, 102, 166, 121, 193, 6, 84, 249, 230, 44, 163, 14, 197, 213, 181,
    161, 85, 218, 80, 64, 239, 24, 226, 236, 142, 38, 200, 110, 177, 104, 103, 141, 253, 255,
    50, 77, 101, 81, 18, 45, 96, 31, 222, 25, 107, 190, 70, 86, 237, 240, 34, 72, 242, 20, 214,
    244, 227, 149, 235, 97, 234, 57, 22, 60, 250, 82, 175, 208, 5, 127, 199, 111, 62, 135, 248,
    174, 169, 211, 58, 66, 154, 106, 195, 245, 171, 17, 187, 182, 179, 0, 243, 132, 56, 148, 75,
    128, 133, 158, 100, 130, 126, 91, 13, 153, 246, 216, 219, 119, 68, 223, 78, 83, 88, 201, 99,
    122, 11, 92, 32, 136, 114, 52, 10, 138, 30, 48, 183, 156, 35, 61, 26, 143, 74, 251, 94, 129,
    162, 63, 152, 170, 7, 115, 167, 241, 206, 3, 150, 55, 59, 151, 220, 90, 53, 23, 131, 125,
    173, 15, 238, 79, 95, 89, 16, 105, 137, 225, 224, 217, 160, 37, 123, 118, 73, 2, 157, 46,
    116, 9, 145, 134, 228, 207, 212, 202, 215, 69, 229, 27, 188, 67, 124, 168, 252, 42, 4, 29,
    108, 21, 247, 19, 205, 39, 203, 233, 40, 186, 147, 198, 192, 155, 33, 164, 191, 98, 204,
    165, 180, 117, 76, 140, 36, 210, 172, 41, 54, 159, 8, 185, 232, 113, 196, 231, 47, 146, 120,
    51, 65, 28, 144, 254, 221, 93, 189, 194, 139, 112, 43, 71, 109, 184, 209,
];

/// Decoded TLSH digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlsh {
    checksum: u8,
    lvalue: u8,
    q1_ratio: u8,
    q2_ratio: u8,
    code: [u8; CODE_SIZE],
}

impl Tlsh {
    /// Hash a byte buffer.
    ///
    /// Returns `None` when the input is too short or too uniform to produce a
    /// meaningful digest.
    pub fn compute(data: &[u8]) -> Option<Self> {
        if data.len() < MIN_DATA_LENGTH {
            return None;
        }

        let mut buckets = [0u32; BUCKETS];
        let mut checksum = 0u8;
        for i in (WINDOW - 1)..data.len() {
            let c0 = data[i];
            let c1 = data[i - 1];
            let c2 = data[i - 2];
            let c3 = data[i - 3];
            let c4 = data[i - 4];

            checksum = pearson(0, c0, c1, checksum);
            buckets[pearson(2, c0, c1, c2) as usize] += 1;
            buckets[pearson(3, c0, c1, c3) as usize] += 1;
            buckets[pearson(5, c0, c2, c3) as usize] += 1;
            buckets[pearson(7, c0, c2, c4) as usize] += 1;
            buckets[pearson(11, c0, c1, c4) as usize] += 1;
            buckets[pearson(13, c0, c3, c4) as usize] += 1;
        }

        let effective = &buckets[..EFF_BUCKETS];
        let nonzero = effective.iter().filter(|&&count| count > 0).count();
        if nonzero <= 4 * CODE_SIZE / 2 {
            return None;
        }

        let mut sorted = effective.to_vec();
        sorted.sort_unstable();
        let q1 = sorted[EFF_BUCKETS / 4 - 1];
        let q2 = sorted[EFF_BUCKETS / 2 - 1];
        let q3 = sorted[EFF_BUCKETS * 3 / 4 - 1];
        if q3 == 0 {
            return None;
        }

        let mut code = [0u8; CODE_SIZE];
        for i in 0..CODE_SIZE {
            let mut h = 0u8;
            for j in 0..4 {
                let k = effective[4 * i + j];
                let quartile = if q3 < k {
                    3
                } else if q2 < k {
                    2
                } else if q1 < k {
                    1
                } else {
                    0
                };
                h += quartile << (j * 2);
            }
            code[CODE_SIZE - 1 - i] = h;
        }

        Some(Self {
            checksum,
            lvalue: length_capture(data.len()),
            q1_ratio: ((u64::from(q1) * 100 / u64::from(q3)) % 16) as u8,
            q2_ratio: ((u64::from(q2) * 100 / u64::from(q3)) % 16) as u8,
            code,
        })
    }

    /// Parse a hex digest, with or without the `T1` prefix.
    pub fn parse(digest: &str) -> Option<Self> {
        let digest = digest.trim();
        let hex = match digest.len() {
            n if n == DIGEST_BYTES * 2 + VERSION_PREFIX.len() => {
                digest.strip_prefix(VERSION_PREFIX)?
            }
            n if n == DIGEST_BYTES * 2 => digest,
            _ => return None,
        };

        let mut raw = [0u8; DIGEST_BYTES];
        for (idx, byte) in raw.iter_mut().enumerate() {
            let pair = hex.get(idx * 2..idx * 2 + 2)?;
            *byte = u8::from_str_radix(pair, 16).ok()?;
        }

        let q = swap_nibbles(raw[2]);
        let mut code = [0u8; CODE_SIZE];
        code.copy_from_slice(&raw[3..]);
        Some(Self {
            checksum: swap_nibbles(raw[0]),
            lvalue: swap_nibbles(raw[1]),
            q1_ratio: q & 0x0F,
            q2_ratio: q >> 4,
            code,
        })
    }

    /// Encode as `T1` + 70 uppercase hex characters.
    pub fn to_digest(&self) -> String {
        let mut out = String::with_capacity(VERSION_PREFIX.len() + DIGEST_BYTES * 2);
        out.push_str(VERSION_PREFIX);
        let q = (self.q2_ratio << 4) | self.q1_ratio;
        for byte in [swap_nibbles(self.checksum), swap_nibbles(self.lvalue), swap_nibbles(q)]
            .into_iter()
            .chain(self.code.iter().copied())
        {
            out.push_str(&format!("{byte:02X}"));
        }
        out
    }

    /// Distance between two digests, including the length component.
    ///
    /// `0` means identical; larger values mean less similar.
    pub fn diff(&self, other: &Self) -> u32 {
        let mut diff = 0u32;

        let ldiff = mod_diff(self.lvalue.into(), other.lvalue.into(), 256);
        diff += if ldiff <= 1 { ldiff } else { ldiff * 12 };

        for (a, b) in [(self.q1_ratio, other.q1_ratio), (self.q2_ratio, other.q2_ratio)] {
            let qdiff = mod_diff(a.into(), b.into(), 16);
            diff += if qdiff <= 1 { qdiff } else { (qdiff - 1) * 12 };
        }

        if self.checksum != other.checksum {
            diff += 1;
        }

        diff + self
            .code
            .iter()
            .zip(other.code.iter())
            .map(|(&a, &b)| bit_pairs_diff(a, b))
            .sum::<u32>()
    }
}

/// Hash a buffer straight to its digest string.
pub fn hash_bytes(data: &[u8]) -> Option<String> {
    Tlsh::compute(data).map(|t| t.to_digest())
}

/// Distance between two digest strings; `None` when either fails to parse.
pub fn diff_digests(a: &str, b: &str) -> Option<u32> {
    Some(Tlsh::parse(a)?.diff(&Tlsh::parse(b)?))
}

fn pearson(salt: u8, i: u8, j: u8, k: u8) -> u8 {
    let mut h = V_TABLE[salt as usize];
    h = V_TABLE[(h ^ i) as usize];
    h = V_TABLE[(h ^ j) as usize];
    V_TABLE[(h ^ k) as usize]
}

fn length_capture(len: usize) -> u8 {
    let len = len as f64;
    let value = if len <= 656.0 {
        (len.ln() / LOG_1_5).floor()
    } else if len <= 3199.0 {
        (len.ln() / LOG_1_3 - 8.727_77).floor()
    } else {
        (len.ln() / LOG_1_1 - 62.547_2).floor()
    };
    ((value as i64) & 0xFF) as u8
}

fn swap_nibbles(b: u8) -> u8 {
    b.rotate_left(4)
}

fn mod_diff(x: u32, y: u32, range: u32) -> u32 {
    let (dl, dr) = if y > x { (y - x, x + range - y) } else { (x - y, y + range - x) };
    dl.min(dr)
}

fn bit_pairs_diff(a: u8, b: u8) -> u32 {
    (0..4)
        .map(|pair| {
            let x = (a >> (pair * 2)) & 0b11;
            let y = (b >> (pair * 2)) & 0b11;
            match x.abs_diff(y) {
                3 => 6,
                d => u32::from(d),
            }
        })
        .sum()
}
