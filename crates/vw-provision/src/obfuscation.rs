//! AmneziaWG obfuscation parameters
//!
//! One set is generated per [`crate::Provisioner`] and written unchanged into
//! every config that provisioner authors. The secondary interface uses a
//! shifted copy so its traffic does not share a fingerprint with the primary.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::render::header_value;

const JC_RANGE: (u8, u8) = (1, 3);
const JMIN: u16 = 40;
const JMAX: u16 = 70;
const S_RANGE: (u16, u16) = (15, 150);
/// Handshake init and response sizes must not collide after padding
const S_FORBIDDEN_GAP: u16 = 56;
const H_RANGE: (u32, u32) = (100_000_000, 2_147_483_647);

const SECONDARY_JC_DELTA: u8 = 1;
const SECONDARY_S_DELTA: u16 = 5;
const SECONDARY_H1_DELTA: u32 = 123_456;

/// Keys of the obfuscation block, in the order they are written
pub const KEYS: [&str; 9] = ["Jc", "Jmin", "Jmax", "S1", "S2", "H1", "H2", "H3", "H4"];

/// Junk-packet and header-magic parameters of an obfuscated interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObfuscationParams {
    pub jc: u8,
    pub jmin: u16,
    pub jmax: u16,
    pub s1: u16,
    pub s2: u16,
    pub h1: u32,
    pub h2: u32,
    pub h3: u32,
    pub h4: u32,
}

impl ObfuscationParams {
    /// Generate a fresh set from the thread-local RNG
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    /// Generate a fresh set from the given RNG
    pub fn generate_with<G: Rng>(rng: &mut G) -> Self {
        let s1 = rng.gen_range(S_RANGE.0..=S_RANGE.1);
        let s2 = loop {
            let candidate = rng.gen_range(S_RANGE.0..=S_RANGE.1);
            if s1 + S_FORBIDDEN_GAP != candidate {
                break candidate;
            }
        };

        let mut headers = [0u32; 4];
        let mut filled = 0;
        while filled < headers.len() {
            let candidate = rng.gen_range(H_RANGE.0..=H_RANGE.1);
            if !headers[..filled].contains(&candidate) {
                headers[filled] = candidate;
                filled += 1;
            }
        }

        Self {
            jc: rng.gen_range(JC_RANGE.0..=JC_RANGE.1),
            jmin: JMIN,
            jmax: JMAX,
            s1,
            s2,
            h1: headers[0],
            h2: headers[1],
            h3: headers[2],
            h4: headers[3],
        }
    }

    /// Shifted copy used by the secondary interface
    pub fn secondary(&self) -> Self {
        Self {
            jc: self.jc + SECONDARY_JC_DELTA,
            s1: self.s1 + SECONDARY_S_DELTA,
            s2: self.s2 + SECONDARY_S_DELTA,
            h1: self.h1 + SECONDARY_H1_DELTA,
            ..*self
        }
    }

    /// Config lines, one `Key = value` per parameter, newline terminated
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in KEYS.iter().zip(self.values()) {
            let _ = writeln!(out, "{} = {}", key, value);
        }
        out
    }

    /// Read a complete parameter set from config text
    ///
    /// Returns `None` unless all nine keys are present and numeric.
    pub fn parse(text: &str) -> Option<Self> {
        let mut v = [0u64; 9];
        for (slot, key) in v.iter_mut().zip(KEYS) {
            *slot = header_value(text, key)?.parse().ok()?;
        }
        Some(Self {
            jc: u8::try_from(v[0]).ok()?,
            jmin: u16::try_from(v[1]).ok()?,
            jmax: u16::try_from(v[2]).ok()?,
            s1: u16::try_from(v[3]).ok()?,
            s2: u16::try_from(v[4]).ok()?,
            h1: u32::try_from(v[5]).ok()?,
            h2: u32::try_from(v[6]).ok()?,
            h3: u32::try_from(v[7]).ok()?,
            h4: u32::try_from(v[8]).ok()?,
        })
    }

    fn values(&self) -> [u64; 9] {
        [
            self.jc.into(),
            self.jmin.into(),
            self.jmax.into(),
            self.s1.into(),
            self.s2.into(),
            self.h1.into(),
            self.h2.into(),
            self.h3.into(),
            self.h4.into(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generated_values_within_ranges() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let p = ObfuscationParams::generate_with(&mut rng);
            assert!((1..=3).contains(&p.jc));
            assert_eq!((p.jmin, p.jmax), (40, 70));
            assert!((15..=150).contains(&p.s1));
            assert!((15..=150).contains(&p.s2));
            assert_ne!(p.s1 + 56, p.s2);
            let h = [p.h1, p.h2, p.h3, p.h4];
            for (i, a) in h.iter().enumerate() {
                assert!((100_000_000..=2_147_483_647).contains(a));
                assert!(h[i + 1..].iter().all(|b| b != a));
            }
        }
    }

    #[test]
    fn test_secondary_is_shifted_copy() {
        let base = ObfuscationParams::generate_with(&mut StdRng::seed_from_u64(1));
        let shifted = base.secondary();
        assert_eq!(shifted.jc, base.jc + 1);
        assert_eq!(shifted.s1, base.s1 + 5);
        assert_eq!(shifted.s2, base.s2 + 5);
        assert_eq!(shifted.h1, base.h1 + 123_456);
        assert_eq!((shifted.h2, shifted.h3, shifted.h4), (base.h2, base.h3, base.h4));
        assert_eq!(ObfuscationParams::generate_with(&mut StdRng::seed_from_u64(1)), base);
    }

    #[test]
    fn test_render_then_parse_from_header() {
        let params = ObfuscationParams::generate_with(&mut StdRng::seed_from_u64(3));
        let header = format!(
            "[Interface]\nAddress = 10.10.0.1/24\nListenPort = 51820\n{}PostUp = true\n",
            params.render()
        );
        assert!(header.contains(&format!("Jc = {}\nJmin = 40\n", params.jc)));
        assert_eq!(ObfuscationParams::parse(&header), Some(params));
    }

    #[test]
    fn test_parse_requires_every_key() {
        assert_eq!(ObfuscationParams::parse("Jc = 2\nJmin = 40\n"), None);
        assert_eq!(ObfuscationParams::parse("[Interface]\nMTU = 1380\n"), None);
    }
}
