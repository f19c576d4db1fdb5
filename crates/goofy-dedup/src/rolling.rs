//! Rabin rolling fingerprint over a fixed 48-byte window, used to find
//! content-defined chunk boundaries.
//!
//! The fingerprint is the residue of the window contents, read as a polynomial
//! over GF(2), modulo a fixed irreducible polynomial of degree 53. Because the
//! residue only depends on the bytes currently inside the window, identical
//! byte runs produce identical cut decisions wherever they appear in a stream.

use std::sync::OnceLock;

/// Number of bytes covered by the rolling window.
pub const WINDOW_SIZE: usize = 48;

/// Default number of low fingerprint bits that must be zero for a cut (~8 KiB average).
pub const DEFAULT_MASK_BITS: u32 = 13;

/// Irreducible polynomial of degree 53 used as the fingerprint modulus.
pub const POLYNOMIAL: u64 = 0x003D_A335_8B4D_C173;

const POLY_DEGREE: u32 = 53;
const POLY_SHIFT: u32 = POLY_DEGREE - 8;

/// Precomputed reduction tables for [`POLYNOMIAL`].
struct RabinTables {
    /// Contribution of a byte leaving the window.
    out: [u64; 256],
    /// Reduction of the 8 bits shifted above the polynomial degree.
    reduce: [u64; 256],
}

fn degree(p: u64) -> u32 {
    63 - p.leading_zeros()
}

fn poly_mod(mut x: u64, p: u64) -> u64 {
    let dp = degree(p);
    while x != 0 {
        let dx = degree(x);
        if dx < dp {
            break;
        }
        x ^= p << (dx - dp);
    }
    x
}

fn append_byte(hash: u64, b: u8, p: u64) -> u64 {
    poly_mod((hash << 8) | b as u64, p)
}

impl RabinTables {
    fn build(pol: u64) -> Self {
        let mut out = [0u64; 256];
        let mut reduce = [0u64; 256];
        for b in 0..256usize {
            let mut h = append_byte(0, b as u8, pol);
            for _ in 0..WINDOW_SIZE - 1 {
                h = append_byte(h, 0, pol);
            }
            out[b] = h;

            let high = (b as u64) << POLY_DEGREE;
            reduce[b] = poly_mod(high, pol) | high;
        }
        Self { out, reduce }
    }
}

fn tables() -> &'static RabinTables {
    static TABLES: OnceLock<RabinTables> = OnceLock::new();
    TABLES.get_or_init(|| RabinTables::build(POLYNOMIAL))
}

/// Fill state of the rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitterState {
    /// Fewer than [`WINDOW_SIZE`] bytes pushed since the last reset; no cut possible.
    WindowFilling,
    /// The window is full; cut decisions depend on the fingerprint.
    WindowArmed,
}

/// Rolling-hash boundary detector.
///
/// Each splitter owns its window; share nothing between concurrent chunkers.
#[derive(Debug, Clone)]
pub struct RollingHashSplitter {
    window: [u8; WINDOW_SIZE],
    wpos: usize,
    filled: usize,
    digest: u64,
    mask: u64,
}

impl Default for RollingHashSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingHashSplitter {
    /// Create a splitter with the default 13-bit mask.
    pub fn new() -> Self {
        Self::with_mask_bits(DEFAULT_MASK_BITS)
    }

    /// Create a splitter whose cut mask has `bits` low bits set.
    /// Expected distance between cut points is `2^bits` bytes.
    pub fn with_mask_bits(bits: u32) -> Self {
        let bits = bits.min(POLY_DEGREE);
        Self {
            window: [0u8; WINDOW_SIZE],
            wpos: 0,
            filled: 0,
            digest: 0,
            mask: (1u64 << bits) - 1,
        }
    }

    /// Slide `b` into the window and report whether this position is a cut point.
    #[inline]
    pub fn push_byte(&mut self, b: u8) -> bool {
        let t = tables();
        let leaving = self.window[self.wpos];
        self.window[self.wpos] = b;
        self.wpos = (self.wpos + 1) % WINDOW_SIZE;
        self.digest ^= t.out[leaving as usize];

        let index = (self.digest >> POLY_SHIFT) as usize;
        self.digest = ((self.digest << 8) | b as u64) ^ t.reduce[index];

        if self.filled < WINDOW_SIZE {
            self.filled += 1;
        }
        self.filled >= WINDOW_SIZE && self.digest & self.mask == 0
    }

    /// Clear fingerprint, window contents and fill counter.
    pub fn reset(&mut self) {
        self.window = [0u8; WINDOW_SIZE];
        self.wpos = 0;
        self.filled = 0;
        self.digest = 0;
    }

    /// Current fingerprint of the window.
    pub fn fingerprint(&self) -> u64 {
        self.digest
    }

    /// Current fill state.
    pub fn state(&self) -> SplitterState {
        if self.filled >= WINDOW_SIZE {
            SplitterState::WindowArmed
        } else {
            SplitterState::WindowFilling
        }
    }

    /// Cut mask in use.
    pub fn mask(&self) -> u64 {
        self.mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pseudo_random(len: usize, mut seed: u64) -> Vec<u8> {
        (0..len)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                (seed >> 24) as u8
            })
            .collect()
    }

    fn fingerprint_of(bytes: &[u8]) -> u64 {
        let mut s = RollingHashSplitter::new();
        for &b in bytes {
            s.push_byte(b);
        }
        s.fingerprint()
    }

    #[test]
    fn polynomial_has_expected_degree() {
        assert_eq!(degree(POLYNOMIAL), POLY_DEGREE);
    }

    #[test]
    fn table_step_matches_plain_reduction() {
        let data = pseudo_random(40, 3);
        let mut s = RollingHashSplitter::new();
        let mut plain = 0u64;
        for &b in &data {
            s.push_byte(b);
            plain = append_byte(plain, b, POLYNOMIAL);
        }
        // Fewer bytes than the window, so nothing has left it yet.
        assert_eq!(s.fingerprint(), plain);
    }

    #[test]
    fn fingerprint_depends_only_on_window() {
        let window = pseudo_random(WINDOW_SIZE, 99);
        let mut a = pseudo_random(1000, 1);
        a.extend_from_slice(&window);
        let mut b = pseudo_random(37, 2);
        b.extend_from_slice(&window);
        assert_eq!(fingerprint_of(&a), fingerprint_of(&b));
        assert_eq!(fingerprint_of(&a), fingerprint_of(&window));
    }

    #[test]
    fn no_cut_before_window_is_filled() {
        let mut s = RollingHashSplitter::new();
        // Zero bytes keep the fingerprint at zero, so the first armed position cuts.
        for _ in 0..WINDOW_SIZE - 1 {
            assert!(!s.push_byte(0));
            assert_eq!(s.state(), SplitterState::WindowFilling);
        }
        assert!(s.push_byte(0));
        assert_eq!(s.state(), SplitterState::WindowArmed);
    }

    #[test]
    fn reset_returns_to_filling() {
        let mut s = RollingHashSplitter::new();
        for b in pseudo_random(200, 5) {
            s.push_byte(b);
        }
        assert_eq!(s.state(), SplitterState::WindowArmed);
        s.reset();
        assert_eq!(s.state(), SplitterState::WindowFilling);
        assert_eq!(s.fingerprint(), 0);
        assert!(!s.push_byte(0));
    }

    #[test]
    fn cut_rate_tracks_mask() {
        let data = pseudo_random(1 << 20, 42);
        let mut s = RollingHashSplitter::new();
        let cuts = data.iter().filter(|&&b| s.push_byte(b)).count();
        // Expected ~128 cuts for 1 MiB with a 13-bit mask.
        assert!(cuts > 40 && cuts < 400, "cuts = {cuts}");
    }

    #[test]
    fn mask_bits_are_clamped() {
        let s = RollingHashSplitter::with_mask_bits(64);
        assert_eq!(s.mask(), (1u64 << POLY_DEGREE) - 1);
        assert_eq!(RollingHashSplitter::new().mask(), 0x1fff);
    }

    proptest! {
        #[test]
        fn prop_window_locality(
            prefix_a in prop::collection::vec(any::<u8>(), 0..512),
            prefix_b in prop::collection::vec(any::<u8>(), 0..512),
            window in prop::collection::vec(any::<u8>(), WINDOW_SIZE..=WINDOW_SIZE),
        ) {
            let mut a = prefix_a;
            a.extend_from_slice(&window);
            let mut b = prefix_b;
            b.extend_from_slice(&window);
            prop_assert_eq!(fingerprint_of(&a), fingerprint_of(&b));
        }
    }
}
