use std::sync::atomic::{AtomicU64, Ordering};

const WORD_BITS: usize = 64;

/// One bit per local vertex slot, settable from shared references.
///
/// Algorithms mark slots while holding `&MirrorGraph`; clearing the whole
/// set between synchronisation epochs needs exclusive access.
#[derive(Debug, Default)]
pub struct DirtyBitset {
    words: Vec<AtomicU64>,
    len: usize,
}

impl DirtyBitset {
    /// Creates `len` cleared bits.
    pub fn new(len: usize) -> Self {
        let words = (0..len.div_ceil(WORD_BITS))
            .map(|_| AtomicU64::new(0))
            .collect();
        Self { words, len }
    }

    /// Number of bits.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the set holds no bits.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sets bit `idx`, returning whether it was already set.
    ///
    /// # Panics
    /// Panics if `idx >= len()`.
    #[inline]
    pub fn set(&self, idx: usize) -> bool {
        let (word, mask) = self.locate(idx);
        self.words[word].fetch_or(mask, Ordering::Relaxed) & mask != 0
    }

    /// Clears bit `idx`.
    #[inline]
    pub fn reset(&self, idx: usize) {
        let (word, mask) = self.locate(idx);
        self.words[word].fetch_and(!mask, Ordering::Relaxed);
    }

    /// Reads bit `idx`.
    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        let (word, mask) = self.locate(idx);
        self.words[word].load(Ordering::Relaxed) & mask != 0
    }

    /// Sets every bit below `len()`.
    pub fn set_all(&mut self) {
        for (i, word) in self.words.iter_mut().enumerate() {
            let remaining = self.len - i * WORD_BITS;
            *word.get_mut() = if remaining >= WORD_BITS {
                u64::MAX
            } else {
                (1u64 << remaining) - 1
            };
        }
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        for word in &mut self.words {
            *word.get_mut() = 0;
        }
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Indices of set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, word)| {
            let mut bits = word.load(Ordering::Relaxed);
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(i * WORD_BITS + tz)
            })
        })
    }

    #[inline]
    fn locate(&self, idx: usize) -> (usize, u64) {
        assert!(idx < self.len, "dirty bit {idx} out of bounds for {}", self.len);
        (idx / WORD_BITS, 1u64 << (idx % WORD_BITS))
    }
}
