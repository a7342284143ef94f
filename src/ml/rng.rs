// Seeded pseudo-random source for training.
//
// Knuth's 64-bit LCG, reading the high bits. Same seed, same model.

#[derive(Debug, Clone)]
pub struct SeededRng(u64);

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        // Mix once so small seeds (0, 1, 42) do not start in a low-entropy state
        let mut rng = SeededRng(seed ^ 0x9E37_79B9_7F4A_7C15);
        rng.next_u64();
        rng
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let hi = self.0 >> 32;
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (hi << 32) | (self.0 >> 32)
    }

    /// Uniform in `0..n`; returns 0 when `n == 0`
    pub fn below(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        (self.next_u64() % n as u64) as usize
    }

    /// Fisher-Yates shuffle
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.below(i + 1);
            items.swap(i, j);
        }
    }

    /// Independent generator for a sub-task (one per tree)
    pub fn fork(&mut self) -> SeededRng {
        SeededRng::new(self.next_u64())
    }
}
