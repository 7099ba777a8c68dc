//! CHD ("compress, hash, displace") perfect-hash construction for the
//! indirect-jump lookup, after the practical version of the ESA'09 paper.
//!
//! Keys are hashed into buckets by a SpookyHash-derived three-output
//! function; buckets are processed largest first, searching a 16-bit
//! displacement pair that places every key of the bucket into a free slot.

use itertools::Itertools;

#[derive(Debug, Clone, Copy)]
struct Hash {
    h0: u64,
    h1: u64,
    h2: u64,
    key: u64,
}

const SEEDS: (u64, u64) = (42, 0xbeef);
const SC_CONST: u64 = 0xdead_beef_dead_beef;

#[derive(Debug)]
pub struct HashtableBuilder {
    pub load_factor: f64,
    pub bucket_size: usize,
    pub hash_table_size: usize,
    pub bucket_number: usize,
    keys: Vec<u64>,
    /// Displacement-pair index per bucket (keyed by h0).
    pub hash_idxs: Vec<u16>,
    /// Slot -> key; zero marks an empty slot.
    pub hash_table: Vec<u64>,
}

impl HashtableBuilder {
    pub fn new() -> Self {
        HashtableBuilder {
            load_factor: 1.0,
            bucket_size: 19,
            hash_table_size: 0,
            bucket_number: 0,
            keys: Vec::new(),
            hash_idxs: Vec::new(),
            hash_table: Vec::new(),
        }
    }

    pub fn fill(&mut self, keys: Vec<u64>) {
        self.hash_table_size = (keys.len() as f64 / self.load_factor).floor() as usize + 1;
        self.bucket_number = keys.len() / self.bucket_size + 1;
        self.keys = keys;
    }

    /// Reduce the load factor by 10% ahead of a rebuild.
    pub fn relax(&mut self) {
        self.load_factor *= 0.9;
        let keys = std::mem::take(&mut self.keys);
        self.fill(keys);
    }

    /// One construction attempt. `false` means a bucket exhausted its
    /// displacement search; the caller relaxes the load factor and retries.
    pub fn build(&mut self) -> bool {
        let mut buckets: Vec<Vec<Hash>> = vec![Vec::new(); self.bucket_number];
        self.hash_idxs = vec![0; self.bucket_number];
        self.hash_table = vec![0; self.hash_table_size];

        for &key in &self.keys {
            let [h0, h1, h2] = self.spooky_hash(key);
            buckets[h0 as usize].push(Hash { h0, h1, h2, key });
        }

        let mut occupied = vec![false; self.hash_table_size];
        let by_size_desc = buckets
            .iter()
            .filter(|b| !b.is_empty())
            .sorted_by_key(|b| std::cmp::Reverse(b.len()));

        for bucket in by_size_desc {
            let mut d0 = 0usize;
            let mut d1 = 0usize;
            let mut combination_idx: u16 = 0;
            let mut placed = false;

            while (d0 < self.hash_table_size || d1 < self.hash_table_size)
                && combination_idx < u16::MAX
            {
                let mut taken: Vec<usize> = Vec::with_capacity(bucket.len());
                let mut conflict = false;
                for hash in bucket {
                    let slot = (hash.h1 as usize + d0 * hash.h2 as usize + d1)
                        % self.hash_table_size;
                    if occupied[slot] {
                        // revert the partial placement
                        for &idx in &taken {
                            occupied[idx] = false;
                            self.hash_table[idx] = 0;
                        }
                        conflict = true;
                        break;
                    }
                    taken.push(slot);
                    occupied[slot] = true;
                    self.hash_table[slot] = hash.key;
                }

                if !conflict {
                    self.hash_idxs[bucket[0].h0 as usize] = combination_idx;
                    placed = true;
                    break;
                }

                d1 += 1;
                combination_idx += 1;
                if d1 >= self.hash_table_size {
                    d1 = 0;
                    d0 += 1;
                }
            }

            if !placed {
                tracing::debug!(
                    load_factor = self.load_factor,
                    "no valid displacement pair for a bucket"
                );
                return false;
            }
        }
        true
    }

    /// The three lookup hashes of a key: bucket index, base slot and
    /// displacement multiplier. SpookyHash "ShortEnd" over a single word.
    pub fn spooky_hash(&self, key: u64) -> [u64; 3] {
        let mut h0 = SEEDS.0;
        let mut h1 = SEEDS.1;
        let mut h2 = SC_CONST;
        let mut h3 = SC_CONST.wrapping_add(key);

        h2 = h2.wrapping_add(8u64 << 56);

        h3 ^= h2;
        h2 = h2.rotate_left(15);
        h3 = h3.wrapping_add(h2);
        h0 ^= h3;
        h3 = h3.rotate_left(52);
        h0 = h0.wrapping_add(h3);
        h1 ^= h0;
        h0 = h0.rotate_left(26);
        h1 = h1.wrapping_add(h0);
        h2 ^= h1;
        h1 = h1.rotate_left(51);
        h2 = h2.wrapping_add(h1);
        h3 ^= h2;
        h2 = h2.rotate_left(28);
        h3 = h3.wrapping_add(h2);
        h0 ^= h3;
        h3 = h3.rotate_left(9);
        h0 = h0.wrapping_add(h3);
        h1 ^= h0;
        h0 = h0.rotate_left(47);
        h1 = h1.wrapping_add(h0);
        h2 ^= h1;
        h1 = h1.rotate_left(54);
        h2 = h2.wrapping_add(h1);
        h3 ^= h2;
        h2 = h2.rotate_left(32);
        h3 = h3.wrapping_add(h2);
        h0 ^= h3;
        h3 = h3.rotate_left(25);
        h0 = h0.wrapping_add(h3);
        h1 ^= h0;
        h0 = h0.rotate_left(63);
        h1 = h1.wrapping_add(h0);

        [
            h0 % self.bucket_number as u64,
            h1 % self.hash_table_size as u64,
            h2 % self.hash_table_size as u64,
        ]
    }

    /// Verify a built table by looking every key up again.
    #[cfg(test)]
    fn lookup(&self, key: u64) -> Option<usize> {
        let [h0, h1, h2] = self.spooky_hash(key);
        let idx = self.hash_idxs[h0 as usize] as usize;
        let d0 = idx / self.hash_table_size;
        let d1 = idx % self.hash_table_size;
        let slot = (h1 as usize + d0 * h2 as usize + d1) % self.hash_table_size;
        (self.hash_table[slot] == key).then_some(slot)
    }
}

impl Default for HashtableBuilder {
    fn default() -> Self {
        HashtableBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_with_keys(keys: Vec<u64>) -> HashtableBuilder {
        let mut builder = HashtableBuilder::new();
        builder.fill(keys);
        for _ in 0..8 {
            if builder.build() {
                return builder;
            }
            builder.relax();
        }
        panic!("hash table construction failed");
    }

    #[test]
    fn every_key_resolves_to_its_slot() {
        let keys: Vec<u64> = (0..500u64).map(|i| 0x10000 + i * 6).collect();
        let builder = build_with_keys(keys.clone());
        let mut seen = std::collections::HashSet::new();
        for key in keys {
            let slot = builder.lookup(key).expect("key must be present");
            assert!(seen.insert(slot), "perfect hash must be collision-free");
        }
    }

    #[test]
    fn missing_keys_do_not_match() {
        let keys: Vec<u64> = (0..64u64).map(|i| 0x4000 + i * 4).collect();
        let builder = build_with_keys(keys);
        assert!(builder.lookup(0xdead_0000).is_none());
    }

    #[test]
    fn relax_shrinks_the_load_factor() {
        let mut builder = HashtableBuilder::new();
        builder.fill((0..10u64).collect());
        let before = builder.hash_table_size;
        builder.relax();
        assert!(builder.load_factor < 1.0);
        assert!(builder.hash_table_size >= before);
    }
}
