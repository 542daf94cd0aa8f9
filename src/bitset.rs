// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Growable bitset keyed by object id, used for per-scene existence flags.

#[derive(Debug, Clone, Default)]
pub struct BitSet {
    words: Vec<u64>,
    count: usize,
}

impl BitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve room for at least `bits` bits.
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            words: vec![0; bits.div_ceil(64)],
            count: 0,
        }
    }

    /// Set `index`. Returns false if it was already set.
    pub fn insert(&mut self, index: u64) -> bool {
        let (word, mask) = split(index);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let was_set = self.words[word] & mask != 0;
        self.words[word] |= mask;
        if !was_set {
            self.count += 1;
        }
        !was_set
    }

    /// Clear `index`. Returns true if it was set.
    pub fn remove(&mut self, index: u64) -> bool {
        let (word, mask) = split(index);
        match self.words.get_mut(word) {
            Some(bits) if *bits & mask != 0 => {
                *bits &= !mask;
                self.count -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, index: u64) -> bool {
        let (word, mask) = split(index);
        self.words.get(word).is_some_and(|bits| bits & mask != 0)
    }

    /// Number of set bits
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Indices of set bits, ascending
    pub fn ones(&self) -> impl Iterator<Item = u64> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let trailing = bits.trailing_zeros();
                bits &= bits - 1;
                Some(word_idx as u64 * 64 + trailing as u64)
            })
        })
    }
}

fn split(index: u64) -> (usize, u64) {
    ((index / 64) as usize, 1u64 << (index % 64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove() {
        let mut set = BitSet::new();
        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert!(set.insert(130));
        assert_eq!(set.len(), 2);
        assert!(set.contains(130));

        assert!(set.remove(3));
        assert!(!set.remove(3));
        assert!(!set.contains(3));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_out_of_range_is_absent() {
        let set = BitSet::with_capacity(8);
        assert!(!set.contains(10_000));
        assert!(set.is_empty());
    }

    #[test]
    fn test_ones_ascending() {
        let mut set = BitSet::new();
        for i in [65, 0, 200, 64] {
            set.insert(i);
        }
        assert_eq!(set.ones().collect::<Vec<_>>(), vec![0, 64, 65, 200]);
    }
}
