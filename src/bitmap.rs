use num::Integer;

/// A fixed-size set of flags, one bit each, all initially unset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    data: Vec<u8>,
    len: usize,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Self { data: vec![0; Integer::div_ceil(&len, &8)], len }
    }

    /// PANICS: Panics if `idx` out of bounds
    pub fn get(&self, idx: usize) -> bool {
        assert!(idx < self.len);
        let (data_idx, bit_idx) = idx.div_rem(&8);
        self.data[data_idx] & (1 << bit_idx) != 0
    }

    /// PANICS: Panics if `idx` out of bounds
    pub fn set(&mut self, idx: usize) {
        assert!(idx < self.len);
        let (data_idx, bit_idx) = idx.div_rem(&8);
        self.data[data_idx] |= 1 << bit_idx;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn count_set(&self) -> usize {
        self.data.iter().map(|byte| byte.count_ones() as usize).sum()
    }
}
