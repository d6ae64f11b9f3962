use std::fmt;

use serde::{Deserialize, Serialize};

/// Merges `value` into `dst`, touching only the bits set in `mask`.
#[inline]
pub fn masked_write(dst: &mut u32, value: u32, mask: u32) {
    *dst = (*dst & !mask) | (value & mask);
}

/// Register index for a word-aligned register bank.
#[inline]
pub fn reg_index(address: u32) -> usize {
    ((address & 0xffff) >> 2) as usize
}

/// Reads the big-endian word at `offset` from a byte image. Bytes past the end
/// of the image read as zero.
pub fn read_be_word(data: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    for (i, byte) in word.iter_mut().enumerate() {
        *byte = data.get(offset + i).copied().unwrap_or(0);
    }
    u32::from_be_bytes(word)
}

/// Writes the lanes of `value` selected by `mask` into a byte image.
pub fn write_be_word(data: &mut [u8], offset: usize, value: u32, mask: u32) {
    let mut word = read_be_word(data, offset);
    masked_write(&mut word, value, mask);
    for (i, byte) in word.to_be_bytes().iter().enumerate() {
        if let Some(dst) = data.get_mut(offset + i) {
            *dst = *byte;
        }
    }
}

/// A bank of `N` 32-bit registers addressed by word offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterBank<const N: usize> {
    #[serde(with = "regs_serde")]
    regs: [u32; N],
}

impl<const N: usize> Default for RegisterBank<N> {
    fn default() -> Self {
        Self { regs: [0; N] }
    }
}

impl<const N: usize> RegisterBank<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.regs = [0; N];
    }

    pub fn get(&self, reg: usize) -> u32 {
        self.regs[reg]
    }

    pub fn set(&mut self, reg: usize, value: u32) {
        self.regs[reg] = value;
    }

    pub fn set_bits(&mut self, reg: usize, bits: u32) {
        self.regs[reg] |= bits;
    }

    pub fn clear_bits(&mut self, reg: usize, bits: u32) {
        self.regs[reg] &= !bits;
    }

    /// Reads the register decoded from `address`. Out of range registers read
    /// as zero.
    pub fn read(&self, address: u32) -> u32 {
        self.regs.get(reg_index(address)).copied().unwrap_or(0)
    }

    /// Writes the register decoded from `address` and returns its index, or
    /// `None` when the address falls past the bank.
    pub fn write(&mut self, address: u32, value: u32, mask: u32) -> Option<usize> {
        let reg = reg_index(address);
        let dst = self.regs.get_mut(reg)?;
        masked_write(dst, value, mask);
        Some(reg)
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.regs.as_mut_ptr() as *mut u8
    }

    pub const fn byte_len(&self) -> usize {
        N * 4
    }
}

impl<const N: usize> fmt::Display for RegisterBank<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, reg) in self.regs.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02}:{:08X}", i, reg)?;
        }
        Ok(())
    }
}

mod regs_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        regs: &[u32; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        regs.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u32; N], D::Error> {
        let regs = Vec::<u32>::deserialize(deserializer)?;
        let len = regs.len();
        regs.try_into()
            .map_err(|_| D::Error::invalid_length(len, &"a full register bank"))
    }
}
