use crate::{
    memory_map::MM_IS_VIEWER,
    mmio::{read_be_word, write_be_word},
};

pub const IS_VIEWER_SIZE: usize = 0x1000;

const IS_LENGTH_REG: usize = 0x14;
const IS_TEXT_OFFSET: usize = 0x20;

/// Debug port of the IS-Viewer development cartridge: software fills the
/// buffer, then writes the text length to flush it to the log.
#[derive(Debug, Clone)]
pub struct IsViewer {
    buffer: Vec<u8>,
    line: String,
}

impl Default for IsViewer {
    fn default() -> Self {
        Self::new()
    }
}

impl IsViewer {
    pub fn new() -> Self {
        Self {
            buffer: vec![0; IS_VIEWER_SIZE],
            line: String::new(),
        }
    }

    pub fn poweron(&mut self) {
        self.buffer.fill(0);
        self.line.clear();
    }

    fn offset(address: u32) -> usize {
        (address.wrapping_sub(MM_IS_VIEWER) as usize) & (IS_VIEWER_SIZE - 1) & !3
    }

    pub fn read(&mut self, address: u32) -> u32 {
        read_be_word(&self.buffer, Self::offset(address))
    }

    pub fn write(&mut self, address: u32, value: u32, mask: u32) {
        let offset = Self::offset(address);
        if offset == IS_LENGTH_REG {
            let len = ((value & mask) as usize).min(IS_VIEWER_SIZE - IS_TEXT_OFFSET);
            self.flush(len);
        } else {
            write_be_word(&mut self.buffer, offset, value, mask);
        }
    }

    /// Emits every completed line, keeping a trailing partial one for the
    /// next flush.
    fn flush(&mut self, len: usize) {
        let text = &self.buffer[IS_TEXT_OFFSET..IS_TEXT_OFFSET + len];
        self.line.push_str(&String::from_utf8_lossy(text));
        while let Some(end) = self.line.find('\n') {
            let line: String = self.line.drain(..=end).collect();
            tracing::info!("[IS-VIEWER] {}", line.trim_end());
        }
    }

    pub fn pending_text(&self) -> &str {
        &self.line
    }
}
