use auto_impl::auto_impl;

/// Random access to reference bases
#[auto_impl(&, Box, Arc)]
pub trait RandomAccessSequence {
    /// Base at a 0-based position, `None` outside the known sequence
    fn base_at(&self, target_index: u32, position: u32) -> Option<u8>;

    fn target_length(&self, target_index: u32) -> Option<u32>;
}

/// Reference sequences held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryGenome {
    sequences: Vec<Vec<u8>>,
}
impl InMemoryGenome {
    #[must_use]
    pub fn new(sequences: Vec<Vec<u8>>) -> Self {
        Self { sequences }
    }

    /// Appends a target and returns its index
    pub fn push(&mut self, sequence: &[u8]) -> u32 {
        self.sequences.push(sequence.to_ascii_uppercase());
        (self.sequences.len() - 1) as u32
    }
}
impl RandomAccessSequence for InMemoryGenome {
    fn base_at(&self, target_index: u32, position: u32) -> Option<u8> {
        self.sequences
            .get(target_index as usize)?
            .get(position as usize)
            .map(u8::to_ascii_uppercase)
    }

    fn target_length(&self, target_index: u32) -> Option<u32> {
        self.sequences
            .get(target_index as usize)
            .map(|s| s.len() as u32)
    }
}
