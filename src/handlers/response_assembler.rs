use super::FrameCodec;

/// Accumulates response fragments for one outstanding exchange.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ResponseAssembler {
    expected_len: usize,
    buffer: Vec<u8>,
}

impl ResponseAssembler {
    #[must_use]
    pub fn new(expected_len: usize) -> Self {
        Self {
            expected_len,
            buffer: Vec::with_capacity(expected_len),
        }
    }

    /// Appends a fragment in arrival order.
    pub fn append(&mut self, fragment: &[u8]) {
        self.buffer.extend_from_slice(fragment);
    }

    /// True once at least the expected number of bytes has arrived.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.buffer.len() >= self.expected_len
    }

    /// Checksum verdict for a complete response.
    ///
    /// Responses with no expected bytes are always valid; incomplete ones never are.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.expected_len == 0 {
            return true;
        }
        self.is_complete() && FrameCodec::validate(&self.buffer)
    }

    #[must_use]
    pub fn expected_len(&self) -> usize {
        self.expected_len
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn signed(mut frame: Vec<u8>) -> Vec<u8> {
        FrameCodec::apply_sign(&mut frame);
        frame
    }

    #[test]
    fn zero_length_response_is_complete_and_valid() {
        let assembler = ResponseAssembler::new(0);
        assert!(assembler.is_complete());
        assert!(assembler.is_valid());
    }

    #[test]
    fn fragments_concatenate_until_complete() {
        let response = signed((0..20).collect());
        let mut assembler = ResponseAssembler::new(20);

        assembler.append(&response[..7]);
        assert!(!assembler.is_complete());
        assert!(!assembler.is_valid());

        assembler.append(&response[7..]);
        assert!(assembler.is_complete());
        assert!(assembler.is_valid());
        assert_eq!(response, assembler.into_bytes());
    }

    #[test]
    fn corrupted_response_is_complete_but_invalid() {
        let mut response = signed(vec![0xBB, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00]);
        response[9] = response[9].wrapping_add(1);
        let mut assembler = ResponseAssembler::new(10);
        assembler.append(&response);

        assert!(assembler.is_complete());
        assert!(!assembler.is_valid());
    }

    #[test]
    fn overlong_response_validates_against_its_last_byte() {
        let mut assembler = ResponseAssembler::new(2);
        assembler.append(&signed(vec![0x01, 0x02, 0x00]));
        assert!(assembler.is_complete());
        assert!(assembler.is_valid());
        assert_eq!(&[0x01, 0x02, 0x03], assembler.bytes());
    }
}
