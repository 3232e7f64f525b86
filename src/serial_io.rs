use crate::proto::{END_MARKER, START_MARKER};
use crate::serial::SerialPort;

/// 接收缓冲区容量（含末尾 0 终止符位置）。
pub const RCV_CHARS: usize = 1000;

/// 帧读取器：逐字节组装 `<...>` 帧，固定缓冲区原地复用。
pub struct FrameReader<const N: usize = RCV_CHARS> {
    buffer: [u8; N],
    ndx: usize,
    recv_in_progress: bool,
    new_data: bool,
}

impl<const N: usize> FrameReader<N> {
    /// 创建新的帧读取器。
    pub fn new() -> Self {
        Self {
            buffer: [0; N],
            ndx: 0,
            recv_in_progress: false,
            new_data: false,
        }
    }

    /// 读取串口现有字节；已有待处理帧时不再消费（背压）。
    pub fn feed<S: SerialPort + ?Sized>(&mut self, port: &mut S) {
        while !self.new_data {
            let Some(byte) = port.read_byte() else {
                break;
            };
            self.push(byte);
        }
    }

    /// 推入一个字节，返回是否刚好完成一帧。
    pub fn push(&mut self, byte: u8) -> bool {
        if !self.recv_in_progress {
            // 起始符之前的字节直接丢弃
            if byte == START_MARKER {
                self.recv_in_progress = true;
                self.ndx = 0;
            }
            return false;
        }

        if byte != END_MARKER {
            // 超出容量的字节静默丢弃
            if self.ndx < N.saturating_sub(1) {
                self.buffer[self.ndx] = byte;
                self.ndx += 1;
            }
            return false;
        }

        if N > 0 {
            self.buffer[self.ndx] = 0;
        }
        self.recv_in_progress = false;
        self.new_data = true;
        true
    }

    /// 是否有完整帧待处理。
    pub fn is_ready(&self) -> bool {
        self.new_data
    }

    /// 当前完整帧（不含分隔符与终止符）。
    pub fn frame(&self) -> Option<&[u8]> {
        if self.new_data {
            Some(&self.buffer[..self.ndx])
        } else {
            None
        }
    }

    /// 标记帧已处理，允许继续接收。
    pub fn consume(&mut self) {
        self.new_data = false;
    }

    /// 丢弃半帧与待处理帧，回到等待起始符状态。
    pub fn reset(&mut self) {
        self.ndx = 0;
        self.recv_in_progress = false;
        self.new_data = false;
    }

    pub fn is_receiving(&self) -> bool {
        self.recv_in_progress
    }
}

impl<const N: usize> Default for FrameReader<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::mock::MemoryPort;

    #[test]
    fn bytes_without_start_marker_never_complete() {
        let mut reader: FrameReader = FrameReader::new();
        let mut port = MemoryPort::with_input(b"hello> world >>");
        reader.feed(&mut port);
        assert!(!reader.is_ready());
        assert!(reader.frame().is_none());
        assert!(port.input.is_empty());
    }

    #[test]
    fn complete_frame_excludes_delimiters() {
        let mut reader: FrameReader = FrameReader::new();
        let mut port = MemoryPort::with_input(b"noise<12,3.5,ok>");
        reader.feed(&mut port);
        assert_eq!(reader.frame(), Some(&b"12,3.5,ok"[..]));
    }

    #[test]
    fn nested_start_marker_is_payload() {
        let mut reader: FrameReader = FrameReader::new();
        let mut port = MemoryPort::with_input(b"<a<b>");
        reader.feed(&mut port);
        assert_eq!(reader.frame(), Some(&b"a<b"[..]));
    }

    #[test]
    fn overflow_truncates_to_capacity_minus_one() {
        let mut reader: FrameReader<8> = FrameReader::new();
        let mut port = MemoryPort::with_input(b"<0123456789abcdef>");
        reader.feed(&mut port);
        assert_eq!(reader.frame(), Some(&b"0123456"[..]));
    }

    #[test]
    fn ready_frame_applies_back_pressure() {
        let mut reader: FrameReader = FrameReader::new();
        let mut port = MemoryPort::with_input(b"<^><?>");
        reader.feed(&mut port);
        assert_eq!(reader.frame(), Some(&b"^"[..]));
        assert_eq!(port.input.len(), 3);

        // 未消费前再次 feed 不读取任何字节
        reader.feed(&mut port);
        assert_eq!(port.input.len(), 3);
        assert_eq!(reader.frame(), Some(&b"^"[..]));

        reader.consume();
        reader.feed(&mut port);
        assert_eq!(reader.frame(), Some(&b"?"[..]));
        assert!(port.input.is_empty());
    }

    #[test]
    fn frame_spans_multiple_feeds() {
        let mut reader: FrameReader = FrameReader::new();
        let mut port = MemoryPort::with_input(b"<12,");
        reader.feed(&mut port);
        assert!(!reader.is_ready());
        assert!(reader.is_receiving());
        port.push_input(b"34>");
        reader.feed(&mut port);
        assert_eq!(reader.frame(), Some(&b"12,34"[..]));
    }

    #[test]
    fn empty_frame_is_ready_and_empty() {
        let mut reader: FrameReader = FrameReader::new();
        assert!(!reader.push(b'<'));
        assert!(reader.push(b'>'));
        assert_eq!(reader.frame(), Some(&b""[..]));
    }

    #[test]
    fn reset_drops_partial_frame() {
        let mut reader: FrameReader = FrameReader::new();
        let mut port = MemoryPort::with_input(b"<half");
        reader.feed(&mut port);
        reader.reset();
        port.push_input(b"tail>");
        reader.feed(&mut port);
        assert!(!reader.is_ready());
    }
}
