/// 串口写入错误。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SerialError {
    Write(String),
    /// 写入未能在时限内完成。
    Stalled,
}

/// 字节级串口收发（本地设备口与模组 AT 口共用）。
pub trait SerialPort {
    /// 非阻塞读取一个字节，无数据时返回 None。
    fn read_byte(&mut self) -> Option<u8>;

    /// 阻塞写入全部字节。
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError>;

    /// 丢弃当前缓冲区内的所有输入，返回丢弃的字节数。
    fn drain(&mut self) -> usize {
        let mut count = 0;
        while self.read_byte().is_some() {
            count += 1;
        }
        count
    }
}

impl<T: SerialPort + ?Sized> SerialPort for &mut T {
    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        (**self).write_all(bytes)
    }
}
