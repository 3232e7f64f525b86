use std::fmt::Write as _;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::lifecycle::LinkOutcome;
use crate::net::CellularLink;
use crate::processor::{BridgeProcessor, Decision};
use crate::serial::SerialPort;
use crate::serial_io::FrameReader;

/// 主控制循环：串口收帧 -> 分发处理 -> 回复。
pub struct Bridge<S, L, O, D>
where
    S: SerialPort,
    L: CellularLink,
    O: OutputPin,
    D: DelayNs,
{
    serial: S,
    reader: FrameReader,
    processor: BridgeProcessor<L, O, D>,
}

impl<S, L, O, D> Bridge<S, L, O, D>
where
    S: SerialPort,
    L: CellularLink,
    O: OutputPin,
    D: DelayNs,
{
    pub fn new(serial: S, processor: BridgeProcessor<L, O, D>) -> Self {
        Self {
            serial,
            reader: FrameReader::new(),
            processor,
        }
    }

    /// 开机建链（失败不阻塞主循环）。
    pub fn start(&mut self) -> LinkOutcome {
        self.processor.start()
    }

    /// 单次迭代：读取字节，若有完整帧则处理并回复。
    pub fn poll(&mut self) -> Option<Decision> {
        self.reader.feed(&mut self.serial);
        let decision = {
            let frame = self.reader.frame()?;
            log_bytes("PEER RX:", frame);
            self.processor.handle_frame(frame)
        };
        // 每帧只清一次就绪标志
        self.reader.consume();

        let bytes = decision
            .reply
            .encode(self.processor.settings().reply_style);
        log_bytes("PEER TX:", &bytes);
        if let Err(err) = self.serial.write_all(&bytes) {
            log::warn!("Peer TX error: {:?}", err);
        }

        if decision.flush_input {
            // 拆除期间到达的命令一律丢弃
            self.processor.settle();
            let dropped = self.serial.drain();
            self.reader.reset();
            if dropped > 0 {
                log::info!("Flushed {} stale bytes after disconnect", dropped);
            }
        }
        Some(decision)
    }

    /// 永久运行，空闲时短暂让出以喂看门狗。
    pub fn run(&mut self) -> ! {
        loop {
            if self.poll().is_none() {
                self.processor.idle();
            }
        }
    }

    pub fn processor(&self) -> &BridgeProcessor<L, O, D> {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut BridgeProcessor<L, O, D> {
        &mut self.processor
    }

    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }
}

fn log_bytes(prefix: &str, bytes: &[u8]) {
    if bytes.is_empty() || !log::log_enabled!(log::Level::Debug) {
        return;
    }
    let mut line = String::with_capacity(prefix.len() + bytes.len() * 3);
    line.push_str(prefix);
    line.push(' ');
    for (idx, byte) in bytes.iter().enumerate() {
        if idx > 0 {
            line.push(' ');
        }
        let _ = write!(line, "{:02X}", byte);
    }
    log::debug!("{}", line);
}
