use esp_idf_hal::delay::{FreeRtos, BLOCK, NON_BLOCK};
use esp_idf_hal::gpio::{AnyInputPin, AnyOutputPin, Output, OutputPin as _, PinDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::prelude::*;
use esp_idf_hal::sys::EspError;
use esp_idf_hal::uart::{self, UartDriver};

use crate::lifecycle::{CellularLifecycle, ControlPins};
use crate::model::BridgeSettings;
use crate::pipeline::Bridge;
use crate::processor::BridgeProcessor;
use crate::serial::{SerialError, SerialPort};
use crate::sim7600::Sim7600;

/// 串口波特率（本地设备与模组一致）。
const BAUD_RATE: u32 = 115_200;
const WRITE_STALL_LIMIT: u32 = 100;

/// ESP-IDF UART 驱动适配为字节串口。
pub struct UartPort {
    driver: UartDriver<'static>,
}

impl UartPort {
    pub fn new(driver: UartDriver<'static>) -> Self {
        Self { driver }
    }
}

impl SerialPort for UartPort {
    fn read_byte(&mut self) -> Option<u8> {
        let mut buf = [0u8; 1];
        match self.driver.read(&mut buf, NON_BLOCK) {
            Ok(1) => Some(buf[0]),
            Ok(_) => None,
            Err(err) => {
                log::warn!("UART RX error: {:?}", err);
                None
            }
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        let mut written = 0;
        let mut stalls = 0;
        while written < bytes.len() {
            let count = self
                .driver
                .write(&bytes[written..])
                .map_err(|err| SerialError::Write(format!("{:?}", err)))?;
            if count == 0 {
                stalls += 1;
                if stalls > WRITE_STALL_LIMIT {
                    return Err(SerialError::Stalled);
                }
                FreeRtos::delay_ms(1);
            }
            written += count;
        }
        let _ = self.driver.wait_tx_done(BLOCK);
        Ok(())
    }
}

type ControlPin = PinDriver<'static, AnyOutputPin, Output>;

/// 外设初始化后进入主循环，正常情况下不返回。
pub fn run() -> Result<(), EspError> {
    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;
    let uart_config = uart::config::Config::new().baudrate(Hertz(BAUD_RATE));

    // 本地设备口：UART1（调试日志走默认控制台）
    let peer_uart = UartDriver::new(
        peripherals.uart1,
        pins.gpio17,
        pins.gpio18,
        AnyInputPin::none(),
        AnyOutputPin::none(),
        &uart_config,
    )?;
    // 模组 AT 口：UART2
    let modem_uart = UartDriver::new(
        peripherals.uart2,
        pins.gpio10,
        pins.gpio11,
        AnyInputPin::none(),
        AnyOutputPin::none(),
        &uart_config,
    )?;
    FreeRtos::delay_ms(3000);

    // 模组控制线：复位 GPIO6、开机键 GPIO5、飞行模式 GPIO7
    let control = ControlPins::<ControlPin> {
        reset: PinDriver::output(pins.gpio6.downgrade_output())?,
        pwrkey: PinDriver::output(pins.gpio5.downgrade_output())?,
        flight: PinDriver::output(pins.gpio7.downgrade_output())?,
    };

    let settings = BridgeSettings::default();
    log::info!(
        "Server {} (APN {}, {} replies)",
        settings.api.url(""),
        settings.apn,
        settings.reply_style.as_str()
    );
    let modem = Sim7600::new(UartPort::new(modem_uart), FreeRtos, settings.api.clone());
    let processor = BridgeProcessor::new(modem, CellularLifecycle::new(control), FreeRtos, settings);
    let mut bridge = Bridge::new(UartPort::new(peer_uart), processor);

    let outcome = bridge.start();
    log::info!("Startup link outcome: {:?}", outcome);
    bridge.run()
}
