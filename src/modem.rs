use crate::model::{GpsFix, NetworkTime};
use crate::serial::SerialError;

/// 蜂窝模组操作错误。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModemError {
    /// AT 命令在时限内没有结束行。
    Timeout(String),
    /// 模组返回 ERROR / +CME ERROR。
    Rejected(String),
    /// 响应格式无法解析。
    Malformed(String),
    NotRegistered,
    NoFix,
    NtpFailed(i32),
    Serial(SerialError),
}

impl From<SerialError> for ModemError {
    fn from(err: SerialError) -> Self {
        ModemError::Serial(err)
    }
}

/// 模组能力面：上电初始化、注册、GPRS、GNSS、NTP、关机。
pub trait CellularModem {
    fn init(&mut self) -> Result<(), ModemError>;

    /// 完整重启，阻塞直到模组就绪。
    fn restart(&mut self) -> Result<(), ModemError>;

    fn modem_info(&mut self) -> Result<String, ModemError>;

    /// 轮询等待网络注册。
    fn wait_for_network(&mut self, timeout_ms: u32) -> Result<(), ModemError>;

    fn gprs_connect(&mut self, apn: &str, user: &str, pass: &str) -> Result<(), ModemError>;

    fn gprs_disconnect(&mut self) -> Result<(), ModemError>;

    fn is_gprs_connected(&mut self) -> bool;

    fn enable_gps(&mut self) -> Result<(), ModemError>;

    fn get_gps(&mut self) -> Result<GpsFix, ModemError>;

    /// 与 NTP 服务器同步模组时钟（时区以 15 分钟为单位）。
    fn ntp_server_sync(&mut self, server: &str, timezone_quarters: i8) -> Result<(), ModemError>;

    fn get_network_time(&mut self) -> Result<NetworkTime, ModemError>;

    fn poweroff(&mut self) -> Result<(), ModemError>;
}
