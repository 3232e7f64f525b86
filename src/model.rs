use crate::api::ApiConfig;

/// 回复帧格式：带分隔符的新格式，或单字符的旧格式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyStyle {
    Framed,
    Legacy,
}

impl ReplyStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyStyle::Framed => "framed",
            ReplyStyle::Legacy => "legacy",
        }
    }

    /// 从配置字符串解析，未知值回落到 Framed。
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "legacy" | "raw" => ReplyStyle::Legacy,
            _ => ReplyStyle::Framed,
        }
    }
}

pub const APN: &str = match option_env!("APN") {
    Some(apn) => apn,
    None => "hologram",
};
pub const NTP_SERVER: &str = match option_env!("NTP_SERVER") {
    Some(server) => server,
    None => "pool.ntp.org",
};

/// 网桥运行参数（编译期默认值 + 时序常量）。
#[derive(Clone, Debug)]
pub struct BridgeSettings {
    pub api: ApiConfig,
    pub apn: String,
    pub apn_user: String,
    pub apn_pass: String,
    pub ntp_server: String,
    pub utc_offset_hours: i8,
    /// 换算 epoch 时是否扣除模组上报的时区。
    pub apply_timezone: bool,
    pub reply_style: ReplyStyle,
    /// 断线时收到命令是否顺带尝试重连。
    pub reconnect_on_demand: bool,
    pub connect_attempts: u8,
    /// 连续多少次连接失败后重新上电；0 表示不重启。
    pub power_cycle_after: u8,
    pub retry_delay_ms: u32,
    pub network_timeout_ms: u32,
    pub power_settle_ms: u32,
    pub pwrkey_pulse_ms: u32,
    pub boot_settle_ms: u32,
    pub gps_settle_ms: u32,
    pub abort_backoff_ms: u32,
    pub teardown_flush_ms: u32,
    pub idle_poll_ms: u32,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        let utc_offset_hours = option_env!("UTC_OFFSET")
            .and_then(|value| value.trim().parse::<i8>().ok())
            .unwrap_or(0);
        let reply_style = option_env!("REPLY_STYLE")
            .map(ReplyStyle::parse)
            .unwrap_or(ReplyStyle::Framed);
        Self {
            api: ApiConfig::default(),
            apn: APN.to_string(),
            apn_user: String::new(),
            apn_pass: String::new(),
            ntp_server: NTP_SERVER.to_string(),
            utc_offset_hours,
            apply_timezone: true,
            reply_style,
            reconnect_on_demand: true,
            connect_attempts: 2,
            power_cycle_after: 3,
            retry_delay_ms: 10_000,
            network_timeout_ms: 60_000,
            power_settle_ms: 100,
            pwrkey_pulse_ms: 500,
            boot_settle_ms: 5_000,
            gps_settle_ms: 1_000,
            abort_backoff_ms: 1_000,
            teardown_flush_ms: 1_000,
            idle_poll_ms: 10,
        }
    }
}

/// 模组返回的网络时间（本地墙钟 + 以 15 分钟为单位的时区）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkTime {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub timezone_quarters: i8,
}

impl NetworkTime {
    /// 换算为 Unix epoch 秒；字段越界时返回 None。
    pub fn to_unix_epoch(&self, apply_timezone: bool) -> Option<i64> {
        if !(1..=12).contains(&self.month)
            || !(1..=31).contains(&self.day)
            || self.hour > 23
            || self.minute > 59
            || self.second > 60
        {
            return None;
        }
        let days = days_from_civil(self.year as i64, self.month as i64, self.day as i64);
        let mut epoch = days * 86_400
            + self.hour as i64 * 3_600
            + self.minute as i64 * 60
            + self.second as i64;
        if apply_timezone {
            epoch -= self.timezone_quarters as i64 * 900;
        }
        Some(epoch)
    }
}

/// 公历日期距 1970-01-01 的天数（含闰年规则）。
pub fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = if year >= 0 { year } else { year - 399 } / 400;
    let yoe = year - era * 400;
    let mp = if month > 2 { month - 3 } else { month + 9 };
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// 一次 GNSS 定位结果。
#[derive(Clone, Debug, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f32,
    pub altitude_m: f32,
    pub visible_satellites: u8,
    pub used_satellites: u8,
    /// 水平精度因子（HDOP）。
    pub accuracy: f32,
    pub fix_time: Option<NetworkTime>,
}
