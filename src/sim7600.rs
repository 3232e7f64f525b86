use embedded_hal::delay::DelayNs;
use embedded_svc::http::Method;

use crate::api::ApiConfig;
use crate::model::{GpsFix, NetworkTime};
use crate::modem::{CellularModem, ModemError};
use crate::net::{HttpBearer, NetError};
use crate::serial::SerialPort;

const DEFAULT_TIMEOUT_MS: u32 = 1_000;
const LONG_TIMEOUT_MS: u32 = 10_000;
const ATTACH_TIMEOUT_MS: u32 = 60_000;
const HTTP_ACTION_TIMEOUT_MS: u32 = 120_000;
const REGISTRATION_POLL_MS: u32 = 500;

/// HTTPACTION 结果（方法、状态码、正文长度）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub method: u8,
    pub status: u16,
    pub length: usize,
}

/// SIM7600 AT 命令驱动：同一串口提供模组能力与 HTTP 服务。
pub struct Sim7600<P, D> {
    port: P,
    delay: D,
    api: ApiConfig,
    keep_alive: bool,
    http_open: bool,
    response: Option<HttpResponse>,
    line: Vec<u8>,
}

impl<P: SerialPort, D: DelayNs> Sim7600<P, D> {
    pub fn new(port: P, delay: D, api: ApiConfig) -> Self {
        Self {
            port,
            delay,
            api,
            keep_alive: false,
            http_open: false,
            response: None,
            line: Vec::with_capacity(128),
        }
    }

    /// 发送 `AT<cmd>\r\n`，发送前丢弃残留输入。
    fn send(&mut self, cmd: &str) -> Result<(), ModemError> {
        self.port.drain();
        self.line.clear();
        log::debug!("AT> AT{}", cmd);
        self.port.write_all(b"AT")?;
        self.port.write_all(cmd.as_bytes())?;
        self.port.write_all(b"\r\n")?;
        Ok(())
    }

    /// 读取一行非空响应（去掉 CR/LF）。
    fn read_line(&mut self, timeout_ms: u32) -> Option<String> {
        let mut waited = 0;
        loop {
            match self.port.read_byte() {
                Some(b'\n') => {
                    let line = String::from_utf8_lossy(&self.line).trim().to_string();
                    self.line.clear();
                    if line.is_empty() {
                        continue;
                    }
                    log::debug!("AT< {}", line);
                    return Some(line);
                }
                Some(byte) => self.line.push(byte),
                None => {
                    if waited >= timeout_ms {
                        return None;
                    }
                    self.delay.delay_ms(1);
                    waited += 1;
                }
            }
        }
    }

    /// 收集响应行直到 OK；ERROR / +CME ERROR 视为拒绝。
    fn wait_response(&mut self, timeout_ms: u32) -> Result<Vec<String>, ModemError> {
        let mut lines = Vec::new();
        loop {
            let Some(line) = self.read_line(timeout_ms) else {
                return Err(ModemError::Timeout(lines.join(" | ")));
            };
            if line == "OK" {
                return Ok(lines);
            }
            if is_error_line(&line) {
                return Err(ModemError::Rejected(line));
            }
            lines.push(line);
        }
    }

    fn command(&mut self, cmd: &str, timeout_ms: u32) -> Result<Vec<String>, ModemError> {
        self.send(cmd)?;
        self.wait_response(timeout_ms)
    }

    /// 执行查询命令并返回指定前缀之后的内容。
    fn query(&mut self, cmd: &str, prefix: &str, timeout_ms: u32) -> Result<String, ModemError> {
        let lines = self.command(cmd, timeout_ms)?;
        lines
            .iter()
            .find_map(|line| line.strip_prefix(prefix))
            .map(|rest| rest.trim().to_string())
            .ok_or_else(|| ModemError::Malformed(format!("AT{} missing {}", cmd, prefix)))
    }

    /// 等待指定前缀的主动上报行。
    fn wait_urc(&mut self, prefix: &str, timeout_ms: u32) -> Result<String, ModemError> {
        loop {
            let Some(line) = self.read_line(timeout_ms) else {
                return Err(ModemError::Timeout(prefix.to_string()));
            };
            if let Some(rest) = line.strip_prefix(prefix) {
                return Ok(rest.trim().to_string());
            }
            if is_error_line(&line) {
                return Err(ModemError::Rejected(line));
            }
        }
    }

    fn read_exact(&mut self, len: usize, timeout_ms: u32) -> Result<Vec<u8>, ModemError> {
        let mut out = Vec::with_capacity(len);
        let mut waited = 0;
        while out.len() < len {
            match self.port.read_byte() {
                Some(byte) => out.push(byte),
                None => {
                    if waited >= timeout_ms {
                        return Err(ModemError::Timeout(format!(
                            "read {} of {} bytes",
                            out.len(),
                            len
                        )));
                    }
                    self.delay.delay_ms(1);
                    waited += 1;
                }
            }
        }
        Ok(out)
    }

    /// 反复发送 AT 直到模组应答。
    fn test_at(&mut self, timeout_ms: u32) -> Result<(), ModemError> {
        let attempts = (timeout_ms / 1_000).max(1);
        for _ in 0..attempts {
            if self.command("", 500).is_ok() {
                return Ok(());
            }
            self.delay.delay_ms(500);
        }
        Err(ModemError::Timeout("AT".to_string()))
    }

    fn registration_status(&mut self) -> Option<u8> {
        for (cmd, prefix) in [("+CEREG?", "+CEREG:"), ("+CREG?", "+CREG:")] {
            if let Ok(value) = self.query(cmd, prefix, DEFAULT_TIMEOUT_MS) {
                if let Some(stat) = parse_registration(&value) {
                    if is_registered(stat) {
                        return Some(stat);
                    }
                }
            }
        }
        None
    }

    fn open_http(&mut self) -> Result<(), ModemError> {
        if self.http_open {
            return Ok(());
        }
        if self.command("+HTTPINIT", LONG_TIMEOUT_MS).is_err() {
            // 上次会话未关闭时先终止再初始化
            let _ = self.command("+HTTPTERM", LONG_TIMEOUT_MS);
            self.command("+HTTPINIT", LONG_TIMEOUT_MS)?;
        }
        self.http_open = true;
        Ok(())
    }

    fn close_http(&mut self) {
        if !self.http_open {
            return;
        }
        if let Err(err) = self.command("+HTTPTERM", LONG_TIMEOUT_MS) {
            log::warn!("HTTPTERM failed: {:?}", err);
        }
        self.http_open = false;
    }

    fn write_body(&mut self, body: &[u8]) -> Result<(), ModemError> {
        self.send(&format!("+HTTPDATA={},{}", body.len(), LONG_TIMEOUT_MS))?;
        loop {
            let Some(line) = self.read_line(LONG_TIMEOUT_MS) else {
                return Err(ModemError::Timeout("DOWNLOAD".to_string()));
            };
            if line == "DOWNLOAD" {
                break;
            }
            if is_error_line(&line) {
                return Err(ModemError::Rejected(line));
            }
        }
        self.port.write_all(body)?;
        self.wait_response(LONG_TIMEOUT_MS)?;
        Ok(())
    }
}

impl<P: SerialPort, D: DelayNs> CellularModem for Sim7600<P, D> {
    fn init(&mut self) -> Result<(), ModemError> {
        self.test_at(LONG_TIMEOUT_MS)?;
        self.command("E0", DEFAULT_TIMEOUT_MS)?;
        if let Err(err) = self.command("+CMEE=2", DEFAULT_TIMEOUT_MS) {
            log::warn!("Verbose errors unavailable: {:?}", err);
        }
        let sim = self.query("+CPIN?", "+CPIN:", LONG_TIMEOUT_MS)?;
        if sim != "READY" {
            return Err(ModemError::Rejected(format!("SIM {}", sim)));
        }
        Ok(())
    }

    fn restart(&mut self) -> Result<(), ModemError> {
        self.test_at(LONG_TIMEOUT_MS)?;
        self.command("+CRESET", LONG_TIMEOUT_MS)?;
        self.http_open = false;
        self.response = None;
        self.delay.delay_ms(5_000);
        self.init()
    }

    fn modem_info(&mut self) -> Result<String, ModemError> {
        let lines = self.command("I", DEFAULT_TIMEOUT_MS)?;
        Ok(lines
            .into_iter()
            .filter(|line| line != "ATI")
            .collect::<Vec<_>>()
            .join(" "))
    }

    fn wait_for_network(&mut self, timeout_ms: u32) -> Result<(), ModemError> {
        let mut waited = 0;
        loop {
            if let Some(stat) = self.registration_status() {
                log::info!("Network registered (stat {})", stat);
                return Ok(());
            }
            if waited >= timeout_ms {
                return Err(ModemError::NotRegistered);
            }
            self.delay.delay_ms(REGISTRATION_POLL_MS);
            waited += REGISTRATION_POLL_MS;
        }
    }

    fn gprs_connect(&mut self, apn: &str, user: &str, pass: &str) -> Result<(), ModemError> {
        self.command(&format!("+CGDCONT=1,\"IP\",\"{}\"", apn), DEFAULT_TIMEOUT_MS)?;
        if !user.is_empty() {
            self.command(
                &format!("+CGAUTH=1,1,\"{}\",\"{}\"", pass, user),
                DEFAULT_TIMEOUT_MS,
            )?;
        }
        self.command("+CGATT=1", ATTACH_TIMEOUT_MS)?;
        self.command("+CGACT=1,1", ATTACH_TIMEOUT_MS)?;
        if !self.is_gprs_connected() {
            return Err(ModemError::Rejected("PDP context inactive".to_string()));
        }
        Ok(())
    }

    fn gprs_disconnect(&mut self) -> Result<(), ModemError> {
        self.close_http();
        self.command("+CGACT=0,1", ATTACH_TIMEOUT_MS)?;
        self.command("+CGATT=0", ATTACH_TIMEOUT_MS)?;
        Ok(())
    }

    fn is_gprs_connected(&mut self) -> bool {
        let attached = matches!(
            self.query("+CGATT?", "+CGATT:", DEFAULT_TIMEOUT_MS).as_deref(),
            Ok("1")
        );
        if !attached {
            return false;
        }
        match self.command("+CGACT?", DEFAULT_TIMEOUT_MS) {
            Ok(lines) => lines
                .iter()
                .filter_map(|line| line.strip_prefix("+CGACT:"))
                .any(|value| parse_context_state(value) == Some((1, 1))),
            Err(_) => false,
        }
    }

    fn enable_gps(&mut self) -> Result<(), ModemError> {
        if let Ok(state) = self.query("+CGPS?", "+CGPS:", DEFAULT_TIMEOUT_MS) {
            if state.starts_with('1') {
                return Ok(());
            }
        }
        self.command("+CGPS=1,1", LONG_TIMEOUT_MS)?;
        Ok(())
    }

    fn get_gps(&mut self) -> Result<GpsFix, ModemError> {
        let info = self.query("+CGNSSINFO", "+CGNSSINFO:", LONG_TIMEOUT_MS)?;
        parse_cgnssinfo(&info).ok_or(ModemError::NoFix)
    }

    fn ntp_server_sync(&mut self, server: &str, timezone_quarters: i8) -> Result<(), ModemError> {
        self.command(
            &format!("+CNTP=\"{}\",{}", server, timezone_quarters),
            DEFAULT_TIMEOUT_MS,
        )?;
        self.command("+CNTP", LONG_TIMEOUT_MS)?;
        let code = self.wait_urc("+CNTP:", ATTACH_TIMEOUT_MS)?;
        match code.parse::<i32>() {
            Ok(0) => Ok(()),
            Ok(other) => Err(ModemError::NtpFailed(other)),
            Err(_) => Err(ModemError::Malformed(format!("+CNTP: {}", code))),
        }
    }

    fn get_network_time(&mut self) -> Result<NetworkTime, ModemError> {
        let value = self.query("+CCLK?", "+CCLK:", DEFAULT_TIMEOUT_MS)?;
        parse_cclk(&value).ok_or(ModemError::Malformed(value))
    }

    fn poweroff(&mut self) -> Result<(), ModemError> {
        self.http_open = false;
        self.response = None;
        self.command("+CPOF", LONG_TIMEOUT_MS)?;
        Ok(())
    }
}

impl<P: SerialPort, D: DelayNs> HttpBearer for Sim7600<P, D> {
    fn request(
        &mut self,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<(), NetError> {
        self.response = None;
        let action = match method {
            Method::Get => 0,
            Method::Post => 1,
            Method::Head => 2,
            Method::Delete => 3,
            other => return Err(NetError::Transport(format!("unsupported method {:?}", other))),
        };
        if body.is_empty() && action == 1 {
            // 保持连接时模组仍留有上次的 HTTPDATA，空正文需重建会话
            self.close_http();
        }
        self.open_http()?;
        let url = self.api.url(path);
        self.command(&format!("+HTTPPARA=\"URL\",\"{}\"", url), DEFAULT_TIMEOUT_MS)?;
        if let Some(content_type) = content_type {
            self.command(
                &format!("+HTTPPARA=\"CONTENT\",\"{}\"", content_type),
                DEFAULT_TIMEOUT_MS,
            )?;
        }
        if !body.is_empty() {
            self.write_body(body)?;
        }
        self.command(&format!("+HTTPACTION={}", action), DEFAULT_TIMEOUT_MS)?;
        let urc = self.wait_urc("+HTTPACTION:", HTTP_ACTION_TIMEOUT_MS)?;
        let response = parse_http_action(&urc)
            .ok_or_else(|| NetError::Modem(ModemError::Malformed(urc.clone())))?;
        if response.method != action {
            return Err(NetError::Modem(ModemError::Malformed(urc)));
        }
        // 7xx 为模组 HTTP 服务自身的错误码（DNS、连接、超时等）
        if (700..800).contains(&response.status) {
            return Err(NetError::Transport(format!(
                "HTTP service error {}",
                response.status
            )));
        }
        self.response = Some(response);
        Ok(())
    }

    fn response_status_code(&mut self) -> Result<u16, NetError> {
        self.response
            .map(|response| response.status)
            .ok_or_else(|| NetError::Transport("no response".to_string()))
    }

    fn response_body(&mut self) -> Result<String, NetError> {
        let response = self
            .response
            .ok_or_else(|| NetError::Transport("no response".to_string()))?;
        if response.length == 0 {
            return Ok(String::new());
        }
        self.send(&format!("+HTTPREAD=0,{}", response.length))?;
        let mut body = Vec::with_capacity(response.length);
        loop {
            let Some(line) = self.read_line(LONG_TIMEOUT_MS) else {
                return Err(NetError::Modem(ModemError::Timeout("+HTTPREAD".to_string())));
            };
            if is_error_line(&line) {
                return Err(NetError::Modem(ModemError::Rejected(line)));
            }
            let Some(rest) = line.strip_prefix("+HTTPREAD:") else {
                continue;
            };
            let rest = rest.trim();
            let rest = rest.strip_prefix("DATA,").unwrap_or(rest);
            let len = rest
                .parse::<usize>()
                .map_err(|_| NetError::Modem(ModemError::Malformed(line.clone())))?;
            if len == 0 {
                break;
            }
            let chunk = self.read_exact(len, LONG_TIMEOUT_MS)?;
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn end_request(&mut self) {
        self.response = None;
        if !self.keep_alive {
            self.close_http();
        }
    }

    fn stop(&mut self) {
        self.response = None;
        self.close_http();
    }

    fn connection_keep_alive(&mut self) {
        self.keep_alive = true;
    }
}

fn is_error_line(line: &str) -> bool {
    line == "ERROR" || line.starts_with("+CME ERROR") || line.starts_with("+CMS ERROR")
}

fn is_registered(stat: u8) -> bool {
    // 1 = 本地网络，5 = 漫游
    stat == 1 || stat == 5
}

/// `+CREG: <n>,<stat>[,...]` 中的 stat。
pub(crate) fn parse_registration(value: &str) -> Option<u8> {
    value.split(',').nth(1)?.trim().parse().ok()
}

/// `+CGACT: <cid>,<state>`。
pub(crate) fn parse_context_state(value: &str) -> Option<(u8, u8)> {
    let mut parts = value.split(',');
    let cid = parts.next()?.trim().parse().ok()?;
    let state = parts.next()?.trim().parse().ok()?;
    Some((cid, state))
}

/// `+HTTPACTION: <method>,<status>,<datalen>`。
pub(crate) fn parse_http_action(value: &str) -> Option<HttpResponse> {
    let mut parts = value.split(',').map(str::trim);
    let method = parts.next()?.parse().ok()?;
    let status = parts.next()?.parse().ok()?;
    let length = parts.next()?.parse().ok()?;
    Some(HttpResponse {
        method,
        status,
        length,
    })
}

/// `"yy/MM/dd,hh:mm:ss±zz"`，zz 以 15 分钟为单位。
pub(crate) fn parse_cclk(value: &str) -> Option<NetworkTime> {
    let value = value.trim().trim_matches('"');
    let (date, time) = value.split_once(',')?;
    let mut date_parts = date.split('/');
    let year: i32 = date_parts.next()?.parse().ok()?;
    let month = date_parts.next()?.parse().ok()?;
    let day = date_parts.next()?.parse().ok()?;

    let tz_pos = time.find(|c: char| c == '+' || c == '-')?;
    let (clock, zone) = time.split_at(tz_pos);
    let mut clock_parts = clock.split(':');
    let hour = clock_parts.next()?.parse().ok()?;
    let minute = clock_parts.next()?.parse().ok()?;
    let second = clock_parts.next()?.parse().ok()?;
    let timezone_quarters = zone.parse::<i8>().ok()?;

    Some(NetworkTime {
        year: if year < 100 { 2000 + year } else { year },
        month,
        day,
        hour,
        minute,
        second,
        timezone_quarters,
    })
}

/// NMEA 风格 `ddmm.mmmm` / `dddmm.mmmm` 转十进制度。
pub(crate) fn nmea_to_degrees(value: &str, hemisphere: &str) -> Option<f64> {
    let raw: f64 = value.trim().parse().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    match hemisphere.trim() {
        "N" | "E" => Some(decimal),
        "S" | "W" => Some(-decimal),
        _ => None,
    }
}

/// 解析 `AT+CGNSSINFO`。无定位时字段为空，返回 None。
///
/// 字段：mode, GPS-SVs, GLONASS-SVs, BEIDOU-SVs[, GALILEO-SVs], lat, N/S, lon, E/W,
/// date(ddmmyy), UTC(hhmmss.s), alt, speed(节), course, PDOP, HDOP, VDOP。
/// 该命令只报告参与定位的卫星数，可见数与使用数取同一值。
pub(crate) fn parse_cgnssinfo(value: &str) -> Option<GpsFix> {
    let fields: Vec<&str> = value.split(',').map(str::trim).collect();
    let is_hemisphere = |idx: usize| matches!(fields.get(idx), Some(&"N") | Some(&"S"));
    let lat_idx = if is_hemisphere(5) {
        4
    } else if is_hemisphere(6) {
        5
    } else {
        return None;
    };

    let satellites: u8 = fields[1..lat_idx]
        .iter()
        .filter_map(|count| count.parse::<u8>().ok())
        .fold(0u8, |acc, count| acc.saturating_add(count));
    let latitude = nmea_to_degrees(fields.get(lat_idx)?, fields.get(lat_idx + 1)?)?;
    let longitude = nmea_to_degrees(fields.get(lat_idx + 2)?, fields.get(lat_idx + 3)?)?;
    let fix_time = parse_fix_time(
        fields.get(lat_idx + 4).copied().unwrap_or(""),
        fields.get(lat_idx + 5).copied().unwrap_or(""),
    );
    let number = |offset: usize| -> f32 {
        fields
            .get(lat_idx + offset)
            .and_then(|v| v.parse::<f32>().ok())
            .unwrap_or(0.0)
    };

    Some(GpsFix {
        latitude,
        longitude,
        altitude_m: number(6),
        speed_kmh: number(7) * 1.852,
        visible_satellites: satellites,
        used_satellites: satellites,
        accuracy: number(10),
        fix_time,
    })
}

fn parse_fix_time(date: &str, time: &str) -> Option<NetworkTime> {
    if date.len() != 6 || time.len() < 6 {
        return None;
    }
    let two = |s: &str, at: usize| s.get(at..at + 2)?.parse::<u8>().ok();
    Some(NetworkTime {
        year: 2000 + two(date, 4)? as i32,
        month: two(date, 2)?,
        day: two(date, 0)?,
        hour: two(time, 0)?,
        minute: two(time, 2)?,
        second: two(time, 4)?,
        timezone_quarters: 0,
    })
}
