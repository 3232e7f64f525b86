//! 主机单元测试用的假实现：模组/HTTP、控制线、延时。

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, OutputPin};
use embedded_svc::http::Method;

use crate::model::{GpsFix, NetworkTime};
use crate::modem::{CellularModem, ModemError};
use crate::net::{HttpBearer, NetError};

/// 记录每次延时的毫秒数。
#[derive(Default)]
pub struct FakeDelay {
    pub elapsed_ms: u32,
    pub history: Vec<u32>,
}

impl DelayNs for FakeDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.delay_ms(ns / 1_000_000);
    }

    fn delay_us(&mut self, us: u32) {
        self.delay_ms(us / 1_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.elapsed_ms = self.elapsed_ms.saturating_add(ms);
        self.history.push(ms);
    }
}

pub type PinLog = Rc<RefCell<Vec<(&'static str, bool)>>>;

pub fn pin_log() -> PinLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// 输出引脚：电平变化写入共享时间线。
pub struct FakePin {
    name: &'static str,
    log: PinLog,
}

impl FakePin {
    pub fn new(name: &'static str, log: &PinLog) -> Self {
        Self {
            name,
            log: log.clone(),
        }
    }
}

impl ErrorType for FakePin {
    type Error = Infallible;
}

impl OutputPin for FakePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.log.borrow_mut().push((self.name, false));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.log.borrow_mut().push((self.name, true));
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LinkCall {
    Init,
    Restart,
    ModemInfo,
    WaitForNetwork,
    GprsConnect(String),
    GprsDisconnect,
    IsGprsConnected,
    EnableGps,
    GetGps,
    NtpSync(String, i8),
    GetNetworkTime,
    PowerOff,
    HttpRequest(Method, String, Option<String>, Vec<u8>),
    HttpStatus,
    HttpBody,
    HttpEndRequest,
    HttpStop,
    HttpKeepAlive,
}

/// 可编排结果的模组 + HTTP 假实现。
pub struct FakeLink {
    pub calls: Vec<LinkCall>,
    pub gprs_connected: bool,
    pub init_ok: bool,
    pub restart_ok: bool,
    pub network_failures: u32,
    pub gprs_failures: u32,
    pub gps_enable_ok: bool,
    pub gps: Result<GpsFix, ModemError>,
    pub ntp: Result<(), ModemError>,
    pub time: Result<NetworkTime, ModemError>,
    pub http_request_error: Option<NetError>,
    pub http_status: Result<u16, NetError>,
    pub http_body: String,
}

impl Default for FakeLink {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            gprs_connected: false,
            init_ok: true,
            restart_ok: true,
            network_failures: 0,
            gprs_failures: 0,
            gps_enable_ok: true,
            gps: Err(ModemError::NoFix),
            ntp: Ok(()),
            time: Err(ModemError::Malformed("unset".to_string())),
            http_request_error: None,
            http_status: Ok(200),
            http_body: String::new(),
        }
    }
}

impl FakeLink {
    pub fn connected() -> Self {
        Self {
            gprs_connected: true,
            ..Default::default()
        }
    }

    pub fn count(&self, pred: impl Fn(&LinkCall) -> bool) -> usize {
        self.calls.iter().filter(|call| pred(call)).count()
    }

    pub fn http_requests(&self) -> usize {
        self.count(|call| matches!(call, LinkCall::HttpRequest(..)))
    }
}

impl CellularModem for FakeLink {
    fn init(&mut self) -> Result<(), ModemError> {
        self.calls.push(LinkCall::Init);
        if self.init_ok {
            Ok(())
        } else {
            Err(ModemError::Timeout("AT".to_string()))
        }
    }

    fn restart(&mut self) -> Result<(), ModemError> {
        self.calls.push(LinkCall::Restart);
        if self.restart_ok {
            Ok(())
        } else {
            Err(ModemError::Timeout("AT+CRESET".to_string()))
        }
    }

    fn modem_info(&mut self) -> Result<String, ModemError> {
        self.calls.push(LinkCall::ModemInfo);
        Ok("SIMCOM_SIM7600G-H".to_string())
    }

    fn wait_for_network(&mut self, _timeout_ms: u32) -> Result<(), ModemError> {
        self.calls.push(LinkCall::WaitForNetwork);
        if self.network_failures > 0 {
            self.network_failures -= 1;
            return Err(ModemError::NotRegistered);
        }
        Ok(())
    }

    fn gprs_connect(&mut self, apn: &str, _user: &str, _pass: &str) -> Result<(), ModemError> {
        self.calls.push(LinkCall::GprsConnect(apn.to_string()));
        if self.gprs_failures > 0 {
            self.gprs_failures -= 1;
            return Err(ModemError::Rejected("+CME ERROR: 30".to_string()));
        }
        self.gprs_connected = true;
        Ok(())
    }

    fn gprs_disconnect(&mut self) -> Result<(), ModemError> {
        self.calls.push(LinkCall::GprsDisconnect);
        self.gprs_connected = false;
        Ok(())
    }

    fn is_gprs_connected(&mut self) -> bool {
        self.calls.push(LinkCall::IsGprsConnected);
        self.gprs_connected
    }

    fn enable_gps(&mut self) -> Result<(), ModemError> {
        self.calls.push(LinkCall::EnableGps);
        if self.gps_enable_ok {
            Ok(())
        } else {
            Err(ModemError::Rejected("ERROR".to_string()))
        }
    }

    fn get_gps(&mut self) -> Result<GpsFix, ModemError> {
        self.calls.push(LinkCall::GetGps);
        self.gps.clone()
    }

    fn ntp_server_sync(&mut self, server: &str, timezone_quarters: i8) -> Result<(), ModemError> {
        self.calls
            .push(LinkCall::NtpSync(server.to_string(), timezone_quarters));
        self.ntp.clone()
    }

    fn get_network_time(&mut self) -> Result<NetworkTime, ModemError> {
        self.calls.push(LinkCall::GetNetworkTime);
        self.time.clone()
    }

    fn poweroff(&mut self) -> Result<(), ModemError> {
        self.calls.push(LinkCall::PowerOff);
        self.gprs_connected = false;
        Ok(())
    }
}

impl HttpBearer for FakeLink {
    fn request(
        &mut self,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<(), NetError> {
        self.calls.push(LinkCall::HttpRequest(
            method,
            path.to_string(),
            content_type.map(str::to_string),
            body.to_vec(),
        ));
        match self.http_request_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn response_status_code(&mut self) -> Result<u16, NetError> {
        self.calls.push(LinkCall::HttpStatus);
        self.http_status.clone()
    }

    fn response_body(&mut self) -> Result<String, NetError> {
        self.calls.push(LinkCall::HttpBody);
        Ok(self.http_body.clone())
    }

    fn end_request(&mut self) {
        self.calls.push(LinkCall::HttpEndRequest);
    }

    fn stop(&mut self) {
        self.calls.push(LinkCall::HttpStop);
    }

    fn connection_keep_alive(&mut self) {
        self.calls.push(LinkCall::HttpKeepAlive);
    }
}
