use embedded_hal::delay::DelayNs;
use embedded_svc::http::Method;

use crate::model::BridgeSettings;
use crate::modem::{CellularModem, ModemError};
use crate::proto::PollStatus;

pub const CONTENT_TYPE_TEXT: &str = "text/plain";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetError {
    /// 连接/收发失败，未拿到状态码。
    Transport(String),
    HttpStatus(u16),
    Modem(ModemError),
}

impl From<ModemError> for NetError {
    fn from(err: ModemError) -> Self {
        NetError::Modem(err)
    }
}

impl NetError {
    /// 是否需要中止请求并关闭连接。
    pub fn is_transport(&self) -> bool {
        matches!(self, NetError::Transport(_) | NetError::Modem(_))
    }
}

/// 蜂窝承载上的 HTTP 客户端（固定主机，按路径请求）。
pub trait HttpBearer {
    /// 发起请求；传输层失败返回 Err。
    fn request(
        &mut self,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<(), NetError>;

    fn response_status_code(&mut self) -> Result<u16, NetError>;

    fn response_body(&mut self) -> Result<String, NetError>;

    /// 结束当前请求。
    fn end_request(&mut self);

    /// 强制关闭连接。
    fn stop(&mut self);

    fn connection_keep_alive(&mut self);

    fn get(&mut self, path: &str) -> Result<(), NetError> {
        self.request(Method::Get, path, None, &[])
    }

    fn post(&mut self, path: &str, content_type: &str, body: &[u8]) -> Result<(), NetError> {
        self.request(Method::Post, path, Some(content_type), body)
    }
}

/// 同一块模组同时提供模组能力与 HTTP。
pub trait CellularLink: CellularModem + HttpBearer {}

impl<T: CellularModem + HttpBearer> CellularLink for T {}

/// 拉取远端指令：200 + "Start"/"Stop" 才算有效。
pub fn poll_command<H, D>(
    http: &mut H,
    delay: &mut D,
    settings: &BridgeSettings,
) -> Result<PollStatus, NetError>
where
    H: HttpBearer + ?Sized,
    D: DelayNs,
{
    let path = settings.api.poll_path.as_str();
    log::info!("Polling commands from {}", settings.api.poll_url());
    let result = fetch_poll_status(http, path);
    match result {
        Ok(status) => {
            log::info!("Poll result {:?}", status);
            Ok(status)
        }
        Err(err) => {
            if err.is_transport() {
                abort_request(http, delay, settings.abort_backoff_ms);
            }
            Err(err)
        }
    }
}

/// 上传帧载荷（text/plain），仅 200 视为成功。
pub fn upload_payload<H, D>(
    http: &mut H,
    delay: &mut D,
    settings: &BridgeSettings,
    payload: &[u8],
) -> Result<(), NetError>
where
    H: HttpBearer + ?Sized,
    D: DelayNs,
{
    let path = settings.api.upload_path.as_str();
    log::info!(
        "Uploading {} bytes to {}",
        payload.len(),
        settings.api.upload_url()
    );
    let result = http
        .post(path, CONTENT_TYPE_TEXT, payload)
        .and_then(|_| http.response_status_code());
    match result {
        Ok(200) => {
            log::info!("Upload response status 200");
            Ok(())
        }
        Ok(status) => {
            log::warn!("Upload rejected with status {}", status);
            Err(NetError::HttpStatus(status))
        }
        Err(err) => {
            if err.is_transport() {
                abort_request(http, delay, settings.abort_backoff_ms);
            }
            Err(err)
        }
    }
}

fn fetch_poll_status<H: HttpBearer + ?Sized>(http: &mut H, path: &str) -> Result<PollStatus, NetError> {
    http.get(path)?;
    let status = http.response_status_code()?;
    if status != 200 {
        return Err(NetError::HttpStatus(status));
    }
    let body = http.response_body()?;
    Ok(PollStatus::from_body(&body))
}

/// 传输失败：结束请求、关闭连接并短暂等待，不在本次调用内重试。
fn abort_request<H, D>(http: &mut H, delay: &mut D, backoff_ms: u32)
where
    H: HttpBearer + ?Sized,
    D: DelayNs,
{
    log::warn!("HTTP transport failed, closing connection");
    http.end_request();
    http.stop();
    delay.delay_ms(backoff_ms);
}
