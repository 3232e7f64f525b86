use crate::model::ReplyStyle;

/// 串口协议帧分隔符：`<` 载荷 `>`。
pub const START_MARKER: u8 = b'<';
pub const END_MARKER: u8 = b'>';
/// 新格式回复的行结束符。
pub const LINE_END: &[u8] = b"\r\n";

/// 命令首字节定义。
pub const CMD_PING: u8 = b'^';
pub const CMD_TIME: u8 = b'$';
pub const CMD_POLL: u8 = b'?';
pub const CMD_GPS: u8 = b'*';
pub const CMD_DISCONNECT: u8 = b'0';

/// 由帧首字节选出的命令。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Ping,
    SyncTime,
    Poll,
    GpsFix,
    Disconnect,
    /// 其余首字节：整帧作为数据上传。
    Upload,
}

impl Command {
    /// 根据首字节分类；空帧按上传处理。
    pub fn classify(frame: &[u8]) -> Self {
        match frame.first().copied() {
            Some(CMD_PING) => Command::Ping,
            Some(CMD_TIME) => Command::SyncTime,
            Some(CMD_POLL) => Command::Poll,
            Some(CMD_GPS) => Command::GpsFix,
            Some(CMD_DISCONNECT) => Command::Disconnect,
            _ => Command::Upload,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::SyncTime => "time",
            Command::Poll => "poll",
            Command::GpsFix => "gps",
            Command::Disconnect => "disconnect",
            Command::Upload => "upload",
        }
    }
}

/// 远端下发的采集指令。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollStatus {
    /// 状态码非 200、正文无法识别或传输失败。
    NoOp,
    Start,
    Stop,
}

impl PollStatus {
    /// 按正文判定（仅接受精确的 "Start"/"Stop"）。
    pub fn from_body(body: &str) -> Self {
        match body {
            "Start" => PollStatus::Start,
            "Stop" => PollStatus::Stop,
            _ => PollStatus::NoOp,
        }
    }
}

/// 回复给本地设备的结果码。
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Connected,
    Disconnected,
    Poll(PollStatus),
    UploadAck,
    UploadFailed,
    Gps(Option<(f64, f64)>),
    Time(Option<i64>),
}

impl Reply {
    /// 结果码文本（不含分隔符）。
    pub fn token(&self) -> String {
        match self {
            Reply::Connected => "1".to_string(),
            Reply::Disconnected => "0".to_string(),
            Reply::Poll(PollStatus::NoOp) => "C0".to_string(),
            Reply::Poll(PollStatus::Start) => "C1".to_string(),
            Reply::Poll(PollStatus::Stop) => "C2".to_string(),
            Reply::UploadAck => "Da".to_string(),
            Reply::UploadFailed => "D0".to_string(),
            Reply::Gps(Some((lat, lon))) => format!("G{:.6},{:.6}", lat, lon),
            Reply::Gps(None) => "G0".to_string(),
            Reply::Time(Some(epoch)) => format!("T{}", epoch),
            Reply::Time(None) => "T0".to_string(),
        }
    }

    /// 旧格式：单字符，无分隔符。
    fn legacy_token(&self) -> String {
        match self {
            Reply::Connected => "1".to_string(),
            Reply::Disconnected => "0".to_string(),
            Reply::Poll(PollStatus::Start) => "1".to_string(),
            Reply::Poll(PollStatus::Stop) => "0".to_string(),
            Reply::Poll(PollStatus::NoOp) => "2".to_string(),
            Reply::UploadAck => "a".to_string(),
            Reply::UploadFailed => "0".to_string(),
            Reply::Gps(None) | Reply::Time(None) => "0".to_string(),
            Reply::Gps(Some(_)) | Reply::Time(Some(_)) => self.token(),
        }
    }

    /// 编码为串口字节流。
    pub fn encode(&self, style: ReplyStyle) -> Vec<u8> {
        match style {
            ReplyStyle::Framed => {
                let token = self.token();
                let mut out = Vec::with_capacity(token.len() + 2 + LINE_END.len());
                out.push(START_MARKER);
                out.extend_from_slice(token.as_bytes());
                out.push(END_MARKER);
                out.extend_from_slice(LINE_END);
                out
            }
            ReplyStyle::Legacy => self.legacy_token().into_bytes(),
        }
    }
}
