/// 远端服务器地址（固定主机 + 端口 + 两个固定路径）。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub poll_path: String,
    pub upload_path: String,
}

pub const SERVER_HOST: &str = match option_env!("SERVER_HOST") {
    Some(host) => host,
    None => "gems.whoi.edu",
};
pub const UPLOAD_PATH: &str = match option_env!("POST_PATH") {
    Some(path) => path,
    None => "/uploadGEMS/",
};
pub const POLL_PATH: &str = match option_env!("GET_PATH") {
    Some(path) => path,
    None => "/updates1wd3gda43/",
};
pub const DEFAULT_PORT: u16 = 80;

impl ApiConfig {
    /// 拼接完整 URL（端口为 80 时省略）。
    pub fn url(&self, path: &str) -> String {
        if self.port == DEFAULT_PORT {
            format!("http://{}{}", self.host, path)
        } else {
            format!("http://{}:{}{}", self.host, self.port, path)
        }
    }

    pub fn poll_url(&self) -> String {
        self.url(&self.poll_path)
    }

    pub fn upload_url(&self) -> String {
        self.url(&self.upload_path)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        let port = option_env!("SERVER_PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        Self {
            host: SERVER_HOST.to_string(),
            port,
            poll_path: POLL_PATH.to_string(),
            upload_path: UPLOAD_PATH.to_string(),
        }
    }
}
