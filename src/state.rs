/// 蜂窝链路生命周期阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkPhase {
    PoweredOff,
    Initializing,
    NetworkSearching,
    GprsAttaching,
    Ready,
    TearingDown,
}

impl LinkPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPhase::PoweredOff => "powered-off",
            LinkPhase::Initializing => "initializing",
            LinkPhase::NetworkSearching => "network-searching",
            LinkPhase::GprsAttaching => "gprs-attaching",
            LinkPhase::Ready => "ready",
            LinkPhase::TearingDown => "tearing-down",
        }
    }
}

/// 链路建立失败原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkFault {
    PinControl,
    ModemUnresponsive,
    NoNetwork,
    NoGprs,
}

/// 网桥会话状态（单一控制循环独占）。
#[derive(Clone, Debug)]
pub struct BridgeState {
    pub phase: LinkPhase,
    pub last_fault: Option<LinkFault>,
    pub frames_handled: u32,
    pub transport_errors: u32,
    pub uploads_acked: u32,
    pub uploads_failed: u32,
}

impl BridgeState {
    pub fn new() -> Self {
        Self {
            phase: LinkPhase::PoweredOff,
            last_fault: None,
            frames_handled: 0,
            transport_errors: 0,
            uploads_acked: 0,
            uploads_failed: 0,
        }
    }

    /// 切换生命周期阶段并记录日志。
    pub fn set_phase(&mut self, phase: LinkPhase) {
        if self.phase != phase {
            log::info!("Link phase {} -> {}", self.phase.as_str(), phase.as_str());
            self.phase = phase;
        }
        if phase == LinkPhase::Ready {
            self.last_fault = None;
        }
    }

    pub fn record_fault(&mut self, fault: LinkFault) {
        log::warn!("Link fault {:?} during {}", fault, self.phase.as_str());
        self.last_fault = Some(fault);
    }

    pub fn record_frame(&mut self) {
        self.frames_handled = self.frames_handled.wrapping_add(1);
    }

    pub fn record_transport_error(&mut self) {
        self.transport_errors = self.transport_errors.wrapping_add(1);
    }

    pub fn record_upload(&mut self, acked: bool) {
        if acked {
            self.uploads_acked = self.uploads_acked.wrapping_add(1);
        } else {
            self.uploads_failed = self.uploads_failed.wrapping_add(1);
        }
    }
}

impl Default for BridgeState {
    fn default() -> Self {
        Self::new()
    }
}
