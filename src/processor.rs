use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::lifecycle::{CellularLifecycle, LinkOutcome};
use crate::model::BridgeSettings;
use crate::net::{self, CellularLink};
use crate::proto::{Command, PollStatus, Reply};
use crate::state::BridgeState;

/// 处理一帧后的决策输出（回复 + 是否清空串口输入）。
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    pub command: Command,
    pub reply: Reply,
    pub flush_input: bool,
}

/// 命令分发器：检查连接状态后按首字节路由到各处理函数。
pub struct BridgeProcessor<L, O, D>
where
    L: CellularLink,
    O: OutputPin,
    D: DelayNs,
{
    link: L,
    lifecycle: CellularLifecycle<O>,
    delay: D,
    settings: BridgeSettings,
    pub state: BridgeState,
}

impl<L, O, D> BridgeProcessor<L, O, D>
where
    L: CellularLink,
    O: OutputPin,
    D: DelayNs,
{
    pub fn new(link: L, lifecycle: CellularLifecycle<O>, delay: D, settings: BridgeSettings) -> Self {
        Self {
            link,
            lifecycle,
            delay,
            settings,
            state: BridgeState::new(),
        }
    }

    /// 开机建链；失败只记录，等下一条命令再重连。
    pub fn start(&mut self) -> LinkOutcome {
        let outcome = self.lifecycle.connect(
            &mut self.link,
            &mut self.state,
            &mut self.delay,
            &self.settings,
        );
        match outcome {
            LinkOutcome::Success => self.link.connection_keep_alive(),
            other => log::warn!("Startup link not ready: {:?}", other),
        }
        outcome
    }

    /// 处理一帧完整命令，恰好产出一个回复。
    pub fn handle_frame(&mut self, frame: &[u8]) -> Decision {
        self.state.record_frame();
        let command = Command::classify(frame);
        log::info!("Handling {} command ({} bytes)", command.as_str(), frame.len());

        if !self.link.is_gprs_connected() {
            log::warn!("GPRS not connected, rejecting {} command", command.as_str());
            if self.settings.reconnect_on_demand && command != Command::Disconnect {
                let outcome = self.lifecycle.connect(
                    &mut self.link,
                    &mut self.state,
                    &mut self.delay,
                    &self.settings,
                );
                if outcome.is_success() {
                    self.link.connection_keep_alive();
                }
                log::info!("Reconnect attempt: {:?}", outcome);
            }
            return Decision {
                command,
                reply: Reply::Disconnected,
                flush_input: false,
            };
        }

        let reply = match command {
            // 能走到这里说明已连接
            Command::Ping => Reply::Connected,
            Command::SyncTime => Reply::Time(self.sync_time()),
            Command::Poll => Reply::Poll(self.poll_command()),
            Command::GpsFix => Reply::Gps(self.gps_fix()),
            Command::Disconnect => {
                self.lifecycle.teardown(&mut self.link, &mut self.state);
                return Decision {
                    command,
                    reply: Reply::Disconnected,
                    flush_input: true,
                };
            }
            Command::Upload => self.upload(frame),
        };
        Decision {
            command,
            reply,
            flush_input: false,
        }
    }

    /// NTP 同步后读取模组时间并换算 epoch。
    fn sync_time(&mut self) -> Option<i64> {
        let quarters = self.settings.utc_offset_hours.saturating_mul(4);
        if let Err(err) = self.link.ntp_server_sync(&self.settings.ntp_server, quarters) {
            log::warn!("NTP sync failed: {:?}", err);
            return None;
        }
        let time = match self.link.get_network_time() {
            Ok(time) => time,
            Err(err) => {
                log::warn!("Network time unavailable: {:?}", err);
                return None;
            }
        };
        let epoch = time.to_unix_epoch(self.settings.apply_timezone);
        if epoch.is_none() {
            log::warn!("Network time out of range: {:?}", time);
        }
        epoch
    }

    fn gps_fix(&mut self) -> Option<(f64, f64)> {
        match self.link.get_gps() {
            Ok(fix) => {
                log::info!(
                    "GPS fix {:.6},{:.6} alt {:.1}m speed {:.1}km/h sats {}/{} acc {:.1}",
                    fix.latitude,
                    fix.longitude,
                    fix.altitude_m,
                    fix.speed_kmh,
                    fix.used_satellites,
                    fix.visible_satellites,
                    fix.accuracy
                );
                Some((fix.latitude, fix.longitude))
            }
            Err(err) => {
                log::warn!("GPS fix unavailable: {:?}", err);
                None
            }
        }
    }

    fn poll_command(&mut self) -> PollStatus {
        match net::poll_command(&mut self.link, &mut self.delay, &self.settings) {
            Ok(status) => status,
            Err(err) => {
                if err.is_transport() {
                    self.state.record_transport_error();
                }
                log::warn!("Command poll failed: {:?}", err);
                PollStatus::NoOp
            }
        }
    }

    fn upload(&mut self, payload: &[u8]) -> Reply {
        match net::upload_payload(&mut self.link, &mut self.delay, &self.settings, payload) {
            Ok(()) => {
                self.state.record_upload(true);
                Reply::UploadAck
            }
            Err(err) => {
                if err.is_transport() {
                    self.state.record_transport_error();
                }
                self.state.record_upload(false);
                log::warn!("Upload failed: {:?}", err);
                Reply::UploadFailed
            }
        }
    }

    /// 拆除后的输入静置窗口。
    pub fn settle(&mut self) {
        self.delay.delay_ms(self.settings.teardown_flush_ms);
    }

    /// 空闲时让出 CPU。
    pub fn idle(&mut self) {
        self.delay.delay_ms(self.settings.idle_poll_ms);
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn delay(&self) -> &D {
        &self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ControlPins;
    use crate::model::{GpsFix, NetworkTime};
    use crate::modem::ModemError;
    use crate::net::NetError;
    use crate::state::{LinkFault, LinkPhase};
    use crate::testing::{pin_log, FakeDelay, FakeLink, FakePin, LinkCall};

    fn processor(link: FakeLink) -> BridgeProcessor<FakeLink, FakePin, FakeDelay> {
        let log = pin_log();
        let pins = ControlPins {
            reset: FakePin::new("reset", &log),
            pwrkey: FakePin::new("pwrkey", &log),
            flight: FakePin::new("flight", &log),
        };
        let mut settings = BridgeSettings::default();
        settings.utc_offset_hours = 0;
        BridgeProcessor::new(link, CellularLifecycle::new(pins), FakeDelay::default(), settings)
    }

    #[test]
    fn disconnected_rejects_every_command_without_http() {
        let frames: [&[u8]; 7] = [b"^", b"$", b"?", b"*", b"0", b"12,34", b""];
        for frame in frames {
            let mut p = processor(FakeLink::default());
            p.settings.reconnect_on_demand = false;
            let decision = p.handle_frame(frame);
            assert_eq!(decision.reply, Reply::Disconnected);
            assert!(!decision.flush_input);
            assert_eq!(p.link().http_requests(), 0);
            assert_eq!(p.link().calls, vec![LinkCall::IsGprsConnected]);
        }
    }

    #[test]
    fn disconnected_triggers_reconnect_but_still_replies_disconnected() {
        let mut p = processor(FakeLink::default());
        let decision = p.handle_frame(b"?");
        assert_eq!(decision.reply, Reply::Disconnected);
        assert_eq!(p.link().http_requests(), 0);
        assert!(p.link().gprs_connected);
        assert_eq!(p.state.phase, LinkPhase::Ready);
        assert!(p.link().calls.contains(&LinkCall::HttpKeepAlive));

        // 重连成功后下一条命令正常路由
        p.link_mut().http_body = "Start".to_string();
        assert_eq!(p.handle_frame(b"?").reply, Reply::Poll(PollStatus::Start));
    }

    #[test]
    fn failed_reconnect_still_replies_disconnected() {
        let mut p = processor(FakeLink {
            network_failures: u32::MAX,
            ..Default::default()
        });
        let decision = p.handle_frame(b"12,34");
        assert_eq!(decision.command, Command::Upload);
        assert_eq!(decision.reply, Reply::Disconnected);
        assert!(!decision.flush_input);
        assert_eq!(p.link().http_requests(), 0);
        assert_eq!(p.state.last_fault, Some(LinkFault::NoNetwork));
        assert!(!p.link().calls.contains(&LinkCall::HttpKeepAlive));
    }

    #[test]
    fn disconnect_request_while_offline_does_not_reconnect() {
        let mut p = processor(FakeLink::default());
        let decision = p.handle_frame(b"0");
        assert_eq!(decision.reply, Reply::Disconnected);
        assert_eq!(p.link().calls, vec![LinkCall::IsGprsConnected]);
    }

    #[test]
    fn ping_replies_connected_without_network_call() {
        let mut p = processor(FakeLink::connected());
        let decision = p.handle_frame(b"^");
        assert_eq!(decision.command, Command::Ping);
        assert_eq!(decision.reply, Reply::Connected);
        assert_eq!(p.link().calls, vec![LinkCall::IsGprsConnected]);
    }

    #[test]
    fn time_sync_replies_epoch() {
        let mut link = FakeLink::connected();
        link.time = Ok(NetworkTime {
            year: 2024,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
            timezone_quarters: 0,
        });
        let mut p = processor(link);
        let decision = p.handle_frame(b"$");
        assert_eq!(decision.reply, Reply::Time(Some(1_704_067_200)));
        assert!(p
            .link()
            .calls
            .iter()
            .any(|c| matches!(c, LinkCall::NtpSync(_, 0))));
    }

    #[test]
    fn time_sync_failures_reply_t0() {
        let mut link = FakeLink::connected();
        link.ntp = Err(ModemError::NtpFailed(3));
        let mut p = processor(link);
        assert_eq!(p.handle_frame(b"$").reply, Reply::Time(None));
        assert!(!p.link().calls.contains(&LinkCall::GetNetworkTime));

        p.link_mut().ntp = Ok(());
        assert_eq!(p.handle_frame(b"$").reply, Reply::Time(None));
    }

    #[test]
    fn gps_fix_reply() {
        let mut link = FakeLink::connected();
        link.gps = Ok(GpsFix {
            latitude: 41.3251,
            longitude: -70.6711,
            speed_kmh: 0.0,
            altitude_m: 12.0,
            visible_satellites: 9,
            used_satellites: 7,
            accuracy: 0.9,
            fix_time: None,
        });
        let mut p = processor(link);
        let decision = p.handle_frame(b"*");
        assert_eq!(decision.reply.token(), "G41.325100,-70.671100");

        p.link_mut().gps = Err(ModemError::NoFix);
        assert_eq!(p.handle_frame(b"*").reply, Reply::Gps(None));
    }

    #[test]
    fn poll_outcomes() {
        let mut p = processor(FakeLink::connected());
        p.link_mut().http_body = "Stop".to_string();
        assert_eq!(p.handle_frame(b"?").reply, Reply::Poll(PollStatus::Stop));

        p.link_mut().http_status = Ok(503);
        assert_eq!(p.handle_frame(b"?").reply, Reply::Poll(PollStatus::NoOp));
        assert_eq!(p.state.transport_errors, 0);

        p.link_mut().http_request_error = Some(NetError::Transport("refused".to_string()));
        assert_eq!(p.handle_frame(b"?").reply, Reply::Poll(PollStatus::NoOp));
        assert_eq!(p.state.transport_errors, 1);
    }

    #[test]
    fn upload_sends_whole_frame() {
        let mut p = processor(FakeLink::connected());
        let decision = p.handle_frame(b"12,34.5,<x");
        assert_eq!(decision.command, Command::Upload);
        assert_eq!(decision.reply, Reply::UploadAck);
        assert!(p.link().calls.iter().any(|c| matches!(
            c,
            LinkCall::HttpRequest(_, _, Some(ct), body) if ct == "text/plain" && body == b"12,34.5,<x"
        )));

        p.link_mut().http_status = Ok(201);
        assert_eq!(p.handle_frame(b"x").reply, Reply::UploadFailed);
        assert_eq!(p.state.uploads_acked, 1);
        assert_eq!(p.state.uploads_failed, 1);
    }

    #[test]
    fn disconnect_tears_down_and_requests_flush() {
        let mut p = processor(FakeLink::connected());
        p.state.phase = LinkPhase::Ready;
        let decision = p.handle_frame(b"0");
        assert_eq!(decision.reply, Reply::Disconnected);
        assert!(decision.flush_input);
        assert_eq!(p.state.phase, LinkPhase::PoweredOff);
        assert_eq!(
            p.link().calls[1..],
            [LinkCall::HttpStop, LinkCall::GprsDisconnect, LinkCall::PowerOff]
        );
    }
}
