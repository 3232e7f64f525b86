use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::model::BridgeSettings;
use crate::modem::CellularModem;
use crate::net::CellularLink;
use crate::state::{BridgeState, LinkFault, LinkPhase};

/// 链路建立结果：成功、可重试（下一条命令再试）、不可恢复。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    Success,
    Retryable(LinkFault),
    Fatal(LinkFault),
}

impl LinkOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LinkOutcome::Success)
    }
}

/// 模组控制线：复位、开机键、飞行模式。
pub struct ControlPins<O> {
    pub reset: O,
    pub pwrkey: O,
    pub flight: O,
}

/// 蜂窝生命周期管理：上电时序、注册/附着、拆除。
pub struct CellularLifecycle<O: OutputPin> {
    pins: ControlPins<O>,
    /// 连续未能附着的次数，达到阈值后重新上电。
    failed_connects: u8,
}

impl<O: OutputPin> CellularLifecycle<O> {
    pub fn new(pins: ControlPins<O>) -> Self {
        Self {
            pins,
            failed_connects: 0,
        }
    }

    /// 开机时序：复位/开机键拉低，稳定后给出开机键脉冲，退出飞行模式。
    pub fn power_on<D: DelayNs>(
        &mut self,
        state: &mut BridgeState,
        delay: &mut D,
        settings: &BridgeSettings,
    ) -> Result<(), LinkFault> {
        log::info!("Powering on modem...");
        state.set_phase(LinkPhase::Initializing);
        self.pins.reset.set_low().map_err(pin_fault)?;
        self.pins.pwrkey.set_low().map_err(pin_fault)?;
        delay.delay_ms(settings.power_settle_ms);
        self.pins.pwrkey.set_high().map_err(pin_fault)?;
        delay.delay_ms(settings.pwrkey_pulse_ms);
        self.pins.pwrkey.set_low().map_err(pin_fault)?;
        // 飞行模式线拉低 = 正常模式
        self.pins.flight.set_low().map_err(pin_fault)?;
        delay.delay_ms(settings.boot_settle_ms);
        Ok(())
    }

    /// 软初始化失败时回落到完整重启。
    pub fn initialize<M: CellularModem + ?Sized>(
        &mut self,
        modem: &mut M,
        state: &mut BridgeState,
    ) -> Result<(), LinkFault> {
        state.set_phase(LinkPhase::Initializing);
        log::info!("Initializing modem...");
        if let Err(err) = modem.init() {
            log::warn!("Modem init failed ({:?}), restarting", err);
            if let Err(err) = modem.restart() {
                log::warn!("Modem restart failed: {:?}", err);
                return Err(LinkFault::ModemUnresponsive);
            }
        }
        match modem.modem_info() {
            Ok(info) => log::info!("Modem: {}", info),
            Err(err) => log::warn!("Modem info unavailable: {:?}", err),
        }
        Ok(())
    }

    /// 建立数据链路；失败时不阻塞，返回给调用方等待下一次命令重试。
    pub fn connect<L, D>(
        &mut self,
        link: &mut L,
        state: &mut BridgeState,
        delay: &mut D,
        settings: &BridgeSettings,
    ) -> LinkOutcome
    where
        L: CellularLink + ?Sized,
        D: DelayNs,
    {
        if state.phase == LinkPhase::PoweredOff {
            if let Err(fault) = self.power_on(state, delay, settings) {
                state.record_fault(fault);
                state.set_phase(LinkPhase::PoweredOff);
                self.failed_connects = 0;
                return LinkOutcome::Fatal(fault);
            }
            if let Err(fault) = self.initialize(link, state) {
                state.record_fault(fault);
                state.set_phase(LinkPhase::PoweredOff);
                self.failed_connects = 0;
                return LinkOutcome::Fatal(fault);
            }
        }

        let attempts = settings.connect_attempts.max(1);
        let mut last_fault = LinkFault::NoNetwork;
        for attempt in 1..=attempts {
            match self.attach(link, state, delay, settings) {
                Ok(()) => {
                    self.failed_connects = 0;
                    state.set_phase(LinkPhase::Ready);
                    log::info!("Ready for commands");
                    return LinkOutcome::Success;
                }
                Err(fault) => {
                    state.record_fault(fault);
                    last_fault = fault;
                    if attempt < attempts {
                        delay.delay_ms(settings.retry_delay_ms);
                    }
                }
            }
        }
        self.failed_connects = self.failed_connects.saturating_add(1);
        if settings.power_cycle_after > 0 && self.failed_connects >= settings.power_cycle_after {
            // 模组可能已失去响应：关机后下一次连接重走上电与初始化
            log::warn!(
                "{} consecutive connect failures, power cycling modem",
                self.failed_connects
            );
            if let Err(err) = link.poweroff() {
                log::warn!("Modem power off failed: {:?}", err);
            }
            self.failed_connects = 0;
            state.set_phase(LinkPhase::PoweredOff);
        }
        LinkOutcome::Retryable(last_fault)
    }

    /// 拆除：停止 HTTP、断开 GPRS、模组关机。
    pub fn teardown<L: CellularLink + ?Sized>(&mut self, link: &mut L, state: &mut BridgeState) {
        state.set_phase(LinkPhase::TearingDown);
        log::info!("Disconnecting");
        link.stop();
        log::info!("Server disconnected");
        match link.gprs_disconnect() {
            Ok(()) => log::info!("GPRS disconnected"),
            Err(err) => log::warn!("GPRS disconnect failed: {:?}", err),
        }
        if let Err(err) = link.poweroff() {
            log::warn!("Modem power off failed: {:?}", err);
        }
        state.set_phase(LinkPhase::PoweredOff);
    }

    fn attach<L, D>(
        &mut self,
        link: &mut L,
        state: &mut BridgeState,
        delay: &mut D,
        settings: &BridgeSettings,
    ) -> Result<(), LinkFault>
    where
        L: CellularLink + ?Sized,
        D: DelayNs,
    {
        state.set_phase(LinkPhase::NetworkSearching);
        log::info!("Waiting for network...");
        if let Err(err) = link.wait_for_network(settings.network_timeout_ms) {
            log::warn!("Network registration failed: {:?}", err);
            return Err(LinkFault::NoNetwork);
        }

        state.set_phase(LinkPhase::GprsAttaching);
        log::info!("Connecting to {}", settings.apn);
        if let Err(err) = link.gprs_connect(&settings.apn, &settings.apn_user, &settings.apn_pass) {
            log::warn!("GPRS attach failed: {:?}", err);
            return Err(LinkFault::NoGprs);
        }

        // GNSS 尽力开启，失败不影响数据链路
        match link.enable_gps() {
            Ok(()) => log::info!("GPS enabled"),
            Err(err) => log::warn!("GPS enable failed: {:?}", err),
        }
        delay.delay_ms(settings.gps_settle_ms);
        Ok(())
    }
}

fn pin_fault<E: embedded_hal::digital::Error>(err: E) -> LinkFault {
    log::warn!("Modem control pin error: {:?}", err.kind());
    LinkFault::PinControl
}
