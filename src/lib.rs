// 模块划分：串口收帧、协议、命令分发、蜂窝生命周期、模组驱动
pub mod api;
pub mod lifecycle;
pub mod model;
pub mod modem;
pub mod net;
pub mod pipeline;
pub mod processor;
pub mod proto;
pub mod serial;
pub mod serial_io;
pub mod sim7600;
pub mod state;

#[cfg(target_os = "espidf")]
pub mod board;

#[cfg(test)]
mod testing;
