//! Z/IP server implementation
//!
//! This crate accepts Z/IP sessions over DTLS or plain UDP and drives each
//! of them with a shared application handler.
//!
//! # 功能
//!
//! ## 服务器基础
//! - [x] 服务器配置管理
//! - [x] DTLS 监听（握手在接收任务内完成，每个会话独立任务）
//! - [x] UDP 监听（单会话，结束后重新绑定）
//! - [x] 取消令牌停止监听及其会话

pub mod config;
pub mod listener;

pub use config::ServerConfig;
pub use listener::ServerListener;
