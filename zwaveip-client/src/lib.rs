//! Z/IP client implementation
//!
//! This crate connects to Z/IP gateways over UDP or DTLS and keeps a bounded
//! pool of such connections for applications that address several gateways.
//!
//! # 功能
//!
//! ## 连接管理
//! - [x] 客户端构建器（Builder）模式实现
//! - [x] UDP / DTLS 连接建立
//! - [x] 地址解析（IPv4、IPv6、主机名，默认端口）
//! - [x] 连接关闭和清理
//!
//! ## 连接池
//! - [x] 按地址复用会话
//! - [x] 池满时淘汰最早的空闲会话
//! - [x] 批量停止（可选择跳过忙碌会话）

pub mod connection;
pub mod pool;

pub use connection::{resolve, ClientBuilder, ClientConfig, Security, ZipClient};
pub use pool::{ClientPool, DEFAULT_POOL_CAPACITY};
