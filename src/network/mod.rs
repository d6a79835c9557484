//! # 网络模块
//!
//! 资源获取能力接口及其实现：
//!
//! - `source` - [`ByteSource`] 接口与基于 reqwest 的 [`HttpSource`]
//! - `memory` - 内存中的 [`MemorySource`]，用于测试与嵌入

pub mod memory;
pub mod source;

pub use memory::MemorySource;
pub use source::{with_detected_media_type, AcquireError, ByteSource, Fetched, HttpSource};
