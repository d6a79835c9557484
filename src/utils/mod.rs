//! # 工具模块
//!
//! - `url` - URL 解析、片段处理、数据 URL
//! - `fs` - 文件系统能力接口及其本地与内存实现
//! - `ids` - 合成 URI 与 MIME 边界使用的随机标识
//! - `integrity` - 子资源完整性校验

pub mod fs;
pub mod ids;
pub mod integrity;
pub mod url;

// Re-export commonly used items for convenience
pub use self::fs::{FileSystem, LocalFileSystem, MemoryFileSystem};
pub use self::ids::{IdSource, RandomIds, SequentialIds};
pub use self::integrity::check_integrity;
pub use self::url::{normalize_url, parse_data_url, resolve_url, strip_fragment, Url};
