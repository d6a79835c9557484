//! # Pagesnap Library
//!
//! 将网页快照保存为 MHTML 归档或文件夹，并能把 MHTML 归档还原为文件夹。
//!
//! ## 模块组织
//!
//! - `core` - 错误、选项与运行报告
//! - `mime` - MIME 编解码原语
//! - `archive` - 资源注册表、文件命名、归档读写
//! - `extract` - 文档与样式表的引用图提取
//! - `jobs` - 获取与重写作业的调度
//! - `engine` - 把以上部分串成一次完整保存
//! - `parsers` - 资源解析器（HTML、CSS、JavaScript）
//! - `network` - 资源获取能力
//! - `utils` - 工具函数与文件系统、标识能力

pub mod archive;
pub mod core;
pub mod engine;
pub mod env;
pub mod extract;
pub mod jobs;
pub mod mime;
pub mod network;
pub mod parsers;
pub mod utils;

// Re-export commonly used items for convenience
pub use archive::{ArchiveReader, ArchiveWriter, ExtractedArchive, ResourceBundle};
pub use self::core::{MhtmlLayout, OutputFormat, SnapshotError, SnapshotOptions, SnapshotReport};
pub use engine::{parse_target, Snapshotter};
pub use jobs::{CancelToken, JobEvent, JobListener, NullListener};
pub use network::{ByteSource, HttpSource, MemorySource};
pub use utils::{FileSystem, IdSource, LocalFileSystem, MemoryFileSystem, RandomIds, SequentialIds};
