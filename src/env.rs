//! 统一的环境变量管理系统
//!
//! 提供类型安全、可验证的环境变量访问，命令行参数会覆盖这里的值

use std::env;
use std::time::Duration;

use thiserror::Error;

/// 环境变量解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Environment variable '{variable}': {message}")]
pub struct EnvError {
    pub variable: String,
    pub message: String,
}

impl EnvError {
    fn new(variable: &str, message: impl Into<String>) -> Self {
        Self {
            variable: variable.to_string(),
            message: message.into(),
        }
    }
}

pub type EnvResult<T> = Result<T, EnvError>;

/// 环境变量访问器特性
pub trait EnvVar<T> {
    const NAME: &'static str;
    const DEFAULT: Option<T>;
    const DESCRIPTION: &'static str;

    fn parse(value: &str) -> EnvResult<T>;

    /// 解析给定的取值，未设置时使用默认值
    fn resolve(value: Option<&str>) -> EnvResult<T> {
        match value {
            Some(value) => Self::parse(value),
            None => Self::DEFAULT
                .ok_or_else(|| EnvError::new(Self::NAME, "Required environment variable not set")),
        }
    }

    fn get() -> EnvResult<T> {
        Self::resolve(env::var(Self::NAME).ok().as_deref())
    }

    fn get_or_default(default: T) -> T {
        Self::get().unwrap_or(default)
    }
}

/// 核心环境变量定义
pub mod core {
    use super::*;

    /// 日志级别
    pub struct LogLevel;
    impl EnvVar<String> for LogLevel {
        const NAME: &'static str = "PAGESNAP_LOG_LEVEL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Log level: trace, debug, info, warn, error";

        fn resolve(value: Option<&str>) -> EnvResult<String> {
            value.map_or_else(|| Ok("warn".to_string()), Self::parse)
        }

        fn parse(value: &str) -> EnvResult<String> {
            match value.to_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => Ok(value.to_lowercase()),
                _ => Err(EnvError::new(
                    Self::NAME,
                    format!("Invalid log level '{}'. Use: trace, debug, info, warn, error", value),
                )),
            }
        }
    }

    /// 禁用颜色输出
    pub struct NoColor;
    impl EnvVar<bool> for NoColor {
        const NAME: &'static str = "NO_COLOR";
        const DEFAULT: Option<bool> = Some(false);
        const DESCRIPTION: &'static str = "Disable colored output when set to any value";

        fn parse(value: &str) -> EnvResult<bool> {
            // NO_COLOR 遵循标准：任何值都表示禁用颜色
            Ok(!value.is_empty())
        }
    }
}

/// 快照相关环境变量
pub mod snapshot {
    use super::*;

    /// 并发下载数量上限
    pub struct MaxConcurrent;
    impl EnvVar<usize> for MaxConcurrent {
        const NAME: &'static str = "PAGESNAP_MAX_CONCURRENT";
        const DEFAULT: Option<usize> = Some(4);
        const DESCRIPTION: &'static str = "Maximum number of resources acquired at once";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 1, 64)
        }
    }

    /// 资源文件夹后缀
    pub struct FilesSuffix;
    impl EnvVar<String> for FilesSuffix {
        const NAME: &'static str = "PAGESNAP_FILES_SUFFIX";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Suffix of the resource folder next to a saved page";

        fn resolve(value: Option<&str>) -> EnvResult<String> {
            value.map_or_else(|| Ok("_files".to_string()), Self::parse)
        }

        fn parse(value: &str) -> EnvResult<String> {
            let suffix = value.trim();
            if suffix.is_empty() || suffix.contains(['/', '\\']) {
                return Err(EnvError::new(
                    Self::NAME,
                    "Suffix must be non-empty and contain no path separators",
                ));
            }
            Ok(suffix.to_string())
        }
    }

    /// 自定义 User-Agent
    pub struct UserAgent;
    impl EnvVar<String> for UserAgent {
        const NAME: &'static str = "PAGESNAP_USER_AGENT";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "User-Agent header sent with every request";

        fn parse(value: &str) -> EnvResult<String> {
            let agent = value.trim();
            if agent.is_empty() {
                return Err(EnvError::new(Self::NAME, "User agent must not be empty"));
            }
            Ok(agent.to_string())
        }
    }

    /// 请求超时
    pub struct Timeout;
    impl EnvVar<Duration> for Timeout {
        const NAME: &'static str = "PAGESNAP_TIMEOUT";
        const DEFAULT: Option<Duration> = Some(Duration::from_secs(60));
        const DESCRIPTION: &'static str = "Request timeout in seconds (0 disables it)";

        fn parse(value: &str) -> EnvResult<Duration> {
            let seconds: u64 = value
                .trim()
                .parse()
                .map_err(|_| EnvError::new(Self::NAME, "Must be a valid number of seconds"))?;

            if seconds > 3600 {
                return Err(EnvError::new(Self::NAME, "Timeout too long (max 3600 seconds)"));
            }

            Ok(Duration::from_secs(seconds))
        }
    }
}

/// 辅助函数
fn parse_positive_usize(value: &str, var_name: &str, min: usize, max: usize) -> EnvResult<usize> {
    let num: usize = value
        .trim()
        .parse()
        .map_err(|_| EnvError::new(var_name, "Must be a valid positive number"))?;

    if num < min {
        return Err(EnvError::new(var_name, format!("Value {} is below minimum {}", num, min)));
    }

    if num > max {
        return Err(EnvError::new(var_name, format!("Value {} exceeds maximum {}", num, max)));
    }

    Ok(num)
}

/// 环境变量文档生成器
pub fn generate_env_docs() -> String {
    let mut docs = String::new();
    docs.push_str("# Environment Variables\n\n");

    let entries: [(&str, &str); 6] = [
        (core::LogLevel::NAME, core::LogLevel::DESCRIPTION),
        (core::NoColor::NAME, core::NoColor::DESCRIPTION),
        (snapshot::MaxConcurrent::NAME, snapshot::MaxConcurrent::DESCRIPTION),
        (snapshot::FilesSuffix::NAME, snapshot::FilesSuffix::DESCRIPTION),
        (snapshot::UserAgent::NAME, snapshot::UserAgent::DESCRIPTION),
        (snapshot::Timeout::NAME, snapshot::Timeout::DESCRIPTION),
    ];
    for (name, description) in entries {
        docs.push_str(&format!("- `{}`: {}\n", name, description));
    }

    docs
}
