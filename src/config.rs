use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 临时文件根目录（按用户和批次分子目录）
    pub work_dir: PathBuf,
    /// 收件箱目录，布局为 `<用户ID>/<漫画标题>/<章节文件>`
    pub inbox_dir: PathBuf,
    /// 单个输出卷的体积上限（MB）
    pub max_volume_mb: u64,
    /// 同时处理的用户数量
    pub max_concurrent_users: usize,
    /// 同一批次内同时转换的章节数量
    pub max_concurrent_conversions: usize,
    /// 插入到每一卷开头的封面图片
    pub cover_image: Option<PathBuf>,
    /// 批次报告文件（JSON Lines），为空则不写
    pub report_file: Option<PathBuf>,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    pub converter: ConverterConfig,
    pub delivery: DeliveryConfig,
}

/// 转换工具（KCC）配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub program: String,
    /// 设备型号，例如 KPW5、KO、OTHER
    pub profile: String,
    pub page_width: Option<u32>,
    pub page_height: Option<u32>,
    pub gamma: f32,
    /// 日漫右开模式
    pub manga_mode: bool,
    pub upscale: bool,
    pub force_color: bool,
    pub extra_args: Vec<String>,
    pub timeout_secs: u64,
}

/// 发送配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// 外部发送命令；为空时写入 outbox 目录
    pub command: Option<String>,
    /// 命令参数模板，支持 {path} {filename} {mailbox} {subject} {size}
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub outbox_dir: PathBuf,
    /// 未单独配置邮箱的用户使用的默认收件地址
    pub default_mailbox: Option<String>,
    /// 用户 ID -> 收件邮箱
    pub mailboxes: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("downloads"),
            inbox_dir: PathBuf::from("inbox"),
            max_volume_mb: 47,
            max_concurrent_users: 4,
            max_concurrent_conversions: 2,
            cover_image: None,
            report_file: Some(PathBuf::from("batch_report.jsonl")),
            verbose_logging: false,
            converter: ConverterConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: "kcc-c2e".to_string(),
            profile: "KPW5".to_string(),
            page_width: None,
            page_height: None,
            gamma: 0.90,
            manga_mode: true,
            upscale: true,
            force_color: true,
            extra_args: Vec::new(),
            timeout_secs: 600,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: vec![
                "--to".to_string(),
                "{mailbox}".to_string(),
                "--subject".to_string(),
                "{subject}".to_string(),
                "--attach".to_string(),
                "{path}".to_string(),
            ],
            timeout_secs: 120,
            outbox_dir: PathBuf::from("outbox"),
            default_mailbox: None,
            mailboxes: BTreeMap::new(),
        }
    }
}

impl Config {
    /// 加载配置：配置文件（`CONFIG_FILE` 或当前目录下的 config.toml）+ 环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var("CONFIG_FILE")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                let default = PathBuf::from("config.toml");
                default.exists().then_some(default)
            });

        let base = match file {
            Some(path) => Self::from_toml_file(&path)?,
            None => Self::default(),
        };

        let config = base.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// 仅使用默认值 + 环境变量
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 用环境变量覆盖已有配置
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = std::env::var("WORK_DIR") {
            self.work_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("INBOX_DIR") {
            self.inbox_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse("MAX_VOLUME_MB")? {
            self.max_volume_mb = v;
        }
        if let Some(v) = env_parse("MAX_CONCURRENT_USERS")? {
            self.max_concurrent_users = v;
        }
        if let Some(v) = env_parse("MAX_CONCURRENT_CONVERSIONS")? {
            self.max_concurrent_conversions = v;
        }
        if let Ok(v) = std::env::var("KCC_PROGRAM") {
            self.converter.program = v;
        }
        if let Ok(v) = std::env::var("KCC_PROFILE") {
            self.converter.profile = v;
        }
        if let Some(v) = env_parse("CONVERSION_TIMEOUT_SECS")? {
            self.converter.timeout_secs = v;
        }
        if let Ok(v) = std::env::var("DELIVERY_COMMAND") {
            self.delivery.command = Some(v);
        }
        if let Some(v) = env_parse("DELIVERY_TIMEOUT_SECS")? {
            self.delivery.timeout_secs = v;
        }
        if let Ok(v) = std::env::var("OUTBOX_DIR") {
            self.delivery.outbox_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("KINDLE_EMAIL") {
            self.delivery.default_mailbox = Some(v);
        }
        if let Ok(v) = std::env::var("COVER_IMAGE") {
            self.cover_image = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("REPORT_FILE") {
            self.report_file = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        }
        if let Some(v) = env_parse("VERBOSE_LOGGING")? {
            self.verbose_logging = v;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_volume_mb == 0 {
            return Err(invalid("max_volume_mb", "必须大于 0"));
        }
        if self.max_volume_mb.checked_mul(BYTES_PER_MB).is_none() {
            return Err(invalid("max_volume_mb", "数值过大"));
        }
        if self.max_concurrent_users == 0 {
            return Err(invalid("max_concurrent_users", "必须大于 0"));
        }
        if self.max_concurrent_conversions == 0 {
            return Err(invalid("max_concurrent_conversions", "必须大于 0"));
        }
        if self.converter.timeout_secs == 0 {
            return Err(invalid("converter.timeout_secs", "必须大于 0"));
        }
        if self.delivery.timeout_secs == 0 {
            return Err(invalid("delivery.timeout_secs", "必须大于 0"));
        }
        if self.converter.page_width.is_some() != self.converter.page_height.is_some() {
            return Err(invalid(
                "converter.page_width/page_height",
                "宽和高必须同时设置",
            ));
        }
        Ok(())
    }

    /// 单卷体积上限（字节），超出 u64 时取最大值
    pub fn max_volume_bytes(&self) -> u64 {
        self.max_volume_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.converter.timeout_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery.timeout_secs)
    }
}

const BYTES_PER_MB: u64 = 1024 * 1024;

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn env_parse<T: FromStr>(var_name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var_name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value,
                expected_type: std::any::type_name::<T>().to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_volume_bytes(), 47 * 1024 * 1024);
        assert_eq!(config.converter.program, "kcc-c2e");
        assert_eq!(config.converter.profile, "KPW5");
    }

    #[test]
    fn test_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
max_volume_mb = 20
work_dir = "/tmp/manga"

[converter]
profile = "OTHER"
page_width = 1264
page_height = 1680

[delivery]
command = "kindle-mail"
default_mailbox = "reader@kindle.com"

[delivery.mailboxes]
"42" = "someone@kindle.com"
"#,
        )
        .unwrap();

        let config = Config::from_toml_file(&path).unwrap();
        assert_eq!(config.max_volume_mb, 20);
        assert_eq!(config.work_dir, PathBuf::from("/tmp/manga"));
        assert_eq!(config.converter.profile, "OTHER");
        assert_eq!(config.converter.page_width, Some(1264));
        // 未写的字段使用默认值
        assert_eq!(config.converter.program, "kcc-c2e");
        assert_eq!(config.delivery.command.as_deref(), Some("kindle-mail"));
        assert_eq!(
            config.delivery.mailboxes.get("42").map(String::as_str),
            Some("someone@kindle.com")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_ceiling() {
        let config = Config {
            max_volume_mb: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_oversized_ceiling() {
        let config = Config {
            max_volume_mb: u64::MAX / 1024,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "max_volume_mb"
        ));
        assert_eq!(config.max_volume_bytes(), u64::MAX);
    }

    #[test]
    fn test_validate_rejects_zero_delivery_timeout() {
        let mut config = Config::default();
        config.delivery.timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "delivery.timeout_secs"
        ));
    }

    #[test]
    fn test_validate_rejects_half_page_size() {
        let mut config = Config::default();
        config.converter.page_width = Some(1000);
        assert!(config.validate().is_err());
    }
}
