//! 转换工具 - 基础设施层
//!
//! 持有外部转换进程（Kindle Comic Converter），只暴露"转换单个章节"的能力：
//! - 不认识队列 / 批次 / 卷
//! - 不删除源文件
//! - 超时由上层 `ConversionDriver` 控制，future 被丢弃时子进程随之被杀掉

use crate::config::ConverterConfig;
use crate::error::ConversionError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// 诊断输出保留的最大行数
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// 转换参数
#[derive(Debug, Clone)]
pub struct ConversionParams {
    /// 输出格式（KCC `-f`），卷合并要求为 CBZ
    pub format: String,
    /// 设备型号（KCC `-p`）
    pub profile: String,
    /// 自定义页面尺寸（宽, 高）
    pub page_size: Option<(u32, u32)>,
    pub gamma: f32,
    pub manga_mode: bool,
    pub upscale: bool,
    pub force_color: bool,
    pub extra_args: Vec<String>,
}

impl ConversionParams {
    pub fn from_config(config: &ConverterConfig) -> Self {
        Self {
            format: "CBZ".to_string(),
            profile: config.profile.clone(),
            page_size: config.page_width.zip(config.page_height),
            gamma: config.gamma,
            manga_mode: config.manga_mode,
            upscale: config.upscale,
            force_color: config.force_color,
            extra_args: config.extra_args.clone(),
        }
    }

    /// 输出文件扩展名
    pub fn extension(&self) -> String {
        self.format.to_ascii_lowercase()
    }
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self::from_config(&ConverterConfig::default())
    }
}

/// 转换能力
#[async_trait]
pub trait Converter: Send + Sync {
    /// 转换单个章节文件，输出写入 `output_dir`，返回生成的文档路径
    async fn convert(
        &self,
        input: &Path,
        output_dir: &Path,
        params: &ConversionParams,
    ) -> Result<PathBuf, ConversionError>;
}

/// 调用 `kcc-c2e` 命令行进行转换
#[derive(Debug, Clone)]
pub struct KccConverter {
    program: String,
}

impl KccConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// 输出文件路径：`<output_dir>/<输入文件名去扩展名>.<格式>`
    pub fn output_path(input: &Path, output_dir: &Path, params: &ConversionParams) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "chapter".to_string());
        output_dir.join(format!("{}.{}", stem, params.extension()))
    }

    /// 构建命令行参数
    pub fn build_args(input: &Path, output: &Path, params: &ConversionParams) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-p".into(), params.profile.clone().into()];

        if params.manga_mode {
            args.push("-m".into());
        }
        if params.upscale {
            args.push("-u".into());
        }
        args.push("-g".into());
        args.push(format!("{:.2}", params.gamma).into());
        if params.force_color {
            args.push("--forcecolor".into());
        }
        args.push("-f".into());
        args.push(params.format.clone().into());
        args.push("-o".into());
        args.push(output.as_os_str().to_os_string());

        if let Some((width, height)) = params.page_size {
            args.push("--customwidth".into());
            args.push(width.to_string().into());
            args.push("--customheight".into());
            args.push(height.to_string().into());
        }

        args.extend(params.extra_args.iter().map(OsString::from));
        args.push(input.as_os_str().to_os_string());
        args
    }
}

#[async_trait]
impl Converter for KccConverter {
    async fn convert(
        &self,
        input: &Path,
        output_dir: &Path,
        params: &ConversionParams,
    ) -> Result<PathBuf, ConversionError> {
        tokio::fs::create_dir_all(output_dir).await?;

        let output = Self::output_path(input, output_dir, params);
        let args = Self::build_args(input, &output, params);

        info!(
            "⚙️ 运行转换: {} {}",
            self.program,
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ConversionError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(ConversionError::ToolFailed {
                code: result.status.code(),
                diagnostics: diagnostics_tail(&result.stderr, &result.stdout),
            });
        }

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(ConversionError::MissingOutput { expected: output });
        }

        debug!("转换完成: {}", output.display());
        Ok(output)
    }
}

/// 截取 stderr（为空时用 stdout）的最后若干行
pub fn diagnostics_tail(stderr: &[u8], stdout: &[u8]) -> String {
    let text = if stderr.iter().any(|b| !b.is_ascii_whitespace()) {
        String::from_utf8_lossy(stderr)
    } else {
        String::from_utf8_lossy(stdout)
    };

    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_as_strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().to_string()).collect()
    }

    #[test]
    fn test_build_args_default_profile() {
        let params = ConversionParams::default();
        let args = KccConverter::build_args(
            Path::new("in/Title 12.cbz"),
            Path::new("out/Title 12.cbz"),
            &params,
        );
        assert_eq!(
            args_as_strings(&args),
            vec![
                "-p", "KPW5", "-m", "-u", "-g", "0.90", "--forcecolor", "-f", "CBZ", "-o",
                "out/Title 12.cbz", "in/Title 12.cbz",
            ]
        );
    }

    #[test]
    fn test_build_args_custom_page_size() {
        let params = ConversionParams {
            profile: "OTHER".to_string(),
            page_size: Some((1264, 1680)),
            manga_mode: false,
            upscale: false,
            force_color: false,
            extra_args: vec!["--stretch".to_string()],
            ..Default::default()
        };
        let args = args_as_strings(&KccConverter::build_args(
            Path::new("a.cbz"),
            Path::new("b.cbz"),
            &params,
        ));
        assert_eq!(
            args,
            vec![
                "-p", "OTHER", "-g", "0.90", "-f", "CBZ", "-o", "b.cbz", "--customwidth",
                "1264", "--customheight", "1680", "--stretch", "a.cbz",
            ]
        );
    }

    #[test]
    fn test_output_path_uses_input_stem() {
        let params = ConversionParams::default();
        let out = KccConverter::output_path(Path::new("x/Dandadan 001.cbz"), Path::new("o"), &params);
        assert_eq!(out, PathBuf::from("o/Dandadan 001.cbz"));
    }

    #[test]
    fn test_diagnostics_tail_prefers_stderr() {
        let stderr = (1..=30).map(|i| format!("err {}\n", i)).collect::<String>();
        let tail = diagnostics_tail(stderr.as_bytes(), b"ignored");
        assert!(tail.starts_with("err 11"));
        assert!(tail.ends_with("err 30"));

        assert_eq!(diagnostics_tail(b"  \n", b"only stdout\n"), "only stdout");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let converter = KccConverter::new("definitely-not-a-real-kcc-binary");
        let err = converter
            .convert(&dir.path().join("a.cbz"), dir.path(), &ConversionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::Spawn { .. }));
    }
}
