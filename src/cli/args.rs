use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "connect-tunnel")]
#[command(author, version, about = "Send HTTP/HTTPS requests through an HTTP CONNECT proxy", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 日志详细程度 (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 通过代理隧道发送一次请求
    Fetch {
        /// 目标 URL（http:// 或 https://）
        url: String,

        /// 请求方法
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// 请求头，格式为 "Name: Value"，可重复
        #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
        headers: Vec<String>,

        /// 请求体
        #[arg(short, long, conflicts_with = "json")]
        data: Option<String>,

        /// JSON 请求体（自动设置 content-type）
        #[arg(long)]
        json: Option<String>,

        /// 代理 URL，优先于环境变量和配置文件
        #[arg(long, value_name = "URL")]
        proxy: Option<String>,

        /// 配置文件路径
        #[arg(short, long)]
        config: Option<String>,

        /// 本次请求的超时（毫秒）
        #[arg(long, value_name = "MS")]
        timeout: Option<u64>,

        /// 输出响应状态行和响应头
        #[arg(short, long)]
        include: bool,

        /// 将响应体写入文件
        #[arg(short, long, value_name = "PATH")]
        output: Option<String>,
    },
    /// 显示最终生效的代理配置及其来源
    Resolve {
        /// 代理 URL，优先于环境变量和配置文件
        #[arg(long, value_name = "URL")]
        proxy: Option<String>,

        /// 配置文件路径
        #[arg(short, long)]
        config: Option<String>,
    },
    /// 检查配置文件格式是否正确
    Check {
        /// 配置文件路径
        #[arg(short, long)]
        config: String,

        /// 输出格式 (text, json)
        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
    /// 生成示例配置文件
    Template {
        /// 输出文件路径，缺省时输出到标准输出
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from([
            "connect-tunnel",
            "-vv",
            "fetch",
            "https://api.example.com/v1",
            "-X",
            "POST",
            "-H",
            "Accept: application/json",
            "-H",
            "X-Trace: 1",
            "--json",
            "{\"a\":1}",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Fetch {
                url,
                method,
                headers,
                json,
                data,
                ..
            } => {
                assert_eq!(url, "https://api.example.com/v1");
                assert_eq!(method, "POST");
                assert_eq!(headers.len(), 2);
                assert_eq!(json.as_deref(), Some("{\"a\":1}"));
                assert!(data.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_data_conflicts_with_json() {
        let result = Cli::try_parse_from([
            "connect-tunnel",
            "fetch",
            "http://example.com",
            "-d",
            "x",
            "--json",
            "{}",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_check_rejects_unknown_format() {
        let result =
            Cli::try_parse_from(["connect-tunnel", "check", "-c", "a.toml", "-f", "yaml"]);
        assert!(result.is_err());
    }
}
