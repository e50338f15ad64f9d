//! 五子棋客户端命令行
//!
//! ```bash
//! # 发起一次调用
//! gomoku-client call evaluate '{"board": {}, "moves": []}'
//!
//! # 打印推送直到 Ctrl-C
//! gomoku-client --transport tcp --server 127.0.0.1:9000 listen board
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gomoku_client::{ClientSettings, LogLevel, RpcClient};
use protocol::{Connector, TcpConnector, TransportType, WsConnector};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "gomoku-client")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// 服务器地址（默认取设置文件）
    #[arg(long, global = true)]
    server: Option<String>,

    /// 传输协议
    #[arg(long, value_enum, global = true)]
    transport: Option<TransportArg>,

    /// 日志级别
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 发起一次调用并打印回复
    Call {
        subject: String,
        /// JSON 负载，缺省为 null
        payload: Option<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// 打印指定主题的推送，直到 Ctrl-C
    Listen {
        #[arg(required = true)]
        subjects: Vec<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TransportArg {
    Ws,
    Tcp,
}

impl From<TransportArg> for TransportType {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Ws => TransportType::WebSocket,
            TransportArg::Tcp => TransportType::Tcp,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = ClientSettings::load();
    if let Some(server) = &cli.server {
        settings.server_address = server.clone();
    }
    if let Some(transport) = cli.transport {
        settings.transport = transport.into();
    }
    if let Some(level) = cli.log_level {
        settings.log_level = level.into();
    }

    // 初始化日志
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in settings.log_level.directives() {
        filter = filter.add_directive(directive.parse()?);
    }
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    info!(server = %settings.server_address, transport = ?settings.transport, "gomoku-client 启动");

    match settings.transport {
        TransportType::WebSocket => {
            let connector = match &settings.subprotocol {
                Some(protocol) => WsConnector::new().with_subprotocol(protocol.clone()),
                None => WsConnector::new(),
            };
            run(RpcClient::new(connector, settings.rpc_config()), cli.command).await
        }
        TransportType::Tcp => {
            run(RpcClient::new(TcpConnector, settings.rpc_config()), cli.command).await
        }
    }
}

async fn run<C: Connector>(client: RpcClient<C>, command: Command) -> Result<()> {
    match command {
        Command::Call {
            subject,
            payload,
            timeout_ms,
        } => {
            let payload: Value = match payload {
                Some(text) => serde_json::from_str(&text).context("payload is not valid JSON")?,
                None => Value::Null,
            };
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(client.config().call_timeout);

            let reply = client
                .call_with_timeout(&subject, payload, timeout)
                .await
                .with_context(|| format!("call '{}' failed", subject))?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
            client.disconnect();
        }
        Command::Listen { subjects } => {
            for subject in &subjects {
                let subject_name = subject.clone();
                client.subscribe(subject, move |data| {
                    println!("[{}] {}", subject_name, data);
                })?;
            }
            client.connect().await.context("failed to connect")?;
            info!(?subjects, "Listening, press Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            client.disconnect();
        }
    }
    Ok(())
}
