//! Demo CLI for the polis runtime.
//!
//! Reads lines from stdin and routes them to agents:
//!
//! ```text
//! help                 打印帮助
//! exit                 退出
//! target               显示当前目标智能体
//! use <agentId>        切换目标智能体
//! to <agentId> <text>  向指定智能体发送一条消息
//! <任意文本>            发送给当前目标
//! ```
//!
//! Exit codes: 0 on normal exit, 1 on fatal init error.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::EnvFilter;

use polis_core::AgentRuntime;
use polis_services::{ApiState, OrgTemplateStore, UiCommandBridge};
use polis_types::{Message, RuntimeConfig, ROOT_AGENT_ID, USER_SENDER_ID};

#[derive(Debug, Parser)]
#[command(name = "polis", about = "polis 多智能体运行时演示 CLI")]
struct Cli {
    /// Path to the runtime configuration file.
    #[arg(long, default_value = "polis.json")]
    config: PathBuf,

    /// Also serve the HTTP API on this address.
    #[arg(long)]
    serve: Option<SocketAddr>,
}

/// A parsed REPL input line.
#[derive(Debug, PartialEq)]
enum Command<'a> {
    Help,
    Exit,
    ShowTarget,
    UseTarget(&'a str),
    SendTo { to: &'a str, text: &'a str },
    Say(&'a str),
    Empty,
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    match line {
        "help" => return Command::Help,
        "exit" => return Command::Exit,
        "target" => return Command::ShowTarget,
        _ => {}
    }
    if let Some(rest) = line.strip_prefix("use ") {
        return Command::UseTarget(rest.trim());
    }
    if let Some(rest) = line.strip_prefix("to ") {
        let rest = rest.trim();
        if let Some((to, text)) = rest.split_once(char::is_whitespace) {
            return Command::SendTo {
                to,
                text: text.trim(),
            };
        }
        return Command::SendTo { to: rest, text: "" };
    }
    Command::Say(line)
}

const HELP: &str = "\
命令：
  help                 打印帮助
  exit                 退出
  target               显示当前目标智能体
  use <agentId>        切换目标智能体
  to <agentId> <text>  向指定智能体发送消息
  其他输入             直接发送给当前目标";

async fn run(cli: Cli) -> polis_types::Result<()> {
    let config = RuntimeConfig::load(&cli.config)?;
    let runtime = AgentRuntime::init(config, polis_tools::builtin_tool_groups()).await?;
    runtime.start();

    if let Some(addr) = cli.serve {
        let templates = Arc::new(OrgTemplateStore::open(&runtime.config().runtime_dir)?);
        let state = ApiState {
            runtime: runtime.clone(),
            ui: Arc::new(UiCommandBridge::new()),
            templates,
        };
        tokio::spawn(async move {
            if let Err(e) = polis_services::serve(state, addr).await {
                error!(error = %e, "api server exited");
            }
        });
    }

    // Print replies addressed to the user as they arrive.
    {
        let bus = runtime.bus().clone();
        let org = runtime.org().clone();
        tokio::spawn(async move {
            loop {
                while let Some(msg) = bus.pop(USER_SENDER_ID) {
                    let sender = org
                        .agent(&msg.from)
                        .map(|a| a.role_name)
                        .unwrap_or_else(|| msg.from.clone());
                    println!("\n[{sender}] {}", msg.payload.text());
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });
    }

    println!("polis 已启动。输入 help 查看命令。");
    let mut target = ROOT_AGENT_ID.to_string();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        match parse_command(&line) {
            Command::Empty => {}
            Command::Help => println!("{HELP}"),
            Command::Exit => break,
            Command::ShowTarget => println!("当前目标：{target}"),
            Command::UseTarget(agent_id) => {
                target = agent_id.to_string();
                println!("已切换目标：{target}");
            }
            Command::SendTo { to, text } => {
                if text.is_empty() {
                    println!("用法：to <agentId> <text>");
                    continue;
                }
                runtime.deliver(Message::new(USER_SENDER_ID, to, text));
            }
            Command::Say(text) => {
                runtime.deliver(Message::new(USER_SENDER_ID, target.clone(), text));
            }
        }
    }

    runtime.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("启动失败：{e}");
            ExitCode::FAILURE
        }
    }
}
