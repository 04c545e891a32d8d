//! telemetry-relay - 地面站日志中继
//!
//! 子命令：
//! - `relay`：机载端，tail 日志文件并发送
//! - `listen`：地面端，按 tag 分流到日志文件
//! - `view`：tmux 面板查看分流后的日志
//! - `shell`：通过 SERIAL_CONTROL 发送命令
//! - `ping`：每秒发送一条测试消息

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use telemetry_relay::{
    CommandShell, InboundRouter, LinkConfig, ListenerConfig, LogViewer, MavLink, OutboundRelay, RelayConfig,
    ShellConfig, Shutdown, SourceOutcome, TagLogs, ViewerConfig, UNKNOWN_TAG,
};

#[derive(Parser)]
#[command(name = "telemetry-relay", version, about = "Tag-multiplexed log relay over MAVLink")]
struct Cli {
    /// 输出 debug 日志
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tail configured log files and send new lines as STATUSTEXT
    Relay {
        /// JSON config file (default: $TELEMETRY_RELAY_CONFIG or <config_dir>/telemetry-relay/relay.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the outbound connection string
        #[arg(long)]
        target: Option<String>,
    },
    /// Receive STATUSTEXT and split it into per-tag log files
    Listen {
        #[arg(long, default_value = "udpin:0.0.0.0:14550")]
        bind: String,
        /// Log directory (default: $MAVLINK_LOG_DIR or /tmp/mavlink_logs)
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Tile the per-tag logs in a tmux session
    View {
        #[arg(long)]
        log_dir: Option<PathBuf>,
        #[arg(long, default_value = "mavwatch")]
        session: String,
    },
    /// Interactive NSH shell over SERIAL_CONTROL
    Shell {
        #[arg(short, long, default_value = "udpin:0.0.0.0:14445")]
        port: String,
        /// SERIAL_CONTROL device number
        #[arg(short, long, default_value_t = 10)]
        devnum: u8,
        /// Reply collection window in milliseconds
        #[arg(long, default_value_t = 1000)]
        window_ms: u64,
    },
    /// Send a test status text every second
    Ping {
        #[arg(long, default_value = "udpout:172.31.100.102:14541")]
        target: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let directive = if cli.debug { "telemetry_relay=debug" } else { "telemetry_relay=info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    tracing::info!("🚀 telemetry-relay v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    match cli.command {
        Commands::Relay { config, target } => run_relay(config, target, shutdown).await?,
        Commands::Listen { bind, log_dir } => run_listener(bind, log_dir, shutdown).await?,
        Commands::View { log_dir, session } => run_viewer(log_dir, session, shutdown).await?,
        Commands::Shell { port, devnum, window_ms } => run_shell(port, devnum, window_ms, shutdown).await?,
        Commands::Ping { target } => run_ping(target, shutdown).await?,
    }

    tracing::info!("👋 telemetry-relay exiting");
    Ok(())
}

async fn run_relay(config_path: Option<PathBuf>, target: Option<String>, shutdown: Shutdown) -> Result<()> {
    let mut config = RelayConfig::load(config_path.as_deref())?;
    if let Some(target) = target {
        config.target = target;
    }

    let link = MavLink::connect(&LinkConfig::onboard(&config.target, config.system_id, config.component_id))
        .await
        .with_context(|| format!("连接 {} 失败", config.target))?;

    let relay = OutboundRelay::from_config(link.sender(), &config).with_shutdown(shutdown);
    let reports = relay.run_config(&config).await;

    for report in &reports {
        match report.outcome {
            SourceOutcome::NotFound => tracing::warn!("[{}] not watched (file not found)", report.tag),
            SourceOutcome::Stopped => tracing::info!(
                "[{}] {} lines sent, {} failed",
                report.tag,
                report.lines_sent,
                report.send_failures
            ),
        }
    }
    Ok(())
}

async fn run_listener(bind: String, log_dir: Option<PathBuf>, shutdown: Shutdown) -> Result<()> {
    let mut config = ListenerConfig {
        bind,
        ..Default::default()
    };
    if let Some(dir) = log_dir {
        config.log_dir = dir;
    }

    let logs = TagLogs::open(&config.log_dir)
        .with_context(|| format!("创建日志目录 {:?} 失败", config.log_dir))?;
    let link = MavLink::connect(&LinkConfig::ground(&config.bind))
        .await
        .with_context(|| format!("监听 {} 失败", config.bind))?;
    tracing::info!("[MAVLINK] Listening on {}", config.bind);

    // 实时显示
    let (display_tx, mut display_rx) = mpsc::channel::<telemetry_relay::RoutedLine>(256);
    let printer = tokio::spawn(async move {
        while let Some(line) = display_rx.recv().await {
            println!("{}", line.timestamped());
        }
    });

    let stats = InboundRouter::new(link.receiver(), logs)
        .with_display(display_tx)
        .with_shutdown(shutdown)
        .run()
        .await;
    let _ = printer.await;

    tracing::info!("{} lines routed", stats.routed);
    Ok(())
}

async fn run_viewer(log_dir: Option<PathBuf>, session: String, shutdown: Shutdown) -> Result<()> {
    let mut config = ViewerConfig {
        session_name: session,
        ..Default::default()
    };
    if let Some(dir) = log_dir {
        config.log_dir = dir;
    }

    LogViewer::new(config).launch(&shutdown).await?;
    Ok(())
}

async fn run_shell(port: String, devnum: u8, window_ms: u64, shutdown: Shutdown) -> Result<()> {
    let config = ShellConfig {
        port,
        devnum,
        reply_window: Duration::from_millis(window_ms),
        ..Default::default()
    };

    let link = MavLink::connect(&LinkConfig::ground(&config.port))
        .await
        .with_context(|| format!("连接 {} 失败", config.port))?;
    let mut receiver = link.receiver();
    tokio::select! {
        heartbeat = receiver.wait_heartbeat(config.heartbeat_timeout) => { heartbeat?; }
        _ = shutdown.wait() => {
            println!("\n[+] Exiting shell.");
            return Ok(());
        }
    }
    tracing::debug!("[MAVShell] Heartbeat OK");

    let logs = TagLogs::open(&config.log_dir)?;
    let mut shell = CommandShell::new(link.sender(), receiver, logs, config.devnum)
        .with_reply_window(config.reply_window)
        .with_shutdown(shutdown.clone());

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all(b"mavsh> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.wait() => None,
        };
        let Some(line) = line else {
            println!("\n[+] Exiting shell.");
            break;
        };

        let command = line.trim();
        if command == "exit" || command == "quit" {
            break;
        }

        let replies = match shell.execute(command).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("[MAVShell] {}", e);
                continue;
            }
        };
        for reply in &replies {
            println!("{}", reply);
        }
        if shutdown.is_triggered() {
            println!("\n[+] Exiting shell.");
            break;
        }
        if replies.is_empty() {
            println!("(no response)");
        }
    }
    Ok(())
}

async fn run_ping(target: String, shutdown: Shutdown) -> Result<()> {
    let config = RelayConfig {
        target,
        ..Default::default()
    };
    let link = MavLink::connect(&LinkConfig::onboard(&config.target, config.system_id, config.component_id))
        .await
        .with_context(|| format!("连接 {} 失败", config.target))?;
    let relay = OutboundRelay::from_config(link.sender(), &config);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait() => break,
        }
        match relay.send_line(UNKNOWN_TAG, "mavlink sending!").await {
            Ok(()) => tracing::info!("📤 ping sent"),
            Err(e) => tracing::warn!("⚠️ {}", e),
        }
    }
    Ok(())
}
