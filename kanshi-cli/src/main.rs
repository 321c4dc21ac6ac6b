//! Kanshi CLI - コマンドラインインターフェース
//!
//! 指定したプロセスにアタッチしてフックスクリプトを注入し、
//! スクリプトからのメッセージをCtrl-C（SIGINT/SIGTERM）まで表示し続けます。

use anyhow::{Context as _, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use kanshi_core::{driver, install_signal_handlers, MainLoop, NativeDeviceManager, Target};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Kanshi - syscall hook injector
#[derive(Parser, Debug)]
#[command(name = "kanshi")]
#[command(version = "0.1.0")]
#[command(about = "Attach to a process and relay messages from an injected hook script", long_about = None)]
struct Cli {
    /// Process ID to attach to
    #[arg(value_parser = parse_pid)]
    pid: u32,

    /// Load hooks from a script file instead of the built-in open/close example
    #[arg(short, long, value_name = "FILE")]
    script: Option<PathBuf>,
}

/// プロセスIDをパースする（0や数値でない値は拒否）
fn parse_pid(s: &str) -> std::result::Result<u32, String> {
    match s.trim().parse::<u32>() {
        Ok(0) | Err(_) => Err(format!("'{}' is not a valid process id", s)),
        Ok(pid) => Ok(pid),
    }
}

/// 引数を解析する
///
/// 失敗時は終了コードを返します。ヘルプとバージョン表示は0、それ以外の使い方の誤りは1です。
fn parse_args<I, T>(args: I) -> std::result::Result<Cli, u8>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|e| {
        let _ = e.print();
        match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
            _ => {
                // 値の検証エラーには使い方が含まれないので補う
                if !e.to_string().contains("Usage:") {
                    eprintln!("\n{}", Cli::command().render_usage());
                }
                1
            }
        }
    })
}

/// ログ出力を初期化する（RUST_LOG、既定は warn。標準エラーに出力）
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// 計装対象を組み立てる
fn build_target(cli: &Cli) -> Result<Target> {
    let mut target = Target::with_example_script(cli.pid);
    if let Some(path) = &cli.script {
        target.source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            target.script_name = stem.to_string();
        }
    }
    Ok(target)
}

async fn run(cli: Cli) -> Result<()> {
    let target = build_target(&cli)?;
    debug!(pid = target.pid, script = %target.script_name, "starting");

    let main_loop = MainLoop::new();
    install_signal_handlers(main_loop.handle()).context("Failed to install signal handlers")?;

    let manager = NativeDeviceManager::new();

    // ロックは保持しない（トレーサスレッドのログ出力と標準エラーを共有するため）
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    driver::run(main_loop, manager, &target, &mut stdout, &mut stderr).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(code) => return ExitCode::from(code),
    };

    init_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}
