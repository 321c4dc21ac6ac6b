//! ファイルを繰り返し開いて閉じるだけのサンプルプログラム
//! このプログラムにkanshiをアタッチすると、open/closeのログが流れ続けます。
//!
//! 使い方: open_loop [path] [interval_ms]

use std::time::Duration;

/// 既定で開くファイル
const DEFAULT_PATH: &str = "/etc/hostname";

/// 既定の間隔（ミリ秒）
const DEFAULT_INTERVAL_MS: u64 = 500;

/// ファイルを開いて読み、閉じる
///
/// tokio::fsはブロッキングスレッドプール上でシステムコールを発行するため、
/// 複数スレッドの追跡も確認できます。
async fn touch(path: &str) -> std::io::Result<usize> {
    let contents = tokio::fs::read(path).await?;
    Ok(contents.len())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| DEFAULT_PATH.to_string());
    let interval = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_INTERVAL_MS);

    println!("=== Kanshi Open Loop Example ===");
    println!("pid: {}", std::process::id());
    println!("Opening {} every {} ms. Press Ctrl-C to stop.", path, interval);

    let mut ticker = tokio::time::interval(Duration::from_millis(interval));
    loop {
        ticker.tick().await;
        match touch(&path).await {
            Ok(len) => println!("read {} bytes from {}", len, path),
            Err(e) => println!("failed to read {}: {}", path, e),
        }
    }
}
