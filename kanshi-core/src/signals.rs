//! 終了シグナルの処理
//!
//! SIGINT/SIGTERMを受け取ってもハンドラ内では何もせず、
//! メインループに停止要求を投入するだけにします。
//! tokioのシグナルドライバはOSのハンドラ内でパイプに書き込むだけなので、
//! 実際の停止はループのスレッドで行われます。

use crate::main_loop::LoopHandle;
use crate::Result;
use tokio::signal::unix::{signal, SignalKind};
use tracing::debug;

/// SIGINTとSIGTERMのハンドラを登録する
///
/// tokioランタイムのコンテキスト内で呼び出す必要があります。
/// 登録はこの関数が戻った時点で完了しています。
pub fn install_signal_handlers(handle: LoopHandle) -> Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                Some(()) = interrupt.recv() => "SIGINT",
                Some(()) = terminate.recv() => "SIGTERM",
                else => break,
            };
            debug!(signal = name, "scheduling main loop stop");
            handle.quit();
        }
    });

    Ok(())
}
