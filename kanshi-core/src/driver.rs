//! ドライバ: オブジェクトモデルを順に呼び出し、メッセージをコンソールに中継する
//!
//! 取得順: メインループ → デバイスマネージャ → ローカルデバイス → セッション → スクリプト。
//! 解放はどの経路でもその逆順になります（明示的な解放と `Drop` の両方で保証）。

use crate::backend::{Device, DeviceManager, DeviceType, Script, Session};
use crate::main_loop::{LoopEvent, MainLoop};
use crate::message;
use anyhow::Context as _;
use std::io::Write;
use tracing::{debug, warn};

/// 組み込みのスクリプト: ファイルのオープンとクローズを記録する
pub const EXAMPLE_SCRIPT: &str = r#"# Log every file the target opens or closes.
on open log [*] open("{arg0:str}")
on creat log [*] open("{arg0:str}")
on openat log [*] open("{arg1:str}")
on openat2 log [*] open("{arg1:str}")
on close log [*] close({arg0})
"#;

/// 組み込みスクリプトの名前
pub const EXAMPLE_SCRIPT_NAME: &str = "example";

/// 計装の対象
#[derive(Debug, Clone)]
pub struct Target {
    /// 対象プロセスID
    pub pid: u32,
    /// スクリプト名
    pub script_name: String,
    /// スクリプトのソース
    pub source: String,
}

impl Target {
    /// 組み込みスクリプトで対象を作成する
    pub fn with_example_script(pid: u32) -> Self {
        Self {
            pid,
            script_name: EXAMPLE_SCRIPT_NAME.to_string(),
            source: EXAMPLE_SCRIPT.to_string(),
        }
    }
}

/// デバイスを列挙してローカルデバイスにアタッチし、ループが止まるまでメッセージを中継する
///
/// アタッチの失敗は `err` に報告して正常終了します。
/// ローカルデバイスが無い場合やスクリプトの作成・ロードに失敗した場合はエラーを返しますが、
/// その時点までに取得したハンドルは逆順に解放されます。
pub async fn run<M, W, E>(
    mut main_loop: MainLoop,
    mut manager: M,
    target: &Target,
    out: &mut W,
    err: &mut E,
) -> anyhow::Result<()>
where
    M: DeviceManager,
    W: Write,
    E: Write,
{
    let local_device = {
        let devices = manager
            .enumerate_devices()
            .context("Failed to enumerate devices")?;
        for device in devices.iter() {
            writeln!(out, "[*] Found device: \"{}\"", device.name())?;
        }
        devices.take_first(DeviceType::Local)
    };
    let local_device = local_device.ok_or_else(|| anyhow::anyhow!("No local device found"))?;
    debug!(device = local_device.id(), pid = target.pid, "attaching");

    match local_device.attach(target.pid) {
        Ok(mut session) => {
            writeln!(out, "[*] Attached")?;
            session.on_detached(main_loop.handle());

            let mut script = session
                .create_script(&target.script_name, &target.source)
                .context("Failed to create script")?;
            script.on_message(main_loop.handle());
            script.load().context("Failed to load script")?;
            writeln!(out, "[*] Script loaded")?;

            let handle = main_loop.handle();
            main_loop
                .run(|event| match event {
                    LoopEvent::Message { raw, .. } => writeln!(out, "{}", message::describe(&raw)),
                    LoopEvent::Detached { reason, .. } => {
                        handle.quit();
                        writeln!(out, "[*] Target detached: {}", reason)
                    }
                    LoopEvent::Quit => Ok(()),
                })
                .await?;
            writeln!(out, "[*] Stopped")?;

            if let Err(e) = script.unload() {
                warn!(error = %e, "failed to unload script");
            }
            drop(script);
            writeln!(out, "[*] Unloaded")?;

            if let Err(e) = session.detach() {
                warn!(error = %e, "failed to detach session");
            }
            drop(session);
            writeln!(out, "[*] Detached")?;
        }
        Err(e) => {
            writeln!(err, "Failed to attach: {}", e)?;
        }
    }

    drop(local_device);

    manager.close().context("Failed to close device manager")?;
    drop(manager);
    writeln!(out, "[*] Closed")?;

    drop(main_loop);
    Ok(())
}
