//! ネイティブバックエンドを実際の子プロセスに対して動かすテスト
//!
//! 親プロセスは自分の子をptraceできるので、特別な権限は不要です。

use kanshi_core::message;
use kanshi_core::{
    DetachReason, Device, DeviceManager, DeviceType, LoopEvent, MainLoop, NativeDeviceManager,
    Script, Session, EXAMPLE_SCRIPT,
};
use std::process::{Child, Command};
use std::time::Duration;

/// ファイルを開閉し続けるシェルを起動する
///
/// 組み込みコマンドのリダイレクトはシェル自身が open/close する。
fn spawn_target() -> Child {
    Command::new("sh")
        .args(["-c", "while true; do : </dev/null; cat /etc/hostname >/dev/null 2>&1; sleep 0.05; done"])
        .spawn()
        .expect("Failed to spawn target")
}

/// `/proc/<pid>/stat` のプロセス状態
fn process_state(pid: u32) -> char {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap();
    // コマンド名に空白や括弧が含まれても良いよう、最後の ')' の後ろを見る
    let after_comm = &stat[stat.rfind(')').unwrap() + 1..];
    after_comm.trim_start().chars().next().unwrap()
}

#[tokio::test]
async fn test_example_script_reports_opens_and_closes() {
    let mut child = spawn_target();
    let pid = child.id();

    let mut manager = NativeDeviceManager::new();
    let device = manager
        .enumerate_devices()
        .unwrap()
        .take_first(DeviceType::Local)
        .unwrap();

    let mut main_loop = MainLoop::new();
    let mut session = device.attach(pid).unwrap();
    session.on_detached(main_loop.handle());
    let mut script = session.create_script("example", EXAMPLE_SCRIPT).unwrap();
    script.on_message(main_loop.handle());
    script.load().unwrap();

    let stopper = main_loop.handle();
    let timer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(1));
        stopper.quit();
    });

    let mut lines = Vec::new();
    let mut detached = None;
    tokio::time::timeout(
        Duration::from_secs(10),
        main_loop.run(|event| {
            match event {
                LoopEvent::Message { script, raw } => {
                    assert_eq!(script, "example");
                    lines.push(message::describe(&raw));
                }
                LoopEvent::Detached { reason, .. } => detached = Some(reason),
                LoopEvent::Quit => {}
            }
            Ok::<(), ()>(())
        }),
    )
    .await
    .expect("main loop did not stop")
    .unwrap();
    timer.join().unwrap();

    script.unload().unwrap();
    drop(script);
    session.detach().unwrap();
    drop(session);
    drop(device);
    manager.close().unwrap();

    assert_eq!(detached, None);
    assert!(lines.iter().any(|l| l.starts_with("[*] open(")), "lines: {:?}", lines);
    assert!(lines.iter().any(|l| l.starts_with("[*] close(")), "lines: {:?}", lines);

    // デタッチ後の対象はトレース停止・シグナル停止のままになっていない
    let state = process_state(pid);
    assert!(state != 't' && state != 'T', "state after detach: {}", state);

    child.kill().unwrap();
    child.wait().unwrap();
}

#[tokio::test]
async fn test_killed_target_reports_process_terminated() {
    let mut child = spawn_target();
    let pid = child.id();

    let mut manager = NativeDeviceManager::new();
    let device = manager
        .enumerate_devices()
        .unwrap()
        .take_first(DeviceType::Local)
        .unwrap();

    let mut main_loop = MainLoop::new();
    let mut session = device.attach(pid).unwrap();
    session.on_detached(main_loop.handle());
    let mut script = session.create_script("example", EXAMPLE_SCRIPT).unwrap();
    script.on_message(main_loop.handle());
    script.load().unwrap();

    child.kill().unwrap();

    let handle = main_loop.handle();
    let mut detached = None;
    tokio::time::timeout(
        Duration::from_secs(10),
        main_loop.run(|event| {
            if let LoopEvent::Detached { pid, reason } = event {
                detached = Some((pid, reason));
                handle.quit();
            }
            Ok::<(), ()>(())
        }),
    )
    .await
    .expect("target termination was not reported")
    .unwrap();

    assert_eq!(detached, Some((pid, DetachReason::ProcessTerminated)));

    // トレーサが抜けた後の後始末はどれもエラーにならない
    script.unload().unwrap();
    drop(script);
    session.detach().unwrap();
    drop(session);
    drop(device);
    manager.close().unwrap();

    // 終了状態はトレーサが回収済みの場合がある
    let _ = child.wait();
}
