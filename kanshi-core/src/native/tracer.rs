//! トレーサスレッド
//!
//! ptraceの要求はアタッチしたスレッドからしか発行できないため、
//! 1セッションにつき1本の専用スレッドが対象プロセスを追跡します。
//! セッションやスクリプトとはコマンドチャネルで通信し、
//! スクリプトのメッセージはメインループに投入します。

use crate::hook::HookSet;
use crate::main_loop::{DetachReason, LoopEvent, LoopHandle};
use crate::{Error, Result};
use kanshi_target::{syscall, Memory, SyscallStop, TraceEvent, TracedProcess};
use nix::errno::Errno;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// イベントが無い時にコマンドを待つ時間
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// 1回の巡回で処理するトレースイベントの上限
const EVENT_BATCH: usize = 64;

/// コマンドの応答
pub(crate) type Reply = Sender<Result<()>>;

/// トレーサスレッドへのコマンド
pub(crate) enum TracerCommand {
    /// スクリプトのフックを登録する
    Load {
        id: u64,
        name: String,
        hooks: Arc<HookSet>,
        sink: Option<LoopHandle>,
        reply: Reply,
    },
    /// スクリプトのフックを解除する
    Unload { id: u64, reply: Reply },
    /// 切断イベントの通知先を設定する
    SetDetachSink(LoopHandle),
    /// デタッチしてスレッドを終了する
    Detach { reply: Reply },
}

/// ロード済みのスクリプト
struct LoadedScript {
    id: u64,
    name: String,
    hooks: Arc<HookSet>,
    sink: Option<LoopHandle>,
}

/// コマンド処理後の継続/終了
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// トレーサの状態
struct Tracer {
    pid: u32,
    process: TracedProcess,
    scripts: Vec<LoadedScript>,
    detach_sink: Option<LoopHandle>,
    /// 対象プロセスが終了済み、またはトレースに失敗した
    finished: bool,
}

/// アタッチ時のエラーを分類する
fn classify_attach_error(pid: u32, err: anyhow::Error) -> Error {
    match err.downcast_ref::<Errno>() {
        Some(Errno::EPERM) => Error::PermissionDenied { pid },
        Some(Errno::ESRCH) => Error::ProcessNotFound(pid),
        _ => Error::Target(err),
    }
}

/// トレーサスレッドの本体
///
/// アタッチの結果を `ready` に送り、成功した場合はデタッチ要求か
/// コマンドチャネルの切断までトレースを続けます。
pub(crate) fn run(pid: u32, commands: Receiver<TracerCommand>, ready: Sender<Result<()>>) {
    let process = match TracedProcess::attach(pid as i32) {
        Ok(process) => process,
        Err(e) => {
            let _ = ready.send(Err(classify_attach_error(pid, e)));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }
    info!(pid, "attached");

    let mut tracer = Tracer {
        pid,
        process,
        scripts: Vec::new(),
        detach_sink: None,
        finished: false,
    };
    tracer.serve(commands);
    debug!(pid, "tracer thread exiting");
}

impl Tracer {
    /// コマンドとトレースイベントを交互に処理する
    fn serve(&mut self, commands: Receiver<TracerCommand>) {
        loop {
            // 保留中のコマンドを先に処理する
            loop {
                match commands.try_recv() {
                    Ok(command) => {
                        if self.handle_command(command) == Flow::Exit {
                            return;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.shutdown();
                        return;
                    }
                }
            }

            let handled = if self.finished { 0 } else { self.pump_events() };
            if handled > 0 {
                continue;
            }

            let next = if self.finished {
                commands.recv().map_err(|_| RecvTimeoutError::Disconnected)
            } else {
                commands.recv_timeout(POLL_INTERVAL)
            };
            match next {
                Ok(command) => {
                    if self.handle_command(command) == Flow::Exit {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.shutdown();
                    return;
                }
            }
        }
    }

    fn handle_command(&mut self, command: TracerCommand) -> Flow {
        match command {
            TracerCommand::Load {
                id,
                name,
                hooks,
                sink,
                reply,
            } => {
                debug!(pid = self.pid, script = %name, hooks = hooks.len(), "loading script");
                self.scripts.push(LoadedScript {
                    id,
                    name,
                    hooks,
                    sink,
                });
                let _ = reply.send(Ok(()));
                Flow::Continue
            }
            TracerCommand::Unload { id, reply } => {
                self.scripts.retain(|script| script.id != id);
                let _ = reply.send(Ok(()));
                Flow::Continue
            }
            TracerCommand::SetDetachSink(sink) => {
                self.detach_sink = Some(sink);
                Flow::Continue
            }
            TracerCommand::Detach { reply } => {
                let result = self.process.detach().map_err(Error::from);
                self.scripts.clear();
                let _ = reply.send(result);
                Flow::Exit
            }
        }
    }

    /// 保留中のトレースイベントを処理し、処理した件数を返す
    fn pump_events(&mut self) -> usize {
        let mut handled = 0;

        while handled < EVENT_BATCH {
            let event = match self.process.poll_event() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(e) => {
                    warn!(pid = self.pid, error = %e, "tracing failed");
                    self.finish(DetachReason::TracerFailed(e.to_string()));
                    let _ = self.process.detach();
                    break;
                }
            };
            handled += 1;

            match event {
                TraceEvent::SyscallEntry(stop) => {
                    self.dispatch(&stop);
                    if let Err(e) = self.process.resume(stop.tid) {
                        warn!(tid = stop.tid, error = %e, "failed to resume thread");
                    }
                }
                TraceEvent::ThreadStarted(tid) => trace!(tid, "thread started"),
                TraceEvent::ThreadExited(tid) => trace!(tid, "thread exited"),
                TraceEvent::ProcessExited => {
                    info!(pid = self.pid, "target process terminated");
                    self.finish(DetachReason::ProcessTerminated);
                    break;
                }
            }
        }

        handled
    }

    /// システムコール入口で一致するフックを実行し、メッセージを投入する
    fn dispatch(&self, stop: &SyscallStop) {
        if self.scripts.is_empty() {
            return;
        }

        let memory = Memory::new(stop.tid);
        for script in &self.scripts {
            let Some(sink) = &script.sink else { continue };

            for hook in script.hooks.matching(stop.number) {
                let message = hook.fire(stop, &memory);
                match message.to_json() {
                    Ok(raw) => sink.post(LoopEvent::Message {
                        script: script.name.clone(),
                        raw,
                    }),
                    Err(e) => warn!(
                        syscall = syscall::name(stop.number).unwrap_or("unknown"),
                        error = %e,
                        "failed to encode message"
                    ),
                }
            }
        }
    }

    /// トレースの終了を記録し、切断を通知する
    fn finish(&mut self, reason: DetachReason) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.scripts.clear();
        if let Some(sink) = &self.detach_sink {
            sink.post(LoopEvent::Detached {
                pid: self.pid,
                reason,
            });
        }
    }

    /// セッションが破棄された場合の後始末
    fn shutdown(&mut self) {
        if let Err(e) = self.process.detach() {
            warn!(pid = self.pid, error = %e, "failed to detach");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_attach_error() {
        let eperm = anyhow::Error::new(Errno::EPERM).context("Failed to seize thread 1");
        assert!(matches!(
            classify_attach_error(1, eperm),
            Error::PermissionDenied { pid: 1 }
        ));

        let esrch = anyhow::Error::new(Errno::ESRCH);
        assert!(matches!(classify_attach_error(2, esrch), Error::ProcessNotFound(2)));

        let other = anyhow::anyhow!("something else");
        assert!(matches!(classify_attach_error(3, other), Error::Target(_)));
    }
}
