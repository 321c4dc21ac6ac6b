//! プロセス制御機能
//!
//! PTRACE_SEIZEで対象プロセスの全スレッドに非停止でアタッチし、
//! システムコール停止モードで実行を継続させます。
//! ptraceの要求はアタッチしたスレッドからしか発行できないため、
//! `TracedProcess` は生成したスレッド上でのみ使用してください。

use crate::registers::{Registers, SyscallStop};
use crate::thread::{self, ThreadId};
use crate::Result;
use nix::errno::Errno;
use nix::sys::ptrace::{self, Event, Options};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::collections::HashSet;
use tracing::{debug, trace, warn};

/// トレースイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// システムコール入口で停止（`resume` を呼ぶまで停止したまま）
    SyscallEntry(SyscallStop),
    /// 新しいスレッドの追跡を開始
    ThreadStarted(ThreadId),
    /// スレッド終了
    ThreadExited(ThreadId),
    /// 全スレッドが終了した
    ProcessExited,
}

/// 追跡中のプロセス（スレッドグループ）
pub struct TracedProcess {
    pid: Pid,
    /// 追跡中のスレッド
    threads: HashSet<Pid>,
    /// ptrace停止したまま呼び出し元に返したスレッド
    held: HashSet<Pid>,
    detached: bool,
}

impl TracedProcess {
    /// 既存のプロセスの全スレッドにアタッチする
    ///
    /// 各スレッドをSEIZEした後に割り込みを掛け、最初の停止で
    /// システムコール停止モードに切り替えて再開します。
    pub fn attach(pid: i32) -> Result<Self> {
        let mut process = Self {
            pid: Pid::from_raw(pid),
            threads: HashSet::new(),
            held: HashSet::new(),
            detached: false,
        };

        let options = Options::PTRACE_O_TRACESYSGOOD | Options::PTRACE_O_TRACECLONE;

        // アタッチ中に生成されたスレッドも拾うため、新規スレッドが無くなるまで繰り返す
        loop {
            let mut seized_any = false;
            for tid in thread::list_threads(pid)? {
                let tid = Pid::from_raw(tid);
                if process.threads.contains(&tid) {
                    continue;
                }
                match ptrace::seize(tid, options) {
                    Ok(()) => {}
                    // 列挙後に終了したスレッド
                    Err(Errno::ESRCH) if tid != process.pid => continue,
                    Err(e) => {
                        // 先頭スレッドで失敗した場合は何も追跡していないので、そのまま返す
                        if process.threads.is_empty() {
                            process.detached = true;
                        }
                        return Err(anyhow::Error::new(e)
                            .context(format!("Failed to seize thread {}", tid)));
                    }
                }
                if let Err(e) = ptrace::interrupt(tid) {
                    warn!(tid = tid.as_raw(), error = %e, "failed to interrupt seized thread");
                }
                process.threads.insert(tid);
                seized_any = true;
            }
            if !seized_any {
                break;
            }
        }

        debug!(pid, threads = process.threads.len(), "seized thread group");
        Ok(process)
    }

    /// 停止中のスレッドをシステムコール停止モードで再開する
    pub fn resume(&mut self, tid: ThreadId) -> Result<()> {
        let tid = Pid::from_raw(tid);
        self.held.remove(&tid);
        self.restart(tid, None)
    }

    /// 保留中のトレースイベントを1つ取り出す（非ブロッキング）
    ///
    /// 内部的に処理できる停止（システムコール出口、シグナル配送など）は
    /// その場で再開し、呼び出し元が関心を持つイベントのみを返します。
    /// 待機中のイベントが無ければ `None` を返します。
    ///
    /// 待機は追跡中のスレッドごとに行うため、同じプロセス内の他の子プロセスや
    /// 別の `TracedProcess` の停止を横取りしません。
    pub fn poll_event(&mut self) -> Result<Option<TraceEvent>> {
        let tids: Vec<Pid> = self.threads.iter().copied().collect();
        for tid in tids {
            let status = loop {
                match waitpid(tid, Some(WaitPidFlag::__WALL | WaitPidFlag::WNOHANG)) {
                    Ok(status) => break status,
                    Err(Errno::EINTR) => continue,
                    // 既に回収されたスレッド
                    Err(Errno::ECHILD) => break WaitStatus::Exited(tid, 0),
                    Err(e) => return Err(e.into()),
                }
            };

            if status == WaitStatus::StillAlive {
                continue;
            }
            if let Some(event) = self.handle_status(status)? {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// waitpidの結果を処理する
    fn handle_status(&mut self, status: WaitStatus) -> Result<Option<TraceEvent>> {
        trace!(?status, "wait status");

        match status {
            WaitStatus::PtraceSyscall(tid) => {
                let stop = match Registers::new(tid.as_raw()).syscall() {
                    Ok(stop) => stop,
                    Err(e) => {
                        // レジスタを読めない（スレッドが消えた等）場合は再開のみ
                        debug!(tid = tid.as_raw(), error = %e, "failed to read syscall registers");
                        self.restart(tid, None)?;
                        return Ok(None);
                    }
                };
                if stop.entry {
                    self.held.insert(tid);
                    Ok(Some(TraceEvent::SyscallEntry(stop)))
                } else {
                    self.restart(tid, None)?;
                    Ok(None)
                }
            }
            WaitStatus::PtraceEvent(tid, _, event) if event == Event::PTRACE_EVENT_CLONE as i32 => {
                let child = ptrace::getevent(tid)
                    .map(|raw| Pid::from_raw(raw as i32))
                    .ok();
                self.restart(tid, None)?;
                match child {
                    // 新スレッドは自動的にSEIZE状態になり、PTRACE_EVENT_STOPで停止する
                    Some(child) if self.threads.insert(child) => {
                        Ok(Some(TraceEvent::ThreadStarted(child.as_raw())))
                    }
                    _ => Ok(None),
                }
            }
            WaitStatus::PtraceEvent(tid, _, _) => {
                // 割り込み停止、新スレッドの初期停止、グループ停止など
                let is_new = self.threads.insert(tid);
                self.restart(tid, None)?;
                if is_new {
                    Ok(Some(TraceEvent::ThreadStarted(tid.as_raw())))
                } else {
                    Ok(None)
                }
            }
            WaitStatus::Stopped(tid, signal) => {
                // シグナル配送停止: シグナルを再注入して再開
                self.threads.insert(tid);
                self.restart(tid, Some(signal))?;
                Ok(None)
            }
            WaitStatus::Exited(tid, _) | WaitStatus::Signaled(tid, _, _) => {
                self.held.remove(&tid);
                if !self.threads.remove(&tid) {
                    return Ok(None);
                }
                if self.threads.is_empty() {
                    debug!(pid = self.pid.as_raw(), "all traced threads exited");
                    Ok(Some(TraceEvent::ProcessExited))
                } else {
                    Ok(Some(TraceEvent::ThreadExited(tid.as_raw())))
                }
            }
            _ => Ok(None),
        }
    }

    /// スレッドをシステムコール停止モードで再開する
    ///
    /// 再開前にスレッドが終了していた場合（ESRCH）は無視します。
    fn restart(&self, tid: Pid, signal: Option<Signal>) -> Result<()> {
        match ptrace::syscall(tid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to resume thread {}", tid))),
        }
    }

    /// 全スレッドからデタッチする
    ///
    /// 実行中のスレッドに割り込みを掛け、停止を確認したものから順にデタッチします。
    /// 二度目以降の呼び出しは何もしません。
    pub fn detach(&mut self) -> Result<()> {
        if self.detached {
            return Ok(());
        }
        self.detached = true;

        // 停止中のまま保持しているスレッドはそのままデタッチできる
        for tid in std::mem::take(&mut self.held) {
            let _ = ptrace::detach(tid, None);
            self.threads.remove(&tid);
        }

        for &tid in &self.threads {
            match ptrace::interrupt(tid) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!(tid = tid.as_raw(), error = %e, "failed to interrupt thread"),
            }
        }

        while let Some(tid) = self.next_to_drain() {
            let status = match waitpid(tid, Some(WaitPidFlag::__WALL)) {
                Ok(status) => status,
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    self.threads.remove(&tid);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match status {
                WaitStatus::PtraceEvent(tid, _, event) => {
                    if event == Event::PTRACE_EVENT_CLONE as i32 {
                        // 割り込み前に生成されたスレッドも停止してからデタッチする
                        if let Ok(raw) = ptrace::getevent(tid) {
                            self.threads.insert(Pid::from_raw(raw as i32));
                        }
                    }
                    let _ = ptrace::detach(tid, None);
                    self.threads.remove(&tid);
                }
                WaitStatus::PtraceSyscall(tid) => {
                    let _ = ptrace::detach(tid, None);
                    self.threads.remove(&tid);
                }
                WaitStatus::Stopped(tid, signal) => {
                    let _ = ptrace::detach(tid, Some(signal));
                    self.threads.remove(&tid);
                }
                WaitStatus::Exited(tid, _) | WaitStatus::Signaled(tid, _, _) => {
                    self.threads.remove(&tid);
                }
                _ => {}
            }
        }

        debug!(pid = self.pid.as_raw(), "detached from thread group");
        Ok(())
    }

    /// デタッチ時に次に停止を待つスレッド
    ///
    /// 先頭スレッドは他のスレッドが残っている間は終了を報告しないので最後に回す。
    fn next_to_drain(&self) -> Option<Pid> {
        self.threads
            .iter()
            .copied()
            .find(|&tid| tid != self.pid)
            .or_else(|| self.threads.get(&self.pid).copied())
    }
}

impl Drop for TracedProcess {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            warn!(pid = self.pid.as_raw(), error = %e, "failed to detach on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::{Duration, Instant};

    #[test]
    fn test_tracing_leaves_other_children_alone() {
        let mut traced = Command::new("sleep").arg("30").spawn().unwrap();
        let mut bystander = Command::new("true").spawn().unwrap();

        let mut process = TracedProcess::attach(traced.id() as i32).unwrap();

        // 無関係な子プロセスが終了する間もイベントを処理し続ける
        let deadline = Instant::now() + Duration::from_millis(500);
        while Instant::now() < deadline {
            while let Some(event) = process.poll_event().unwrap() {
                if let TraceEvent::SyscallEntry(stop) = event {
                    process.resume(stop.tid).unwrap();
                }
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        process.detach().unwrap();

        // 終了状態はトレーサに回収されず、親が受け取れる
        assert!(bystander.wait().unwrap().success());

        traced.kill().unwrap();
        traced.wait().unwrap();
    }
}
