//! プロセスへのアタッチ（セッション）

use super::script::NativeScript;
use super::tracer::{self, TracerCommand};
use crate::backend::Session;
use crate::errors::ERR_SESSION_DETACHED;
use crate::hook::HookSet;
use crate::main_loop::LoopHandle;
use crate::{Error, Result};
use kanshi_target::{registers, thread};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// スクリプトIDの採番
static NEXT_SCRIPT_ID: AtomicU64 = AtomicU64::new(1);

/// ネイティブのセッション
///
/// 対象プロセスは専用のトレーサスレッドが追跡します。
pub struct NativeSession {
    pid: u32,
    commands: Sender<TracerCommand>,
    tracer: Option<JoinHandle<()>>,
    detached: bool,
}

impl NativeSession {
    /// プロセスにアタッチする
    ///
    /// トレーサスレッドを起動し、アタッチの成否を待ってから戻ります。
    pub fn attach(pid: u32) -> Result<Self> {
        if !registers::syscall_decoding_supported() {
            return Err(Error::Unsupported(format!(
                "syscall tracing is not available on {}",
                std::env::consts::ARCH
            )));
        }
        if !thread::process_exists(pid as i32) {
            return Err(Error::ProcessNotFound(pid));
        }

        let (commands, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let tracer = std::thread::Builder::new()
            .name(format!("kanshi-tracer-{}", pid))
            .spawn(move || tracer::run(pid, command_rx, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                pid,
                commands,
                tracer: Some(tracer),
                detached: false,
            }),
            Ok(Err(e)) => {
                let _ = tracer.join();
                Err(e)
            }
            Err(_) => {
                let _ = tracer.join();
                Err(Error::TracerGone)
            }
        }
    }
}

/// トレーサスレッドにコマンドを送り、応答を待つ
pub(crate) fn request(
    commands: &Sender<TracerCommand>,
    build: impl FnOnce(tracer::Reply) -> TracerCommand,
) -> Result<()> {
    let (reply, reply_rx) = mpsc::channel();
    commands.send(build(reply)).map_err(|_| Error::TracerGone)?;
    reply_rx.recv().map_err(|_| Error::TracerGone)?
}

impl Session for NativeSession {
    type Script = NativeScript;

    fn pid(&self) -> u32 {
        self.pid
    }

    fn on_detached(&mut self, sink: LoopHandle) {
        if self.commands.send(TracerCommand::SetDetachSink(sink)).is_err() {
            debug!(pid = self.pid, "tracer is gone, detach notifications unavailable");
        }
    }

    fn create_script(&mut self, name: &str, source: &str) -> Result<NativeScript> {
        if self.detached {
            return Err(Error::InvalidOperation(ERR_SESSION_DETACHED));
        }
        let hooks = HookSet::compile(source)?;
        let id = NEXT_SCRIPT_ID.fetch_add(1, Ordering::Relaxed);
        debug!(pid = self.pid, script = name, id, hooks = hooks.len(), "created script");
        Ok(NativeScript::new(id, name, Arc::new(hooks), self.commands.clone()))
    }

    fn detach(&mut self) -> Result<()> {
        if self.detached {
            return Ok(());
        }
        self.detached = true;

        let result = request(&self.commands, |reply| TracerCommand::Detach { reply });
        if let Some(tracer) = self.tracer.take() {
            let _ = tracer.join();
        }

        match result {
            // 対象プロセスが先に終了してトレーサが抜けている場合
            Err(Error::TracerGone) => Ok(()),
            other => other,
        }
    }
}

impl Drop for NativeSession {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            warn!(pid = self.pid, error = %e, "failed to detach on drop");
        }
    }
}
