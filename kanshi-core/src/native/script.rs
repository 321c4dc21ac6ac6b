//! スクリプト（フック一覧）のロードとアンロード

use super::session::request;
use super::tracer::TracerCommand;
use crate::backend::Script;
use crate::errors::{ERR_SCRIPT_DESTROYED, ERR_SCRIPT_LOADED, ERR_SCRIPT_NOT_LOADED};
use crate::hook::HookSet;
use crate::main_loop::LoopHandle;
use crate::{Error, Result};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::{debug, warn};

/// スクリプトの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptState {
    Created,
    Loaded,
    /// アンロード後は再利用できない
    Destroyed,
}

/// ネイティブのスクリプト
pub struct NativeScript {
    id: u64,
    name: String,
    hooks: Arc<HookSet>,
    commands: Sender<TracerCommand>,
    sink: Option<LoopHandle>,
    state: ScriptState,
}

impl NativeScript {
    pub(crate) fn new(id: u64, name: &str, hooks: Arc<HookSet>, commands: Sender<TracerCommand>) -> Self {
        Self {
            id,
            name: name.to_string(),
            hooks,
            commands,
            sink: None,
            state: ScriptState::Created,
        }
    }
}

impl Script for NativeScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_message(&mut self, sink: LoopHandle) {
        self.sink = Some(sink);
    }

    fn load(&mut self) -> Result<()> {
        match self.state {
            ScriptState::Created => {}
            ScriptState::Loaded => return Err(Error::InvalidOperation(ERR_SCRIPT_LOADED)),
            ScriptState::Destroyed => return Err(Error::InvalidOperation(ERR_SCRIPT_DESTROYED)),
        }

        request(&self.commands, |reply| TracerCommand::Load {
            id: self.id,
            name: self.name.clone(),
            hooks: Arc::clone(&self.hooks),
            sink: self.sink.clone(),
            reply,
        })?;
        self.state = ScriptState::Loaded;
        debug!(script = %self.name, "script loaded");
        Ok(())
    }

    fn unload(&mut self) -> Result<()> {
        if self.state != ScriptState::Loaded {
            return Err(Error::InvalidOperation(ERR_SCRIPT_NOT_LOADED));
        }
        self.state = ScriptState::Destroyed;

        match request(&self.commands, |reply| TracerCommand::Unload { id: self.id, reply }) {
            // トレーサが既に終了していればフックも残っていない
            Ok(()) | Err(Error::TracerGone) => {}
            Err(e) => return Err(e),
        }
        debug!(script = %self.name, "script unloaded");
        Ok(())
    }
}

impl Drop for NativeScript {
    fn drop(&mut self) {
        if self.state == ScriptState::Loaded {
            if let Err(e) = self.unload() {
                warn!(script = %self.name, error = %e, "failed to unload on drop");
            }
        }
    }
}
