//! メインループ
//!
//! バックエンドのスレッドやシグナルハンドラからのイベントはすべて
//! `LoopHandle` 経由でキューに積まれ、`MainLoop::run` を実行しているタスク上で処理されます。

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tracing::trace;

/// セッションが切断された理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachReason {
    /// 対象プロセスが終了した
    ProcessTerminated,
    /// トレーサがエラーで停止した
    TracerFailed(String),
}

impl std::fmt::Display for DetachReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetachReason::ProcessTerminated => write!(f, "process terminated"),
            DetachReason::TracerFailed(reason) => write!(f, "tracer failed: {}", reason),
        }
    }
}

/// ループに投入されるイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    /// スクリプトからのメッセージ（生のJSON）
    Message { script: String, raw: String },
    /// セッションの切断
    Detached { pid: u32, reason: DetachReason },
    /// ループの停止要求
    Quit,
}

/// ループへのハンドル（スレッド間で共有可能）
#[derive(Debug, Clone)]
pub struct LoopHandle {
    tx: UnboundedSender<LoopEvent>,
}

impl LoopHandle {
    /// イベントを投入する
    ///
    /// ループが既に破棄されている場合、イベントは捨てられます。
    pub fn post(&self, event: LoopEvent) {
        if self.tx.send(event).is_err() {
            trace!("main loop is gone, dropping event");
        }
    }

    /// ループの停止を予約する
    ///
    /// 停止そのものはループのスレッドで、キュー内の先行イベントを処理した後に行われます。
    pub fn quit(&self) {
        self.post(LoopEvent::Quit);
    }
}

/// メインループ
///
/// ループ自身は送信側を弱参照でしか持たないため、`run` の実行中に
/// すべての `LoopHandle` が破棄されるとキューが閉じてループが終了します。
pub struct MainLoop {
    rx: UnboundedReceiver<LoopEvent>,
    /// `run` 開始までハンドルを発行するための送信側
    tx: Option<UnboundedSender<LoopEvent>>,
    weak: WeakUnboundedSender<LoopEvent>,
    running: bool,
}

impl MainLoop {
    /// 新しいループを作成する（実行中状態で開始）
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            weak: tx.downgrade(),
            tx: Some(tx),
            running: true,
        }
    }

    /// ループへのハンドルを取得する
    ///
    /// キューが既に閉じている場合、返したハンドルへの投入は捨てられます。
    pub fn handle(&self) -> LoopHandle {
        let tx = self
            .tx
            .clone()
            .or_else(|| self.weak.upgrade())
            .unwrap_or_else(|| mpsc::unbounded_channel().0);
        LoopHandle { tx }
    }

    /// ループが停止要求を処理していないか
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// `Quit` を受け取るか、すべてのハンドルが破棄されるまでイベントを処理する
    ///
    /// `Quit` 以外のイベントは順にコールバックへ渡されます。
    /// コールバックがエラーを返した場合はその時点で終了します。
    /// 既に停止済みのループは即座に戻ります。
    pub async fn run<F, E>(&mut self, mut callback: F) -> Result<(), E>
    where
        F: FnMut(LoopEvent) -> Result<(), E>,
    {
        if !self.running {
            return Ok(());
        }
        self.tx = None;

        loop {
            match self.rx.recv().await {
                Some(LoopEvent::Quit) => {
                    trace!("main loop received quit");
                    break;
                }
                Some(event) => callback(event)?,
                None => {
                    trace!("all loop handles dropped");
                    break;
                }
            }
        }

        self.running = false;
        Ok(())
    }
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}
