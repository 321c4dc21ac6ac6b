//! エラー型とエラーメッセージ定数

use thiserror::Error;

/// デバイスマネージャがクローズ済みの場合のエラーメッセージ
pub const ERR_MANAGER_CLOSED: &str = "Device manager is closed";

/// セッションがデタッチ済みの場合のエラーメッセージ
pub const ERR_SESSION_DETACHED: &str = "Session is detached";

/// スクリプトがロード済みの場合のエラーメッセージ
pub const ERR_SCRIPT_LOADED: &str = "Script is already loaded";

/// スクリプトがロードされていない場合のエラーメッセージ
pub const ERR_SCRIPT_NOT_LOADED: &str = "Script is not loaded";

/// スクリプトが破棄済みの場合のエラーメッセージ
pub const ERR_SCRIPT_DESTROYED: &str = "Script is destroyed";

/// コア機能のエラー
#[derive(Debug, Error)]
pub enum Error {
    /// 対象プロセスが存在しない
    #[error("Unable to find process with pid {0}")]
    ProcessNotFound(u32),

    /// ptraceの権限が無い
    #[error(
        "Unable to access process with pid {pid} due to system restrictions; \
         try `sudo sysctl kernel.yama.ptrace_scope=0`, or run as root"
    )]
    PermissionDenied { pid: u32 },

    /// この環境では使用できない
    #[error("Not supported: {0}")]
    Unsupported(String),

    /// スクリプトのコンパイルエラー
    #[error("Script error (line {line}): {reason}")]
    InvalidScript { line: usize, reason: String },

    /// 状態に合わない操作
    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// トレーサスレッドが既に終了している
    #[error("Tracer thread is no longer running")]
    TracerGone,

    /// ターゲット制御のエラー
    #[error(transparent)]
    Target(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),
}

/// コア機能の結果型
pub type Result<T> = std::result::Result<T, Error>;
