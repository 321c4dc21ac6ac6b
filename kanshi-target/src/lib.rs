//! Kanshi ターゲットプロセス制御
//!
//! このクレートは、監視対象のプロセスを制御するための低レベル機能を提供します。
//! ptraceによるスレッドグループ全体のアタッチ、システムコール停止時のレジスタ解析、
//! メモリ読み取り、システムコール番号表などを扱います。

pub mod process;
pub mod thread;
pub mod memory;
pub mod registers;
pub mod syscall;

pub use process::{TraceEvent, TracedProcess};
pub use thread::ThreadId;
pub use memory::Memory;
pub use registers::{Registers, SyscallStop};

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
