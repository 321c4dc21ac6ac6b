//! レジスタアクセス機能

use crate::{Result, ThreadId};
use nix::unistd::Pid;

/// システムコール停止時のレジスタ情報
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallStop {
    /// 停止したスレッド
    pub tid: ThreadId,
    /// システムコール番号
    pub number: u64,
    /// 引数（呼び出し規約の順）
    pub args: [u64; 6],
    /// 入口での停止か（falseなら出口）
    pub entry: bool,
}

/// レジスタ情報
pub struct Registers {
    pid: Pid,
}

impl Registers {
    /// レジスタアクセスを作成する
    pub fn new(tid: ThreadId) -> Self {
        Self {
            pid: Pid::from_raw(tid),
        }
    }

    /// レジスタを読み取る
    #[cfg(target_arch = "x86_64")]
    pub fn read(&self) -> Result<nix::libc::user_regs_struct> {
        let regs = nix::sys::ptrace::getregs(self.pid)?;
        Ok(regs)
    }

    /// システムコール停止中のスレッドからシステムコール情報を取得する
    ///
    /// x86_64では入口停止時にraxが -ENOSYS に設定されるため、それで入口/出口を判別します。
    #[cfg(target_arch = "x86_64")]
    pub fn syscall(&self) -> Result<SyscallStop> {
        let regs = self.read()?;
        Ok(SyscallStop {
            tid: self.pid.as_raw(),
            number: regs.orig_rax,
            args: [regs.rdi, regs.rsi, regs.rdx, regs.r10, regs.r8, regs.r9],
            entry: regs.rax as i64 == -(nix::libc::ENOSYS as i64),
        })
    }

    #[cfg(not(target_arch = "x86_64"))]
    pub fn syscall(&self) -> Result<SyscallStop> {
        Err(anyhow::anyhow!(
            "Syscall decoding is not supported on this architecture (thread {})",
            self.pid
        ))
    }
}

/// システムコール引数の解析がこのアーキテクチャでサポートされているか
pub fn syscall_decoding_supported() -> bool {
    cfg!(target_arch = "x86_64")
}
