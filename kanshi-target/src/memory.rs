//! メモリアクセス機能

use crate::Result;
use nix::unistd::Pid;
use std::fs::File;
use std::io::{Read as _, Seek, SeekFrom};

/// ページサイズ（文字列読み取りの分割単位）
const PAGE_SIZE: usize = 4096;

/// 文字列読み取りの既定の上限バイト数
pub const MAX_STRING_LEN: usize = 4096;

/// メモリアクセス
pub struct Memory {
    pid: Pid,
}

impl Memory {
    /// メモリアクセスを作成する
    ///
    /// `pid` にはスレッドIDも指定できます（/proc/tid/mem も有効なため）。
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// /proc/pid/mem のパスを取得する
    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// メモリからデータを読み取る
    ///
    /// /proc/pid/memを使用してターゲットプロセスのメモリを読み取ります。
    /// /proc/pid/memが使用できない場合（EIOエラー）、PTRACE_PEEKDATAにフォールバックします。
    pub fn read(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        match self.read_via_proc_mem(addr, size) {
            Ok(data) => Ok(data),
            Err(e) => {
                if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
                    if io_err.raw_os_error() == Some(nix::libc::EIO) {
                        return self.read_via_ptrace(addr, size);
                    }
                }
                Err(e)
            }
        }
    }

    /// /proc/pid/mem経由でメモリを読み取る（内部実装）
    fn read_via_proc_mem(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        let mem_path = self.mem_path();
        let mut file = File::open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", mem_path, e))?;

        file.seek(SeekFrom::Start(addr as u64))?;

        let mut buffer = vec![0u8; size];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// PTRACE_PEEKDATAを使用してメモリからデータを読み取る
    ///
    /// /proc/pid/memが使用できない場合のフォールバック。
    /// 対象スレッドがptrace停止中である必要があります。
    pub fn read_via_ptrace(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        use nix::sys::ptrace;

        let mut data = Vec::with_capacity(size);
        let word_size = std::mem::size_of::<usize>();

        for offset in (0..size).step_by(word_size) {
            let word_addr = (addr + offset) as *mut std::ffi::c_void;
            let word = ptrace::read(self.pid, word_addr)
                .map_err(|e| anyhow::anyhow!("Failed to read via ptrace at 0x{:x}: {}", addr + offset, e))?;

            let bytes = word.to_ne_bytes();
            let remaining = size - offset;
            let copy_size = remaining.min(word_size);

            data.extend_from_slice(&bytes[..copy_size]);
        }

        data.truncate(size);
        Ok(data)
    }

    /// NUL終端文字列を読み取る
    ///
    /// ページ境界をまたがないように分割して読み取り、NULが見つかった時点で終了します。
    /// `max_len` バイト以内にNULが無い場合はそこで打ち切ります。
    /// 不正なUTF-8は置換文字に変換されます。
    pub fn read_c_string(&self, addr: usize, max_len: usize) -> Result<String> {
        if addr == 0 {
            return Err(anyhow::anyhow!("Cannot read string from null pointer"));
        }

        let mut bytes = Vec::new();
        let mut cursor = addr;

        while bytes.len() < max_len {
            let to_page_end = PAGE_SIZE - (cursor % PAGE_SIZE);
            let chunk_len = to_page_end.min(max_len - bytes.len());
            let chunk = self.read(cursor, chunk_len)?;

            if let Some(nul) = chunk.iter().position(|&b| b == 0) {
                bytes.extend_from_slice(&chunk[..nul]);
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }

            bytes.extend_from_slice(&chunk);
            cursor += chunk_len;
        }

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_own_memory() {
        let value: u64 = 0x1122_3344_5566_7788;
        let memory = Memory::new(std::process::id() as i32);
        let bytes = memory.read(&value as *const u64 as usize, 8).unwrap();
        assert_eq!(bytes, value.to_ne_bytes());
    }

    #[test]
    fn test_read_c_string() {
        let text = b"/etc/hostname\0trailing";
        let memory = Memory::new(std::process::id() as i32);
        let s = memory.read_c_string(text.as_ptr() as usize, MAX_STRING_LEN).unwrap();
        assert_eq!(s, "/etc/hostname");
    }

    #[test]
    fn test_read_c_string_truncates() {
        let text = b"abcdefgh\0";
        let memory = Memory::new(std::process::id() as i32);
        let s = memory.read_c_string(text.as_ptr() as usize, 4).unwrap();
        assert_eq!(s, "abcd");
    }

    #[test]
    fn test_read_c_string_null() {
        let memory = Memory::new(std::process::id() as i32);
        assert!(memory.read_c_string(0, MAX_STRING_LEN).is_err());
    }
}
