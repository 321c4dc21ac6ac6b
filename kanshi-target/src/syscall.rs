//! システムコール名と番号の対応表（Linux x86_64）

/// (名前, 番号) の表
const SYSCALLS: &[(&str, u64)] = &[
    ("read", 0),
    ("write", 1),
    ("open", 2),
    ("close", 3),
    ("stat", 4),
    ("fstat", 5),
    ("lstat", 6),
    ("poll", 7),
    ("lseek", 8),
    ("mmap", 9),
    ("mprotect", 10),
    ("munmap", 11),
    ("brk", 12),
    ("ioctl", 16),
    ("pread64", 17),
    ("pwrite64", 18),
    ("readv", 19),
    ("writev", 20),
    ("access", 21),
    ("pipe", 22),
    ("select", 23),
    ("dup", 32),
    ("dup2", 33),
    ("nanosleep", 35),
    ("getpid", 39),
    ("sendfile", 40),
    ("socket", 41),
    ("connect", 42),
    ("accept", 43),
    ("sendto", 44),
    ("recvfrom", 45),
    ("sendmsg", 46),
    ("recvmsg", 47),
    ("shutdown", 48),
    ("bind", 49),
    ("listen", 50),
    ("clone", 56),
    ("fork", 57),
    ("vfork", 58),
    ("execve", 59),
    ("exit", 60),
    ("wait4", 61),
    ("kill", 62),
    ("uname", 63),
    ("fcntl", 72),
    ("fsync", 74),
    ("truncate", 76),
    ("ftruncate", 77),
    ("getcwd", 79),
    ("chdir", 80),
    ("rename", 82),
    ("mkdir", 83),
    ("rmdir", 84),
    ("creat", 85),
    ("link", 86),
    ("unlink", 87),
    ("symlink", 88),
    ("readlink", 89),
    ("chmod", 90),
    ("chown", 92),
    ("umask", 95),
    ("getuid", 102),
    ("ptrace", 101),
    ("getppid", 110),
    ("prctl", 157),
    ("gettid", 186),
    ("futex", 202),
    ("getdents64", 217),
    ("clock_gettime", 228),
    ("clock_nanosleep", 230),
    ("exit_group", 231),
    ("epoll_wait", 232),
    ("epoll_ctl", 233),
    ("tgkill", 234),
    ("openat", 257),
    ("mkdirat", 258),
    ("newfstatat", 262),
    ("unlinkat", 263),
    ("renameat", 264),
    ("readlinkat", 267),
    ("faccessat", 269),
    ("pselect6", 270),
    ("ppoll", 271),
    ("accept4", 288),
    ("epoll_create1", 291),
    ("dup3", 292),
    ("pipe2", 293),
    ("getrandom", 318),
    ("memfd_create", 319),
    ("execveat", 322),
    ("statx", 332),
    ("clone3", 435),
    ("close_range", 436),
    ("openat2", 437),
    ("faccessat2", 439),
];

/// 名前からシステムコール番号を引く
pub fn number(name: &str) -> Option<u64> {
    SYSCALLS.iter().find(|(n, _)| *n == name).map(|(_, nr)| *nr)
}

/// システムコール番号から名前を引く
pub fn name(number: u64) -> Option<&'static str> {
    SYSCALLS.iter().find(|(_, nr)| *nr == number).map(|(n, _)| *n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(number("open"), Some(2));
        assert_eq!(number("openat"), Some(257));
        assert_eq!(number("close"), Some(3));
        assert_eq!(name(257), Some("openat"));
        assert_eq!(number("no_such_call"), None);
        assert_eq!(name(9999), None);
    }

    #[test]
    fn test_table_has_unique_entries() {
        for (i, (name_a, nr_a)) in SYSCALLS.iter().enumerate() {
            for (name_b, nr_b) in &SYSCALLS[i + 1..] {
                assert_ne!(name_a, name_b);
                assert_ne!(nr_a, nr_b, "{} and {} share a number", name_a, name_b);
            }
        }
    }
}
