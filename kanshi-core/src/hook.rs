//! フックスクリプトの解析と実行
//!
//! スクリプトは1行1命令のテキストです。空行と `#` で始まる行は無視されます。
//!
//! ```text
//! on <syscall> log   <template>
//! on <syscall> warn  <template>
//! on <syscall> error <template>
//! on <syscall> send
//! ```
//!
//! テンプレートでは次のプレースホルダが使えます。
//!
//! - `{argN}` : N番目（0〜5）の引数を符号付き10進数で
//! - `{argN:x}` : 16進数で
//! - `{argN:str}` : 対象プロセスのメモリからNUL終端文字列を読み取って
//! - `{syscall}` : システムコール名
//! - `{tid}` : スレッドID
//!
//! `{{` と `}}` はそれぞれ `{` と `}` になります。

use crate::message::{LogLevel, Message};
use crate::{Error, Result};
use kanshi_target::memory::MAX_STRING_LEN;
use kanshi_target::{syscall, Memory, SyscallStop};
use regex::Regex;

/// プレースホルダとエスケープにマッチするパターン
const PLACEHOLDER_PATTERN: &str = r"\{\{|\}\}|\{([^{}]*)\}";

/// 引数の最大数
const MAX_ARGS: usize = 6;

/// 対象プロセスのメモリから文字列を読み取る
pub trait ArgReader {
    fn read_string(&self, addr: u64) -> anyhow::Result<String>;
}

impl ArgReader for Memory {
    fn read_string(&self, addr: u64) -> anyhow::Result<String> {
        self.read_c_string(addr as usize, MAX_STRING_LEN)
    }
}

/// 引数の表示形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgFormat {
    Decimal,
    Hex,
    Str,
}

/// テンプレートの構成要素
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Arg { index: usize, format: ArgFormat },
    Syscall,
    Tid,
}

/// ログ出力のテンプレート
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// テンプレート文字列を解析する
    fn parse(text: &str, pattern: &Regex) -> std::result::Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut last = 0;

        for caps in pattern.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            literal.push_str(&text[last..whole.start()]);
            last = whole.end();

            match whole.as_str() {
                "{{" => literal.push('{'),
                "}}" => literal.push('}'),
                _ => {
                    let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                    let segment = parse_placeholder(name)?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                }
            }
        }

        literal.push_str(&text[last..]);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// システムコール停止の情報でテンプレートを展開する
    pub fn render(&self, name: &str, stop: &SyscallStop, reader: &dyn ArgReader) -> anyhow::Result<String> {
        let mut out = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Syscall => out.push_str(name),
                Segment::Tid => out.push_str(&stop.tid.to_string()),
                Segment::Arg { index, format } => {
                    let value = stop.args[*index];
                    match format {
                        ArgFormat::Decimal => out.push_str(&(value as i64).to_string()),
                        ArgFormat::Hex => out.push_str(&format!("0x{:x}", value)),
                        ArgFormat::Str => {
                            let s = reader.read_string(value).map_err(|e| {
                                anyhow::anyhow!("Failed to read string argument {} at 0x{:x}: {}", index, value, e)
                            })?;
                            out.push_str(&s);
                        }
                    }
                }
            }
        }

        Ok(out)
    }
}

/// プレースホルダの中身を解析する
fn parse_placeholder(name: &str) -> std::result::Result<Segment, String> {
    match name {
        "syscall" => return Ok(Segment::Syscall),
        "tid" => return Ok(Segment::Tid),
        _ => {}
    }

    let (arg, format) = match name.split_once(':') {
        Some((arg, "x")) => (arg, ArgFormat::Hex),
        Some((arg, "str")) => (arg, ArgFormat::Str),
        Some((_, other)) => return Err(format!("unknown format '{}' in '{{{}}}'", other, name)),
        None => (name, ArgFormat::Decimal),
    };

    let index = arg
        .strip_prefix("arg")
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|&n| n < MAX_ARGS)
        .ok_or_else(|| format!("unknown placeholder '{{{}}}'", name))?;

    Ok(Segment::Arg { index, format })
}

/// フックの動作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookAction {
    /// ログメッセージを送る
    Log { level: LogLevel, template: Template },
    /// 引数をJSONで送る
    Send,
}

/// 1つのシステムコールに対するフック
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hook {
    syscall: &'static str,
    number: u64,
    action: HookAction,
}

impl Hook {
    pub fn action(&self) -> &HookAction {
        &self.action
    }

    /// システムコール入口でフックを実行し、送信するメッセージを作る
    ///
    /// テンプレートの展開に失敗した場合は `error` メッセージになります。
    pub fn fire(&self, stop: &SyscallStop, reader: &dyn ArgReader) -> Message {
        match &self.action {
            HookAction::Log { level, template } => match template.render(self.syscall, stop, reader) {
                Ok(payload) => Message::Log {
                    level: *level,
                    payload,
                },
                Err(e) => Message::Error {
                    description: e.to_string(),
                    stack: Some(format!("on {} (tid {})", self.syscall, stop.tid)),
                },
            },
            HookAction::Send => Message::Send {
                payload: serde_json::json!({
                    "syscall": self.syscall,
                    "tid": stop.tid,
                    "args": stop.args,
                }),
            },
        }
    }
}

/// コンパイル済みのフック一覧
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookSet {
    hooks: Vec<Hook>,
}

impl HookSet {
    /// スクリプトのソースをコンパイルする
    pub fn compile(source: &str) -> Result<Self> {
        let pattern = Regex::new(PLACEHOLDER_PATTERN)?;
        let mut hooks = Vec::new();

        for (index, line) in source.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let invalid = |reason: String| Error::InvalidScript {
                line: line_no,
                reason,
            };

            let (keyword, rest) = split_word(line);
            if keyword != "on" {
                return Err(invalid(format!("expected 'on', found '{}'", keyword)));
            }

            let (name, rest) = split_word(rest);
            if name.is_empty() {
                return Err(invalid("missing syscall name".to_string()));
            }
            let number = syscall::number(name)
                .ok_or_else(|| invalid(format!("unknown syscall '{}'", name)))?;
            let syscall = syscall::name(number).unwrap_or("unknown");

            let (action, template) = split_word(rest);
            let level = match action {
                "log" => Some(LogLevel::Info),
                "warn" => Some(LogLevel::Warning),
                "error" => Some(LogLevel::Error),
                "send" => None,
                "" => return Err(invalid("missing action".to_string())),
                other => return Err(invalid(format!("unknown action '{}'", other))),
            };

            let action = match level {
                Some(level) => {
                    if template.is_empty() {
                        return Err(invalid(format!("'{}' requires a message template", action)));
                    }
                    let template = Template::parse(template, &pattern).map_err(invalid)?;
                    HookAction::Log { level, template }
                }
                None => {
                    if !template.is_empty() {
                        return Err(invalid("'send' takes no arguments".to_string()));
                    }
                    HookAction::Send
                }
            };

            hooks.push(Hook {
                syscall,
                number,
                action,
            });
        }

        Ok(Self { hooks })
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hook> {
        self.hooks.iter()
    }

    /// 指定されたシステムコール番号に対するフック（記述順）
    pub fn matching(&self, number: u64) -> impl Iterator<Item = &Hook> {
        self.hooks.iter().filter(move |hook| hook.number == number)
    }
}

/// 先頭の単語と残りに分割する
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim()),
        None => (s, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeMemory(HashMap<u64, String>);

    impl ArgReader for FakeMemory {
        fn read_string(&self, addr: u64) -> anyhow::Result<String> {
            self.0
                .get(&addr)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unmapped address"))
        }
    }

    fn stop(number: u64, args: [u64; 6]) -> SyscallStop {
        SyscallStop {
            tid: 4242,
            number,
            args,
            entry: true,
        }
    }

    #[test]
    fn test_compile_example_script() {
        let hooks = HookSet::compile(crate::EXAMPLE_SCRIPT).unwrap();
        assert!(!hooks.is_empty());
        assert_eq!(hooks.matching(syscall::number("close").unwrap()).count(), 1);
        assert_eq!(hooks.matching(syscall::number("openat").unwrap()).count(), 1);
    }

    #[test]
    fn test_render_open() {
        let hooks = HookSet::compile("on openat log [*] open(\"{arg1:str}\")").unwrap();
        let memory = FakeMemory(HashMap::from([(0x1000, "/etc/hosts".to_string())]));
        let hook = hooks.iter().next().unwrap();

        let message = hook.fire(&stop(257, [0, 0x1000, 0, 0, 0, 0]), &memory);
        assert_eq!(
            message,
            Message::Log {
                level: LogLevel::Info,
                payload: "[*] open(\"/etc/hosts\")".to_string(),
            }
        );
    }

    #[test]
    fn test_render_formats() {
        let source = "on close warn {syscall}:{tid} fd={arg0} hex={arg0:x} neg={arg1} {{literal}}";
        let hooks = HookSet::compile(source).unwrap();
        let hook = hooks.iter().next().unwrap();

        let message = hook.fire(&stop(3, [255, u64::MAX, 0, 0, 0, 0]), &FakeMemory(HashMap::new()));
        assert_eq!(
            message,
            Message::Log {
                level: LogLevel::Warning,
                payload: "close:4242 fd=255 hex=0xff neg=-1 {literal}".to_string(),
            }
        );
    }

    #[test]
    fn test_unreadable_string_becomes_error_message() {
        let hooks = HookSet::compile("on open log {arg0:str}").unwrap();
        let hook = hooks.iter().next().unwrap();

        let message = hook.fire(&stop(2, [0xdead, 0, 0, 0, 0, 0]), &FakeMemory(HashMap::new()));
        match message {
            Message::Error { description, .. } => assert!(description.contains("0xdead")),
            other => panic!("expected error message, got {:?}", other),
        }
    }

    #[test]
    fn test_send_payload() {
        let hooks = HookSet::compile("on close send").unwrap();
        let hook = hooks.iter().next().unwrap();

        let message = hook.fire(&stop(3, [7, 0, 0, 0, 0, 0]), &FakeMemory(HashMap::new()));
        let Message::Send { payload } = message else {
            panic!("expected send message");
        };
        assert_eq!(payload["syscall"], "close");
        assert_eq!(payload["tid"], 4242);
        assert_eq!(payload["args"][0], 7);
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let source = "\n# comment\n\non close send\n   # indented comment\n";
        assert_eq!(HookSet::compile(source).unwrap().len(), 1);
    }

    #[test]
    fn test_compile_errors_report_line() {
        let cases = [
            ("on close send\nattach close send", 2),
            ("\n\non nosuchcall send", 3),
            ("on close", 1),
            ("on close shout hi", 1),
            ("on close log", 1),
            ("on close send extra", 1),
            ("on close log {arg6}", 1),
            ("on close log {arg0:oct}", 1),
            ("on close log {fd}", 1),
        ];

        for (source, expected_line) in cases {
            match HookSet::compile(source) {
                Err(Error::InvalidScript { line, .. }) => assert_eq!(line, expected_line, "{}", source),
                other => panic!("expected script error for {:?}, got {:?}", source, other),
            }
        }
    }

    #[test]
    fn test_matching_keeps_order() {
        let hooks = HookSet::compile("on close send\non open send\non close log second").unwrap();
        let matched: Vec<_> = hooks.matching(3).map(|h| h.action().clone()).collect();
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0], HookAction::Send);
    }
}
