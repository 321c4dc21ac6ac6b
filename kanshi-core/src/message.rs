//! スクリプトからホストへのメッセージ
//!
//! メッセージは `type` タグを持つJSONで表現されます。
//!
//! ```text
//! {"type":"log","level":"info","payload":"[*] open(\"/etc/hosts\")"}
//! {"type":"send","payload":{"syscall":"close","tid":1234,"args":[3,0,0,0,0,0]}}
//! {"type":"error","description":"Failed to read argument 0"}
//! ```

use serde::{Deserialize, Serialize};

/// ログメッセージのレベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// スクリプトメッセージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// コンソール出力
    Log { level: LogLevel, payload: String },
    /// 任意のJSONペイロード
    Send { payload: serde_json::Value },
    /// スクリプト実行時のエラー
    Error {
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
}

impl Message {
    /// 生のJSON文字列からメッセージを復元する
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// JSON文字列に変換する
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// メッセージをコンソール表示用の文字列にする
///
/// `type` が `log` で文字列のペイロードを持つメッセージはペイロードのみ、
/// それ以外（解釈できない文字列を含む）は生の文字列を `on_message: ` に続けて返します。
/// `level` などその他のフィールドは見ません。
pub fn describe(raw: &str) -> String {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => return format!("on_message: {}", raw),
    };
    match (value.get("type").and_then(|t| t.as_str()), value.get("payload")) {
        (Some("log"), Some(serde_json::Value::String(payload))) => payload.clone(),
        _ => format!("on_message: {}", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_log() {
        let raw = r#"{"type":"log","level":"info","payload":"[*] close(3)"}"#;
        assert_eq!(describe(raw), "[*] close(3)");
    }

    #[test]
    fn test_describe_log_ignores_level() {
        assert_eq!(describe(r#"{"type":"log","payload":"hi"}"#), "hi");
        assert_eq!(describe(r#"{"type":"log","level":"debug","payload":"hi"}"#), "hi");
    }

    #[test]
    fn test_describe_log_without_string_payload() {
        let raw = r#"{"type":"log","payload":42}"#;
        assert_eq!(describe(raw), format!("on_message: {}", raw));

        let raw = r#"{"type":"log"}"#;
        assert_eq!(describe(raw), format!("on_message: {}", raw));
    }

    #[test]
    fn test_describe_fallback() {
        let raw = r#"{"type":"send","payload":{"fd":3}}"#;
        assert_eq!(describe(raw), format!("on_message: {}", raw));

        let raw = r#"{"type":"custom","payload":1}"#;
        assert_eq!(describe(raw), format!("on_message: {}", raw));

        assert_eq!(describe("not json"), "on_message: not json");
    }

    #[test]
    fn test_log_serialization() {
        let message = Message::Log {
            level: LogLevel::Warning,
            payload: "hello".to_string(),
        };
        let json: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "log");
        assert_eq!(json["level"], "warning");
        assert_eq!(json["payload"], "hello");
    }

    #[test]
    fn test_error_without_stack() {
        let message = Message::Error {
            description: "bad pointer".to_string(),
            stack: None,
        };
        let json = message.to_json().unwrap();
        assert!(!json.contains("stack"));
        assert_eq!(Message::parse(&json).unwrap(), message);
    }
}
