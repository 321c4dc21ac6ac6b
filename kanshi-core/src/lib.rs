//! Kanshi のコア機能
//!
//! デバイスマネージャ → デバイス → セッション → スクリプト のオブジェクトモデル、
//! スクリプトからのメッセージを中継するメインループ、そしてそれらを順に呼び出す
//! ドライバを提供します。実際のプロセス操作は `native` バックエンドが担います。

pub mod backend;
pub mod driver;
pub mod errors;
pub mod hook;
pub mod main_loop;
pub mod message;
pub mod native;
pub mod signals;

pub use backend::{Device, DeviceList, DeviceManager, DeviceType, Script, Session};
pub use driver::{Target, EXAMPLE_SCRIPT};
pub use errors::{Error, Result};
pub use hook::HookSet;
pub use main_loop::{DetachReason, LoopEvent, LoopHandle, MainLoop};
pub use message::{LogLevel, Message};
pub use native::NativeDeviceManager;
pub use signals::install_signal_handlers;
