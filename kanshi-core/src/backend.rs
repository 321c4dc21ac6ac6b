//! 計装バックエンドのオブジェクトモデル
//!
//! デバイスマネージャ → デバイス → セッション → スクリプト の順にハンドルを取得します。
//! 各ハンドルは `Drop` で解放されるため、スコープを抜ける順序（取得の逆順）で解放されます。

use crate::main_loop::LoopHandle;
use crate::Result;

/// デバイスの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// このマシン
    Local,
    /// ネットワーク越しのデバイス
    Remote,
    /// USB接続のデバイス
    Usb,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Local => write!(f, "local"),
            DeviceType::Remote => write!(f, "remote"),
            DeviceType::Usb => write!(f, "usb"),
        }
    }
}

/// デバイスマネージャ（アタッチ対象の列挙の起点）
pub trait DeviceManager {
    type Device: Device;

    /// 接続されているデバイスを列挙する
    fn enumerate_devices(&mut self) -> Result<DeviceList<Self::Device>>;

    /// マネージャをクローズする
    fn close(&mut self) -> Result<()>;
}

/// アタッチ対象のデバイス
pub trait Device {
    type Session: Session;

    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn dtype(&self) -> DeviceType;

    /// プロセスにアタッチしてセッションを作成する
    fn attach(&self, pid: u32) -> Result<Self::Session>;
}

/// プロセスへのアタッチ
pub trait Session {
    type Script: Script;

    /// 対象のプロセスID
    fn pid(&self) -> u32;

    /// 切断イベントの通知先を設定する
    fn on_detached(&mut self, sink: LoopHandle);

    /// スクリプトを作成する（まだロードはしない）
    fn create_script(&mut self, name: &str, source: &str) -> Result<Self::Script>;

    /// デタッチする（二度目以降は何もしない）
    fn detach(&mut self) -> Result<()>;
}

/// 対象プロセスに注入する計装
pub trait Script {
    fn name(&self) -> &str;

    /// メッセージの通知先を設定する
    ///
    /// メッセージは `LoopEvent::Message` としてループに投入されます。
    /// 通知先が無いスクリプトのメッセージは捨てられます。
    fn on_message(&mut self, sink: LoopHandle);

    fn load(&mut self) -> Result<()>;

    fn unload(&mut self) -> Result<()>;
}

/// デバイスの一覧
#[derive(Debug)]
pub struct DeviceList<D> {
    devices: Vec<D>,
}

impl<D: Device> DeviceList<D> {
    pub fn new(devices: Vec<D>) -> Self {
        Self { devices }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&D> {
        self.devices.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &D> {
        self.devices.iter()
    }

    /// 指定された種類の最初のデバイスを一覧から取り出す
    ///
    /// 残りのデバイスは一覧と共に解放されます。
    pub fn take_first(mut self, dtype: DeviceType) -> Option<D> {
        let index = self.devices.iter().position(|d| d.dtype() == dtype)?;
        Some(self.devices.swap_remove(index))
    }
}
