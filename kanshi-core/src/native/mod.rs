//! ptraceを使うネイティブバックエンド

mod device;
mod script;
mod session;
mod tracer;

pub use device::{NativeDevice, NativeDeviceManager};
pub use script::NativeScript;
pub use session::NativeSession;
