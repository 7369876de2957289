pub(crate) mod registry;
pub(crate) mod smr;
pub(crate) mod smr_common;
pub(crate) mod utils;

pub use smr::{GuardEBR, GuardHP};
pub use smr_common::{AcquiredPtr, AcquireRetire, RetireType};
pub use utils::{CountedObject, EjectAction};
