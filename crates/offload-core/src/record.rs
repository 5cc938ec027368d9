//! The mapping record (`Key` in the original): one entry in a device's
//! interval index.

use offload_abi::RefCount;

use crate::descriptor::DescHandle;

#[derive(Debug, Clone)]
pub struct Key {
    pub host_start: u64,
    pub host_end: u64,
    /// Offset inside the owning descriptor's device block.
    pub tgt_offset: u64,
    /// Owning descriptor, as a stable handle rather than a back-pointer.
    pub tgt: DescHandle,
    pub refcount: RefCount,
    /// Extra holds from in-flight asynchronous copy-backs (§4.5).
    pub async_refcount: u64,
}

impl Key {
    pub fn len(&self) -> u64 {
        self.host_end - self.host_start
    }

    pub fn is_degenerate(&self) -> bool {
        self.host_start == self.host_end
    }
}
