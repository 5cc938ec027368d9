/// A caller-supplied device identifier, as it arrives at a public entry
/// point before being resolved to a live device descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceId {
    /// Use the calling task's internal control variable for default device.
    Icv,
    /// Run on the host, in-process; never resolves to a device descriptor.
    HostFallback,
    /// A concrete device index into the registry.
    Numbered(i32),
}

/// Raw wire encoding: mirrors the C ABI's use of small negative ints as
/// sentinels alongside the unsigned device index space.
const RAW_ICV: i32 = -1;
const RAW_HOST_FALLBACK: i32 = -2;

impl DeviceId {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            RAW_ICV => Self::Icv,
            RAW_HOST_FALLBACK => Self::HostFallback,
            other => Self::Numbered(other),
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            Self::Icv => RAW_ICV,
            Self::HostFallback => RAW_HOST_FALLBACK,
            Self::Numbered(n) => n,
        }
    }
}
