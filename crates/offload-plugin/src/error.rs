#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("device {target_id} failed to initialize")]
    InitFailed { target_id: i32 },
    #[error("device {target_id} allocation of {size} bytes failed")]
    AllocFailed { target_id: i32, size: u64 },
    #[error("image load returned {got} entries, expected {expected}")]
    ImageTableMismatch { expected: usize, got: usize },
    #[error("plugin version {plugin} is newer than host version {host}")]
    VersionMismatch { plugin: u32, host: u32 },
    #[error("device transfer failed: {0}")]
    Transfer(String),
    #[error("plugin does not implement {0}")]
    Unsupported(&'static str),
    #[error("failed to load plugin library: {0}")]
    Load(String),
    #[error("plugin library is missing required symbol {0}")]
    MissingSymbol(&'static str),
}
