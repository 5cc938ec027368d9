/// Recoverable errors a caller can inspect and act on. Contract violations
/// (bookkeeping bugs, overlapping mappings, and the like) are not
/// represented here — those go through the fatal reporter in `offload-core`
/// and never reach a `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OffloadError {
    #[error("device id {0} is negative")]
    NegativeDeviceId(i32),
    #[error("device {0} is not a known device")]
    UnknownDevice(i32),
    #[error("omp_target_memcpy_rect does not support copies between two distinct devices")]
    CrossDeviceRectCopy,
    #[error("pointer was not previously associated with a device mapping")]
    NotAssociated,
    #[error("pointer is already associated with a different device mapping")]
    AssociateCollision,
    #[error("rectangular copy arithmetic overflowed")]
    RectArithmeticOverflow,
    #[error("map engine cannot classify kind byte {raw:#x}")]
    UnhandledKind { raw: u16 },
}

pub type OffloadResult<T> = Result<T, OffloadError>;

impl From<OffloadError> for libc::c_int {
    fn from(err: OffloadError) -> Self {
        match err {
            OffloadError::UnhandledKind { .. } => libc::EINVAL,
            _ => libc::EINVAL,
        }
    }
}
