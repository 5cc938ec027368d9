use crate::error::OffloadError;

/// Low-bits mask separating the operation from the alignment shift, for the
/// 16-bit ("short") and 8-bit kind encodings respectively.
const TYPEMASK_SHORT: u16 = 0xff;
const TYPEMASK_LONG: u16 = 0x7;
const RSHIFT_SHORT: u32 = 8;
const RSHIFT_LONG: u32 = 3;

/// One map-clause operation, decoded from the low bits of a [`MapKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOperation {
    Alloc,
    To,
    From,
    ToFrom,
    Pointer,
    ToPset,
    ForceAlloc,
    ForceTo,
    ForceFrom,
    ForceToFrom,
    ForceDevicePtr,
    ForcePresent,
    FirstprivateInt,
    AlwaysTo,
    AlwaysFrom,
    AlwaysToFrom,
    Firstprivate,
    Struct,
    UseDevicePtr,
    ZeroLenArraySection,
    Delete,
    Release,
    DeleteZeroLenArraySection,
}

impl MapOperation {
    fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => Self::Alloc,
            1 => Self::To,
            2 => Self::From,
            3 => Self::ToFrom,
            4 => Self::Pointer,
            5 => Self::ToPset,
            6 => Self::ForceAlloc,
            7 => Self::ForceTo,
            8 => Self::ForceFrom,
            9 => Self::ForceToFrom,
            10 => Self::ForceDevicePtr,
            11 => Self::ForcePresent,
            12 => Self::FirstprivateInt,
            13 => Self::AlwaysTo,
            14 => Self::AlwaysFrom,
            15 => Self::AlwaysToFrom,
            16 => Self::Firstprivate,
            17 => Self::Struct,
            18 => Self::UseDevicePtr,
            19 => Self::ZeroLenArraySection,
            20 => Self::Delete,
            21 => Self::Release,
            22 => Self::DeleteZeroLenArraySection,
            _ => return None,
        })
    }

    /// Clauses whose device→host direction applies at normal unmap time.
    pub fn copy_from(self) -> bool {
        matches!(self, Self::From | Self::ToFrom | Self::ForceFrom | Self::ForceToFrom)
    }

    /// Clauses whose device→host copy happens unconditionally, every time.
    pub fn always_copy_from(self) -> bool {
        matches!(self, Self::AlwaysFrom | Self::AlwaysToFrom)
    }

    /// Clauses whose host→device direction applies at map time.
    pub fn copy_to(self) -> bool {
        matches!(
            self,
            Self::To | Self::ToFrom | Self::ForceTo | Self::ForceToFrom | Self::AlwaysTo | Self::AlwaysToFrom
        )
    }

    pub fn always_copy_to(self) -> bool {
        matches!(self, Self::AlwaysTo | Self::AlwaysToFrom)
    }

    /// Pointer-kind clauses always occupy `size_of::<usize>()` host bytes,
    /// regardless of the clause's declared size.
    pub fn is_pointer_sized(self) -> bool {
        matches!(self, Self::Pointer)
    }

    pub fn is_force(self) -> bool {
        matches!(
            self,
            Self::ForceAlloc | Self::ForceTo | Self::ForceFrom | Self::ForceToFrom | Self::ForceDevicePtr | Self::ForcePresent
        )
    }
}

/// A clause's encoded kind: an operation in the low bits plus an alignment
/// exponent in the high bits. `short` selects whether the original array held
/// 8-bit or 16-bit kind words (`short_mapkind`).
#[derive(Debug, Clone, Copy)]
pub struct MapKind {
    raw: u16,
    short: bool,
}

impl MapKind {
    pub fn new(raw: u16, short: bool) -> Self {
        Self { raw, short }
    }

    fn typemask(self) -> u16 {
        if self.short { TYPEMASK_SHORT } else { TYPEMASK_LONG }
    }

    fn rshift(self) -> u32 {
        if self.short { RSHIFT_SHORT } else { RSHIFT_LONG }
    }

    pub fn operation(self) -> Result<MapOperation, OffloadError> {
        MapOperation::from_raw(self.raw & self.typemask())
            .ok_or(OffloadError::UnhandledKind { raw: self.raw & self.typemask() })
    }

    /// Power-of-two alignment carried in the high bits of the kind word.
    pub fn align(self) -> u64 {
        1u64 << (self.raw >> self.rshift())
    }
}

/// Which pragma produced this batch of map clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PragmaKind {
    /// `target`: a compute region launch; always gets an argument array.
    Target,
    /// `target data`: stacked on the thread-local data-region list.
    Data,
    /// `target enter data`: persists until a matching `exit data`.
    EnterData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_kind_decodes_operation_and_align() {
        let k = MapKind::new(3 | (2 << 8), true);
        assert_eq!(k.operation().unwrap(), MapOperation::ToFrom);
        assert_eq!(k.align(), 4);
    }

    #[test]
    fn long_kind_uses_three_bit_typemask() {
        let k = MapKind::new(4 | (1 << 3), false);
        assert_eq!(k.operation().unwrap(), MapOperation::Pointer);
        assert_eq!(k.align(), 2);
    }

    #[test]
    fn unrecognized_operation_byte_is_rejected() {
        let k = MapKind::new(200, true);
        assert!(k.operation().is_err());
    }

    #[test]
    fn copy_direction_helpers_agree_with_taxonomy() {
        assert!(MapOperation::ToFrom.copy_to());
        assert!(MapOperation::ToFrom.copy_from());
        assert!(!MapOperation::To.copy_from());
        assert!(MapOperation::AlwaysFrom.always_copy_from());
        assert!(MapOperation::ForcePresent.is_force());
        assert!(!MapOperation::To.is_force());
    }
}
