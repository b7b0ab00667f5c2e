//! Host-side scalar-equivalent traits.

use crate::layout::ScalarClass;

/// A fixed-size number copied verbatim from foreign bytes (native order).
pub trait Scalar: Copy + Default + Send + Sync + 'static {
    const SIZE: usize;
    const CLASS: ScalarClass;

    /// Decode from exactly `SIZE` bytes.
    fn from_ne_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty => $class:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();
                const CLASS: ScalarClass = ScalarClass::$class;

                fn from_ne_slice(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_ne_bytes(buf)
                }
            }
        )*
    };
}

impl_scalar! {
    i8 => Signed,
    i16 => Signed,
    i32 => Signed,
    i64 => Signed,
    u8 => Unsigned,
    u16 => Unsigned,
    u32 => Unsigned,
    u64 => Unsigned,
    f32 => Float,
    f64 => Float,
}

impl Scalar for bool {
    const SIZE: usize = 1;
    const CLASS: ScalarClass = ScalarClass::Bool;

    fn from_ne_slice(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// A host enumeration mirroring a foreign enumeration.
///
/// Usually implemented over a `strum::FromRepr` derive.
pub trait ForeignEnum: Default + Send + Sync + 'static {
    /// Foreign enumeration name.
    const NAME: &'static str;
    /// Foreign storage width in bytes.
    const SIZE: usize;

    fn from_raw(raw: i64) -> Option<Self>;
}

/// A host mirror of a foreign bitfield.
pub trait Bitfield: Default + Send + Sync + 'static {
    const NAME: &'static str;
    /// Storage width in bytes; must equal the foreign width.
    const WIDTH: usize;

    fn from_bits(bits: u64) -> Self;
}

/// Index type of a [`FlagArray`](super::FlagArray).
pub trait FlagIndex: Copy + Send + Sync + 'static {
    const COUNT: usize;

    fn index(self) -> usize;
    fn from_index(index: usize) -> Option<Self>;
}

/// Unsigned read of a `width`-byte native-order integer (at most 8 bytes).
pub(crate) fn read_uint(bytes: &[u8], width: usize) -> u64 {
    let n = width.min(8).min(bytes.len());
    let mut buf = [0u8; 8];
    if cfg!(target_endian = "little") {
        buf[..n].copy_from_slice(&bytes[..n]);
    } else {
        buf[8 - n..].copy_from_slice(&bytes[..n]);
    }
    u64::from_ne_bytes(buf)
}

/// Sign-extending counterpart of [`read_uint`], for enumeration values.
pub(crate) fn read_int(bytes: &[u8], width: usize) -> i64 {
    let n = width.min(8).min(bytes.len());
    if n == 0 {
        return 0;
    }
    let shift = 64 - 8 * n as u32;
    ((read_uint(bytes, n) << shift) as i64) >> shift
}
