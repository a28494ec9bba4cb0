//! Primitive element types that can be packed into a segment payload.
//!
//! Values are stored in native byte order; readers and writers agree on the
//! element type out of band.

mod sealed {
    pub trait Sealed {}
}

/// Fixed-size primitive that converts to and from native-endian bytes.
pub trait Element: sealed::Sealed + Copy + Default + Send + 'static {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Append the native-endian encoding of `self` to `out`.
    fn put(self, out: &mut Vec<u8>);

    /// Decode from exactly [`Self::SIZE`] bytes.
    fn get(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $t {}

            impl Element for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                #[inline]
                fn put(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_ne_bytes());
                }

                #[inline]
                fn get(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$t>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_element!(f32, f64, i8, i16, i32, i64, u8, u16, u32, u64);

/// Replace the contents of `out` with the encoding of `values`.
pub fn encode_into<T: Element>(values: &[T], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(values.len() * T::SIZE);
    for value in values {
        value.put(out);
    }
}

/// Decode as many whole elements as `bytes` holds into `out`.
///
/// Returns the number of elements written.
pub fn decode_into<T: Element>(bytes: &[u8], out: &mut [T]) -> usize {
    let mut count = 0;
    for (slot, chunk) in out.iter_mut().zip(bytes.chunks_exact(T::SIZE)) {
        *slot = T::get(chunk);
        count += 1;
    }
    count
}
