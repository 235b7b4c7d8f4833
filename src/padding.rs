//! Block-cipher padding codec.
//!
//! Three schemes are supported, matching the vendors' reference SDKs:
//! - `Zero`: right-pad with `0x00` up to the next multiple of the block size;
//!   unpad trims every trailing `0x00` byte.
//! - `Pkcs5`: pad length `p = block - len % block` (a full block when aligned),
//!   filled with `p` copies of the byte `p`.
//! - `Pkcs7`: the same algorithm as `Pkcs5`. The difference lives in the caller:
//!   the WeChat callback envelope sizes PKCS#7 by the AES *key* length, not the
//!   cipher block size (see [`crate::cipher::AesCbc`]).
//!
//! Unpadding is lenient on purpose. A trailing byte outside `1..=block` (or
//! larger than the input) means "no padding present" and the input is returned
//! unchanged. This padding is not authenticated and offers no tamper evidence;
//! the callback envelope relies on its trailing receiver id for that.

/// Padding scheme applied before block encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Zero,
    Pkcs5,
    Pkcs7,
}

impl Padding {
    /// Pad `data` to a multiple of `block_size`.
    ///
    /// A `block_size` of zero leaves the data untouched.
    pub fn pad(&self, data: &[u8], block_size: u8) -> Vec<u8> {
        let block = block_size as usize;
        if block == 0 {
            return data.to_vec();
        }
        let p = block - data.len() % block;
        let fill = match self {
            Padding::Zero => 0u8,
            Padding::Pkcs5 | Padding::Pkcs7 => p as u8,
        };
        let mut out = Vec::with_capacity(data.len() + p);
        out.extend_from_slice(data);
        out.resize(data.len() + p, fill);
        out
    }

    /// Strip padding added by [`Padding::pad`].
    ///
    /// Never fails: malformed padding leaves the input as is.
    pub fn unpad<'a>(&self, data: &'a [u8], block_size: u8) -> &'a [u8] {
        match self {
            Padding::Zero => {
                let end = data
                    .iter()
                    .rposition(|&b| b != 0)
                    .map(|i| i + 1)
                    .unwrap_or(0);
                &data[..end]
            }
            Padding::Pkcs5 | Padding::Pkcs7 => {
                let Some(&last) = data.last() else {
                    return data;
                };
                let p = last as usize;
                if p == 0 || p > block_size as usize || p > data.len() {
                    return data;
                }
                &data[..data.len() - p]
            }
        }
    }
}

/// Free-function form of [`Padding::pad`].
pub fn pad(data: &[u8], block_size: u8, mode: Padding) -> Vec<u8> {
    mode.pad(data, block_size)
}

/// Free-function form of [`Padding::unpad`].
pub fn unpad(data: &[u8], block_size: u8, mode: Padding) -> Vec<u8> {
    mode.unpad(data, block_size).to_vec()
}
