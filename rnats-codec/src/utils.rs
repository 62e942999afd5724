use crate::error::DecodeError;

macro_rules! ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            return Err($e);
        }
    };
}

/// Position of the first CRLF at or after `from`
#[inline]
pub(crate) fn find_crlf(src: &[u8], from: usize) -> Option<usize> {
    if src.len() < 2 || from > src.len() - 2 {
        return None;
    }
    src[from..].windows(2).position(|w| w == b"\r\n").map(|p| p + from)
}

/// Arguments are separated by any run of spaces and tabs
#[inline]
pub(crate) fn split_args(line: &str) -> impl Iterator<Item = &str> {
    line.split([' ', '\t']).filter(|s| !s.is_empty())
}

/// Strict unsigned decimal: digits only, no sign, no overflow.
pub(crate) fn parse_u64(text: &str) -> Result<u64, DecodeError> {
    ensure!(!text.is_empty(), DecodeError::InvalidNumber);
    let mut n: u64 = 0;
    for b in text.bytes() {
        ensure!(b.is_ascii_digit(), DecodeError::InvalidNumber);
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_add(u64::from(b - b'0')))
            .ok_or(DecodeError::InvalidNumber)?;
    }
    Ok(n)
}

/// Payload size, bounded by `max` (`0` means unlimited). The size plus the
/// trailing CRLF must fit in an `isize`.
pub(crate) fn parse_size(text: &str, max: usize) -> Result<usize, DecodeError> {
    let size = usize::try_from(parse_u64(text)?).map_err(|_| DecodeError::InvalidNumber)?;
    ensure!(size <= isize::MAX as usize - 2, DecodeError::InvalidNumber);
    if max != 0 && size > max {
        return Err(DecodeError::MaxPayloadExceeded { size, max });
    }
    Ok(size)
}
