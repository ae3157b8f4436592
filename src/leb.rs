//! LEB128 codecs used by the debug-info stream and the catch-handler blob.
//!
//! DEX constrains every variable-length integer to 32 bits, so a valid
//! encoding is at most 5 bytes. The `p1` variant shifts the value space by
//! one so that -1 can stand in for "no index".

use crate::error::LirError;

pub(crate) fn read_uleb128(bytes: &[u8], ix: &mut usize) -> Result<u32, LirError>
{
    let mut value: u32 = 0;
    let mut shift: u32 = 0;

    for count in 0..5 {
        let Some(&byte) = bytes.get(*ix) else {
            fail!("unexpected end of stream in uleb128 at index {}", *ix);
        };
        *ix += 1;

        value |= ((byte & 0x7f) as u32).wrapping_shl(shift);
        shift += 7;

        if (byte & 0x80) == 0 || count == 4 {
            return Ok(value);
        }
    }
    unreachable!()
}

pub(crate) fn read_sleb128(bytes: &[u8], ix: &mut usize) -> Result<i32, LirError>
{
    let mut value: i32 = 0;
    let mut shift: u32 = 0;
    let mut last: u8 = 0;

    for count in 0..5 {
        let Some(&byte) = bytes.get(*ix) else {
            fail!("unexpected end of stream in sleb128 at index {}", *ix);
        };
        *ix += 1;
        last = byte;

        value |= ((byte & 0x7f) as i32).wrapping_shl(shift);
        shift += 7;

        if (byte & 0x80) == 0 || count == 4 {
            break;
        }
    }

    // sign-extend when the top bit of the last payload septet is set
    if (last & 0x40) != 0 && shift < 32 {
        value |= (-1i32).wrapping_shl(shift);
    }

    Ok(value)
}

/// uleb128p1: the encoded value is the logical value plus one, so a logical
/// -1 (the "no index" marker) encodes as a single zero byte.
pub(crate) fn read_uleb128p1(bytes: &[u8], ix: &mut usize) -> Result<i32, LirError>
{
    Ok(read_uleb128(bytes, ix)? as i32 - 1)
}

pub(crate) fn write_uleb128(buffer: &mut Vec<u8>, value: u32)
{
    let mut remaining = value;
    loop {
        let mut byte = (remaining & 0x7f) as u8;
        remaining >>= 7;
        if remaining != 0 {
            byte |= 0x80;
        }
        buffer.push(byte);
        if remaining == 0 {
            break;
        }
    }
}

pub(crate) fn write_sleb128(buffer: &mut Vec<u8>, value: i32)
{
    let mut remaining = value;
    loop {
        let mut byte = (remaining & 0x7f) as u8;
        remaining >>= 7;

        let done = (remaining == 0 && (byte & 0x40) == 0)
            || (remaining == -1 && (byte & 0x40) != 0);
        if !done {
            byte |= 0x80;
        }
        buffer.push(byte);
        if done {
            break;
        }
    }
}

pub(crate) fn write_uleb128p1(buffer: &mut Vec<u8>, value: i32)
{
    write_uleb128(buffer, (value + 1) as u32)
}
