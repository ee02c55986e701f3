use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};
use crate::package::{Package, PackageKind, Payload};

/// Preamble sentinel marking the start of every frame.
pub const PREAMBLE: u8 = 0xCE;

/// Default maximum content size: 16 MiB.
///
/// A garbage length field after stream desynchronization would otherwise ask
/// the assembler to buffer up to 4 GiB before noticing anything is wrong.
pub const DEFAULT_MAX_CONTENT: usize = 16 * 1024 * 1024;

/// Maximum name length: 64 KiB.
///
/// The name field is delimited by a NUL rather than a length, so a
/// desynchronized stream that never produces one would otherwise buffer
/// indefinitely while the decoder keeps waiting for the terminator.
pub const MAX_NAME_LEN: usize = 64 * 1024;

/// Encode a package into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────┬────────────────┬────────────┬──────────────────┐
/// │ Preamble │ Kind     │ Name           │ Length     │ Content           │
/// │ 0xCE     │ (1B)     │ NUL-terminated │ (4B LE)    │ (Length bytes)    │
/// └──────────┴──────────┴────────────────┴────────────┴──────────────────┘
/// ```
///
/// Content encodings by kind:
/// - `SingleString`: UTF-8 bytes, no terminator
/// - `SingleInt32`: 4 bytes, i32 little-endian
/// - `Bytes`: raw bytes verbatim (may be empty)
/// - `StringList`: each element's UTF-8 bytes followed by one NUL, in order
///
/// Fails if the name or a list element contains a NUL byte (which would
/// corrupt the framing), or if the content exceeds the u32 length field.
pub fn encode_package(package: &Package, dst: &mut BytesMut) -> Result<()> {
    let name = package.name.as_bytes();
    if name.contains(&0) {
        return Err(FrameError::InvalidName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FrameError::NameTooLong {
            len: name.len(),
            max: MAX_NAME_LEN,
        });
    }

    let content_len = content_length(&package.payload)?;
    if content_len > u32::MAX as usize {
        return Err(FrameError::ContentTooLarge {
            size: content_len,
            max: u32::MAX as usize,
        });
    }

    dst.reserve(2 + name.len() + 1 + 4 + content_len);
    dst.put_u8(PREAMBLE);
    dst.put_u8(package.kind().as_byte());
    dst.put_slice(name);
    dst.put_u8(0);
    dst.put_u32_le(content_len as u32);

    match &package.payload {
        Payload::SingleString(s) => dst.put_slice(s.as_bytes()),
        Payload::SingleInt32(n) => dst.put_i32_le(*n),
        Payload::Bytes(data) => dst.put_slice(data),
        Payload::StringList(list) => {
            for s in list {
                dst.put_slice(s.as_bytes());
                dst.put_u8(0);
            }
        }
    }

    Ok(())
}

fn content_length(payload: &Payload) -> Result<usize> {
    match payload {
        Payload::SingleString(s) => Ok(s.len()),
        Payload::SingleInt32(_) => Ok(4),
        Payload::Bytes(data) => Ok(data.len()),
        Payload::StringList(list) => {
            let mut total = 0usize;
            for s in list {
                if s.as_bytes().contains(&0) {
                    return Err(FrameError::InvalidString);
                }
                total += s.len() + 1; // include the NUL terminator
            }
            Ok(total)
        }
    }
}

/// Decode one package from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. A preamble mismatch
/// or unknown kind is a framing error; the owning connection is expected to
/// terminate rather than attempt resynchronization.
pub fn decode_package(src: &mut BytesMut, max_content: usize) -> Result<Option<Package>> {
    if src.len() < 2 {
        return Ok(None); // Need preamble + kind
    }

    if src[0] != PREAMBLE {
        return Err(FrameError::InvalidPreamble { byte: src[0] });
    }
    let kind = PackageKind::from_byte(src[1]).ok_or(FrameError::UnknownKind(src[1]))?;

    // Name runs until its NUL terminator, which may not have arrived yet.
    let Some(name_len) = src[2..].iter().position(|&b| b == 0) else {
        if src.len() - 2 > MAX_NAME_LEN {
            return Err(FrameError::NameTooLong {
                len: src.len() - 2,
                max: MAX_NAME_LEN,
            });
        }
        return Ok(None);
    };
    if name_len > MAX_NAME_LEN {
        return Err(FrameError::NameTooLong {
            len: name_len,
            max: MAX_NAME_LEN,
        });
    }

    let len_start = 2 + name_len + 1;
    if src.len() < len_start + 4 {
        return Ok(None);
    }
    let content_len =
        u32::from_le_bytes(src[len_start..len_start + 4].try_into().expect("4 bytes")) as usize;

    if content_len > max_content {
        return Err(FrameError::ContentTooLarge {
            size: content_len,
            max: max_content,
        });
    }

    let total = len_start + 4 + content_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(2);
    let name_bytes = src.split_to(name_len);
    src.advance(5); // name NUL + length field
    let content = src.split_to(content_len).freeze();

    let name = std::str::from_utf8(&name_bytes)
        .map_err(|_| FrameError::InvalidUtf8 { what: "name" })?
        .to_owned();

    let payload = match kind {
        PackageKind::SingleString => {
            let s = std::str::from_utf8(&content)
                .map_err(|_| FrameError::InvalidUtf8 { what: kind.name() })?;
            Payload::SingleString(s.to_owned())
        }
        PackageKind::SingleInt32 => {
            if content.len() != 4 {
                return Err(FrameError::BadContent {
                    kind: kind.name(),
                    len: content.len(),
                });
            }
            Payload::SingleInt32(i32::from_le_bytes(
                content[..4].try_into().expect("4 bytes"),
            ))
        }
        PackageKind::Bytes => Payload::Bytes(content),
        PackageKind::StringList => Payload::StringList(decode_string_list(&content)?),
    };

    Ok(Some(Package { name, payload }))
}

/// Split a string-list content region on NUL terminators.
///
/// Element boundaries are recovered solely by scanning for NUL bytes; no
/// element count travels on the wire. Every element, including a trailing
/// empty one, carries its own terminator, so a region that does not end with
/// NUL is malformed.
fn decode_string_list(content: &[u8]) -> Result<Vec<String>> {
    let mut list = Vec::new();
    let mut pos = 0usize;
    while pos < content.len() {
        let Some(nul) = content[pos..].iter().position(|&b| b == 0) else {
            return Err(FrameError::BadContent {
                kind: "string-list",
                len: content.len(),
            });
        };
        let s = std::str::from_utf8(&content[pos..pos + nul])
            .map_err(|_| FrameError::InvalidUtf8 {
                what: "string-list",
            })?;
        list.push(s.to_owned());
        pos += nul + 1;
    }
    Ok(list)
}
