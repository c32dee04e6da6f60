use std::collections::VecDeque;

use crate::Arg;
use crate::ArgKind;
use crate::Cursor;
use crate::Error;
use crate::Fixed;
use crate::Handle;
use crate::ObjectId;
use crate::Result;

fn read_string(cursor: &mut Cursor<'_>, optional: bool) -> Result<Option<String>> {
    let len = cursor.read_u32()? as usize;
    if len == 0 {
        return if optional {
            Ok(None)
        } else {
            Err(Error::Malformed("null string for non-nullable argument".into()))
        };
    }
    let bytes = cursor.read_padded(len)?;
    let (last, body) = bytes.split_last().ok_or(Error::Malformed("empty string body".into()))?;
    if *last != 0 {
        return Err(Error::Malformed("string is not NUL terminated".into()));
    }
    let s = std::str::from_utf8(body).map_err(|_| Error::Malformed("string is not UTF-8".into()))?;
    Ok(Some(s.to_string()))
}

fn read_array(cursor: &mut Cursor<'_>, optional: bool) -> Result<Option<Vec<u8>>> {
    let len = cursor.read_u32()? as usize;
    if len == 0 && optional {
        return Ok(None);
    }
    Ok(Some(cursor.read_padded(len)?.to_vec()))
}

fn read_object(cursor: &mut Cursor<'_>, optional: bool) -> Result<Option<ObjectId>> {
    let id = cursor.read_u32()?;
    match (id, optional) {
        (0, true) => Ok(None),
        (0, false) => Err(Error::Malformed("null object for non-nullable argument".into())),
        (id, _) => Ok(Some(ObjectId(id))),
    }
}

/// Decodes arguments for `signature` from a cursor spanning one frame.
///
/// The cursor must be fully consumed: leftover bytes mean the declared frame
/// size disagrees with the signature, which is as fatal as running short.
/// Handle slots take references from the front of `handles`.
pub fn decode_args(
    cursor: &mut Cursor<'_>,
    signature: &[ArgKind],
    handles: &mut VecDeque<Handle>,
) -> Result<Vec<Arg>> {
    let mut args = Vec::with_capacity(signature.len());
    for kind in signature {
        let arg = match kind {
            ArgKind::Uint => Arg::Uint(cursor.read_u32()?),
            ArgKind::Int => Arg::Int(cursor.read_i32()?),
            ArgKind::Fixed => Arg::Fixed(Fixed::from_raw(cursor.read_i32()?)),
            ArgKind::NewId => {
                let id = cursor.read_u32()?;
                if id == 0 {
                    return Err(Error::Malformed("new_id of 0".into()));
                }
                Arg::NewId(id)
            }
            ArgKind::Object => Arg::Object(read_object(cursor, false)?.unwrap_or(ObjectId::NULL)),
            ArgKind::OptionalObject => Arg::OptionalObject(read_object(cursor, true)?),
            ArgKind::String => Arg::String(read_string(cursor, false)?.unwrap_or_default()),
            ArgKind::OptionalString => Arg::OptionalString(read_string(cursor, true)?),
            ArgKind::Array => Arg::Array(read_array(cursor, false)?.unwrap_or_default()),
            ArgKind::OptionalArray => Arg::OptionalArray(read_array(cursor, true)?),
            ArgKind::Handle => Arg::Handle(handles.pop_front().ok_or(Error::MissingHandle)?),
        };
        args.push(arg);
    }
    if !cursor.is_empty() {
        return Err(Error::Malformed(format!(
            "{} bytes left over after decoding {} arguments",
            cursor.remaining(),
            signature.len()
        )));
    }
    Ok(args)
}
