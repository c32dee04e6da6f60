use crate::Arg;
use crate::Error;
use crate::Handle;
use crate::Header;
use crate::HEADER_SIZE;
use crate::ObjectId;
use crate::Result;
use crate::pad4;

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_blob(buf: &mut Vec<u8>, data: &[u8], nul: bool) {
    let len = data.len() + nul as usize;
    write_u32(buf, len as u32);
    buf.extend_from_slice(data);
    let padded = pad4(len);
    buf.resize(buf.len() + (padded - data.len()), 0);
}

/// Appends the wire form of `args` to `buf`.
///
/// Handle arguments write nothing into `buf`; their references are pushed to
/// `handles` in argument order.
pub fn encode_args(buf: &mut Vec<u8>, args: &[Arg], handles: &mut Vec<Handle>) {
    for arg in args {
        match arg {
            Arg::Uint(v) => write_u32(buf, *v),
            Arg::Int(v) => write_u32(buf, *v as u32),
            Arg::Fixed(v) => write_u32(buf, v.raw() as u32),
            Arg::Object(id) => write_u32(buf, id.0),
            Arg::OptionalObject(id) => write_u32(buf, id.map_or(0, |id| id.0)),
            Arg::NewId(id) => write_u32(buf, *id),
            Arg::String(s) => write_blob(buf, s.as_bytes(), true),
            Arg::OptionalString(Some(s)) => write_blob(buf, s.as_bytes(), true),
            Arg::OptionalString(None) => write_u32(buf, 0),
            Arg::Array(a) => write_blob(buf, a, false),
            Arg::OptionalArray(Some(a)) => write_blob(buf, a, false),
            Arg::OptionalArray(None) => write_u32(buf, 0),
            Arg::Handle(h) => handles.push(h.clone()),
        }
    }
}

/// Appends one complete frame to `buf` and returns its size.
///
/// The size is computed up front from each argument's `wire_size`, so the
/// header never disagrees with the bytes that follow it.
pub fn encode_message(
    buf: &mut Vec<u8>,
    object_id: ObjectId,
    opcode: u16,
    args: &[Arg],
    handles: &mut Vec<Handle>,
) -> Result<usize> {
    let size = HEADER_SIZE + args.iter().map(Arg::wire_size).sum::<usize>();
    if size > u16::MAX as usize {
        return Err(Error::TooLarge(size));
    }
    let start = buf.len();
    buf.reserve(size);
    Header::new(object_id, size as u16, opcode).write(buf);
    encode_args(buf, args, handles);
    debug_assert_eq!(buf.len() - start, size);
    Ok(size)
}
