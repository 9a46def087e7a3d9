//! Component C: the signature grammar. Scans and validates type-code
//! strings over a closed alphabet with nested containers, computes
//! per-type alignment, and skips one complete type at a time.
//!
//! Unlike rustbus's `signature::Type`, which eagerly parses a
//! signature into a `Vec<Type>` tree, this module walks the raw type
//! string with a cursor, because the recursive reader and writer
//! (components E and F) need to advance a live signature cursor in
//! lockstep with a live body cursor -- an eagerly parsed tree can't be
//! resumed mid-container the way a cursor can. See DESIGN.md.

use crate::error::ValidationError as VErr;

pub const BYTE: u8 = b'y';
pub const BOOLEAN: u8 = b'b';
pub const INT16: u8 = b'n';
pub const UINT16: u8 = b'q';
pub const INT32: u8 = b'i';
pub const UINT32: u8 = b'u';
pub const INT64: u8 = b'x';
pub const UINT64: u8 = b't';
pub const DOUBLE: u8 = b'd';
pub const STRING: u8 = b's';
pub const OBJECT_PATH: u8 = b'o';
pub const SIGNATURE: u8 = b'g';
pub const ARRAY: u8 = b'a';
pub const STRUCT_START: u8 = b'(';
pub const STRUCT_END: u8 = b')';
pub const VARIANT: u8 = b'v';
pub const DICT_ENTRY_START: u8 = b'{';
pub const DICT_ENTRY_END: u8 = b'}';
/// Bare struct type code. Valid wire syntax is only `(...)`; this code
/// as a standalone signature byte is rejected by `validate` per the
/// policy decided in DESIGN.md, even though `alignment_of` still
/// answers for it (it shares struct's 8-byte alignment).
pub const STRUCT_CODE: u8 = b'r';
/// Sentinel returned by cursor APIs positioned at the end of a
/// container -- mirrors the source's `DBUS_TYPE_INVALID`.
pub const INVALID: u8 = b'\0';

pub const MAX_SIGNATURE_LEN: usize = 255;
pub const MAX_ARRAY_DEPTH: u8 = 32;
pub const MAX_STRUCT_DEPTH: u8 = 32;
/// Conservative cap on an array's declared byte length, shared by the
/// body validator (component G) and the message loader (component I)
/// so the two never disagree about what "a plausible array" means.
pub const MAX_ARRAY_LENGTH_BYTES: u32 = 64 * 1024 * 1024;

pub fn is_basic_fixed(code: u8) -> bool {
    matches!(
        code,
        BYTE | BOOLEAN | INT16 | UINT16 | INT32 | UINT32 | INT64 | UINT64 | DOUBLE
    )
}

pub fn is_basic_string_like(code: u8) -> bool {
    matches!(code, STRING | OBJECT_PATH | SIGNATURE)
}

pub fn is_basic(code: u8) -> bool {
    is_basic_fixed(code) || is_basic_string_like(code)
}

pub fn is_container_start(code: u8) -> bool {
    matches!(code, ARRAY | STRUCT_START | VARIANT)
}

/// Alignment in bytes for a value whose type code is `code`. Valid for
/// every code `validate` accepts, plus the bare struct code `r` (see
/// the Open Question note above).
pub fn alignment_of(code: u8) -> Result<u8, VErr> {
    Ok(match code {
        BYTE | SIGNATURE | VARIANT => 1,
        INT16 | UINT16 => 2,
        INT32 | UINT32 | BOOLEAN | ARRAY | STRING | OBJECT_PATH => 4,
        INT64 | UINT64 | DOUBLE | STRUCT_START | STRUCT_CODE | DICT_ENTRY_START => 8,
        _ => return Err(VErr::UnknownTypecode),
    })
}

/// Validate a complete signature string.
pub fn validate(sig: &str) -> Result<(), VErr> {
    if sig.len() > MAX_SIGNATURE_LEN {
        return Err(VErr::SignatureTooLong);
    }
    let bytes = sig.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        pos = validate_one(bytes, pos, 0, 0)?;
    }
    Ok(())
}

/// Validate and advance past exactly one complete type starting at
/// `pos`, enforcing array/struct depth caps along the way. Returns the
/// position just past the type.
fn validate_one(
    bytes: &[u8],
    mut pos: usize,
    array_depth: u8,
    struct_depth: u8,
) -> Result<usize, VErr> {
    if pos >= bytes.len() {
        return Err(VErr::MissingArrayElementType);
    }
    let code = bytes[pos];
    match code {
        ARRAY => {
            if array_depth >= MAX_ARRAY_DEPTH {
                return Err(VErr::ExceededMaxArrayRecursion);
            }
            pos += 1;
            // dict-entry as array element is handled by ordinary
            // recursion: '{' bumps struct_depth like any other struct
            // bracket, the key/value rule is enforced in validate_dict_entry.
            if pos < bytes.len() && bytes[pos] == DICT_ENTRY_START {
                validate_dict_entry(bytes, pos, array_depth + 1, struct_depth)
            } else {
                validate_one(bytes, pos, array_depth + 1, struct_depth)
            }
        }
        STRUCT_START => {
            if struct_depth >= MAX_STRUCT_DEPTH {
                return Err(VErr::ExceededMaxStructRecursion);
            }
            pos += 1;
            if pos < bytes.len() && bytes[pos] == STRUCT_END {
                return Err(VErr::StructHasNoFields);
            }
            let mut saw_field = false;
            while pos < bytes.len() && bytes[pos] != STRUCT_END {
                // Array depth resets inside a struct: the two axes are
                // capped separately (spec §3), so crossing a struct
                // boundary starts a fresh `a...a` run the same way
                // `dbus-marshal-validate.c` zeroes `array_depth` on any
                // non-`a' byte.
                pos = validate_one(bytes, pos, 0, struct_depth + 1)?;
                saw_field = true;
            }
            if pos >= bytes.len() {
                return Err(VErr::StructStartedButNotEnded);
            }
            if !saw_field {
                return Err(VErr::StructHasNoFields);
            }
            Ok(pos + 1)
        }
        STRUCT_END => Err(VErr::StructEndedButNotStarted),
        STRUCT_CODE => Err(VErr::UnknownTypecode),
        DICT_ENTRY_START | DICT_ENTRY_END => Err(VErr::UnknownTypecode),
        VARIANT => Ok(pos + 1),
        b if is_basic(b) => Ok(pos + 1),
        _ => Err(VErr::UnknownTypecode),
    }
}

/// A dict-entry (`{...}`) is only legal directly as an array element;
/// validated here as a struct restricted to exactly one basic key and
/// one value type.
fn validate_dict_entry(
    bytes: &[u8],
    mut pos: usize,
    _array_depth: u8,
    struct_depth: u8,
) -> Result<usize, VErr> {
    if struct_depth >= MAX_STRUCT_DEPTH {
        return Err(VErr::ExceededMaxStructRecursion);
    }
    debug_assert_eq!(bytes[pos], DICT_ENTRY_START);
    pos += 1;
    if pos >= bytes.len() {
        return Err(VErr::StructStartedButNotEnded);
    }
    let key_code = bytes[pos];
    if !is_basic(key_code) {
        return Err(VErr::UnknownTypecode);
    }
    pos += 1;
    if pos >= bytes.len() || bytes[pos] == DICT_ENTRY_END {
        return Err(VErr::StructStartedButNotEnded);
    }
    // Like a struct field (see `validate_one`'s STRUCT_START branch),
    // the dict-entry's value type starts a fresh array-depth run: a
    // dict-entry is itself struct-shaped at the wire level.
    pos = validate_one(bytes, pos, 0, struct_depth + 1)?;
    if pos >= bytes.len() || bytes[pos] != DICT_ENTRY_END {
        return Err(VErr::StructStartedButNotEnded);
    }
    Ok(pos + 1)
}

/// Advance past one complete type (an `a...` prefix, then either one
/// non-container code or one balanced `(...)`/`{...}` group) without
/// re-validating. Precondition: `sig` already passed `validate`.
pub fn skip_one_complete_type(sig: &[u8], pos: usize) -> Result<usize, VErr> {
    if pos >= sig.len() {
        return Err(VErr::MissingArrayElementType);
    }
    match sig[pos] {
        ARRAY => skip_one_complete_type(sig, pos + 1),
        STRUCT_START | DICT_ENTRY_START => {
            let closer = if sig[pos] == STRUCT_START {
                STRUCT_END
            } else {
                DICT_ENTRY_END
            };
            let mut depth = 1usize;
            let mut p = pos + 1;
            while depth > 0 {
                if p >= sig.len() {
                    return Err(VErr::StructStartedButNotEnded);
                }
                if sig[p] == sig[pos] {
                    depth += 1;
                } else if sig[p] == closer {
                    depth -= 1;
                }
                p += 1;
            }
            Ok(p)
        }
        _ => Ok(pos + 1),
    }
}

/// Length in bytes of one complete type starting at `pos`.
pub fn len_of_complete_type(sig: &[u8], pos: usize) -> Result<usize, VErr> {
    Ok(skip_one_complete_type(sig, pos)? - pos)
}

/// The type code that begins the complete type at `pos` -- for an
/// array this is `a`, not the element code; callers that need the
/// element type recurse with `skip_one_complete_type`.
pub fn first_code_at(sig: &[u8], pos: usize) -> u8 {
    if pos >= sig.len() {
        INVALID
    } else {
        sig[pos]
    }
}
