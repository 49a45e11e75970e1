pub mod block;
pub mod errors;
pub mod mempool;
pub mod transaction;

use self::errors::CodecError;

/// Splits a serialized frame into its payload and tail halves.
///
/// Every wire object is `<base64 payload>.<hex tail>`; anything with more or
/// fewer sections is rejected before any decoding happens.
pub(crate) fn split_frame(text: &str) -> Result<(&str, &str), CodecError> {
    let mut sections = text.split('.');
    match (sections.next(), sections.next(), sections.next()) {
        (Some(payload), Some(tail), None) => Ok((payload, tail)),
        _ => Err(CodecError::MalformedFrame(
            "expected exactly one '.' separator".into(),
        )),
    }
}
