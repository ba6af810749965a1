use bytes::Bytes;

/// Marker that prefixes every item payload.
pub const ITEM_MARKER: &str = "ItemIndex: ";

/// Build the payload for item `index`. Deterministic so that duplicates on the
/// consumer side can be matched back to a single send.
pub fn item_payload(index: u64) -> Bytes {
    Bytes::from(format!("{ITEM_MARKER}{index}"))
}

/// Recover the item index from a payload produced by [`item_payload`].
pub fn parse_item_index(payload: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(payload).ok()?;
    text.strip_prefix(ITEM_MARKER)?.parse().ok()
}
