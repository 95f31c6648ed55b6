/// Most bytes included in a diagnostic dump.
pub const MAX_DUMP_BYTES: usize = 16;

/// Format the first [`MAX_DUMP_BYTES`] of `bytes` as `[55 aa 80 10 04]`,
/// with a trailing ` ...` when truncated.
pub fn hex_dump(bytes: &[u8]) -> String {
    let shown = bytes.len().min(MAX_DUMP_BYTES);
    let mut out = String::with_capacity(2 + shown * 3 + 4);
    out.push('[');
    for (i, byte) in bytes[..shown].iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02x}"));
    }
    if shown < bytes.len() {
        out.push_str(" ...");
    }
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dumps_short_buffers_whole() {
        assert_eq!(hex_dump(&[0x33, 0xcc, 0x80, 0x10, 0x04]), "[33 cc 80 10 04]");
    }

    #[test]
    fn empty_buffer() {
        assert_eq!(hex_dump(&[]), "[]");
    }

    #[test]
    fn truncates_after_sixteen_bytes() {
        let bytes: Vec<u8> = (0..20).collect();
        assert_eq!(
            hex_dump(&bytes),
            "[00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f ...]"
        );
    }
}
