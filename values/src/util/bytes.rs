//! The binary-string escape form: opaque bytes round-trip through strings as
//! printable characters, with everything else encoded `~XX` (two uppercase
//! hex digits). The tilde itself is always escaped.

/// Encode raw bytes as a binary string.
#[must_use]
pub fn encode_binary(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'~' => out.push_str("~7E"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("~{b:02X}")),
        }
    }
    out
}

/// Decode a binary string back to raw bytes. Fails on malformed `~` escapes
/// or non-ASCII characters.
pub fn decode_binary(s: &str) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            let hi = chars.next().ok_or("truncated ~ escape")?;
            let lo = chars.next().ok_or("truncated ~ escape")?;
            let hex: String = [hi, lo].iter().collect();
            let b = u8::from_str_radix(&hex, 16)
                .map_err(|_| format!("bad ~ escape: ~{hex}"))?;
            out.push(b);
        } else if c.is_ascii() && !c.is_ascii_control() {
            out.push(c as u8);
        } else {
            return Err(format!("invalid character in binary string: {c:?}"));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{decode_binary, encode_binary};

    #[test]
    fn test_roundtrip() {
        let cases: Vec<Vec<u8>> = vec![
            b"hello".to_vec(),
            vec![0, 1, 2, 255, b'~', b' '],
            vec![],
        ];
        for bytes in cases {
            let encoded = encode_binary(&bytes);
            assert_eq!(decode_binary(&encoded).unwrap(), bytes);
        }
    }

    #[test]
    fn test_encoding_shape() {
        assert_eq!(encode_binary(b"a~b"), "a~7Eb");
        assert_eq!(encode_binary(&[10]), "~0A");
    }

    #[test]
    fn test_malformed() {
        assert!(decode_binary("~").is_err());
        assert!(decode_binary("~GG").is_err());
        assert!(decode_binary("ok~00").is_ok());
    }
}
