use crate::errors::{ZmError, ZmResult};
use crate::memory::{ZAddress, ZAddress::*, ZMemory};

/// One of the three alphabet tables a Z-character can be interpreted
/// against. V3 has no shift-lock: 4 and 5 shift the *next* character only.
///
/// Reference: section 3 of the Standards Document
/// http://inform-fiction.org/zmachine/standards/z1point1/sect03.html
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ZAlphabet {
    A0,
    A1,
    A2,
}

/// Index 0-5 of each table are never looked up directly (Z-chars 0-5 are
/// handled specially by the decoder: space, abbreviations, shifts); 6-31
/// hold the printable character for that Z-char value.
const A0_CHARS: [char; 32] = [
    ' ', ' ', ' ', ' ', ' ', ' ', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm',
    'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];
const A1_CHARS: [char; 32] = [
    ' ', ' ', ' ', ' ', ' ', ' ', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M',
    'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];
/// Position 6 is the 10-bit-escape trigger (handled specially, never looked
/// up here); position 7 is newline.
const A2_CHARS: [char; 32] = [
    ' ', ' ', ' ', ' ', ' ', ' ', ' ', '\n', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '.',
    ',', '!', '?', '_', '#', '\'', '"', '/', '\\', '-', ':', '(', ')',
];

impl ZAlphabet {
    fn table(&self) -> &'static [char; 32] {
        match self {
            ZAlphabet::A0 => &A0_CHARS,
            ZAlphabet::A1 => &A1_CHARS,
            ZAlphabet::A2 => &A2_CHARS,
        }
    }

    /// Look up the printable character for Z-char `z` (must be in 6..=31).
    fn char_for(&self, z: u8) -> char {
        self.table()[z as usize]
    }

    /// The A0 index of a lowercase ASCII letter, or `None` if it needs A2 or
    /// the 10-bit escape to encode.
    fn a0_index_of(c: char) -> Option<u8> {
        A0_CHARS
            .iter()
            .position(|&ch| ch == c)
            .filter(|&i| i >= 6)
            .map(|i| i as u8)
    }

    /// The A2 index of a punctuation/digit character, excluding the escape
    /// trigger at position 6 (never produced by encoding a literal char).
    fn a2_index_of(c: char) -> Option<u8> {
        A2_CHARS
            .iter()
            .position(|&ch| ch == c)
            .filter(|&i| i >= 7)
            .map(|i| i as u8)
    }
}

/// Default Unicode mapping table for ZSCII codes 155-251 (Table 1, R3.8.5.3).
const DEFAULT_UNICODE_TABLE: [char; 97] = [
    'ä', 'ö', 'ü', 'Ä', 'Ö', 'Ü', 'ß', '»', '«', 'ë', 'ï', 'ÿ', 'Ë', 'Ï', 'á', 'é', 'í', 'ó', 'ú',
    'ý', 'Á', 'É', 'Í', 'Ó', 'Ú', 'Ý', 'à', 'è', 'ì', 'ò', 'ù', 'À', 'È', 'Ì', 'Ò', 'Ù', 'â', 'ê',
    'î', 'ô', 'û', 'Â', 'Ê', 'Î', 'Ô', 'Û', 'å', 'Å', 'ø', 'Ø', 'ã', 'ñ', 'õ', 'Ã', 'Ñ', 'Õ', 'æ',
    'Æ', 'ç', 'Ç', 'þ', 'ð', 'Þ', 'Ð', '£', 'œ', 'Œ', '¡', '¿', ' ', ' ', ' ', ' ', ' ', ' ', ' ',
    ' ', ' ', ' ', ' ', ' ', ' ', ' ', ' ', ' ', ' ', ' ', ' ', ' ', ' ', ' ', ' ', ' ', ' ', ' ',
    ' ', ' ',
];

/// Map a 10-bit ZSCII code to the `char` it denotes.
///
/// R3.8.2.1: code 0 has no effect in any output stream (treated here as a
/// no-op character, mapped to `None`).
pub fn zscii_to_char(code: u16) -> ZmResult<Option<char>> {
    match code {
        0 => Ok(None),
        13 => Ok(Some('\n')),
        32..=126 => Ok(Some(code as u8 as char)),
        155..=251 => Ok(Some(DEFAULT_UNICODE_TABLE[(code - 155) as usize])),
        _ => Err(ZmError::InvalidZsciiCode(code)),
    }
}

/// Decode a packed ZSCII string starting at `address`, following abbreviation
/// references through `abbreviations_base` (the header's table address).
///
/// Returns the decoded text and the number of bytes consumed from `memory`
/// (i.e. `2 * words_read`), not counting the bytes of any expanded
/// abbreviation, which lives elsewhere in memory.
pub fn decode_string(
    memory: &ZMemory,
    address: ZAddress,
    abbreviations_base: ZAddress,
) -> ZmResult<(String, u32)> {
    decode_words(memory, address.as_byte(), Some(abbreviations_base))
}

/// Decode a packed ZSCII string starting at a raw byte offset rather than a
/// `ZAddress`. Used for inline text following `print`/`print_ret`, whose
/// start is a reader position computed during instruction decode - it may
/// land in high memory and so cannot be re-wrapped in `ZAddress::Byte`.
pub fn decode_string_at(
    memory: &ZMemory,
    offset: u32,
    abbreviations_base: ZAddress,
) -> ZmResult<(String, u32)> {
    decode_words(memory, offset, Some(abbreviations_base))
}

/// Decode the string referenced by abbreviation table entry `32*(z-1)+next`.
/// Abbreviations never nest (R3.3), so the expansion is decoded with
/// `abbreviations_base = None`: any Z-char 1-3 inside it is illegal content
/// that story files never emit, but decoding simply treats it as "no
/// abbreviation table available" rather than recursing.
fn decode_abbreviation(memory: &ZMemory, abbreviations_base: ZAddress, index: u8) -> ZmResult<String> {
    let entry_addr = Byte(abbreviations_base.as_byte() as u16 + 2 * index as u16);
    let word_address = memory.read_u16(entry_addr)?;
    let (text, _) = decode_words(memory, Word(word_address).as_byte(), None)?;
    Ok(text)
}

fn decode_words(
    memory: &ZMemory,
    offset: u32,
    abbreviations_base: Option<ZAddress>,
) -> ZmResult<(String, u32)> {
    let mut reader = memory.reader_at_offset(offset);
    let mut out = String::new();
    let mut alphabet = ZAlphabet::A0;
    // None, or a pending shift-to-A2-escape state: Some(None) after the first
    // Z-char 6 is seen in A2, Some(Some(hi)) after the high quintet.
    let mut escape: Option<Option<u8>> = None;
    let mut pending_abbrev_table: Option<u8> = None;

    loop {
        let word = reader.next_u16()?;
        let done = word & 0x8000 != 0;
        let chars = [
            ((word >> 10) & 0x1F) as u8,
            ((word >> 5) & 0x1F) as u8,
            (word & 0x1F) as u8,
        ];

        for z in chars {
            if let Some(hi_slot) = escape {
                match hi_slot {
                    None => escape = Some(Some(z)),
                    Some(hi) => {
                        let code = ((hi as u16) << 5) | z as u16;
                        if let Some(c) = zscii_to_char(code)? {
                            out.push(c);
                        }
                        escape = None;
                        alphabet = ZAlphabet::A0;
                    }
                }
                continue;
            }
            if let Some(table) = pending_abbrev_table {
                pending_abbrev_table = None;
                alphabet = ZAlphabet::A0;
                match abbreviations_base {
                    Some(base) => {
                        let index = 32 * (table - 1) + z;
                        out.push_str(&decode_abbreviation(memory, base, index)?);
                    }
                    None => {} // abbreviations never nest; silently ignore inside an expansion
                }
                continue;
            }
            match z {
                0 => {
                    out.push(' ');
                    alphabet = ZAlphabet::A0;
                }
                1 | 2 | 3 => {
                    pending_abbrev_table = Some(z);
                }
                4 => alphabet = ZAlphabet::A1,
                5 => alphabet = ZAlphabet::A2,
                6 if alphabet == ZAlphabet::A2 => {
                    escape = Some(None);
                }
                _ => {
                    out.push(alphabet.char_for(z));
                    alphabet = ZAlphabet::A0;
                }
            }
        }

        if done {
            break;
        }
    }

    Ok((out, reader.position() - offset))
}

/// Encode `text` into exactly 6 Z-characters (2 words, 4 bytes) for a v3
/// dictionary key, per R13.2-R13.3. Characters outside A0 use an explicit
/// A2 shift or the 10-bit escape; the result is padded with Z-char 5
/// (itself a no-op shift) and truncated to 6 Z-chars.
pub fn encode_dictionary_word(text: &str) -> [u8; 4] {
    let mut zchars = Vec::with_capacity(6);
    for c in text.chars().map(|c| c.to_ascii_lowercase()) {
        if zchars.len() >= 6 {
            break;
        }
        if c == ' ' {
            zchars.push(0);
        } else if let Some(i) = ZAlphabet::a0_index_of(c) {
            zchars.push(i);
        } else if let Some(i) = ZAlphabet::a2_index_of(c) {
            zchars.push(5);
            zchars.push(i);
        } else {
            let code = c as u16;
            zchars.push(5);
            zchars.push(6);
            zchars.push(((code >> 5) & 0x1F) as u8);
            zchars.push((code & 0x1F) as u8);
        }
    }
    zchars.resize(6, 5);
    zchars.truncate(6);

    let word0 = pack_word(false, [zchars[0], zchars[1], zchars[2]]);
    let word1 = pack_word(true, [zchars[3], zchars[4], zchars[5]]);
    [
        (word0 >> 8) as u8,
        (word0 & 0xFF) as u8,
        (word1 >> 8) as u8,
        (word1 & 0xFF) as u8,
    ]
}

fn pack_word(end: bool, chars: [u8; 3]) -> u16 {
    let end_bit = if end { 0x8000 } else { 0 };
    end_bit
        | ((chars[0] as u16 & 0x1F) << 10)
        | ((chars[1] as u16 & 0x1F) << 5)
        | (chars[2] as u16 & 0x1F)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story_with(bytes: &[u8]) -> ZMemory {
        let mut buf = vec![0u8; 0x40];
        buf.extend_from_slice(bytes);
        ZMemory::from_bytes(buf)
    }

    #[test]
    fn decodes_plain_a0_word() {
        // "it" = z-chars 15('i'-6=9?) simpler: build directly with known chars.
        // a0 index of 'i' = 14, 't' = 25 (6 + ('t'-'a')).
        let i = 6 + (b'i' - b'a');
        let t = 6 + (b't' - b'a');
        let word = pack_word(true, [i, t, 5]);
        let bytes = [(word >> 8) as u8, (word & 0xFF) as u8];
        let mem = story_with(&bytes);
        let (text, consumed) = decode_words(&mem, Byte(0x40).as_byte(), None).unwrap();
        assert_eq!(text, "it");
        assert_eq!(consumed, 2);
    }

    #[test]
    fn abbreviation_expansion_does_not_nest() {
        // Abbreviation table: one entry (index 2) pointing at a word address.
        // String word encodes z-chars 1,2,3 with the end bit set, per the
        // spec's boundary scenario: abbreviation entry 32*(1-1)+2 = 2,
        // followed by z-char 3 decoded against the abbreviation's own text
        // taken verbatim (no recursive abbreviation lookup).
        let mut buf = vec![0u8; 0x40];
        // abbreviations table at byte 0x40, one word entry for index 2
        // pointing (word address) at 0x44 -> byte address 0x88.
        let abbrev_table_addr = 0x40u16;
        buf.resize(0x90, 0);
        let entry_addr = (abbrev_table_addr + 2 * 2) as usize;
        let target_word_addr: u16 = 0x44; // word address -> byte 0x88
        buf[entry_addr] = (target_word_addr >> 8) as u8;
        buf[entry_addr + 1] = (target_word_addr & 0xFF) as u8;
        // abbreviation text at byte 0x88: "ok" then end.
        let o = 6 + (b'o' - b'a');
        let k = 6 + (b'k' - b'a');
        let abbrev_word = pack_word(true, [o, k, 5]);
        buf[0x88] = (abbrev_word >> 8) as u8;
        buf[0x89] = (abbrev_word & 0xFF) as u8;
        // main string: z-chars 1 (abbrev table 1... but we want table from
        // z=1 -> (1-1)*32=0, not matching entry 2). Use z=1 with next=2 so
        // index = 32*(1-1)+2 = 2, matching our populated entry.
        let main_word = pack_word(true, [1, 2, 3]);
        buf.extend_from_slice(&[(main_word >> 8) as u8, (main_word & 0xFF) as u8]);
        let main_addr = buf.len() as u16 - 2;

        let mem = ZMemory::from_bytes(buf);
        let (text, _) = decode_string(&mem, Byte(main_addr), Byte(abbrev_table_addr)).unwrap();
        // The abbreviation's own text ("ok") is spliced in verbatim. The
        // dangling trailing Z-char 3 has no operand left in the string (it
        // would itself trigger another abbreviation lookup, but the string
        // ends immediately after), so it contributes nothing further.
        assert_eq!(text, "ok");
    }

    #[test]
    fn dictionary_encoding_round_trips_first_six_a0_chars() {
        let key = encode_dictionary_word("lantern");
        let mem = story_with(&key);
        let (text, _) = decode_words(&mem, Byte(0x40).as_byte(), None).unwrap();
        // "lantern" truncated to its first 6 Z-characters is exactly "lanter".
        assert_eq!(text, "lanter");
    }

    #[test]
    fn dictionary_encoding_pads_short_words() {
        // Padding is Z-char 5 (a bare alphabet shift): it is well-formed but
        // prints nothing when decoded, so "go" still decodes as just "go".
        let key = encode_dictionary_word("go");
        let mem = story_with(&key);
        let (text, _) = decode_words(&mem, Byte(0x40).as_byte(), None).unwrap();
        assert_eq!(text, "go");
    }
}
