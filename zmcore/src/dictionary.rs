use crate::errors::{ZmError, ZmResult};
use crate::memory::{ZAddress, ZAddress::*, ZMemory};
use crate::zscii;

/// Minimum size, in bytes, of a v3 dictionary entry: the 4-byte encoded key
/// plus at least one data byte.
const MIN_ENTRY_SIZE: u8 = 4;

/// A single dictionary entry: its encoded key and the address at which its
/// data bytes (flags, meaning, etc.) begin in the story.
#[derive(Copy, Clone, Debug)]
struct Entry {
    key: [u8; 4],
    address: u16,
}

/// One token produced by `tokenize`: a word or separator from the input
/// line, together with where it matched in the dictionary (0 on miss) and
/// its position within the text buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Token {
    /// Byte address of the dictionary entry, or 0 if the word is unknown.
    pub dictionary_address: u16,
    /// Number of ZSCII characters in the token.
    pub length: u8,
    /// 1-based byte offset of the token within the text buffer.
    pub start: u8,
}

/// Word-separator table and sorted word table, read once on first use and
/// then binary-searched by `tokenize`.
///
/// Reference: section 13 of the Standards Document
/// http://inform-fiction.org/zmachine/standards/z1point1/sect13.html
pub struct Dictionary {
    separators: Vec<u8>,
    entry_size: u8,
    entries: Vec<Entry>,
}

impl Dictionary {
    pub fn from_memory(memory: &ZMemory, base: ZAddress) -> ZmResult<Self> {
        let mut reader = memory.reader_at(base);
        let separator_count = reader.next_u8()?;
        let mut separators = Vec::with_capacity(separator_count as usize);
        for _ in 0..separator_count {
            separators.push(reader.next_u8()?);
        }

        let entry_size = reader.next_u8()?;
        if entry_size < MIN_ENTRY_SIZE {
            return Err(ZmError::MalformedDictionary(
                "entry length must be at least 4 bytes",
            ));
        }
        let entry_count = reader.next_u16()? as i16;
        // A negative count (top bit set) would mean "unsorted" in later
        // versions; v3 dictionaries are always sorted ascending.
        if entry_count < 0 {
            return Err(ZmError::MalformedDictionary(
                "unsorted dictionaries are not a v3 feature",
            ));
        }

        let table_start = reader.position() as u16;
        let mut entries = Vec::with_capacity(entry_count as usize);
        for i in 0..entry_count as u16 {
            let entry_addr = table_start + i * entry_size as u16;
            let key_bytes = memory.read_slice(Byte(entry_addr), 4)?;
            let mut key = [0u8; 4];
            key.copy_from_slice(key_bytes);
            entries.push(Entry {
                key,
                address: entry_addr,
            });
        }

        Ok(Dictionary {
            separators,
            entry_size,
            entries,
        })
    }

    fn is_separator(&self, c: u8) -> bool {
        self.separators.contains(&c)
    }

    /// Byte address of the entry whose key matches `word`'s first six
    /// Z-characters, or 0 if no entry matches.
    fn lookup(&self, word: &str) -> u16 {
        let key = zscii::encode_dictionary_word(word);
        match self.entries.binary_search_by(|entry| entry.key.cmp(&key)) {
            Ok(index) => self.entries[index].address,
            Err(_) => 0,
        }
    }

    /// Split `line` (already lowercased) into tokens: runs of non-space,
    /// non-separator characters, and single-character separator tokens.
    /// Spaces themselves never become tokens.
    fn split(&self, line: &str) -> Vec<(String, u8)> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut current_start: u8 = 0;

        let bytes: Vec<char> = line.chars().collect();
        for (i, &c) in bytes.iter().enumerate() {
            let offset = i as u8 + 1; // 1-based
            if c == ' ' {
                if !current.is_empty() {
                    tokens.push((std::mem::take(&mut current), current_start));
                }
            } else if self.is_separator(c as u8) {
                if !current.is_empty() {
                    tokens.push((std::mem::take(&mut current), current_start));
                }
                tokens.push((c.to_string(), offset));
            } else {
                if current.is_empty() {
                    current_start = offset;
                }
                current.push(c);
            }
        }
        if !current.is_empty() {
            tokens.push((current, current_start));
        }
        tokens
    }

    /// Read the input line from the text buffer, tokenize it against the
    /// dictionary, and write the results into the parse buffer.
    ///
    /// Text buffer layout: byte 0 is the maximum input length, bytes 1.. are
    /// the zero-terminated lowercase ZSCII input.
    /// Parse buffer layout: byte 0 is the maximum token count, byte 1
    /// receives the actual token count, then that many 4-byte records of
    /// (dictionary address: word, length: byte, start: byte).
    pub fn tokenize(
        &self,
        memory: &mut ZMemory,
        text_buffer_addr: ZAddress,
        parse_buffer_addr: ZAddress,
    ) -> ZmResult<Vec<Token>> {
        let max_input_len = memory.read_u8(text_buffer_addr)?;
        let mut raw = Vec::with_capacity(max_input_len as usize);
        for i in 0..max_input_len {
            let c = memory.read_u8(Byte(text_buffer_addr.as_byte() as u16 + 1 + i as u16))?;
            if c == 0 {
                break;
            }
            raw.push((c as char).to_ascii_lowercase());
        }
        let line: String = raw.into_iter().collect();

        let words = self.split(&line);
        let max_tokens = memory.read_u8(parse_buffer_addr)?;

        let mut tokens = Vec::with_capacity(words.len());
        for (word, start) in words.into_iter().take(max_tokens as usize) {
            tokens.push(Token {
                dictionary_address: self.lookup(&word),
                length: word.chars().count() as u8,
                start,
            });
        }

        memory.write_u8(Byte(parse_buffer_addr.as_byte() as u16 + 1), tokens.len() as u8)?;
        let mut writer = memory.writer_at(Byte(parse_buffer_addr.as_byte() as u16 + 2));
        for token in &tokens {
            writer.next_u16(token.dictionary_address)?;
            writer.next_u8(token.length)?;
            writer.next_u8(token.start)?;
        }

        Ok(tokens)
    }

    #[cfg(test)]
    fn entry_size(&self) -> u8 {
        self.entry_size
    }
}
