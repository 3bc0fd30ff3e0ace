use crate::errors::{ZmError, ZmResult};
use crate::memory::{ZAddress, ZAddress::*, ZMemory};
use crate::zscii;

/// Size in bytes of a v1-v3 object entry: 4 bytes of attribute flags, 3
/// link bytes (parent, sibling, child), 2 bytes for the property table
/// address.
const OBJECT_ENTRY_SIZE: u16 = 9;

/// Number of words in the property-defaults table that precedes the object
/// entries in versions 1-3.
const PROPERTY_DEFAULTS_COUNT: u16 = 31;

/// Reader/writer for the object table: attribute bits, parent/child/sibling
/// links, property tables, and short names.
///
/// Objects are stored contiguously and addressed by raw 8-bit index; parent,
/// sibling and child are lookup relations, not owning pointers (§9).
///
/// Reference: section 12 of the Standards Document
/// http://inform-fiction.org/zmachine/standards/z1point1/sect12.html
pub struct ObjectTable {
    /// Address of the property-defaults table, as given by the header.
    base: ZAddress,
}

impl ObjectTable {
    pub fn new(base: ZAddress) -> Self {
        ObjectTable { base }
    }

    fn objects_base(&self) -> u16 {
        self.base.as_byte() as u16 + PROPERTY_DEFAULTS_COUNT * 2
    }

    fn entry_addr(&self, obj: u8) -> ZmResult<u16> {
        if obj == 0 {
            return Err(ZmError::NullObject);
        }
        Ok(self.objects_base() + (obj as u16 - 1) * OBJECT_ENTRY_SIZE)
    }

    /// The default value for property `n` (1..=31), used when an object
    /// does not define that property itself.
    pub fn property_default(&self, memory: &ZMemory, n: u8) -> ZmResult<u16> {
        memory.read_u16(Byte(self.base.as_byte() as u16 + 2 * (n as u16 - 1)))
    }

    pub fn get_parent(&self, memory: &ZMemory, obj: u8) -> ZmResult<u8> {
        memory.read_u8(Byte(self.entry_addr(obj)? + 4))
    }

    pub fn get_sibling(&self, memory: &ZMemory, obj: u8) -> ZmResult<u8> {
        memory.read_u8(Byte(self.entry_addr(obj)? + 5))
    }

    pub fn get_child(&self, memory: &ZMemory, obj: u8) -> ZmResult<u8> {
        memory.read_u8(Byte(self.entry_addr(obj)? + 6))
    }

    fn set_parent(&self, memory: &mut ZMemory, obj: u8, value: u8) -> ZmResult<()> {
        let addr = self.entry_addr(obj)? + 4;
        memory.write_u8(Byte(addr), value)
    }

    fn set_sibling(&self, memory: &mut ZMemory, obj: u8, value: u8) -> ZmResult<()> {
        let addr = self.entry_addr(obj)? + 5;
        memory.write_u8(Byte(addr), value)
    }

    fn set_child(&self, memory: &mut ZMemory, obj: u8, value: u8) -> ZmResult<()> {
        let addr = self.entry_addr(obj)? + 6;
        memory.write_u8(Byte(addr), value)
    }

    /// Test attribute `n` (0..=31); bit 0 is the MSB of the first byte.
    pub fn attr(&self, memory: &ZMemory, obj: u8, n: u8) -> ZmResult<bool> {
        let byte_addr = self.entry_addr(obj)? + (n as u16 / 8);
        let mask = 0x80 >> (n % 8);
        Ok(memory.read_u8(Byte(byte_addr))? & mask != 0)
    }

    pub fn set_attr(&self, memory: &mut ZMemory, obj: u8, n: u8) -> ZmResult<()> {
        self.write_attr(memory, obj, n, true)
    }

    pub fn clear_attr(&self, memory: &mut ZMemory, obj: u8, n: u8) -> ZmResult<()> {
        self.write_attr(memory, obj, n, false)
    }

    fn write_attr(&self, memory: &mut ZMemory, obj: u8, n: u8, set: bool) -> ZmResult<()> {
        let byte_addr = self.entry_addr(obj)? + (n as u16 / 8);
        let mask = 0x80 >> (n % 8);
        let byte = memory.read_u8(Byte(byte_addr))?;
        let new_byte = if set { byte | mask } else { byte & !mask };
        memory.write_u8(Byte(byte_addr), new_byte)
    }

    /// Byte address of the object's property table (the field stored at
    /// entry offset 7-8, not to be confused with `get_prop_addr`).
    pub fn property_table_addr(&self, memory: &ZMemory, obj: u8) -> ZmResult<u16> {
        memory.read_u16(Byte(self.entry_addr(obj)? + 7))
    }

    /// Byte address of the first property entry, immediately after the
    /// ZSCII short name header.
    fn properties_start(&self, memory: &ZMemory, obj: u8) -> ZmResult<u16> {
        let table_addr = self.property_table_addr(memory, obj)?;
        let text_length_words = memory.read_u8(Byte(table_addr))? as u16;
        Ok(table_addr + 1 + 2 * text_length_words)
    }

    pub fn short_name(
        &self,
        memory: &ZMemory,
        obj: u8,
        abbreviations_base: ZAddress,
    ) -> ZmResult<String> {
        let table_addr = self.property_table_addr(memory, obj)?;
        let text_length_words = memory.read_u8(Byte(table_addr))?;
        if text_length_words == 0 {
            return Ok(String::new());
        }
        let (text, _) = zscii::decode_string(memory, Byte(table_addr + 1), abbreviations_base)?;
        Ok(text)
    }

    /// Byte address of property `n`'s data, or 0 if the object does not
    /// define it. Properties are stored in strictly descending order of
    /// number and terminated by a zero size byte.
    pub fn get_prop_addr(&self, memory: &ZMemory, obj: u8, n: u8) -> ZmResult<u16> {
        let mut addr = self.properties_start(memory, obj)?;
        loop {
            let size_byte = memory.read_u8(Byte(addr))?;
            if size_byte == 0 {
                return Ok(0);
            }
            let number = size_byte & 0x1F;
            let size = (size_byte >> 5) + 1;
            if number == n {
                return Ok(addr + 1);
            }
            if number < n {
                // descending order: once we've passed n, it isn't present
                return Ok(0);
            }
            addr += 1 + size as u16;
        }
    }

    /// Size in bytes of the property whose data starts at `prop_addr`.
    /// `get_prop_len(0) == 0` is a documented special case.
    pub fn get_prop_len(&self, memory: &ZMemory, prop_addr: u16) -> ZmResult<u8> {
        if prop_addr == 0 {
            return Ok(0);
        }
        let size_byte = memory.read_u8(Byte(prop_addr - 1))?;
        Ok((size_byte >> 5) + 1)
    }

    /// Property value: the byte zero-extended if size 1, the big-endian
    /// word if size 2. Sizes greater than 2 are undefined for `get_prop` in
    /// v3; this returns the first two bytes as a word. Falls back to the
    /// property default when the object does not define `n`.
    pub fn get_prop(&self, memory: &ZMemory, obj: u8, n: u8) -> ZmResult<u16> {
        let addr = self.get_prop_addr(memory, obj, n)?;
        if addr == 0 {
            return self.property_default(memory, n);
        }
        match self.get_prop_len(memory, addr)? {
            1 => Ok(memory.read_u8(Byte(addr))? as u16),
            _ => memory.read_u16(Byte(addr)),
        }
    }

    /// The property number that follows `n` in the table, or 0 if `n` was
    /// the last property. `n == 0` returns the first property number (0 if
    /// the object defines none).
    pub fn get_next_prop(&self, memory: &ZMemory, obj: u8, n: u8) -> ZmResult<u8> {
        let mut addr = self.properties_start(memory, obj)?;
        if n == 0 {
            let size_byte = memory.read_u8(Byte(addr))?;
            return Ok(size_byte & 0x1F);
        }
        loop {
            let size_byte = memory.read_u8(Byte(addr))?;
            if size_byte == 0 {
                return Err(ZmError::NoProp(obj, n));
            }
            let number = size_byte & 0x1F;
            let size = (size_byte >> 5) + 1;
            addr += 1 + size as u16;
            if number == n {
                return Ok(memory.read_u8(Byte(addr))? & 0x1F);
            }
        }
    }

    /// Overwrite an existing property. The property must already exist
    /// (`FaultNoProp`), and must have size 1 or 2 (`FaultPropSize`).
    pub fn put_prop(&self, memory: &mut ZMemory, obj: u8, n: u8, value: u16) -> ZmResult<()> {
        let addr = self.get_prop_addr(memory, obj, n)?;
        if addr == 0 {
            return Err(ZmError::NoProp(obj, n));
        }
        match self.get_prop_len(memory, addr)? {
            1 => memory.write_u8(Byte(addr), value as u8),
            2 => memory.write_u16(Byte(addr), value),
            size => Err(ZmError::PropSize {
                object: obj,
                property: n,
                size,
            }),
        }
    }

    /// Detach `obj` from its current parent's child chain, if any, fixing
    /// up sibling links so the rest of the forest stays intact.
    fn detach(&self, memory: &mut ZMemory, obj: u8) -> ZmResult<()> {
        let parent = self.get_parent(memory, obj)?;
        if parent == 0 {
            return Ok(());
        }
        let sibling = self.get_sibling(memory, obj)?;
        let first_child = self.get_child(memory, parent)?;
        if first_child == obj {
            self.set_child(memory, parent, sibling)?;
        } else {
            let mut cursor = first_child;
            loop {
                if cursor == 0 {
                    break;
                }
                let next = self.get_sibling(memory, cursor)?;
                if next == obj {
                    self.set_sibling(memory, cursor, sibling)?;
                    break;
                }
                cursor = next;
            }
        }
        self.set_parent(memory, obj, 0)
    }

    /// Move `obj` to become the first child of `dest`. `dest == 0` is
    /// disallowed (`FaultNullObject`) rather than treated as "make orphan"
    /// (use `remove_obj` for that).
    pub fn insert_obj(&self, memory: &mut ZMemory, obj: u8, dest: u8) -> ZmResult<()> {
        if dest == 0 {
            return Err(ZmError::NullObject);
        }
        self.detach(memory, obj)?;
        let previous_first_child = self.get_child(memory, dest)?;
        self.set_sibling(memory, obj, previous_first_child)?;
        self.set_child(memory, dest, obj)?;
        self.set_parent(memory, obj, dest)
    }

    /// Detach `obj` from its parent, leaving it parentless. Its own subtree
    /// is left untouched.
    pub fn remove_obj(&self, memory: &mut ZMemory, obj: u8) -> ZmResult<()> {
        self.detach(memory, obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lay out a minimal object table: property defaults (31 words of 0),
    /// then `count` object entries, each with an empty (zero-length name,
    /// no properties) property table placed right after the entries.
    fn build_table(count: u8) -> (ObjectTable, ZMemory) {
        let base_addr: u16 = 0x40;
        let mut buf = vec![0u8; base_addr as usize];
        buf.extend(std::iter::repeat(0u8).take(PROPERTY_DEFAULTS_COUNT as usize * 2));
        let entries_start = buf.len() as u16;
        buf.extend(std::iter::repeat(0u8).take(count as usize * OBJECT_ENTRY_SIZE as usize));
        let prop_table_addr = buf.len() as u16;
        buf.push(0); // zero-length short name
        buf.push(0); // terminating size byte (no properties)

        for i in 0..count {
            let entry_addr = (entries_start + i as u16 * OBJECT_ENTRY_SIZE) as usize;
            buf[entry_addr + 7] = (prop_table_addr >> 8) as u8;
            buf[entry_addr + 8] = (prop_table_addr & 0xFF) as u8;
        }

        let memory = ZMemory::from_bytes(buf);
        (ObjectTable::new(Byte(base_addr)), memory)
    }

    #[test]
    fn attribute_bit_zero_is_msb_of_first_byte() {
        let (table, mut memory) = build_table(1);
        assert!(!table.attr(&memory, 1, 0).unwrap());
        table.set_attr(&mut memory, 1, 0).unwrap();
        let entry_addr = table.entry_addr(1).unwrap();
        assert_eq!(memory.read_u8(Byte(entry_addr)).unwrap(), 0x80);
        assert!(table.attr(&memory, 1, 0).unwrap());
        table.clear_attr(&mut memory, 1, 0).unwrap();
        assert!(!table.attr(&memory, 1, 0).unwrap());
    }

    #[test]
    fn insert_obj_rewires_child_chain_as_in_spec_scenario() {
        // Object 5 has parent 2 and sibling 7 (first child of 2, i.e. obj
        // 2's child == 5). insert_obj(5, 3) must leave obj 5's parent = 3,
        // its sibling = (previous child of 3, here 0), and obj 2's child
        // becomes 7 (scenario 3 in the spec's testable properties).
        let (table, mut memory) = build_table(7);
        table.set_parent(&mut memory, 5, 2).unwrap();
        table.set_sibling(&mut memory, 5, 7).unwrap();
        table.set_child(&mut memory, 2, 5).unwrap();

        table.insert_obj(&mut memory, 5, 3).unwrap();

        assert_eq!(table.get_parent(&memory, 5).unwrap(), 3);
        assert_eq!(table.get_sibling(&memory, 5).unwrap(), 0);
        assert_eq!(table.get_child(&memory, 3).unwrap(), 5);
        assert_eq!(table.get_child(&memory, 2).unwrap(), 7);
    }

    #[test]
    fn insert_obj_into_null_object_faults() {
        let (table, mut memory) = build_table(2);
        assert!(matches!(
            table.insert_obj(&mut memory, 1, 0),
            Err(ZmError::NullObject)
        ));
    }

    #[test]
    fn get_prop_len_of_zero_is_zero() {
        let (table, memory) = build_table(1);
        assert_eq!(table.get_prop_len(&memory, 0).unwrap(), 0);
    }

    #[test]
    fn missing_property_returns_default() {
        let (table, mut memory) = build_table(1);
        memory
            .write_u16_internal(Byte(0x40 + 2 * (3 - 1)), 0xBEEF)
            .unwrap();
        assert_eq!(table.get_prop(&memory, 1, 3).unwrap(), 0xBEEF);
    }

    #[test]
    fn put_prop_on_missing_property_faults() {
        let (table, mut memory) = build_table(1);
        assert!(matches!(
            table.put_prop(&mut memory, 1, 5, 1),
            Err(ZmError::NoProp(1, 5))
        ));
    }

    #[test]
    fn properties_round_trip_size_one_and_two() {
        let base_addr: u16 = 0x40;
        let mut buf = vec![0u8; base_addr as usize];
        buf.extend(std::iter::repeat(0u8).take(PROPERTY_DEFAULTS_COUNT as usize * 2));
        let entries_start = buf.len() as u16;
        buf.extend(std::iter::repeat(0u8).take(OBJECT_ENTRY_SIZE as usize));
        let prop_table_addr = buf.len() as u16;
        buf.push(0); // zero-length short name
        // property 5, size 2 (SB = 32*(2-1)|5 = 37)
        buf.push(32 | 5);
        buf.push(0x01);
        buf.push(0x02);
        // property 2, size 1 (SB = 32*(1-1)|2 = 2)
        buf.push(2);
        buf.push(0x09);
        buf.push(0); // terminator

        buf[entries_start as usize + 7] = (prop_table_addr >> 8) as u8;
        buf[entries_start as usize + 8] = (prop_table_addr & 0xFF) as u8;

        let mut memory = ZMemory::from_bytes(buf);
        let table = ObjectTable::new(Byte(base_addr));

        assert_eq!(table.get_prop(&memory, 1, 5).unwrap(), 0x0102);
        assert_eq!(table.get_prop(&memory, 1, 2).unwrap(), 0x09);
        assert_eq!(table.get_next_prop(&memory, 1, 0).unwrap(), 5);
        assert_eq!(table.get_next_prop(&memory, 1, 5).unwrap(), 2);
        assert_eq!(table.get_next_prop(&memory, 1, 2).unwrap(), 0);

        table.put_prop(&mut memory, 1, 2, 0x42).unwrap();
        assert_eq!(table.get_prop(&memory, 1, 2).unwrap(), 0x42);

        assert!(matches!(
            table.put_prop(&mut memory, 1, 5, 0x0102_0304 as u16),
            Ok(())
        ));
    }
}
