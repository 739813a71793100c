use crate::core::error::{Error, Result};
use crate::core::types::FieldId;
use crate::directory::DirectoryInput;

/// Per-field flags recorded in `.fdi`, packed into one byte. Only `INDEXED`
/// is load-bearing today; `STORES_POSITIONS` is carried so a future
/// position-free field kind does not need a format break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldFlags(u8);

impl FieldFlags {
    pub const INDEXED: FieldFlags = FieldFlags(0b0000_0001);
    pub const STORES_POSITIONS: FieldFlags = FieldFlags(0b0000_0010);
    pub const EMPTY: FieldFlags = FieldFlags(0);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u8) -> Self {
        FieldFlags(bits & (Self::INDEXED.0 | Self::STORES_POSITIONS.0))
    }

    pub const fn contains(self, other: FieldFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for FieldFlags {
    type Output = FieldFlags;
    fn bitor(self, rhs: FieldFlags) -> FieldFlags {
        FieldFlags(self.0 | rhs.0)
    }
}

/// One field's descriptor in `.fdi`: identity plus where its term
/// dictionary segment ends in the barrel's `.voc` file (§6 `B.fdi`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub id: FieldId,
    pub name: String,
    pub flags: FieldFlags,
    pub voc_offset: u64,
}

/// `B.fdi`: count, then per field `{id, name, flags, voc_offset}` (§6).
#[derive(Debug, Clone, Default)]
pub struct FieldInfo {
    fields: Vec<FieldDescriptor>,
}

impl FieldInfo {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        FieldInfo { fields }
    }

    pub fn get(&self, id: FieldId) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Trailing `crc32fast` checksum over the body bytes (§7 "checksum
    /// mismatch if enabled"): `.fdi` is small and read once per barrel open,
    /// so it is the cheapest place in the on-disk layout to catch a
    /// truncated or bit-flipped file before the rest of the barrel is even
    /// touched.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.fields.len() as u32).to_le_bytes());
        for f in &self.fields {
            out.extend_from_slice(&(f.id.0 as u32).to_le_bytes());
            let name_bytes = f.name.as_bytes();
            out.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(name_bytes);
            out.push(f.flags.bits());
            out.extend_from_slice(&f.voc_offset.to_le_bytes());
        }
        let checksum = crc32fast::hash(&out);
        out.extend_from_slice(&checksum.to_le_bytes());
        out
    }

    pub fn decode(input: &dyn DirectoryInput) -> Result<Self> {
        let mut bytes = input.read_all()?;
        let checksum_at = bytes
            .len()
            .checked_sub(4)
            .ok_or_else(|| Error::corruption("field info shorter than its checksum"))?;
        let expected = u32::from_le_bytes(bytes[checksum_at..].try_into().unwrap());
        bytes.truncate(checksum_at);
        let actual = crc32fast::hash(&bytes);
        if actual != expected {
            return Err(Error::corruption(format!(
                "field info checksum mismatch: expected {expected:#x}, got {actual:#x}"
            )));
        }

        let mut pos = 0usize;
        let read_u32 = |bytes: &[u8], pos: &mut usize| -> Result<u32> {
            let end = *pos + 4;
            let v = bytes
                .get(*pos..end)
                .ok_or_else(|| Error::corruption("truncated field info"))?;
            *pos = end;
            Ok(u32::from_le_bytes(v.try_into().unwrap()))
        };
        let read_u64 = |bytes: &[u8], pos: &mut usize| -> Result<u64> {
            let end = *pos + 8;
            let v = bytes
                .get(*pos..end)
                .ok_or_else(|| Error::corruption("truncated field info"))?;
            *pos = end;
            Ok(u64::from_le_bytes(v.try_into().unwrap()))
        };

        let count = read_u32(&bytes, &mut pos)?;
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = read_u32(&bytes, &mut pos)? as u16;
            let name_len = read_u32(&bytes, &mut pos)? as usize;
            let name_bytes = bytes
                .get(pos..pos + name_len)
                .ok_or_else(|| Error::corruption("truncated field info"))?;
            let name = String::from_utf8(name_bytes.to_vec())
                .map_err(|_| Error::corruption("field name is not valid utf-8"))?;
            pos += name_len;
            let flags_byte = *bytes.get(pos).ok_or_else(|| Error::corruption("truncated field info"))?;
            pos += 1;
            let flags = FieldFlags::from_bits_truncate(flags_byte);
            let voc_offset = read_u64(&bytes, &mut pos)?;
            fields.push(FieldDescriptor { id: FieldId(id), name, flags, voc_offset });
        }
        Ok(FieldInfo { fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::memory::MemoryDirectory;
    use crate::directory::Directory;

    #[test]
    fn round_trips_field_descriptors() {
        let info = FieldInfo::new(vec![
            FieldDescriptor { id: FieldId(0), name: "title".into(), flags: FieldFlags::INDEXED, voc_offset: 128 },
            FieldDescriptor {
                id: FieldId(1),
                name: "body".into(),
                flags: FieldFlags::INDEXED | FieldFlags::STORES_POSITIONS,
                voc_offset: 4096,
            },
        ]);
        let dir = MemoryDirectory::new();
        {
            let mut out = dir.open_output("b.fdi").unwrap();
            out.write_all(&info.encode()).unwrap();
            out.sync().unwrap();
        }
        let loaded = FieldInfo::decode(dir.open_input("b.fdi").unwrap().as_ref()).unwrap();
        assert_eq!(loaded.get(FieldId(1)).unwrap().name, "body");
        assert_eq!(loaded.iter().count(), 2);
    }
}
