//! Binary encode/decode for `Changeset`. A length-prefixed, tag-byte
//! format in the same style as `column.rs`'s mixed-value encoding:
//! every variable-length field carries its own length prefix so
//! `parse_changeset` never has to guess where one ends.

use super::{Changeset, GlobalKey, Instruction, Payload, PrimaryKeySelector};
use crate::error::ChangesetError;

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, b: &[u8]) {
    buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
    buf.extend_from_slice(b);
}

fn put_selector(buf: &mut Vec<u8>, sel: &PrimaryKeySelector) {
    match sel {
        PrimaryKeySelector::RowIndex(i) => {
            buf.push(0);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        PrimaryKeySelector::Global(g) => {
            buf.push(1);
            buf.extend_from_slice(&g.peer_ident_hi.to_le_bytes());
            buf.extend_from_slice(&g.sequence_lo.to_le_bytes());
        }
    }
}

mod payload_tag {
    pub const NULL: u8 = 0;
    pub const INT: u8 = 1;
    pub const BOOL: u8 = 2;
    pub const FLOAT: u8 = 3;
    pub const DOUBLE: u8 = 4;
    pub const STRING: u8 = 5;
    pub const BINARY: u8 = 6;
    pub const LINK: u8 = 7;
}

fn put_payload(buf: &mut Vec<u8>, p: &Payload) {
    match p {
        Payload::Null => buf.push(payload_tag::NULL),
        Payload::Int(i) => {
            buf.push(payload_tag::INT);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Payload::Bool(b) => {
            buf.push(payload_tag::BOOL);
            buf.push(*b as u8);
        }
        Payload::Float(f) => {
            buf.push(payload_tag::FLOAT);
            buf.extend_from_slice(&f.to_le_bytes());
        }
        Payload::Double(d) => {
            buf.push(payload_tag::DOUBLE);
            buf.extend_from_slice(&d.to_le_bytes());
        }
        Payload::String(s) => {
            buf.push(payload_tag::STRING);
            put_str(buf, s);
        }
        Payload::Binary(b) => {
            buf.push(payload_tag::BINARY);
            put_bytes(buf, b);
        }
        Payload::Link { table, key } => {
            buf.push(payload_tag::LINK);
            put_str(buf, table);
            put_selector(buf, key);
        }
    }
}

mod ins_tag {
    pub const ADD_TABLE: u8 = 0;
    pub const ERASE_TABLE: u8 = 1;
    pub const ADD_COLUMN: u8 = 2;
    pub const ERASE_COLUMN: u8 = 3;
    pub const CREATE_OBJECT: u8 = 4;
    pub const UPDATE_OBJECT: u8 = 5;
    pub const ERASE_OBJECT: u8 = 6;
    pub const ARRAY_INSERT: u8 = 7;
    pub const ARRAY_SET: u8 = 8;
    pub const ARRAY_ERASE: u8 = 9;
    pub const SET_INSERT: u8 = 10;
    pub const SET_ERASE: u8 = 11;
    pub const DICT_INSERT: u8 = 12;
    pub const DICT_UPDATE: u8 = 13;
    pub const DICT_ERASE: u8 = 14;
}

fn put_instruction(buf: &mut Vec<u8>, ins: &Instruction) {
    match ins {
        Instruction::AddTable { table } => {
            buf.push(ins_tag::ADD_TABLE);
            put_str(buf, table);
        }
        Instruction::EraseTable { table } => {
            buf.push(ins_tag::ERASE_TABLE);
            put_str(buf, table);
        }
        Instruction::AddColumn { table, column } => {
            buf.push(ins_tag::ADD_COLUMN);
            put_str(buf, table);
            put_str(buf, column);
        }
        Instruction::EraseColumn { table, column } => {
            buf.push(ins_tag::ERASE_COLUMN);
            put_str(buf, table);
            put_str(buf, column);
        }
        Instruction::CreateObject { table, key } => {
            buf.push(ins_tag::CREATE_OBJECT);
            put_str(buf, table);
            put_selector(buf, key);
        }
        Instruction::UpdateObject { table, key, column, value } => {
            buf.push(ins_tag::UPDATE_OBJECT);
            put_str(buf, table);
            put_selector(buf, key);
            put_str(buf, column);
            put_payload(buf, value);
        }
        Instruction::EraseObject { table, key } => {
            buf.push(ins_tag::ERASE_OBJECT);
            put_str(buf, table);
            put_selector(buf, key);
        }
        Instruction::ArrayInsert { table, key, column, index, value } => {
            buf.push(ins_tag::ARRAY_INSERT);
            put_str(buf, table);
            put_selector(buf, key);
            put_str(buf, column);
            buf.extend_from_slice(&index.to_le_bytes());
            put_payload(buf, value);
        }
        Instruction::ArraySet { table, key, column, index, value } => {
            buf.push(ins_tag::ARRAY_SET);
            put_str(buf, table);
            put_selector(buf, key);
            put_str(buf, column);
            buf.extend_from_slice(&index.to_le_bytes());
            put_payload(buf, value);
        }
        Instruction::ArrayErase { table, key, column, index } => {
            buf.push(ins_tag::ARRAY_ERASE);
            put_str(buf, table);
            put_selector(buf, key);
            put_str(buf, column);
            buf.extend_from_slice(&index.to_le_bytes());
        }
        Instruction::SetInsert { table, key, column, value } => {
            buf.push(ins_tag::SET_INSERT);
            put_str(buf, table);
            put_selector(buf, key);
            put_str(buf, column);
            put_payload(buf, value);
        }
        Instruction::SetErase { table, key, column, value } => {
            buf.push(ins_tag::SET_ERASE);
            put_str(buf, table);
            put_selector(buf, key);
            put_str(buf, column);
            put_payload(buf, value);
        }
        Instruction::DictInsert { table, key, column, dict_key, value } => {
            buf.push(ins_tag::DICT_INSERT);
            put_str(buf, table);
            put_selector(buf, key);
            put_str(buf, column);
            put_str(buf, dict_key);
            put_payload(buf, value);
        }
        Instruction::DictUpdate { table, key, column, dict_key, value } => {
            buf.push(ins_tag::DICT_UPDATE);
            put_str(buf, table);
            put_selector(buf, key);
            put_str(buf, column);
            put_str(buf, dict_key);
            put_payload(buf, value);
        }
        Instruction::DictErase { table, key, column, dict_key } => {
            buf.push(ins_tag::DICT_ERASE);
            put_str(buf, table);
            put_selector(buf, key);
            put_str(buf, column);
            put_str(buf, dict_key);
        }
    }
}

/// Encodes `cs` onto the end of `buf`.
pub fn encode_changeset(cs: &Changeset, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&cs.origin_file_ident.to_le_bytes());
    buf.extend_from_slice(&(cs.instructions.len() as u32).to_le_bytes());
    for ins in &cs.instructions {
        put_instruction(buf, ins);
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn bad(msg: &str) -> ChangesetError {
        ChangesetError::BadChangeset(msg.to_string())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ChangesetError> {
        if self.pos + n > self.bytes.len() {
            return Err(Self::bad("truncated changeset"));
        }
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, ChangesetError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, ChangesetError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, ChangesetError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64, ChangesetError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32, ChangesetError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64, ChangesetError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String, ChangesetError> {
        let len = self.u32()? as usize;
        String::from_utf8(self.take(len)?.to_vec()).map_err(|_| Self::bad("invalid utf-8 in string field"))
    }

    fn bytes(&mut self) -> Result<Vec<u8>, ChangesetError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn selector(&mut self) -> Result<PrimaryKeySelector, ChangesetError> {
        Ok(match self.u8()? {
            0 => PrimaryKeySelector::RowIndex(self.u64()?),
            1 => {
                let peer_ident_hi = self.u64()?;
                let sequence_lo = self.u64()?;
                PrimaryKeySelector::Global(GlobalKey { peer_ident_hi, sequence_lo })
            }
            other => return Err(Self::bad(&format!("bad selector tag {other}"))),
        })
    }

    fn payload(&mut self) -> Result<Payload, ChangesetError> {
        Ok(match self.u8()? {
            payload_tag::NULL => Payload::Null,
            payload_tag::INT => Payload::Int(self.i64()?),
            payload_tag::BOOL => Payload::Bool(self.u8()? != 0),
            payload_tag::FLOAT => Payload::Float(self.f32()?),
            payload_tag::DOUBLE => Payload::Double(self.f64()?),
            payload_tag::STRING => Payload::String(self.string()?),
            payload_tag::BINARY => Payload::Binary(self.bytes()?),
            payload_tag::LINK => {
                let table = self.string()?;
                let key = self.selector()?;
                Payload::Link { table, key }
            }
            other => return Err(Self::bad(&format!("bad payload tag {other}"))),
        })
    }

    fn instruction(&mut self) -> Result<Instruction, ChangesetError> {
        Ok(match self.u8()? {
            ins_tag::ADD_TABLE => Instruction::AddTable { table: self.string()? },
            ins_tag::ERASE_TABLE => Instruction::EraseTable { table: self.string()? },
            ins_tag::ADD_COLUMN => Instruction::AddColumn { table: self.string()?, column: self.string()? },
            ins_tag::ERASE_COLUMN => Instruction::EraseColumn { table: self.string()?, column: self.string()? },
            ins_tag::CREATE_OBJECT => {
                let table = self.string()?;
                let key = self.selector()?;
                Instruction::CreateObject { table, key }
            }
            ins_tag::UPDATE_OBJECT => {
                let table = self.string()?;
                let key = self.selector()?;
                let column = self.string()?;
                let value = self.payload()?;
                Instruction::UpdateObject { table, key, column, value }
            }
            ins_tag::ERASE_OBJECT => {
                let table = self.string()?;
                let key = self.selector()?;
                Instruction::EraseObject { table, key }
            }
            ins_tag::ARRAY_INSERT => {
                let table = self.string()?;
                let key = self.selector()?;
                let column = self.string()?;
                let index = self.u64()?;
                let value = self.payload()?;
                Instruction::ArrayInsert { table, key, column, index, value }
            }
            ins_tag::ARRAY_SET => {
                let table = self.string()?;
                let key = self.selector()?;
                let column = self.string()?;
                let index = self.u64()?;
                let value = self.payload()?;
                Instruction::ArraySet { table, key, column, index, value }
            }
            ins_tag::ARRAY_ERASE => {
                let table = self.string()?;
                let key = self.selector()?;
                let column = self.string()?;
                let index = self.u64()?;
                Instruction::ArrayErase { table, key, column, index }
            }
            ins_tag::SET_INSERT => {
                let table = self.string()?;
                let key = self.selector()?;
                let column = self.string()?;
                let value = self.payload()?;
                Instruction::SetInsert { table, key, column, value }
            }
            ins_tag::SET_ERASE => {
                let table = self.string()?;
                let key = self.selector()?;
                let column = self.string()?;
                let value = self.payload()?;
                Instruction::SetErase { table, key, column, value }
            }
            ins_tag::DICT_INSERT => {
                let table = self.string()?;
                let key = self.selector()?;
                let column = self.string()?;
                let dict_key = self.string()?;
                let value = self.payload()?;
                Instruction::DictInsert { table, key, column, dict_key, value }
            }
            ins_tag::DICT_UPDATE => {
                let table = self.string()?;
                let key = self.selector()?;
                let column = self.string()?;
                let dict_key = self.string()?;
                let value = self.payload()?;
                Instruction::DictUpdate { table, key, column, dict_key, value }
            }
            ins_tag::DICT_ERASE => {
                let table = self.string()?;
                let key = self.selector()?;
                let column = self.string()?;
                let dict_key = self.string()?;
                Instruction::DictErase { table, key, column, dict_key }
            }
            other => return Err(Self::bad(&format!("bad instruction tag {other}"))),
        })
    }
}

/// Parses one `Changeset` from the front of `bytes`. Unlike
/// `column.rs`'s blob decoders, a changeset is always the entire
/// buffer (one changeset per sync-history entry), so there's no
/// trailing-bytes check to perform.
pub fn parse_changeset(bytes: &[u8]) -> Result<Changeset, ChangesetError> {
    let mut c = Cursor { bytes, pos: 0 };
    let origin_file_ident = c.u64()?;
    let count = c.u32()? as usize;
    let mut instructions = Vec::with_capacity(count);
    for _ in 0..count {
        instructions.push(c.instruction()?);
    }
    Ok(Changeset { origin_file_ident, instructions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::PrimaryKeySelector;

    #[test]
    fn round_trips_a_mixed_instruction_changeset() {
        let mut cs = Changeset::new(7);
        cs.instructions.push(Instruction::AddTable { table: "Person".into() });
        cs.instructions.push(Instruction::CreateObject {
            table: "Person".into(),
            key: PrimaryKeySelector::Global(GlobalKey { peer_ident_hi: 7, sequence_lo: 1 }),
        });
        cs.instructions.push(Instruction::UpdateObject {
            table: "Person".into(),
            key: PrimaryKeySelector::RowIndex(0),
            column: "name".into(),
            value: Payload::String("Ada".into()),
        });
        cs.instructions.push(Instruction::ArrayInsert {
            table: "Person".into(),
            key: PrimaryKeySelector::RowIndex(0),
            column: "tags".into(),
            index: 0,
            value: Payload::Link { table: "Tag".into(), key: PrimaryKeySelector::RowIndex(2) },
        });

        let mut buf = Vec::new();
        encode_changeset(&cs, &mut buf);
        let parsed = parse_changeset(&buf).unwrap();
        assert_eq!(parsed, cs);
    }

    #[test]
    fn truncated_buffer_is_a_bad_changeset_error() {
        let mut cs = Changeset::new(1);
        cs.instructions.push(Instruction::AddTable { table: "T".into() });
        let mut buf = Vec::new();
        encode_changeset(&cs, &mut buf);
        buf.truncate(buf.len() - 2);
        assert!(parse_changeset(&buf).is_err());
    }
}
