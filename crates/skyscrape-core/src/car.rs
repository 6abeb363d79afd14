//! CARv1 block bundle decoding.
//!
//! Commit events carry their records as a CAR (Content Addressable aRchive)
//! byte string. The layout is:
//!
//! ```text
//! [varint header_len][DAG-CBOR header {version: 1, roots: [CID, ...]}]
//! [varint section_len][CID bytes][block bytes]
//! [varint section_len][CID bytes][block bytes]
//! ...
//! ```
//!
//! [`BlockBundle::decode`] parses the container and converts every DAG-CBOR
//! block into a `serde_json::Value` record (see [`crate::cbor`]). Blocks are
//! kept in bundle order.
//!
//! [`CarBuilder`] is the inverse and is used to build fixtures.

use crate::cbor;
use crate::error::{Error, Result};
use ciborium::Value;
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use serde_json::Value as JsonValue;
use std::io::Cursor;

/// Multicodec code for DAG-CBOR.
pub const DAG_CBOR_CODEC: u64 = 0x71;

/// Upper bound on a single varint-prefixed length, to reject garbage early.
const MAX_SECTION_LEN: u64 = 16 * 1024 * 1024;

/// A single decoded block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Content identifier of the block.
    pub cid: Cid,
    /// The block's record in the AT Protocol JSON data model.
    pub record: JsonValue,
}

/// The decoded contents of a CAR byte string.
#[derive(Debug, Clone, Default)]
pub struct BlockBundle {
    roots: Vec<Cid>,
    blocks: Vec<Block>,
}

impl BlockBundle {
    /// Decode a CARv1 byte string.
    ///
    /// # Errors
    ///
    /// Returns an error if the header, any section, any CID or any DAG-CBOR
    /// block is malformed.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut rest = bytes;

        let header_bytes = take_section(&mut rest, "header")?;
        let roots = decode_header(header_bytes)?;

        let mut blocks = Vec::new();
        while !rest.is_empty() {
            let section = take_section(&mut rest, "block section")?;
            blocks.push(decode_block(section)?);
        }

        Ok(Self { roots, blocks })
    }

    /// Root CIDs declared in the header.
    pub fn roots(&self) -> &[Cid] {
        &self.roots
    }

    /// Number of blocks in the bundle.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the bundle has no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Look up a block's record by CID.
    pub fn get(&self, cid: &Cid) -> Option<&JsonValue> {
        self.blocks
            .iter()
            .find(|block| &block.cid == cid)
            .map(|block| &block.record)
    }

    /// Iterate blocks in bundle order.
    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }
}

impl<'a> IntoIterator for &'a BlockBundle {
    type Item = &'a Block;
    type IntoIter = std::slice::Iter<'a, Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}

fn decode_header(bytes: &[u8]) -> Result<Vec<Cid>> {
    let header = cbor::decode_value(bytes)?;
    let map = cbor::as_map(&header, "CAR header")?;

    match cbor::get_int(map, "version") {
        Some(1) => {}
        Some(v) => return Err(Error::Car(format!("unsupported CAR version {v}"))),
        None => return Err(Error::Car("CAR header is missing version".to_string())),
    }

    let roots = match cbor::get(map, "roots") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Tag(cbor::CID_TAG, payload) => cbor::cid_from_link(payload),
                _ => Err(Error::Car("CAR root is not a CID link".to_string())),
            })
            .collect::<Result<Vec<_>>>()?,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err(Error::Car("CAR roots is not an array".to_string())),
    };

    Ok(roots)
}

fn decode_block(section: &[u8]) -> Result<Block> {
    let mut cursor = Cursor::new(section);
    let cid = Cid::read_bytes(&mut cursor)?;
    let data = &section[cursor.position() as usize..];

    let record = if cid.codec() == DAG_CBOR_CODEC {
        cbor::to_json(&cbor::decode_value(data)?)?
    } else {
        cbor::bytes_object(data)
    };

    Ok(Block { cid, record })
}

/// Split one varint-length-prefixed section off the front of `rest`.
fn take_section<'a>(rest: &mut &'a [u8], what: &str) -> Result<&'a [u8]> {
    let len = read_varint(rest).ok_or_else(|| Error::Car(format!("truncated {what} length")))?;
    if len == 0 || len > MAX_SECTION_LEN {
        return Err(Error::Car(format!("invalid {what} length {len}")));
    }
    let len = len as usize;
    if rest.len() < len {
        return Err(Error::Car(format!(
            "truncated {what}: need {len} bytes, have {}",
            rest.len()
        )));
    }
    let (section, tail) = rest.split_at(len);
    *rest = tail;
    Ok(section)
}

/// Read an unsigned LEB128 varint, advancing `rest`. Returns `None` if the
/// input ends mid-varint or the value overflows 64 bits.
fn read_varint(rest: &mut &[u8]) -> Option<u64> {
    let mut value = 0u64;
    for (i, byte) in rest.iter().enumerate().take(10) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            *rest = &rest[i + 1..];
            return Some(value);
        }
    }
    None
}

fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Builds CARv1 byte strings from records.
///
/// Records are encoded as DAG-CBOR and addressed with sha2-256 CIDv1s.
#[derive(Debug, Default)]
pub struct CarBuilder {
    roots: Vec<Cid>,
    sections: Vec<(Cid, Vec<u8>)>,
}

impl CarBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a record as a DAG-CBOR block and append it. Returns its CID.
    pub fn add_record<T: serde::Serialize + ?Sized>(&mut self, record: &T) -> Result<Cid> {
        let data = cbor::encode(record)?;
        let cid = Cid::new_v1(DAG_CBOR_CODEC, Code::Sha2_256.digest(&data));
        self.sections.push((cid, data));
        Ok(cid)
    }

    /// Append a block with a caller-chosen CID and raw bytes.
    pub fn add_raw(&mut self, cid: Cid, data: Vec<u8>) {
        self.sections.push((cid, data));
    }

    /// Declare a root CID.
    pub fn root(&mut self, cid: Cid) -> &mut Self {
        self.roots.push(cid);
        self
    }

    /// Serialize the bundle.
    pub fn build(&self) -> Result<Vec<u8>> {
        let header = Value::Map(vec![
            (
                Value::Text("roots".to_string()),
                Value::Array(self.roots.iter().map(cbor::link_value).collect()),
            ),
            (Value::Text("version".to_string()), Value::Integer(1.into())),
        ]);
        let header_bytes = cbor::encode(&header)?;

        let mut out = Vec::new();
        write_varint(header_bytes.len() as u64, &mut out);
        out.extend_from_slice(&header_bytes);

        for (cid, data) in &self.sections {
            let cid_bytes = cid.to_bytes();
            write_varint((cid_bytes.len() + data.len()) as u64, &mut out);
            out.extend_from_slice(&cid_bytes);
            out.extend_from_slice(data);
        }

        Ok(out)
    }
}
