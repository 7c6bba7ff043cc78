//! Long File Name entries: each one packs 13 UTF-16 code units and a
//! sequence number, chained in reverse order on disk (the last logical
//! part is written first, immediately before the short entry it belongs
//! to), and cross-checked against the short entry's checksum.

use alloc::string::String;
use alloc::vec::Vec;

use crate::codec::{read_u16, write_u16};
use crate::dir_entry::LFN_ATTR;

pub const CHARS_PER_SLOT: usize = 13;
pub const LAST_LOGICAL_ENTRY_FLAG: u8 = 0x40;
const SEQUENCE_MASK: u8 = 0x1f;

/// One 32-byte LFN continuation entry, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LfnSlot {
    pub sequence: u8,
    pub is_last_logical: bool,
    pub checksum: u8,
    /// Always 13 code units; unused trailing units in the final (lowest
    /// sequence number, first logical) slot are padded with `0xffff`.
    pub chars: [u16; CHARS_PER_SLOT],
}

impl LfnSlot {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let ordinal = bytes[0];
        let mut chars = [0u16; CHARS_PER_SLOT];
        for i in 0..5 {
            chars[i] = read_u16(bytes, 1 + i * 2);
        }
        for i in 0..6 {
            chars[5 + i] = read_u16(bytes, 14 + i * 2);
        }
        for i in 0..2 {
            chars[11 + i] = read_u16(bytes, 28 + i * 2);
        }
        LfnSlot {
            sequence: ordinal & SEQUENCE_MASK,
            is_last_logical: ordinal & LAST_LOGICAL_ENTRY_FLAG != 0,
            checksum: bytes[13],
            chars,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = alloc::vec![0u8; 32];
        let ordinal = self.sequence | if self.is_last_logical { LAST_LOGICAL_ENTRY_FLAG } else { 0 };
        buf[0] = ordinal;
        for i in 0..5 {
            write_u16(&mut buf, 1 + i * 2, self.chars[i]);
        }
        buf[11] = LFN_ATTR;
        buf[12] = 0;
        buf[13] = self.checksum;
        for i in 0..6 {
            write_u16(&mut buf, 14 + i * 2, self.chars[5 + i]);
        }
        write_u16(&mut buf, 26, 0);
        for i in 0..2 {
            write_u16(&mut buf, 28 + i * 2, self.chars[11 + i]);
        }
        buf
    }
}

/// Encodes `name` into LFN slots in on-disk write order — the slot holding
/// the tail of the name first (flagged `is_last_logical`, highest sequence
/// number), counting down to sequence 1 holding the first 13 characters.
pub fn encode(name: &str, checksum: u8) -> Vec<LfnSlot> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let slot_count = (units.len() + CHARS_PER_SLOT - 1) / CHARS_PER_SLOT.max(1);
    let slot_count = slot_count.max(1);
    let mut slots = Vec::with_capacity(slot_count);

    for slot_idx in 0..slot_count {
        let start = slot_idx * CHARS_PER_SLOT;
        let mut chars = [0xffffu16; CHARS_PER_SLOT];
        let mut wrote_terminator = false;
        for i in 0..CHARS_PER_SLOT {
            if let Some(&u) = units.get(start + i) {
                chars[i] = u;
            } else if !wrote_terminator {
                chars[i] = 0x0000;
                wrote_terminator = true;
            }
        }
        slots.push(LfnSlot {
            sequence: (slot_idx + 1) as u8,
            is_last_logical: false,
            checksum,
            chars,
        });
    }
    slots.last_mut().unwrap().is_last_logical = true;
    slots.reverse();
    slots
}

/// Decodes a run of LFN slots given in on-disk order (as `encode` produces)
/// back into the name string. Returns `None` if the sequence numbers don't
/// form the expected contiguous descending-from-last-logical run, or if the
/// bytes aren't valid UTF-16 — both treated as corruption by the caller.
pub fn decode(slots: &[LfnSlot]) -> Option<String> {
    if slots.is_empty() {
        return None;
    }
    if !slots[0].is_last_logical {
        return None;
    }
    let expected_count = slots[0].sequence as usize;
    if slots.len() != expected_count {
        return None;
    }
    for (i, slot) in slots.iter().enumerate() {
        let expected_seq = (expected_count - i) as u8;
        if slot.sequence != expected_seq {
            return None;
        }
    }

    let mut units = Vec::with_capacity(slots.len() * CHARS_PER_SLOT);
    for slot in slots.iter().rev() {
        for &u in slot.chars.iter() {
            if u == 0x0000 {
                break;
            }
            if u == 0xffff {
                continue;
            }
            units.push(u);
        }
    }
    String::from_utf16(&units).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_roundtrips() {
        let slots = encode("readme.txt", 0x42);
        assert_eq!(slots.len(), 1);
        assert!(slots[0].is_last_logical);
        let decoded = decode(&slots).unwrap();
        assert_eq!(decoded, "readme.txt");
    }

    #[test]
    fn long_name_spans_multiple_slots() {
        let name = "this is a much longer file name than 8.3 allows.txt";
        let slots = encode(name, 0x99);
        assert!(slots.len() > 1);
        assert!(slots[0].is_last_logical);
        for slot in &slots {
            assert_eq!(slot.checksum, 0x99);
        }
        let decoded = decode(&slots).unwrap();
        assert_eq!(decoded, name);
    }

    #[test]
    fn byte_roundtrip_preserves_fields() {
        let slots = encode("exact-13-chars", 7);
        for slot in &slots {
            let bytes = slot.to_bytes();
            let back = LfnSlot::from_bytes(&bytes);
            assert_eq!(&back, slot);
        }
    }
}
