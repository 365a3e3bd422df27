//! Snapshot codec using nom
//!
//! File format:
//! ```text
//! URLSNAP\n
//! [4 bytes: version u32 little-endian]
//! [4 bytes: entry_count u32 little-endian]
//! [4 bytes: tracked_count u32 little-endian]
//! ...entry records...
//! ...tracked records...
//! ```
//!
//! Entry record:
//! ```text
//! [code_len u16][code][url_len u32][url][created_at_ms i64][sequence u64][access_count u64]
//! ```
//!
//! Tracked record (frequency tracker state at save time):
//! ```text
//! [code_len u16][code][count u64]
//! ```

use chrono::DateTime;
use nom::{
    bytes::complete::tag,
    combinator::map_res,
    multi::{count, length_data},
    number::complete::{le_i64, le_u16, le_u32, le_u64},
    sequence::tuple,
    IResult,
};

use crate::entry::UrlEntry;
use crate::error::PersistenceError;

/// Magic header for snapshot files
pub const SNAPSHOT_MAGIC: &[u8] = b"URLSNAP\n";

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Bytes taken by magic + version + both record counts
pub const HEADER_LEN: usize = SNAPSHOT_MAGIC.len() + 12;

/// Everything needed to rebuild the three indexes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    /// Every stored entry, in any order
    pub entries: Vec<UrlEntry>,
    /// `(code, count)` pairs the frequency tracker held
    pub tracked: Vec<(String, u64)>,
}

/// Snapshot file header
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotHeader {
    /// File format version
    pub version: u32,
    /// Number of entry records
    pub entry_count: u32,
    /// Number of tracked records
    pub tracked_count: u32,
}

fn header(input: &[u8]) -> IResult<&[u8], SnapshotHeader> {
    let (input, _) = tag(SNAPSHOT_MAGIC)(input)?;
    let (input, (version, entry_count, tracked_count)) = tuple((le_u32, le_u32, le_u32))(input)?;
    Ok((
        input,
        SnapshotHeader {
            version,
            entry_count,
            tracked_count,
        },
    ))
}

fn code(input: &[u8]) -> IResult<&[u8], String> {
    map_res(length_data(le_u16), |b: &[u8]| std::str::from_utf8(b).map(str::to_owned))(input)
}

fn url(input: &[u8]) -> IResult<&[u8], String> {
    map_res(length_data(le_u32), |b: &[u8]| std::str::from_utf8(b).map(str::to_owned))(input)
}

type RawEntry = (String, String, i64, u64, u64);

fn entry_record(input: &[u8]) -> IResult<&[u8], RawEntry> {
    tuple((code, url, le_i64, le_u64, le_u64))(input)
}

fn tracked_record(input: &[u8]) -> IResult<&[u8], (String, u64)> {
    tuple((code, le_u64))(input)
}

/// Parse and validate just the header
pub fn parse_header(input: &[u8]) -> Result<SnapshotHeader, PersistenceError> {
    if input.len() < HEADER_LEN {
        return Err(PersistenceError::Corrupt(format!(
            "snapshot is {} bytes, header needs {}",
            input.len(),
            HEADER_LEN
        )));
    }
    let (_, parsed) = header(input)?;
    if parsed.version != SNAPSHOT_VERSION {
        return Err(PersistenceError::Corrupt(format!(
            "unsupported snapshot version {}",
            parsed.version
        )));
    }
    Ok(parsed)
}

/// Decode a complete snapshot. Trailing bytes are an error.
pub fn decode(input: &[u8]) -> Result<Snapshot, PersistenceError> {
    let head = parse_header(input)?;
    let rest = &input[HEADER_LEN..];

    let (rest, raw_entries) = count(entry_record, head.entry_count as usize)(rest)?;
    let (rest, tracked) = count(tracked_record, head.tracked_count as usize)(rest)?;
    if !rest.is_empty() {
        return Err(PersistenceError::Corrupt(format!(
            "{} trailing bytes after last record",
            rest.len()
        )));
    }

    let entries = raw_entries
        .into_iter()
        .map(|(short_code, long_url, created_ms, sequence, access_count)| {
            let created_at = DateTime::from_timestamp_millis(created_ms).ok_or_else(|| {
                PersistenceError::Corrupt(format!("bad timestamp for {}", short_code))
            })?;
            Ok(UrlEntry {
                short_code,
                long_url,
                created_at,
                access_count,
                sequence,
            })
        })
        .collect::<Result<Vec<_>, PersistenceError>>()?;

    Ok(Snapshot { entries, tracked })
}

fn put_code(buf: &mut Vec<u8>, code: &str) -> Result<(), PersistenceError> {
    let len = u16::try_from(code.len())
        .map_err(|_| PersistenceError::Encode(format!("short code of {} bytes", code.len())))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(code.as_bytes());
    Ok(())
}

fn count_u32(n: usize, what: &str) -> Result<u32, PersistenceError> {
    u32::try_from(n).map_err(|_| PersistenceError::Encode(format!("{} {} records", n, what)))
}

/// Encode a snapshot into its on-disk form
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>, PersistenceError> {
    let entry_count = count_u32(snapshot.entries.len(), "entry")?;
    let tracked_count = count_u32(snapshot.tracked.len(), "tracked")?;

    let body: usize = snapshot
        .entries
        .iter()
        .map(|e| e.short_code.len() + e.long_url.len() + 30)
        .sum();
    let mut buf = Vec::with_capacity(HEADER_LEN + body + snapshot.tracked.len() * 24);
    buf.extend_from_slice(SNAPSHOT_MAGIC);
    buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    buf.extend_from_slice(&entry_count.to_le_bytes());
    buf.extend_from_slice(&tracked_count.to_le_bytes());

    for entry in &snapshot.entries {
        put_code(&mut buf, &entry.short_code)?;
        let url_len = u32::try_from(entry.long_url.len()).map_err(|_| {
            PersistenceError::Encode(format!("url of {} bytes", entry.long_url.len()))
        })?;
        buf.extend_from_slice(&url_len.to_le_bytes());
        buf.extend_from_slice(entry.long_url.as_bytes());
        buf.extend_from_slice(&entry.created_at.timestamp_millis().to_le_bytes());
        buf.extend_from_slice(&entry.sequence.to_le_bytes());
        buf.extend_from_slice(&entry.access_count.to_le_bytes());
    }

    for (code, hits) in &snapshot.tracked {
        put_code(&mut buf, code)?;
        buf.extend_from_slice(&hits.to_le_bytes());
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(code: &str, url: &str, sequence: u64, hits: u64) -> UrlEntry {
        let mut e = UrlEntry::new(code, url, sequence);
        // Snapshots keep millisecond precision
        e.created_at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        e.access_count = hits;
        e
    }

    fn sample() -> Snapshot {
        Snapshot {
            entries: vec![
                entry("ab12", "http://example.com/a", 0, 3),
                entry("cd34", "http://example.com/b", 1, 1),
                entry("ü7", "https://example.com/ünïcode?q=1", 2, 0),
            ],
            tracked: vec![("ab12".to_string(), 3), ("cd34".to_string(), 1)],
        }
    }

    #[test]
    fn test_encode_decode() {
        let snapshot = sample();
        let bytes = encode(&snapshot).unwrap();
        assert_eq!(decode(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn test_empty_snapshot() {
        let bytes = encode(&Snapshot::default()).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(decode(&bytes).unwrap(), Snapshot::default());
    }

    #[test]
    fn test_header_format() {
        let bytes = encode(&sample()).unwrap();

        assert_eq!(&bytes[0..8], SNAPSHOT_MAGIC);
        assert_eq!(u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]), 1);
        assert_eq!(u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]), 3);
        assert_eq!(u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]), 2);

        let head = parse_header(&bytes).unwrap();
        assert_eq!(head.entry_count, 3);
        assert_eq!(head.tracked_count, 2);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(PersistenceError::Corrupt(_))));
    }

    #[test]
    fn test_unknown_version() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[8..12].copy_from_slice(&99u32.to_le_bytes());
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("version 99"));
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(decode(b"URLSNAP\n"), Err(PersistenceError::Corrupt(_))));
        assert!(matches!(decode(b""), Err(PersistenceError::Corrupt(_))));
    }

    #[test]
    fn test_truncated_records() {
        let bytes = encode(&sample()).unwrap();
        for cut in [HEADER_LEN + 1, bytes.len() / 2, bytes.len() - 1] {
            let result = decode(&bytes[..cut]);
            assert!(matches!(result, Err(PersistenceError::Corrupt(_))), "cut at {}", cut);
        }
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.push(0);
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn test_invalid_utf8_code() {
        let mut bytes = encode(&Snapshot {
            entries: vec![entry("ab", "http://x", 0, 0)],
            tracked: vec![],
        })
        .unwrap();
        // First code byte follows the 2-byte length prefix
        bytes[HEADER_LEN + 2] = 0xff;
        assert!(matches!(decode(&bytes), Err(PersistenceError::Corrupt(_))));
    }

    #[test]
    fn test_oversized_code_rejected() {
        let snapshot = Snapshot {
            entries: vec![entry(&"x".repeat(70_000), "http://x", 0, 0)],
            tracked: vec![],
        };
        assert!(matches!(encode(&snapshot), Err(PersistenceError::Encode(_))));
    }
}
