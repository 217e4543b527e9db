//! Header of a git loose object: `<kind> <size>\0<payload>`, the plaintext
//! stored zlib-compressed under `objects/xx/yyyy…`.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow, bail, ensure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl FromStr for ObjectKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "blob" => Ok(Self::Blob),
            "tree" => Ok(Self::Tree),
            "commit" => Ok(Self::Commit),
            "tag" => Ok(Self::Tag),
            _ => bail!("unknown object type: {:?}", s),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        };
        f.write_str(name)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct LooseObject<'a> {
    pub kind: ObjectKind,
    pub size: usize,
    pub payload: &'a [u8],
}

impl<'a> LooseObject<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let type_sep = data
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| anyhow!("object type not found"))?;
        let kind: ObjectKind = std::str::from_utf8(&data[..type_sep])?.parse()?;

        let size_sep = data
            .iter()
            .position(|&b| b == 0)
            .filter(|&sep| sep > type_sep)
            .ok_or_else(|| anyhow!("object size not found"))?;
        let size_str = std::str::from_utf8(&data[type_sep + 1..size_sep])?;
        ensure!(
            !size_str.is_empty() && size_str.bytes().all(|b| b.is_ascii_digit()),
            "invalid object size: {:?}",
            size_str
        );
        let size: usize = size_str.parse()?;

        let payload = &data[size_sep + 1..];
        ensure!(
            payload.len() == size,
            "object size mismatch: header says {}, payload has {}",
            size,
            payload.len()
        );

        Ok(Self {
            kind,
            size,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_blob() {
        let obj = LooseObject::parse(b"blob 12\0hello world\n").unwrap();
        assert_eq!(obj.kind, ObjectKind::Blob);
        assert_eq!(obj.size, 12);
        assert_eq!(obj.payload, b"hello world\n");
    }

    #[test]
    fn parse_empty_tree() {
        let obj = LooseObject::parse(b"tree 0\0").unwrap();
        assert_eq!(obj.kind, ObjectKind::Tree);
        assert!(obj.payload.is_empty());
    }

    #[test]
    fn payload_may_contain_nul() {
        let obj = LooseObject::parse(b"commit 3\0a\0b").unwrap();
        assert_eq!(obj.payload, b"a\0b");
    }

    #[test]
    fn kind_round_trips_through_display() {
        for kind in [ObjectKind::Blob, ObjectKind::Tree, ObjectKind::Commit, ObjectKind::Tag] {
            assert_eq!(kind.to_string().parse::<ObjectKind>().unwrap(), kind);
        }
    }

    #[test]
    fn malformed_headers() {
        let cases: [(&[u8], &str); 5] = [
            (b"blob", "type not found"),
            (b"blub 1\0x", "unknown object type"),
            (b"blob 1", "size not found"),
            (b"blob +1\0x", "invalid object size"),
            (b"blob 5\0abc", "size mismatch"),
        ];
        for (data, expected) in cases {
            let err = LooseObject::parse(data).unwrap_err();
            assert!(err.to_string().contains(expected), "{err}");
        }
    }
}
