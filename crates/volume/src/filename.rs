//! Parse/format the volume filename grammar:
//! `"<prefix>-<kind>-<guid>-<iso8601>.<compression>[.<encryption>]"`.
//!
//! The filename is descriptive only; name and content hash are the
//! authority for identity (the catalog is the source of truth), but the
//! restore downloader uses the parsed `kind` to sanity-check the object it
//! fetched is the volume it asked for.

use time::macros::format_description;
use time::OffsetDateTime;
use uuid::Uuid;

use common::VolumeKind;

use crate::error::VolumeError;

const TIMESTAMP_FORMAT: &[time::format_description::FormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeFilename {
    pub prefix: String,
    pub kind: VolumeKind,
    pub guid: Uuid,
    pub timestamp: OffsetDateTime,
    pub compression: String,
    pub encryption: Option<String>,
}

impl VolumeFilename {
    pub fn format(&self) -> String {
        let ts = self
            .timestamp
            .format(&TIMESTAMP_FORMAT)
            .expect("timestamp format is infallible for UTC offsets");
        let mut name = format!(
            "{}-{}-{}-{}.{}",
            self.prefix,
            self.kind.filename_letter(),
            self.guid,
            ts,
            self.compression,
        );
        if let Some(enc) = &self.encryption {
            name.push('.');
            name.push_str(enc);
        }
        name
    }

    /// Parses the grammar without relying on `-`-splitting throughout,
    /// since both the guid and the RFC-3339-flavoured timestamp body
    /// contain `-` themselves. A UUID's canonical string form is always 36
    /// bytes, which anchors the rest of the parse.
    pub fn parse(name: &str) -> Result<Self, VolumeError> {
        let bad = || VolumeError::BadFilename(name.to_string());

        let prefix_end = name.find('-').ok_or_else(bad)?;
        let prefix = &name[..prefix_end];
        let after_prefix = &name[prefix_end + 1..];

        let letter_end = after_prefix.find('-').ok_or_else(bad)?;
        let letter = &after_prefix[..letter_end];
        let kind = match letter {
            "b" => VolumeKind::Blocks,
            "i" => VolumeKind::Index,
            "f" => VolumeKind::Files,
            _ => return Err(bad()),
        };
        let after_letter = &after_prefix[letter_end + 1..];

        if after_letter.len() < 37 || after_letter.as_bytes()[36] != b'-' {
            return Err(bad());
        }
        let guid = Uuid::parse_str(&after_letter[..36]).map_err(|_| bad())?;
        let rest = &after_letter[37..];

        let mut rest_parts = rest.splitn(3, '.');
        let ts_str = rest_parts.next().ok_or_else(bad)?;
        let compression = rest_parts.next().ok_or_else(bad)?.to_string();
        let encryption = rest_parts.next().map(|s| s.to_string());

        let timestamp =
            OffsetDateTime::parse(ts_str, &TIMESTAMP_FORMAT).map_err(|_| bad())?;

        Ok(Self {
            prefix: prefix.to_string(),
            kind,
            guid,
            timestamp,
            compression,
            encryption,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_format_and_parse_roundtrip_with_encryption() {
        let f = VolumeFilename {
            prefix: "coldvault".into(),
            kind: VolumeKind::Blocks,
            guid: Uuid::nil(),
            timestamp: datetime!(2026-01-15 12:30:00 UTC),
            compression: "zstd".into(),
            encryption: Some("xts".into()),
        };
        let name = f.format();
        assert_eq!(
            name,
            "coldvault-b-00000000-0000-0000-0000-000000000000-2026-01-15T12:30:00Z.zstd.xts"
        );
        let parsed = VolumeFilename::parse(&name).unwrap();
        assert_eq!(parsed, f);
    }

    #[test]
    fn test_parse_without_encryption_suffix() {
        let f = VolumeFilename {
            prefix: "cv".into(),
            kind: VolumeKind::Index,
            guid: Uuid::nil(),
            timestamp: datetime!(2026-01-15 00:00:00 UTC),
            compression: "lz4".into(),
            encryption: None,
        };
        let parsed = VolumeFilename::parse(&f.format()).unwrap();
        assert_eq!(parsed, f);
        assert_eq!(parsed.kind, VolumeKind::Index);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            VolumeFilename::parse("not-a-volume-name"),
            Err(VolumeError::BadFilename(_))
        ));
    }
}
