//! Artifact payload header.
//!
//! ```text
//! [ "CNVY" (4) | version u8 | kind u8 | body ... ]
//! ```

use conveyor_types::artifact::ArtifactType;

use super::CodecError;

pub(crate) const MAGIC: [u8; 4] = *b"CNVY";
pub(crate) const FORMAT_VERSION: u8 = 1;
pub(crate) const HEADER_LEN: usize = MAGIC.len() + 2;

fn kind_to_byte(kind: ArtifactType) -> u8 {
    match kind {
        ArtifactType::Table => 1,
        ArtifactType::Metric => 2,
        ArtifactType::Check => 3,
        ArtifactType::Parameter => 4,
    }
}

fn kind_from_byte(byte: u8) -> Option<ArtifactType> {
    match byte {
        1 => Some(ArtifactType::Table),
        2 => Some(ArtifactType::Metric),
        3 => Some(ArtifactType::Check),
        4 => Some(ArtifactType::Parameter),
        _ => None,
    }
}

/// Start a payload buffer for `kind`.
pub(crate) fn with_header(kind: ArtifactType, body_len: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + body_len);
    buf.extend_from_slice(&MAGIC);
    buf.push(FORMAT_VERSION);
    buf.push(kind_to_byte(kind));
    buf
}

/// Split a payload into its declared kind and body.
pub(crate) fn split(content: &[u8]) -> Result<(ArtifactType, &[u8]), CodecError> {
    if content.len() < HEADER_LEN {
        return Err(CodecError::Corrupt(format!(
            "payload is {} bytes, shorter than the {HEADER_LEN}-byte header",
            content.len()
        )));
    }
    if content[..MAGIC.len()] != MAGIC {
        return Err(CodecError::Corrupt("payload has no artifact header".into()));
    }
    let version = content[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let kind_byte = content[MAGIC.len() + 1];
    let kind = kind_from_byte(kind_byte)
        .ok_or_else(|| CodecError::Corrupt(format!("unknown artifact kind byte {kind_byte}")))?;
    Ok((kind, &content[HEADER_LEN..]))
}
