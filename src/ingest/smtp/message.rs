use crate::error::Error;
use anyhow::Result;
use mailparse::ParsedMail;

/// Decoded image part of a message
#[derive(Debug, Clone)]
pub struct Attachment {
    pub mime: String,
    pub data: Vec<u8>,
}

/// First `image/*` part of the message, depth first. Later images are ignored.
pub fn first_image(raw: &[u8]) -> Result<Option<Attachment>> {
    let mail = mailparse::parse_mail(raw)
        .map_err(|e| Error::Protocol(format!("Malformed message: {}", e)))?;

    let Some(part) = find_image(&mail) else {
        return Ok(None);
    };

    let data = part
        .get_body_raw()
        .map_err(|e| Error::Protocol(format!("Undecodable image part: {}", e)))?;

    Ok(Some(Attachment {
        mime: part.ctype.mimetype.to_ascii_lowercase(),
        data,
    }))
}

fn find_image<'a>(part: &'a ParsedMail<'a>) -> Option<&'a ParsedMail<'a>> {
    if part.ctype.mimetype.to_ascii_lowercase().starts_with("image/") {
        return Some(part);
    }
    part.subparts.iter().find_map(find_image)
}
