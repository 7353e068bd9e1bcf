//! Share links.
//!
//! The initiator hands its partner a link of the form `<origin>/#<room>`.
//! The room travels in the URL fragment, which browsers never send to a
//! server. The joiner may paste the whole link or just the room id.

use psst_proto::room::{RoomId, RoomIdError};
use url::Url;

/// Errors from building or reading a share link.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LinkError {
    /// The text looked like a URL but did not parse.
    #[error("invalid link: {0}")]
    InvalidLink(#[from] url::ParseError),

    /// The link has no `#room` fragment.
    #[error("link does not name a room")]
    MissingRoom,

    /// The room id is not acceptable.
    #[error("invalid room: {0}")]
    InvalidRoom(#[from] RoomIdError),
}

/// Build the link that invites a partner into `room`.
///
/// # Errors
///
/// Returns [`LinkError::InvalidLink`] if `origin` is not an absolute URL.
pub fn share_link(origin: &str, room: &RoomId) -> Result<Url, LinkError> {
    let mut url = Url::parse(origin)?;
    url.set_fragment(Some(room.as_str()));
    Ok(url)
}

/// Extract the room from a share link, a `#room` fragment, or a bare id.
///
/// # Errors
///
/// - [`LinkError::InvalidLink`] if the input looks like a URL but is not one.
/// - [`LinkError::MissingRoom`] if a link carries no fragment.
/// - [`LinkError::InvalidRoom`] if the room id itself is invalid.
pub fn parse_room(input: &str) -> Result<RoomId, LinkError> {
    let input = input.trim();
    if input.contains("://") {
        let url = Url::parse(input)?;
        let room = url
            .fragment()
            .filter(|f| !f.is_empty())
            .ok_or(LinkError::MissingRoom)?;
        return Ok(RoomId::parse(room)?);
    }
    Ok(RoomId::parse(input.strip_prefix('#').unwrap_or(input))?)
}
