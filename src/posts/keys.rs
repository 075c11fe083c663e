//! Store key layout for the posts module.
//!
//! Every key starts with a one-byte prefix followed by fixed-width big-endian
//! identifiers, so that prefix iteration walks records in id order:
//!
//! - `0x01 | subspace` -> next post id
//! - `0x02 | subspace | post` -> post
//! - `0x03 | subspace | post` -> next attachment id
//! - `0x04 | subspace | post | attachment` -> attachment
//! - `0x05 | subspace | post | poll | user` -> user answer
//! - `0x06 | end_date | subspace | post | poll` -> active poll queue entry
//! - `0x07 | subspace | post` -> post owner transfer request
//! - `0x08` -> params
//! - `0x09 | subspace | section | post` -> section index entry (empty value)
//!
//! User addresses are variable-length and therefore always come last.

use crate::posts::types::Address;
use crate::storage::composite_key;

pub const NEXT_POST_ID_PREFIX: u8 = 0x01;
pub const POST_PREFIX: u8 = 0x02;
pub const NEXT_ATTACHMENT_ID_PREFIX: u8 = 0x03;
pub const ATTACHMENT_PREFIX: u8 = 0x04;
pub const USER_ANSWER_PREFIX: u8 = 0x05;
pub const ACTIVE_POLL_QUEUE_PREFIX: u8 = 0x06;
pub const TRANSFER_REQUEST_PREFIX: u8 = 0x07;
pub const PARAMS_KEY: &[u8] = &[0x08];
pub const SECTION_POST_PREFIX: u8 = 0x09;

// =============================================================================
// Key Builders
// =============================================================================

pub fn next_post_id_key(subspace_id: u64) -> Vec<u8> {
    composite_key(&[NEXT_POST_ID_PREFIX], &[&subspace_id.to_be_bytes()])
}

/// Prefix of every post inside a subspace.
pub fn subspace_posts_prefix(subspace_id: u64) -> Vec<u8> {
    composite_key(&[POST_PREFIX], &[&subspace_id.to_be_bytes()])
}

pub fn post_key(subspace_id: u64, post_id: u64) -> Vec<u8> {
    composite_key(
        &[POST_PREFIX],
        &[&subspace_id.to_be_bytes(), &post_id.to_be_bytes()],
    )
}

pub fn next_attachment_id_key(subspace_id: u64, post_id: u64) -> Vec<u8> {
    composite_key(
        &[NEXT_ATTACHMENT_ID_PREFIX],
        &[&subspace_id.to_be_bytes(), &post_id.to_be_bytes()],
    )
}

/// Prefix of every attachment of a post.
pub fn post_attachments_prefix(subspace_id: u64, post_id: u64) -> Vec<u8> {
    composite_key(
        &[ATTACHMENT_PREFIX],
        &[&subspace_id.to_be_bytes(), &post_id.to_be_bytes()],
    )
}

pub fn attachment_key(subspace_id: u64, post_id: u64, attachment_id: u32) -> Vec<u8> {
    composite_key(
        &[ATTACHMENT_PREFIX],
        &[
            &subspace_id.to_be_bytes(),
            &post_id.to_be_bytes(),
            &attachment_id.to_be_bytes(),
        ],
    )
}

/// Prefix of every answer given to a poll.
pub fn poll_answers_prefix(subspace_id: u64, post_id: u64, poll_id: u32) -> Vec<u8> {
    composite_key(
        &[USER_ANSWER_PREFIX],
        &[
            &subspace_id.to_be_bytes(),
            &post_id.to_be_bytes(),
            &poll_id.to_be_bytes(),
        ],
    )
}

pub fn user_answer_key(subspace_id: u64, post_id: u64, poll_id: u32, user: &Address) -> Vec<u8> {
    composite_key(
        &[USER_ANSWER_PREFIX],
        &[
            &subspace_id.to_be_bytes(),
            &post_id.to_be_bytes(),
            &poll_id.to_be_bytes(),
            user.as_bytes(),
        ],
    )
}

pub fn active_poll_queue_key(
    end_date: u64,
    subspace_id: u64,
    post_id: u64,
    poll_id: u32,
) -> Vec<u8> {
    composite_key(
        &[ACTIVE_POLL_QUEUE_PREFIX],
        &[
            &end_date.to_be_bytes(),
            &subspace_id.to_be_bytes(),
            &post_id.to_be_bytes(),
            &poll_id.to_be_bytes(),
        ],
    )
}

/// Prefix of every pending transfer request inside a subspace.
pub fn subspace_transfer_requests_prefix(subspace_id: u64) -> Vec<u8> {
    composite_key(&[TRANSFER_REQUEST_PREFIX], &[&subspace_id.to_be_bytes()])
}

pub fn transfer_request_key(subspace_id: u64, post_id: u64) -> Vec<u8> {
    composite_key(
        &[TRANSFER_REQUEST_PREFIX],
        &[&subspace_id.to_be_bytes(), &post_id.to_be_bytes()],
    )
}

/// Prefix of every post filed under a section.
pub fn section_posts_prefix(subspace_id: u64, section_id: u32) -> Vec<u8> {
    composite_key(
        &[SECTION_POST_PREFIX],
        &[&subspace_id.to_be_bytes(), &section_id.to_be_bytes()],
    )
}

pub fn section_post_key(subspace_id: u64, section_id: u32, post_id: u64) -> Vec<u8> {
    composite_key(
        &[SECTION_POST_PREFIX],
        &[
            &subspace_id.to_be_bytes(),
            &section_id.to_be_bytes(),
            &post_id.to_be_bytes(),
        ],
    )
}

// =============================================================================
// Key Parsers
// =============================================================================

fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let slice = bytes.get(offset..offset + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    Some(u64::from_be_bytes(buf))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset + 4)?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(slice);
    Some(u32::from_be_bytes(buf))
}

/// Extracts the subspace id from a next post id key.
pub fn parse_next_post_id_key(key: &[u8]) -> Option<u64> {
    if key.len() != 9 || key[0] != NEXT_POST_ID_PREFIX {
        return None;
    }
    read_u64(key, 1)
}

/// Extracts (subspace, post) from a next attachment id key.
pub fn parse_next_attachment_id_key(key: &[u8]) -> Option<(u64, u64)> {
    if key.len() != 17 || key[0] != NEXT_ATTACHMENT_ID_PREFIX {
        return None;
    }
    Some((read_u64(key, 1)?, read_u64(key, 9)?))
}

/// Extracts (end_date, subspace, post, poll) from an active poll queue key.
pub fn parse_active_poll_queue_key(key: &[u8]) -> Option<(u64, u64, u64, u32)> {
    if key.len() != 29 || key[0] != ACTIVE_POLL_QUEUE_PREFIX {
        return None;
    }
    Some((
        read_u64(key, 1)?,
        read_u64(key, 9)?,
        read_u64(key, 17)?,
        read_u32(key, 25)?,
    ))
}

/// Extracts (subspace, section, post) from a section index key.
pub fn parse_section_post_key(key: &[u8]) -> Option<(u64, u32, u64)> {
    if key.len() != 21 || key[0] != SECTION_POST_PREFIX {
        return None;
    }
    Some((read_u64(key, 1)?, read_u32(key, 9)?, read_u64(key, 13)?))
}

// =============================================================================
// Watermark Values
// =============================================================================

/// Encodes a post id watermark as fixed-width big-endian bytes.
pub fn encode_post_id(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

pub fn decode_post_id(bytes: &[u8]) -> Option<u64> {
    if bytes.len() != 8 {
        return None;
    }
    read_u64(bytes, 0)
}

/// Encodes an attachment id watermark as fixed-width big-endian bytes.
pub fn encode_attachment_id(id: u32) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

pub fn decode_attachment_id(bytes: &[u8]) -> Option<u32> {
    if bytes.len() != 4 {
        return None;
    }
    read_u32(bytes, 0)
}
