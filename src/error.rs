//! Stable, user-facing admission error kinds.
//!
//! These name the message template the HTTP layer (out of scope here) would
//! render; they are deliberately a closed, flat set rather than a chain of
//! causes, so this follows the hand-rolled `Display`/`Error` pattern used for
//! the wire protocol's decode/encode errors rather than pulling in an
//! error-derive crate for a handful of fixed-message variants.

use std::{error, fmt};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AdmitError {
    ThreadLocked,
    CommentTooLong,
    WordFilterBlocked,
    NoTags,
    TooManyTags,
    ProhibitedTags,
    TagTooLong,
    ThreadNotExist,
    PostNotExist,
    AlreadyReported,
    SpamTrap,
    InvalidFields,
    NoImage,
    ImageDecodeFailure,
    NeedPicOrText,
    TooManyThreads,
    TooManyPosts,
    TooManyReports,
    MustIndicateNsfw,
    Unauthorized,
    MediaBlockFailed,
}

impl AdmitError {
    /// The stable kind name, as would be looked up in a message template
    /// table by the (out of scope) HTTP layer.
    pub fn kind(&self) -> &'static str {
        use AdmitError::*;
        match self {
            ThreadLocked => "thread_locked",
            CommentTooLong => "comment_too_long",
            WordFilterBlocked => "word_filter_blocked",
            NoTags => "no_tags",
            TooManyTags => "too_many_tags",
            ProhibitedTags => "prohibited_tags",
            TagTooLong => "tag_too_long",
            ThreadNotExist => "thread_not_exist",
            PostNotExist => "post_not_exist",
            AlreadyReported => "already_reported",
            SpamTrap => "spam_trap",
            InvalidFields => "invalid_fields",
            NoImage => "no_image",
            ImageDecodeFailure => "image_decode_failure",
            NeedPicOrText => "need_pic_or_text",
            TooManyThreads => "too_many_threads",
            TooManyPosts => "too_many_posts",
            TooManyReports => "too_many_reports",
            MustIndicateNsfw => "must_indicate_nsfw",
            Unauthorized => "unauthorized",
            MediaBlockFailed => "Media_block_failed",
        }
    }
}

impl fmt::Display for AdmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

impl error::Error for AdmitError {}

pub type AdmitResult<T> = Result<T, AdmitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(AdmitError::ThreadLocked.kind(), "thread_locked");
        assert_eq!(AdmitError::SpamTrap.to_string(), "spam_trap");
    }
}
