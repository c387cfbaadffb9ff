pub const WELCOME: &str = "Hi! This bot collects information about sticker packs for a \
small community project.\n\nPlease send me one sticker from every pack you have added, \
it only takes a few minutes. Thank you for helping out!";
pub const THANKS: &str = "Thanks! Please send me stickers from your other packs too";
pub const NO_STICKER_SET: &str = "This sticker does not belong to any sticker pack";
pub const SENDER_UNKNOWN: &str = "Failed to find the sender of this message";
pub const SUBMIT_FAILED: &str =
    "Something went wrong while processing the sticker. Please try again later";
pub const VIDEO_CAPTION: &str = "How to submit your sticker packs";
pub const VIDEO_MISSING: &str =
    "The instruction video is not available yet, but the bot works: just send a sticker!";
