/// Bumped whenever the terminal wire format changes incompatibly.
pub const PROTOCOL_VERSION: u32 = 3;
