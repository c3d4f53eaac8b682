//! Board command presets for the OpenBCI Cyton + Daisy board.

/// Channel settings for all 16 Cyton/Daisy channels: powered on, gain 24,
/// normal electrode input, included in bias, SRB2 connected, SRB1 off.
pub const CYTON_DAISY_CHANNEL_COMMANDS: [&str; 16] = [
    "x1040010X", "x2040010X", "x3040010X", "x4040010X",
    "x5040010X", "x6040010X", "x7040010X", "x8040010X",
    "xQ040010X", "xW040010X", "xE040010X", "xR040010X",
    "xT040010X", "xY040010X", "xU040010X", "xI040010X",
];

/// Returns the default channel-setting commands as owned strings, ready to be
/// appended to `DeviceConfig::board_commands`.
pub fn default_cyton_commands() -> Vec<String> {
    CYTON_DAISY_CHANNEL_COMMANDS
        .iter()
        .map(|cmd| cmd.to_string())
        .collect()
}
