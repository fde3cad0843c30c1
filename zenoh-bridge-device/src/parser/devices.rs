//! Device listing parser.

use telebridge_common::DeviceInfo;

const BANNER: &str = "List of devices attached";

/// Parse `<tool> devices` output.
///
/// Rows after the banner are `<id> <state> [<model...>]`; daemon chatter
/// (`* daemon started *`) and blank lines are skipped.
pub fn parse_device_list(output: &str) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();
    let mut after_banner = false;

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with(BANNER) {
            after_banner = true;
            continue;
        }
        if !after_banner || trimmed.is_empty() || trimmed.starts_with('*') {
            continue;
        }

        let mut tokens = trimmed.split_whitespace();
        let (Some(id), Some(state)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        let model: Vec<&str> = tokens.collect();

        devices.push(DeviceInfo {
            id: id.to_string(),
            state: state.to_string(),
            model: (!model.is_empty()).then(|| model.join(" ")),
        });
    }

    devices
}
