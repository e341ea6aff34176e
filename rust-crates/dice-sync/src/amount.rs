//! ETH decimal strings at the input edge, wei everywhere else.

use alloy::primitives::{
    U256,
    utils::{
        format_ether,
        parse_ether,
    },
};

const WEI_PER_MICRO_ETHER: u64 = 1_000_000_000_000;

/// Parses a user-entered ETH amount into wei.
///
/// Returns `None` for anything that is not a non-negative decimal number with at most 18
/// fractional digits. Zero parses successfully; callers decide whether zero is acceptable.
pub fn parse_eth(input: &str) -> Option<U256> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') || trimmed.starts_with('+') {
        return None;
    }
    parse_ether(trimmed).ok()
}

/// Formats wei as the shortest decimal ETH string, e.g. `1000000000000000` → `"0.001"`.
pub fn format_eth(wei: U256) -> String {
    let full = format_ether(wei);
    match full.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                whole.to_string()
            } else {
                format!("{whole}.{fraction}")
            }
        }
        None => full,
    }
}

/// Formats wei with exactly six fractional digits, rounding half up.
pub fn format_eth_fixed6(wei: U256) -> String {
    let step = U256::from(WEI_PER_MICRO_ETHER);
    let micros = (wei.saturating_add(step / U256::from(2u64))) / step;
    let million = U256::from(1_000_000u64);
    let whole = micros / million;
    let fraction: u64 = (micros % million).to::<u64>();
    format!("{whole}.{fraction:06}")
}
