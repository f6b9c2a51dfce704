//! Symbol codec: instrument keys, trading symbols, exchange routing.
//!
//! The instrument key is the join point between local trades and
//! broker-reported positions. It is derived by stripping a FIXED-WIDTH
//! suffix (five strike digits + `CE`/`PE`) from the trading symbol — not by
//! parsing strike digits, because strike width varies across instruments.
//! Both sides of reconciliation must derive the key identically or matching
//! silently fails, so derivation validates the suffix shape and fails loudly
//! instead of mis-deriving on an unexpected width.

use chrono::{Datelike, NaiveDate};
use tracing::warn;

use crate::error::TradingError;
use crate::types::{Exchange, OptionType};

/// Width of the strike + option-type suffix on a trading symbol.
pub const OPTION_SUFFIX_LEN: usize = 7;

/// Strike digits inside the suffix.
const STRIKE_WIDTH: usize = 5;

/// Index symbols routed to BSE F&O; everything else enumerated below goes
/// to NSE F&O. New underlyings need an explicit entry here — misrouting an
/// order to the wrong exchange is worse than refusing a lookup.
const BFO_PREFIXES: &[&str] = &["SENSEX", "BANKEX"];
const NFO_PREFIXES: &[&str] = &["BANKNIFTY", "FINNIFTY", "MIDCPNIFTY", "NIFTY"];

/// Strip the strike + option-type suffix from a full trading symbol.
///
/// Errors with `MalformedSymbol` when the symbol is not longer than the
/// suffix or when the trailing seven characters are not five digits
/// followed by `CE`/`PE`.
pub fn instrument_key(trading_symbol: &str) -> Result<&str, TradingError> {
    let (instrument, _, _) = split_symbol(trading_symbol)?;
    Ok(instrument)
}

/// Split a trading symbol into (instrument key, strike, option type).
pub fn split_symbol(trading_symbol: &str) -> Result<(&str, u32, OptionType), TradingError> {
    if !trading_symbol.is_ascii() {
        return Err(TradingError::MalformedSymbol {
            symbol: trading_symbol.to_string(),
            reason: "symbol is not ASCII",
        });
    }
    if trading_symbol.len() <= OPTION_SUFFIX_LEN {
        return Err(TradingError::MalformedSymbol {
            symbol: trading_symbol.to_string(),
            reason: "shorter than the strike + option-type suffix",
        });
    }

    let (instrument, suffix) = trading_symbol.split_at(trading_symbol.len() - OPTION_SUFFIX_LEN);
    let (strike_digits, option_code) = suffix.split_at(STRIKE_WIDTH);

    let option_type = OptionType::parse(option_code).ok_or_else(|| TradingError::MalformedSymbol {
        symbol: trading_symbol.to_string(),
        reason: "suffix does not end in CE or PE",
    })?;
    let strike: u32 = strike_digits
        .parse()
        .map_err(|_| TradingError::MalformedSymbol {
            symbol: trading_symbol.to_string(),
            reason: "strike digits are not numeric",
        })?;

    Ok((instrument, strike, option_type))
}

/// Construct a full trading symbol from its parts.
///
/// The strike is rendered as plain digits with no separators. Strikes that
/// do not render to exactly five digits produce a symbol `split_symbol`
/// will refuse — the fixed-width contract is preserved, not papered over.
#[must_use]
pub fn build_trading_symbol(instrument: &str, strike: u32, option_type: OptionType) -> String {
    format!("{instrument}{strike}{option_type}")
}

/// Exchange segment for a trading symbol, by underlying prefix.
#[must_use]
pub fn exchange_for(trading_symbol: &str) -> Exchange {
    if BFO_PREFIXES.iter().any(|p| trading_symbol.starts_with(p)) {
        return Exchange::Bfo;
    }
    if NFO_PREFIXES.iter().any(|p| trading_symbol.starts_with(p)) {
        return Exchange::Nfo;
    }
    warn!(symbol = trading_symbol, "unknown symbol prefix, routing to NFO");
    Exchange::Nfo
}

/// Key the broker quote API expects: `"{EXCHANGE}:{symbol}"`.
#[must_use]
pub fn quote_key(trading_symbol: &str) -> String {
    format!("{}:{}", exchange_for(trading_symbol), trading_symbol)
}

/// Weekly expiry code: `YY` + month letter (A=Jan .. L=Dec) + `DD`.
/// e.g. 2024-12-19 → `24L19`.
#[must_use]
pub fn weekly_expiry_code(expiry: NaiveDate) -> String {
    let letter = (b'A' + (expiry.month() as u8 - 1)) as char;
    format!("{:02}{}{:02}", expiry.year() % 100, letter, expiry.day())
}

/// Monthly expiry code: `YY` + uppercase month abbreviation.
/// e.g. 2024-12-26 → `24DEC`.
#[must_use]
pub fn monthly_expiry_code(expiry: NaiveDate) -> String {
    const MONTHS: [&str; 12] = [
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ];
    format!(
        "{:02}{}",
        expiry.year() % 100,
        MONTHS[expiry.month0() as usize]
    )
}
