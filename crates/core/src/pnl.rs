//! Per-trade P&L math.

use rust_decimal::Decimal;

use crate::types::OrderSide;

/// Realized P&L for closing one leg.
///
/// BUY: (exit − entry) × quantity. SELL: (entry − exit) × quantity.
/// Quantity is the unsigned leg size; direction comes from `side` alone.
/// Rounded to two decimals, the persistence-boundary precision.
#[must_use]
pub fn close_trade_pnl(side: OrderSide, entry: Decimal, exit: Decimal, quantity: i32) -> Decimal {
    let qty = Decimal::from(quantity);
    let pnl = match side {
        OrderSide::Buy => (exit - entry) * qty,
        OrderSide::Sell => (entry - exit) * qty,
    };
    round_money(pnl)
}

/// Round to the two-decimal precision used at the persistence boundary.
#[must_use]
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn buy_gains_when_price_rises() {
        assert_eq!(
            close_trade_pnl(OrderSide::Buy, dec!(100), dec!(120), 50),
            dec!(1000)
        );
    }

    #[test]
    fn sell_loses_when_price_rises() {
        assert_eq!(
            close_trade_pnl(OrderSide::Sell, dec!(100), dec!(120), 50),
            dec!(-1000)
        );
    }

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(
            close_trade_pnl(OrderSide::Buy, dec!(100.005), dec!(100.012), 3),
            dec!(0.02)
        );
        assert_eq!(round_money(dec!(1.005)), dec!(1.00));
    }
}
