//! Property tests for order book reconstruction and its derived views

use proptest::prelude::*;
use rust_decimal::Decimal;

use market_feed::order_book::{OrderBook, PriceLevel};
use types::numeric::Price;

const DEPTH: usize = 25;

fn level(price: u32, amount: i32) -> PriceLevel {
    PriceLevel::new(Price::new(Decimal::from(price)), Decimal::from(amount))
}

fn arb_levels() -> impl Strategy<Value = Vec<PriceLevel>> {
    prop::collection::vec(
        (1u32..2_000, prop_oneof![-50i32..=-1, 1i32..=50]),
        0..120,
    )
    .prop_map(|entries| entries.into_iter().map(|(p, a)| level(p, a)).collect())
}

fn arb_deltas() -> impl Strategy<Value = Vec<PriceLevel>> {
    prop::collection::vec((1u32..2_000, -50i32..=50), 0..200)
        .prop_map(|entries| entries.into_iter().map(|(p, a)| level(p, a)).collect())
}

fn make_book(snapshot: Vec<PriceLevel>, deltas: Vec<PriceLevel>) -> OrderBook {
    let mut book = OrderBook::new();
    book.apply_snapshot(snapshot);
    for delta in deltas {
        book.apply_delta(delta);
    }
    book
}

proptest! {
    #[test]
    fn test_ladder_always_has_configured_rows(snapshot in arb_levels(), deltas in arb_deltas()) {
        let book = make_book(snapshot, deltas);
        let ladder = book.ladder(DEPTH);

        prop_assert_eq!(ladder.rows.len(), DEPTH);
        for (i, row) in ladder.rows.iter().enumerate() {
            prop_assert_eq!(row.id, i);
        }
    }

    #[test]
    fn test_ladder_sides_are_price_ordered(snapshot in arb_levels(), deltas in arb_deltas()) {
        let book = make_book(snapshot, deltas);
        let ladder = book.ladder(DEPTH);

        let bids: Vec<Price> = ladder.rows.iter().filter_map(|r| r.bid.as_ref().map(|l| l.price)).collect();
        let asks: Vec<Price> = ladder.rows.iter().filter_map(|r| r.ask.as_ref().map(|l| l.price)).collect();

        prop_assert!(bids.windows(2).all(|w| w[0] > w[1]));
        prop_assert!(asks.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_cumulative_depth_matches_displayed_levels(snapshot in arb_levels(), deltas in arb_deltas()) {
        let book = make_book(snapshot, deltas);
        let ladder = book.ladder(DEPTH);

        let bid_total: Decimal = book.bids().take(DEPTH).map(|l| l.size()).sum();
        let ask_total: Decimal = book.asks().take(DEPTH).map(|l| l.size()).sum();

        let last = &ladder.rows[DEPTH - 1];
        prop_assert_eq!(last.bid_depth, bid_total);
        prop_assert_eq!(last.ask_depth, ask_total);
        for row in &ladder.rows {
            prop_assert_eq!(row.max_depth, bid_total + ask_total);
            prop_assert!(row.bid_depth <= row.max_depth);
            prop_assert!(row.ask_depth <= row.max_depth);
        }
    }

    #[test]
    fn test_deleting_absent_price_changes_nothing(snapshot in arb_levels(), deltas in arb_deltas()) {
        let mut book = make_book(snapshot, deltas);
        let before = book.ladder(DEPTH);
        let curve_before = book.depth_curve();

        // Generated prices stay below 2000
        book.apply_delta(level(5_000, 0));

        prop_assert_eq!(book.ladder(DEPTH), before);
        prop_assert_eq!(book.depth_curve(), curve_before);
    }

    #[test]
    fn test_depth_curve_is_monotone(snapshot in arb_levels(), deltas in arb_deltas()) {
        let book = make_book(snapshot, deltas);
        let curve = book.depth_curve();

        prop_assert!(curve.bids.windows(2).all(|w| w[0].price < w[1].price && w[0].depth > w[1].depth));
        prop_assert!(curve.asks.windows(2).all(|w| w[0].price < w[1].price && w[0].depth < w[1].depth));

        let bid_total: Decimal = book.bids().map(|l| l.size()).sum();
        let ask_total: Decimal = book.asks().map(|l| l.size()).sum();
        prop_assert_eq!(curve.bids.first().map(|p| p.depth).unwrap_or_default(), bid_total);
        prop_assert_eq!(curve.asks.last().map(|p| p.depth).unwrap_or_default(), ask_total);
    }
}
