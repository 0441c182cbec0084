//! Event-table checks: what the exchange reports through tracing must agree
//! with what it returns.
#![cfg(feature = "instrument")]

use polars::prelude::*;

use exchange_core::instrument::{self, targets};
use exchange_core::{ExchangeConfig, MarketShape, random_market};

fn col_i64(df: &DataFrame, name: &str) -> Vec<i64> {
    df.column(name)
        .unwrap()
        .as_materialized_series()
        .cast(&DataType::Int64)
        .unwrap()
        .i64()
        .unwrap()
        .into_iter()
        .map(|v| v.unwrap_or(0))
        .collect()
}

#[test]
fn flow_events_sum_to_round_totals() {
    let mut exchange = random_market(3, &MarketShape::default(), ExchangeConfig::default()).unwrap();
    let mut totals = Vec::new();

    let tables = instrument::record(|| {
        for _ in 0..5 {
            totals.push(exchange.advance_round().unwrap().total_flow);
        }
    });

    let rounds = tables.get(targets::ROUND).unwrap();
    assert_eq!(rounds.rows(), 5);
    assert_eq!(rounds.ints("total_flow").unwrap(), totals);

    let Some(flows) = tables.frame(targets::FLOW) else {
        assert!(totals.iter().all(|&t| t == 0));
        return;
    };
    let flows = flows.unwrap();
    let by_round = flows
        .lazy()
        .group_by([col("round")])
        .agg([col("flow").sum().alias("total")])
        .sort(["round"], Default::default())
        .collect()
        .unwrap();

    let rounds_with_flow = col_i64(&by_round, "round");
    let flow_totals = col_i64(&by_round, "total");
    for (round, total) in rounds_with_flow.iter().zip(&flow_totals) {
        assert_eq!(*total, totals[(*round - 1) as usize]);
    }
}

#[test]
fn balance_events_cover_every_participant_every_round() {
    let shape = MarketShape::default();
    let mut exchange = random_market(11, &shape, ExchangeConfig::default()).unwrap();

    let tables = instrument::record(|| {
        for _ in 0..3 {
            exchange.advance_round().unwrap();
        }
    });

    let balances = tables.frame(targets::BALANCE).unwrap().unwrap();
    assert_eq!(balances.height(), 3 * (shape.buyers + shape.publishers) as usize);

    let last_round = balances
        .lazy()
        .filter(col("round").eq(lit(3)))
        .sort(["participant"], Default::default())
        .collect()
        .unwrap();
    let recorded = col_i64(&last_round, "balance_after");
    let actual: Vec<i64> = exchange.balances().into_iter().map(|(_, b)| b).collect();
    assert_eq!(recorded, actual);
}

#[test]
fn edge_events_match_built_edges() {
    let mut exchange = random_market(5, &MarketShape::default(), ExchangeConfig::default()).unwrap();
    let tables = instrument::record(|| exchange.build().unwrap());

    let edges = tables.get(targets::EDGE).map(|t| t.rows()).unwrap_or(0);
    assert_eq!(edges, exchange.edges().len());
}
