//! End-to-end pipeline tests.
//!
//! Drives every stage by hand over one paper exchange and one store:
//! signal -> trade -> protection -> outcome -> trust weight -> allow-list.

use rust_decimal_macros::dec;
use trustloop_bot::{AppConfig, Application};
use trustloop_core::{
    Candle, ExitReason, GroupId, InstrumentId, Interval, NewSignal, PositionSide, Price,
    SignalId, SignalStatus, TrustWindow,
};
use trustloop_store::{OutcomeStore, SignalStore, TradeStore, TrustWeightStore};

/// Minute-aligned.
const NOW: u64 = 1_700_000_040_000;
const MIN: u64 = 60_000;
const LATER: u64 = NOW + 10 * MIN;

const CONFIG: &str = r#"
[store]
path = ":memory:"

[admission]
demote_min_trades = 1

[executor]
fill_timeout_ms = 200
fill_poll_interval_ms = 10

[replay.barrier]
max_hold_minutes = 5

[trust]
min_trades = 1

[paper]
balance = "10000"

[[paper.instruments]]
id = "BTC-USDT-SWAP"
price = "50000"

[paper.instruments.spec]
contract_value = "0.01"
tick_size = "0.1"

[[paper.instruments]]
id = "ETH-USDT-SWAP"
price = "3000"

[paper.instruments.spec]
contract_value = "0.1"
tick_size = "0.01"

[[paper.groups]]
id = "g1"

[[paper.groups]]
id = "g2"
"#;

fn btc() -> InstrumentId {
    InstrumentId::from("BTC-USDT-SWAP")
}

fn eth() -> InstrumentId {
    InstrumentId::from("ETH-USDT-SWAP")
}

fn signal(instrument: InstrumentId, kind: &str, price: Price, group: &str, ts: u64) -> NewSignal {
    NewSignal::new(instrument, kind, price, ts).with_group(GroupId::from(group))
}

fn bar(ts_ms: u64, open: Price, high: Price, low: Price, close: Price) -> Candle {
    Candle::new(ts_ms, open, high, low, close)
}

fn status(app: &Application, id: SignalId) -> SignalStatus {
    app.store().get_signal(id).unwrap().unwrap().status
}

#[tokio::test]
async fn test_full_feedback_cycle() {
    let app = Application::new(AppConfig::from_toml_str(CONFIG).unwrap()).unwrap();
    let pipeline = app.pipeline();
    let paper = app.exchange();
    let store = app.store();
    paper.set_quote(btc(), Price::new(dec!(50000)), NOW);
    paper.set_quote(eth(), Price::new(dec!(3000)), NOW);

    // g1 goes long BTC, g2 goes short ETH.
    let long = store
        .insert_signal(signal(btc(), "BREAKOUT_UP", Price::new(dec!(50000)), "g1", NOW), NOW)
        .unwrap();
    let short = store
        .insert_signal(signal(eth(), "BREAKOUT_DOWN", Price::new(dec!(3000)), "g2", NOW), NOW)
        .unwrap();

    pipeline.admission.refresh(NOW).unwrap();
    let report = pipeline.promoter.run_pass(NOW).unwrap();
    assert_eq!(report.processed, 4);
    assert_eq!(status(&app, long), SignalStatus::WaitLive);
    assert_eq!(status(&app, short), SignalStatus::WaitLive);

    let report = pipeline.orchestrator.run_pass(NOW).await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(status(&app, long), SignalStatus::Done);
    assert_eq!(status(&app, short), SignalStatus::Done);
    assert_eq!(store.trades_pending_outcome(10).unwrap().len(), 2);

    let report = pipeline.guard.run_pass(NOW).await.unwrap();
    assert_eq!(report.errored, 0);
    assert!(paper.protection(&btc(), PositionSide::Long).is_some());
    assert!(paper.protection(&eth(), PositionSide::Short).is_some());

    // BTC runs through +0.6%, ETH through the short stop at 3012.
    let p = |d| Price::new(d);
    paper.set_candles(
        btc(),
        Interval::OneMinute,
        vec![bar(NOW, p(dec!(50000)), p(dec!(50350)), p(dec!(49990)), p(dec!(50320)))],
    );
    paper.set_candles(
        eth(),
        Interval::OneMinute,
        vec![bar(NOW, p(dec!(3000)), p(dec!(3015)), p(dec!(2995)), p(dec!(3013)))],
    );

    let report = pipeline.replayer.run_pass(LATER).await.unwrap();
    assert_eq!(report.processed, 2);
    let outcomes = store.outcomes_since(NOW).unwrap();
    assert_eq!(outcomes.len(), 2);
    let g1 = outcomes.iter().find(|o| o.group_id == GroupId::from("g1")).unwrap();
    let g2 = outcomes.iter().find(|o| o.group_id == GroupId::from("g2")).unwrap();
    assert_eq!(g1.exit_reason, ExitReason::TakeProfit);
    assert!(g1.pnl > dec!(0));
    assert_eq!(g2.exit_reason, ExitReason::StopLoss);
    assert_eq!(g2.exit_price, Price::new(dec!(3012)));
    assert!(g2.pnl < dec!(0));

    // A second replay pass labels nothing new.
    assert!(pipeline.replayer.run_pass(LATER + MIN).await.unwrap().is_empty());

    pipeline.trust.run_pass(LATER).unwrap();
    let weight = |group: &str| {
        store
            .trust_weight(&GroupId::from(group), TrustWindow::WEEK)
            .unwrap()
            .unwrap()
            .weight
    };
    assert_eq!(weight("g1"), dec!(1.5));
    assert_eq!(weight("g2"), dec!(0.5));
    assert_eq!(app.pool().get(&GroupId::from("g1")).unwrap().win_rate, dec!(1));
    assert_eq!(app.pool().get(&GroupId::from("g2")).unwrap().win_rate, dec!(0));

    // g2 is now demoted: its next signal waits in rehearsal, g1's goes live.
    let snapshot = pipeline.admission.refresh(LATER).unwrap();
    assert!(snapshot.is_allowed(&GroupId::from("g1")));
    assert!(!snapshot.is_allowed(&GroupId::from("g2")));

    let next_long = store
        .insert_signal(signal(btc(), "BREAKOUT_UP", Price::new(dec!(50000)), "g1", LATER), LATER)
        .unwrap();
    let next_short = store
        .insert_signal(signal(eth(), "BREAKOUT_DOWN", Price::new(dec!(3000)), "g2", LATER), LATER)
        .unwrap();
    pipeline.promoter.run_pass(LATER).unwrap();
    assert_eq!(status(&app, next_long), SignalStatus::WaitLive);
    assert_eq!(status(&app, next_short), SignalStatus::WaitRehearsal);
}

#[tokio::test]
async fn test_seeded_signals_are_inserted() {
    let config = format!(
        "{CONFIG}\n[[paper.signals]]\ninstrument = \"BTC-USDT-SWAP\"\nperiod = \"1m\"\ntimestamp_ms = 0\nreference_price = \"50000\"\nkind = \"BREAKOUT_UP\"\nstrategy_group_id = \"g1\"\n"
    );
    let app = Application::new(AppConfig::from_toml_str(&config).unwrap()).unwrap();
    let signals = app
        .store()
        .signals_in_status(SignalStatus::New, trustloop_store::SignalOrder::Oldest, 10)
        .unwrap();
    assert_eq!(signals.len(), 1);
    assert!(signals[0].timestamp_ms > 0);
}

#[tokio::test]
async fn test_restart_resumes_from_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db").join("trustloop.db");
    let config = format!(
        "{}\n[[paper.signals]]\ninstrument = \"BTC-USDT-SWAP\"\nperiod = \"1m\"\ntimestamp_ms = {NOW}\nreference_price = \"50000\"\nkind = \"BREAKOUT_UP\"\nstrategy_group_id = \"g1\"\n",
        CONFIG.replace(":memory:", &path.display().to_string())
    );

    let seeded = {
        let app = Application::new(AppConfig::from_toml_str(&config).unwrap()).unwrap();
        let pipeline = app.pipeline();
        pipeline.admission.refresh(NOW).unwrap();
        pipeline.promoter.run_pass(NOW).unwrap();
        let live = app
            .store()
            .signals_in_status(SignalStatus::WaitLive, trustloop_store::SignalOrder::Oldest, 10)
            .unwrap();
        assert_eq!(live.len(), 1);
        live[0].id
    };

    // Same file: the promoted signal is still there and seeding is skipped.
    let app = Application::new(AppConfig::from_toml_str(&config).unwrap()).unwrap();
    assert_eq!(app.store().signal_count().unwrap(), 1);
    assert_eq!(status(&app, seeded), SignalStatus::WaitLive);
}
