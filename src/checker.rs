use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::config::Settings;
use crate::diff::{self, Reason};
use crate::notify::Sink;
use crate::source::{Observation, PriceSource, Product};
use crate::storage::{History, HistoryRecord, HistoryStore};

const EMOJI_DEAL: &str = "🔥";

#[derive(Debug)]
pub struct Checked {
    pub product: Product,
    pub observation: Observation,
    pub reason: Option<Reason>,
    pub delivered: bool,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub requested: usize,
    pub checked: Vec<Checked>,
    pub skipped: usize,
    pub failures: usize,
}

impl RunSummary {
    pub fn notifications_sent(&self) -> usize {
        self.checked.iter().filter(|c| c.delivered).count()
    }

    pub fn discounted(&self) -> usize {
        self.checked
            .iter()
            .filter(|c| c.observation.discount_percent > 0)
            .count()
    }

    pub fn free(&self) -> usize {
        self.checked
            .iter()
            .filter(|c| c.observation.is_free())
            .count()
    }

    pub fn log_report(&self) {
        info!("{}", "=".repeat(60));
        info!("Run summary");
        info!("{}", "=".repeat(60));
        info!("Checked: {}/{}", self.checked.len(), self.requested);
        info!("Skipped (no price): {}", self.skipped);
        info!("Failed: {}", self.failures);
        info!("Discounted: {}", self.discounted());
        info!("Free: {}", self.free());
        info!("Notifications sent: {}", self.notifications_sent());

        let mut by_discount: Vec<_> = self.checked.iter().collect();
        by_discount.sort_by(|a, b| {
            b.observation
                .discount_percent
                .cmp(&a.observation.discount_percent)
        });
        for c in by_discount {
            let marker = if c.observation.discount_percent > 0 {
                EMOJI_DEAL
            } else {
                "  "
            };
            let note = match (c.reason, c.delivered) {
                (Some(reason), true) => format!(" [{reason}, notified]"),
                (Some(reason), false) => format!(" [{reason}]"),
                (None, _) => String::new(),
            };
            info!(
                "{marker} {}: {} (-{}%){note}",
                c.product.name, c.observation.price_formatted, c.observation.discount_percent
            );
        }
        info!("{}", "=".repeat(60));
    }
}

/// One pass over the configured products.
pub struct Checker<'a, S, N> {
    settings: &'a Settings,
    source: &'a S,
    sink: &'a N,
    store: &'a HistoryStore,
}

impl<'a, S: PriceSource, N: Sink> Checker<'a, S, N> {
    pub fn new(settings: &'a Settings, source: &'a S, sink: &'a N, store: &'a HistoryStore) -> Self {
        Self {
            settings,
            source,
            sink,
            store,
        }
    }

    pub fn run(&self) -> RunSummary {
        let products = self.settings.products();
        let pacing = Duration::from_millis(self.settings.pacing_delay_ms);
        let mut history = self.store.load();
        let mut summary = RunSummary {
            requested: products.len(),
            ..Default::default()
        };

        for (i, product) in products.into_iter().enumerate() {
            if i > 0 && !pacing.is_zero() {
                thread::sleep(pacing);
            }

            info!("Checking {} (id {})", product.name, product.id);
            match self.source.fetch(&product) {
                Ok(Some(observation)) => {
                    let checked = self.check(product, observation, &mut history);
                    summary.checked.push(checked);
                }
                Ok(None) => {
                    warn!("{} has no price information, skipping", product.name);
                    summary.skipped += 1;
                }
                Err(e) => {
                    error!("Failed to fetch {} (id {}): {e}", product.name, product.id);
                    summary.failures += 1;
                }
            }
        }

        if let Err(e) = self.store.save(&history) {
            error!(
                "Failed to save history to {}: {e:#}",
                self.store.path().display()
            );
        }

        summary
    }

    fn check(&self, product: Product, observation: Observation, history: &mut History) -> Checked {
        info!(
            "{}: {} (-{}%)",
            product.name, observation.price_formatted, observation.discount_percent
        );

        let prior = history.get(&product.id);
        let decision = diff::decide(&observation, prior, self.settings.threshold());

        let delivered = match decision.reason {
            Some(reason) if decision.deliver => {
                self.sink.notify(&product, &observation, reason)
            }
            Some(reason) => {
                info!(
                    "{} changed ({reason}) but -{}% is below the {}% threshold",
                    product.name,
                    observation.discount_percent,
                    self.settings.threshold()
                );
                false
            }
            None => false,
        };

        let last_notification = if decision.attempted() {
            Some(observation.observed_at)
        } else {
            prior.and_then(|r| r.last_notification)
        };
        history.insert(
            product.id.clone(),
            HistoryRecord {
                last_price: observation.price,
                last_discount: observation.discount_percent,
                last_notification,
                name: product.name.clone(),
                last_checked: Some(observation.observed_at),
            },
        );

        Checked {
            product,
            observation,
            reason: decision.reason,
            delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FetchError;
    use chrono::NaiveDateTime;
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;
    use std::cell::RefCell;
    use std::collections::{BTreeMap, HashMap};

    #[derive(Clone, Copy)]
    enum Canned {
        Price(u64, u8),
        NoPrice,
        Fail,
    }

    struct FakeSource(HashMap<&'static str, Canned>);

    impl PriceSource for FakeSource {
        fn fetch(&self, product: &Product) -> Result<Option<Observation>, FetchError> {
            match self.0.get(product.id.as_str()) {
                Some(Canned::Price(price, discount)) => Ok(Some(Observation {
                    price: *price,
                    price_formatted: format!("${price}"),
                    discount_percent: *discount,
                    original_price_formatted: String::new(),
                    observed_at: now(),
                })),
                Some(Canned::NoPrice) => Ok(None),
                Some(Canned::Fail) | None => Err(FetchError::Status(StatusCode::BAD_GATEWAY)),
            }
        }
    }

    struct FakeSink {
        accept: bool,
        sent: RefCell<Vec<(String, Reason)>>,
    }

    impl FakeSink {
        fn new(accept: bool) -> Self {
            Self {
                accept,
                sent: RefCell::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<(String, Reason)> {
            self.sent.borrow().clone()
        }
    }

    impl Sink for FakeSink {
        fn notify(&self, product: &Product, _: &Observation, reason: Reason) -> bool {
            self.sent.borrow_mut().push((product.id.clone(), reason));
            self.accept
        }
    }

    fn now() -> NaiveDateTime {
        "2024-06-01T12:00:00".parse().unwrap()
    }

    fn settings(ids: &[&str]) -> Settings {
        Settings {
            apps: ids
                .iter()
                .map(|id| (id.to_string(), format!("Game {id}")))
                .collect::<BTreeMap<_, _>>(),
            pacing_delay_ms: 0,
            ..Settings::default()
        }
    }

    fn record(last_price: u64, last_discount: u8) -> HistoryRecord {
        HistoryRecord {
            last_price,
            last_discount,
            last_notification: None,
            name: "old".into(),
            last_checked: None,
        }
    }

    fn source(entries: &[(&'static str, Canned)]) -> FakeSource {
        FakeSource(entries.iter().copied().collect())
    }

    #[test]
    fn first_run_notifies_only_above_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));
        let settings = settings(&["1", "2"]);
        let source = source(&[("1", Canned::Price(500, 50)), ("2", Canned::Price(1000, 5))]);
        let sink = FakeSink::new(true);

        let summary = Checker::new(&settings, &source, &sink, &store).run();

        assert_eq!(sink.sent(), vec![("1".to_string(), Reason::FirstTime)]);
        assert_eq!(summary.notifications_sent(), 1);
        assert_eq!(summary.checked.len(), 2);

        let history = store.load();
        assert_eq!(history["1"].last_price, 500);
        assert_eq!(history["1"].last_discount, 50);
        assert_eq!(history["1"].last_notification, Some(now()));
        assert_eq!(history["1"].name, "Game 1");
        assert_eq!(history["2"].last_price, 1000);
        assert_eq!(history["2"].last_notification, None);
        assert_eq!(history["2"].last_checked, Some(now()));
    }

    #[test]
    fn second_identical_run_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));
        let settings = settings(&["1"]);
        let source = source(&[("1", Canned::Price(500, 50))]);
        let sink = FakeSink::new(true);

        Checker::new(&settings, &source, &sink, &store).run();
        let summary = Checker::new(&settings, &source, &sink, &store).run();

        assert_eq!(sink.sent().len(), 1);
        assert_eq!(summary.notifications_sent(), 0);
    }

    #[test]
    fn gated_price_drop_is_recorded_but_not_sent() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));
        store
            .save(&History::from([("1".to_string(), record(1000, 20))]))
            .unwrap();
        let settings = settings(&["1"]);
        let source = source(&[("1", Canned::Price(900, 5))]);
        let sink = FakeSink::new(true);

        let summary = Checker::new(&settings, &source, &sink, &store).run();

        assert!(sink.sent().is_empty());
        assert_eq!(summary.checked[0].reason, Some(Reason::PriceDrop));
        assert!(!summary.checked[0].delivered);
        let history = store.load();
        assert_eq!(history["1"].last_price, 900);
        assert_eq!(history["1"].last_notification, Some(now()));
    }

    #[test]
    fn failures_do_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));
        let settings = settings(&["1", "2", "3", "4"]);
        let source = source(&[
            ("1", Canned::Fail),
            ("2", Canned::Price(500, 50)),
            ("3", Canned::NoPrice),
            ("4", Canned::Price(250, 75)),
        ]);
        // the sink rejects everything
        let sink = FakeSink::new(false);

        let summary = Checker::new(&settings, &source, &sink, &store).run();

        assert_eq!(
            sink.sent(),
            vec![
                ("2".to_string(), Reason::FirstTime),
                ("4".to_string(), Reason::FirstTime)
            ]
        );
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.notifications_sent(), 0);

        let history = store.load();
        assert_eq!(
            history.keys().cloned().collect::<Vec<_>>(),
            vec!["2".to_string(), "4".to_string()]
        );
    }

    #[test]
    fn failed_save_still_returns_summary() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let store = HistoryStore::new(blocker.join("history.json"));
        let settings = settings(&["1", "2"]);
        let source = source(&[("1", Canned::Price(500, 50)), ("2", Canned::Price(250, 75))]);
        let sink = FakeSink::new(true);

        let summary = Checker::new(&settings, &source, &sink, &store).run();

        assert_eq!(summary.checked.len(), 2);
        assert_eq!(summary.notifications_sent(), 2);
        assert_eq!(summary.failures, 0);
        assert!(!blocker.join("history.json").exists());
    }

    #[test]
    fn unchanged_product_keeps_previous_notification_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));
        let earlier: NaiveDateTime = "2024-05-01T08:00:00".parse().unwrap();
        let mut prior = record(1000, 20);
        prior.last_notification = Some(earlier);
        store
            .save(&History::from([("1".to_string(), prior)]))
            .unwrap();
        let settings = settings(&["1"]);
        let source = source(&[("1", Canned::Price(1000, 20))]);
        let sink = FakeSink::new(true);

        Checker::new(&settings, &source, &sink, &store).run();

        assert!(sink.sent().is_empty());
        let history = store.load();
        assert_eq!(history["1"].last_notification, Some(earlier));
        assert_eq!(history["1"].name, "Game 1");
    }

    #[test]
    fn summary_counts() {
        let free = Observation::free(now());
        let summary = RunSummary {
            requested: 3,
            checked: vec![
                Checked {
                    product: Product::new("1", "A"),
                    observation: free,
                    reason: Some(Reason::FirstTime),
                    delivered: true,
                },
                Checked {
                    product: Product::new("2", "B"),
                    observation: Observation {
                        price: 1000,
                        price_formatted: "$10".into(),
                        discount_percent: 0,
                        original_price_formatted: "$10".into(),
                        observed_at: now(),
                    },
                    reason: None,
                    delivered: false,
                },
            ],
            skipped: 0,
            failures: 1,
        };

        assert_eq!(summary.discounted(), 1);
        assert_eq!(summary.free(), 1);
        assert_eq!(summary.notifications_sent(), 1);
        summary.log_report();
    }
}
