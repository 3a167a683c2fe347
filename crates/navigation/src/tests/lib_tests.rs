use super::*;

struct FakeMechanism {
    current: Mutex<Option<LocationToken>>,
    log: Mutex<Vec<String>>,
    precise: bool,
}

impl FakeMechanism {
    fn new() -> Arc<Self> {
        Self::with_precision(true)
    }

    fn imprecise() -> Arc<Self> {
        Self::with_precision(false)
    }

    fn with_precision(precise: bool) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(None),
            log: Mutex::new(Vec::new()),
            precise,
        })
    }

    /// Simulates an externally caused location change.
    fn jump_to(&self, token: &str) {
        *self.current.lock().expect("current lock") = Some(LocationToken::from(token));
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().expect("log lock").clone()
    }
}

impl HistoryMechanism for FakeMechanism {
    fn current_token(&self) -> Option<LocationToken> {
        self.current.lock().expect("current lock").clone()
    }

    fn navigate_to(&self, token: &LocationToken) {
        *self.current.lock().expect("current lock") = Some(token.clone());
        self.log
            .lock()
            .expect("log lock")
            .push(format!("nav:{token}"));
    }

    fn back(&self) {
        self.log.lock().expect("log lock").push("back".to_string());
    }

    fn go(&self, delta: i64) {
        self.log.lock().expect("log lock").push(format!("go:{delta}"));
    }

    fn precise_traversal(&self) -> bool {
        self.precise
    }
}

/// Adds an item under a fixed token and drains the self-initiated
/// notification, as the embedding's change forwarding would.
fn add_and_settle(tracker: &HistoryTracker<&'static str>, item: &'static str, token: &str) {
    tracker.add(item, Some(LocationToken::from(token)));
    assert!(
        tracker.observe_location_change().is_none(),
        "self-initiated changes must not reach reconciliation"
    );
}

#[test]
fn back_and_forward_are_classified_against_the_shadow_stack() {
    let mechanism = FakeMechanism::new();
    let tracker: HistoryTracker<&'static str> = HistoryTracker::new(
        Arc::clone(&mechanism) as Arc<dyn HistoryMechanism>,
    );
    add_and_settle(&tracker, "A", "tok-a");
    add_and_settle(&tracker, "B", "tok-b");
    assert_eq!(tracker.current_index(), 2);

    // External jump to the previous token reads as "back".
    mechanism.jump_to("tok-a");
    let change = tracker.observe_location_change().expect("change");
    assert_eq!(change.direction, Direction::Back);
    assert_eq!(change.prev_item, Some("B"));
    assert_eq!(change.new_item, Some("A"));
    assert!(change.from_history);
    assert_eq!(tracker.current_index(), 1);

    // A brand-new token reads as "forward" and is appended, replacing the
    // truncated forward entries.
    mechanism.jump_to("tok-c");
    let change = tracker.observe_location_change().expect("change");
    assert_eq!(change.direction, Direction::Forward);
    assert_eq!(change.new_item, None);
    assert_eq!(tracker.current_index(), 2);
    assert_eq!(tracker.get_items(1, -1), vec![Some("A"), None]);
}

#[test]
fn adding_replaces_forward_entries() {
    let mechanism = FakeMechanism::new();
    let tracker: HistoryTracker<&'static str> =
        HistoryTracker::new(Arc::clone(&mechanism) as Arc<dyn HistoryMechanism>);
    add_and_settle(&tracker, "A", "tok-a");
    add_and_settle(&tracker, "B", "tok-b");

    mechanism.jump_to("tok-a");
    tracker.observe_location_change().expect("back to A");

    add_and_settle(&tracker, "C", "tok-c");
    assert_eq!(tracker.get_items(1, -1), vec![Some("A"), Some("C")]);
    assert_eq!(tracker.get_item(-1), Some("A"));
    assert_eq!(tracker.get_item(0), Some("C"));
}

#[test]
fn duplicate_notifications_are_swallowed() {
    let mechanism = FakeMechanism::new();
    let tracker: HistoryTracker<&'static str> =
        HistoryTracker::new(Arc::clone(&mechanism) as Arc<dyn HistoryMechanism>);
    add_and_settle(&tracker, "A", "tok-a");
    add_and_settle(&tracker, "B", "tok-b");

    mechanism.jump_to("tok-a");
    assert!(tracker.observe_location_change().is_some());
    assert!(
        tracker.observe_location_change().is_none(),
        "the repeated token must not raise a second event"
    );
}

#[test]
fn a_multi_step_jump_cannot_be_classified() {
    let mechanism = FakeMechanism::new();
    let tracker: HistoryTracker<&'static str> =
        HistoryTracker::new(Arc::clone(&mechanism) as Arc<dyn HistoryMechanism>);
    add_and_settle(&tracker, "A", "tok-a");
    add_and_settle(&tracker, "B", "tok-b");
    add_and_settle(&tracker, "C", "tok-c");

    mechanism.jump_to("tok-a");
    let change = tracker.observe_location_change().expect("change");
    assert_eq!(change.direction, Direction::Unknown);
    assert_eq!(tracker.current_index(), 1, "the cursor still re-synchronizes");
}

#[test]
fn item_slices_follow_the_relative_end_rule() {
    let mechanism = FakeMechanism::new();
    let tracker: HistoryTracker<&'static str> =
        HistoryTracker::new(Arc::clone(&mechanism) as Arc<dyn HistoryMechanism>);
    assert!(!tracker.can_go_back());

    add_and_settle(&tracker, "A", "tok-a");
    assert!(!tracker.can_go_back(), "backing past the first entry would leave the app");

    add_and_settle(&tracker, "B", "tok-b");
    assert!(tracker.can_go_back());

    // start = 0 includes the sentinel as a None entry.
    assert_eq!(tracker.get_items(0, 0), vec![None, Some("A")]);
    // end = -1 includes the current entry.
    assert_eq!(tracker.get_items(1, -1), vec![Some("A"), Some("B")]);
    assert_eq!(tracker.get_items(2, 1), Vec::<Option<&'static str>>::new());
}

#[test]
fn imprecise_hosts_get_the_target_token_forced() {
    let mechanism = FakeMechanism::imprecise();
    let tracker: HistoryTracker<&'static str> =
        HistoryTracker::new(Arc::clone(&mechanism) as Arc<dyn HistoryMechanism>);
    add_and_settle(&tracker, "A", "tok-a");
    add_and_settle(&tracker, "B", "tok-b");

    tracker.back();
    let log = mechanism.log();
    assert_eq!(log.last().map(String::as_str), Some("nav:tok-a"));
    assert!(!log.contains(&"back".to_string()));

    // The forced navigation is reconciled like any external change.
    let change = tracker.observe_location_change().expect("change");
    assert_eq!(change.direction, Direction::Back);
    assert_eq!(change.new_item, Some("A"));
}

#[test]
fn precise_hosts_delegate_traversal() {
    let mechanism = FakeMechanism::new();
    let tracker: HistoryTracker<&'static str> =
        HistoryTracker::new(Arc::clone(&mechanism) as Arc<dyn HistoryMechanism>);
    add_and_settle(&tracker, "A", "tok-a");
    add_and_settle(&tracker, "B", "tok-b");

    tracker.back();
    tracker.go(1);
    let log = mechanism.log();
    assert_eq!(log.last().map(String::as_str), Some("go:1"));
    assert!(log.contains(&"back".to_string()));
}

#[test]
fn imprecise_go_clamps_to_the_stack_bounds() {
    let mechanism = FakeMechanism::imprecise();
    let tracker: HistoryTracker<&'static str> =
        HistoryTracker::new(Arc::clone(&mechanism) as Arc<dyn HistoryMechanism>);
    add_and_settle(&tracker, "A", "tok-a");
    add_and_settle(&tracker, "B", "tok-b");

    tracker.go(-5);
    assert_eq!(mechanism.log().last().cloned(), Some(format!("nav:{ROOT_TOKEN}")));

    // Arriving at the sentinel raises no event but re-syncs the cursor.
    assert!(tracker.observe_location_change().is_none());
    assert_eq!(tracker.current_index(), 0);
    assert!(!tracker.can_go_back());
}

#[test]
fn generated_tokens_are_unique() {
    let mechanism = FakeMechanism::new();
    let tracker: HistoryTracker<&'static str> =
        HistoryTracker::new(mechanism as Arc<dyn HistoryMechanism>);
    let first = tracker.add("A", None);
    let second = tracker.add("B", None);
    assert_ne!(first, second);
}

#[test]
fn reset_reseeds_the_sentinel() {
    let mechanism = FakeMechanism::new();
    let tracker: HistoryTracker<&'static str> =
        HistoryTracker::new(mechanism as Arc<dyn HistoryMechanism>);
    add_and_settle(&tracker, "A", "tok-a");
    tracker.reset();
    assert_eq!(tracker.current_index(), 0);
    assert!(tracker.get_items(0, -1).len() == 1);
    assert_eq!(tracker.get_item(0), None);
}
