//! Event system for the reactive ledger store.
//!
//! Every recomputation of the derived reconciliation state is published on typed channels that
//! form a dotted hierarchy:
//!
//! - `config`
//! - `raw.<ledger>`
//! - `derived.groups`
//! - `derived.linked.<participant>`
//! - `derived.unlinked.<participant>`
//!
//! A subscriber registered on a channel receives every event published on that channel and on
//! any channel below it, so a subscriber on `derived` sees all derived updates. Subscribers are
//! isolated from each other: a failing subscriber is logged and the remaining ones still run.

use crate::cache::TransactionRecord;
use crate::config::ReconcileConfig;
use crate::store::derive::LinkedGroup;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

const SEPARATOR: char = '.';

/// A dotted channel path such as `derived.linked.alice`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel(String);

impl Channel {
	pub fn new(path: impl Into<String>) -> Self {
		Channel(path.into())
	}

	pub fn config() -> Self {
		Channel::new("config")
	}

	pub fn raw(ledger_id: &str) -> Self {
		Channel(format!("raw{SEPARATOR}{ledger_id}"))
	}

	pub fn derived() -> Self {
		Channel::new("derived")
	}

	pub fn groups() -> Self {
		Channel(format!("derived{SEPARATOR}groups"))
	}

	pub fn linked(participant: &str) -> Self {
		Channel(format!("derived{SEPARATOR}linked{SEPARATOR}{participant}"))
	}

	pub fn unlinked(participant: &str) -> Self {
		Channel(format!("derived{SEPARATOR}unlinked{SEPARATOR}{participant}"))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Whether an event on `self` reaches a subscriber of `subscription`: same channel, or a
	/// channel below it.
	pub fn is_within(&self, subscription: &Channel) -> bool {
		match self.0.strip_prefix(subscription.as_str()) {
			Some("") => true,
			Some(rest) => rest.starts_with(SEPARATOR),
			None => false,
		}
	}
}

impl fmt::Display for Channel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Values published by the store.
#[derive(Debug, Clone)]
pub enum StoreEvent {
	/// The configuration changed.
	Config(ReconcileConfig),
	/// The raw transaction set of a ledger changed.
	Raw {
		ledger_id: String,
		transactions: Vec<TransactionRecord>,
	},
	/// All linked groups, newest first.
	Groups(Vec<LinkedGroup>),
	/// Tagged transactions of one participant, both sides, newest first.
	Linked {
		participant: String,
		transactions: Vec<TransactionRecord>,
	},
	/// Untagged transactions of one participant, per side, newest first.
	Unlinked {
		participant: String,
		personal: Vec<TransactionRecord>,
		shared: Vec<TransactionRecord>,
	},
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("Subscriber {name} failed: {message}")]
	Subscriber { name: String, message: String },
}

/// Trait for receiving store updates.
///
/// Called synchronously, after the recomputation finished and with no store lock held, so a
/// subscriber may read from the store.
pub trait StoreSubscriber: Send + Sync {
	fn on_update(&self, channel: &Channel, event: &StoreEvent) -> Result<(), StoreError>;

	/// Get the name of this subscriber for logging and diagnostics.
	fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
	id: SubscriptionId,
	channel: Channel,
	subscriber: Arc<dyn StoreSubscriber>,
}

/// Registry of subscribers and their channels.
#[derive(Default)]
pub struct EventBus {
	subscriptions: Mutex<Vec<Subscription>>,
	next_id: AtomicU64,
}

impl EventBus {
	pub fn new() -> Self {
		Self::default()
	}

	fn subscriptions(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
		self.subscriptions
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Register a subscriber. Subscribers are called in the order they subscribed.
	pub fn subscribe(&self, channel: Channel, subscriber: Arc<dyn StoreSubscriber>) -> SubscriptionId {
		let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
		debug!("{} subscribed to {}", subscriber.name(), channel);
		self.subscriptions().push(Subscription {
			id,
			channel,
			subscriber,
		});
		id
	}

	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		let mut subscriptions = self.subscriptions();
		let before = subscriptions.len();
		subscriptions.retain(|s| s.id != id);
		subscriptions.len() != before
	}

	pub fn is_empty(&self) -> bool {
		self.subscriptions().is_empty()
	}

	/// Deliver an event to every subscriber of the channel or one of its parents.
	///
	/// Errors from subscribers are logged, but do not stop other subscribers from running.
	/// Returns how many subscribers received the event without error.
	pub fn publish(&self, channel: &Channel, event: &StoreEvent) -> usize {
		let targets: Vec<Arc<dyn StoreSubscriber>> = self
			.subscriptions()
			.iter()
			.filter(|s| channel.is_within(&s.channel))
			.map(|s| s.subscriber.clone())
			.collect();

		let mut delivered = 0;
		for subscriber in targets {
			match subscriber.on_update(channel, event) {
				Ok(()) => delivered += 1,
				Err(e) => error!(
					"Subscriber {} failed to process {}: {}",
					subscriber.name(),
					channel,
					e
				),
			}
		}
		delivered
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Recorder {
		name: &'static str,
		seen: Mutex<Vec<String>>,
		fail: bool,
	}

	impl Recorder {
		fn new(name: &'static str, fail: bool) -> Arc<Self> {
			Arc::new(Self {
				name,
				seen: Mutex::new(Vec::new()),
				fail,
			})
		}

		fn seen(&self) -> Vec<String> {
			self.seen.lock().unwrap().clone()
		}
	}

	impl StoreSubscriber for Recorder {
		fn on_update(&self, channel: &Channel, _event: &StoreEvent) -> Result<(), StoreError> {
			self.seen.lock().unwrap().push(channel.to_string());
			if self.fail {
				return Err(StoreError::Subscriber {
					name: self.name.to_string(),
					message: "boom".to_string(),
				});
			}
			Ok(())
		}

		fn name(&self) -> &str {
			self.name
		}
	}

	fn groups_event() -> StoreEvent {
		StoreEvent::Groups(Vec::new())
	}

	#[test]
	fn channels_nest_on_dot_boundaries() {
		assert!(Channel::linked("alice").is_within(&Channel::derived()));
		assert!(Channel::linked("alice").is_within(&Channel::new("derived.linked")));
		assert!(Channel::groups().is_within(&Channel::groups()));
		assert!(!Channel::derived().is_within(&Channel::groups()));
		assert!(!Channel::new("derivedx").is_within(&Channel::derived()));
		assert!(!Channel::raw("L1").is_within(&Channel::derived()));
	}

	#[test]
	fn parent_and_exact_subscribers_both_receive() {
		let bus = EventBus::new();
		let parent = Recorder::new("parent", false);
		let exact = Recorder::new("exact", false);
		let other = Recorder::new("other", false);
		bus.subscribe(Channel::derived(), parent.clone());
		bus.subscribe(Channel::groups(), exact.clone());
		bus.subscribe(Channel::config(), other.clone());

		assert_eq!(bus.publish(&Channel::groups(), &groups_event()), 2);
		assert_eq!(parent.seen(), vec!["derived.groups"]);
		assert_eq!(exact.seen(), vec!["derived.groups"]);
		assert!(other.seen().is_empty());
	}

	#[test]
	fn failing_subscriber_does_not_block_others() {
		let bus = EventBus::new();
		let failing = Recorder::new("failing", true);
		let healthy = Recorder::new("healthy", false);
		bus.subscribe(Channel::derived(), failing.clone());
		bus.subscribe(Channel::derived(), healthy.clone());

		assert_eq!(bus.publish(&Channel::groups(), &groups_event()), 1);
		assert_eq!(failing.seen().len(), 1);
		assert_eq!(healthy.seen().len(), 1);
	}

	#[test]
	fn unsubscribed_subscriber_is_not_called() {
		let bus = EventBus::new();
		let recorder = Recorder::new("gone", false);
		let id = bus.subscribe(Channel::derived(), recorder.clone());
		assert!(bus.unsubscribe(id));
		assert!(!bus.unsubscribe(id));
		assert_eq!(bus.publish(&Channel::groups(), &groups_event()), 0);
		assert!(recorder.seen().is_empty());
		assert!(bus.is_empty());
	}
}
