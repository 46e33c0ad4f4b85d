//! Per-attempt connection lifecycle state machine and listener fan-out.
//!
//! One [`ConnectionState`] exists per connection attempt. It is mutated
//! only by the thread/task currently dispatching a phase (the handshake
//! task for v1-v3, the I/O hub task for v4); later phases may be fired
//! from a different task, but never two phases concurrently.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use crate::cookie::Cookie;
use crate::endpoint::{Endpoint, InstanceIdentity};

/// Declared transition order from `spec.md` §4.5. Variants are ordered so
/// that `Lifecycle` derives `PartialOrd`: a correctly driven state machine
/// only ever moves non-decreasingly through this order (testable property
/// 3), except for the `Rejected` branch which is terminal from either of
/// the two properties phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
	Initialized,
	BeforeProperties,
	AfterProperties,
	Approved,
	BeforeChannel,
	AfterChannel,
	ChannelClosed,
	Disconnected,
	Rejected,
}

impl fmt::Display for Lifecycle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{self:?}")
	}
}

/// A placeholder for the external "channel" collaborator (§1, out of
/// scope): the connector treats it as an opaque handle produced once the
/// headers layer completes and consumed by nothing in this crate.
pub struct ChannelBuilder {
	pub binary_mode: bool,
}

pub struct ChannelHandle {
	pub cookie: Option<Cookie>,
	/// The negotiated byte-level transport, handed off to the external
	/// channel-multiplexer collaborator (`spec.md` §1, out of scope here).
	pub transport: crate::protocol::BoxedDuplex,
}

/// One connection attempt's mutable state. Only the dispatching
/// task/thread may call the `fire_*` methods; callers outside a dispatch
/// must not read `properties`/`channel_builder`/`channel` before the
/// corresponding phase per the invariants in `spec.md` §3.
pub struct ConnectionState {
	pub remote_description: String,
	pub lifecycle: Lifecycle,
	properties: Option<HashMap<String, String>>,
	channel_builder: Option<ChannelBuilder>,
	channel: Option<ChannelHandle>,
	pub rejection: Option<String>,
	pub close_cause: Option<String>,
	/// Opaque listener-private state, set only once `Lifecycle::Approved`
	/// is reached (the source's `stash`).
	stash: Option<Box<dyn Any + Send>>,
	listeners: Vec<Box<dyn Listener>>,
	/// Index of the listener that claimed ownership, if any, and whether
	/// the claim was approve (`true`) or reject (`false`).
	owner: Option<(usize, bool)>,
}

/// Outcome of dispatching one phase to the listener chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
	/// No listener has claimed ownership yet; dispatch continues to the
	/// next phase with the (possibly shrunk) listener set.
	Pending,
	Approved,
	Rejected,
}

/// What a listener callback decides to do with a single phase.
pub enum ListenerAction {
	/// Keep participating in future phases of this attempt.
	Continue,
	/// Drop out of the listener chain for the remainder of this attempt.
	Ignore,
	/// Claim ownership: this listener (and no other) receives every
	/// subsequent phase.
	Approve,
	/// Claim ownership and terminate the attempt.
	Reject(String),
}

/// A callback implementation participating in the fan-out of §4.5.
/// Listeners are consulted in order; a dispatch runs each listener's
/// phase-appropriate method until one claims ownership or all have been
/// asked (and none claimed any -> REJECTED per the spec's closing rule).
pub trait Listener: Send {
	fn before_properties(&mut self, _state: &ConnectionState) -> ListenerAction {
		ListenerAction::Continue
	}
	fn after_properties(&mut self, _state: &ConnectionState) -> ListenerAction {
		ListenerAction::Continue
	}
	fn before_channel(&mut self, _state: &mut ConnectionState) {}
	fn after_channel(&mut self, _state: &ConnectionState) {}
	fn channel_closed(&mut self, _state: &ConnectionState) {}
	fn disconnected(&mut self, _state: &ConnectionState) {}
}

impl ConnectionState {
	pub fn new(remote_description: String, listeners: Vec<Box<dyn Listener>>) -> Self {
		ConnectionState {
			remote_description,
			lifecycle: Lifecycle::Initialized,
			properties: None,
			channel_builder: None,
			channel: None,
			rejection: None,
			close_cause: None,
			stash: None,
			listeners,
			owner: None,
		}
	}

	pub fn properties(&self) -> Option<&HashMap<String, String>> {
		debug_assert!(self.lifecycle >= Lifecycle::AfterProperties);
		self.properties.as_ref()
	}

	pub fn channel_builder(&self) -> Option<&ChannelBuilder> {
		debug_assert!(self.lifecycle == Lifecycle::BeforeChannel);
		self.channel_builder.as_ref()
	}

	pub fn channel_builder_mut(&mut self) -> Option<&mut ChannelBuilder> {
		self.channel_builder.as_mut()
	}

	pub fn channel(&self) -> Option<&ChannelHandle> {
		debug_assert!(self.lifecycle >= Lifecycle::AfterChannel);
		self.channel.as_ref()
	}

	/// Takes ownership of the channel handle back out of the state. The
	/// connector is the sole owner of a `ConnectionState` for the lifetime
	/// of one attempt, so once the listener fan-out of `fire_after_channel`
	/// has run there is no further reader left to observe `self.channel`;
	/// this lets the connector move the (non-`Clone`) transport out to its
	/// caller without cloning it.
	pub fn take_channel(&mut self) -> Option<ChannelHandle> {
		debug_assert!(self.lifecycle >= Lifecycle::AfterChannel);
		self.channel.take()
	}

	pub fn stash(&self) -> Option<&(dyn Any + Send)> {
		self.stash.as_deref()
	}

	pub fn set_stash(&mut self, value: Box<dyn Any + Send>) {
		debug_assert!(self.lifecycle >= Lifecycle::Approved, "stash may only be set from APPROVED onward");
		self.stash = Some(value);
	}

	fn require(&self, expected: Lifecycle, fire: &str) {
		if self.lifecycle != expected {
			panic!("fire_{fire} called while lifecycle was {:?}, expected {expected:?}", self.lifecycle);
		}
	}

	/// Dispatches `BEFORE_PROPERTIES`. If this is the terminal properties
	/// phase and no listener has claimed ownership, callers must still
	/// call `fire_after_properties` -- rejection on a failed claim is only
	/// mandatory once `AFTER_PROPERTIES` completes (per §4.5 item 4), but a
	/// listener may reject early.
	pub fn fire_before_properties(&mut self) -> DispatchOutcome {
		self.require(Lifecycle::Initialized, "before_properties");
		self.lifecycle = Lifecycle::BeforeProperties;
		self.dispatch_properties_phase(|l, s| l.before_properties(s))
	}

	pub fn fire_after_properties(&mut self, properties: HashMap<String, String>) -> DispatchOutcome {
		self.require(Lifecycle::BeforeProperties, "after_properties");
		self.properties = Some(properties);
		self.lifecycle = Lifecycle::AfterProperties;
		let outcome = self.dispatch_properties_phase(|l, s| l.after_properties(s));
		if outcome == DispatchOutcome::Pending {
			let reason = self.rejection.clone().unwrap_or_else(|| "no listeners interested in connection".to_string());
			self.reject_internal(reason);
			return DispatchOutcome::Rejected;
		}
		outcome
	}

	fn dispatch_properties_phase(&mut self, mut call: impl FnMut(&mut dyn Listener, &ConnectionState) -> ListenerAction) -> DispatchOutcome {
		let remote_description = self.remote_description.clone();
		let properties_snapshot = self.properties.clone();
		let lifecycle = self.lifecycle;
		let mut kept = Vec::with_capacity(self.listeners.len());
		let mut claimed: Option<(usize, bool, String)> = None;

		for mut listener in std::mem::take(&mut self.listeners) {
			if claimed.is_some() {
				// Ownership already claimed by an earlier listener this
				// phase: remaining listeners are dropped atomically.
				continue;
			}
			// Build a read-only view for the callback without re-borrowing
			// `self` while `self.listeners` is emptied.
			let view = ConnectionState {
				remote_description: remote_description.clone(),
				lifecycle,
				properties: properties_snapshot.clone(),
				channel_builder: None,
				channel: None,
				rejection: None,
				close_cause: None,
				stash: None,
				listeners: Vec::new(),
				owner: None,
			};
			match call(listener.as_mut(), &view) {
				ListenerAction::Continue => kept.push(listener),
				ListenerAction::Ignore => {},
				ListenerAction::Approve => {
					claimed = Some((kept.len(), true, String::new()));
					kept.push(listener);
				},
				ListenerAction::Reject(reason) => {
					claimed = Some((kept.len(), false, reason));
					kept.push(listener);
				},
			}
		}

		if let Some((idx, approved, reason)) = claimed {
			self.owner = Some((idx, approved));
			self.listeners = vec![kept.into_iter().nth(idx).expect("claimed index in range")];
			if approved {
				self.lifecycle = Lifecycle::Approved;
				return DispatchOutcome::Approved;
			}
			self.rejection = Some(reason.clone());
			self.reject_internal(reason);
			return DispatchOutcome::Rejected;
		}

		self.listeners = kept;
		DispatchOutcome::Pending
	}

	fn reject_internal(&mut self, reason: String) {
		self.rejection = Some(reason);
		self.lifecycle = Lifecycle::Rejected;
	}

	pub fn fire_before_channel(&mut self, builder: ChannelBuilder) {
		self.require(Lifecycle::Approved, "before_channel");
		self.lifecycle = Lifecycle::BeforeChannel;
		self.channel_builder = Some(builder);
		for listener in &mut self.listeners {
			let mut view_builder = self.channel_builder.take().expect("set above");
			let mut scratch = ConnectionState {
				remote_description: self.remote_description.clone(),
				lifecycle: self.lifecycle,
				properties: self.properties.clone(),
				channel_builder: Some(view_builder),
				channel: None,
				rejection: None,
				close_cause: None,
				stash: None,
				listeners: Vec::new(),
				owner: None,
			};
			listener.before_channel(&mut scratch);
			view_builder = scratch.channel_builder.take().expect("listener must not drop the builder");
			self.channel_builder = Some(view_builder);
		}
	}

	pub fn fire_after_channel(&mut self, channel: ChannelHandle) {
		self.require(Lifecycle::BeforeChannel, "after_channel");
		self.channel_builder = None;
		self.channel = Some(channel);
		self.lifecycle = Lifecycle::AfterChannel;
		self.dispatch_unary(|l, s| l.after_channel(s));
	}

	pub fn fire_channel_closed(&mut self, cause: Option<String>) {
		debug_assert!(
			self.lifecycle == Lifecycle::AfterChannel,
			"fire_channel_closed called while lifecycle was {:?}",
			self.lifecycle
		);
		self.close_cause = cause;
		self.lifecycle = Lifecycle::ChannelClosed;
		self.dispatch_unary(|l, s| l.channel_closed(s));
	}

	/// Fires `DISCONNECTED`, auto-firing `CHANNEL_CLOSED` with no cause
	/// first if the attempt reached `AFTER_CHANNEL` without an explicit
	/// close (the peer closed the socket first, per the Data Model note on
	/// `channel`).
	pub fn fire_disconnected(&mut self) {
		if self.lifecycle == Lifecycle::AfterChannel {
			self.fire_channel_closed(None);
		}
		self.require(Lifecycle::ChannelClosed, "disconnected");
		self.lifecycle = Lifecycle::Disconnected;
		self.dispatch_unary(|l, s| l.disconnected(s));
	}

	fn dispatch_unary(&mut self, mut call: impl FnMut(&mut dyn Listener, &ConnectionState)) {
		let remote_description = self.remote_description.clone();
		let properties = self.properties.clone();
		let lifecycle = self.lifecycle;
		let close_cause = self.close_cause.clone();
		for listener in &mut self.listeners {
			let view = ConnectionState {
				remote_description: remote_description.clone(),
				lifecycle,
				properties: properties.clone(),
				channel_builder: None,
				channel: None,
				rejection: None,
				close_cause: close_cause.clone(),
				stash: None,
				listeners: Vec::new(),
				owner: None,
			};
			call(listener.as_mut(), &view);
		}
	}

	pub fn is_rejected(&self) -> bool {
		self.lifecycle == Lifecycle::Rejected
	}
}

/// Convenience used by the connector to describe the peer for logs before
/// a `ConnectionState` exists.
pub fn remote_description_for(endpoint: &Endpoint) -> String {
	format!("{}:{}", endpoint.host, endpoint.port)
}
