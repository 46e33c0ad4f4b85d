//! Graceful shutdown cascade.
//!
//! A connector owns a set of "closeables" (the I/O hub, open sockets,
//! in-flight handshake tasks). Closing the connector must close all of them
//! and then wait until each has actually finished tearing down. This mirrors
//! the watch-channel-plus-sentinel pattern used elsewhere in the workspace
//! for coordinating shutdown across an unknown number of tasks.

use tokio::sync::{mpsc, watch};

/// Creates a linked trigger/watcher pair. Calling [`DrainTrigger::start`]
/// notifies every clone of the returned [`DrainWatcher`]; awaiting
/// [`DrainTrigger::start`]'s returned future additionally blocks until every
/// watcher has been dropped, i.e. every task that held one has exited.
pub fn new() -> (DrainTrigger, DrainWatcher) {
	let (signal_tx, signal_rx) = watch::channel(false);
	let (done_tx, done_rx) = mpsc::channel::<()>(1);
	(
		DrainTrigger {
			signal_tx,
			done_tx: done_tx.clone(),
			done_rx: Some(done_rx),
		},
		DrainWatcher {
			signal_rx,
			_done_tx: done_tx,
		},
	)
}

#[derive(Clone)]
pub struct DrainWatcher {
	signal_rx: watch::Receiver<bool>,
	_done_tx: mpsc::Sender<()>,
}

impl DrainWatcher {
	/// Resolves once [`DrainTrigger::start`] has been called.
	pub async fn signaled(&mut self) {
		let _ = self.signal_rx.wait_for(|v| *v).await;
	}

	pub fn is_draining(&self) -> bool {
		*self.signal_rx.borrow()
	}
}

pub struct DrainTrigger {
	signal_tx: watch::Sender<bool>,
	done_tx: mpsc::Sender<()>,
	done_rx: Option<mpsc::Receiver<()>>,
}

impl DrainTrigger {
	/// Hands out a new watcher tied to this trigger. Every outstanding
	/// watcher must be dropped before [`Self::start`] resolves.
	pub fn watcher(&self) -> DrainWatcher {
		DrainWatcher {
			signal_rx: self.signal_tx.subscribe(),
			_done_tx: self.done_tx.clone(),
		}
	}

	/// Signals all watchers to begin shutting down, then waits for every
	/// clone of the internal sentinel sender to be dropped, meaning every
	/// watcher-holding task has actually exited.
	pub async fn start(mut self) {
		let _ = self.signal_tx.send(true);
		drop(self.done_tx);
		if let Some(mut rx) = self.done_rx.take() {
			// Resolves once every `DrainWatcher` (and its sentinel sender
			// clone) has been dropped, since `recv()` only returns `None`
			// when all senders are gone.
			while rx.recv().await.is_some() {}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn signals_all_watchers() {
		let (trigger, mut watcher) = new();
		let mut watcher2 = watcher.clone();
		assert!(!watcher.is_draining());
		let handle = tokio::spawn(async move {
			watcher.signaled().await;
			watcher2.signaled().await;
		});
		trigger.start().await;
		handle.await.unwrap();
	}

	#[tokio::test]
	async fn waits_for_watchers_to_drop() {
		let (trigger, watcher) = new();
		let task = tokio::spawn(async move {
			let _w = watcher;
			tokio::time::sleep(std::time::Duration::from_millis(20)).await;
		});
		// `start()` must not resolve until the spawned task drops its watcher.
		trigger.start().await;
		assert!(task.is_finished());
	}
}
