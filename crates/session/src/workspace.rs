// The collaboration session orchestrator.
//
// One actor task per open document: it joins the presence channel, wires
// channel and store events into the component set, and owns the session
// lifecycle. The public `Workspace` handle forwards host UI events and
// lifecycle hooks into the actor; dropping the handle tears the session
// down.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use tandem_common::protocol::whisper::{
    ActorPayload, FieldChangePayload, FocusPayload, ForceUnlockPayload, PublishedPayload,
    StatePayload, WhisperEvent,
};
use tandem_common::types::{DocumentRef, Session};

use crate::lock::FieldLockCoordinator;
use crate::meta;
use crate::ports::{AudioCue, ChannelEvent, PresenceChannel, SessionContext, StoreMutation, SubscriptionId};
use crate::presence::PresenceRegistry;
use crate::rendezvous::StateRendezvous;
use crate::sync::{ChangeKind, ValueSyncEngine};
use crate::transport::WhisperTransport;

/// Host-originated commands forwarded into the actor.
enum Command {
    FocusField { handle: String },
    BlurField { handle: String },
    RequestUnlock { target_user: String },
    EntrySaved { reference: String },
    EntryPublished { reference: String, message: Option<String> },
    RevisionRestored { reference: String, done: oneshot::Sender<()> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Handle to a running collaboration session.
pub struct Workspace {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl Workspace {
    /// Join the document's presence channel and start the session actor.
    pub fn start(ctx: SessionContext, document: DocumentRef) -> Result<Self> {
        let channel_name = document.channel_name();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let channel = ctx
            .transport
            .join(&channel_name, events_tx)
            .with_context(|| format!("failed to join presence channel {channel_name}"))?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let (mutations_tx, mutations_rx) = mpsc::unbounded_channel();

        let transport = WhisperTransport::new(
            channel.clone(),
            ctx.ids.clone(),
            ctx.config.chunk_size,
            ctx.config.assembly_ttl(),
        );
        let sync = ValueSyncEngine::new(ctx.config.debounce_window());

        let actor = SessionActor {
            ctx,
            document,
            channel_name,
            channel,
            transport,
            registry: PresenceRegistry::new(),
            locks: FieldLockCoordinator::new(),
            sync,
            rendezvous: StateRendezvous::new(),
            me: None,
            store_subscription: None,
            mutations_tx,
        };
        let task = tokio::spawn(actor.run(events_rx, commands_rx, mutations_rx, shutdown_rx));

        Ok(Self { commands: commands_tx, shutdown: shutdown_tx, task: Some(task) })
    }

    /// The local user focused a field.
    pub fn focus_field(&self, handle: &str) {
        let _ = self.commands.send(Command::FocusField { handle: handle.to_string() });
    }

    /// The local user blurred a field.
    pub fn blur_field(&self, handle: &str) {
        let _ = self.commands.send(Command::BlurField { handle: handle.to_string() });
    }

    /// Ask that another user's lock be broken. Addressed by stable user
    /// id; every session of that user will blur and unlock.
    pub fn request_unlock(&self, target_user: &str) {
        let _ = self.commands.send(Command::RequestUnlock { target_user: target_user.to_string() });
    }

    /// Host lifecycle: the entry was saved locally.
    pub fn entry_saved(&self, reference: &str) {
        let _ = self.commands.send(Command::EntrySaved { reference: reference.to_string() });
    }

    /// Host lifecycle: the entry was published locally.
    pub fn entry_published(&self, reference: &str, message: Option<&str>) {
        let _ = self.commands.send(Command::EntryPublished {
            reference: reference.to_string(),
            message: message.map(str::to_string),
        });
    }

    /// Host lifecycle: a revision was restored locally. Resolves once the
    /// announcement has had a chance to flush; the session is destroyed.
    pub async fn revision_restored(&self, reference: &str) {
        let (done_tx, done_rx) = oneshot::channel();
        let sent = self.commands.send(Command::RevisionRestored {
            reference: reference.to_string(),
            done: done_tx,
        });
        if sent.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Tear the session down: the store subscription is removed, the
    /// presence channel left, and pending broadcasts and chunk assemblies
    /// dropped.
    pub fn destroy(&self) {
        let _ = self.shutdown.send(());
    }

    /// Destroy and wait for the actor to finish.
    pub async fn wait(mut self) {
        self.destroy();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

struct SessionActor {
    ctx: SessionContext,
    document: DocumentRef,
    channel_name: String,
    channel: Arc<dyn PresenceChannel>,
    transport: WhisperTransport,
    registry: PresenceRegistry,
    locks: FieldLockCoordinator,
    sync: ValueSyncEngine,
    rendezvous: StateRendezvous,
    me: Option<Session>,
    store_subscription: Option<SubscriptionId>,
    mutations_tx: mpsc::UnboundedSender<StoreMutation>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut mutations: mpsc::UnboundedReceiver<StoreMutation>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(channel = %self.channel_name, "collaboration session starting");
        loop {
            let deadline = match (self.sync.next_deadline(), self.transport.next_eviction()) {
                (Some(broadcast), Some(eviction)) => Some(broadcast.min(eviction)),
                (broadcast, eviction) => broadcast.or(eviction),
            };

            tokio::select! {
                _ = shutdown.recv() => break,
                Some(event) = events.recv() => {
                    if self.handle_channel_event(event) == Flow::Stop {
                        break;
                    }
                }
                Some(command) = commands.recv() => {
                    if self.handle_command(command).await == Flow::Stop {
                        break;
                    }
                }
                Some(mutation) = mutations.recv() => self.handle_mutation(mutation),
                _ = sleep_until_deadline(deadline) => self.on_tick(),
            }
        }
        self.teardown();
        info!(channel = %self.channel_name, "collaboration session ended");
    }

    fn now(&self) -> Instant {
        time::Instant::now().into_std()
    }

    // ── Channel events ─────────────────────────────────────────────

    fn handle_channel_event(&mut self, event: ChannelEvent) -> Flow {
        match event {
            ChannelEvent::SubscriptionSucceeded { me, members } => {
                self.on_subscribed(me, members);
                Flow::Continue
            }
            ChannelEvent::MemberAdded(session) => {
                self.on_member_added(session);
                Flow::Continue
            }
            ChannelEvent::MemberRemoved(session) => {
                self.on_member_removed(session);
                Flow::Continue
            }
            ChannelEvent::Whisper { event, payload } => self.on_whisper(&event, payload),
        }
    }

    fn on_subscribed(&mut self, me: Session, members: Vec<Session>) {
        info!(
            channel = %self.channel_name,
            session = %me.id,
            members = members.len(),
            "presence subscription succeeded"
        );
        self.me = Some(me);
        self.registry.set_users(members);
        // Seed snapshots from the current document state so startup
        // values are not mistaken for fresh edits, then start observing
        // store mutations.
        self.sync.seed(self.ctx.store.values(), self.ctx.store.meta());
        self.store_subscription = Some(self.ctx.store.subscribe(self.mutations_tx.clone()));
    }

    fn on_member_added(&mut self, session: Session) {
        // A new session of an already-present user is not a new human.
        if !self.registry.knows_user(&session.info.id) {
            self.ctx.notifier.success(&format!("{} has joined.", session.info.name));
            self.ctx.notifier.audio(AudioCue::BuddyIn);
        }
        self.registry.add_user(session.clone());

        let payload = StateRendezvous::build_payload(self.ctx.store.as_ref(), &self.locks);
        self.whisper(&WhisperEvent::InitializeState { session_id: session.id }, &payload);
    }

    fn on_member_removed(&mut self, session: Session) {
        self.locks.blur_and_unlock(self.ctx.store.as_ref(), &session.id, None);
        self.registry.remove_user(&session.id);
        if !self.registry.knows_user(&session.info.id) {
            self.ctx.notifier.success(&format!("{} has left.", session.info.name));
            self.ctx.notifier.audio(AudioCue::BuddyOut);
        }
    }

    // ── Whispers ───────────────────────────────────────────────────

    fn on_whisper(&mut self, event: &str, payload: Value) -> Flow {
        let now = self.now();
        let Some((event, payload)) = self.transport.receive(event, payload, now) else {
            return Flow::Continue;
        };
        match event {
            WhisperEvent::Updated => self.apply_value_change(payload),
            WhisperEvent::MetaUpdated => self.apply_meta_change(payload),
            WhisperEvent::Focus => self.on_remote_focus(payload),
            WhisperEvent::Blur => self.on_remote_blur(payload),
            WhisperEvent::ForceUnlock => self.on_force_unlock(payload),
            WhisperEvent::Saved => self.on_remote_saved(payload),
            WhisperEvent::Published => self.on_remote_published(payload),
            WhisperEvent::RevisionRestored => return self.on_remote_restored(payload),
            WhisperEvent::InitializeState { session_id } => {
                self.on_initialize_state(&session_id, payload);
            }
        }
        Flow::Continue
    }

    fn apply_value_change(&mut self, payload: Value) {
        let Some(change) = decode::<FieldChangePayload>("updated", payload) else {
            return;
        };
        debug!(handle = %change.handle, "applying broadcasted value change");
        self.ctx.store.set_field_value(&change.handle, change.value, &change.user);
    }

    fn apply_meta_change(&mut self, payload: Value) {
        let Some(change) = decode::<FieldChangePayload>("meta-updated", payload) else {
            return;
        };
        debug!(handle = %change.handle, "applying broadcasted meta change");
        // Meta broadcasts may be partial; rebuild the full object over
        // what we last remembered for this field.
        let merged = meta::merge_partial(self.sync.last_meta(&change.handle), &change.value);
        self.ctx.store.set_field_meta(&change.handle, merged, &change.user);
    }

    fn on_remote_focus(&mut self, payload: Value) {
        let Some(focus) = decode::<FocusPayload>("focus", payload) else {
            return;
        };
        let Some(handle) = focus.handle else {
            warn!(user = %focus.user, "focus whisper without a handle");
            return;
        };
        debug!(user = %focus.user, handle = %handle, "peer changed focus");
        self.locks.focus_and_lock(self.ctx.store.as_ref(), &self.registry, &focus.user, &handle);
    }

    fn on_remote_blur(&mut self, payload: Value) {
        let Some(blur) = decode::<FocusPayload>("blur", payload) else {
            return;
        };
        debug!(user = %blur.user, "peer blurred");
        self.locks.blur_and_unlock(self.ctx.store.as_ref(), &blur.user, blur.handle.as_deref());
    }

    fn on_force_unlock(&mut self, payload: Value) {
        let Some(request) = decode::<ForceUnlockPayload>("force-unlock", payload) else {
            return;
        };
        let Some(me) = self.me.clone() else {
            return;
        };
        // Addressed by stable user id: applies to all of that user's
        // sessions, and to nobody else.
        if request.target_user != me.info.id {
            return;
        }
        debug!(origin = %request.origin_user, "peer requested our editor be unlocked");

        self.ctx.hooks.blur_active_editor();
        self.locks.blur_and_unlock(self.ctx.store.as_ref(), &me.id, None);
        self.whisper(&WhisperEvent::Blur, &FocusPayload { user: me.id.clone(), handle: None });

        let origin = self
            .registry
            .display_name(&request.origin_user)
            .unwrap_or(request.origin_user);
        self.ctx.notifier.info_sticky(&format!("{origin} has unlocked your editor."));
    }

    fn on_remote_saved(&mut self, payload: Value) {
        let Some(saved) = decode::<ActorPayload>("saved", payload) else {
            return;
        };
        self.ctx.hooks.mark_saved();
        let name = self.registry.display_name(&saved.user).unwrap_or(saved.user);
        self.ctx.notifier.success(&format!("Saved by {name}."));
    }

    fn on_remote_published(&mut self, payload: Value) {
        let Some(published) = decode::<PublishedPayload>("published", payload) else {
            return;
        };
        let name = self.registry.display_name(&published.user).unwrap_or(published.user);
        self.ctx.notifier.success(&format!("Published by {name}."));
        let detail = match published.message {
            Some(message) => {
                format!("Entry has been published by {name} with the message: {message}")
            }
            None => format!("Entry has been published by {name} with no message."),
        };
        self.ctx.notifier.blocking(&detail);
    }

    fn on_remote_restored(&mut self, payload: Value) -> Flow {
        let Some(restored) = decode::<ActorPayload>("revision-restored", payload) else {
            return Flow::Continue;
        };
        let name = self.registry.display_name(&restored.user).unwrap_or(restored.user);
        self.ctx.notifier.success(&format!("Revision restored by {name}."));
        self.ctx
            .notifier
            .blocking(&format!("Entry has been restored to another revision by {name}"));
        // The working state is no longer valid; stop listening to
        // anything else.
        Flow::Stop
    }

    fn on_initialize_state(&mut self, session_id: &str, payload: Value) {
        let Some(me) = &self.me else {
            return;
        };
        if session_id != me.id {
            return;
        }
        let Some(state) = decode::<StatePayload>("initialize-state", payload) else {
            return;
        };
        if self.rendezvous.apply(
            state,
            self.ctx.store.as_ref(),
            &self.sync,
            &mut self.locks,
            &self.registry,
        ) {
            debug!(session = %me.id, "applied initialize state");
        }
    }

    // ── Store mutations ────────────────────────────────────────────

    fn handle_mutation(&mut self, mutation: StoreMutation) {
        let now = self.now();
        let (kind, handle, value, user) = match mutation {
            StoreMutation::FieldValueSet { handle, value, user } => {
                (ChangeKind::Value, handle, value, user)
            }
            StoreMutation::FieldMetaSet { handle, value, user } => {
                (ChangeKind::Meta, handle, value, user)
            }
        };
        debug!(handle = %handle, ?kind, "store field set");
        self.sync.observe(kind, FieldChangePayload { handle, value, user }, now);
    }

    fn broadcast_change(&mut self, kind: ChangeKind, mut payload: FieldChangePayload) {
        let Some(me) = &self.me else {
            return;
        };
        if !ValueSyncEngine::should_broadcast(&payload.user, &me.info.id) {
            debug!(handle = %payload.handle, "change did not originate here, not rebroadcasting");
            return;
        }
        // Receivers correlate by sending session, not stable user.
        payload.user = me.id.clone();
        match kind {
            ChangeKind::Value => self.whisper(&WhisperEvent::Updated, &payload),
            ChangeKind::Meta => {
                let filtered_value = meta::filter_payload(&payload.value);
                let filtered = FieldChangePayload { value: filtered_value, ..payload };
                self.whisper(&WhisperEvent::MetaUpdated, &filtered);
            }
        }
    }

    // ── Host commands ──────────────────────────────────────────────

    async fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::FocusField { handle } => {
                let Some(me) = self.me.clone() else {
                    return Flow::Continue;
                };
                // Local focus takes no lock: the local user is the active
                // editor, only remote peers get locked out.
                self.locks.focus(&me.id, &handle);
                self.whisper(
                    &WhisperEvent::Focus,
                    &FocusPayload { user: me.id, handle: Some(handle) },
                );
            }
            Command::BlurField { handle } => {
                let Some(me) = self.me.clone() else {
                    return Flow::Continue;
                };
                self.locks.blur(&me.id);
                self.whisper(
                    &WhisperEvent::Blur,
                    &FocusPayload { user: me.id, handle: Some(handle) },
                );
            }
            Command::RequestUnlock { target_user } => {
                let Some(me) = self.me.clone() else {
                    return Flow::Continue;
                };
                self.whisper(
                    &WhisperEvent::ForceUnlock,
                    &ForceUnlockPayload { target_user, origin_user: me.id },
                );
            }
            Command::EntrySaved { reference } => {
                if reference == self.document.reference {
                    if let Some(me) = self.me.clone() {
                        self.whisper(&WhisperEvent::Saved, &ActorPayload { user: me.id });
                    }
                }
            }
            Command::EntryPublished { reference, message } => {
                if reference == self.document.reference {
                    if let Some(me) = self.me.clone() {
                        self.whisper(
                            &WhisperEvent::Published,
                            &PublishedPayload { user: me.id, message },
                        );
                    }
                }
            }
            Command::RevisionRestored { reference, done } => {
                if reference != self.document.reference {
                    let _ = done.send(());
                    return Flow::Continue;
                }
                if let Some(me) = self.me.clone() {
                    self.whisper(&WhisperEvent::RevisionRestored, &ActorPayload { user: me.id });
                }
                // The transport gives no delivery signal; wait long
                // enough for the whisper to flush before the host tears
                // the page down.
                time::sleep(self.ctx.config.flush_grace()).await;
                let _ = done.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    // ── Timers ─────────────────────────────────────────────────────

    fn on_tick(&mut self) {
        let now = self.now();
        for (kind, payload) in self.sync.drain_ready(now) {
            self.broadcast_change(kind, payload);
        }
        let evicted = self.transport.evict_stale(now);
        if evicted > 0 {
            warn!(evicted, "evicted stale chunk assemblies");
        }
    }

    // ── Sending ────────────────────────────────────────────────────

    fn whisper<T: Serialize>(&self, event: &WhisperEvent, payload: &T) {
        if self.registry.is_alone() {
            debug!(event = %event.name(), "alone in channel, suppressing whisper");
            return;
        }
        if let Err(error) = self.transport.send(event, payload) {
            warn!(event = %event.name(), %error, "failed to send whisper");
        }
    }

    // ── Teardown ───────────────────────────────────────────────────

    fn teardown(&mut self) {
        if let Some(id) = self.store_subscription.take() {
            self.ctx.store.unsubscribe(id);
        }
        let dropped = self.sync.pending_count();
        if dropped > 0 {
            debug!(dropped, "dropping pending broadcasts on teardown");
        }
        let incomplete = self.transport.pending_assemblies();
        if incomplete > 0 {
            debug!(incomplete, "dropping incomplete chunk assemblies on teardown");
        }
        self.channel.leave();
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(time::Instant::from_std(at)).await,
        None => std::future::pending::<()>().await,
    }
}

fn decode<T: serde::de::DeserializeOwned>(event: &str, payload: Value) -> Option<T> {
    match serde_json::from_value(payload) {
        Ok(decoded) => Some(decoded),
        Err(error) => {
            warn!(event, %error, "dropping malformed whisper payload");
            None
        }
    }
}
