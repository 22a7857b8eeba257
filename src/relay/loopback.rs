//! In-process relay hub with the room server's fan-out rules
//!
//! Joiners get the roster of everyone else in the room, the room gets
//! `user-joined`, directed offer/answer/candidate frames are forwarded with
//! the sender's id and name, presentation announcements go to everyone else
//! in the room, and a disconnect is announced as `user-left`.

use super::messages::{ClientMessage, RosterEntry, ServerMessage};
use super::{RelayLink, INBOUND_CAPACITY};
use crate::error::{MeshError, Result};
use crate::peer::types::PeerId;
use crate::utils::random_id;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

struct Member {
    inbox: broadcast::Sender<ServerMessage>,
    room: Option<String>,
    name: String,
}

#[derive(Default)]
struct HubState {
    members: HashMap<PeerId, Member>,
}

impl HubState {
    fn deliver(&self, to: &PeerId, msg: ServerMessage) {
        match self.members.get(to) {
            Some(member) => {
                let _ = member.inbox.send(msg);
            }
            None => debug!(%to, event = msg.event(), "dropping frame for unknown client"),
        }
    }

    fn room_of(&self, id: &PeerId) -> Option<String> {
        self.members.get(id).and_then(|m| m.room.clone())
    }

    /// Everyone in `room` except `except`
    fn others(&self, room: &str, except: &PeerId) -> Vec<PeerId> {
        let mut ids: Vec<_> = self
            .members
            .iter()
            .filter(|(id, m)| *id != except && m.room.as_deref() == Some(room))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn broadcast(&self, room: &str, except: &PeerId, msg: &ServerMessage) {
        for id in self.others(room, except) {
            self.deliver(&id, msg.clone());
        }
    }

    fn leave_room(&mut self, id: &PeerId) {
        let Some(room) = self.room_of(id) else {
            return;
        };
        if let Some(member) = self.members.get_mut(id) {
            member.room = None;
        }
        self.broadcast(
            &room,
            id,
            &ServerMessage::UserLeft {
                socket_id: id.clone(),
            },
        );
    }

    fn route(&mut self, from: &PeerId, msg: ClientMessage) {
        let sender_name = self
            .members
            .get(from)
            .map(|m| m.name.clone())
            .unwrap_or_default();

        match msg {
            ClientMessage::JoinRoom { slug, user_name } => {
                if self.room_of(from).is_some() {
                    self.leave_room(from);
                }
                let roster: Vec<RosterEntry> = self
                    .others(&slug, from)
                    .into_iter()
                    .map(|id| RosterEntry {
                        user_name: self.members.get(&id).map(|m| m.name.clone()).unwrap_or_default(),
                        socket_id: id,
                    })
                    .collect();
                if let Some(member) = self.members.get_mut(from) {
                    member.room = Some(slug.clone());
                    member.name = user_name.clone();
                }
                self.deliver(from, ServerMessage::AllUsers(roster));
                self.broadcast(
                    &slug,
                    from,
                    &ServerMessage::UserJoined {
                        socket_id: from.clone(),
                        user_name,
                    },
                );
            }
            ClientMessage::Offer { target, sdp } => self.deliver(
                &target,
                ServerMessage::Offer {
                    sdp,
                    caller: from.clone(),
                    caller_name: Some(sender_name),
                },
            ),
            ClientMessage::Answer { target, sdp } => self.deliver(
                &target,
                ServerMessage::Answer {
                    sdp,
                    answerer: from.clone(),
                    answerer_name: Some(sender_name),
                },
            ),
            ClientMessage::IceCandidate { target, candidate } => self.deliver(
                &target,
                ServerMessage::IceCandidate {
                    candidate,
                    from: from.clone(),
                },
            ),
            ClientMessage::ScreenShareStarted { slug } => self.broadcast(
                &slug,
                from,
                &ServerMessage::ScreenShareStarted {
                    socket_id: from.clone(),
                },
            ),
            ClientMessage::ScreenShareStopped { slug } => self.broadcast(
                &slug,
                from,
                &ServerMessage::ScreenShareStopped {
                    socket_id: from.clone(),
                },
            ),
        }
    }
}

/// Shared room server for in-process clients
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new, not yet connected client link
    pub fn link(&self) -> LoopbackRelay {
        let (inbox, _) = broadcast::channel(INBOUND_CAPACITY);
        LoopbackRelay {
            hub: self.clone(),
            inbox,
            id: Mutex::new(None),
        }
    }

    /// Connected clients currently in `room`
    pub fn room_members(&self, room: &str) -> Vec<PeerId> {
        let state = self.state.lock();
        let mut ids: Vec<_> = state
            .members
            .iter()
            .filter(|(_, m)| m.room.as_deref() == Some(room))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

/// One client's link into a [`LoopbackHub`]
pub struct LoopbackRelay {
    hub: LoopbackHub,
    inbox: broadcast::Sender<ServerMessage>,
    id: Mutex<Option<PeerId>>,
}

impl LoopbackRelay {
    /// Hub-assigned id while connected; a reconnect gets a fresh one
    pub fn id(&self) -> Option<PeerId> {
        self.id.lock().clone()
    }
}

#[async_trait]
impl RelayLink for LoopbackRelay {
    fn is_connected(&self) -> bool {
        self.id.lock().is_some()
    }

    async fn connect(&self) -> Result<()> {
        let mut id = self.id.lock();
        if id.is_some() {
            return Ok(());
        }
        let assigned = PeerId::new(random_id());
        self.hub.state.lock().members.insert(
            assigned.clone(),
            Member {
                inbox: self.inbox.clone(),
                room: None,
                name: String::new(),
            },
        );
        debug!(id = %assigned, "loopback client connected");
        *id = Some(assigned);
        Ok(())
    }

    async fn disconnect(&self) {
        let Some(id) = self.id.lock().take() else {
            return;
        };
        let mut state = self.hub.state.lock();
        state.leave_room(&id);
        state.members.remove(&id);
        debug!(%id, "loopback client disconnected");
    }

    async fn send(&self, msg: ClientMessage) -> Result<()> {
        let id = self.id().ok_or(MeshError::RelayDisconnected)?;
        self.hub.state.lock().route(&id, msg);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.inbox.subscribe()
    }
}
