//! Application-layer extension point.
//!
//! Domain-specific commands attach here. The connection task only talks to a
//! [`PeerSession`], which runs the base [`Session`] and then hands every
//! forwarded command to the installed [`ApplicationProtocol`].

use crate::peer::session::{Session, SessionEvent};
use crate::protocol::Command;

/// Hooks for an application protocol layered over a session.
///
/// Implementations may queue replies with [`Session::send`].
pub trait ApplicationProtocol: Send + 'static {
    /// Called once when the handshake completes.
    fn on_handshake_complete(&mut self, _session: &mut Session) {}

    /// Called for every validated command the session does not consume
    /// itself, `pong` included.
    fn on_command(&mut self, _session: &mut Session, _command: &Command) {}
}

/// The empty application: registers no commands.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoApplication;

impl ApplicationProtocol for NoApplication {}

/// A session plus its application layer.
#[derive(Debug)]
pub struct PeerSession<A: ApplicationProtocol = NoApplication> {
    session: Session,
    app: A,
}

impl PeerSession<NoApplication> {
    /// Wrap a session with no application layer.
    pub fn plain(session: Session) -> Self {
        Self::new(session, NoApplication)
    }
}

impl<A: ApplicationProtocol> PeerSession<A> {
    pub fn new(session: Session, app: A) -> Self {
        Self { session, app }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    /// See [`Session::start`].
    pub fn start(&mut self) {
        self.session.start();
    }

    /// Process one line, then run the application hooks for its events.
    pub fn handle_line(&mut self, line: &str, now: u64) -> Vec<SessionEvent> {
        let events = self.session.handle_line(line, now);
        for event in &events {
            match event {
                SessionEvent::HandshakeComplete => {
                    self.app.on_handshake_complete(&mut self.session)
                }
                SessionEvent::Forward(command) => self.app.on_command(&mut self.session, command),
                SessionEvent::Rejected(_) => {}
            }
        }
        events
    }

    /// See [`Session::heartbeat`].
    pub fn heartbeat(&mut self) {
        self.session.heartbeat();
    }

    /// See [`Session::take_outgoing`].
    pub fn take_outgoing(&mut self) -> Vec<Command> {
        self.session.take_outgoing()
    }
}
