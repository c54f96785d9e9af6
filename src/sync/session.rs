//! Session state machine (§4.8): one table/realm's sync session
//! multiplexed over a shared `Connection`. `next_message` implements
//! the fixed 9-step send-priority ladder — a session always sends the
//! highest-priority pending message, never an arbitrary one, so a
//! stalled UNBIND can't be starved by a backlog of UPLOADs.

use super::{MessageType, SessionState};

#[derive(Default)]
pub struct Session {
    state: SessionState,
    need_unbind: bool,
    need_refresh: bool,
    need_bind: bool,
    awaiting_ident_alloc: bool,
    need_state_request: bool,
    need_ident: bool,
    need_alloc: bool,
    need_mark: bool,
    need_upload: bool,
}

impl Default for SessionState {
    fn default() -> SessionState {
        SessionState::Unactivated
    }
}

impl Session {
    pub fn new() -> Session {
        Session::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn activate(&mut self) {
        self.state = SessionState::Active;
        self.need_bind = true;
    }

    pub fn begin_deactivating(&mut self) {
        self.state = SessionState::Deactivating;
        self.need_unbind = true;
    }

    pub fn request_refresh(&mut self) {
        self.need_refresh = true;
    }

    pub fn request_state(&mut self) {
        self.need_state_request = true;
    }

    pub fn request_ident(&mut self) {
        self.need_ident = true;
    }

    pub fn request_alloc(&mut self) {
        self.need_alloc = true;
    }

    pub fn on_ident_alloc_received(&mut self) {
        self.awaiting_ident_alloc = false;
        self.need_mark = true;
    }

    pub fn request_upload(&mut self) {
        self.need_upload = true;
    }

    /// The next message this session wants to send, in fixed priority
    /// order, or `None` if it has nothing to send (or is blocked
    /// waiting on an ident allocation from the server). Does not clear
    /// the pending flag — call `mark_sent` once the message is actually
    /// written to the wire.
    pub fn next_message(&self) -> Option<MessageType> {
        if self.need_unbind {
            return Some(MessageType::Unbind);
        }
        if self.need_refresh {
            return Some(MessageType::Refresh);
        }
        if self.need_bind {
            return Some(MessageType::Bind);
        }
        if self.awaiting_ident_alloc {
            return None;
        }
        if self.need_state_request {
            return Some(MessageType::StateRequest);
        }
        if self.need_ident {
            return Some(MessageType::Ident);
        }
        if self.need_alloc {
            return Some(MessageType::Alloc);
        }
        if self.need_mark {
            return Some(MessageType::Mark);
        }
        if self.need_upload {
            return Some(MessageType::Upload);
        }
        None
    }

    pub fn mark_sent(&mut self, sent: MessageType) {
        match sent {
            MessageType::Unbind => {
                self.need_unbind = false;
                self.state = SessionState::Deactivated;
            }
            MessageType::Refresh => self.need_refresh = false,
            MessageType::Bind => self.need_bind = false,
            MessageType::StateRequest => self.need_state_request = false,
            MessageType::Ident => self.need_ident = false,
            MessageType::Alloc => {
                self.need_alloc = false;
                self.awaiting_ident_alloc = true;
            }
            MessageType::Mark => self.need_mark = false,
            MessageType::Upload => self.need_upload = false,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_sends_unbind_before_everything_else() {
        let mut s = Session::new();
        s.activate();
        s.request_upload();
        s.begin_deactivating();
        assert_eq!(s.next_message(), Some(MessageType::Unbind));
    }

    #[test]
    fn ident_alloc_wait_blocks_later_steps_until_resolved() {
        let mut s = Session::new();
        s.activate();
        s.mark_sent(MessageType::Bind);
        s.request_alloc();
        s.request_upload();
        assert_eq!(s.next_message(), Some(MessageType::Alloc));
        s.mark_sent(MessageType::Alloc);
        assert_eq!(s.next_message(), None, "upload must wait behind the ident-alloc round trip");
        s.on_ident_alloc_received();
        assert_eq!(s.next_message(), Some(MessageType::Mark));
        s.mark_sent(MessageType::Mark);
        assert_eq!(s.next_message(), Some(MessageType::Upload));
    }

    #[test]
    fn activation_enqueues_bind() {
        let mut s = Session::new();
        assert_eq!(s.next_message(), None);
        s.activate();
        assert_eq!(s.next_message(), Some(MessageType::Bind));
    }

    #[test]
    fn sending_unbind_deactivates_the_session() {
        let mut s = Session::new();
        s.activate();
        s.mark_sent(MessageType::Bind);
        s.begin_deactivating();
        s.mark_sent(MessageType::Unbind);
        assert_eq!(s.state(), SessionState::Deactivated);
    }
}
