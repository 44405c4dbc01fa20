use log::{info, warn};

use crate::mailbox::Mailbox;
use crate::storage::{
    CredentialStore, KEY_AUTH_TOKEN, KEY_UNIT_ID, KEY_WIFI_PASS, KEY_WIFI_SSID,
};

/// Inbound provisioning messages above this length are dropped at the
/// receive callback.
pub const MESSAGE_MAX_LEN: usize = 304;

/// Hard cap on a single extracted field value. The buffer is operator- and
/// attacker-controlled wireless input, so the bound is enforced here rather
/// than trusted.
pub const FIELD_MAX_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    NetworkName,
    NetworkPassword,
    AuthToken,
    UnitId,
}

impl CredentialField {
    /// Literal opening/closing markers delimiting the field value on the
    /// wire, e.g. `username{home-net}username`.
    pub fn markers(self) -> (&'static str, &'static str) {
        match self {
            Self::NetworkName => ("username{", "}username"),
            Self::NetworkPassword => ("password{", "}password"),
            Self::AuthToken => ("authkey{", "}authkey"),
            Self::UnitId => ("id{", "}id"),
        }
    }
}

/// Extracts one tagged field from an inbound provisioning message.
///
/// Pure and idempotent. The closing marker is searched strictly after the
/// opening marker, so a missing marker, reversed markers, or a value longer
/// than [`FIELD_MAX_LEN`] all yield `None` — never a truncated value.
pub fn extract(buffer: &str, field: CredentialField) -> Option<String> {
    let (prefix, suffix) = field.markers();

    let value_start = buffer.find(prefix)? + prefix.len();
    let rest = &buffer[value_start..];
    let value_end = rest.find(suffix)?;

    let value = &rest[..value_end];
    if value.len() > FIELD_MAX_LEN {
        return None;
    }
    Some(value.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCredentials {
    pub network_name: Option<String>,
    pub network_password: Option<String>,
    pub auth_token: Option<String>,
    pub unit_id: Option<String>,
}

/// Runs the extractor for all four fields. Fields may appear in any order
/// or be omitted entirely.
pub fn parse_message(buffer: &str) -> ParsedCredentials {
    ParsedCredentials {
        network_name: extract(buffer, CredentialField::NetworkName),
        network_password: extract(buffer, CredentialField::NetworkPassword),
        auth_token: extract(buffer, CredentialField::AuthToken),
        unit_id: extract(buffer, CredentialField::UnitId),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Waiting,
    /// Some but not all requirements satisfied; still polling.
    Partial,
    Complete,
    TimedOut,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::TimedOut)
    }
}

/// Bounded one-shot provisioning state machine.
///
/// Each poll tick consumes at most one inbound message, re-parses it from
/// scratch, and commits every newly satisfied requirement immediately. The
/// three requirements are network credentials (name and password together),
/// the auth token, and the unit id. The session never restarts; a reboot is
/// required to provision again.
#[derive(Debug)]
pub struct ProvisioningSession {
    max_attempts: u32,
    attempts: u32,
    network_set: bool,
    token_set: bool,
    unit_set: bool,
    state: SessionState,
}

impl ProvisioningSession {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: 0,
            network_set: false,
            token_set: false,
            unit_set: false,
            state: SessionState::Waiting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn poll<S: CredentialStore>(
        &mut self,
        message: Option<&str>,
        store: &mut S,
    ) -> SessionState {
        if self.state.is_terminal() {
            return self.state;
        }

        self.attempts = self.attempts.saturating_add(1);

        if let Some(message) = message {
            self.commit_fields(&parse_message(message), store);
        }

        self.state = if self.network_set && self.token_set && self.unit_set {
            info!("provisioning complete after {} poll(s)", self.attempts);
            SessionState::Complete
        } else if self.attempts >= self.max_attempts {
            warn!(
                "provisioning timed out after {} poll(s) (network: {}, token: {}, unit id: {})",
                self.attempts, self.network_set, self.token_set, self.unit_set
            );
            SessionState::TimedOut
        } else if self.network_set || self.token_set || self.unit_set {
            SessionState::Partial
        } else {
            SessionState::Waiting
        };
        self.state
    }

    /// Commits each newly satisfied requirement. A failed commit is logged
    /// and left unsatisfied; a later message retriggers the attempt.
    fn commit_fields<S: CredentialStore>(&mut self, parsed: &ParsedCredentials, store: &mut S) {
        if !self.network_set {
            if let (Some(name), Some(pass)) = (&parsed.network_name, &parsed.network_password) {
                let result = store
                    .set(KEY_WIFI_SSID, name)
                    .and_then(|()| store.set(KEY_WIFI_PASS, pass));
                match result {
                    Ok(()) => {
                        info!("saved network credentials for `{name}`");
                        self.network_set = true;
                    }
                    Err(err) => warn!("failed to save network credentials: {err}"),
                }
            }
        }

        if !self.token_set {
            if let Some(token) = &parsed.auth_token {
                match store.set(KEY_AUTH_TOKEN, token) {
                    Ok(()) => {
                        info!("saved auth token");
                        self.token_set = true;
                    }
                    Err(err) => warn!("failed to save auth token: {err}"),
                }
            }
        }

        if !self.unit_set {
            if let Some(unit_id) = &parsed.unit_id {
                match store.set(KEY_UNIT_ID, unit_id) {
                    Ok(()) => {
                        info!("saved unit id `{unit_id}`");
                        self.unit_set = true;
                    }
                    Err(err) => warn!("failed to save unit id: {err}"),
                }
            }
        }
    }
}

/// Radio stack teardown seam, owned by the platform glue.
pub trait RadioControl {
    fn shutdown(&mut self);
}

/// Drives a session to a terminal state, then shuts the radio down exactly
/// once. `wait` sleeps for one poll interval between ticks.
pub fn run_session<S, R>(
    session: &mut ProvisioningSession,
    inbound: &Mailbox<String>,
    store: &mut S,
    radio: &mut R,
    mut wait: impl FnMut(),
) -> SessionState
where
    S: CredentialStore,
    R: RadioControl,
{
    loop {
        let message = inbound.take();
        let state = session.poll(message.as_deref(), store);
        if state.is_terminal() {
            radio.shutdown();
            return state;
        }
        wait();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::storage::{MemoryStore, StorageError};

    const FULL_MESSAGE: &str =
        "username{home-net}username password{hunter2}password authkey{tok-9}authkey id{abc123}id";

    #[test]
    fn extracts_each_field() {
        assert_eq!(
            extract(FULL_MESSAGE, CredentialField::NetworkName).as_deref(),
            Some("home-net")
        );
        assert_eq!(
            extract(FULL_MESSAGE, CredentialField::NetworkPassword).as_deref(),
            Some("hunter2")
        );
        assert_eq!(
            extract(FULL_MESSAGE, CredentialField::AuthToken).as_deref(),
            Some("tok-9")
        );
        assert_eq!(
            extract(FULL_MESSAGE, CredentialField::UnitId).as_deref(),
            Some("abc123")
        );
    }

    #[test]
    fn extract_is_idempotent() {
        let first = extract(FULL_MESSAGE, CredentialField::AuthToken);
        let second = extract(FULL_MESSAGE, CredentialField::AuthToken);
        assert_eq!(first, second);
    }

    #[test]
    fn field_order_does_not_matter() {
        let message = "id{abc123}id username{net}username";
        assert_eq!(
            extract(message, CredentialField::UnitId).as_deref(),
            Some("abc123")
        );
        assert_eq!(
            extract(message, CredentialField::NetworkName).as_deref(),
            Some("net")
        );
    }

    #[test]
    fn missing_markers_yield_absent() {
        assert_eq!(extract("", CredentialField::UnitId), None);
        assert_eq!(extract("no markers here", CredentialField::UnitId), None);
        assert_eq!(extract("id{abc123", CredentialField::UnitId), None);
        assert_eq!(extract("abc123}id", CredentialField::UnitId), None);
    }

    #[test]
    fn reversed_markers_yield_absent() {
        assert_eq!(extract("}id abc123 id{", CredentialField::UnitId), None);
    }

    #[test]
    fn empty_value_extracts_as_empty_string() {
        assert_eq!(extract("id{}id", CredentialField::UnitId).as_deref(), Some(""));
    }

    #[test]
    fn value_at_length_limit_is_accepted() {
        let value = "a".repeat(FIELD_MAX_LEN);
        let message = format!("authkey{{{value}}}authkey");
        assert_eq!(
            extract(&message, CredentialField::AuthToken),
            Some(value)
        );
    }

    #[test]
    fn over_long_value_is_absent_not_truncated() {
        let value = "a".repeat(FIELD_MAX_LEN + 1);
        let message = format!("authkey{{{value}}}authkey");
        assert_eq!(extract(&message, CredentialField::AuthToken), None);
    }

    #[test]
    fn first_closing_marker_after_opener_wins() {
        let message = "id{abc}id trailing id{zzz}id";
        assert_eq!(
            extract(message, CredentialField::UnitId).as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn parse_message_collects_all_fields() {
        let parsed = parse_message(FULL_MESSAGE);
        assert_eq!(
            parsed,
            ParsedCredentials {
                network_name: Some("home-net".to_string()),
                network_password: Some("hunter2".to_string()),
                auth_token: Some("tok-9".to_string()),
                unit_id: Some("abc123".to_string()),
            }
        );
    }

    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryStore,
        writes: Vec<String>,
        fail_keys: Vec<&'static str>,
    }

    impl CredentialStore for RecordingStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
            if self.fail_keys.contains(&key) {
                return Err(StorageError::Backend("write rejected".to_string()));
            }
            self.writes.push(key.to_string());
            self.inner.set(key, value)
        }
    }

    #[test]
    fn full_message_completes_in_one_poll() {
        let mut store = RecordingStore::default();
        let mut session = ProvisioningSession::new(120);

        let state = session.poll(Some(FULL_MESSAGE), &mut store);

        assert_eq!(state, SessionState::Complete);
        assert_eq!(
            store.writes,
            vec![KEY_WIFI_SSID, KEY_WIFI_PASS, KEY_AUTH_TOKEN, KEY_UNIT_ID]
        );
        assert_eq!(
            store.get(KEY_WIFI_SSID).unwrap().as_deref(),
            Some("home-net")
        );
        assert_eq!(store.get(KEY_UNIT_ID).unwrap().as_deref(), Some("abc123"));
    }

    #[test]
    fn network_name_without_password_is_not_committed() {
        let mut store = RecordingStore::default();
        let mut session = ProvisioningSession::new(120);

        let state = session.poll(Some("username{net}username id{abc}id"), &mut store);

        assert_eq!(state, SessionState::Partial);
        assert_eq!(store.writes, vec![KEY_UNIT_ID]);
    }

    #[test]
    fn later_message_supplies_remaining_fields() {
        let mut store = RecordingStore::default();
        let mut session = ProvisioningSession::new(120);

        session.poll(Some("authkey{tok}authkey"), &mut store);
        session.poll(None, &mut store);
        let state = session.poll(
            Some("username{net}username password{pw}password id{abc}id"),
            &mut store,
        );

        assert_eq!(state, SessionState::Complete);
        assert_eq!(
            store.writes,
            vec![KEY_AUTH_TOKEN, KEY_WIFI_SSID, KEY_WIFI_PASS, KEY_UNIT_ID]
        );
    }

    #[test]
    fn satisfied_requirement_is_not_recommitted() {
        let mut store = RecordingStore::default();
        let mut session = ProvisioningSession::new(120);

        session.poll(Some("authkey{tok}authkey"), &mut store);
        session.poll(Some("authkey{tok-2}authkey"), &mut store);

        assert_eq!(store.writes, vec![KEY_AUTH_TOKEN]);
        assert_eq!(store.get(KEY_AUTH_TOKEN).unwrap().as_deref(), Some("tok"));
    }

    #[test]
    fn failed_commit_is_retried_on_next_message() {
        let mut store = RecordingStore {
            fail_keys: vec![KEY_AUTH_TOKEN],
            ..RecordingStore::default()
        };
        let mut session = ProvisioningSession::new(120);

        let state = session.poll(Some(FULL_MESSAGE), &mut store);
        assert_eq!(state, SessionState::Partial);

        store.fail_keys.clear();
        let state = session.poll(Some(FULL_MESSAGE), &mut store);

        assert_eq!(state, SessionState::Complete);
        assert_eq!(store.get(KEY_AUTH_TOKEN).unwrap().as_deref(), Some("tok-9"));
    }

    #[test]
    fn exhausting_the_attempt_budget_times_out() {
        let mut store = RecordingStore::default();
        let mut session = ProvisioningSession::new(120);

        for _ in 0..119 {
            assert_eq!(session.poll(None, &mut store), SessionState::Waiting);
        }
        assert_eq!(session.poll(None, &mut store), SessionState::TimedOut);
        assert_eq!(session.attempts(), 120);
        assert!(store.writes.is_empty());
    }

    #[test]
    fn terminal_session_ignores_further_polls() {
        let mut store = RecordingStore::default();
        let mut session = ProvisioningSession::new(1);

        assert_eq!(session.poll(None, &mut store), SessionState::TimedOut);
        assert_eq!(
            session.poll(Some(FULL_MESSAGE), &mut store),
            SessionState::TimedOut
        );
        assert!(store.writes.is_empty());
    }

    #[derive(Default)]
    struct CountingRadio {
        shutdowns: u32,
    }

    impl RadioControl for CountingRadio {
        fn shutdown(&mut self) {
            self.shutdowns += 1;
        }
    }

    #[test]
    fn run_session_completes_and_shuts_radio_down_once() {
        let mailbox = Mailbox::new();
        mailbox.publish(FULL_MESSAGE.to_string());

        let mut store = RecordingStore::default();
        let mut radio = CountingRadio::default();
        let mut session = ProvisioningSession::new(120);
        let mut waits = 0;

        let state = run_session(&mut session, &mailbox, &mut store, &mut radio, || {
            waits += 1;
        });

        assert_eq!(state, SessionState::Complete);
        assert_eq!(radio.shutdowns, 1);
        assert_eq!(waits, 0);
    }

    #[test]
    fn run_session_times_out_and_shuts_radio_down_once() {
        let mailbox: Mailbox<String> = Mailbox::new();
        let mut store = RecordingStore::default();
        let mut radio = CountingRadio::default();
        let mut session = ProvisioningSession::new(3);
        let mut waits = 0;

        let state = run_session(&mut session, &mailbox, &mut store, &mut radio, || {
            waits += 1;
        });

        assert_eq!(state, SessionState::TimedOut);
        assert_eq!(radio.shutdowns, 1);
        assert_eq!(waits, 2);
    }
}
