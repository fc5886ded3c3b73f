use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Serialize;

use crate::scan::{Finding, FindingKind};

/// Source file recorded on findings produced by the emulated run.
pub const DYNAMIC_SOURCE: &str = "<dynamic>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Init,
    EnvSetup,
    Emulating,
    BootWait,
    PortScan,
    Fuzz,
    Teardown,
    Done,
    Failed,
}

impl SessionState {
    /// Legal forward transitions. Cancellation may jump from any post-launch
    /// phase straight to `Teardown`.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Init, EnvSetup)
                | (EnvSetup, Emulating)
                | (EnvSetup, Failed)
                | (Emulating, BootWait)
                | (Emulating, Teardown)
                | (Emulating, Failed)
                | (BootWait, PortScan)
                | (BootWait, Teardown)
                | (PortScan, Fuzz)
                | (PortScan, Teardown)
                | (Fuzz, Teardown)
                | (Teardown, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }
}

/// State of one emulated run, threaded explicitly through every phase.
#[derive(Debug, Clone, Serialize)]
pub struct DynamicSession {
    state: SessionState,
    pub kernel: Option<PathBuf>,
    pub rootfs: Option<PathBuf>,
    pub open_ports: BTreeSet<u16>,
    pub fuzz_findings: Vec<String>,
    pub timeline: Vec<String>,
}

impl Default for DynamicSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicSession {
    pub fn new() -> Self {
        let mut session = Self {
            state: SessionState::Init,
            kernel: None,
            rootfs: None,
            open_ports: BTreeSet::new(),
            fuzz_findings: Vec::new(),
            timeline: Vec::new(),
        };
        session.log("Starting dynamic analysis");
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Moves to `next`. Illegal transitions are refused and logged; the return
    /// value reports whether the move happened.
    pub fn advance(&mut self, next: SessionState) -> bool {
        if !self.state.can_advance_to(next) {
            tracing::error!("Refusing session transition {:?} -> {:?}", self.state, next);
            return false;
        }
        tracing::debug!("Dynamic session {:?} -> {:?}", self.state, next);
        self.state = next;
        true
    }

    pub fn fail(&mut self, reason: impl std::fmt::Display) {
        self.log(format!("Dynamic analysis failed: {}", reason));
        self.advance(SessionState::Failed);
    }

    /// Appends a `[HH:MM:SS] message` line to the timeline.
    pub fn log(&mut self, message: impl AsRef<str>) {
        let line = format!(
            "[{}] {}",
            chrono::Local::now().format("%H:%M:%S"),
            message.as_ref()
        );
        tracing::info!("{}", line);
        self.timeline.push(line);
    }

    pub fn into_findings(self) -> Vec<Finding> {
        let ports = self.open_ports.into_iter().map(|port| {
            Finding::new(FindingKind::OpenPort, DYNAMIC_SOURCE, u64::from(port), port.to_string())
        });
        let fuzz = self
            .fuzz_findings
            .into_iter()
            .enumerate()
            .map(|(idx, text)| Finding::new(FindingKind::FuzzResult, DYNAMIC_SOURCE, idx as u64, text));
        let timeline = self
            .timeline
            .into_iter()
            .enumerate()
            .map(|(idx, text)| Finding::new(FindingKind::Timeline, DYNAMIC_SOURCE, idx as u64, text));
        ports.chain(fuzz).chain(timeline).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut session = DynamicSession::new();
        for next in [
            SessionState::EnvSetup,
            SessionState::Emulating,
            SessionState::BootWait,
            SessionState::PortScan,
            SessionState::Fuzz,
            SessionState::Teardown,
            SessionState::Done,
        ] {
            assert!(session.advance(next), "transition to {:?}", next);
        }
        assert!(session.state().is_terminal());
    }

    #[test]
    fn test_skipping_phases_is_refused() {
        let mut session = DynamicSession::new();
        assert!(!session.advance(SessionState::PortScan));
        assert_eq!(session.state(), SessionState::Init);
    }

    #[test]
    fn test_timeline_format() {
        let session = DynamicSession::new();
        let line = &session.timeline[0];
        assert_eq!(&line[0..1], "[");
        assert_eq!(&line[9..11], "] ");
        assert!(line.ends_with("Starting dynamic analysis"));
    }

    #[test]
    fn test_into_findings_keeps_ports_typed() {
        let mut session = DynamicSession::new();
        session.open_ports.insert(8080);
        session.open_ports.insert(22);
        session.fuzz_findings.push("Possible vulnerability on port 22 with payload AAAA".to_string());

        let findings = session.into_findings();
        let ports: Vec<u64> = findings
            .iter()
            .filter(|f| f.kind == FindingKind::OpenPort)
            .map(|f| f.line_or_offset)
            .collect();
        assert_eq!(ports, vec![22, 8080]);
        assert_eq!(findings.iter().filter(|f| f.kind == FindingKind::FuzzResult).count(), 1);
        assert_eq!(findings.iter().filter(|f| f.kind == FindingKind::Timeline).count(), 1);
    }
}
