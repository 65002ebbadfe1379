/// Connection lifecycle, shared by both engines.
///
/// `CLOSED -> SYN_SENT` (active open) or `CLOSED -> LISTEN -> ESTABLISHED`
/// (passive open) `-> ESTABLISHED -> FIN_WAIT -> CLOSED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnState {
    #[default]
    Closed,
    Listen,
    SynSent,
    Established,
    FinWait,
}

impl ConnState {
    pub fn is_established(&self) -> bool {
        matches!(self, ConnState::Established)
    }
}
